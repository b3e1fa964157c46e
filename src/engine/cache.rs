//! 渲染缓存管理
//! 按文章缓存改写结果（MessagePack），以规则库版本号与原文哈希校验有效性
//! 规则作用域依赖请求路径，哈希同时覆盖原文与规范化后的请求路径

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use rmp_serde::{Serializer, from_slice};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{LinkResult, LinkifyError};
use crate::host::KeyValueStore;

/// 缓存条目
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedRender {
    pub version: u64,
    pub content_hash: u64,
    pub html: String,
}

/// 原文与请求路径的联合哈希
pub fn content_hash(content: &str, request_path: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    content.hash(&mut hasher);
    request_path.hash(&mut hasher);
    hasher.finish()
}

/// 渲染缓存管理器
pub struct RenderCache {
    kv: Arc<dyn KeyValueStore>,
    prefix: String,
}

impl RenderCache {
    pub fn new(kv: Arc<dyn KeyValueStore>, prefix: impl Into<String>) -> Self {
        Self {
            kv,
            prefix: prefix.into(),
        }
    }

    fn key(&self, post_id: u64) -> String {
        format!("{}{}", self.prefix, post_id)
    }

    /// 读取缓存；版本号或原文哈希不一致、条目损坏时视为未命中
    pub fn get(&self, post_id: u64, version: u64, hash: u64) -> LinkResult<Option<String>> {
        let Some(raw) = self.kv.get(&self.key(post_id))? else {
            return Ok(None);
        };

        let entry: CachedRender = match from_slice(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                debug!("渲染缓存反序列化失败，按未命中处理：文章 #{}，错误：{}", post_id, e);
                return Ok(None);
            }
        };

        if entry.version != version || entry.content_hash != hash {
            debug!(
                "渲染缓存已过期：文章 #{}，缓存版本 {}，当前版本 {}",
                post_id, entry.version, version
            );
            return Ok(None);
        }
        Ok(Some(entry.html))
    }

    pub fn put(&self, post_id: u64, entry: &CachedRender) -> LinkResult<()> {
        let mut data = Vec::new();
        entry
            .serialize(&mut Serializer::new(&mut data))
            .map_err(|e| LinkifyError::MsgPackError(format!("序列化失败：{}", e)))?;

        debug!("渲染结果已缓存：文章 #{}，{} 字节", post_id, data.len());
        self.kv.set(&self.key(post_id), data)
    }

    /// 清除全部渲染缓存，返回清除条数
    pub fn purge(&self) -> LinkResult<usize> {
        let keys = self.kv.keys_with_prefix(&self.prefix)?;
        for key in &keys {
            self.kv.delete(key)?;
        }
        debug!("渲染缓存已清空：{} 条", keys.len());
        Ok(keys.len())
    }
}

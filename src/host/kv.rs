//! 通用键值存储
//! 规则库记录与渲染缓存都经由该接口持久化，值为不透明字节

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use rmp_serde::{Serializer, from_slice};
use serde::Serialize;
use tracing::debug;

use crate::error::{LinkResult, LinkifyError};

/// 宿主提供的键值存储
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> LinkResult<Option<Vec<u8>>>;
    fn set(&self, key: &str, value: Vec<u8>) -> LinkResult<()>;
    fn delete(&self, key: &str) -> LinkResult<()>;
    /// 列出指定前缀的全部键
    fn keys_with_prefix(&self, prefix: &str) -> LinkResult<Vec<String>>;
}

fn poisoned<E>(_: E) -> LinkifyError {
    LinkifyError::Storage("存储锁已损坏".to_string())
}

/// 进程内存储（测试与嵌入场景）
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> LinkResult<Option<Vec<u8>>> {
        let entries = self.entries.read().map_err(poisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: Vec<u8>) -> LinkResult<()> {
        let mut entries = self.entries.write().map_err(poisoned)?;
        entries.insert(key.to_string(), value);
        Ok(())
    }

    fn delete(&self, key: &str) -> LinkResult<()> {
        let mut entries = self.entries.write().map_err(poisoned)?;
        entries.remove(key);
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> LinkResult<Vec<String>> {
        let entries = self.entries.read().map_err(poisoned)?;
        let mut keys: Vec<String> = entries
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }
}

/// 单文件存储：整个键值表以 MessagePack 序列化写入一个文件
/// 每次写操作都会整体落盘
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl FileStore {
    /// 打开数据文件，不存在时视为空表
    pub fn open(path: impl AsRef<Path>) -> LinkResult<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = if path.exists() {
            let data = std::fs::read(&path)?;
            let table: HashMap<String, Vec<u8>> = from_slice(&data)
                .map_err(|e| LinkifyError::MsgPackError(format!("反序列化失败：{}", e)))?;
            debug!("数据文件加载成功，键数量：{}", table.len());
            table
        } else {
            HashMap::new()
        };

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self, entries: &HashMap<String, Vec<u8>>) -> LinkResult<()> {
        let mut data = Vec::new();
        entries
            .serialize(&mut Serializer::new(&mut data))
            .map_err(|e| LinkifyError::MsgPackError(format!("序列化失败：{}", e)))?;
        std::fs::write(&self.path, data)?;
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> LinkResult<Option<Vec<u8>>> {
        let entries = self.entries.lock().map_err(poisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: Vec<u8>) -> LinkResult<()> {
        let mut entries = self.entries.lock().map_err(poisoned)?;
        entries.insert(key.to_string(), value);
        self.flush(&entries)
    }

    fn delete(&self, key: &str) -> LinkResult<()> {
        let mut entries = self.entries.lock().map_err(poisoned)?;
        if entries.remove(key).is_some() {
            self.flush(&entries)?;
        }
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> LinkResult<Vec<String>> {
        let entries = self.entries.lock().map_err(poisoned)?;
        let mut keys: Vec<String> = entries
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }
}

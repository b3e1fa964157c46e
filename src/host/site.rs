//! 站点身份与内容目录

use std::collections::HashMap;

use url::Url;

use crate::error::LinkResult;

/// 站点身份：用于内外链判定、相对地址补全与 {site_name} 变量
pub trait SiteIdentity: Send + Sync {
    /// 站点主机名（小写，不含端口）
    fn host(&self) -> String;
    /// 站点根地址，如 `https://example.com/`
    fn base_url(&self) -> String;
    fn site_name(&self) -> String;
}

/// 内容目录：把文章引用解析为可访问的固定链接
pub trait ContentDirectory: Send + Sync {
    fn permalink(&self, post_id: u64) -> Option<String>;
}

/// 固定站点配置
#[derive(Debug, Clone)]
pub struct StaticSite {
    base: Url,
    name: String,
}

impl StaticSite {
    pub fn new(base_url: &str, name: impl Into<String>) -> LinkResult<Self> {
        let base = Url::parse(base_url)?;
        Ok(Self {
            base,
            name: name.into(),
        })
    }
}

impl SiteIdentity for StaticSite {
    fn host(&self) -> String {
        self.base.host_str().unwrap_or_default().to_lowercase()
    }

    fn base_url(&self) -> String {
        self.base.to_string()
    }

    fn site_name(&self) -> String {
        self.name.clone()
    }
}

/// 基于内存映射的内容目录
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    permalinks: HashMap<u64, String>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_post(mut self, post_id: u64, permalink: impl Into<String>) -> Self {
        self.permalinks.insert(post_id, permalink.into());
        self
    }

    pub fn insert(&mut self, post_id: u64, permalink: impl Into<String>) {
        self.permalinks.insert(post_id, permalink.into());
    }
}

impl ContentDirectory for StaticDirectory {
    fn permalink(&self, post_id: u64) -> Option<String> {
        self.permalinks.get(&post_id).cloned()
    }
}

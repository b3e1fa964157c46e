//! 渲染上下文：每次渲染/预览显式传入，不依赖任何全局请求状态

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// 内容所处位置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextKind {
    /// 正文内容
    #[default]
    Content,
    /// 侧边栏等小工具区域
    Widget,
}

/// 当前文章信息（UTM 变量与作用域判断使用）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostInfo {
    pub id: u64,
    #[serde(default)]
    pub slug: String,
    #[serde(default)]
    pub post_type: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub author: String,
    /// 主分类/主要分类法词条
    #[serde(default)]
    pub primary_term: Option<String>,
}

impl PostInfo {
    pub fn new(id: u64, post_type: impl Into<String>) -> Self {
        Self {
            id,
            post_type: post_type.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderContext {
    /// 非文章页面（归档、首页等）为 None
    pub post: Option<PostInfo>,
    /// 当前请求地址，绝对地址或 `path[?query]` 均可
    pub request_url: String,
    pub kind: ContextKind,
    /// {date} 变量取值
    pub today: NaiveDate,
}

impl RenderContext {
    /// 正文上下文
    pub fn content(request_url: impl Into<String>) -> Self {
        Self {
            post: None,
            request_url: request_url.into(),
            kind: ContextKind::Content,
            today: Utc::now().date_naive(),
        }
    }

    /// 小工具上下文
    pub fn widget(request_url: impl Into<String>) -> Self {
        Self {
            kind: ContextKind::Widget,
            ..Self::content(request_url)
        }
    }

    pub fn with_post(mut self, post: PostInfo) -> Self {
        self.post = Some(post);
        self
    }

    pub fn with_date(mut self, today: NaiveDate) -> Self {
        self.today = today;
        self
    }

    pub fn is_widget(&self) -> bool {
        self.kind == ContextKind::Widget
    }

    pub fn post_type(&self) -> Option<&str> {
        self.post.as_ref().map(|p| p.post_type.as_str())
    }

    pub fn post_id(&self) -> Option<u64> {
        self.post.as_ref().map(|p| p.id)
    }
}

/// 宿主内容源：提供待改写的 HTML 及其上下文
pub trait ContentSource {
    fn content(&self) -> String;
    fn context(&self) -> RenderContext;
}

//! 规则库数据模型定义
//! 仅存储记录数据与默认值，校验与归一化见 validate 模块

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 规则目标地址
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Destination {
    /// 站内文章引用，运行时解析为固定链接
    Post(u64),
    /// 任意地址（绝对或站内相对）
    Url(String),
}

impl Default for Destination {
    fn default() -> Self {
        Destination::Url(String::new())
    }
}

/// 规则使用的 UTM 模板
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UtmChoice {
    /// 继承分类的默认模板
    #[default]
    Inherit,
    Template(u64),
    None,
}

/// UTM 作用范围（按目标地址的内外链属性）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyTo {
    Internal,
    External,
    #[default]
    Both,
}

impl ApplyTo {
    pub fn accepts(self, is_internal: bool) -> bool {
        match self {
            ApplyTo::Internal => is_internal,
            ApplyTo::External => !is_internal,
            ApplyTo::Both => true,
        }
    }
}

/// UTM 参数合并方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppendMode {
    /// 保留已有值，只补充缺失的键
    #[default]
    AppendIfMissing,
    /// 强制覆盖
    AlwaysOverwrite,
    /// 从不覆盖：已存在的键跳过，缺失的键照常补充
    Never,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleStatus {
    #[default]
    Active,
    Inactive,
}

/// 标题内的链接策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeadingPolicy {
    #[default]
    None,
    Selected,
    All,
}

impl HeadingPolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "none" => Some(HeadingPolicy::None),
            "selected" => Some(HeadingPolicy::Selected),
            "all" => Some(HeadingPolicy::All),
            _ => None,
        }
    }
}

/// 链接属性
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkAttributes {
    #[serde(default)]
    pub title_text: Option<String>,
    #[serde(default)]
    pub nofollow: bool,
    #[serde(default)]
    pub new_tab: bool,
}

/// 频率限制；None 表示回落到默认值（页）或不限（块）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleLimits {
    #[serde(default)]
    pub max_per_page: Option<u32>,
    #[serde(default)]
    pub max_per_block: Option<u32>,
}

/// 可插入链接的位置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    #[serde(default)]
    pub headings: HeadingPolicy,
    /// 小写标签名，如 `h2`
    #[serde(default)]
    pub heading_levels: Vec<String>,
    #[serde(default = "default_true")]
    pub paragraphs: bool,
    #[serde(default = "default_true")]
    pub lists: bool,
    #[serde(default)]
    pub captions: bool,
    #[serde(default)]
    pub widgets: bool,
}

impl Default for Placement {
    fn default() -> Self {
        Self {
            headings: HeadingPolicy::None,
            heading_levels: Vec::new(),
            paragraphs: true,
            lists: true,
            captions: false,
            widgets: false,
        }
    }
}

/// 生效范围
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleScope {
    #[serde(default)]
    pub post_types: Vec<String>,
    #[serde(default)]
    pub whitelist: Vec<String>,
    #[serde(default)]
    pub blacklist: Vec<String>,
}

/// 关键词链接规则
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    /// 0 表示尚未保存
    #[serde(default)]
    pub id: u64,
    pub title: String,
    pub keywords: Vec<String>,
    #[serde(default)]
    pub category_id: Option<u64>,
    pub destination: Destination,
    #[serde(default)]
    pub utm_template: UtmChoice,
    #[serde(default)]
    pub utm_apply_to: ApplyTo,
    #[serde(default)]
    pub attributes: LinkAttributes,
    #[serde(default)]
    pub limits: RuleLimits,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub status: RuleStatus,
    #[serde(default)]
    pub placement: Placement,
    #[serde(default)]
    pub scope: RuleScope,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Rule {
    /// 以标题、关键词与目标地址快速创建（其余字段取默认值）
    pub fn new(title: impl Into<String>, keywords: &[&str], destination: Destination) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            title: title.into(),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            category_id: None,
            destination,
            utm_template: UtmChoice::Inherit,
            utm_apply_to: ApplyTo::Both,
            attributes: LinkAttributes::default(),
            limits: RuleLimits::default(),
            priority: 0,
            status: RuleStatus::Active,
            placement: Placement::default(),
            scope: RuleScope::default(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == RuleStatus::Active
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {}", self.id, self.title)
    }
}

/// 规则分类
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    #[serde(default)]
    pub id: u64,
    pub name: String,
    #[serde(default = "default_color")]
    pub color: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub default_utm_template_id: Option<u64>,
    /// 单页内该分类全部规则的替换总上限，0 为不限
    #[serde(default)]
    pub category_cap: u32,
}

impl Category {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: 0,
            name: name.into(),
            color: default_color(),
            description: String::new(),
            default_utm_template_id: None,
            category_cap: 0,
        }
    }
}

/// UTM 参数模板
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtmTemplate {
    #[serde(default)]
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub medium: String,
    #[serde(default)]
    pub campaign: String,
    #[serde(default)]
    pub term: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub apply_to: ApplyTo,
    #[serde(default)]
    pub append_mode: AppendMode,
}

impl UtmTemplate {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: 0,
            name: name.into(),
            source: String::new(),
            medium: String::new(),
            campaign: String::new(),
            term: String::new(),
            content: String::new(),
            apply_to: ApplyTo::Both,
            append_mode: AppendMode::AppendIfMissing,
        }
    }

    /// 五个字段与对应的查询参数名
    pub fn fields(&self) -> [(&'static str, &str); 5] {
        [
            ("utm_source", self.source.as_str()),
            ("utm_medium", self.medium.as_str()),
            ("utm_campaign", self.campaign.as_str()),
            ("utm_term", self.term.as_str()),
            ("utm_content", self.content.as_str()),
        ]
    }
}

/// 模块全局设置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub default_max_links_per_page: u32,
    pub default_heading_behavior: HeadingPolicy,
    pub default_heading_levels: Vec<String>,
    pub avoid_existing_links: bool,
    pub prefer_word_boundaries: bool,
    pub normalize_accents: bool,
    pub cache_rendered_content: bool,
    pub chunk_long_documents: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_max_links_per_page: 3,
            default_heading_behavior: HeadingPolicy::None,
            default_heading_levels: vec!["h2".to_string(), "h3".to_string()],
            avoid_existing_links: true,
            prefer_word_boundaries: true,
            normalize_accents: false,
            cache_rendered_content: true,
            chunk_long_documents: true,
        }
    }
}

fn default_true() -> bool {
    true
}

pub(crate) fn default_color() -> String {
    "#2271b1".to_string()
}

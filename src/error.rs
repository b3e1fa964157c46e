//! 全局错误类型定义

use std::fmt;

use thiserror::Error;
use serde::Serialize;
use serde_json::Error as SerdeJsonError;
use std::io::Error as IoError;
use url::ParseError as UrlParseError;

/// 校验失败的原因分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationCode {
    Required,
    Empty,
    Unresolvable,
    UnknownReference,
    Invalid,
}

/// 单个字段的校验错误
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: &'static str,
    pub code: ValidationCode,
    pub message: String,
}

/// 一次保存操作的全部校验错误（非空）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationErrors(pub Vec<FieldError>);

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, field: &'static str, code: ValidationCode, message: impl Into<String>) {
        self.0.push(FieldError {
            field,
            code,
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// 是否包含指定字段的错误
    pub fn has_field(&self, field: &str) -> bool {
        self.0.iter().any(|e| e.field == field)
    }

    /// 无错误时返回 Ok，否则转换为全局错误
    pub fn into_result(self) -> LinkResult<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(LinkifyError::Validation(self))
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .0
            .iter()
            .map(|e| format!("{}: {}", e.field, e.message))
            .collect();
        write!(f, "{}", parts.join("; "))
    }
}

/// 记录类型（用于 NotFound 等错误）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Rule,
    Category,
    UtmTemplate,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKind::Rule => write!(f, "rule"),
            RecordKind::Category => write!(f, "category"),
            RecordKind::UtmTemplate => write!(f, "utm_template"),
        }
    }
}

#[derive(Error, Debug)]
pub enum LinkifyError {
    // 规则库相关错误
    #[error("校验失败：{0}")]
    Validation(ValidationErrors),
    #[error("{kind} 不存在：{id}")]
    NotFound { kind: RecordKind, id: u64 },
    #[error("分类 {id} 仍被 {rules} 条规则引用，需指定重新分配目标")]
    CategoryInUse { id: u64, rules: usize },
    #[error("存储读写失败：{0}")]
    Storage(String),
    #[error("数据迁移失败：{0}")]
    Migration(String),

    // 预览抓取相关错误
    #[error("网络请求失败：{0}")]
    HttpError(#[from] reqwest::Error),
    #[error("目标地址不属于本站：{0}")]
    ForeignHost(String),
    #[error("页面内容为空：{0}")]
    EmptyBody(String),

    // 序列化/反序列化错误
    #[error("JSON解析失败：{0}")]
    JsonError(#[from] SerdeJsonError),
    #[error("MessagePack序列化/反序列化失败：{0}")]
    MsgPackError(String),

    // 基础错误
    #[error("IO操作失败：{0}")]
    IoError(#[from] IoError),
    #[error("URL解析失败：{0}")]
    UrlError(#[from] UrlParseError),
}

impl LinkifyError {
    /// 取出结构化校验错误（其他错误返回 None）
    pub fn validation(&self) -> Option<&ValidationErrors> {
        match self {
            LinkifyError::Validation(errors) => Some(errors),
            _ => None,
        }
    }
}

// 全局Result类型
pub type LinkResult<T> = Result<T, LinkifyError>;

//! 规则作用域判定：小工具开关、文章类型、URL 白名单/黑名单

use regex::Regex;
use tracing::debug;
use url::Url;

use super::runtime::RuntimeRule;
use crate::host::RenderContext;

/// 编译后的 URL 通配模式
/// `*` 匹配不含 `/` 的任意串，`**` 匹配任意串；整体忽略大小写
#[derive(Debug, Clone)]
pub struct GlobPattern {
    regex: Option<Regex>,
}

impl GlobPattern {
    pub fn new(pattern: &str) -> Self {
        let raw = pattern.trim().to_lowercase();
        let regex = match Regex::new(&glob_to_regex(&raw)) {
            Ok(regex) => Some(regex),
            Err(e) => {
                // 无法编译的模式永不命中
                debug!("URL 通配模式无法编译：{}，错误：{}", raw, e);
                None
            }
        };
        Self { regex }
    }

    pub fn is_match(&self, normalized_url: &str) -> bool {
        self.regex
            .as_ref()
            .is_some_and(|regex| regex.is_match(normalized_url))
    }
}

fn glob_to_regex(pattern: &str) -> String {
    let mut regex = String::with_capacity(pattern.len() * 2 + 2);
    regex.push('^');
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '*' {
            if chars.peek() == Some(&'*') {
                chars.next();
                regex.push_str(".*");
            } else {
                regex.push_str("[^/]*");
            }
        } else {
            regex.push_str(&regex::escape(&c.to_string()));
        }
    }
    regex.push('$');
    regex
}

/// 把请求地址归一化为小写的 `path[?query]`
pub fn normalize_request_url(url: &str) -> String {
    let trimmed = url.trim();
    if let Ok(parsed) = Url::parse(trimmed) {
        if parsed.has_host() {
            let mut normalized = parsed.path().to_string();
            if let Some(query) = parsed.query().filter(|q| !q.is_empty()) {
                normalized.push('?');
                normalized.push_str(query);
            }
            return normalized.to_lowercase();
        }
    }

    let without_fragment = trimmed.split('#').next().unwrap_or_default();
    let mut normalized = if without_fragment.starts_with('/') {
        without_fragment.to_string()
    } else {
        format!("/{}", without_fragment)
    };
    if normalized.ends_with('?') {
        normalized.pop();
    }
    normalized.to_lowercase()
}

/// 规则在当前上下文是否生效
pub fn matches_scope(rule: &RuntimeRule, ctx: &RenderContext) -> bool {
    if ctx.is_widget() && !rule.placement.widgets {
        return false;
    }

    if !rule.post_types.is_empty() {
        match ctx.post_type() {
            Some(post_type) => {
                let post_type = post_type.to_lowercase();
                if !rule.post_types.iter().any(|t| *t == post_type) {
                    return false;
                }
            }
            // 非文章页面不满足文章类型限制
            None => return false,
        }
    }

    if rule.whitelist.is_empty() && rule.blacklist.is_empty() {
        return true;
    }

    let url = normalize_request_url(&ctx.request_url);
    if !rule.whitelist.is_empty() && !rule.whitelist.iter().any(|p| p.is_match(&url)) {
        return false;
    }
    !rule.blacklist.iter().any(|p| p.is_match(&url))
}

//! UTM 追踪参数
//! 模板字段先做变量替换，再按合并方式写入目标地址的查询串

use std::borrow::Cow;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use url::Url;

use super::runtime::RuntimeRule;
use crate::host::RenderContext;
use crate::rule::AppendMode;

/// 变量取值来源
pub struct UtmTokens<'a> {
    pub keyword: &'a str,
    pub rule_id: u64,
    pub site_name: &'a str,
    pub ctx: &'a RenderContext,
}

impl UtmTokens<'_> {
    /// 未知变量返回 None（保留原文）
    pub fn value(&self, token: &str) -> Option<String> {
        let post = self.ctx.post.as_ref();
        let value = match token {
            "keyword" => self.keyword.to_string(),
            "rule_id" => self.rule_id.to_string(),
            "site_name" => self.site_name.to_string(),
            "post_id" => post.map(|p| p.id.to_string()).unwrap_or_default(),
            "post_slug" => post.map(|p| p.slug.clone()).unwrap_or_default(),
            "post_type" => post.map(|p| p.post_type.clone()).unwrap_or_default(),
            "post_title" => post.map(|p| p.title.clone()).unwrap_or_default(),
            "category" => post.and_then(|p| p.primary_term.clone()).unwrap_or_default(),
            "author" => post.map(|p| p.author.clone()).unwrap_or_default(),
            "date" => self.ctx.today.format("%Y-%m-%d").to_string(),
            _ => return None,
        };
        Some(value)
    }

    /// 替换字段中的 `{token}` 占位符
    pub fn substitute<'t>(&self, template: &'t str) -> Cow<'t, str> {
        static TOKEN_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{([a-z_]+)\}").unwrap());

        TOKEN_REGEX.replace_all(template, |caps: &Captures| {
            self.value(&caps[1]).unwrap_or_else(|| caps[0].to_string())
        })
    }
}

/// 为目标地址附加 UTM 参数；不适用时原样返回
pub fn apply_utms_to_url(url: &str, rule: &RuntimeRule, tokens: &UtmTokens<'_>) -> String {
    let Some(template) = rule.utm_template.as_ref() else {
        return url.to_string();
    };
    // 规则与模板的作用范围都必须接受该地址
    if !rule.utm_apply_to.accepts(rule.is_internal) || !template.apply_to.accepts(rule.is_internal) {
        return url.to_string();
    }
    let Ok(mut parsed) = Url::parse(url) else {
        return url.to_string();
    };

    let mut pairs: Vec<(String, String)> = parsed.query_pairs().into_owned().collect();

    let mut changed = false;
    for (key, raw) in template.fields() {
        let value = tokens.substitute(raw);
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        match pairs.iter_mut().find(|(k, _)| k == key) {
            // 只有强制覆盖会改写已有的键
            Some(existing) => {
                if template.append_mode == AppendMode::AlwaysOverwrite && existing.1 != value {
                    existing.1 = value.to_string();
                    changed = true;
                }
            }
            None => {
                pairs.push((key.to_string(), value.to_string()));
                changed = true;
            }
        }
    }

    if !changed {
        return url.to_string();
    }

    // 查询串整体重建，片段由 Url 保留
    parsed.query_pairs_mut().clear().extend_pairs(pairs.iter());
    parsed.to_string()
}

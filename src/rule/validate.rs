//! 记录校验与归一化
//! 所有写入规则库的记录都先经过这里；校验失败返回结构化错误，不做任何写入

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use super::model::{
    Category, Destination, HeadingPolicy, Rule, Settings, UtmChoice, UtmTemplate, default_color,
};
use crate::error::{ValidationCode, ValidationErrors};
use crate::host::ContentDirectory;

/// 频率上限的取值范围
pub const MAX_LIMIT: u32 = 50;
/// 优先级取值范围
pub const PRIORITY_RANGE: (i32, i32) = (-1000, 1000);

const HEADING_TAGS: [&str; 6] = ["h1", "h2", "h3", "h4", "h5", "h6"];

/// 校验规则时需要的外部引用
pub struct References<'a> {
    pub directory: &'a dyn ContentDirectory,
    pub category_ids: &'a HashSet<u64>,
    pub template_ids: &'a HashSet<u64>,
}

/// 关键词：去空白、去空、忽略大小写去重（保留首次出现的写法）
pub fn normalize_keywords(keywords: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut result = Vec::with_capacity(keywords.len());
    for keyword in keywords {
        let trimmed = keyword.trim();
        if trimmed.is_empty() {
            continue;
        }
        if seen.insert(trimmed.to_lowercase()) {
            result.push(trimmed.to_string());
        }
    }
    result
}

/// 标题级别：小写、仅保留 h1-h6、去重并按级别排序
pub fn normalize_heading_levels(levels: &[String]) -> Vec<String> {
    let wanted: HashSet<String> = levels.iter().map(|l| l.trim().to_lowercase()).collect();
    HEADING_TAGS
        .iter()
        .filter(|tag| wanted.contains(**tag))
        .map(|tag| tag.to_string())
        .collect()
}

/// 通配模式只去首尾空白，不做语法校验
pub fn normalize_patterns(patterns: &[String]) -> Vec<String> {
    patterns
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn normalize_post_types(post_types: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    post_types
        .iter()
        .map(|p| p.trim().to_lowercase())
        .filter(|p| !p.is_empty() && seen.insert(p.clone()))
        .collect()
}

pub fn clamp_limit(value: Option<u32>) -> Option<u32> {
    value.map(|v| v.min(MAX_LIMIT))
}

fn normalize_color(color: &str) -> String {
    static HEX_COLOR: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"^#?([0-9a-fA-F]{6}|[0-9a-fA-F]{3})$").unwrap());

    let trimmed = color.trim();
    match HEX_COLOR.captures(trimmed) {
        Some(caps) => {
            let hex = caps[1].to_lowercase();
            if hex.len() == 3 {
                // #abc -> #aabbcc
                let expanded: String = hex.chars().flat_map(|c| [c, c]).collect();
                format!("#{}", expanded)
            } else {
                format!("#{}", hex)
            }
        }
        None => default_color(),
    }
}

/// 校验并归一化规则
pub fn validate_rule(rule: Rule, refs: &References<'_>) -> Result<Rule, ValidationErrors> {
    let mut errors = ValidationErrors::new();
    let mut rule = rule;

    rule.title = rule.title.trim().to_string();
    if rule.title.is_empty() {
        errors.push("title", ValidationCode::Required, "标题不能为空");
    }

    rule.keywords = normalize_keywords(&rule.keywords);
    if rule.keywords.is_empty() {
        errors.push("keywords", ValidationCode::Required, "至少需要一个非空关键词");
    }

    rule.destination = match std::mem::take(&mut rule.destination) {
        Destination::Post(post_id) => {
            if refs.directory.permalink(post_id).is_none() {
                errors.push(
                    "destination",
                    ValidationCode::Unresolvable,
                    format!("文章 {} 不存在或不可访问", post_id),
                );
            }
            Destination::Post(post_id)
        }
        Destination::Url(url) => {
            let trimmed = url.trim().to_string();
            if trimmed.is_empty() {
                errors.push("destination", ValidationCode::Empty, "目标地址不能为空");
            }
            Destination::Url(trimmed)
        }
    };

    if let Some(category_id) = rule.category_id {
        if !refs.category_ids.contains(&category_id) {
            errors.push(
                "category_id",
                ValidationCode::UnknownReference,
                format!("分类 {} 不存在", category_id),
            );
        }
    }

    if let UtmChoice::Template(template_id) = rule.utm_template {
        if !refs.template_ids.contains(&template_id) {
            errors.push(
                "utm_template",
                ValidationCode::UnknownReference,
                format!("UTM 模板 {} 不存在", template_id),
            );
        }
    }

    rule.attributes.title_text = rule
        .attributes
        .title_text
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty());
    rule.limits.max_per_page = clamp_limit(rule.limits.max_per_page);
    rule.limits.max_per_block = clamp_limit(rule.limits.max_per_block);
    rule.priority = rule.priority.clamp(PRIORITY_RANGE.0, PRIORITY_RANGE.1);
    rule.placement.heading_levels = normalize_heading_levels(&rule.placement.heading_levels);
    rule.scope.post_types = normalize_post_types(&rule.scope.post_types);
    rule.scope.whitelist = normalize_patterns(&rule.scope.whitelist);
    rule.scope.blacklist = normalize_patterns(&rule.scope.blacklist);

    if errors.is_empty() { Ok(rule) } else { Err(errors) }
}

/// 校验并归一化分类
pub fn validate_category(
    category: Category,
    template_ids: &HashSet<u64>,
) -> Result<Category, ValidationErrors> {
    let mut errors = ValidationErrors::new();
    let mut category = category;

    category.name = category.name.trim().to_string();
    if category.name.is_empty() {
        errors.push("name", ValidationCode::Required, "分类名称不能为空");
    }
    category.color = normalize_color(&category.color);
    category.description = category.description.trim().to_string();
    category.category_cap = category.category_cap.min(MAX_LIMIT);

    if let Some(template_id) = category.default_utm_template_id {
        if !template_ids.contains(&template_id) {
            errors.push(
                "default_utm_template_id",
                ValidationCode::UnknownReference,
                format!("UTM 模板 {} 不存在", template_id),
            );
        }
    }

    if errors.is_empty() { Ok(category) } else { Err(errors) }
}

/// 校验并归一化 UTM 模板
pub fn validate_template(template: UtmTemplate) -> Result<UtmTemplate, ValidationErrors> {
    let mut errors = ValidationErrors::new();
    let mut template = template;

    template.name = template.name.trim().to_string();
    if template.name.is_empty() {
        errors.push("name", ValidationCode::Required, "模板名称不能为空");
    }
    for field in [
        &mut template.source,
        &mut template.medium,
        &mut template.campaign,
        &mut template.term,
        &mut template.content,
    ] {
        *field = field.trim().to_string();
    }

    if errors.is_empty() { Ok(template) } else { Err(errors) }
}

/// 将提交的设置合并到默认值之上
/// 无效输入静默回落到默认值，从不报错
pub fn settings_from_value(input: &Value) -> Settings {
    let defaults = Settings::default();
    let Some(map) = input.as_object() else {
        return defaults;
    };

    let max_links = map
        .get("default_max_links_per_page")
        .and_then(coerce_u64)
        .map(|v| v.min(MAX_LIMIT as u64) as u32)
        .unwrap_or(defaults.default_max_links_per_page);

    let heading_behavior = map
        .get("default_heading_behavior")
        .and_then(Value::as_str)
        .and_then(HeadingPolicy::parse)
        .unwrap_or(defaults.default_heading_behavior);

    let heading_levels = match map.get("default_heading_levels") {
        Some(Value::Array(items)) => {
            let levels: Vec<String> = items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect();
            normalize_heading_levels(&levels)
        }
        Some(Value::String(s)) => {
            let levels: Vec<String> = s.split(',').map(str::to_string).collect();
            normalize_heading_levels(&levels)
        }
        _ => defaults.default_heading_levels.clone(),
    };

    let flag = |key: &str, default: bool| map.get(key).and_then(coerce_bool).unwrap_or(default);

    Settings {
        default_max_links_per_page: max_links,
        default_heading_behavior: heading_behavior,
        default_heading_levels: heading_levels,
        avoid_existing_links: flag("avoid_existing_links", defaults.avoid_existing_links),
        prefer_word_boundaries: flag("prefer_word_boundaries", defaults.prefer_word_boundaries),
        normalize_accents: flag("normalize_accents", defaults.normalize_accents),
        cache_rendered_content: flag("cache_rendered_content", defaults.cache_rendered_content),
        chunk_long_documents: flag("chunk_long_documents", defaults.chunk_long_documents),
    }
}

fn coerce_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_i64().map(|v| v.max(0) as u64))
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.max(0.0) as u64)),
        Value::String(s) => s.trim().parse::<i64>().ok().map(|v| v.max(0) as u64),
        _ => None,
    }
}

fn coerce_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|v| v != 0),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" | "" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

//! 规则表结构迁移
//! 在规则库初始化时执行一次，把旧结构的 JSON 记录升级到当前结构

use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{LinkResult, LinkifyError};

/// 当前存储结构版本
pub const SCHEMA_VERSION: u32 = 2;

/// 将规则表从 `from` 版本升级到当前版本
pub fn migrate_rules(rules: Value, from: u32) -> LinkResult<Value> {
    let mut rules = rules;
    let mut version = from;

    while version < SCHEMA_VERSION {
        rules = match version {
            0 | 1 => migrate_v1_to_v2(rules)?,
            other => {
                return Err(LinkifyError::Migration(format!("未知的结构版本：{}", other)));
            }
        };
        version = version.max(1) + 1;
        debug!("规则表已迁移到结构版本 {}", version);
    }

    Ok(rules)
}

/// v1：keywords 为逗号分隔字符串，utm_template_id 为 "inherit" / "" / 数字字符串
fn migrate_v1_to_v2(rules: Value) -> LinkResult<Value> {
    let Value::Array(items) = rules else {
        return Err(LinkifyError::Migration("规则表不是数组".to_string()));
    };

    let migrated = items
        .into_iter()
        .map(|item| match item {
            Value::Object(map) => Ok(Value::Object(migrate_rule_v1(map))),
            other => Err(LinkifyError::Migration(format!("无法识别的规则记录：{}", other))),
        })
        .collect::<LinkResult<Vec<Value>>>()?;

    Ok(Value::Array(migrated))
}

fn migrate_rule_v1(mut map: Map<String, Value>) -> Map<String, Value> {
    if let Some(Value::String(joined)) = map.get("keywords") {
        let list: Vec<Value> = joined
            .split(',')
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(|k| Value::String(k.to_string()))
            .collect();
        map.insert("keywords".to_string(), Value::Array(list));
    }

    if let Some(legacy) = map.remove("utm_template_id") {
        let choice = match &legacy {
            Value::String(s) if s.trim().eq_ignore_ascii_case("inherit") => {
                Value::String("inherit".to_string())
            }
            Value::String(s) => match s.trim().parse::<u64>() {
                Ok(id) if id > 0 => template_choice(id),
                _ => Value::String("none".to_string()),
            },
            Value::Number(n) => match n.as_u64() {
                Some(id) if id > 0 => template_choice(id),
                _ => Value::String("none".to_string()),
            },
            _ => Value::String("none".to_string()),
        };
        map.insert("utm_template".to_string(), choice);
    }

    map
}

fn template_choice(id: u64) -> Value {
    let mut tagged = Map::new();
    tagged.insert("template".to_string(), Value::from(id));
    Value::Object(tagged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::model::{Rule, UtmChoice};
    use serde_json::json;

    #[test]
    fn test_v1_rules_are_upgraded() {
        let legacy = json!([
            {
                "id": 4,
                "title": "Rust",
                "keywords": "rust, Rust lang ,",
                "destination": {"url": "/rust"},
                "utm_template_id": "12"
            },
            {
                "id": 5,
                "title": "Go",
                "keywords": ["go"],
                "destination": {"url": "/go"},
                "utm_template_id": "inherit"
            }
        ]);

        let upgraded = migrate_rules(legacy, 1).unwrap();
        let rules: Vec<Rule> = serde_json::from_value(upgraded).unwrap();

        assert_eq!(rules[0].keywords, vec!["rust", "Rust lang"]);
        assert_eq!(rules[0].utm_template, UtmChoice::Template(12));
        assert_eq!(rules[1].utm_template, UtmChoice::Inherit);
    }

    #[test]
    fn test_current_schema_is_untouched() {
        let current = json!([{"id": 1}]);
        assert_eq!(migrate_rules(current.clone(), SCHEMA_VERSION).unwrap(), current);
    }
}

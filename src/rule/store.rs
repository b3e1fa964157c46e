//! 规则库：规则、分类、UTM 模板与设置的持久化管理
//! 所有写操作先校验再落盘，成功后递增版本号（渲染缓存以此失效）

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use super::filter::{RuleFilter, SortDirection, sort_rules};
use super::migration::{SCHEMA_VERSION, migrate_rules};
use super::model::{Category, Destination, Rule, RuleStatus, Settings, UtmChoice, UtmTemplate};
use super::validate::{
    References, settings_from_value, validate_category, validate_rule, validate_template,
};
use crate::error::{LinkResult, LinkifyError, RecordKind, ValidationCode, ValidationErrors};
use crate::host::{ContentDirectory, KeyValueStore};

const KEY_RULES: &str = "rslinkify_rules";
const KEY_CATEGORIES: &str = "rslinkify_categories";
const KEY_TEMPLATES: &str = "rslinkify_utm_templates";
const KEY_SETTINGS: &str = "rslinkify_settings";
const KEY_VERSION: &str = "rslinkify_version";
const KEY_SCHEMA: &str = "rslinkify_schema";

/// 批量操作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulkAction {
    Activate,
    Deactivate,
    Delete,
}

/// 删除分类时依赖规则的去向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CategoryReassign {
    /// 取消分类
    Unassign,
    /// 移入另一个分类
    To(u64),
}

/// 一张记录表：记录列表与下一个可用 id
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RecordTable<T> {
    next_id: u64,
    items: Vec<T>,
}

impl<T> Default for RecordTable<T> {
    fn default() -> Self {
        Self {
            next_id: 1,
            items: Vec::new(),
        }
    }
}

impl<T> RecordTable<T> {
    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

/// 引擎单次渲染读取的一致视图
#[derive(Debug, Clone)]
pub struct StoreSnapshot {
    /// 已启用规则，按处理顺序排列
    pub rules: Vec<Rule>,
    pub categories: HashMap<u64, Category>,
    pub templates: HashMap<u64, UtmTemplate>,
    pub settings: Settings,
    pub version: u64,
}

/// 导入导出格式
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryExport {
    pub schema: u32,
    pub rules: Vec<Rule>,
    pub categories: Vec<Category>,
    pub templates: Vec<UtmTemplate>,
    pub settings: Settings,
}

/// 规则库
pub struct RuleStore {
    kv: Arc<dyn KeyValueStore>,
    directory: Arc<dyn ContentDirectory>,
}

impl RuleStore {
    /// 打开规则库，必要时执行一次结构迁移
    pub fn open(kv: Arc<dyn KeyValueStore>, directory: Arc<dyn ContentDirectory>) -> LinkResult<Self> {
        let store = Self { kv, directory };
        store.migrate()?;
        Ok(store)
    }

    pub fn directory(&self) -> &dyn ContentDirectory {
        self.directory.as_ref()
    }

    // ===================== 规则 =====================

    pub fn list_rules(&self, filter: &RuleFilter) -> LinkResult<Vec<Rule>> {
        let table = self.read_table::<Rule>(KEY_RULES)?;
        let mut rules: Vec<Rule> = table
            .items
            .into_iter()
            .filter(|r| filter.matches(r))
            .collect();
        sort_rules(&mut rules, filter.direction);
        Ok(rules)
    }

    pub fn get_rule(&self, id: u64) -> LinkResult<Rule> {
        self.read_table::<Rule>(KEY_RULES)?
            .items
            .into_iter()
            .find(|r| r.id == id)
            .ok_or(LinkifyError::NotFound { kind: RecordKind::Rule, id })
    }

    /// 新建规则的初始值（按全局设置预填）
    pub fn new_rule(&self) -> LinkResult<Rule> {
        let settings = self.get_settings()?;
        let mut rule = Rule::new("", &[], Destination::Url(String::new()));
        rule.limits.max_per_page = Some(settings.default_max_links_per_page);
        rule.placement.headings = settings.default_heading_behavior;
        rule.placement.heading_levels = settings.default_heading_levels;
        Ok(rule)
    }

    /// 校验并归一化规则，不写入（预览使用）
    pub fn check_rule(&self, rule: Rule) -> LinkResult<Rule> {
        let category_ids = self.id_set::<Category>(KEY_CATEGORIES, |c| c.id)?;
        let template_ids = self.id_set::<UtmTemplate>(KEY_TEMPLATES, |t| t.id)?;
        let refs = References {
            directory: self.directory.as_ref(),
            category_ids: &category_ids,
            template_ids: &template_ids,
        };
        validate_rule(rule, &refs).map_err(LinkifyError::Validation)
    }

    /// 保存规则；id 为 0 时新建
    pub fn save_rule(&self, rule: Rule) -> LinkResult<Rule> {
        let mut rule = self.check_rule(rule)?;
        let mut table = self.read_table::<Rule>(KEY_RULES)?;
        let now = Utc::now();

        if rule.id == 0 {
            rule.id = table.allocate_id();
            rule.created_at = now;
            rule.updated_at = now;
            table.items.push(rule.clone());
        } else {
            let existing = table
                .items
                .iter_mut()
                .find(|r| r.id == rule.id)
                .ok_or(LinkifyError::NotFound { kind: RecordKind::Rule, id: rule.id })?;
            rule.created_at = existing.created_at;
            rule.updated_at = now;
            *existing = rule.clone();
        }

        self.write_table(KEY_RULES, &table)?;
        self.bump_version()?;
        debug!("规则已保存：{}，关键词数：{}", rule, rule.keywords.len());
        Ok(rule)
    }

    pub fn delete_rule(&self, id: u64) -> LinkResult<()> {
        let mut table = self.read_table::<Rule>(KEY_RULES)?;
        let before = table.items.len();
        table.items.retain(|r| r.id != id);
        if table.items.len() == before {
            return Err(LinkifyError::NotFound { kind: RecordKind::Rule, id });
        }
        self.write_table(KEY_RULES, &table)?;
        self.bump_version()?;
        debug!("规则已删除：#{}", id);
        Ok(())
    }

    /// 复制规则：新 id、标题追加 " (Copy)"、强制停用
    pub fn duplicate_rule(&self, id: u64) -> LinkResult<Rule> {
        let mut copy = self.get_rule(id)?;
        copy.id = 0;
        copy.title = format!("{} (Copy)", copy.title);
        copy.status = RuleStatus::Inactive;
        self.save_rule(copy)
    }

    /// 批量启用/停用/删除，未知 id 直接跳过；返回受影响条数
    pub fn bulk_update(&self, ids: &[u64], action: BulkAction) -> LinkResult<usize> {
        let wanted: HashSet<u64> = ids.iter().copied().collect();
        let mut table = self.read_table::<Rule>(KEY_RULES)?;

        let affected = match action {
            BulkAction::Delete => {
                let before = table.items.len();
                table.items.retain(|r| !wanted.contains(&r.id));
                before - table.items.len()
            }
            BulkAction::Activate | BulkAction::Deactivate => {
                let status = if action == BulkAction::Activate {
                    RuleStatus::Active
                } else {
                    RuleStatus::Inactive
                };
                let now = Utc::now();
                let mut count = 0;
                for rule in table.items.iter_mut().filter(|r| wanted.contains(&r.id)) {
                    rule.status = status;
                    rule.updated_at = now;
                    count += 1;
                }
                count
            }
        };

        if affected > 0 {
            self.write_table(KEY_RULES, &table)?;
            self.bump_version()?;
        }
        debug!("批量操作 {:?} 完成，影响规则数：{}", action, affected);
        Ok(affected)
    }

    // ===================== 分类 =====================

    pub fn list_categories(&self) -> LinkResult<Vec<Category>> {
        let mut items = self.read_table::<Category>(KEY_CATEGORIES)?.items;
        items.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()).then(a.id.cmp(&b.id)));
        Ok(items)
    }

    pub fn get_category(&self, id: u64) -> LinkResult<Category> {
        self.read_table::<Category>(KEY_CATEGORIES)?
            .items
            .into_iter()
            .find(|c| c.id == id)
            .ok_or(LinkifyError::NotFound { kind: RecordKind::Category, id })
    }

    pub fn save_category(&self, category: Category) -> LinkResult<Category> {
        let template_ids = self.id_set::<UtmTemplate>(KEY_TEMPLATES, |t| t.id)?;
        let mut category =
            validate_category(category, &template_ids).map_err(LinkifyError::Validation)?;
        let mut table = self.read_table::<Category>(KEY_CATEGORIES)?;

        if category.id == 0 {
            category.id = table.allocate_id();
            table.items.push(category.clone());
        } else {
            let existing = table
                .items
                .iter_mut()
                .find(|c| c.id == category.id)
                .ok_or(LinkifyError::NotFound { kind: RecordKind::Category, id: category.id })?;
            *existing = category.clone();
        }

        self.write_table(KEY_CATEGORIES, &table)?;
        self.bump_version()?;
        debug!("分类已保存：#{} {}", category.id, category.name);
        Ok(category)
    }

    /// 删除分类；仍被规则引用时必须给出重新分配目标
    pub fn delete_category(&self, id: u64, reassign: Option<CategoryReassign>) -> LinkResult<()> {
        let mut categories = self.read_table::<Category>(KEY_CATEGORIES)?;
        if !categories.items.iter().any(|c| c.id == id) {
            return Err(LinkifyError::NotFound { kind: RecordKind::Category, id });
        }

        let mut rules = self.read_table::<Rule>(KEY_RULES)?;
        let dependents = rules.items.iter().filter(|r| r.category_id == Some(id)).count();

        if dependents > 0 {
            let target = match reassign {
                None => return Err(LinkifyError::CategoryInUse { id, rules: dependents }),
                Some(CategoryReassign::Unassign) => None,
                Some(CategoryReassign::To(target)) => {
                    if target == id || !categories.items.iter().any(|c| c.id == target) {
                        let mut errors = ValidationErrors::new();
                        errors.push(
                            "reassign",
                            ValidationCode::UnknownReference,
                            format!("重新分配目标分类 {} 无效", target),
                        );
                        return Err(LinkifyError::Validation(errors));
                    }
                    Some(target)
                }
            };

            let now = Utc::now();
            for rule in rules.items.iter_mut().filter(|r| r.category_id == Some(id)) {
                rule.category_id = target;
                rule.updated_at = now;
            }
            self.write_table(KEY_RULES, &rules)?;
        }

        categories.items.retain(|c| c.id != id);
        self.write_table(KEY_CATEGORIES, &categories)?;
        self.bump_version()?;
        debug!("分类已删除：#{}，重新分配规则数：{}", id, dependents);
        Ok(())
    }

    // ===================== UTM 模板 =====================

    pub fn list_templates(&self) -> LinkResult<Vec<UtmTemplate>> {
        let mut items = self.read_table::<UtmTemplate>(KEY_TEMPLATES)?.items;
        items.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()).then(a.id.cmp(&b.id)));
        Ok(items)
    }

    pub fn get_template(&self, id: u64) -> LinkResult<UtmTemplate> {
        self.read_table::<UtmTemplate>(KEY_TEMPLATES)?
            .items
            .into_iter()
            .find(|t| t.id == id)
            .ok_or(LinkifyError::NotFound { kind: RecordKind::UtmTemplate, id })
    }

    pub fn save_template(&self, template: UtmTemplate) -> LinkResult<UtmTemplate> {
        let mut template = validate_template(template).map_err(LinkifyError::Validation)?;
        let mut table = self.read_table::<UtmTemplate>(KEY_TEMPLATES)?;

        if template.id == 0 {
            template.id = table.allocate_id();
            table.items.push(template.clone());
        } else {
            let existing = table
                .items
                .iter_mut()
                .find(|t| t.id == template.id)
                .ok_or(LinkifyError::NotFound { kind: RecordKind::UtmTemplate, id: template.id })?;
            *existing = template.clone();
        }

        self.write_table(KEY_TEMPLATES, &table)?;
        self.bump_version()?;
        debug!("UTM 模板已保存：#{} {}", template.id, template.name);
        Ok(template)
    }

    /// 删除模板：引用它的规则改为继承，分类的默认模板清空
    pub fn delete_template(&self, id: u64) -> LinkResult<()> {
        let mut templates = self.read_table::<UtmTemplate>(KEY_TEMPLATES)?;
        let before = templates.items.len();
        templates.items.retain(|t| t.id != id);
        if templates.items.len() == before {
            return Err(LinkifyError::NotFound { kind: RecordKind::UtmTemplate, id });
        }

        let mut rules = self.read_table::<Rule>(KEY_RULES)?;
        let mut detached_rules = 0;
        for rule in rules.items.iter_mut().filter(|r| r.utm_template == UtmChoice::Template(id)) {
            rule.utm_template = UtmChoice::Inherit;
            detached_rules += 1;
        }

        let mut categories = self.read_table::<Category>(KEY_CATEGORIES)?;
        let mut detached_categories = 0;
        for category in categories
            .items
            .iter_mut()
            .filter(|c| c.default_utm_template_id == Some(id))
        {
            category.default_utm_template_id = None;
            detached_categories += 1;
        }

        if detached_rules > 0 {
            self.write_table(KEY_RULES, &rules)?;
        }
        if detached_categories > 0 {
            self.write_table(KEY_CATEGORIES, &categories)?;
        }
        self.write_table(KEY_TEMPLATES, &templates)?;
        self.bump_version()?;
        debug!(
            "UTM 模板已删除：#{}，解除引用规则数：{}，分类数：{}",
            id, detached_rules, detached_categories
        );
        Ok(())
    }

    // ===================== 设置 =====================

    pub fn get_settings(&self) -> LinkResult<Settings> {
        let Some(raw) = self.kv.get(KEY_SETTINGS)? else {
            return Ok(Settings::default());
        };
        let value: Value = serde_json::from_slice(&raw)?;
        Ok(settings_from_value(&value))
    }

    /// 合并默认值后保存，返回实际生效的设置
    pub fn save_settings(&self, input: &Value) -> LinkResult<Settings> {
        let settings = settings_from_value(input);
        self.kv.set(KEY_SETTINGS, serde_json::to_vec(&settings)?)?;
        self.bump_version()?;
        debug!("设置已保存：{:?}", settings);
        Ok(settings)
    }

    // ===================== 版本号 =====================

    pub fn get_version(&self) -> LinkResult<u64> {
        match self.kv.get(KEY_VERSION)? {
            Some(raw) => Ok(serde_json::from_slice(&raw)?),
            None => Ok(0),
        }
    }

    pub fn bump_version(&self) -> LinkResult<u64> {
        let next = self.get_version()? + 1;
        self.kv.set(KEY_VERSION, serde_json::to_vec(&next)?)?;
        Ok(next)
    }

    // ===================== 引擎读取 =====================

    /// 一次性读取渲染所需的全部状态
    pub fn snapshot(&self) -> LinkResult<StoreSnapshot> {
        let mut rules: Vec<Rule> = self
            .read_table::<Rule>(KEY_RULES)?
            .items
            .into_iter()
            .filter(Rule::is_active)
            .collect();
        sort_rules(&mut rules, SortDirection::Descending);

        let categories = self
            .read_table::<Category>(KEY_CATEGORIES)?
            .items
            .into_iter()
            .map(|c| (c.id, c))
            .collect();
        let templates = self
            .read_table::<UtmTemplate>(KEY_TEMPLATES)?
            .items
            .into_iter()
            .map(|t| (t.id, t))
            .collect();

        Ok(StoreSnapshot {
            rules,
            categories,
            templates,
            settings: self.get_settings()?,
            version: self.get_version()?,
        })
    }

    // ===================== 导入导出 =====================

    pub fn export_json(&self) -> LinkResult<String> {
        let export = LibraryExport {
            schema: SCHEMA_VERSION,
            rules: self.read_table::<Rule>(KEY_RULES)?.items,
            categories: self.read_table::<Category>(KEY_CATEGORIES)?.items,
            templates: self.read_table::<UtmTemplate>(KEY_TEMPLATES)?.items,
            settings: self.get_settings()?,
        };
        Ok(serde_json::to_string_pretty(&export)?)
    }

    /// 整库恢复：全部记录校验通过后才写入，返回导入的规则数
    pub fn import_json(&self, json: &str) -> LinkResult<usize> {
        let raw: Value = serde_json::from_str(json)?;
        let schema = raw
            .get("schema")
            .and_then(Value::as_u64)
            .map(|v| v as u32)
            .unwrap_or(SCHEMA_VERSION);
        let mut raw = raw;
        if schema < SCHEMA_VERSION {
            if let Some(rules) = raw.get_mut("rules") {
                *rules = migrate_rules(rules.take(), schema)?;
            }
        }
        let import: LibraryExport = serde_json::from_value(raw)?;

        let mut errors = ValidationErrors::new();

        let mut templates = Vec::with_capacity(import.templates.len());
        for template in import.templates {
            match validate_template(template) {
                Ok(t) => templates.push(t),
                Err(e) => errors.0.extend(e.0),
            }
        }
        check_unique_ids(templates.iter().map(|t| t.id), &mut errors);
        let template_ids: HashSet<u64> = templates.iter().map(|t| t.id).collect();

        let mut categories = Vec::with_capacity(import.categories.len());
        for category in import.categories {
            match validate_category(category, &template_ids) {
                Ok(c) => categories.push(c),
                Err(e) => errors.0.extend(e.0),
            }
        }
        check_unique_ids(categories.iter().map(|c| c.id), &mut errors);
        let category_ids: HashSet<u64> = categories.iter().map(|c| c.id).collect();

        let refs = References {
            directory: self.directory.as_ref(),
            category_ids: &category_ids,
            template_ids: &template_ids,
        };
        let mut rules = Vec::with_capacity(import.rules.len());
        for rule in import.rules {
            match validate_rule(rule, &refs) {
                Ok(r) => rules.push(r),
                Err(e) => errors.0.extend(e.0),
            }
        }
        check_unique_ids(rules.iter().map(|r| r.id), &mut errors);
        errors.into_result()?;

        let count = rules.len();
        self.write_table(KEY_TEMPLATES, &table_from(templates, |t| t.id))?;
        self.write_table(KEY_CATEGORIES, &table_from(categories, |c| c.id))?;
        self.write_table(KEY_RULES, &table_from(rules, |r| r.id))?;
        self.kv.set(KEY_SETTINGS, serde_json::to_vec(&import.settings)?)?;
        self.bump_version()?;
        debug!("规则库导入完成，规则数：{}", count);
        Ok(count)
    }

    // ===================== 内部工具 =====================

    fn read_table<T: DeserializeOwned>(&self, key: &str) -> LinkResult<RecordTable<T>> {
        match self.kv.get(key)? {
            Some(raw) => Ok(serde_json::from_slice(&raw)?),
            None => Ok(RecordTable::default()),
        }
    }

    fn write_table<T: Serialize>(&self, key: &str, table: &RecordTable<T>) -> LinkResult<()> {
        self.kv.set(key, serde_json::to_vec(table)?)
    }

    fn id_set<T: DeserializeOwned>(&self, key: &str, id: impl Fn(&T) -> u64) -> LinkResult<HashSet<u64>> {
        Ok(self.read_table::<T>(key)?.items.iter().map(id).collect())
    }

    fn migrate(&self) -> LinkResult<()> {
        let stored_schema = match self.kv.get(KEY_SCHEMA)? {
            Some(raw) => Some(serde_json::from_slice::<u32>(&raw)?),
            None => None,
        };
        if matches!(stored_schema, Some(v) if v >= SCHEMA_VERSION) {
            return Ok(());
        }

        let raw_rules = self.kv.get(KEY_RULES)?;
        // 没有结构版本号但已有规则数据，视为第一版
        let from = stored_schema.unwrap_or(if raw_rules.is_some() { 1 } else { SCHEMA_VERSION });

        if from < SCHEMA_VERSION {
            if let Some(raw) = raw_rules {
                let value: Value = serde_json::from_slice(&raw)?;
                // 第一版直接存数组，之后为 {next_id, items}
                let (next_id, items) = match value {
                    Value::Array(items) => (None, Value::Array(items)),
                    Value::Object(mut map) => (
                        map.get("next_id").and_then(Value::as_u64),
                        map.remove("items").unwrap_or(Value::Array(Vec::new())),
                    ),
                    other => {
                        return Err(LinkifyError::Migration(format!("无法识别的规则表：{}", other)));
                    }
                };
                let items = migrate_rules(items, from)?;
                let rules: Vec<Rule> = serde_json::from_value(items)?;
                let max_id = rules.iter().map(|r| r.id).max().unwrap_or(0);
                let table = RecordTable {
                    next_id: next_id.unwrap_or(0).max(max_id + 1),
                    items: rules,
                };
                self.write_table(KEY_RULES, &table)?;
                warn!("规则表已从结构版本 {} 迁移到 {}，规则数：{}", from, SCHEMA_VERSION, table.items.len());
            }
            self.bump_version()?;
        }

        self.kv.set(KEY_SCHEMA, serde_json::to_vec(&SCHEMA_VERSION)?)?;
        Ok(())
    }
}

fn check_unique_ids(ids: impl Iterator<Item = u64>, errors: &mut ValidationErrors) {
    let mut seen = HashSet::new();
    for id in ids {
        if id == 0 || !seen.insert(id) {
            errors.push("id", ValidationCode::Invalid, format!("导入记录 id 无效或重复：{}", id));
        }
    }
}

fn table_from<T>(items: Vec<T>, id: impl Fn(&T) -> u64) -> RecordTable<T> {
    let next_id = items.iter().map(&id).max().unwrap_or(0) + 1;
    RecordTable { next_id, items }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{MemoryStore, StaticDirectory};
    use crate::rule::model::HeadingPolicy;
    use serde_json::json;

    fn open_store() -> (Arc<MemoryStore>, RuleStore) {
        let kv = Arc::new(MemoryStore::new());
        let directory = StaticDirectory::new().with_post(10, "https://example.com/guide/");
        let store = RuleStore::open(kv.clone(), Arc::new(directory)).unwrap();
        (kv, store)
    }

    fn url_rule(title: &str, keywords: &[&str]) -> Rule {
        Rule::new(title, keywords, Destination::Url("/target".into()))
    }

    #[test]
    fn test_save_then_get_round_trip() {
        let (_, store) = open_store();
        let mut rule = url_rule("  Rust  ", &[" rust ", "RUST", "cargo", ""]);
        rule.placement.heading_levels = vec!["H2".into()];

        let saved = store.save_rule(rule).unwrap();
        assert_eq!(saved.id, 1);
        assert_eq!(saved.title, "Rust");
        assert_eq!(saved.keywords, vec!["rust", "cargo"]);
        assert_eq!(store.get_rule(saved.id).unwrap(), saved);
    }

    #[test]
    fn test_invalid_rule_is_never_persisted() {
        let (_, store) = open_store();
        let version = store.get_version().unwrap();

        let err = store.save_rule(url_rule("Empty", &[" "])).unwrap_err();
        assert!(err.validation().unwrap().has_field("keywords"));

        let err = store
            .save_rule(Rule::new("Missing", &["x"], Destination::Post(99)))
            .unwrap_err();
        assert!(err.validation().unwrap().has_field("destination"));

        assert!(store.list_rules(&RuleFilter::new()).unwrap().is_empty());
        assert_eq!(store.get_version().unwrap(), version);
    }

    #[test]
    fn test_every_mutation_bumps_version() {
        let (_, store) = open_store();
        let v0 = store.get_version().unwrap();
        let rule = store.save_rule(url_rule("A", &["a"])).unwrap();
        let v1 = store.get_version().unwrap();
        assert!(v1 > v0);

        store.bulk_update(&[rule.id], BulkAction::Deactivate).unwrap();
        let v2 = store.get_version().unwrap();
        assert!(v2 > v1);

        store.save_settings(&json!({})).unwrap();
        assert!(store.get_version().unwrap() > v2);
    }

    #[test]
    fn test_duplicate_rule_is_inactive_copy() {
        let (_, store) = open_store();
        let original = store.save_rule(url_rule("Guide", &["guide"])).unwrap();
        let copy = store.duplicate_rule(original.id).unwrap();

        assert_ne!(copy.id, original.id);
        assert_eq!(copy.title, "Guide (Copy)");
        assert_eq!(copy.status, RuleStatus::Inactive);
        assert_eq!(copy.keywords, original.keywords);
    }

    #[test]
    fn test_bulk_update_skips_unknown_ids() {
        let (_, store) = open_store();
        let a = store.save_rule(url_rule("A", &["a"])).unwrap();
        let b = store.save_rule(url_rule("B", &["b"])).unwrap();

        let affected = store.bulk_update(&[a.id, 404], BulkAction::Deactivate).unwrap();
        assert_eq!(affected, 1);
        assert_eq!(store.get_rule(a.id).unwrap().status, RuleStatus::Inactive);

        let deleted = store.bulk_update(&[a.id, b.id, 405], BulkAction::Delete).unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(store.bulk_update(&[999], BulkAction::Activate).unwrap(), 0);
    }

    #[test]
    fn test_list_rules_sorted_by_priority_then_title() {
        let (_, store) = open_store();
        for (title, priority) in [("beta", 1), ("alpha", 1), ("zeta", 7)] {
            let mut rule = url_rule(title, &[title]);
            rule.priority = priority;
            store.save_rule(rule).unwrap();
        }

        let titles: Vec<String> = store
            .list_rules(&RuleFilter::new())
            .unwrap()
            .into_iter()
            .map(|r| r.title)
            .collect();
        assert_eq!(titles, vec!["zeta", "alpha", "beta"]);
    }

    #[test]
    fn test_delete_category_requires_reassignment() {
        let (_, store) = open_store();
        let news = store.save_category(Category::new("News")).unwrap();
        let tech = store.save_category(Category::new("Tech")).unwrap();

        let mut rule = url_rule("A", &["a"]);
        rule.category_id = Some(news.id);
        let rule = store.save_rule(rule).unwrap();

        let err = store.delete_category(news.id, None).unwrap_err();
        assert!(matches!(err, LinkifyError::CategoryInUse { rules: 1, .. }));

        let err = store
            .delete_category(news.id, Some(CategoryReassign::To(news.id)))
            .unwrap_err();
        assert!(err.validation().is_some());

        store
            .delete_category(news.id, Some(CategoryReassign::To(tech.id)))
            .unwrap();
        assert_eq!(store.get_rule(rule.id).unwrap().category_id, Some(tech.id));

        store
            .delete_category(tech.id, Some(CategoryReassign::Unassign))
            .unwrap();
        assert_eq!(store.get_rule(rule.id).unwrap().category_id, None);
        assert!(store.list_categories().unwrap().is_empty());
    }

    #[test]
    fn test_delete_template_detaches_references() {
        let (_, store) = open_store();
        let template = store.save_template(UtmTemplate::new("Newsletter")).unwrap();

        let mut category = Category::new("News");
        category.default_utm_template_id = Some(template.id);
        let category = store.save_category(category).unwrap();

        let mut rule = url_rule("A", &["a"]);
        rule.utm_template = UtmChoice::Template(template.id);
        let rule = store.save_rule(rule).unwrap();

        store.delete_template(template.id).unwrap();
        assert_eq!(store.get_rule(rule.id).unwrap().utm_template, UtmChoice::Inherit);
        assert_eq!(store.get_category(category.id).unwrap().default_utm_template_id, None);
    }

    #[test]
    fn test_new_rule_prefilled_from_settings() {
        let (_, store) = open_store();
        store
            .save_settings(&json!({
                "default_max_links_per_page": 5,
                "default_heading_behavior": "selected",
                "default_heading_levels": ["h4"]
            }))
            .unwrap();

        let rule = store.new_rule().unwrap();
        assert_eq!(rule.limits.max_per_page, Some(5));
        assert_eq!(rule.placement.headings, HeadingPolicy::Selected);
        assert_eq!(rule.placement.heading_levels, vec!["h4"]);
    }

    #[test]
    fn test_legacy_rule_table_is_migrated_on_open() {
        let kv = Arc::new(MemoryStore::new());
        let legacy = json!([{
            "id": 3,
            "title": "Legacy",
            "keywords": "old, older",
            "destination": {"url": "/old"},
            "utm_template_id": ""
        }]);
        kv.set(KEY_RULES, serde_json::to_vec(&legacy).unwrap()).unwrap();

        let store = RuleStore::open(kv.clone(), Arc::new(StaticDirectory::new())).unwrap();
        let rule = store.get_rule(3).unwrap();
        assert_eq!(rule.keywords, vec!["old", "older"]);
        assert_eq!(rule.utm_template, UtmChoice::None);

        // 新建规则不会与迁移后的 id 冲突
        let next = store.save_rule(url_rule("Fresh", &["fresh"])).unwrap();
        assert_eq!(next.id, 4);
    }

    #[test]
    fn test_export_import_round_trip() {
        let (_, source) = open_store();
        let template = source.save_template(UtmTemplate::new("T")).unwrap();
        let mut category = Category::new("C");
        category.default_utm_template_id = Some(template.id);
        let category = source.save_category(category).unwrap();
        let mut rule = url_rule("R", &["r"]);
        rule.category_id = Some(category.id);
        source.save_rule(rule).unwrap();

        let json = source.export_json().unwrap();
        let (_, target) = open_store();
        assert_eq!(target.import_json(&json).unwrap(), 1);
        assert_eq!(target.list_rules(&RuleFilter::new()).unwrap().len(), 1);
        assert_eq!(target.get_category(category.id).unwrap().name, "C");
    }

    #[test]
    fn test_import_rejects_dangling_references() {
        let (_, store) = open_store();
        let mut rule = url_rule("R", &["r"]);
        rule.id = 1;
        rule.category_id = Some(42);
        let payload = json!({
            "schema": SCHEMA_VERSION,
            "rules": [rule],
            "categories": [],
            "templates": [],
            "settings": Settings::default(),
        });

        let err = store.import_json(&payload.to_string()).unwrap_err();
        assert!(err.validation().unwrap().has_field("category_id"));
        assert!(store.list_rules(&RuleFilter::new()).unwrap().is_empty());
    }
}

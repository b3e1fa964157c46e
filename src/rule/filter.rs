//! 规则查询条件与排序

use std::cmp::Ordering;

use super::model::{Rule, RuleStatus};

/// 优先级排序方向（同优先级始终按标题升序）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Descending,
    Ascending,
}

/// 分类过滤
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CategorySelector {
    Id(u64),
    Uncategorized,
}

/// 规则列表查询条件
#[derive(Debug, Clone, Default)]
pub struct RuleFilter {
    pub status: Option<RuleStatus>,
    pub category: Option<CategorySelector>,
    /// 与规则声明的文章类型有交集即命中；未限制类型的规则总是命中
    pub post_types: Vec<String>,
    /// 标题与关键词的全文检索（忽略大小写）
    pub search: Option<String>,
    pub direction: SortDirection,
}

impl RuleFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: RuleStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn category(mut self, category: CategorySelector) -> Self {
        self.category = Some(category);
        self
    }

    pub fn post_type(mut self, post_type: impl Into<String>) -> Self {
        self.post_types.push(post_type.into().to_lowercase());
        self
    }

    pub fn search(mut self, text: impl Into<String>) -> Self {
        self.search = Some(text.into());
        self
    }

    pub fn direction(mut self, direction: SortDirection) -> Self {
        self.direction = direction;
        self
    }

    pub fn matches(&self, rule: &Rule) -> bool {
        if let Some(status) = self.status {
            if rule.status != status {
                return false;
            }
        }

        match self.category {
            Some(CategorySelector::Id(id)) if rule.category_id != Some(id) => return false,
            Some(CategorySelector::Uncategorized) if rule.category_id.is_some() => return false,
            _ => {}
        }

        if !self.post_types.is_empty()
            && !rule.scope.post_types.is_empty()
            && !rule
                .scope
                .post_types
                .iter()
                .any(|t| self.post_types.iter().any(|wanted| wanted == t))
        {
            return false;
        }

        if let Some(search) = self.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            let needle = search.to_lowercase();
            let in_title = rule.title.to_lowercase().contains(&needle);
            let in_keywords = rule
                .keywords
                .iter()
                .any(|k| k.to_lowercase().contains(&needle));
            if !in_title && !in_keywords {
                return false;
            }
        }

        true
    }
}

/// 规则处理顺序：优先级（默认降序），同级按标题升序，再按 id
pub fn compare_rules(a: &Rule, b: &Rule, direction: SortDirection) -> Ordering {
    let by_priority = match direction {
        SortDirection::Descending => b.priority.cmp(&a.priority),
        SortDirection::Ascending => a.priority.cmp(&b.priority),
    };
    by_priority
        .then_with(|| a.title.to_lowercase().cmp(&b.title.to_lowercase()))
        .then_with(|| a.id.cmp(&b.id))
}

pub fn sort_rules(rules: &mut [Rule], direction: SortDirection) {
    rules.sort_by(|a, b| compare_rules(a, b, direction));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::model::Destination;

    fn rule(id: u64, title: &str, priority: i32) -> Rule {
        let mut rule = Rule::new(title, &["kw"], Destination::Url("/".into()));
        rule.id = id;
        rule.priority = priority;
        rule
    }

    #[test]
    fn test_priority_then_title_order() {
        let mut rules = vec![rule(1, "beta", 5), rule(2, "Alpha", 5), rule(3, "gamma", 9)];
        sort_rules(&mut rules, SortDirection::Descending);
        let ids: Vec<u64> = rules.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![3, 2, 1]);

        sort_rules(&mut rules, SortDirection::Ascending);
        let ids: Vec<u64> = rules.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![2, 1, 3]);
    }

    #[test]
    fn test_filter_post_type_intersection() {
        let mut scoped = rule(1, "scoped", 0);
        scoped.scope.post_types = vec!["page".into()];
        let open = rule(2, "open", 0);

        let filter = RuleFilter::new().post_type("post");
        assert!(!filter.matches(&scoped));
        assert!(filter.matches(&open));
    }

    #[test]
    fn test_filter_search_covers_keywords() {
        let mut r = rule(1, "Language", 0);
        r.keywords = vec!["Rust".into()];
        assert!(RuleFilter::new().search("rus").matches(&r));
        assert!(!RuleFilter::new().search("python").matches(&r));
    }
}

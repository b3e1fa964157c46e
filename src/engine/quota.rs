//! 单次渲染的替换配额：规则单页配额、规则单块配额、分类共享配额

use std::collections::HashMap;

use super::dom::NodeId;
use super::runtime::RuntimeRule;

/// 块标识：(切块序号, 顶层容器节点)
pub type BlockKey = (usize, NodeId);

/// 配额检查结果（按 页 -> 块 -> 分类 的顺序检查）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaCheck {
    Available,
    PageExhausted,
    BlockExhausted,
    CategoryExhausted,
}

#[derive(Debug, Clone, Default)]
pub struct QuotaState {
    page_remaining: HashMap<u64, u32>,
    block_used: HashMap<(u64, BlockKey), u32>,
    category_remaining: HashMap<u64, u32>,
}

impl QuotaState {
    pub fn new(rules: &[RuntimeRule]) -> Self {
        let mut state = Self::default();
        for rule in rules {
            state.page_remaining.insert(rule.rule_id, rule.max_per_page);
            if let Some(category_id) = rule.category_id {
                if rule.category_cap > 0 {
                    state
                        .category_remaining
                        .entry(category_id)
                        .or_insert(rule.category_cap);
                }
            }
        }
        state
    }

    pub fn page_remaining(&self, rule_id: u64) -> u32 {
        self.page_remaining.get(&rule_id).copied().unwrap_or(0)
    }

    pub fn category_remaining(&self, category_id: u64) -> Option<u32> {
        self.category_remaining.get(&category_id).copied()
    }

    pub fn check(&self, rule: &RuntimeRule, block: BlockKey) -> QuotaCheck {
        if self.page_remaining(rule.rule_id) == 0 {
            return QuotaCheck::PageExhausted;
        }

        if let Some(limit) = rule.max_per_block {
            let used = self
                .block_used
                .get(&(rule.rule_id, block))
                .copied()
                .unwrap_or(0);
            if used >= limit {
                return QuotaCheck::BlockExhausted;
            }
        }

        if let Some(category_id) = rule.category_id {
            if self.category_remaining(category_id) == Some(0) {
                return QuotaCheck::CategoryExhausted;
            }
        }

        QuotaCheck::Available
    }

    /// 记录一次已提交的替换
    pub fn commit(&mut self, rule: &RuntimeRule, block: BlockKey) {
        if let Some(remaining) = self.page_remaining.get_mut(&rule.rule_id) {
            *remaining = remaining.saturating_sub(1);
        }
        if rule.max_per_block.is_some() {
            *self.block_used.entry((rule.rule_id, block)).or_insert(0) += 1;
        }
        if let Some(category_id) = rule.category_id {
            if let Some(remaining) = self.category_remaining.get_mut(&category_id) {
                *remaining = remaining.saturating_sub(1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::runtime::tests::runtime_rule;

    #[test]
    fn test_page_then_block_then_category() {
        let mut rule = runtime_rule("R", &["k"]);
        rule.max_per_page = 3;
        rule.max_per_block = Some(1);
        rule.category_id = Some(7);
        rule.category_cap = 2;

        let mut quota = QuotaState::new(std::slice::from_ref(&rule));
        let block_a = (0, 1);
        let block_b = (0, 2);
        let block_c = (1, 1);

        assert_eq!(quota.check(&rule, block_a), QuotaCheck::Available);
        quota.commit(&rule, block_a);
        assert_eq!(quota.check(&rule, block_a), QuotaCheck::BlockExhausted);

        assert_eq!(quota.check(&rule, block_b), QuotaCheck::Available);
        quota.commit(&rule, block_b);
        assert_eq!(quota.check(&rule, block_c), QuotaCheck::CategoryExhausted);
        assert_eq!(quota.page_remaining(rule.rule_id), 1);
    }

    #[test]
    fn test_category_counter_is_shared() {
        let mut first = runtime_rule("A", &["a"]);
        first.rule_id = 1;
        first.category_id = Some(3);
        first.category_cap = 1;
        let mut second = runtime_rule("B", &["b"]);
        second.rule_id = 2;
        second.category_id = Some(3);
        second.category_cap = 1;

        let rules = vec![first, second];
        let mut quota = QuotaState::new(&rules);
        quota.commit(&rules[0], (0, 1));
        assert_eq!(quota.check(&rules[1], (0, 1)), QuotaCheck::CategoryExhausted);
        assert_eq!(quota.page_remaining(2), 10);
    }
}

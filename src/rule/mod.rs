//! 规则模块：负责规则库的数据模型、校验、结构迁移与持久化
pub mod model;
pub mod validate;
pub mod filter;
pub mod migration;
pub mod store;

// 导出核心接口
pub use self::model::{
    AppendMode, ApplyTo, Category, Destination, HeadingPolicy, LinkAttributes, Placement, Rule,
    RuleLimits, RuleScope, RuleStatus, Settings, UtmChoice, UtmTemplate,
};
pub use self::filter::{CategorySelector, RuleFilter, SortDirection};
pub use self::store::{BulkAction, CategoryReassign, LibraryExport, RuleStore, StoreSnapshot};

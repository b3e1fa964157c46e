//! 改写引擎：把规则库中的规则应用到 HTML 内容
pub mod dom;
pub mod matcher;
pub mod scope;
pub mod runtime;
pub mod quota;
pub mod utm;
pub mod chunk;
pub mod cache;
pub mod rewriter;
pub mod events;
pub mod linker;
mod fetch;

// 导出核心接口
pub use self::dom::{Document, NodeData, NodeId};
pub use self::events::{CONTENT_FILTER, EventBus, WIDGET_FILTER};
pub use self::linker::{Linker, PreviewResult, ReplacementSummary};
pub use self::matcher::{KeywordMatch, KeywordMatcher, MatchOptions};
pub use self::rewriter::Replacement;
pub use self::runtime::{RuntimeRule, prepare_runtime_rule};
pub use self::scope::matches_scope;
pub use self::utm::apply_utms_to_url;

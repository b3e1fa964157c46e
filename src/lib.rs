//! rslinkify - 基于规则的 HTML 内链自动插入引擎

// 导出全局错误类型
pub use self::error::{LinkifyError, LinkResult, ValidationErrors, FieldError, ValidationCode, RecordKind};

// 导出配置模块
pub use self::config::{LinkerConfig, ConfigManager, CustomConfigBuilder};

// 导出宿主接口
pub use self::host::{
    KeyValueStore, MemoryStore, FileStore,
    SiteIdentity, ContentDirectory, StaticSite, StaticDirectory,
    ContextKind, PostInfo, RenderContext, ContentSource,
};

// 导出规则模块核心接口
pub use self::rule::{
    Rule, Category, UtmTemplate, Settings, Destination, UtmChoice, ApplyTo, AppendMode,
    RuleStatus, HeadingPolicy, LinkAttributes, RuleLimits, Placement, RuleScope,
    RuleStore, RuleFilter, CategorySelector, SortDirection, BulkAction, CategoryReassign,
    StoreSnapshot, LibraryExport,
};

// 导出引擎模块核心接口
pub use self::engine::{
    Linker, PreviewResult, ReplacementSummary, Replacement,
    EventBus, CONTENT_FILTER, WIDGET_FILTER,
};

// 声明所有子模块
pub mod config;
pub mod error;
pub mod host;
pub mod rule;
pub mod engine;

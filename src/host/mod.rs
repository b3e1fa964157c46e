//! 宿主接口：键值存储、站点身份、内容目录与渲染上下文
pub mod kv;
pub mod site;
pub mod context;

pub use self::kv::{KeyValueStore, MemoryStore, FileStore};
pub use self::site::{SiteIdentity, ContentDirectory, StaticSite, StaticDirectory};
pub use self::context::{ContextKind, PostInfo, RenderContext, ContentSource};

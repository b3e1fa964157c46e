//! 宿主扩展点：按名称注册内容过滤器，按注册顺序依次执行

use std::collections::HashMap;

use crate::host::RenderContext;

/// 正文内容过滤点
pub const CONTENT_FILTER: &str = "content-filter";
/// 小工具文本过滤点
pub const WIDGET_FILTER: &str = "widget-filter";

pub type ContentFilter = Box<dyn Fn(&str, &RenderContext) -> String + Send + Sync>;

#[derive(Default)]
pub struct EventBus {
    filters: HashMap<String, Vec<ContentFilter>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_filter<F>(&mut self, point: &str, filter: F)
    where
        F: Fn(&str, &RenderContext) -> String + Send + Sync + 'static,
    {
        self.filters
            .entry(point.to_string())
            .or_default()
            .push(Box::new(filter));
    }

    pub fn has_filters(&self, point: &str) -> bool {
        self.filters.get(point).is_some_and(|f| !f.is_empty())
    }

    /// 依次执行扩展点上的全部过滤器；未注册时原样返回
    pub fn apply(&self, point: &str, html: &str, ctx: &RenderContext) -> String {
        let Some(filters) = self.filters.get(point) else {
            return html.to_string();
        };
        filters
            .iter()
            .fold(html.to_string(), |current, filter| filter(&current, ctx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filters_run_in_registration_order() {
        let mut bus = EventBus::new();
        bus.add_filter(CONTENT_FILTER, |html, _| format!("{}-a", html));
        bus.add_filter(CONTENT_FILTER, |html, _| format!("{}-b", html));

        let ctx = RenderContext::content("/");
        assert!(bus.has_filters(CONTENT_FILTER));
        assert!(!bus.has_filters(WIDGET_FILTER));
        assert_eq!(bus.apply(CONTENT_FILTER, "x", &ctx), "x-a-b");
        assert_eq!(bus.apply(WIDGET_FILTER, "x", &ctx), "x");
    }
}

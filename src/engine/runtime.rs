//! 运行时规则：规则 + 分类 + 模板在单次渲染中的只读合并视图

use std::collections::HashMap;

use tracing::debug;
use url::Url;

use super::scope::GlobPattern;
use crate::host::{ContentDirectory, SiteIdentity};
use crate::rule::{
    ApplyTo, Category, Destination, LinkAttributes, Placement, Rule, Settings, UtmChoice,
    UtmTemplate,
};

/// 构建运行时规则所需的上下文
pub struct PrepareContext<'a> {
    pub categories: &'a HashMap<u64, Category>,
    pub templates: &'a HashMap<u64, UtmTemplate>,
    pub settings: &'a Settings,
    pub site: &'a dyn SiteIdentity,
    pub directory: &'a dyn ContentDirectory,
}

#[derive(Debug, Clone)]
pub struct RuntimeRule {
    pub rule_id: u64,
    pub title: String,
    pub priority: i32,
    /// 按字符数降序
    pub keywords: Vec<String>,
    /// 解析后的绝对地址（未附加 UTM）
    pub destination_url: String,
    pub is_internal: bool,
    pub category_id: Option<u64>,
    /// 0 为不限
    pub category_cap: u32,
    pub utm_template: Option<UtmTemplate>,
    pub utm_apply_to: ApplyTo,
    pub attributes: LinkAttributes,
    pub max_per_page: u32,
    pub max_per_block: Option<u32>,
    pub placement: Placement,
    pub post_types: Vec<String>,
    pub whitelist: Vec<GlobPattern>,
    pub blacklist: Vec<GlobPattern>,
}

/// 构建运行时规则；目标地址无法解析或单页上限为 0 时返回 None
pub fn prepare_runtime_rule(rule: &Rule, ctx: &PrepareContext<'_>) -> Option<RuntimeRule> {
    if rule.keywords.is_empty() {
        return None;
    }

    let Some(destination_url) = resolve_destination(&rule.destination, ctx) else {
        debug!("规则 {} 的目标地址无法解析，已跳过", rule);
        return None;
    };
    let is_internal = is_internal_url(&destination_url, &ctx.site.host());

    let max_per_page = rule
        .limits
        .max_per_page
        .unwrap_or(ctx.settings.default_max_links_per_page);
    if max_per_page == 0 {
        debug!("规则 {} 单页上限为 0，已跳过", rule);
        return None;
    }

    // 分类为弱引用，失效时按未分类处理
    let category = rule.category_id.and_then(|id| ctx.categories.get(&id));
    let utm_template = match rule.utm_template {
        UtmChoice::Template(id) => ctx.templates.get(&id).cloned(),
        UtmChoice::Inherit => category
            .and_then(|c| c.default_utm_template_id)
            .and_then(|id| ctx.templates.get(&id).cloned()),
        UtmChoice::None => None,
    };

    let mut keywords = rule.keywords.clone();
    keywords.sort_by_key(|k| std::cmp::Reverse(k.chars().count()));

    let mut placement = rule.placement.clone();
    placement.heading_levels = placement
        .heading_levels
        .iter()
        .map(|l| l.trim().to_lowercase())
        .collect();

    Some(RuntimeRule {
        rule_id: rule.id,
        title: rule.title.clone(),
        priority: rule.priority,
        keywords,
        destination_url,
        is_internal,
        category_id: category.map(|c| c.id),
        category_cap: category.map(|c| c.category_cap).unwrap_or(0),
        utm_template,
        utm_apply_to: rule.utm_apply_to,
        attributes: rule.attributes.clone(),
        max_per_page,
        max_per_block: rule.limits.max_per_block,
        placement,
        post_types: rule.scope.post_types.iter().map(|t| t.to_lowercase()).collect(),
        whitelist: rule.scope.whitelist.iter().map(|p| GlobPattern::new(p)).collect(),
        blacklist: rule.scope.blacklist.iter().map(|p| GlobPattern::new(p)).collect(),
    })
}

fn resolve_destination(destination: &Destination, ctx: &PrepareContext<'_>) -> Option<String> {
    let raw = match destination {
        Destination::Post(post_id) => ctx.directory.permalink(*post_id)?,
        Destination::Url(url) => url.trim().to_string(),
    };
    if raw.is_empty() {
        return None;
    }
    absolutize(&raw, &ctx.site.base_url())
}

/// 相对地址按站点根地址补全为绝对地址
pub fn absolutize(raw: &str, base_url: &str) -> Option<String> {
    match Url::parse(raw) {
        Ok(url) => Some(url.to_string()),
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            let base = Url::parse(base_url).ok()?;
            base.join(raw).ok().map(|u| u.to_string())
        }
        Err(_) => None,
    }
}

/// 主机名与站点主机一致（忽略大小写）即为站内链接
pub fn is_internal_url(url: &str, site_host: &str) -> bool {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.eq_ignore_ascii_case(site_host)))
        .unwrap_or(false)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::host::{StaticDirectory, StaticSite};
    use crate::rule::RuleLimits;

    /// 测试用最简运行时规则
    pub(crate) fn runtime_rule(title: &str, keywords: &[&str]) -> RuntimeRule {
        RuntimeRule {
            rule_id: 1,
            title: title.to_string(),
            priority: 0,
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            destination_url: "https://example.com/target".to_string(),
            is_internal: true,
            category_id: None,
            category_cap: 0,
            utm_template: None,
            utm_apply_to: ApplyTo::Both,
            attributes: LinkAttributes::default(),
            max_per_page: 10,
            max_per_block: None,
            placement: Placement::default(),
            post_types: Vec::new(),
            whitelist: Vec::new(),
            blacklist: Vec::new(),
        }
    }

    struct Fixture {
        categories: HashMap<u64, Category>,
        templates: HashMap<u64, UtmTemplate>,
        settings: Settings,
        site: StaticSite,
        directory: StaticDirectory,
    }

    impl Fixture {
        fn new() -> Self {
            let mut template = UtmTemplate::new("Inherited");
            template.id = 5;
            let mut category = Category::new("Guides");
            category.id = 2;
            category.category_cap = 4;
            category.default_utm_template_id = Some(5);

            Self {
                categories: HashMap::from([(2, category)]),
                templates: HashMap::from([(5, template)]),
                settings: Settings::default(),
                site: StaticSite::new("https://Example.com/", "Example").unwrap(),
                directory: StaticDirectory::new().with_post(9, "https://example.com/nine/"),
            }
        }

        fn ctx(&self) -> PrepareContext<'_> {
            PrepareContext {
                categories: &self.categories,
                templates: &self.templates,
                settings: &self.settings,
                site: &self.site,
                directory: &self.directory,
            }
        }
    }

    #[test]
    fn test_keywords_sorted_longest_first() {
        let fixture = Fixture::new();
        let rule = Rule::new("R", &["go", "golang tips", "golang"], Destination::Url("/go".into()));
        let runtime = prepare_runtime_rule(&rule, &fixture.ctx()).unwrap();
        assert_eq!(runtime.keywords, vec!["golang tips", "golang", "go"]);
    }

    #[test]
    fn test_destination_resolution_and_classification() {
        let fixture = Fixture::new();

        let relative = Rule::new("R", &["a"], Destination::Url("/docs/a".into()));
        let runtime = prepare_runtime_rule(&relative, &fixture.ctx()).unwrap();
        assert_eq!(runtime.destination_url, "https://example.com/docs/a");
        assert!(runtime.is_internal);

        let external = Rule::new("R", &["a"], Destination::Url("https://rust-lang.org/".into()));
        assert!(!prepare_runtime_rule(&external, &fixture.ctx()).unwrap().is_internal);

        let post = Rule::new("R", &["a"], Destination::Post(9));
        let runtime = prepare_runtime_rule(&post, &fixture.ctx()).unwrap();
        assert_eq!(runtime.destination_url, "https://example.com/nine/");

        let missing = Rule::new("R", &["a"], Destination::Post(10));
        assert!(prepare_runtime_rule(&missing, &fixture.ctx()).is_none());
    }

    #[test]
    fn test_limits_and_inheritance() {
        let fixture = Fixture::new();

        let mut rule = Rule::new("R", &["a"], Destination::Url("/a".into()));
        rule.category_id = Some(2);
        let runtime = prepare_runtime_rule(&rule, &fixture.ctx()).unwrap();
        assert_eq!(runtime.max_per_page, fixture.settings.default_max_links_per_page);
        assert_eq!(runtime.category_cap, 4);
        assert_eq!(runtime.utm_template.map(|t| t.id), Some(5));

        rule.utm_template = UtmChoice::None;
        assert!(prepare_runtime_rule(&rule, &fixture.ctx()).unwrap().utm_template.is_none());

        rule.limits = RuleLimits {
            max_per_page: Some(0),
            max_per_block: None,
        };
        assert!(prepare_runtime_rule(&rule, &fixture.ctx()).is_none());
    }
}

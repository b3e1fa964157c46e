//! 改写遍历：按规则优先级逐条处理，在可插入的文本节点中把关键词包成链接

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::dom::{Document, NodeData, NodeId};
use super::matcher::{FoldedText, KeywordMatcher, MatchOptions};
use super::quota::{QuotaCheck, QuotaState};
use super::runtime::{RuntimeRule, absolutize};
use super::utm::{UtmTokens, apply_utms_to_url};
use crate::host::RenderContext;
use crate::rule::{HeadingPolicy, Placement};

/// 子树内永不插入链接的元素
const EXCLUDED_ELEMENTS: [&str; 13] = [
    "a", "code", "pre", "style", "script", "head", "title", "textarea", "select", "button",
    "iframe", "noscript", "svg",
];

const HEADINGS: [&str; 6] = ["h1", "h2", "h3", "h4", "h5", "h6"];
const LIST_ELEMENTS: [&str; 6] = ["li", "ul", "ol", "dl", "dt", "dd"];
const CAPTION_ELEMENTS: [&str; 2] = ["figcaption", "caption"];

/// 一次已提交的替换
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Replacement {
    pub rule_id: u64,
    pub rule_title: String,
    pub keyword: String,
    /// 实际写入 href 的地址（已附加 UTM）
    pub destination_url: String,
}

/// 单规则处理结果
enum RuleOutcome {
    Continue,
    /// 单页或分类配额用尽，该规则不再尝试
    Exhausted,
}

/// 一次渲染的改写过程；配额状态贯穿所有切块
pub struct RewritePass<'a> {
    options: MatchOptions,
    ctx: &'a RenderContext,
    site_name: &'a str,
    quota: QuotaState,
    replacements: Vec<Replacement>,
}

impl<'a> RewritePass<'a> {
    pub fn new(
        rules: &[RuntimeRule],
        options: MatchOptions,
        ctx: &'a RenderContext,
        site_name: &'a str,
    ) -> Self {
        Self {
            options,
            ctx,
            site_name,
            quota: QuotaState::new(rules),
            replacements: Vec::new(),
        }
    }

    /// 依次应用规则（调用方保证已按处理顺序排列），返回各切块是否被改动
    pub fn run(&mut self, rules: &[RuntimeRule], chunks: &mut [Document]) -> Vec<bool> {
        let mut changed = vec![false; chunks.len()];

        for rule in rules {
            let matcher = KeywordMatcher::new(&rule.keywords, self.options);
            for (index, doc) in chunks.iter_mut().enumerate() {
                let before = self.replacements.len();
                let outcome = self.apply_rule(rule, &matcher, index, doc);
                if self.replacements.len() > before {
                    changed[index] = true;
                }
                if matches!(outcome, RuleOutcome::Exhausted) {
                    debug!("规则 {} 配额已用尽", rule.rule_id);
                    break;
                }
            }
        }

        changed
    }

    pub fn into_replacements(self) -> Vec<Replacement> {
        self.replacements
    }

    fn apply_rule(
        &mut self,
        rule: &RuntimeRule,
        matcher: &KeywordMatcher,
        chunk_index: usize,
        doc: &mut Document,
    ) -> RuleOutcome {
        let nodes = eligible_text_nodes(doc, &rule.placement, self.ctx.is_widget());

        for node in nodes {
            let mut current = node;
            loop {
                let Some(text) = doc.text(current).map(str::to_string) else {
                    break;
                };
                let folded = FoldedText::new(&text, self.options.strip_accents);
                let Some(found) = matcher.find_next_match(&folded, 0) else {
                    break;
                };

                let block = (chunk_index, doc.top_level_ancestor(current));
                match self.quota.check(rule, block) {
                    QuotaCheck::Available => {}
                    QuotaCheck::BlockExhausted => break,
                    QuotaCheck::PageExhausted | QuotaCheck::CategoryExhausted => {
                        return RuleOutcome::Exhausted;
                    }
                }

                let keyword = rule.keywords[found.keyword].as_str();
                let tokens = UtmTokens {
                    keyword,
                    rule_id: rule.rule_id,
                    site_name: self.site_name,
                    ctx: self.ctx,
                };
                let href = apply_utms_to_url(&rule.destination_url, rule, &tokens);

                let Some((_, tail)) =
                    doc.wrap_text_range(current, found.start, found.end, "a", anchor_attrs(rule, &href))
                else {
                    break;
                };

                self.quota.commit(rule, block);
                self.replacements.push(Replacement {
                    rule_id: rule.rule_id,
                    rule_title: rule.title.clone(),
                    keyword: keyword.to_string(),
                    destination_url: href,
                });

                // 从剩余尾部继续扫描
                match tail {
                    Some(tail) => current = tail,
                    None => break,
                }
            }
        }

        RuleOutcome::Continue
    }
}

fn anchor_attrs(rule: &RuntimeRule, href: &str) -> Vec<(String, String)> {
    let mut attrs = vec![("href".to_string(), href.to_string())];

    if let Some(title) = rule.attributes.title_text.as_deref().map(str::trim) {
        if !title.is_empty() {
            attrs.push(("title".to_string(), title.to_string()));
        }
    }

    let mut rel = Vec::new();
    if rule.attributes.nofollow {
        rel.push("nofollow");
    }
    if rule.attributes.new_tab {
        attrs.push(("target".to_string(), "_blank".to_string()));
        rel.push("noopener");
    }
    if !rel.is_empty() {
        attrs.push(("rel".to_string(), rel.join(" ")));
    }
    attrs
}

/// 按文档顺序收集可插入链接的文本节点
/// 排除元素的子树不进入；非小工具上下文中由最近的受控祖先决定是否可用
pub fn eligible_text_nodes(doc: &Document, placement: &Placement, is_widget: bool) -> Vec<NodeId> {
    let mut result = Vec::new();
    let mut stack: Vec<(NodeId, bool)> = doc
        .children(Document::ROOT)
        .iter()
        .rev()
        .map(|&c| (c, true))
        .collect();

    while let Some((id, allowed)) = stack.pop() {
        match &doc.node(id).data {
            NodeData::Text(text) => {
                if allowed && !text.trim().is_empty() {
                    result.push(id);
                }
            }
            NodeData::Element { name, .. } => {
                let name = name.to_ascii_lowercase();
                if EXCLUDED_ELEMENTS.contains(&name.as_str()) {
                    continue;
                }
                let allowed = if is_widget {
                    true
                } else {
                    placement_gate(&name, placement).unwrap_or(allowed)
                };
                stack.extend(doc.children(id).iter().rev().map(|&c| (c, allowed)));
            }
            _ => {}
        }
    }

    result
}

/// 受控元素返回其放行结果，其他元素返回 None（沿用外层结果）
fn placement_gate(name: &str, placement: &Placement) -> Option<bool> {
    if HEADINGS.contains(&name) {
        return Some(match placement.headings {
            HeadingPolicy::All => true,
            HeadingPolicy::Selected => placement.heading_levels.iter().any(|l| l == name),
            HeadingPolicy::None => false,
        });
    }
    if name == "p" {
        return Some(placement.paragraphs);
    }
    if LIST_ELEMENTS.contains(&name) {
        return Some(placement.lists);
    }
    if CAPTION_ELEMENTS.contains(&name) {
        return Some(placement.captions);
    }
    None
}

/// 文档中已有链接的绝对地址集合
pub fn existing_hrefs(chunks: &[Document], base_url: &str) -> HashSet<String> {
    chunks
        .iter()
        .flat_map(|doc| {
            doc.descendant_elements(Document::ROOT)
                .into_iter()
                .filter(|&id| doc.element_name(id).is_some_and(|n| n.eq_ignore_ascii_case("a")))
                .filter_map(|id| doc.attr(id, "href"))
                .filter_map(|href| absolutize(href.trim(), base_url))
                .collect::<Vec<_>>()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::runtime::tests::runtime_rule;

    fn options() -> MatchOptions {
        MatchOptions {
            word_boundaries: true,
            strip_accents: false,
        }
    }

    fn rewrite(html: &str, rules: &[RuntimeRule], ctx: &RenderContext) -> (String, Vec<Replacement>) {
        let mut chunks = vec![Document::parse(html)];
        let mut pass = RewritePass::new(rules, options(), ctx, "Example");
        pass.run(rules, &mut chunks);
        (chunks[0].serialize(), pass.into_replacements())
    }

    #[test]
    fn test_excluded_elements_are_never_entered() {
        let rule = runtime_rule("Rust", &["rust"]);
        let html = "<p><a href=\"/x\">rust</a> <code>rust</code></p><pre>rust</pre><script>rust</script><p>rust</p>";
        let (out, replacements) = rewrite(html, &[rule], &RenderContext::content("/"));

        assert_eq!(replacements.len(), 1);
        assert!(out.ends_with("<p><a href=\"https://example.com/target\">rust</a></p>"));
        assert!(out.contains("<code>rust</code>"));
        assert!(out.contains("<pre>rust</pre>"));
    }

    #[test]
    fn test_page_limit_links_first_occurrences() {
        let mut rule = runtime_rule("Rust", &["rust"]);
        rule.max_per_page = 2;
        let (out, replacements) = rewrite(
            "<p>rust one, rust two, rust three</p>",
            &[rule],
            &RenderContext::content("/"),
        );
        assert_eq!(replacements.len(), 2);
        assert!(out.ends_with("two, rust three</p>"));
    }

    #[test]
    fn test_block_limit_moves_to_next_block() {
        let mut rule = runtime_rule("Rust", &["rust"]);
        rule.max_per_block = Some(1);
        let (out, replacements) = rewrite(
            "<p>rust rust</p><p>rust</p>",
            &[rule],
            &RenderContext::content("/"),
        );
        assert_eq!(replacements.len(), 2);
        assert_eq!(out.matches("<a ").count(), 2);
        assert!(out.contains("</a> rust</p>"));
    }

    #[test]
    fn test_placement_gates() {
        let rule = runtime_rule("Rust", &["rust"]);
        let html = "<h2>rust</h2><ul><li>rust</li></ul><figure><figcaption>rust</figcaption></figure><div>rust</div>";
        let (_, replacements) = rewrite(html, std::slice::from_ref(&rule), &RenderContext::content("/"));
        // 列表与裸 div 可插入，标题与图注默认不可
        assert_eq!(replacements.len(), 2);

        let mut headings = rule.clone();
        headings.placement.headings = HeadingPolicy::Selected;
        headings.placement.heading_levels = vec!["h3".into()];
        headings.placement.lists = false;
        let (_, replacements) = rewrite("<h2>rust</h2><h3>rust</h3><li>rust</li>", &[headings], &RenderContext::content("/"));
        assert_eq!(replacements.len(), 1);

        // 小工具上下文不受位置开关限制
        let (_, replacements) = rewrite("<h2>rust</h2>", &[rule], &RenderContext::widget("/"));
        assert_eq!(replacements.len(), 1);
    }

    #[test]
    fn test_anchor_attributes() {
        let mut rule = runtime_rule("Rust", &["rust"]);
        rule.attributes.title_text = Some("Read more".into());
        rule.attributes.nofollow = true;
        rule.attributes.new_tab = true;
        let (out, _) = rewrite("<p>Rust</p>", &[rule], &RenderContext::content("/"));
        assert_eq!(
            out,
            r#"<p><a href="https://example.com/target" title="Read more" target="_blank" rel="nofollow noopener">Rust</a></p>"#
        );
    }

    #[test]
    fn test_later_rules_skip_inserted_anchors() {
        let mut first = runtime_rule("Long", &["rust language"]);
        first.rule_id = 1;
        let mut second = runtime_rule("Short", &["rust"]);
        second.rule_id = 2;
        second.destination_url = "https://example.com/rust".into();

        let (out, replacements) = rewrite(
            "<p>The rust language and rust</p>",
            &[first, second],
            &RenderContext::content("/"),
        );
        assert_eq!(replacements.len(), 2);
        assert!(out.contains(r#"<a href="https://example.com/target">rust language</a>"#));
        assert!(out.contains(r#"and <a href="https://example.com/rust">rust</a>"#));
    }

    #[test]
    fn test_existing_hrefs_are_absolutized() {
        let docs = vec![Document::parse(r#"<p><a href="/target">x</a><a>y</a></p>"#)];
        let hrefs = existing_hrefs(&docs, "https://example.com/");
        assert!(hrefs.contains("https://example.com/target"));
        assert_eq!(hrefs.len(), 1);
    }
}

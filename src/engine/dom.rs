//! 基于下标的 HTML 节点树
//! 使用 html5ever 分词器逐个 token 建树，宽容处理残缺标记；
//! 序列化时尽量还原输入（隐式闭合的元素不补结束标签，孤立的结束标签原样保留）

use std::cell::RefCell;

use html5ever::tokenizer::states::RawKind;
use html5ever::tokenizer::{
    BufferQueue, Tag, TagKind, Token, TokenSink, TokenSinkResult, Tokenizer, TokenizerOpts,
};
use markup5ever::interface::Attribute;
use tendril::StrTendril;

pub type NodeId = usize;

/// 空元素：没有结束标签
const VOID_ELEMENTS: [&str; 14] = [
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

/// 内容按原文输出、不做实体转义的元素
const RAW_TEXT_ELEMENTS: [&str; 7] = [
    "script", "style", "xmp", "iframe", "noembed", "noframes", "plaintext",
];

/// 这些元素开始时隐式闭合仍打开的 <p>
const CLOSES_P: [&str; 28] = [
    "address", "article", "aside", "blockquote", "details", "div", "dl", "fieldset", "figcaption",
    "figure", "footer", "form", "h1", "h2", "h3", "h4", "h5", "h6", "header", "hr", "main", "nav",
    "ol", "p", "pre", "section", "table", "ul",
];

/// 查找可隐式闭合元素时的作用域边界
const SCOPE_BOUNDARIES: [&str; 9] = [
    "applet", "caption", "table", "td", "th", "marquee", "object", "template", "button",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeData {
    /// 片段根节点
    Document,
    Doctype(String),
    Comment(String),
    Text(String),
    Element {
        name: String,
        attrs: Vec<(String, String)>,
        self_closing: bool,
        /// 输入中出现过显式结束标签
        closed: bool,
    },
    /// 没有匹配开始标签的结束标签
    StrayEndTag(String),
}

#[derive(Debug, Clone)]
pub struct Node {
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub data: NodeData,
}

/// 节点树；节点只通过下标互相引用
#[derive(Debug, Clone)]
pub struct Document {
    nodes: Vec<Node>,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    pub const ROOT: NodeId = 0;

    /// 空文档（仅根节点）
    pub fn new() -> Self {
        Self {
            nodes: vec![Node {
                parent: None,
                children: Vec::new(),
                data: NodeData::Document,
            }],
        }
    }

    /// 宽容解析 HTML 片段
    pub fn parse(html: &str) -> Self {
        let parser = StreamParser::new();
        parser.feed(html);
        parser.finish()
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id].children
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id].parent
    }

    pub fn element_name(&self, id: NodeId) -> Option<&str> {
        match &self.nodes[id].data {
            NodeData::Element { name, .. } => Some(name.as_str()),
            _ => None,
        }
    }

    pub fn text(&self, id: NodeId) -> Option<&str> {
        match &self.nodes[id].data {
            NodeData::Text(text) => Some(text.as_str()),
            _ => None,
        }
    }

    pub fn attr(&self, id: NodeId, attr_name: &str) -> Option<&str> {
        match &self.nodes[id].data {
            NodeData::Element { attrs, .. } => attrs
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(attr_name))
                .map(|(_, v)| v.as_str()),
            _ => None,
        }
    }

    /// 根节点下的顶层祖先（“块”）；根节点自身返回根
    pub fn top_level_ancestor(&self, id: NodeId) -> NodeId {
        let mut current = id;
        while let Some(parent) = self.nodes[current].parent {
            if parent == Self::ROOT {
                return current;
            }
            current = parent;
        }
        current
    }

    /// 先序遍历的全部后代元素（不含自身）
    pub fn descendant_elements(&self, id: NodeId) -> Vec<NodeId> {
        let mut result = Vec::new();
        let mut stack: Vec<NodeId> = self.nodes[id].children.iter().rev().copied().collect();
        while let Some(current) = stack.pop() {
            if matches!(self.nodes[current].data, NodeData::Element { .. }) {
                result.push(current);
            }
            stack.extend(self.nodes[current].children.iter().rev().copied());
        }
        result
    }

    pub fn create_text(&mut self, text: impl Into<String>) -> NodeId {
        self.push_node(NodeData::Text(text.into()))
    }

    pub fn create_element(&mut self, name: impl Into<String>, attrs: Vec<(String, String)>) -> NodeId {
        self.push_node(NodeData::Element {
            name: name.into(),
            attrs,
            self_closing: false,
            closed: true,
        })
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) {
        self.nodes[child].parent = Some(parent);
        self.nodes[parent].children.push(child);
    }

    /// 用一组新节点替换目标节点（目标节点随之脱离树）
    pub fn replace_with(&mut self, target: NodeId, replacements: &[NodeId]) {
        let Some(parent) = self.nodes[target].parent else {
            return;
        };
        let Some(position) = self.nodes[parent].children.iter().position(|&c| c == target) else {
            return;
        };
        for &node in replacements {
            self.nodes[node].parent = Some(parent);
        }
        self.nodes[parent]
            .children
            .splice(position..=position, replacements.iter().copied());
        self.nodes[target].parent = None;
    }

    /// 把文本节点中 `[start, end)`（字符下标）切出，包进新元素；
    /// 返回新元素与剩余尾部文本节点
    pub fn wrap_text_range(
        &mut self,
        text_node: NodeId,
        start: usize,
        end: usize,
        name: &str,
        attrs: Vec<(String, String)>,
    ) -> Option<(NodeId, Option<NodeId>)> {
        let text = self.text(text_node)?.to_string();
        let start_byte = char_to_byte(&text, start);
        let end_byte = char_to_byte(&text, end);
        if start_byte >= end_byte {
            return None;
        }

        let mut replacements = Vec::with_capacity(3);
        if start_byte > 0 {
            replacements.push(self.create_text(&text[..start_byte]));
        }
        let element = self.create_element(name, attrs);
        let inner = self.create_text(&text[start_byte..end_byte]);
        self.append_child(element, inner);
        replacements.push(element);

        let tail = if end_byte < text.len() {
            let tail = self.create_text(&text[end_byte..]);
            replacements.push(tail);
            Some(tail)
        } else {
            None
        };

        self.replace_with(text_node, &replacements);
        Some((element, tail))
    }

    /// 序列化为 HTML
    pub fn serialize(&self) -> String {
        let mut out = String::new();
        // (节点, 是否为离开阶段, 是否处于原文元素内)
        let mut stack: Vec<(NodeId, bool, bool)> = self.nodes[Self::ROOT]
            .children
            .iter()
            .rev()
            .map(|&c| (c, false, false))
            .collect();

        while let Some((id, leaving, raw)) = stack.pop() {
            match &self.nodes[id].data {
                NodeData::Document => {}
                NodeData::Doctype(name) => {
                    out.push_str("<!DOCTYPE ");
                    out.push_str(name);
                    out.push('>');
                }
                NodeData::Comment(text) => {
                    out.push_str("<!--");
                    out.push_str(text);
                    out.push_str("-->");
                }
                NodeData::Text(text) => {
                    if raw {
                        out.push_str(text);
                    } else {
                        escape_text(text, &mut out);
                    }
                }
                NodeData::StrayEndTag(name) => {
                    out.push_str("</");
                    out.push_str(name);
                    out.push('>');
                }
                NodeData::Element {
                    name,
                    attrs,
                    self_closing,
                    closed,
                } => {
                    if leaving {
                        if *closed {
                            out.push_str("</");
                            out.push_str(name);
                            out.push('>');
                        }
                        continue;
                    }

                    out.push('<');
                    out.push_str(name);
                    for (key, value) in attrs {
                        out.push(' ');
                        out.push_str(key);
                        out.push_str("=\"");
                        escape_attr(value, &mut out);
                        out.push('"');
                    }
                    if *self_closing {
                        out.push_str(" /");
                    }
                    out.push('>');

                    if is_void(name) {
                        continue;
                    }
                    let child_raw = RAW_TEXT_ELEMENTS.contains(&name.as_str());
                    stack.push((id, true, raw));
                    stack.extend(
                        self.nodes[id]
                            .children
                            .iter()
                            .rev()
                            .map(|&c| (c, false, child_raw)),
                    );
                }
            }
        }

        out
    }

    fn push_node(&mut self, data: NodeData) -> NodeId {
        self.nodes.push(Node {
            parent: None,
            children: Vec::new(),
            data,
        });
        self.nodes.len() - 1
    }
}

/// 分段喂入的解析器：分词器状态跨段保留，可在顶层段落结束处取出已建好的文档另起一份
pub struct StreamParser {
    tokenizer: Tokenizer<TreeBuilderSink>,
    queue: BufferQueue,
}

impl Default for StreamParser {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamParser {
    pub fn new() -> Self {
        let sink = TreeBuilderSink {
            state: RefCell::new(BuildState::new()),
        };
        Self {
            tokenizer: Tokenizer::new(sink, TokenizerOpts::default()),
            queue: BufferQueue::default(),
        }
    }

    /// 喂入一段输入；返回这段输入是否恰好结束于一个顶层 `</p>`
    /// （分词器处于普通文本状态，且除根以外没有打开的元素）
    pub fn feed(&self, input: &str) -> bool {
        self.tokenizer.sink.state.borrow_mut().at_boundary = false;
        self.queue.push_back(StrTendril::from(input));
        let _ = self.tokenizer.feed(&self.queue);
        self.tokenizer.sink.state.borrow().at_boundary
    }

    /// 取出目前建好的文档，后续输入进入新文档
    pub fn take_document(&self) -> Document {
        let mut state = self.tokenizer.sink.state.borrow_mut();
        state.open = vec![Document::ROOT];
        std::mem::take(&mut state.doc)
    }

    pub fn finish(self) -> Document {
        self.tokenizer.end();
        self.tokenizer.sink.state.into_inner().doc
    }
}

pub fn is_void(name: &str) -> bool {
    VOID_ELEMENTS.contains(&name)
}

fn char_to_byte(s: &str, char_idx: usize) -> usize {
    s.char_indices()
        .nth(char_idx)
        .map(|(byte, _)| byte)
        .unwrap_or(s.len())
}

fn escape_text(text: &str, out: &mut String) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '\u{00A0}' => out.push_str("&nbsp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
}

fn escape_attr(value: &str, out: &mut String) {
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '\u{00A0}' => out.push_str("&nbsp;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
}

/// 建树状态：文档与打开元素栈（栈底为根）
struct BuildState {
    doc: Document,
    open: Vec<NodeId>,
    /// 最近一个 token 是否为顶层的 `</p>`
    at_boundary: bool,
}

impl BuildState {
    fn new() -> Self {
        Self {
            doc: Document::new(),
            open: vec![Document::ROOT],
            at_boundary: false,
        }
    }

    fn current(&self) -> NodeId {
        self.open.last().copied().unwrap_or(Document::ROOT)
    }

    fn start_tag(&mut self, tag: Tag) -> TokenSinkResult<()> {
        let name = tag.name.to_string();
        self.close_implied(&name);

        let attrs = tag.attrs.iter().map(attribute_pair).collect();
        let element = self.doc.push_node(NodeData::Element {
            name: name.clone(),
            attrs,
            self_closing: tag.self_closing,
            closed: false,
        });
        let parent = self.current();
        self.doc.append_child(parent, element);

        let raw_kind = match name.as_str() {
            "script" => Some(TokenSinkResult::RawData(RawKind::ScriptData)),
            "style" | "xmp" | "iframe" | "noembed" | "noframes" => {
                Some(TokenSinkResult::RawData(RawKind::Rawtext))
            }
            "textarea" | "title" => Some(TokenSinkResult::RawData(RawKind::Rcdata)),
            "plaintext" => Some(TokenSinkResult::Plaintext),
            _ => None,
        };

        // 原文元素忽略自闭合标记，后续内容一律归它
        if raw_kind.is_some() || (!is_void(&name) && !tag.self_closing) {
            self.open.push(element);
        }
        raw_kind.unwrap_or(TokenSinkResult::Continue)
    }

    fn end_tag(&mut self, name: &str) {
        let matched = if is_void(name) {
            None
        } else {
            self.open
                .iter()
                .rposition(|&id| id != Document::ROOT && self.doc.element_name(id) == Some(name))
        };

        match matched {
            Some(position) => {
                let element = self.open[position];
                if let NodeData::Element { closed, .. } = &mut self.doc.nodes[element].data {
                    *closed = true;
                }
                self.open.truncate(position);
            }
            None => {
                let stray = self.doc.push_node(NodeData::StrayEndTag(name.to_string()));
                let parent = self.current();
                self.doc.append_child(parent, stray);
            }
        }

        self.at_boundary = name == "p" && self.open.len() == 1;
    }

    /// HTML 的隐式闭合：新块元素闭合 <p>，新列表项闭合上一个列表项等
    fn close_implied(&mut self, name: &str) {
        if CLOSES_P.contains(&name) {
            self.close_open(&["p"], &[]);
        }
        match name {
            "li" => self.close_open(&["li"], &["ul", "ol"]),
            "dt" | "dd" => self.close_open(&["dt", "dd"], &["dl"]),
            "tr" => self.close_open(&["tr"], &["thead", "tbody", "tfoot"]),
            "td" | "th" => self.close_open(&["td", "th"], &["tr"]),
            "thead" | "tbody" | "tfoot" => self.close_open(&["thead", "tbody", "tfoot"], &[]),
            "option" => self.close_open(&["option"], &["select", "datalist"]),
            _ => {}
        }
    }

    /// 在作用域内自栈顶向下查找目标元素，找到则弹出到它为止（均视为隐式闭合）
    fn close_open(&mut self, targets: &[&str], extra_boundaries: &[&str]) {
        for position in (1..self.open.len()).rev() {
            let Some(open_name) = self.doc.element_name(self.open[position]) else {
                continue;
            };
            if targets.contains(&open_name) {
                self.open.truncate(position);
                return;
            }
            if SCOPE_BOUNDARIES.contains(&open_name) || extra_boundaries.contains(&open_name) {
                return;
            }
        }
    }

    fn text(&mut self, text: &str) {
        let parent = self.current();
        if let Some(&last) = self.doc.nodes[parent].children.last() {
            if let NodeData::Text(existing) = &mut self.doc.nodes[last].data {
                existing.push_str(text);
                return;
            }
        }
        let node = self.doc.create_text(text);
        self.doc.append_child(parent, node);
    }

    fn leaf(&mut self, data: NodeData) {
        let node = self.doc.push_node(data);
        let parent = self.current();
        self.doc.append_child(parent, node);
    }
}

fn attribute_pair(attr: &Attribute) -> (String, String) {
    (attr.name.local.to_string(), attr.value.to_string())
}

struct TreeBuilderSink {
    state: RefCell<BuildState>,
}

impl TokenSink for TreeBuilderSink {
    type Handle = ();

    fn process_token(&self, token: Token, _line: u64) -> TokenSinkResult<()> {
        let mut state = self.state.borrow_mut();
        if !matches!(token, Token::ParseError(_)) {
            state.at_boundary = false;
        }
        match token {
            Token::TagToken(tag) => match tag.kind {
                TagKind::StartTag => return state.start_tag(tag),
                TagKind::EndTag => state.end_tag(&tag.name.to_string()),
            },
            Token::CharacterTokens(text) => state.text(&text),
            Token::CommentToken(text) => state.leaf(NodeData::Comment(text.to_string())),
            Token::DoctypeToken(doctype) => {
                let name = doctype
                    .name
                    .map(|n| n.to_string())
                    .unwrap_or_else(|| "html".to_string());
                state.leaf(NodeData::Doctype(name));
            }
            _ => {}
        }
        TokenSinkResult::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(html: &str) -> String {
        Document::parse(html).serialize()
    }

    #[test]
    fn test_well_formed_markup_round_trips() {
        let html = r#"<h2 class="t">Title</h2><p>Hello <b>world</b> &amp; friends</p><!-- note --><img src="a.png">"#;
        assert_eq!(round_trip(html), html);
    }

    #[test]
    fn test_implicit_closes_are_not_invented() {
        let html = "<ul><li>one<li>two</ul><p>a<p>b";
        assert_eq!(round_trip(html), html);

        let doc = Document::parse("<p>a<p>b");
        assert_eq!(doc.children(Document::ROOT).len(), 2);
    }

    #[test]
    fn test_stray_end_tags_are_kept() {
        assert_eq!(round_trip("text</div> more"), "text</div> more");
    }

    #[test]
    fn test_script_content_is_raw() {
        let html = "<script>if (a < b && c) { x = '<p>'; }</script><p>1 &lt; 2</p>";
        let doc = Document::parse(html);
        let script = doc.children(Document::ROOT)[0];
        assert_eq!(doc.element_name(script), Some("script"));
        assert_eq!(doc.children(script).len(), 1);
        assert_eq!(round_trip(html), html);
    }

    #[test]
    fn test_stream_parser_reports_top_level_paragraph_ends() {
        let parser = StreamParser::new();
        assert!(parser.feed("<p>one</p>"));
        assert!(!parser.feed("<div><p>two</p>"));
        assert!(!parser.feed("</div><!-- <p>x</p>"));
        assert!(!parser.feed(" --><script>'<p>y</p>"));
        assert!(!parser.feed("'</script><a><p>z</p>"));
        assert!(parser.feed("</a><p>w</p>"));
    }

    #[test]
    fn test_stream_parser_take_document_starts_fresh() {
        let parser = StreamParser::new();
        assert!(parser.feed("<p>one</p>"));
        let first = parser.take_document();
        parser.feed("<p>two</p>tail");
        let second = parser.finish();

        assert_eq!(first.serialize(), "<p>one</p>");
        assert_eq!(second.serialize(), "<p>two</p>tail");
        assert_eq!(second.children(Document::ROOT).len(), 2);
    }

    #[test]
    fn test_wrap_text_range_splits_node() {
        let mut doc = Document::parse("<p>héllo wörld</p>");
        let p = doc.children(Document::ROOT)[0];
        let text = doc.children(p)[0];

        let (anchor, tail) = doc
            .wrap_text_range(text, 6, 11, "a", vec![("href".into(), "/w".into())])
            .unwrap();
        assert_eq!(doc.element_name(anchor), Some("a"));
        assert!(tail.is_none());
        assert_eq!(doc.serialize(), r#"<p>héllo <a href="/w">wörld</a></p>"#);
        assert_eq!(doc.top_level_ancestor(anchor), p);
    }
}

//! 长文档切块：只在顶层 `</p>` 之后切开，每块独立建树，配额在块间共享
//! 切点由分段喂入的分词器确认，链接、脚本、注释、列表内部的 `</p>` 不会成为切点

use once_cell::sync::Lazy;
use regex::Regex;

use super::dom::{Document, StreamParser};

static PARAGRAPH_END: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)</p\s*>").unwrap());

/// 一个切块：原文片段与其节点树
pub struct Chunk<'a> {
    pub source: &'a str,
    pub doc: Document,
}

/// 把文档切成约 `threshold / 2` 字节的片段并解析；不超过阈值时整体返回
/// 各片段按顺序拼接后与原文完全一致
pub fn parse_chunks(html: &str, threshold: usize) -> Vec<Chunk<'_>> {
    if html.len() <= threshold {
        return vec![Chunk {
            source: html,
            doc: Document::parse(html),
        }];
    }

    let target = (threshold / 2).max(1);
    let parser = StreamParser::new();
    let mut chunks = Vec::new();
    let mut chunk_start = 0;
    let mut fed = 0;

    for boundary in PARAGRAPH_END.find_iter(html) {
        let cut = boundary.end();
        let at_top_level = parser.feed(&html[fed..cut]);
        fed = cut;
        if at_top_level && cut - chunk_start >= target {
            chunks.push(Chunk {
                source: &html[chunk_start..cut],
                doc: parser.take_document(),
            });
            chunk_start = cut;
        }
    }

    parser.feed(&html[fed..]);
    let doc = parser.finish();
    if chunk_start < html.len() || chunks.is_empty() {
        chunks.push(Chunk {
            source: &html[chunk_start..],
            doc,
        });
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sources<'a>(chunks: &[Chunk<'a>]) -> Vec<&'a str> {
        chunks.iter().map(|c| c.source).collect()
    }

    #[test]
    fn test_short_document_is_single_chunk() {
        let chunks = parse_chunks("<p>a</p><p>b</p>", 100);
        assert_eq!(sources(&chunks), vec!["<p>a</p><p>b</p>"]);
        assert_eq!(chunks[0].doc.serialize(), "<p>a</p><p>b</p>");
    }

    #[test]
    fn test_cuts_after_paragraph_ends() {
        let paragraph = format!("<p>{}</p>", "x".repeat(20));
        let html = paragraph.repeat(10);
        let chunks = parse_chunks(&html, 60);

        assert!(chunks.len() > 1);
        assert_eq!(sources(&chunks).concat(), html);
        for chunk in &chunks[..chunks.len() - 1] {
            assert!(chunk.source.ends_with("</p>"));
            assert!(chunk.source.len() >= 30);
        }
        for chunk in &chunks {
            assert_eq!(chunk.doc.serialize(), chunk.source);
        }
    }

    #[test]
    fn test_case_insensitive_boundary_and_tail() {
        let html = format!("<P>{}</P >tail without paragraph", "y".repeat(40));
        let chunks = parse_chunks(&html, 40);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].source, "tail without paragraph");
    }

    #[test]
    fn test_no_cut_inside_anchor() {
        let filler = "x ".repeat(40);
        let html = format!(r#"<a href="/card"><p>{filler}</p> tips</a><p>{filler}</p>"#);
        let chunks = parse_chunks(&html, 60);

        assert_eq!(chunks.len(), 1);
        let doc = &chunks[0].doc;
        let anchor = doc.children(Document::ROOT)[0];
        assert_eq!(doc.element_name(anchor), Some("a"));
        assert_eq!(doc.children(anchor).len(), 2);
        assert_eq!(doc.serialize(), html);
    }

    #[test]
    fn test_no_cut_inside_script() {
        let filler = "x ".repeat(40);
        let html = format!(r#"<script>var s = "<p>{filler}</p>"; var n = 1;</script><p>{filler}</p>"#);
        let chunks = parse_chunks(&html, 60);

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].doc.serialize(), html);
    }

    #[test]
    fn test_no_cut_inside_list_item_or_comment() {
        let filler = "x ".repeat(40);
        let list = format!("<ul><li><p>{filler}</p> more</li></ul><p>{filler}</p>");
        let chunks = parse_chunks(&list, 60);
        assert_eq!(chunks.len(), 1);

        let comment = format!("<!-- <p>{filler}</p> --><p>{filler}</p>");
        let chunks = parse_chunks(&comment, 60);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].doc.serialize(), comment);
    }
}

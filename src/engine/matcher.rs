//! 关键词匹配
//! 按码点（而非字节）进行忽略大小写的子串查找，可选去除重音符号；
//! 同一起点的多个命中取最长者，起点最早者优先

use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

/// 匹配选项（来自全局设置）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchOptions {
    pub word_boundaries: bool,
    pub strip_accents: bool,
}

/// 折叠后的文本：小写（可选去重音）字符序列，以及每个字符对应的原文字符下标
#[derive(Debug, Clone)]
pub struct FoldedText {
    original: Vec<char>,
    chars: Vec<char>,
    origin: Vec<usize>,
}

impl FoldedText {
    pub fn new(text: &str, strip_accents: bool) -> Self {
        let original: Vec<char> = text.chars().collect();
        let mut chars = Vec::with_capacity(original.len());
        let mut origin = Vec::with_capacity(original.len());

        for (index, &c) in original.iter().enumerate() {
            for folded in fold_char(c, strip_accents) {
                chars.push(folded);
                origin.push(index);
            }
        }

        Self {
            original,
            chars,
            origin,
        }
    }

    /// 折叠序列中第一个不早于原文下标 `from` 的位置
    fn folded_index(&self, from: usize) -> usize {
        self.origin.partition_point(|&o| o < from)
    }

    /// 折叠位置 `pos` 是否恰好落在某个原文字符展开序列的开头
    fn starts_char(&self, pos: usize) -> bool {
        pos == 0 || self.origin[pos - 1] != self.origin[pos]
    }

    /// 折叠位置 `end`（开区间）是否恰好落在原文字符展开序列的结尾
    fn ends_char(&self, end: usize) -> bool {
        end == self.chars.len() || self.origin[end - 1] != self.origin[end]
    }
}

/// 单个字符的折叠结果
fn fold_char(c: char, strip_accents: bool) -> Vec<char> {
    if strip_accents {
        c.nfd()
            .filter(|d| !is_combining_mark(*d))
            .flat_map(char::to_lowercase)
            .collect()
    } else {
        c.to_lowercase().collect()
    }
}

/// 折叠整个字符串（关键词使用）
pub fn fold_str(text: &str, strip_accents: bool) -> Vec<char> {
    text.chars().flat_map(|c| fold_char(c, strip_accents)).collect()
}

/// 词字符：字母数字或下划线
pub fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// 一次命中；下标为原文字符下标，`end` 为开区间
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeywordMatch {
    pub start: usize,
    pub end: usize,
    /// 命中的关键词在规则关键词列表中的下标
    pub keyword: usize,
}

impl KeywordMatch {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// 单条规则的关键词匹配器
#[derive(Debug, Clone)]
pub struct KeywordMatcher {
    needles: Vec<Vec<char>>,
    options: MatchOptions,
}

impl KeywordMatcher {
    /// 关键词应已按长度降序排列
    pub fn new(keywords: &[String], options: MatchOptions) -> Self {
        let needles = keywords
            .iter()
            .map(|k| fold_str(k, options.strip_accents))
            .collect();
        Self { needles, options }
    }

    /// 从原文字符下标 `from` 起查找下一个命中
    pub fn find_next_match(&self, haystack: &FoldedText, from: usize) -> Option<KeywordMatch> {
        let start_pos = haystack.folded_index(from);
        let mut best: Option<KeywordMatch> = None;

        for (keyword, needle) in self.needles.iter().enumerate() {
            let Some(found) = self.find_keyword(haystack, needle, start_pos) else {
                continue;
            };
            let found = KeywordMatch { keyword, ..found };
            best = match best {
                Some(current)
                    if current.start < found.start
                        || (current.start == found.start && current.len() >= found.len()) =>
                {
                    Some(current)
                }
                _ => Some(found),
            };
        }

        best
    }

    /// 单个关键词的最左合法命中
    fn find_keyword(
        &self,
        haystack: &FoldedText,
        needle: &[char],
        start_pos: usize,
    ) -> Option<KeywordMatch> {
        let width = needle.len();
        if width == 0 || haystack.chars.len() < width {
            return None;
        }

        for pos in start_pos..=haystack.chars.len() - width {
            if haystack.chars[pos..pos + width] != *needle {
                continue;
            }
            let end_pos = pos + width;
            if !haystack.starts_char(pos) || !haystack.ends_char(end_pos) {
                continue;
            }

            let start = haystack.origin[pos];
            let end = haystack.origin[end_pos - 1] + 1;
            if self.options.word_boundaries && !has_word_boundaries(&haystack.original, start, end) {
                continue;
            }

            return Some(KeywordMatch {
                start,
                end,
                keyword: 0,
            });
        }

        None
    }
}

fn has_word_boundaries(original: &[char], start: usize, end: usize) -> bool {
    let before_ok = start == 0 || !is_word_char(original[start - 1]);
    let after_ok = end >= original.len() || !is_word_char(original[end]);
    before_ok && after_ok
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matcher(keywords: &[&str], word_boundaries: bool, strip_accents: bool) -> KeywordMatcher {
        let keywords: Vec<String> = keywords.iter().map(|k| k.to_string()).collect();
        KeywordMatcher::new(
            &keywords,
            MatchOptions {
                word_boundaries,
                strip_accents,
            },
        )
    }

    #[test]
    fn test_word_boundaries_reject_partial_words() {
        let m = matcher(&["cat"], true, false);
        let text = FoldedText::new("A category of things", false);
        assert_eq!(m.find_next_match(&text, 0), None);

        let text = FoldedText::new("The cat sat", false);
        let found = m.find_next_match(&text, 0).unwrap();
        assert_eq!((found.start, found.end), (4, 7));

        let text = FoldedText::new("my_cat and cat", false);
        let found = m.find_next_match(&text, 0).unwrap();
        assert_eq!(found.start, 11);
    }

    #[test]
    fn test_without_boundaries_substrings_match() {
        let m = matcher(&["cat"], false, false);
        let text = FoldedText::new("Category", false);
        assert_eq!(m.find_next_match(&text, 0).map(|f| f.start), Some(0));
    }

    #[test]
    fn test_earliest_then_longest() {
        let m = matcher(&["rust language", "rust", "language"], true, false);
        let text = FoldedText::new("Learn the Rust language today", false);
        let found = m.find_next_match(&text, 0).unwrap();
        assert_eq!(found.keyword, 0);
        assert_eq!((found.start, found.end), (10, 23));

        // 关键词顺序不影响“同起点取最长”
        let m = matcher(&["rust", "rust language"], true, false);
        let found = m.find_next_match(&text, 0).unwrap();
        assert_eq!(found.keyword, 1);
    }

    #[test]
    fn test_accent_folding_maps_back_to_original() {
        let m = matcher(&["cafe"], true, true);
        let text = FoldedText::new("Un Café noir", true);
        let found = m.find_next_match(&text, 0).unwrap();
        assert_eq!((found.start, found.end), (3, 7));

        let strict = matcher(&["cafe"], true, false);
        let text = FoldedText::new("Un Café noir", false);
        assert_eq!(strict.find_next_match(&text, 0), None);
    }

    #[test]
    fn test_codepoint_offsets_and_resume() {
        let m = matcher(&["über"], true, false);
        let text = FoldedText::new("ÜBER alles, über", false);
        let first = m.find_next_match(&text, 0).unwrap();
        assert_eq!((first.start, first.end), (0, 4));
        let second = m.find_next_match(&text, first.end).unwrap();
        assert_eq!(second.start, 12);
    }
}

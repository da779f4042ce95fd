//! 标签归一化与模糊匹配
//!
//! 归一化：小写、去标点、合并空白。相似度使用 Sørensen–Dice 二元组系数（strsim），
//! 问题文本阈值 0.6，选项文本阈值 0.4；阈值判断为 `>=`。

use std::sync::OnceLock;

use regex::Regex;

/// 问题文本匹配阈值
pub const TEXT_MATCH_THRESHOLD: f64 = 0.6;
/// 选项文本匹配阈值
pub const OPTION_MATCH_THRESHOLD: f64 = 0.4;
/// 整词包含时给予的最低分（保证不低于选项阈值）
const WORD_CONTAINMENT_SCORE: f64 = 0.5;

fn whitespace_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("static regex"))
}

/// 小写、去标点（撇号直接删除，其余替换为空格）、合并空白
pub fn normalize(text: &str) -> String {
    let mapped: String = text
        .chars()
        .filter(|c| *c != '\'' && *c != '’')
        .map(|c| {
            if c.is_alphanumeric() || c.is_whitespace() {
                c
            } else {
                ' '
            }
        })
        .collect::<String>()
        .to_lowercase();
    whitespace_re().replace_all(mapped.trim(), " ").into_owned()
}

/// 两个已归一化字符串的相似度，取值 [0, 1]
pub fn similarity(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    strsim::sorensen_dice(a, b)
}

/// 阈值判断（含边界）
pub fn accepts(score: f64, threshold: f64) -> bool {
    score >= threshold
}

/// 一方是否以整词序列包含另一方
pub(crate) fn contains_words(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return false;
    }
    let padded = format!(" {haystack} ");
    padded.contains(&format!(" {needle} "))
}

/// 选项打分：Dice 系数，整词包含时至少给 WORD_CONTAINMENT_SCORE
pub fn option_score(option: &str, answer: &str) -> f64 {
    let o = normalize(option);
    let a = normalize(answer);
    let base = similarity(&o, &a);
    if contains_words(&o, &a) || contains_words(&a, &o) {
        base.max(WORD_CONTAINMENT_SCORE)
    } else {
        base
    }
}

/// 在候选选项中找出与答案最相近且达到阈值的一项，返回 (下标, 分数)
///
/// 调用方负责事先剔除占位项与禁用项。
pub fn best_option<'a, I>(options: I, answer: &str, threshold: f64) -> Option<(usize, f64)>
where
    I: IntoIterator<Item = (usize, &'a str)>,
{
    let mut best: Option<(usize, f64)> = None;
    for (i, text) in options {
        let score = option_score(text, answer);
        if !accepts(score, threshold) {
            continue;
        }
        if best.map_or(true, |(_, s)| score > s) {
            best = Some((i, score));
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("  What's your   E-mail?? "), "whats your e mail");
        assert_eq!(normalize("-- Select --"), "select");
        assert_eq!(normalize("Years of experience (Rust)"), "years of experience rust");
    }

    #[test]
    fn test_threshold_boundary() {
        assert!(accepts(0.6, TEXT_MATCH_THRESHOLD));
        assert!(!accepts(0.599, TEXT_MATCH_THRESHOLD));
        assert!(accepts(0.4, OPTION_MATCH_THRESHOLD));
        assert!(!accepts(0.399, OPTION_MATCH_THRESHOLD));
    }

    #[test]
    fn test_similarity_exactly_point_six() {
        // 各 5 个二元组，共享 ab bc cd：2*3/10
        assert_eq!(similarity("abcdef", "abcdxy"), 0.6);
    }

    #[test]
    fn test_best_option_prefers_exact() {
        let opts = [(1, "Yes"), (2, "No"), (3, "Yes, with sponsorship")];
        let (idx, score) = best_option(opts, "Yes", OPTION_MATCH_THRESHOLD).unwrap();
        assert_eq!(idx, 1);
        assert_eq!(score, 1.0);
    }

    #[test]
    fn test_best_option_word_containment() {
        let opts = [(0, "Yes, I am authorized"), (1, "No, I am not authorized")];
        let (idx, _) = best_option(opts, "yes", OPTION_MATCH_THRESHOLD).unwrap();
        assert_eq!(idx, 0);
    }

    #[test]
    fn test_best_option_none_below_threshold() {
        let opts = [(0, "Red"), (1, "Blue")];
        assert!(best_option(opts, "Seventeen", OPTION_MATCH_THRESHOLD).is_none());
    }
}

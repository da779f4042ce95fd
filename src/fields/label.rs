//! 字段标签提取：按固定优先级依次尝试各策略，取第一个非空结果

use crate::browser::{LabelHints, RawField};

/// 祖先文本最多向上查找的层数
pub const MAX_ANCESTOR_DEPTH: usize = 4;
/// 超过该长度的祖先文本视为整块内容而非标签
const MAX_ANCESTOR_TEXT_CHARS: usize = 200;
/// name 属性超过该长度多为机器生成
const MAX_NAME_ATTR_CHARS: usize = 60;

/// 标签来源（优先级从高到低）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelSource {
    BoundLabel,
    AccessibleName,
    LabelledBy,
    Placeholder,
    NameAttribute,
    /// 第 n 层祖先（0 为父节点）
    Ancestor(usize),
}

fn non_empty(s: &Option<String>) -> Option<String> {
    s.as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
}

/// `years_of_experience` / `phoneNumber` → 人类可读
fn humanize_name(name: &str) -> Option<String> {
    let name = name.trim();
    if name.is_empty() || name.chars().count() > MAX_NAME_ATTR_CHARS {
        return None;
    }
    let digits = name.chars().filter(|c| c.is_ascii_digit()).count();
    if digits * 3 > name.len() {
        return None;
    }
    let mut out = String::with_capacity(name.len() + 4);
    let mut prev_lower = false;
    for c in name.chars() {
        if c == '_' || c == '-' || c == '.' || c == '[' || c == ']' {
            out.push(' ');
            prev_lower = false;
        } else {
            if c.is_uppercase() && prev_lower {
                out.push(' ');
            }
            prev_lower = c.is_lowercase();
            out.push(c);
        }
    }
    let out = out.split_whitespace().collect::<Vec<_>>().join(" ");
    (!out.is_empty()).then_some(out)
}

/// 祖先文本首个非空行（过长视为非标签）
fn ancestor_label(text: &str) -> Option<String> {
    let line = text.lines().map(str::trim).find(|l| !l.is_empty())?;
    (line.chars().count() <= MAX_ANCESTOR_TEXT_CHARS).then(|| line.to_string())
}

/// 按优先级提取标签
pub fn extract_label(hints: &LabelHints) -> Option<(LabelSource, String)> {
    if let Some(l) = non_empty(&hints.bound_label) {
        return Some((LabelSource::BoundLabel, l));
    }
    if let Some(l) = non_empty(&hints.accessible_name) {
        return Some((LabelSource::AccessibleName, l));
    }
    if let Some(l) = non_empty(&hints.labelled_by) {
        return Some((LabelSource::LabelledBy, l));
    }
    if let Some(l) = non_empty(&hints.placeholder) {
        return Some((LabelSource::Placeholder, l));
    }
    if let Some(l) = hints.name_attr.as_deref().and_then(humanize_name) {
        return Some((LabelSource::NameAttribute, l));
    }
    hints
        .ancestor_texts
        .iter()
        .take(MAX_ANCESTOR_DEPTH)
        .enumerate()
        .find_map(|(depth, text)| ancestor_label(text).map(|l| (LabelSource::Ancestor(depth), l)))
}

/// 单选组的问题文本：legend → 问题容器 → 不等于任一选项文本的祖先文本
///
/// 不使用单个选项自身的 label。
pub fn group_label(members: &[RawField]) -> Option<String> {
    let first = members.first()?;
    if let Some(l) = non_empty(&first.hints.legend) {
        return Some(l);
    }
    if let Some(l) = non_empty(&first.hints.question_text) {
        return Some(l);
    }
    let option_texts: Vec<String> = members.iter().filter_map(option_text).collect();
    first
        .hints
        .ancestor_texts
        .iter()
        .take(MAX_ANCESTOR_DEPTH)
        .filter_map(|t| ancestor_label(t))
        .find(|l| !option_texts.iter().any(|o| o.eq_ignore_ascii_case(l)))
}

/// 单选/复选项自身的文本
pub fn option_text(field: &RawField) -> Option<String> {
    non_empty(&field.option_label).or_else(|| non_empty(&field.hints.bound_label))
}

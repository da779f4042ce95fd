//! 答案知识库：问题文本 → 答案
//!
//! 支持两种文件格式（按扩展名区分）：
//! - TOML：`[answers]` 表，值可为字符串、整数、浮点、布尔
//! - JSON：顶层对象，或 `{"answers": {...}}`
//!
//! 键在载入时归一化；查找顺序为精确匹配、模糊匹配（≥ 0.6，取最高分）、子串包含（双向，键至少 3 个字符，取最长键）。

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};

use super::matcher::{accepts, contains_words, normalize, similarity, TEXT_MATCH_THRESHOLD};

/// 参与子串包含比较的最短键长
pub const MIN_SUBSTRING_KEY_CHARS: usize = 3;

/// 命中方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    Exact,
    Fuzzy,
    Substring,
}

/// 一次查找命中
#[derive(Debug, Clone, PartialEq)]
pub struct AnswerMatch<'a> {
    pub key: &'a str,
    pub answer: &'a str,
    pub score: f64,
    pub kind: MatchKind,
}

/// 答案知识库（只读，运行期间不变）
#[derive(Debug, Clone, Default)]
pub struct AnswerKnowledgeBase {
    entries: BTreeMap<String, String>,
}

impl AnswerKnowledgeBase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut kb = Self::new();
        for (k, v) in pairs {
            kb.insert(k.as_ref(), v);
        }
        kb
    }

    /// 插入一条；归一化后为空的键被忽略
    pub fn insert(&mut self, question: &str, answer: impl Into<String>) {
        let key = normalize(question);
        if !key.is_empty() {
            self.entries.insert(key, answer.into());
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 按扩展名载入（.json 为 JSON，其余按 TOML）
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read answers file {}", path.display()))?;
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));
        let kb = if is_json {
            Self::from_json_str(&content)
        } else {
            Self::from_toml_str(&content)
        };
        kb.with_context(|| format!("Invalid answers file {}", path.display()))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let value: toml::Value = toml::from_str(content)?;
        let table = match value.get("answers") {
            Some(toml::Value::Table(t)) => t.clone(),
            Some(_) => anyhow::bail!("[answers] must be a table"),
            None => value.as_table().cloned().unwrap_or_default(),
        };
        let mut kb = Self::new();
        for (question, answer) in table {
            match toml_scalar(&answer) {
                Some(a) => kb.insert(&question, a),
                None => tracing::warn!(question = %question, "Ignoring non-scalar answer"),
            }
        }
        Ok(kb)
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(content)?;
        let obj = match value.get("answers") {
            Some(serde_json::Value::Object(o)) => o.clone(),
            Some(_) => anyhow::bail!("\"answers\" must be an object"),
            None => value
                .as_object()
                .cloned()
                .context("answers file must be a JSON object")?,
        };
        let mut kb = Self::new();
        for (question, answer) in obj {
            match json_scalar(&answer) {
                Some(a) => kb.insert(&question, a),
                None => tracing::warn!(question = %question, "Ignoring non-scalar answer"),
            }
        }
        Ok(kb)
    }

    /// 按标签查找答案
    pub fn lookup(&self, label: &str) -> Option<AnswerMatch<'_>> {
        let label = normalize(label);
        if label.is_empty() {
            return None;
        }

        if let Some((key, answer)) = self.entries.get_key_value(&label) {
            return Some(AnswerMatch {
                key,
                answer,
                score: 1.0,
                kind: MatchKind::Exact,
            });
        }

        let mut best: Option<AnswerMatch<'_>> = None;
        for (key, answer) in &self.entries {
            let score = similarity(&label, key);
            if accepts(score, TEXT_MATCH_THRESHOLD) && best.as_ref().map_or(true, |b| score > b.score) {
                best = Some(AnswerMatch {
                    key,
                    answer,
                    score,
                    kind: MatchKind::Fuzzy,
                });
            }
        }
        if best.is_some() {
            return best;
        }

        if label.chars().count() < MIN_SUBSTRING_KEY_CHARS {
            return None;
        }
        self.entries
            .iter()
            .filter(|(key, _)| key.chars().count() >= MIN_SUBSTRING_KEY_CHARS)
            .filter(|(key, _)| contains_words(&label, key) || contains_words(key, &label))
            .max_by_key(|(key, _)| key.len())
            .map(|(key, answer)| AnswerMatch {
                key,
                answer,
                score: similarity(&label, key),
                kind: MatchKind::Substring,
            })
    }
}

fn toml_scalar(v: &toml::Value) -> Option<String> {
    match v {
        toml::Value::String(s) => Some(s.clone()),
        toml::Value::Integer(i) => Some(i.to_string()),
        toml::Value::Float(f) => Some(f.to_string()),
        toml::Value::Boolean(b) => Some(yes_no(*b)),
        _ => None,
    }
}

fn json_scalar(v: &serde_json::Value) -> Option<String> {
    match v {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Bool(b) => Some(yes_no(*b)),
        _ => None,
    }
}

fn yes_no(b: bool) -> String {
    if b { "Yes" } else { "No" }.to_string()
}

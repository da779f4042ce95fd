//! 字段解析：标签提取、分类、模糊匹配答案知识库、逐字段填写

pub mod classify;
pub mod knowledge;
pub mod label;
pub mod matcher;
pub mod resolver;

pub use classify::{classify, FieldKind};
pub use knowledge::{AnswerKnowledgeBase, AnswerMatch, MatchKind};
pub use label::{extract_label, group_label, LabelSource};
pub use matcher::{normalize, similarity, OPTION_MATCH_THRESHOLD, TEXT_MATCH_THRESHOLD};
pub use resolver::{FieldResolver, FillReport, UnmatchedField};

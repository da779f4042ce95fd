//! 字段分类

use serde::{Deserialize, Serialize};

use crate::browser::RawField;

/// 字段类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FieldKind {
    Text,
    Textarea,
    Select,
    RadioGroup,
    Checkbox,
    File,
}

impl FieldKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldKind::Text => "text",
            FieldKind::Textarea => "textarea",
            FieldKind::Select => "select",
            FieldKind::RadioGroup => "radio-group",
            FieldKind::Checkbox => "checkbox",
            FieldKind::File => "file",
        }
    }
}

impl std::fmt::Display for FieldKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

const TEXT_INPUT_TYPES: &[&str] = &["text", "email", "tel", "number", "url", "search", "date", "month"];

/// 按标签名、type、role 分类；不可填写的控件（hidden、submit 等）返回 None
pub fn classify(field: &RawField) -> Option<FieldKind> {
    let tag = field.tag.to_ascii_lowercase();
    let role = field.role.as_deref().map(str::to_ascii_lowercase);
    let input_type = field
        .input_type
        .as_deref()
        .map(str::to_ascii_lowercase)
        .unwrap_or_else(|| "text".to_string());

    match tag.as_str() {
        "textarea" => Some(FieldKind::Textarea),
        "select" => Some(FieldKind::Select),
        "input" => match input_type.as_str() {
            "radio" => Some(FieldKind::RadioGroup),
            "checkbox" => Some(FieldKind::Checkbox),
            "file" => Some(FieldKind::File),
            // 带选项的 combobox 输入按下拉处理；无选项时是联想输入框
            _ if role.as_deref() == Some("combobox") && !field.options.is_empty() => Some(FieldKind::Select),
            t if TEXT_INPUT_TYPES.contains(&t) => Some(FieldKind::Text),
            _ => None,
        },
        _ => match role.as_deref() {
            Some("combobox") | Some("listbox") if !field.options.is_empty() => Some(FieldKind::Select),
            Some("textbox") => Some(FieldKind::Text),
            Some("radio") => Some(FieldKind::RadioGroup),
            Some("checkbox") => Some(FieldKind::Checkbox),
            _ => None,
        },
    }
}

//! 字段解析引擎：扫描当前步骤的字段并逐个填写
//!
//! 规则要点：
//! - 已有值的字段不覆盖（文本非空、下拉已选非占位项、单选组已有选中、复选框已勾选、文件已上传）
//! - 文本类按字符逐个输入；数值输入框的整数答案写成小数形式（`5` → `5.0`）
//! - 下拉依次尝试原生选择、程序化赋值、点击选项，第一个成功即止；无匹配时选第一个非占位项
//! - 单选组无匹配时优先选含 "yes" 的选项，否则选第一个
//! - 复选框只在标签含同意类词语时勾选
//! - 文件上传框一律附加主简历
//!
//! 单个字段失败只记日志，不向上传播。

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use tracing::{debug, warn};

use crate::browser::{DriverError, ElementHandle, Page, RawField, RawOption};
use crate::core::pacing::{Pacing, PauseKind};

use super::classify::{classify, FieldKind};
use super::knowledge::AnswerKnowledgeBase;
use super::label::{extract_label, group_label, option_text};
use super::matcher::{best_option, normalize, OPTION_MATCH_THRESHOLD};

/// 触发勾选的同意类词语
pub const CONSENT_TERMS: &[&str] = &["agree", "certify", "confirm", "acknowledge", "accept", "consent"];

/// 占位选项（归一化后）的前缀
const PLACEHOLDER_PREFIXES: &[&str] = &["select", "choose", "please select", "pick one"];

fn number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"-?\d+(?:\.\d+)?").expect("static regex"))
}

/// 未能从知识库得到答案的字段
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnmatchedField {
    pub label: String,
    pub kind: FieldKind,
}

/// 一次步骤填写的结果
#[derive(Debug, Clone, Default)]
pub struct FillReport {
    /// 实际写入的字段数
    pub applied: usize,
    pub unmatched: Vec<UnmatchedField>,
    /// 本步骤全部可见字段的归一化标签（用于步骤指纹）
    pub labels: BTreeSet<String>,
}

/// 单个字段的处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resolution {
    Applied,
    /// 已有值或无需处理
    Untouched,
    /// 知识库未命中（可能已应用安全默认值）
    Unmatched { defaulted: bool },
}

/// 扫描结果在文档顺序中的条目；单选组在首个成员位置出现
enum Item {
    Single(FieldKind, RawField),
    Radio(String, Vec<RawField>),
}

fn group_items(fields: Vec<RawField>) -> Vec<Item> {
    let mut items: Vec<Item> = Vec::new();
    for field in fields {
        if !field.visible {
            continue;
        }
        let Some(kind) = classify(&field) else {
            continue;
        };
        if kind == FieldKind::RadioGroup {
            let key = field
                .group_key
                .clone()
                .unwrap_or_else(|| field.handle.to_string());
            let existing = items.iter_mut().find_map(|item| match item {
                Item::Radio(k, members) if *k == key => Some(members),
                _ => None,
            });
            match existing {
                Some(members) => members.push(field),
                None => items.push(Item::Radio(key, vec![field])),
            }
        } else {
            items.push(Item::Single(kind, field));
        }
    }
    items
}

/// 选项是否为占位项（空值或「请选择」一类）
pub fn is_placeholder(option: &RawOption) -> bool {
    let text = normalize(&option.text);
    if text.is_empty() || option.value.trim().is_empty() {
        return true;
    }
    PLACEHOLDER_PREFIXES.iter().any(|p| text.starts_with(p))
}

/// 数值输入框：取答案中的第一个数；整数补 `.0`
pub fn coerce_numeric(answer: &str) -> Option<String> {
    let m = number_re().find(answer)?.as_str();
    if m.contains('.') {
        Some(m.to_string())
    } else {
        Some(format!("{m}.0"))
    }
}

/// 标签是否含同意类词语
pub fn is_consent_label(label: &str) -> bool {
    let norm = normalize(label);
    CONSENT_TERMS.iter().any(|t| norm.contains(t))
}

/// 字段解析引擎
pub struct FieldResolver<'a> {
    kb: &'a AnswerKnowledgeBase,
    pacing: &'a dyn Pacing,
    resume_path: Option<&'a Path>,
}

impl<'a> FieldResolver<'a> {
    pub fn new(kb: &'a AnswerKnowledgeBase, pacing: &'a dyn Pacing) -> Self {
        Self {
            kb,
            pacing,
            resume_path: None,
        }
    }

    pub fn with_resume(mut self, path: Option<&'a Path>) -> Self {
        self.resume_path = path;
        self
    }

    /// 填写 scope 内当前可见的全部字段
    pub async fn fill_surface(&self, page: &dyn Page, scope: &str) -> FillReport {
        let mut report = FillReport::default();
        let fields = match page.scan_fields(scope).await {
            Ok(f) => f,
            Err(e) => {
                warn!(scope = %scope, error = %e, "Field scan failed");
                return report;
            }
        };

        for item in group_items(fields) {
            let (label, kind, result) = match item {
                Item::Single(kind, field) => {
                    let label = match kind {
                        FieldKind::Checkbox => option_text(&field)
                            .or_else(|| extract_label(&field.hints).map(|(_, l)| l)),
                        _ => extract_label(&field.hints).map(|(_, l)| l),
                    };
                    let result = if field.enabled {
                        self.fill_single(page, kind, &field, label.as_deref()).await
                    } else {
                        Ok(Resolution::Untouched)
                    };
                    (label, kind, result)
                }
                Item::Radio(key, members) => {
                    let label = group_label(&members);
                    let result = self.fill_radio(page, &members, label.as_deref()).await;
                    debug!(group = %key, ?result, "Radio group processed");
                    (label, FieldKind::RadioGroup, result)
                }
            };

            let normalized = label.as_deref().map(normalize).filter(|l| !l.is_empty());
            if let Some(l) = &normalized {
                report.labels.insert(l.clone());
            }

            match result {
                Ok(Resolution::Applied) => {
                    report.applied += 1;
                    self.pacing.pause(PauseKind::BetweenFields).await;
                }
                Ok(Resolution::Unmatched { defaulted }) => {
                    if defaulted {
                        report.applied += 1;
                    }
                    // 无法解析标签的字段静默跳过，不计入未匹配
                    if let Some(l) = normalized {
                        report.unmatched.push(UnmatchedField { label: l, kind });
                    }
                }
                Ok(Resolution::Untouched) => {}
                Err(e) => {
                    warn!(field_kind = %kind, label = ?label, error = %e, "Field fill failed, skipping");
                }
            }
        }

        report
    }

    async fn fill_single(
        &self,
        page: &dyn Page,
        kind: FieldKind,
        field: &RawField,
        label: Option<&str>,
    ) -> Result<Resolution, DriverError> {
        match kind {
            FieldKind::Text | FieldKind::Textarea => self.fill_text(page, field, label).await,
            FieldKind::Select => self.fill_select(page, field, label).await,
            FieldKind::Checkbox => self.fill_checkbox(page, field, label).await,
            FieldKind::File => self.fill_file(page, field).await,
            FieldKind::RadioGroup => Ok(Resolution::Untouched),
        }
    }

    async fn fill_text(
        &self,
        page: &dyn Page,
        field: &RawField,
        label: Option<&str>,
    ) -> Result<Resolution, DriverError> {
        if field.current_value.as_deref().is_some_and(|v| !v.trim().is_empty()) {
            return Ok(Resolution::Untouched);
        }
        let Some(label) = label else {
            return Ok(Resolution::Untouched);
        };
        let Some(m) = self.kb.lookup(label) else {
            return Ok(Resolution::Unmatched { defaulted: false });
        };
        let value = if field.numeric {
            match coerce_numeric(m.answer) {
                Some(v) => v,
                None => {
                    debug!(label = %label, "Answer is not numeric for a numeric input");
                    return Ok(Resolution::Unmatched { defaulted: false });
                }
            }
        } else {
            m.answer.to_string()
        };
        debug!(label = %label, key = %m.key, kind = ?m.kind, score = m.score, "Typing answer");
        self.type_humanized(page, &field.handle, &value).await?;
        Ok(Resolution::Applied)
    }

    async fn type_humanized(&self, page: &dyn Page, el: &ElementHandle, value: &str) -> Result<(), DriverError> {
        for ch in value.chars() {
            self.pacing.pause(PauseKind::Keystroke).await;
            page.type_char(el, ch).await?;
        }
        Ok(())
    }

    async fn fill_select(
        &self,
        page: &dyn Page,
        field: &RawField,
        label: Option<&str>,
    ) -> Result<Resolution, DriverError> {
        let options = &field.options;
        if options.is_empty() {
            return Ok(Resolution::Untouched);
        }
        if options.iter().any(|o| o.selected && !is_placeholder(o)) {
            return Ok(Resolution::Untouched);
        }

        let eligible = || {
            options
                .iter()
                .enumerate()
                .filter(|(_, o)| !o.disabled && !is_placeholder(o))
                .map(|(i, o)| (i, o.text.as_str()))
        };

        let answer = label.and_then(|l| self.kb.lookup(l));
        let matched = answer
            .as_ref()
            .and_then(|a| best_option(eligible(), a.answer, OPTION_MATCH_THRESHOLD))
            .map(|(i, _)| i);
        let target = match matched.or_else(|| eligible().next().map(|(i, _)| i)) {
            Some(i) => i,
            None => return Ok(Resolution::Untouched),
        };

        let applied = self.apply_select(page, field, target).await;
        if !applied {
            warn!(label = ?label, option = %options[target].text, "No select mechanism succeeded");
        }
        match (matched, applied) {
            (Some(_), true) => Ok(Resolution::Applied),
            (Some(_), false) => Ok(Resolution::Untouched),
            (None, defaulted) => Ok(Resolution::Unmatched { defaulted }),
        }
    }

    /// 依次尝试三种选择机制，第一个生效即返回 true
    async fn apply_select(&self, page: &dyn Page, field: &RawField, index: usize) -> bool {
        let option = &field.options[index];
        let h = &field.handle;

        if field.tag.eq_ignore_ascii_case("select") {
            match page.select_native(h, index).await {
                Ok(true) => return true,
                Ok(false) => {}
                Err(e) => debug!(error = %e, "Native select failed"),
            }
        }
        match page.dispatch_select(h, &option.value).await {
            Ok(true) => return true,
            Ok(false) => {}
            Err(e) => debug!(error = %e, "Dispatched select failed"),
        }
        match page.click_option(h, &option.text).await {
            Ok(true) => true,
            Ok(false) => false,
            Err(e) => {
                debug!(error = %e, "Click option failed");
                false
            }
        }
    }

    async fn fill_radio(
        &self,
        page: &dyn Page,
        members: &[RawField],
        label: Option<&str>,
    ) -> Result<Resolution, DriverError> {
        if members.iter().any(|m| m.checked) {
            return Ok(Resolution::Untouched);
        }
        let usable: Vec<(usize, String)> = members
            .iter()
            .enumerate()
            .filter(|(_, m)| m.enabled)
            .map(|(i, m)| (i, option_text(m).unwrap_or_default()))
            .collect();
        if usable.is_empty() {
            return Ok(Resolution::Untouched);
        }

        let answer = label.and_then(|l| self.kb.lookup(l));
        let matched = answer
            .as_ref()
            .and_then(|a| {
                best_option(
                    usable.iter().map(|(i, t)| (*i, t.as_str())),
                    a.answer,
                    OPTION_MATCH_THRESHOLD,
                )
            })
            .map(|(i, _)| i);

        let target = matched.unwrap_or_else(|| {
            usable
                .iter()
                .find(|(_, t)| normalize(t).split(' ').any(|w| w == "yes"))
                .map(|(i, _)| *i)
                .unwrap_or(usable[0].0)
        });

        page.click(&members[target].handle).await?;
        Ok(match matched {
            Some(_) => Resolution::Applied,
            None => Resolution::Unmatched { defaulted: true },
        })
    }

    async fn fill_checkbox(
        &self,
        page: &dyn Page,
        field: &RawField,
        label: Option<&str>,
    ) -> Result<Resolution, DriverError> {
        if field.checked {
            return Ok(Resolution::Untouched);
        }
        match label {
            Some(l) if is_consent_label(l) => {
                page.click(&field.handle).await?;
                Ok(Resolution::Applied)
            }
            _ => Ok(Resolution::Untouched),
        }
    }

    async fn fill_file(&self, page: &dyn Page, field: &RawField) -> Result<Resolution, DriverError> {
        if field.current_value.as_deref().is_some_and(|v| !v.trim().is_empty()) {
            return Ok(Resolution::Untouched);
        }
        let Some(path) = self.resume_path else {
            warn!("File input present but no resume configured");
            return Ok(Resolution::Untouched);
        };
        if !path.exists() {
            warn!(path = %path.display(), "Resume file missing, leaving upload empty");
            return Ok(Resolution::Untouched);
        }
        page.attach_file(&field.handle, path).await?;
        Ok(Resolution::Applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::{MockField, MockForm, MockPage, MockStep};
    use crate::core::pacing::NoPacing;

    const SCOPE: &str = ".apply-modal";

    fn page_with(fields: Vec<MockField>) -> MockPage {
        MockPage::new("https://jobs.test/apply")
            .with_form(MockForm::new(SCOPE, vec![MockStep::new(fields, vec![])]))
    }

    #[tokio::test]
    async fn test_select_falls_back_to_first_real_option() {
        let kb = AnswerKnowledgeBase::new();
        let resolver = FieldResolver::new(&kb, &NoPacing);
        let page = page_with(vec![MockField::select(
            "s1",
            "Preferred shift",
            &["-- Select --", "Yes", "No"],
        )]);
        let report = resolver.fill_surface(&page, SCOPE).await;
        assert_eq!(page.selected("s1"), Some(1));
        assert_eq!(report.unmatched.len(), 1);
        assert_eq!(report.unmatched[0].kind, FieldKind::Select);
    }

    #[tokio::test]
    async fn test_select_matches_answer_and_falls_through_mechanisms() {
        let kb = AnswerKnowledgeBase::from_pairs([("Do you require visa sponsorship?", "No")]);
        let resolver = FieldResolver::new(&kb, &NoPacing);
        let page = page_with(vec![MockField::combobox(
            "s1",
            "Do you require visa sponsorship",
            &["Select an option", "Yes", "No"],
        )
        .dispatch(false)]);
        let report = resolver.fill_surface(&page, SCOPE).await;
        assert_eq!(page.selected("s1"), Some(2));
        assert_eq!(report.applied, 1);
        assert!(report.unmatched.is_empty());
        let log = page.log();
        assert!(log.iter().any(|l| l.starts_with("dispatch_select:s1")));
        assert!(log.iter().any(|l| l == "click_option:s1:No"));
        assert!(!log.iter().any(|l| l.starts_with("select_native")));
    }

    #[tokio::test]
    async fn test_select_answer_wins_whichever_mechanism_works() {
        let kb = AnswerKnowledgeBase::from_pairs([("Are you willing to relocate?", "Yes")]);
        let resolver = FieldResolver::new(&kb, &NoPacing);
        let options = ["-- Select --", "Yes", "No"];
        let variants = [
            MockField::select("s1", "Are you willing to relocate?", &options),
            MockField::select("s1", "Are you willing to relocate?", &options).native_select(false),
            MockField::select("s1", "Are you willing to relocate?", &options)
                .native_select(false)
                .dispatch(false),
        ];
        for field in variants {
            let page = page_with(vec![field]);
            let report = resolver.fill_surface(&page, SCOPE).await;
            assert_eq!(page.selected("s1"), Some(1));
            assert_eq!(report.applied, 1);
        }
    }

    #[tokio::test]
    async fn test_select_keeps_existing_choice() {
        let kb = AnswerKnowledgeBase::from_pairs([("Country", "Canada")]);
        let resolver = FieldResolver::new(&kb, &NoPacing);
        let page = page_with(vec![
            MockField::select("s1", "Country", &["Select", "United States", "Canada"]).selected(1)
        ]);
        let report = resolver.fill_surface(&page, SCOPE).await;
        assert_eq!(page.selected("s1"), Some(1));
        assert_eq!(report.applied, 0);
    }

    #[tokio::test]
    async fn test_consent_checkbox_only() {
        let kb = AnswerKnowledgeBase::new();
        let resolver = FieldResolver::new(&kb, &NoPacing);
        let page = page_with(vec![
            MockField::checkbox("c1", "I agree to the terms"),
            MockField::checkbox("c2", "Subscribe to newsletter"),
            MockField::checkbox("c3", "I certify that the above is true"),
        ]);
        let report = resolver.fill_surface(&page, SCOPE).await;
        assert!(page.is_checked("c1"));
        assert!(!page.is_checked("c2"));
        assert!(page.is_checked("c3"));
        assert_eq!(report.applied, 2);
        assert!(report.unmatched.is_empty());
    }

    #[tokio::test]
    async fn test_radio_defaults_to_yes() {
        let kb = AnswerKnowledgeBase::new();
        let resolver = FieldResolver::new(&kb, &NoPacing);
        let page = page_with(vec![
            MockField::radio("r1", "commute", "Can you commute to the office?", "No"),
            MockField::radio("r2", "commute", "Can you commute to the office?", "Yes"),
        ]);
        let report = resolver.fill_surface(&page, SCOPE).await;
        assert!(page.is_checked("r2"));
        assert!(!page.is_checked("r1"));
        assert_eq!(report.unmatched.len(), 1);
        assert_eq!(report.unmatched[0].label, "can you commute to the office");
        assert_eq!(report.unmatched[0].kind, FieldKind::RadioGroup);
    }

    #[tokio::test]
    async fn test_radio_matches_answer() {
        let kb = AnswerKnowledgeBase::from_pairs([("Can you commute to the office?", "No")]);
        let resolver = FieldResolver::new(&kb, &NoPacing);
        let page = page_with(vec![
            MockField::radio("r1", "commute", "Can you commute to the office?", "Yes"),
            MockField::radio("r2", "commute", "Can you commute to the office?", "No"),
        ]);
        let report = resolver.fill_surface(&page, SCOPE).await;
        assert!(page.is_checked("r2"));
        assert!(report.unmatched.is_empty());
        // 单选组只贡献一个问题标签
        assert_eq!(report.labels.len(), 1);
    }

    #[tokio::test]
    async fn test_unmatched_text_left_empty() {
        let kb = AnswerKnowledgeBase::from_pairs([("Phone", "555-0100")]);
        let resolver = FieldResolver::new(&kb, &NoPacing);
        let page = page_with(vec![MockField::textarea("t1", "Tell us why you want this role")]);
        let report = resolver.fill_surface(&page, SCOPE).await;
        assert_eq!(page.field_value("t1"), None);
        assert_eq!(report.applied, 0);
        assert_eq!(
            report.unmatched,
            vec![UnmatchedField {
                label: "tell us why you want this role".into(),
                kind: FieldKind::Textarea
            }]
        );
    }

    #[tokio::test]
    async fn test_text_typed_and_prefilled_kept() {
        let kb = AnswerKnowledgeBase::from_pairs([("Phone number", "555-0100"), ("Email", "me@example.com")]);
        let resolver = FieldResolver::new(&kb, &NoPacing);
        let page = page_with(vec![
            MockField::text("t1", "Phone number"),
            MockField::text("t2", "Email").value("prefilled@example.com"),
        ]);
        let report = resolver.fill_surface(&page, SCOPE).await;
        assert_eq!(page.field_value("t1").as_deref(), Some("555-0100"));
        assert_eq!(page.field_value("t2").as_deref(), Some("prefilled@example.com"));
        assert_eq!(report.applied, 1);
        assert_eq!(report.labels.len(), 2);
    }

    #[tokio::test]
    async fn test_numeric_input_gets_decimal_form() {
        let kb = AnswerKnowledgeBase::from_pairs([("Years of experience with Rust", "5 years")]);
        let resolver = FieldResolver::new(&kb, &NoPacing);
        let page = page_with(vec![MockField::text("n1", "Years of experience with Rust").numeric()]);
        resolver.fill_surface(&page, SCOPE).await;
        assert_eq!(page.field_value("n1").as_deref(), Some("5.0"));
    }

    #[tokio::test]
    async fn test_file_input_gets_resume_and_missing_is_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let resume = dir.path().join("resume.pdf");
        std::fs::write(&resume, b"%PDF").unwrap();
        let kb = AnswerKnowledgeBase::new();

        let resolver = FieldResolver::new(&kb, &NoPacing).with_resume(Some(&resume));
        let page = page_with(vec![MockField::file("f1", "Cover letter")]);
        let report = resolver.fill_surface(&page, SCOPE).await;
        assert_eq!(page.field_value("f1"), Some(resume.display().to_string()));
        assert_eq!(report.applied, 1);

        let missing = dir.path().join("nope.pdf");
        let resolver = FieldResolver::new(&kb, &NoPacing).with_resume(Some(&missing));
        let page = page_with(vec![MockField::file("f1", "Resume")]);
        let report = resolver.fill_surface(&page, SCOPE).await;
        assert_eq!(page.field_value("f1"), None);
        assert_eq!(report.applied, 0);
    }

    #[tokio::test]
    async fn test_hidden_fields_ignored() {
        let kb = AnswerKnowledgeBase::from_pairs([("Phone", "1")]);
        let resolver = FieldResolver::new(&kb, &NoPacing);
        let page = page_with(vec![MockField::text("t1", "Phone").hidden()]);
        let report = resolver.fill_surface(&page, SCOPE).await;
        assert_eq!(page.field_value("t1"), None);
        assert!(report.labels.is_empty());
    }

    #[test]
    fn test_coerce_numeric() {
        assert_eq!(coerce_numeric("5").as_deref(), Some("5.0"));
        assert_eq!(coerce_numeric("about 3.5 years").as_deref(), Some("3.5"));
        assert_eq!(coerce_numeric("none"), None);
    }

    #[test]
    fn test_placeholder_detection() {
        let opt = |text: &str, value: &str| RawOption {
            text: text.into(),
            value: value.into(),
            ..Default::default()
        };
        assert!(is_placeholder(&opt("-- Select --", "x")));
        assert!(is_placeholder(&opt("Yes", "")));
        assert!(is_placeholder(&opt("Please select", "0")));
        assert!(!is_placeholder(&opt("Yes", "yes")));
    }
}

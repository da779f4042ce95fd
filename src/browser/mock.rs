//! Mock 页面（用于测试，无需浏览器）
//!
//! 脚本化的内存页面：按选择器登记元素、按步骤登记表单，点击元素时执行预设的 [`Effect`]。
//! 支持失败注入（点击失败 N 次、导航失败 N 次）与下拉选择机制逐一失效，便于覆盖引擎的降级路径。

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{DriverError, ElementHandle, ElementInfo, FrameInfo, LabelHints, Page, RawField, RawOption};

/// 点击 / 导航 / 滚动触发的脚本动作
#[derive(Debug, Clone)]
pub enum Effect {
    /// 替换某选择器下的元素
    SetElements(String, Vec<MockElement>),
    /// 在某选择器下追加元素（加载更多 / 滚动加载）
    AppendElements(String, Vec<MockElement>),
    RemoveElements(String),
    /// 打开表单弹窗
    OpenForm(MockForm),
    /// 表单跳到第 n 步
    GotoStep(usize),
    /// 真正提交（计数并关闭表单）
    Submit,
    CloseForm,
    SetBodyText(String),
    AddFrame(FrameInfo),
}

/// 通用元素：列表卡片、按钮、提示条等
#[derive(Debug, Clone, Default)]
pub struct MockElement {
    pub info: ElementInfo,
    pub on_click: Vec<Effect>,
    /// 前 N 次点击返回错误
    pub fail_clicks: u32,
}

impl MockElement {
    pub fn new(handle: &str, tag: &str) -> Self {
        Self {
            info: ElementInfo {
                handle: ElementHandle::new(handle),
                tag: tag.to_string(),
                text: String::new(),
                attrs: HashMap::new(),
                visible: true,
                enabled: true,
            },
            on_click: Vec::new(),
            fail_clicks: 0,
        }
    }

    pub fn button(handle: &str, text: &str) -> Self {
        Self::new(handle, "button").text(text)
    }

    pub fn text(mut self, text: &str) -> Self {
        self.info.text = text.to_string();
        self
    }

    pub fn attr(mut self, name: &str, value: &str) -> Self {
        self.info.attrs.insert(name.to_string(), value.to_string());
        self
    }

    pub fn hidden(mut self) -> Self {
        self.info.visible = false;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.info.enabled = false;
        self
    }

    pub fn on_click(mut self, effects: Vec<Effect>) -> Self {
        self.on_click = effects;
        self
    }

    pub fn fail_clicks(mut self, n: u32) -> Self {
        self.fail_clicks = n;
        self
    }
}

/// 表单字段：原始快照 + 下拉机制开关
#[derive(Debug, Clone)]
pub struct MockField {
    pub raw: RawField,
    pub native_select_ok: bool,
    pub dispatch_ok: bool,
    pub click_option_ok: bool,
}

impl MockField {
    fn base(handle: &str, tag: &str, input_type: Option<&str>) -> Self {
        Self {
            raw: RawField {
                handle: ElementHandle::new(handle),
                tag: tag.to_string(),
                input_type: input_type.map(|s| s.to_string()),
                visible: true,
                enabled: true,
                ..Default::default()
            },
            native_select_ok: true,
            dispatch_ok: true,
            click_option_ok: true,
        }
    }

    pub fn text(handle: &str, label: &str) -> Self {
        Self::base(handle, "input", Some("text")).label(label)
    }

    pub fn textarea(handle: &str, label: &str) -> Self {
        Self::base(handle, "textarea", None).label(label)
    }

    pub fn select(handle: &str, label: &str, options: &[&str]) -> Self {
        let mut f = Self::base(handle, "select", None).label(label);
        f.raw.options = options
            .iter()
            .map(|o| RawOption {
                text: o.to_string(),
                value: o.to_lowercase(),
                selected: false,
                disabled: false,
            })
            .collect();
        f
    }

    /// 自定义下拉（role=combobox），无原生 select
    pub fn combobox(handle: &str, label: &str, options: &[&str]) -> Self {
        let mut f = Self::select(handle, label, options);
        f.raw.tag = "div".into();
        f.raw.role = Some("combobox".into());
        f.native_select_ok = false;
        f
    }

    pub fn radio(handle: &str, group: &str, question: &str, option_label: &str) -> Self {
        let mut f = Self::base(handle, "input", Some("radio"));
        f.raw.group_key = Some(group.to_string());
        f.raw.hints.legend = Some(question.to_string());
        f.raw.hints.bound_label = Some(option_label.to_string());
        f.raw.option_label = Some(option_label.to_string());
        f
    }

    pub fn checkbox(handle: &str, label: &str) -> Self {
        let mut f = Self::base(handle, "input", Some("checkbox")).label(label);
        f.raw.option_label = Some(label.to_string());
        f
    }

    pub fn file(handle: &str, label: &str) -> Self {
        Self::base(handle, "input", Some("file")).label(label)
    }

    pub fn label(mut self, label: &str) -> Self {
        self.raw.hints.bound_label = Some(label.to_string());
        self
    }

    pub fn hints(mut self, hints: LabelHints) -> Self {
        self.raw.hints = hints;
        self
    }

    pub fn value(mut self, value: &str) -> Self {
        self.raw.current_value = Some(value.to_string());
        self
    }

    pub fn checked(mut self) -> Self {
        self.raw.checked = true;
        self
    }

    pub fn numeric(mut self) -> Self {
        self.raw.numeric = true;
        self
    }

    pub fn hidden(mut self) -> Self {
        self.raw.visible = false;
        self
    }

    pub fn selected(mut self, index: usize) -> Self {
        for (i, o) in self.raw.options.iter_mut().enumerate() {
            o.selected = i == index;
        }
        self
    }

    pub fn native_select(mut self, ok: bool) -> Self {
        self.native_select_ok = ok;
        self
    }

    pub fn dispatch(mut self, ok: bool) -> Self {
        self.dispatch_ok = ok;
        self
    }

    pub fn click_option(mut self, ok: bool) -> Self {
        self.click_option_ok = ok;
        self
    }

    fn select_index(&mut self, index: usize) {
        for (i, o) in self.raw.options.iter_mut().enumerate() {
            o.selected = i == index;
        }
        self.raw.current_value = self.raw.options.get(index).map(|o| o.value.clone());
    }
}

/// 表单中的一步：字段 + 按钮
#[derive(Debug, Clone, Default)]
pub struct MockStep {
    pub fields: Vec<MockField>,
    pub buttons: Vec<MockElement>,
}

impl MockStep {
    pub fn new(fields: Vec<MockField>, buttons: Vec<MockElement>) -> Self {
        Self { fields, buttons }
    }
}

/// 多步表单弹窗
#[derive(Debug, Clone, Default)]
pub struct MockForm {
    pub scope: String,
    pub steps: Vec<MockStep>,
    pub current: usize,
}

impl MockForm {
    pub fn new(scope: &str, steps: Vec<MockStep>) -> Self {
        Self {
            scope: scope.to_string(),
            steps,
            current: 0,
        }
    }
}

#[derive(Debug, Default)]
struct MockState {
    url: String,
    elements: HashMap<String, Vec<MockElement>>,
    frames: Vec<FrameInfo>,
    body_text: String,
    form: Option<MockForm>,
    closed_forms: Vec<MockForm>,
    on_goto: Vec<(String, Vec<Effect>)>,
    goto_failures: HashMap<String, u32>,
    on_scroll: Vec<Vec<Effect>>,
    scroll_pos: usize,
    /// 导航到以该 URL 开头的地址时恢复的列表快照
    reload_snapshot: Option<(String, Vec<(String, Vec<MockElement>)>)>,
    submissions: usize,
    rendered_steps: Vec<usize>,
    log: Vec<String>,
    screenshots: Vec<PathBuf>,
    closed: bool,
}

impl MockState {
    fn apply(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::SetElements(sel, els) => {
                    self.elements.insert(sel, els);
                }
                Effect::AppendElements(sel, els) => {
                    self.elements.entry(sel).or_default().extend(els);
                }
                Effect::RemoveElements(sel) => {
                    self.elements.remove(&sel);
                }
                Effect::OpenForm(form) => {
                    self.rendered_steps.push(form.current);
                    self.form = Some(form);
                }
                Effect::GotoStep(n) => {
                    if let Some(form) = self.form.as_mut() {
                        form.current = n.min(form.steps.len().saturating_sub(1));
                        self.rendered_steps.push(form.current);
                    }
                }
                Effect::Submit => {
                    self.submissions += 1;
                    self.log.push("submit".into());
                    if let Some(form) = self.form.take() {
                        self.closed_forms.push(form);
                    }
                }
                Effect::CloseForm => {
                    if let Some(form) = self.form.take() {
                        self.closed_forms.push(form);
                    }
                }
                Effect::SetBodyText(text) => self.body_text = text,
                Effect::AddFrame(frame) => self.frames.push(frame),
            }
        }
    }

    fn field_mut(&mut self, handle: &ElementHandle) -> Option<&mut MockField> {
        let form = self.form.as_mut()?;
        let step = form.steps.get_mut(form.current)?;
        step.fields.iter_mut().find(|f| &f.raw.handle == handle)
    }

    fn find_field(&self, handle: &ElementHandle) -> Option<&MockField> {
        self.form
            .iter()
            .chain(self.closed_forms.iter().rev())
            .flat_map(|f| f.steps.iter())
            .flat_map(|s| s.fields.iter())
            .find(|f| &f.raw.handle == handle)
    }

    fn take_click_effects(&mut self, handle: &ElementHandle) -> Result<Option<Vec<Effect>>, DriverError> {
        for els in self.elements.values_mut() {
            if let Some(el) = els.iter_mut().find(|e| &e.info.handle == handle) {
                return click_element(el).map(Some);
            }
        }
        if let Some(form) = self.form.as_mut() {
            if let Some(step) = form.steps.get_mut(form.current) {
                if let Some(b) = step.buttons.iter_mut().find(|b| &b.info.handle == handle) {
                    return click_element(b).map(Some);
                }
            }
        }
        Ok(None)
    }
}

fn click_element(el: &mut MockElement) -> Result<Vec<Effect>, DriverError> {
    if el.fail_clicks > 0 {
        el.fail_clicks -= 1;
        return Err(DriverError::ElementGone(el.info.handle.to_string()));
    }
    Ok(el.on_click.clone())
}

/// 脚本化内存页面
#[derive(Debug, Default)]
pub struct MockPage {
    state: Mutex<MockState>,
}

impl MockPage {
    pub fn new(url: &str) -> Self {
        let page = Self::default();
        page.lock().url = url.to_string();
        page
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        // 测试替身：锁中毒时继续使用内部数据
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn with_elements(self, selector: &str, elements: Vec<MockElement>) -> Self {
        self.lock().elements.insert(selector.to_string(), elements);
        self
    }

    pub fn with_frame(self, frame: FrameInfo) -> Self {
        self.lock().frames.push(frame);
        self
    }

    pub fn with_body_text(self, text: &str) -> Self {
        self.lock().body_text = text.to_string();
        self
    }

    pub fn with_form(self, form: MockForm) -> Self {
        self.lock().apply(vec![Effect::OpenForm(form)]);
        self
    }

    /// 导航到以 prefix 开头的 URL 时执行 effects
    pub fn on_goto(self, prefix: &str, effects: Vec<Effect>) -> Self {
        self.lock().on_goto.push((prefix.to_string(), effects));
        self
    }

    /// 导航到以 prefix 开头的 URL 时前 n 次失败
    pub fn fail_goto(self, prefix: &str, n: u32) -> Self {
        self.lock().goto_failures.insert(prefix.to_string(), n);
        self
    }

    /// 依次为每次滚动登记 effects
    pub fn on_scroll(self, effects: Vec<Effect>) -> Self {
        self.lock().on_scroll.push(effects);
        self
    }

    /// 像真实列表页一样重新加载：再次导航到当前 URL 时，
    /// 这些 selector 恢复为此刻的元素，滚动脚本从头开始
    pub fn resets_on_reload(self, selectors: &[&str]) -> Self {
        {
            let mut st = self.lock();
            let saved = selectors
                .iter()
                .map(|sel| (sel.to_string(), st.elements.get(*sel).cloned().unwrap_or_default()))
                .collect();
            let base = st.url.clone();
            st.reload_snapshot = Some((base, saved));
        }
        self
    }

    pub fn submissions(&self) -> usize {
        self.lock().submissions
    }

    pub fn is_form_open(&self) -> bool {
        self.lock().form.is_some()
    }

    /// 每次渲染的步骤下标（含重复）
    pub fn rendered_steps(&self) -> Vec<usize> {
        self.lock().rendered_steps.clone()
    }

    pub fn field_value(&self, handle: &str) -> Option<String> {
        let st = self.lock();
        st.find_field(&ElementHandle::new(handle))
            .and_then(|f| f.raw.current_value.clone())
    }

    pub fn is_checked(&self, handle: &str) -> bool {
        let st = self.lock();
        st.find_field(&ElementHandle::new(handle))
            .map(|f| f.raw.checked)
            .unwrap_or(false)
    }

    pub fn selected(&self, handle: &str) -> Option<usize> {
        let st = self.lock();
        st.find_field(&ElementHandle::new(handle))
            .and_then(|f| f.raw.options.iter().position(|o| o.selected))
    }

    pub fn log(&self) -> Vec<String> {
        self.lock().log.clone()
    }

    pub fn screenshots(&self) -> Vec<PathBuf> {
        self.lock().screenshots.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn url(&self) -> String {
        self.lock().url.clone()
    }
}

#[async_trait]
impl Page for MockPage {
    async fn goto(&self, url: &str) -> Result<(), DriverError> {
        let mut st = self.lock();
        st.log.push(format!("goto:{url}"));
        let failing = st
            .goto_failures
            .iter_mut()
            .find(|(prefix, n)| url.starts_with(prefix.as_str()) && **n > 0);
        if let Some((_, n)) = failing {
            *n -= 1;
            return Err(DriverError::Navigation(url.to_string()));
        }
        st.url = url.to_string();
        let restore = st
            .reload_snapshot
            .as_ref()
            .filter(|(base, _)| url.starts_with(base.as_str()))
            .map(|(_, saved)| saved.clone());
        if let Some(saved) = restore {
            st.elements.extend(saved);
            st.scroll_pos = 0;
        }
        let effects: Vec<Effect> = st
            .on_goto
            .iter()
            .filter(|(prefix, _)| url.starts_with(prefix.as_str()))
            .flat_map(|(_, e)| e.clone())
            .collect();
        st.apply(effects);
        Ok(())
    }

    async fn current_url(&self) -> Result<String, DriverError> {
        Ok(self.lock().url.clone())
    }

    async fn wait_for(&self, selector: &str, _timeout: Duration) -> Result<bool, DriverError> {
        let st = self.lock();
        if st.form.as_ref().is_some_and(|f| f.scope == selector) {
            return Ok(true);
        }
        Ok(st
            .elements
            .get(selector)
            .is_some_and(|els| els.iter().any(|e| e.info.visible)))
    }

    async fn find_elements(&self, selector: &str) -> Result<Vec<ElementInfo>, DriverError> {
        let st = self.lock();
        Ok(st
            .elements
            .get(selector)
            .map(|els| els.iter().map(|e| e.info.clone()).collect())
            .unwrap_or_default())
    }

    async fn scan_fields(&self, scope: &str) -> Result<Vec<RawField>, DriverError> {
        let st = self.lock();
        let Some(form) = st.form.as_ref().filter(|f| f.scope == scope) else {
            return Ok(Vec::new());
        };
        Ok(form
            .steps
            .get(form.current)
            .map(|s| s.fields.iter().map(|f| f.raw.clone()).collect())
            .unwrap_or_default())
    }

    async fn find_buttons(&self, scope: &str) -> Result<Vec<ElementInfo>, DriverError> {
        let st = self.lock();
        let Some(form) = st.form.as_ref().filter(|f| f.scope == scope) else {
            return Ok(Vec::new());
        };
        Ok(form
            .steps
            .get(form.current)
            .map(|s| s.buttons.iter().map(|b| b.info.clone()).collect())
            .unwrap_or_default())
    }

    async fn click(&self, el: &ElementHandle) -> Result<(), DriverError> {
        let mut st = self.lock();
        st.log.push(format!("click:{el}"));
        if let Some(effects) = st.take_click_effects(el)? {
            st.apply(effects);
            return Ok(());
        }
        let (input_type, group) = match st.field_mut(el) {
            Some(f) => (f.raw.input_type.clone(), f.raw.group_key.clone()),
            None => return Err(DriverError::ElementGone(el.to_string())),
        };
        match input_type.as_deref() {
            Some("checkbox") => {
                if let Some(f) = st.field_mut(el) {
                    f.raw.checked = !f.raw.checked;
                }
            }
            Some("radio") => {
                if let Some(form) = st.form.as_mut() {
                    if let Some(step) = form.steps.get_mut(form.current) {
                        for f in step.fields.iter_mut() {
                            if f.raw.group_key == group && f.raw.input_type.as_deref() == Some("radio") {
                                f.raw.checked = &f.raw.handle == el;
                            }
                        }
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    async fn type_char(&self, el: &ElementHandle, ch: char) -> Result<(), DriverError> {
        let mut st = self.lock();
        let field = st
            .field_mut(el)
            .ok_or_else(|| DriverError::ElementGone(el.to_string()))?;
        field.raw.current_value.get_or_insert_with(String::new).push(ch);
        Ok(())
    }

    async fn select_native(&self, el: &ElementHandle, index: usize) -> Result<bool, DriverError> {
        let mut st = self.lock();
        st.log.push(format!("select_native:{el}:{index}"));
        let field = st
            .field_mut(el)
            .ok_or_else(|| DriverError::ElementGone(el.to_string()))?;
        if !field.native_select_ok || field.raw.tag != "select" || index >= field.raw.options.len() {
            return Ok(false);
        }
        field.select_index(index);
        Ok(true)
    }

    async fn dispatch_select(&self, el: &ElementHandle, value: &str) -> Result<bool, DriverError> {
        let mut st = self.lock();
        st.log.push(format!("dispatch_select:{el}:{value}"));
        let field = st
            .field_mut(el)
            .ok_or_else(|| DriverError::ElementGone(el.to_string()))?;
        if !field.dispatch_ok {
            return Ok(false);
        }
        match field.raw.options.iter().position(|o| o.value == value) {
            Some(i) => {
                field.select_index(i);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn click_option(&self, el: &ElementHandle, option_text: &str) -> Result<bool, DriverError> {
        let mut st = self.lock();
        st.log.push(format!("click_option:{el}:{option_text}"));
        let field = st
            .field_mut(el)
            .ok_or_else(|| DriverError::ElementGone(el.to_string()))?;
        if !field.click_option_ok {
            return Ok(false);
        }
        match field.raw.options.iter().position(|o| o.text.trim() == option_text.trim()) {
            Some(i) => {
                field.select_index(i);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn attach_file(&self, el: &ElementHandle, path: &Path) -> Result<(), DriverError> {
        let mut st = self.lock();
        let field = st
            .field_mut(el)
            .ok_or_else(|| DriverError::ElementGone(el.to_string()))?;
        field.raw.current_value = Some(path.display().to_string());
        Ok(())
    }

    async fn frames(&self) -> Result<Vec<FrameInfo>, DriverError> {
        Ok(self.lock().frames.clone())
    }

    async fn body_text(&self) -> Result<String, DriverError> {
        Ok(self.lock().body_text.clone())
    }

    async fn scroll_to_bottom(&self) -> Result<(), DriverError> {
        let mut st = self.lock();
        st.log.push("scroll".into());
        if let Some(effects) = st.on_scroll.get(st.scroll_pos).cloned() {
            st.scroll_pos += 1;
            st.apply(effects);
        }
        Ok(())
    }

    async fn press_escape(&self) -> Result<(), DriverError> {
        let mut st = self.lock();
        st.log.push("escape".into());
        Ok(())
    }

    async fn screenshot(&self, path: &Path) -> Result<(), DriverError> {
        self.lock().screenshots.push(path.to_path_buf());
        Ok(())
    }

    async fn close(&self) -> Result<(), DriverError> {
        self.lock().closed = true;
        Ok(())
    }
}

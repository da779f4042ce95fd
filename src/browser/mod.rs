//! 浏览器驱动接缝
//!
//! 核心引擎只通过 [`Page`] trait 与浏览器交互：导航、按选择器查询元素、扫描表单字段、
//! 逐字符输入、三种下拉选择机制、文件上传、截图。具体实现：
//! - **mock**: 脚本化内存页面（测试与离线演练）
//! - **chrome**: Headless Chrome（需启用 feature "browser"）

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod mock;
pub mod session;

#[cfg(feature = "browser")]
pub mod chrome;

pub use mock::{Effect, MockElement, MockField, MockForm, MockPage, MockStep};
pub use session::{SessionProvider, SessionState, StaticSessionProvider};

#[cfg(feature = "browser")]
pub use chrome::{ChromePage, ChromeSessionProvider};

/// 驱动层错误：超时、导航失败、元素失效、脚本错误
#[derive(Error, Debug, Clone)]
pub enum DriverError {
    #[error("Timeout waiting for {0}")]
    Timeout(String),

    #[error("Navigation failed: {0}")]
    Navigation(String),

    /// 元素句柄已失效（打开详情/弹窗后 DOM 重建）
    #[error("Element gone: {0}")]
    ElementGone(String),

    #[error("Script error: {0}")]
    Script(String),

    #[error("IO error: {0}")]
    Io(String),
}

/// 元素句柄：驱动分配的不透明 ID，仅在当前 DOM 快照内有效
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ElementHandle(pub String);

impl ElementHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ElementHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// 通用元素快照（列表卡片、按钮、验证控件等）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ElementInfo {
    pub handle: ElementHandle,
    pub tag: String,
    pub text: String,
    #[serde(default)]
    pub attrs: HashMap<String, String>,
    pub visible: bool,
    pub enabled: bool,
}

impl ElementInfo {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(|s| s.as_str())
    }
}

/// iframe 快照（用于挑战检测）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FrameInfo {
    pub src: String,
    pub title: String,
    pub visible: bool,
    pub width: f64,
    pub height: f64,
}

/// 下拉选项
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawOption {
    pub text: String,
    pub value: String,
    #[serde(default)]
    pub selected: bool,
    #[serde(default)]
    pub disabled: bool,
}

/// 标签线索：驱动按 DOM 原样采集，由字段引擎按优先级挑选
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LabelHints {
    /// `<label for=...>` 或包裹式 label
    pub bound_label: Option<String>,
    /// aria-label / 计算后的可访问名称
    pub accessible_name: Option<String>,
    /// aria-labelledby 目标文本
    pub labelled_by: Option<String>,
    pub placeholder: Option<String>,
    pub name_attr: Option<String>,
    /// 祖先节点文本，下标 0 为父节点
    #[serde(default)]
    pub ancestor_texts: Vec<String>,
    /// 最近 fieldset 的 legend
    pub legend: Option<String>,
    /// 启发式问题容器文本（单选组）
    pub question_text: Option<String>,
}

/// 表单字段原始快照
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawField {
    pub handle: ElementHandle,
    /// input / textarea / select / div 等
    pub tag: String,
    /// input 的 type 属性
    pub input_type: Option<String>,
    /// role 属性（自定义下拉：combobox / listbox）
    pub role: Option<String>,
    /// 单选组分组键（通常为 name）
    pub group_key: Option<String>,
    pub hints: LabelHints,
    /// 单选/复选项自身的文本
    pub option_label: Option<String>,
    pub current_value: Option<String>,
    pub visible: bool,
    pub enabled: bool,
    pub checked: bool,
    /// 数值约束（type=number、inputmode=numeric 等）
    pub numeric: bool,
    #[serde(default)]
    pub options: Vec<RawOption>,
}

/// 驱动接口：核心引擎唯一依赖的浏览器能力集合
///
/// 所有方法都是挂起点；实现方负责自身超时，调用方按 `timeout` 参数控制等待上限。
#[async_trait]
pub trait Page: Send + Sync {
    async fn goto(&self, url: &str) -> Result<(), DriverError>;

    async fn current_url(&self) -> Result<String, DriverError>;

    /// 等待选择器出现；超时返回 Ok(false) 而非错误
    async fn wait_for(&self, selector: &str, timeout: Duration) -> Result<bool, DriverError>;

    /// 每次调用都重新解析，返回新句柄
    async fn find_elements(&self, selector: &str) -> Result<Vec<ElementInfo>, DriverError>;

    /// 扫描 scope 内所有可交互字段
    async fn scan_fields(&self, scope: &str) -> Result<Vec<RawField>, DriverError>;

    /// 扫描 scope 内按钮（button / input[type=submit] / [role=button]）
    async fn find_buttons(&self, scope: &str) -> Result<Vec<ElementInfo>, DriverError>;

    async fn click(&self, el: &ElementHandle) -> Result<(), DriverError>;

    /// 发送单个字符按键事件（已聚焦元素）
    async fn type_char(&self, el: &ElementHandle, ch: char) -> Result<(), DriverError>;

    /// 原生 `<select>` 选中第 index 项；返回是否生效
    async fn select_native(&self, el: &ElementHandle, index: usize) -> Result<bool, DriverError>;

    /// 程序化设置 value 并派发 change 事件；返回是否生效
    async fn dispatch_select(&self, el: &ElementHandle, value: &str) -> Result<bool, DriverError>;

    /// 点击展开自定义下拉，再点击文本匹配的选项；返回是否生效
    async fn click_option(&self, el: &ElementHandle, option_text: &str) -> Result<bool, DriverError>;

    async fn attach_file(&self, el: &ElementHandle, path: &Path) -> Result<(), DriverError>;

    async fn frames(&self) -> Result<Vec<FrameInfo>, DriverError>;

    async fn body_text(&self) -> Result<String, DriverError>;

    async fn scroll_to_bottom(&self) -> Result<(), DriverError>;

    async fn press_escape(&self) -> Result<(), DriverError>;

    async fn screenshot(&self, path: &Path) -> Result<(), DriverError>;

    /// 释放会话资源；多次调用无副作用
    async fn close(&self) -> Result<(), DriverError>;
}

/// 按钮文本（含 aria-label）是否命中任一关键字，大小写无关
pub fn button_matches(button: &ElementInfo, labels: &[&str]) -> bool {
    let text = button.text.trim().to_lowercase();
    let aria = button.attr("aria-label").unwrap_or("").to_lowercase();
    labels.iter().any(|l| {
        let l = l.to_lowercase();
        text == l || text.starts_with(&l) || aria.starts_with(&l)
    })
}

//! Headless Chrome 驱动（需启用 feature "browser" 且系统已安装 Chrome/Chromium）
//!
//! headless_chrome 是同步 API，所有调用都放进 `spawn_blocking`。
//! 元素句柄由页面内脚本分配：首次扫描到的元素打上 `data-aa-id` 属性，之后用
//! `[data-aa-id="..."]` 重新定位；DOM 重建后旧句柄自然失效（`ElementGone`）。

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use headless_chrome::protocol::cdp::Page::CaptureScreenshotFormatOption;
use headless_chrome::{Browser, LaunchOptions, Tab};
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::{
    DriverError, ElementHandle, ElementInfo, FrameInfo, Page, RawField, SessionProvider,
    SessionState,
};
use crate::config::BrowserSection;

/// 页面内公共脚本：句柄分配、可见性、文本与属性采集
const PRELUDE: &str = r#"
const aaTag = (el) => {
  if (!el.dataset.aaId) {
    window.__aaSeq = (window.__aaSeq || 0) + 1;
    el.dataset.aaId = 'aa-' + window.__aaSeq;
  }
  return el.dataset.aaId;
};
const aaVisible = (el) => {
  const r = el.getBoundingClientRect();
  const s = getComputedStyle(el);
  return r.width > 0 && r.height > 0 && s.visibility !== 'hidden' && s.display !== 'none';
};
const aaText = (el) => (el ? (el.innerText || el.textContent || '').trim() : '');
const aaAttrs = (el) => {
  const o = {};
  for (const a of el.attributes) o[a.name] = a.value;
  return o;
};
const aaEnabled = (el) => !el.disabled && el.getAttribute('aria-disabled') !== 'true';
const aaInfo = (el) => ({
  handle: aaTag(el),
  tag: el.tagName.toLowerCase(),
  text: aaText(el).slice(0, 500),
  attrs: aaAttrs(el),
  visible: aaVisible(el),
  enabled: aaEnabled(el),
});
const aaFind = (id) => document.querySelector('[data-aa-id="' + id + '"]');
const aaListbox = (el) => {
  const id = el.getAttribute('aria-controls') || el.getAttribute('aria-owns');
  return id ? document.getElementById(id) : null;
};
"#;

/// 字段扫描：标签线索按 DOM 原样采集，优先级交给字段引擎
const SCAN_FIELDS: &str = r#"
const root = document.querySelector(SCOPE);
if (!root) return '[]';
const out = [];
const els = root.querySelectorAll('input, textarea, select, [role="combobox"], [role="listbox"]');
for (const el of els) {
  const tag = el.tagName.toLowerCase();
  const type = tag === 'input' ? (el.getAttribute('type') || 'text').toLowerCase() : null;
  if (type === 'hidden' || type === 'submit' || type === 'button') continue;
  const bound = el.labels && el.labels.length ? aaText(el.labels[0]) : null;
  const lb = el.getAttribute('aria-labelledby');
  const labelledBy = lb
    ? lb.split(/\s+/).map((id) => aaText(document.getElementById(id))).join(' ').trim() || null
    : null;
  const ancestors = [];
  let p = el.parentElement;
  for (let i = 0; i < 4 && p; i++, p = p.parentElement) ancestors.push(aaText(p).slice(0, 300));
  const fs = el.closest('fieldset');
  const legendEl = fs ? fs.querySelector('legend') : null;
  const group = el.closest('[role="radiogroup"]');
  let options = [];
  if (tag === 'select') {
    options = Array.from(el.options).map((o) => ({
      text: o.text.trim(), value: o.value, selected: o.selected, disabled: o.disabled,
    }));
  } else if (el.getAttribute('role') === 'combobox' || el.getAttribute('role') === 'listbox') {
    const lbox = el.getAttribute('role') === 'listbox' ? el : aaListbox(el);
    if (lbox) {
      options = Array.from(lbox.querySelectorAll('[role="option"]')).map((o) => ({
        text: aaText(o), value: o.getAttribute('data-value') || aaText(o),
        selected: o.getAttribute('aria-selected') === 'true',
        disabled: o.getAttribute('aria-disabled') === 'true',
      }));
    }
  }
  const mode = (el.getAttribute('inputmode') || '').toLowerCase();
  const checkable = type === 'radio' || type === 'checkbox';
  out.push({
    handle: aaTag(el),
    tag: tag,
    input_type: type,
    role: el.getAttribute('role'),
    group_key: type === 'radio' ? (el.getAttribute('name') || null) : null,
    hints: {
      bound_label: bound,
      accessible_name: el.getAttribute('aria-label'),
      labelled_by: labelledBy,
      placeholder: el.getAttribute('placeholder'),
      name_attr: el.getAttribute('name'),
      ancestor_texts: ancestors,
      legend: legendEl ? aaText(legendEl) : null,
      question_text: group ? (group.getAttribute('aria-label') || null) : null,
    },
    option_label: checkable ? bound : null,
    current_value: checkable || tag === 'select' || type === 'file' ? null : (el.value || null),
    visible: aaVisible(el),
    enabled: aaEnabled(el),
    checked: checkable ? el.checked : false,
    numeric: type === 'number' || mode === 'numeric' || mode === 'decimal',
    options: options,
  });
}
return JSON.stringify(out);
"#;

/// 包装成立即执行函数，参数以 JSON 字面量注入
fn script(params: &[(&str, &str)], body: &str) -> String {
    let mut decls = String::new();
    for (name, value) in params {
        let literal = serde_json::to_string(value).unwrap_or_else(|_| "\"\"".into());
        decls.push_str(&format!("const {} = {};\n", name, literal));
    }
    format!("(function() {{\n{}\n{}\n{}\n}})()", PRELUDE, decls, body)
}

fn script_err(e: impl std::fmt::Display) -> DriverError {
    DriverError::Script(e.to_string())
}

fn eval_value(tab: &Tab, js: &str) -> Result<Value, DriverError> {
    let result = tab.evaluate(js, false).map_err(script_err)?;
    Ok(result.value.unwrap_or(Value::Null))
}

fn eval_bool(tab: &Tab, js: &str) -> Result<bool, DriverError> {
    Ok(eval_value(tab, js)?.as_bool().unwrap_or(false))
}

/// 脚本返回 JSON 字符串，再反序列化为目标类型
fn eval_json<T: DeserializeOwned>(tab: &Tab, js: &str) -> Result<T, DriverError> {
    let value = eval_value(tab, js)?;
    let raw = value.as_str().unwrap_or("[]");
    serde_json::from_str(raw).map_err(script_err)
}

fn handle_selector(el: &ElementHandle) -> String {
    format!("[data-aa-id=\"{}\"]", el.as_str())
}

/// 单个标签页上的 [`Page`] 实现
pub struct ChromePage {
    tab: Arc<Tab>,
    closed: AtomicBool,
}

impl ChromePage {
    pub fn new(tab: Arc<Tab>) -> Self {
        Self {
            tab,
            closed: AtomicBool::new(false),
        }
    }

    async fn with_tab<T, F>(&self, f: F) -> Result<T, DriverError>
    where
        T: Send + 'static,
        F: FnOnce(&Tab) -> Result<T, DriverError> + Send + 'static,
    {
        let tab = Arc::clone(&self.tab);
        tokio::task::spawn_blocking(move || f(&tab))
            .await
            .map_err(|e| DriverError::Script(format!("Task join: {}", e)))?
    }
}

#[async_trait]
impl Page for ChromePage {
    async fn goto(&self, url: &str) -> Result<(), DriverError> {
        let url = url.to_string();
        self.with_tab(move |tab| {
            tab.navigate_to(&url)
                .and_then(|t| t.wait_until_navigated())
                .map_err(|e| DriverError::Navigation(format!("{}: {}", url, e)))?;
            Ok(())
        })
        .await
    }

    async fn current_url(&self) -> Result<String, DriverError> {
        self.with_tab(|tab| Ok(tab.get_url())).await
    }

    async fn wait_for(&self, selector: &str, timeout: Duration) -> Result<bool, DriverError> {
        let selector = selector.to_string();
        self.with_tab(move |tab| {
            Ok(tab
                .wait_for_element_with_custom_timeout(&selector, timeout)
                .is_ok())
        })
        .await
    }

    async fn find_elements(&self, selector: &str) -> Result<Vec<ElementInfo>, DriverError> {
        let js = script(
            &[("SELECTOR", selector)],
            "return JSON.stringify(Array.from(document.querySelectorAll(SELECTOR)).map(aaInfo));",
        );
        self.with_tab(move |tab| eval_json(tab, &js)).await
    }

    async fn scan_fields(&self, scope: &str) -> Result<Vec<RawField>, DriverError> {
        let js = script(&[("SCOPE", scope)], SCAN_FIELDS);
        self.with_tab(move |tab| eval_json(tab, &js)).await
    }

    async fn find_buttons(&self, scope: &str) -> Result<Vec<ElementInfo>, DriverError> {
        let js = script(
            &[("SCOPE", scope)],
            r#"
            const root = document.querySelector(SCOPE);
            if (!root) return '[]';
            const els = root.querySelectorAll('button, input[type="submit"], [role="button"]');
            return JSON.stringify(Array.from(els).map((el) => {
              const info = aaInfo(el);
              if (!info.text && el.value) info.text = el.value;
              return info;
            }));
            "#,
        );
        self.with_tab(move |tab| eval_json(tab, &js)).await
    }

    async fn click(&self, el: &ElementHandle) -> Result<(), DriverError> {
        let selector = handle_selector(el);
        let id = el.to_string();
        self.with_tab(move |tab| {
            let element = tab
                .find_element(&selector)
                .map_err(|_| DriverError::ElementGone(id.clone()))?;
            element.scroll_into_view().map_err(script_err)?;
            element.click().map_err(script_err)?;
            Ok(())
        })
        .await
    }

    async fn type_char(&self, el: &ElementHandle, ch: char) -> Result<(), DriverError> {
        let js = script(
            &[("ID", el.as_str())],
            r#"
            const el = aaFind(ID);
            if (!el) return false;
            if (document.activeElement !== el) el.focus();
            return true;
            "#,
        );
        let id = el.to_string();
        self.with_tab(move |tab| {
            if !eval_bool(tab, &js)? {
                return Err(DriverError::ElementGone(id));
            }
            tab.send_character(&ch.to_string()).map_err(script_err)?;
            Ok(())
        })
        .await
    }

    async fn select_native(&self, el: &ElementHandle, index: usize) -> Result<bool, DriverError> {
        let index = index.to_string();
        let js = script(
            &[("ID", el.as_str()), ("INDEX", index.as_str())],
            r#"
            const el = aaFind(ID);
            const i = Number(INDEX);
            if (!el || el.tagName !== 'SELECT' || i >= el.options.length) return false;
            el.selectedIndex = i;
            el.dispatchEvent(new Event('change', { bubbles: true }));
            return el.selectedIndex === i;
            "#,
        );
        self.with_tab(move |tab| eval_bool(tab, &js)).await
    }

    async fn dispatch_select(&self, el: &ElementHandle, value: &str) -> Result<bool, DriverError> {
        let js = script(
            &[("ID", el.as_str()), ("VALUE", value)],
            r#"
            const el = aaFind(ID);
            if (!el || !('value' in el)) return false;
            el.value = VALUE;
            el.dispatchEvent(new Event('input', { bubbles: true }));
            el.dispatchEvent(new Event('change', { bubbles: true }));
            return el.value === VALUE;
            "#,
        );
        self.with_tab(move |tab| eval_bool(tab, &js)).await
    }

    async fn click_option(&self, el: &ElementHandle, option_text: &str) -> Result<bool, DriverError> {
        let open = script(
            &[("ID", el.as_str())],
            "const el = aaFind(ID); if (!el) return false; el.click(); return true;",
        );
        let pick = script(
            &[("ID", el.as_str()), ("TEXT", option_text.trim())],
            r#"
            const el = aaFind(ID);
            const lbox = el ? (el.getAttribute('role') === 'listbox' ? el : aaListbox(el)) : null;
            const scope = lbox || document;
            for (const o of scope.querySelectorAll('[role="option"]')) {
              if (aaVisible(o) && aaText(o) === TEXT) { o.click(); return true; }
            }
            return false;
            "#,
        );
        self.with_tab(move |tab| {
            if !eval_bool(tab, &open)? {
                return Ok(false);
            }
            std::thread::sleep(Duration::from_millis(300));
            eval_bool(tab, &pick)
        })
        .await
    }

    async fn attach_file(&self, el: &ElementHandle, path: &Path) -> Result<(), DriverError> {
        let selector = handle_selector(el);
        let id = el.to_string();
        let path = path.display().to_string();
        self.with_tab(move |tab| {
            let element = tab
                .find_element(&selector)
                .map_err(|_| DriverError::ElementGone(id))?;
            element
                .set_input_files(&[path.as_str()])
                .map_err(|e| DriverError::Io(e.to_string()))?;
            Ok(())
        })
        .await
    }

    async fn frames(&self) -> Result<Vec<FrameInfo>, DriverError> {
        let js = script(
            &[],
            r#"
            return JSON.stringify(Array.from(document.querySelectorAll('iframe')).map((f) => {
              const r = f.getBoundingClientRect();
              return {
                src: f.getAttribute('src') || '',
                title: f.getAttribute('title') || '',
                visible: aaVisible(f),
                width: r.width,
                height: r.height,
              };
            }));
            "#,
        );
        self.with_tab(move |tab| eval_json(tab, &js)).await
    }

    async fn body_text(&self) -> Result<String, DriverError> {
        self.with_tab(|tab| {
            let content = tab.get_content().map_err(script_err)?;
            Ok(html2text::from_read(content.as_bytes(), 120).unwrap_or_else(|_| content))
        })
        .await
    }

    async fn scroll_to_bottom(&self) -> Result<(), DriverError> {
        self.with_tab(|tab| {
            eval_value(tab, "window.scrollTo(0, document.body.scrollHeight)")?;
            Ok(())
        })
        .await
    }

    async fn press_escape(&self) -> Result<(), DriverError> {
        self.with_tab(|tab| {
            tab.press_key("Escape").map_err(script_err)?;
            Ok(())
        })
        .await
    }

    async fn screenshot(&self, path: &Path) -> Result<(), DriverError> {
        let path = path.to_path_buf();
        self.with_tab(move |tab| {
            let png = tab
                .capture_screenshot(CaptureScreenshotFormatOption::Png, None, None, true)
                .map_err(script_err)?;
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| DriverError::Io(e.to_string()))?;
            }
            std::fs::write(&path, png).map_err(|e| DriverError::Io(e.to_string()))
        })
        .await
    }

    async fn close(&self) -> Result<(), DriverError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.with_tab(|tab| {
            tab.close(true).map_err(script_err)?;
            Ok(())
        })
        .await
    }
}

/// 登录态探测页：跳转后 URL 含登录关键字即视为登录失效
fn login_check_url(platform: &str) -> Option<&'static str> {
    match platform {
        "linkedin" => Some("https://www.linkedin.com/feed/"),
        "indeed" => Some("https://profile.indeed.com/"),
        "glassdoor" => Some("https://www.glassdoor.com/member/profile/index.htm"),
        "ziprecruiter" => Some("https://www.ziprecruiter.com/candidate/saved-jobs"),
        _ => None,
    }
}

const LOGIN_MARKERS: &[&str] = &["login", "signin", "sign-in", "authwall", "auth/"];

fn looks_logged_out(url: &str) -> bool {
    let url = url.to_ascii_lowercase();
    LOGIN_MARKERS.iter().any(|m| url.contains(m))
}

fn close_tab(tab: &Tab, platform: &str) {
    if let Err(e) = tab.close(true) {
        tracing::warn!(platform = %platform, error = %e, "Failed to close tab");
    }
}

/// 单个 Chrome 进程，每个平台一个新标签页
///
/// 登录态由 `user_data_dir` 持久化；进程在提供者 drop 时随 `Browser` 一起释放。
pub struct ChromeSessionProvider {
    cfg: BrowserSection,
    browser: Arc<Mutex<Option<Browser>>>,
}

impl ChromeSessionProvider {
    pub fn new(cfg: BrowserSection) -> Self {
        Self {
            cfg,
            browser: Arc::new(Mutex::new(None)),
        }
    }

    fn launch(cfg: &BrowserSection) -> Result<Browser, DriverError> {
        let options = LaunchOptions::default_builder()
            .headless(cfg.headless)
            .path(cfg.chrome_path.clone())
            .user_data_dir(cfg.user_data_dir.clone())
            .idle_browser_timeout(Duration::from_secs(600))
            .build()
            .map_err(script_err)?;
        Browser::new(options)
            .map_err(|e| DriverError::Navigation(format!("Chrome launch failed: {}. Install Chrome/Chromium.", e)))
    }
}

#[async_trait]
impl SessionProvider for ChromeSessionProvider {
    async fn open(&self, platform: &str) -> Result<SessionState, DriverError> {
        let cfg = self.cfg.clone();
        let browser = Arc::clone(&self.browser);
        let check_url = login_check_url(platform);
        let platform = platform.to_string();

        tokio::task::spawn_blocking(move || {
            let mut guard = browser
                .lock()
                .map_err(|e| DriverError::Script(e.to_string()))?;
            if guard.is_none() {
                *guard = Some(Self::launch(&cfg)?);
            }
            let Some(browser) = guard.as_ref() else {
                return Err(DriverError::Script("Browser unavailable".into()));
            };
            let tab = browser.new_tab().map_err(script_err)?;

            if let Some(url) = check_url {
                if let Err(e) = tab.navigate_to(url).and_then(|t| t.wait_until_navigated()) {
                    close_tab(&tab, &platform);
                    return Err(DriverError::Navigation(format!("{}: {}", url, e)));
                }
                let landed = tab.get_url();
                if looks_logged_out(&landed) {
                    tracing::warn!(platform = %platform, url = %landed, "Session redirected to login");
                    close_tab(&tab, &platform);
                    return Ok(SessionState::LoginRequired);
                }
            }
            tracing::info!(platform = %platform, "Browser session ready");
            Ok(SessionState::Ready(Arc::new(ChromePage::new(tab))))
        })
        .await
        .map_err(|e| DriverError::Script(format!("Task join: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_markers() {
        assert!(looks_logged_out("https://www.linkedin.com/authwall?trk=x"));
        assert!(looks_logged_out("https://secure.indeed.com/auth/login"));
        assert!(!looks_logged_out("https://www.linkedin.com/feed/"));
        // 安全验证页交给挑战检测处理
        assert!(!looks_logged_out("https://www.linkedin.com/checkpoint/challenge/AgH"));
    }

    #[test]
    fn test_script_injects_json_literals() {
        let js = script(&[("SCOPE", "div[data-x=\"a\"]")], "return SCOPE;");
        assert!(js.contains(r#"const SCOPE = "div[data-x=\"a\"]";"#));
        assert!(js.starts_with("(function() {"));
    }
}

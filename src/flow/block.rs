//! 反自动化挑战检测与平台封锁锁存
//!
//! 判定为封锁的情形：
//! - 可见且尺寸足够的挑战 iframe（reCAPTCHA 挑战框 / 复选框、hCaptcha、Arkose、Cloudflare、DataDome）
//! - 可见且非 invisible 模式的验证控件元素
//! - 挑战 / 验证路径的 URL
//! - 短页面正文中出现「验证你是人类」一类的插页文本
//!
//! 被动 / invisible 模式的控件（例如常驻的 reCAPTCHA 徽标）不算封锁。

use tracing::debug;

use crate::browser::{DriverError, FrameInfo, Page};

/// 挑战 iframe 的最小可见尺寸（像素）
const MIN_CHALLENGE_FRAME_PX: f64 = 30.0;
/// 插页文本检测只看短页面，避免职位描述中的字眼误报
pub const INTERSTITIAL_MAX_CHARS: usize = 3000;

const CHALLENGE_FRAME_PATTERNS: &[&str] = &[
    "recaptcha/api2/bframe",
    "recaptcha/enterprise/bframe",
    "recaptcha/api2/anchor",
    "recaptcha/enterprise/anchor",
    "hcaptcha.com/captcha",
    "challenges.cloudflare.com",
    "arkoselabs.com",
    "funcaptcha.com",
    "captcha-delivery.com",
];

const PASSIVE_FRAME_MARKERS: &[&str] = &["size=invisible"];

const CHALLENGE_URL_PATTERNS: &[&str] = &["/checkpoint/challenge", "/captcha", "/sorry/index", "/cdn-cgi/challenge-platform"];

const WIDGET_SELECTORS: &[&str] = &[".g-recaptcha", ".h-captcha", ".cf-turnstile", "#captcha-internal", "#px-captcha"];

const INTERSTITIAL_PHRASES: &[&str] = &[
    "verify you are human",
    "verify you're human",
    "verify that you are human",
    "are you a robot",
    "let's do a quick security check",
    "complete the security check",
    "checking your browser before",
    "press & hold",
    "unusual activity from your",
    "please complete this captcha",
];

/// 挑战检测器（通用启发式 + 平台附加文本）
#[derive(Debug, Clone, Default)]
pub struct BlockDetector {
    extra_phrases: Vec<String>,
}

impl BlockDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_phrases<I, S>(mut self, phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra_phrases
            .extend(phrases.into_iter().map(|p| p.into().to_lowercase()));
        self
    }

    /// iframe 是否为主动挑战
    pub fn frame_is_challenge(frame: &FrameInfo) -> bool {
        if !frame.visible || frame.width < MIN_CHALLENGE_FRAME_PX || frame.height < MIN_CHALLENGE_FRAME_PX {
            return false;
        }
        let src = frame.src.to_lowercase();
        if PASSIVE_FRAME_MARKERS.iter().any(|m| src.contains(m)) {
            return false;
        }
        CHALLENGE_FRAME_PATTERNS.iter().any(|p| src.contains(p))
    }

    pub fn url_is_challenge(url: &str) -> bool {
        let url = url.to_lowercase();
        CHALLENGE_URL_PATTERNS.iter().any(|p| url.contains(p))
    }

    /// 短页面中的插页文本，返回命中的短语
    pub fn interstitial_phrase(&self, body: &str) -> Option<String> {
        if body.chars().count() > INTERSTITIAL_MAX_CHARS {
            return None;
        }
        let body = body.to_lowercase();
        INTERSTITIAL_PHRASES
            .iter()
            .map(|p| p.to_string())
            .chain(self.extra_phrases.iter().cloned())
            .find(|p| body.contains(p.as_str()))
    }

    /// 检查当前页面；命中时返回原因
    pub async fn detect(&self, page: &dyn Page) -> Result<Option<String>, DriverError> {
        let url = page.current_url().await?;
        if Self::url_is_challenge(&url) {
            return Ok(Some(format!("challenge url {url}")));
        }

        if let Some(frame) = page.frames().await?.iter().find(|f| Self::frame_is_challenge(f)) {
            return Ok(Some(format!("challenge frame {}", frame.src)));
        }

        for selector in WIDGET_SELECTORS {
            let widgets = page.find_elements(selector).await?;
            let active = widgets
                .iter()
                .find(|w| w.visible && w.attr("data-size").map_or(true, |s| s != "invisible"));
            if active.is_some() {
                return Ok(Some(format!("verification widget {selector}")));
            }
        }

        let body = page.body_text().await?;
        if let Some(phrase) = self.interstitial_phrase(&body) {
            return Ok(Some(format!("interstitial text \"{phrase}\"")));
        }

        debug!("No challenge detected");
        Ok(None)
    }
}

/// 平台封锁锁存：一经触发，本次运行内不再复位
#[derive(Debug, Clone, Default)]
pub struct BlockLatch {
    reason: Option<String>,
}

impl BlockLatch {
    /// 首次触发返回 true；已触发时保留最初原因
    pub fn trip(&mut self, reason: impl Into<String>) -> bool {
        if self.reason.is_some() {
            return false;
        }
        self.reason = Some(reason.into());
        true
    }

    pub fn is_tripped(&self) -> bool {
        self.reason.is_some()
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }
}

//! 平台适配器：每个招聘平台实现一次 [`PlatformAdapter`]
//!
//! 适配器提供选择器与少量平台特有动作（打开申请表、步骤微调、确认检测、关闭弹窗）；
//! 通用流程写在 trait 的默认方法里，平台只覆盖差异部分。

use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use crate::browser::{button_matches, DriverError, ElementInfo, Page};
use crate::core::error::ApplyError;
use crate::discovery::{JobDescriptor, Pagination, SearchQuery};
use crate::flow::block::BlockDetector;

pub mod glassdoor;
pub mod indeed;
pub mod linkedin;
pub mod ziprecruiter;

pub use glassdoor::GlassdoorAdapter;
pub use indeed::IndeedAdapter;
pub use linkedin::LinkedInAdapter;
pub use ziprecruiter::ZipRecruiterAdapter;

/// 已支持的平台名
pub const SUPPORTED_PLATFORMS: &[&str] = &["linkedin", "indeed", "glassdoor", "ziprecruiter"];

/// 职位已关闭的页面文本
const CLOSED_JOB_PHRASES: &[&str] = &["no longer accepting applications", "this job has expired", "job is no longer available"];

/// 列表页选择器
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListingSelectors {
    /// 列表容器；不存在即零结果
    pub container: &'static str,
    pub card: &'static str,
}

/// 打开申请表的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceOpen {
    Opened,
    /// 平台提示已申请过
    AlreadyApplied,
    /// 非一键申请 / 职位已关闭，附原因
    Unavailable(String),
}

/// 平台适配器
#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    fn name(&self) -> &'static str;

    fn search_url(&self, query: &SearchQuery) -> Result<Url, url::ParseError>;

    fn pagination(&self) -> Pagination;

    /// 编号分页时第 page_index 页（0 起）的 URL
    fn page_url(&self, base_url: &Url, page_index: u32) -> Url {
        let _ = page_index;
        base_url.clone()
    }

    fn listing(&self) -> ListingSelectors;

    /// 从列表卡片解析职位；无 ID 的卡片（广告等）返回 None
    fn parse_card(&self, card: &ElementInfo) -> Option<JobDescriptor>;

    /// 详情页中的申请入口
    fn apply_trigger(&self) -> &'static str;

    /// 一键申请入口文本须包含的关键字；不包含视为外部申请
    fn one_click_marker(&self) -> Option<&'static str> {
        None
    }

    /// 外部申请入口（「在公司网站申请」）
    fn external_apply_selector(&self) -> Option<&'static str> {
        None
    }

    fn already_applied_selector(&self) -> Option<&'static str> {
        None
    }

    /// 申请表根选择器（弹窗或页面主区域）
    fn form_scope(&self) -> &'static str;

    fn submit_labels(&self) -> &'static [&'static str] {
        &["submit application", "submit your application", "submit"]
    }

    fn continue_labels(&self) -> &'static [&'static str] {
        &["continue", "next", "review"]
    }

    fn dismiss_labels(&self) -> &'static [&'static str] {
        &["dismiss", "close", "cancel"]
    }

    /// 关闭弹窗后的「放弃」确认按钮
    fn discard_selector(&self) -> Option<&'static str> {
        None
    }

    fn validation_error_selector(&self) -> Option<&'static str> {
        None
    }

    fn confirmation_selector(&self) -> Option<&'static str> {
        None
    }

    fn confirmation_phrases(&self) -> &'static [&'static str] {
        &["application has been submitted", "application was sent", "application submitted"]
    }

    /// 平台特有的插页文本
    fn block_phrases(&self) -> &'static [&'static str] {
        &[]
    }

    /// 重新定位职位并打开申请表
    async fn open_surface(
        &self,
        page: &dyn Page,
        job: &JobDescriptor,
        timeout: Duration,
    ) -> Result<SurfaceOpen, ApplyError> {
        let cards = page.find_elements(self.listing().card).await?;
        let card = cards
            .iter()
            .find(|c| self.parse_card(c).is_some_and(|j| j.job_id == job.job_id));
        match card {
            Some(c) => page.click(&c.handle).await?,
            None => page.goto(&job.url).await?,
        }

        if let Some(sel) = self.already_applied_selector() {
            if any_visible(page, sel).await? {
                return Ok(SurfaceOpen::AlreadyApplied);
            }
        }

        if !page.wait_for(self.apply_trigger(), timeout).await? {
            if let Some(sel) = self.external_apply_selector() {
                if any_visible(page, sel).await? {
                    return Ok(SurfaceOpen::Unavailable("external application".into()));
                }
            }
            let body = page.body_text().await?.to_lowercase();
            if CLOSED_JOB_PHRASES.iter().any(|p| body.contains(p)) {
                return Ok(SurfaceOpen::Unavailable("job closed".into()));
            }
            return Err(ApplyError::TransientStepFailure("apply trigger not found".into()));
        }

        let trigger = page
            .find_elements(self.apply_trigger())
            .await?
            .into_iter()
            .find(|e| e.visible && e.enabled)
            .ok_or_else(|| ApplyError::TransientStepFailure("apply trigger not actionable".into()))?;
        let text = format!("{} {}", trigger.text, trigger.attr("aria-label").unwrap_or("")).to_lowercase();
        if text.trim() == "applied" {
            return Ok(SurfaceOpen::AlreadyApplied);
        }
        if let Some(marker) = self.one_click_marker() {
            if !text.contains(marker) {
                return Ok(SurfaceOpen::Unavailable("external application".into()));
            }
        }

        page.click(&trigger.handle).await?;
        if !page.wait_for(self.form_scope(), timeout).await? {
            return Err(ApplyError::TransientStepFailure("application form did not open".into()));
        }
        Ok(SurfaceOpen::Opened)
    }

    /// 每步填写后的平台特有微调
    async fn adjust_step(&self, page: &dyn Page) -> Result<(), DriverError> {
        let _ = page;
        Ok(())
    }

    async fn detect_block(&self, page: &dyn Page) -> Result<Option<String>, DriverError> {
        BlockDetector::new()
            .with_phrases(self.block_phrases().iter().copied())
            .detect(page)
            .await
    }

    async fn detect_confirmation(&self, page: &dyn Page) -> Result<bool, DriverError> {
        if let Some(sel) = self.confirmation_selector() {
            if any_visible(page, sel).await? {
                return Ok(true);
            }
        }
        let body = page.body_text().await?.to_lowercase();
        Ok(self.confirmation_phrases().iter().any(|p| body.contains(p)))
    }

    /// 关闭申请表（含放弃确认）；找不到关闭按钮时按 Escape
    async fn dismiss(&self, page: &dyn Page) -> Result<(), DriverError> {
        let buttons = page.find_buttons(self.form_scope()).await?;
        let close = buttons
            .iter()
            .find(|b| b.visible && button_matches(b, self.dismiss_labels()));
        let Some(close) = close else {
            return page.press_escape().await;
        };
        page.click(&close.handle).await?;
        if let Some(sel) = self.discard_selector() {
            let discard = page.find_elements(sel).await?.into_iter().find(|e| e.visible);
            if let Some(d) = discard {
                page.click(&d.handle).await?;
            }
        }
        Ok(())
    }
}

/// 按名称取适配器（大小写无关）
pub fn adapter_for(name: &str) -> Option<Box<dyn PlatformAdapter>> {
    match name.trim().to_ascii_lowercase().as_str() {
        "linkedin" => Some(Box::new(LinkedInAdapter)),
        "indeed" => Some(Box::new(IndeedAdapter)),
        "glassdoor" => Some(Box::new(GlassdoorAdapter)),
        "ziprecruiter" => Some(Box::new(ZipRecruiterAdapter)),
        _ => None,
    }
}

async fn any_visible(page: &dyn Page, selector: &str) -> Result<bool, DriverError> {
    Ok(page.find_elements(selector).await?.iter().any(|e| e.visible))
}

/// 固定地址 + 查询参数（按 application/x-www-form-urlencoded 编码）
pub fn build_url(base: &str, params: &[(&str, &str)]) -> Result<Url, url::ParseError> {
    Url::parse_with_params(base, params)
}

/// 替换（或追加）单个查询参数，其余参数保持原顺序
pub fn with_query_param(url: &Url, key: &str, value: &str) -> Url {
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != key)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    let mut out = url.clone();
    out.query_pairs_mut().clear().extend_pairs(kept).append_pair(key, value);
    out
}

/// 卡片文本的前两行：标题、公司
pub(crate) fn title_and_company(card: &ElementInfo) -> (String, String) {
    let mut lines = card.text.lines().map(str::trim).filter(|l| !l.is_empty());
    let title = lines.next().unwrap_or_default().to_string();
    let company = lines.next().unwrap_or_default().to_string();
    (title, company)
}

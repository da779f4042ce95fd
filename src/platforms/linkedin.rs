//! LinkedIn：Easy Apply 弹窗，编号分页（每页 25 条）

use async_trait::async_trait;
use tracing::debug;

use crate::browser::{DriverError, ElementInfo, Page};
use crate::discovery::{JobDescriptor, Pagination, SearchQuery};

use url::Url;

use super::{build_url, title_and_company, with_query_param, ListingSelectors, PlatformAdapter};

const PAGE_SIZE: u32 = 25;
const RESUME_CARD: &str = ".jobs-document-upload-redesign-card__container";
const RESUME_CARD_SELECTED: &str = "jobs-document-upload-redesign-card__container--selected";
const FOLLOW_COMPANY_INPUT: &str = "input#follow-company-checkbox";
const FOLLOW_COMPANY_LABEL: &str = "label[for='follow-company-checkbox']";

#[derive(Debug, Clone, Copy, Default)]
pub struct LinkedInAdapter;

impl LinkedInAdapter {
    /// 已上传的简历均未选中时选中第一份
    async fn select_uploaded_resume(&self, page: &dyn Page) -> Result<(), DriverError> {
        let cards = page.find_elements(RESUME_CARD).await?;
        let visible: Vec<&ElementInfo> = cards.iter().filter(|c| c.visible).collect();
        let any_selected = visible.iter().any(|c| {
            c.attr("class").is_some_and(|cls| cls.contains(RESUME_CARD_SELECTED))
                || c.attr("aria-checked") == Some("true")
        });
        if let (false, Some(first)) = (any_selected, visible.first()) {
            debug!("Selecting first uploaded resume");
            page.click(&first.handle).await?;
        }
        Ok(())
    }

    /// 取消默认勾选的「关注公司」
    async fn uncheck_follow_company(&self, page: &dyn Page) -> Result<(), DriverError> {
        let inputs = page.find_elements(FOLLOW_COMPANY_INPUT).await?;
        let Some(input) = inputs.iter().find(|i| i.attr("checked") == Some("true")) else {
            return Ok(());
        };
        debug!("Unchecking follow-company opt-in");
        let labels = page.find_elements(FOLLOW_COMPANY_LABEL).await?;
        match labels.iter().find(|l| l.visible) {
            Some(label) => page.click(&label.handle).await,
            None => page.click(&input.handle).await,
        }
    }
}

#[async_trait]
impl PlatformAdapter for LinkedInAdapter {
    fn name(&self) -> &'static str {
        "linkedin"
    }

    fn search_url(&self, query: &SearchQuery) -> Result<Url, url::ParseError> {
        // f_AL=true：只看 Easy Apply；f_WT=2：远程
        let mut params = vec![
            ("keywords", query.keywords.as_str()),
            ("location", query.location.as_str()),
            ("f_AL", "true"),
        ];
        if query.remote_only {
            params.push(("f_WT", "2"));
        }
        build_url("https://www.linkedin.com/jobs/search/", &params)
    }

    fn pagination(&self) -> Pagination {
        Pagination::Numbered
    }

    fn page_url(&self, base_url: &Url, page_index: u32) -> Url {
        if page_index == 0 {
            return base_url.clone();
        }
        with_query_param(base_url, "start", &(page_index * PAGE_SIZE).to_string())
    }

    fn listing(&self) -> ListingSelectors {
        ListingSelectors {
            container: ".scaffold-layout__list",
            card: "li[data-occludable-job-id]",
        }
    }

    fn parse_card(&self, card: &ElementInfo) -> Option<JobDescriptor> {
        let id = card.attr("data-occludable-job-id")?.trim();
        if id.is_empty() {
            return None;
        }
        let (title, company) = title_and_company(card);
        Some(JobDescriptor::new(
            self.name(),
            id,
            title,
            company,
            format!("https://www.linkedin.com/jobs/view/{id}/"),
        ))
    }

    fn apply_trigger(&self) -> &'static str {
        "button.jobs-apply-button"
    }

    fn one_click_marker(&self) -> Option<&'static str> {
        Some("easy apply")
    }

    fn already_applied_selector(&self) -> Option<&'static str> {
        Some(".artdeco-inline-feedback--success")
    }

    fn form_scope(&self) -> &'static str {
        ".jobs-easy-apply-modal"
    }

    fn submit_labels(&self) -> &'static [&'static str] {
        &["submit application", "submit"]
    }

    fn continue_labels(&self) -> &'static [&'static str] {
        &["continue to next step", "next", "review your application", "review", "continue"]
    }

    fn dismiss_labels(&self) -> &'static [&'static str] {
        &["dismiss", "done"]
    }

    fn discard_selector(&self) -> Option<&'static str> {
        Some("button[data-control-name='discard_application_confirm_btn']")
    }

    fn validation_error_selector(&self) -> Option<&'static str> {
        Some(".artdeco-inline-feedback--error")
    }

    fn confirmation_selector(&self) -> Option<&'static str> {
        Some("#post-apply-modal")
    }

    fn confirmation_phrases(&self) -> &'static [&'static str] {
        &["your application was sent", "application submitted"]
    }

    fn block_phrases(&self) -> &'static [&'static str] {
        &["let's do a quick security check", "we've restricted your account"]
    }

    async fn adjust_step(&self, page: &dyn Page) -> Result<(), DriverError> {
        self.select_uploaded_resume(page).await?;
        self.uncheck_follow_company(page).await
    }
}

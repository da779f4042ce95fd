//! Glassdoor：「显示更多」按钮分页，Easy Apply 表单

use async_trait::async_trait;

use crate::browser::ElementInfo;
use crate::discovery::{JobDescriptor, Pagination, SearchQuery};

use url::Url;

use super::{build_url, title_and_company, ListingSelectors, PlatformAdapter};

#[derive(Debug, Clone, Copy, Default)]
pub struct GlassdoorAdapter;

#[async_trait]
impl PlatformAdapter for GlassdoorAdapter {
    fn name(&self) -> &'static str {
        "glassdoor"
    }

    fn search_url(&self, query: &SearchQuery) -> Result<Url, url::ParseError> {
        let mut params = vec![
            ("sc.keyword", query.keywords.as_str()),
            ("locKeyword", query.location.as_str()),
            ("applicationType", "1"),
        ];
        if query.remote_only {
            params.push(("remoteWorkType", "1"));
        }
        build_url("https://www.glassdoor.com/Job/jobs.htm", &params)
    }

    fn pagination(&self) -> Pagination {
        Pagination::LoadMore {
            trigger: "button[data-test='load-more']".into(),
        }
    }

    fn listing(&self) -> ListingSelectors {
        ListingSelectors {
            container: "ul[aria-label='Jobs List']",
            card: "li[data-test='jobListing']",
        }
    }

    fn parse_card(&self, card: &ElementInfo) -> Option<JobDescriptor> {
        let id = card.attr("data-jobid")?.trim();
        if id.is_empty() {
            return None;
        }
        let (title, company) = title_and_company(card);
        Some(JobDescriptor::new(
            self.name(),
            id,
            title,
            company,
            format!("https://www.glassdoor.com/job-listing/j?jl={id}"),
        ))
    }

    fn apply_trigger(&self) -> &'static str {
        "button[data-test='easyApply']"
    }

    fn external_apply_selector(&self) -> Option<&'static str> {
        Some("button[data-test='applyButton']")
    }

    fn form_scope(&self) -> &'static str {
        "#ia-container"
    }

    fn dismiss_labels(&self) -> &'static [&'static str] {
        &["close", "exit"]
    }

    fn validation_error_selector(&self) -> Option<&'static str> {
        Some("[data-testid='input-error']")
    }

    fn confirmation_phrases(&self) -> &'static [&'static str] {
        &["your application has been submitted", "application submitted"]
    }
}

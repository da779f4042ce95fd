//! ZipRecruiter：滚动懒加载，1-Click Apply 弹窗

use async_trait::async_trait;

use crate::browser::ElementInfo;
use crate::discovery::{JobDescriptor, Pagination, SearchQuery};

use url::Url;

use super::{build_url, title_and_company, ListingSelectors, PlatformAdapter};

#[derive(Debug, Clone, Copy, Default)]
pub struct ZipRecruiterAdapter;

#[async_trait]
impl PlatformAdapter for ZipRecruiterAdapter {
    fn name(&self) -> &'static str {
        "ziprecruiter"
    }

    fn search_url(&self, query: &SearchQuery) -> Result<Url, url::ParseError> {
        let mut params = vec![
            ("search", query.keywords.as_str()),
            ("location", query.location.as_str()),
        ];
        if query.remote_only {
            params.push(("refine_by_location_type", "only_remote"));
        }
        build_url("https://www.ziprecruiter.com/jobs-search", &params)
    }

    fn pagination(&self) -> Pagination {
        Pagination::Scroll
    }

    fn listing(&self) -> ListingSelectors {
        ListingSelectors {
            container: ".job_results_two_pane",
            card: "article.job_result_two_pane",
        }
    }

    fn parse_card(&self, card: &ElementInfo) -> Option<JobDescriptor> {
        let id = card.attr("data-job-id")?.trim();
        if id.is_empty() {
            return None;
        }
        let (title, company) = title_and_company(card);
        Some(JobDescriptor::new(
            self.name(),
            id,
            title,
            company,
            format!("https://www.ziprecruiter.com/jobs/{id}"),
        ))
    }

    fn apply_trigger(&self) -> &'static str {
        "button[data-testid='one-click-apply']"
    }

    fn one_click_marker(&self) -> Option<&'static str> {
        Some("1-click apply")
    }

    fn external_apply_selector(&self) -> Option<&'static str> {
        Some("a[data-testid='apply-on-company-site']")
    }

    fn already_applied_selector(&self) -> Option<&'static str> {
        Some("[data-testid='applied-badge']")
    }

    fn form_scope(&self) -> &'static str {
        "[data-testid='apply-modal']"
    }

    fn confirmation_phrases(&self) -> &'static [&'static str] {
        &["application submitted", "you applied"]
    }
}

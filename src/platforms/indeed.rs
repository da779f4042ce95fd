//! Indeed：Indeed Apply 多页表单，编号分页（每页 10 条）

use async_trait::async_trait;

use crate::browser::ElementInfo;
use crate::discovery::{JobDescriptor, Pagination, SearchQuery};

use url::Url;

use super::{build_url, title_and_company, with_query_param, ListingSelectors, PlatformAdapter};

const PAGE_SIZE: u32 = 10;
/// 「Easily apply」过滤条件
const EASY_APPLY_FILTER: &str = "0kf:attr(DSQF7);";
const REMOTE_FILTER: &str = "032b3046-06a3-4876-8dfd-474eb5e7ed11";

#[derive(Debug, Clone, Copy, Default)]
pub struct IndeedAdapter;

#[async_trait]
impl PlatformAdapter for IndeedAdapter {
    fn name(&self) -> &'static str {
        "indeed"
    }

    fn search_url(&self, query: &SearchQuery) -> Result<Url, url::ParseError> {
        let mut params = vec![
            ("q", query.keywords.as_str()),
            ("l", query.location.as_str()),
            ("sc", EASY_APPLY_FILTER),
        ];
        if query.remote_only {
            params.push(("remotejob", REMOTE_FILTER));
        }
        build_url("https://www.indeed.com/jobs", &params)
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
            container: "#mosaic-provider-jobcards",
            card: "a[data-jk]",
        }
    }

    fn parse_card(&self, card: &ElementInfo) -> Option<JobDescriptor> {
        let id = card.attr("data-jk")?.trim();
        if id.is_empty() {
            return None;
        }
        let (title, mut company) = title_and_company(card);
        if let Some(c) = card.attr("data-company") {
            company = c.to_string();
        }
        Some(JobDescriptor::new(
            self.name(),
            id,
            title,
            company,
            format!("https://www.indeed.com/viewjob?jk={id}"),
        ))
    }

    fn apply_trigger(&self) -> &'static str {
        "#indeedApplyButton"
    }

    fn external_apply_selector(&self) -> Option<&'static str> {
        Some("#applyButtonLinkContainer")
    }

    fn already_applied_selector(&self) -> Option<&'static str> {
        Some(".jobsearch-IndeedApplyButton-applied")
    }

    fn form_scope(&self) -> &'static str {
        "#ia-container"
    }

    fn continue_labels(&self) -> &'static [&'static str] {
        &["continue", "review your application", "next"]
    }

    fn dismiss_labels(&self) -> &'static [&'static str] {
        &["close", "exit", "cancel"]
    }

    fn validation_error_selector(&self) -> Option<&'static str> {
        Some("[data-testid='input-error']")
    }

    fn confirmation_selector(&self) -> Option<&'static str> {
        Some("[data-testid='submitted-application-confirmation']")
    }

    fn confirmation_phrases(&self) -> &'static [&'static str] {
        &["your application has been submitted", "application submitted"]
    }

    fn block_phrases(&self) -> &'static [&'static str] {
        &["additional verification required"]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::MockElement;

    #[test]
    fn test_search_url_filters() {
        let a = IndeedAdapter;
        let url = a.search_url(&SearchQuery::new("data engineer", "Remote")).unwrap();
        assert_eq!(
            url.as_str(),
            "https://www.indeed.com/jobs?q=data+engineer&l=Remote&sc=0kf%3Aattr%28DSQF7%29%3B"
        );
        assert!(!url.as_str().contains("remotejob"));
        assert!(a.page_url(&url, 3).as_str().ends_with("&start=30"));
    }

    #[test]
    fn test_parse_card_prefers_company_attr() {
        let a = IndeedAdapter;
        let card = MockElement::new("c", "a")
            .attr("data-jk", "9f8e7d")
            .attr("data-company", "Globex")
            .text("Platform Engineer\nnew")
            .info;
        let job = a.parse_card(&card).unwrap();
        assert_eq!(job.company, "Globex");
        assert_eq!(job.url, "https://www.indeed.com/viewjob?jk=9f8e7d");
    }
}

//! 职位发现：从列表页逐个产出候选职位
//!
//! - 每次调用都重新查询卡片（打开详情 / 弹窗后旧句柄会失效）
//! - 运行内按 job_id 去重
//! - 当前批次耗尽后先交还重新排队的任务，再翻页 / 点击加载更多 / 滚动
//! - 连续 3 次加载没有新 ID、列表容器不存在、或达到页数上限时结束
//! - 列表页被重新加载后，滚动 / 加载更多要从头重放；重放到旧深度之前的加载不计入空加载

use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use crate::browser::Page;
use crate::config::{EngineLimits, SearchSection};
use crate::core::error::ApplyError;
use crate::core::pacing::{Pacing, PauseKind};
use crate::platforms::PlatformAdapter;

/// 连续多少次加载无新 ID 视为耗尽
pub const MAX_EMPTY_LOADS: u32 = 3;

/// 职位描述（在平台内按 job_id 唯一）
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub platform: String,
    pub job_id: String,
    pub title: String,
    pub company: String,
    pub url: String,
}

impl JobDescriptor {
    pub fn new(
        platform: impl Into<String>,
        job_id: impl Into<String>,
        title: impl Into<String>,
        company: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            platform: platform.into(),
            job_id: job_id.into(),
            title: title.into(),
            company: company.into(),
            url: url.into(),
        }
    }
}

/// 列表分页方式
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pagination {
    /// 按页码构造 URL 导航
    Numbered,
    /// 点击「加载更多」按钮
    LoadMore { trigger: String },
    /// 滚动到底部触发懒加载
    Scroll,
}

/// 搜索条件
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchQuery {
    pub keywords: String,
    pub location: String,
    pub remote_only: bool,
}

impl SearchQuery {
    pub fn new(keywords: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            keywords: keywords.into(),
            location: location.into(),
            remote_only: false,
        }
    }

    pub fn from_config(cfg: &SearchSection) -> Self {
        Self {
            keywords: cfg.keywords.clone(),
            location: cfg.location.clone(),
            remote_only: cfg.remote_only,
        }
    }
}

/// 职位发现迭代器
///
/// 调用方负责先导航到 `listing_url`；本结构只在翻页时自行导航。
pub struct JobDiscovery<'a> {
    adapter: &'a dyn PlatformAdapter,
    pacing: &'a dyn Pacing,
    /// 第 0 页的 URL（编号分页在其上叠加页码）
    base_url: Url,
    listing_url: Url,
    page_index: u32,
    loads: u32,
    /// 本次运行到达过的最深加载次数
    deepest_load: u32,
    /// 当前加载只是在重放已经到达过的深度
    replaying: bool,
    max_pages: u32,
    listing_timeout: Duration,
    seen: HashSet<String>,
    requeued: VecDeque<JobDescriptor>,
    empty_loads: u32,
    /// 上次加载后尚未评估是否产生新 ID
    pending_load: bool,
    exhausted: bool,
}

impl<'a> JobDiscovery<'a> {
    pub fn new(
        adapter: &'a dyn PlatformAdapter,
        pacing: &'a dyn Pacing,
        listing_url: Url,
        limits: &EngineLimits,
    ) -> Self {
        Self {
            adapter,
            pacing,
            base_url: listing_url.clone(),
            listing_url,
            page_index: 0,
            loads: 0,
            deepest_load: 0,
            replaying: false,
            max_pages: limits.max_listing_pages.max(1),
            listing_timeout: limits.listing_timeout,
            seen: HashSet::new(),
            requeued: VecDeque::new(),
            empty_loads: 0,
            pending_load: false,
            exhausted: false,
        }
    }

    /// 当前列表页 URL（恢复时回到这里）
    pub fn listing_url(&self) -> &Url {
        &self.listing_url
    }

    /// 调用方重新导航到 `listing_url` 之后调用
    ///
    /// 编号分页停留在当前页；滚动 / 加载更多的页面回到第一批，已加载的批次要重新加载。
    pub fn on_reload(&mut self) {
        self.pending_load = false;
        if !matches!(self.adapter.pagination(), Pagination::Numbered) {
            debug!(platform = %self.adapter.name(), depth = self.deepest_load, "Listing reloaded, replaying loads");
            self.loads = 0;
        }
    }

    /// 把任务放回当前批次末尾
    pub fn requeue(&mut self, job: JobDescriptor) {
        debug!(job_id = %job.job_id, "Requeued candidate");
        self.requeued.push_back(job);
    }

    pub fn seen_count(&self) -> usize {
        self.seen.len()
    }

    /// 取下一个候选；None 表示列表耗尽
    pub async fn next_candidate(&mut self, page: &dyn Page) -> Result<Option<JobDescriptor>, ApplyError> {
        loop {
            if self.exhausted {
                return Ok(self.requeued.pop_front());
            }

            let listing = self.adapter.listing();
            if !page.wait_for(listing.container, self.listing_timeout).await? {
                info!(platform = %self.adapter.name(), "Listing container absent, treating as no results");
                self.exhausted = true;
                continue;
            }

            let cards = page.find_elements(listing.card).await?;
            let fresh = cards
                .iter()
                .filter(|c| c.visible)
                .filter_map(|c| self.adapter.parse_card(c))
                .find(|job| !self.seen.contains(&job.job_id));

            if let Some(job) = fresh {
                self.seen.insert(job.job_id.clone());
                self.empty_loads = 0;
                self.pending_load = false;
                return Ok(Some(job));
            }

            if self.pending_load {
                self.pending_load = false;
                if !self.replaying {
                    self.empty_loads += 1;
                    if self.empty_loads >= MAX_EMPTY_LOADS {
                        info!(platform = %self.adapter.name(), "No new jobs after {} loads", MAX_EMPTY_LOADS);
                        self.exhausted = true;
                        continue;
                    }
                }
            }

            if let Some(job) = self.requeued.pop_front() {
                return Ok(Some(job));
            }

            if !self.load_more(page).await? {
                self.exhausted = true;
            }
        }
    }

    /// 加载下一批；返回 false 表示没有更多可加载
    async fn load_more(&mut self, page: &dyn Page) -> Result<bool, ApplyError> {
        if self.loads + 1 >= self.max_pages {
            debug!(pages = self.max_pages, "Listing page limit reached");
            return Ok(false);
        }
        self.loads += 1;
        self.replaying = self.loads <= self.deepest_load;
        self.deepest_load = self.deepest_load.max(self.loads);

        match self.adapter.pagination() {
            Pagination::Numbered => {
                self.page_index += 1;
                let url = self.adapter.page_url(&self.base_url, self.page_index);
                debug!(url = %url, "Navigating to next listing page");
                page.goto(url.as_str()).await?;
                self.listing_url = url;
            }
            Pagination::LoadMore { trigger } => {
                let button = page
                    .find_elements(&trigger)
                    .await?
                    .into_iter()
                    .find(|b| b.visible && b.enabled);
                let Some(button) = button else {
                    debug!("Load-more trigger not present");
                    return Ok(false);
                };
                page.click(&button.handle).await?;
            }
            Pagination::Scroll => {
                page.scroll_to_bottom().await?;
            }
        }

        self.pacing.pause(PauseKind::Settle).await;
        self.pending_load = true;
        Ok(true)
    }
}

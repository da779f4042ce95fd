//! 平台循环监督器：逐个候选运行状态机，隔离单个职位的失败
//!
//! - 账本中已申请过的候选直接跳过
//! - 任务失败后先关闭弹窗、回到列表页，再复查挑战
//! - 瞬时失败写 `retrying` 记录并放回当前批次末尾，超过重试上限后写终态 `error`
//! - 一旦检测到挑战，写一条 `blocked` 记录、锁存并立即结束该平台；
//!   挑战本身导致的失败不做任何关闭 / 导航
//! - 只有初始导航失败（SetupFailure）会作为错误返回

use std::collections::HashMap;
use std::path::Path;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::browser::Page;
use crate::config::{EngineLimits, RunOptions};
use crate::core::error::{ApplyError, RecoveryAction};
use crate::core::pacing::{Pacing, PauseKind};
use crate::core::recovery::RecoveryEngine;
use crate::core::snapshot::SnapshotWriter;
use crate::discovery::{JobDescriptor, JobDiscovery, SearchQuery};
use crate::fields::{AnswerKnowledgeBase, FieldResolver};
use crate::flow::{ApplySession, BlockLatch, JobOutcome, StepMachine};
use crate::ledger::{AttemptRecord, Ledger, Outcome, PlatformSummary};
use crate::platforms::PlatformAdapter;

/// 一次运行内各平台共享的依赖
pub struct EngineContext<'a> {
    pub run_id: &'a str,
    pub kb: &'a AnswerKnowledgeBase,
    pub ledger: &'a dyn Ledger,
    pub pacing: &'a dyn Pacing,
    pub snapshots: &'a SnapshotWriter,
    pub limits: &'a EngineLimits,
    pub resume_path: Option<&'a Path>,
    /// 在两个任务之间检查
    pub cancel: CancellationToken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Abort,
}

/// 写尝试记录；锁存后只允许写 `blocked`
struct AttemptWriter<'a> {
    ledger: &'a dyn Ledger,
    run_id: &'a str,
    platform: &'a str,
    latch: BlockLatch,
}

impl<'a> AttemptWriter<'a> {
    fn new(ledger: &'a dyn Ledger, run_id: &'a str, platform: &'a str) -> Self {
        Self {
            ledger,
            run_id,
            platform,
            latch: BlockLatch::default(),
        }
    }

    async fn record(&self, job: &JobDescriptor, outcome: Outcome, detail: Option<String>) {
        if self.latch.is_tripped() {
            warn!(platform = %self.platform, job_id = %job.job_id, %outcome, "Platform latched, record dropped");
            return;
        }
        let record = AttemptRecord::for_job(self.run_id, job, outcome, detail);
        if let Err(e) = self.ledger.record_attempt(&record).await {
            warn!(platform = %self.platform, job_id = %job.job_id, error = %e, "Failed to write attempt record");
        }
    }

    /// 首次触发时写一条 blocked 记录
    async fn block(&mut self, job: Option<&JobDescriptor>, reason: &str) {
        if !self.latch.trip(reason) {
            return;
        }
        warn!(platform = %self.platform, reason = %reason, "Challenge detected, halting platform");
        let record = AttemptRecord::blocked(self.run_id, self.platform, job, reason);
        if let Err(e) = self.ledger.record_attempt(&record).await {
            warn!(platform = %self.platform, error = %e, "Failed to write blocked record");
        }
    }
}

/// 单平台运行状态
struct PlatformRun<'r, 'a> {
    page: &'r dyn Page,
    adapter: &'r dyn PlatformAdapter,
    ctx: &'r EngineContext<'a>,
    writer: AttemptWriter<'r>,
    recovery: RecoveryEngine,
    failures: HashMap<String, u32>,
    summary: PlatformSummary,
}

impl<'r, 'a> PlatformRun<'r, 'a> {
    async fn check_block(&self) -> Option<String> {
        match self.adapter.detect_block(self.page).await {
            Ok(reason) => reason,
            Err(e) => {
                debug!(error = %e, "Challenge check failed");
                None
            }
        }
    }

    async fn block(&mut self, job: Option<&JobDescriptor>, reason: &str) {
        self.writer.block(job, reason).await;
        self.summary.blocked = true;
    }

    async fn on_outcome(&mut self, job: &JobDescriptor, outcome: JobOutcome) {
        match outcome {
            JobOutcome::Submitted { confirmed, .. } => {
                let detail = (!confirmed).then(|| "confirmation not observed".to_string());
                self.writer.record(job, Outcome::Submitted, detail).await;
                self.summary.applied += 1;
            }
            JobOutcome::DryRun { steps } => {
                debug!(job_id = %job.job_id, steps, "Dry run complete");
                self.writer.record(job, Outcome::DryRun, None).await;
                self.summary.applied += 1;
            }
            JobOutcome::AlreadyApplied => {
                self.writer.record(job, Outcome::AlreadyApplied, None).await;
                self.summary.skipped += 1;
            }
            JobOutcome::Unavailable(reason) => {
                info!(job_id = %job.job_id, reason = %reason, "Skipping job");
                self.writer.record(job, Outcome::Skipped, Some(reason)).await;
                self.summary.skipped += 1;
            }
        }
    }

    async fn on_failure(&mut self, job: JobDescriptor, err: ApplyError, discovery: &mut JobDiscovery<'_>) -> Flow {
        let attempt = {
            let n = self.failures.entry(job.job_id.clone()).or_insert(0);
            *n += 1;
            *n
        };
        let action = self.recovery.handle(&err, attempt);
        warn!(
            platform = %self.adapter.name(),
            job_id = %job.job_id,
            attempt,
            error = %err,
            ?action,
            "Application attempt failed"
        );

        if matches!(action, RecoveryAction::RecordError | RecoveryAction::AbortPlatform) {
            self.ctx.snapshots.capture(self.page, &job.platform, &job.job_id).await;
        }

        if let ApplyError::BlockDetected(reason) = &err {
            self.block(Some(&job), reason).await;
            return Flow::Abort;
        }

        self.recover(discovery).await;

        if let Some(reason) = self.check_block().await {
            self.block(Some(&job), &reason).await;
            return Flow::Abort;
        }

        let detail = Some(err.to_string());
        match action {
            RecoveryAction::Retry => {
                self.writer.record(&job, Outcome::Retrying, detail).await;
                discovery.requeue(job);
                Flow::Continue
            }
            RecoveryAction::RecordError => {
                self.writer.record(&job, Outcome::Error, detail).await;
                self.summary.errors += 1;
                Flow::Continue
            }
            RecoveryAction::RecordAlreadyApplied => {
                self.writer.record(&job, Outcome::AlreadyApplied, None).await;
                self.summary.skipped += 1;
                Flow::Continue
            }
            RecoveryAction::AbortPlatform => {
                self.writer.record(&job, Outcome::Error, detail).await;
                self.summary.errors += 1;
                Flow::Abort
            }
        }
    }

    /// 关闭残留弹窗并回到列表页（尽力而为）
    async fn recover(&self, discovery: &mut JobDiscovery<'_>) {
        if let Err(e) = self.adapter.dismiss(self.page).await {
            debug!(error = %e, "Dismiss during recovery failed");
        }
        self.reload_listing(discovery).await;
    }

    /// 任务结束后若已离开列表页则导航回去
    async fn ensure_listing(&self, discovery: &mut JobDiscovery<'_>) {
        let current = match self.page.current_url().await {
            Ok(url) => url,
            Err(e) => {
                debug!(error = %e, "Cannot read current url");
                String::new()
            }
        };
        if same_page(&current, discovery.listing_url()) {
            return;
        }
        self.reload_listing(discovery).await;
    }

    async fn reload_listing(&self, discovery: &mut JobDiscovery<'_>) {
        let listing_url = discovery.listing_url().clone();
        match self.page.goto(listing_url.as_str()).await {
            Ok(()) => discovery.on_reload(),
            Err(e) => warn!(url = %listing_url, error = %e, "Failed to return to listing"),
        }
    }
}

/// 同一列表页：scheme、host、端口和路径相同（忽略查询串、片段和末尾斜杠）
fn same_page(current: &str, listing: &Url) -> bool {
    let Ok(current) = Url::parse(current) else {
        return false;
    };
    current.scheme() == listing.scheme()
        && current.host_str() == listing.host_str()
        && current.port_or_known_default() == listing.port_or_known_default()
        && current.path().trim_end_matches('/') == listing.path().trim_end_matches('/')
}

/// 在一个平台上运行申请循环
///
/// 仅初始导航失败时返回 `Err(SetupFailure)`；其余失败都在内部处理并计入汇总。
pub async fn run_platform(
    page: &dyn Page,
    adapter: &dyn PlatformAdapter,
    ctx: &EngineContext<'_>,
    query: &SearchQuery,
    options: &RunOptions,
) -> Result<PlatformSummary, ApplyError> {
    let platform = adapter.name();
    let search_url = adapter
        .search_url(query)
        .map_err(|e| ApplyError::SetupFailure(format!("{platform}: invalid search url: {e}")))?;
    info!(platform = %platform, url = %search_url, dry_run = options.dry_run, "Starting platform");

    page.goto(search_url.as_str())
        .await
        .map_err(|e| ApplyError::SetupFailure(format!("{platform}: {e}")))?;

    let mut run = PlatformRun {
        page,
        adapter,
        ctx,
        writer: AttemptWriter::new(ctx.ledger, ctx.run_id, platform),
        recovery: RecoveryEngine::new(ctx.limits.max_retries),
        failures: HashMap::new(),
        summary: PlatformSummary::default(),
    };

    if let Some(reason) = run.check_block().await {
        run.block(None, &reason).await;
        return Ok(run.summary);
    }

    let resolver = FieldResolver::new(ctx.kb, ctx.pacing).with_resume(ctx.resume_path);
    let session = ApplySession {
        page,
        adapter,
        resolver: &resolver,
        ledger: ctx.ledger,
        pacing: ctx.pacing,
        snapshots: ctx.snapshots,
        limits: ctx.limits,
        dry_run: options.dry_run,
    };
    let mut discovery = JobDiscovery::new(adapter, ctx.pacing, search_url, ctx.limits);
    let mut attempted_any = false;

    loop {
        if ctx.cancel.is_cancelled() {
            info!(platform = %platform, "Stop requested, ending platform loop");
            break;
        }
        if run.summary.applied >= options.max_applications {
            info!(platform = %platform, limit = options.max_applications, "Application limit reached");
            break;
        }

        let job = match discovery.next_candidate(page).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                info!(platform = %platform, seen = discovery.seen_count(), "Listing exhausted");
                break;
            }
            Err(e) => {
                warn!(platform = %platform, error = %e, "Listing failed, ending platform loop");
                if let Some(reason) = run.check_block().await {
                    run.block(None, &reason).await;
                }
                break;
            }
        };

        match ctx.ledger.has_applied(platform, &job.job_id).await {
            Ok(true) => {
                debug!(job_id = %job.job_id, "Already in ledger, skipping");
                run.summary.skipped += 1;
                continue;
            }
            Ok(false) => {}
            Err(e) => {
                warn!(job_id = %job.job_id, error = %e, "Ledger lookup failed, skipping candidate");
                continue;
            }
        }

        if attempted_any {
            ctx.pacing.pause(PauseKind::BetweenApplications).await;
        }
        attempted_any = true;

        info!(platform = %platform, job_id = %job.job_id, title = %job.title, company = %job.company, "Applying");
        let result = StepMachine::new(&session).run(&job).await;
        let flow = match result {
            Ok(outcome) => {
                run.on_outcome(&job, outcome).await;
                Flow::Continue
            }
            Err(err) => run.on_failure(job, err, &mut discovery).await,
        };
        if flow == Flow::Abort {
            break;
        }
        run.ensure_listing(&mut discovery).await;
    }

    let summary = run.summary;
    info!(
        platform = %platform,
        applied = summary.applied,
        skipped = summary.skipped,
        errors = summary.errors,
        blocked = summary.blocked,
        "Platform finished"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_same_page_ignores_query_fragment_and_trailing_slash() {
        let listing = url("https://www.linkedin.com/jobs/search/?keywords=rust");
        assert!(same_page("https://www.linkedin.com/jobs/search/?keywords=rust&currentJobId=1", &listing));
        assert!(same_page("https://www.linkedin.com/jobs/search#top", &listing));
        assert!(same_page("https://x.test/a/", &url("https://x.test/a")));
        assert!(same_page("https://x.test:443/a", &url("https://x.test/a")));
    }

    #[test]
    fn test_same_page_rejects_other_pages() {
        let listing = url("https://www.linkedin.com/jobs/search/");
        assert!(!same_page("https://www.linkedin.com/jobs/view/1/", &listing));
        assert!(!same_page("http://www.linkedin.com/jobs/search/", &listing));
        assert!(!same_page("https://linkedin.com/jobs/search/", &listing));
        assert!(!same_page("", &listing));
        assert!(!same_page("about:blank", &listing));
    }
}

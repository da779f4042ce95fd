//! 运行协调器：一次运行按顺序处理各平台
//!
//! 开始时写 RunRecord，结束时恰好完成一次；每个平台的页面会话无论成败都会关闭。
//! 登录失效、未知平台、初始导航失败的平台汇总为 None，不影响后续平台。

use std::collections::HashSet;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::browser::{SessionProvider, SessionState};
use crate::config::{AppConfig, EngineLimits, RunOptions};
use crate::core::error::ApplyError;
use crate::core::pacing::Pacing;
use crate::core::snapshot::SnapshotWriter;
use crate::core::supervisor::{run_platform, EngineContext};
use crate::discovery::SearchQuery;
use crate::fields::AnswerKnowledgeBase;
use crate::ledger::{Ledger, PlatformReport, PlatformSummary, RunRecord};
use crate::platforms::adapter_for;

/// 运行报告
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub platforms: Vec<PlatformReport>,
}

impl RunReport {
    pub fn total_applied(&self) -> usize {
        self.platforms
            .iter()
            .filter_map(|p| p.summary.as_ref())
            .map(|s| s.applied)
            .sum()
    }

    pub fn summary_for(&self, platform: &str) -> Option<&PlatformSummary> {
        self.platforms
            .iter()
            .find(|p| p.platform == platform)
            .and_then(|p| p.summary.as_ref())
    }
}

pub struct RunCoordinator<'a> {
    sessions: &'a dyn SessionProvider,
    ledger: &'a dyn Ledger,
    kb: &'a AnswerKnowledgeBase,
    pacing: &'a dyn Pacing,
    snapshots: SnapshotWriter,
    limits: EngineLimits,
    options: RunOptions,
    query: SearchQuery,
    resume_path: Option<PathBuf>,
    cancel: CancellationToken,
}

impl<'a> RunCoordinator<'a> {
    pub fn new(
        sessions: &'a dyn SessionProvider,
        ledger: &'a dyn Ledger,
        kb: &'a AnswerKnowledgeBase,
        pacing: &'a dyn Pacing,
    ) -> Self {
        Self {
            sessions,
            ledger,
            kb,
            pacing,
            snapshots: SnapshotWriter::new("data/snapshots"),
            limits: EngineLimits::default(),
            options: RunOptions::default(),
            query: SearchQuery::default(),
            resume_path: None,
            cancel: CancellationToken::new(),
        }
    }

    /// 从配置填充选项、上限、搜索条件、快照目录与简历路径
    pub fn configured(mut self, cfg: &AppConfig) -> Self {
        self.snapshots = SnapshotWriter::new(cfg.app.snapshot_dir.clone());
        self.limits = cfg.engine_limits();
        self.options = cfg.run_options();
        self.query = SearchQuery::from_config(&cfg.search);
        self.resume_path = cfg.app.resume_path.clone();
        self
    }

    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_limits(mut self, limits: EngineLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_query(mut self, query: SearchQuery) -> Self {
        self.query = query;
        self
    }

    pub fn with_snapshots(mut self, snapshots: SnapshotWriter) -> Self {
        self.snapshots = snapshots;
        self
    }

    pub fn with_resume(mut self, path: Option<PathBuf>) -> Self {
        self.resume_path = path;
        self
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// 按顺序处理平台（重复的平台名只处理一次）
    pub async fn run(&self, platforms: &[String]) -> Result<RunReport, ApplyError> {
        let run = RunRecord::start();
        self.ledger.start_run(&run).await?;
        info!(run_id = %run.run_id, platforms = ?platforms, dry_run = self.options.dry_run, "Run started");

        let ctx = EngineContext {
            run_id: &run.run_id,
            kb: self.kb,
            ledger: self.ledger,
            pacing: self.pacing,
            snapshots: &self.snapshots,
            limits: &self.limits,
            resume_path: self.resume_path.as_deref(),
            cancel: self.cancel.clone(),
        };

        let mut reports = Vec::with_capacity(platforms.len());
        let mut visited = HashSet::new();
        for name in platforms {
            let name = name.trim().to_ascii_lowercase();
            if !visited.insert(name.clone()) {
                warn!(platform = %name, "Duplicate platform in list, ignoring");
                continue;
            }
            let summary = self.run_one(&name, &ctx).await;
            reports.push(PlatformReport { platform: name, summary });
        }

        let completed_at = Utc::now();
        self.ledger.complete_run(&run.run_id, completed_at, &reports).await?;

        let report = RunReport {
            run_id: run.run_id.clone(),
            started_at: run.started_at,
            completed_at,
            platforms: reports,
        };
        info!(run_id = %report.run_id, applied = report.total_applied(), "Run completed");
        Ok(report)
    }

    async fn run_one(&self, name: &str, ctx: &EngineContext<'_>) -> Option<PlatformSummary> {
        if self.cancel.is_cancelled() {
            info!(platform = %name, "Stop requested, platform not attempted");
            return None;
        }
        let Some(adapter) = adapter_for(name) else {
            warn!(platform = %name, "Unknown platform");
            return None;
        };
        let page = match self.sessions.open(name).await {
            Ok(SessionState::Ready(page)) => page,
            Ok(SessionState::LoginRequired) => {
                warn!(platform = %name, "Login required, skipping platform");
                return None;
            }
            Err(e) => {
                error!(platform = %name, error = %e, "Failed to open browser session");
                return None;
            }
        };

        let result = run_platform(page.as_ref(), adapter.as_ref(), ctx, &self.query, &self.options).await;
        if let Err(e) = page.close().await {
            warn!(platform = %name, error = %e, "Failed to close session");
        }

        match result {
            Ok(summary) => Some(summary),
            Err(e) => {
                error!(platform = %name, error = %e, "Platform not attempted");
                None
            }
        }
    }
}

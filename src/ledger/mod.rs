//! 申请账本：追加式记录每一次申请尝试及其结果
//!
//! - **AttemptRecord**: 不可变事实，只追加，不更新、不删除
//! - **RunRecord**: 运行元数据，completed_at 只能设置一次
//! - **UnmatchedFieldEvent**: 未匹配字段的诊断事件（仅供参考）
//!
//! 幂等判断 `has_applied` 是对全部历史记录的 OR（任一记录结果为 submitted / already_applied / dry_run），
//! 从不依赖「每对最新一行」投影；后者只用于展示。

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::discovery::JobDescriptor;

pub mod memory;
pub mod sqlite;

pub use memory::MemoryLedger;
pub use sqlite::SqliteLedger;

/// 账本错误
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Task join: {0}")]
    Join(String),

    #[error("Ledger lock poisoned")]
    Poisoned,

    #[error("Run already completed: {0}")]
    RunAlreadyCompleted(String),

    #[error("Run not found: {0}")]
    RunNotFound(String),
}

/// 申请尝试结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Submitted,
    AlreadyApplied,
    DryRun,
    /// 非一键申请 / 外部跳转等，附原因
    Skipped,
    /// 瞬时失败，已放回队列重试
    Retrying,
    /// 终态失败
    Error,
    /// 平台封锁
    Blocked,
}

impl Outcome {
    /// 计入「已申请」的结果集合
    pub const APPLIED: [Outcome; 3] = [Outcome::Submitted, Outcome::AlreadyApplied, Outcome::DryRun];

    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Submitted => "submitted",
            Outcome::AlreadyApplied => "already_applied",
            Outcome::DryRun => "dry_run",
            Outcome::Skipped => "skipped",
            Outcome::Retrying => "retrying",
            Outcome::Error => "error",
            Outcome::Blocked => "blocked",
        }
    }

    pub fn counts_as_applied(&self) -> bool {
        Self::APPLIED.contains(self)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
#[error("Unknown outcome: {0}")]
pub struct ParseOutcomeError(pub String);

impl FromStr for Outcome {
    type Err = ParseOutcomeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "submitted" => Outcome::Submitted,
            "already_applied" => Outcome::AlreadyApplied,
            "dry_run" => Outcome::DryRun,
            "skipped" => Outcome::Skipped,
            "retrying" => Outcome::Retrying,
            "error" => Outcome::Error,
            "blocked" => Outcome::Blocked,
            other => return Err(ParseOutcomeError(other.to_string())),
        })
    }
}

/// 平台级记录（封锁）使用的占位 job_id
pub const PLATFORM_JOB_ID: &str = "*";

/// 一次申请尝试（不可变）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub attempt_id: String,
    pub platform: String,
    pub job_id: String,
    pub job_title: String,
    pub company: String,
    pub job_url: String,
    pub outcome: Outcome,
    pub error_detail: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub run_id: String,
}

impl AttemptRecord {
    pub fn for_job(run_id: &str, job: &JobDescriptor, outcome: Outcome, error_detail: Option<String>) -> Self {
        Self {
            attempt_id: uuid::Uuid::new_v4().to_string(),
            platform: job.platform.clone(),
            job_id: job.job_id.clone(),
            job_title: job.title.clone(),
            company: job.company.clone(),
            job_url: job.url.clone(),
            outcome,
            error_detail,
            timestamp: Utc::now(),
            run_id: run_id.to_string(),
        }
    }

    /// 平台级封锁记录；job 为触发时正在处理的任务（若有）
    pub fn blocked(run_id: &str, platform: &str, job: Option<&JobDescriptor>, detail: &str) -> Self {
        match job {
            Some(job) => Self::for_job(run_id, job, Outcome::Blocked, Some(detail.to_string())),
            None => Self {
                attempt_id: uuid::Uuid::new_v4().to_string(),
                platform: platform.to_string(),
                job_id: PLATFORM_JOB_ID.to_string(),
                job_title: String::new(),
                company: String::new(),
                job_url: String::new(),
                outcome: Outcome::Blocked,
                error_detail: Some(detail.to_string()),
                timestamp: Utc::now(),
                run_id: run_id.to_string(),
            },
        }
    }
}

/// 单平台运行汇总
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformSummary {
    pub applied: usize,
    pub skipped: usize,
    pub errors: usize,
    #[serde(default)]
    pub blocked: bool,
}

/// 运行报告中的一个平台条目
///
/// `summary == None` 表示因前置条件失败（登录失效 / 列表页未出现）未尝试；
/// 全零的 `Some` 表示尝试过但没有结果。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformReport {
    pub platform: String,
    pub summary: Option<PlatformSummary>,
}

/// 运行元数据
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub platforms: Vec<PlatformReport>,
}

impl RunRecord {
    pub fn start() -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            completed_at: None,
            platforms: Vec::new(),
        }
    }
}

/// 未匹配字段事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnmatchedFieldEvent {
    pub platform: String,
    pub job_id: String,
    pub label: String,
    pub field_kind: String,
    pub timestamp: DateTime<Utc>,
}

/// 账本接口：单写者追加，读操作可与分析端并发
#[async_trait]
pub trait Ledger: Send + Sync {
    /// 任一历史记录结果属于 [`Outcome::APPLIED`] 即为 true
    async fn has_applied(&self, platform: &str, job_id: &str) -> Result<bool, LedgerError>;

    async fn record_attempt(&self, record: &AttemptRecord) -> Result<(), LedgerError>;

    async fn record_unmatched(&self, event: &UnmatchedFieldEvent) -> Result<(), LedgerError>;

    async fn start_run(&self, run: &RunRecord) -> Result<(), LedgerError>;

    /// 设置 completed_at 与各平台汇总；已完成的运行返回 RunAlreadyCompleted
    async fn complete_run(
        &self,
        run_id: &str,
        completed_at: DateTime<Utc>,
        platforms: &[PlatformReport],
    ) -> Result<(), LedgerError>;

    async fn get_run(&self, run_id: &str) -> Result<Option<RunRecord>, LedgerError>;

    /// 某 (platform, job_id) 的全部历史，按写入顺序
    async fn attempts_for(&self, platform: &str, job_id: &str) -> Result<Vec<AttemptRecord>, LedgerError>;

    /// 每对 (platform, job_id) 最新一行（仅供展示）
    async fn latest_attempts(&self, platform: Option<&str>) -> Result<Vec<AttemptRecord>, LedgerError>;

    async fn unmatched_events(&self, platform: Option<&str>) -> Result<Vec<UnmatchedFieldEvent>, LedgerError>;
}

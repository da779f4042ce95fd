//! SQLite 账本
//!
//! 同步 rusqlite 连接置于 Mutex 后，所有操作经 `spawn_blocking` 执行，避免阻塞 async 运行时。
//! WAL 模式保证单写者追加时分析端可并发只读；触发器拒绝对 attempts 的 UPDATE / DELETE。

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};

use super::{
    AttemptRecord, Ledger, LedgerError, Outcome, PlatformReport, RunRecord, UnmatchedFieldEvent,
};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS attempts (
    attempt_id TEXT NOT NULL,
    platform TEXT NOT NULL,
    job_id TEXT NOT NULL,
    job_title TEXT NOT NULL,
    company TEXT NOT NULL,
    job_url TEXT NOT NULL,
    outcome TEXT NOT NULL,
    error_detail TEXT,
    created_at TEXT NOT NULL,
    run_id TEXT NOT NULL,
    PRIMARY KEY (platform, job_id, attempt_id)
);
CREATE INDEX IF NOT EXISTS idx_attempts_pair ON attempts(platform, job_id);

CREATE TRIGGER IF NOT EXISTS attempts_no_update BEFORE UPDATE ON attempts
BEGIN
    SELECT RAISE(ABORT, 'attempts are append-only');
END;
CREATE TRIGGER IF NOT EXISTS attempts_no_delete BEFORE DELETE ON attempts
BEGIN
    SELECT RAISE(ABORT, 'attempts are append-only');
END;

CREATE VIEW IF NOT EXISTS latest_attempts AS
    SELECT a.rowid AS seq, a.* FROM attempts a
    WHERE a.rowid = (
        SELECT MAX(b.rowid) FROM attempts b
        WHERE b.platform = a.platform AND b.job_id = a.job_id
    );

CREATE TABLE IF NOT EXISTS runs (
    run_id TEXT PRIMARY KEY,
    started_at TEXT NOT NULL,
    completed_at TEXT,
    summary TEXT
);

CREATE TABLE IF NOT EXISTS unmatched_fields (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    platform TEXT NOT NULL,
    job_id TEXT NOT NULL,
    label TEXT NOT NULL,
    field_kind TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_unmatched_platform ON unmatched_fields(platform);
";

const ATTEMPT_COLUMNS: &str =
    "attempt_id, platform, job_id, job_title, company, job_url, outcome, error_detail, created_at, run_id";

/// SQLite 账本
#[derive(Clone)]
pub struct SqliteLedger {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteLedger {
    /// 打开（不存在则创建）账本文件并初始化表结构
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                if let Err(e) = std::fs::create_dir_all(parent) {
                    tracing::warn!(path = %parent.display(), error = %e, "Failed to create ledger directory");
                }
            }
        }
        let conn = Connection::open(path.as_ref())?;
        let _mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        conn.execute_batch(SCHEMA)?;
        tracing::info!(path = %path.as_ref().display(), "ledger opened");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 只读连接（分析 / 报表端），不与写者互斥
    pub fn open_read_only(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let conn = Connection::open_with_flags(
            path.as_ref(),
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 内存数据库（测试）
    pub fn in_memory() -> Result<Self, LedgerError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, LedgerError>
    where
        F: FnOnce(&Connection) -> Result<T, LedgerError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().map_err(|_| LedgerError::Poisoned)?;
            f(&guard)
        })
        .await
        .map_err(|e| LedgerError::Join(e.to_string()))?
    }
}

fn row_to_attempt(row: &Row<'_>) -> rusqlite::Result<AttemptRecord> {
    let outcome: String = row.get("outcome")?;
    let outcome = outcome.parse::<Outcome>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(AttemptRecord {
        attempt_id: row.get("attempt_id")?,
        platform: row.get("platform")?,
        job_id: row.get("job_id")?,
        job_title: row.get("job_title")?,
        company: row.get("company")?,
        job_url: row.get("job_url")?,
        outcome,
        error_detail: row.get("error_detail")?,
        timestamp: row.get("created_at")?,
        run_id: row.get("run_id")?,
    })
}

fn row_to_unmatched(row: &Row<'_>) -> rusqlite::Result<UnmatchedFieldEvent> {
    Ok(UnmatchedFieldEvent {
        platform: row.get("platform")?,
        job_id: row.get("job_id")?,
        label: row.get("label")?,
        field_kind: row.get("field_kind")?,
        timestamp: row.get("created_at")?,
    })
}

#[async_trait]
impl Ledger for SqliteLedger {
    async fn has_applied(&self, platform: &str, job_id: &str) -> Result<bool, LedgerError> {
        let platform = platform.to_string();
        let job_id = job_id.to_string();
        self.with_conn(move |conn| {
            let applied: bool = conn.query_row(
                "SELECT EXISTS(
                    SELECT 1 FROM attempts
                    WHERE platform = ?1 AND job_id = ?2
                      AND outcome IN (?3, ?4, ?5)
                )",
                params![
                    platform,
                    job_id,
                    Outcome::APPLIED[0].as_str(),
                    Outcome::APPLIED[1].as_str(),
                    Outcome::APPLIED[2].as_str()
                ],
                |row| row.get(0),
            )?;
            Ok(applied)
        })
        .await
    }

    async fn record_attempt(&self, record: &AttemptRecord) -> Result<(), LedgerError> {
        let r = record.clone();
        self.with_conn(move |conn| {
            conn.execute(
                &format!("INSERT INTO attempts ({ATTEMPT_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"),
                params![
                    r.attempt_id,
                    r.platform,
                    r.job_id,
                    r.job_title,
                    r.company,
                    r.job_url,
                    r.outcome.as_str(),
                    r.error_detail,
                    r.timestamp,
                    r.run_id
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn record_unmatched(&self, event: &UnmatchedFieldEvent) -> Result<(), LedgerError> {
        let e = event.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO unmatched_fields (platform, job_id, label, field_kind, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![e.platform, e.job_id, e.label, e.field_kind, e.timestamp],
            )?;
            Ok(())
        })
        .await
    }

    async fn start_run(&self, run: &RunRecord) -> Result<(), LedgerError> {
        let run_id = run.run_id.clone();
        let started_at = run.started_at;
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO runs (run_id, started_at) VALUES (?1, ?2)",
                params![run_id, started_at],
            )?;
            Ok(())
        })
        .await
    }

    async fn complete_run(
        &self,
        run_id: &str,
        completed_at: DateTime<Utc>,
        platforms: &[PlatformReport],
    ) -> Result<(), LedgerError> {
        let run_id = run_id.to_string();
        let summary = serde_json::to_string(platforms)?;
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE runs SET completed_at = ?2, summary = ?3
                 WHERE run_id = ?1 AND completed_at IS NULL",
                params![run_id, completed_at, summary],
            )?;
            if changed == 1 {
                return Ok(());
            }
            let exists: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM runs WHERE run_id = ?1)",
                params![run_id],
                |row| row.get(0),
            )?;
            if exists {
                Err(LedgerError::RunAlreadyCompleted(run_id))
            } else {
                Err(LedgerError::RunNotFound(run_id))
            }
        })
        .await
    }

    async fn get_run(&self, run_id: &str) -> Result<Option<RunRecord>, LedgerError> {
        let run_id = run_id.to_string();
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    "SELECT run_id, started_at, completed_at, summary FROM runs WHERE run_id = ?1",
                    params![run_id],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, DateTime<Utc>>(1)?,
                            row.get::<_, Option<DateTime<Utc>>>(2)?,
                            row.get::<_, Option<String>>(3)?,
                        ))
                    },
                )
                .optional()?;
            let Some((run_id, started_at, completed_at, summary)) = row else {
                return Ok(None);
            };
            let platforms = match summary {
                Some(s) => serde_json::from_str(&s)?,
                None => Vec::new(),
            };
            Ok(Some(RunRecord {
                run_id,
                started_at,
                completed_at,
                platforms,
            }))
        })
        .await
    }

    async fn attempts_for(&self, platform: &str, job_id: &str) -> Result<Vec<AttemptRecord>, LedgerError> {
        let platform = platform.to_string();
        let job_id = job_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {ATTEMPT_COLUMNS} FROM attempts
                 WHERE platform = ?1 AND job_id = ?2 ORDER BY rowid"
            ))?;
            let rows = stmt
                .query_map(params![platform, job_id], row_to_attempt)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    async fn latest_attempts(&self, platform: Option<&str>) -> Result<Vec<AttemptRecord>, LedgerError> {
        let platform = platform.map(|p| p.to_string());
        self.with_conn(move |conn| {
            let rows = match platform {
                Some(p) => {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {ATTEMPT_COLUMNS} FROM latest_attempts WHERE platform = ?1 ORDER BY seq"
                    ))?;
                    let rows = stmt
                        .query_map(params![p], row_to_attempt)?
                        .collect::<Result<Vec<_>, _>>()?;
                    rows
                }
                None => {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {ATTEMPT_COLUMNS} FROM latest_attempts ORDER BY seq"
                    ))?;
                    let rows = stmt
                        .query_map([], row_to_attempt)?
                        .collect::<Result<Vec<_>, _>>()?;
                    rows
                }
            };
            Ok(rows)
        })
        .await
    }

    async fn unmatched_events(&self, platform: Option<&str>) -> Result<Vec<UnmatchedFieldEvent>, LedgerError> {
        let platform = platform.map(|p| p.to_string());
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT platform, job_id, label, field_kind, created_at FROM unmatched_fields
                 WHERE ?1 IS NULL OR platform = ?1 ORDER BY id",
            )?;
            let rows = stmt
                .query_map(params![platform], row_to_unmatched)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }
}

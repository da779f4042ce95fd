//! 内存账本（测试与演练，不落盘）

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{AttemptRecord, Ledger, LedgerError, PlatformReport, RunRecord, UnmatchedFieldEvent};

#[derive(Debug, Default)]
struct Inner {
    attempts: Vec<AttemptRecord>,
    unmatched: Vec<UnmatchedFieldEvent>,
    runs: Vec<RunRecord>,
}

/// 内存账本：语义与 SqliteLedger 一致（追加、OR 幂等、运行只完成一次）
#[derive(Debug, Default)]
pub struct MemoryLedger {
    inner: RwLock<Inner>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// 全部尝试记录（写入顺序）
    pub async fn all_attempts(&self) -> Vec<AttemptRecord> {
        self.inner.read().await.attempts.clone()
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn has_applied(&self, platform: &str, job_id: &str) -> Result<bool, LedgerError> {
        let inner = self.inner.read().await;
        Ok(inner
            .attempts
            .iter()
            .any(|a| a.platform == platform && a.job_id == job_id && a.outcome.counts_as_applied()))
    }

    async fn record_attempt(&self, record: &AttemptRecord) -> Result<(), LedgerError> {
        self.inner.write().await.attempts.push(record.clone());
        Ok(())
    }

    async fn record_unmatched(&self, event: &UnmatchedFieldEvent) -> Result<(), LedgerError> {
        self.inner.write().await.unmatched.push(event.clone());
        Ok(())
    }

    async fn start_run(&self, run: &RunRecord) -> Result<(), LedgerError> {
        self.inner.write().await.runs.push(run.clone());
        Ok(())
    }

    async fn complete_run(
        &self,
        run_id: &str,
        completed_at: DateTime<Utc>,
        platforms: &[PlatformReport],
    ) -> Result<(), LedgerError> {
        let mut inner = self.inner.write().await;
        let run = inner
            .runs
            .iter_mut()
            .find(|r| r.run_id == run_id)
            .ok_or_else(|| LedgerError::RunNotFound(run_id.to_string()))?;
        if run.completed_at.is_some() {
            return Err(LedgerError::RunAlreadyCompleted(run_id.to_string()));
        }
        run.completed_at = Some(completed_at);
        run.platforms = platforms.to_vec();
        Ok(())
    }

    async fn get_run(&self, run_id: &str) -> Result<Option<RunRecord>, LedgerError> {
        let inner = self.inner.read().await;
        Ok(inner.runs.iter().find(|r| r.run_id == run_id).cloned())
    }

    async fn attempts_for(&self, platform: &str, job_id: &str) -> Result<Vec<AttemptRecord>, LedgerError> {
        let inner = self.inner.read().await;
        Ok(inner
            .attempts
            .iter()
            .filter(|a| a.platform == platform && a.job_id == job_id)
            .cloned()
            .collect())
    }

    async fn latest_attempts(&self, platform: Option<&str>) -> Result<Vec<AttemptRecord>, LedgerError> {
        let inner = self.inner.read().await;
        let mut latest: Vec<AttemptRecord> = Vec::new();
        for a in inner
            .attempts
            .iter()
            .filter(|a| platform.map_or(true, |p| a.platform == p))
        {
            match latest
                .iter_mut()
                .find(|l| l.platform == a.platform && l.job_id == a.job_id)
            {
                Some(slot) => *slot = a.clone(),
                None => latest.push(a.clone()),
            }
        }
        Ok(latest)
    }

    async fn unmatched_events(&self, platform: Option<&str>) -> Result<Vec<UnmatchedFieldEvent>, LedgerError> {
        let inner = self.inner.read().await;
        Ok(inner
            .unmatched
            .iter()
            .filter(|e| platform.map_or(true, |p| e.platform == p))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::JobDescriptor;
    use crate::ledger::Outcome;

    #[tokio::test]
    async fn test_memory_ledger_idempotency() {
        let ledger = MemoryLedger::new();
        let job = JobDescriptor::new("indeed", "abc", "Backend", "Initech", "https://indeed.test/abc");
        ledger
            .record_attempt(&AttemptRecord::for_job("r", &job, Outcome::DryRun, None))
            .await
            .unwrap();
        ledger
            .record_attempt(&AttemptRecord::for_job("r", &job, Outcome::Error, None))
            .await
            .unwrap();
        assert!(ledger.has_applied("indeed", "abc").await.unwrap());
        assert!(!ledger.has_applied("linkedin", "abc").await.unwrap());
        let latest = ledger.latest_attempts(None).await.unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].outcome, Outcome::Error);
    }
}

//! 运行协调器集成测试：会话关闭、空汇总标记、运行记录恰好完成一次、跨运行幂等

mod common;

use std::sync::Arc;

use autoapply::browser::StaticSessionProvider;
use autoapply::config::RunOptions;
use autoapply::core::{NoPacing, RunCoordinator, SnapshotWriter};
use autoapply::ledger::{Ledger, MemoryLedger, SqliteLedger};

use common::{fast_limits, knowledge, zip_site, SEARCH};

fn platforms(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn test_run_report_follows_platform_order() {
    let dir = tempfile::tempdir().unwrap();
    let page = Arc::new(zip_site(&["a", "b"]));
    let sessions = StaticSessionProvider::new(page.clone());
    let ledger = MemoryLedger::new();
    let kb = knowledge();

    let report = RunCoordinator::new(&sessions, &ledger, &kb, &NoPacing)
        .with_limits(fast_limits())
        .with_snapshots(SnapshotWriter::new(dir.path()))
        .run(&platforms(&["ziprecruiter", "monster", "ZipRecruiter"]))
        .await
        .unwrap();

    let names: Vec<&str> = report.platforms.iter().map(|p| p.platform.as_str()).collect();
    assert_eq!(names, vec!["ziprecruiter", "monster"]);
    assert_eq!(report.summary_for("ziprecruiter").map(|s| s.applied), Some(2));
    // 未知平台：空汇总标记
    assert!(report.platforms[1].summary.is_none());
    assert_eq!(report.total_applied(), 2);
    assert!(page.is_closed());

    let run = ledger.get_run(&report.run_id).await.unwrap().unwrap();
    assert_eq!(run.completed_at, Some(report.completed_at));
    assert_eq!(run.platforms, report.platforms);
}

#[tokio::test]
async fn test_login_required_yields_null_summary() {
    let sessions = StaticSessionProvider::logged_out();
    let ledger = MemoryLedger::new();
    let kb = knowledge();

    let report = RunCoordinator::new(&sessions, &ledger, &kb, &NoPacing)
        .with_limits(fast_limits())
        .run(&platforms(&["linkedin", "indeed"]))
        .await
        .unwrap();

    assert_eq!(report.platforms.len(), 2);
    assert!(report.platforms.iter().all(|p| p.summary.is_none()));
    assert!(ledger.all_attempts().await.is_empty());
    let run = ledger.get_run(&report.run_id).await.unwrap().unwrap();
    assert!(run.completed_at.is_some());
}

#[tokio::test]
async fn test_setup_failure_closes_session() {
    let page = Arc::new(zip_site(&["a"]).fail_goto(SEARCH, 1));
    let sessions = StaticSessionProvider::new(page.clone());
    let ledger = MemoryLedger::new();
    let kb = knowledge();

    let report = RunCoordinator::new(&sessions, &ledger, &kb, &NoPacing)
        .with_limits(fast_limits())
        .run(&platforms(&["ziprecruiter"]))
        .await
        .unwrap();

    assert!(report.platforms[0].summary.is_none());
    assert!(page.is_closed());
    assert_eq!(page.submissions(), 0);
}

#[tokio::test]
async fn test_completed_run_cannot_complete_again() {
    let sessions = StaticSessionProvider::logged_out();
    let ledger = MemoryLedger::new();
    let kb = knowledge();

    let report = RunCoordinator::new(&sessions, &ledger, &kb, &NoPacing)
        .run(&platforms(&["indeed"]))
        .await
        .unwrap();
    let again = ledger
        .complete_run(&report.run_id, report.completed_at, &report.platforms)
        .await;
    assert!(again.is_err());
}

#[tokio::test]
async fn test_sqlite_ledger_keeps_runs_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("applications.db");
    let kb = knowledge();

    {
        let ledger = SqliteLedger::open(&db).unwrap();
        let page = Arc::new(zip_site(&["a", "b"]));
        let sessions = StaticSessionProvider::new(page.clone());
        let report = RunCoordinator::new(&sessions, &ledger, &kb, &NoPacing)
            .with_limits(fast_limits())
            .with_snapshots(SnapshotWriter::new(dir.path().join("snapshots")))
            .run(&platforms(&["ziprecruiter"]))
            .await
            .unwrap();
        assert_eq!(report.total_applied(), 2);
    }

    // 重新打开账本，模拟下一次进程启动
    let ledger = SqliteLedger::open(&db).unwrap();
    let page = Arc::new(zip_site(&["a", "b", "c"]));
    let sessions = StaticSessionProvider::new(page.clone());
    let report = RunCoordinator::new(&sessions, &ledger, &kb, &NoPacing)
        .with_limits(fast_limits())
        .with_snapshots(SnapshotWriter::new(dir.path().join("snapshots")))
        .with_options(RunOptions {
            dry_run: false,
            max_applications: 25,
        })
        .run(&platforms(&["ziprecruiter"]))
        .await
        .unwrap();

    let summary = report.summary_for("ziprecruiter").unwrap();
    assert_eq!(summary.applied, 1);
    assert_eq!(summary.skipped, 2);
    assert_eq!(page.submissions(), 1);
    assert_eq!(ledger.attempts_for("ziprecruiter", "a").await.unwrap().len(), 1);
}

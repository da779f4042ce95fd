//! 平台监督器集成测试：幂等跳过、重试上限、封锁锁存、停止令牌

mod common;

use autoapply::browser::{Effect, MockElement, MockField, MockForm, MockStep};
use autoapply::config::{EngineLimits, RunOptions};
use autoapply::discovery::JobDescriptor;
use autoapply::ledger::{AttemptRecord, Ledger, Outcome, PLATFORM_JOB_ID};
use autoapply::platforms::PlatformAdapter;
use autoapply::ApplyError;

use common::{adapter, card, one_click_trigger, options, recaptcha_frame, zip_site, Harness, SEARCH};

fn outcomes(records: &[AttemptRecord], job_id: &str) -> Vec<Outcome> {
    records
        .iter()
        .filter(|r| r.job_id == job_id)
        .map(|r| r.outcome)
        .collect()
}

#[tokio::test]
async fn test_applies_each_listed_job_once() {
    let h = Harness::new();
    let page = zip_site(&["a", "b"]);

    let summary = h.run(&page, options()).await.unwrap();
    assert_eq!(summary.applied, 2);
    assert_eq!(summary.errors, 0);
    assert!(!summary.blocked);
    assert_eq!(page.submissions(), 2);
    assert_eq!(page.field_value("fname").as_deref(), Some("Ada"));

    assert!(h.ledger.has_applied("ziprecruiter", "a").await.unwrap());
    assert!(h.ledger.has_applied("ziprecruiter", "b").await.unwrap());
}

#[tokio::test]
async fn test_second_run_skips_ledgered_jobs() {
    let h = Harness::new();
    let prior = JobDescriptor::new("ziprecruiter", "a", "Rust Engineer a", "Acme", "https://www.ziprecruiter.com/jobs/a");
    h.ledger
        .record_attempt(&AttemptRecord::for_job("earlier-run", &prior, Outcome::Submitted, None))
        .await
        .unwrap();

    let page = zip_site(&["a", "b"]);
    let summary = h.run(&page, options()).await.unwrap();
    assert_eq!(summary.applied, 1);
    assert_eq!(summary.skipped, 1);
    assert_eq!(page.submissions(), 1);
    assert!(!page.log().contains(&"click:card-a".to_string()));

    // 同一账本再跑一次：全部跳过，不再触碰任何表单
    let again = zip_site(&["a", "b"]);
    let summary = h.run(&again, options()).await.unwrap();
    assert_eq!(summary.applied, 0);
    assert_eq!(summary.skipped, 2);
    assert_eq!(again.submissions(), 0);
}

#[tokio::test]
async fn test_transient_failure_retried_then_submitted() {
    let h = Harness::new();
    let a = adapter();
    let page = zip_site(&["a"]).with_elements(a.apply_trigger(), vec![one_click_trigger().fail_clicks(1)]);

    let summary = h.run(&page, options()).await.unwrap();
    assert_eq!(summary.applied, 1);
    assert_eq!(summary.errors, 0);

    let records = h.ledger.all_attempts().await;
    assert_eq!(outcomes(&records, "a"), vec![Outcome::Retrying, Outcome::Submitted]);
    // 恢复时回到列表页
    let listing_visits = page
        .log()
        .iter()
        .filter(|l| l.starts_with(&format!("goto:{SEARCH}")))
        .count();
    assert!(listing_visits >= 2);
}

#[tokio::test]
async fn test_success_on_last_allowed_retry_counts_once() {
    let h = Harness::new();
    assert_eq!(h.limits.max_retries, 2);
    let a = adapter();
    let page = zip_site(&["a"]).with_elements(a.apply_trigger(), vec![one_click_trigger().fail_clicks(2)]);

    let summary = h.run(&page, options()).await.unwrap();
    assert_eq!(summary.applied, 1);
    assert_eq!(page.submissions(), 1);

    let records = h.ledger.all_attempts().await;
    assert_eq!(
        outcomes(&records, "a"),
        vec![Outcome::Retrying, Outcome::Retrying, Outcome::Submitted]
    );
    let countable = records.iter().filter(|r| r.outcome.counts_as_applied()).count();
    assert_eq!(countable, 1);
}

#[tokio::test]
async fn test_retry_bound_records_terminal_error() {
    let h = Harness::new();
    let a = adapter();
    let page = zip_site(&["a"]).with_elements(a.apply_trigger(), vec![one_click_trigger().fail_clicks(10)]);

    let summary = h.run(&page, options()).await.unwrap();
    assert_eq!(summary.applied, 0);
    assert_eq!(summary.errors, 1);

    let records = h.ledger.all_attempts().await;
    assert_eq!(
        outcomes(&records, "a"),
        vec![Outcome::Retrying, Outcome::Retrying, Outcome::Error]
    );
    assert!(!h.ledger.has_applied("ziprecruiter", "a").await.unwrap());
    // 只有终态失败截图
    assert_eq!(page.screenshots().len(), 1);
}

#[tokio::test]
async fn test_zero_retries_fails_on_first_transient_error() {
    let h = Harness::new().with_limits(EngineLimits {
        max_retries: 0,
        ..common::fast_limits()
    });
    let a = adapter();
    let page = zip_site(&["a", "b"]).with_elements(a.apply_trigger(), vec![one_click_trigger().fail_clicks(1)]);

    let summary = h.run(&page, options()).await.unwrap();
    assert_eq!(summary.errors, 1);
    assert_eq!(summary.applied, 1);
    assert_eq!(outcomes(&h.ledger.all_attempts().await, "a"), vec![Outcome::Error]);
    assert_eq!(outcomes(&h.ledger.all_attempts().await, "b"), vec![Outcome::Submitted]);
}

#[tokio::test]
async fn test_challenge_latches_platform() {
    let h = Harness::new();
    let a = adapter();
    let listing = a.listing();
    let page = zip_site(&[]).with_elements(
        listing.card,
        vec![
            card("a"),
            card("b").on_click(vec![
                Effect::AddFrame(recaptcha_frame()),
                Effect::RemoveElements(a.apply_trigger().to_string()),
            ]),
            card("c"),
        ],
    );

    let summary = h.run(&page, options()).await.unwrap();
    assert!(summary.blocked);
    assert_eq!(summary.applied, 1);

    let records = h.ledger.all_attempts().await;
    let blocked: Vec<_> = records.iter().filter(|r| r.outcome == Outcome::Blocked).collect();
    assert_eq!(blocked.len(), 1);
    assert_eq!(blocked[0].job_id, "b");
    assert_eq!(records.last().map(|r| r.outcome), Some(Outcome::Blocked));
    assert!(outcomes(&records, "c").is_empty());
    assert!(!page.log().contains(&"click:card-c".to_string()));
}

#[tokio::test]
async fn test_challenge_on_listing_blocks_before_any_job() {
    let h = Harness::new();
    let page = zip_site(&["a"]).with_frame(recaptcha_frame());

    let summary = h.run(&page, options()).await.unwrap();
    assert!(summary.blocked);
    assert_eq!(summary.applied, 0);

    let records = h.ledger.all_attempts().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].job_id, PLATFORM_JOB_ID);
    assert_eq!(page.submissions(), 0);
}

#[tokio::test]
async fn test_setup_failure_is_returned() {
    let h = Harness::new();
    let page = zip_site(&["a"]).fail_goto(SEARCH, 1);
    let err = h.run(&page, options()).await.unwrap_err();
    assert!(matches!(err, ApplyError::SetupFailure(_)));
    assert!(h.ledger.all_attempts().await.is_empty());
}

#[tokio::test]
async fn test_external_job_recorded_as_skipped() {
    let h = Harness::new();
    let a = adapter();
    let listing = a.listing();
    let page = zip_site(&[]).with_elements(
        listing.card,
        vec![
            card("a"),
            card("x").on_click(vec![Effect::SetElements(
                a.apply_trigger().to_string(),
                vec![MockElement::button("apply-ext", "Apply")],
            )]),
        ],
    );

    let summary = h.run(&page, options()).await.unwrap();
    assert_eq!(summary.applied, 1);
    assert_eq!(summary.skipped, 1);

    let records = h.ledger.all_attempts().await;
    let skipped = records.iter().find(|r| r.job_id == "x").unwrap();
    assert_eq!(skipped.outcome, Outcome::Skipped);
    assert_eq!(skipped.error_detail.as_deref(), Some("external application"));
    assert!(!h.ledger.has_applied("ziprecruiter", "x").await.unwrap());
}

#[tokio::test]
async fn test_max_applications_caps_platform() {
    let h = Harness::new();
    let page = zip_site(&["a", "b", "c"]);
    let summary = h
        .run(&page, RunOptions { dry_run: false, max_applications: 2 })
        .await
        .unwrap();
    assert_eq!(summary.applied, 2);
    assert_eq!(page.submissions(), 2);
    assert!(outcomes(&h.ledger.all_attempts().await, "c").is_empty());
}

#[tokio::test]
async fn test_dry_run_fills_but_never_submits() {
    let h = Harness::new();
    let page = zip_site(&["a"]);
    let summary = h
        .run(&page, RunOptions { dry_run: true, max_applications: 25 })
        .await
        .unwrap();
    assert_eq!(summary.applied, 1);
    assert_eq!(page.submissions(), 0);
    assert!(!page.is_form_open());
    assert_eq!(page.field_value("email").as_deref(), Some("ada@example.com"));
    assert_eq!(page.screenshots().len(), 1);
    assert_eq!(outcomes(&h.ledger.all_attempts().await, "a"), vec![Outcome::DryRun]);
}

#[tokio::test]
async fn test_stop_token_checked_before_next_job() {
    let h = Harness::new();
    h.cancel.cancel();
    let page = zip_site(&["a", "b"]);
    let summary = h.run(&page, options()).await.unwrap();
    assert_eq!(summary.applied, 0);
    assert_eq!(page.submissions(), 0);
    assert!(h.ledger.all_attempts().await.is_empty());
}

#[tokio::test]
async fn test_challenge_inside_form_aborts_without_navigation() {
    let h = Harness::new();
    let a = adapter();
    let gated = MockForm::new(
        a.form_scope(),
        vec![MockStep::new(vec![MockField::text("fname", "First name")], vec![])],
    );
    let trigger = MockElement::button("apply", "1-Click Apply").on_click(vec![
        Effect::SetBodyText("Please verify you are human".into()),
        Effect::OpenForm(gated),
    ]);
    let page = zip_site(&["a", "b"]).with_elements(a.apply_trigger(), vec![trigger]);

    let summary = h.run(&page, options()).await.unwrap();
    assert!(summary.blocked);
    assert_eq!(summary.applied, 0);
    assert_eq!(outcomes(&h.ledger.all_attempts().await, "a"), vec![Outcome::Blocked]);
    assert!(outcomes(&h.ledger.all_attempts().await, "b").is_empty());

    // 挑战出现后不关闭弹窗、不导航
    let log = page.log();
    let clicked = log.iter().position(|l| l == "click:apply").unwrap();
    let after: Vec<&String> = log[clicked + 1..]
        .iter()
        .filter(|l| *l == "escape" || l.starts_with("goto:"))
        .collect();
    assert!(after.is_empty(), "actions after challenge: {after:?}");
    assert!(page.is_form_open());
    assert_eq!(page.screenshots().len(), 1);
}

#[tokio::test]
async fn test_applied_badge_recorded_as_already_applied() {
    let h = Harness::new();
    let a = adapter();
    let listing = a.listing();
    let badge = "[data-testid='applied-badge']";
    let page = zip_site(&[]).with_elements(
        listing.card,
        vec![
            card("a").on_click(vec![Effect::SetElements(
                badge.to_string(),
                vec![MockElement::new("badge", "span").text("Applied")],
            )]),
            card("b").on_click(vec![Effect::RemoveElements(badge.to_string())]),
        ],
    );

    let summary = h.run(&page, options()).await.unwrap();
    assert_eq!(summary.applied, 1);
    assert_eq!(summary.skipped, 1);
    assert_eq!(page.submissions(), 1);

    let records = h.ledger.all_attempts().await;
    assert_eq!(outcomes(&records, "a"), vec![Outcome::AlreadyApplied]);
    assert!(h.ledger.has_applied("ziprecruiter", "a").await.unwrap());
    assert_eq!(outcomes(&records, "b"), vec![Outcome::Submitted]);
}

#[tokio::test]
async fn test_applied_trigger_text_recorded_as_already_applied() {
    let h = Harness::new();
    let a = adapter();
    let page = zip_site(&["a"]).with_elements(a.apply_trigger(), vec![MockElement::button("apply", "Applied")]);

    let summary = h.run(&page, options()).await.unwrap();
    assert_eq!(summary.applied, 0);
    assert_eq!(page.submissions(), 0);
    assert!(!page.log().contains(&"click:apply".to_string()));

    let records = h.ledger.all_attempts().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].outcome, Outcome::AlreadyApplied);
    assert!(h.ledger.has_applied("ziprecruiter", "a").await.unwrap());
}

#[tokio::test]
async fn test_reloaded_listing_still_reaches_later_batches() {
    let h = Harness::new();
    let a = adapter();
    let listing = a.listing();
    let batch = |el: MockElement| Effect::AppendElements(listing.card.to_string(), vec![el]);
    // d 出现在第 3 次滚动之后，第一次点击申请失败，恢复时列表页被重新加载
    let flaky = card("d").on_click(vec![Effect::SetElements(
        a.apply_trigger().to_string(),
        vec![one_click_trigger().fail_clicks(1)],
    )]);
    let page = zip_site(&["a"])
        .resets_on_reload(&[listing.card])
        .on_scroll(vec![batch(card("b"))])
        .on_scroll(vec![batch(card("c"))])
        .on_scroll(vec![batch(flaky)])
        .on_scroll(vec![batch(card("e"))]);

    let summary = h.run(&page, options()).await.unwrap();
    assert_eq!(summary.applied, 5);
    assert_eq!(summary.errors, 0);
    assert_eq!(page.submissions(), 5);

    let records = h.ledger.all_attempts().await;
    assert_eq!(outcomes(&records, "d"), vec![Outcome::Retrying, Outcome::Submitted]);
    assert_eq!(outcomes(&records, "e"), vec![Outcome::Submitted]);
}

//! 多步申请表状态机
//!
//! 每一步：填写字段 → 平台微调 → 计算步骤指纹（重复即判定为卡住）→ 找按钮。
//! 提交类按钮优先于继续类按钮；演练模式在提交前截图并关闭表单。
//! 既无提交也无继续按钮时先检查挑战，否则按瞬时失败处理。

use std::collections::HashSet;
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::browser::{button_matches, ElementInfo, Page};
use crate::config::EngineLimits;
use crate::core::error::ApplyError;
use crate::core::pacing::{Pacing, PauseKind};
use crate::core::snapshot::SnapshotWriter;
use crate::discovery::JobDescriptor;
use crate::fields::{FieldResolver, FillReport};
use crate::ledger::{Ledger, UnmatchedFieldEvent};
use crate::platforms::{PlatformAdapter, SurfaceOpen};

use super::state::{StepFingerprint, StepState};

/// 等待提交确认时的轮询间隔
const CONFIRMATION_POLL: Duration = Duration::from_millis(500);

/// 单个职位的流程结果（不含错误）
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// 已提交；confirmed 为是否在超时内观察到确认
    Submitted { confirmed: bool, steps: usize },
    DryRun { steps: usize },
    AlreadyApplied,
    /// 非一键申请等，附原因
    Unavailable(String),
}

/// 状态机运行所需的上下文（均为借用）
pub struct ApplySession<'a> {
    pub page: &'a dyn Page,
    pub adapter: &'a dyn PlatformAdapter,
    pub resolver: &'a FieldResolver<'a>,
    pub ledger: &'a dyn Ledger,
    pub pacing: &'a dyn Pacing,
    pub snapshots: &'a SnapshotWriter,
    pub limits: &'a EngineLimits,
    pub dry_run: bool,
}

enum StepAction {
    Submit(ElementInfo),
    Continue(ElementInfo),
}

/// 单个职位的步骤状态机
pub struct StepMachine<'s, 'a> {
    session: &'s ApplySession<'a>,
    state: StepState,
    seen: HashSet<StepFingerprint>,
}

impl<'s, 'a> StepMachine<'s, 'a> {
    pub fn new(session: &'s ApplySession<'a>) -> Self {
        Self {
            session,
            state: StepState::Idle,
            seen: HashSet::new(),
        }
    }

    pub fn state(&self) -> &StepState {
        &self.state
    }

    fn transition(&mut self, next: StepState) {
        debug!(from = %self.state, to = %next, "Step transition");
        self.state = next;
    }

    pub async fn run(&mut self, job: &JobDescriptor) -> Result<JobOutcome, ApplyError> {
        let result = self.drive(job).await;
        if result.is_err() && self.state != StepState::Cycled {
            self.transition(StepState::Failed);
        }
        result
    }

    async fn drive(&mut self, job: &JobDescriptor) -> Result<JobOutcome, ApplyError> {
        let s = self.session;
        match s.adapter.open_surface(s.page, job, s.limits.element_timeout).await? {
            SurfaceOpen::AlreadyApplied => return Ok(JobOutcome::AlreadyApplied),
            SurfaceOpen::Unavailable(reason) => return Ok(JobOutcome::Unavailable(reason)),
            SurfaceOpen::Opened => self.transition(StepState::SurfaceOpened),
        }

        let scope = s.adapter.form_scope();
        for step in 1..=s.limits.max_steps {
            self.transition(StepState::StepRendered(step));

            let report = s.resolver.fill_surface(s.page, scope).await;
            self.record_unmatched(job, &report).await;
            if let Err(e) = s.adapter.adjust_step(s.page).await {
                warn!(job_id = %job.job_id, error = %e, "Platform step adjustment failed");
            }

            // 空指纹不参与循环判断，由步数上限兜底
            let fingerprint = StepFingerprint::from_labels(&report.labels);
            if !fingerprint.is_empty() && !self.seen.insert(fingerprint.clone()) {
                self.transition(StepState::Cycled);
                return Err(ApplyError::ValidationStuck(format!(
                    "step {step} repeated fingerprint {fingerprint}"
                )));
            }

            match self.next_action().await? {
                Some(StepAction::Submit(button)) => {
                    if s.dry_run {
                        s.snapshots.capture(s.page, &job.platform, &job.job_id).await;
                        if let Err(e) = s.adapter.dismiss(s.page).await {
                            warn!(job_id = %job.job_id, error = %e, "Failed to dismiss form after dry run");
                        }
                        self.transition(StepState::DryRunComplete);
                        return Ok(JobOutcome::DryRun { steps: step });
                    }

                    s.page.click(&button.handle).await?;
                    s.pacing.pause(PauseKind::Settle).await;
                    let confirmed = self.await_confirmation().await;
                    if !confirmed {
                        warn!(job_id = %job.job_id, "Submission confirmation not observed in time");
                    }
                    self.transition(StepState::Submitted);
                    if let Err(e) = s.adapter.dismiss(s.page).await {
                        debug!(error = %e, "Post-submit dismiss failed");
                    }
                    info!(platform = %job.platform, job_id = %job.job_id, steps = step, confirmed, "Application submitted");
                    return Ok(JobOutcome::Submitted { confirmed, steps: step });
                }
                Some(StepAction::Continue(button)) => {
                    s.page.click(&button.handle).await?;
                    s.pacing.pause(PauseKind::Settle).await;
                    if self.validation_errors_visible().await {
                        self.transition(StepState::ValidationBlocked(step));
                    } else {
                        self.transition(StepState::Advanced(step));
                    }
                }
                None => {
                    if let Some(reason) = s.adapter.detect_block(s.page).await? {
                        return Err(ApplyError::BlockDetected(reason));
                    }
                    return Err(ApplyError::TransientStepFailure(format!(
                        "no actionable button on step {step}"
                    )));
                }
            }
        }

        Err(ApplyError::ValidationStuck(format!(
            "exceeded step ceiling of {}",
            s.limits.max_steps
        )))
    }

    /// 提交类按钮优先于继续类按钮
    async fn next_action(&self) -> Result<Option<StepAction>, ApplyError> {
        let s = self.session;
        let buttons: Vec<ElementInfo> = s
            .page
            .find_buttons(s.adapter.form_scope())
            .await?
            .into_iter()
            .filter(|b| b.visible && b.enabled)
            .collect();

        if let Some(b) = buttons.iter().find(|b| button_matches(b, s.adapter.submit_labels())) {
            return Ok(Some(StepAction::Submit(b.clone())));
        }
        if let Some(b) = buttons.iter().find(|b| button_matches(b, s.adapter.continue_labels())) {
            return Ok(Some(StepAction::Continue(b.clone())));
        }
        Ok(None)
    }

    async fn validation_errors_visible(&self) -> bool {
        let s = self.session;
        let Some(selector) = s.adapter.validation_error_selector() else {
            return false;
        };
        match s.page.find_elements(selector).await {
            Ok(els) => els.iter().any(|e| e.visible),
            Err(_) => false,
        }
    }

    /// 在超时内轮询确认；检测出错按未确认处理
    async fn await_confirmation(&self) -> bool {
        let s = self.session;
        let deadline = Instant::now() + s.limits.confirmation_timeout;
        loop {
            match s.adapter.detect_confirmation(s.page).await {
                Ok(true) => return true,
                Ok(false) => {}
                Err(e) => debug!(error = %e, "Confirmation check failed"),
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            tokio::time::sleep(CONFIRMATION_POLL.min(deadline - now)).await;
        }
    }

    async fn record_unmatched(&self, job: &JobDescriptor, report: &FillReport) {
        for field in &report.unmatched {
            let event = UnmatchedFieldEvent {
                platform: job.platform.clone(),
                job_id: job.job_id.clone(),
                label: field.label.clone(),
                field_kind: field.kind.as_str().to_string(),
                timestamp: Utc::now(),
            };
            if let Err(e) = self.session.ledger.record_unmatched(&event).await {
                warn!(label = %field.label, error = %e, "Failed to record unmatched field");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::{Effect, MockElement, MockField, MockForm, MockPage, MockStep};
    use crate::core::pacing::NoPacing;
    use crate::fields::AnswerKnowledgeBase;
    use crate::ledger::MemoryLedger;
    use crate::platforms::IndeedAdapter;

    fn limits() -> EngineLimits {
        EngineLimits {
            listing_timeout: Duration::ZERO,
            element_timeout: Duration::ZERO,
            confirmation_timeout: Duration::ZERO,
            ..EngineLimits::default()
        }
    }

    fn job() -> JobDescriptor {
        JobDescriptor::new("indeed", "jk1", "Backend Engineer", "Initech", "https://www.indeed.com/viewjob?jk=jk1")
    }

    fn page_with(form: MockForm) -> MockPage {
        MockPage::new("https://www.indeed.com/jobs?q=rust").with_elements(
            IndeedAdapter.apply_trigger(),
            vec![MockElement::button("apply", "Apply now").on_click(vec![Effect::OpenForm(form)])],
        )
    }

    fn next(step: usize) -> MockElement {
        MockElement::button(&format!("next-{step}"), "Continue").on_click(vec![Effect::GotoStep(step)])
    }

    struct Fixture {
        kb: AnswerKnowledgeBase,
        ledger: MemoryLedger,
        snapshots: SnapshotWriter,
        limits: EngineLimits,
        _dir: tempfile::TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            Self {
                kb: AnswerKnowledgeBase::from_pairs([("First name", "Ada"), ("Phone", "555-0100")]),
                ledger: MemoryLedger::new(),
                snapshots: SnapshotWriter::new(dir.path()),
                limits: limits(),
                _dir: dir,
            }
        }

        async fn run(&self, page: &MockPage, dry_run: bool) -> Result<JobOutcome, ApplyError> {
            let resolver = FieldResolver::new(&self.kb, &NoPacing);
            let session = ApplySession {
                page,
                adapter: &IndeedAdapter,
                resolver: &resolver,
                ledger: &self.ledger,
                pacing: &NoPacing,
                snapshots: &self.snapshots,
                limits: &self.limits,
                dry_run,
            };
            StepMachine::new(&session).run(&job()).await
        }
    }

    #[tokio::test]
    async fn test_cycle_detected_on_repeat_fingerprint() {
        let fx = Fixture::new();
        let form = MockForm::new(
            IndeedAdapter.form_scope(),
            vec![
                MockStep::new(vec![MockField::text("fname", "First name")], vec![next(1)]),
                MockStep::new(vec![MockField::text("phone", "Phone")], vec![next(0)]),
            ],
        );
        let page = page_with(form);
        let err = fx.run(&page, false).await.unwrap_err();
        assert!(matches!(err, ApplyError::ValidationStuck(_)));
        assert_eq!(page.rendered_steps(), vec![0, 1, 0]);
        assert_eq!(page.submissions(), 0);
    }

    #[tokio::test]
    async fn test_consecutive_fieldless_steps_are_not_a_cycle() {
        let fx = Fixture::new();
        let form = MockForm::new(
            IndeedAdapter.form_scope(),
            vec![
                MockStep::new(vec![MockField::text("fname", "First name")], vec![next(1)]),
                // 简历卡片页
                MockStep::new(vec![], vec![next(2)]),
                // 审核页
                MockStep::new(
                    vec![],
                    vec![MockElement::button("submit", "Submit your application").on_click(vec![
                        Effect::Submit,
                        Effect::SetBodyText("Your application has been submitted!".into()),
                    ])],
                ),
            ],
        );
        let page = page_with(form);
        let outcome = fx.run(&page, false).await.unwrap();
        assert_eq!(outcome, JobOutcome::Submitted { confirmed: true, steps: 3 });
        assert_eq!(page.rendered_steps(), vec![0, 1, 2]);
        assert_eq!(page.submissions(), 1);
    }

    #[tokio::test]
    async fn test_fieldless_loop_stops_at_step_ceiling() {
        let fx = Fixture::new();
        let form = MockForm::new(IndeedAdapter.form_scope(), vec![MockStep::new(vec![], vec![next(0)])]);
        let page = page_with(form);
        let err = fx.run(&page, false).await.unwrap_err();
        assert!(matches!(err, ApplyError::ValidationStuck(ref m) if m.contains("ceiling")));
        assert_eq!(page.submissions(), 0);
    }

    #[tokio::test]
    async fn test_step_ceiling() {
        let fx = Fixture::new();
        let steps: Vec<MockStep> = (0..15)
            .map(|i| MockStep::new(vec![MockField::text(&format!("f{i}"), &format!("Question {i}"))], vec![next(i + 1)]))
            .collect();
        let page = page_with(MockForm::new(IndeedAdapter.form_scope(), steps));
        let err = fx.run(&page, false).await.unwrap_err();
        assert!(matches!(err, ApplyError::ValidationStuck(ref m) if m.contains("ceiling")));
        // 第 11 次渲染的步骤不再处理
        assert_eq!(page.rendered_steps().len(), fx.limits.max_steps + 1);
        let unmatched = fx.ledger.unmatched_events(Some("indeed")).await.unwrap();
        assert_eq!(unmatched.len(), fx.limits.max_steps);
    }

    #[tokio::test]
    async fn test_dry_run_never_submits() {
        let fx = Fixture::new();
        let form = MockForm::new(
            IndeedAdapter.form_scope(),
            vec![
                MockStep::new(vec![MockField::text("fname", "First name")], vec![next(1)]),
                MockStep::new(
                    vec![MockField::text("phone", "Phone")],
                    vec![
                        MockElement::button("close", "Close").on_click(vec![Effect::CloseForm]),
                        MockElement::button("submit", "Submit your application").on_click(vec![Effect::Submit]),
                    ],
                ),
            ],
        );
        let page = page_with(form);
        let outcome = fx.run(&page, true).await.unwrap();
        assert_eq!(outcome, JobOutcome::DryRun { steps: 2 });
        assert_eq!(page.submissions(), 0);
        assert_eq!(page.screenshots().len(), 1);
        assert!(!page.is_form_open());
        assert_eq!(page.field_value("fname").as_deref(), Some("Ada"));
        assert_eq!(page.field_value("phone").as_deref(), Some("555-0100"));
    }

    #[tokio::test]
    async fn test_submit_prefers_submit_over_continue() {
        let fx = Fixture::new();
        let form = MockForm::new(
            IndeedAdapter.form_scope(),
            vec![MockStep::new(
                vec![MockField::text("fname", "First name")],
                vec![
                    next(0),
                    MockElement::button("submit", "Submit your application").on_click(vec![
                        Effect::Submit,
                        Effect::SetBodyText("Your application has been submitted!".into()),
                    ]),
                ],
            )],
        );
        let page = page_with(form);
        let outcome = fx.run(&page, false).await.unwrap();
        assert_eq!(outcome, JobOutcome::Submitted { confirmed: true, steps: 1 });
        assert_eq!(page.submissions(), 1);
    }

    #[tokio::test]
    async fn test_unconfirmed_submit_is_still_submitted() {
        let fx = Fixture::new();
        let form = MockForm::new(
            IndeedAdapter.form_scope(),
            vec![MockStep::new(
                vec![],
                vec![MockElement::button("submit", "Submit").on_click(vec![Effect::Submit])],
            )],
        );
        let page = page_with(form);
        let outcome = fx.run(&page, false).await.unwrap();
        assert_eq!(outcome, JobOutcome::Submitted { confirmed: false, steps: 1 });
    }

    #[tokio::test]
    async fn test_no_button_is_transient_unless_challenged() {
        let fx = Fixture::new();
        let form = || MockForm::new(IndeedAdapter.form_scope(), vec![MockStep::new(vec![], vec![])]);

        let page = page_with(form());
        let err = fx.run(&page, false).await.unwrap_err();
        assert!(matches!(err, ApplyError::TransientStepFailure(_)));

        let page = page_with(form()).with_body_text("Please verify you are human");
        let err = fx.run(&page, false).await.unwrap_err();
        assert!(matches!(err, ApplyError::BlockDetected(_)));
    }

    #[tokio::test]
    async fn test_external_job_is_unavailable() {
        let fx = Fixture::new();
        let page = MockPage::new("https://www.indeed.com/jobs?q=rust").with_elements(
            "#applyButtonLinkContainer",
            vec![MockElement::button("ext", "Apply on company site")],
        );
        let outcome = fx.run(&page, false).await.unwrap();
        assert_eq!(outcome, JobOutcome::Unavailable("external application".into()));
    }

    #[tokio::test]
    async fn test_state_tracks_failure() {
        let fx = Fixture::new();
        let page = MockPage::new("https://www.indeed.com/jobs?q=rust");
        let resolver = FieldResolver::new(&fx.kb, &NoPacing);
        let session = ApplySession {
            page: &page,
            adapter: &IndeedAdapter,
            resolver: &resolver,
            ledger: &fx.ledger,
            pacing: &NoPacing,
            snapshots: &fx.snapshots,
            limits: &fx.limits,
            dry_run: false,
        };
        let mut machine = StepMachine::new(&session);
        assert!(machine.run(&job()).await.is_err());
        assert_eq!(machine.state(), &StepState::Failed);
    }
}

//! 集成测试公共夹具：脚本化的 ZipRecruiter 站点（滚动分页、一步表单）

#![allow(dead_code)]

use std::time::Duration;

use autoapply::browser::{Effect, FrameInfo, MockElement, MockField, MockForm, MockPage, MockStep};
use autoapply::config::{EngineLimits, RunOptions};
use autoapply::core::{run_platform, ApplyError, EngineContext, NoPacing, SnapshotWriter};
use autoapply::discovery::SearchQuery;
use autoapply::ledger::{MemoryLedger, PlatformSummary};
use autoapply::platforms::{PlatformAdapter, ZipRecruiterAdapter};
use autoapply::AnswerKnowledgeBase;
use tokio_util::sync::CancellationToken;

pub const SEARCH: &str = "https://www.ziprecruiter.com/jobs-search";

pub fn adapter() -> ZipRecruiterAdapter {
    ZipRecruiterAdapter
}

pub fn card(id: &str) -> MockElement {
    MockElement::new(&format!("card-{id}"), "article")
        .attr("data-job-id", id)
        .text(&format!("Rust Engineer {id}\nAcme"))
}

pub fn submit_button() -> MockElement {
    MockElement::button("submit", "Submit Application").on_click(vec![
        Effect::Submit,
        Effect::SetBodyText("Application submitted".into()),
    ])
}

pub fn close_button() -> MockElement {
    MockElement::button("close", "Close").on_click(vec![Effect::CloseForm])
}

/// 一步表单：姓名 + 邮箱，关闭与提交按钮
pub fn one_step_form() -> MockForm {
    MockForm::new(
        adapter().form_scope(),
        vec![MockStep::new(
            vec![
                MockField::text("fname", "First name"),
                MockField::text("email", "Email address"),
            ],
            vec![close_button(), submit_button()],
        )],
    )
}

pub fn one_click_trigger() -> MockElement {
    MockElement::button("apply", "1-Click Apply").on_click(vec![Effect::OpenForm(one_step_form())])
}

/// 列表里放好卡片，所有职位共用一个一键申请按钮
pub fn zip_site(ids: &[&str]) -> MockPage {
    let a = adapter();
    let listing = a.listing();
    MockPage::new(SEARCH)
        .with_elements(listing.container, vec![MockElement::new("results", "div")])
        .with_elements(listing.card, ids.iter().map(|id| card(id)).collect())
        .with_elements(a.apply_trigger(), vec![one_click_trigger()])
}

pub fn recaptcha_frame() -> FrameInfo {
    FrameInfo {
        src: "https://www.google.com/recaptcha/api2/bframe?k=site".into(),
        title: "recaptcha challenge expires in two minutes".into(),
        visible: true,
        width: 400.0,
        height: 580.0,
    }
}

pub fn fast_limits() -> EngineLimits {
    EngineLimits {
        listing_timeout: Duration::ZERO,
        element_timeout: Duration::ZERO,
        confirmation_timeout: Duration::ZERO,
        ..EngineLimits::default()
    }
}

pub fn knowledge() -> AnswerKnowledgeBase {
    AnswerKnowledgeBase::from_pairs([("First name", "Ada"), ("Email", "ada@example.com")])
}

/// 直接驱动 run_platform 的测试装置
pub struct Harness {
    pub kb: AnswerKnowledgeBase,
    pub ledger: MemoryLedger,
    pub snapshots: SnapshotWriter,
    pub limits: EngineLimits,
    pub cancel: CancellationToken,
    _dir: tempfile::TempDir,
}

impl Harness {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        Self {
            kb: knowledge(),
            ledger: MemoryLedger::new(),
            snapshots: SnapshotWriter::new(dir.path()),
            limits: fast_limits(),
            cancel: CancellationToken::new(),
            _dir: dir,
        }
    }

    pub fn with_limits(mut self, limits: EngineLimits) -> Self {
        self.limits = limits;
        self
    }

    pub async fn run(&self, page: &MockPage, options: RunOptions) -> Result<PlatformSummary, ApplyError> {
        let ctx = EngineContext {
            run_id: "run-test",
            kb: &self.kb,
            ledger: &self.ledger,
            pacing: &NoPacing,
            snapshots: &self.snapshots,
            limits: &self.limits,
            resume_path: None,
            cancel: self.cancel.clone(),
        };
        run_platform(page, &adapter(), &ctx, &SearchQuery::default(), &options).await
    }
}

pub fn options() -> RunOptions {
    RunOptions {
        dry_run: false,
        max_applications: 25,
    }
}

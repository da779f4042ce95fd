//! 步骤状态与步骤指纹

use std::collections::BTreeSet;
use std::fmt;

/// 单个申请流程的状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepState {
    Idle,
    SurfaceOpened,
    /// 第 n 步已渲染（从 1 开始）
    StepRendered(usize),
    /// 点击继续后出现内联校验错误
    ValidationBlocked(usize),
    Advanced(usize),
    Submitted,
    DryRunComplete,
    /// 指纹重复
    Cycled,
    Failed,
}

impl fmt::Display for StepState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepState::Idle => write!(f, "idle"),
            StepState::SurfaceOpened => write!(f, "surface-opened"),
            StepState::StepRendered(n) => write!(f, "step-rendered({n})"),
            StepState::ValidationBlocked(n) => write!(f, "validation-blocked({n})"),
            StepState::Advanced(n) => write!(f, "advanced({n})"),
            StepState::Submitted => write!(f, "submitted"),
            StepState::DryRunComplete => write!(f, "dry-run-complete"),
            StepState::Cycled => write!(f, "cycled"),
            StepState::Failed => write!(f, "failed"),
        }
    }
}

/// 步骤指纹：可见字段归一化标签的有序集合
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StepFingerprint(Vec<String>);

impl StepFingerprint {
    pub fn from_labels(labels: &BTreeSet<String>) -> Self {
        Self(labels.iter().cloned().collect())
    }

    /// 没有可扫描字段的步骤（简历卡片、审核页）彼此无法区分
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for StepFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.0.join(" | "))
    }
}

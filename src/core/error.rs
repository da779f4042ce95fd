//! 申请引擎错误类型与恢复动作
//!
//! 与 RecoveryEngine 配合：根据 ApplyError 决定 Retry / RecordError / RecordAlreadyApplied / AbortPlatform。

use thiserror::Error;

use crate::browser::DriverError;
use crate::ledger::LedgerError;

/// 申请过程中可能出现的错误（平台级 / 任务级 / 账本）
#[derive(Error, Debug)]
pub enum ApplyError {
    /// 列表页始终未出现：平台终止，不重试
    #[error("Setup failure: {0}")]
    SetupFailure(String),

    /// 反自动化挑战：平台终止并锁存，不重试
    #[error("Block detected: {0}")]
    BlockDetected(String),

    /// 步骤指纹重复或超过步数上限：任务终止
    #[error("Validation stuck: {0}")]
    ValidationStuck(String),

    /// 选择器 / 超时 / 导航抖动：任务可重试
    #[error("Transient step failure: {0}")]
    TransientStepFailure(String),

    /// 平台自身提示已申请过
    #[error("Already handled by platform")]
    AlreadyHandled,

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

impl From<DriverError> for ApplyError {
    fn from(e: DriverError) -> Self {
        ApplyError::TransientStepFailure(e.to_string())
    }
}

/// 恢复引擎根据错误类型给出的建议动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 放回当前批次末尾再试
    Retry,
    /// 写终态 error 记录与诊断快照，继续下一个候选
    RecordError,
    /// 写 already_applied 记录
    RecordAlreadyApplied,
    /// 终止整个平台循环
    AbortPlatform,
}

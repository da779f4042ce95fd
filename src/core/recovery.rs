//! 错误恢复引擎
//!
//! 根据 ApplyError 类型与该任务已重试次数返回 RecoveryAction，供监督器决定重试、记终态还是终止平台。

use crate::core::{ApplyError, RecoveryAction};

/// 错误分类：默认可重试，封锁与初始化失败终止平台，卡死记终态
#[derive(Debug)]
pub struct RecoveryEngine {
    max_retries: u32,
}

impl RecoveryEngine {
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// failures 为包括本次在内该任务已失败的次数
    pub fn handle(&self, err: &ApplyError, failures: u32) -> RecoveryAction {
        match err {
            ApplyError::BlockDetected(_) | ApplyError::SetupFailure(_) => RecoveryAction::AbortPlatform,
            ApplyError::AlreadyHandled => RecoveryAction::RecordAlreadyApplied,
            ApplyError::ValidationStuck(_) => RecoveryAction::RecordError,
            ApplyError::TransientStepFailure(_) | ApplyError::Ledger(_) => {
                if failures <= self.max_retries {
                    RecoveryAction::Retry
                } else {
                    RecoveryAction::RecordError
                }
            }
        }
    }
}

impl Default for RecoveryEngine {
    fn default() -> Self {
        Self::new(2)
    }
}

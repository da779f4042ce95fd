//! 会话提供者：按平台交付已登录的页面
//!
//! Cookie 持久化与登录墙检测由实现方负责；引擎只区分「可用」与「需要登录（跳过）」。

use std::sync::Arc;

use async_trait::async_trait;

use super::{DriverError, Page};

/// 打开会话的结果
pub enum SessionState {
    /// 已登录，可直接驱动
    Ready(Arc<dyn Page>),
    /// 登录失效，本平台跳过
    LoginRequired,
}

impl std::fmt::Debug for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Ready(_) => f.write_str("Ready"),
            SessionState::LoginRequired => f.write_str("LoginRequired"),
        }
    }
}

/// 会话提供者 trait
#[async_trait]
pub trait SessionProvider: Send + Sync {
    async fn open(&self, platform: &str) -> Result<SessionState, DriverError>;
}

/// 固定返回同一页面的提供者（测试与单页调试）
pub struct StaticSessionProvider {
    page: Option<Arc<dyn Page>>,
}

impl StaticSessionProvider {
    pub fn new(page: Arc<dyn Page>) -> Self {
        Self { page: Some(page) }
    }

    /// 总是报告登录失效
    pub fn logged_out() -> Self {
        Self { page: None }
    }
}

#[async_trait]
impl SessionProvider for StaticSessionProvider {
    async fn open(&self, _platform: &str) -> Result<SessionState, DriverError> {
        Ok(match &self.page {
            Some(p) => SessionState::Ready(Arc::clone(p)),
            None => SessionState::LoginRequired,
        })
    }
}

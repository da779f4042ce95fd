//! AutoApply - 一键职位申请自动化引擎
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **observability**: tracing 日志初始化
//! - **browser**: 浏览器驱动接缝（Page trait、Mock 页面、Headless Chrome）
//! - **discovery**: 职位发现迭代器（去重、分页、重新排队）
//! - **fields**: 字段解析引擎（标签提取、模糊匹配、逐字段填写）
//! - **flow**: 多步申请表状态机与挑战检测
//! - **platforms**: 各招聘平台适配器
//! - **ledger**: 追加式申请账本（SQLite / 内存）
//! - **core**: 错误与恢复、节奏、快照、平台监督、运行协调

pub mod browser;
pub mod config;
pub mod core;
pub mod discovery;
pub mod fields;
pub mod flow;
pub mod ledger;
pub mod observability;
pub mod platforms;

pub use crate::core::{run_platform, ApplyError, RunCoordinator, RunReport};
pub use discovery::{JobDescriptor, SearchQuery};
pub use fields::AnswerKnowledgeBase;
pub use ledger::{Ledger, MemoryLedger, SqliteLedger};

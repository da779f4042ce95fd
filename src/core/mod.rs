//! 核心编排层：错误与恢复、节奏、快照、停止信号、平台监督、运行协调

pub mod coordinator;
pub mod error;
pub mod pacing;
pub mod recovery;
pub mod shutdown;
pub mod snapshot;
pub mod supervisor;

pub use coordinator::{RunCoordinator, RunReport};
pub use error::{ApplyError, RecoveryAction};
pub use pacing::{pacing_from_config, HumanPacing, NoPacing, Pacing, PauseKind};
pub use recovery::RecoveryEngine;
pub use shutdown::{ShutdownManager, ShutdownReason};
pub use snapshot::SnapshotWriter;
pub use supervisor::{run_platform, EngineContext};

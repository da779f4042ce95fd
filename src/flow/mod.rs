//! 申请流程：步骤状态机、步骤指纹、挑战检测

pub mod block;
pub mod machine;
pub mod state;

pub use block::{BlockDetector, BlockLatch};
pub use machine::{ApplySession, JobOutcome, StepMachine};
pub use state::{StepFingerprint, StepState};

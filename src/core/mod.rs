//! 核心编排层：错误与恢复、状态投影、会话监管、构建器、运行时主控循环

pub mod builder;
pub mod error;
pub mod orchestrator;
pub mod recovery;
pub mod session_supervisor;
pub mod state;

pub use builder::{create_agent_builder, AgentBuilder};
pub use error::{AgentError, RecoveryAction};
pub use orchestrator::{create_agent, AgentHandle, Command, SnapshotView};
pub use recovery::RecoveryEngine;
pub use session_supervisor::SessionSupervisor;
pub use state::{TurnPhase, UiState};

//! 外部仿真会话
//!
//! 执行器通过 SimulationSession 按动作标识逐个调用外部模型；会话本身不保证并发安全，
//! 由执行器串行化。实现：SandboxSession（内存模拟，可注入故障）、RemoteSession（HTTP 桥接进程）。

pub mod remote;
pub mod sandbox;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::snapshot::{ModelSnapshot, StateDelta};

pub use remote::RemoteSession;
pub use sandbox::SandboxSession;

/// 外部会话返回的类型化错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("session busy: {0}")]
    Busy(String),

    #[error("session unavailable: {0}")]
    Unavailable(String),

    #[error("call timed out: {0}")]
    Timeout(String),

    #[error("rejected by session: {0}")]
    Rejected(String),

    #[error("solver diverged: {0}")]
    Diverged(String),

    /// 外部模型状态与调用假设不一致（如对象已被外部删除）
    #[error("state mismatch: {0}")]
    StateMismatch(String),

    #[error("protocol error: {0}")]
    Protocol(String),
}

impl SessionError {
    /// 可自动重试的错误（外部进程暂时忙或连接中断）
    pub fn is_transient(&self) -> bool {
        matches!(self, SessionError::Busy(_) | SessionError::Unavailable(_))
    }

    /// 从错误种类字符串构造（远程桥接进程返回 {kind, message}）
    pub fn from_kind(kind: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        match kind {
            "busy" => SessionError::Busy(message),
            "unavailable" => SessionError::Unavailable(message),
            "timeout" => SessionError::Timeout(message),
            "diverged" => SessionError::Diverged(message),
            "state_mismatch" => SessionError::StateMismatch(message),
            "protocol" => SessionError::Protocol(message),
            _ => SessionError::Rejected(message),
        }
    }
}

/// 单次调用成功的结果：状态变化 + 可选返回值/说明
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionOutcome {
    #[serde(default)]
    pub delta: Option<StateDelta>,
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(default)]
    pub message: Option<String>,
}

impl SessionOutcome {
    pub fn with_delta(delta: StateDelta) -> Self {
        Self {
            delta: Some(delta),
            ..Self::default()
        }
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// 外部仿真会话：按动作标识调用，从执行器视角是同步的一次往返
#[async_trait]
pub trait SimulationSession: Send + Sync {
    /// 会话名称（日志与模型概要使用）
    fn name(&self) -> &str;

    async fn call(
        &self,
        action: &str,
        args: &Map<String, Value>,
    ) -> Result<SessionOutcome, SessionError>;

    /// 完整重新读取外部模型状态
    async fn snapshot(&self) -> Result<ModelSnapshot, SessionError>;

    /// 在会话中载入模型文件（启动时调用一次）
    async fn open(&self, model_path: &str) -> Result<(), SessionError>;
}

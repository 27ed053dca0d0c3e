//! Agent 错误类型与恢复动作
//!
//! 与 RecoveryEngine 配合：根据 AgentError 决定 ReviseProposal / RetryWithPrompt / Resync / Report / Abort。
//! 只有 Configuration 会终止进程，其余错误都在一轮对话内消化并转成回复。

use thiserror::Error;

use crate::actions::ValidationError;
use crate::session::SessionError;

/// 运行过程中可能出现的错误
#[derive(Error, Debug)]
pub enum AgentError {
    /// 启动期致命错误（如动作标识重复）
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// 重试耗尽的暂时性错误
    #[error("{action} failed after {attempts} attempts: {source}")]
    TransientExecution {
        action: String,
        attempts: u32,
        source: SessionError,
    },

    #[error("{action} failed: {source}")]
    PermanentExecution { action: String, source: SessionError },

    #[error("confirmation denied for {0}")]
    ConfirmationDenied(String),

    /// 跟踪的快照与外部模型不一致且无法自动修正
    #[error("model state drift: {0}")]
    Drift(String),

    #[error("turn cancelled")]
    Cancelled,

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("JSON parse error: {0}")]
    JsonParse(String),

    #[error("session error: {0}")]
    Session(#[from] SessionError),

    /// 句柄层错误：运行时已停止、当前没有待确认的动作等，可继续使用
    #[error("agent runtime: {0}")]
    Runtime(String),
}

impl AgentError {
    /// 是否应终止进程
    pub fn is_fatal(&self) -> bool {
        matches!(self, AgentError::Configuration(_))
    }
}

/// 恢复引擎根据错误类型给出的建议动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 把校验错误反馈给协作方，请求修订后的提案
    ReviseProposal(String),
    /// 将提示注入下一次请求，让 LLM 重新输出（如 JSON 格式错误）
    RetryWithPrompt(String),
    /// 重新读取外部模型并校正快照
    Resync,
    /// 结束本轮并向用户说明
    Report(String),
    Abort,
}

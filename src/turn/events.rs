//! 轮次过程事件：供终端 / 浏览器展示阶段切换、提案、确认请求与逐个动作结果

use serde::Serialize;

use crate::core::TurnPhase;
use crate::turn::ConfirmationRequest;

/// 单步过程事件（可序列化为 JSON 供前端展示）
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    PhaseChanged { phase: TurnPhase },
    /// 协作方给出的提案（动作以可读形式列出）
    Proposal {
        reply: Option<String>,
        actions: Vec<String>,
    },
    /// 校验未通过；revising 表示已请求协作方修订
    ValidationFailed {
        action: String,
        reason: String,
        revising: bool,
    },
    /// 破坏性动作需要用户确认，展示层必须给出决定后本轮才能继续
    ConfirmationRequired { request: ConfirmationRequest },
    ActionStarted { label: String },
    ActionFinished {
        label: String,
        status: String,
        detail: Option<String>,
        revision: u64,
    },
    ActionSkipped { label: String, reason: String },
    /// 重新同步后校正的差异
    Resynced { corrections: Vec<String> },
    /// 错误恢复动作（ReviseProposal / RetryWithPrompt / Resync 等）
    Recovery { action: String, detail: String },
    Reply { text: String },
    Error { text: String },
}

//! 状态定义：编排器阶段与 UiState 投影
//!
//! 展示层只持有轻量的 UiState（阶段、修订号、轮数、当前动作、错误）；完整状态由编排器维护。

use std::fmt;

use serde::Serialize;

/// 对话编排器的状态机阶段
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnPhase {
    #[default]
    Idle,
    AwaitingProposal,
    Validating,
    /// 破坏性动作等待用户确认
    AwaitingConfirmation,
    Executing,
    Summarizing,
}

impl fmt::Display for TurnPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TurnPhase::Idle => "idle",
            TurnPhase::AwaitingProposal => "awaiting proposal",
            TurnPhase::Validating => "validating",
            TurnPhase::AwaitingConfirmation => "awaiting confirmation",
            TurnPhase::Executing => "executing",
            TurnPhase::Summarizing => "summarizing",
        })
    }
}

/// UI 看到的「投影」状态，轻量且易于渲染
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct UiState {
    pub phase: TurnPhase,
    pub revision: u64,
    /// 历史中保留的轮数
    pub turns: usize,
    pub active_action: Option<String>,
    pub input_locked: bool,
    pub error_message: Option<String>,
}

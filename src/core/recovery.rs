//! 错误恢复引擎
//!
//! 根据 AgentError 类型返回 RecoveryAction，供对话编排器决定是请求修订、重新提示、重新同步、报告还是终止。

use crate::core::{AgentError, RecoveryAction};
use crate::session::SessionError;

/// 语义化错误恢复：将错误映射为可执行动作
#[derive(Debug, Default)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    /// revisions_left：本轮剩余的修订往返次数
    pub fn handle(&self, err: &AgentError, revisions_left: u32) -> RecoveryAction {
        match err {
            AgentError::Validation(e) if revisions_left > 0 => RecoveryAction::ReviseProposal(format!(
                "The proposed action `{}` was rejected before execution: {e}. \
                Nothing was executed. Return a corrected JSON proposal containing the complete, \
                ordered list of actions (for example, set missing parameters before running a study).",
                e.action()
            )),
            AgentError::Validation(e) => RecoveryAction::Report(format!(
                "I could not carry out the request: {e}. No changes were made to the model."
            )),
            AgentError::JsonParse(raw) => RecoveryAction::RetryWithPrompt(format!(
                "Your previous output could not be parsed ({raw}). \
                Reply with exactly one JSON object of the form \
                {{\"reply\": \"...\", \"actions\": [{{\"action\": \"set_parameter\", \"args\": {{\"name\": \"L\", \"value\": \"10[mm]\"}}}}]}} \
                and no other text."
            )),
            AgentError::Drift(_) | AgentError::Session(SessionError::StateMismatch(_)) => {
                RecoveryAction::Resync
            }
            AgentError::ConfirmationDenied(action) => RecoveryAction::Report(format!(
                "Cancelled: you declined `{action}`, so no changes were made to the model."
            )),
            AgentError::TransientExecution { .. }
            | AgentError::PermanentExecution { .. }
            | AgentError::Session(_)
            | AgentError::Runtime(_) => RecoveryAction::Report(err.to_string()),
            AgentError::Llm(msg) => RecoveryAction::Report(format!(
                "The language service is unavailable ({msg}). No changes were made to the model."
            )),
            AgentError::Cancelled | AgentError::Configuration(_) => RecoveryAction::Abort,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::ValidationError;

    fn precondition() -> AgentError {
        AgentError::Validation(ValidationError::PreconditionFailed {
            action: "solve_study".into(),
            reason: "L undefined".into(),
        })
    }

    #[test]
    fn test_validation_requests_revision_while_budget_left() {
        let engine = RecoveryEngine::new();
        match engine.handle(&precondition(), 1) {
            RecoveryAction::ReviseProposal(msg) => {
                assert!(msg.contains("L undefined"));
                assert!(msg.contains("solve_study"));
            }
            other => panic!("Expected ReviseProposal, got {other:?}"),
        }
    }

    #[test]
    fn test_validation_reports_when_budget_spent() {
        let engine = RecoveryEngine::new();
        match engine.handle(&precondition(), 0) {
            RecoveryAction::Report(msg) => assert!(msg.contains("No changes")),
            other => panic!("Expected Report, got {other:?}"),
        }
    }

    #[test]
    fn test_json_parse_retries_with_prompt() {
        let engine = RecoveryEngine::new();
        let action = engine.handle(&AgentError::JsonParse("expected value".into()), 0);
        assert!(matches!(action, RecoveryAction::RetryWithPrompt(ref m) if m.contains("JSON")));
    }

    #[test]
    fn test_drift_and_mismatch_resync() {
        let engine = RecoveryEngine::new();
        assert_eq!(engine.handle(&AgentError::Drift("x".into()), 1), RecoveryAction::Resync);
        let mismatch = AgentError::Session(SessionError::StateMismatch("blk1".into()));
        assert_eq!(engine.handle(&mismatch, 1), RecoveryAction::Resync);
    }

    #[test]
    fn test_denied_and_cancelled() {
        let engine = RecoveryEngine::new();
        let denied = engine.handle(&AgentError::ConfirmationDenied("delete_feature".into()), 1);
        assert!(matches!(denied, RecoveryAction::Report(ref m) if m.contains("delete_feature")));
        assert_eq!(engine.handle(&AgentError::Cancelled, 1), RecoveryAction::Abort);
        assert!(AgentError::Configuration("dup".into()).is_fatal());
        assert!(!AgentError::Runtime("no action is awaiting confirmation".into()).is_fatal());
    }
}

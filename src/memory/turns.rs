//! 对话轮次历史
//!
//! 只追加：每轮记录用户输入、提出的动作、执行结果与回复。保留最近 N 轮，
//! 超出时丢弃最旧的；渲染为 user/assistant 消息对，作为协作方的上下文。

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::actions::{ActionRequest, ActionResult, ActionStatus};
use crate::memory::Message;

/// 一轮的总体结局
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnOutcome {
    /// 没有提出动作，只是对话
    Conversational,
    Completed,
    /// 部分动作成功
    Partial,
    Failed,
    /// 校验未通过（含修订后仍未通过），未执行任何动作
    Rejected,
    /// 用户拒绝确认破坏性动作
    Denied,
    Cancelled,
}

impl TurnOutcome {
    /// 根据执行结果推断结局
    pub fn from_results(results: &[ActionResult]) -> Self {
        if results.is_empty() {
            return TurnOutcome::Conversational;
        }
        let ok = results.iter().filter(|r| r.is_success()).count();
        if ok == results.len() {
            TurnOutcome::Completed
        } else if ok > 0 {
            TurnOutcome::Partial
        } else if results.iter().all(|r| r.status == ActionStatus::FailedValidation) {
            TurnOutcome::Rejected
        } else {
            TurnOutcome::Failed
        }
    }
}

/// 一轮对话
#[derive(Clone, Debug, Serialize)]
pub struct ConversationTurn {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub utterance: String,
    pub proposed: Vec<ActionRequest>,
    pub results: Vec<ActionResult>,
    pub reply: String,
    pub outcome: TurnOutcome,
}

impl ConversationTurn {
    pub fn new(
        utterance: impl Into<String>,
        proposed: Vec<ActionRequest>,
        results: Vec<ActionResult>,
        reply: impl Into<String>,
        outcome: TurnOutcome,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            utterance: utterance.into(),
            proposed,
            results,
            reply: reply.into(),
            outcome,
        }
    }
}

/// 最近 N 轮历史
#[derive(Clone, Debug)]
pub struct TurnHistory {
    turns: VecDeque<ConversationTurn>,
    max_turns: usize,
}

impl TurnHistory {
    pub fn new(max_turns: usize) -> Self {
        Self {
            turns: VecDeque::new(),
            max_turns: max_turns.max(1),
        }
    }

    pub fn push(&mut self, turn: ConversationTurn) {
        self.turns.push_back(turn);
        while self.turns.len() > self.max_turns {
            self.turns.pop_front();
        }
    }

    pub fn turns(&self) -> impl Iterator<Item = &ConversationTurn> {
        self.turns.iter()
    }

    pub fn last(&self) -> Option<&ConversationTurn> {
        self.turns.back()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    /// 渲染为 user/assistant 消息对
    pub fn as_messages(&self) -> Vec<Message> {
        self.turns
            .iter()
            .flat_map(|t| [Message::user(t.utterance.clone()), Message::assistant(t.reply.clone())])
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::{EffectClass, FailureClass};
    use serde_json::json;

    fn turn(text: &str) -> ConversationTurn {
        ConversationTurn::new(text, Vec::new(), Vec::new(), format!("re: {text}"), TurnOutcome::Conversational)
    }

    #[test]
    fn test_history_bounded() {
        let mut h = TurnHistory::new(2);
        h.push(turn("a"));
        h.push(turn("b"));
        h.push(turn("c"));
        assert_eq!(h.len(), 2);
        let messages = h.as_messages();
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0], Message::user("b"));
        assert_eq!(messages[3], Message::assistant("re: c"));
    }

    #[test]
    fn test_outcome_from_results() {
        let set = ActionRequest::from_json("set_parameter", json!({"name": "L", "value": 1}));
        let ok = ActionResult::succeeded(&set, EffectClass::Mutate, None, None, None, 1);
        let bad = ActionResult::failed_execution(&set, EffectClass::Mutate, "x".into(), FailureClass::Permanent, 1);
        let invalid = ActionResult::failed_validation(&set, "y".into());
        assert_eq!(TurnOutcome::from_results(&[]), TurnOutcome::Conversational);
        assert_eq!(TurnOutcome::from_results(&[ok.clone()]), TurnOutcome::Completed);
        assert_eq!(TurnOutcome::from_results(&[ok, bad.clone()]), TurnOutcome::Partial);
        assert_eq!(TurnOutcome::from_results(&[bad]), TurnOutcome::Failed);
        assert_eq!(TurnOutcome::from_results(&[invalid]), TurnOutcome::Rejected);
    }
}

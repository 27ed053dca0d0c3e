//! 破坏性动作的用户确认
//!
//! 编排器在 AwaitingConfirmation 阶段调用 Confirmer::confirm 并等待决定。
//! ChannelConfirmer 把请求发布给展示层（事件 + 当前待决请求），从 mpsc 通道接收决定；
//! 通道关闭视为拒绝。AutoConfirmer 用于测试与非交互场景。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use uuid::Uuid;

use crate::actions::{ActionRequest, ActionSpec};
use crate::turn::TurnEvent;

/// 待用户确认的动作
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ConfirmationRequest {
    pub id: Uuid,
    pub action: String,
    pub label: String,
    pub description: String,
}

impl ConfirmationRequest {
    pub fn for_action(request: &ActionRequest, spec: &ActionSpec) -> Self {
        Self {
            id: Uuid::new_v4(),
            action: request.action.clone(),
            label: request.label(),
            description: spec.description.clone(),
        }
    }

    /// 终端提示文本
    pub fn prompt(&self) -> String {
        format!("{} is destructive ({}). Proceed? [y/N]", self.label, self.description)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationDecision {
    Approve,
    Deny,
}

impl ConfirmationDecision {
    pub fn from_bool(approve: bool) -> Self {
        if approve {
            ConfirmationDecision::Approve
        } else {
            ConfirmationDecision::Deny
        }
    }
}

#[async_trait]
pub trait Confirmer: Send + Sync {
    async fn confirm(&self, request: &ConfirmationRequest) -> ConfirmationDecision;
}

/// 固定决定
#[derive(Debug, Clone, Copy)]
pub struct AutoConfirmer(pub ConfirmationDecision);

impl AutoConfirmer {
    pub fn approve_all() -> Self {
        Self(ConfirmationDecision::Approve)
    }

    pub fn deny_all() -> Self {
        Self(ConfirmationDecision::Deny)
    }
}

#[async_trait]
impl Confirmer for AutoConfirmer {
    async fn confirm(&self, _request: &ConfirmationRequest) -> ConfirmationDecision {
        self.0
    }
}

/// 通过通道向展示层请求决定
pub struct ChannelConfirmer {
    decisions: Mutex<mpsc::UnboundedReceiver<ConfirmationDecision>>,
    pending: watch::Sender<Option<ConfirmationRequest>>,
    events: Option<broadcast::Sender<TurnEvent>>,
}

impl ChannelConfirmer {
    /// 返回 (confirmer, 决定发送端, 当前待决请求接收端)
    pub fn new(
        events: Option<broadcast::Sender<TurnEvent>>,
    ) -> (
        Self,
        mpsc::UnboundedSender<ConfirmationDecision>,
        watch::Receiver<Option<ConfirmationRequest>>,
    ) {
        let (decision_tx, decision_rx) = mpsc::unbounded_channel();
        let (pending_tx, pending_rx) = watch::channel(None);
        (
            Self {
                decisions: Mutex::new(decision_rx),
                pending: pending_tx,
                events,
            },
            decision_tx,
            pending_rx,
        )
    }
}

/// 等待结束（含被取消而提前 drop）时清除待决请求
struct PendingGuard<'a>(&'a watch::Sender<Option<ConfirmationRequest>>);

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.0.send_replace(None);
    }
}

#[async_trait]
impl Confirmer for ChannelConfirmer {
    async fn confirm(&self, request: &ConfirmationRequest) -> ConfirmationDecision {
        let mut decisions = self.decisions.lock().await;
        // 丢弃无待决请求时收到的过期决定
        while decisions.try_recv().is_ok() {}

        self.pending.send_replace(Some(request.clone()));
        let _guard = PendingGuard(&self.pending);
        if let Some(events) = &self.events {
            let _ = events.send(TurnEvent::ConfirmationRequired {
                request: request.clone(),
            });
        }
        tracing::info!(action = %request.action, id = %request.id, "awaiting user confirmation");
        decisions.recv().await.unwrap_or(ConfirmationDecision::Deny)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> ConfirmationRequest {
        ConfirmationRequest {
            id: Uuid::new_v4(),
            action: "delete_feature".into(),
            label: "delete_feature(feature=blk1)".into(),
            description: "Deletes a geometry feature.".into(),
        }
    }

    #[tokio::test]
    async fn test_channel_confirmer_receives_decision() {
        let (confirmer, tx, mut pending) = ChannelConfirmer::new(None);
        let req = request();
        let waiter = tokio::spawn(async move { confirmer.confirm(&req).await });

        pending.changed().await.unwrap();
        assert_eq!(
            pending.borrow().as_ref().map(|r| r.action.clone()),
            Some("delete_feature".to_string())
        );
        tx.send(ConfirmationDecision::Approve).unwrap();
        assert_eq!(waiter.await.unwrap(), ConfirmationDecision::Approve);
        assert!(pending.borrow().is_none());
    }

    #[tokio::test]
    async fn test_stale_decision_ignored_and_closed_channel_denies() {
        let (confirmer, tx, _pending) = ChannelConfirmer::new(None);
        tx.send(ConfirmationDecision::Approve).unwrap();
        drop(tx);
        assert_eq!(confirmer.confirm(&request()).await, ConfirmationDecision::Deny);
    }

    #[tokio::test]
    async fn test_auto_confirmer() {
        assert_eq!(
            AutoConfirmer::deny_all().confirm(&request()).await,
            ConfirmationDecision::Deny
        );
    }
}

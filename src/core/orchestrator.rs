//! Agent 运行时：主控循环
//!
//! 建立 cmd / state / events 三通道，并在后台任务中逐条消费命令。
//! 同一时刻只有一轮在运行：多个展示层共享一个 AgentHandle 时，提交按到达顺序排队。
//! 取消不走命令队列（后台任务正忙于当前轮），直接作用于 SessionSupervisor。

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot, watch};

use crate::core::{AgentBuilder, AgentError, SessionSupervisor, UiState};
use crate::snapshot::ModelSnapshot;
use crate::turn::{ChannelConfirmer, ConfirmationDecision, ConfirmationRequest, TurnEvent, TurnReport};

/// 从展示层发往编排器的命令
#[derive(Debug)]
pub enum Command {
    /// 提交用户输入，运行一轮
    Submit {
        text: String,
        respond_to: oneshot::Sender<TurnReport>,
    },
    /// 重新读取外部模型并校正快照
    Resync {
        respond_to: oneshot::Sender<Result<Vec<String>, AgentError>>,
    },
    Snapshot {
        respond_to: oneshot::Sender<SnapshotView>,
    },
    /// 清空对话历史（快照保留）
    Clear,
    Quit,
}

/// 当前快照及修订号
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotView {
    pub revision: u64,
    pub snapshot: ModelSnapshot,
    /// 协作方累计 token 用量 (prompt, completion, total)
    pub token_usage: (u64, u64, u64),
}

/// 展示层持有的句柄；可克隆，多个前端共享同一会话
#[derive(Clone)]
pub struct AgentHandle {
    commands: mpsc::UnboundedSender<Command>,
    decisions: mpsc::UnboundedSender<ConfirmationDecision>,
    state: watch::Receiver<UiState>,
    pending: watch::Receiver<Option<ConfirmationRequest>>,
    events: broadcast::Sender<TurnEvent>,
    supervisor: Arc<SessionSupervisor>,
}

impl AgentHandle {
    /// 提交一句话并等待本轮结束
    pub async fn submit(&self, text: impl Into<String>) -> Result<TurnReport, AgentError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Submit {
            text: text.into(),
            respond_to: tx,
        })?;
        rx.await.map_err(|_| closed())
    }

    pub async fn resync(&self) -> Result<Vec<String>, AgentError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Resync { respond_to: tx })?;
        rx.await.map_err(|_| closed())?
    }

    pub async fn snapshot(&self) -> Result<SnapshotView, AgentError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Snapshot { respond_to: tx })?;
        rx.await.map_err(|_| closed())
    }

    /// 回应当前待决的确认请求
    pub fn confirm(&self, approve: bool) -> Result<(), AgentError> {
        if self.pending.borrow().is_none() {
            return Err(AgentError::Runtime(
                "no action is awaiting confirmation".to_string(),
            ));
        }
        self.decisions
            .send(ConfirmationDecision::from_bool(approve))
            .map_err(|_| closed())
    }

    /// 取消正在进行的一轮（空闲时无效果）
    pub fn cancel(&self) {
        self.supervisor.cancel();
    }

    pub fn clear(&self) -> Result<(), AgentError> {
        self.send(Command::Clear)
    }

    pub fn quit(&self) -> Result<(), AgentError> {
        self.supervisor.shutdown();
        self.send(Command::Quit)
    }

    pub fn state(&self) -> watch::Receiver<UiState> {
        self.state.clone()
    }

    pub fn pending_confirmation(&self) -> Option<ConfirmationRequest> {
        self.pending.borrow().clone()
    }

    pub fn pending_watch(&self) -> watch::Receiver<Option<ConfirmationRequest>> {
        self.pending.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TurnEvent> {
        self.events.subscribe()
    }

    fn send(&self, cmd: Command) -> Result<(), AgentError> {
        self.commands.send(cmd).map_err(|_| closed())
    }
}

fn closed() -> AgentError {
    AgentError::Runtime("agent runtime has stopped".to_string())
}

/// 创建 Agent 运行时：确认走通道，状态与过程事件推送给所有展示层
pub async fn create_agent(builder: AgentBuilder) -> Result<AgentHandle, AgentError> {
    let (events_tx, _) = broadcast::channel::<TurnEvent>(64);
    let (state_tx, state_rx) = watch::channel(UiState::default());
    let (confirmer, decision_tx, pending_rx) = ChannelConfirmer::new(Some(events_tx.clone()));
    let supervisor = Arc::new(SessionSupervisor::new());

    let mut orchestrator = builder
        .with_confirmer(Arc::new(confirmer))
        .connect()
        .await?
        .with_events(events_tx.clone())
        .with_status(state_tx)
        .with_supervisor(supervisor.clone());

    let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<Command>();

    tokio::spawn(async move {
        while let Some(cmd) = cmd_rx.recv().await {
            // 关闭后排队的命令一律丢弃，等待方收到运行时已停止
            if orchestrator.supervisor().is_shutdown() {
                break;
            }
            match cmd {
                Command::Submit { text, respond_to } => {
                    let cancel = orchestrator.supervisor().begin_turn();
                    let report = orchestrator.run_turn(&text, cancel).await;
                    let _ = respond_to.send(report);
                }
                Command::Resync { respond_to } => {
                    let _ = respond_to.send(orchestrator.resync().await);
                }
                Command::Snapshot { respond_to } => {
                    let _ = respond_to.send(SnapshotView {
                        revision: orchestrator.revision(),
                        snapshot: orchestrator.snapshot().clone(),
                        token_usage: orchestrator.token_usage(),
                    });
                }
                Command::Clear => orchestrator.clear_history(),
                Command::Quit => break,
            }
        }
        tracing::info!("agent runtime stopped");
    });

    Ok(AgentHandle {
        commands: cmd_tx,
        decisions: decision_tx,
        state: state_rx,
        pending: pending_rx,
        events: events_tx,
        supervisor,
    })
}

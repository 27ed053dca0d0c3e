//! 对话轮次：提案者、确认、状态机主循环、回复组织、过程事件

pub mod confirm;
pub mod events;
pub mod loop_;
pub mod narrative;
pub mod proposer;

pub use confirm::{AutoConfirmer, ChannelConfirmer, ConfirmationDecision, ConfirmationRequest, Confirmer};
pub use events::TurnEvent;
pub use loop_::{ConversationOrchestrator, OrchestratorSettings, TurnReport};
pub use narrative::{narrate, TurnSummary};
pub use proposer::{parse_proposal, LlmProposer, Proposal, ProposalRequest, Proposer};

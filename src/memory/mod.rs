//! 记忆层：对话消息与轮次历史（仅内存，不跨进程持久化）

pub mod conversation;
pub mod turns;

pub use conversation::{Message, Role};
pub use turns::{ConversationTurn, TurnHistory, TurnOutcome};

//! 会话状态：模型快照与跟踪器

pub mod model;
pub mod tracker;

pub use model::{parse_quantity, ModelSnapshot, StateDelta, StateKey, StudyState, StudyStatus};
pub use tracker::SessionStateTracker;

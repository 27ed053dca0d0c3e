//! 会话状态跟踪器
//!
//! 唯一持有 ModelSnapshot 的组件：只有执行确认成功的变更类动作才会推进快照与修订号；
//! 失败或查询类结果不改变任何状态。reconcile 用外部重新读取的完整快照覆盖本地信念。

use crate::actions::{ActionResult, ActionStatus, EffectClass};
use crate::snapshot::ModelSnapshot;

/// 会话状态跟踪器：快照 + 单调递增的修订号
#[derive(Debug, Default)]
pub struct SessionStateTracker {
    snapshot: ModelSnapshot,
    revision: u64,
}

impl SessionStateTracker {
    pub fn new(snapshot: ModelSnapshot) -> Self {
        Self {
            snapshot,
            revision: 0,
        }
    }

    /// 当前已知快照（不阻塞）
    pub fn current(&self) -> &ModelSnapshot {
        &self.snapshot
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// 合并一次执行结果：仅 Succeeded 且非查询类才合并 delta 并使修订号 +1
    pub fn apply(&mut self, result: &ActionResult) -> &ModelSnapshot {
        if result.status != ActionStatus::Succeeded || result.effect == EffectClass::Query {
            return &self.snapshot;
        }
        if let Some(delta) = &result.delta {
            self.snapshot.apply(delta);
        }
        self.revision += 1;
        tracing::debug!(action = %result.action, revision = self.revision, "snapshot advanced");
        &self.snapshot
    }

    /// 用外部完整快照覆盖本地信念（外部状态总是优先），返回被纠正的差异；修订号不变
    pub fn reconcile(&mut self, external: ModelSnapshot) -> Vec<String> {
        let corrections = self.snapshot.diff(&external);
        if !corrections.is_empty() {
            tracing::warn!(
                corrections = corrections.len(),
                revision = self.revision,
                "tracked snapshot drifted from external session, reconciled"
            );
        }
        self.snapshot = external;
        corrections
    }
}

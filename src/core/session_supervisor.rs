//! 会话监管：生命周期、中断管理
//!
//! 持有根 CancellationToken；每轮开始时派生一个子 token。用户取消只作用于当前轮，
//! 进程退出时取消根 token。

use std::sync::Mutex;

use tokio_util::sync::CancellationToken;

/// 会话级生命周期管理：根取消令牌 + 当前轮令牌
#[derive(Debug)]
pub struct SessionSupervisor {
    root: CancellationToken,
    current: Mutex<CancellationToken>,
}

impl SessionSupervisor {
    pub fn new() -> Self {
        let root = CancellationToken::new();
        let current = Mutex::new(root.child_token());
        Self { root, current }
    }

    /// 开始新一轮，返回本轮的取消令牌（之前的取消请求不影响新一轮）
    pub fn begin_turn(&self) -> CancellationToken {
        let token = self.root.child_token();
        if let Ok(mut current) = self.current.lock() {
            *current = token.clone();
        }
        token
    }

    /// 取消当前轮（用户 /cancel 或 Ctrl+C）
    pub fn cancel(&self) {
        if let Ok(current) = self.current.lock() {
            current.cancel();
        }
    }

    /// 取消所有轮次（进程退出）
    pub fn shutdown(&self) {
        self.root.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.root.is_cancelled()
    }
}

impl Default for SessionSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_affects_only_current_turn() {
        let s = SessionSupervisor::new();
        let first = s.begin_turn();
        s.cancel();
        assert!(first.is_cancelled());
        let second = s.begin_turn();
        assert!(!second.is_cancelled());
    }

    #[test]
    fn test_shutdown_cancels_everything() {
        let s = SessionSupervisor::new();
        let turn = s.begin_turn();
        s.shutdown();
        assert!(turn.is_cancelled());
        assert!(s.is_shutdown());
    }
}

//! 服务生命周期状态
//!
//! Starting -> Running -> Stopped；启动失败时直接进入 Stopped。

use std::fmt;

use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Starting,
    Running,
    Stopped,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Starting => "STARTING",
            LifecycleState::Running => "RUNNING",
            LifecycleState::Stopped => "STOPPED",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 生命周期状态发布者
#[derive(Debug)]
pub struct Lifecycle {
    tx: watch::Sender<LifecycleState>,
}

impl Lifecycle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(LifecycleState::Starting);
        Self { tx }
    }

    pub fn state(&self) -> LifecycleState {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.tx.subscribe()
    }

    pub fn mark_running(&self) {
        self.transition(LifecycleState::Running);
    }

    pub fn mark_stopped(&self) {
        self.transition(LifecycleState::Stopped);
    }

    /// 状态只能前进，Stopped 为终态
    fn transition(&self, next: LifecycleState) {
        self.tx.send_if_modified(|current| {
            let allowed = matches!(
                (*current, next),
                (LifecycleState::Starting, LifecycleState::Running)
                    | (LifecycleState::Starting, LifecycleState::Stopped)
                    | (LifecycleState::Running, LifecycleState::Stopped)
            );
            if allowed {
                *current = next;
            }
            allowed
        });
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions_are_forward_only() {
        let lifecycle = Lifecycle::new();
        assert_eq!(lifecycle.state(), LifecycleState::Starting);

        lifecycle.mark_running();
        assert_eq!(lifecycle.state(), LifecycleState::Running);

        lifecycle.mark_stopped();
        lifecycle.mark_running();
        assert_eq!(lifecycle.state(), LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn test_subscribers_observe_stop() {
        let lifecycle = Lifecycle::new();
        let mut rx = lifecycle.subscribe();
        lifecycle.mark_running();
        lifecycle.mark_stopped();

        let state = rx
            .wait_for(|state| *state == LifecycleState::Stopped)
            .await
            .map(|state| *state)
            .unwrap();
        assert_eq!(state, LifecycleState::Stopped);
    }
}

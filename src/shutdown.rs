//! Shutdown coordination for background tasks.
//!
//! Background loops share one cancellation token. Shutdown cancels it and
//! waits up to a deadline for every registered task to finish; stragglers
//! are aborted.

use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Shutdown state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShutdownState {
    Running,
    Draining,
    Stopped,
}

/// Result of a shutdown operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShutdownResult {
    Complete,
    /// Tasks still running at the deadline were aborted.
    Timeout { remaining: u32 },
}

/// Owns the cancellation token and join handles of background tasks.
pub struct ShutdownCoordinator {
    state: RwLock<ShutdownState>,
    token: CancellationToken,
    tasks: Mutex<Vec<(&'static str, JoinHandle<()>)>>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(ShutdownState::Running),
            token: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn state(&self) -> ShutdownState {
        *self.state.read()
    }

    pub fn is_running(&self) -> bool {
        self.state() == ShutdownState::Running
    }

    /// Token for a new background task; cancelled when shutdown begins.
    pub fn token(&self) -> CancellationToken {
        self.token.child_token()
    }

    /// Track a spawned task. Tasks registered after shutdown are aborted.
    pub fn register(&self, name: &'static str, handle: JoinHandle<()>) {
        if !self.is_running() {
            tracing::warn!(task = name, "task registered during shutdown; aborting");
            handle.abort();
            return;
        }
        self.tasks.lock().push((name, handle));
    }

    /// Number of tracked tasks that have not finished.
    pub fn running_tasks(&self) -> usize {
        self.tasks.lock().iter().filter(|(_, h)| !h.is_finished()).count()
    }

    /// Cancel all tasks and wait up to `timeout` for them to exit.
    pub async fn initiate(&self, timeout: Duration) -> ShutdownResult {
        {
            let mut state = self.state.write();
            if *state != ShutdownState::Running {
                return ShutdownResult::Complete;
            }
            *state = ShutdownState::Draining;
        }

        self.token.cancel();
        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        let deadline = tokio::time::Instant::now() + timeout;
        let mut remaining = 0u32;

        for (name, mut handle) in tasks {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => tracing::debug!(task = name, "background task stopped"),
                Ok(Err(err)) => tracing::error!(task = name, error = %err, "background task failed"),
                Err(_) => {
                    tracing::warn!(task = name, "background task did not stop in time; aborting");
                    handle.abort();
                    remaining += 1;
                }
            }
        }

        *self.state.write() = ShutdownState::Stopped;
        if remaining == 0 {
            ShutdownResult::Complete
        } else {
            ShutdownResult::Timeout { remaining }
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancels_and_joins_registered_tasks() {
        let coordinator = ShutdownCoordinator::new();
        let token = coordinator.token();
        coordinator.register("waiter", tokio::spawn(async move { token.cancelled().await }));
        assert_eq!(coordinator.running_tasks(), 1);

        let result = coordinator.initiate(Duration::from_secs(1)).await;
        assert_eq!(result, ShutdownResult::Complete);
        assert_eq!(coordinator.state(), ShutdownState::Stopped);
        assert_eq!(coordinator.running_tasks(), 0);
    }

    #[tokio::test]
    async fn stuck_task_times_out() {
        let coordinator = ShutdownCoordinator::new();
        coordinator.register(
            "stuck",
            tokio::spawn(async { tokio::time::sleep(Duration::from_secs(60)).await }),
        );
        let result = coordinator.initiate(Duration::from_millis(20)).await;
        assert_eq!(result, ShutdownResult::Timeout { remaining: 1 });
    }

    #[tokio::test]
    async fn second_initiate_is_a_no_op() {
        let coordinator = ShutdownCoordinator::new();
        assert_eq!(coordinator.initiate(Duration::from_millis(10)).await, ShutdownResult::Complete);
        assert_eq!(coordinator.initiate(Duration::from_millis(10)).await, ShutdownResult::Complete);
        assert!(!coordinator.is_running());
    }
}

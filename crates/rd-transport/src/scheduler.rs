//! Scheduler backed by a single tokio task

use std::sync::Arc;
use std::thread::{self, ThreadId};

use parking_lot::Mutex;
use tokio::sync::mpsc;

use rd_core::{RdError, RdResult, Scheduler, Task};

/// Runs queued actions one at a time on a dedicated tokio task
pub struct TokioScheduler {
    name: String,
    tx: mpsc::UnboundedSender<Task>,
    running_on: Arc<Mutex<Option<ThreadId>>>,
}

impl TokioScheduler {
    /// Spawn the consumer task on the current runtime
    pub fn spawn(name: impl Into<String>) -> RdResult<Self> {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| RdError::Transport(format!("no tokio runtime: {}", e)))?;
        let name = name.into();
        let (tx, mut rx) = mpsc::unbounded_channel::<Task>();
        let running_on = Arc::new(Mutex::new(None));

        let marker = Arc::clone(&running_on);
        let task_name = name.clone();
        handle.spawn(async move {
            while let Some(action) = rx.recv().await {
                *marker.lock() = Some(thread::current().id());
                action();
                *marker.lock() = None;
            }
            tracing::debug!(scheduler = %task_name, "scheduler stopped");
        });

        Ok(TokioScheduler {
            name,
            tx,
            running_on,
        })
    }
}

impl Scheduler for TokioScheduler {
    fn queue(&self, action: Task) {
        if self.tx.send(action).is_err() {
            tracing::warn!(scheduler = %self.name, "action queued after runtime shutdown");
        }
    }

    fn is_active(&self) -> bool {
        *self.running_on.lock() == Some(thread::current().id())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for TokioScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokioScheduler").field("name", &self.name).finish()
    }
}

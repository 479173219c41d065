//! Unbounded async channel whose operations are cancelled with a lifetime

use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::{Lifetime, RdError, RdResult};

/// Multi-producer, multi-consumer queue bound to a [`Lifetime`].
///
/// Once the lifetime stops being alive, `send` fails, pending and future
/// `receive` calls fail with [`RdError::LifetimeTerminated`], and queued
/// values are unreachable.
pub struct AsyncChannel<T> {
    lifetime: Lifetime,
    queue: Mutex<VecDeque<T>>,
    available: Notify,
}

impl<T> AsyncChannel<T> {
    pub fn new(lifetime: Lifetime) -> Self {
        AsyncChannel {
            lifetime,
            queue: Mutex::new(VecDeque::new()),
            available: Notify::new(),
        }
    }

    pub fn lifetime(&self) -> &Lifetime {
        &self.lifetime
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Enqueue without waiting
    pub fn send(&self, value: T) -> RdResult<()> {
        self.lifetime
            .try_execute(|| self.queue.lock().push_back(value))
            .ok_or(RdError::LifetimeTerminated)?;
        self.available.notify_one();
        Ok(())
    }

    /// Wait for the next value, or fail once the lifetime terminates
    pub async fn receive(&self) -> RdResult<T> {
        loop {
            if !self.lifetime.is_alive() {
                return Err(RdError::LifetimeTerminated);
            }
            let next = self.queue.lock().pop_front();
            if let Some(value) = next {
                return Ok(value);
            }
            tokio::select! {
                _ = self.available.notified() => {}
                _ = self.lifetime.cancelled() => {
                    return Err(RdError::LifetimeTerminated);
                }
            }
        }
    }
}

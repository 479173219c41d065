//! Single-assignment results of remote calls
//!
//! An [`RdTask`] completes exactly once: with a value, a fault or a
//! cancellation. It can be observed with callbacks or awaited as a future.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use parking_lot::Mutex;
use thiserror::Error;

use rd_core::RdResult;
use rd_wire::{Marshal, SerializationCtx, WireReader, WireWriter};

const TAG_SUCCESS: u8 = 0;
const TAG_FAULT: u8 = 1;
const TAG_CANCELLED: u8 = 2;

/// Failure reported by a remote handler
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct RpcFault {
    pub kind: String,
    pub message: String,
}

impl RpcFault {
    /// No endpoint installed on the serving side
    pub const NO_ENDPOINT: &'static str = "NoEndpoint";
    /// The handler panicked
    pub const PANIC: &'static str = "Panic";

    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        RpcFault {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

/// Error side of [`RdTaskResult::into_result`]
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum RpcError {
    #[error("call faulted: {0}")]
    Faulted(RpcFault),

    #[error("call cancelled")]
    Cancelled,
}

/// Terminal outcome of a call
#[derive(Clone, Debug, PartialEq)]
pub enum RdTaskResult<T> {
    Success(T),
    Faulted(RpcFault),
    Cancelled,
}

impl<T> RdTaskResult<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, RdTaskResult::Success(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, RdTaskResult::Cancelled)
    }

    pub fn into_result(self) -> Result<T, RpcError> {
        match self {
            RdTaskResult::Success(value) => Ok(value),
            RdTaskResult::Faulted(fault) => Err(RpcError::Faulted(fault)),
            RdTaskResult::Cancelled => Err(RpcError::Cancelled),
        }
    }
}

impl<T: Marshal> Marshal for RdTaskResult<T> {
    fn write(&self, ctx: &SerializationCtx, w: &mut WireWriter) {
        match self {
            RdTaskResult::Success(value) => {
                w.write_u8(TAG_SUCCESS);
                value.write(ctx, w);
            }
            RdTaskResult::Faulted(fault) => {
                w.write_u8(TAG_FAULT);
                w.write_str(&fault.kind);
                w.write_str(&fault.message);
            }
            RdTaskResult::Cancelled => w.write_u8(TAG_CANCELLED),
        }
    }

    fn read(ctx: &SerializationCtx, r: &mut WireReader) -> RdResult<Self> {
        match r.read_u8()? {
            TAG_SUCCESS => Ok(RdTaskResult::Success(T::read(ctx, r)?)),
            TAG_FAULT => {
                let kind = r.read_string()?;
                let message = r.read_string()?;
                Ok(RdTaskResult::Faulted(RpcFault { kind, message }))
            }
            TAG_CANCELLED => Ok(RdTaskResult::Cancelled),
            tag => Err(rd_core::RdError::SerializationMismatch(format!(
                "unknown task result tag {}",
                tag
            ))),
        }
    }
}

type Completion<T> = Box<dyn FnOnce(&RdTaskResult<T>) + Send>;
type CancelHook = Box<dyn FnOnce() + Send>;

struct TaskState<T> {
    result: Option<RdTaskResult<T>>,
    completions: Vec<Completion<T>>,
    wakers: Vec<Waker>,
    cancel_hook: Option<CancelHook>,
}

/// Pending or completed outcome of a call
pub struct RdTask<T> {
    state: Arc<Mutex<TaskState<T>>>,
}

impl<T: Clone + Send + 'static> RdTask<T> {
    pub fn new() -> Self {
        RdTask {
            state: Arc::new(Mutex::new(TaskState {
                result: None,
                completions: Vec::new(),
                wakers: Vec::new(),
                cancel_hook: None,
            })),
        }
    }

    pub fn from_result(result: RdTaskResult<T>) -> Self {
        let task = Self::new();
        task.set(result);
        task
    }

    pub fn success(value: T) -> Self {
        Self::from_result(RdTaskResult::Success(value))
    }

    pub fn faulted(fault: RpcFault) -> Self {
        Self::from_result(RdTaskResult::Faulted(fault))
    }

    pub fn cancelled() -> Self {
        Self::from_result(RdTaskResult::Cancelled)
    }

    pub fn is_completed(&self) -> bool {
        self.state.lock().result.is_some()
    }

    pub fn result(&self) -> Option<RdTaskResult<T>> {
        self.state.lock().result.clone()
    }

    /// Complete the task. Returns false if it was already complete.
    pub fn set(&self, result: RdTaskResult<T>) -> bool {
        let (completions, wakers) = {
            let mut state = self.state.lock();
            if state.result.is_some() {
                return false;
            }
            state.result = Some(result.clone());
            state.cancel_hook = None;
            (
                std::mem::take(&mut state.completions),
                std::mem::take(&mut state.wakers),
            )
        };
        for completion in completions {
            completion(&result);
        }
        for waker in wakers {
            waker.wake();
        }
        true
    }

    /// Run `f` once with the outcome, immediately if already complete
    pub fn on_complete(&self, f: impl FnOnce(&RdTaskResult<T>) + Send + 'static) {
        let result = {
            let mut state = self.state.lock();
            match &state.result {
                Some(result) => result.clone(),
                None => {
                    state.completions.push(Box::new(f));
                    return;
                }
            }
        };
        f(&result);
    }

    /// Complete as cancelled and notify whoever produces the result
    pub fn cancel(&self) -> bool {
        let hook = self.state.lock().cancel_hook.take();
        if !self.set(RdTaskResult::Cancelled) {
            return false;
        }
        if let Some(hook) = hook {
            hook();
        }
        true
    }

    /// Action run when the task is cancelled locally before completing
    pub(crate) fn set_cancel_hook(&self, hook: impl FnOnce() + Send + 'static) {
        let mut state = self.state.lock();
        if state.result.is_none() {
            state.cancel_hook = Some(Box::new(hook));
        }
    }
}

impl<T: Clone + Send + 'static> Default for RdTask<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for RdTask<T> {
    fn clone(&self) -> Self {
        RdTask {
            state: Arc::clone(&self.state),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for RdTask<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RdTask")
            .field("result", &self.state.lock().result)
            .finish()
    }
}

impl<T: Clone> Future for RdTask<T> {
    type Output = RdTaskResult<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.state.lock();
        if let Some(result) = &state.result {
            return Poll::Ready(result.clone());
        }
        if !state.wakers.iter().any(|w| w.will_wake(cx.waker())) {
            state.wakers.push(cx.waker().clone());
        }
        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_single_assignment() {
        let task = RdTask::new();
        assert!(task.set(RdTaskResult::Success(1)));
        assert!(!task.set(RdTaskResult::Success(2)));
        assert!(!task.cancel());
        assert_eq!(task.result(), Some(RdTaskResult::Success(1)));
    }

    #[test]
    fn test_on_complete_runs_once() {
        let task = RdTask::<u8>::new();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&calls);
        task.on_complete(move |r| sink.lock().push(r.clone()));
        task.set(RdTaskResult::Cancelled);

        let sink = Arc::clone(&calls);
        task.on_complete(move |r| sink.lock().push(r.clone()));
        assert_eq!(*calls.lock(), vec![RdTaskResult::Cancelled, RdTaskResult::Cancelled]);
    }

    #[test]
    fn test_cancel_runs_hook() {
        let task = RdTask::<u8>::new();
        let fired = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&fired);
        task.set_cancel_hook(move || *flag.lock() = true);
        assert!(task.cancel());
        assert!(*fired.lock());
        assert!(task.result().is_some_and(|r| r.is_cancelled()));
    }

    #[test]
    fn test_result_roundtrip() {
        let ctx = SerializationCtx::default();
        for result in [
            RdTaskResult::Success("ok".to_string()),
            RdTaskResult::Faulted(RpcFault::new("Invalid", "bad-input")),
            RdTaskResult::Cancelled,
        ] {
            let read: RdTaskResult<String> = ctx.from_bytes(ctx.to_bytes(&result)).unwrap();
            assert_eq!(read, result);
        }
    }

    #[test]
    fn test_into_result() {
        assert_eq!(RdTaskResult::Success(3).into_result(), Ok(3));
        assert_eq!(
            RdTaskResult::<u8>::Cancelled.into_result(),
            Err(RpcError::Cancelled)
        );
    }

    #[tokio::test]
    async fn test_await_completion_from_another_task() {
        let task = RdTask::<u32>::new();
        let producer = task.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            producer.set(RdTaskResult::Success(9));
        });
        let result = tokio::time::timeout(Duration::from_secs(5), task).await.unwrap();
        assert_eq!(result, RdTaskResult::Success(9));
    }
}

//! Lifetimes - hierarchical cancellation and cleanup scopes
//!
//! A [`LifetimeDefinition`] owns a scope and is the only handle able to
//! terminate it. [`Lifetime`] is the cheap, cloneable view handed to
//! everything that registers cleanup "for the lifetime of" an object.
//!
//! Termination is one-way and idempotent. Registered actions run exactly once,
//! in reverse registration order. Registering on a lifetime that is no longer
//! alive runs the action immediately.
//!
//! Termination first moves the scope to [`LifetimeStatus::Canceling`] and waits
//! for bodies entered through [`Lifetime::try_execute`] on other threads, so no
//! cleanup action ever races a running body.

use std::collections::BTreeMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::pin::pin;
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tokio::sync::Notify;

/// Upper bound on how long termination waits for running `try_execute` bodies
pub const EXECUTION_WAIT: Duration = Duration::from_millis(500);

type Action = Box<dyn FnOnce() + Send>;

/// Lifetime status
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifetimeStatus {
    Alive,
    /// No longer alive; waiting for running `try_execute` bodies
    Canceling,
    /// Termination actions are running
    Terminating,
    Terminated,
}

struct State {
    status: LifetimeStatus,
    next_key: u64,
    actions: BTreeMap<u64, Action>,
    /// One entry per running `try_execute` body
    executing: Vec<ThreadId>,
}

struct Inner {
    name: String,
    state: Mutex<State>,
    executions_done: Condvar,
    canceled: Notify,
}

impl Inner {
    fn new(name: String, status: LifetimeStatus) -> Arc<Self> {
        Arc::new(Inner {
            name,
            state: Mutex::new(State {
                status,
                next_key: 0,
                actions: BTreeMap::new(),
                executing: Vec::new(),
            }),
            executions_done: Condvar::new(),
            canceled: Notify::new(),
        })
    }

    fn begin_execution(self: &Arc<Self>) -> Option<Execution> {
        let mut state = self.state.lock();
        if state.status != LifetimeStatus::Alive {
            return None;
        }
        let thread = thread::current().id();
        state.executing.push(thread);
        Some(Execution {
            inner: Arc::clone(self),
            thread,
        })
    }

    /// Registers `action` if alive, otherwise hands it back
    fn add(&self, action: Action) -> Result<u64, Action> {
        let mut state = self.state.lock();
        if state.status != LifetimeStatus::Alive {
            return Err(action);
        }
        let key = state.next_key;
        state.next_key += 1;
        state.actions.insert(key, action);
        Ok(key)
    }

    fn remove(&self, key: u64) {
        self.state.lock().actions.remove(&key);
    }

    fn status(&self) -> LifetimeStatus {
        self.state.lock().status
    }

    fn terminate(&self) -> bool {
        let actions = {
            let mut state = self.state.lock();
            if state.status != LifetimeStatus::Alive {
                return false;
            }
            state.status = LifetimeStatus::Canceling;
            self.canceled.notify_waiters();

            // bodies on this thread cannot finish before we return
            let me = thread::current().id();
            let deadline = Instant::now() + EXECUTION_WAIT;
            while state.executing.iter().any(|t| *t != me) {
                if self.executions_done.wait_until(&mut state, deadline).timed_out() {
                    tracing::warn!(
                        lifetime = %self.name,
                        running = state.executing.len(),
                        "try_execute still running after {:?}, terminating anyway",
                        EXECUTION_WAIT
                    );
                    break;
                }
            }

            state.status = LifetimeStatus::Terminating;
            std::mem::take(&mut state.actions)
        };

        tracing::trace!(lifetime = %self.name, actions = actions.len(), "terminating");

        for (_, action) in actions.into_iter().rev() {
            if panic::catch_unwind(AssertUnwindSafe(action)).is_err() {
                tracing::error!(lifetime = %self.name, "termination action panicked");
            }
        }

        self.state.lock().status = LifetimeStatus::Terminated;
        true
    }
}

/// A running `try_execute` body; termination waits until it is dropped
struct Execution {
    inner: Arc<Inner>,
    thread: ThreadId,
}

impl Drop for Execution {
    fn drop(&mut self) {
        let mut state = self.inner.state.lock();
        if let Some(pos) = state.executing.iter().position(|t| *t == self.thread) {
            state.executing.swap_remove(pos);
        }
        self.inner.executions_done.notify_all();
    }
}

/// Cloneable view of a cancellation scope
#[derive(Clone)]
pub struct Lifetime {
    /// `None` is the eternal lifetime
    inner: Option<Arc<Inner>>,
}

impl Lifetime {
    /// A lifetime that never terminates. Actions registered on it are dropped.
    pub fn eternal() -> Self {
        Lifetime { inner: None }
    }

    /// An already terminated lifetime
    pub fn terminated() -> Self {
        Lifetime {
            inner: Some(Inner::new("terminated".into(), LifetimeStatus::Terminated)),
        }
    }

    /// Run `f` with a fresh lifetime that is terminated when `f` returns
    pub fn using<R>(f: impl FnOnce(&Lifetime) -> R) -> R {
        let def = LifetimeDefinition::new();
        let result = f(&def.lifetime());
        def.terminate();
        result
    }

    pub fn name(&self) -> &str {
        match &self.inner {
            Some(inner) => &inner.name,
            None => "eternal",
        }
    }

    pub fn status(&self) -> LifetimeStatus {
        match &self.inner {
            Some(inner) => inner.status(),
            None => LifetimeStatus::Alive,
        }
    }

    #[inline]
    pub fn is_alive(&self) -> bool {
        self.status() == LifetimeStatus::Alive
    }

    #[inline]
    pub fn is_eternal(&self) -> bool {
        self.inner.is_none()
    }

    /// Number of registered, not yet executed actions
    pub fn pending_actions(&self) -> usize {
        self.inner
            .as_ref()
            .map(|inner| inner.state.lock().actions.len())
            .unwrap_or(0)
    }

    /// Register a cleanup action.
    ///
    /// Returns `false` if the lifetime is no longer alive, in which case the
    /// action has already been executed.
    pub fn on_termination(&self, action: impl FnOnce() + Send + 'static) -> bool {
        let Some(inner) = &self.inner else {
            return true;
        };
        match inner.add(Box::new(action)) {
            Ok(_) => true,
            Err(action) => {
                tracing::warn!(lifetime = %inner.name, "registration on a dead lifetime, executing now");
                action();
                false
            }
        }
    }

    /// Register a cleanup action only if the lifetime is alive.
    ///
    /// Returns `false` and drops the action unexecuted otherwise.
    pub fn try_on_termination(&self, action: impl FnOnce() + Send + 'static) -> bool {
        match &self.inner {
            Some(inner) => inner.add(Box::new(action)).is_ok(),
            None => true,
        }
    }

    /// Run `open` and register `close` for termination, only if alive
    pub fn bracket<T>(
        &self,
        open: impl FnOnce() -> T,
        close: impl FnOnce() + Send + 'static,
    ) -> Option<T> {
        if !self.is_alive() {
            return None;
        }
        let value = open();
        self.on_termination(close);
        Some(value)
    }

    /// Run `f` only if the lifetime is alive.
    ///
    /// Termination requested from another thread while `f` runs moves the
    /// lifetime to [`LifetimeStatus::Canceling`] and waits for `f` to return
    /// (at most [`EXECUTION_WAIT`]) before any termination action runs.
    pub fn try_execute<T>(&self, f: impl FnOnce() -> T) -> Option<T> {
        let Some(inner) = &self.inner else {
            return Some(f());
        };
        let _execution = inner.begin_execution()?;
        Some(f())
    }

    /// Completes once the lifetime stops being alive. Never completes for
    /// the eternal lifetime.
    pub async fn cancelled(&self) {
        let Some(inner) = &self.inner else {
            return std::future::pending().await;
        };
        loop {
            let mut notified = pin!(inner.canceled.notified());
            notified.as_mut().enable();
            if inner.status() != LifetimeStatus::Alive {
                return;
            }
            notified.await;
        }
    }

    /// A nested scope terminated after `timeout`, or earlier with `self`.
    ///
    /// The timer runs on the current Tokio runtime when there is one and on a
    /// helper thread otherwise.
    pub fn terminates_after(&self, timeout: Duration) -> LifetimeDefinition {
        let def = self.create_nested();
        let timed = def.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let lifetime = def.lifetime();
                handle.spawn(async move {
                    tokio::select! {
                        _ = tokio::time::sleep(timeout) => {
                            timed.terminate();
                        }
                        _ = lifetime.cancelled() => {}
                    }
                });
            }
            Err(_) => {
                thread::spawn(move || {
                    thread::sleep(timeout);
                    timed.terminate();
                });
            }
        }
        def
    }

    /// Create a child scope terminated together with this one
    pub fn create_nested(&self) -> LifetimeDefinition {
        let child = LifetimeDefinition::with_name(format!("{}/nested", self.name()));
        self.attach(&child);
        child
    }

    /// A scope terminated when either `self` or `other` terminates
    pub fn intersect(&self, other: &Lifetime) -> LifetimeDefinition {
        let child = LifetimeDefinition::with_name(format!("{}&{}", self.name(), other.name()));
        self.attach(&child);
        other.attach(&child);
        child
    }

    fn attach(&self, child: &LifetimeDefinition) {
        let Some(parent) = &self.inner else {
            return;
        };

        let terminating = child.clone();
        match parent.add(Box::new(move || {
            terminating.terminate();
        })) {
            Ok(key) => {
                // drop the parent's registration once the child dies first
                let weak: Weak<Inner> = Arc::downgrade(parent);
                child.lifetime().on_termination(move || {
                    if let Some(parent) = weak.upgrade() {
                        parent.remove(key);
                    }
                });
            }
            Err(_) => {
                child.terminate();
            }
        }
    }
}

impl Default for Lifetime {
    fn default() -> Self {
        Lifetime::eternal()
    }
}

impl PartialEq for Lifetime {
    fn eq(&self, other: &Self) -> bool {
        match (&self.inner, &other.inner) {
            (None, None) => true,
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Eq for Lifetime {}

impl fmt::Debug for Lifetime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Lifetime({}, {:?})", self.name(), self.status())
    }
}

/// Owner of a lifetime; the only handle able to terminate it
#[derive(Clone)]
pub struct LifetimeDefinition {
    inner: Arc<Inner>,
}

impl LifetimeDefinition {
    pub fn new() -> Self {
        Self::with_name("lifetime".into())
    }

    pub fn with_name(name: String) -> Self {
        LifetimeDefinition {
            inner: Inner::new(name, LifetimeStatus::Alive),
        }
    }

    pub fn lifetime(&self) -> Lifetime {
        Lifetime {
            inner: Some(Arc::clone(&self.inner)),
        }
    }

    pub fn status(&self) -> LifetimeStatus {
        self.inner.status()
    }

    pub fn is_alive(&self) -> bool {
        self.status() == LifetimeStatus::Alive
    }

    /// Terminate the scope. Returns `false` if it was already terminated.
    pub fn terminate(&self) -> bool {
        self.inner.terminate()
    }

    /// Convert into a guard that terminates the scope on drop
    pub fn into_guard(self) -> LifetimeGuard {
        LifetimeGuard { def: self }
    }
}

impl Default for LifetimeDefinition {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for LifetimeDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LifetimeDefinition({}, {:?})", self.inner.name, self.status())
    }
}

/// Block-scoped lifetime
pub struct LifetimeGuard {
    def: LifetimeDefinition,
}

impl LifetimeGuard {
    pub fn lifetime(&self) -> Lifetime {
        self.def.lifetime()
    }
}

impl Drop for LifetimeGuard {
    fn drop(&mut self) {
        self.def.terminate();
    }
}

/// A chain of nested lifetimes where starting the next one terminates the
/// previous one
pub struct SequentialLifetimes {
    parent: Lifetime,
    current: Mutex<Option<LifetimeDefinition>>,
}

impl SequentialLifetimes {
    pub fn new(parent: Lifetime) -> Self {
        SequentialLifetimes {
            parent,
            current: Mutex::new(None),
        }
    }

    /// Terminate the current lifetime and start a new one
    pub fn next(&self) -> Lifetime {
        self.terminate_current();
        let next = self.parent.create_nested();
        let lifetime = next.lifetime();
        *self.current.lock() = Some(next);
        lifetime
    }

    pub fn terminate_current(&self) {
        let previous = self.current.lock().take();
        if let Some(previous) = previous {
            previous.terminate();
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.current
            .lock()
            .as_ref()
            .map_or(true, |def| !def.is_alive())
    }
}

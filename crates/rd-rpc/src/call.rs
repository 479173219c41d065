//! Bound request/response entity
//!
//! Wire payload, keyed by a correlation id:
//! - `[0][task id][request]` request
//! - `[1][task id]` cancel
//! - `[2][task id][result]` response
//!
//! The same entity serves both roles: any end may start calls, and an end
//! with an endpoint installed answers them.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use rd_core::{IdScope, Lifetime, LifetimeDefinition, RdError, RdId, RdResult};
use rd_reactive::{identify_leaf, RdBindable, RdCore, RdLeaf, RdValue};
use rd_wire::{Marshal, SerializationCtx, WireHandler, WireReader, WireWriter};

use crate::{RdEndpoint, RdTask, RdTaskResult, RpcFault};

const OP_REQUEST: u8 = 0;
const OP_CANCEL: u8 = 1;
const OP_RESPONSE: u8 = 2;

/// A request being served
struct Running<Res> {
    lifetime: LifetimeDefinition,
    task: RdTask<Res>,
}

/// Calls started here, awaiting a response
struct Pending<Res> {
    tasks: HashMap<RdId, RdTask<Res>>,
    /// Set while unbound; no call may be registered
    closed: bool,
}

struct CallInner<Req, Res> {
    this: Weak<CallInner<Req, Res>>,
    core: RdCore,
    pending: Mutex<Pending<Res>>,
    /// Requests received here, not yet answered
    running: Mutex<HashMap<RdId, Running<Res>>>,
    endpoint: Mutex<Option<Arc<RdEndpoint<Req, Res>>>>,
}

impl<Req: RdValue, Res: RdValue> CallInner<Req, Res> {
    fn send_response(&self, task_id: RdId, result: &RdTaskResult<Res>) {
        self.core.send(|ctx, w| {
            w.write_u8(OP_RESPONSE);
            w.write_rd_id(task_id);
            result.write(ctx, w);
        });
    }

    fn send_cancel(&self, task_id: RdId) {
        self.core.send(|_, w| {
            w.write_u8(OP_CANCEL);
            w.write_rd_id(task_id);
        });
    }

    fn on_request(&self, task_id: RdId, request: Req) {
        let Some(binding) = self.core.binding() else {
            return;
        };
        let endpoint = self.endpoint.lock().clone();
        let Some(endpoint) = endpoint else {
            tracing::warn!(location = self.core.location(), task = %task_id, "request without endpoint");
            let fault = RpcFault::new(RpcFault::NO_ENDPOINT, format!("no endpoint at {}", self.core.location()));
            self.send_response(task_id, &RdTaskResult::Faulted(fault));
            return;
        };

        let lifetime = binding.lifetime.create_nested();
        let task = endpoint.invoke(&lifetime.lifetime(), request);
        self.running.lock().insert(
            task_id,
            Running {
                lifetime: lifetime.clone(),
                task: task.clone(),
            },
        );

        let call = self.this.clone();
        task.on_complete(move |result| {
            if let Some(call) = call.upgrade() {
                call.running.lock().remove(&task_id);
                call.send_response(task_id, result);
            }
            lifetime.terminate();
        });
    }

    fn on_cancel(&self, task_id: RdId) {
        let running = self.running.lock().remove(&task_id);
        if let Some(running) = running {
            tracing::debug!(location = self.core.location(), task = %task_id, "request cancelled by caller");
            running.lifetime.terminate();
            running.task.set(RdTaskResult::Cancelled);
        }
    }

    /// The binding is going away. Calls still pending are cancelled here
    /// and, while the connection is up, at the other end too.
    fn on_unbound(&self) {
        let pending: Vec<(RdId, RdTask<Res>)> = {
            let mut pending = self.pending.lock();
            pending.closed = true;
            pending.tasks.drain().collect()
        };
        let running: Vec<Running<Res>> = self.running.lock().drain().map(|(_, running)| running).collect();
        if !pending.is_empty() || !running.is_empty() {
            tracing::debug!(
                location = self.core.location(),
                pending = pending.len(),
                running = running.len(),
                "connection lost, cancelling calls"
            );
        }
        let connected = self
            .core
            .binding()
            .map_or(false, |binding| binding.protocol.is_connected());
        for (task_id, task) in pending {
            if task.set(RdTaskResult::Cancelled) && connected {
                self.send_cancel(task_id);
            }
        }
        for running in running {
            running.lifetime.terminate();
            running.task.set(RdTaskResult::Cancelled);
        }
    }

    fn on_response(&self, task_id: RdId, result: RdTaskResult<Res>) {
        let task = self.pending.lock().tasks.remove(&task_id);
        match task {
            Some(task) => {
                task.set(result);
            }
            None => tracing::trace!(location = self.core.location(), task = %task_id, "response for unknown task"),
        }
    }
}

/// Remote procedure call mirrored on both ends
pub struct RdCall<Req, Res> {
    inner: Arc<CallInner<Req, Res>>,
}

impl<Req: RdValue, Res: RdValue> RdCall<Req, Res> {
    pub fn new() -> Self {
        Self::with_core(RdCore::new())
    }

    fn with_core(core: RdCore) -> Self {
        RdCall {
            inner: Arc::new_cyclic(|this| CallInner {
                this: this.clone(),
                core,
                pending: Mutex::new(Pending {
                    tasks: HashMap::new(),
                    closed: true,
                }),
                running: Mutex::new(HashMap::new()),
                endpoint: Mutex::new(None),
            }),
        }
    }

    pub fn id(&self) -> RdId {
        self.inner.core.id()
    }

    pub fn is_bound(&self) -> bool {
        self.inner.core.is_bound()
    }

    /// Calls awaiting a response
    pub fn pending(&self) -> usize {
        self.inner.pending.lock().tasks.len()
    }

    /// Requests currently being served
    pub fn running(&self) -> usize {
        self.inner.running.lock().len()
    }

    /// Install the handler answering requests from the other end
    pub fn set_endpoint(&self, endpoint: RdEndpoint<Req, Res>) {
        *self.inner.endpoint.lock() = Some(Arc::new(endpoint));
    }

    pub fn start(&self, request: Req) -> RdTask<Res> {
        self.start_with(&Lifetime::eternal(), request)
    }

    /// Send `request`; the call is cancelled if `lifetime` ends first.
    ///
    /// An unbound call completes as cancelled right away.
    pub fn start_with(&self, lifetime: &Lifetime, request: Req) -> RdTask<Res> {
        if !lifetime.is_alive() {
            return RdTask::cancelled();
        }

        let registered = {
            let mut pending = self.inner.pending.lock();
            match self.inner.core.binding() {
                Some(binding) if !pending.closed => {
                    let task_id = binding.protocol.identities().next(self.inner.core.id());
                    let task = RdTask::new();
                    pending.tasks.insert(task_id, task.clone());
                    Some((task_id, task))
                }
                _ => None,
            }
        };
        let Some((task_id, task)) = registered else {
            tracing::debug!(location = self.inner.core.location(), "call on unbound entity");
            return RdTask::cancelled();
        };

        let call = Arc::downgrade(&self.inner);
        task.set_cancel_hook(move || {
            if let Some(call) = call.upgrade() {
                call.pending.lock().tasks.remove(&task_id);
                call.send_cancel(task_id);
            }
        });

        if !lifetime.is_eternal() {
            let scope = lifetime.create_nested();
            let cancelling = task.clone();
            scope.lifetime().on_termination(move || {
                cancelling.cancel();
            });
            task.on_complete(move |_| {
                scope.terminate();
            });
        }

        tracing::trace!(location = self.inner.core.location(), task = %task_id, "call started");
        self.inner.core.send(|ctx, w| {
            w.write_u8(OP_REQUEST);
            w.write_rd_id(task_id);
            request.write(ctx, w);
        });
        task
    }

    /// Start a call and wait for its outcome
    pub async fn call(&self, request: Req) -> RdTaskResult<Res> {
        self.start(request).await
    }
}

impl<Req: RdValue, Res: RdValue> Default for RdCall<Req, Res> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Req: RdValue, Res: RdValue> Clone for RdCall<Req, Res> {
    fn clone(&self) -> Self {
        RdCall {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<Req: RdValue, Res: RdValue> fmt::Debug for RdCall<Req, Res> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RdCall")
            .field("id", &self.id())
            .field("pending", &self.pending())
            .field("running", &self.running())
            .finish()
    }
}

impl<Req: RdValue, Res: RdValue> WireHandler for CallInner<Req, Res> {
    fn location(&self) -> &str {
        self.core.location()
    }

    fn on_wire_received(&self, reader: &mut WireReader) -> RdResult<()> {
        let ctx = self.core.ctx()?;
        let op = reader.read_u8()?;
        let task_id = reader.read_rd_id()?;
        match op {
            OP_REQUEST => {
                let request = Req::read(&ctx, reader)?;
                self.on_request(task_id, request);
            }
            OP_CANCEL => self.on_cancel(task_id),
            OP_RESPONSE => {
                let result = RdTaskResult::<Res>::read(&ctx, reader)?;
                self.on_response(task_id, result);
            }
            other => return Err(RdError::ProtocolViolation(format!("unknown call op {}", other))),
        }
        Ok(())
    }
}

impl<Req: RdValue, Res: RdValue> RdLeaf for CallInner<Req, Res> {
    fn core(&self) -> &RdCore {
        &self.core
    }

    fn into_handler(self: Arc<Self>) -> Arc<dyn WireHandler> {
        self
    }

    fn on_bind(&self, lifetime: &Lifetime) {
        self.pending.lock().closed = false;
        let call = self.this.clone();
        lifetime.on_termination(move || {
            if let Some(call) = call.upgrade() {
                call.on_unbound();
            }
        });
    }
}

impl<Req: RdValue, Res: RdValue> RdBindable for RdCall<Req, Res> {
    fn identify(&self, scope: &mut IdScope, location: &str) {
        identify_leaf(&self.inner.core, scope, location);
    }

    fn collect_leaves(&self, out: &mut Vec<Arc<dyn RdLeaf>>) {
        out.push(self.inner.clone());
    }
}

impl<Req: RdValue, Res: RdValue> Marshal for RdCall<Req, Res> {
    fn write(&self, _ctx: &SerializationCtx, w: &mut WireWriter) {
        w.write_rd_id(self.id());
    }

    fn read(_ctx: &SerializationCtx, r: &mut WireReader) -> RdResult<Self> {
        Ok(Self::with_core(RdCore::with_id(r.read_rd_id()?)))
    }
}

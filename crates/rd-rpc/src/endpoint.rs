//! Serving side of a call

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use rd_core::Lifetime;

use crate::{RdTask, RpcFault};

type Handler<Req, Res> = Box<dyn Fn(&Lifetime, Req) -> RdTask<Res> + Send + Sync>;

/// Request handler installed with [`crate::RdCall::set_endpoint`]
pub struct RdEndpoint<Req, Res> {
    handler: Handler<Req, Res>,
}

impl<Req: 'static, Res: Clone + Send + 'static> RdEndpoint<Req, Res> {
    /// Asynchronous handler. The lifetime ends when the request is cancelled
    /// or the connection goes away.
    pub fn new(handler: impl Fn(&Lifetime, Req) -> RdTask<Res> + Send + Sync + 'static) -> Self {
        RdEndpoint {
            handler: Box::new(handler),
        }
    }

    /// Handler answering on the spot
    pub fn sync(handler: impl Fn(Req) -> Result<Res, RpcFault> + Send + Sync + 'static) -> Self {
        Self::new(move |_, request| match handler(request) {
            Ok(response) => RdTask::success(response),
            Err(fault) => RdTask::faulted(fault),
        })
    }

    /// Run the handler, turning a panic into a fault
    pub(crate) fn invoke(&self, lifetime: &Lifetime, request: Req) -> RdTask<Res> {
        match panic::catch_unwind(AssertUnwindSafe(|| (self.handler)(lifetime, request))) {
            Ok(task) => task,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::error!(message = %message, "call handler panicked");
                RdTask::faulted(RpcFault::new(RpcFault::PANIC, message))
            }
        }
    }
}

impl<Req, Res> fmt::Debug for RdEndpoint<Req, Res> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RdEndpoint")
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "handler panicked".to_string()
    }
}

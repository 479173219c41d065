//! Stateless event stream

use std::fmt;
use std::sync::Arc;

use rd_core::{IdScope, Lifetime, RdId, RdResult};
use rd_wire::{Marshal, SerializationCtx, WireHandler, WireReader, WireWriter};

use crate::{identify_leaf, RdBindable, RdCore, RdLeaf, RdValue, Source};

struct SignalInner<T> {
    core: RdCore,
    events: Source<T>,
}

/// Fire-and-forget events, delivered locally and to the other end
pub struct RdSignal<T> {
    inner: Arc<SignalInner<T>>,
}

impl<T: RdValue> RdSignal<T> {
    pub fn new() -> Self {
        Self::with_core(RdCore::new())
    }

    fn with_core(core: RdCore) -> Self {
        RdSignal {
            inner: Arc::new(SignalInner {
                core,
                events: Source::new(),
            }),
        }
    }

    pub fn id(&self) -> RdId {
        self.inner.core.id()
    }

    pub fn is_bound(&self) -> bool {
        self.inner.core.is_bound()
    }

    pub fn fire(&self, value: T) {
        self.inner.core.sequenced(|| {
            self.inner.events.fire(&value);
            self.inner.core.send(|ctx, w| value.write(ctx, w));
        })
    }

    /// Observe events fired from now on. Past events are not replayed.
    pub fn advise(&self, lifetime: &Lifetime, observer: impl Fn(&T) + Send + Sync + 'static) {
        self.inner.events.advise(lifetime, observer);
    }
}

impl<T: RdValue> Default for RdSignal<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: RdValue> Clone for RdSignal<T> {
    fn clone(&self) -> Self {
        RdSignal {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: RdValue> fmt::Debug for RdSignal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RdSignal").field("id", &self.id()).finish()
    }
}

impl<T: RdValue> WireHandler for SignalInner<T> {
    fn location(&self) -> &str {
        self.core.location()
    }

    fn on_wire_received(&self, reader: &mut WireReader) -> RdResult<()> {
        let ctx = self.core.ctx()?;
        let value = T::read(&ctx, reader)?;
        self.core.sequenced(|| self.events.fire(&value));
        Ok(())
    }
}

impl<T: RdValue> RdLeaf for SignalInner<T> {
    fn core(&self) -> &RdCore {
        &self.core
    }

    fn into_handler(self: Arc<Self>) -> Arc<dyn WireHandler> {
        self
    }
}

impl<T: RdValue> RdBindable for RdSignal<T> {
    fn identify(&self, scope: &mut IdScope, location: &str) {
        identify_leaf(&self.inner.core, scope, location);
    }

    fn collect_leaves(&self, out: &mut Vec<Arc<dyn RdLeaf>>) {
        out.push(self.inner.clone());
    }
}

impl<T: RdValue> Marshal for RdSignal<T> {
    fn write(&self, _ctx: &SerializationCtx, w: &mut WireWriter) {
        w.write_rd_id(self.id());
    }

    fn read(_ctx: &SerializationCtx, r: &mut WireReader) -> RdResult<Self> {
        Ok(Self::with_core(RdCore::with_id(r.read_rd_id()?)))
    }
}

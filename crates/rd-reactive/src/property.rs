//! Reactive property: a single value, last write wins

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use rd_core::{IdScope, Lifetime, RdId, RdResult, SequentialLifetimes};
use rd_wire::{Marshal, SerializationCtx, WireHandler, WireReader, WireWriter};

use crate::{identify_leaf, RdBindable, RdCore, RdLeaf, Source};

/// Value carried by reactive primitives
pub trait RdValue: Marshal + Clone + PartialEq + fmt::Debug + Send + Sync + 'static {}

impl<T> RdValue for T where T: Marshal + Clone + PartialEq + fmt::Debug + Send + Sync + 'static {}

struct PropertyInner<T> {
    core: RdCore,
    value: Mutex<T>,
    changes: Source<T>,
}

impl<T: RdValue> PropertyInner<T> {
    /// Store `value`; returns false if it equals the current one
    fn store(&self, value: &T) -> bool {
        let mut current = self.value.lock();
        if *current == *value {
            return false;
        }
        *current = value.clone();
        true
    }
}

/// Observable value mirrored on both ends
pub struct RdProperty<T> {
    inner: Arc<PropertyInner<T>>,
}

impl<T: RdValue> RdProperty<T> {
    pub fn new(value: T) -> Self {
        Self::with_core(RdCore::new(), value)
    }

    fn with_core(core: RdCore, value: T) -> Self {
        RdProperty {
            inner: Arc::new(PropertyInner {
                core,
                value: Mutex::new(value),
                changes: Source::new(),
            }),
        }
    }

    pub fn id(&self) -> RdId {
        self.inner.core.id()
    }

    pub fn is_bound(&self) -> bool {
        self.inner.core.is_bound()
    }

    pub fn get(&self) -> T {
        self.inner.value.lock().clone()
    }

    /// Set the value, notify observers and send it if bound.
    ///
    /// Setting a value equal to the current one does nothing.
    pub fn set(&self, value: T) {
        self.inner.core.sequenced(|| {
            if !self.inner.store(&value) {
                return;
            }
            self.inner.changes.fire(&value);
            self.inner.core.send(|ctx, w| value.write(ctx, w));
        })
    }

    /// Observe the current value once, then every change until `lifetime`
    /// terminates
    pub fn advise(&self, lifetime: &Lifetime, observer: impl Fn(&T) + Send + Sync + 'static) {
        let observer = Arc::new(observer);
        let streaming = Arc::clone(&observer);
        self.inner.core.sequenced(|| {
            if self.inner.changes.advise(lifetime, move |value| streaming(value)) {
                let current = self.get();
                observer(&current);
            }
        })
    }

    /// Observe each value together with a lifetime that ends when the value
    /// is replaced or `lifetime` terminates
    pub fn view(&self, lifetime: &Lifetime, handler: impl Fn(&Lifetime, &T) + Send + Sync + 'static) {
        let sequence = SequentialLifetimes::new(lifetime.clone());
        self.advise(lifetime, move |value| {
            let value_lifetime = sequence.next();
            handler(&value_lifetime, value);
        });
    }
}

impl<T: RdValue + Default> Default for RdProperty<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: RdValue> Clone for RdProperty<T> {
    fn clone(&self) -> Self {
        RdProperty {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: RdValue> fmt::Debug for RdProperty<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RdProperty")
            .field("id", &self.id())
            .field("value", &*self.inner.value.lock())
            .finish()
    }
}

impl<T: RdValue> WireHandler for PropertyInner<T> {
    fn location(&self) -> &str {
        self.core.location()
    }

    fn on_wire_received(&self, reader: &mut WireReader) -> RdResult<()> {
        let ctx = self.core.ctx()?;
        let value = T::read(&ctx, reader)?;
        tracing::trace!(location = self.core.location(), value = ?value, "remote set");
        self.core.sequenced(|| {
            if self.store(&value) {
                self.changes.fire(&value);
            }
        });
        Ok(())
    }
}

impl<T: RdValue> RdLeaf for PropertyInner<T> {
    fn core(&self) -> &RdCore {
        &self.core
    }

    fn into_handler(self: Arc<Self>) -> Arc<dyn WireHandler> {
        self
    }
}

impl<T: RdValue> RdBindable for RdProperty<T> {
    fn identify(&self, scope: &mut IdScope, location: &str) {
        identify_leaf(&self.inner.core, scope, location);
    }

    fn collect_leaves(&self, out: &mut Vec<Arc<dyn RdLeaf>>) {
        out.push(self.inner.clone());
    }
}

impl<T: RdValue> Marshal for RdProperty<T> {
    fn write(&self, ctx: &SerializationCtx, w: &mut WireWriter) {
        w.write_rd_id(self.id());
        self.get().write(ctx, w);
    }

    fn read(ctx: &SerializationCtx, r: &mut WireReader) -> RdResult<Self> {
        let id = r.read_rd_id()?;
        let value = T::read(ctx, r)?;
        Ok(Self::with_core(RdCore::with_id(id), value))
    }
}

impl<T: RdValue> PartialEq for RdProperty<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id() && self.get() == other.get()
    }
}

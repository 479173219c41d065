//! Insertion-ordered set
//!
//! Wire payload: `[op: u8][value]`.

use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use indexmap::IndexSet;
use parking_lot::Mutex;

use rd_core::{IdScope, Lifetime, RdError, RdId, RdResult};
use rd_wire::{Marshal, SerializationCtx, WireHandler, WireReader, WireWriter};

use crate::{identify_leaf, RdBindable, RdCore, RdLeaf, RdValue, Source};

const OP_ADD: u8 = 0;
const OP_REMOVE: u8 = 1;

#[derive(Clone, Debug, PartialEq)]
pub enum SetEvent<T> {
    Add(T),
    Remove(T),
}

/// Element of an [`RdSet`] or key of an [`crate::RdMap`]
pub trait RdKey: RdValue + Eq + Hash {}

impl<T> RdKey for T where T: RdValue + Eq + Hash {}

struct SetInner<T> {
    core: RdCore,
    items: Mutex<IndexSet<T>>,
    changes: Source<SetEvent<T>>,
}

impl<T: RdKey> SetInner<T> {
    fn publish(&self, event: SetEvent<T>) {
        self.changes.fire(&event);
        self.core.send(|ctx, w| match &event {
            SetEvent::Add(value) => {
                w.write_u8(OP_ADD);
                value.write(ctx, w);
            }
            SetEvent::Remove(value) => {
                w.write_u8(OP_REMOVE);
                value.write(ctx, w);
            }
        });
    }
}

/// Set mirrored on both ends, iterated in insertion order
pub struct RdSet<T> {
    inner: Arc<SetInner<T>>,
}

impl<T: RdKey> RdSet<T> {
    pub fn new() -> Self {
        Self::with_core(RdCore::new(), IndexSet::new())
    }

    fn with_core(core: RdCore, items: IndexSet<T>) -> Self {
        RdSet {
            inner: Arc::new(SetInner {
                core,
                items: Mutex::new(items),
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

    pub fn len(&self) -> usize {
        self.inner.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, value: &T) -> bool {
        self.inner.items.lock().contains(value)
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.inner.items.lock().iter().cloned().collect()
    }

    /// Returns false if `value` was already present
    pub fn add(&self, value: T) -> bool {
        self.inner.core.sequenced(|| {
            if !self.inner.items.lock().insert(value.clone()) {
                return false;
            }
            self.inner.publish(SetEvent::Add(value));
            true
        })
    }

    pub fn remove(&self, value: &T) -> bool {
        self.inner.core.sequenced(|| {
            let removed = self.inner.items.lock().shift_remove_full(value);
            match removed {
                Some((_, value)) => {
                    self.inner.publish(SetEvent::Remove(value));
                    true
                }
                None => false,
            }
        })
    }

    pub fn clear(&self) {
        self.inner.core.sequenced(|| {
            for value in self.to_vec() {
                self.remove(&value);
            }
        })
    }

    /// Observe the current elements as additions, then every change
    pub fn advise(&self, lifetime: &Lifetime, observer: impl Fn(&SetEvent<T>) + Send + Sync + 'static) {
        let observer = Arc::new(observer);
        let streaming = Arc::clone(&observer);
        self.inner.core.sequenced(|| {
            if self.inner.changes.advise(lifetime, move |event| streaming(event)) {
                for value in self.to_vec() {
                    observer(&SetEvent::Add(value));
                }
            }
        })
    }
}

impl<T: RdKey> Default for RdSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: RdKey> Clone for RdSet<T> {
    fn clone(&self) -> Self {
        RdSet {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: RdKey> fmt::Debug for RdSet<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RdSet")
            .field("id", &self.id())
            .field("items", &*self.inner.items.lock())
            .finish()
    }
}

impl<T: RdKey> WireHandler for SetInner<T> {
    fn location(&self) -> &str {
        self.core.location()
    }

    fn on_wire_received(&self, reader: &mut WireReader) -> RdResult<()> {
        let ctx = self.core.ctx()?;
        let op = reader.read_u8()?;
        let value = T::read(&ctx, reader)?;
        if op != OP_ADD && op != OP_REMOVE {
            return Err(RdError::ProtocolViolation(format!("unknown set op {}", op)));
        }
        self.core.sequenced(|| {
            let event = if op == OP_ADD {
                self.items.lock().insert(value.clone()).then(|| SetEvent::Add(value))
            } else {
                self.items
                    .lock()
                    .shift_remove_full(&value)
                    .map(|(_, value)| SetEvent::Remove(value))
            };
            if let Some(event) = event {
                self.changes.fire(&event);
            }
        });
        Ok(())
    }
}

impl<T: RdKey> RdLeaf for SetInner<T> {
    fn core(&self) -> &RdCore {
        &self.core
    }

    fn into_handler(self: Arc<Self>) -> Arc<dyn WireHandler> {
        self
    }
}

impl<T: RdKey> RdBindable for RdSet<T> {
    fn identify(&self, scope: &mut IdScope, location: &str) {
        identify_leaf(&self.inner.core, scope, location);
    }

    fn collect_leaves(&self, out: &mut Vec<Arc<dyn RdLeaf>>) {
        out.push(self.inner.clone());
    }
}

impl<T: RdKey> Marshal for RdSet<T> {
    fn write(&self, ctx: &SerializationCtx, w: &mut WireWriter) {
        w.write_rd_id(self.id());
        self.to_vec().write(ctx, w);
    }

    fn read(ctx: &SerializationCtx, r: &mut WireReader) -> RdResult<Self> {
        let id = r.read_rd_id()?;
        let items: IndexSet<T> = Vec::<T>::read(ctx, r)?.into_iter().collect();
        Ok(Self::with_core(RdCore::with_id(id), items))
    }
}

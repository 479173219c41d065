//! Ordered collection with index-addressed changes
//!
//! Wire payload: `[op: u8][index: varint][value]`, where the value is absent
//! for removals.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use rd_core::{IdScope, Lifetime, RdError, RdId, RdResult};
use rd_wire::{Marshal, SerializationCtx, WireHandler, WireReader, WireWriter};

use crate::{identify_leaf, RdBindable, RdCore, RdLeaf, RdValue, Source};

const OP_ADD: u8 = 0;
const OP_UPDATE: u8 = 1;
const OP_REMOVE: u8 = 2;

/// A change to an [`RdList`]
#[derive(Clone, Debug, PartialEq)]
pub enum ListEvent<T> {
    Add { index: usize, value: T },
    Update { index: usize, old: T, value: T },
    Remove { index: usize, value: T },
}

impl<T: RdValue> ListEvent<T> {
    fn write(&self, ctx: &SerializationCtx, w: &mut WireWriter) {
        match self {
            ListEvent::Add { index, value } => {
                w.write_u8(OP_ADD);
                w.write_varint(*index as u64);
                value.write(ctx, w);
            }
            ListEvent::Update { index, value, .. } => {
                w.write_u8(OP_UPDATE);
                w.write_varint(*index as u64);
                value.write(ctx, w);
            }
            ListEvent::Remove { index, .. } => {
                w.write_u8(OP_REMOVE);
                w.write_varint(*index as u64);
            }
        }
    }
}

struct ListInner<T> {
    core: RdCore,
    items: Mutex<Vec<T>>,
    changes: Source<ListEvent<T>>,
}

impl<T: RdValue> ListInner<T> {
    fn publish(&self, event: ListEvent<T>) {
        self.changes.fire(&event);
        self.core.send(|ctx, w| event.write(ctx, w));
    }

    fn violation(&self, reason: String) -> RdError {
        RdError::ConsistencyViolation {
            location: self.core.location().to_string(),
            reason,
        }
    }

    fn apply_remote(&self, op: u8, index: usize, reader: &mut WireReader) -> RdResult<ListEvent<T>> {
        let ctx = self.core.ctx()?;
        let value = match op {
            OP_ADD | OP_UPDATE => Some(T::read(&ctx, reader)?),
            OP_REMOVE => None,
            other => return Err(RdError::ProtocolViolation(format!("unknown list op {}", other))),
        };

        let mut items = self.items.lock();
        let len = items.len();
        match (op, value) {
            (OP_ADD, Some(value)) if index <= len => {
                items.insert(index, value.clone());
                Ok(ListEvent::Add { index, value })
            }
            (OP_UPDATE, Some(value)) if index < len => {
                let old = std::mem::replace(&mut items[index], value.clone());
                Ok(ListEvent::Update { index, old, value })
            }
            (OP_REMOVE, None) if index < len => {
                let value = items.remove(index);
                Ok(ListEvent::Remove { index, value })
            }
            _ => Err(self.violation(format!("op {} at index {} out of range, len {}", op, index, len))),
        }
    }
}

/// Ordered list mirrored on both ends
pub struct RdList<T> {
    inner: Arc<ListInner<T>>,
}

impl<T: RdValue> RdList<T> {
    pub fn new() -> Self {
        Self::with_core(RdCore::new(), Vec::new())
    }

    fn with_core(core: RdCore, items: Vec<T>) -> Self {
        RdList {
            inner: Arc::new(ListInner {
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

    pub fn get(&self, index: usize) -> Option<T> {
        self.inner.items.lock().get(index).cloned()
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.inner.items.lock().clone()
    }

    pub fn add(&self, value: T) {
        self.inner.core.sequenced(|| {
            let index = {
                let mut items = self.inner.items.lock();
                items.push(value.clone());
                items.len() - 1
            };
            self.inner.publish(ListEvent::Add { index, value });
        })
    }

    /// Insert at `index`; returns false if `index > len`
    pub fn insert(&self, index: usize, value: T) -> bool {
        self.inner.core.sequenced(|| {
            {
                let mut items = self.inner.items.lock();
                if index > items.len() {
                    return false;
                }
                items.insert(index, value.clone());
            }
            self.inner.publish(ListEvent::Add { index, value });
            true
        })
    }

    /// Replace the element at `index`, returning the old one
    pub fn set(&self, index: usize, value: T) -> Option<T> {
        self.inner.core.sequenced(|| {
            let old = {
                let mut items = self.inner.items.lock();
                let slot = items.get_mut(index)?;
                std::mem::replace(slot, value.clone())
            };
            self.inner.publish(ListEvent::Update {
                index,
                old: old.clone(),
                value,
            });
            Some(old)
        })
    }

    pub fn remove_at(&self, index: usize) -> Option<T> {
        self.inner.core.sequenced(|| {
            let value = {
                let mut items = self.inner.items.lock();
                if index >= items.len() {
                    return None;
                }
                items.remove(index)
            };
            self.inner.publish(ListEvent::Remove {
                index,
                value: value.clone(),
            });
            Some(value)
        })
    }

    /// Remove the first element equal to `value`
    pub fn remove(&self, value: &T) -> bool {
        self.inner.core.sequenced(|| {
            let index = self.inner.items.lock().iter().position(|item| item == value);
            match index {
                Some(index) => self.remove_at(index).is_some(),
                None => false,
            }
        })
    }

    /// Remove every element, last to first
    pub fn clear(&self) {
        self.inner.core.sequenced(|| {
            while let Some(last) = self.len().checked_sub(1) {
                self.remove_at(last);
            }
        })
    }

    /// Observe the current contents as additions, then every change
    pub fn advise(&self, lifetime: &Lifetime, observer: impl Fn(&ListEvent<T>) + Send + Sync + 'static) {
        let observer = Arc::new(observer);
        let streaming = Arc::clone(&observer);
        self.inner.core.sequenced(|| {
            if self.inner.changes.advise(lifetime, move |event| streaming(event)) {
                for (index, value) in self.to_vec().into_iter().enumerate() {
                    observer(&ListEvent::Add { index, value });
                }
            }
        })
    }
}

impl<T: RdValue> Default for RdList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: RdValue> Clone for RdList<T> {
    fn clone(&self) -> Self {
        RdList {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: RdValue> fmt::Debug for RdList<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RdList")
            .field("id", &self.id())
            .field("items", &*self.inner.items.lock())
            .finish()
    }
}

impl<T: RdValue> WireHandler for ListInner<T> {
    fn location(&self) -> &str {
        self.core.location()
    }

    fn on_wire_received(&self, reader: &mut WireReader) -> RdResult<()> {
        let op = reader.read_u8()?;
        let index = reader.read_varint()? as usize;
        self.core.sequenced(|| {
            let event = self.apply_remote(op, index, reader)?;
            tracing::trace!(location = self.core.location(), event = ?event, "remote list change");
            self.changes.fire(&event);
            Ok(())
        })
    }
}

impl<T: RdValue> RdLeaf for ListInner<T> {
    fn core(&self) -> &RdCore {
        &self.core
    }

    fn into_handler(self: Arc<Self>) -> Arc<dyn WireHandler> {
        self
    }
}

impl<T: RdValue> RdBindable for RdList<T> {
    fn identify(&self, scope: &mut IdScope, location: &str) {
        identify_leaf(&self.inner.core, scope, location);
    }

    fn collect_leaves(&self, out: &mut Vec<Arc<dyn RdLeaf>>) {
        out.push(self.inner.clone());
    }
}

impl<T: RdValue> Marshal for RdList<T> {
    fn write(&self, ctx: &SerializationCtx, w: &mut WireWriter) {
        w.write_rd_id(self.id());
        self.to_vec().write(ctx, w);
    }

    fn read(ctx: &SerializationCtx, r: &mut WireReader) -> RdResult<Self> {
        let id = r.read_rd_id()?;
        let items = Vec::<T>::read(ctx, r)?;
        Ok(Self::with_core(RdCore::with_id(id), items))
    }
}

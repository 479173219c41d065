//! Insertion-ordered map
//!
//! Wire payload: `[op: u8][key][value]`, value absent for removals.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;

use rd_core::{IdScope, Lifetime, RdError, RdId, RdResult};
use rd_wire::{Marshal, SerializationCtx, WireHandler, WireReader, WireWriter};

use crate::{identify_leaf, RdBindable, RdCore, RdKey, RdLeaf, RdValue, Source};

const OP_ADD: u8 = 0;
const OP_UPDATE: u8 = 1;
const OP_REMOVE: u8 = 2;

#[derive(Clone, Debug, PartialEq)]
pub enum MapEvent<K, V> {
    Add { key: K, value: V },
    Update { key: K, old: V, value: V },
    Remove { key: K, value: V },
}

impl<K: RdKey, V: RdValue> MapEvent<K, V> {
    fn write(&self, ctx: &SerializationCtx, w: &mut WireWriter) {
        match self {
            MapEvent::Add { key, value } => {
                w.write_u8(OP_ADD);
                key.write(ctx, w);
                value.write(ctx, w);
            }
            MapEvent::Update { key, value, .. } => {
                w.write_u8(OP_UPDATE);
                key.write(ctx, w);
                value.write(ctx, w);
            }
            MapEvent::Remove { key, .. } => {
                w.write_u8(OP_REMOVE);
                key.write(ctx, w);
            }
        }
    }
}

struct MapInner<K, V> {
    core: RdCore,
    entries: Mutex<IndexMap<K, V>>,
    changes: Source<MapEvent<K, V>>,
}

impl<K: RdKey, V: RdValue> MapInner<K, V> {
    fn publish(&self, event: MapEvent<K, V>) {
        self.changes.fire(&event);
        self.core.send(|ctx, w| event.write(ctx, w));
    }

    /// Insert or replace; `None` if the stored value already equals `value`
    fn upsert(&self, key: K, value: V) -> Option<MapEvent<K, V>> {
        let mut entries = self.entries.lock();
        match entries.get_mut(&key) {
            Some(slot) if *slot == value => None,
            Some(slot) => {
                let old = std::mem::replace(slot, value.clone());
                Some(MapEvent::Update { key, old, value })
            }
            None => {
                entries.insert(key.clone(), value.clone());
                Some(MapEvent::Add { key, value })
            }
        }
    }
}

/// Map mirrored on both ends, iterated in insertion order
pub struct RdMap<K, V> {
    inner: Arc<MapInner<K, V>>,
}

impl<K: RdKey, V: RdValue> RdMap<K, V> {
    pub fn new() -> Self {
        Self::with_core(RdCore::new(), IndexMap::new())
    }

    fn with_core(core: RdCore, entries: IndexMap<K, V>) -> Self {
        RdMap {
            inner: Arc::new(MapInner {
                core,
                entries: Mutex::new(entries),
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
        self.inner.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.inner.entries.lock().get(key).cloned()
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.inner.entries.lock().contains_key(key)
    }

    pub fn keys(&self) -> Vec<K> {
        self.inner.entries.lock().keys().cloned().collect()
    }

    pub fn to_vec(&self) -> Vec<(K, V)> {
        self.inner
            .entries
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Insert or update, returning the previous value
    pub fn insert(&self, key: K, value: V) -> Option<V> {
        self.inner.core.sequenced(|| {
            let event = self.inner.upsert(key, value)?;
            let previous = match &event {
                MapEvent::Update { old, .. } => Some(old.clone()),
                _ => None,
            };
            self.inner.publish(event);
            previous
        })
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.inner.core.sequenced(|| {
            let (key, value) = {
                let mut entries = self.inner.entries.lock();
                let (_, key, value) = entries.shift_remove_full(key)?;
                (key, value)
            };
            self.inner.publish(MapEvent::Remove {
                key,
                value: value.clone(),
            });
            Some(value)
        })
    }

    pub fn clear(&self) {
        self.inner.core.sequenced(|| {
            for key in self.keys() {
                self.remove(&key);
            }
        })
    }

    /// Observe the current entries as additions, then every change
    pub fn advise(&self, lifetime: &Lifetime, observer: impl Fn(&MapEvent<K, V>) + Send + Sync + 'static) {
        let observer = Arc::new(observer);
        let streaming = Arc::clone(&observer);
        self.inner.core.sequenced(|| {
            if self.inner.changes.advise(lifetime, move |event| streaming(event)) {
                for (key, value) in self.to_vec() {
                    observer(&MapEvent::Add { key, value });
                }
            }
        })
    }
}

impl<K: RdKey, V: RdValue> Default for RdMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: RdKey, V: RdValue> Clone for RdMap<K, V> {
    fn clone(&self) -> Self {
        RdMap {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K: RdKey, V: RdValue> fmt::Debug for RdMap<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RdMap")
            .field("id", &self.id())
            .field("entries", &*self.inner.entries.lock())
            .finish()
    }
}

impl<K: RdKey, V: RdValue> WireHandler for MapInner<K, V> {
    fn location(&self) -> &str {
        self.core.location()
    }

    fn on_wire_received(&self, reader: &mut WireReader) -> RdResult<()> {
        let ctx = self.core.ctx()?;
        self.core.sequenced(|| {
            let op = reader.read_u8()?;
            let key = K::read(&ctx, reader)?;
            let event = match op {
                OP_ADD | OP_UPDATE => {
                    let value = V::read(&ctx, reader)?;
                    self.upsert(key, value)
                }
                OP_REMOVE => {
                    let removed = self.entries.lock().shift_remove_full(&key);
                    match removed {
                        Some((_, key, value)) => Some(MapEvent::Remove { key, value }),
                        None => {
                            return Err(RdError::ConsistencyViolation {
                                location: self.core.location().to_string(),
                                reason: format!("remove of missing key {:?}", key),
                            })
                        }
                    }
                }
                other => return Err(RdError::ProtocolViolation(format!("unknown map op {}", other))),
            };
            if let Some(event) = event {
                tracing::trace!(location = self.core.location(), event = ?event, "remote map change");
                self.changes.fire(&event);
            }
            Ok(())
        })
    }
}

impl<K: RdKey, V: RdValue> RdLeaf for MapInner<K, V> {
    fn core(&self) -> &RdCore {
        &self.core
    }

    fn into_handler(self: Arc<Self>) -> Arc<dyn WireHandler> {
        self
    }
}

impl<K: RdKey, V: RdValue> RdBindable for RdMap<K, V> {
    fn identify(&self, scope: &mut IdScope, location: &str) {
        identify_leaf(&self.inner.core, scope, location);
    }

    fn collect_leaves(&self, out: &mut Vec<Arc<dyn RdLeaf>>) {
        out.push(self.inner.clone());
    }
}

impl<K: RdKey, V: RdValue> Marshal for RdMap<K, V> {
    fn write(&self, ctx: &SerializationCtx, w: &mut WireWriter) {
        w.write_rd_id(self.id());
        self.to_vec().write(ctx, w);
    }

    fn read(ctx: &SerializationCtx, r: &mut WireReader) -> RdResult<Self> {
        let id = r.read_rd_id()?;
        let entries: IndexMap<K, V> = Vec::<(K, V)>::read(ctx, r)?.into_iter().collect();
        Ok(Self::with_core(RdCore::with_id(id), entries))
    }
}

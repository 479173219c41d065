//! Message broker - routes inbound frames to bound entities
//!
//! Frames addressed to an id without a handler are buffered in a bounded
//! per-id queue and replayed, in arrival order, once the id is bound. The
//! buffers of all unbound ids share a second, global bound.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use indexmap::IndexMap;
use parking_lot::Mutex;

use rd_core::{Lifetime, OverflowPolicy, ProtocolConfig, RdError, RdId, RdResult};

use crate::{Frame, WireReader};

/// Receiving side of a bound entity
pub trait WireHandler: Send + Sync {
    /// Human readable location used in logs
    fn location(&self) -> &str;

    /// Apply one inbound payload
    fn on_wire_received(&self, reader: &mut WireReader) -> RdResult<()>;
}

/// Broker counters
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BrokerStats {
    pub delivered: u64,
    pub buffered: u64,
    pub replayed: u64,
    pub dropped_overflow: u64,
    pub dropped_poisoned: u64,
    pub protocol_violations: u64,
    pub consistency_errors: u64,
}

struct Registration {
    handler: Arc<dyn WireHandler>,
    generation: u64,
    /// Cleared until buffered frames have been replayed
    ready: bool,
}

#[derive(Default)]
struct BrokerState {
    handlers: HashMap<RdId, Registration>,
    /// Oldest buffering id first
    pending: IndexMap<RdId, VecDeque<Bytes>>,
    pending_total: usize,
    poisoned: HashSet<RdId>,
    next_generation: u64,
    stats: BrokerStats,
}

/// Id → handler routing table
pub struct MessageBroker {
    config: ProtocolConfig,
    state: Mutex<BrokerState>,
}

impl MessageBroker {
    pub fn new(config: ProtocolConfig) -> Arc<Self> {
        Arc::new(MessageBroker {
            config,
            state: Mutex::new(BrokerState::default()),
        })
    }

    pub fn stats(&self) -> BrokerStats {
        self.state.lock().stats.clone()
    }

    pub fn is_bound(&self, id: RdId) -> bool {
        self.state.lock().handlers.contains_key(&id)
    }

    pub fn is_poisoned(&self, id: RdId) -> bool {
        self.state.lock().poisoned.contains(&id)
    }

    /// Frames waiting for `id` to be bound
    pub fn buffered(&self, id: RdId) -> usize {
        self.state
            .lock()
            .pending
            .get(&id)
            .map_or(0, |queue| queue.len())
    }

    /// Frames waiting across all unbound ids
    pub fn buffered_total(&self) -> usize {
        self.state.lock().pending_total
    }

    /// Bind one handler and replay its buffered frames
    pub fn bind(
        self: &Arc<Self>,
        lifetime: &Lifetime,
        id: RdId,
        handler: Arc<dyn WireHandler>,
    ) -> RdResult<()> {
        self.bind_all(lifetime, vec![(id, handler)])?;
        self.replay(&[id]);
        Ok(())
    }

    /// Bind a group of handlers, all or none.
    ///
    /// Bound ids keep buffering until [`MessageBroker::replay`] is called for
    /// them. Registrations are removed when `lifetime` terminates.
    pub fn bind_all(
        self: &Arc<Self>,
        lifetime: &Lifetime,
        entries: Vec<(RdId, Arc<dyn WireHandler>)>,
    ) -> RdResult<()> {
        if !lifetime.is_alive() {
            return Err(RdError::LifetimeTerminated);
        }

        let bound: Vec<(RdId, u64)> = {
            let mut state = self.state.lock();
            let mut seen = HashSet::with_capacity(entries.len());
            for (id, _) in &entries {
                if id.is_null() {
                    return Err(RdError::ProtocolViolation(
                        "cannot bind the null id".into(),
                    ));
                }
                if state.handlers.contains_key(id) || !seen.insert(*id) {
                    return Err(RdError::DuplicateBind(*id));
                }
            }

            let mut bound = Vec::with_capacity(entries.len());
            for (id, handler) in entries {
                let generation = state.next_generation;
                state.next_generation += 1;
                tracing::debug!(id = %id, location = handler.location(), "bind");
                state.handlers.insert(
                    id,
                    Registration {
                        handler,
                        generation,
                        ready: false,
                    },
                );
                bound.push((id, generation));
            }
            bound
        };

        let broker: Weak<MessageBroker> = Arc::downgrade(self);
        lifetime.on_termination(move || {
            if let Some(broker) = broker.upgrade() {
                broker.unbind(&bound);
            }
        });
        Ok(())
    }

    /// Deliver buffered frames for `ids`, in the given order, then route
    /// further frames directly. Replay of an id stops at the frame that
    /// poisons it; the rest is dropped.
    pub fn replay(&self, ids: &[RdId]) {
        for id in ids {
            loop {
                let (handler, batch) = {
                    let mut state = self.state.lock();
                    let Some(handler) = state.handlers.get(id).map(|r| Arc::clone(&r.handler)) else {
                        break;
                    };
                    let batch = state.pending.shift_remove(id).unwrap_or_default();
                    state.pending_total -= batch.len();
                    if batch.is_empty() || state.poisoned.contains(id) {
                        state.stats.dropped_poisoned += batch.len() as u64;
                        if let Some(registration) = state.handlers.get_mut(id) {
                            registration.ready = true;
                        }
                        break;
                    }
                    (handler, batch)
                };
                tracing::debug!(id = %id, frames = batch.len(), "replaying buffered frames");
                let mut batch = batch.into_iter();
                while let Some(payload) = batch.next() {
                    self.deliver(*id, &handler, payload);
                    let mut state = self.state.lock();
                    state.stats.replayed += 1;
                    if state.poisoned.contains(id) && batch.len() > 0 {
                        tracing::debug!(id = %id, dropped = batch.len(), "replay stopped at unusable entity");
                        state.stats.dropped_poisoned += batch.len() as u64;
                        break;
                    }
                }
            }
        }
    }

    fn unbind(&self, bound: &[(RdId, u64)]) {
        let mut state = self.state.lock();
        for (id, generation) in bound.iter().rev() {
            let current = state.handlers.get(id).map(|r| r.generation);
            if current == Some(*generation) {
                state.handlers.remove(id);
                state.poisoned.remove(id);
                if let Some(queue) = state.pending.shift_remove(id) {
                    state.pending_total -= queue.len();
                }
                tracing::debug!(id = %id, "unbind");
            }
        }
    }

    /// Route one inbound frame
    pub fn dispatch(&self, frame: Frame) {
        let Frame { id, payload } = frame;
        let handler = {
            let mut state = self.state.lock();
            if state.poisoned.contains(&id) {
                state.stats.dropped_poisoned += 1;
                tracing::trace!(id = %id, "dropping frame for unusable entity");
                return;
            }
            let ready = state
                .handlers
                .get(&id)
                .filter(|registration| registration.ready)
                .map(|registration| Arc::clone(&registration.handler));
            match ready {
                Some(handler) => handler,
                None => {
                    self.buffer(&mut state, id, payload);
                    return;
                }
            }
        };

        tracing::trace!(id = %id, len = payload.len(), "dispatch");
        self.deliver(id, &handler, payload);
    }

    fn buffer(&self, state: &mut BrokerState, id: RdId, payload: Bytes) {
        let per_id = self.config.max_buffered_per_id;
        let total = self.config.max_buffered_total;
        let policy = self.config.overflow_policy;
        let queued = state.pending.get(&id).map_or(0, VecDeque::len);

        if queued >= per_id {
            state.stats.dropped_overflow += 1;
            tracing::warn!(id = %id, limit = per_id, ?policy, "buffer overflow for unbound entity");
            if policy == OverflowPolicy::DropNewest || per_id == 0 {
                return;
            }
            if let Some(queue) = state.pending.get_mut(&id) {
                if queue.pop_front().is_some() {
                    state.pending_total -= 1;
                }
            }
        } else if state.pending_total >= total {
            state.stats.dropped_overflow += 1;
            tracing::warn!(id = %id, limit = total, ?policy, "buffer overflow across unbound entities");
            if policy == OverflowPolicy::DropNewest || total == 0 {
                return;
            }
            Self::evict_oldest(state);
        }

        state.pending.entry(id).or_default().push_back(payload);
        state.pending_total += 1;
        state.stats.buffered += 1;
    }

    /// Drop the oldest frame of the id that started buffering first
    fn evict_oldest(state: &mut BrokerState) {
        let emptied = match state.pending.first_mut() {
            Some((_, queue)) => {
                if queue.pop_front().is_some() {
                    state.pending_total -= 1;
                }
                queue.is_empty()
            }
            None => return,
        };
        if emptied {
            state.pending.shift_remove_index(0);
        }
    }

    fn deliver(&self, id: RdId, handler: &Arc<dyn WireHandler>, payload: Bytes) {
        let mut reader = WireReader::new(payload);
        let result = handler
            .on_wire_received(&mut reader)
            .and_then(|_| reader.expect_end());

        let mut state = self.state.lock();
        match result {
            Ok(()) => state.stats.delivered += 1,
            Err(e) if e.is_fatal_to_entity() => {
                tracing::error!(id = %id, location = handler.location(), error = %e, "protocol violation, entity marked unusable");
                state.stats.protocol_violations += 1;
                state.poisoned.insert(id);
            }
            Err(e) => {
                tracing::warn!(id = %id, location = handler.location(), error = %e, "rejected remote change");
                state.stats.consistency_errors += 1;
            }
        }
    }
}

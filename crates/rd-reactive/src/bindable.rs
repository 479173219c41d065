//! Identity and binding shared by every reactive primitive
//!
//! Binding happens in two steps. [`RdBindable::identify`] walks a tree top
//! down and hands out ids from an explicit [`IdScope`]. Once every leaf is
//! registered with the broker, [`RdCore::attach`] enables outbound sends for
//! the lifetime of the connection.

use std::sync::{Arc, OnceLock};

use parking_lot::{Mutex, ReentrantMutex};

use rd_core::{IdScope, Lifetime, RdError, RdId, RdResult};
use rd_wire::{SerializationCtx, WireHandler, WireWriter};

use crate::Protocol;

/// Where a bound primitive sends to
#[derive(Clone)]
pub struct Binding {
    pub protocol: Arc<Protocol>,
    pub lifetime: Lifetime,
}

struct CoreState {
    id: RdId,
    binding: Option<Binding>,
}

/// Id, location and binding of one primitive
pub struct RdCore {
    location: OnceLock<String>,
    state: Arc<Mutex<CoreState>>,
    /// Orders local mutations and inbound frames of this primitive
    sequence: ReentrantMutex<()>,
}

impl RdCore {
    pub fn new() -> Self {
        Self::with_id(RdId::NULL)
    }

    /// A core whose id was read from the wire
    pub fn with_id(id: RdId) -> Self {
        RdCore {
            location: OnceLock::new(),
            state: Arc::new(Mutex::new(CoreState { id, binding: None })),
            sequence: ReentrantMutex::new(()),
        }
    }

    pub fn id(&self) -> RdId {
        self.state.lock().id
    }

    /// Dotted path used in logs
    pub fn location(&self) -> &str {
        self.location.get().map_or("<unidentified>", String::as_str)
    }

    pub fn identify(&self, id: RdId, location: &str) {
        self.state.lock().id = id;
        if self.location.set(location.to_string()).is_err() && self.location() != location {
            tracing::warn!(id = %id, previous = self.location(), location, "primitive identified twice");
        }
    }

    pub fn is_bound(&self) -> bool {
        self.state.lock().binding.is_some()
    }

    pub fn binding(&self) -> Option<Binding> {
        self.state.lock().binding.clone()
    }

    /// Enable sends until `binding.lifetime` terminates
    pub fn attach(&self, binding: Binding) {
        let lifetime = binding.lifetime.clone();
        self.state.lock().binding = Some(binding);

        let state = Arc::downgrade(&self.state);
        lifetime.on_termination(move || {
            if let Some(state) = state.upgrade() {
                state.lock().binding = None;
            }
        });
    }

    /// Serialization context of the bound protocol
    pub fn ctx(&self) -> RdResult<SerializationCtx> {
        self.state
            .lock()
            .binding
            .as_ref()
            .map(|binding| binding.protocol.serialization_ctx().clone())
            .ok_or_else(|| RdError::ProtocolViolation(format!("{} received a frame while unbound", self.location())))
    }

    /// Run `f` exclusively with respect to every other mutation and inbound
    /// frame of this primitive, so local apply order equals send order.
    /// Re-entrant: observers may mutate the primitive they observe.
    pub fn sequenced<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = self.sequence.lock();
        f()
    }

    /// Send one payload if bound. Local state never depends on the outcome.
    pub fn send(&self, write: impl FnOnce(&SerializationCtx, &mut WireWriter)) {
        let (id, binding) = {
            let state = self.state.lock();
            match &state.binding {
                Some(binding) => (state.id, binding.clone()),
                None => return,
            }
        };

        let mut writer = WireWriter::new();
        write(binding.protocol.serialization_ctx(), &mut writer);
        if let Err(e) = binding.protocol.wire().send(id, writer.freeze()) {
            tracing::debug!(location = self.location(), error = %e, "send dropped");
        }
    }
}

impl Default for RdCore {
    fn default() -> Self {
        Self::new()
    }
}

/// A node of the object tree
pub trait RdBindable: Send + Sync {
    /// Assign ids to this node and its children, in declaration order
    fn identify(&self, scope: &mut IdScope, location: &str);

    /// Leaves to register with the broker, in declaration order
    fn collect_leaves(&self, out: &mut Vec<Arc<dyn RdLeaf>>);
}

/// A primitive owning a broker registration
pub trait RdLeaf: WireHandler {
    fn core(&self) -> &RdCore;

    fn into_handler(self: Arc<Self>) -> Arc<dyn WireHandler>;

    /// Called once sends are enabled, before buffered frames are replayed
    fn on_bind(&self, _lifetime: &Lifetime) {}
}

/// Identify a single leaf
pub fn identify_leaf(core: &RdCore, scope: &mut IdScope, location: &str) {
    core.identify(scope.next(), location);
}

/// Identify a nested entity and its children
pub fn identify_entity(
    core: &RdCore,
    scope: &mut IdScope,
    location: &str,
    children: &[(&str, &dyn RdBindable)],
) {
    let id = scope.next();
    core.identify(id, location);
    let mut child_scope = scope.child_scope(id);
    for (name, child) in children {
        child.identify(&mut child_scope, &format!("{}.{}", location, name));
    }
}

/// Bind leaves atomically, enable sends, then replay buffered frames in
/// declaration order
pub fn bind_leaves(protocol: &Arc<Protocol>, lifetime: &Lifetime, leaves: &[Arc<dyn RdLeaf>]) -> RdResult<()> {
    let entries = leaves
        .iter()
        .map(|leaf| (leaf.core().id(), Arc::clone(leaf).into_handler()))
        .collect();
    protocol.broker().bind_all(lifetime, entries)?;

    for leaf in leaves {
        leaf.core().attach(Binding {
            protocol: Arc::clone(protocol),
            lifetime: lifetime.clone(),
        });
        leaf.on_bind(lifetime);
    }

    let ids: Vec<RdId> = leaves.iter().map(|leaf| leaf.core().id()).collect();
    protocol.broker().replay(&ids);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rd_core::LifetimeDefinition;

    #[test]
    fn test_identify_records_id_and_location() {
        let core = RdCore::new();
        let mut scope = IdScope::new(RdId(99));
        identify_leaf(&core, &mut scope, "Root.field");
        assert_eq!(core.id(), RdId(99).child(0));
        assert_eq!(core.location(), "Root.field");
    }

    #[test]
    fn test_unbound_core_has_no_ctx() {
        let core = RdCore::new();
        assert!(!core.is_bound());
        assert!(matches!(core.ctx(), Err(RdError::ProtocolViolation(_))));
    }

    #[test]
    fn test_binding_cleared_with_lifetime() {
        let protocol = Protocol::builder("test").build(Box::new(|_: bytes::Bytes| -> RdResult<()> { Ok(()) }));
        let core = RdCore::new();
        let def = LifetimeDefinition::new();
        core.attach(Binding {
            protocol,
            lifetime: def.lifetime(),
        });
        assert!(core.is_bound());
        def.terminate();
        assert!(!core.is_bound());
    }
}

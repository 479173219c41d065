//! Extension roots: named groups of primitives bound as one unit
//!
//! A root moves `Unbound -> Identified -> Connected -> Disposed`. Connecting
//! identifies the subtree under `root_id().mix_str(name)`, binds every leaf
//! atomically, enables sends and replays frames that arrived early.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use rd_core::{IdScope, Lifetime, LifetimeDefinition, RdError, RdId, RdResult};

use crate::{bind_leaves, Protocol, RdBindable, RdLeaf};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExtStatus {
    Unbound,
    Identified,
    Connected,
    Disposed,
}

struct ExtState {
    status: ExtStatus,
    id: RdId,
    connection: Option<LifetimeDefinition>,
}

/// Connection state machine of an extension root
pub struct RdExtBase {
    name: String,
    state: Arc<Mutex<ExtState>>,
}

impl RdExtBase {
    pub fn new(name: impl Into<String>) -> Self {
        RdExtBase {
            name: name.into(),
            state: Arc::new(Mutex::new(ExtState {
                status: ExtStatus::Unbound,
                id: RdId::NULL,
                connection: None,
            })),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> ExtStatus {
        self.state.lock().status
    }

    /// Root id, null until identified
    pub fn id(&self) -> RdId {
        self.state.lock().id
    }

    pub fn is_connected(&self) -> bool {
        self.status() == ExtStatus::Connected
    }

    /// Lifetime of the current connection
    pub fn connection(&self) -> Option<Lifetime> {
        self.state
            .lock()
            .connection
            .as_ref()
            .map(LifetimeDefinition::lifetime)
    }

    /// Assign ids to `children` in declaration order
    pub fn identify(&self, protocol: &Protocol, children: &[(&str, &dyn RdBindable)]) -> RdId {
        let id = protocol.root_id().mix_str(&self.name);
        let mut scope = IdScope::new(id);
        for (field, child) in children {
            child.identify(&mut scope, &format!("{}.{}", self.name, field));
        }

        let mut state = self.state.lock();
        state.id = id;
        if state.status == ExtStatus::Unbound {
            state.status = ExtStatus::Identified;
        }
        id
    }

    /// Identify, bind and connect `children` for the intersection of
    /// `lifetime` and the protocol's connection.
    ///
    /// On failure nothing stays bound and the root remains `Identified`.
    pub fn connect(
        &self,
        lifetime: &Lifetime,
        protocol: &Arc<Protocol>,
        children: &[(&str, &dyn RdBindable)],
    ) -> RdResult<Lifetime> {
        match self.status() {
            ExtStatus::Connected | ExtStatus::Disposed => {
                return Err(RdError::AlreadyConnected(self.name.clone()));
            }
            ExtStatus::Unbound | ExtStatus::Identified => {}
        }
        if !lifetime.is_alive() || !protocol.is_connected() {
            return Err(RdError::LifetimeTerminated);
        }

        let id = self.identify(protocol, children);

        let mut leaves: Vec<Arc<dyn RdLeaf>> = Vec::new();
        for (_, child) in children {
            child.collect_leaves(&mut leaves);
        }

        let connection = lifetime.intersect(&protocol.lifetime());
        if let Err(e) = bind_leaves(protocol, &connection.lifetime(), &leaves) {
            tracing::warn!(root = %self.name, error = %e, "connect failed");
            connection.terminate();
            return Err(e);
        }

        {
            let mut state = self.state.lock();
            state.status = ExtStatus::Connected;
            state.connection = Some(connection.clone());
        }

        let state = Arc::downgrade(&self.state);
        let name = self.name.clone();
        connection.lifetime().on_termination(move || {
            if let Some(state) = state.upgrade() {
                let mut state = state.lock();
                state.status = ExtStatus::Disposed;
                state.connection = None;
            }
            tracing::debug!(root = %name, "disposed");
        });

        tracing::debug!(root = %self.name, id = %id, leaves = leaves.len(), protocol = protocol.name(), "connected");
        Ok(connection.lifetime())
    }

    /// Terminate the connection, releasing every binding
    pub fn dispose(&self) {
        let connection = self.state.lock().connection.take();
        match connection {
            Some(connection) => {
                connection.terminate();
            }
            None => self.state.lock().status = ExtStatus::Disposed,
        }
    }
}

impl fmt::Debug for RdExtBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RdExtBase")
            .field("name", &self.name)
            .field("status", &self.status())
            .field("id", &self.id())
            .finish()
    }
}

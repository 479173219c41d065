//! Protocol instance - one end of a connection
//!
//! Ties together the id allocator, the serializer registry, the scheduler
//! and the wire. Everything bound through a protocol lives at most as long
//! as its connection lifetime.

use std::fmt;
use std::sync::Arc;

use rd_core::{
    IdKind, Identities, Lifetime, ProtocolConfig, RdId, RdResult, Scheduler, SynchronousScheduler,
};
use rd_wire::{FrameSink, MessageBroker, SerializationCtx, Serializers, Wire};

/// Name hashed into the root id shared by both ends
const ROOT_NAME: &str = "rd.protocol.root";

pub struct Protocol {
    name: String,
    identities: Identities,
    ctx: SerializationCtx,
    wire: Wire,
}

impl Protocol {
    pub fn builder(name: impl Into<String>) -> ProtocolBuilder {
        ProtocolBuilder::new(name.into())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Parent id of every extension root on this connection
    pub fn root_id(&self) -> RdId {
        RdId::NULL.mix_str(ROOT_NAME)
    }

    pub fn identities(&self) -> &Identities {
        &self.identities
    }

    pub fn serializers(&self) -> &Arc<Serializers> {
        self.ctx.serializers()
    }

    pub fn serialization_ctx(&self) -> &SerializationCtx {
        &self.ctx
    }

    pub fn wire(&self) -> &Wire {
        &self.wire
    }

    pub fn broker(&self) -> &Arc<MessageBroker> {
        self.wire.broker()
    }

    pub fn scheduler(&self) -> &Arc<dyn Scheduler> {
        self.wire.scheduler()
    }

    /// Connection lifetime
    pub fn lifetime(&self) -> Lifetime {
        self.wire.lifetime()
    }

    pub fn is_connected(&self) -> bool {
        self.wire.is_connected()
    }

    /// Feed bytes read from the transport
    pub fn receive(&self, chunk: &[u8]) -> RdResult<()> {
        self.wire.receive(chunk)
    }

    /// Terminate the connection and everything bound to it
    pub fn close(&self) {
        tracing::debug!(protocol = %self.name, "closing protocol");
        self.wire.close();
    }
}

impl fmt::Debug for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Protocol")
            .field("name", &self.name)
            .field("kind", &self.identities.kind())
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// Protocol configuration
pub struct ProtocolBuilder {
    name: String,
    kind: IdKind,
    config: ProtocolConfig,
    serializers: Option<Arc<Serializers>>,
    scheduler: Option<Arc<dyn Scheduler>>,
    lifetime: Lifetime,
}

impl ProtocolBuilder {
    fn new(name: String) -> Self {
        ProtocolBuilder {
            name,
            kind: IdKind::Client,
            config: ProtocolConfig::default(),
            serializers: None,
            scheduler: None,
            lifetime: Lifetime::eternal(),
        }
    }

    /// Which side allocates odd or even dynamic ids
    pub fn kind(mut self, kind: IdKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn config(mut self, config: ProtocolConfig) -> Self {
        self.config = config;
        self
    }

    /// Share a registry between protocols. Defaults to a fresh one.
    pub fn serializers(mut self, serializers: Arc<Serializers>) -> Self {
        self.serializers = Some(serializers);
        self
    }

    /// Inbound dispatch queue. Defaults to [`SynchronousScheduler`].
    pub fn scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// The connection is terminated together with `lifetime`
    pub fn lifetime(mut self, lifetime: &Lifetime) -> Self {
        self.lifetime = lifetime.clone();
        self
    }

    pub fn build(self, sink: Box<dyn FrameSink>) -> Arc<Protocol> {
        let connection = self.lifetime.create_nested();
        let scheduler = self
            .scheduler
            .unwrap_or_else(|| Arc::new(SynchronousScheduler::new()));
        let serializers = self.serializers.unwrap_or_default();

        tracing::debug!(protocol = %self.name, kind = ?self.kind, scheduler = scheduler.name(), "protocol created");
        Arc::new(Protocol {
            name: self.name,
            identities: Identities::new(self.kind),
            ctx: SerializationCtx::new(serializers),
            wire: Wire::new(self.config, sink, scheduler, connection),
        })
    }
}

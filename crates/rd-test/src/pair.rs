//! Two protocol instances joined by a [`SimulatedLink`]

use std::sync::Arc;

use rd_core::{IdKind, ProtocolConfig};
use rd_reactive::Protocol;

use crate::{Direction, LinkConfig, LinkStats, SimulatedLink};

/// Upper bound on deliveries in one [`ModelPair::pump`]
pub const MAX_PUMP_STEPS: usize = 1_000_000;

/// A client and a server protocol sharing a simulated link.
///
/// Nothing is delivered until the pair is stepped or pumped, so tests
/// control exactly when the remote side observes a change.
pub struct ModelPair {
    client: Arc<Protocol>,
    server: Arc<Protocol>,
    link: SimulatedLink,
}

impl ModelPair {
    pub fn new(link: LinkConfig) -> Self {
        Self::with_config(link, ProtocolConfig::default())
    }

    /// Seeded reordering link with default protocol settings
    pub fn seeded(seed: u64) -> Self {
        Self::new(LinkConfig::default().with_seed(seed))
    }

    pub fn with_config(link: LinkConfig, config: ProtocolConfig) -> Self {
        crate::init_logging();
        let link = SimulatedLink::new(link);
        let client = Protocol::builder("client")
            .kind(IdKind::Client)
            .config(config.clone())
            .build(link.sink(Direction::ClientToServer));
        let server = Protocol::builder("server")
            .kind(IdKind::Server)
            .config(config)
            .build(link.sink(Direction::ServerToClient));
        ModelPair {
            client,
            server,
            link,
        }
    }

    pub fn client(&self) -> &Arc<Protocol> {
        &self.client
    }

    pub fn server(&self) -> &Arc<Protocol> {
        &self.server
    }

    pub fn link(&self) -> &SimulatedLink {
        &self.link
    }

    pub fn stats(&self) -> LinkStats {
        self.link.stats()
    }

    fn target(&self, direction: Direction) -> &Protocol {
        match direction {
            Direction::ClientToServer => &self.server,
            Direction::ServerToClient => &self.client,
        }
    }

    /// Deliver one frame in a randomly chosen direction
    pub fn step(&self) -> bool {
        match self.link.pick_direction() {
            Some(direction) => self.link.step(direction, self.target(direction)),
            None => false,
        }
    }

    /// Deliver one frame travelling in `direction`
    pub fn step_direction(&self, direction: Direction) -> bool {
        self.link.step(direction, self.target(direction))
    }

    /// Deliver until the link is idle, including frames sent in reaction
    /// to deliveries. Returns the number of frames delivered.
    pub fn pump(&self) -> usize {
        let mut delivered = 0;
        while delivered < MAX_PUMP_STEPS && self.step() {
            delivered += 1;
        }
        if delivered == MAX_PUMP_STEPS {
            tracing::warn!(delivered, "pump stopped before the link went idle");
        }
        delivered
    }

    /// Drop frames in flight and close both ends
    pub fn disconnect(&self) {
        self.link.sever();
        self.client.close();
        self.server.close();
    }
}

impl std::fmt::Debug for ModelPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelPair")
            .field("client", &self.client)
            .field("server", &self.server)
            .field("link", &self.link)
            .finish()
    }
}

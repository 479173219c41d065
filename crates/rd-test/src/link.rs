//! Simulated link between two protocol instances
//!
//! Frames are held in flight per direction and per entity id. Delivery
//! picks a random non-empty lane, so frames of different entities are
//! reordered while frames of one entity keep their send order. Optionally
//! each frame is handed to the receiver in random fragments.

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::Bytes;
use indexmap::IndexMap;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use rd_core::{RdError, RdId, RdResult};
use rd_reactive::Protocol;
use rd_wire::{decode_varint, FrameSink};

/// Direction of travel
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    ClientToServer,
    ServerToClient,
}

impl Direction {
    fn index(self) -> usize {
        match self {
            Direction::ClientToServer => 0,
            Direction::ServerToClient => 1,
        }
    }
}

/// Link behavior
#[derive(Clone, Debug)]
pub struct LinkConfig {
    /// RNG seed; equal seeds give equal delivery orders
    pub seed: u64,
    /// Interleave lanes of different entities
    pub reorder: bool,
    /// Split frames into random chunks on delivery
    pub fragment: bool,
}

impl Default for LinkConfig {
    fn default() -> Self {
        LinkConfig {
            seed: 0,
            reorder: true,
            fragment: false,
        }
    }
}

impl LinkConfig {
    /// In-order delivery, whole frames
    pub fn ordered() -> Self {
        LinkConfig {
            reorder: false,
            ..Self::default()
        }
    }

    /// Reordering across entities and fragmented frames
    pub fn hostile(seed: u64) -> Self {
        LinkConfig {
            seed,
            reorder: true,
            fragment: true,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

/// Link statistics
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LinkStats {
    pub frames_sent: u64,
    pub frames_delivered: u64,
    pub frames_dropped: u64,
    pub chunks_delivered: u64,
}

#[derive(Default)]
struct Lanes {
    by_id: IndexMap<RdId, VecDeque<Bytes>>,
    /// Send order, used when reordering is off
    order: VecDeque<RdId>,
}

impl Lanes {
    fn len(&self) -> usize {
        self.by_id.values().map(VecDeque::len).sum()
    }

    fn push(&mut self, id: RdId, frame: Bytes) {
        self.by_id.entry(id).or_default().push_back(frame);
        self.order.push_back(id);
    }

    fn pop(&mut self, rng: &mut StdRng, reorder: bool) -> Option<Bytes> {
        let id = if reorder {
            let ready: Vec<RdId> = self
                .by_id
                .iter()
                .filter(|(_, lane)| !lane.is_empty())
                .map(|(id, _)| *id)
                .collect();
            if ready.is_empty() {
                return None;
            }
            let id = ready[rng.gen_range(0..ready.len())];
            if let Some(pos) = self.order.iter().position(|queued| *queued == id) {
                self.order.remove(pos);
            }
            id
        } else {
            self.order.pop_front()?
        };
        self.by_id.get_mut(&id)?.pop_front()
    }

    fn clear(&mut self) -> usize {
        let dropped = self.len();
        self.by_id.clear();
        self.order.clear();
        dropped
    }
}

struct LinkState {
    config: LinkConfig,
    rng: StdRng,
    lanes: [Lanes; 2],
    severed: bool,
    stats: LinkStats,
}

/// In-memory link with deterministic, seeded reordering
#[derive(Clone)]
pub struct SimulatedLink {
    state: Arc<Mutex<LinkState>>,
}

impl SimulatedLink {
    pub fn new(config: LinkConfig) -> Self {
        SimulatedLink {
            state: Arc::new(Mutex::new(LinkState {
                rng: StdRng::seed_from_u64(config.seed),
                config,
                lanes: [Lanes::default(), Lanes::default()],
                severed: false,
                stats: LinkStats::default(),
            })),
        }
    }

    /// Outbound sink for the sender of `direction`
    pub fn sink(&self, direction: Direction) -> Box<dyn FrameSink> {
        let state = Arc::clone(&self.state);
        Box::new(move |frame: Bytes| -> RdResult<()> {
            let id = match decode_varint(&frame)? {
                Some((id, _)) => RdId(id),
                None => return Err(RdError::ProtocolViolation("truncated frame on link".into())),
            };
            let mut state = state.lock();
            if state.severed {
                return Err(RdError::Transport("link severed".into()));
            }
            state.stats.frames_sent += 1;
            state.lanes[direction.index()].push(id, frame);
            Ok(())
        })
    }

    /// Frames in flight in `direction`
    pub fn in_flight(&self, direction: Direction) -> usize {
        self.state.lock().lanes[direction.index()].len()
    }

    /// Frames in flight in `direction` addressed to `id`
    pub fn in_flight_for(&self, direction: Direction, id: RdId) -> usize {
        self.state.lock().lanes[direction.index()]
            .by_id
            .get(&id)
            .map_or(0, VecDeque::len)
    }

    pub fn is_idle(&self) -> bool {
        let state = self.state.lock();
        state.lanes.iter().all(|lanes| lanes.len() == 0)
    }

    pub fn stats(&self) -> LinkStats {
        self.state.lock().stats.clone()
    }

    /// Pick a direction with frames in flight
    pub fn pick_direction(&self) -> Option<Direction> {
        let mut state = self.state.lock();
        let ready: Vec<Direction> = [Direction::ClientToServer, Direction::ServerToClient]
            .into_iter()
            .filter(|d| state.lanes[d.index()].len() > 0)
            .collect();
        match ready.len() {
            0 => None,
            1 => Some(ready[0]),
            n => Some(ready[state.rng.gen_range(0..n)]),
        }
    }

    /// Deliver one frame travelling in `direction` to `target`.
    /// Returns false when nothing was in flight.
    pub fn step(&self, direction: Direction, target: &Protocol) -> bool {
        let (frame, splits) = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let reorder = state.config.reorder;
            let Some(frame) = state.lanes[direction.index()].pop(&mut state.rng, reorder) else {
                return false;
            };
            let splits = if state.config.fragment && frame.len() > 1 {
                let count = state.rng.gen_range(0..frame.len().min(4));
                let mut splits: Vec<usize> = (0..count).map(|_| state.rng.gen_range(1..frame.len())).collect();
                splits.sort_unstable();
                splits.dedup();
                splits
            } else {
                Vec::new()
            };
            state.stats.frames_delivered += 1;
            state.stats.chunks_delivered += splits.len() as u64 + 1;
            (frame, splits)
        };

        let mut start = 0;
        for end in splits.into_iter().chain(std::iter::once(frame.len())) {
            if let Err(e) = target.receive(&frame[start..end]) {
                tracing::debug!(error = %e, ?direction, "receiver rejected frame");
                break;
            }
            start = end;
        }
        true
    }

    /// Drop everything in flight and refuse further frames
    pub fn sever(&self) {
        let mut state = self.state.lock();
        state.severed = true;
        let dropped = state.lanes.iter_mut().map(Lanes::clear).sum::<usize>();
        state.stats.frames_dropped += dropped as u64;
        tracing::debug!(dropped, "link severed");
    }

    pub fn is_severed(&self) -> bool {
        self.state.lock().severed
    }
}

impl std::fmt::Debug for SimulatedLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("SimulatedLink")
            .field("config", &state.config)
            .field("client_to_server", &state.lanes[0].len())
            .field("server_to_client", &state.lanes[1].len())
            .field("stats", &state.stats)
            .finish()
    }
}

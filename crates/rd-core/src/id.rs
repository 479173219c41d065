//! Identity types for the model-sync protocol
//!
//! Entity ids are 64-bit and hierarchical: a child id is derived from its
//! parent id and its structural offset (declaration order within the parent),
//! so both processes compute identical ids without negotiation.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

const MIX_SEED: u64 = 0x9E37_79B9_7F4A_7C15;
const FNV_OFFSET: u64 = 0xCBF2_9CE4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01B3;

/// Offsets with this bit set are reserved for dynamically allocated ids
const DYNAMIC_BIT: u64 = 1 << 63;

/// splitmix64 finalizer; a bijection on u64
#[inline]
fn avalanche(mut z: u64) -> u64 {
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Platform independent string hash (FNV-1a)
#[inline]
fn stable_hash(s: &str) -> u64 {
    s.bytes().fold(FNV_OFFSET, |h, b| (h ^ b as u64).wrapping_mul(FNV_PRIME))
}

/// Entity identity
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct RdId(pub u64);

impl RdId {
    /// Root / unbound sentinel. Never produced by derivation.
    pub const NULL: RdId = RdId(0);

    #[inline]
    pub fn new(id: u64) -> Self {
        RdId(id)
    }

    #[inline]
    fn non_null(h: u64) -> Self {
        if h == 0 {
            RdId(MIX_SEED)
        } else {
            RdId(h)
        }
    }

    #[inline]
    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Derive the id of the child at `offset` (declaration order) under `self`
    #[inline]
    pub fn child(self, offset: u64) -> RdId {
        let h = avalanche(self.0.wrapping_mul(MIX_SEED) ^ avalanche(offset.wrapping_add(1)));
        RdId::non_null(h)
    }

    /// Derive a named child (extension roots, polymorphic type names)
    #[inline]
    pub fn mix_str(self, name: &str) -> RdId {
        let h = avalanche(self.0.rotate_left(17) ^ stable_hash(name));
        RdId::non_null(h)
    }

    /// Discriminator for a polymorphic type
    #[inline]
    pub fn from_type_name(name: &str) -> RdId {
        RdId::NULL.mix_str(name)
    }

    #[inline]
    pub fn to_bytes(self) -> [u8; 8] {
        self.0.to_le_bytes()
    }

    #[inline]
    pub fn from_bytes(bytes: [u8; 8]) -> Self {
        RdId(u64::from_le_bytes(bytes))
    }
}

impl fmt::Debug for RdId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "RdId(null)")
        } else {
            write!(f, "RdId({:016x})", self.0)
        }
    }
}

impl fmt::Display for RdId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Identity allocation context, passed top-down while a tree is identified.
///
/// Each call to [`IdScope::next`] hands out the next child id in declaration
/// order. Two scopes created for the same parent produce the same sequence.
#[derive(Debug, Clone)]
pub struct IdScope {
    parent: RdId,
    next_offset: u64,
}

impl IdScope {
    pub fn new(parent: RdId) -> Self {
        IdScope {
            parent,
            next_offset: 0,
        }
    }

    pub fn parent(&self) -> RdId {
        self.parent
    }

    /// Number of ids handed out so far
    pub fn allocated(&self) -> u64 {
        self.next_offset
    }

    pub fn next(&mut self) -> RdId {
        let id = self.parent.child(self.next_offset);
        self.next_offset += 1;
        id
    }

    /// Scope for the children of `id`
    pub fn child_scope(&self, id: RdId) -> IdScope {
        IdScope::new(id)
    }
}

/// Which side of the connection allocates dynamic ids
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdKind {
    Client,
    Server,
}

/// Dynamic id allocator.
///
/// Clients use odd counters and servers even ones, so both ends can allocate
/// ids under the same parent without coordination.
#[derive(Debug)]
pub struct Identities {
    kind: IdKind,
    counter: AtomicU64,
}

impl Identities {
    pub fn new(kind: IdKind) -> Self {
        let start = match kind {
            IdKind::Client => 1,
            IdKind::Server => 2,
        };
        Identities {
            kind,
            counter: AtomicU64::new(start),
        }
    }

    pub fn kind(&self) -> IdKind {
        self.kind
    }

    /// Allocate a fresh id under `parent`
    pub fn next(&self, parent: RdId) -> RdId {
        let n = self.counter.fetch_add(2, Ordering::Relaxed);
        parent.child(n | DYNAMIC_BIT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    #[test]
    fn test_rd_id_roundtrip() {
        let id = RdId::new(0xDEADBEEF_CAFEBABE);
        assert_eq!(RdId::from_bytes(id.to_bytes()), id);
    }

    #[test]
    fn test_child_is_deterministic() {
        let root = RdId::NULL.mix_str("DemoRoot");
        assert_eq!(root.child(3), root.child(3));
        assert_ne!(root.child(3), root.child(4));
        assert!(!root.child(0).is_null());
    }

    #[test]
    fn test_scopes_agree() {
        let parent = RdId::new(42);
        let mut a = IdScope::new(parent);
        let mut b = IdScope::new(parent);
        let left: Vec<_> = (0..10).map(|_| a.next()).collect();
        let right: Vec<_> = (0..10).map(|_| b.next()).collect();
        assert_eq!(left, right);
        assert_eq!(a.allocated(), 10);
    }

    #[test]
    fn test_tree_is_collision_free() {
        // depth 5, fan-out 10
        let mut seen = HashSet::new();
        let mut level = vec![RdId::NULL.mix_str("root")];
        seen.insert(level[0]);
        for _ in 0..5 {
            let mut next_level = Vec::with_capacity(level.len() * 10);
            for parent in &level {
                let mut scope = IdScope::new(*parent);
                for _ in 0..10 {
                    let id = scope.next();
                    assert!(seen.insert(id), "collision at {:?}", id);
                    next_level.push(id);
                }
            }
            level = next_level;
        }
        assert_eq!(seen.len(), 1 + 10 + 100 + 1_000 + 10_000 + 100_000);
    }

    #[test]
    fn test_identities_sides_never_collide() {
        let parent = RdId::new(7);
        let client = Identities::new(IdKind::Client);
        let server = Identities::new(IdKind::Server);
        let mut seen = HashSet::new();
        for _ in 0..1000 {
            assert!(seen.insert(client.next(parent)));
            assert!(seen.insert(server.next(parent)));
        }
        let mut scope = IdScope::new(parent);
        for _ in 0..100 {
            assert!(seen.insert(scope.next()));
        }
    }

    #[test]
    fn test_named_ids() {
        assert_eq!(RdId::from_type_name("A"), RdId::from_type_name("A"));
        assert_ne!(RdId::from_type_name("A"), RdId::from_type_name("B"));
    }

    proptest! {
        #[test]
        fn prop_children_are_distinct(parent in any::<u64>(), a in 0u64..10_000, b in 0u64..10_000) {
            let parent = RdId::new(parent);
            prop_assert_eq!(parent.child(a), parent.child(a));
            if a != b {
                prop_assert_ne!(parent.child(a), parent.child(b));
            }
        }
    }
}

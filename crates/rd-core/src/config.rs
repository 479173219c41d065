//! Protocol configuration

/// What to drop when frames for unbound ids exceed a buffer bound
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    #[default]
    DropOldest,
    DropNewest,
}

/// Protocol configuration
#[derive(Clone, Debug)]
pub struct ProtocolConfig {
    /// Maximum frames buffered per not-yet-bound entity id
    pub max_buffered_per_id: usize,
    /// Maximum frames buffered across all not-yet-bound ids
    pub max_buffered_total: usize,
    /// Policy applied when either buffer bound is reached
    pub overflow_policy: OverflowPolicy,
    /// Largest accepted frame payload
    pub max_frame_len: usize,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        ProtocolConfig {
            max_buffered_per_id: 256,
            max_buffered_total: 4096,
            overflow_policy: OverflowPolicy::DropOldest,
            max_frame_len: 16 * 1024 * 1024,
        }
    }
}

impl ProtocolConfig {
    pub fn with_max_buffered_per_id(mut self, max: usize) -> Self {
        self.max_buffered_per_id = max;
        self
    }

    pub fn with_max_buffered_total(mut self, max: usize) -> Self {
        self.max_buffered_total = max;
        self
    }

    pub fn with_overflow_policy(mut self, policy: OverflowPolicy) -> Self {
        self.overflow_policy = policy;
        self
    }

    pub fn with_max_frame_len(mut self, max: usize) -> Self {
        self.max_frame_len = max;
        self
    }
}

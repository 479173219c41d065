//! Error types for the model-sync protocol

use thiserror::Error;

use crate::RdId;

/// Core protocol errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RdError {
    // Wire errors
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Serialization mismatch: {0}")]
    SerializationMismatch(String),

    #[error("Buffer too short: expected {expected}, got {actual}")]
    BufferTooShort { expected: usize, actual: usize },

    #[error("Frame too large: {len} > {max}")]
    FrameTooLarge { len: usize, max: usize },

    // Serializer registry errors
    #[error("Unknown discriminator: {0:?}")]
    UnknownDiscriminator(RdId),

    #[error("Duplicate discriminator {id:?} for type {type_name}")]
    DuplicateDiscriminator { id: RdId, type_name: String },

    // Binding errors
    #[error("Entity {0:?} is already bound")]
    DuplicateBind(RdId),

    #[error("Extension {0} is already connected")]
    AlreadyConnected(String),

    #[error("Lifetime is terminated")]
    LifetimeTerminated,

    // Replication errors
    #[error("Consistency violation on {location}: {reason}")]
    ConsistencyViolation { location: String, reason: String },

    // Transport errors
    #[error("Transport error: {0}")]
    Transport(String),
}

impl RdError {
    /// Whether this error makes the entity channel unusable
    pub fn is_fatal_to_entity(&self) -> bool {
        matches!(
            self,
            RdError::ProtocolViolation(_)
                | RdError::SerializationMismatch(_)
                | RdError::BufferTooShort { .. }
                | RdError::UnknownDiscriminator(_)
        )
    }
}

/// Result type for protocol operations
pub type RdResult<T> = Result<T, RdError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(RdError::ProtocolViolation("x".into()).is_fatal_to_entity());
        assert!(RdError::UnknownDiscriminator(RdId::new(1)).is_fatal_to_entity());
        assert!(!RdError::ConsistencyViolation {
            location: "list".into(),
            reason: "index".into()
        }
        .is_fatal_to_entity());
    }
}

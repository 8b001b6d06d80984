use thiserror::Error;

/// Error taxonomy for the event cache core.
///
/// Peer communication failures never reach mutation callers; `PeerUnreachable`
/// exists so the cluster layer can log and rely on anti-entropy to heal.
#[derive(Debug, Error)]
pub enum EvCacheError {
    #[error("Event not found: {id}")]
    EventNotFound { id: String },

    #[error("Event {id} is {size_bytes} bytes, larger than the {max_bytes} byte cache budget")]
    CapacityExceeded {
        id: String,
        size_bytes: usize,
        max_bytes: usize,
    },

    #[error("Peer {peer} unreachable: {reason}")]
    PeerUnreachable { peer: String, reason: String },

    #[error("Peer authentication failed")]
    AuthenticationFailed,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl EvCacheError {
    /// True for failures a mutation caller should see as their own fault
    /// (validation of the operation's target) rather than a server fault.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            EvCacheError::EventNotFound { .. } | EvCacheError::CapacityExceeded { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, EvCacheError>;

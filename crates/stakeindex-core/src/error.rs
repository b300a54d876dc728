//! Error taxonomy for the indexing pipeline.

use thiserror::Error;

/// Errors that can occur while indexing.
#[derive(Debug, Error)]
pub enum IndexerError {
    /// Decoded data failed an internal consistency check (unknown baker,
    /// broken counter sequence, conservation violation). The block attempt
    /// is aborted and retried later — it may be a transient node glitch.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Raw payload does not match the expected wire shape for the resolved
    /// protocol version. Loud: usually a registry bug or a node bug.
    #[error("wire shape mismatch: {0}")]
    Wire(String),

    /// Storage backend failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// Node RPC failure (unreachable, timeout, bad status). Transient.
    #[error("node error: {0}")]
    Node(String),

    /// No handler registered for this protocol hash. Fatal — handler
    /// resolution must be exact, never a fallback to "closest version".
    #[error("unknown protocol: {hash}")]
    UnknownProtocol { hash: String },

    /// Persisted schema version does not match the binary. Fatal at startup.
    #[error("schema version mismatch: expected {expected}, found {found}")]
    SchemaMismatch { expected: i32, found: i32 },

    /// Persisted genesis does not match the configured chain. Fatal.
    #[error("genesis mismatch: {0}")]
    Genesis(String),

    /// Cooperative shutdown was requested.
    #[error("cancelled")]
    Cancelled,
}

impl IndexerError {
    /// Returns `true` if retrying the same work later can succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Node(_) | Self::Storage(_) | Self::Validation(_))
    }

    /// Returns `true` if the process should stop rather than retry.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::UnknownProtocol { .. } | Self::SchemaMismatch { .. } | Self::Genesis(_)
        )
    }
}

//! Error types for rollcall

use thiserror::Error;

pub use rollcall_core::SyncError;

/// Result type alias for rollcall operations
pub type Result<T> = std::result::Result<T, RollcallError>;

/// Main error type for rollcall
///
/// Reconciliation itself never fails outward (see [`crate::Reconciler`]);
/// this type covers setup: configuration, metrics registration and the
/// dispatcher lifecycle.
#[derive(Error, Debug)]
pub enum RollcallError {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Collaborator error surfaced during setup
    #[error(transparent)]
    Sync(#[from] SyncError),

    /// Metrics error
    #[error("metrics error: {0}")]
    Metrics(String),

    /// The dispatcher has shut down and no longer accepts triggers
    #[error("dispatcher is shut down")]
    Shutdown,
}

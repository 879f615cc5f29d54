//! Error types for rollcall collaborators

use thiserror::Error;

/// Error type for collaborator operations
///
/// This is the error type returned by every external collaborator the
/// reconciler talks to: discovery clients, instance converters, registration
/// sinks and instance stores. The variants mirror the failure taxonomy the
/// reconciler reacts to, so a collaborator should pick the variant that
/// describes *where* it failed rather than *why*.
///
/// # Example
///
/// ```
/// use rollcall_core::SyncError;
///
/// fn list_services() -> Result<Vec<String>, SyncError> {
///     // Simulate a registry that cannot be reached
///     Err(SyncError::Listing("consul unreachable".to_string()))
/// }
///
/// match list_services() {
///     Ok(services) => println!("{} services", services.len()),
///     Err(SyncError::Listing(msg)) => println!("listing failed: {}", msg),
///     Err(e) => println!("other error: {}", e),
/// }
/// ```
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// Listing failed
    ///
    /// The registry source could not enumerate its services or the
    /// instances of one service. Source-local: the reconciler aborts the
    /// pass for that source and prunes nothing.
    #[error("listing failed: {0}")]
    Listing(String),

    /// Conversion failed
    ///
    /// A discovered instance could not be normalized into a registration.
    /// Examples: missing host, non-numeric management port, invalid URL.
    #[error("conversion failed: {0}")]
    Conversion(String),

    /// Registration failed
    ///
    /// The registration sink rejected an instance.
    #[error("registration failed: {0}")]
    Registration(String),

    /// Deregistration failed
    ///
    /// The registration sink could not mark an instance as deregistered.
    /// The reconciler retries naturally on its next pass.
    #[error("deregistration failed: {0}")]
    Deregistration(String),

    /// Store error
    ///
    /// The instance store could not be read or written.
    #[error("store error: {0}")]
    Store(String),

    /// Unavailable
    ///
    /// The collaborator is not ready (startup, shutdown, transient outage).
    #[error("collaborator unavailable")]
    Unavailable,
}

impl SyncError {
    /// Short, stable label for the failure kind (used as a metric label)
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::Listing(_) => "listing",
            SyncError::Conversion(_) => "conversion",
            SyncError::Registration(_) => "registration",
            SyncError::Deregistration(_) => "deregistration",
            SyncError::Store(_) => "store",
            SyncError::Unavailable => "unavailable",
        }
    }
}

//! Registration side of the reconciler: where instances end up
//!
//! The [`RegistrationSink`] receives register/deregister commands and the
//! [`InstanceStore`] answers "what do we already know about". They are
//! usually backed by the same registry, but the reconciler only relies on
//! the two narrow contracts below.

use crate::error::SyncError;
use crate::registration::{InstanceId, KnownInstance, Registration};
use async_trait::async_trait;

/// RegistrationSink trait - registers and deregisters instances
///
/// # Implementation Requirements
///
/// - `register` must be idempotent: registering an already-registered,
///   unchanged registration returns the same id and changes nothing
/// - `deregister` must be idempotent and tolerate unknown ids
/// - Ids must distinguish registrations from different sources even when
///   their URLs are identical
#[async_trait]
pub trait RegistrationSink: Send + Sync {
    /// Register (or refresh) an instance and return its id
    async fn register(&self, registration: Registration) -> Result<InstanceId, SyncError>;

    /// Mark an instance as no longer registered
    async fn deregister(&self, id: &InstanceId) -> Result<(), SyncError>;
}

/// Read side of the instance store
#[async_trait]
pub trait InstanceStore: Send + Sync {
    /// Every instance the store knows about, registered or not
    async fn find_all(&self) -> Result<Vec<KnownInstance>, SyncError>;

    /// Registered instances owned by `source`
    ///
    /// The default filters [`find_all`](InstanceStore::find_all); stores
    /// with an index on source should override it.
    async fn find_registered_by_source(
        &self,
        source: &str,
    ) -> Result<Vec<KnownInstance>, SyncError> {
        let all = self.find_all().await?;
        Ok(all
            .into_iter()
            .filter(|instance| instance.is_registered_by(source))
            .collect())
    }
}

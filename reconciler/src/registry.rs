//! Instance registry
//!
//! [`InstanceRegistry`] is the stock [`RegistrationSink`] + [`InstanceStore`]:
//! it derives a deterministic id from each registration, keeps records in
//! an [`InstanceRepository`], and makes register/deregister idempotent.
//!
//! # Instance ids
//!
//! ```text
//! id = hex(sha256(source ‖ 0x00 ‖ health_url))[..12]
//! ```
//!
//! The source is part of the hash, so the same health URL seen through two
//! registry sources yields two instances, each pruned only by its own source.

use crate::metrics::try_record_registration;
use async_trait::async_trait;
use parking_lot::RwLock;
use rollcall_core::{
    InstanceId, InstanceStore, KnownInstance, Registration, RegistrationSink, SyncError,
};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

const ID_LEN: usize = 12;

/// Storage backend for known instances
///
/// Implementations must be thread-safe; the registry calls them from
/// concurrent reconciliation passes of different sources.
pub trait InstanceRepository: Send + Sync {
    /// Record stored under `id`
    fn get(&self, id: &InstanceId) -> Result<Option<KnownInstance>, SyncError>;

    /// Every stored record
    fn all(&self) -> Result<Vec<KnownInstance>, SyncError>;

    /// Atomically replace the record under `id` with what `change` returns
    ///
    /// `change` sees the current record (if any); returning `None` leaves
    /// the store untouched. Returns whether a write happened.
    fn compute(
        &self,
        id: &InstanceId,
        change: &mut dyn FnMut(Option<&KnownInstance>) -> Option<KnownInstance>,
    ) -> Result<bool, SyncError>;
}

/// In-memory repository for tests and single-node deployments
#[derive(Debug, Default)]
pub struct MemoryInstanceRepository {
    instances: RwLock<HashMap<InstanceId, KnownInstance>>,
}

impl MemoryInstanceRepository {
    /// Create an empty repository
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records, registered or not
    pub fn len(&self) -> usize {
        self.instances.read().len()
    }

    /// True if nothing is stored
    pub fn is_empty(&self) -> bool {
        self.instances.read().is_empty()
    }
}

impl InstanceRepository for MemoryInstanceRepository {
    fn get(&self, id: &InstanceId) -> Result<Option<KnownInstance>, SyncError> {
        Ok(self.instances.read().get(id).cloned())
    }

    fn all(&self) -> Result<Vec<KnownInstance>, SyncError> {
        Ok(self.instances.read().values().cloned().collect())
    }

    fn compute(
        &self,
        id: &InstanceId,
        change: &mut dyn FnMut(Option<&KnownInstance>) -> Option<KnownInstance>,
    ) -> Result<bool, SyncError> {
        let mut instances = self.instances.write();
        match change(instances.get(id)) {
            Some(next) => {
                instances.insert(id.clone(), next);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// Idempotent registration sink over an [`InstanceRepository`]
pub struct InstanceRegistry {
    repository: Arc<dyn InstanceRepository>,
}

impl InstanceRegistry {
    /// Registry backed by `repository`
    pub fn new(repository: Arc<dyn InstanceRepository>) -> Self {
        Self { repository }
    }

    /// Registry backed by a fresh [`MemoryInstanceRepository`]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryInstanceRepository::new()))
    }

    /// Deterministic id for a registration
    pub fn id_for(registration: &Registration) -> InstanceId {
        let mut hasher = Sha256::new();
        hasher.update(registration.source().as_bytes());
        hasher.update([0u8]);
        hasher.update(registration.health_url().as_bytes());
        let mut hex = hex::encode(hasher.finalize());
        hex.truncate(ID_LEN);
        InstanceId::new(hex)
    }

    /// Look up one instance
    pub fn get(&self, id: &InstanceId) -> Result<Option<KnownInstance>, SyncError> {
        self.repository.get(id)
    }

    /// Currently registered instances
    pub fn registered(&self) -> Result<Vec<KnownInstance>, SyncError> {
        Ok(self
            .repository
            .all()?
            .into_iter()
            .filter(|instance| instance.is_registered)
            .collect())
    }
}

#[async_trait]
impl RegistrationSink for InstanceRegistry {
    async fn register(&self, registration: Registration) -> Result<InstanceId, SyncError> {
        let id = Self::id_for(&registration);

        let written = self.repository.compute(&id, &mut |current| match current {
            Some(existing) if existing.is_registered && existing.registration == registration => {
                None
            }
            Some(existing) => Some(KnownInstance {
                id: id.clone(),
                registration: registration.clone(),
                is_registered: true,
                version: existing.version + 1,
            }),
            None => Some(KnownInstance {
                id: id.clone(),
                registration: registration.clone(),
                is_registered: true,
                version: 1,
            }),
        })?;

        if written {
            try_record_registration(registration.source());
            info!(
                instance_id = %id,
                service = registration.name(),
                source = registration.source(),
                health_url = registration.health_url(),
                "Instance registered"
            );
        } else {
            debug!(instance_id = %id, "Instance already registered, unchanged");
        }
        Ok(id)
    }

    async fn deregister(&self, id: &InstanceId) -> Result<(), SyncError> {
        let written = self.repository.compute(id, &mut |current| match current {
            Some(existing) if existing.is_registered => Some(KnownInstance {
                is_registered: false,
                version: existing.version + 1,
                ..existing.clone()
            }),
            _ => None,
        })?;

        if written {
            info!(instance_id = %id, "Instance deregistered");
        } else {
            debug!(instance_id = %id, "Instance unknown or already deregistered");
        }
        Ok(())
    }
}

#[async_trait]
impl InstanceStore for InstanceRegistry {
    async fn find_all(&self) -> Result<Vec<KnownInstance>, SyncError> {
        self.repository.all()
    }
}

//! Discovery side of the reconciler: what a registry source reports
//!
//! The [`DiscoveryClient`] trait is implemented once per registry backend
//! (one Consul datacenter, one Eureka zone, ...). The reconciler never polls
//! on its own; it asks the client for the current membership when a trigger
//! fires.

use crate::error::SyncError;
use crate::registration::Registration;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// One instance of a service as reported by a registry at list time
///
/// Only the [`InstanceConverter`] looks inside; the reconciler treats it as
/// opaque apart from `service_id`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DiscoveredInstance {
    /// Service the instance belongs to
    pub service_id: String,
    /// Registry-assigned instance identifier, when the registry has one
    pub instance_id: Option<String>,
    /// Host name or address
    pub host: String,
    /// Service port
    pub port: u16,
    /// Whether the service speaks https
    pub secure: bool,
    /// Explicit service URI, overriding host/port/secure when present
    pub uri: Option<String>,
    /// Free-form metadata (tags, management hints)
    pub metadata: BTreeMap<String, String>,
}

impl DiscoveredInstance {
    /// Create an instance with the given service, host and port
    pub fn new(service_id: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            service_id: service_id.into(),
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    /// Set the registry-assigned instance id
    pub fn with_instance_id(mut self, id: impl Into<String>) -> Self {
        self.instance_id = Some(id.into());
        self
    }

    /// Add one metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Mark the instance as serving https
    pub fn secure(mut self) -> Self {
        self.secure = true;
        self
    }

    /// Set an explicit service URI
    pub fn with_uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }
}

/// DiscoveryClient trait - lists what one registry source advertises
///
/// # Implementation Requirements
///
/// - Clients must be `Send + Sync`; the reconciler calls them from worker tasks
/// - Failures are source-local: return [`SyncError::Listing`] and the
///   reconciler aborts this source's pass without pruning anything
/// - `instances` for a service with no live instances returns an empty vec,
///   not an error
///
/// # Example
///
/// ```ignore
/// use rollcall_core::{DiscoveredInstance, DiscoveryClient, SyncError};
/// use async_trait::async_trait;
///
/// struct ConsulClient {
///     http: reqwest::Client,
///     base: String,
/// }
///
/// #[async_trait]
/// impl DiscoveryClient for ConsulClient {
///     async fn services(&self) -> Result<Vec<String>, SyncError> {
///         let url = format!("{}/v1/catalog/services", self.base);
///         let body: HashMap<String, Vec<String>> = self.http.get(url).send().await
///             .and_then(|r| r.error_for_status())
///             .map_err(|e| SyncError::Listing(e.to_string()))?
///             .json().await
///             .map_err(|e| SyncError::Listing(e.to_string()))?;
///         Ok(body.into_keys().collect())
///     }
///
///     async fn instances(&self, service: &str) -> Result<Vec<DiscoveredInstance>, SyncError> {
///         let url = format!("{}/v1/health/service/{}?passing", self.base, service);
///         let entries: Vec<HealthEntry> = self.http.get(url).send().await
///             .and_then(|r| r.error_for_status())
///             .map_err(|e| SyncError::Listing(e.to_string()))?
///             .json().await
///             .map_err(|e| SyncError::Listing(e.to_string()))?;
///         Ok(entries.into_iter().map(HealthEntry::into_instance).collect())
///     }
/// }
/// ```
#[async_trait]
pub trait DiscoveryClient: Send + Sync {
    /// Names of every service the registry currently advertises
    async fn services(&self) -> Result<Vec<String>, SyncError>;

    /// Current instances of one service
    async fn instances(&self, service: &str) -> Result<Vec<DiscoveredInstance>, SyncError>;
}

/// Converts a discovered instance into a registration
///
/// Conversion is synchronous and per instance. A failure is isolated to that
/// instance. The returned registration does not need a source; the
/// reconciler stamps it.
pub trait InstanceConverter: Send + Sync {
    /// Normalize one instance
    fn convert(&self, instance: &DiscoveredInstance) -> Result<Registration, SyncError>;
}

/// One independently polled registry backend
///
/// Pairs the short `code` used to attribute registrations with the client
/// used to list them. Cheap to clone.
#[derive(Clone)]
pub struct RegistrySource {
    code: Arc<str>,
    client: Arc<dyn DiscoveryClient>,
}

impl RegistrySource {
    /// Create a source with the given attribution code
    ///
    /// The code must not be blank; the directory skips such sources and the
    /// reconciler refuses to reconcile them.
    pub fn new(code: impl Into<Arc<str>>, client: Arc<dyn DiscoveryClient>) -> Self {
        Self {
            code: code.into(),
            client,
        }
    }

    /// Attribution code stamped on every registration from this source
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Discovery handle for this source
    pub fn client(&self) -> &Arc<dyn DiscoveryClient> {
        &self.client
    }
}

impl fmt::Debug for RegistrySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistrySource")
            .field("code", &self.code)
            .finish_non_exhaustive()
    }
}

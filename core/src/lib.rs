//! rollcall-core - Core types for rollcall instance reconciliation
//!
//! This crate provides the types shared between the reconciler and the
//! collaborators that plug into it (discovery clients, converters, sinks):
//!
//! - [`RegistrySource`] - one registry backend: attribution code + [`DiscoveryClient`]
//! - [`DiscoveredInstance`] - an instance as a registry reports it
//! - [`Registration`] - the normalized, source-attributed instance description
//! - [`InstanceId`] / [`KnownInstance`] - what the instance store keeps
//! - [`InstanceConverter`], [`RegistrationSink`], [`InstanceStore`] - collaborator traits
//! - [`SyncError`] - error type for collaborator operations
//! - [`metadata_keys`] - metadata keys understood by the default converter
//!
//! # Why this crate exists
//!
//! Registry adapters (a Consul client, a Kubernetes endpoints watcher) only
//! need to implement [`DiscoveryClient`]. Depending on this crate instead of
//! the reconciler keeps adapters free of the reconciler's runtime stack:
//!
//! ```text
//! rollcall-core ◄── rollcall-reconciler ◄── rollcall-runtime
//!     ▲
//!     └──────────── consul adapter, k8s adapter, ...
//! ```

#![deny(unsafe_code)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::panic)]
#![warn(missing_docs)]

mod discovery;
mod error;
/// Reserved metadata keys read by the default converter
pub mod metadata_keys;
mod registration;
mod sink;

pub use discovery::{DiscoveredInstance, DiscoveryClient, InstanceConverter, RegistrySource};
pub use error::SyncError;
pub use registration::{InstanceId, KnownInstance, Registration, RegistrationBuilder};
pub use sink::{InstanceStore, RegistrationSink};

#[cfg(test)]
mod tests {
    use super::*;

    // ==========================================================================
    // SyncError Tests
    // ==========================================================================

    #[test]
    fn test_sync_error_listing_display() {
        let err = SyncError::Listing("connection refused".to_string());
        assert_eq!(err.to_string(), "listing failed: connection refused");
    }

    #[test]
    fn test_sync_error_conversion_display() {
        let err = SyncError::Conversion("missing host".to_string());
        assert_eq!(err.to_string(), "conversion failed: missing host");
    }

    #[test]
    fn test_sync_error_registration_display() {
        let err = SyncError::Registration("rejected".to_string());
        assert_eq!(err.to_string(), "registration failed: rejected");
    }

    #[test]
    fn test_sync_error_unavailable_display() {
        assert_eq!(SyncError::Unavailable.to_string(), "collaborator unavailable");
    }

    #[test]
    fn test_sync_error_kind_labels() {
        assert_eq!(SyncError::Listing(String::new()).kind(), "listing");
        assert_eq!(SyncError::Deregistration(String::new()).kind(), "deregistration");
        assert_eq!(SyncError::Store(String::new()).kind(), "store");
    }

    #[test]
    fn test_sync_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SyncError>();
    }

    // ==========================================================================
    // DiscoveredInstance Tests
    // ==========================================================================

    #[test]
    fn test_discovered_instance_builders() {
        let instance = DiscoveredInstance::new("orders", "10.0.0.7", 8443)
            .with_instance_id("orders-1")
            .with_metadata("zone", "eu-1")
            .secure();

        assert_eq!(instance.service_id, "orders");
        assert_eq!(instance.instance_id.as_deref(), Some("orders-1"));
        assert_eq!(instance.host, "10.0.0.7");
        assert_eq!(instance.port, 8443);
        assert!(instance.secure);
        assert!(instance.uri.is_none());
        assert_eq!(instance.metadata.get("zone").map(String::as_str), Some("eu-1"));
    }

    // ==========================================================================
    // Collaborator Trait Tests
    // ==========================================================================

    use async_trait::async_trait;
    use std::sync::Arc;

    struct StaticClient {
        services: Vec<&'static str>,
    }

    #[async_trait]
    impl DiscoveryClient for StaticClient {
        async fn services(&self) -> Result<Vec<String>, SyncError> {
            Ok(self.services.iter().map(|s| s.to_string()).collect())
        }

        async fn instances(&self, service: &str) -> Result<Vec<DiscoveredInstance>, SyncError> {
            Ok(vec![DiscoveredInstance::new(service, "localhost", 8080)])
        }
    }

    #[tokio::test]
    async fn test_discovery_client_is_object_safe() {
        let client: Arc<dyn DiscoveryClient> = Arc::new(StaticClient {
            services: vec!["a", "b"],
        });
        let source = RegistrySource::new("dc1", client);

        assert_eq!(source.code(), "dc1");
        let services = source.client().services().await;
        assert_eq!(services, Ok(vec!["a".to_string(), "b".to_string()]));
        let instances = source.client().instances("a").await;
        assert!(matches!(instances, Ok(ref v) if v.len() == 1));
    }

    #[test]
    fn test_registry_source_debug_shows_code() {
        let source = RegistrySource::new("dc9", Arc::new(StaticClient { services: vec![] }));
        let debug = format!("{source:?}");
        assert!(debug.contains("dc9"));
    }

    struct FixedStore {
        instances: Vec<KnownInstance>,
    }

    #[async_trait]
    impl InstanceStore for FixedStore {
        async fn find_all(&self) -> Result<Vec<KnownInstance>, SyncError> {
            Ok(self.instances.clone())
        }
    }

    fn known(id: &str, source: &str, registered: bool) -> KnownInstance {
        let registration = Registration::builder("svc", format!("http://{id}:80/health"))
            .source(source)
            .build();
        match registration {
            Ok(registration) => KnownInstance {
                id: InstanceId::from(id),
                registration,
                is_registered: registered,
                version: 1,
            },
            Err(e) => panic!("test registration must be valid: {e}"),
        }
    }

    #[tokio::test]
    async fn test_default_find_registered_by_source_filters() {
        let store = FixedStore {
            instances: vec![
                known("a", "dc1", true),
                known("b", "dc1", false),
                known("c", "dc2", true),
            ],
        };

        let found = store.find_registered_by_source("dc1").await;
        let ids: Vec<String> = match found {
            Ok(v) => v.into_iter().map(|i| i.id.to_string()).collect(),
            Err(e) => panic!("store failed: {e}"),
        };
        assert_eq!(ids, vec!["a".to_string()]);
    }
}

//! Reconciliation integration tests
//!
//! Drives full passes through the public API against an in-memory
//! registry and scripted discovery clients:
//! - repeated passes are idempotent
//! - sources never prune each other's instances
//! - listing failures never cause pruning
//! - failure policy decides what happens to instances of failing services

#![allow(clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use rollcall_reconciler::{
    DefaultInstanceConverter, DiscoveredInstance, DiscoveryClient, FailurePolicy, InstanceConverter,
    InstanceId, InstanceRegistry, InstanceStore, KnownInstance, PassOutcome, Reconciler,
    Registration, RegistrationSink, RegistrySource, SyncError,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

// ============================================================================
// Scripted registry
// ============================================================================

/// Discovery client whose catalog is set by the test
#[derive(Default)]
struct ScriptedRegistry {
    catalog: Mutex<BTreeMap<String, Vec<DiscoveredInstance>>>,
    failing_service: Mutex<Option<String>>,
}

impl ScriptedRegistry {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn put(&self, service: &str, instances: Vec<DiscoveredInstance>) {
        self.catalog
            .lock()
            .unwrap()
            .insert(service.to_string(), instances);
    }

    fn clear(&self) {
        self.catalog.lock().unwrap().clear();
    }

    fn fail_instances_of(&self, service: &str) {
        *self.failing_service.lock().unwrap() = Some(service.to_string());
    }
}

#[async_trait]
impl DiscoveryClient for ScriptedRegistry {
    async fn services(&self) -> Result<Vec<String>, SyncError> {
        Ok(self.catalog.lock().unwrap().keys().cloned().collect())
    }

    async fn instances(&self, service: &str) -> Result<Vec<DiscoveredInstance>, SyncError> {
        if self.failing_service.lock().unwrap().as_deref() == Some(service) {
            return Err(SyncError::Listing(format!("{service}: connection refused")));
        }
        Ok(self
            .catalog
            .lock()
            .unwrap()
            .get(service)
            .cloned()
            .unwrap_or_default())
    }
}

/// Sink that counts calls before delegating to a real registry
struct CountingSink {
    inner: Arc<InstanceRegistry>,
    registers: AtomicUsize,
    deregisters: AtomicUsize,
}

impl CountingSink {
    fn new(inner: Arc<InstanceRegistry>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            registers: AtomicUsize::new(0),
            deregisters: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl RegistrationSink for CountingSink {
    async fn register(&self, registration: Registration) -> Result<InstanceId, SyncError> {
        self.registers.fetch_add(1, Ordering::SeqCst);
        self.inner.register(registration).await
    }

    async fn deregister(&self, id: &InstanceId) -> Result<(), SyncError> {
        self.deregisters.fetch_add(1, Ordering::SeqCst);
        self.inner.deregister(id).await
    }
}

/// Sink that refuses one host
struct RefusingSink {
    inner: Arc<InstanceRegistry>,
    refused_health_url: String,
}

#[async_trait]
impl RegistrationSink for RefusingSink {
    async fn register(&self, registration: Registration) -> Result<InstanceId, SyncError> {
        if registration.health_url() == self.refused_health_url {
            return Err(SyncError::Registration("503 from admin server".to_string()));
        }
        self.inner.register(registration).await
    }

    async fn deregister(&self, id: &InstanceId) -> Result<(), SyncError> {
        self.inner.deregister(id).await
    }
}

/// Converter that rejects instances carrying a `broken` metadata key
struct StrictConverter;

impl InstanceConverter for StrictConverter {
    fn convert(&self, instance: &DiscoveredInstance) -> Result<Registration, SyncError> {
        if instance.metadata.contains_key("broken") {
            return Err(SyncError::Conversion("unsupported instance".to_string()));
        }
        DefaultInstanceConverter::new().convert(instance)
    }
}

fn instance(service: &str, host: &str) -> DiscoveredInstance {
    DiscoveredInstance::new(service, host, 8080)
}

fn health_urls(instances: &[KnownInstance]) -> BTreeSet<String> {
    instances
        .iter()
        .map(|i| i.registration.health_url().to_string())
        .collect()
}

// ============================================================================
// Idempotence and stale removal
// ============================================================================

#[tokio::test]
async fn identical_passes_leave_the_store_unchanged() {
    let registry = Arc::new(InstanceRegistry::in_memory());
    let sink = CountingSink::new(registry.clone());
    let dc1 = ScriptedRegistry::new();
    dc1.put("orders", vec![instance("orders", "10.0.0.1"), instance("orders", "10.0.0.2")]);
    let source = RegistrySource::new("dc1", dc1.clone());
    let reconciler = Reconciler::builder(sink.clone(), registry.clone()).build();

    reconciler.reconcile(&source).await;
    let mut after_first = registry.find_all().await.unwrap();

    let second = reconciler.reconcile(&source).await;
    let mut after_second = registry.find_all().await.unwrap();

    after_first.sort_by(|a, b| a.id.cmp(&b.id));
    after_second.sort_by(|a, b| a.id.cmp(&b.id));
    assert_eq!(after_first, after_second);
    assert!(second.deregistered.is_empty());
    assert_eq!(sink.deregisters.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn only_the_vanished_instance_is_deregistered() {
    let registry = Arc::new(InstanceRegistry::in_memory());
    let dc1 = ScriptedRegistry::new();
    let source = RegistrySource::new("dc1", dc1.clone());
    let reconciler = Reconciler::builder(registry.clone(), registry.clone()).build();

    dc1.put("orders", vec![instance("orders", "10.0.0.1"), instance("orders", "10.0.0.2")]);
    reconciler.reconcile(&source).await;

    dc1.put("orders", vec![instance("orders", "10.0.0.1")]);
    let report = reconciler.reconcile(&source).await;

    assert_eq!(report.deregistered.len(), 1);
    let remaining = registry.registered().unwrap();
    assert_eq!(
        health_urls(&remaining),
        BTreeSet::from(["http://10.0.0.1:8080/actuator/health".to_string()])
    );
}

#[tokio::test]
async fn empty_catalog_prunes_everything_of_that_source() {
    let registry = Arc::new(InstanceRegistry::in_memory());
    let dc1 = ScriptedRegistry::new();
    let source = RegistrySource::new("dc1", dc1.clone());
    let reconciler = Reconciler::builder(registry.clone(), registry.clone()).build();

    dc1.put("orders", vec![instance("orders", "10.0.0.1")]);
    dc1.put("billing", vec![instance("billing", "10.0.0.2")]);
    reconciler.reconcile(&source).await;

    dc1.clear();
    let report = reconciler.reconcile(&source).await;

    assert_eq!(report.outcome, PassOutcome::Completed);
    assert_eq!(report.deregistered.len(), 2);
    assert!(registry.registered().unwrap().is_empty());
}

// ============================================================================
// Source isolation
// ============================================================================

#[tokio::test]
async fn reconciling_one_source_never_touches_another() {
    let registry = Arc::new(InstanceRegistry::in_memory());
    let reconciler = Reconciler::builder(registry.clone(), registry.clone()).build();

    let dc1 = ScriptedRegistry::new();
    let dc2 = ScriptedRegistry::new();
    dc1.put("orders", vec![instance("orders", "10.0.0.1")]);
    dc2.put("orders", vec![instance("orders", "10.1.0.1")]);
    let s1 = RegistrySource::new("dc1", dc1.clone());
    let s2 = RegistrySource::new("dc2", dc2.clone());

    reconciler.reconcile(&s1).await;
    reconciler.reconcile(&s2).await;

    // dc1 suddenly reports nothing: only its own instance goes away
    dc1.clear();
    let report = reconciler.reconcile(&s1).await;

    assert_eq!(report.deregistered.len(), 1);
    let remaining = registry.registered().unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].registration.source(), "dc2");
}

#[tokio::test]
async fn same_endpoint_in_two_sources_is_tracked_separately() {
    let registry = Arc::new(InstanceRegistry::in_memory());
    let reconciler = Reconciler::builder(registry.clone(), registry.clone()).build();

    let shared = ScriptedRegistry::new();
    shared.put("orders", vec![instance("orders", "10.0.0.1")]);
    let s1 = RegistrySource::new("dc1", shared.clone());
    let s2 = RegistrySource::new("dc2", shared.clone());

    let r1 = reconciler.reconcile(&s1).await;
    let r2 = reconciler.reconcile(&s2).await;

    assert_ne!(r1.registered, r2.registered);
    assert_eq!(registry.registered().unwrap().len(), 2);
}

// ============================================================================
// Failure containment
// ============================================================================

#[tokio::test]
async fn instance_listing_failure_keeps_registered_instances() {
    let registry = Arc::new(InstanceRegistry::in_memory());
    let reconciler = Reconciler::builder(registry.clone(), registry.clone()).build();
    let dc1 = ScriptedRegistry::new();
    let source = RegistrySource::new("dc1", dc1.clone());

    // services() is ordered: "a-service" is listed before "orders"
    dc1.put("a-service", vec![instance("a-service", "10.0.0.9")]);
    dc1.put("orders", vec![instance("orders", "10.0.0.1")]);
    reconciler.reconcile(&source).await;

    dc1.fail_instances_of("orders");
    let report = reconciler.reconcile(&source).await;

    assert!(matches!(report.outcome, PassOutcome::Aborted(_)));
    assert!(report.deregistered.is_empty());
    assert_eq!(registry.registered().unwrap().len(), 2);
}

#[tokio::test]
async fn registration_failure_is_isolated_to_its_instance() {
    let registry = Arc::new(InstanceRegistry::in_memory());
    let sink = Arc::new(RefusingSink {
        inner: registry.clone(),
        refused_health_url: "http://10.0.0.2:8080/actuator/health".to_string(),
    });
    let dc1 = ScriptedRegistry::new();
    dc1.put("orders", vec![instance("orders", "10.0.0.1"), instance("orders", "10.0.0.2")]);
    dc1.put("billing", vec![instance("billing", "10.0.0.3")]);
    let source = RegistrySource::new("dc1", dc1.clone());

    let report = Reconciler::builder(sink, registry.clone())
        .build()
        .reconcile(&source)
        .await;

    assert_eq!(report.outcome, PassOutcome::Completed);
    assert_eq!(report.registration_failures, 1);
    assert_eq!(report.registered.len(), 2);
}

#[tokio::test]
async fn preserve_policy_keeps_instance_whose_conversion_now_fails() {
    let registry = Arc::new(InstanceRegistry::in_memory());
    let dc1 = ScriptedRegistry::new();
    let source = RegistrySource::new("dc1", dc1.clone());

    dc1.put("orders", vec![instance("orders", "10.0.0.1")]);
    Reconciler::builder(registry.clone(), registry.clone())
        .build()
        .reconcile(&source)
        .await;

    dc1.put(
        "orders",
        vec![instance("orders", "10.0.0.1").with_metadata("broken", "yes")],
    );
    let report = Reconciler::builder(registry.clone(), registry.clone())
        .converter(StrictConverter)
        .failure_policy(FailurePolicy::Preserve)
        .build()
        .reconcile(&source)
        .await;

    assert_eq!(report.conversion_failures, 1);
    assert_eq!(report.preserved.len(), 1);
    assert_eq!(registry.registered().unwrap().len(), 1);
}

#[tokio::test]
async fn prune_policy_drops_instance_whose_conversion_now_fails() {
    let registry = Arc::new(InstanceRegistry::in_memory());
    let dc1 = ScriptedRegistry::new();
    let source = RegistrySource::new("dc1", dc1.clone());

    dc1.put("orders", vec![instance("orders", "10.0.0.1")]);
    Reconciler::builder(registry.clone(), registry.clone())
        .build()
        .reconcile(&source)
        .await;

    dc1.put(
        "orders",
        vec![instance("orders", "10.0.0.1").with_metadata("broken", "yes")],
    );
    let report = Reconciler::builder(registry.clone(), registry.clone())
        .converter(StrictConverter)
        .failure_policy(FailurePolicy::Prune)
        .build()
        .reconcile(&source)
        .await;

    assert_eq!(report.conversion_failures, 1);
    assert_eq!(report.deregistered.len(), 1);
    assert!(registry.registered().unwrap().is_empty());
}

// ============================================================================
// End to end
// ============================================================================

#[tokio::test]
async fn excluded_services_and_disappearing_instances_end_to_end() {
    let registry = Arc::new(InstanceRegistry::in_memory());
    let sink = CountingSink::new(registry.clone());
    let reconciler = Reconciler::builder(sink.clone(), registry.clone())
        .exclude(["db-*"])
        .build();

    let dc1 = ScriptedRegistry::new();
    dc1.put("api", vec![instance("api", "10.0.0.1")]);
    dc1.put("db-admin", vec![instance("db-admin", "10.0.0.7")]);
    let source = RegistrySource::new("dc1", dc1.clone());

    let first = reconciler.reconcile(&source).await;
    assert_eq!(first.registered.len(), 1);
    assert_eq!(sink.registers.load(Ordering::SeqCst), 1);
    let registered = registry.registered().unwrap();
    assert_eq!(registered.len(), 1);
    assert_eq!(registered[0].registration.name(), "api");
    assert_eq!(registered[0].registration.source(), "dc1");

    // api disappears, only the excluded service remains
    dc1.clear();
    dc1.put("db-admin", vec![instance("db-admin", "10.0.0.7")]);
    let second = reconciler.reconcile(&source).await;

    assert!(second.registered.is_empty());
    assert_eq!(second.deregistered, vec![registered[0].id.clone()]);
    assert_eq!(sink.registers.load(Ordering::SeqCst), 1);
    assert!(registry.registered().unwrap().is_empty());
}

#[tokio::test]
async fn retries_recover_a_flaky_sink() {
    struct FlakySink {
        inner: Arc<InstanceRegistry>,
        failures_left: AtomicUsize,
    }

    #[async_trait]
    impl RegistrationSink for FlakySink {
        async fn register(&self, registration: Registration) -> Result<InstanceId, SyncError> {
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(SyncError::Unavailable);
            }
            self.inner.register(registration).await
        }

        async fn deregister(&self, id: &InstanceId) -> Result<(), SyncError> {
            self.inner.deregister(id).await
        }
    }

    let registry = Arc::new(InstanceRegistry::in_memory());
    let sink = Arc::new(FlakySink {
        inner: registry.clone(),
        failures_left: AtomicUsize::new(2),
    });
    let dc1 = ScriptedRegistry::new();
    dc1.put("orders", vec![instance("orders", "10.0.0.1")]);
    let source = RegistrySource::new("dc1", dc1.clone());

    let backoff = rollcall_reconciler::BackoffConfig {
        initial_delay: std::time::Duration::from_millis(1),
        max_delay: std::time::Duration::from_millis(5),
        ..rollcall_reconciler::BackoffConfig::with_retries(3)
    };
    let report = Reconciler::builder(sink, registry.clone())
        .retry(backoff)
        .build()
        .reconcile(&source)
        .await;

    assert_eq!(report.registration_failures, 0);
    assert_eq!(registry.registered().unwrap().len(), 1);
}

//! Reconciler - one diff-and-prune pass over a registry source
//!
//! ```text
//! services() ──► ServiceFilter ──► instances(svc) ──► convert ──► register ──► live set
//!                                                                               │
//!      find_registered_by_source(code) ──► not in live set ──► deregister ◄─────┘
//! ```
//!
//! A pass never fails outward. Everything that went wrong is counted in the
//! returned [`PassReport`], logged, and recorded in metrics.
//!
//! # Pruning safety
//!
//! Pruning only ever touches instances attributed to the source being
//! reconciled, and only after the whole live set has been collected:
//!
//! - listing services or instances fails: the pass aborts, nothing is pruned
//! - reading the instance store fails: registrations stay, nothing is pruned
//! - under [`FailurePolicy::Preserve`], a service with any failed instance
//!   keeps all of its known instances for this pass

use crate::convert::DefaultInstanceConverter;
use crate::metrics::Metrics;
use crate::pattern::ServiceFilter;
use crate::retry::{BackoffConfig, RetryingSink};
use rollcall_core::metadata_keys::DISCOVERED_SERVICE;
use rollcall_core::{
    InstanceConverter, InstanceId, InstanceStore, KnownInstance, RegistrationSink,
    RegistrySource, SyncError,
};
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// What pruning does with services whose instances failed this pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Leave every known instance of a failing service alone
    #[default]
    Preserve,
    /// Treat failed instances as gone; they may be deregistered
    Prune,
}

impl FailurePolicy {
    /// Lowercase name, as used in configuration
    pub fn as_str(&self) -> &'static str {
        match self {
            FailurePolicy::Preserve => "preserve",
            FailurePolicy::Prune => "prune",
        }
    }
}

impl FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "preserve" => Ok(FailurePolicy::Preserve),
            "prune" => Ok(FailurePolicy::Prune),
            other => Err(format!(
                "unknown failure policy '{other}', expected 'preserve' or 'prune'"
            )),
        }
    }
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a pass ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "lowercase")]
pub enum PassOutcome {
    /// Listing and pruning both ran
    Completed,
    /// Stopped early; nothing was pruned
    Aborted(String),
}

impl PassOutcome {
    /// Metric label
    pub fn as_str(&self) -> &'static str {
        match self {
            PassOutcome::Completed => "completed",
            PassOutcome::Aborted(_) => "aborted",
        }
    }

    /// True for [`PassOutcome::Completed`]
    pub fn is_completed(&self) -> bool {
        matches!(self, PassOutcome::Completed)
    }
}

/// Summary of one reconciliation pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PassReport {
    /// Code of the reconciled source
    pub source: String,
    /// How the pass ended
    pub outcome: PassOutcome,
    /// Services the source listed
    pub services_seen: usize,
    /// Services that passed the filter
    pub services_accepted: usize,
    /// Live set: ids returned by successful registrations
    pub registered: BTreeSet<InstanceId>,
    /// Stale instances deregistered
    pub deregistered: Vec<InstanceId>,
    /// Instances the converter rejected
    pub conversion_failures: usize,
    /// Instances the sink refused
    pub registration_failures: usize,
    /// Stale instances whose deregistration failed
    pub deregistration_failures: usize,
    /// Stale-looking instances kept because their service had failures
    pub preserved: Vec<InstanceId>,
}

impl PassReport {
    fn new(source: &str) -> Self {
        Self {
            source: source.to_string(),
            outcome: PassOutcome::Completed,
            services_seen: 0,
            services_accepted: 0,
            registered: BTreeSet::new(),
            deregistered: Vec::new(),
            conversion_failures: 0,
            registration_failures: 0,
            deregistration_failures: 0,
            preserved: Vec::new(),
        }
    }

    fn record_metrics(&self, metrics: &Metrics, elapsed: std::time::Duration) {
        let source = self.source.as_str();
        metrics.record_pass(source, self.outcome.as_str(), elapsed);
        metrics.record_confirmed(source, self.registered.len());
        metrics.record_deregistrations(source, self.deregistered.len());
        metrics.record_failures(source, "conversion", self.conversion_failures);
        metrics.record_failures(source, "registration", self.registration_failures);
        metrics.record_failures(source, "deregistration", self.deregistration_failures);
        if self.outcome.is_completed() {
            metrics.set_live_instances(source, self.registered.len());
        }
    }
}

/// Diff-and-prune engine shared by every source
pub struct Reconciler {
    filter: ServiceFilter,
    converter: Arc<dyn InstanceConverter>,
    sink: Arc<dyn RegistrationSink>,
    store: Arc<dyn InstanceStore>,
    policy: FailurePolicy,
}

impl Reconciler {
    /// Start building a reconciler around a sink and the store it writes to
    pub fn builder(
        sink: Arc<dyn RegistrationSink>,
        store: Arc<dyn InstanceStore>,
    ) -> ReconcilerBuilder {
        ReconcilerBuilder::new(sink, store)
    }

    /// Service filter in use
    pub fn filter(&self) -> &ServiceFilter {
        &self.filter
    }

    /// Failure policy in use
    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    /// Run one pass for `source`
    pub async fn reconcile(&self, source: &RegistrySource) -> PassReport {
        let started = Instant::now();
        let code = source.code();
        let mut report = PassReport::new(code);

        // An empty attribution would match every unattributed instance
        if code.trim().is_empty() {
            warn!("Registry source has a blank code, refusing to reconcile");
            report.outcome = PassOutcome::Aborted("registry source code is blank".to_string());
            return report;
        }
        debug!(source = code, "Reconciliation pass started");

        if let Err(e) = self.run_pass(source, &mut report).await {
            warn!(
                source = code,
                error = %e,
                registered = report.registered.len(),
                "Reconciliation pass aborted, nothing pruned"
            );
            if let Some(m) = Metrics::get() {
                m.record_failures(code, e.kind(), 1);
            }
            report.outcome = PassOutcome::Aborted(e.to_string());
        } else {
            info!(
                source = code,
                services = report.services_accepted,
                registered = report.registered.len(),
                deregistered = report.deregistered.len(),
                preserved = report.preserved.len(),
                failures = report.conversion_failures
                    + report.registration_failures
                    + report.deregistration_failures,
                "Reconciliation pass completed"
            );
        }

        if let Some(m) = Metrics::get() {
            report.record_metrics(m, started.elapsed());
        }
        report
    }

    async fn run_pass(
        &self,
        source: &RegistrySource,
        report: &mut PassReport,
    ) -> Result<(), SyncError> {
        let code = source.code();
        let client = source.client();

        let services = client.services().await?;
        report.services_seen = services.len();

        // Listed services with at least one failed instance this pass
        let mut failing: HashSet<String> = HashSet::new();

        for service in services
            .iter()
            .filter(|service| self.filter.should_register(service))
        {
            report.services_accepted += 1;
            let instances = client.instances(service).await?;
            if instances.is_empty() {
                debug!(source = code, service = %service, "Service has no instances");
            }

            for instance in &instances {
                let registration = match self.converter.convert(instance) {
                    Ok(registration) => registration
                        .with_source(code)
                        .with_metadata(DISCOVERED_SERVICE, service.as_str()),
                    Err(e) => {
                        warn!(
                            source = code,
                            service = %instance.service_id,
                            host = %instance.host,
                            error = %e,
                            "Skipping instance that failed conversion"
                        );
                        report.conversion_failures += 1;
                        failing.insert(service.clone());
                        continue;
                    }
                };

                match self.sink.register(registration).await {
                    Ok(id) => {
                        report.registered.insert(id);
                    }
                    Err(e) => {
                        warn!(
                            source = code,
                            service = %service,
                            error = %e,
                            "Instance registration failed"
                        );
                        report.registration_failures += 1;
                        failing.insert(service.clone());
                    }
                }
            }
        }

        self.prune(code, &failing, report).await
    }

    async fn prune(
        &self,
        code: &str,
        failing: &HashSet<String>,
        report: &mut PassReport,
    ) -> Result<(), SyncError> {
        let known = self.store.find_registered_by_source(code).await?;

        for instance in known
            .into_iter()
            .filter(|instance| instance.is_registered_by(code))
        {
            if report.registered.contains(&instance.id) {
                continue;
            }

            let service = listed_service(&instance);
            if self.policy == FailurePolicy::Preserve && failing.contains(service) {
                debug!(
                    source = code,
                    instance_id = %instance.id,
                    service,
                    "Keeping instance of a service that failed this pass"
                );
                report.preserved.push(instance.id);
                continue;
            }

            match self.sink.deregister(&instance.id).await {
                Ok(()) => {
                    info!(
                        source = code,
                        instance_id = %instance.id,
                        service,
                        "Deregistered stale instance"
                    );
                    report.deregistered.push(instance.id);
                }
                Err(e) => {
                    warn!(
                        source = code,
                        instance_id = %instance.id,
                        error = %e,
                        "Deregistration failed, will retry next pass"
                    );
                    report.deregistration_failures += 1;
                }
            }
        }
        Ok(())
    }
}

/// Service the instance was listed under, falling back to its name for
/// records written without the stamp
fn listed_service(instance: &KnownInstance) -> &str {
    instance
        .registration
        .metadata()
        .get(DISCOVERED_SERVICE)
        .map(String::as_str)
        .unwrap_or_else(|| instance.registration.name())
}

impl fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reconciler")
            .field("filter", &self.filter)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Reconciler`]
///
/// # Example
///
/// ```ignore
/// let registry = Arc::new(InstanceRegistry::in_memory());
/// let reconciler = Reconciler::builder(registry.clone(), registry)
///     .include(["orders-*"])
///     .exclude(["orders-test"])
///     .failure_policy(FailurePolicy::Prune)
///     .build();
/// ```
pub struct ReconcilerBuilder {
    include: Vec<String>,
    exclude: Vec<String>,
    converter: Arc<dyn InstanceConverter>,
    sink: Arc<dyn RegistrationSink>,
    store: Arc<dyn InstanceStore>,
    policy: FailurePolicy,
    retry: Option<BackoffConfig>,
}

impl ReconcilerBuilder {
    /// Builder with default filter, converter and policy
    pub fn new(sink: Arc<dyn RegistrationSink>, store: Arc<dyn InstanceStore>) -> Self {
        Self {
            include: vec!["*".to_string()],
            exclude: Vec::new(),
            converter: Arc::new(DefaultInstanceConverter::new()),
            sink,
            store,
            policy: FailurePolicy::default(),
            retry: None,
        }
    }

    /// Replace the include patterns (default `*`)
    pub fn include<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.include = patterns.into_iter().map(Into::into).collect();
        self
    }

    /// Replace the exclude patterns (default none)
    pub fn exclude<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude = patterns.into_iter().map(Into::into).collect();
        self
    }

    /// Use a custom converter
    pub fn converter<C: InstanceConverter + 'static>(self, converter: C) -> Self {
        self.converter_arc(Arc::new(converter))
    }

    /// Use a custom converter (Arc version)
    pub fn converter_arc(mut self, converter: Arc<dyn InstanceConverter>) -> Self {
        self.converter = converter;
        self
    }

    /// Set the failure policy
    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Wrap the sink in a [`RetryingSink`]
    pub fn retry(mut self, backoff: BackoffConfig) -> Self {
        self.retry = Some(backoff);
        self
    }

    /// Build the reconciler
    pub fn build(self) -> Reconciler {
        let sink = match self.retry {
            Some(backoff) if backoff.max_retries > 0 => {
                Arc::new(RetryingSink::new(self.sink, backoff)) as Arc<dyn RegistrationSink>
            }
            _ => self.sink,
        };

        Reconciler {
            filter: ServiceFilter::new(self.include, self.exclude),
            converter: self.converter,
            sink,
            store: self.store,
            policy: self.policy,
        }
    }
}

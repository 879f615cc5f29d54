//! rollcall runtime - process entry point
//!
//! Provides [`run()`] for zero-boilerplate startup, and [`RuntimeBuilder`]
//! for embedders that bring their own instance store or shutdown trigger.
//!
//! # Quick start
//!
//! ```ignore
//! use rollcall_runtime::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     rollcall_runtime::run(|wiring| async move {
//!         Ok(wiring
//!             .source("eu-west", Arc::new(ConsulClient::new(..)))
//!             .source("us-east", Arc::new(ConsulClient::new(..))))
//!     }).await
//! }
//! ```

#![deny(unsafe_code)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::panic)]

pub mod prelude;

use rollcall_core::{DiscoveryClient, InstanceStore, RegistrationSink, RegistrySource};
use rollcall_reconciler::config::{Config, LogFormat};
use rollcall_reconciler::metrics::Metrics;
use rollcall_reconciler::{
    InstanceRegistry, ReconcilerBuilder, RegistryDirectory, TriggerDispatcher, TriggerEvent,
};
use std::future::Future;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Run rollcall with default settings.
///
/// Loads configuration from environment variables, initialises tracing and
/// metrics, calls your closure to register the registry sources, then
/// reconciles every source once and keeps reacting to trigger events until
/// SIGINT or SIGTERM.
///
/// Registrations land in an in-memory [`InstanceRegistry`]; use
/// [`RuntimeBuilder::instance_store`] to plug in another one.
pub async fn run<F, Fut>(configure: F) -> anyhow::Result<()>
where
    F: FnOnce(Wiring) -> Fut,
    Fut: Future<Output = anyhow::Result<Wiring>>,
{
    RuntimeBuilder::new().configure(configure).await
}

/// What the configure closure receives: the sources to reconcile, the
/// reconciler settings, and a handle for feeding trigger events.
pub struct Wiring {
    reconciler: ReconcilerBuilder,
    sources: Vec<RegistrySource>,
    events: mpsc::Sender<TriggerEvent>,
}

impl Wiring {
    fn new(reconciler: ReconcilerBuilder, events: mpsc::Sender<TriggerEvent>) -> Self {
        Self {
            reconciler,
            sources: Vec::new(),
            events,
        }
    }

    /// Add a registry source under `code`
    pub fn source(self, code: impl Into<Arc<str>>, client: Arc<dyn DiscoveryClient>) -> Self {
        self.registry_source(RegistrySource::new(code, client))
    }

    /// Add a prebuilt registry source
    ///
    /// A later source with an already used code replaces the earlier one.
    pub fn registry_source(mut self, source: RegistrySource) -> Self {
        self.sources.retain(|s| s.code() != source.code());
        self.sources.push(source);
        self
    }

    /// Adjust the reconciler beyond what the environment configured
    ///
    /// ```ignore
    /// wiring.reconciler(|r| r.exclude(["db-*"]).converter(MyConverter))
    /// ```
    pub fn reconciler(
        mut self,
        adjust: impl FnOnce(ReconcilerBuilder) -> ReconcilerBuilder,
    ) -> Self {
        self.reconciler = adjust(self.reconciler);
        self
    }

    /// Sender for heartbeats, refreshes and other trigger events
    ///
    /// Clone it into pollers before returning from the configure closure.
    pub fn events(&self) -> mpsc::Sender<TriggerEvent> {
        self.events.clone()
    }

    /// Sources registered so far
    pub fn sources(&self) -> &[RegistrySource] {
        &self.sources
    }
}

/// Builder for controlling runtime behaviour.
///
/// # Example
///
/// ```ignore
/// let registry = Arc::new(InstanceRegistry::in_memory());
/// RuntimeBuilder::new()
///     .instance_store(registry.clone(), registry)
///     .event_capacity(1024)
///     .configure(|wiring| async move {
///         Ok(wiring.source("local", Arc::new(StaticClient::default())))
///     })
///     .await
/// ```
pub struct RuntimeBuilder {
    config: Option<Config>,
    store: Option<(Arc<dyn RegistrationSink>, Arc<dyn InstanceStore>)>,
    event_capacity: usize,
}

impl RuntimeBuilder {
    /// Create a new builder; configuration comes from the environment.
    pub fn new() -> Self {
        Self {
            config: None,
            store: None,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }

    /// Use `config` instead of reading `ROLLCALL_*` variables.
    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Register into `sink` and read ownership back from `store`.
    ///
    /// Default: a fresh in-memory [`InstanceRegistry`] serving as both.
    pub fn instance_store(
        mut self,
        sink: Arc<dyn RegistrationSink>,
        store: Arc<dyn InstanceStore>,
    ) -> Self {
        self.store = Some((sink, store));
        self
    }

    /// Capacity of the trigger event channel.
    ///
    /// Default: 256.
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    /// Configure the sources and run until SIGINT or SIGTERM.
    pub async fn configure<F, Fut>(self, configure: F) -> anyhow::Result<()>
    where
        F: FnOnce(Wiring) -> Fut,
        Fut: Future<Output = anyhow::Result<Wiring>>,
    {
        self.configure_until(configure, shutdown_signal()).await
    }

    /// Configure the sources and run until `shutdown` resolves.
    pub async fn configure_until<F, Fut, S>(self, configure: F, shutdown: S) -> anyhow::Result<()>
    where
        F: FnOnce(Wiring) -> Fut,
        Fut: Future<Output = anyhow::Result<Wiring>>,
        S: Future<Output = ()>,
    {
        // ── 1. Load config ───────────────────────────────────────
        let config = match self.config {
            Some(config) => config,
            None => Config::from_env()?,
        };

        // ── 2. Init tracing ──────────────────────────────────────
        init_tracing(&config);

        info!(
            services = ?config.services,
            ignored_services = ?config.ignored_services,
            failure_policy = %config.failure_policy,
            register_retries = config.register_retries,
            "Starting rollcall"
        );

        // ── 3. Init metrics ──────────────────────────────────────
        Metrics::init()?;

        // ── 4. Pre-configure the reconciler from config ──────────
        let (sink, store) = self.store.unwrap_or_else(|| {
            let registry = Arc::new(InstanceRegistry::in_memory());
            (
                Arc::clone(&registry) as Arc<dyn RegistrationSink>,
                registry as Arc<dyn InstanceStore>,
            )
        });
        let (events_tx, events_rx) = mpsc::channel(self.event_capacity);
        let wiring = Wiring::new(config.reconciler_builder(sink, store), events_tx.clone());

        // ── 5. User adds sources ─────────────────────────────────
        let Wiring {
            reconciler,
            sources,
            ..
        } = configure(wiring).await?;
        if sources.is_empty() {
            warn!("No registry sources configured, nothing will be reconciled");
        }

        // ── 6. Build and spawn the dispatcher ────────────────────
        let directory = Arc::new(RegistryDirectory::new(sources));
        let dispatcher = Arc::new(TriggerDispatcher::new(directory, Arc::new(reconciler.build())));

        let dispatcher_handle = tokio::spawn({
            let dispatcher = Arc::clone(&dispatcher);
            async move { dispatcher.run(events_rx).await }
        });

        // ── 7. Initial reconciliation of every source ────────────
        events_tx
            .send(TriggerEvent::ApplicationReady)
            .await
            .map_err(|_| anyhow::anyhow!("trigger dispatcher stopped before start"))?;

        shutdown.await;

        // ── 8. Shutdown ──────────────────────────────────────────
        dispatcher.shutdown().await;
        dispatcher_handle.abort();
        info!("rollcall shutdown complete");

        Ok(())
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Initialise the tracing subscriber based on config.
///
/// A subscriber installed earlier by the host wins.
fn init_tracing(config: &Config) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.log_level.clone().into());

    let registry = tracing_subscriber::registry().with(env_filter);

    let installed = match config.log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).try_init(),
    };
    if installed.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}

/// Wait for SIGINT (Ctrl+C) or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = ?e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = ?e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}

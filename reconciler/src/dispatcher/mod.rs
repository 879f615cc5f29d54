//! Trigger dispatcher - turns events into per-source reconciliation passes
//!
//! | Event                | Sources reconciled                       |
//! |----------------------|------------------------------------------|
//! | `ApplicationReady`   | all                                      |
//! | `DirectoryRefreshed` | all sources of the new directory         |
//! | `InstanceRegistered` | all                                      |
//! | `ParentHeartbeat`    | the named source, if its fingerprint moved |
//! | `Heartbeat`          | every source whose fingerprint moved     |
//!
//! Handlers never wait for a pass. They hand a trigger to the source's
//! worker and return the codes that now have a pass queued or pending.
//!
//! # Example
//!
//! ```ignore
//! let (tx, rx) = tokio::sync::mpsc::channel(64);
//! let dispatcher = Arc::new(TriggerDispatcher::new(directory, reconciler));
//! tokio::spawn({
//!     let dispatcher = Arc::clone(&dispatcher);
//!     async move { dispatcher.run(rx).await }
//! });
//! tx.send(TriggerEvent::ApplicationReady).await?;
//! ```

mod worker;

use crate::change_detector::Fingerprint;
use crate::directory::RegistryDirectory;
use crate::error::{Result, RollcallError};
use crate::metrics::{try_record_skipped_heartbeat, try_record_trigger};
use crate::reconciler::{PassReport, Reconciler};
use parking_lot::Mutex;
use rollcall_core::RegistrySource;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use worker::{ReportSender, Schedule, SourceWorker};

/// Events that can start reconciliation
#[derive(Clone)]
pub enum TriggerEvent {
    /// The host application finished starting
    ApplicationReady,
    /// The set of registry sources changed
    DirectoryRefreshed {
        /// The complete new set of sources
        sources: Vec<RegistrySource>,
    },
    /// Some instance was registered elsewhere
    InstanceRegistered,
    /// One source's poller reported its membership fingerprint
    ParentHeartbeat {
        /// Source code
        source: String,
        /// Membership fingerprint
        value: Fingerprint,
    },
    /// A fingerprint broadcast to every source
    Heartbeat {
        /// Membership fingerprint
        value: Fingerprint,
    },
}

impl TriggerEvent {
    /// Metric label
    pub fn name(&self) -> &'static str {
        match self {
            TriggerEvent::ApplicationReady => "application_ready",
            TriggerEvent::DirectoryRefreshed { .. } => "directory_refreshed",
            TriggerEvent::InstanceRegistered => "instance_registered",
            TriggerEvent::ParentHeartbeat { .. } => "parent_heartbeat",
            TriggerEvent::Heartbeat { .. } => "heartbeat",
        }
    }
}

impl fmt::Debug for TriggerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerEvent::DirectoryRefreshed { sources } => f
                .debug_struct("DirectoryRefreshed")
                .field(
                    "sources",
                    &sources.iter().map(RegistrySource::code).collect::<Vec<_>>(),
                )
                .finish(),
            TriggerEvent::ParentHeartbeat { source, value } => f
                .debug_struct("ParentHeartbeat")
                .field("source", source)
                .field("value", value)
                .finish(),
            TriggerEvent::Heartbeat { value } => {
                f.debug_struct("Heartbeat").field("value", value).finish()
            }
            other => f.write_str(other.name()),
        }
    }
}

#[derive(Default)]
struct Workers {
    active: HashMap<String, SourceWorker>,
    /// Workers of removed sources that may still be finishing a pass
    retiring: HashMap<String, JoinHandle<()>>,
}

/// Routes trigger events to per-source workers
///
/// Workers are spawned on first use, so handlers must be called from within
/// a Tokio runtime.
pub struct TriggerDispatcher {
    directory: Arc<RegistryDirectory>,
    reconciler: Arc<Reconciler>,
    reports: Option<ReportSender>,
    /// None once shut down
    workers: Mutex<Option<Workers>>,
    coalesced: AtomicU64,
}

impl TriggerDispatcher {
    /// Dispatcher over a directory and a shared reconciler
    pub fn new(directory: Arc<RegistryDirectory>, reconciler: Arc<Reconciler>) -> Self {
        Self {
            directory,
            reconciler,
            reports: None,
            workers: Mutex::new(Some(Workers::default())),
            coalesced: AtomicU64::new(0),
        }
    }

    /// Forward every finished [`PassReport`] to `reports`
    pub fn with_reports(mut self, reports: mpsc::UnboundedSender<PassReport>) -> Self {
        self.reports = Some(reports);
        self
    }

    /// The directory this dispatcher fans out over
    pub fn directory(&self) -> &Arc<RegistryDirectory> {
        &self.directory
    }

    /// Triggers folded into an already pending pass so far
    pub fn coalesced_count(&self) -> u64 {
        self.coalesced.load(Ordering::Relaxed)
    }

    /// Route one event
    ///
    /// Returns the codes of the sources that now have a pass queued or
    /// pending. Fails only after [`shutdown`](Self::shutdown).
    pub fn dispatch(&self, event: TriggerEvent) -> Result<Vec<String>> {
        debug!(event = event.name(), "Trigger received");
        try_record_trigger(event.name());

        match event {
            TriggerEvent::ApplicationReady => self.on_application_ready(),
            TriggerEvent::DirectoryRefreshed { sources } => self.on_directory_refreshed(sources),
            TriggerEvent::InstanceRegistered => self.on_instance_registered(),
            TriggerEvent::ParentHeartbeat { source, value } => {
                self.on_parent_heartbeat(&source, &value)
            }
            TriggerEvent::Heartbeat { value } => self.on_heartbeat(&value),
        }
    }

    /// Reconcile every source
    pub fn on_application_ready(&self) -> Result<Vec<String>> {
        self.fan_out()
    }

    /// Replace the directory, retire workers of removed sources, reconcile all
    pub fn on_directory_refreshed(&self, sources: Vec<RegistrySource>) -> Result<Vec<String>> {
        self.ensure_running()?;
        self.directory.refresh(sources);
        let current = self.directory.snapshot();

        {
            let mut guard = self.workers.lock();
            let workers = guard.as_mut().ok_or(RollcallError::Shutdown)?;
            let gone: Vec<String> = workers
                .active
                .keys()
                .filter(|code| !current.contains(code))
                .cloned()
                .collect();
            for code in gone {
                if let Some(worker) = workers.active.remove(&code) {
                    workers.retiring.insert(code, worker.retire());
                }
            }
            workers.retiring.retain(|_, handle| !handle.is_finished());
        }

        self.fan_out()
    }

    /// Reconcile every source
    pub fn on_instance_registered(&self) -> Result<Vec<String>> {
        self.fan_out()
    }

    /// Reconcile `source` if its fingerprint changed
    pub fn on_parent_heartbeat(&self, source: &str, value: &Fingerprint) -> Result<Vec<String>> {
        self.ensure_running()?;
        let Some(registry_source) = self.directory.source(source) else {
            warn!(source, "Heartbeat for unknown registry source, ignoring");
            return Ok(Vec::new());
        };

        if self.directory.detector(source).update(value) {
            Ok(self.schedule(registry_source.code())?.into_iter().collect())
        } else {
            debug!(source, %value, "Fingerprint unchanged, skipping");
            try_record_skipped_heartbeat(source);
            Ok(Vec::new())
        }
    }

    /// Reconcile every source whose fingerprint changed
    pub fn on_heartbeat(&self, value: &Fingerprint) -> Result<Vec<String>> {
        self.ensure_running()?;
        let snapshot = self.directory.snapshot();
        let mut triggered = Vec::new();
        for code in snapshot.codes() {
            if self.directory.detector(code).update(value) {
                triggered.extend(self.schedule(code)?);
            } else {
                try_record_skipped_heartbeat(code);
            }
        }
        Ok(triggered)
    }

    /// Consume events until the channel closes, then shut down
    pub async fn run(&self, mut events: mpsc::Receiver<TriggerEvent>) {
        info!(sources = self.directory.snapshot().len(), "Trigger dispatcher started");
        while let Some(event) = events.recv().await {
            if let Err(e) = self.dispatch(event) {
                warn!(error = %e, "Dropping trigger");
                break;
            }
        }
        self.shutdown().await;
    }

    /// Stop all workers, letting pending passes finish
    ///
    /// Later triggers fail with [`RollcallError::Shutdown`]. Calling this
    /// twice is harmless.
    pub async fn shutdown(&self) {
        let workers = self.workers.lock().take();
        let Some(workers) = workers else {
            return;
        };
        info!(workers = workers.active.len(), "Shutting down trigger dispatcher");
        for (_, worker) in workers.active {
            worker.stop().await;
        }
        for (code, handle) in workers.retiring {
            if let Err(e) = handle.await {
                warn!(source = %code, error = %e, "Retired source worker terminated abnormally");
            }
        }
        info!("Trigger dispatcher stopped");
    }

    fn fan_out(&self) -> Result<Vec<String>> {
        self.ensure_running()?;
        let snapshot = self.directory.snapshot();
        let mut triggered = Vec::with_capacity(snapshot.len());
        for code in snapshot.codes() {
            triggered.extend(self.schedule(code)?);
        }
        Ok(triggered)
    }

    /// Hand a trigger to the worker of `code`, spawning it if needed
    fn schedule(&self, code: &str) -> Result<Option<String>> {
        let mut guard = self.workers.lock();
        let workers = guard.as_mut().ok_or(RollcallError::Shutdown)?;

        if let Some(worker) = workers.active.get(code) {
            match worker.trigger() {
                Schedule::Queued => return Ok(Some(code.to_string())),
                Schedule::Coalesced => {
                    self.coalesced.fetch_add(1, Ordering::Relaxed);
                    return Ok(Some(code.to_string()));
                }
                Schedule::Closed => {
                    warn!(source = code, "Source worker closed unexpectedly, restarting");
                }
            }
        }

        let worker = SourceWorker::spawn(
            code,
            Arc::clone(&self.directory),
            Arc::clone(&self.reconciler),
            self.reports.clone(),
            workers.retiring.remove(code),
        );
        let schedule = worker.trigger();
        workers.active.insert(code.to_string(), worker);
        Ok((schedule != Schedule::Closed).then(|| code.to_string()))
    }

    fn ensure_running(&self) -> Result<()> {
        if self.workers.lock().is_none() {
            return Err(RollcallError::Shutdown);
        }
        Ok(())
    }
}

impl fmt::Debug for TriggerDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TriggerDispatcher")
            .field("sources", &self.directory.snapshot().len())
            .field("coalesced", &self.coalesced_count())
            .finish_non_exhaustive()
    }
}

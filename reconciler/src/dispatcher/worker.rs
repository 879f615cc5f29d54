//! Per-source serialized worker
//!
//! One worker task per source code, fed by a queue of capacity 1. At most one
//! pass runs and one more waits; anything beyond that is coalesced into the
//! waiting pass, which will observe the newest registry state anyway.
//!
//! The worker resolves its source from the directory when a pass starts, so
//! a refresh that swaps the discovery client under the same code is picked
//! up by the next pass without restarting the worker. A worker that replaces
//! a retired one for the same code waits for its predecessor before its
//! first pass.

use crate::directory::RegistryDirectory;
use crate::metrics::try_record_coalesced;
use crate::reconciler::{PassReport, Reconciler};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Result of handing a trigger to a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Schedule {
    /// A new pass is pending
    Queued,
    /// A pass was already pending; this trigger folds into it
    Coalesced,
    /// The worker is gone
    Closed,
}

/// Optional sink for finished pass reports
pub(crate) type ReportSender = mpsc::UnboundedSender<PassReport>;

pub(crate) struct SourceWorker {
    code: String,
    tx: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

impl SourceWorker {
    pub(crate) fn spawn(
        code: &str,
        directory: Arc<RegistryDirectory>,
        reconciler: Arc<Reconciler>,
        reports: Option<ReportSender>,
        predecessor: Option<JoinHandle<()>>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(1);
        let handle = tokio::spawn(run(
            code.to_string(),
            rx,
            directory,
            reconciler,
            reports,
            predecessor,
        ));
        debug!(source = code, "Source worker started");
        Self {
            code: code.to_string(),
            tx,
            handle,
        }
    }

    /// Request a pass
    pub(crate) fn trigger(&self) -> Schedule {
        match self.tx.try_send(()) {
            Ok(()) => Schedule::Queued,
            Err(TrySendError::Full(())) => {
                debug!(source = %self.code, "Pass already pending, coalescing trigger");
                try_record_coalesced(&self.code);
                Schedule::Coalesced
            }
            Err(TrySendError::Closed(())) => Schedule::Closed,
        }
    }

    /// Stop accepting triggers without waiting; a pending pass still runs
    pub(crate) fn retire(self) -> JoinHandle<()> {
        info!(source = %self.code, "Retiring source worker");
        drop(self.tx);
        self.handle
    }

    /// Stop accepting triggers and wait for the pending pass to finish
    pub(crate) async fn stop(self) {
        drop(self.tx);
        if let Err(e) = self.handle.await {
            error!(source = %self.code, error = %e, "Source worker terminated abnormally");
        }
    }
}

async fn run(
    code: String,
    mut rx: mpsc::Receiver<()>,
    directory: Arc<RegistryDirectory>,
    reconciler: Arc<Reconciler>,
    reports: Option<ReportSender>,
    predecessor: Option<JoinHandle<()>>,
) {
    if let Some(previous) = predecessor {
        debug!(source = %code, "Waiting for retired worker to finish");
        if let Err(e) = previous.await {
            error!(source = %code, error = %e, "Retired source worker terminated abnormally");
        }
    }

    while rx.recv().await.is_some() {
        let Some(source) = directory.source(&code) else {
            debug!(source = %code, "Source no longer in directory, skipping pass");
            continue;
        };

        // A panicking pass only takes its own task down
        let reconciler = Arc::clone(&reconciler);
        let pass = tokio::spawn(async move { reconciler.reconcile(&source).await });

        match pass.await {
            Ok(report) => {
                if let Some(reports) = &reports {
                    let _ = reports.send(report);
                }
            }
            Err(e) if e.is_panic() => {
                error!(source = %code, "Reconciliation pass panicked");
            }
            Err(e) => {
                error!(source = %code, error = %e, "Reconciliation pass did not finish");
            }
        }
    }
    debug!(source = %code, "Source worker stopped");
}

//! rollcall - multi-registry instance reconciliation
//!
//! Keeps a downstream instance registry in step with several independent
//! service registries. Each registry source is reconciled on its own:
//! instances it reports are registered under its code, and instances it
//! stopped reporting are deregistered, without touching what other sources
//! own.
//!
//! ```text
//! TriggerEvent ──► TriggerDispatcher ──► ChangeDetector gate ──► SourceWorker (per source)
//!                                                                     │
//!                                   Reconciler::reconcile(source) ◄───┘
//!                                     │
//!          ServiceFilter ◄────────────┼────────────► RegistrationSink / InstanceStore
//! ```

#![deny(unsafe_code)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::panic)]

pub mod change_detector;
pub mod config;
pub mod convert;
pub mod directory;
pub mod dispatcher;
pub mod error;
pub mod metrics;
pub mod pattern;
pub mod reconciler;
pub mod registry;
pub mod retry;

pub use change_detector::{ChangeDetector, Fingerprint};
pub use config::{Config, LogFormat};
pub use convert::DefaultInstanceConverter;
pub use directory::{DirectorySnapshot, RegistryDirectory};
pub use dispatcher::{TriggerDispatcher, TriggerEvent};
pub use error::{Result, RollcallError};
pub use pattern::{ServiceFilter, matches_any, simple_match};
pub use reconciler::{FailurePolicy, PassOutcome, PassReport, Reconciler, ReconcilerBuilder};
pub use registry::{InstanceRegistry, InstanceRepository, MemoryInstanceRepository};
pub use retry::{BackoffConfig, RetryingSink};

pub use rollcall_core::{
    DiscoveredInstance, DiscoveryClient, InstanceConverter, InstanceId, InstanceStore,
    KnownInstance, Registration, RegistrationBuilder, RegistrationSink, RegistrySource, SyncError,
};

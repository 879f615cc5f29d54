//! Convenience re-exports for embedders.
//!
//! ```rust
//! use rollcall_runtime::prelude::*;
//! ```

// Domain types and collaborator traits
pub use rollcall_core::{
    DiscoveredInstance, DiscoveryClient, InstanceConverter, InstanceId, InstanceStore,
    KnownInstance, Registration, RegistrationSink, RegistrySource, SyncError,
};

// Reconciliation
pub use rollcall_reconciler::{
    DefaultInstanceConverter, FailurePolicy, PassOutcome, PassReport, Reconciler,
    ReconcilerBuilder, ServiceFilter,
};

// Triggers
pub use rollcall_reconciler::{Fingerprint, TriggerDispatcher, TriggerEvent};

// Instance storage
pub use rollcall_reconciler::{InstanceRegistry, InstanceRepository, MemoryInstanceRepository};

// Resilience wrapper
pub use rollcall_reconciler::{BackoffConfig, RetryingSink};

// Configuration and errors
pub use rollcall_reconciler::{Config, LogFormat, RollcallError};

// For implementing DiscoveryClient and friends
pub use async_trait::async_trait;
pub use std::sync::Arc;

// Runtime
pub use crate::{RuntimeBuilder, Wiring};

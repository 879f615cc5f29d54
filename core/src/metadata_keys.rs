//! Reserved metadata keys read from discovered instances
//!
//! Registries carry management hints as free-form instance metadata. These
//! are the keys the default converter understands; everything else is copied
//! into the registration untouched.

/// Scheme of the management endpoints when it differs from the service ("http", "https")
pub const MANAGEMENT_SCHEME: &str = "management.scheme";

/// Host of the management endpoints when it differs from the service
pub const MANAGEMENT_ADDRESS: &str = "management.address";

/// Port of the management endpoints when it differs from the service
pub const MANAGEMENT_PORT: &str = "management.port";

/// Path prefix of the management endpoints (e.g. "/actuator")
pub const MANAGEMENT_CONTEXT_PATH: &str = "management.context-path";

/// Path of the health endpoint relative to the management URL (e.g. "health")
pub const HEALTH_PATH: &str = "health.path";

/// Service name as listed by the registry source, stamped by the reconciler
///
/// Converters may rename services; pruning decisions that concern a listed
/// service read this key instead of the registration name.
pub const DISCOVERED_SERVICE: &str = "rollcall.discovered-service";

//! Normalized instance registrations and the records the instance store keeps
//!
//! A [`Registration`] is what the reconciler hands to a registration sink.
//! Every registration carries the code of the registry source that discovered
//! it; two registrations with the same URLs but different sources are two
//! different instances.

use crate::error::SyncError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use url::Url;

/// Identifier assigned to an instance by the registration sink
///
/// Stable for the instance's registered lifetime. Opaque to the reconciler,
/// which only compares ids for set membership.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(String);

impl InstanceId {
    /// Wrap an identifier produced by a sink
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identifier as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for InstanceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for InstanceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Normalized description of one service instance
///
/// Construct through [`Registration::builder`], which validates the URLs.
/// The `source` field is stamped by the reconciler with the owning registry
/// source's code; converters may leave it empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    name: String,
    service_url: Option<String>,
    management_url: Option<String>,
    health_url: String,
    #[serde(default)]
    metadata: BTreeMap<String, String>,
    #[serde(default)]
    source: String,
}

impl Registration {
    /// Start building a registration for `name` with the given health URL
    pub fn builder(name: impl Into<String>, health_url: impl Into<String>) -> RegistrationBuilder {
        RegistrationBuilder {
            name: name.into(),
            service_url: None,
            management_url: None,
            health_url: health_url.into(),
            metadata: BTreeMap::new(),
            source: String::new(),
        }
    }

    /// Logical service name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Base URL of the service itself
    pub fn service_url(&self) -> Option<&str> {
        self.service_url.as_deref()
    }

    /// Base URL of the management endpoints
    pub fn management_url(&self) -> Option<&str> {
        self.management_url.as_deref()
    }

    /// URL polled to decide whether the instance is up
    pub fn health_url(&self) -> &str {
        &self.health_url
    }

    /// Instance metadata, copied from discovery
    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    /// Code of the registry source that owns this registration
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Return a copy attributed to `source`
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Return a copy with one metadata entry set
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Reopen this registration for modification
    pub fn to_builder(&self) -> RegistrationBuilder {
        RegistrationBuilder {
            name: self.name.clone(),
            service_url: self.service_url.clone(),
            management_url: self.management_url.clone(),
            health_url: self.health_url.clone(),
            metadata: self.metadata.clone(),
            source: self.source.clone(),
        }
    }
}

/// Builder for [`Registration`]
#[derive(Debug, Clone)]
pub struct RegistrationBuilder {
    name: String,
    service_url: Option<String>,
    management_url: Option<String>,
    health_url: String,
    metadata: BTreeMap<String, String>,
    source: String,
}

impl RegistrationBuilder {
    /// Set the service URL
    pub fn service_url(mut self, url: impl Into<String>) -> Self {
        self.service_url = Some(url.into());
        self
    }

    /// Set the management URL
    pub fn management_url(mut self, url: impl Into<String>) -> Self {
        self.management_url = Some(url.into());
        self
    }

    /// Replace the health URL
    pub fn health_url(mut self, url: impl Into<String>) -> Self {
        self.health_url = url.into();
        self
    }

    /// Add one metadata entry
    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Add every entry of `entries` to the metadata
    pub fn extend_metadata<K, V>(mut self, entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.metadata
            .extend(entries.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Attribute the registration to a registry source
    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Validate and build
    ///
    /// Fails with [`SyncError::Conversion`] when the name is empty or any
    /// URL is not an absolute `http`/`https` URL.
    pub fn build(self) -> Result<Registration, SyncError> {
        if self.name.trim().is_empty() {
            return Err(SyncError::Conversion("name must not be empty".to_string()));
        }
        check_url("health_url", &self.health_url)?;
        if let Some(url) = &self.service_url {
            check_url("service_url", url)?;
        }
        if let Some(url) = &self.management_url {
            check_url("management_url", url)?;
        }

        Ok(Registration {
            name: self.name,
            service_url: self.service_url,
            management_url: self.management_url,
            health_url: self.health_url,
            metadata: self.metadata,
            source: self.source,
        })
    }
}

fn check_url(field: &str, raw: &str) -> Result<(), SyncError> {
    let url = Url::parse(raw)
        .map_err(|e| SyncError::Conversion(format!("{field} '{raw}' is not a valid URL: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(SyncError::Conversion(format!(
            "{field} '{raw}' has unsupported scheme '{other}'"
        ))),
    }
}

/// A record held by the instance store
///
/// The store owns these; the reconciler only reads them (filtered to
/// registered instances of one source) and commands deregistration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnownInstance {
    /// Identifier assigned at registration
    pub id: InstanceId,
    /// Latest registration, including its source attribution
    pub registration: Registration,
    /// Whether the instance is currently registered
    pub is_registered: bool,
    /// Bumped on every observable change to the record
    pub version: u64,
}

impl KnownInstance {
    /// True if this instance is registered and owned by `source`
    pub fn is_registered_by(&self, source: &str) -> bool {
        self.is_registered && self.registration.source() == source
    }
}

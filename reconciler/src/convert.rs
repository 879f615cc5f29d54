//! Default discovered-instance converter
//!
//! Maps a [`DiscoveredInstance`] onto a [`Registration`]:
//!
//! ```text
//! service_url     uri, or {http|https}://host:port
//! management_url  service_url with management.{scheme,address,port} applied,
//!                 path + management.context-path (default "/actuator")
//! health_url      management_url path + health.path (default "health")
//! ```
//!
//! Metadata is copied verbatim so the management hints stay visible
//! downstream.

use rollcall_core::metadata_keys::{
    HEALTH_PATH, MANAGEMENT_ADDRESS, MANAGEMENT_CONTEXT_PATH, MANAGEMENT_PORT, MANAGEMENT_SCHEME,
};
use rollcall_core::{DiscoveredInstance, InstanceConverter, Registration, SyncError};
use url::Url;

/// Default management context path
pub const DEFAULT_MANAGEMENT_CONTEXT_PATH: &str = "/actuator";

/// Default health endpoint path, relative to the management URL
pub const DEFAULT_HEALTH_PATH: &str = "health";

/// Field-mapping converter used when no override is configured
#[derive(Debug, Clone)]
pub struct DefaultInstanceConverter {
    management_context_path: String,
    health_path: String,
}

impl DefaultInstanceConverter {
    /// Converter with `/actuator` and `health` defaults
    pub fn new() -> Self {
        Self {
            management_context_path: DEFAULT_MANAGEMENT_CONTEXT_PATH.to_string(),
            health_path: DEFAULT_HEALTH_PATH.to_string(),
        }
    }

    /// Management context path used when an instance carries none
    pub fn management_context_path(mut self, path: impl Into<String>) -> Self {
        self.management_context_path = path.into();
        self
    }

    /// Health path used when an instance carries none
    pub fn health_path(mut self, path: impl Into<String>) -> Self {
        self.health_path = path.into();
        self
    }

    fn service_url(&self, instance: &DiscoveredInstance) -> Result<Url, SyncError> {
        let raw = match &instance.uri {
            Some(uri) => uri.clone(),
            None => {
                if instance.host.trim().is_empty() {
                    return Err(SyncError::Conversion(format!(
                        "instance of '{}' has no host",
                        instance.service_id
                    )));
                }
                let scheme = if instance.secure { "https" } else { "http" };
                format!("{scheme}://{}:{}", bracket_ipv6(&instance.host), instance.port)
            }
        };
        Url::parse(&raw)
            .map_err(|e| SyncError::Conversion(format!("invalid service url '{raw}': {e}")))
    }

    fn management_url(
        &self,
        instance: &DiscoveredInstance,
        service_url: &Url,
    ) -> Result<Url, SyncError> {
        let metadata = &instance.metadata;
        let mut url = service_url.clone();
        url.set_query(None);
        url.set_fragment(None);

        if let Some(scheme) = metadata.get(MANAGEMENT_SCHEME) {
            url.set_scheme(scheme).map_err(|()| {
                SyncError::Conversion(format!("invalid {MANAGEMENT_SCHEME} '{scheme}'"))
            })?;
        }
        if let Some(address) = metadata.get(MANAGEMENT_ADDRESS) {
            url.set_host(Some(address)).map_err(|e| {
                SyncError::Conversion(format!("invalid {MANAGEMENT_ADDRESS} '{address}': {e}"))
            })?;
        }
        if let Some(port) = metadata.get(MANAGEMENT_PORT) {
            let port: u16 = port.trim().parse().map_err(|_| {
                SyncError::Conversion(format!("invalid {MANAGEMENT_PORT} '{port}'"))
            })?;
            url.set_port(Some(port)).map_err(|()| {
                SyncError::Conversion(format!("cannot set {MANAGEMENT_PORT} on '{url}'"))
            })?;
        }

        let context_path = metadata
            .get(MANAGEMENT_CONTEXT_PATH)
            .map(String::as_str)
            .unwrap_or(&self.management_context_path);
        let path = join_path(url.path(), context_path);
        url.set_path(&path);
        Ok(url)
    }

    fn health_url(&self, instance: &DiscoveredInstance, management_url: &Url) -> Url {
        let health_path = instance
            .metadata
            .get(HEALTH_PATH)
            .map(String::as_str)
            .unwrap_or(&self.health_path);
        let mut url = management_url.clone();
        let path = join_path(management_url.path(), health_path);
        url.set_path(&path);
        url
    }
}

impl Default for DefaultInstanceConverter {
    fn default() -> Self {
        Self::new()
    }
}

impl InstanceConverter for DefaultInstanceConverter {
    fn convert(&self, instance: &DiscoveredInstance) -> Result<Registration, SyncError> {
        let service_url = self.service_url(instance)?;
        let management_url = self.management_url(instance, &service_url)?;
        let health_url = self.health_url(instance, &management_url);

        Registration::builder(instance.service_id.clone(), health_url.as_str())
            .service_url(service_url.as_str().trim_end_matches('/'))
            .management_url(management_url.as_str())
            .extend_metadata(instance.metadata.clone())
            .build()
    }
}

fn bracket_ipv6(host: &str) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]")
    } else {
        host.to_string()
    }
}

/// Join two URL path fragments with exactly one slash between them
fn join_path(base: &str, tail: &str) -> String {
    let base = base.trim_end_matches('/');
    let tail = tail.trim_matches('/');
    match (base.is_empty(), tail.is_empty()) {
        (true, true) => "/".to_string(),
        (false, true) => base.to_string(),
        _ => format!("{base}/{tail}"),
    }
}

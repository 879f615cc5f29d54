//! Heartbeat gating
//!
//! Registry pollers emit a heartbeat with some membership token (a Consul
//! catalog index, an etag, a hash of the member list). The reconciler only
//! needs to know whether the token differs from the last one it saw for that
//! source, so the token is kept as an opaque [`Fingerprint`].

use parking_lot::Mutex;
use std::fmt;

/// Opaque, equality-comparable snapshot token of a source's membership
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Wrap an arbitrary token
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The raw token
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<u64> for Fingerprint {
    fn from(index: u64) -> Self {
        Self(index.to_string())
    }
}

impl From<&str> for Fingerprint {
    fn from(token: &str) -> Self {
        Self(token.to_string())
    }
}

impl From<String> for Fingerprint {
    fn from(token: String) -> Self {
        Self(token)
    }
}

/// Remembers the last fingerprint seen for one registry source
///
/// Updates are serialized by an internal mutex, so concurrent heartbeats for
/// the same source never both observe "changed" for the same value.
#[derive(Debug, Default)]
pub struct ChangeDetector {
    last: Mutex<Option<Fingerprint>>,
}

impl ChangeDetector {
    /// Detector with no prior fingerprint
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `value`, returning true if it differs from the previous one
    ///
    /// The first value ever seen counts as a change. An unchanged value
    /// leaves the state untouched.
    pub fn update(&self, value: &Fingerprint) -> bool {
        let mut last = self.last.lock();
        if last.as_ref() == Some(value) {
            return false;
        }
        *last = Some(value.clone());
        true
    }

    /// The last recorded fingerprint, if any
    pub fn current(&self) -> Option<Fingerprint> {
        self.last.lock().clone()
    }
}

//! Registry source directory
//!
//! Holds the configured registry sources keyed by code, plus one
//! [`ChangeDetector`] per source. Every trigger fans out over a
//! [`DirectorySnapshot`]; a refresh swaps the whole snapshot so readers see
//! either the old set of sources or the new one, never a mix.

use crate::change_detector::ChangeDetector;
use parking_lot::{Mutex, RwLock};
use rollcall_core::RegistrySource;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{info, warn};

/// Immutable view of the configured sources, ordered by code
#[derive(Debug, Default)]
pub struct DirectorySnapshot {
    sources: BTreeMap<String, RegistrySource>,
}

impl DirectorySnapshot {
    /// Build a snapshot
    ///
    /// A later source with a duplicate code replaces the earlier one. Sources
    /// with a blank code are skipped: their registrations would carry no
    /// attribution.
    pub fn new(sources: impl IntoIterator<Item = RegistrySource>) -> Self {
        let mut by_code = BTreeMap::new();
        for source in sources {
            if source.code().trim().is_empty() {
                warn!("Registry source with a blank code, skipping");
                continue;
            }
            if let Some(previous) = by_code.insert(source.code().to_string(), source) {
                warn!(
                    source = previous.code(),
                    "Duplicate registry source code, keeping the last one"
                );
            }
        }
        Self { sources: by_code }
    }

    /// Look up a source by code
    pub fn get(&self, code: &str) -> Option<&RegistrySource> {
        self.sources.get(code)
    }

    /// All sources, ordered by code
    pub fn sources(&self) -> impl Iterator<Item = &RegistrySource> {
        self.sources.values()
    }

    /// All codes, ordered
    pub fn codes(&self) -> impl Iterator<Item = &str> {
        self.sources.keys().map(String::as_str)
    }

    /// Whether a code is present
    pub fn contains(&self, code: &str) -> bool {
        self.sources.contains_key(code)
    }

    /// Number of sources
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// True if no sources are configured
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

/// Read-mostly directory of registry sources and their change detectors
#[derive(Debug, Default)]
pub struct RegistryDirectory {
    snapshot: RwLock<Arc<DirectorySnapshot>>,
    detectors: Mutex<HashMap<String, Arc<ChangeDetector>>>,
}

impl RegistryDirectory {
    /// Directory over an initial set of sources
    pub fn new(sources: impl IntoIterator<Item = RegistrySource>) -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(DirectorySnapshot::new(sources))),
            detectors: Mutex::new(HashMap::new()),
        }
    }

    /// Current snapshot; stays valid even if a refresh happens meanwhile
    pub fn snapshot(&self) -> Arc<DirectorySnapshot> {
        Arc::clone(&self.snapshot.read())
    }

    /// Look up a source in the current snapshot
    pub fn source(&self, code: &str) -> Option<RegistrySource> {
        self.snapshot.read().get(code).cloned()
    }

    /// Replace every source at once
    ///
    /// Returns the previous snapshot. Change detectors of codes that are
    /// still present keep their fingerprint; the others are dropped.
    pub fn refresh(
        &self,
        sources: impl IntoIterator<Item = RegistrySource>,
    ) -> Arc<DirectorySnapshot> {
        let next = Arc::new(DirectorySnapshot::new(sources));

        // Swap and prune under the detectors lock so `detector` never stores
        // an entry for a code the new snapshot dropped
        let previous = {
            let mut detectors = self.detectors.lock();
            let previous = std::mem::replace(&mut *self.snapshot.write(), Arc::clone(&next));
            detectors.retain(|code, _| next.contains(code));
            previous
        };

        info!(
            previous = previous.len(),
            current = next.len(),
            "Registry directory refreshed"
        );
        previous
    }

    /// Change detector for `code`, created on first use
    ///
    /// Codes outside the current snapshot get a throwaway detector that is
    /// not kept, so a late heartbeat for a removed source cannot leave a
    /// fingerprint behind for when the code returns.
    pub fn detector(&self, code: &str) -> Arc<ChangeDetector> {
        let mut detectors = self.detectors.lock();
        if let Some(detector) = detectors.get(code) {
            return Arc::clone(detector);
        }
        if !self.snapshot.read().contains(code) {
            return Arc::new(ChangeDetector::new());
        }
        Arc::clone(
            detectors
                .entry(code.to_string())
                .or_insert_with(|| Arc::new(ChangeDetector::new())),
        )
    }
}

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Duration, Utc};

use crate::models::LibrarySnapshot;
use crate::provider::Provider;

/// A cached snapshot and whether it was explicitly invalidated.
#[derive(Debug, Clone)]
pub struct CachedSnapshot {
    pub snapshot: Arc<LibrarySnapshot>,
    pub stale: bool,
}

impl CachedSnapshot {
    /// Fresh when not invalidated and younger than `window`.
    pub fn is_fresh(&self, window: Duration, now: DateTime<Utc>) -> bool {
        !self.stale && self.snapshot.age(now) < window
    }
}

/// In-memory latest snapshot per (user, provider).
///
/// Reads never wait on I/O. Entries are replaced wholesale, so readers see
/// either the previous snapshot or the next one.
#[derive(Default)]
pub struct LibraryCache {
    entries: RwLock<HashMap<(String, Provider), CachedSnapshot>>,
}

impl LibraryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, user_id: &str, provider: Provider) -> Option<CachedSnapshot> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.get(&(user_id.to_string(), provider)).cloned()
    }

    /// Replace the snapshot for its pair. A snapshot older than the cached one
    /// is ignored and `false` is returned.
    pub fn put(&self, snapshot: LibrarySnapshot) -> bool {
        let key = (snapshot.user_id.clone(), snapshot.provider);
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());

        if let Some(current) = entries.get(&key)
            && current.snapshot.last_synced_at > snapshot.last_synced_at
        {
            tracing::debug!(
                "Ignoring {} snapshot for {} older than the cached one",
                key.1,
                key.0
            );
            return false;
        }

        entries.insert(
            key,
            CachedSnapshot {
                snapshot: Arc::new(snapshot),
                stale: false,
            },
        );
        true
    }

    /// Mark the pair stale without dropping its data.
    pub fn invalidate(&self, user_id: &str, provider: Provider) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = entries.get_mut(&(user_id.to_string(), provider)) {
            entry.stale = true;
        }
    }

    pub fn remove(&self, user_id: &str, provider: Provider) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.remove(&(user_id.to_string(), provider)).is_some()
    }
}

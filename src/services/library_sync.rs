use std::sync::Arc;
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::config::SyncConfig;
use crate::error::{FetchError, HubError};
use crate::models::LibrarySnapshot;
use crate::ports::library::{Collection, LibraryClient};
use crate::provider::Provider;
use crate::providers::ProviderRegistry;
use crate::services::library_cache::LibraryCache;
use crate::services::snapshots::SnapshotRepository;
use crate::services::tokens::TokenLifecycleManager;

/// Upper bound on pages followed per collection, in case a provider keeps
/// handing out `next` cursors.
const MAX_PAGES: usize = 500;

/// Bounded exponential backoff for transient page-fetch failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts per page, including the first one.
    pub max_attempts: usize,
    pub initial_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: config.initial_backoff(),
        }
    }

    fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.initial_backoff)
            .with_max_times(self.max_attempts.saturating_sub(1))
            .with_jitter()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&SyncConfig::default())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSummary {
    pub provider: Provider,
    pub albums: usize,
    pub playlists: usize,
    /// Entries dropped because they could not be normalized.
    pub skipped: usize,
    pub last_synced_at: DateTime<Utc>,
}

/// Pulls a user's library from a provider and swaps it into the cache.
pub struct LibrarySyncEngine {
    tokens: Arc<TokenLifecycleManager>,
    registry: Arc<ProviderRegistry>,
    cache: Arc<LibraryCache>,
    snapshots: SnapshotRepository,
    retry: RetryPolicy,
}

impl LibrarySyncEngine {
    pub fn new(
        tokens: Arc<TokenLifecycleManager>,
        registry: Arc<ProviderRegistry>,
        cache: Arc<LibraryCache>,
        snapshots: SnapshotRepository,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            tokens,
            registry,
            cache,
            snapshots,
            retry,
        }
    }

    pub fn snapshots(&self) -> &SnapshotRepository {
        &self.snapshots
    }

    /// Fetch, normalize and publish a full snapshot. On any failure the cached
    /// snapshot is left as it was.
    #[tracing::instrument(skip(self))]
    pub async fn sync_library(
        &self,
        user_id: &str,
        provider: Provider,
    ) -> Result<SyncSummary, HubError> {
        let library = self.registry.library(provider)?;
        let access_token = self.tokens.get_valid_access_token(user_id, provider).await?;

        let (raw_albums, raw_playlists) = tokio::try_join!(
            self.fetch_all(library.as_ref(), &access_token, Collection::Albums),
            self.fetch_all(library.as_ref(), &access_token, Collection::Playlists),
        )
        .map_err(|error| HubError::Sync {
            provider,
            reason: error.to_string(),
        })?;

        let albums: Vec<_> = raw_albums
            .iter()
            .filter_map(|raw| library.normalize_album(raw))
            .collect();
        let playlists: Vec<_> = raw_playlists
            .iter()
            .filter_map(|raw| library.normalize_playlist(raw))
            .collect();
        let skipped = (raw_albums.len() - albums.len()) + (raw_playlists.len() - playlists.len());
        if skipped > 0 {
            tracing::warn!("Skipped {} malformed library entries", skipped);
        }

        let snapshot = LibrarySnapshot {
            user_id: user_id.to_string(),
            provider,
            albums,
            playlists,
            last_synced_at: Utc::now(),
        };
        let summary = SyncSummary {
            provider,
            albums: snapshot.albums.len(),
            playlists: snapshot.playlists.len(),
            skipped,
            last_synced_at: snapshot.last_synced_at,
        };

        // Publishing shares the pair lock with disconnect, so a library is
        // only stored while its credential exists.
        let lock = self.tokens.lock_for(user_id, provider).await;
        let _guard = lock.lock().await;
        if self.tokens.store().get(user_id, provider).await?.is_none() {
            tracing::info!("Disconnected while syncing, discarding the fetched library");
            return Err(HubError::NotLinked { provider });
        }

        // Nothing is published until the durable copy is written.
        if self.snapshots.save(&snapshot).await? {
            self.cache.put(snapshot);
        } else {
            tracing::debug!("A newer snapshot was stored concurrently, keeping it");
        }

        tracing::info!(
            "Synced {} albums and {} playlists",
            summary.albums,
            summary.playlists
        );
        Ok(summary)
    }

    async fn fetch_all(
        &self,
        library: &dyn LibraryClient,
        access_token: &str,
        collection: Collection,
    ) -> Result<Vec<Value>, FetchError> {
        let mut items = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_PAGES {
            let page = (move || {
                let cursor = cursor.clone();
                async move { library.fetch_page(access_token, collection, cursor).await }
            })
            .retry(self.retry.backoff())
            .when(FetchError::is_transient)
            .notify(|error: &FetchError, delay: Duration| {
                tracing::warn!(
                    "Fetching {} failed, retrying in {:?}: {}",
                    collection.as_str(),
                    delay,
                    error
                );
            })
            .await?;

            items.extend(page.items);
            match page.next {
                Some(next) => cursor = Some(next),
                None => return Ok(items),
            }
        }

        Err(FetchError::Malformed(format!(
            "{} pagination did not end after {} pages",
            collection.as_str(),
            MAX_PAGES
        )))
    }
}

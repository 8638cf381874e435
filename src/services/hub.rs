use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use url::Url;

use crate::config::Config;
use crate::database::Database;
use crate::error::HubError;
use crate::provider::Provider;
use crate::providers::ProviderRegistry;
use crate::services::credentials::CredentialStore;
use crate::services::library_cache::{CachedSnapshot, LibraryCache};
use crate::services::library_sync::{LibrarySyncEngine, RetryPolicy, SyncSummary};
use crate::services::snapshots::SnapshotRepository;
use crate::services::tokens::{LinkState, TokenLifecycleManager};

type LinkKey = (String, Provider);

/// Result of a cached library read.
pub struct LibraryRead {
    pub cached: Option<CachedSnapshot>,
    /// Set when the read kicked off a background sync. Failures are logged
    /// by the task and also handed back to whoever awaits it.
    pub refresh: Option<JoinHandle<Result<SyncSummary, HubError>>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    pub provider: Provider,
    pub configured: bool,
    pub state: LinkState,
    pub last_synced_at: Option<DateTime<Utc>>,
}

/// Entry point tying the token manager, sync engine and cache together.
pub struct LibraryHub {
    tokens: Arc<TokenLifecycleManager>,
    engine: Arc<LibrarySyncEngine>,
    cache: Arc<LibraryCache>,
    registry: Arc<ProviderRegistry>,
    in_flight: Arc<Mutex<HashSet<LinkKey>>>,
}

/// Clears the in-flight mark for a pair even if the sync task is cancelled.
struct InFlightGuard {
    in_flight: Arc<Mutex<HashSet<LinkKey>>>,
    key: LinkKey,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        in_flight.remove(&self.key);
    }
}

impl LibraryHub {
    pub fn new(db: Arc<Database>, registry: ProviderRegistry, config: &Config) -> Self {
        let registry = Arc::new(registry);
        let cache = Arc::new(LibraryCache::new());
        let tokens = Arc::new(TokenLifecycleManager::new(
            CredentialStore::new(db.clone()),
            registry.clone(),
            config.token_safety_margin(),
        ));
        let engine = Arc::new(LibrarySyncEngine::new(
            tokens.clone(),
            registry.clone(),
            cache.clone(),
            SnapshotRepository::new(db),
            RetryPolicy::from_config(&config.sync),
        ));

        Self {
            tokens,
            engine,
            cache,
            registry,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn tokens(&self) -> &TokenLifecycleManager {
        &self.tokens
    }

    pub fn cache(&self) -> &LibraryCache {
        &self.cache
    }

    /// Load stored snapshots into the cache. Returns how many were loaded.
    pub async fn hydrate(&self) -> Result<usize, HubError> {
        let snapshots = self.engine.snapshots().load_all().await?;
        let count = snapshots.len();
        for snapshot in snapshots {
            self.cache.put(snapshot);
        }
        tracing::debug!("Loaded {} library snapshots", count);
        Ok(count)
    }

    pub fn begin_authorization(&self, user_id: &str, provider: Provider) -> Result<Url, HubError> {
        self.tokens.begin_authorization(user_id, provider)
    }

    /// Finish the OAuth callback and run the first sync.
    ///
    /// The link is kept even when that first sync fails; `None` is returned
    /// and the library can be synced later.
    pub async fn complete_authorization(
        &self,
        provider: Provider,
        code: &str,
        state: &str,
    ) -> Result<Option<SyncSummary>, HubError> {
        let credential = self.tokens.exchange_code(provider, code, state).await?;

        match self.engine.sync_library(&credential.user_id, provider).await {
            Ok(summary) => Ok(Some(summary)),
            Err(error) => {
                tracing::warn!(
                    "Initial {} sync for {} failed: {}",
                    provider,
                    credential.user_id,
                    error
                );
                Ok(None)
            }
        }
    }

    pub async fn sync_library(
        &self,
        user_id: &str,
        provider: Provider,
    ) -> Result<SyncSummary, HubError> {
        self.engine.sync_library(user_id, provider).await
    }

    /// Cached library for the pair. A missing, invalidated or older-than-`window`
    /// snapshot starts a background sync; the cached data is returned anyway.
    pub async fn library(
        &self,
        user_id: &str,
        provider: Provider,
        window: Duration,
    ) -> Result<LibraryRead, HubError> {
        let cached = self.cache.get(user_id, provider);
        if cached
            .as_ref()
            .is_some_and(|cached| cached.is_fresh(window, Utc::now()))
        {
            return Ok(LibraryRead {
                cached,
                refresh: None,
            });
        }

        if !self.is_service_connected(user_id, provider).await? {
            // No credential behind this entry any more.
            if cached.is_some() {
                self.cache.remove(user_id, provider);
            }
            return Err(HubError::NotLinked { provider });
        }

        Ok(LibraryRead {
            cached,
            refresh: self.spawn_sync(user_id, provider),
        })
    }

    /// Start a background sync unless one is already running for the pair.
    fn spawn_sync(
        &self,
        user_id: &str,
        provider: Provider,
    ) -> Option<JoinHandle<Result<SyncSummary, HubError>>> {
        let key = (user_id.to_string(), provider);
        {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
            if !in_flight.insert(key.clone()) {
                tracing::debug!("{} sync for {} already running", provider, user_id);
                return None;
            }
        }

        let guard = InFlightGuard {
            in_flight: self.in_flight.clone(),
            key,
        };
        let engine = self.engine.clone();
        let user_id = user_id.to_string();
        Some(tokio::spawn(async move {
            let _guard = guard;
            let result = engine.sync_library(&user_id, provider).await;
            if let Err(error) = &result {
                tracing::warn!("Background {} sync for {} failed: {}", provider, user_id, error);
            }
            result
        }))
    }

    /// Remove the credential, its stored snapshot and the cached library.
    pub async fn disconnect(&self, user_id: &str, provider: Provider) -> Result<bool, HubError> {
        let removed = self.tokens.disconnect(user_id, provider).await?;
        self.engine.snapshots().delete(user_id, provider).await?;
        self.cache.remove(user_id, provider);
        Ok(removed)
    }

    pub async fn connected_services(&self, user_id: &str) -> Result<Vec<Provider>, HubError> {
        self.tokens.store().providers_for(user_id).await
    }

    pub async fn is_service_connected(
        &self,
        user_id: &str,
        provider: Provider,
    ) -> Result<bool, HubError> {
        Ok(self.tokens.store().get(user_id, provider).await?.is_some())
    }

    /// Link state and last sync time for every supported provider.
    pub async fn service_statuses(&self, user_id: &str) -> Result<Vec<ServiceStatus>, HubError> {
        let configured = self.registry.configured();
        let mut statuses = Vec::with_capacity(Provider::ALL.len());
        for provider in Provider::ALL {
            statuses.push(ServiceStatus {
                provider,
                configured: configured.contains(&provider),
                state: self.tokens.link_state(user_id, provider).await?,
                last_synced_at: self
                    .cache
                    .get(user_id, provider)
                    .map(|cached| cached.snapshot.last_synced_at),
            });
        }
        Ok(statuses)
    }

    pub fn invalidate(&self, user_id: &str, provider: Provider) {
        self.cache.invalidate(user_id, provider);
    }

    /// Sync every linked library whose snapshot is missing or stale.
    /// Returns how many syncs succeeded.
    pub async fn refresh_stale_libraries(&self, window: Duration) -> Result<usize, HubError> {
        let now = Utc::now();
        let mut refreshed = 0;

        for credential in self.tokens.store().all().await? {
            let (user_id, provider) = (credential.user_id, credential.provider);
            if self
                .cache
                .get(&user_id, provider)
                .is_some_and(|cached| cached.is_fresh(window, now))
            {
                continue;
            }

            match self.engine.sync_library(&user_id, provider).await {
                Ok(_) => refreshed += 1,
                Err(error) => {
                    tracing::warn!("Periodic {} sync for {} failed: {}", provider, user_id, error)
                }
            }
        }
        Ok(refreshed)
    }
}

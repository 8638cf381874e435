use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use url::Url;

use crate::error::{AuthExchangeError, HubError};
use crate::models::Credential;
use crate::provider::Provider;
use crate::providers::ProviderRegistry;
use crate::services::credentials::CredentialStore;

type LinkKey = (String, Provider);

/// Where a (user, provider) pair sits in its credential lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum LinkState {
    Unlinked,
    Valid,
    /// Still usable but inside the safety margin; the next use refreshes it.
    Expiring,
    Expired,
}

/// Owns every write to the credential store and hands out usable access tokens.
pub struct TokenLifecycleManager {
    store: CredentialStore,
    registry: Arc<ProviderRegistry>,
    safety_margin: Duration,
    refresh_locks: Mutex<HashMap<LinkKey, Arc<Mutex<()>>>>,
}

impl TokenLifecycleManager {
    pub fn new(
        store: CredentialStore,
        registry: Arc<ProviderRegistry>,
        safety_margin: Duration,
    ) -> Self {
        Self {
            store,
            registry,
            safety_margin,
            refresh_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    pub fn begin_authorization(&self, user_id: &str, provider: Provider) -> Result<Url, HubError> {
        Ok(self.registry.auth(provider)?.begin_authorization(user_id))
    }

    /// Trade an authorization code for a credential and store it.
    /// `state` is the user id that was bound into the authorization URL.
    #[tracing::instrument(skip(self, code))]
    pub async fn exchange_code(
        &self,
        provider: Provider,
        code: &str,
        state: &str,
    ) -> Result<Credential, HubError> {
        if state.trim().is_empty() {
            return Err(HubError::AuthExchange {
                provider,
                source: AuthExchangeError::MissingState,
            });
        }
        let adapter = self.registry.auth(provider)?;

        let credential = adapter
            .exchange_code(code, state)
            .await
            .map_err(|source| HubError::AuthExchange { provider, source })?;

        let lock = self.lock_for(state, provider).await;
        let _guard = lock.lock().await;
        self.store.upsert(&credential).await?;

        tracing::info!("Linked {} for user {}", provider, state);
        Ok(credential)
    }

    /// Access token that is valid for at least the safety margin, refreshing
    /// the stored credential first when needed.
    pub async fn get_valid_access_token(
        &self,
        user_id: &str,
        provider: Provider,
    ) -> Result<String, HubError> {
        let credential = self
            .store
            .get(user_id, provider)
            .await?
            .ok_or(HubError::NotLinked { provider })?;

        if !credential.needs_refresh(Utc::now(), self.safety_margin) {
            return Ok(credential.access_token);
        }

        let lock = self.lock_for(user_id, provider).await;
        let _guard = lock.lock().await;

        // Another caller may have refreshed while we waited for the lock.
        let credential = self
            .store
            .get(user_id, provider)
            .await?
            .ok_or(HubError::NotLinked { provider })?;
        if !credential.needs_refresh(Utc::now(), self.safety_margin) {
            return Ok(credential.access_token);
        }

        self.refresh(credential).await
    }

    #[tracing::instrument(skip_all, fields(user_id = %credential.user_id, provider = %credential.provider))]
    async fn refresh(&self, credential: Credential) -> Result<String, HubError> {
        let provider = credential.provider;
        if credential.refresh_token.is_none() {
            tracing::warn!("No refresh token on file, re-authorization required");
            return Err(HubError::ReauthorizationRequired { provider });
        }

        let adapter = self.registry.auth(provider)?;
        match adapter.refresh_token(&credential).await {
            Ok(refreshed) => {
                self.store.upsert(&refreshed).await?;
                tracing::info!("Refreshed access token");
                Ok(refreshed.access_token)
            }
            Err(error) => {
                // The stale credential stays on file until the user reconnects.
                tracing::warn!("Token refresh failed: {}", error);
                Err(HubError::ReauthorizationRequired { provider })
            }
        }
    }

    pub async fn link_state(&self, user_id: &str, provider: Provider) -> Result<LinkState, HubError> {
        let now = Utc::now();
        Ok(match self.store.get(user_id, provider).await? {
            None => LinkState::Unlinked,
            Some(credential) if credential.is_expired(now) => LinkState::Expired,
            Some(credential) if credential.needs_refresh(now, self.safety_margin) => {
                LinkState::Expiring
            }
            Some(_) => LinkState::Valid,
        })
    }

    /// Revoke remotely (best effort) and forget the credential.
    /// Returns whether a credential existed.
    pub async fn disconnect(&self, user_id: &str, provider: Provider) -> Result<bool, HubError> {
        let lock = self.lock_for(user_id, provider).await;
        let _guard = lock.lock().await;

        let removed = match self.store.get(user_id, provider).await? {
            Some(credential) => {
                match self.registry.auth(provider) {
                    Ok(adapter) => {
                        if let Err(error) = adapter.revoke(&credential).await {
                            tracing::warn!(
                                "Failed to revoke {} token for {}: {}",
                                provider,
                                user_id,
                                error
                            );
                        }
                    }
                    Err(error) => tracing::warn!("Skipping {} revocation: {}", provider, error),
                }
                let removed = self.store.delete(user_id, provider).await?;
                tracing::info!("Disconnected {} for user {}", provider, user_id);
                removed
            }
            None => false,
        };

        self.forget_lock(user_id, provider, &lock).await;
        Ok(removed)
    }

    /// Drop the pair's lock entry unless another task still holds a handle to it.
    async fn forget_lock(&self, user_id: &str, provider: Provider, lock: &Arc<Mutex<()>>) {
        let mut locks = self.refresh_locks.lock().await;
        // One reference in the map, one held by the caller.
        if Arc::strong_count(lock) == 2 {
            locks.remove(&(user_id.to_string(), provider));
        }
    }

    /// Per-pair lock serializing refreshes, links, disconnects and library
    /// publishes for the same (user, provider).
    pub(crate) async fn lock_for(&self, user_id: &str, provider: Provider) -> Arc<Mutex<()>> {
        let mut locks = self.refresh_locks.lock().await;
        locks
            .entry((user_id.to_string(), provider))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    #[cfg(test)]
    async fn tracked_locks(&self) -> usize {
        self.refresh_locks.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::error::AuthExchangeError;
    use crate::ports::library::MockLibraryClient;
    use crate::ports::provider_auth::MockProviderAuthAdapter;
    use crate::test_utils::{credential, test_db};

    async fn manager_with(auth: MockProviderAuthAdapter) -> TokenLifecycleManager {
        let mut registry = ProviderRegistry::new();
        registry.register(
            Provider::Spotify,
            Arc::new(auth),
            Arc::new(MockLibraryClient::new()),
        );
        TokenLifecycleManager::new(
            CredentialStore::new(test_db().await),
            Arc::new(registry),
            Duration::seconds(60),
        )
    }

    #[tokio::test]
    async fn test_unlinked_pair_is_not_linked() {
        let manager = manager_with(MockProviderAuthAdapter::new()).await;

        let err = manager
            .get_valid_access_token("user-1", Provider::Spotify)
            .await
            .unwrap_err();
        assert!(matches!(err, HubError::NotLinked { provider: Provider::Spotify }));
        assert_eq!(
            manager.link_state("user-1", Provider::Spotify).await.unwrap(),
            LinkState::Unlinked
        );
    }

    #[tokio::test]
    async fn test_valid_credential_is_returned_without_refresh() {
        let mut auth = MockProviderAuthAdapter::new();
        auth.expect_refresh_token().never();
        let manager = manager_with(auth).await;

        let cred = credential("user-1", Provider::Spotify, Some(Utc::now() + Duration::hours(1)));
        manager.store().upsert(&cred).await.unwrap();

        let token = manager
            .get_valid_access_token("user-1", Provider::Spotify)
            .await
            .unwrap();
        assert_eq!(token, "access-token");
        assert_eq!(
            manager.link_state("user-1", Provider::Spotify).await.unwrap(),
            LinkState::Valid
        );
    }

    #[tokio::test]
    async fn test_credential_without_expiry_is_always_valid() {
        let mut auth = MockProviderAuthAdapter::new();
        auth.expect_refresh_token().never();
        let manager = manager_with(auth).await;
        manager
            .store()
            .upsert(&credential("user-1", Provider::Spotify, None))
            .await
            .unwrap();

        assert_eq!(
            manager
                .get_valid_access_token("user-1", Provider::Spotify)
                .await
                .unwrap(),
            "access-token"
        );
    }

    #[tokio::test]
    async fn test_expired_credential_refreshes_once_under_concurrency() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let mut auth = MockProviderAuthAdapter::new();
        auth.expect_refresh_token().returning(move |old| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Credential {
                access_token: "fresh-token".to_string(),
                expires_at: Some(Utc::now() + Duration::hours(1)),
                ..old.clone()
            })
        });
        let manager = Arc::new(manager_with(auth).await);

        let expired = credential("user-1", Provider::Spotify, Some(Utc::now() - Duration::minutes(5)));
        manager.store().upsert(&expired).await.unwrap();
        assert_eq!(
            manager.link_state("user-1", Provider::Spotify).await.unwrap(),
            LinkState::Expired
        );

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let manager = manager.clone();
                tokio::spawn(async move {
                    manager
                        .get_valid_access_token("user-1", Provider::Spotify)
                        .await
                })
            })
            .collect();

        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap(), "fresh-token");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let stored = manager
            .store()
            .get("user-1", Provider::Spotify)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.access_token, "fresh-token");
        assert_eq!(stored.refresh_token.as_deref(), Some("refresh-token"));
    }

    #[tokio::test]
    async fn test_token_inside_margin_is_refreshed() {
        let mut auth = MockProviderAuthAdapter::new();
        auth.expect_refresh_token().times(1).returning(|old| {
            Ok(Credential {
                access_token: "fresh-token".to_string(),
                expires_at: Some(Utc::now() + Duration::hours(1)),
                ..old.clone()
            })
        });
        let manager = manager_with(auth).await;
        let expiring = credential("user-1", Provider::Spotify, Some(Utc::now() + Duration::seconds(20)));
        manager.store().upsert(&expiring).await.unwrap();

        assert_eq!(
            manager.link_state("user-1", Provider::Spotify).await.unwrap(),
            LinkState::Expiring
        );
        assert_eq!(
            manager
                .get_valid_access_token("user-1", Provider::Spotify)
                .await
                .unwrap(),
            "fresh-token"
        );
    }

    #[tokio::test]
    async fn test_failed_refresh_requires_reauthorization_and_keeps_credential() {
        let mut auth = MockProviderAuthAdapter::new();
        auth.expect_refresh_token().times(1).returning(|_| {
            Err(AuthExchangeError::Rejected {
                status: 400,
                reason: "invalid_grant".to_string(),
            })
        });
        let manager = manager_with(auth).await;
        let expired = credential("user-1", Provider::Spotify, Some(Utc::now() - Duration::minutes(1)));
        manager.store().upsert(&expired).await.unwrap();

        let err = manager
            .get_valid_access_token("user-1", Provider::Spotify)
            .await
            .unwrap_err();
        assert!(matches!(err, HubError::ReauthorizationRequired { .. }));

        let stored = manager
            .store()
            .get("user-1", Provider::Spotify)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.access_token, expired.access_token);
        assert_eq!(stored.refresh_token, expired.refresh_token);
        assert_eq!(
            manager.link_state("user-1", Provider::Spotify).await.unwrap(),
            LinkState::Expired
        );
    }

    #[tokio::test]
    async fn test_missing_refresh_token_skips_network() {
        let mut auth = MockProviderAuthAdapter::new();
        auth.expect_refresh_token().never();
        let manager = manager_with(auth).await;
        let mut expired = credential("user-1", Provider::Spotify, Some(Utc::now() - Duration::minutes(1)));
        expired.refresh_token = None;
        manager.store().upsert(&expired).await.unwrap();

        let err = manager
            .get_valid_access_token("user-1", Provider::Spotify)
            .await
            .unwrap_err();
        assert!(matches!(err, HubError::ReauthorizationRequired { .. }));
    }

    #[tokio::test]
    async fn test_bad_code_writes_nothing() {
        let mut auth = MockProviderAuthAdapter::new();
        auth.expect_exchange_code().times(1).returning(|_, _| {
            Err(AuthExchangeError::Rejected {
                status: 400,
                reason: "invalid_grant".to_string(),
            })
        });
        let manager = manager_with(auth).await;

        let err = manager
            .exchange_code(Provider::Spotify, "bad-code", "user-1")
            .await
            .unwrap_err();
        assert!(matches!(err, HubError::AuthExchange { .. }));
        assert!(manager.store().all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_exchange_code_stores_credential() {
        let mut auth = MockProviderAuthAdapter::new();
        auth.expect_exchange_code()
            .withf(|code, user_id| code == "good-code" && user_id == "user-1")
            .times(1)
            .returning(|_, user_id| Ok(credential(user_id, Provider::Spotify, None)));
        let manager = manager_with(auth).await;

        manager
            .exchange_code(Provider::Spotify, "good-code", "user-1")
            .await
            .unwrap();
        assert_eq!(
            manager.link_state("user-1", Provider::Spotify).await.unwrap(),
            LinkState::Valid
        );
    }

    #[tokio::test]
    async fn test_unconfigured_provider_fails_before_network() {
        let manager = manager_with(MockProviderAuthAdapter::new()).await;

        let err = manager
            .exchange_code(Provider::AppleMusic, "code", "user-1")
            .await
            .unwrap_err();
        assert!(matches!(err, HubError::Configuration(_)));
        assert!(matches!(
            manager.begin_authorization("user-1", Provider::AppleMusic),
            Err(HubError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_disconnect_swallows_revoke_failure() {
        let mut auth = MockProviderAuthAdapter::new();
        auth.expect_revoke().times(1).returning(|_| {
            Err(AuthExchangeError::FailedToParseResponse("boom".to_string()))
        });
        let manager = manager_with(auth).await;
        manager
            .store()
            .upsert(&credential("user-1", Provider::Spotify, None))
            .await
            .unwrap();

        assert!(manager.disconnect("user-1", Provider::Spotify).await.unwrap());
        assert!(!manager.disconnect("user-1", Provider::Spotify).await.unwrap());
        assert_eq!(
            manager.link_state("user-1", Provider::Spotify).await.unwrap(),
            LinkState::Unlinked
        );
    }

    #[tokio::test]
    async fn test_blank_state_is_rejected_as_auth_exchange() {
        let mut auth = MockProviderAuthAdapter::new();
        auth.expect_exchange_code().never();
        let manager = manager_with(auth).await;

        let err = manager
            .exchange_code(Provider::Spotify, "code", "  ")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            HubError::AuthExchange {
                source: AuthExchangeError::MissingState,
                ..
            }
        ));
        assert!(manager.store().all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_forgets_the_pair_lock() {
        let mut auth = MockProviderAuthAdapter::new();
        auth.expect_refresh_token().returning(|old| {
            Ok(Credential {
                expires_at: Some(Utc::now() + Duration::hours(1)),
                ..old.clone()
            })
        });
        auth.expect_revoke().returning(|_| Ok(()));
        let manager = manager_with(auth).await;
        let expired = credential("user-1", Provider::Spotify, Some(Utc::now() - Duration::minutes(1)));
        manager.store().upsert(&expired).await.unwrap();

        manager
            .get_valid_access_token("user-1", Provider::Spotify)
            .await
            .unwrap();
        assert_eq!(manager.tracked_locks().await, 1);

        assert!(manager.disconnect("user-1", Provider::Spotify).await.unwrap());
        assert_eq!(manager.tracked_locks().await, 0);

        assert!(!manager.disconnect("user-2", Provider::Spotify).await.unwrap());
        assert_eq!(manager.tracked_locks().await, 0);
    }

    #[tokio::test]
    async fn test_disconnect_keeps_a_lock_another_task_holds() {
        let manager = manager_with(MockProviderAuthAdapter::new()).await;
        let held = manager.lock_for("user-1", Provider::Spotify).await;

        assert!(!manager.disconnect("user-1", Provider::Spotify).await.unwrap());

        assert_eq!(manager.tracked_locks().await, 1);
        assert!(Arc::ptr_eq(
            &held,
            &manager.lock_for("user-1", Provider::Spotify).await
        ));
    }
}

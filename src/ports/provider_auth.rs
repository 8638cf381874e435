use url::Url;

use crate::error::AuthExchangeError;
use crate::models::Credential;

/// Provider-specific half of the OAuth authorization-code flow.
///
/// One implementation per provider lives in `providers`; the token lifecycle
/// manager only ever talks to this trait.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait ProviderAuthAdapter: Send + Sync {
    /// Authorization URL the user is sent to. `state` carries `user_id`.
    fn begin_authorization(&self, user_id: &str) -> Url;

    async fn exchange_code(
        &self,
        code: &str,
        user_id: &str,
    ) -> Result<Credential, AuthExchangeError>;

    /// Must keep the current refresh token when the provider does not rotate it.
    async fn refresh_token(&self, credential: &Credential)
    -> Result<Credential, AuthExchangeError>;

    /// Best-effort remote revocation.
    async fn revoke(&self, credential: &Credential) -> Result<(), AuthExchangeError>;
}

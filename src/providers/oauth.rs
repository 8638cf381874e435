use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::Utc;
use serde::Deserialize;
use url::Url;

use crate::config::ProviderCredentials;
use crate::error::AuthExchangeError;
use crate::models::Credential;
use crate::provider::Provider;

#[derive(Debug, Clone)]
pub struct OAuthEndpoints {
    pub authorize: Url,
    pub token: Url,
    pub revoke: Option<Url>,
}

/// Token endpoint response. Only `access_token` is mandatory.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
}

/// Authorization-code flow against a standard OAuth 2 token endpoint.
///
/// Shared by the provider adapters, which only differ in endpoints, scopes and
/// a few extra authorize parameters.
#[derive(Debug, Clone)]
pub struct OAuthClient {
    provider: Provider,
    http: reqwest::Client,
    credentials: ProviderCredentials,
    endpoints: OAuthEndpoints,
}

impl OAuthClient {
    pub fn new(
        provider: Provider,
        http: reqwest::Client,
        credentials: ProviderCredentials,
        endpoints: OAuthEndpoints,
    ) -> Self {
        Self {
            provider,
            http,
            credentials,
            endpoints,
        }
    }

    /// Build the authorization URL. `state` is the user id so the callback can
    /// be matched to the user that started the flow.
    pub fn authorization_url(&self, user_id: &str, scopes: &[&str], extra: &[(&str, &str)]) -> Url {
        let mut url = self.endpoints.authorize.clone();
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("client_id", &self.credentials.client_id)
                .append_pair("response_type", "code")
                .append_pair("redirect_uri", self.credentials.redirect_uri.as_str())
                .append_pair("scope", &scopes.join(" "))
                .append_pair("state", user_id);
            for (key, value) in extra {
                query.append_pair(key, value);
            }
        }
        url
    }

    fn basic_authorization(&self) -> String {
        format!(
            "Basic {}",
            STANDARD.encode(format!(
                "{}:{}",
                self.credentials.client_id, self.credentials.client_secret
            ))
        )
    }

    async fn post_token(&self, params: &[(&str, &str)]) -> Result<TokenResponse, AuthExchangeError> {
        let response = self
            .http
            .post(self.endpoints.token.clone())
            // Serializes to x-www-form-urlencoded and sets the content type
            .form(params)
            .header(reqwest::header::AUTHORIZATION, self.basic_authorization())
            .send()
            .await
            .map_err(AuthExchangeError::FailedToSendRequest)?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthExchangeError::Rejected {
                status: status.as_u16(),
                reason: response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Failed to get error text".to_string()),
            });
        }

        response
            .json::<TokenResponse>()
            .await
            .map_err(|error| AuthExchangeError::FailedToParseResponse(error.to_string()))
    }

    fn into_credential(
        &self,
        user_id: &str,
        token: TokenResponse,
        previous_refresh_token: Option<String>,
    ) -> Result<Credential, AuthExchangeError> {
        let access_token = token
            .access_token
            .filter(|token| !token.is_empty())
            .ok_or_else(|| {
                AuthExchangeError::FailedToParseResponse("missing access_token".to_string())
            })?;

        Ok(Credential {
            user_id: user_id.to_string(),
            provider: self.provider,
            access_token,
            // Providers are not required to rotate the refresh token.
            refresh_token: token.refresh_token.or(previous_refresh_token),
            expires_at: token
                .expires_in
                .map(|seconds| Utc::now() + chrono::Duration::seconds(seconds)),
        })
    }

    /// Exchange authorization code for access token
    #[tracing::instrument(skip(self, code), fields(provider = %self.provider))]
    pub async fn exchange_code(
        &self,
        code: &str,
        user_id: &str,
    ) -> Result<Credential, AuthExchangeError> {
        let token = self
            .post_token(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", self.credentials.redirect_uri.as_str()),
            ])
            .await?;
        tracing::info!("Received {} tokens", self.provider);
        self.into_credential(user_id, token, None)
    }

    /// Refresh an access token using the credential's refresh token
    #[tracing::instrument(skip(self, credential), fields(provider = %self.provider, user_id = %credential.user_id))]
    pub async fn refresh(&self, credential: &Credential) -> Result<Credential, AuthExchangeError> {
        let refresh_token = credential
            .refresh_token
            .as_deref()
            .ok_or(AuthExchangeError::MissingRefreshToken)?;

        let token = self
            .post_token(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ])
            .await?;
        tracing::info!("Received new {} tokens", self.provider);
        self.into_credential(&credential.user_id, token, credential.refresh_token.clone())
    }

    /// Revoke the credential's refresh token (or access token when there is
    /// none). A provider without a revocation endpoint is a no-op.
    pub async fn revoke(&self, credential: &Credential) -> Result<(), AuthExchangeError> {
        let Some(revoke_url) = self.endpoints.revoke.clone() else {
            tracing::debug!("{} has no revocation endpoint", self.provider);
            return Ok(());
        };

        let (token, hint) = match credential.refresh_token.as_deref() {
            Some(refresh_token) => (refresh_token, "refresh_token"),
            None => (credential.access_token.as_str(), "access_token"),
        };

        let response = self
            .http
            .post(revoke_url)
            .form(&[
                ("token", token),
                ("token_type_hint", hint),
                ("client_id", self.credentials.client_id.as_str()),
                ("client_secret", self.credentials.client_secret.as_str()),
            ])
            .header(reqwest::header::AUTHORIZATION, self.basic_authorization())
            .send()
            .await
            .map_err(AuthExchangeError::FailedToSendRequest)?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthExchangeError::Rejected {
                status: status.as_u16(),
                reason: response.text().await.unwrap_or_default(),
            });
        }
        Ok(())
    }
}

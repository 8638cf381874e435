use std::time::Duration;

use crate::provider::Provider;

/// Errors surfaced by the integration core to its callers.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Authorization with {provider} failed, try connecting again: {source}")]
    AuthExchange {
        provider: Provider,
        #[source]
        source: AuthExchangeError,
    },
    #[error("{} is not connected, please connect this service", .provider.display_name())]
    NotLinked { provider: Provider },
    #[error("{} connection expired, please reconnect", .provider.display_name())]
    ReauthorizationRequired { provider: Provider },
    #[error("Refreshing the {provider} library failed: {reason}")]
    Sync { provider: Provider, reason: String },
    #[error("Storage error: {0}")]
    Storage(#[from] sea_orm::DbErr),
}

/// Failure of an authorization-code or refresh-token exchange.
#[derive(Debug, thiserror::Error)]
pub enum AuthExchangeError {
    #[error("Provider rejected the exchange ({status}): {reason}")]
    Rejected { status: u16, reason: String },
    #[error("Failed to send http request: {0}")]
    FailedToSendRequest(#[source] reqwest::Error),
    #[error("Failed to parse response: {0}")]
    FailedToParseResponse(String),
    #[error("No refresh token on file")]
    MissingRefreshToken,
    #[error("Authorization callback is missing its state")]
    MissingState,
}

/// Failure while fetching one page of a provider library.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Transient network failure: {0}")]
    Transient(String),
    #[error("Rate limited by provider")]
    RateLimited { retry_after: Option<Duration> },
    #[error("Provider returned {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("Malformed response: {0}")]
    Malformed(String),
}

impl FetchError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Transient(_) | FetchError::RateLimited { .. } => true,
            FetchError::Rejected { status, .. } => *status >= 500,
            FetchError::Malformed(_) => false,
        }
    }

    pub fn from_reqwest(error: reqwest::Error) -> Self {
        if error.is_decode() {
            FetchError::Malformed(error.to_string())
        } else if let Some(status) = error.status() {
            FetchError::Rejected {
                status: status.as_u16(),
                body: error.to_string(),
            }
        } else {
            // Timeouts, connection resets and refused connections.
            FetchError::Transient(error.to_string())
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing {setting} for {provider} (set it in the config file or via {env_var})")]
    MissingSetting {
        provider: Provider,
        setting: &'static str,
        env_var: String,
    },
    #[error("Invalid redirect URI for {provider}: {reason}")]
    InvalidRedirectUri { provider: Provider, reason: String },
    #[error("Invalid {setting} for {provider}: {reason}")]
    InvalidEndpoint {
        provider: Provider,
        setting: &'static str,
        reason: String,
    },
}

impl From<ConfigError> for HubError {
    fn from(error: ConfigError) -> Self {
        HubError::Configuration(error.to_string())
    }
}

pub mod apple_music;
pub mod http;
pub mod oauth;
pub mod shape;
pub mod spotify;

use std::collections::HashMap;
use std::sync::Arc;

use color_eyre::eyre::{Result, WrapErr};
use url::Url;

use crate::config::Config;
use crate::error::{ConfigError, HubError};
use crate::ports::library::LibraryClient;
use crate::ports::provider_auth::ProviderAuthAdapter;
use crate::provider::Provider;

/// Parse an endpoint override, falling back to the provider's default.
pub(crate) fn endpoint(
    provider: Provider,
    setting: &'static str,
    configured: Option<&str>,
    default: &str,
) -> Result<Url, ConfigError> {
    Url::parse(configured.unwrap_or(default)).map_err(|e| ConfigError::InvalidEndpoint {
        provider,
        setting,
        reason: e.to_string(),
    })
}

#[derive(Clone)]
struct ProviderAdapters {
    auth: Arc<dyn ProviderAuthAdapter>,
    library: Arc<dyn LibraryClient>,
}

/// Adapters for every configured provider, looked up by provider id.
///
/// Providers whose settings are incomplete are kept with the reason so that
/// using them fails with a configuration error before any network call.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    adapters: HashMap<Provider, ProviderAdapters>,
    unavailable: HashMap<Provider, String>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.sync.request_timeout())
            .build()
            .wrap_err("Failed to build http client")?;

        let mut registry = Self::new();
        for provider in Provider::ALL {
            let adapters = config
                .provider_credentials(provider)
                .and_then(|credentials| match provider {
                    Provider::Spotify => spotify::adapters(http.clone(), credentials)
                        .map(|(auth, library)| register_pair(auth, library)),
                    Provider::AppleMusic => apple_music::adapters(http.clone(), credentials)
                        .map(|(auth, library)| register_pair(auth, library)),
                });

            match adapters {
                Ok(adapters) => {
                    tracing::debug!("Registered {} adapters", provider);
                    registry.adapters.insert(provider, adapters);
                }
                Err(error) => {
                    tracing::warn!("{} is unavailable: {}", provider.display_name(), error);
                    registry.unavailable.insert(provider, error.to_string());
                }
            }
        }
        Ok(registry)
    }

    pub fn register(
        &mut self,
        provider: Provider,
        auth: Arc<dyn ProviderAuthAdapter>,
        library: Arc<dyn LibraryClient>,
    ) {
        self.unavailable.remove(&provider);
        self.adapters
            .insert(provider, ProviderAdapters { auth, library });
    }

    fn lookup(&self, provider: Provider) -> Result<&ProviderAdapters, HubError> {
        self.adapters.get(&provider).ok_or_else(|| {
            HubError::Configuration(
                self.unavailable
                    .get(&provider)
                    .cloned()
                    .unwrap_or_else(|| format!("{} is not configured", provider.display_name())),
            )
        })
    }

    pub fn auth(&self, provider: Provider) -> Result<Arc<dyn ProviderAuthAdapter>, HubError> {
        self.lookup(provider).map(|adapters| adapters.auth.clone())
    }

    pub fn library(&self, provider: Provider) -> Result<Arc<dyn LibraryClient>, HubError> {
        self.lookup(provider).map(|adapters| adapters.library.clone())
    }

    pub fn configured(&self) -> Vec<Provider> {
        let mut providers: Vec<Provider> = self.adapters.keys().copied().collect();
        providers.sort();
        providers
    }
}

fn register_pair<A, L>(auth: A, library: L) -> ProviderAdapters
where
    A: ProviderAuthAdapter + 'static,
    L: LibraryClient + 'static,
{
    ProviderAdapters {
        auth: Arc::new(auth),
        library: Arc::new(library),
    }
}

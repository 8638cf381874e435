use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use color_eyre::Result;
use color_eyre::eyre::{Context, OptionExt};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ConfigError;
use crate::provider::Provider;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: String,
    /// Seconds before `expires_at` at which a token is treated as expired.
    pub token_safety_margin_secs: u64,
    /// Age after which a cached library is refreshed in the background.
    pub staleness_window_secs: u64,
    /// How often `serve` looks for stale libraries. Zero disables the loop.
    pub periodic_refresh_secs: u64,
    pub sync: SyncConfig,
    pub providers: BTreeMap<Provider, ProviderConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub max_attempts: usize,
    pub initial_backoff_ms: u64,
    pub request_timeout_secs: u64,
}

/// Per-provider settings as written in the config file. Every field may be
/// left out and supplied through the environment instead.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub redirect_uri: Option<String>,
    pub auth_url: Option<String>,
    pub token_url: Option<String>,
    pub revoke_url: Option<String>,
    pub api_base_url: Option<String>,
    /// Apple Music only: the developer token sent alongside the user token.
    pub developer_token: Option<String>,
}

/// Fully resolved settings needed to talk to a provider.
#[derive(Debug, Clone)]
pub struct ProviderCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: Url,
    pub overrides: ProviderConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: "~/.local/share/music-library-hub/library.db".to_string(),
            token_safety_margin_secs: 60,
            staleness_window_secs: 300,
            periodic_refresh_secs: 0,
            sync: SyncConfig::default(),
            providers: BTreeMap::new(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 500,
            request_timeout_secs: 10,
        }
    }
}

impl SyncConfig {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Config {
    /// Load config from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .wrap_err(format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&contents)
            .wrap_err(format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|path| path.join("music-library-hub").join("config.toml"))
    }

    /// Load the default config file, falling back to built-in defaults when it
    /// does not exist.
    pub fn load() -> Result<Self> {
        match Self::config_path() {
            Some(path) if path.exists() => Self::from_file(&path),
            _ => {
                tracing::debug!("No config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Write the default config to the default location unless a file is already there.
    pub fn create_default() -> Result<PathBuf> {
        let path = Self::config_path().ok_or_eyre("No config directory on this platform")?;
        if path.exists() {
            return Ok(path);
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).wrap_err(format!(
                "Failed to create config directory: {}",
                parent.display()
            ))?;
        }
        let contents =
            toml::to_string_pretty(&Self::default()).wrap_err("Failed to serialize config")?;
        std::fs::write(&path, contents)
            .wrap_err(format!("Failed to write config file: {}", path.display()))?;
        Ok(path)
    }

    /// Expand ~ to home directory
    fn expand_path(path: &str) -> PathBuf {
        if let Some(rest) = path.strip_prefix("~/") {
            if let Some(home) = dirs::home_dir() {
                return home.join(rest);
            }
        }
        PathBuf::from(path)
    }

    pub fn database_path(&self) -> PathBuf {
        Self::expand_path(&self.database)
    }

    pub fn set_database(&mut self, path: &Path) {
        self.database = path.display().to_string();
    }

    pub fn token_safety_margin(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.token_safety_margin_secs as i64)
    }

    pub fn staleness_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.staleness_window_secs as i64)
    }

    /// Resolve a provider's settings from the config file with the process
    /// environment as fallback.
    pub fn provider_credentials(
        &self,
        provider: Provider,
    ) -> Result<ProviderCredentials, ConfigError> {
        self.provider_credentials_with(provider, |key| std::env::var(key).ok())
    }

    pub fn provider_credentials_with<F>(
        &self,
        provider: Provider,
        lookup: F,
    ) -> Result<ProviderCredentials, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let file = self.providers.get(&provider).cloned().unwrap_or_default();

        let resolve = |value: Option<String>, setting: &'static str| {
            let env_var = format!("{}_{}", provider.env_prefix(), setting.to_uppercase());
            value
                .or_else(|| lookup(&env_var))
                .filter(|value| !value.trim().is_empty())
                .ok_or(ConfigError::MissingSetting {
                    provider,
                    setting,
                    env_var,
                })
        };

        let client_id = resolve(file.client_id.clone(), "client_id")?;
        let client_secret = resolve(file.client_secret.clone(), "client_secret")?;
        let redirect_uri = resolve(file.redirect_uri.clone(), "redirect_uri")?;
        let redirect_uri =
            Url::parse(&redirect_uri).map_err(|e| ConfigError::InvalidRedirectUri {
                provider,
                reason: e.to_string(),
            })?;

        let mut overrides = file;
        if overrides.developer_token.is_none() {
            overrides.developer_token =
                lookup(&format!("{}_DEVELOPER_TOKEN", provider.env_prefix()));
        }

        Ok(ProviderCredentials {
            client_id,
            client_secret,
            redirect_uri,
            overrides,
        })
    }
}

use std::fmt;
use std::str::FromStr;

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// A streaming service a user can link.
///
/// The set is closed: supporting a new service means adding a variant here and
/// registering adapters for it in `providers::ProviderRegistry`.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    clap::ValueEnum,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
#[serde(rename_all = "kebab-case")]
pub enum Provider {
    #[sea_orm(string_value = "spotify")]
    Spotify,
    #[sea_orm(string_value = "apple-music")]
    AppleMusic,
}

impl Provider {
    pub const ALL: [Provider; 2] = [Provider::Spotify, Provider::AppleMusic];

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Spotify => "spotify",
            Provider::AppleMusic => "apple-music",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Provider::Spotify => "Spotify",
            Provider::AppleMusic => "Apple Music",
        }
    }

    /// Prefix used for the environment variables holding this provider's settings.
    pub fn env_prefix(&self) -> &'static str {
        match self {
            Provider::Spotify => "SPOTIFY",
            Provider::AppleMusic => "APPLE_MUSIC",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Unknown provider: {0}")]
pub struct UnknownProvider(String);

impl FromStr for Provider {
    type Err = UnknownProvider;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "spotify" => Ok(Provider::Spotify),
            "apple-music" => Ok(Provider::AppleMusic),
            other => Err(UnknownProvider(other.to_string())),
        }
    }
}

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::provider::Provider;

/// OAuth token material for one (user, provider) pair.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub user_id: String,
    pub provider: Provider,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Credential {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }

    /// True when the access token is expired or will expire within `margin`.
    pub fn needs_refresh(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        self.expires_at
            .is_some_and(|expires_at| expires_at <= now + margin)
    }
}

// Tokens never end up in logs.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("user_id", &self.user_id)
            .field("provider", &self.provider)
            .field("access_token", &"<redacted>")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "<redacted>"),
            )
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedAlbum {
    pub id: String,
    pub name: String,
    pub artist_name: String,
    pub track_count: u32,
    pub artwork_url: Option<String>,
    pub added_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedPlaylist {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub track_count: u32,
    pub owner_name: String,
}

/// Full normalized library of one user on one provider at a point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LibrarySnapshot {
    pub user_id: String,
    pub provider: Provider,
    pub albums: Vec<NormalizedAlbum>,
    pub playlists: Vec<NormalizedPlaylist>,
    pub last_synced_at: DateTime<Utc>,
}

impl LibrarySnapshot {
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.last_synced_at
    }
}

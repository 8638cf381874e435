use std::sync::Arc;

use axum::Router;
use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use tokio::sync::Notify;

use crate::database::Database;
use crate::error::FetchError;
use crate::models::{Credential, LibrarySnapshot, NormalizedAlbum, NormalizedPlaylist};
use crate::ports::library::{Collection, LibraryClient, LibraryPage};
use crate::provider::Provider;
use crate::providers::spotify;

pub async fn test_db() -> Arc<Database> {
    Arc::new(Database::in_memory().await.unwrap())
}

/// Serve `router` on an ephemeral local port and return its base URL.
/// Stands in for a provider's token or library endpoints.
pub async fn spawn_fake_provider(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

pub fn credential(
    user_id: &str,
    provider: Provider,
    expires_at: Option<DateTime<Utc>>,
) -> Credential {
    Credential {
        user_id: user_id.to_string(),
        provider,
        access_token: "access-token".to_string(),
        refresh_token: Some("refresh-token".to_string()),
        expires_at,
    }
}

pub fn album(id: &str, name: &str, artist: &str) -> NormalizedAlbum {
    NormalizedAlbum {
        id: id.to_string(),
        name: name.to_string(),
        artist_name: artist.to_string(),
        track_count: 10,
        artwork_url: None,
        added_at: None,
    }
}

pub fn playlist(id: &str, name: &str) -> NormalizedPlaylist {
    NormalizedPlaylist {
        id: id.to_string(),
        name: name.to_string(),
        description: None,
        track_count: 3,
        owner_name: "owner".to_string(),
    }
}

pub fn snapshot(
    user_id: &str,
    provider: Provider,
    last_synced_at: DateTime<Utc>,
) -> LibrarySnapshot {
    LibrarySnapshot {
        user_id: user_id.to_string(),
        provider,
        albums: vec![album("a1", "Blue", "Joni Mitchell")],
        playlists: vec![playlist("p1", "Road trip")],
        last_synced_at,
    }
}

/// Spotify-shaped library whose albums fetch parks until `release` is notified.
/// `entered` is notified once the fetch is parked.
#[derive(Default)]
pub struct GatedLibrary {
    pub entered: Arc<Notify>,
    pub release: Arc<Notify>,
}

#[async_trait::async_trait]
impl LibraryClient for GatedLibrary {
    async fn fetch_page(
        &self,
        _access_token: &str,
        collection: Collection,
        _cursor: Option<String>,
    ) -> Result<LibraryPage, FetchError> {
        match collection {
            Collection::Albums => {
                self.entered.notify_one();
                self.release.notified().await;
                Ok(LibraryPage {
                    items: vec![json!({
                        "album": {
                            "id": "gated",
                            "name": "Mezzanine",
                            "artists": [{"name": "Massive Attack"}],
                            "total_tracks": 11
                        }
                    })],
                    next: None,
                })
            }
            Collection::Playlists => Ok(LibraryPage::default()),
        }
    }

    fn normalize_album(&self, raw: &Value) -> Option<NormalizedAlbum> {
        spotify::normalize_album(raw)
    }

    fn normalize_playlist(&self, raw: &Value) -> Option<NormalizedPlaylist> {
        spotify::normalize_playlist(raw)
    }
}

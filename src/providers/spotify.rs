use serde_json::Value;
use url::Url;

use crate::config::ProviderCredentials;
use crate::error::{AuthExchangeError, ConfigError, FetchError};
use crate::models::{Credential, NormalizedAlbum, NormalizedPlaylist};
use crate::ports::library::{Collection, LibraryClient, LibraryPage};
use crate::ports::provider_auth::ProviderAuthAdapter;
use crate::provider::Provider;
use crate::providers::http::get_json;
use crate::providers::oauth::{OAuthClient, OAuthEndpoints};
use crate::providers::shape::{count_at, page_from_body, string_at, timestamp_at};
use crate::providers::endpoint;

const SPOTIFY_AUTH_URL: &str = "https://accounts.spotify.com/authorize";
const SPOTIFY_TOKEN_URL: &str = "https://accounts.spotify.com/api/token";
const SPOTIFY_API_URL: &str = "https://api.spotify.com/v1";

pub const SPOTIFY_SCOPES: [&str; 5] = [
    "user-library-read",
    "user-library-modify",
    "playlist-read-private",
    "playlist-modify-public",
    "playlist-modify-private",
];

pub struct SpotifyAuthAdapter {
    oauth: OAuthClient,
}

pub struct SpotifyLibraryClient {
    http: reqwest::Client,
    api_base: String,
}

/// Build both Spotify adapters, honoring endpoint overrides from the config.
pub fn adapters(
    http: reqwest::Client,
    credentials: ProviderCredentials,
) -> Result<(SpotifyAuthAdapter, SpotifyLibraryClient), ConfigError> {
    let overrides = credentials.overrides.clone();
    let provider = Provider::Spotify;

    let endpoints = OAuthEndpoints {
        authorize: endpoint(provider, "auth_url", overrides.auth_url.as_deref(), SPOTIFY_AUTH_URL)?,
        token: endpoint(provider, "token_url", overrides.token_url.as_deref(), SPOTIFY_TOKEN_URL)?,
        // Spotify has no token revocation endpoint.
        revoke: overrides
            .revoke_url
            .as_deref()
            .map(|url| endpoint(provider, "revoke_url", Some(url), url))
            .transpose()?,
    };
    let api_base = endpoint(
        provider,
        "api_base_url",
        overrides.api_base_url.as_deref(),
        SPOTIFY_API_URL,
    )?;

    Ok((
        SpotifyAuthAdapter {
            oauth: OAuthClient::new(provider, http.clone(), credentials, endpoints),
        },
        SpotifyLibraryClient {
            http,
            api_base: api_base.as_str().trim_end_matches('/').to_string(),
        },
    ))
}

#[async_trait::async_trait]
impl ProviderAuthAdapter for SpotifyAuthAdapter {
    fn begin_authorization(&self, user_id: &str) -> Url {
        // Always show the consent dialog so users can switch accounts.
        self.oauth
            .authorization_url(user_id, &SPOTIFY_SCOPES, &[("show_dialog", "true")])
    }

    async fn exchange_code(
        &self,
        code: &str,
        user_id: &str,
    ) -> Result<Credential, AuthExchangeError> {
        self.oauth.exchange_code(code, user_id).await
    }

    async fn refresh_token(
        &self,
        credential: &Credential,
    ) -> Result<Credential, AuthExchangeError> {
        self.oauth.refresh(credential).await
    }

    async fn revoke(&self, credential: &Credential) -> Result<(), AuthExchangeError> {
        self.oauth.revoke(credential).await
    }
}

impl SpotifyLibraryClient {
    fn first_page_url(&self, collection: Collection) -> String {
        match collection {
            Collection::Albums => format!("{}/me/albums?limit=50", self.api_base),
            Collection::Playlists => format!("{}/me/playlists?limit=50", self.api_base),
        }
    }
}

#[async_trait::async_trait]
impl LibraryClient for SpotifyLibraryClient {
    async fn fetch_page(
        &self,
        access_token: &str,
        collection: Collection,
        cursor: Option<String>,
    ) -> Result<LibraryPage, FetchError> {
        let url = match cursor {
            // `next` is an absolute URL; never send the token anywhere else.
            Some(next) if next.starts_with(&format!("{}/", self.api_base)) => next,
            Some(next) => {
                return Err(FetchError::Malformed(format!(
                    "next page outside the Spotify API: {next}"
                )));
            }
            None => self.first_page_url(collection),
        };

        let body = get_json(self.http.get(&url).bearer_auth(access_token)).await?;
        page_from_body(&body, collection.as_str())
    }

    fn normalize_album(&self, raw: &Value) -> Option<NormalizedAlbum> {
        normalize_album(raw)
    }

    fn normalize_playlist(&self, raw: &Value) -> Option<NormalizedPlaylist> {
        normalize_playlist(raw)
    }
}

/// Map a saved-album entry (`{added_at, album}`) or a bare album object.
pub fn normalize_album(raw: &Value) -> Option<NormalizedAlbum> {
    let album = raw.get("album").filter(|album| album.is_object()).unwrap_or(raw);

    let artists: Vec<String> = album
        .get("artists")?
        .as_array()?
        .iter()
        .filter_map(|artist| string_at(artist, "/name"))
        .collect();
    if artists.is_empty() {
        return None;
    }

    Some(NormalizedAlbum {
        id: string_at(album, "/id")?,
        name: string_at(album, "/name")?,
        artist_name: artists.join(", "),
        track_count: count_at(album, "/total_tracks").or_else(|| count_at(album, "/tracks/total"))?,
        // Spotify lists images widest first.
        artwork_url: string_at(album, "/images/0/url"),
        added_at: timestamp_at(raw, "/added_at"),
    })
}

pub fn normalize_playlist(raw: &Value) -> Option<NormalizedPlaylist> {
    Some(NormalizedPlaylist {
        id: string_at(raw, "/id")?,
        name: string_at(raw, "/name")?,
        description: string_at(raw, "/description"),
        track_count: count_at(raw, "/tracks/total")
            .or_else(|| count_at(raw, "/items/total"))
            .unwrap_or(0),
        owner_name: string_at(raw, "/owner/display_name")
            .or_else(|| string_at(raw, "/owner/id"))?,
    })
}

use serde_json::Value;
use url::Url;

use crate::config::ProviderCredentials;
use crate::error::{AuthExchangeError, ConfigError, FetchError};
use crate::models::{Credential, NormalizedAlbum, NormalizedPlaylist};
use crate::ports::library::{Collection, LibraryClient, LibraryPage};
use crate::ports::provider_auth::ProviderAuthAdapter;
use crate::provider::Provider;
use crate::providers::endpoint;
use crate::providers::http::get_json;
use crate::providers::oauth::{OAuthClient, OAuthEndpoints};
use crate::providers::shape::{count_at, page_from_body, string_at, timestamp_at};

const APPLE_AUTH_URL: &str = "https://appleid.apple.com/auth/authorize";
const APPLE_TOKEN_URL: &str = "https://appleid.apple.com/auth/token";
const APPLE_REVOKE_URL: &str = "https://appleid.apple.com/auth/revoke";
const APPLE_MUSIC_API_URL: &str = "https://api.music.apple.com";

const ARTWORK_SIZE: &str = "600";

pub struct AppleMusicAuthAdapter {
    oauth: OAuthClient,
}

pub struct AppleMusicLibraryClient {
    http: reqwest::Client,
    api_base: Url,
    developer_token: Option<String>,
}

pub fn adapters(
    http: reqwest::Client,
    credentials: ProviderCredentials,
) -> Result<(AppleMusicAuthAdapter, AppleMusicLibraryClient), ConfigError> {
    let overrides = credentials.overrides.clone();
    let provider = Provider::AppleMusic;

    let endpoints = OAuthEndpoints {
        authorize: endpoint(provider, "auth_url", overrides.auth_url.as_deref(), APPLE_AUTH_URL)?,
        token: endpoint(provider, "token_url", overrides.token_url.as_deref(), APPLE_TOKEN_URL)?,
        revoke: Some(endpoint(
            provider,
            "revoke_url",
            overrides.revoke_url.as_deref(),
            APPLE_REVOKE_URL,
        )?),
    };
    let api_base = endpoint(
        provider,
        "api_base_url",
        overrides.api_base_url.as_deref(),
        APPLE_MUSIC_API_URL,
    )?;

    Ok((
        AppleMusicAuthAdapter {
            oauth: OAuthClient::new(provider, http.clone(), credentials, endpoints),
        },
        AppleMusicLibraryClient {
            http,
            api_base,
            developer_token: overrides.developer_token,
        },
    ))
}

#[async_trait::async_trait]
impl ProviderAuthAdapter for AppleMusicAuthAdapter {
    fn begin_authorization(&self, user_id: &str) -> Url {
        self.oauth
            .authorization_url(user_id, &[], &[("response_mode", "query")])
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

impl AppleMusicLibraryClient {
    fn page_url(&self, collection: Collection, cursor: Option<&str>) -> Result<Url, FetchError> {
        let path = match cursor {
            // Apple returns `next` as a path relative to the API host.
            Some(next) if next.starts_with('/') && !next.starts_with("//") => next.to_string(),
            Some(next) => {
                return Err(FetchError::Malformed(format!(
                    "unexpected next page reference: {next}"
                )));
            }
            None => format!("/v1/me/library/{}?limit=100", collection.as_str()),
        };
        self.api_base
            .join(&path)
            .map_err(|e| FetchError::Malformed(format!("invalid next page {path}: {e}")))
    }
}

#[async_trait::async_trait]
impl LibraryClient for AppleMusicLibraryClient {
    async fn fetch_page(
        &self,
        access_token: &str,
        collection: Collection,
        cursor: Option<String>,
    ) -> Result<LibraryPage, FetchError> {
        let url = self.page_url(collection, cursor.as_deref())?;

        let request = match &self.developer_token {
            Some(developer_token) => self
                .http
                .get(url)
                .bearer_auth(developer_token)
                .header("Music-User-Token", access_token),
            None => self.http.get(url).bearer_auth(access_token),
        };

        let body = get_json(request).await?;
        page_from_body(&body, collection.as_str())
    }

    fn normalize_album(&self, raw: &Value) -> Option<NormalizedAlbum> {
        normalize_album(raw)
    }

    fn normalize_playlist(&self, raw: &Value) -> Option<NormalizedPlaylist> {
        normalize_playlist(raw)
    }
}

/// Artwork URLs are templates with `{w}` and `{h}` placeholders.
fn artwork_url(resource: &Value) -> Option<String> {
    string_at(resource, "/attributes/artwork/url").map(|template| {
        template
            .replace("{w}", ARTWORK_SIZE)
            .replace("{h}", ARTWORK_SIZE)
    })
}

pub fn normalize_album(raw: &Value) -> Option<NormalizedAlbum> {
    Some(NormalizedAlbum {
        id: string_at(raw, "/id")?,
        name: string_at(raw, "/attributes/name")?,
        artist_name: string_at(raw, "/attributes/artistName")?,
        track_count: count_at(raw, "/attributes/trackCount")?,
        artwork_url: artwork_url(raw),
        added_at: timestamp_at(raw, "/attributes/dateAdded"),
    })
}

pub fn normalize_playlist(raw: &Value) -> Option<NormalizedPlaylist> {
    Some(NormalizedPlaylist {
        id: string_at(raw, "/id")?,
        name: string_at(raw, "/attributes/name")?,
        description: string_at(raw, "/attributes/description/standard")
            .or_else(|| string_at(raw, "/attributes/description/short")),
        // Library playlist resources do not carry a track count.
        track_count: count_at(raw, "/attributes/trackCount").unwrap_or(0),
        // Library playlists belong to the user unless curated by someone else.
        owner_name: string_at(raw, "/attributes/curatorName").unwrap_or_else(|| "You".to_string()),
    })
}

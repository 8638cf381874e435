use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Redirect},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::HubError;
use crate::http_server::{error::ApiError, state::AppState};
use crate::models::{NormalizedAlbum, NormalizedPlaylist};
use crate::provider::Provider;
use crate::services::hub::ServiceStatus;
use crate::services::library_sync::SyncSummary;
use crate::services::library_view::{LibraryQuery, Tab, filter_albums, filter_playlists};

#[derive(Debug, Deserialize)]
pub struct UserParams {
    pub user_id: String,
}

#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LibraryParams {
    user_id: String,
    #[serde(flatten)]
    query: LibraryQuery,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackResponse {
    provider: Provider,
    user_id: String,
    /// `None` when linking worked but the first sync did not.
    sync: Option<SyncSummary>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LibraryResponse {
    provider: Provider,
    last_synced_at: DateTime<Utc>,
    stale: bool,
    refreshing: bool,
    tab: Tab,
    #[serde(skip_serializing_if = "Option::is_none")]
    albums: Option<Vec<NormalizedAlbum>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    playlists: Option<Vec<NormalizedPlaylist>>,
}

fn require_user(user_id: &str) -> Result<&str, ApiError> {
    let user_id = user_id.trim();
    if user_id.is_empty() {
        return Err(ApiError::BadRequest("user_id is required".to_string()));
    }
    Ok(user_id)
}

pub async fn authorize(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<Provider>,
    Query(params): Query<UserParams>,
) -> Result<Redirect, ApiError> {
    let user_id = require_user(&params.user_id)?;
    let url = state.hub.begin_authorization(user_id, provider)?;
    Ok(Redirect::temporary(url.as_str()))
}

pub async fn callback(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<Provider>,
    Query(params): Query<CallbackParams>,
) -> Result<Json<CallbackResponse>, ApiError> {
    if let Some(error) = params.error {
        return Err(ApiError::BadRequest(format!(
            "{} authorization was not granted: {error}",
            provider.display_name()
        )));
    }
    let (Some(code), Some(user_id)) = (params.code, params.state) else {
        return Err(ApiError::BadRequest(
            "callback requires code and state".to_string(),
        ));
    };

    let sync = state
        .hub
        .complete_authorization(provider, &code, &user_id)
        .await?;

    Ok(Json(CallbackResponse {
        provider,
        user_id,
        sync,
    }))
}

pub async fn disconnect(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<Provider>,
    Query(params): Query<UserParams>,
) -> Result<StatusCode, ApiError> {
    let user_id = require_user(&params.user_id)?;
    if state.hub.disconnect(user_id, provider).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(HubError::NotLinked { provider }.into())
    }
}

pub async fn services(
    State(state): State<Arc<AppState>>,
    Query(params): Query<UserParams>,
) -> Result<Json<Vec<ServiceStatus>>, ApiError> {
    let user_id = require_user(&params.user_id)?;
    Ok(Json(state.hub.service_statuses(user_id).await?))
}

pub async fn sync(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<Provider>,
    Query(params): Query<UserParams>,
) -> Result<Json<SyncSummary>, ApiError> {
    let user_id = require_user(&params.user_id)?;
    Ok(Json(state.hub.sync_library(user_id, provider).await?))
}

pub async fn library(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<Provider>,
    Query(params): Query<LibraryParams>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = require_user(&params.user_id)?;
    let read = state
        .hub
        .library(user_id, provider, state.staleness_window)
        .await?;

    let (cached, refreshing) = match (read.cached, read.refresh) {
        (Some(cached), refresh) => (cached, refresh.is_some()),
        // Nothing to show yet: wait for the first sync.
        (None, Some(refresh)) => {
            refresh.await.map_err(|e| {
                tracing::error!("Library sync task failed: {}", e);
                ApiError::Unavailable(format!(
                    "{} library sync was interrupted, try again",
                    provider.display_name()
                ))
            })??;
            let cached = state.hub.cache().get(user_id, provider).ok_or_else(|| {
                ApiError::Unavailable(format!(
                    "{} library is not available yet, try syncing it",
                    provider.display_name()
                ))
            })?;
            (cached, false)
        }
        (None, None) => {
            return Err(ApiError::Unavailable(format!(
                "{} library is still syncing",
                provider.display_name()
            )));
        }
    };

    let query = params.query;
    let snapshot = &cached.snapshot;
    let (albums, playlists) = match query.tab {
        Tab::Albums => (
            Some(filter_albums(&snapshot.albums, query.search.as_deref(), query.sort)),
            None,
        ),
        Tab::Playlists => (
            None,
            Some(filter_playlists(
                &snapshot.playlists,
                query.search.as_deref(),
                query.sort,
            )),
        ),
    };

    Ok(Json(LibraryResponse {
        provider,
        last_synced_at: snapshot.last_synced_at,
        stale: cached.stale || snapshot.age(Utc::now()) >= state.staleness_window,
        refreshing,
        tab: query.tab,
        albums,
        playlists,
    }))
}

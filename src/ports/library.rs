use serde_json::Value;

use crate::error::FetchError;
use crate::models::{NormalizedAlbum, NormalizedPlaylist};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collection {
    Albums,
    Playlists,
}

impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Albums => "albums",
            Collection::Playlists => "playlists",
        }
    }
}

/// One page of raw library entries plus the cursor of the next page, if any.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LibraryPage {
    pub items: Vec<Value>,
    pub next: Option<String>,
}

/// Port trait wrapping a provider's library endpoints.
///
/// Pagination cursors are opaque to callers: pass `None` for the first page and
/// then whatever `LibraryPage::next` returned.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait LibraryClient: Send + Sync {
    async fn fetch_page(
        &self,
        access_token: &str,
        collection: Collection,
        cursor: Option<String>,
    ) -> Result<LibraryPage, FetchError>;

    /// `None` for entries that are unknown or missing required fields.
    fn normalize_album(&self, raw: &Value) -> Option<NormalizedAlbum>;

    fn normalize_playlist(&self, raw: &Value) -> Option<NormalizedPlaylist>;
}

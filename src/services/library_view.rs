use serde::{Deserialize, Serialize};

use crate::models::{NormalizedAlbum, NormalizedPlaylist};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum SortKey {
    #[default]
    NameAsc,
    NameDesc,
    ArtistAsc,
    ArtistDesc,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Tab {
    #[default]
    Albums,
    Playlists,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LibraryQuery {
    pub search: Option<String>,
    pub sort: SortKey,
    pub tab: Tab,
}

fn matches(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(needle)
}

fn needle(search: Option<&str>) -> Option<String> {
    search
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_lowercase)
}

/// Albums whose name or artist contains `search` (case-insensitive), sorted.
pub fn filter_albums(
    albums: &[NormalizedAlbum],
    search: Option<&str>,
    sort: SortKey,
) -> Vec<NormalizedAlbum> {
    let needle = needle(search);
    let mut result: Vec<NormalizedAlbum> = albums
        .iter()
        .filter(|album| match &needle {
            Some(needle) => matches(&album.name, needle) || matches(&album.artist_name, needle),
            None => true,
        })
        .cloned()
        .collect();

    result.sort_by(|a, b| {
        let by_name = || a.name.to_lowercase().cmp(&b.name.to_lowercase());
        let by_artist = || {
            a.artist_name
                .to_lowercase()
                .cmp(&b.artist_name.to_lowercase())
                .then_with(by_name)
        };
        match sort {
            SortKey::NameAsc => by_name(),
            SortKey::NameDesc => by_name().reverse(),
            SortKey::ArtistAsc => by_artist(),
            SortKey::ArtistDesc => by_artist().reverse(),
        }
    });
    result
}

/// Playlists matching `search` by name. Playlists have no artist, so the
/// artist keys sort by name too.
pub fn filter_playlists(
    playlists: &[NormalizedPlaylist],
    search: Option<&str>,
    sort: SortKey,
) -> Vec<NormalizedPlaylist> {
    let needle = needle(search);
    let mut result: Vec<NormalizedPlaylist> = playlists
        .iter()
        .filter(|playlist| needle.as_deref().is_none_or(|n| matches(&playlist.name, n)))
        .cloned()
        .collect();

    result.sort_by(|a, b| {
        let ordering = a.name.to_lowercase().cmp(&b.name.to_lowercase());
        match sort {
            SortKey::NameAsc | SortKey::ArtistAsc => ordering,
            SortKey::NameDesc | SortKey::ArtistDesc => ordering.reverse(),
        }
    });
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{album, playlist};

    fn albums() -> Vec<NormalizedAlbum> {
        vec![
            album("1", "Kid A", "Radiohead"),
            album("2", "blue", "Joni Mitchell"),
            album("3", "Amnesiac", "Radiohead"),
        ]
    }

    fn names(albums: &[NormalizedAlbum]) -> Vec<&str> {
        albums.iter().map(|a| a.name.as_str()).collect()
    }

    #[test]
    fn test_search_matches_name_or_artist() {
        assert_eq!(
            names(&filter_albums(&albums(), Some("RADIO"), SortKey::NameAsc)),
            vec!["Amnesiac", "Kid A"]
        );
        assert_eq!(
            names(&filter_albums(&albums(), Some("blu"), SortKey::NameAsc)),
            vec!["blue"]
        );
        assert_eq!(filter_albums(&albums(), Some("  "), SortKey::NameAsc).len(), 3);
        assert!(filter_albums(&albums(), Some("zzz"), SortKey::NameAsc).is_empty());
    }

    #[test]
    fn test_album_sort_orders() {
        let all = albums();
        assert_eq!(
            names(&filter_albums(&all, None, SortKey::NameAsc)),
            vec!["Amnesiac", "blue", "Kid A"]
        );
        assert_eq!(
            names(&filter_albums(&all, None, SortKey::NameDesc)),
            vec!["Kid A", "blue", "Amnesiac"]
        );
        assert_eq!(
            names(&filter_albums(&all, None, SortKey::ArtistAsc)),
            vec!["blue", "Amnesiac", "Kid A"]
        );
        assert_eq!(
            names(&filter_albums(&all, None, SortKey::ArtistDesc)),
            vec!["Kid A", "Amnesiac", "blue"]
        );
    }

    #[test]
    fn test_playlists_search_and_sort_by_name() {
        let playlists = vec![
            playlist("1", "Workout"),
            playlist("2", "chill"),
            playlist("3", "Work focus"),
        ];

        let found = filter_playlists(&playlists, Some("work"), SortKey::ArtistDesc);
        let found: Vec<_> = found.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(found, vec!["Workout", "Work focus"]);

        let all = filter_playlists(&playlists, None, SortKey::NameAsc);
        let all: Vec<_> = all.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(all, vec!["chill", "Work focus", "Workout"]);
    }

    #[test]
    fn test_query_deserializes_kebab_case() {
        let query: LibraryQuery =
            serde_json::from_str(r#"{"search": "x", "sort": "artist-desc", "tab": "playlists"}"#)
                .unwrap();
        assert_eq!(query.sort, SortKey::ArtistDesc);
        assert_eq!(query.tab, Tab::Playlists);

        let defaults: LibraryQuery = serde_json::from_str("{}").unwrap();
        assert_eq!(defaults.sort, SortKey::NameAsc);
        assert_eq!(defaults.tab, Tab::Albums);
    }
}

//! Helpers for the loosely shaped JSON that library endpoints return.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::FetchError;
use crate::ports::library::LibraryPage;

fn list_of(value: &Value) -> Option<&[Value]> {
    match value {
        Value::Array(items) => Some(items.as_slice()),
        Value::Object(map) => ["items", "data"]
            .iter()
            .find_map(|key| map.get(*key).and_then(Value::as_array))
            .map(Vec::as_slice),
        _ => None,
    }
}

/// Entries of the `key` collection in a response body.
///
/// Accepts `[...]`, `{key: [...]}`, `{key: {items: [...]}}`,
/// `{key: {data: [...]}}`, `{items: [...]}` and `{data: [...]}`.
pub fn collection_items<'a>(body: &'a Value, key: &str) -> Option<&'a [Value]> {
    body.get(key)
        .and_then(list_of)
        .or_else(|| list_of(body))
}

/// Cursor of the next page: `next` at the top level or inside the `key` wrapper.
pub fn next_cursor(body: &Value, key: &str) -> Option<String> {
    body.get("next")
        .or_else(|| body.get(key).and_then(|wrapped| wrapped.get("next")))
        .and_then(Value::as_str)
        .filter(|next| !next.is_empty())
        .map(str::to_string)
}

pub fn page_from_body(body: &Value, key: &str) -> Result<LibraryPage, FetchError> {
    let items = collection_items(body, key)
        .ok_or_else(|| FetchError::Malformed(format!("no {key} collection in response")))?;
    Ok(LibraryPage {
        items: items.to_vec(),
        next: next_cursor(body, key),
    })
}

pub fn string_at(value: &Value, pointer: &str) -> Option<String> {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

pub fn count_at(value: &Value, pointer: &str) -> Option<u32> {
    value
        .pointer(pointer)
        .and_then(Value::as_u64)
        .and_then(|count| u32::try_from(count).ok())
}

pub fn timestamp_at(value: &Value, pointer: &str) -> Option<DateTime<Utc>> {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|at| at.with_timezone(&Utc))
}

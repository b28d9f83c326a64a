//! Cursor-based (keyset) pagination
//!
//! Cursors are opaque to clients: URL-safe base64 (no padding) of
//! `{"k": <sort key>, "id": <row id>}`. Queries fetch `limit + 1` rows and
//! the extra row only decides `has_more`.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ApiError;

/// Default page size
pub const DEFAULT_LIMIT: i64 = 50;
/// Largest page a client may request
pub const MAX_LIMIT: i64 = 200;

/// Decoded cursor position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cursor {
    /// Sort key of the last returned row (position, timestamp or like count)
    pub k: Value,
    /// Id of the last returned row, breaks ties in the sort key
    pub id: String,
}

impl Cursor {
    pub fn new(k: impl Into<Value>, id: impl Into<String>) -> Self {
        Self {
            k: k.into(),
            id: id.into(),
        }
    }

    /// Encode to the opaque string handed to clients
    ///
    /// ```
    /// use qv_server::pagination::Cursor;
    ///
    /// let cursor = Cursor::new(41, "msg-1");
    /// let decoded = Cursor::decode(&cursor.encode()).unwrap();
    /// assert_eq!(decoded, cursor);
    /// ```
    pub fn encode(&self) -> String {
        // Serializing a Value and a String cannot fail
        let json = serde_json::to_vec(self).unwrap_or_default();
        URL_SAFE_NO_PAD.encode(json)
    }

    pub fn decode(raw: &str) -> Result<Self, ApiError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(raw.trim())
            .map_err(|_| ApiError::BadRequest("Malformed cursor".to_string()))?;
        serde_json::from_slice(&bytes).map_err(|_| ApiError::BadRequest("Malformed cursor".to_string()))
    }

    /// Sort key as an integer (message position, like count)
    pub fn int_key(&self) -> Result<i64, ApiError> {
        self.k
            .as_i64()
            .ok_or_else(|| ApiError::BadRequest("Malformed cursor".to_string()))
    }

    /// Sort key as a string (timestamp)
    pub fn str_key(&self) -> Result<&str, ApiError> {
        self.k
            .as_str()
            .ok_or_else(|| ApiError::BadRequest("Malformed cursor".to_string()))
    }
}

/// Parse an optional cursor query parameter (empty string counts as absent)
pub fn parse_cursor(raw: Option<&str>) -> Result<Option<Cursor>, ApiError> {
    match raw {
        Some(s) if !s.trim().is_empty() => Cursor::decode(s).map(Some),
        _ => Ok(None),
    }
}

/// Clamp a requested page size to `[1, MAX_LIMIT]`, defaulting to [`DEFAULT_LIMIT`]
pub fn clamp_limit(requested: Option<i64>) -> i64 {
    requested.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
}

/// One page of results
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
    pub has_more: bool,
}

impl<T> Page<T> {
    /// Build a page from `limit + 1` fetched rows
    ///
    /// `cursor_of` derives the cursor from the last row kept.
    pub fn from_rows(mut rows: Vec<T>, limit: i64, cursor_of: impl Fn(&T) -> Cursor) -> Self {
        let limit = usize::try_from(limit).unwrap_or(0);
        let has_more = rows.len() > limit;
        rows.truncate(limit);

        let next_cursor = if has_more {
            rows.last().map(|row| cursor_of(row).encode())
        } else {
            None
        };

        Self {
            items: rows,
            next_cursor,
            has_more,
        }
    }
}

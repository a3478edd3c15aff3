//! Feed wire format.
//!
//! The executor and the CRUD paths only see [`FeedPage`]s and [`FeedEntry`]s;
//! the concrete encoding sits behind [`FeedCodec`]. [`JsonFeedCodec`] speaks
//! SData JSON:
//!
//! ```json
//! {
//!   "$totalResults": 2, "$startIndex": 1, "$itemsPerPage": 1,
//!   "$resources": [
//!     { "$key": "C1", "$etag": "W/\"7\"", "$name": "contact", "FirstName": "Tom" }
//!   ]
//! }
//! ```

use crate::error::SDataResult;
use serde::de::Error as _;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};
use std::collections::BTreeMap;

/// One resource as it appears on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedEntry {
    pub key: Option<String>,
    /// Opaque version token (ETag).
    pub version: Option<String>,
    pub resource_name: Option<String>,
    /// Field name to raw wire value.
    pub payload: BTreeMap<String, Json>,
}

impl FeedEntry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Json>) -> Self {
        self.payload.insert(name.into(), value.into());
        self
    }
}

/// A page of entries plus the cursor to the next page, if any.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedPage {
    pub entries: Vec<FeedEntry>,
    pub next: Option<String>,
    pub total_results: Option<u64>,
}

pub trait FeedCodec: Send + Sync {
    /// Media type sent as `Accept` and `Content-Type`.
    fn media_type(&self) -> &'static str;

    /// Decodes one page. `request_url` is the URL the page was fetched from,
    /// used to derive the next-page URL when the feed has no explicit link.
    fn decode_page(&self, bytes: &[u8], request_url: &str) -> SDataResult<FeedPage>;

    fn decode_entry(&self, bytes: &[u8]) -> SDataResult<FeedEntry>;

    fn encode_entry(&self, entry: &FeedEntry) -> SDataResult<Vec<u8>>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonFeedCodec;

impl JsonFeedCodec {
    pub fn new() -> Self {
        Self
    }

    fn entry_from_object(object: &Map<String, Json>) -> FeedEntry {
        let mut entry = FeedEntry::new();
        for (name, value) in object {
            match name.as_str() {
                "$key" => entry.key = scalar_text(value),
                "$etag" => entry.version = scalar_text(value),
                "$name" => entry.resource_name = scalar_text(value),
                other if other.starts_with('$') => {}
                other => {
                    entry.payload.insert(other.to_string(), value.clone());
                }
            }
        }
        entry
    }

    fn next_link(object: &Map<String, Json>, returned: usize, request_url: &str) -> Option<String> {
        if let Some(next) = object.get("$next").and_then(Json::as_str) {
            return Some(next.to_string());
        }
        if returned == 0 {
            return None;
        }

        let total = object.get("$totalResults").and_then(Json::as_u64)?;
        let start = object
            .get("$startIndex")
            .and_then(Json::as_u64)
            .unwrap_or(1);
        let per_page = object
            .get("$itemsPerPage")
            .and_then(Json::as_u64)
            .unwrap_or(returned as u64);
        let next_start = start + per_page;
        (next_start <= total)
            .then(|| with_query_param(request_url, "startIndex", &next_start.to_string()))
    }
}

impl FeedCodec for JsonFeedCodec {
    fn media_type(&self) -> &'static str {
        "application/json"
    }

    fn decode_page(&self, bytes: &[u8], request_url: &str) -> SDataResult<FeedPage> {
        let document: Json = serde_json::from_slice(bytes)?;
        let object = as_object(&document)?;

        let entries: Vec<FeedEntry> = match object.get("$resources") {
            Some(Json::Array(resources)) => resources
                .iter()
                .map(|resource| as_object(resource).map(Self::entry_from_object))
                .collect::<SDataResult<_>>()?,
            Some(_) => {
                return Err(serde_json::Error::custom("$resources must be an array").into());
            }
            None => Vec::new(),
        };

        let next = Self::next_link(object, entries.len(), request_url);
        Ok(FeedPage {
            total_results: object.get("$totalResults").and_then(Json::as_u64),
            entries,
            next,
        })
    }

    fn decode_entry(&self, bytes: &[u8]) -> SDataResult<FeedEntry> {
        let document: Json = serde_json::from_slice(bytes)?;
        let object = as_object(&document)?;
        match object.get("$resources").and_then(Json::as_array) {
            Some(resources) => match resources.first() {
                Some(first) => Ok(Self::entry_from_object(as_object(first)?)),
                None => Err(serde_json::Error::custom("feed contains no resource").into()),
            },
            None => Ok(Self::entry_from_object(object)),
        }
    }

    fn encode_entry(&self, entry: &FeedEntry) -> SDataResult<Vec<u8>> {
        let mut object = Map::new();
        if let Some(key) = &entry.key {
            object.insert("$key".to_string(), Json::String(key.clone()));
        }
        for (name, value) in &entry.payload {
            object.insert(name.clone(), value.clone());
        }
        Ok(serde_json::to_vec(&Json::Object(object))?)
    }
}

fn as_object(value: &Json) -> SDataResult<&Map<String, Json>> {
    value
        .as_object()
        .ok_or_else(|| serde_json::Error::custom("expected a JSON object").into())
}

fn scalar_text(value: &Json) -> Option<String> {
    match value {
        Json::Null => None,
        Json::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Sets `name=value` on `url`, replacing an existing occurrence.
pub(crate) fn with_query_param(url: &str, name: &str, value: &str) -> String {
    let (path, query) = match url.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (url, None),
    };
    let prefix = format!("{}=", name);
    let mut params: Vec<String> = query
        .map(|q| {
            q.split('&')
                .filter(|param| !param.is_empty() && !param.starts_with(&prefix))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    params.push(format!("{}{}", prefix, value));
    format!("{}?{}", path, params.join("&"))
}

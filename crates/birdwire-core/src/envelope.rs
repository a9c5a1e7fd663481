//! The top-level response envelope shared by REST responses and stream
//! records: primary `data`, side-table `includes`, and partial `errors`.

use serde::{Deserialize, Serialize};

use crate::entities::{Media, Place, Poll, Tweet, User};

/// The standard API envelope. `T` is the primary payload type — a single
/// entity on stream records and detail endpoints, a `Vec` on list endpoints.
///
/// `data` is present only on success; `errors` may co-occur with `data`
/// when the request partially failed (e.g. one protected tweet in a batch).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(serialize = "T: Serialize", deserialize = "T: Deserialize<'de>"))]
pub struct Envelope<T> {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub includes: Option<Includes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<ApiError>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
}

impl<T> Envelope<T> {
    /// Returns `true` if the envelope carries primary data.
    pub fn is_success(&self) -> bool {
        self.data.is_some()
    }

    /// Returns `true` if the envelope carries primary data *and* partial
    /// errors alongside it.
    pub fn has_partial_errors(&self) -> bool {
        self.data.is_some() && self.errors.as_ref().is_some_and(|e| !e.is_empty())
    }

    /// The includes side-table, empty if the response had none.
    pub fn includes(&self) -> Includes {
        self.includes.clone().unwrap_or_default()
    }
}

/// Side-table of entities referenced by id from the primary payload,
/// returned alongside it to avoid duplication. Immutable once built.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Includes {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tweets: Vec<Tweet>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub users: Vec<User>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media: Vec<Media>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub polls: Vec<Poll>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub places: Vec<Place>,
}

impl Includes {
    /// Returns `true` if every side-table is empty.
    pub fn is_empty(&self) -> bool {
        self.tweets.is_empty()
            && self.users.is_empty()
            && self.media.is_empty()
            && self.polls.is_empty()
            && self.places.is_empty()
    }
}

/// A partial-failure error object. Not a failure of the request itself —
/// surfaced as data next to the entities that did resolve.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameter: Option<String>,
}

/// Pagination / result metadata on list endpoints.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub newest_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oldest_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_token: Option<String>,
}

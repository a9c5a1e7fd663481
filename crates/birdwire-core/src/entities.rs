//! Entity object shapes shared by REST responses and stream records.

use serde::{Deserialize, Serialize};

/// A tweet, with whatever optional expansion fields the request asked for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tweet {
    pub id: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_reply_to_user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub possibly_sensitive: Option<bool>,
    /// Tweets this one replies to, quotes or retweets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referenced_tweets: Option<Vec<TweetReference>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachments: Option<Attachments>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entities: Option<TweetEntities>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geo: Option<Geo>,
}

/// A by-id pointer to another tweet, tagged with the relation kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TweetReference {
    #[serde(rename = "type")]
    pub kind: ReferenceKind,
    pub id: String,
}

/// Relation between a tweet and a tweet it references.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceKind {
    RepliedTo,
    Quoted,
    Retweeted,
}

impl std::fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RepliedTo => write!(f, "replied_to"),
            Self::Quoted => write!(f, "quoted"),
            Self::Retweeted => write!(f, "retweeted"),
        }
    }
}

/// Keys of media/poll objects attached to a tweet.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Attachments {
    #[serde(default)]
    pub media_keys: Vec<String>,
    #[serde(default)]
    pub poll_ids: Vec<String>,
}

/// Parsed-out entities of the tweet text.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TweetEntities {
    #[serde(default)]
    pub mentions: Vec<Mention>,
    #[serde(default)]
    pub hashtags: Vec<Tag>,
    #[serde(default)]
    pub urls: Vec<UrlEntity>,
}

/// An @-mention inside the tweet text. `id` is only present on newer
/// payloads; the username is the stable lookup key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mention {
    pub start: u32,
    pub end: u32,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

/// A hashtag or cashtag span.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tag {
    pub start: u32,
    pub end: u32,
    pub tag: String,
}

/// A URL span.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UrlEntity {
    pub start: u32,
    pub end: u32,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expanded_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_url: Option<String>,
}

/// Geo information attached to a tweet.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Geo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub place_id: Option<String>,
}

/// A user object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verified: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protected: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_image_url: Option<String>,
}

/// A media object, keyed by `media_key` rather than id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Media {
    pub media_key: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview_image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alt_text: Option<String>,
}

/// A poll object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Poll {
    pub id: String,
    pub options: Vec<PollOption>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voting_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_datetime: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_minutes: Option<u32>,
}

/// One choice in a poll.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollOption {
    pub position: u32,
    pub label: String,
    pub votes: u64,
}

/// A place object referenced from a tweet's geo field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Place {
    pub id: String,
    pub full_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub place_type: Option<String>,
}

//! Typed stream records: the closed set of shapes a framed stream payload
//! can classify into. One frame decodes into exactly one of these; frames
//! matching none of them are a [`DecodeError`](crate::error::DecodeError),
//! not a record.

use serde::{Deserialize, Serialize};

use crate::entities::Tweet;
use crate::envelope::{ApiError, Includes};
use crate::index::EntityIndex;
use crate::resolve::{self, Dictionary};

/// One classified stream record.
#[derive(Debug, Clone)]
pub enum StreamRecord {
    /// A tweet payload, possibly with includes, partial errors and
    /// matched-rule tags.
    Tweet(TweetRecord),
    /// An in-band informational message from the server.
    System(SystemMessage),
    /// An in-band notice that the server is ending the stream.
    Disconnect(DisconnectRecord),
}

/// A tweet stream record: the envelope fields plus the rule tags the
/// filtered-stream endpoint attaches next to `data`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TweetRecord {
    pub data: Tweet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub includes: Option<Includes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<ApiError>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub matching_rules: Vec<MatchingRule>,
}

impl TweetRecord {
    /// Denormalize this record's tweet against its own includes.
    ///
    /// Relations the side-table does not cover are left absent.
    pub fn resolve(&self) -> Dictionary {
        match &self.includes {
            Some(includes) => {
                let index = EntityIndex::new(includes);
                resolve::resolve(&self.data, &index)
            }
            None => {
                let empty = Includes::default();
                let index = EntityIndex::new(&empty);
                resolve::resolve(&self.data, &index)
            }
        }
    }
}

/// A filter rule that matched a streamed tweet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchingRule {
    pub id: RuleId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

/// Rule identifier — numeric on older payloads, string on newer ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RuleId {
    Number(u64),
    Text(String),
}

impl std::fmt::Display for RuleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => write!(f, "{s}"),
        }
    }
}

/// Severity of a first-generation system message. The wire key of the
/// message object is the severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemMessageKind {
    Error,
    Warn,
    Info,
}

impl SystemMessageKind {
    /// Map a wire key to a severity, if it is one.
    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "error" => Some(Self::Error),
            "warn" => Some(Self::Warn),
            "info" => Some(Self::Info),
            _ => None,
        }
    }
}

impl std::fmt::Display for SystemMessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warn => write!(f, "warn"),
            Self::Info => write!(f, "info"),
        }
    }
}

/// Body of a system message: `{"error": {"message": ..., "sent": ...}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemMessageBody {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent: Option<String>,
}

/// An in-band informational message. Never fatal.
#[derive(Debug, Clone)]
pub struct SystemMessage {
    pub kind: SystemMessageKind,
    pub message: String,
    pub sent: Option<String>,
}

impl SystemMessage {
    pub fn new(kind: SystemMessageKind, body: SystemMessageBody) -> Self {
        Self {
            kind,
            message: body.message,
            sent: body.sent,
        }
    }
}

/// One element of a second-generation `errors` array, before it is split
/// into hard disconnects and informational connection issues.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamIssue {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub disconnect_type: Option<String>,
    #[serde(default)]
    pub detail: Option<String>,
    #[serde(default)]
    pub connection_issue: Option<String>,
}

/// A hard disconnect notice: the server is tearing the stream down.
#[derive(Debug, Clone)]
pub struct DisconnectNotice {
    pub disconnect_type: String,
    pub title: Option<String>,
    pub detail: Option<String>,
}

/// An informational connection notice: the stream is degraded or about to
/// change, but the element carries no disconnect type.
#[derive(Debug, Clone)]
pub struct ConnectionIssue {
    pub title: String,
    pub detail: Option<String>,
    pub connection_issue: Option<String>,
}

/// A terminal in-band disconnection record, split into its two sub-kinds.
#[derive(Debug, Clone, Default)]
pub struct DisconnectRecord {
    pub disconnects: Vec<DisconnectNotice>,
    pub issues: Vec<ConnectionIssue>,
}

impl DisconnectRecord {
    /// Partition raw stream issues into the two sub-kinds. Returns `None`
    /// when no element is disconnection-shaped (neither a title nor a
    /// disconnect type), in which case the frame is not a disconnection
    /// record at all.
    pub fn from_issues(issues: Vec<StreamIssue>) -> Option<Self> {
        let mut record = Self::default();
        for issue in issues {
            match (issue.disconnect_type, issue.title) {
                (Some(disconnect_type), title) => record.disconnects.push(DisconnectNotice {
                    disconnect_type,
                    title,
                    detail: issue.detail,
                }),
                (None, Some(title)) => record.issues.push(ConnectionIssue {
                    title,
                    detail: issue.detail,
                    connection_issue: issue.connection_issue,
                }),
                (None, None) => {}
            }
        }
        if record.disconnects.is_empty() && record.issues.is_empty() {
            None
        } else {
            Some(record)
        }
    }

    /// Returns `true` if at least one element was a hard disconnect.
    pub fn is_fatal(&self) -> bool {
        !self.disconnects.is_empty()
    }
}

//! Record classifier: one generic key-presence probe per frame, then a
//! single conversion into the matching concrete shape.
//!
//! Both streaming-API generations share the `\r\n` framing but differ in
//! payload shape, so the classifier is parameterized by [`Generation`].

use serde_json::Value;

use birdwire_core::records::{
    DisconnectRecord, StreamIssue, SystemMessage, SystemMessageBody, SystemMessageKind,
};
use birdwire_core::{DecodeError, StreamRecord, TweetRecord};

/// Which streaming-API payload dialect the stream speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Generation {
    /// First generation: `data` for tweets, severity-keyed objects
    /// (`error` / `warn` / `info`) for system messages.
    V1,
    /// Second generation: `data` (+ `matching_rules`) for tweets, an
    /// `errors` array of disconnection-shaped elements for terminal
    /// notices.
    V2,
}

impl std::fmt::Display for Generation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::V1 => write!(f, "v1"),
            Self::V2 => write!(f, "v2"),
        }
    }
}

/// Classifies raw frames into [`StreamRecord`]s.
#[derive(Debug, Clone, Copy)]
pub struct RecordClassifier {
    generation: Generation,
}

impl RecordClassifier {
    pub fn new(generation: Generation) -> Self {
        Self { generation }
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Classify one non-empty frame. The frame is parsed into a generic
    /// JSON value exactly once; the value is then converted into the
    /// concrete shape the probe picked.
    pub fn classify(&self, frame: &[u8]) -> Result<StreamRecord, DecodeError> {
        let value: Value = serde_json::from_slice(frame)?;
        match self.generation {
            Generation::V1 => classify_v1(value),
            Generation::V2 => classify_v2(value),
        }
    }
}

fn classify_v1(value: Value) -> Result<StreamRecord, DecodeError> {
    if value.get("data").is_some() {
        let record: TweetRecord = serde_json::from_value(value)?;
        return Ok(StreamRecord::Tweet(record));
    }
    let Value::Object(map) = value else {
        return Err(unknown("record is not a JSON object"));
    };
    for (key, body) in map {
        if let Some(kind) = SystemMessageKind::from_key(&key) {
            let body: SystemMessageBody = serde_json::from_value(body)?;
            return Ok(StreamRecord::System(SystemMessage::new(kind, body)));
        }
    }
    Err(unknown("no data key and no recognized message severity"))
}

fn classify_v2(value: Value) -> Result<StreamRecord, DecodeError> {
    if value.get("data").is_some() {
        let record: TweetRecord = serde_json::from_value(value)?;
        return Ok(StreamRecord::Tweet(record));
    }
    let Value::Object(mut map) = value else {
        return Err(unknown("record is not a JSON object"));
    };
    match map.remove("errors") {
        Some(errors) => {
            let issues: Vec<StreamIssue> = serde_json::from_value(errors)?;
            match DisconnectRecord::from_issues(issues) {
                Some(record) => Ok(StreamRecord::Disconnect(record)),
                None => Err(unknown("errors array is not disconnection-shaped")),
            }
        }
        None => Err(unknown("neither data nor errors present")),
    }
}

fn unknown(reason: &str) -> DecodeError {
    DecodeError::UnknownShape {
        reason: reason.to_string(),
    }
}

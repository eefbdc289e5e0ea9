//! Storage change notifications.
//!
//! The wire format follows S3 event notifications; only the fields the
//! dispatcher needs are deserialized.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use tracing::warn;

/// A batch of notifications delivered to one invocation.
#[derive(Debug, Deserialize)]
pub struct NotificationBatch {
    #[serde(rename = "Records", default)]
    pub records: Vec<NotificationRecord>,
}

#[derive(Debug, Deserialize)]
pub struct NotificationRecord {
    #[serde(rename = "eventName")]
    pub event_name: String,
    pub s3: S3Entity,
}

#[derive(Debug, Deserialize)]
pub struct S3Entity {
    #[serde(default)]
    pub bucket: Option<S3Bucket>,
    pub object: S3Object,
}

#[derive(Debug, Deserialize)]
pub struct S3Bucket {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct S3Object {
    pub key: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChangeKind {
    Created,
    Removed,
}

impl ChangeKind {
    /// Map an event name such as `ObjectCreated:Put` to a change kind.
    /// Unknown families yield `None` and are ignored by the dispatcher.
    pub fn from_event_name(event_name: &str) -> Option<Self> {
        if event_name.starts_with("ObjectCreated:") {
            Some(Self::Created)
        } else if event_name.starts_with("ObjectRemoved:") {
            Some(Self::Removed)
        } else {
            None
        }
    }
}

/// One notification, normalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    /// Position in the delivered batch.
    pub index: usize,
    pub event_name: String,
    pub kind: Option<ChangeKind>,
    pub bucket: Option<String>,
    pub key: String,
}

impl NotificationBatch {
    pub fn into_events(self) -> Vec<ChangeEvent> {
        self.records
            .into_iter()
            .enumerate()
            .map(|(index, record)| ChangeEvent {
                index,
                kind: ChangeKind::from_event_name(&record.event_name),
                event_name: record.event_name,
                bucket: record.s3.bucket.map(|b| b.name),
                key: decode_object_key(&record.s3.object.key).into_owned(),
            })
            .collect()
    }
}

/// Keys arrive form-encoded: `+` stands for a space and the rest is
/// percent-encoded. Undecodable keys are used verbatim.
pub fn decode_object_key(raw: &str) -> Cow<'_, str> {
    if !raw.contains(['+', '%']) {
        return Cow::Borrowed(raw);
    }
    let spaced = raw.replace('+', " ");
    match urlencoding::decode(&spaced) {
        Ok(decoded) => Cow::Owned(decoded.into_owned()),
        Err(err) => {
            warn!("object key `{}` is not valid percent-encoding: {}", raw, err);
            Cow::Borrowed(raw)
        }
    }
}

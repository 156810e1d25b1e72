use percent_encoding::percent_decode_str;
use serde::Deserialize;

use crate::{domain::entities::object_location::ObjectLocation, helper::error_chain_fmt};

/// The only event triggering an ingestion
pub const OBJECT_CREATED_EVENT: &str = "ObjectCreated:Put";

/// Notification sent by the object storage, reduced to what the ingestion needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectNotification {
    ObjectCreated(ObjectLocation),
    /// Any other event, skipped without side effects
    Ignored { event_name: String },
}

#[derive(Debug, Deserialize)]
struct S3EventEnvelope {
    #[serde(rename = "Records", default)]
    records: Vec<S3EventRecord>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct S3EventRecord {
    event_name: String,
    s3: Option<S3Entity>,
}

#[derive(Debug, Deserialize)]
struct S3Entity {
    bucket: S3Bucket,
    object: S3Object,
}

#[derive(Debug, Deserialize)]
struct S3Bucket {
    name: String,
}

#[derive(Debug, Deserialize)]
struct S3Object {
    key: String,
}

impl ObjectNotification {
    /// Parses the body of a queue message holding an S3 event envelope
    ///
    /// Only the first record of the envelope is considered.
    pub fn try_parsing(data: &[u8]) -> Result<Self, NotificationParsingError> {
        let data = std::str::from_utf8(data)?;
        let envelope: S3EventEnvelope = serde_json::from_str(data)
            .map_err(|e| NotificationParsingError::InvalidJsonData(e, data.to_string()))?;

        let record = envelope
            .records
            .into_iter()
            .next()
            .ok_or(NotificationParsingError::NoRecord)?;

        if record.event_name != OBJECT_CREATED_EVENT {
            return Ok(Self::Ignored {
                event_name: record.event_name,
            });
        }

        let entity = record
            .s3
            .ok_or_else(|| NotificationParsingError::MissingObject(record.event_name.clone()))?;

        Ok(Self::ObjectCreated(ObjectLocation::new(
            entity.bucket.name,
            decode_object_key(&entity.object.key)?,
        )))
    }
}

/// Object keys are URL encoded in S3 events, with spaces encoded as `+`
fn decode_object_key(key: &str) -> Result<String, NotificationParsingError> {
    let key = key.replace('+', " ");
    let decoded = percent_decode_str(&key)
        .decode_utf8()
        .map_err(NotificationParsingError::InvalidObjectKey)?;

    Ok(decoded.into_owned())
}

#[derive(thiserror::Error)]
pub enum NotificationParsingError {
    #[error("Data could not be converted from utf8 u8 vector to string")]
    InvalidStringData(#[from] std::str::Utf8Error),

    #[error("Data did not represent a valid JSON object: {0}. Data: {1}")]
    InvalidJsonData(serde_json::Error, String),

    #[error("The notification does not hold any record")]
    NoRecord,

    #[error("The {0} event does not describe an object")]
    MissingObject(String),

    #[error("The object key is not valid once URL decoded")]
    InvalidObjectKey(#[source] std::str::Utf8Error),
}

impl std::fmt::Debug for NotificationParsingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

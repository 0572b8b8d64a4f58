//! S3 event notification parsing.

use percent_encoding::percent_decode_str;
use serde::Deserialize;

use crate::{Error, Result};

/// One record of a change notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    /// e.g. `ObjectCreated:Put`
    pub event_name: String,
    pub bucket: String,
    /// Decoded object key
    pub key: String,
    pub size: Option<u64>,
}

impl ChangeEvent {
    pub fn is_create(&self) -> bool {
        self.event_name
            .trim_start_matches("s3:")
            .starts_with("ObjectCreated")
    }
}

/// A decoded notification body
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// Sent once when the bucket notification is configured
    Test,
    Events(Vec<ChangeEvent>),
}

#[derive(Deserialize)]
struct RawNotification {
    #[serde(rename = "Records", default)]
    records: Option<Vec<RawRecord>>,
    #[serde(rename = "Event", default)]
    event: Option<String>,
    /// SNS envelope type, when the bucket publishes through a topic
    #[serde(rename = "Type", default)]
    envelope_type: Option<String>,
    #[serde(rename = "Message", default)]
    message: Option<String>,
}

#[derive(Deserialize)]
struct RawRecord {
    #[serde(rename = "eventName")]
    event_name: String,
    s3: RawS3,
}

#[derive(Deserialize)]
struct RawS3 {
    bucket: RawBucket,
    object: RawObject,
}

#[derive(Deserialize)]
struct RawBucket {
    name: String,
}

#[derive(Deserialize)]
struct RawObject {
    key: String,
    #[serde(default)]
    size: Option<u64>,
}

/// Decode a key as S3 writes it in notifications: form-encoded, so `+` is
/// a space and everything else is percent-escaped.
pub fn decode_object_key(raw: &str) -> Result<String> {
    let spaced = raw.replace('+', " ");
    percent_decode_str(&spaced)
        .decode_utf8()
        .map(|k| k.into_owned())
        .map_err(|e| Error::Serialization(format!("Invalid object key {:?}: {}", raw, e)))
}

/// Parse a notification body.
pub fn parse_notification(body: &str) -> Result<Notification> {
    let raw: RawNotification = serde_json::from_str(body)?;

    if raw.envelope_type.as_deref() == Some("Notification") {
        if let Some(message) = raw.message {
            return parse_notification(&message);
        }
    }

    if raw.event.as_deref() == Some("s3:TestEvent") {
        return Ok(Notification::Test);
    }

    let records = raw.records.ok_or_else(|| {
        Error::Serialization("Notification has neither Records nor Event".to_string())
    })?;

    records
        .into_iter()
        .map(|record| {
            Ok(ChangeEvent {
                event_name: record.event_name,
                bucket: record.s3.bucket.name,
                key: decode_object_key(&record.s3.object.key)?,
                size: record.s3.object.size,
            })
        })
        .collect::<Result<Vec<_>>>()
        .map(Notification::Events)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(event_name: &str, key: &str) -> String {
        serde_json::json!({
            "Records": [{
                "eventVersion": "2.1",
                "eventSource": "aws:s3",
                "eventName": event_name,
                "s3": {
                    "bucket": { "name": "cdn-bucket" },
                    "object": { "key": key, "size": 12 }
                }
            }]
        })
        .to_string()
    }

    #[test]
    fn test_parse_create_event() {
        let parsed = parse_notification(&body("ObjectCreated:Put", "cdn/abc")).unwrap();
        let Notification::Events(events) = parsed else {
            panic!("expected events");
        };
        assert_eq!(events.len(), 1);
        assert!(events[0].is_create());
        assert_eq!(events[0].bucket, "cdn-bucket");
        assert_eq!(events[0].key, "cdn/abc");
        assert_eq!(events[0].size, Some(12));
    }

    #[test]
    fn test_key_decoding() {
        assert_eq!(decode_object_key("cdn/my+file%2B1.txt").unwrap(), "cdn/my file+1.txt");
        assert_eq!(decode_object_key("cdn/%E2%9C%93").unwrap(), "cdn/\u{2713}");
        assert!(decode_object_key("cdn/%FF").is_err());
    }

    #[test]
    fn test_non_create_event() {
        let Notification::Events(events) =
            parse_notification(&body("ObjectRemoved:Delete", "cdn/abc")).unwrap()
        else {
            panic!("expected events");
        };
        assert!(!events[0].is_create());
    }

    #[test]
    fn test_test_event_and_envelope() {
        let test = r#"{"Service":"Amazon S3","Event":"s3:TestEvent","Bucket":"cdn-bucket"}"#;
        assert_eq!(parse_notification(test).unwrap(), Notification::Test);

        let wrapped = serde_json::json!({
            "Type": "Notification",
            "Message": body("ObjectCreated:Post", "cdn/xyz"),
        })
        .to_string();
        let Notification::Events(events) = parse_notification(&wrapped).unwrap() else {
            panic!("expected events");
        };
        assert_eq!(events[0].key, "cdn/xyz");
    }

    #[test]
    fn test_garbage_is_error() {
        assert!(parse_notification("not json").is_err());
        assert!(parse_notification("{}").is_err());
    }
}

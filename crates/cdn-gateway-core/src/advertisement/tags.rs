//! Advertisement tag encoding.
//!
//! Each field of an advertisement travels as one tag string: a fixed prefix
//! followed by the hex-encoded UTF-8 value, except the expiry which is plain
//! decimal seconds.

use serde::{Deserialize, Serialize};

pub const POINTER_TAG_PREFIX: &str = "uhrp_url_";
pub const OWNER_TAG_PREFIX: &str = "uploader_identity_key_";
pub const OBJECT_IDENTIFIER_TAG_PREFIX: &str = "object_identifier_";
pub const EXPIRY_TAG_PREFIX: &str = "expiry_time_";

pub fn pointer_tag(pointer: &str) -> String {
    format!("{}{}", POINTER_TAG_PREFIX, hex::encode(pointer))
}

pub fn owner_tag(identity_key: &str) -> String {
    format!("{}{}", OWNER_TAG_PREFIX, hex::encode(identity_key))
}

pub fn object_identifier_tag(object_identifier: &str) -> String {
    format!(
        "{}{}",
        OBJECT_IDENTIFIER_TAG_PREFIX,
        hex::encode(object_identifier)
    )
}

pub fn expiry_tag(expiry_secs: i64) -> String {
    format!("{}{}", EXPIRY_TAG_PREFIX, expiry_secs)
}

/// Decode a hex tag payload back to text.
pub fn decode_hex_payload(payload: &str) -> Option<String> {
    let raw = hex::decode(payload).ok()?;
    String::from_utf8(raw).ok()
}

/// Parse an expiry payload; anything that is not an integer counts as 0.
pub fn parse_expiry_payload(payload: &str) -> i64 {
    payload.trim().parse().unwrap_or(0)
}

/// One advertisement record as returned by the lookup service
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Advertisement {
    pub tags: Vec<String>,
}

impl Advertisement {
    /// A well-formed record carrying all four fields.
    pub fn new(pointer: &str, owner: &str, object_identifier: &str, expiry_secs: i64) -> Self {
        Self {
            tags: vec![
                pointer_tag(pointer),
                owner_tag(owner),
                object_identifier_tag(object_identifier),
                expiry_tag(expiry_secs),
            ],
        }
    }

    /// Payload of the first tag starting with `prefix`.
    pub fn tag_payload(&self, prefix: &str) -> Option<&str> {
        self.tags.iter().find_map(|t| t.strip_prefix(prefix))
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// Decoded object identifier, if the tag is present and decodes.
    pub fn object_identifier(&self) -> Option<String> {
        self.tag_payload(OBJECT_IDENTIFIER_TAG_PREFIX)
            .and_then(decode_hex_payload)
    }

    /// Expiry seconds, if the tag is present. Malformed values read as 0.
    pub fn expiry_secs(&self) -> Option<i64> {
        self.tag_payload(EXPIRY_TAG_PREFIX).map(parse_expiry_payload)
    }
}

//! Browser-style POST policies for S3.
//!
//! The policy pins the key, an exact content-length range and the two bound
//! metadata fields; the signature covers the base64 policy document.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Value};
use std::collections::BTreeMap;

use super::sigv4::{Signer, SigningCredentials};
use crate::storage::CustomMetadata;

/// Inputs of one POST policy
pub struct PostPolicy<'a> {
    pub bucket: &'a str,
    pub key: &'a str,
    pub size: u64,
    pub metadata: &'a CustomMetadata,
    pub expires_at: DateTime<Utc>,
}

impl PostPolicy<'_> {
    /// Build the policy document and return the complete set of form fields
    /// the client must submit (excluding the `file` part itself).
    pub fn form_fields(
        &self,
        signer: &Signer,
        credentials: &SigningCredentials,
        at: DateTime<Utc>,
    ) -> BTreeMap<String, String> {
        let scope = signer.scope(at);
        let prefix = signer.scheme.header_prefix();
        let credential = format!("{}/{}", credentials.key_id, scope.scope);

        let mut fields = BTreeMap::new();
        fields.insert("key".to_string(), self.key.to_string());
        fields.insert(format!("{}algorithm", prefix), signer.scheme.algorithm().to_string());
        fields.insert(format!("{}credential", prefix), credential);
        fields.insert(format!("{}date", prefix), scope.timestamp.clone());
        if let Some(token) = &credentials.session_token {
            fields.insert(format!("{}security-token", prefix), token.clone());
        }
        for (name, value) in self.metadata.iter() {
            fields.insert(signer.scheme.meta_header(name), value.to_string());
        }

        let mut conditions: Vec<Value> = vec![
            json!({ "bucket": self.bucket }),
            json!(["content-length-range", self.size, self.size]),
        ];
        for (name, value) in &fields {
            conditions.push(json!(["eq", format!("${}", name), value]));
        }

        let document = json!({
            "expiration": self.expires_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            "conditions": conditions,
        });
        let policy = BASE64.encode(document.to_string());
        let signature = signer.sign_string(credentials, &scope.date, &policy);

        fields.insert("policy".to_string(), policy);
        fields.insert(format!("{}signature", prefix), signature);
        fields
    }
}

/// Decode the policy document carried in a set of form fields.
pub fn decode_policy(fields: &BTreeMap<String, String>) -> Option<Value> {
    let encoded = fields.get("policy")?;
    let raw = BASE64.decode(encoded).ok()?;
    serde_json::from_slice(&raw).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signing::SigningScheme;

    #[test]
    fn test_policy_pins_size_and_metadata() {
        let signer = Signer::new(SigningScheme::Aws, "us-east-1", "s3");
        let credentials = SigningCredentials::new("AKID", "secret");
        let metadata: CustomMetadata = [
            ("uploaderidentitykey", "03abc"),
            ("customtime", "2024-01-01T01:05:00Z"),
        ]
        .into_iter()
        .collect();
        let at = DateTime::from_timestamp(1_704_067_200, 0).unwrap();

        let fields = PostPolicy {
            bucket: "cdn-bucket",
            key: "cdn/abc",
            size: 1024,
            metadata: &metadata,
            expires_at: at + chrono::Duration::days(7),
        }
        .form_fields(&signer, &credentials, at);

        assert_eq!(fields["key"], "cdn/abc");
        assert_eq!(fields["x-amz-meta-uploaderidentitykey"], "03abc");
        assert_eq!(fields["x-amz-algorithm"], "AWS4-HMAC-SHA256");
        assert_eq!(fields["x-amz-signature"].len(), 64);

        let policy = decode_policy(&fields).unwrap();
        let conditions = policy["conditions"].as_array().unwrap();
        assert!(conditions.contains(&json!(["content-length-range", 1024, 1024])));
        assert!(conditions.contains(&json!(["eq", "$x-amz-meta-customtime", "2024-01-01T01:05:00Z"])));
        assert_eq!(policy["expiration"], "2024-01-08T00:00:00.000Z");
    }
}

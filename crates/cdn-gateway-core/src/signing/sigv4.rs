//! AWS Signature Version 4 and its GCS HMAC twin (`GOOG4-HMAC-SHA256`).
//!
//! Both schemes share the canonical-request construction and the HMAC key
//! derivation chain; they differ only in algorithm name, header/query prefixes
//! and the request-type terminator of the credential scope.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::time::Duration;
use url::Url;

use crate::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// RFC 3986 unreserved characters stay unescaped; everything else is encoded.
const URI_ENCODE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Payload hash used for presigned URLs
pub const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";

/// Longest validity either provider accepts for a presigned URL
pub const MAX_PRESIGN_EXPIRY: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Provider flavour of the signature
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigningScheme {
    Aws,
    Goog,
}

impl SigningScheme {
    pub fn algorithm(&self) -> &'static str {
        match self {
            SigningScheme::Aws => "AWS4-HMAC-SHA256",
            SigningScheme::Goog => "GOOG4-HMAC-SHA256",
        }
    }

    fn key_prefix(&self) -> &'static str {
        match self {
            SigningScheme::Aws => "AWS4",
            SigningScheme::Goog => "GOOG4",
        }
    }

    fn request_type(&self) -> &'static str {
        match self {
            SigningScheme::Aws => "aws4_request",
            SigningScheme::Goog => "goog4_request",
        }
    }

    /// Prefix of the presign query parameters (`X-Amz-` / `X-Goog-`)
    pub fn query_prefix(&self) -> &'static str {
        match self {
            SigningScheme::Aws => "X-Amz-",
            SigningScheme::Goog => "X-Goog-",
        }
    }

    /// Prefix of provider headers (`x-amz-` / `x-goog-`)
    pub fn header_prefix(&self) -> &'static str {
        match self {
            SigningScheme::Aws => "x-amz-",
            SigningScheme::Goog => "x-goog-",
        }
    }

    /// Header name carrying user metadata `name`
    pub fn meta_header(&self, name: &str) -> String {
        format!("{}meta-{}", self.header_prefix(), name.to_ascii_lowercase())
    }
}

/// Access key material used for HMAC signing
#[derive(Clone)]
pub struct SigningCredentials {
    pub key_id: String,
    pub secret_key: String,
    pub session_token: Option<String>,
}

impl std::fmt::Debug for SigningCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningCredentials")
            .field("key_id", &self.key_id)
            .field("secret_key", &"***")
            .field("session_token", &self.session_token.as_ref().map(|_| "***"))
            .finish()
    }
}

impl SigningCredentials {
    pub fn new(key_id: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            key_id: key_id.into(),
            secret_key: secret_key.into(),
            session_token: None,
        }
    }

    pub fn with_session_token(mut self, token: Option<String>) -> Self {
        self.session_token = token;
        self
    }
}

/// A signer bound to one scheme, region and service
#[derive(Debug, Clone)]
pub struct Signer {
    pub scheme: SigningScheme,
    pub region: String,
    pub service: String,
}

/// Credential scope and formatted timestamps for one signing instant
pub struct Scope {
    pub date: String,
    pub timestamp: String,
    pub scope: String,
}

impl Signer {
    pub fn new(scheme: SigningScheme, region: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            scheme,
            region: region.into(),
            service: service.into(),
        }
    }

    pub fn scope(&self, at: DateTime<Utc>) -> Scope {
        let date = at.format("%Y%m%d").to_string();
        let timestamp = at.format("%Y%m%dT%H%M%SZ").to_string();
        let scope = format!(
            "{}/{}/{}/{}",
            date,
            self.region,
            self.service,
            self.scheme.request_type()
        );
        Scope {
            date,
            timestamp,
            scope,
        }
    }

    /// Derive the per-day signing key.
    pub fn signing_key(&self, secret: &str, date: &str) -> Vec<u8> {
        let k_secret = format!("{}{}", self.scheme.key_prefix(), secret);
        let k_date = hmac(k_secret.as_bytes(), date.as_bytes());
        let k_region = hmac(&k_date, self.region.as_bytes());
        let k_service = hmac(&k_region, self.service.as_bytes());
        hmac(&k_service, self.scheme.request_type().as_bytes())
    }

    /// Sign an arbitrary string (used for POST policies).
    pub fn sign_string(&self, credentials: &SigningCredentials, date: &str, payload: &str) -> String {
        let key = self.signing_key(&credentials.secret_key, date);
        hex::encode(hmac(&key, payload.as_bytes()))
    }

    /// Produce a presigned URL. `headers` are the headers the client must send
    /// verbatim; they are all signed alongside `host`.
    pub fn presign_url(
        &self,
        credentials: &SigningCredentials,
        method: &str,
        url: &Url,
        headers: &BTreeMap<String, String>,
        expires_in: Duration,
        at: DateTime<Utc>,
    ) -> Result<Url> {
        if expires_in.is_zero() || expires_in > MAX_PRESIGN_EXPIRY {
            return Err(Error::InvalidRequest(format!(
                "presigned URL expiry must be between 1s and {}s, got {}s",
                MAX_PRESIGN_EXPIRY.as_secs(),
                expires_in.as_secs()
            )));
        }

        let scope = self.scope(at);
        let canonical_headers = canonical_headers(url, headers)?;
        let signed_headers = signed_header_names(&canonical_headers);
        let prefix = self.scheme.query_prefix();

        let mut query: BTreeMap<String, String> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        query.insert(format!("{}Algorithm", prefix), self.scheme.algorithm().to_string());
        query.insert(
            format!("{}Credential", prefix),
            format!("{}/{}", credentials.key_id, scope.scope),
        );
        query.insert(format!("{}Date", prefix), scope.timestamp.clone());
        query.insert(format!("{}Expires", prefix), expires_in.as_secs().to_string());
        query.insert(format!("{}SignedHeaders", prefix), signed_headers.clone());
        if let Some(token) = &credentials.session_token {
            query.insert(format!("{}Security-Token", prefix), token.clone());
        }

        let canonical_query = canonical_query(&query);
        let canonical_request = format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            method,
            canonical_path(url),
            canonical_query,
            render_canonical_headers(&canonical_headers),
            signed_headers,
            UNSIGNED_PAYLOAD
        );

        let signature = self.signature(credentials, &scope, &canonical_request);

        let mut signed = url.clone();
        signed.set_query(Some(&format!(
            "{}&{}Signature={}",
            canonical_query, prefix, signature
        )));
        Ok(signed)
    }

    /// Compute the `Authorization` header for a request whose headers are all
    /// signed. `headers` must already contain the date header
    /// (`x-amz-date` / `x-goog-date`) and, for S3, `x-amz-content-sha256`.
    pub fn authorization_header(
        &self,
        credentials: &SigningCredentials,
        method: &str,
        url: &Url,
        headers: &BTreeMap<String, String>,
        payload_hash: &str,
        at: DateTime<Utc>,
    ) -> Result<String> {
        let scope = self.scope(at);
        let canonical_headers = canonical_headers(url, headers)?;
        let signed_headers = signed_header_names(&canonical_headers);

        let query: BTreeMap<String, String> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        let canonical_request = format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            method,
            canonical_path(url),
            canonical_query(&query),
            render_canonical_headers(&canonical_headers),
            signed_headers,
            payload_hash
        );

        let signature = self.signature(credentials, &scope, &canonical_request);
        Ok(format!(
            "{} Credential={}/{}, SignedHeaders={}, Signature={}",
            self.scheme.algorithm(),
            credentials.key_id,
            scope.scope,
            signed_headers,
            signature
        ))
    }

    fn signature(&self, credentials: &SigningCredentials, scope: &Scope, canonical_request: &str) -> String {
        let string_to_sign = format!(
            "{}\n{}\n{}\n{}",
            self.scheme.algorithm(),
            scope.timestamp,
            scope.scope,
            sha256_hex(canonical_request.as_bytes())
        );
        self.sign_string(credentials, &scope.date, &string_to_sign)
    }
}

/// Percent-encode one URI component the way SigV4 expects.
pub fn uri_encode(value: &str) -> String {
    utf8_percent_encode(value, URI_ENCODE).to_string()
}

/// Percent-encode a key path, keeping `/` separators.
pub fn encode_key_path(key: &str) -> String {
    key.split('/').map(uri_encode).collect::<Vec<_>>().join("/")
}

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn hmac(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn canonical_path(url: &Url) -> String {
    // Url already holds the percent-encoded path; SigV4 for S3 signs it as-is.
    let path = url.path();
    if path.is_empty() {
        "/".to_string()
    } else {
        path.to_string()
    }
}

fn canonical_query(query: &BTreeMap<String, String>) -> String {
    let mut pairs: Vec<(String, String)> = query
        .iter()
        .map(|(k, v)| (uri_encode(k), uri_encode(v)))
        .collect();
    pairs.sort();
    pairs
        .into_iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

fn canonical_headers(url: &Url, headers: &BTreeMap<String, String>) -> Result<BTreeMap<String, String>> {
    let host = url
        .host_str()
        .ok_or_else(|| Error::Config(format!("URL has no host: {}", url)))?;
    let host = match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    };

    let mut canonical = BTreeMap::new();
    canonical.insert("host".to_string(), host);
    for (name, value) in headers {
        let collapsed = value.split_whitespace().collect::<Vec<_>>().join(" ");
        canonical.insert(name.to_ascii_lowercase(), collapsed);
    }
    Ok(canonical)
}

fn render_canonical_headers(headers: &BTreeMap<String, String>) -> String {
    headers
        .iter()
        .map(|(k, v)| format!("{}:{}\n", k, v))
        .collect()
}

fn signed_header_names(headers: &BTreeMap<String, String>) -> String {
    headers.keys().cloned().collect::<Vec<_>>().join(";")
}

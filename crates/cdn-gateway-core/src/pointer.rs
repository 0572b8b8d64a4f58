//! Content-addressed pointers.
//!
//! A pointer is `uhrp://` followed by the Base58Check encoding of
//! `0xce 0x00 ‖ sha256(content)`, checksummed with the first four bytes of a
//! double SHA-256.

use futures::StreamExt;
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

use crate::storage::ByteStream;
use crate::{Error, Result};

const SCHEME: &str = "uhrp://";
const PREFIX: [u8; 2] = [0xce, 0x00];
const CHECKSUM_LEN: usize = 4;

/// Content pointer derived from a SHA-256 digest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentPointer {
    digest: [u8; 32],
}

impl ContentPointer {
    pub fn from_digest(digest: [u8; 32]) -> Self {
        Self { digest }
    }

    /// Pointer for an in-memory buffer.
    pub fn for_content(data: &[u8]) -> Self {
        Self::from_digest(Sha256::digest(data).into())
    }

    pub fn digest(&self) -> &[u8; 32] {
        &self.digest
    }

    /// Parse a pointer, verifying prefix and checksum.
    pub fn parse(value: &str) -> Result<Self> {
        let encoded = value
            .strip_prefix(SCHEME)
            .ok_or_else(|| Error::InvalidRequest(format!("not a uhrp pointer: {}", value)))?;
        let raw = bs58::decode(encoded)
            .into_vec()
            .map_err(|e| Error::InvalidRequest(format!("invalid pointer encoding: {}", e)))?;

        if raw.len() != PREFIX.len() + 32 + CHECKSUM_LEN || raw[..PREFIX.len()] != PREFIX {
            return Err(Error::InvalidRequest(format!(
                "pointer has unexpected layout: {}",
                value
            )));
        }

        let (payload, checksum) = raw.split_at(raw.len() - CHECKSUM_LEN);
        if checksum != &double_sha256(payload)[..CHECKSUM_LEN] {
            return Err(Error::InvalidRequest(format!(
                "pointer checksum mismatch: {}",
                value
            )));
        }

        let mut digest = [0u8; 32];
        digest.copy_from_slice(&payload[PREFIX.len()..]);
        Ok(Self { digest })
    }
}

impl fmt::Display for ContentPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut payload = Vec::with_capacity(PREFIX.len() + 32 + CHECKSUM_LEN);
        payload.extend_from_slice(&PREFIX);
        payload.extend_from_slice(&self.digest);
        let checksum = double_sha256(&payload);
        payload.extend_from_slice(&checksum[..CHECKSUM_LEN]);
        write!(f, "{}{}", SCHEME, bs58::encode(payload).into_string())
    }
}

impl FromStr for ContentPointer {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

fn double_sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(Sha256::digest(data)).into()
}

/// Incremental hasher over an object body
#[derive(Default)]
pub struct ContentHasher {
    hasher: Sha256,
    bytes: u64,
}

impl ContentHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
        self.bytes += chunk.len() as u64;
    }

    pub fn bytes_hashed(&self) -> u64 {
        self.bytes
    }

    pub fn finish(self) -> ContentPointer {
        ContentPointer::from_digest(self.hasher.finalize().into())
    }
}

/// Drain a body stream through the hasher, holding one chunk at a time.
pub async fn hash_stream(mut stream: ByteStream) -> Result<(ContentPointer, u64)> {
    let mut hasher = ContentHasher::new();
    while let Some(chunk) = stream.next().await {
        hasher.update(&chunk?);
    }
    let bytes = hasher.bytes_hashed();
    Ok((hasher.finish(), bytes))
}

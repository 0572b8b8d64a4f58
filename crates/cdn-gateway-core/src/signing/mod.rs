//! Request signing for upload/download grants and raw provider calls.
//!
//! `object_store` covers the data plane but has no way to sign client-side
//! headers or POST policies, so grants are signed here with the provider's
//! HMAC credentials.

pub mod post_policy;
pub mod sigv4;

pub use post_policy::{decode_policy, PostPolicy};
pub use sigv4::{
    encode_key_path, sha256_hex, uri_encode, Signer, SigningCredentials, SigningScheme,
    MAX_PRESIGN_EXPIRY, UNSIGNED_PAYLOAD,
};

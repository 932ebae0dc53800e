//! SHA-256 content digests.
//!
//! Every blob in the content store is addressed by the digest computed here.

use ctk_common::error::{CtkError, Result};
use ctk_common::types::Digest;
use sha2::{Digest as _, Sha256};

/// Computes the SHA-256 digest of an in-memory blob.
#[must_use]
pub fn digest_bytes(data: &[u8]) -> Digest {
    let hex = format!("{:x}", Sha256::digest(data));
    Digest::from_hex(&hex).unwrap_or_default()
}

/// Validates that a blob matches the expected digest.
///
/// # Errors
///
/// Returns `CtkError::HashMismatch` if the digests do not match.
pub fn validate(resource: &str, data: &[u8], expected: &Digest) -> Result<()> {
    let actual = digest_bytes(data);
    if &actual != expected {
        return Err(CtkError::HashMismatch {
            resource: resource.to_string(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        });
    }
    Ok(())
}

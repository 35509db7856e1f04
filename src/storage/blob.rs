use sha2::{Digest, Sha256};

use crate::error::{PrismError, PrismResult};

/// Length of a lower-hex SHA-256 digest.
pub const HEX_DIGEST_LEN: usize = 64;

/// Store of detached request/response bodies, addressed by content.
///
/// The canonical ref format is `"sha256:<hex>"`. Puts of identical bytes
/// resolve to the same ref and are idempotent.
pub trait BlobStore: Send + Sync {
    fn put(&self, data: &[u8]) -> PrismResult<String>;
    fn get(&self, blob_ref: &str) -> PrismResult<Vec<u8>>;
    fn exists(&self, blob_ref: &str) -> PrismResult<bool>;
}

/// Digest `data` and return (canonical ref, hex digest).
pub(crate) fn sha256_ref(data: &[u8]) -> (String, String) {
    let digest = Sha256::digest(data);
    let hex = hex::encode(digest);
    (format!("sha256:{}", hex), hex)
}

/// Parse a blob ref into its lower-hex digest.
///
/// Accepts `"[scheme://]algo:hex"` with tolerant trimming; a bare hex string
/// is treated as sha256. Rejects other algorithms and digests of the wrong
/// length.
pub fn parse_blob_ref(blob_ref: &str) -> PrismResult<String> {
    let mut r = blob_ref.trim();
    r = r.strip_prefix("blob://").unwrap_or(r); // tolerate UI-ish refs
    if r.is_empty() {
        return Err(PrismError::InvalidBlobRef);
    }

    let (algo, hex_digest) = match r.find(':') {
        Some(i) => (r[..i].trim().to_ascii_lowercase(), r[i + 1..].trim()),
        None => ("sha256".to_string(), r),
    };

    if algo != "sha256" {
        return Err(PrismError::UnsupportedBlobAlgo);
    }
    let hex_digest = hex_digest.to_ascii_lowercase();
    if hex_digest.len() != HEX_DIGEST_LEN || hex::decode(&hex_digest).is_err() {
        return Err(PrismError::InvalidBlobRef);
    }
    Ok(hex_digest)
}

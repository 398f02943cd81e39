//! Content hashing shared by the store and the schema analyzer.

use pfasync_types::mapping::MappingRule;
use sha2::{Digest, Sha256};

/// Lowercase hex sha256 of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Content hash of a rule set. Rule order is significant.
///
/// # Errors
///
/// Returns an error if a rule cannot be encoded as JSON.
pub fn rules_hash(rules: &[MappingRule]) -> serde_json::Result<String> {
    let canonical = serde_json::to_vec(rules)?;
    Ok(sha256_hex(&canonical))
}

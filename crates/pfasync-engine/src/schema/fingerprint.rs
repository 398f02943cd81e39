//! Canonical field-set signatures.

use std::collections::BTreeSet;

use pfasync_state::hashing::sha256_hex;
use pfasync_types::batch::RawPayload;

/// Hex chars kept for a per-record schema version.
pub const SCHEMA_VERSION_LEN: usize = 12;

/// Sorted, de-duplicated top-level field names across `payloads`.
pub fn field_set<'a>(payloads: impl IntoIterator<Item = &'a RawPayload>) -> BTreeSet<String> {
    payloads
        .into_iter()
        .flat_map(|payload| payload.keys().cloned())
        .collect()
}

/// Hex sha256 of the newline-joined sorted field names.
pub fn fingerprint_fields(fields: &BTreeSet<String>) -> String {
    let joined = fields.iter().map(String::as_str).collect::<Vec<_>>().join("\n");
    sha256_hex(joined.as_bytes())
}

/// Fingerprint of a batch sample. Order and repetition of records do not matter.
pub fn batch_fingerprint<'a>(payloads: impl IntoIterator<Item = &'a RawPayload>) -> String {
    fingerprint_fields(&field_set(payloads))
}

/// Short fingerprint of a single record's own field set.
pub fn record_schema_version(payload: &RawPayload) -> String {
    let mut full = batch_fingerprint(std::iter::once(payload));
    full.truncate(SCHEMA_VERSION_LEN);
    full
}

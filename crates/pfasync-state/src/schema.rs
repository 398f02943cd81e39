//! Idempotent DDL for the record store.

/// Connection-level settings applied on every open.
pub const PRAGMAS: &str = r"
PRAGMA foreign_keys = ON;
PRAGMA busy_timeout = 5000;
";

/// Tables and indexes, safe to run against an existing database.
pub const CREATE_TABLES: &str = r"
CREATE TABLE IF NOT EXISTS batches (
    id TEXT PRIMARY KEY,
    endpoint_id TEXT NOT NULL,
    scope TEXT NOT NULL,
    sync_type TEXT NOT NULL,
    ingested_at TEXT NOT NULL,
    completed_at TEXT,
    record_count INTEGER NOT NULL DEFAULT 0,
    schema_fingerprint TEXT,
    warnings_json TEXT NOT NULL DEFAULT '[]',
    errors_json TEXT NOT NULL DEFAULT '[]'
);

CREATE INDEX IF NOT EXISTS idx_batches_endpoint ON batches (endpoint_id, ingested_at);

CREATE TABLE IF NOT EXISTS raw_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    batch_id TEXT NOT NULL REFERENCES batches(id),
    external_id TEXT NOT NULL,
    payload_json TEXT NOT NULL,
    ingested_at TEXT NOT NULL,
    schema_version TEXT NOT NULL,
    entity_type TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_raw_records_batch ON raw_records (batch_id, id);

CREATE TABLE IF NOT EXISTS sync_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    endpoint_id TEXT NOT NULL,
    batch_id TEXT NOT NULL UNIQUE REFERENCES batches(id),
    sync_type TEXT NOT NULL,
    status TEXT NOT NULL,
    phase TEXT NOT NULL,
    records_processed INTEGER NOT NULL DEFAULT 0,
    records_inserted INTEGER NOT NULL DEFAULT 0,
    records_updated INTEGER NOT NULL DEFAULT 0,
    records_unchanged INTEGER NOT NULL DEFAULT 0,
    records_deleted INTEGER NOT NULL DEFAULT 0,
    duration_ms INTEGER,
    error_message TEXT,
    retry_of INTEGER REFERENCES sync_runs(id),
    cancel_requested INTEGER NOT NULL DEFAULT 0,
    owner TEXT NOT NULL DEFAULT '',
    heartbeat_at TEXT NOT NULL,
    started_at TEXT NOT NULL,
    finished_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_sync_runs_status ON sync_runs (status);

CREATE TABLE IF NOT EXISTS endpoint_runs (
    endpoint_id TEXT PRIMARY KEY,
    active_run_id INTEGER REFERENCES sync_runs(id),
    lock_holder TEXT,
    locked_at TEXT,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS mapping_rules (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    endpoint_id TEXT NOT NULL,
    position INTEGER NOT NULL,
    source_field TEXT NOT NULL,
    destination_field TEXT NOT NULL,
    data_type TEXT NOT NULL,
    transform_type TEXT NOT NULL,
    transform_params_json TEXT NOT NULL DEFAULT '{}',
    default_value_json TEXT,
    is_active INTEGER NOT NULL DEFAULT 1,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_mapping_rules_endpoint ON mapping_rules (endpoint_id, position);

CREATE TABLE IF NOT EXISTS mapping_versions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    endpoint_id TEXT NOT NULL,
    captured_at TEXT NOT NULL,
    reason TEXT NOT NULL,
    rules_hash TEXT NOT NULL,
    rules_json TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_mapping_versions_endpoint ON mapping_versions (endpoint_id, id);

CREATE TABLE IF NOT EXISTS normalized_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    endpoint_id TEXT NOT NULL,
    scope TEXT NOT NULL,
    external_id TEXT NOT NULL,
    fields_json TEXT NOT NULL,
    last_seen_at TEXT NOT NULL,
    last_seen_batch_id TEXT NOT NULL REFERENCES batches(id),
    is_discontinued INTEGER NOT NULL DEFAULT 0,
    updated_at TEXT NOT NULL,
    UNIQUE (endpoint_id, scope, external_id)
);

CREATE INDEX IF NOT EXISTS idx_normalized_scope ON normalized_records (scope, is_discontinued);

CREATE TABLE IF NOT EXISTS lineage_edges (
    normalized_record_id INTEGER PRIMARY KEY REFERENCES normalized_records(id),
    raw_record_id INTEGER NOT NULL REFERENCES raw_records(id),
    batch_id TEXT NOT NULL REFERENCES batches(id),
    mapping_version_id INTEGER NOT NULL REFERENCES mapping_versions(id),
    transformed_at TEXT NOT NULL,
    transformed_by TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS lineage_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    normalized_record_id INTEGER NOT NULL REFERENCES normalized_records(id),
    raw_record_id INTEGER NOT NULL,
    batch_id TEXT NOT NULL,
    mapping_version_id INTEGER NOT NULL,
    transformed_at TEXT NOT NULL,
    transformed_by TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_lineage_log_record ON lineage_log (normalized_record_id, transformed_at);

CREATE TABLE IF NOT EXISTS dead_letters (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    batch_id TEXT NOT NULL REFERENCES batches(id),
    run_id INTEGER REFERENCES sync_runs(id),
    raw_record_id INTEGER REFERENCES raw_records(id),
    record_json TEXT NOT NULL,
    error_message TEXT NOT NULL,
    kind TEXT NOT NULL,
    failed_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_dead_letters_batch ON dead_letters (batch_id, id);
CREATE INDEX IF NOT EXISTS idx_dead_letters_raw ON dead_letters (batch_id, raw_record_id);
";

//! Typed configuration structs, deserialized from YAML with serde defaults.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use pfasync_types::ids::EndpointId;

/// Top-level ingest configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestConfig {
    pub version: String,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub resources: ResourceConfig,
    pub endpoints: Vec<EndpointConfig>,
}

impl IngestConfig {
    /// Look up an endpoint by id.
    pub fn endpoint(&self, id: &EndpointId) -> Option<&EndpointConfig> {
        self.endpoints.iter().find(|e| e.id == id.as_str())
    }
}

/// Record store location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateConfig {
    #[serde(default = "default_state_path")]
    pub path: PathBuf,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            path: default_state_path(),
        }
    }
}

fn default_state_path() -> PathBuf {
    PathBuf::from(".pfasync/state.db")
}

/// Bounds on retries, timeouts, chunking and sampling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceConfig {
    /// Retries after the first failed fetch of a page.
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub fetch_timeout_secs: u64,
    pub commit_chunk_size: u32,
    /// Fetched pages buffered ahead of the persister.
    pub page_channel_capacity: usize,
    pub fingerprint_sample_size: u32,
    pub drift_sample_size: u32,
    pub preview_sample_size: u32,
    /// A run or endpoint lock whose heartbeat is older than this is
    /// considered abandoned by recovery. Owners heartbeat at a third of it.
    pub run_lease_ms: u64,
}

impl ResourceConfig {
    pub fn run_lease(&self) -> Duration {
        Duration::from_millis(self.run_lease_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis((self.run_lease_ms / 3).max(10))
    }
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base_ms: 1_000,
            backoff_max_ms: 60_000,
            fetch_timeout_secs: 30,
            commit_chunk_size: 100,
            page_channel_capacity: 4,
            fingerprint_sample_size: 500,
            drift_sample_size: 500,
            preview_sample_size: 20,
            run_lease_ms: 30_000,
        }
    }
}

/// One ingestible endpoint of the external source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub id: String,
    pub entity_type: String,
    /// Natural-key scope (e.g. the owning organization).
    pub scope: String,
    #[serde(default = "default_key_field")]
    pub key_field: String,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    /// Known destination fields, offered as drift suggestion targets.
    #[serde(default)]
    pub destination_fields: Vec<String>,
    pub source: SourceConfig,
}

impl EndpointConfig {
    pub fn endpoint_id(&self) -> EndpointId {
        EndpointId::new(self.id.clone())
    }
}

fn default_key_field() -> String {
    "id".to_string()
}

fn default_page_size() -> u32 {
    50
}

/// Where an endpoint's pages come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceConfig {
    /// Offset/limit paginated JSON API.
    Http(HttpSourceConfig),
    /// JSON array or JSON-lines file, paged locally.
    File { path: PathBuf },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpSourceConfig {
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Sent as a bearer token when set.
    #[serde(default)]
    pub auth_token: Option<String>,
    /// Dotted path to the record array in the response body. The body
    /// itself must be the array when unset.
    #[serde(default)]
    pub records_path: Option<String>,
    #[serde(default = "default_limit_param")]
    pub limit_param: String,
    #[serde(default = "default_offset_param")]
    pub offset_param: String,
}

fn default_limit_param() -> String {
    "limit".to_string()
}

fn default_offset_param() -> String {
    "offset".to_string()
}

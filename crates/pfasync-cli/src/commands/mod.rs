pub mod bronze;
pub mod check;
pub mod drift;
pub mod lineage;
pub mod mappings;
pub mod orphans;
pub mod runs;
pub mod sync;

use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use pfasync_engine::config::parser;
use pfasync_engine::config::types::IngestConfig;
use pfasync_engine::config::validator;
use pfasync_engine::IngestService;

/// Parse and validate the ingest YAML at `path`.
pub fn load_config(path: &Path) -> Result<IngestConfig> {
    let config = parser::parse_config(path)
        .with_context(|| format!("Failed to parse config: {}", path.display()))?;
    validator::validate_config(&config)?;
    Ok(config)
}

/// Build a service backed by the configured record store.
pub fn open_service(path: &Path) -> Result<IngestService> {
    let config = load_config(path)?;
    let state_path = config.state.path.clone();
    IngestService::builder(config)
        .build()
        .with_context(|| format!("Failed to open record store: {}", state_path.display()))
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

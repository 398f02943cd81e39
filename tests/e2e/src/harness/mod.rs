use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use pfasync_engine::config::parser;
use pfasync_engine::config::validator;
use pfasync_engine::IngestService;
use pfasync_types::batch::SyncType;
use pfasync_types::ids::EndpointId;
use pfasync_types::run::SyncRun;
use serde_json::{json, Value};
use tempfile::TempDir;

pub const ENDPOINT: &str = "pfa.activities";
pub const SCOPE: &str = "org-e2e";

/// A scratch directory holding the record store and the source export.
pub struct HarnessContext {
    dir: TempDir,
    pub state_path: PathBuf,
    pub export_path: PathBuf,
}

pub fn bootstrap() -> Result<HarnessContext> {
    let dir = tempfile::tempdir().context("failed to create scratch dir")?;
    let state_path = dir.path().join("state.db");
    let export_path = dir.path().join("activities.json");
    std::fs::write(&export_path, "[]").context("failed to create empty export")?;
    Ok(HarnessContext {
        dir,
        state_path,
        export_path,
    })
}

impl HarnessContext {
    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Replace the source export with `records`.
    pub fn write_export(&self, records: &[Value]) -> Result<()> {
        let body = serde_json::to_string(records)?;
        std::fs::write(&self.export_path, body).context("failed to write export")
    }

    pub fn render_config(&self) -> String {
        format!(
            r#"
version: "1.0"
state:
  path: {state}
resources:
  max_retries: 1
  backoff_base_ms: 1
  backoff_max_ms: 2
  commit_chunk_size: 25
  run_lease_ms: 300
endpoints:
  - id: {ENDPOINT}
    entity_type: activity
    scope: {SCOPE}
    key_field: id
    page_size: 50
    destination_fields: [code, title, start_date, budget_amount, is_active]
    source:
      kind: file
      path: {export}
"#,
            state = self.state_path.display(),
            export = self.export_path.display(),
        )
    }

    /// Open a service the way the CLI does: parse, validate, build.
    /// Each call reopens the same database file.
    pub fn service(&self) -> Result<IngestService> {
        let config = parser::parse_config_str(&self.render_config())
            .context("failed to parse config")?;
        validator::validate_config(&config).context("failed to validate config")?;
        IngestService::builder(config)
            .build()
            .context("failed to open record store")
    }

    pub async fn run_sync(&self, service: &IngestService, sync_type: SyncType) -> Result<SyncRun> {
        let handle = service
            .start_ingestion(&EndpointId::new(ENDPOINT), sync_type)
            .await
            .context("failed to start sync")?;
        service
            .wait_for_run(handle.run_id)
            .await
            .context("failed to wait for sync")
    }
}

/// Activity `n` as the source system exports it.
pub fn activity(n: u32) -> Value {
    json!({
        "id": format!("PFA-{n}"),
        "Code": format!("A{n:04}"),
        "Activity Title": format!("Activity {n}"),
        "StartDate": format!("03/{:02}/2024", n % 28 + 1),
        "Budget": format!("${},000.50", n),
        "Active": if n % 2 == 0 { "Y" } else { "N" },
    })
}

pub fn activities(range: std::ops::RangeInclusive<u32>) -> Vec<Value> {
    range.map(activity).collect()
}

/// Rules mapping the export into the destination fields.
pub fn activity_rules() -> Value {
    json!([
        { "source_field": "Code", "destination_field": "code", "data_type": "string", "transform_type": "direct" },
        { "source_field": "Activity Title", "destination_field": "title", "data_type": "string",
          "transform_type": "custom", "transform_params": { "function": "trim" } },
        { "source_field": "StartDate", "destination_field": "start_date", "data_type": "date", "transform_type": "date" },
        { "source_field": "Budget", "destination_field": "budget_amount", "data_type": "float", "transform_type": "numeric" },
        { "source_field": "Active", "destination_field": "is_active", "data_type": "boolean",
          "transform_type": "boolean", "default_value": false }
    ])
}

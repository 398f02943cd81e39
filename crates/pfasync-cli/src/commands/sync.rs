use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use pfasync_engine::{IngestService, SyncHandle};
use pfasync_types::batch::SyncType;
use pfasync_types::ids::EndpointId;
use pfasync_types::run::SyncRun;

use super::{open_service, runs};

/// Execute the `sync` command: start a run and drive it to completion in this process.
pub async fn execute(config_path: &Path, endpoint: &str, delta: bool, watch: bool) -> Result<()> {
    let service = open_service(config_path)?;
    let sync_type = if delta { SyncType::Delta } else { SyncType::Full };

    let handle = service
        .start_ingestion(&EndpointId::new(endpoint), sync_type)
        .await?;
    println!(
        "Started {} sync of {}: run {}, batch {}",
        sync_type, handle.endpoint_id, handle.run_id, handle.batch_id
    );

    let run = finish(&service, &handle, watch).await?;
    runs::report(&run)
}

/// Wait for a run started by `service`, optionally printing progress while it runs.
pub(crate) async fn finish(service: &IngestService, handle: &SyncHandle, watch: bool) -> Result<SyncRun> {
    if !watch {
        return Ok(service.wait_for_run(handle.run_id).await?);
    }

    let wait = service.wait_for_run(handle.run_id);
    tokio::pin!(wait);
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            run = &mut wait => return Ok(run?),
            _ = ticker.tick() => {
                let progress = service.get_progress(&handle.batch_id).await?;
                println!(
                    "  [{}] processed={} inserted={} updated={} unchanged={} deleted={}",
                    progress.phase.as_str(),
                    progress.processed,
                    progress.inserted,
                    progress.updated,
                    progress.unchanged,
                    progress.deleted,
                );
            }
        }
    }
}

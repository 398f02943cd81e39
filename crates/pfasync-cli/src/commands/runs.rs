use std::path::Path;

use anyhow::{bail, Result};
use pfasync_types::ids::BatchId;
use pfasync_types::run::{RunStatus, SyncRun};

use super::{open_service, print_json, sync};

/// Print a finished run; fails the command when the run ended in error.
pub fn report(run: &SyncRun) -> Result<()> {
    let c = &run.counters;
    println!("Run {} finished: {}", run.id, run.status);
    println!("  Records processed: {}", c.records_processed);
    println!("  Inserted:          {}", c.records_inserted);
    println!("  Updated:           {}", c.records_updated);
    println!("  Unchanged:         {}", c.records_unchanged);
    println!("  Discontinued:      {}", c.records_deleted);
    if let Some(ms) = run.duration_ms {
        #[allow(clippy::cast_precision_loss)]
        let secs = ms as f64 / 1000.0;
        println!("  Duration:          {secs:.2}s");
    }

    match run.status {
        RunStatus::Error => bail!(
            "Sync failed: {}",
            run.error_message.as_deref().unwrap_or("unknown error")
        ),
        RunStatus::Cancelled => {
            println!("Batch {} left unsealed; retry it to fetch again.", run.batch_id);
            Ok(())
        }
        _ => Ok(()),
    }
}

pub async fn progress(config_path: &Path, batch: &str) -> Result<()> {
    let service = open_service(config_path)?;
    let progress = service.get_progress(&BatchId::new(batch)).await?;
    print_json(&progress)
}

pub async fn cancel(config_path: &Path, batch: &str) -> Result<()> {
    let service = open_service(config_path)?;
    let run = service.cancel_run(&BatchId::new(batch)).await?;
    println!(
        "Cancellation requested for run {} (batch {}); it stops at the next checkpoint.",
        run.id, run.batch_id
    );
    Ok(())
}

/// Execute the `retry` command. The new run executes in this process.
pub async fn retry(config_path: &Path, batch: &str) -> Result<()> {
    let service = open_service(config_path)?;
    let handle = service.retry_run(&BatchId::new(batch)).await?;
    println!(
        "Retrying batch {batch} as run {}, batch {}",
        handle.run_id, handle.batch_id
    );
    let run = sync::finish(&service, &handle, false).await?;
    report(&run)
}

pub async fn recommit(config_path: &Path, batch: &str) -> Result<()> {
    let service = open_service(config_path)?;
    let stats = service.recommit_batch(&BatchId::new(batch)).await?;
    print_json(&stats)
}

pub async fn recover(config_path: &Path) -> Result<()> {
    let service = open_service(config_path)?;
    let recovered = service.recover_interrupted().await?;
    if recovered.is_empty() {
        println!("No interrupted runs.");
    } else {
        for id in &recovered {
            println!("Marked run {id} as failed (interrupted)");
        }
    }
    Ok(())
}

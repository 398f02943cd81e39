use std::path::Path;

use anyhow::Result;
use pfasync_types::batch::HistoryFilter;
use pfasync_types::ids::{BatchId, EndpointId, Page};

use super::{open_service, print_json};

pub async fn history(
    config_path: &Path,
    endpoint: Option<String>,
    sealed_only: bool,
    limit: u32,
    offset: u32,
) -> Result<()> {
    let service = open_service(config_path)?;
    let filter = HistoryFilter {
        endpoint_id: endpoint.map(EndpointId::new),
        sync_type: None,
        sealed_only,
    };
    let batches = service.get_history(filter, Page::new(limit, offset)).await?;

    if batches.is_empty() {
        println!("No batches.");
        return Ok(());
    }
    for batch in &batches {
        let state = if batch.is_sealed() { "sealed" } else { "open" };
        println!(
            "{}  {:<20} {:<5} {:<6} {:>7} records  {}",
            batch.ingested_at.format("%Y-%m-%d %H:%M:%S"),
            batch.endpoint_id,
            batch.sync_type,
            state,
            batch.record_count,
            batch.id,
        );
    }
    Ok(())
}

pub async fn records(config_path: &Path, batch: &str, limit: u32, offset: u32) -> Result<()> {
    let service = open_service(config_path)?;
    let records = service
        .get_bronze_records(&BatchId::new(batch), Page::new(limit, offset))
        .await?;
    print_json(&records)
}

pub async fn dead_letters(config_path: &Path, batch: &str, limit: u32, offset: u32) -> Result<()> {
    let service = open_service(config_path)?;
    let letters = service
        .list_dead_letters(&BatchId::new(batch), Page::new(limit, offset))
        .await?;
    print_json(&letters)
}

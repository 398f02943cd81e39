use std::path::Path;

use anyhow::Result;

use super::{open_service, print_json};

pub async fn execute(config_path: &Path, record: i64, history: bool) -> Result<()> {
    let service = open_service(config_path)?;
    if history {
        print_json(&service.get_lineage_history(record).await?)
    } else {
        print_json(&service.get_lineage(record).await?)
    }
}

use std::path::Path;

use anyhow::Result;
use pfasync_types::ids::Page;

use super::{open_service, print_json};
use crate::OrphansCommand;

pub async fn execute(config_path: &Path, command: OrphansCommand) -> Result<()> {
    let service = open_service(config_path)?;
    match command {
        OrphansCommand::List { scope, limit, offset } => {
            let orphans = service.list_orphans(&scope, Page::new(limit, offset)).await?;
            print_json(&orphans)
        }
        OrphansCommand::Restore { ids } => {
            let restored = service.restore_orphans(ids).await?;
            println!("Restored {restored} record(s)");
            Ok(())
        }
    }
}

use std::path::Path;

use anyhow::{Context, Result};
use pfasync_engine::mapping::parse_rules;
use pfasync_types::ids::EndpointId;
use serde_json::Value;

use super::{open_service, print_json};
use crate::MappingsCommand;

/// Read a rule list from a JSON or YAML file.
fn read_rules_file(path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read rules file: {}", path.display()))?;
    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse rules file: {}", path.display()))
}

pub async fn execute(config_path: &Path, command: MappingsCommand) -> Result<()> {
    let service = open_service(config_path)?;
    match command {
        MappingsCommand::List { endpoint } => {
            let rules = service.list_mappings(&EndpointId::new(endpoint)).await?;
            print_json(&rules)
        }
        MappingsCommand::Save { endpoint, file } => {
            let raw = read_rules_file(&file)?;
            let saved = service.save_mappings_json(&EndpointId::new(&endpoint), &raw).await?;
            println!("Saved {saved} rule(s) for {endpoint}; the previous set was snapshotted.");
            Ok(())
        }
        MappingsCommand::Preview { endpoint, file } => {
            let raw = read_rules_file(&file)?;
            let rules = parse_rules(&raw)
                .map_err(|errors| anyhow::anyhow!("Invalid rules: {}", errors.join("; ")))?;
            let rows = service.preview_mapping(&EndpointId::new(endpoint), rules).await?;
            print_json(&rows)
        }
        MappingsCommand::Snapshot { endpoint } => {
            let snapshot = service.save_mapping_version(&EndpointId::new(endpoint)).await?;
            println!(
                "Saved mapping version {} ({} rule(s), hash {})",
                snapshot.id,
                snapshot.rules.len(),
                &snapshot.rules_hash[..snapshot.rules_hash.len().min(12)]
            );
            Ok(())
        }
        MappingsCommand::Versions { endpoint } => {
            let versions = service.list_mapping_versions(&EndpointId::new(endpoint)).await?;
            if versions.is_empty() {
                println!("No mapping versions.");
            }
            for v in &versions {
                println!(
                    "{:>5}  {}  {:<8} {:>3} rule(s)",
                    v.id,
                    v.captured_at.format("%Y-%m-%d %H:%M:%S"),
                    v.reason.as_str(),
                    v.rules.len()
                );
            }
            Ok(())
        }
        MappingsCommand::Show { version } => {
            let snapshot = service.get_mapping_version(version).await?;
            print_json(&snapshot)
        }
        MappingsCommand::Restore { endpoint, version } => {
            let outcome = service
                .restore_mapping_version(&EndpointId::new(endpoint), version)
                .await?;
            println!(
                "Restored {} rule(s) from version {version}; previous rules saved as version {}",
                outcome.restored, outcome.backup_snapshot_id
            );
            Ok(())
        }
    }
}

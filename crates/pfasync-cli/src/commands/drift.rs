use std::path::Path;

use anyhow::Result;
use pfasync_types::ids::EndpointId;

use super::open_service;

/// Execute the `drift` command: print field-level differences and rule suggestions.
pub async fn execute(config_path: &Path, endpoint: &str) -> Result<()> {
    let service = open_service(config_path)?;
    let report = service.get_schema_drift(&EndpointId::new(endpoint)).await?;

    if let Some(note) = &report.note {
        println!("{note}");
        return Ok(());
    }
    if report.is_clean() {
        println!("No drift between the two latest sealed batches.");
        return Ok(());
    }

    for field in &report.added {
        println!("+ {field}");
    }
    for field in &report.removed {
        println!("- {field}");
    }
    for change in &report.type_changed {
        println!("~ {}: {:?} -> {:?}", change.field, change.before, change.after);
    }
    if !report.suggestions.is_empty() {
        println!("\nSuggested rules:");
        for s in &report.suggestions {
            println!(
                "  {} -> {} ({}, {:?}, confidence {:.2})",
                s.rule.source_field,
                s.rule.destination_field,
                s.rule.transform_type,
                s.match_kind,
                s.confidence
            );
        }
    }
    Ok(())
}

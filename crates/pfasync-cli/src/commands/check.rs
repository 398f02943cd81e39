use std::path::Path;

use anyhow::Result;
use pfasync_engine::config::types::SourceConfig;
use pfasync_engine::source;
use pfasync_types::batch::HistoryFilter;
use pfasync_types::ids::Page;

use super::load_config;

/// Execute the `check` command: validate config, sources and the record store.
pub async fn execute(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    println!("Config structure:  OK");

    let mut ok = true;
    for endpoint in &config.endpoints {
        let label = format!("Endpoint {}:", endpoint.id);
        match source::from_config(endpoint, &config.resources) {
            Ok(src) => {
                let missing = match &endpoint.source {
                    SourceConfig::File { path } if !path.exists() => Some(path),
                    _ => None,
                };
                if let Some(path) = missing {
                    ok = false;
                    println!("{label:28} FAILED");
                    println!("  file not found: {}", path.display());
                } else {
                    println!("{label:28} OK ({})", src.describe());
                }
            }
            Err(err) => {
                ok = false;
                println!("{label:28} FAILED");
                println!("  {err:#}");
            }
        }
    }

    let state_path = config.state.path.clone();
    let store_ok = match pfasync_engine::IngestService::builder(config).build() {
        Ok(service) => service
            .get_history(HistoryFilter::default(), Page::first(1))
            .await
            .is_ok(),
        Err(err) => {
            println!("  {err}");
            false
        }
    };
    if store_ok {
        println!("Record store:      OK ({})", state_path.display());
    } else {
        println!("Record store:      FAILED ({})", state_path.display());
    }

    if ok && store_ok {
        println!("\nAll checks passed.");
        Ok(())
    } else {
        anyhow::bail!("One or more checks failed")
    }
}

//! Semantic validation for parsed ingest configuration values.

use std::collections::BTreeSet;

use anyhow::{bail, Result};

use crate::config::types::{EndpointConfig, IngestConfig, ResourceConfig, SourceConfig};

fn validate_resources(resources: &ResourceConfig, errors: &mut Vec<String>) {
    if resources.backoff_base_ms == 0 {
        errors.push("resources.backoff_base_ms must be > 0".to_string());
    }
    if resources.backoff_max_ms < resources.backoff_base_ms {
        errors.push("resources.backoff_max_ms must be >= backoff_base_ms".to_string());
    }
    if resources.fetch_timeout_secs == 0 {
        errors.push("resources.fetch_timeout_secs must be > 0".to_string());
    }
    if resources.run_lease_ms < 100 {
        errors.push("resources.run_lease_ms must be at least 100".to_string());
    }
    if resources.commit_chunk_size == 0 {
        errors.push("resources.commit_chunk_size must be at least 1".to_string());
    }
    if resources.page_channel_capacity == 0 {
        errors.push("resources.page_channel_capacity must be at least 1".to_string());
    }
    for (name, value) in [
        ("fingerprint_sample_size", resources.fingerprint_sample_size),
        ("drift_sample_size", resources.drift_sample_size),
        ("preview_sample_size", resources.preview_sample_size),
    ] {
        if value == 0 {
            errors.push(format!("resources.{name} must be at least 1"));
        }
    }
}

fn validate_endpoint(endpoint: &EndpointConfig, errors: &mut Vec<String>) {
    let context = format!("Endpoint '{}'", endpoint.id);
    if endpoint.id.trim().is_empty() {
        errors.push("Endpoint id must not be empty".to_string());
    }
    if endpoint.entity_type.trim().is_empty() {
        errors.push(format!("{context}: entity_type must not be empty"));
    }
    if endpoint.scope.trim().is_empty() {
        errors.push(format!("{context}: scope must not be empty"));
    }
    if endpoint.key_field.trim().is_empty() {
        errors.push(format!("{context}: key_field must not be empty"));
    }
    if endpoint.page_size == 0 || endpoint.page_size > 1_000 {
        errors.push(format!("{context}: page_size must be between 1 and 1000"));
    }
    match &endpoint.source {
        SourceConfig::Http(http) => {
            if !(http.url.starts_with("http://") || http.url.starts_with("https://")) {
                errors.push(format!("{context}: source url must be http(s), got '{}'", http.url));
            }
            if http.limit_param.trim().is_empty() || http.offset_param.trim().is_empty() {
                errors.push(format!("{context}: limit_param and offset_param must not be empty"));
            }
        }
        SourceConfig::File { path } => {
            if path.as_os_str().is_empty() {
                errors.push(format!("{context}: source path must not be empty"));
            }
        }
    }
}

/// Validate a parsed ingest configuration.
/// Returns `Ok(())` if valid, Err with all validation errors if not.
///
/// # Errors
///
/// Returns an error listing all validation failures found in the config.
pub fn validate_config(config: &IngestConfig) -> Result<()> {
    let mut errors = Vec::new();

    if config.version != "1.0" {
        errors.push(format!(
            "Unsupported config version '{}', expected '1.0'",
            config.version
        ));
    }

    validate_resources(&config.resources, &mut errors);

    if config.endpoints.is_empty() {
        errors.push("At least one endpoint must be defined".to_string());
    }

    let mut seen = BTreeSet::new();
    for endpoint in &config.endpoints {
        if !seen.insert(endpoint.id.as_str()) {
            errors.push(format!("Duplicate endpoint id '{}'", endpoint.id));
        }
        validate_endpoint(endpoint, &mut errors);
    }

    if !errors.is_empty() {
        bail!("Config validation failed:\n  - {}", errors.join("\n  - "));
    }

    Ok(())
}

//! Integration tests for config parsing and validation against fixture files.

use std::path::PathBuf;

use pfasync_engine::config::parser;
use pfasync_engine::config::types::SourceConfig;
use pfasync_engine::config::validator;
use pfasync_types::ids::EndpointId;

fn fixture(name: &str) -> PathBuf {
    std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .unwrap()
        .parent()
        .unwrap()
        .join("tests/fixtures/config")
        .join(name)
}

/// Test parsing and validating the well-formed ingest fixture.
#[test]
fn test_parse_and_validate_fixture_config() {
    std::env::set_var("TEST_PFA_TOKEN", "secret-token");

    let config = parser::parse_config(&fixture("ingest.yaml")).expect("fixture should parse");

    assert_eq!(config.version, "1.0");
    assert_eq!(config.endpoints.len(), 2);
    assert_eq!(config.resources.max_retries, 2);
    assert_eq!(config.resources.commit_chunk_size, 50);
    // Unset keys keep their defaults.
    assert_eq!(config.resources.fetch_timeout_secs, 30);

    let activities = config
        .endpoint(&EndpointId::new("pfa.activities"))
        .expect("activities endpoint");
    let SourceConfig::Http(http) = &activities.source else {
        panic!("expected http source");
    };
    assert_eq!(http.auth_token.as_deref(), Some("secret-token"));
    assert_eq!(http.records_path.as_deref(), Some("data.items"));
    assert_eq!(http.limit_param, "limit");

    let milestones = config
        .endpoint(&EndpointId::new("pfa.milestones"))
        .expect("milestones endpoint");
    assert_eq!(milestones.key_field, "id");
    assert_eq!(milestones.page_size, 50);

    validator::validate_config(&config).expect("validation should pass");

    std::env::remove_var("TEST_PFA_TOKEN");
}

/// Every problem in the invalid fixture is reported at once.
#[test]
fn test_invalid_fixture_lists_all_errors() {
    let config = parser::parse_config(&fixture("invalid.yaml")).expect("fixture should parse");
    let err = validator::validate_config(&config).unwrap_err().to_string();

    assert!(err.contains("Unsupported config version '2.0'"), "{err}");
    assert!(err.contains("commit_chunk_size must be at least 1"), "{err}");
    assert!(err.contains("scope must not be empty"), "{err}");
    assert!(err.contains("page_size must be between 1 and 1000"), "{err}");
    assert!(err.contains("source url must be http(s)"), "{err}");
}

#[test]
fn test_missing_env_var_is_named() {
    let yaml = std::fs::read_to_string(fixture("ingest.yaml")).unwrap();
    let yaml = yaml.replace("TEST_PFA_TOKEN", "PFASYNC_SURELY_UNSET_VAR");
    let err = parser::parse_config_str(&yaml).unwrap_err().to_string();
    assert!(err.contains("PFASYNC_SURELY_UNSET_VAR"), "{err}");
}

#[test]
fn test_missing_file_has_context() {
    let err = parser::parse_config(&fixture("does-not-exist.yaml")).unwrap_err();
    assert!(format!("{err:#}").contains("Failed to read config file"));
}

use tracing_subscriber::EnvFilter;

/// Crates whose events follow `--log-level`; everything else stays at `warn`
/// so HTTP and TLS internals do not flood debug output.
const PIPELINE_TARGETS: &[&str] = &["pfasync", "pfasync_engine", "pfasync_state"];

fn default_directives(log_level: &str) -> String {
    let mut directives = vec!["warn".to_string()];
    directives.extend(
        PIPELINE_TARGETS
            .iter()
            .map(|target| format!("{target}={log_level}")),
    );
    directives.join(",")
}

/// Initialize structured logging on stderr, keeping stdout for JSON output.
///
/// `RUST_LOG` wins when set; otherwise `log_level` applies to the pipeline
/// crates only.
pub fn init(log_level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directives(log_level)))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

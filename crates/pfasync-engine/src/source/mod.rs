//! Outbound page sources.
//!
//! A [`RecordSource`] only moves pages. Timeouts around each call, retry and
//! backoff belong to the orchestrator.

mod file;
mod http;
mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use pfasync_types::error::FetchError;

use crate::config::types::{EndpointConfig, ResourceConfig, SourceConfig};

pub use file::FileSource;
pub use http::HttpSource;
pub use memory::MemorySource;

/// Offset/limit window of one page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub offset: u64,
    pub limit: u32,
}

/// One page as returned by the source. Records are untyped until capture.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourcePage {
    pub records: Vec<Value>,
    pub has_more: bool,
}

impl SourcePage {
    /// A short page ends the listing.
    pub fn from_records(records: Vec<Value>, request: PageRequest) -> Self {
        let has_more = records.len() >= request.limit as usize;
        Self { records, has_more }
    }
}

/// Paginated reader over one endpoint of the external source.
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Fetch one page.
    ///
    /// # Errors
    ///
    /// Returns a classified [`FetchError`]; its `retryable` flag drives the
    /// orchestrator's retry decision.
    async fn fetch_page(&self, request: PageRequest) -> Result<SourcePage, FetchError>;

    /// Short human-readable origin, for logs.
    fn describe(&self) -> String;
}

/// Build the configured source of an endpoint.
///
/// # Errors
///
/// Returns an error if the HTTP client cannot be constructed.
pub fn from_config(
    endpoint: &EndpointConfig,
    resources: &ResourceConfig,
) -> anyhow::Result<Arc<dyn RecordSource>> {
    let source: Arc<dyn RecordSource> = match &endpoint.source {
        SourceConfig::Http(http) => Arc::new(HttpSource::new(http.clone(), resources)?),
        SourceConfig::File { path } => Arc::new(FileSource::new(path.clone())),
    };
    Ok(source)
}

/// Follow a dotted path (`data.items`) into nested objects.
pub(crate) fn lookup_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(value, |current, segment| current.as_object()?.get(segment))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn short_page_ends_listing() {
        let request = PageRequest {
            offset: 100,
            limit: 50,
        };
        let page = SourcePage::from_records(vec![json!({"id": 1}); 20], request);
        assert!(!page.has_more);
        let full = SourcePage::from_records(vec![json!({"id": 1}); 50], request);
        assert!(full.has_more);
    }

    #[test]
    fn lookup_path_walks_objects() {
        let body = json!({"data": {"items": [1, 2]}, "flat": 3});
        assert_eq!(lookup_path(&body, "data.items"), Some(&json!([1, 2])));
        assert_eq!(lookup_path(&body, "flat"), Some(&json!(3)));
        assert_eq!(lookup_path(&body, "data.missing"), None);
        assert_eq!(lookup_path(&body, "flat.deeper"), None);
    }
}

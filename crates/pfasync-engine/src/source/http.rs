use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, RETRY_AFTER};
use serde_json::Value;

use pfasync_types::error::FetchError;

use super::{lookup_path, PageRequest, RecordSource, SourcePage};
use crate::config::types::{HttpSourceConfig, ResourceConfig};

/// Offset/limit paginated JSON API over `reqwest`.
pub struct HttpSource {
    client: reqwest::Client,
    config: HttpSourceConfig,
}

impl HttpSource {
    /// Build a client with the configured headers and request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error for invalid header names or values, or if the
    /// client cannot be built.
    pub fn new(config: HttpSourceConfig, resources: &ResourceConfig) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            headers.insert(
                HeaderName::from_bytes(name.as_bytes())?,
                HeaderValue::from_str(value)?,
            );
        }
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(resources.fetch_timeout_secs))
            .connect_timeout(Duration::from_secs(resources.fetch_timeout_secs.min(10)))
            .build()?;
        Ok(Self { client, config })
    }

    fn classify(err: &reqwest::Error) -> FetchError {
        if err.is_timeout() {
            FetchError::timeout(err.to_string())
        } else if err.is_decode() {
            FetchError::decode(err.to_string())
        } else {
            FetchError::transient_network(err.to_string())
        }
    }

    fn retry_after_ms(headers: &HeaderMap) -> Option<u64> {
        headers
            .get(RETRY_AFTER)?
            .to_str()
            .ok()?
            .trim()
            .parse::<u64>()
            .ok()
            .map(|secs| secs.saturating_mul(1_000))
    }

    fn extract_page(&self, body: Value, request: PageRequest) -> Result<SourcePage, FetchError> {
        let records = match &self.config.records_path {
            Some(path) => lookup_path(&body, path).cloned().ok_or_else(|| {
                FetchError::decode(format!("response has no '{path}' field"))
            })?,
            None => body.clone(),
        };
        let Value::Array(records) = records else {
            return Err(FetchError::decode("record list is not a JSON array"));
        };
        let explicit = body.get("has_more").and_then(Value::as_bool);
        let mut page = SourcePage::from_records(records, request);
        if let Some(has_more) = explicit {
            page.has_more = has_more && !page.records.is_empty();
        }
        Ok(page)
    }
}

#[async_trait]
impl RecordSource for HttpSource {
    async fn fetch_page(&self, request: PageRequest) -> Result<SourcePage, FetchError> {
        let mut call = self.client.get(&self.config.url).query(&[
            (self.config.limit_param.as_str(), request.limit.to_string()),
            (self.config.offset_param.as_str(), request.offset.to_string()),
        ]);
        if let Some(token) = &self.config.auth_token {
            call = call.bearer_auth(token);
        }

        let response = call.send().await.map_err(|e| Self::classify(&e))?;
        let status = response.status();
        if !status.is_success() {
            let retry_after = Self::retry_after_ms(response.headers());
            let message = format!("{} returned {status}", self.config.url);
            let err = if status.as_u16() == 429 {
                FetchError::rate_limit(message, retry_after)
            } else {
                FetchError::from_status(status.as_u16(), message)
            };
            return Err(err);
        }

        let body: Value = response.json().await.map_err(|e| Self::classify(&e))?;
        self.extract_page(body, request)
    }

    fn describe(&self) -> String {
        format!("http {}", self.config.url)
    }
}

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use pfasync_types::error::FetchError;

use super::{PageRequest, RecordSource, SourcePage};

#[derive(Default)]
struct MemoryState {
    records: Vec<Value>,
    faults: VecDeque<FetchError>,
    delay: Option<Duration>,
    calls: u32,
}

/// In-process source with fault injection. Used by tests and demos.
#[derive(Default)]
pub struct MemorySource {
    state: Mutex<MemoryState>,
}

impl MemorySource {
    pub fn new(records: Vec<Value>) -> Self {
        Self {
            state: Mutex::new(MemoryState {
                records,
                ..MemoryState::default()
            }),
        }
    }

    /// Replace the listing served to later page requests.
    pub fn set_records(&self, records: Vec<Value>) {
        if let Ok(mut state) = self.state.lock() {
            state.records = records;
        }
    }

    /// Fail the next call with `err`. Queued faults fire in order.
    pub fn push_fault(&self, err: FetchError) {
        if let Ok(mut state) = self.state.lock() {
            state.faults.push_back(err);
        }
    }

    /// Sleep this long inside every call.
    pub fn set_delay(&self, delay: Duration) {
        if let Ok(mut state) = self.state.lock() {
            state.delay = Some(delay);
        }
    }

    /// Number of `fetch_page` calls so far, failed ones included.
    pub fn calls(&self) -> u32 {
        self.state.lock().map_or(0, |state| state.calls)
    }
}

#[async_trait]
impl RecordSource for MemorySource {
    async fn fetch_page(&self, request: PageRequest) -> Result<SourcePage, FetchError> {
        let (outcome, delay) = {
            let mut state = self
                .state
                .lock()
                .map_err(|_| FetchError::transient_network("memory source lock poisoned"))?;
            state.calls += 1;
            let outcome = match state.faults.pop_front() {
                Some(err) => Err(err),
                None => {
                    let start = usize::try_from(request.offset).unwrap_or(usize::MAX);
                    let records: Vec<Value> = state
                        .records
                        .iter()
                        .skip(start)
                        .take(request.limit as usize)
                        .cloned()
                        .collect();
                    Ok(SourcePage::from_records(records, request))
                }
            };
            (outcome, state.delay)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        outcome
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn records(n: usize) -> Vec<Value> {
        (1..=n).map(|i| json!({"id": format!("PFA-{i}")})).collect()
    }

    #[tokio::test]
    async fn serves_pages_in_order() {
        let source = MemorySource::new(records(120));
        let mut sizes = Vec::new();
        let mut offset = 0u64;
        loop {
            let page = source
                .fetch_page(PageRequest { offset, limit: 50 })
                .await
                .unwrap();
            sizes.push(page.records.len());
            offset += page.records.len() as u64;
            if !page.has_more {
                break;
            }
        }
        assert_eq!(sizes, vec![50, 50, 20]);
        assert_eq!(source.calls(), 3);
    }

    #[tokio::test]
    async fn faults_fire_once_each() {
        let source = MemorySource::new(records(3));
        source.push_fault(FetchError::server(503, "unavailable"));
        let request = PageRequest { offset: 0, limit: 10 };
        assert!(source.fetch_page(request).await.is_err());
        assert_eq!(source.fetch_page(request).await.unwrap().records.len(), 3);
    }

    #[tokio::test]
    async fn set_records_changes_listing() {
        let source = MemorySource::new(records(3));
        source.set_records(records(1));
        let page = source
            .fetch_page(PageRequest { offset: 0, limit: 10 })
            .await
            .unwrap();
        assert_eq!(page.records.len(), 1);
    }
}

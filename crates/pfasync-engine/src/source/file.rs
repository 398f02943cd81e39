use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;

use pfasync_types::error::FetchError;

use super::{PageRequest, RecordSource, SourcePage};

/// Local JSON array or JSON-lines file, paged in memory.
///
/// The file is re-read on every page so an export replaced between syncs
/// is picked up without restarting.
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn parse(content: &str) -> Result<Vec<Value>, FetchError> {
        if content.trim_start().starts_with('[') {
            return serde_json::from_str(content)
                .map_err(|e| FetchError::decode(format!("invalid JSON array: {e}")));
        }
        content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(i, line)| {
                serde_json::from_str(line)
                    .map_err(|e| FetchError::decode(format!("line {}: {e}", i + 1)))
            })
            .collect()
    }

    fn read_page(path: &Path, request: PageRequest) -> Result<SourcePage, FetchError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| FetchError::decode(format!("cannot read {}: {e}", path.display())))?;
        let records = Self::parse(&content)?;
        let start = usize::try_from(request.offset).unwrap_or(usize::MAX);
        let page: Vec<Value> = records
            .into_iter()
            .skip(start)
            .take(request.limit as usize)
            .collect();
        Ok(SourcePage::from_records(page, request))
    }
}

#[async_trait]
impl RecordSource for FileSource {
    async fn fetch_page(&self, request: PageRequest) -> Result<SourcePage, FetchError> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || Self::read_page(&path, request))
            .await
            .map_err(|e| FetchError::transient_network(format!("file read task failed: {e}")))?
    }

    fn describe(&self) -> String {
        format!("file {}", self.path.display())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[tokio::test]
    async fn pages_through_json_lines() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        for i in 1..=5 {
            writeln!(file, r#"{{"id": "PFA-{i}"}}"#).unwrap();
        }
        let source = FileSource::new(file.path().to_path_buf());

        let first = source
            .fetch_page(PageRequest { offset: 0, limit: 2 })
            .await
            .unwrap();
        assert_eq!(first.records.len(), 2);
        assert!(first.has_more);

        let last = source
            .fetch_page(PageRequest { offset: 4, limit: 2 })
            .await
            .unwrap();
        assert_eq!(last.records[0]["id"], "PFA-5");
        assert!(!last.has_more);
    }

    #[tokio::test]
    async fn reads_json_array() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"[{{"id": 1}}, {{"id": 2}}]"#).unwrap();
        let source = FileSource::new(file.path().to_path_buf());
        let page = source
            .fetch_page(PageRequest { offset: 0, limit: 10 })
            .await
            .unwrap();
        assert_eq!(page.records.len(), 2);
    }

    #[tokio::test]
    async fn bad_line_is_decode_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"id": 1}}"#).unwrap();
        writeln!(file, "not json").unwrap();
        let source = FileSource::new(file.path().to_path_buf());
        let err = source
            .fetch_page(PageRequest { offset: 0, limit: 10 })
            .await
            .unwrap_err();
        assert!(err.message.contains("line 2"));
        assert!(!err.retryable);
    }
}

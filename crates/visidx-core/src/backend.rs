//! Bulk backends.
//!
//! A [`BulkClient`] executes one bulk request and reports one
//! [`BulkItemResult`] per operation, in submission order. Status codes follow
//! the search backend's bulk API: 200/201 written, 404 not found, 409 version
//! conflict, 429 throttled, 5xx server trouble.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::BackendConfig;
use crate::document::Document;
use crate::error::BackendError;
use crate::operation::{BulkOperation, BulkRequestType};

pub const STATUS_OK: u16 = 200;
pub const STATUS_CREATED: u16 = 201;
pub const STATUS_NOT_FOUND: u16 = 404;
pub const STATUS_CONFLICT: u16 = 409;
pub const STATUS_TOO_MANY_REQUESTS: u16 = 429;

/// Outcome of a single operation within a bulk request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkItemResult {
    pub status: u16,
    pub error: Option<String>,
}

impl BulkItemResult {
    #[must_use]
    pub fn ok(status: u16) -> Self {
        Self {
            status,
            error: None,
        }
    }

    #[must_use]
    pub fn failed(status: u16, error: impl Into<String>) -> Self {
        Self {
            status,
            error: Some(error.into()),
        }
    }
}

/// Executes bulk requests against a search backend.
#[async_trait]
pub trait BulkClient: Send + Sync {
    async fn bulk(
        &self,
        operations: &[BulkOperation],
    ) -> Result<Vec<BulkItemResult>, BackendError>;
}

#[async_trait]
impl<T: BulkClient + ?Sized> BulkClient for std::sync::Arc<T> {
    async fn bulk(
        &self,
        operations: &[BulkOperation],
    ) -> Result<Vec<BulkItemResult>, BackendError> {
        (**self).bulk(operations).await
    }
}

// ---------------------------------------------------------------------------
// InMemoryIndex
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Entry {
    version: i64,
    /// `None` is a delete tombstone.
    doc: Option<Document>,
}

#[derive(Debug, Default)]
struct IndexState {
    indices: HashMap<String, BTreeMap<String, Entry>>,
    item_faults: VecDeque<u16>,
    request_faults: VecDeque<BackendError>,
    requests: u64,
}

/// In-process index with external-version semantics.
///
/// A write whose version does not exceed the stored version (document or
/// tombstone) is rejected with 409 and leaves the entry untouched.
#[derive(Debug, Default)]
pub struct InMemoryIndex {
    state: Mutex<IndexState>,
}

/// Live document as stored, for dumps and assertions.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub id: String,
    pub version: i64,
    pub doc: Document,
}

impl InMemoryIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, IndexState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Live document by id; tombstones read as absent.
    #[must_use]
    pub fn get(&self, index: &str, id: &str) -> Option<Document> {
        self.lock()
            .indices
            .get(index)
            .and_then(|docs| docs.get(id))
            .and_then(|entry| entry.doc.clone())
    }

    /// Stored version, including that of a tombstone.
    #[must_use]
    pub fn version(&self, index: &str, id: &str) -> Option<i64> {
        self.lock()
            .indices
            .get(index)
            .and_then(|docs| docs.get(id))
            .map(|entry| entry.version)
    }

    /// Live documents of one index, ordered by id.
    #[must_use]
    pub fn documents(&self, index: &str) -> Vec<StoredDocument> {
        self.lock()
            .indices
            .get(index)
            .map(|docs| {
                docs.iter()
                    .filter_map(|(id, entry)| {
                        entry.doc.as_ref().map(|doc| StoredDocument {
                            id: id.clone(),
                            version: entry.version,
                            doc: doc.clone(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of bulk requests received, including faulted ones.
    #[must_use]
    pub fn request_count(&self) -> u64 {
        self.lock().requests
    }

    /// The next `count` operations answer `status` without touching the index.
    pub fn fail_items(&self, status: u16, count: usize) {
        let mut state = self.lock();
        state.item_faults.extend(std::iter::repeat_n(status, count));
    }

    /// The next bulk request fails as a whole with `error`.
    pub fn fail_next_request(&self, error: BackendError) {
        self.lock().request_faults.push_back(error);
    }

    fn apply(docs: &mut BTreeMap<String, Entry>, op: &BulkOperation) -> BulkItemResult {
        let stored = docs.get(&op.id);
        if let Some(entry) = stored {
            if op.version <= entry.version {
                return BulkItemResult::failed(
                    STATUS_CONFLICT,
                    format!(
                        "version conflict, current version [{}] is higher or equal to the one provided [{}]",
                        entry.version, op.version
                    ),
                );
            }
        }
        let live = stored.is_some_and(|entry| entry.doc.is_some());

        match op.request_type {
            BulkRequestType::Index => {
                docs.insert(
                    op.id.clone(),
                    Entry {
                        version: op.version,
                        doc: Some(op.doc.clone().unwrap_or_default()),
                    },
                );
                BulkItemResult::ok(if live { STATUS_OK } else { STATUS_CREATED })
            }
            BulkRequestType::Delete => {
                // Tombstone even when absent, so older writes cannot resurrect it.
                docs.insert(
                    op.id.clone(),
                    Entry {
                        version: op.version,
                        doc: None,
                    },
                );
                if live {
                    BulkItemResult::ok(STATUS_OK)
                } else {
                    BulkItemResult::failed(STATUS_NOT_FOUND, "document missing")
                }
            }
        }
    }
}

#[async_trait]
impl BulkClient for InMemoryIndex {
    async fn bulk(
        &self,
        operations: &[BulkOperation],
    ) -> Result<Vec<BulkItemResult>, BackendError> {
        let mut state = self.lock();
        state.requests += 1;
        if let Some(err) = state.request_faults.pop_front() {
            return Err(err);
        }

        let mut results = Vec::with_capacity(operations.len());
        for op in operations {
            if let Some(status) = state.item_faults.pop_front() {
                results.push(BulkItemResult::failed(status, "injected failure"));
                continue;
            }
            let docs = state.indices.entry(op.index.clone()).or_default();
            results.push(Self::apply(docs, op));
        }
        Ok(results)
    }
}

// ---------------------------------------------------------------------------
// HttpBulkClient
// ---------------------------------------------------------------------------

/// Bulk client for an HTTP search endpoint (`POST <url>/_bulk`).
pub struct HttpBulkClient {
    client: Client,
    bulk_url: String,
    credentials: Option<(String, Option<String>)>,
}

#[derive(Debug, Deserialize)]
struct BulkResponse {
    #[serde(default)]
    items: Vec<HashMap<String, BulkResponseItem>>,
}

#[derive(Debug, Deserialize)]
struct BulkResponseItem {
    status: u16,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

impl HttpBulkClient {
    pub fn new(
        url: &str,
        username: Option<String>,
        password: Option<String>,
        timeout: Duration,
    ) -> Result<Self, BackendError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BackendError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            bulk_url: format!("{}/_bulk", url.trim_end_matches('/')),
            credentials: username.map(|user| (user, password)),
        })
    }

    /// Build from an `http` backend section; `None` for other kinds.
    pub fn from_config(config: &BackendConfig) -> Result<Option<Self>, BackendError> {
        match config {
            BackendConfig::Memory => Ok(None),
            BackendConfig::Http {
                url,
                username,
                password,
                timeout_ms,
            } => Self::new(
                url,
                username.clone(),
                password.clone(),
                Duration::from_millis(*timeout_ms),
            )
            .map(Some),
        }
    }

    #[must_use]
    pub fn bulk_url(&self) -> &str {
        &self.bulk_url
    }
}

/// Render operations as a bulk request body.
pub fn render_bulk_body(operations: &[BulkOperation]) -> Result<String, BackendError> {
    let mut body = String::new();
    for op in operations {
        let chunk = op
            .to_ndjson()
            .map_err(|e| BackendError::MalformedResponse(format!("cannot render {}: {e}", op.id)))?;
        body.push_str(&chunk);
    }
    Ok(body)
}

/// Map a bulk response body to per-operation results.
fn parse_bulk_response(body: &str, sent: usize) -> Result<Vec<BulkItemResult>, BackendError> {
    let response: BulkResponse =
        serde_json::from_str(body).map_err(|e| BackendError::MalformedResponse(e.to_string()))?;
    if response.items.len() != sent {
        return Err(BackendError::ItemCountMismatch {
            sent,
            received: response.items.len(),
        });
    }
    response
        .items
        .into_iter()
        .map(|item| -> Result<BulkItemResult, BackendError> {
            let (_, inner) = item.into_iter().next().ok_or_else(|| {
                BackendError::MalformedResponse("bulk item without action".to_string())
            })?;
            Ok(BulkItemResult {
                status: inner.status,
                error: inner.error.map(|e| e.to_string()),
            })
        })
        .collect()
}

#[async_trait]
impl BulkClient for HttpBulkClient {
    async fn bulk(
        &self,
        operations: &[BulkOperation],
    ) -> Result<Vec<BulkItemResult>, BackendError> {
        if operations.is_empty() {
            return Ok(Vec::new());
        }
        let body = render_bulk_body(operations)?;
        debug!(
            url = %self.bulk_url,
            batch_len = operations.len(),
            bytes = body.len(),
            "Sending bulk request"
        );

        let mut request = self
            .client
            .post(&self.bulk_url)
            .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
            .body(body);
        if let Some((user, password)) = &self.credentials {
            request = request.basic_auth(user, password.as_ref());
        }

        let response = request
            .send()
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;

        if status != StatusCode::OK {
            warn!(status = status.as_u16(), "Bulk request rejected");
            return Err(BackendError::Http {
                status: status.as_u16(),
                body: text,
            });
        }
        parse_bulk_response(&text, operations.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::FieldValue;
    use crate::operation::{DocumentIdentity, to_operation};

    const INDEX: &str = "visibility";

    fn index_op(wid: &str, version: i64, status: &str) -> BulkOperation {
        let mut doc = Document::new();
        doc.insert("ExecutionStatus", FieldValue::String(status.to_string()));
        to_operation(
            BulkRequestType::Index,
            INDEX,
            &DocumentIdentity::new(wid, "rid"),
            version,
            Some(doc),
        )
    }

    fn delete_op(wid: &str, version: i64) -> BulkOperation {
        to_operation(
            BulkRequestType::Delete,
            INDEX,
            &DocumentIdentity::new(wid, "rid"),
            version,
            None,
        )
    }

    #[tokio::test]
    async fn stale_version_is_a_conflict() {
        let index = InMemoryIndex::new();
        let results = index
            .bulk(&[index_op("wid", 20, "Completed"), index_op("wid", 10, "Running")])
            .await
            .unwrap();
        assert_eq!(results[0].status, STATUS_CREATED);
        assert_eq!(results[1].status, STATUS_CONFLICT);

        let doc = index.get(INDEX, "wid~rid").unwrap();
        assert_eq!(doc.get("ExecutionStatus").unwrap().as_str(), Some("Completed"));
        assert_eq!(index.version(INDEX, "wid~rid"), Some(20));
    }

    #[tokio::test]
    async fn equal_version_is_a_conflict() {
        let index = InMemoryIndex::new();
        index.bulk(&[index_op("wid", 5, "Running")]).await.unwrap();
        let results = index.bulk(&[index_op("wid", 5, "Running")]).await.unwrap();
        assert_eq!(results[0].status, STATUS_CONFLICT);
    }

    #[tokio::test]
    async fn newer_version_replaces() {
        let index = InMemoryIndex::new();
        let results = index
            .bulk(&[index_op("wid", 1, "Running"), index_op("wid", 2, "Completed")])
            .await
            .unwrap();
        assert_eq!(results[1].status, STATUS_OK);
        assert_eq!(index.documents(INDEX).len(), 1);
    }

    #[tokio::test]
    async fn tombstone_blocks_older_writes() {
        let index = InMemoryIndex::new();
        index.bulk(&[index_op("wid", 10, "Running")]).await.unwrap();
        let results = index
            .bulk(&[delete_op("wid", 30), index_op("wid", 20, "Completed")])
            .await
            .unwrap();
        assert_eq!(results[0].status, STATUS_OK);
        assert_eq!(results[1].status, STATUS_CONFLICT);
        assert!(index.get(INDEX, "wid~rid").is_none());
        assert_eq!(index.version(INDEX, "wid~rid"), Some(30));
        assert!(index.documents(INDEX).is_empty());
    }

    #[tokio::test]
    async fn deleting_unknown_document_is_not_found() {
        let index = InMemoryIndex::new();
        let results = index.bulk(&[delete_op("ghost", 3)]).await.unwrap();
        assert_eq!(results[0].status, STATUS_NOT_FOUND);
        let results = index.bulk(&[index_op("ghost", 2, "Running")]).await.unwrap();
        assert_eq!(results[0].status, STATUS_CONFLICT);
    }

    #[tokio::test]
    async fn injected_faults_are_consumed_in_order() {
        let index = InMemoryIndex::new();
        index.fail_next_request(BackendError::Transport("connection reset".into()));
        index.fail_items(503, 1);

        let err = index.bulk(&[index_op("a", 1, "Running")]).await.unwrap_err();
        assert!(err.is_transient());

        let results = index
            .bulk(&[index_op("a", 1, "Running"), index_op("b", 1, "Running")])
            .await
            .unwrap();
        assert_eq!(results[0].status, 503);
        assert_eq!(results[1].status, STATUS_CREATED);
        assert!(index.get(INDEX, "a~rid").is_none());
        assert_eq!(index.request_count(), 2);
    }

    #[test]
    fn bulk_body_is_ndjson() {
        let body = render_bulk_body(&[index_op("wid", 7, "Running"), delete_op("wid", 8)]).unwrap();
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with(r#"{"index":"#));
        assert_eq!(lines[1], r#"{"ExecutionStatus":"Running"}"#);
        assert!(lines[2].starts_with(r#"{"delete":"#));
        assert!(body.ends_with('\n'));
    }

    #[test]
    fn parses_bulk_response_items() {
        let body = r#"{
            "took": 3,
            "errors": true,
            "items": [
                {"index": {"_id": "a~r", "status": 201}},
                {"index": {"_id": "b~r", "status": 409, "error": {"type": "version_conflict_engine_exception"}}},
                {"delete": {"_id": "c~r", "status": 404}}
            ]
        }"#;
        let results = parse_bulk_response(body, 3).unwrap();
        assert_eq!(results[0], BulkItemResult::ok(201));
        assert_eq!(results[1].status, 409);
        assert!(results[1].error.as_deref().unwrap().contains("version_conflict"));
        assert_eq!(results[2].status, 404);
    }

    #[test]
    fn response_item_count_must_match() {
        let body = r#"{"items": [{"index": {"status": 201}}]}"#;
        assert_eq!(
            parse_bulk_response(body, 2).unwrap_err(),
            BackendError::ItemCountMismatch { sent: 2, received: 1 }
        );
        assert!(matches!(
            parse_bulk_response("not json", 1),
            Err(BackendError::MalformedResponse(_))
        ));
    }

    #[test]
    fn http_client_from_config() {
        assert!(HttpBulkClient::from_config(&BackendConfig::Memory).unwrap().is_none());
        let client = HttpBulkClient::from_config(&BackendConfig::Http {
            url: "http://localhost:9200/".to_string(),
            username: None,
            password: None,
            timeout_ms: 1000,
        })
        .unwrap()
        .unwrap();
        assert_eq!(client.bulk_url(), "http://localhost:9200/_bulk");
    }
}

//! Bulk operations, document identities and visibility task keys.
//!
//! Everything here is pure and total. A [`BulkOperation`] is what the batch
//! processor receives; a [`VisibilityTaskKey`] is the caller-supplied tag it
//! is submitted with.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::document::Document;

/// Separator between the two halves of identities and task keys.
pub const KEY_DELIMITER: char = '~';

/// Versioning mode the backend applies to `Version`.
pub const VERSION_TYPE_EXTERNAL: &str = "external";

// ---------------------------------------------------------------------------
// DocumentIdentity
// ---------------------------------------------------------------------------

/// Index document id of one workflow execution: `workflowId~runId`.
///
/// Each half may be empty on its own; `wid~`, `~rid` and `~` are all legal ids.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct DocumentIdentity {
    pub workflow_id: String,
    pub run_id: String,
}

impl DocumentIdentity {
    pub fn new(workflow_id: impl Into<String>, run_id: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            run_id: run_id.into(),
        }
    }

    /// Rendered document id.
    #[must_use]
    pub fn doc_id(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for DocumentIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{KEY_DELIMITER}{}", self.workflow_id, self.run_id)
    }
}

// ---------------------------------------------------------------------------
// VisibilityTaskKey
// ---------------------------------------------------------------------------

/// Correlation key the processor uses to deduplicate and track a submission.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VisibilityTaskKey(String);

impl VisibilityTaskKey {
    /// `shardId~taskId` for records that originate from a shard's task queue.
    #[must_use]
    pub fn for_task(shard_id: i32, task_id: i64) -> Self {
        Self(format!("{shard_id}{KEY_DELIMITER}{task_id}"))
    }

    /// Deletes carry no shard id; they are keyed by the document they remove.
    #[must_use]
    pub fn for_document(identity: &DocumentIdentity) -> Self {
        Self(identity.to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VisibilityTaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// BulkOperation
// ---------------------------------------------------------------------------

/// Kind of write a bulk operation performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BulkRequestType {
    Index,
    Delete,
}

impl BulkRequestType {
    /// Action name in the backend's bulk format.
    #[must_use]
    pub const fn action(self) -> &'static str {
        match self {
            Self::Index => "index",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for BulkRequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index => f.write_str("Index"),
            Self::Delete => f.write_str("Delete"),
        }
    }
}

/// One versioned write against the visibility index.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BulkOperation {
    #[serde(rename = "RequestType")]
    pub request_type: BulkRequestType,
    #[serde(rename = "Index")]
    pub index: String,
    #[serde(rename = "ID")]
    pub id: String,
    /// Originating task id; the backend drops writes that do not exceed the stored version.
    #[serde(rename = "Version")]
    pub version: i64,
    #[serde(rename = "Doc", skip_serializing_if = "Option::is_none")]
    pub doc: Option<Document>,
}

impl BulkOperation {
    #[must_use]
    pub fn is_delete(&self) -> bool {
        self.request_type == BulkRequestType::Delete
    }

    /// Bulk action metadata line.
    #[must_use]
    pub fn action_line(&self) -> serde_json::Value {
        json!({
            (self.request_type.action()): {
                "_index": self.index,
                "_id": self.id,
                "version": self.version,
                "version_type": VERSION_TYPE_EXTERNAL,
            }
        })
    }

    /// Newline-terminated bulk body fragment: action line, then the document
    /// line for index operations.
    pub fn to_ndjson(&self) -> serde_json::Result<String> {
        let mut out = serde_json::to_string(&self.action_line())?;
        out.push('\n');
        if !self.is_delete() {
            let empty = Document::new();
            let doc = self.doc.as_ref().unwrap_or(&empty);
            out.push_str(&serde_json::to_string(doc)?);
            out.push('\n');
        }
        Ok(out)
    }

    /// Rendered size in bytes, used for batch size accounting.
    #[must_use]
    pub fn estimated_size(&self) -> usize {
        self.to_ndjson().map_or(0, |s| s.len())
    }
}

/// Assemble a bulk operation.
///
/// Delete drops any document; Index without a document gets an empty body.
#[must_use]
pub fn to_operation(
    request_type: BulkRequestType,
    index_name: &str,
    identity: &DocumentIdentity,
    version: i64,
    document: Option<Document>,
) -> BulkOperation {
    let doc = match request_type {
        BulkRequestType::Index => Some(document.unwrap_or_default()),
        BulkRequestType::Delete => None,
    };
    BulkOperation {
        request_type,
        index: index_name.to_string(),
        id: identity.doc_id(),
        version,
        doc,
    }
}

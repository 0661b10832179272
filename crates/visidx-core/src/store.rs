//! Visibility store: the submission facade over a [`BulkProcessor`].
//!
//! Each call maps a lifecycle record to one versioned bulk operation, submits
//! it exactly once, and waits for the processor's acknowledgment. The store
//! keeps no state of its own and never retries; ordering between concurrent
//! calls for the same document is left to the operation version.

use tracing::{debug, warn};

use crate::document;
use crate::error::{EncodingError, Result, SubmissionError};
use crate::operation::{
    BulkOperation, BulkRequestType, DocumentIdentity, VisibilityTaskKey, to_operation,
};
use crate::processor::BulkProcessor;
use crate::record::{ClosedRecord, DeleteRecord, LifecycleRecord, StartedRecord};

/// A mapped record, ready to hand to a processor.
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub operation: BulkOperation,
    pub task_key: VisibilityTaskKey,
}

/// Map a record to its operation and task key without submitting it.
pub fn prepare(
    index_name: &str,
    record: &LifecycleRecord,
) -> std::result::Result<Submission, EncodingError> {
    match record {
        LifecycleRecord::Started(r) => prepare_started(index_name, r),
        LifecycleRecord::Closed(r) => prepare_closed(index_name, r),
        LifecycleRecord::Delete(r) => Ok(prepare_delete(index_name, r)),
    }
}

fn prepare_started(
    index_name: &str,
    record: &StartedRecord,
) -> std::result::Result<Submission, EncodingError> {
    let base = &record.base;
    let doc = document::build_started(record)?;
    let identity = DocumentIdentity::new(base.workflow_id.as_str(), base.run_id.as_str());
    Ok(Submission {
        operation: to_operation(
            BulkRequestType::Index,
            index_name,
            &identity,
            base.task_id,
            Some(doc),
        ),
        task_key: VisibilityTaskKey::for_task(base.shard_id, base.task_id),
    })
}

fn prepare_closed(
    index_name: &str,
    record: &ClosedRecord,
) -> std::result::Result<Submission, EncodingError> {
    let base = &record.base;
    let doc = document::build_closed(record)?;
    let identity = DocumentIdentity::new(base.workflow_id.as_str(), base.run_id.as_str());
    Ok(Submission {
        operation: to_operation(
            BulkRequestType::Index,
            index_name,
            &identity,
            base.task_id,
            Some(doc),
        ),
        task_key: VisibilityTaskKey::for_task(base.shard_id, base.task_id),
    })
}

fn prepare_delete(index_name: &str, record: &DeleteRecord) -> Submission {
    let identity = DocumentIdentity::new(record.workflow_id.as_str(), record.run_id.as_str());
    Submission {
        operation: to_operation(
            BulkRequestType::Delete,
            index_name,
            &identity,
            record.task_id,
            None,
        ),
        task_key: VisibilityTaskKey::for_document(&identity),
    }
}

/// Submission facade for workflow lifecycle records.
#[derive(Debug)]
pub struct VisibilityStore<P> {
    processor: P,
    index_name: String,
}

impl<P: BulkProcessor> VisibilityStore<P> {
    pub fn new(processor: P, index_name: impl Into<String>) -> Self {
        Self {
            processor,
            index_name: index_name.into(),
        }
    }

    #[must_use]
    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    #[must_use]
    pub fn processor(&self) -> &P {
        &self.processor
    }

    /// Index the document of a started execution.
    pub async fn record_started(&self, record: &StartedRecord) -> Result<()> {
        let submission = prepare_started(&self.index_name, record)?;
        self.submit(submission).await
    }

    /// Index the document of a closed execution, close-only fields included.
    pub async fn record_closed(&self, record: &ClosedRecord) -> Result<()> {
        let submission = prepare_closed(&self.index_name, record)?;
        self.submit(submission).await
    }

    /// Delete the document of an execution.
    pub async fn delete_workflow_execution(&self, record: &DeleteRecord) -> Result<()> {
        self.submit(prepare_delete(&self.index_name, record)).await
    }

    /// Dispatch on the record kind.
    pub async fn record(&self, record: &LifecycleRecord) -> Result<()> {
        match record {
            LifecycleRecord::Started(r) => self.record_started(r).await,
            LifecycleRecord::Closed(r) => self.record_closed(r).await,
            LifecycleRecord::Delete(r) => self.delete_workflow_execution(r).await,
        }
    }

    async fn submit(&self, submission: Submission) -> Result<()> {
        let Submission {
            operation,
            task_key,
        } = submission;
        let doc_id = operation.id.clone();
        debug!(
            doc_id = %doc_id,
            task_key = %task_key,
            version = operation.version,
            kind = %operation.request_type,
            "Submitting visibility operation"
        );

        match self.processor.add(operation, task_key.clone()).wait().await {
            Some(true) => Ok(()),
            Some(false) => {
                warn!(doc_id = %doc_id, task_key = %task_key, "Visibility operation not committed");
                Err(SubmissionError::Rejected {
                    doc_id,
                    task_key: task_key.to_string(),
                }
                .into())
            }
            None => {
                warn!(
                    doc_id = %doc_id,
                    task_key = %task_key,
                    "Visibility acknowledgment abandoned"
                );
                Err(SubmissionError::Abandoned {
                    doc_id,
                    task_key: task_key.to_string(),
                }
                .into())
            }
        }
    }
}

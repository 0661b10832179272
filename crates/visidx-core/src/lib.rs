//! visidx-core: Core library for visidx
//!
//! Turns workflow lifecycle records (started, closed, deleted) into versioned
//! bulk operations against a search index and reports a definite outcome for
//! each submission.
//!
//! # Architecture
//!
//! ```text
//! LifecycleRecord → Document Builder → Operation Constructor
//!                                            ↓
//!                  VisibilityStore ── add(op, task key) ──→ BulkProcessor
//!                        ↑                                       ↓
//!                        └────────── AckHandle (bool) ←── BulkClient
//! ```
//!
//! # Modules
//!
//! - `schema`: Reserved index field names
//! - `record`: Lifecycle record types
//! - `payload`: Custom search attribute payload decoding
//! - `document`: Sparse document builder
//! - `operation`: Bulk operations, document identities, task keys
//! - `store`: Submission facade
//! - `processor`: Acknowledgment handles and the batch processor
//! - `backend`: In-memory and HTTP bulk backends
//! - `retry`: Backoff policy for transient backend failures
//! - `config`: Configuration management
//! - `logging`: Structured logging setup
//!
//! # Safety
//!
//! This crate forbids unsafe code.

#![forbid(unsafe_code)]

pub mod backend;
pub mod config;
pub mod document;
pub mod error;
pub mod logging;
pub mod operation;
pub mod payload;
pub mod processor;
pub mod record;
pub mod retry;
pub mod schema;
pub mod store;

pub use document::{Document, FieldValue};
pub use error::{EncodingError, Error, Result, SubmissionError};
pub use operation::{BulkOperation, BulkRequestType, DocumentIdentity, VisibilityTaskKey};
pub use processor::{AckHandle, BatchProcessor, BulkProcessor};
pub use record::{ClosedRecord, DeleteRecord, LifecycleRecord, StartedRecord};
pub use store::VisibilityStore;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

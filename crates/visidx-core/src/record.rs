//! Lifecycle records: one workflow execution state transition each.
//!
//! A record is built by the caller per visibility event, consumed once by the
//! document builder, and dropped after its bulk operation has been handed to
//! the processor.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::payload::Payload;

/// Execution status as stored in the `ExecutionStatus` field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecutionStatus {
    #[default]
    Unspecified,
    Running,
    Completed,
    Failed,
    Canceled,
    Terminated,
    ContinuedAsNew,
    TimedOut,
}

impl ExecutionStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unspecified => "Unspecified",
            Self::Running => "Running",
            Self::Completed => "Completed",
            Self::Failed => "Failed",
            Self::Canceled => "Canceled",
            Self::Terminated => "Terminated",
            Self::ContinuedAsNew => "ContinuedAsNew",
            Self::TimedOut => "TimedOut",
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Serialization format of a memo blob.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EncodingType {
    #[default]
    Unspecified,
    Proto3,
    Json,
}

impl EncodingType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unspecified => "Unspecified",
            Self::Proto3 => "Proto3",
            Self::Json => "Json",
        }
    }
}

impl std::fmt::Display for EncodingType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque encoded bytes plus the label describing their encoding.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataBlob {
    pub encoding: EncodingType,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

impl DataBlob {
    pub fn new(data: impl Into<Vec<u8>>, encoding: EncodingType) -> Self {
        Self {
            encoding,
            data: data.into(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Custom search attributes keyed by attribute name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchAttributes {
    pub indexed_fields: BTreeMap<String, Payload>,
}

impl SearchAttributes {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, payload: Payload) -> Self {
        self.indexed_fields.insert(name.into(), payload);
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.indexed_fields.is_empty()
    }
}

/// Fields shared by started and closed records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisibilityRecordBase {
    pub namespace_id: String,
    pub workflow_id: String,
    pub run_id: String,
    pub workflow_type_name: String,
    pub start_time: Option<DateTime<Utc>>,
    pub execution_time: Option<DateTime<Utc>>,
    pub status: ExecutionStatus,
    pub task_queue: String,
    pub shard_id: i32,
    /// Assigned by the shard's event log; the only ordering signal the index sees.
    pub task_id: i64,
    pub memo: Option<DataBlob>,
    pub search_attributes: SearchAttributes,
}

/// A workflow execution was started.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StartedRecord {
    #[serde(flatten)]
    pub base: VisibilityRecordBase,
}

impl StartedRecord {
    pub fn new(base: VisibilityRecordBase) -> Self {
        Self { base }
    }
}

/// A workflow execution reached a terminal status.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClosedRecord {
    #[serde(flatten)]
    pub base: VisibilityRecordBase,
    #[serde(default)]
    pub close_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub history_length: i64,
}

/// A workflow execution's visibility document must be removed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeleteRecord {
    pub namespace_id: String,
    pub workflow_id: String,
    pub run_id: String,
    pub task_id: i64,
}

/// Any lifecycle transition the facade accepts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LifecycleRecord {
    Started(StartedRecord),
    Closed(ClosedRecord),
    Delete(DeleteRecord),
}

impl LifecycleRecord {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Started(_) => "started",
            Self::Closed(_) => "closed",
            Self::Delete(_) => "delete",
        }
    }

    #[must_use]
    pub fn workflow_id(&self) -> &str {
        match self {
            Self::Started(r) => &r.base.workflow_id,
            Self::Closed(r) => &r.base.workflow_id,
            Self::Delete(r) => &r.workflow_id,
        }
    }

    #[must_use]
    pub fn run_id(&self) -> &str {
        match self {
            Self::Started(r) => &r.base.run_id,
            Self::Closed(r) => &r.base.run_id,
            Self::Delete(r) => &r.run_id,
        }
    }

    #[must_use]
    pub fn task_id(&self) -> i64 {
        match self {
            Self::Started(r) => r.base.task_id,
            Self::Closed(r) => r.base.task_id,
            Self::Delete(r) => r.task_id,
        }
    }
}

impl From<StartedRecord> for LifecycleRecord {
    fn from(record: StartedRecord) -> Self {
        Self::Started(record)
    }
}

impl From<ClosedRecord> for LifecycleRecord {
    fn from(record: ClosedRecord) -> Self {
        Self::Closed(record)
    }
}

impl From<DeleteRecord> for LifecycleRecord {
    fn from(record: DeleteRecord) -> Self {
        Self::Delete(record)
    }
}

/// Standard base64 for byte fields in JSON, the way the search backend stores binary.
pub(crate) mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::de::Error as DeError;
    use serde::{Deserialize, Deserializer, Serializer};

    pub(crate) fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub(crate) fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded.as_bytes()).map_err(DeError::custom)
    }
}

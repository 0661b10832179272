//! Sparse visibility documents built from lifecycle records.
//!
//! The document is a plain field map. A field is written only when the record
//! carries a non-default value for it, so merging the document into an
//! existing index entry never overwrites stored data with nulls.

use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::ser::{SerializeSeq, Serializer};
use serde::Serialize;

use crate::error::EncodingError;
use crate::payload;
use crate::record::{
    ClosedRecord, ExecutionStatus, LifecycleRecord, SearchAttributes, StartedRecord,
    VisibilityRecordBase,
};
use crate::schema::{ReservedField, resolve};

// ---------------------------------------------------------------------------
// FieldValue
// ---------------------------------------------------------------------------

/// A single indexed value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    String(String),
    Int(i64),
    Double(f64),
    Bool(bool),
    /// Nanosecond precision, serialized as RFC 3339.
    Time(DateTime<Utc>),
    /// Serialized as standard base64, like any binary field of the backend.
    Bytes(Vec<u8>),
    KeywordList(Vec<String>),
}

impl FieldValue {
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_time(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Time(t) => Some(*t),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(b) => Some(b),
            _ => None,
        }
    }
}

/// Timestamp layout shared by documents and bulk bodies.
#[must_use]
pub fn format_time(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

impl Serialize for FieldValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::String(s) => serializer.serialize_str(s),
            Self::Int(i) => serializer.serialize_i64(*i),
            Self::Double(f) => serializer.serialize_f64(*f),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Time(t) => serializer.serialize_str(&format_time(t)),
            Self::Bytes(b) => serializer.serialize_str(&STANDARD.encode(b)),
            Self::KeywordList(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Document
// ---------------------------------------------------------------------------

/// Field name -> value. Ordered so that rendering is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Document {
    fields: BTreeMap<String, FieldValue>,
}

impl Document {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }

    /// Value of a reserved field, looked up under its resolved name.
    #[must_use]
    pub fn reserved(&self, field: ReservedField) -> Option<&FieldValue> {
        self.fields.get(resolve(field))
    }

    #[must_use]
    pub fn contains_key(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn insert(&mut self, field: impl Into<String>, value: FieldValue) -> Option<FieldValue> {
        self.fields.insert(field.into(), value)
    }

    /// JSON object body as sent to the backend.
    pub fn to_json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Accumulates only present values; every setter is a no-op on defaults.
#[derive(Debug, Default)]
struct SparseBuilder {
    doc: Document,
}

impl SparseBuilder {
    fn string(&mut self, field: ReservedField, value: &str) {
        if !value.is_empty() {
            self.doc
                .insert(resolve(field), FieldValue::String(value.to_string()));
        }
    }

    fn time(&mut self, field: ReservedField, value: Option<DateTime<Utc>>) {
        if let Some(ts) = value {
            self.doc.insert(resolve(field), FieldValue::Time(ts));
        }
    }

    fn int(&mut self, field: ReservedField, value: i64) {
        if value != 0 {
            self.doc.insert(resolve(field), FieldValue::Int(value));
        }
    }

    fn status(&mut self, status: ExecutionStatus) {
        if status != ExecutionStatus::Unspecified {
            self.string(ReservedField::ExecutionStatus, status.as_str());
        }
    }

    fn base(&mut self, base: &VisibilityRecordBase) -> Result<(), EncodingError> {
        self.string(ReservedField::NamespaceId, &base.namespace_id);
        self.string(ReservedField::WorkflowId, &base.workflow_id);
        self.string(ReservedField::RunId, &base.run_id);
        self.string(ReservedField::WorkflowType, &base.workflow_type_name);
        self.time(ReservedField::StartTime, base.start_time);
        self.time(ReservedField::ExecutionTime, base.execution_time);
        self.status(base.status);
        self.string(ReservedField::TaskQueue, &base.task_queue);

        // Memo and its encoding are written together or not at all.
        if let Some(memo) = base.memo.as_ref().filter(|m| !m.is_empty()) {
            self.doc
                .insert(resolve(ReservedField::Memo), FieldValue::Bytes(memo.data.clone()));
            self.doc.insert(
                resolve(ReservedField::MemoEncoding),
                FieldValue::String(memo.encoding.as_str().to_string()),
            );
        }

        self.search_attributes(&base.search_attributes)
    }

    fn search_attributes(&mut self, attrs: &SearchAttributes) -> Result<(), EncodingError> {
        for (name, encoded) in &attrs.indexed_fields {
            if let Some(value) = payload::decode(name, encoded)? {
                self.doc.insert(name.clone(), value);
            }
        }
        Ok(())
    }

    fn finish(self) -> Document {
        self.doc
    }
}

/// Document for a started execution.
pub fn build_started(record: &StartedRecord) -> Result<Document, EncodingError> {
    let mut builder = SparseBuilder::default();
    builder.base(&record.base)?;
    Ok(builder.finish())
}

/// Document for a closed execution, including close time and history length.
pub fn build_closed(record: &ClosedRecord) -> Result<Document, EncodingError> {
    let mut builder = SparseBuilder::default();
    builder.base(&record.base)?;
    builder.time(ReservedField::CloseTime, record.close_time);
    builder.int(ReservedField::HistoryLength, record.history_length);
    Ok(builder.finish())
}

/// Document for any lifecycle record; deletes have no body and yield `None`.
pub fn build(record: &LifecycleRecord) -> Result<Option<Document>, EncodingError> {
    match record {
        LifecycleRecord::Started(r) => build_started(r).map(Some),
        LifecycleRecord::Closed(r) => build_closed(r).map(Some),
        LifecycleRecord::Delete(_) => Ok(None),
    }
}

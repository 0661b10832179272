//! Property-based tests for the document builder.
//!
//! Verifies:
//! - Sparseness: a reserved key is present iff its source value is non-default
//! - No explicit nulls anywhere in the rendered body
//! - Memo and MemoEncoding appear together or not at all
//! - Close-only fields never appear on started documents
//! - String attributes are stored unquoted
//! - Builder idempotence

use chrono::{DateTime, TimeZone, Utc};
use proptest::prelude::*;

use visidx_core::document::{self, FieldValue};
use visidx_core::payload::Payload;
use visidx_core::record::{
    ClosedRecord, DataBlob, EncodingType, ExecutionStatus, SearchAttributes, StartedRecord,
    VisibilityRecordBase,
};
use visidx_core::schema::{self, ReservedField};

// ────────────────────────────────────────────────────────────────────
// Strategies
// ────────────────────────────────────────────────────────────────────

fn arb_text() -> impl Strategy<Value = String> {
    prop_oneof![Just(String::new()), "[a-zA-Z0-9_-]{1,16}"]
}

fn arb_time() -> impl Strategy<Value = Option<DateTime<Utc>>> {
    prop::option::of((0i64..4_000_000_000_000_000_000).prop_map(|ns| Utc.timestamp_nanos(ns)))
}

fn arb_status() -> impl Strategy<Value = ExecutionStatus> {
    prop_oneof![
        Just(ExecutionStatus::Unspecified),
        Just(ExecutionStatus::Running),
        Just(ExecutionStatus::Completed),
        Just(ExecutionStatus::Failed),
        Just(ExecutionStatus::Canceled),
        Just(ExecutionStatus::Terminated),
        Just(ExecutionStatus::ContinuedAsNew),
        Just(ExecutionStatus::TimedOut),
    ]
}

fn arb_memo() -> impl Strategy<Value = Option<DataBlob>> {
    prop::option::of(
        (
            prop::collection::vec(any::<u8>(), 0..32),
            prop_oneof![Just(EncodingType::Proto3), Just(EncodingType::Json)],
        )
            .prop_map(|(data, encoding)| DataBlob::new(data, encoding)),
    )
}

fn arb_attribute() -> impl Strategy<Value = Payload> {
    prop_oneof![
        "[ -~]{0,24}".prop_map(|s| Payload::string(&s)),
        any::<i64>().prop_map(Payload::int),
        any::<bool>().prop_map(Payload::boolean),
        prop::collection::vec("[a-z]{1,8}", 0..4).prop_map(|v| Payload::keyword_list(&v)),
        Just(Payload::null()),
    ]
}

fn arb_search_attributes() -> impl Strategy<Value = SearchAttributes> {
    prop::collection::btree_map("Custom[A-Z][a-z]{2,10}", arb_attribute(), 0..5)
        .prop_map(|indexed_fields| SearchAttributes { indexed_fields })
}

fn arb_base() -> impl Strategy<Value = VisibilityRecordBase> {
    (
        (arb_text(), arb_text(), arb_text(), arb_text()),
        (arb_time(), arb_time(), arb_status(), arb_text()),
        (any::<i32>(), any::<i64>(), arb_memo(), arb_search_attributes()),
    )
        .prop_map(
            |(
                (namespace_id, workflow_id, run_id, workflow_type_name),
                (start_time, execution_time, status, task_queue),
                (shard_id, task_id, memo, search_attributes),
            )| VisibilityRecordBase {
                namespace_id,
                workflow_id,
                run_id,
                workflow_type_name,
                start_time,
                execution_time,
                status,
                task_queue,
                shard_id,
                task_id,
                memo,
                search_attributes,
            },
        )
}

fn arb_closed() -> impl Strategy<Value = ClosedRecord> {
    (arb_base(), arb_time(), prop_oneof![Just(0i64), 1i64..100_000]).prop_map(
        |(base, close_time, history_length)| ClosedRecord {
            base,
            close_time,
            history_length,
        },
    )
}

fn contains_null(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Null => true,
        serde_json::Value::Array(items) => items.iter().any(contains_null),
        serde_json::Value::Object(map) => map.values().any(contains_null),
        _ => false,
    }
}

// ────────────────────────────────────────────────────────────────────
// Properties
// ────────────────────────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// String fields are present exactly when non-empty.
    #[test]
    fn prop_string_fields_are_sparse(base in arb_base()) {
        let doc = document::build_started(&StartedRecord::new(base.clone())).unwrap();
        for (field, source) in [
            (ReservedField::NamespaceId, &base.namespace_id),
            (ReservedField::WorkflowId, &base.workflow_id),
            (ReservedField::RunId, &base.run_id),
            (ReservedField::WorkflowType, &base.workflow_type_name),
            (ReservedField::TaskQueue, &base.task_queue),
        ] {
            prop_assert_eq!(doc.reserved(field).is_some(), !source.is_empty(), "field {}", field);
        }
        prop_assert_eq!(doc.contains_key(schema::START_TIME), base.start_time.is_some());
        prop_assert_eq!(doc.contains_key(schema::EXECUTION_TIME), base.execution_time.is_some());
        prop_assert_eq!(
            doc.contains_key(schema::EXECUTION_STATUS),
            base.status != ExecutionStatus::Unspecified
        );
    }

    /// The rendered body never holds an explicit null.
    #[test]
    fn prop_no_nulls(record in arb_closed()) {
        let json = document::build_closed(&record).unwrap().to_json().unwrap();
        prop_assert!(json.is_object());
        prop_assert!(!contains_null(&json), "null in {}", json);
    }

    /// Memo and its encoding label travel together.
    #[test]
    fn prop_memo_keys_paired(base in arb_base()) {
        let expect = base.memo.as_ref().is_some_and(|m| !m.is_empty());
        let doc = document::build_started(&StartedRecord::new(base)).unwrap();
        prop_assert_eq!(doc.contains_key(schema::MEMO), expect);
        prop_assert_eq!(doc.contains_key(schema::MEMO_ENCODING), expect);
    }

    /// Started documents never carry close-only fields.
    #[test]
    fn prop_started_has_no_close_fields(base in arb_base()) {
        let doc = document::build_started(&StartedRecord::new(base)).unwrap();
        for field in ReservedField::ALL.into_iter().filter(|f| f.is_close_only()) {
            prop_assert!(doc.reserved(field).is_none());
        }
    }

    /// Closed documents carry close time and history length when set.
    #[test]
    fn prop_closed_fields_follow_source(record in arb_closed()) {
        let doc = document::build_closed(&record).unwrap();
        prop_assert_eq!(doc.contains_key(schema::CLOSE_TIME), record.close_time.is_some());
        prop_assert_eq!(doc.contains_key(schema::HISTORY_LENGTH), record.history_length != 0);
        if let Some(ts) = record.close_time {
            prop_assert_eq!(doc.get(schema::CLOSE_TIME).and_then(FieldValue::as_time), Some(ts));
        }
    }

    /// Quoted string payloads are stored as the bare string.
    #[test]
    fn prop_string_attribute_unquoted(value in "[ -~]{0,32}") {
        let base = VisibilityRecordBase {
            search_attributes: SearchAttributes::new()
                .with("CustomStringField", Payload::string(&value)),
            ..VisibilityRecordBase::default()
        };
        let doc = document::build_started(&StartedRecord::new(base)).unwrap();
        prop_assert_eq!(doc.get("CustomStringField"), Some(&FieldValue::String(value)));
    }

    /// Building twice yields identical documents.
    #[test]
    fn prop_builder_idempotent(record in arb_closed()) {
        let first = document::build_closed(&record).unwrap();
        let second = document::build_closed(&record).unwrap();
        prop_assert_eq!(first, second);
    }

    /// Custom attributes keep their caller-given names; null payloads are dropped.
    #[test]
    fn prop_custom_attribute_names_verbatim(attrs in arb_search_attributes()) {
        let base = VisibilityRecordBase {
            search_attributes: attrs.clone(),
            ..VisibilityRecordBase::default()
        };
        let doc = document::build_started(&StartedRecord::new(base)).unwrap();
        for (name, payload) in &attrs.indexed_fields {
            let is_null = payload.encoding() == Some(visidx_core::payload::ENCODING_NULL);
            prop_assert_eq!(doc.contains_key(name), !is_null, "attribute {}", name);
        }
        prop_assert_eq!(
            doc.len(),
            attrs
                .indexed_fields
                .values()
                .filter(|p| p.encoding() != Some(visidx_core::payload::ENCODING_NULL))
                .count()
        );
    }
}

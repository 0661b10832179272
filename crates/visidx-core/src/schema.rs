//! Reserved field names of the visibility index.
//!
//! Every system-maintained value of a workflow execution is written under a
//! fixed index field name. Custom search attributes are not resolved here:
//! their caller-given names are used verbatim, and callers are expected to
//! have rejected collisions with the names below before a record reaches the
//! document builder.

// ---------------------------------------------------------------------------
// Index field names
// ---------------------------------------------------------------------------

pub const NAMESPACE_ID: &str = "NamespaceId";
pub const WORKFLOW_ID: &str = "WorkflowId";
pub const RUN_ID: &str = "RunId";
pub const WORKFLOW_TYPE: &str = "WorkflowType";
pub const START_TIME: &str = "StartTime";
pub const EXECUTION_TIME: &str = "ExecutionTime";
pub const CLOSE_TIME: &str = "CloseTime";
pub const EXECUTION_STATUS: &str = "ExecutionStatus";
pub const TASK_QUEUE: &str = "TaskQueue";
pub const MEMO: &str = "Memo";
pub const MEMO_ENCODING: &str = "MemoEncoding";
pub const HISTORY_LENGTH: &str = "HistoryLength";

// ---------------------------------------------------------------------------
// ReservedField
// ---------------------------------------------------------------------------

/// Closed set of system fields a lifecycle record can populate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ReservedField {
    NamespaceId,
    WorkflowId,
    RunId,
    WorkflowType,
    StartTime,
    ExecutionTime,
    CloseTime,
    ExecutionStatus,
    TaskQueue,
    Memo,
    MemoEncoding,
    HistoryLength,
}

impl ReservedField {
    /// All reserved fields, in index-layout order.
    pub const ALL: [Self; 12] = [
        Self::NamespaceId,
        Self::WorkflowId,
        Self::RunId,
        Self::WorkflowType,
        Self::StartTime,
        Self::ExecutionTime,
        Self::CloseTime,
        Self::ExecutionStatus,
        Self::TaskQueue,
        Self::Memo,
        Self::MemoEncoding,
        Self::HistoryLength,
    ];

    /// Index field name this field is stored under.
    #[must_use]
    pub const fn index_name(self) -> &'static str {
        match self {
            Self::NamespaceId => NAMESPACE_ID,
            Self::WorkflowId => WORKFLOW_ID,
            Self::RunId => RUN_ID,
            Self::WorkflowType => WORKFLOW_TYPE,
            Self::StartTime => START_TIME,
            Self::ExecutionTime => EXECUTION_TIME,
            Self::CloseTime => CLOSE_TIME,
            Self::ExecutionStatus => EXECUTION_STATUS,
            Self::TaskQueue => TASK_QUEUE,
            Self::Memo => MEMO,
            Self::MemoEncoding => MEMO_ENCODING,
            Self::HistoryLength => HISTORY_LENGTH,
        }
    }

    /// Reverse lookup from an index field name.
    #[must_use]
    pub fn from_index_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|field| field.index_name() == name)
    }

    /// Fields only a closed execution carries.
    #[must_use]
    pub const fn is_close_only(self) -> bool {
        matches!(self, Self::CloseTime | Self::HistoryLength)
    }
}

impl std::fmt::Display for ReservedField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.index_name())
    }
}

/// Resolve a reserved field to its index field name.
#[must_use]
pub const fn resolve(field: ReservedField) -> &'static str {
    field.index_name()
}

/// Whether `name` is one of the reserved index field names.
#[must_use]
pub fn is_reserved(name: &str) -> bool {
    ReservedField::from_index_name(name).is_some()
}

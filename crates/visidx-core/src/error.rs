//! Error types for visidx-core

use thiserror::Error;

/// Result type alias using the library's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for visidx-core
#[derive(Error, Debug)]
pub enum Error {
    /// A custom search attribute could not be decoded while building the document
    #[error("Mapping error: {0}")]
    Encoding(#[from] EncodingError),

    /// The batch processor did not commit the operation
    #[error("Submission error: {0}")]
    Submission(#[from] SubmissionError),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Backend transport or protocol errors
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    /// Logging initialization errors
    #[error("Logging error: {0}")]
    Logging(#[from] crate::logging::LogError),
}

impl Error {
    /// Pipeline stage that produced the error.
    #[must_use]
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Encoding(_) => "mapping",
            Self::Submission(_) => "submission",
            Self::Config(_) => "config",
            Self::Backend(_) => "backend",
            Self::Logging(_) => "logging",
        }
    }
}

/// Custom search attribute decoding errors.
///
/// Every variant names the attribute so the caller can tell which field of the
/// record was malformed.
#[derive(Error, Debug)]
pub enum EncodingError {
    /// Payload metadata carries no `encoding` entry
    #[error("search attribute {attribute}: payload has no encoding metadata")]
    MissingEncoding { attribute: String },

    /// Payload declares an encoding this mapper cannot decode
    #[error("search attribute {attribute}: unsupported payload encoding {encoding:?}")]
    UnsupportedEncoding { attribute: String, encoding: String },

    /// `json/plain` payload is not valid JSON
    #[error("search attribute {attribute}: invalid JSON payload: {source}")]
    InvalidJson {
        attribute: String,
        #[source]
        source: serde_json::Error,
    },

    /// Decoded value does not match the declared attribute type
    #[error("search attribute {attribute}: expected {expected}, found {found}")]
    TypeMismatch {
        attribute: String,
        expected: &'static str,
        found: &'static str,
    },

    /// Datetime attribute is not RFC 3339
    #[error("search attribute {attribute}: invalid datetime {value:?}")]
    InvalidDatetime { attribute: String, value: String },

    /// Declared attribute type is not known
    #[error("search attribute {attribute}: unknown value type {value_type:?}")]
    UnknownValueType {
        attribute: String,
        value_type: String,
    },

    /// JSON value has no scalar representation (objects, mixed arrays)
    #[error("search attribute {attribute}: {found} cannot be indexed")]
    UnsupportedShape {
        attribute: String,
        found: &'static str,
    },
}

impl EncodingError {
    /// Name of the attribute that failed to decode.
    #[must_use]
    pub fn attribute(&self) -> &str {
        match self {
            Self::MissingEncoding { attribute }
            | Self::UnsupportedEncoding { attribute, .. }
            | Self::InvalidJson { attribute, .. }
            | Self::TypeMismatch { attribute, .. }
            | Self::InvalidDatetime { attribute, .. }
            | Self::UnknownValueType { attribute, .. }
            | Self::UnsupportedShape { attribute, .. } => attribute,
        }
    }
}

/// Outcome errors reported by the submission facade.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubmissionError {
    /// The processor resolved the acknowledgment with a failure
    #[error("bulk operation for document {doc_id} (task {task_key}) was not committed")]
    Rejected { doc_id: String, task_key: String },

    /// The acknowledgment was dropped before it resolved
    #[error("acknowledgment for document {doc_id} (task {task_key}) was abandoned")]
    Abandoned { doc_id: String, task_key: String },
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("Failed to read config file {0}: {1}")]
    ReadFailed(String, String),

    /// Config file is not valid TOML or has wrong field types
    #[error("Failed to parse config: {0}")]
    ParseFailed(String),

    /// Config parsed but violates a constraint
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// Config could not be rendered back to TOML
    #[error("Failed to serialize config: {0}")]
    SerializeFailed(String),
}

/// Errors from a bulk backend call as a whole (per-item failures are reported
/// through [`crate::backend::BulkItemResult`] instead).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// Connection, DNS, TLS or timeout failure
    #[error("transport failure: {0}")]
    Transport(String),

    /// Non-success HTTP status for the whole bulk request
    #[error("bulk request failed with HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// Response body could not be interpreted
    #[error("malformed bulk response: {0}")]
    MalformedResponse(String),

    /// Backend answered with a different number of items than submitted
    #[error("bulk response has {received} items for {sent} operations")]
    ItemCountMismatch { sent: usize, received: usize },
}

impl BackendError {
    /// Whether resubmitting the same batch may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Http { status, .. } => {
                *status == crate::backend::STATUS_TOO_MANY_REQUESTS || *status >= 500
            }
            Self::MalformedResponse(_) => false,
            Self::ItemCountMismatch { .. } => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_names_distinguish_mapping_and_submission() {
        let mapping: Error = EncodingError::MissingEncoding {
            attribute: "CustomKeywordField".to_string(),
        }
        .into();
        let submission: Error = SubmissionError::Rejected {
            doc_id: "wid~rid".to_string(),
            task_key: "1~2".to_string(),
        }
        .into();

        assert_eq!(mapping.stage(), "mapping");
        assert_eq!(submission.stage(), "submission");
        assert!(mapping.to_string().starts_with("Mapping error"));
        assert!(submission.to_string().contains("wid~rid"));
    }

    #[test]
    fn encoding_error_exposes_attribute() {
        let err = EncodingError::TypeMismatch {
            attribute: "CustomIntField".to_string(),
            expected: "integer",
            found: "string",
        };
        assert_eq!(err.attribute(), "CustomIntField");
        assert_eq!(
            err.to_string(),
            "search attribute CustomIntField: expected integer, found string"
        );
    }

    #[test]
    fn backend_transience() {
        assert!(BackendError::Transport("reset".into()).is_transient());
        assert!(
            BackendError::Http {
                status: crate::backend::STATUS_TOO_MANY_REQUESTS,
                body: String::new()
            }
            .is_transient()
        );
        assert!(
            BackendError::Http {
                status: 503,
                body: String::new()
            }
            .is_transient()
        );
        assert!(
            !BackendError::Http {
                status: 400,
                body: String::new()
            }
            .is_transient()
        );
        assert!(!BackendError::ItemCountMismatch { sent: 2, received: 1 }.is_transient());
    }
}

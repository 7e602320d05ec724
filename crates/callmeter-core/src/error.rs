//! Shared error type across callmeter crates.

use thiserror::Error;

/// Stable error codes (asserted by tests and surfaced by the server).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Same metric name registered with a different kind, labels or buckets.
    SchemaConflict,
    /// Metric or label name is not a valid identifier.
    InvalidName,
    /// Histogram bucket boundaries are malformed.
    InvalidBuckets,
    /// Wrong number of label values for a family.
    LabelCardinality,
    /// Value rejected by the metric kind (e.g. negative counter increment).
    InvalidValue,
    /// Exposition text could not be parsed.
    MalformedExposition,
    /// Configuration failed to parse or validate.
    InvalidConfig,
    /// Unsupported configuration version.
    UnsupportedVersion,
    /// Internal error.
    Internal,
}

impl ErrorCode {
    /// String representation used in logs and HTTP responses.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::SchemaConflict => "SCHEMA_CONFLICT",
            ErrorCode::InvalidName => "INVALID_NAME",
            ErrorCode::InvalidBuckets => "INVALID_BUCKETS",
            ErrorCode::LabelCardinality => "LABEL_CARDINALITY",
            ErrorCode::InvalidValue => "INVALID_VALUE",
            ErrorCode::MalformedExposition => "MALFORMED_EXPOSITION",
            ErrorCode::InvalidConfig => "INVALID_CONFIG",
            ErrorCode::UnsupportedVersion => "UNSUPPORTED_VERSION",
            ErrorCode::Internal => "INTERNAL",
        }
    }
}

/// Shared result type.
pub type Result<T> = std::result::Result<T, MetricsError>;

/// Unified error type used by core and server.
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("schema conflict for metric {name}: {reason}")]
    SchemaConflict { name: String, reason: String },
    #[error("invalid metric name: {0}")]
    InvalidName(String),
    #[error("invalid label name {label} on metric {name}")]
    InvalidLabelName { name: String, label: String },
    #[error("invalid buckets for metric {name}: {reason}")]
    InvalidBuckets { name: String, reason: String },
    #[error("metric {name} expects {expected} label values, got {got}")]
    LabelCardinality {
        name: String,
        expected: usize,
        got: usize,
    },
    #[error("invalid value for metric {name}: {value}")]
    InvalidValue { name: String, value: f64 },
    #[error("malformed exposition at line {line}: {reason}")]
    MalformedExposition { line: usize, reason: String },
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("unsupported config version")]
    UnsupportedVersion,
    #[error("internal: {0}")]
    Internal(String),
}

impl MetricsError {
    /// Map to a stable error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            MetricsError::SchemaConflict { .. } => ErrorCode::SchemaConflict,
            MetricsError::InvalidName(_) | MetricsError::InvalidLabelName { .. } => {
                ErrorCode::InvalidName
            }
            MetricsError::InvalidBuckets { .. } => ErrorCode::InvalidBuckets,
            MetricsError::LabelCardinality { .. } => ErrorCode::LabelCardinality,
            MetricsError::InvalidValue { .. } => ErrorCode::InvalidValue,
            MetricsError::MalformedExposition { .. } => ErrorCode::MalformedExposition,
            MetricsError::InvalidConfig(_) => ErrorCode::InvalidConfig,
            MetricsError::UnsupportedVersion => ErrorCode::UnsupportedVersion,
            MetricsError::Internal(_) => ErrorCode::Internal,
        }
    }
}

//! Error types module
//!
//! Every fallible operation in holdfast reports a [`PinError`]. Backend-specific
//! failures (sqlx, HTTP, broker) are translated into this taxonomy at the seam
//! where they occur so callers never see raw driver errors.
//!
//! The `Database` variant and `From<sqlx::Error>` are gated behind the `sqlx` feature.

#[cfg(feature = "sqlx")]
use sqlx::Error as SqlxError;

/// Result alias used across the workspace.
pub type PinResult<T> = Result<T, PinError>;

/// Log level for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug level - for expected errors like validation failures
    Debug,
    /// Warning level - for recoverable issues
    Warn,
    /// Error level - for unexpected failures
    Error,
}

/// Metadata for error responses - defines how an error should be presented
/// by whatever transport sits in front of the services.
pub trait ErrorMetadata {
    /// HTTP status code to return
    fn http_status_code(&self) -> u16;

    /// Machine-readable error code (e.g., "QUEUE_PUBLISH_ERROR")
    fn error_code(&self) -> &'static str;

    /// Whether this error is recoverable (can be retried)
    fn is_recoverable(&self) -> bool;

    /// Client-facing message (may differ from internal error message)
    fn client_message(&self) -> String;

    /// Log level for this error
    fn log_level(&self) -> LogLevel;
}

#[derive(Debug, thiserror::Error)]
pub enum PinError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Access denied: user {user} is not authorized for network {network}")]
    AccessDenied { user: String, network: String },

    #[error("Upload already exists for {content_id} on network {network} by {user}")]
    DuplicateRecord {
        content_id: String,
        network: String,
        user: String,
    },

    #[error("Upload not found: {0}")]
    RecordNotFound(String),

    #[error("Failed to initialize queue: {0}")]
    QueueInitialization(String),

    #[error("Failed to publish message to {target}: {reason}")]
    QueuePublish { target: String, reason: String },

    #[error("Storage backend error: {0}")]
    StorageBackend(String),

    #[error("Failed to remove pin {content_id} from cluster: {reason}")]
    ClusterPinRemoval { content_id: String, reason: String },

    #[error("Failed to get cluster status: {0}")]
    ClusterStatus(String),

    #[cfg(feature = "sqlx")]
    #[error("Database error: {0}")]
    Database(#[source] SqlxError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
        #[source]
        source: anyhow::Error,
    },
}

impl PinError {
    pub fn validation(msg: impl Into<String>) -> Self {
        PinError::Validation(msg.into())
    }

    pub fn not_found(content_id: &str, network: &str, user: &str) -> Self {
        PinError::RecordNotFound(format!(
            "content {} on network {} for user {}",
            content_id, network, user
        ))
    }

    pub fn publish(target: impl Into<String>, reason: impl ToString) -> Self {
        PinError::QueuePublish {
            target: target.into(),
            reason: reason.to_string(),
        }
    }

    /// Get the error type name for detailed error responses
    pub fn error_type(&self) -> &'static str {
        match self {
            PinError::Validation(_) => "ValidationError",
            PinError::AccessDenied { .. } => "AccessDeniedError",
            PinError::DuplicateRecord { .. } => "DuplicateRecordError",
            PinError::RecordNotFound(_) => "RecordNotFoundError",
            PinError::QueueInitialization(_) => "QueueInitializationError",
            PinError::QueuePublish { .. } => "QueuePublishError",
            PinError::StorageBackend(_) => "StorageBackendError",
            PinError::ClusterPinRemoval { .. } => "ClusterPinRemovalError",
            PinError::ClusterStatus(_) => "ClusterStatusError",
            #[cfg(feature = "sqlx")]
            PinError::Database(_) => "DatabaseError",
            PinError::Internal { .. } => "InternalError",
        }
    }
}

#[cfg(feature = "sqlx")]
impl From<SqlxError> for PinError {
    fn from(err: SqlxError) -> Self {
        PinError::Database(err)
    }
}

impl From<anyhow::Error> for PinError {
    fn from(err: anyhow::Error) -> Self {
        PinError::Internal {
            message: err.to_string(),
            source: err,
        }
    }
}

impl From<serde_json::Error> for PinError {
    fn from(err: serde_json::Error) -> Self {
        PinError::Validation(format!("JSON parsing error: {}", err))
    }
}

impl From<validator::ValidationErrors> for PinError {
    fn from(err: validator::ValidationErrors) -> Self {
        PinError::Validation(err.to_string())
    }
}

/// Static metadata for each variant: (http_status, error_code, recoverable, log_level).
fn pin_error_static_metadata(err: &PinError) -> (u16, &'static str, bool, LogLevel) {
    match err {
        PinError::Validation(_) => (400, "VALIDATION_ERROR", false, LogLevel::Debug),
        PinError::AccessDenied { .. } => (403, "ACCESS_DENIED", false, LogLevel::Debug),
        PinError::DuplicateRecord { .. } => (409, "DUPLICATE_RECORD", false, LogLevel::Debug),
        PinError::RecordNotFound(_) => (404, "RECORD_NOT_FOUND", false, LogLevel::Debug),
        PinError::QueueInitialization(_) => {
            (503, "QUEUE_INITIALIZATION_ERROR", true, LogLevel::Error)
        }
        PinError::QueuePublish { .. } => (503, "QUEUE_PUBLISH_ERROR", true, LogLevel::Error),
        PinError::StorageBackend(_) => (502, "STORAGE_BACKEND_ERROR", true, LogLevel::Error),
        PinError::ClusterPinRemoval { .. } => {
            (502, "CLUSTER_PIN_REMOVAL_ERROR", true, LogLevel::Error)
        }
        PinError::ClusterStatus(_) => (502, "CLUSTER_STATUS_ERROR", true, LogLevel::Error),
        #[cfg(feature = "sqlx")]
        PinError::Database(_) => (500, "DATABASE_ERROR", true, LogLevel::Error),
        PinError::Internal { .. } => (500, "INTERNAL_ERROR", true, LogLevel::Error),
    }
}

impl ErrorMetadata for PinError {
    fn http_status_code(&self) -> u16 {
        pin_error_static_metadata(self).0
    }

    fn error_code(&self) -> &'static str {
        pin_error_static_metadata(self).1
    }

    fn is_recoverable(&self) -> bool {
        pin_error_static_metadata(self).2
    }

    fn log_level(&self) -> LogLevel {
        pin_error_static_metadata(self).3
    }

    fn client_message(&self) -> String {
        match self {
            PinError::Validation(ref msg) => msg.clone(),
            PinError::AccessDenied { network, .. } => {
                format!("invalid access to private network {}", network)
            }
            PinError::DuplicateRecord { .. } | PinError::RecordNotFound(_) => self.to_string(),
            PinError::QueueInitialization(_) => "failed to initialize queue".to_string(),
            PinError::QueuePublish { .. } => "failed to publish message to queue".to_string(),
            PinError::StorageBackend(_) => "failed to reach storage backend".to_string(),
            PinError::ClusterPinRemoval { .. } => "failed to remove pin from cluster".to_string(),
            PinError::ClusterStatus(_) => "failed to get cluster status".to_string(),
            #[cfg(feature = "sqlx")]
            PinError::Database(_) => "failed to access database".to_string(),
            PinError::Internal { .. } => "internal server error".to_string(),
        }
    }
}

//! Error types for Packlink core operations.

use thiserror::Error;

/// Result type used throughout the crate.
pub type PacklinkResult<T> = Result<T, PacklinkError>;

/// Main error type for queue, scheduler and shipping operations.
#[derive(Error, Debug)]
pub enum PacklinkError {
    /// Task execution failed
    #[error("Task execution failed: {message}")]
    TaskExecutionFailed {
        /// Error message
        message: String,
        /// Optional underlying error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The task asked to be aborted; it will not be retried
    #[error("Task aborted: {reason}")]
    TaskAborted {
        /// Why the task gave up
        reason: String,
    },

    /// Task type not found in registry
    #[error("Task type '{task_type}' not found in registry")]
    TaskNotRegistered {
        /// The task type that wasn't found
        task_type: String,
    },

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A conditional save lost the race against another writer
    #[error("Failed to save queue item: {message}")]
    QueueItemSave {
        /// Error message
        message: String,
    },

    /// Queue item status change that the life cycle does not allow
    #[error("Illegal queue item transition from '{from}' to '{to}'")]
    IllegalTransition {
        /// Current status
        from: String,
        /// Requested status
        to: String,
    },

    /// Queue item does not exist in storage
    #[error("Queue item {id} not found")]
    QueueItemNotFound {
        /// Queue item id
        id: i64,
    },

    /// Query filter refers to unknown fields or carries bad values
    #[error("Invalid query filter: {message}")]
    InvalidQueryFilter {
        /// Error message
        message: String,
    },

    /// Storage backend error
    #[error("Storage error: {message}")]
    Storage {
        /// Error message
        message: String,
        /// Optional underlying error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Remote API call failed
    #[error("Proxy error: {message}")]
    Proxy {
        /// Error message
        message: String,
        /// HTTP status, when the remote API answered
        status: Option<u16>,
    },

    /// Remote API rejected the credentials
    #[error("Unauthorized: {message}")]
    Unauthorized {
        /// Error message
        message: String,
    },

    /// Next run of a schedule could not be computed
    #[error("Schedule error: {message}")]
    Schedule {
        /// Error message
        message: String,
    },

    /// Configuration error
    #[error("Configuration error: {message}")]
    ConfigError {
        /// Error message
        message: String,
    },

    /// A collaborator the operation needs was not wired in
    #[error("Service '{name}' is not registered")]
    MissingService {
        /// Collaborator name
        name: &'static str,
    },

    /// Operation timeout
    #[error("Operation timed out after {timeout_secs} seconds")]
    Timeout {
        /// Timeout duration in seconds
        timeout_secs: u64,
    },

    /// Task runner is already running
    #[error("Task runner is already running")]
    AlreadyRunning,

    /// Task runner is not running
    #[error("Task runner is not running")]
    NotRunning,
}

impl PacklinkError {
    /// Create a new task execution error
    pub fn task_execution<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::TaskExecutionFailed {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a task execution error without an underlying cause
    pub fn task_failed(message: impl Into<String>) -> Self {
        Self::TaskExecutionFailed {
            message: message.into(),
            source: None,
        }
    }

    /// Create an abort request
    pub fn abort(reason: impl Into<String>) -> Self {
        Self::TaskAborted {
            reason: reason.into(),
        }
    }

    /// Create a new storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Create a query filter error
    pub fn filter(message: impl Into<String>) -> Self {
        Self::InvalidQueryFilter {
            message: message.into(),
        }
    }

    /// Create a proxy error
    pub fn proxy(message: impl Into<String>, status: Option<u16>) -> Self {
        Self::Proxy {
            message: message.into(),
            status,
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigError {
            message: message.into(),
        }
    }

    /// Whether the error asks for an abort rather than a retry
    pub fn is_abort(&self) -> bool {
        matches!(self, Self::TaskAborted { .. })
    }
}

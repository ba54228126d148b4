//! Error types for the distribution and execution domain.
//!
//! The retry policy of the whole system hangs off [`Error::is_retryable`]:
//! transient collaborator failures count against a message's attempt
//! budget, everything else dead-letters or aborts immediately.

/// The result type used throughout tessera-flow.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while distributing or executing tasks.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An error from tessera-core (parse, lookup, catalog I/O).
    #[error("core error: {0}")]
    Core(#[from] tessera_core::error::Error),

    /// The dataset-loading collaborator failed.
    #[error("dataset load error: {message}")]
    DatasetLoad {
        /// Description of the failure.
        message: String,
    },

    /// The reduction plugin failed.
    #[error("plugin compute error: {message}")]
    PluginCompute {
        /// Description of the failure.
        message: String,
        /// True if the plugin marked the failure as non-retryable
        /// (e.g. malformed input data).
        fatal: bool,
    },

    /// The output writer failed.
    #[error("output write error: {message}")]
    OutputWrite {
        /// Description of the failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The queue transport is unavailable or rejected an operation.
    #[error("queue transport error: {message}")]
    Transport {
        /// Description of the failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A lease receipt is no longer valid: the lease expired and the
    /// message has been handed to another worker.
    #[error("lease lost for message {message_id}")]
    LeaseLost {
        /// The message whose lease was lost.
        message_id: String,
    },
}

impl Error {
    /// Creates a new dataset-load error.
    #[must_use]
    pub fn dataset_load(message: impl Into<String>) -> Self {
        Self::DatasetLoad {
            message: message.into(),
        }
    }

    /// Creates a new output-write error.
    #[must_use]
    pub fn output_write(message: impl Into<String>) -> Self {
        Self::OutputWrite {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new output-write error with a source cause.
    #[must_use]
    pub fn output_write_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::OutputWrite {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a new transport error.
    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new transport error with a source cause.
    #[must_use]
    pub fn transport_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Transport {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Returns true if retrying the task could succeed.
    ///
    /// Retryable failures count against the message attempt budget;
    /// non-retryable ones dead-letter immediately.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::DatasetLoad { .. } | Self::OutputWrite { .. } | Self::Transport { .. } => true,
            Self::PluginCompute { fatal, .. } => !*fatal,
            Self::Core(_) | Self::LeaseLost { .. } => false,
        }
    }
}

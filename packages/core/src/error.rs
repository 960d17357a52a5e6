//! Failure classification for job processing.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable code recorded on a failed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureCode {
    /// The job passed its expiry before it could finish.
    Expired,
    /// A retryable error kept occurring until the retry limit was reached.
    RetriesExhausted,
    /// The payload is malformed or missing required fields.
    InvalidInput,
    /// The source document no longer exists.
    SourceMissing,
    /// No handler is registered for the job's operation.
    NoHandler,
    /// The handler panicked.
    HandlerPanic,
    /// Any other permanent processing error.
    Unprocessable,
}

impl FailureCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCode::Expired => "EXPIRED",
            FailureCode::RetriesExhausted => "RETRIES_EXHAUSTED",
            FailureCode::InvalidInput => "INVALID_INPUT",
            FailureCode::SourceMissing => "SOURCE_MISSING",
            FailureCode::NoHandler => "NO_HANDLER",
            FailureCode::HandlerPanic => "HANDLER_PANIC",
            FailureCode::Unprocessable => "UNPROCESSABLE",
        }
    }

    pub fn parse(s: &str) -> Option<FailureCode> {
        [
            FailureCode::Expired,
            FailureCode::RetriesExhausted,
            FailureCode::InvalidInput,
            FailureCode::SourceMissing,
            FailureCode::NoHandler,
            FailureCode::HandlerPanic,
            FailureCode::Unprocessable,
        ]
        .into_iter()
        .find(|code| code.as_str() == s)
    }
}

impl fmt::Display for FailureCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned by a job handler.
///
/// Retryable errors go back to the queue after a backoff delay until the job's
/// retry limit is reached. Fatal errors fail the job immediately.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProcessingError {
    #[error("retryable: {message}")]
    Retryable { message: String },
    #[error("fatal ({code}): {message}")]
    Fatal { code: FailureCode, message: String },
}

impl ProcessingError {
    pub fn retryable(message: impl Into<String>) -> Self {
        ProcessingError::Retryable {
            message: message.into(),
        }
    }

    pub fn fatal(code: FailureCode, message: impl Into<String>) -> Self {
        ProcessingError::Fatal {
            code,
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ProcessingError::Retryable { .. })
    }

    pub fn message(&self) -> &str {
        match self {
            ProcessingError::Retryable { message } | ProcessingError::Fatal { message, .. } => {
                message
            }
        }
    }
}

/// Failure details stored on the job row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub code: FailureCode,
    pub message: String,
}

impl JobError {
    pub fn new(code: FailureCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn expired() -> Self {
        Self::new(FailureCode::Expired, "job expired before completion")
    }
}

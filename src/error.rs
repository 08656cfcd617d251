use thiserror::Error;

use crate::stream::StreamId;

pub type Result<T> = std::result::Result<T, ExecutorError>;

/// Outcome of an executor operation that carries no value.
pub type Status = Result<()>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutorError {
    /// A known capability this backend does not provide.
    #[error("{operation} is not implemented for this backend{}", detail_suffix(.message))]
    Unimplemented {
        operation: &'static str,
        message: String,
    },
    #[error("Out of device memory: requested {requested} bytes, {available} available")]
    OutOfMemory { requested: u64, available: u64 },
    #[error("Invalid argument {parameter}: {message}")]
    InvalidArgument {
        parameter: &'static str,
        message: String,
    },
    #[error("Internal error: {message}")]
    Internal { message: String },
    #[error("Stream {stream_id} error: {message}")]
    StreamError { stream_id: StreamId, message: String },
    #[error("Host callback failed: {message}")]
    CallbackError { message: String },
    #[error("Configuration error for {parameter}: {message}")]
    ConfigurationError { message: String, parameter: String },
}

fn detail_suffix(message: &str) -> String {
    if message.is_empty() {
        String::new()
    } else {
        format!(": {}", message)
    }
}

impl ExecutorError {
    pub(crate) fn unimplemented(operation: &'static str) -> Self {
        ExecutorError::Unimplemented {
            operation,
            message: String::new(),
        }
    }

    pub(crate) fn invalid_argument(parameter: &'static str, message: impl Into<String>) -> Self {
        ExecutorError::InvalidArgument {
            parameter,
            message: message.into(),
        }
    }

    pub(crate) fn internal(message: impl Into<String>) -> Self {
        ExecutorError::Internal {
            message: message.into(),
        }
    }

    /// Coarse classification used by callers that only branch on the kind.
    pub fn code(&self) -> ErrorCode {
        match self {
            ExecutorError::Unimplemented { .. } => ErrorCode::Unimplemented,
            ExecutorError::OutOfMemory { .. } => ErrorCode::ResourceExhausted,
            ExecutorError::InvalidArgument { .. } => ErrorCode::InvalidArgument,
            ExecutorError::ConfigurationError { .. } => ErrorCode::InvalidArgument,
            ExecutorError::Internal { .. }
            | ExecutorError::StreamError { .. }
            | ExecutorError::CallbackError { .. } => ErrorCode::Internal,
        }
    }
}

/// Error kinds shared by every backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    Unimplemented,
    ResourceExhausted,
    InvalidArgument,
    Internal,
}

/// Extension trait for error handling utilities
pub trait ErrorExt {
    fn is_unimplemented(&self) -> bool;
    fn is_recoverable(&self) -> bool;
}

impl ErrorExt for ExecutorError {
    fn is_unimplemented(&self) -> bool {
        matches!(self, ExecutorError::Unimplemented { .. })
    }

    fn is_recoverable(&self) -> bool {
        match self {
            ExecutorError::OutOfMemory { .. } => true,
            ExecutorError::CallbackError { .. } => true,
            _ => false,
        }
    }
}

impl<T> ErrorExt for Result<T> {
    fn is_unimplemented(&self) -> bool {
        matches!(self, Err(e) if e.is_unimplemented())
    }

    fn is_recoverable(&self) -> bool {
        matches!(self, Err(e) if e.is_recoverable())
    }
}

use std::error::Error;
use thiserror::Error;

/// Result alias for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Error raised by sync transports regardless of the underlying backend.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The backend could not be reached or failed while serving the request.
    #[error("transport unavailable: {message}")]
    Unavailable {
        /// What the transport was doing when it failed.
        message: String,
        /// Underlying client or backend error.
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// A row that must not exist yet already exists, or a conditional write lost its race.
    #[error("conflict: {0}")]
    Conflict(String),
    /// The backend answered with an unexpected status.
    #[error("{operation} rejected with status {status}")]
    Rejected {
        /// Name of the rejected operation.
        operation: String,
        /// HTTP status returned by the backend.
        status: u16,
    },
    /// The backend answered with a payload that could not be decoded.
    #[error("failed to decode response for {operation}")]
    Decode {
        /// Name of the operation whose response was malformed.
        operation: String,
        /// Underlying decoding error.
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
}

impl TransportError {
    /// Construct an unavailable error from any backend failure.
    pub fn unavailable(message: impl Into<String>, source: impl Error + Send + Sync + 'static) -> Self {
        TransportError::Unavailable {
            message: message.into(),
            source: Box::new(source),
        }
    }

    /// Whether this error reports an already existing row or a taken admin seat.
    pub fn is_conflict(&self) -> bool {
        matches!(self, TransportError::Conflict(_))
    }
}

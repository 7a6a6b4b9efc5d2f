use http::StatusCode;
use vista_query::QueryError;
use vista_rows::CodecError;

use crate::transport::TransportError;

/// Coarse classification of a [`ViewError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidArgument,
    OptionsConflict,
    RequestTooLarge,
    OutOfMemory,
    /// Connection failures and non-200 responses.
    Transport,
    /// The response body could not be split into rows.
    Protocol,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ViewError {
    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("server responded with http status {0}")]
    Http(StatusCode),

    #[error("protocol error: {0}")]
    Protocol(#[from] CodecError),
}

impl ViewError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ViewError::Query(QueryError::InvalidArgument(_)) => ErrorKind::InvalidArgument,
            ViewError::Query(QueryError::OptionsConflict) => ErrorKind::OptionsConflict,
            ViewError::Query(QueryError::RequestTooLarge { .. }) => ErrorKind::RequestTooLarge,
            ViewError::Query(QueryError::OutOfMemory) => ErrorKind::OutOfMemory,
            ViewError::Transport(_) | ViewError::Http(_) => ErrorKind::Transport,
            ViewError::Protocol(_) => ErrorKind::Protocol,
        }
    }
}

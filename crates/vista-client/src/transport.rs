use std::fmt;

use http::{HeaderMap, Request, StatusCode};

/// Identifies one request issued through a [`Transport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Status line and headers of a response, borrowed by each chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    pub status: StatusCode,
    pub headers: HeaderMap,
}

impl ResponseHead {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("network error: {0}")]
    Network(String),

    #[error("io error: {0}")]
    Io(String),

    #[error("request timed out")]
    Timeout,

    #[error("request cancelled")]
    Cancelled,

    #[error("request refused: {0}")]
    Refused(String),
}

/// One slice of a streamed response body.
///
/// `head` is `None` when the request failed before any response arrived.
/// Everything here is borrowed for the duration of the handler call only.
#[derive(Debug, Clone, Copy)]
pub struct Chunk<'a> {
    pub head: Option<&'a ResponseHead>,
    pub body: &'a [u8],
    pub is_final: bool,
    pub error: Option<&'a TransportError>,
}

impl Chunk<'_> {
    pub fn status(&self) -> Option<StatusCode> {
        self.head.map(|h| h.status)
    }

    /// A chunk ends the stream when it is final, carries a transport error,
    /// or belongs to a response that is not `200 OK`.
    pub fn ends_stream(&self) -> bool {
        self.is_final || self.error.is_some() || self.status() != Some(StatusCode::OK)
    }
}

pub type ChunkHandler = Box<dyn FnMut(Chunk<'_>)>;

/// The HTTP side of a view query.
///
/// Contract for implementations:
/// - `on_chunk` is never called from inside `issue`.
/// - Every request ends with exactly one chunk marked `is_final`, after
///   which the handler is dropped. `cancel` drops the handler without a
///   final chunk.
/// - `pause` stops chunk delivery for the request until `resume`.
pub trait Transport {
    fn issue(
        &self,
        request: Request<Vec<u8>>,
        on_chunk: ChunkHandler,
    ) -> Result<RequestId, TransportError>;

    fn pause(&self, id: RequestId);

    fn resume(&self, id: RequestId);

    fn cancel(&self, id: RequestId);
}

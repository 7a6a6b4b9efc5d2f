mod client;
mod config;
mod docqueue;
mod document;
mod error;
mod http;
mod request;
mod response;
mod transport;

pub use client::ViewClient;
pub use config::{ClientConfig, DEFAULT_MAX_CONCURRENT_DOCS, HttpConfig};
pub use docqueue::OwnedRow;
pub use document::{
    Document, DocumentCallback, DocumentError, DocumentResult, DocumentStore, MemoryDocuments,
};
pub use error::{ErrorKind, ViewError};
pub use http::HttpTransport;
pub use request::{State, ViewHandle};
pub use response::{ViewCallback, ViewResponse};
pub use transport::{Chunk, ChunkHandler, RequestId, ResponseHead, Transport, TransportError};
pub use vista_query::{IndexKind, QueryError, ViewFlags, ViewQuery};

use std::cell::Cell;
use std::rc::Rc;

use http::header::CONTENT_TYPE;
use http::{Method, Request};
use tracing::debug;
use vista_query::{QueryError, ViewQuery};

use crate::config::ClientConfig;
use crate::docqueue::DocQueue;
use crate::document::DocumentStore;
use crate::error::ViewError;
use crate::request::{ViewHandle, ViewRequest};
use crate::response::ViewResponse;
use crate::transport::{Chunk, ChunkHandler, Transport};

/// Count of live queries shared between a client and its requests.
#[derive(Debug, Clone, Default)]
pub(crate) struct PendingOps(Rc<Cell<usize>>);

impl PendingOps {
    fn register(&self) -> PendingGuard {
        self.0.set(self.0.get() + 1);
        PendingGuard(Rc::clone(&self.0))
    }

    fn count(&self) -> usize {
        self.0.get()
    }
}

/// Keeps one query counted as live until dropped.
#[derive(Debug)]
pub(crate) struct PendingGuard(Rc<Cell<usize>>);

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.0.set(self.0.get() - 1);
    }
}

/// Issues view queries over a [`Transport`].
///
/// Everything runs on the thread that owns the transport's event loop. A
/// query's callback sees its rows in order, then exactly one notification
/// with `is_final` set, unless the query is cancelled first.
pub struct ViewClient {
    transport: Rc<dyn Transport>,
    documents: Option<Rc<dyn DocumentStore>>,
    config: ClientConfig,
    pending: PendingOps,
}

impl ViewClient {
    pub fn new(transport: Rc<dyn Transport>, config: ClientConfig) -> Self {
        Self {
            transport,
            documents: None,
            config,
            pending: PendingOps::default(),
        }
    }

    /// Source of documents for queries issued with `include_docs`.
    pub fn with_documents(mut self, documents: Rc<dyn DocumentStore>) -> Self {
        self.documents = Some(documents);
        self
    }

    pub fn query<F>(&self, query: &ViewQuery, callback: F) -> Result<ViewHandle, ViewError>
    where
        F: FnMut(&ViewResponse<'_>) + 'static,
    {
        let path = query.path()?;
        let docq = if query.flags.include_docs {
            let documents = self.documents.as_ref().ok_or(QueryError::InvalidArgument(
                "include_docs requires a document store",
            ))?;
            let max = query
                .max_concurrent_docs
                .unwrap_or(self.config.max_concurrent_docs);
            Some(DocQueue::new(Rc::clone(documents), max))
        } else {
            None
        };

        let builder = Request::builder().uri(format!("/{path}"));
        let built = match &query.body {
            Some(body) if query.is_post() => builder
                .method(Method::POST)
                .header(CONTENT_TYPE, "application/json")
                .body(body.clone()),
            _ => builder.method(Method::GET).body(Vec::new()),
        };
        let http_request = built.map_err(|_| {
            QueryError::InvalidArgument("options are not valid in a request uri")
        })?;

        let request = ViewRequest::new(
            query.flags,
            Box::new(callback),
            Rc::clone(&self.transport),
            docq,
        );

        let mut hold = Some(Rc::clone(&request));
        let on_chunk: ChunkHandler = Box::new(move |chunk: Chunk<'_>| {
            // The clone keeps the request alive until this call returns,
            // even when the final chunk releases the handler's hold.
            let Some(request) = hold.clone() else {
                return;
            };
            if chunk.is_final {
                hold = None;
            }
            request.on_chunk(chunk);
        });

        match self.transport.issue(http_request, on_chunk) {
            Ok(id) => {
                debug!(request = %id, design = %query.design, view = %query.view, "view query issued");
                request.issued(id, self.pending.register());
                Ok(ViewHandle::new(id, &request))
            }
            Err(err) => {
                debug!(error = %err, "view query could not be issued");
                request.abandon();
                Err(err.into())
            }
        }
    }

    /// Same as [`ViewHandle::cancel`].
    pub fn cancel(&self, handle: &ViewHandle) {
        handle.cancel();
    }

    /// Number of queries that have not yet delivered their terminal
    /// notification or been cancelled.
    pub fn pending_operations(&self) -> usize {
        self.pending.count()
    }
}

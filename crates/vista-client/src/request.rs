use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::rc::{Rc, Weak};

use http::StatusCode;
use tracing::{debug, trace, warn};
use vista_query::ViewFlags;
use vista_rows::{CodecError, Row, RowCodec, RowEvent};

use crate::client::PendingGuard;
use crate::docqueue::{DocQueue, DocRequest, OwnedRow, QueueOwner};
use crate::document::DocumentResult;
use crate::error::ViewError;
use crate::response::{ViewCallback, ViewResponse};
use crate::transport::{Chunk, RequestId, ResponseHead, Transport, TransportError};

/// Lifecycle of a view query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Rows are being delivered.
    Active,
    /// The terminal notification is being delivered.
    Finalizing,
    /// No further notifications will be delivered. Outstanding work is
    /// still running down.
    Cancelled,
    /// Everything has been released.
    Destroyed,
}

/// Controller for one streaming view query.
///
/// Shared ownership stands in for a reference count: the transport's chunk
/// handler holds a clone until the final chunk, and every document fetch
/// holds one until it is delivered. Dropping the last clone destroys the
/// query.
pub(crate) struct ViewRequest {
    state: Cell<State>,
    callback: RefCell<Option<ViewCallback>>,
    // Notifications raised while the callback was already running.
    deferred: RefCell<VecDeque<Notification>>,
    last_error: RefCell<Option<ViewError>>,
    flags: ViewFlags,
    codec: RefCell<RowCodec>,
    docq: Option<Rc<DocQueue>>,
    transport: Rc<dyn Transport>,
    http_handle: Cell<Option<RequestId>>,
    stream_ended: Cell<bool>,
    pending: RefCell<Option<PendingGuard>>,
}

impl ViewRequest {
    pub(crate) fn new(
        flags: ViewFlags,
        callback: ViewCallback,
        transport: Rc<dyn Transport>,
        docq: Option<Rc<DocQueue>>,
    ) -> Rc<Self> {
        let request = Rc::new(Self {
            state: Cell::new(State::Active),
            callback: RefCell::new(Some(callback)),
            deferred: RefCell::new(VecDeque::new()),
            last_error: RefCell::new(None),
            flags,
            codec: RefCell::new(RowCodec::new()),
            docq,
            transport,
            http_handle: Cell::new(None),
            stream_ended: Cell::new(false),
            pending: RefCell::new(None),
        });
        if let Some(docq) = &request.docq {
            let owner: Rc<dyn QueueOwner> = Rc::clone(&request) as Rc<dyn QueueOwner>;
            docq.attach(Rc::downgrade(&owner));
        }
        request
    }

    /// Records a successful issue.
    pub(crate) fn issued(&self, id: RequestId, guard: PendingGuard) {
        self.http_handle.set(Some(id));
        *self.pending.borrow_mut() = Some(guard);
    }

    /// Silences a request whose issue failed, so dropping it delivers nothing.
    pub(crate) fn abandon(&self) {
        self.state.set(State::Cancelled);
        if let Ok(mut slot) = self.callback.try_borrow_mut() {
            slot.take();
        }
    }

    pub(crate) fn state(&self) -> State {
        self.state.get()
    }

    fn is_active(&self) -> bool {
        self.state.get() == State::Active
    }

    pub(crate) fn on_chunk(self: &Rc<Self>, chunk: Chunk<'_>) {
        let failed = if let Some(err) = chunk.error {
            debug!(error = %err, "view stream failed");
            self.latch(ViewError::Transport(err.clone()));
            true
        } else {
            match chunk.status() {
                Some(status) if status == StatusCode::OK => false,
                Some(status) => {
                    warn!(%status, "view query returned non-ok status");
                    self.latch(ViewError::Http(status));
                    self.absorb(chunk.body);
                    true
                }
                None => {
                    self.latch(ViewError::Transport(TransportError::Network(
                        "chunk without a response".into(),
                    )));
                    true
                }
            }
        };

        if !failed && self.is_active() && self.last_error.borrow().is_none() {
            self.feed(chunk.body, chunk.head);
        }

        if chunk.is_final {
            self.http_handle.set(None);
        }
        if chunk.ends_stream() {
            self.stream_ended.set(true);
            self.finalize(chunk.head);
        }
    }

    fn latch(&self, error: ViewError) {
        let mut slot = self.last_error.borrow_mut();
        if slot.is_none() {
            *slot = Some(error);
        }
    }

    // Error bodies go through the codec so the terminal notification can
    // carry the server's explanation. Rows in them are never delivered.
    fn absorb(&self, body: &[u8]) {
        if !self.is_active() {
            return;
        }
        let Ok(mut codec) = self.codec.try_borrow_mut() else {
            return;
        };
        codec.feed(body);
        while let Some(event) = codec.next_event() {
            if matches!(event, RowEvent::Error(_) | RowEvent::Complete) {
                break;
            }
        }
    }

    fn feed(self: &Rc<Self>, body: &[u8], head: Option<&ResponseHead>) {
        let Ok(mut codec) = self.codec.try_borrow_mut() else {
            warn!("row codec re-entered, dropping chunk");
            return;
        };
        codec.feed(body);

        let mut failure = None;
        while self.is_active() {
            let Some(event) = codec.next_event() else {
                break;
            };
            match event {
                RowEvent::Row(row) => {
                    if let Err(err) = self.dispatch_row(row, head) {
                        failure = Some(err);
                        break;
                    }
                }
                RowEvent::Error(err) => {
                    failure = Some(err);
                    break;
                }
                // The final chunk decides when the query ends.
                RowEvent::Complete => {}
            }
        }
        drop(codec);

        if let Some(err) = failure {
            debug!(error = %err, "malformed view response");
            self.latch(ViewError::Protocol(err));
            self.finalize(head);
        }
    }

    fn dispatch_row(
        self: &Rc<Self>,
        row: Row<'_>,
        head: Option<&ResponseHead>,
    ) -> Result<(), CodecError> {
        if self.flags.no_parse_rows {
            self.deliver(&ViewResponse {
                head,
                row: Some(row.raw()),
                ..ViewResponse::default()
            });
            return Ok(());
        }

        let parsed = row.parse()?;
        if let Some(docq) = &self.docq {
            if parsed.has_document() && self.is_active() {
                let owner: Rc<dyn QueueOwner> = Rc::clone(self) as Rc<dyn QueueOwner>;
                docq.add(DocRequest::new(OwnedRow::copy(&parsed), owner));
                return Ok(());
            }
        }

        self.deliver(&ViewResponse {
            head,
            key: parsed.key,
            id: parsed.id.as_deref(),
            value: parsed.value,
            geometry: parsed.geometry,
            ..ViewResponse::default()
        });
        Ok(())
    }

    /// Invokes the callback. A notification raised from inside the callback
    /// is queued and delivered, in order, once the outer call returns.
    fn deliver(&self, response: &ViewResponse<'_>) {
        let Ok(mut slot) = self.callback.try_borrow_mut() else {
            trace!(
                is_final = response.is_final,
                "view callback busy, deferring notification"
            );
            self.deferred
                .borrow_mut()
                .push_back(Notification::copy(response));
            return;
        };
        if let Some(callback) = slot.as_mut() {
            callback(response);
            loop {
                let next = self.deferred.borrow_mut().pop_front();
                let Some(next) = next else {
                    break;
                };
                callback(&next.as_response());
            }
        }
        // A cancel from inside the callback could not clear the slot.
        if matches!(self.state.get(), State::Cancelled | State::Destroyed) {
            slot.take();
            self.deferred.borrow_mut().clear();
        }
    }

    /// Delivers the terminal notification unless document fetches are
    /// still outstanding.
    fn finalize(&self, head: Option<&ResponseHead>) {
        if !self.is_active() {
            return;
        }
        if let Some(docq) = &self.docq {
            if docq.has_pending() {
                trace!(
                    in_flight = docq.in_flight(),
                    queued = docq.queued(),
                    "finalize deferred until documents drain"
                );
                return;
            }
        }
        self.state.set(State::Finalizing);

        let error = self.last_error.borrow().clone();
        let codec = self.codec.try_borrow().ok();
        let meta = codec.as_ref().and_then(|c| c.meta());
        debug!(
            rows = codec.as_ref().map_or(0, |c| c.rows()),
            error = error.is_some(),
            "view query finished"
        );
        self.deliver(&ViewResponse {
            error: error.as_ref(),
            head,
            meta,
            is_final: true,
            // A status error was the server's own answer, whatever its body.
            client_generated: meta.is_none() && !matches!(error, Some(ViewError::Http(_))),
            ..ViewResponse::default()
        });
        drop(codec);

        self.stop();
    }

    /// Stops all further notifications, including ones deferred behind a
    /// running callback. Idempotent.
    pub(crate) fn cancel(&self) {
        if !matches!(self.state.get(), State::Active | State::Finalizing) {
            return;
        }
        if self.state.get() == State::Active {
            debug!("view query cancelled");
        }
        self.deferred.borrow_mut().clear();
        self.stop();
    }

    // Notifications already deferred still go out, so a terminal raised
    // behind a running callback is not lost.
    fn stop(&self) {
        self.state.set(State::Cancelled);
        self.pending.borrow_mut().take();
        if let Some(docq) = &self.docq {
            docq.cancel();
        }
        if let Ok(mut slot) = self.callback.try_borrow_mut() {
            slot.take();
        }
    }
}

impl QueueOwner for ViewRequest {
    fn document_ready(&self, row: &OwnedRow, result: &DocumentResult) {
        if self.is_active() {
            self.deliver(&ViewResponse {
                key: row.key(),
                id: Some(row.id()),
                value: row.value(),
                geometry: row.geometry(),
                document: Some(result),
                ..ViewResponse::default()
            });
        }
        if self.stream_ended.get() {
            self.finalize(None);
        }
    }

    fn throttle(&self, enabled: bool) {
        let Some(id) = self.http_handle.get() else {
            return;
        };
        if enabled {
            debug!(request = %id, "pausing view stream");
            self.transport.pause(id);
        } else {
            debug!(request = %id, "resuming view stream");
            self.transport.resume(id);
        }
    }
}

impl Drop for ViewRequest {
    fn drop(&mut self) {
        // The transport let go of its handler without a final chunk.
        if self.http_handle.get().is_some() {
            self.latch(ViewError::Transport(TransportError::Cancelled));
        }
        self.finalize(None);
        if let Some(id) = self.http_handle.take() {
            self.transport.cancel(id);
        }
        if let Some(docq) = &self.docq {
            docq.cancel();
            docq.detach();
        }
        self.state.set(State::Destroyed);
        trace!("view request destroyed");
    }
}

/// Owned copy of a notification that has to wait for the callback.
struct Notification {
    error: Option<ViewError>,
    head: Option<ResponseHead>,
    key: Option<Vec<u8>>,
    id: Option<String>,
    value: Option<Vec<u8>>,
    geometry: Option<Vec<u8>>,
    row: Option<Vec<u8>>,
    meta: Option<Vec<u8>>,
    document: Option<DocumentResult>,
    is_final: bool,
    client_generated: bool,
}

impl Notification {
    fn copy(response: &ViewResponse<'_>) -> Self {
        Self {
            error: response.error.cloned(),
            head: response.head.cloned(),
            key: response.key.map(<[u8]>::to_vec),
            id: response.id.map(str::to_string),
            value: response.value.map(<[u8]>::to_vec),
            geometry: response.geometry.map(<[u8]>::to_vec),
            row: response.row.map(<[u8]>::to_vec),
            meta: response.meta.map(<[u8]>::to_vec),
            document: response.document.cloned(),
            is_final: response.is_final,
            client_generated: response.client_generated,
        }
    }

    fn as_response(&self) -> ViewResponse<'_> {
        ViewResponse {
            error: self.error.as_ref(),
            head: self.head.as_ref(),
            key: self.key.as_deref(),
            id: self.id.as_deref(),
            value: self.value.as_deref(),
            geometry: self.geometry.as_deref(),
            row: self.row.as_deref(),
            meta: self.meta.as_deref(),
            document: self.document.as_ref(),
            is_final: self.is_final,
            client_generated: self.client_generated,
        }
    }
}

/// Caller-side handle to a view query. It does not keep the query alive.
#[derive(Clone)]
pub struct ViewHandle {
    id: RequestId,
    request: Weak<ViewRequest>,
}

impl ViewHandle {
    pub(crate) fn new(id: RequestId, request: &Rc<ViewRequest>) -> Self {
        Self {
            id,
            request: Rc::downgrade(request),
        }
    }

    /// The transport request carrying the query.
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Stops further notifications. Safe to call from inside the query's
    /// own callback and after the query has finished.
    pub fn cancel(&self) {
        if let Some(request) = self.request.upgrade() {
            request.cancel();
        }
    }

    pub fn state(&self) -> State {
        self.request
            .upgrade()
            .map_or(State::Destroyed, |request| request.state())
    }

    pub fn is_active(&self) -> bool {
        self.state() == State::Active
    }
}

impl fmt::Debug for ViewHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewHandle")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}

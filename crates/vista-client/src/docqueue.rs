use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::ops::Range;
use std::rc::{Rc, Weak};

use tracing::trace;
use vista_rows::ParsedRow;

use crate::document::{DocumentError, DocumentResult, DocumentStore};

/// Hooks the queue calls on whoever owns it.
pub(crate) trait QueueOwner {
    /// A fetch resolved, successfully or not.
    fn document_ready(&self, row: &OwnedRow, result: &DocumentResult);

    /// `true` when the in-flight ceiling is reached, `false` once the count
    /// drops back below it.
    fn throttle(&self, enabled: bool);
}

/// A row copied out of the codec buffer so it can outlive the next chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedRow {
    id: String,
    buf: Vec<u8>,
    key: Option<Range<usize>>,
    value: Option<Range<usize>>,
    geometry: Option<Range<usize>>,
}

impl OwnedRow {
    pub fn copy(row: &ParsedRow<'_>) -> Self {
        let len: usize = [row.key, row.value, row.geometry]
            .iter()
            .flatten()
            .map(|span| span.len())
            .sum();
        let mut buf = Vec::with_capacity(len);
        let mut push = |span: Option<&[u8]>| {
            span.map(|bytes| {
                let start = buf.len();
                buf.extend_from_slice(bytes);
                start..buf.len()
            })
        };
        let key = push(row.key);
        let value = push(row.value);
        let geometry = push(row.geometry);

        Self {
            id: row.id.as_deref().unwrap_or_default().to_string(),
            buf,
            key,
            value,
            geometry,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn key(&self) -> Option<&[u8]> {
        self.key.clone().map(|r| &self.buf[r])
    }

    pub fn value(&self) -> Option<&[u8]> {
        self.value.clone().map(|r| &self.buf[r])
    }

    pub fn geometry(&self) -> Option<&[u8]> {
        self.geometry.clone().map(|r| &self.buf[r])
    }
}

/// One pending document fetch.
pub(crate) struct DocRequest {
    row: OwnedRow,
    // Keeps the owner alive until this fetch has been delivered or dropped.
    _owner: Rc<dyn QueueOwner>,
}

impl DocRequest {
    pub(crate) fn new(row: OwnedRow, owner: Rc<dyn QueueOwner>) -> Self {
        Self { row, _owner: owner }
    }
}

/// Completion slot handed to the document store. Dropping it unresolved
/// still settles the queue's accounting.
struct Fetch {
    queue: Rc<DocQueue>,
    request: Option<DocRequest>,
}

impl Fetch {
    fn resolve(mut self, result: DocumentResult) {
        if let Some(request) = self.request.take() {
            self.queue.complete(request, result);
        }
    }
}

impl Drop for Fetch {
    fn drop(&mut self) {
        if let Some(request) = self.request.take() {
            self.queue.complete(request, Err(DocumentError::Abandoned));
        }
    }
}

/// Bounded document prefetch queue.
///
/// Rows are fetched in arrival order with at most `max_in_flight` fetches
/// outstanding. Throttling is level-triggered: the owner sees `throttle(true)`
/// once when a row arrives with the ceiling reached and `throttle(false)`
/// once when a completion brings the count back under it.
pub(crate) struct DocQueue {
    store: Rc<dyn DocumentStore>,
    max_in_flight: usize,
    queued: RefCell<VecDeque<DocRequest>>,
    in_flight: Cell<usize>,
    throttled: Cell<bool>,
    cancelled: Cell<bool>,
    dispatching: Cell<bool>,
    parent: RefCell<Option<Weak<dyn QueueOwner>>>,
}

impl DocQueue {
    pub(crate) fn new(store: Rc<dyn DocumentStore>, max_in_flight: usize) -> Rc<Self> {
        Rc::new(Self {
            store,
            max_in_flight: max_in_flight.max(1),
            queued: RefCell::new(VecDeque::new()),
            in_flight: Cell::new(0),
            throttled: Cell::new(false),
            cancelled: Cell::new(false),
            dispatching: Cell::new(false),
            parent: RefCell::new(None),
        })
    }

    pub(crate) fn attach(&self, parent: Weak<dyn QueueOwner>) {
        *self.parent.borrow_mut() = Some(parent);
    }

    /// Clears the back-reference; later completions reach nobody.
    pub(crate) fn detach(&self) {
        self.parent.borrow_mut().take();
    }

    pub(crate) fn add(self: &Rc<Self>, request: DocRequest) {
        if self.cancelled.get() {
            return;
        }
        self.queued.borrow_mut().push_back(request);
        self.dispatch();

        if !self.throttled.get() && self.in_flight.get() >= self.max_in_flight {
            self.throttled.set(true);
            trace!(
                in_flight = self.in_flight.get(),
                max = self.max_in_flight,
                "document queue full, throttling"
            );
            self.notify_throttle(true);
        }
    }

    /// Whether any fetch is queued or in flight.
    pub(crate) fn has_pending(&self) -> bool {
        self.in_flight.get() > 0 || !self.queued.borrow().is_empty()
    }

    /// Stops accepting work, drops queued fetches and suppresses delivery
    /// of the ones already in flight.
    pub(crate) fn cancel(&self) {
        if self.cancelled.replace(true) {
            return;
        }
        let dropped = std::mem::take(&mut *self.queued.borrow_mut());
        trace!(
            dropped = dropped.len(),
            in_flight = self.in_flight.get(),
            "document queue cancelled"
        );
        drop(dropped);
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.in_flight.get()
    }

    pub(crate) fn queued(&self) -> usize {
        self.queued.borrow().len()
    }

    fn dispatch(self: &Rc<Self>) {
        // A store that completes synchronously re-enters here through
        // `complete`; the outer loop picks up the remaining work.
        if self.dispatching.replace(true) {
            return;
        }
        while !self.cancelled.get() && self.in_flight.get() < self.max_in_flight {
            let next = self.queued.borrow_mut().pop_front();
            let Some(request) = next else {
                break;
            };
            self.in_flight.set(self.in_flight.get() + 1);

            let id = request.row.id().to_string();
            let fetch = Fetch {
                queue: Rc::clone(self),
                request: Some(request),
            };
            self.store
                .get(&id, Box::new(move |result| fetch.resolve(result)));
        }
        self.dispatching.set(false);
    }

    fn complete(self: &Rc<Self>, request: DocRequest, result: DocumentResult) {
        self.in_flight.set(self.in_flight.get() - 1);

        if !self.cancelled.get() {
            if let Some(parent) = self.parent() {
                parent.document_ready(&request.row, &result);
            }
        }

        if self.throttled.get() && self.in_flight.get() < self.max_in_flight {
            self.throttled.set(false);
            trace!(in_flight = self.in_flight.get(), "document queue drained, resuming");
            self.notify_throttle(false);
        }

        drop(request);
        self.dispatch();
    }

    fn notify_throttle(&self, enabled: bool) {
        if let Some(parent) = self.parent() {
            parent.throttle(enabled);
        }
    }

    fn parent(&self) -> Option<Rc<dyn QueueOwner>> {
        self.parent.borrow().as_ref().and_then(Weak::upgrade)
    }
}

#[cfg(test)]
mod tests {
    use std::borrow::Cow;

    use super::*;
    use crate::document::MemoryDocuments;

    #[derive(Debug, PartialEq)]
    enum Event {
        Ready(String, bool),
        Throttle(bool),
    }

    #[derive(Default)]
    struct Recorder {
        events: RefCell<Vec<Event>>,
    }

    impl QueueOwner for Recorder {
        fn document_ready(&self, row: &OwnedRow, result: &DocumentResult) {
            self.events
                .borrow_mut()
                .push(Event::Ready(row.id().to_string(), result.is_ok()));
        }

        fn throttle(&self, enabled: bool) {
            self.events.borrow_mut().push(Event::Throttle(enabled));
        }
    }

    fn row(id: &str) -> OwnedRow {
        OwnedRow::copy(&ParsedRow {
            key: Some(b"\"k\""),
            id: Some(Cow::Borrowed(id)),
            value: Some(b"1"),
            geometry: None,
        })
    }

    fn setup(store: Rc<MemoryDocuments>, max: usize) -> (Rc<DocQueue>, Rc<Recorder>) {
        let queue = DocQueue::new(store, max);
        let owner = Rc::new(Recorder::default());
        let weak: Weak<dyn QueueOwner> = Rc::downgrade(&owner) as Weak<dyn QueueOwner>;
        queue.attach(weak);
        (queue, owner)
    }

    fn request(id: &str, owner: &Rc<Recorder>) -> DocRequest {
        DocRequest::new(row(id), Rc::clone(owner) as Rc<dyn QueueOwner>)
    }

    #[test]
    fn owned_row_copies_spans() {
        let copied = OwnedRow::copy(&ParsedRow {
            key: Some(b"[1,2]"),
            id: Some(Cow::Borrowed("doc")),
            value: None,
            geometry: Some(b"{}"),
        });
        assert_eq!(copied.id(), "doc");
        assert_eq!(copied.key(), Some(&b"[1,2]"[..]));
        assert_eq!(copied.value(), None);
        assert_eq!(copied.geometry(), Some(&b"{}"[..]));
    }

    #[test]
    fn immediate_store_delivers_in_order() {
        let store = Rc::new(MemoryDocuments::new());
        store.insert("a", b"1".to_vec());
        let (queue, owner) = setup(Rc::clone(&store), 2);

        queue.add(request("a", &owner));
        queue.add(request("b", &owner));

        assert!(!queue.has_pending());
        assert_eq!(
            *owner.events.borrow(),
            vec![
                Event::Ready("a".into(), true),
                Event::Ready("b".into(), false),
            ]
        );
        assert_eq!(Rc::strong_count(&owner), 1);
    }

    #[test]
    fn ceiling_limits_in_flight() {
        let store = Rc::new(MemoryDocuments::deferred());
        let (queue, owner) = setup(Rc::clone(&store), 2);

        for id in ["a", "b", "c", "d"] {
            queue.add(request(id, &owner));
        }
        assert_eq!(queue.in_flight(), 2);
        assert_eq!(queue.queued(), 2);
        assert_eq!(store.parked_ids(), vec!["a".to_string(), "b".to_string()]);

        store.complete_next();
        assert_eq!(queue.in_flight(), 2);
        assert_eq!(queue.queued(), 1);

        store.complete_all();
        assert!(!queue.has_pending());
        assert_eq!(Rc::strong_count(&owner), 1);
    }

    #[test]
    fn throttle_fires_once_each_way() {
        let store = Rc::new(MemoryDocuments::deferred());
        let (queue, owner) = setup(Rc::clone(&store), 1);

        queue.add(request("a", &owner));
        queue.add(request("b", &owner));
        assert_eq!(*owner.events.borrow(), vec![Event::Throttle(true)]);

        store.complete_next();
        assert_eq!(
            *owner.events.borrow(),
            vec![
                Event::Throttle(true),
                Event::Ready("a".into(), false),
                Event::Throttle(false),
            ]
        );
        // "b" went out on the completion path, which never throttles.
        assert_eq!(queue.in_flight(), 1);

        store.complete_next();
        assert_eq!(owner.events.borrow().len(), 4);
        assert_eq!(
            owner.events.borrow().last(),
            Some(&Event::Ready("b".into(), false))
        );
    }

    #[test]
    fn cancel_drops_queued_and_suppresses_in_flight() {
        let store = Rc::new(MemoryDocuments::deferred());
        let (queue, owner) = setup(Rc::clone(&store), 1);

        queue.add(request("a", &owner));
        queue.add(request("b", &owner));
        assert_eq!(Rc::strong_count(&owner), 3);

        queue.cancel();
        assert_eq!(queue.queued(), 0);
        assert_eq!(Rc::strong_count(&owner), 2);
        assert!(queue.has_pending());

        queue.add(request("c", &owner));
        assert_eq!(queue.queued(), 0);

        store.complete_all();
        assert!(!queue.has_pending());
        assert_eq!(Rc::strong_count(&owner), 1);
        // Resume still fires so a paused stream is not left stuck.
        assert_eq!(
            *owner.events.borrow(),
            vec![Event::Throttle(true), Event::Throttle(false)]
        );
    }

    #[test]
    fn abandoned_fetch_is_delivered_as_error() {
        let store = Rc::new(MemoryDocuments::deferred());
        let (queue, owner) = setup(Rc::clone(&store), 4);

        queue.add(request("a", &owner));
        store.abandon_all();

        assert!(!queue.has_pending());
        assert_eq!(*owner.events.borrow(), vec![Event::Ready("a".into(), false)]);
        assert_eq!(Rc::strong_count(&owner), 1);
    }

    #[test]
    fn detached_queue_reaches_nobody() {
        let store = Rc::new(MemoryDocuments::deferred());
        let (queue, owner) = setup(Rc::clone(&store), 1);

        queue.add(request("a", &owner));
        queue.detach();
        store.complete_all();

        assert_eq!(*owner.events.borrow(), vec![Event::Throttle(true)]);
        assert_eq!(Rc::strong_count(&owner), 1);
    }
}

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::io::Read;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crossbeam::channel::{Receiver, Select, Sender};
use http::{Method, Request};
use tracing::{debug, trace, warn};
use ureq::Agent;

use crate::config::HttpConfig;
use crate::transport::{Chunk, ChunkHandler, RequestId, ResponseHead, Transport, TransportError};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

enum StreamEvent {
    Head(ResponseHead),
    Data(Vec<u8>),
    End,
    Failed(TransportError),
}

struct Stream {
    id: RequestId,
    events: Receiver<StreamEvent>,
    handler: RefCell<Option<ChunkHandler>>,
    head: RefCell<Option<ResponseHead>>,
    paused: Cell<bool>,
    closed: Cell<bool>,
    stop: Arc<AtomicBool>,
}

/// [`Transport`] over HTTP/1.1.
///
/// Each request gets a reader thread that pushes body chunks into a bounded
/// channel. Chunks are handed to handlers only from [`poll`] and [`run`], on
/// the thread that owns the transport. A paused request is not drained, so
/// its reader blocks once the channel fills and stops reading the socket.
///
/// [`poll`]: HttpTransport::poll
/// [`run`]: HttpTransport::run
pub struct HttpTransport {
    agent: Agent,
    config: HttpConfig,
    next_id: Cell<u64>,
    streams: RefCell<BTreeMap<RequestId, Rc<Stream>>>,
}

impl HttpTransport {
    pub fn new(config: HttpConfig) -> Self {
        let agent = Agent::new_with_config(
            Agent::config_builder()
                .http_status_as_error(false)
                .timeout_global(Some(Duration::from_millis(config.timeout_ms)))
                .build(),
        );
        Self {
            agent,
            config,
            next_id: Cell::new(0),
            streams: RefCell::new(BTreeMap::new()),
        }
    }

    /// True when no request is open.
    pub fn is_idle(&self) -> bool {
        self.streams.borrow().is_empty()
    }

    /// Waits up to `timeout` for one event on an unpaused request and
    /// delivers it. Returns whether anything was delivered.
    pub fn poll(&self, timeout: Duration) -> bool {
        let ready: Vec<Rc<Stream>> = self
            .streams
            .borrow()
            .values()
            .filter(|s| !s.paused.get())
            .cloned()
            .collect();
        if ready.is_empty() {
            return false;
        }

        let mut select = Select::new();
        for stream in &ready {
            select.recv(&stream.events);
        }
        let Ok(op) = select.select_timeout(timeout) else {
            return false;
        };
        let stream = &ready[op.index()];
        let event = op.recv(&stream.events).unwrap_or_else(|_| {
            StreamEvent::Failed(TransportError::Io("reader thread exited".into()))
        });

        match event {
            StreamEvent::Head(head) => {
                trace!(request = %stream.id, status = %head.status, "response head");
                *stream.head.borrow_mut() = Some(head);
            }
            StreamEvent::Data(body) => self.deliver(stream, &body, false, None),
            StreamEvent::End => self.deliver(stream, &[], true, None),
            StreamEvent::Failed(err) => self.deliver(stream, &[], true, Some(&err)),
        }
        true
    }

    /// Delivers chunks until no request is open or every open request is
    /// paused.
    pub fn run(&self) {
        loop {
            let blocked = {
                let streams = self.streams.borrow();
                streams.values().all(|s| s.paused.get())
            };
            if blocked {
                return;
            }
            self.poll(POLL_INTERVAL);
        }
    }

    fn deliver(
        &self,
        stream: &Rc<Stream>,
        body: &[u8],
        is_final: bool,
        error: Option<&TransportError>,
    ) {
        if is_final {
            self.streams.borrow_mut().remove(&stream.id);
            stream.closed.set(true);
        }
        let handler = stream.handler.borrow_mut().take();
        let Some(mut handler) = handler else {
            return;
        };
        {
            let head = stream.head.borrow();
            handler(Chunk {
                head: head.as_ref(),
                body,
                is_final,
                error,
            });
        }
        if !stream.closed.get() {
            *stream.handler.borrow_mut() = Some(handler);
        }
    }

    fn stream(&self, id: RequestId) -> Option<Rc<Stream>> {
        self.streams.borrow().get(&id).cloned()
    }
}

impl Transport for HttpTransport {
    fn issue(
        &self,
        request: Request<Vec<u8>>,
        on_chunk: ChunkHandler,
    ) -> Result<RequestId, TransportError> {
        let method = request.method().clone();
        if method != Method::GET && method != Method::POST {
            return Err(TransportError::Refused(format!("unsupported method {method}")));
        }

        let id = RequestId(self.next_id.get() + 1);
        self.next_id.set(id.0);

        let url = format!(
            "{}{}",
            self.config.base_url.trim_end_matches('/'),
            request.uri()
        );
        let (tx, rx) = crossbeam::channel::bounded(self.config.buffered_chunks.max(1));
        let stop = Arc::new(AtomicBool::new(false));

        let reader = Reader {
            agent: self.agent.clone(),
            url: url.clone(),
            request,
            chunk_size: self.config.chunk_size.max(1),
            tx,
            stop: Arc::clone(&stop),
        };
        thread::Builder::new()
            .name(format!("vista-http-{}", id.0))
            .spawn(move || reader.run())
            .map_err(|e| TransportError::Io(e.to_string()))?;

        debug!(request = %id, %method, %url, "http request issued");
        self.streams.borrow_mut().insert(
            id,
            Rc::new(Stream {
                id,
                events: rx,
                handler: RefCell::new(Some(on_chunk)),
                head: RefCell::new(None),
                paused: Cell::new(false),
                closed: Cell::new(false),
                stop,
            }),
        );
        Ok(id)
    }

    fn pause(&self, id: RequestId) {
        if let Some(stream) = self.stream(id) {
            stream.paused.set(true);
        }
    }

    fn resume(&self, id: RequestId) {
        if let Some(stream) = self.stream(id) {
            stream.paused.set(false);
        }
    }

    fn cancel(&self, id: RequestId) {
        let removed = self.streams.borrow_mut().remove(&id);
        let Some(stream) = removed else {
            return;
        };
        debug!(request = %id, "http request cancelled");
        stream.closed.set(true);
        stream.stop.store(true, Ordering::Relaxed);
        let handler = stream.handler.borrow_mut().take();
        drop(handler);
    }
}

impl Drop for HttpTransport {
    fn drop(&mut self) {
        for stream in self.streams.get_mut().values() {
            stream.stop.store(true, Ordering::Relaxed);
        }
    }
}

/// Runs a request on its own thread and forwards the response.
struct Reader {
    agent: Agent,
    url: String,
    request: Request<Vec<u8>>,
    chunk_size: usize,
    tx: Sender<StreamEvent>,
    stop: Arc<AtomicBool>,
}

impl Reader {
    fn run(self) {
        let event = match self.read() {
            Ok(()) => StreamEvent::End,
            Err(err) => {
                warn!(url = %self.url, error = %err, "http request failed");
                StreamEvent::Failed(err)
            }
        };
        // The receiver is gone once the request was cancelled.
        let _ = self.tx.send(event);
    }

    fn read(&self) -> Result<(), TransportError> {
        let response = if *self.request.method() == Method::POST {
            let mut builder = self.agent.post(&self.url);
            for (name, value) in self.request.headers() {
                builder = builder.header(name, value);
            }
            builder.send(self.request.body().as_slice())
        } else {
            let mut builder = self.agent.get(&self.url);
            for (name, value) in self.request.headers() {
                builder = builder.header(name, value);
            }
            builder.call()
        }
        .map_err(map_error)?;

        let head = ResponseHead {
            status: response.status(),
            headers: response.headers().clone(),
        };
        if !self.forward(StreamEvent::Head(head)) {
            return Ok(());
        }

        let mut body = response.into_body().into_reader();
        let mut buf = vec![0u8; self.chunk_size];
        loop {
            let n = body
                .read(&mut buf)
                .map_err(|e| TransportError::Io(e.to_string()))?;
            if n == 0 {
                return Ok(());
            }
            if !self.forward(StreamEvent::Data(buf[..n].to_vec())) {
                return Ok(());
            }
        }
    }

    // Blocks while the channel is full. Returns false once the request has
    // been cancelled.
    fn forward(&self, event: StreamEvent) -> bool {
        if self.stop.load(Ordering::Relaxed) {
            return false;
        }
        self.tx.send(event).is_ok()
    }
}

fn map_error(err: ureq::Error) -> TransportError {
    match err {
        ureq::Error::Timeout(_) => TransportError::Timeout,
        ureq::Error::Io(e) => TransportError::Io(e.to_string()),
        other => TransportError::Network(other.to_string()),
    }
}

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};

/// A document fetched on behalf of a view row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub id: String,
    pub value: Vec<u8>,
    pub cas: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DocumentError {
    #[error("document not found: {0}")]
    NotFound(String),

    #[error("document fetch failed: {0}")]
    Fetch(String),

    /// The store dropped the fetch without completing it.
    #[error("document fetch abandoned")]
    Abandoned,
}

pub type DocumentResult = Result<Document, DocumentError>;

pub type DocumentCallback = Box<dyn FnOnce(DocumentResult)>;

/// Source of full documents for rows fetched with `include_docs`.
///
/// `done` is called at most once, either before `get` returns or later from
/// the caller's event loop. Dropping `done` without calling it abandons the
/// fetch, which the row sees as [`DocumentError::Abandoned`].
pub trait DocumentStore {
    fn get(&self, id: &str, done: DocumentCallback);
}

/// In-memory document store.
///
/// In deferred mode fetches are parked until [`complete_next`] or
/// [`complete_all`] is called, which lets a caller interleave document
/// completions with response chunks.
///
/// [`complete_next`]: MemoryDocuments::complete_next
/// [`complete_all`]: MemoryDocuments::complete_all
#[derive(Default)]
pub struct MemoryDocuments {
    docs: RefCell<HashMap<String, Document>>,
    deferred: bool,
    parked: RefCell<VecDeque<(String, DocumentCallback)>>,
    next_cas: Cell<u64>,
}

impl MemoryDocuments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deferred() -> Self {
        Self {
            deferred: true,
            ..Self::default()
        }
    }

    pub fn insert(&self, id: impl Into<String>, value: impl Into<Vec<u8>>) {
        let id = id.into();
        let cas = self.next_cas.get() + 1;
        self.next_cas.set(cas);
        let doc = Document {
            id: id.clone(),
            value: value.into(),
            cas,
        };
        self.docs.borrow_mut().insert(id, doc);
    }

    /// Number of fetches waiting for completion.
    pub fn parked(&self) -> usize {
        self.parked.borrow().len()
    }

    /// Ids of parked fetches in the order they were requested.
    pub fn parked_ids(&self) -> Vec<String> {
        self.parked.borrow().iter().map(|(id, _)| id.clone()).collect()
    }

    /// Completes the oldest parked fetch. Returns false if none was parked.
    pub fn complete_next(&self) -> bool {
        // Release the borrow before running the callback, which may park
        // another fetch.
        let next = self.parked.borrow_mut().pop_front();
        match next {
            Some((id, done)) => {
                done(self.lookup(&id));
                true
            }
            None => false,
        }
    }

    /// Completes parked fetches, including ones parked while completing,
    /// until none are left. Returns how many were completed.
    pub fn complete_all(&self) -> usize {
        let mut n = 0;
        while self.complete_next() {
            n += 1;
        }
        n
    }

    /// Drops every parked fetch without completing it.
    pub fn abandon_all(&self) -> usize {
        let parked = std::mem::take(&mut *self.parked.borrow_mut());
        parked.len()
    }

    fn lookup(&self, id: &str) -> DocumentResult {
        self.docs
            .borrow()
            .get(id)
            .cloned()
            .ok_or_else(|| DocumentError::NotFound(id.to_string()))
    }
}

impl DocumentStore for MemoryDocuments {
    fn get(&self, id: &str, done: DocumentCallback) {
        if self.deferred {
            self.parked.borrow_mut().push_back((id.to_string(), done));
        } else {
            done(self.lookup(id));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;

    fn capture() -> (Rc<RefCell<Vec<DocumentResult>>>, impl Fn() -> DocumentCallback) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let make = move || -> DocumentCallback {
            let sink = Rc::clone(&sink);
            Box::new(move |r| sink.borrow_mut().push(r))
        };
        (seen, make)
    }

    #[test]
    fn immediate_get() {
        let store = MemoryDocuments::new();
        store.insert("a", br#"{"n":1}"#.to_vec());
        let (seen, done) = capture();

        store.get("a", done());
        store.get("missing", done());

        let seen = seen.borrow();
        assert_eq!(seen[0].as_ref().unwrap().value, br#"{"n":1}"#);
        assert_eq!(seen[1], Err(DocumentError::NotFound("missing".into())));
    }

    #[test]
    fn deferred_get_waits() {
        let store = MemoryDocuments::deferred();
        store.insert("a", b"1".to_vec());
        store.insert("b", b"2".to_vec());
        let (seen, done) = capture();

        store.get("b", done());
        store.get("a", done());
        assert_eq!(store.parked(), 2);
        assert_eq!(store.parked_ids(), vec!["b".to_string(), "a".to_string()]);
        assert!(seen.borrow().is_empty());

        assert!(store.complete_next());
        assert_eq!(seen.borrow()[0].as_ref().unwrap().id, "b");
        assert_eq!(store.complete_all(), 1);
        assert!(!store.complete_next());
    }

    #[test]
    fn cas_increases_per_insert() {
        let store = MemoryDocuments::new();
        store.insert("a", b"1".to_vec());
        store.insert("a", b"2".to_vec());
        let (seen, done) = capture();
        store.get("a", done());
        let doc = seen.borrow()[0].clone().unwrap();
        assert_eq!(doc.value, b"2");
        assert_eq!(doc.cas, 2);
    }

    #[test]
    fn abandon_drops_callbacks() {
        let store = MemoryDocuments::deferred();
        let (seen, done) = capture();
        store.get("a", done());
        assert_eq!(store.abandon_all(), 1);
        assert_eq!(store.parked(), 0);
        assert!(seen.borrow().is_empty());
    }
}

use crate::document::DocumentResult;
use crate::error::ViewError;
use crate::transport::ResponseHead;

/// One notification delivered to a query's callback.
///
/// Everything is borrowed for the duration of the callback. Row fields are
/// raw JSON text except `id`, which is decoded. A callback that needs a row
/// later must copy it.
#[derive(Debug, Clone, Copy, Default)]
pub struct ViewResponse<'a> {
    /// Set only on the terminal notification, and only when the query failed.
    pub error: Option<&'a ViewError>,
    /// The response the notification came from, when one is at hand.
    pub head: Option<&'a ResponseHead>,
    pub key: Option<&'a [u8]>,
    pub id: Option<&'a str>,
    pub value: Option<&'a [u8]>,
    pub geometry: Option<&'a [u8]>,
    /// The unparsed row, for queries issued with `no_parse_rows`.
    pub row: Option<&'a [u8]>,
    /// Everything in the body except the rows, on a terminal notification
    /// for a body that ended cleanly.
    pub meta: Option<&'a [u8]>,
    /// The fetched document, for queries issued with `include_docs`.
    pub document: Option<&'a DocumentResult>,
    pub is_final: bool,
    /// The terminal notification was put together locally: the query failed
    /// without the server answering with an error status, and the body never
    /// reached a well-formed end.
    pub client_generated: bool,
}

impl ViewResponse<'_> {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

pub type ViewCallback = Box<dyn FnMut(&ViewResponse<'_>)>;

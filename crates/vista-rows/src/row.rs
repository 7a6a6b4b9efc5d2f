use std::borrow::Cow;

use serde::Deserialize;
use serde_json::value::RawValue;

use crate::error::CodecError;

/// One element of the `rows` array, borrowed from the codec's buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Row<'a> {
    raw: &'a [u8],
}

/// The fields of a row. `key`, `value` and `geometry` are raw JSON text;
/// `id` is the decoded document id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRow<'a> {
    pub key: Option<&'a [u8]>,
    pub id: Option<Cow<'a, str>>,
    pub value: Option<&'a [u8]>,
    pub geometry: Option<&'a [u8]>,
}

#[derive(Deserialize)]
struct RowFields<'a> {
    #[serde(borrow, default)]
    key: Option<&'a RawValue>,
    #[serde(borrow, default)]
    id: Option<&'a RawValue>,
    #[serde(borrow, default)]
    value: Option<&'a RawValue>,
    #[serde(borrow, default)]
    geometry: Option<&'a RawValue>,
}

impl<'a> Row<'a> {
    pub(crate) fn new(raw: &'a [u8]) -> Self {
        Self { raw }
    }

    /// The row exactly as the server sent it.
    pub fn raw(&self) -> &'a [u8] {
        self.raw
    }

    pub fn parse(&self) -> Result<ParsedRow<'a>, CodecError> {
        let fields: RowFields<'a> = serde_json::from_slice(self.raw)
            .map_err(|e| CodecError::MalformedRow(e.to_string()))?;
        let id = match fields.id {
            Some(raw) => Some(decode_id(raw)?),
            None => None,
        };
        Ok(ParsedRow {
            key: fields.key.map(raw_bytes),
            id,
            value: fields.value.map(raw_bytes),
            geometry: fields.geometry.map(raw_bytes),
        })
    }
}

impl ParsedRow<'_> {
    /// Whether the row references a document that can be fetched.
    pub fn has_document(&self) -> bool {
        self.id.as_deref().is_some_and(|id| !id.is_empty())
    }
}

fn raw_bytes(raw: &RawValue) -> &[u8] {
    raw.get().as_bytes()
}

// Borrows the id straight out of the row unless it needs unescaping.
fn decode_id(raw: &RawValue) -> Result<Cow<'_, str>, CodecError> {
    let text = raw.get();
    let inner = text
        .strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .ok_or_else(|| CodecError::MalformedRow(format!("row id is not a string: {text}")))?;
    if !inner.contains('\\') {
        return Ok(Cow::Borrowed(inner));
    }
    serde_json::from_str::<String>(text)
        .map(Cow::Owned)
        .map_err(|e| CodecError::MalformedRow(e.to_string()))
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("response body is not a JSON object (found {0:?} at offset {1})")]
    NotAnObject(char, usize),

    #[error("unexpected {0:?} in rows array at offset {1}")]
    UnexpectedByte(char, usize),

    #[error("unbalanced {0:?} at offset {1}")]
    Unbalanced(char, usize),

    #[error("trailing data after response body at offset {0}")]
    TrailingData(usize),

    #[error("malformed row: {0}")]
    MalformedRow(String),
}

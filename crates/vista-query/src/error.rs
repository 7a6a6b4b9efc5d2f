/// Errors raised before a view query is handed to the transport.
///
/// None of these ever reach the row callback: a query that fails validation
/// was never started.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("include_docs cannot be combined with no_parse_rows")]
    OptionsConflict,

    #[error("options string is {len} bytes, limit is {limit}")]
    RequestTooLarge { len: usize, limit: usize },

    #[error("out of memory building request")]
    OutOfMemory,
}

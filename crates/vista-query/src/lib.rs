mod error;
mod path;
mod query;

pub use error::QueryError;
pub use path::{DESIGN_PREFIX, MAX_OPTIONS_LEN, SPATIAL_SEGMENT, VIEW_SEGMENT};
pub use query::{IndexKind, ViewFlags, ViewQuery};

mod codec;
mod error;
mod row;

pub use codec::{RowCodec, RowEvent};
pub use error::CodecError;
pub use row::{ParsedRow, Row};

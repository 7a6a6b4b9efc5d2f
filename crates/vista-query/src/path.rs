use crate::error::QueryError;
use crate::query::IndexKind;

pub const DESIGN_PREFIX: &str = "_design/";
pub const VIEW_SEGMENT: &str = "/_view/";
pub const SPATIAL_SEGMENT: &str = "/_spatial/";

/// Longest options string accepted, keeps the request line bounded.
pub const MAX_OPTIONS_LEN: usize = 2048;

pub(crate) fn build(
    design: &str,
    kind: IndexKind,
    view: &str,
    options: Option<&str>,
) -> Result<String, QueryError> {
    if let Some(opts) = options {
        if opts.len() > MAX_OPTIONS_LEN {
            return Err(QueryError::RequestTooLarge {
                len: opts.len(),
                limit: MAX_OPTIONS_LEN,
            });
        }
    }

    let segment = match kind {
        IndexKind::View => VIEW_SEGMENT,
        IndexKind::Spatial => SPATIAL_SEGMENT,
    };

    let mut len = DESIGN_PREFIX.len() + design.len() + segment.len() + view.len();
    if let Some(opts) = options {
        len += 1 + opts.len();
    }

    let mut path = String::new();
    path.try_reserve_exact(len)
        .map_err(|_| QueryError::OutOfMemory)?;

    path.push_str(DESIGN_PREFIX);
    path.push_str(design);
    path.push_str(segment);
    path.push_str(view);
    if let Some(opts) = options {
        path.push('?');
        path.push_str(opts);
    }
    Ok(path)
}

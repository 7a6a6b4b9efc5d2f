use serde::{Deserialize, Serialize};

use crate::error::QueryError;
use crate::path;

/// Which index a view query runs against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexKind {
    #[default]
    View,
    Spatial,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewFlags {
    /// Fetch the full document for every row carrying a document id.
    #[serde(default)]
    pub include_docs: bool,
    /// Hand rows to the caller unparsed.
    #[serde(default)]
    pub no_parse_rows: bool,
    #[serde(default)]
    pub spatial: bool,
}

impl ViewFlags {
    pub fn index_kind(&self) -> IndexKind {
        if self.spatial {
            IndexKind::Spatial
        } else {
            IndexKind::View
        }
    }
}

/// A single view query command.
///
/// `options` is an already URL-encoded query string (without the leading
/// `?`). When `body` is present the query is sent as a POST with a JSON body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewQuery {
    pub design: String,
    pub view: String,
    #[serde(default)]
    pub options: Option<String>,
    #[serde(default)]
    pub body: Option<Vec<u8>>,
    #[serde(default)]
    pub flags: ViewFlags,
    /// Ceiling on concurrent document fetches. `None` uses the client default.
    #[serde(default)]
    pub max_concurrent_docs: Option<usize>,
}

impl ViewQuery {
    pub fn new(design: impl Into<String>, view: impl Into<String>) -> Self {
        Self {
            design: design.into(),
            view: view.into(),
            ..Default::default()
        }
    }

    pub fn options(mut self, options: impl Into<String>) -> Self {
        self.options = Some(options.into());
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn include_docs(mut self) -> Self {
        self.flags.include_docs = true;
        self
    }

    pub fn no_parse_rows(mut self) -> Self {
        self.flags.no_parse_rows = true;
        self
    }

    pub fn spatial(mut self) -> Self {
        self.flags.spatial = true;
        self
    }

    pub fn max_concurrent_docs(mut self, max: usize) -> Self {
        self.max_concurrent_docs = Some(max);
        self
    }

    /// Checks the command without building anything.
    pub fn validate(&self) -> Result<(), QueryError> {
        if self.design.is_empty() {
            return Err(QueryError::InvalidArgument("design document name is empty"));
        }
        if self.view.is_empty() {
            return Err(QueryError::InvalidArgument("view name is empty"));
        }
        if self.flags.include_docs && self.flags.no_parse_rows {
            return Err(QueryError::OptionsConflict);
        }
        if self.max_concurrent_docs == Some(0) {
            return Err(QueryError::InvalidArgument(
                "max_concurrent_docs must be at least 1",
            ));
        }
        Ok(())
    }

    /// Validates the command and returns the request path, relative to the
    /// bucket's view endpoint, e.g. `_design/beer/_view/by_name?limit=10`.
    pub fn path(&self) -> Result<String, QueryError> {
        self.validate()?;
        path::build(
            &self.design,
            self.flags.index_kind(),
            &self.view,
            self.options.as_deref(),
        )
    }

    pub fn is_post(&self) -> bool {
        self.body.as_ref().is_some_and(|b| !b.is_empty())
    }
}

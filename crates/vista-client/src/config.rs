use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_CONCURRENT_DOCS: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Document fetches allowed in flight per query when the query does not
    /// set its own ceiling.
    pub max_concurrent_docs: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_concurrent_docs: DEFAULT_MAX_CONCURRENT_DOCS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Scheme, host and bucket prefix that view paths are appended to.
    pub base_url: String,
    pub timeout_ms: u64,
    /// Read size for response bodies.
    pub chunk_size: usize,
    /// Chunks a reader thread may buffer before it blocks.
    pub buffered_chunks: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8092/default".into(),
            timeout_ms: 75_000,
            chunk_size: 8 * 1024,
            buffered_chunks: 16,
        }
    }
}

impl HttpConfig {
    /// Defaults overridden by `VISTA_URL`, `VISTA_TIMEOUT_MS` and
    /// `VISTA_CHUNK_SIZE`. Unparseable numbers fall back to the default.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            base_url: std::env::var("VISTA_URL").unwrap_or(defaults.base_url),
            timeout_ms: std::env::var("VISTA_TIMEOUT_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.timeout_ms),
            chunk_size: std::env::var("VISTA_CHUNK_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.chunk_size),
            buffered_chunks: defaults.buffered_chunks,
        }
    }
}

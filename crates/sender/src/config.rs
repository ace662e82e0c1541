//! Upload tuning knobs.

use std::collections::HashMap;
use std::sync::Arc;

use chunkferry_protocol::{DEFAULT_CHUNK_SIZE, DEFAULT_MAX_RETRIES, DEFAULT_NUM_PARALLEL};

/// Callback invoked with the fraction of pieces acknowledged so far.
pub type ProgressCallback = Arc<dyn Fn(f64) + Send + Sync>;

/// Configuration for one upload.
#[derive(Clone)]
pub struct SenderConfig {
    pub(crate) url: String,
    pub(crate) chunk_size: u64,
    pub(crate) extra_headers: HashMap<String, String>,
    pub(crate) num_parallel: usize,
    pub(crate) max_retries: u32,
    pub(crate) progress: ProgressCallback,
    pub(crate) fail_after: Option<u64>,
    pub(crate) flakiness: f64,
}

impl SenderConfig {
    /// Creates a config for the given destination URL with defaults: 2 MiB
    /// chunks, 2 chunks in flight, 5 retries per chunk, no test aids.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            extra_headers: HashMap::new(),
            num_parallel: DEFAULT_NUM_PARALLEL,
            max_retries: DEFAULT_MAX_RETRIES,
            progress: Arc::new(|_| {}),
            fail_after: None,
            flakiness: 0.0,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Extra headers sent with every chunk, e.g. authentication.
    pub fn with_extra_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.extra_headers = headers;
        self
    }

    pub fn with_num_parallel(mut self, num_parallel: usize) -> Self {
        self.num_parallel = num_parallel.max(1);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_progress(mut self, progress: impl Fn(f64) + Send + Sync + 'static) -> Self {
        self.progress = Arc::new(progress);
        self
    }

    /// Test aid: every dispatch after the first `n` fails locally instead of
    /// reaching the transport.
    pub fn with_fail_after(mut self, n: u64) -> Self {
        self.fail_after = Some(n);
        self
    }

    /// Test aid: fraction of dispatches to fail locally.
    pub fn with_flakiness(mut self, flakiness: f64) -> Self {
        self.flakiness = flakiness;
        self
    }
}

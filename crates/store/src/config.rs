//! Store configuration.
//!
//! Configuration is resolved once, when the store is constructed, and then
//! passed into the reader/writer services. Nothing in the engine reads
//! process-wide state during an operation; this keeps behaviour consistent
//! across concurrent operations and test harnesses.

use std::path::{Path, PathBuf};

/// Default diversion threshold for public-tag attributes, in bytes.
///
/// Values whose serialized length meets or exceeds this are written to the
/// content-addressed bulk store instead of inline. 131,074 keeps a full
/// 256x256 16-bit row-by-row attribute inline while diverting anything
/// larger.
pub const DEFAULT_BULKDATA_THRESHOLD: usize = 131_074;

/// Default diversion threshold for private (odd-group) attributes, in bytes.
///
/// Private attributes are diverted much earlier: they are rarely queried,
/// frequently repeated byte-identical across instances (vendor overlays,
/// calibration blobs), so content addressing deduplicates them well.
pub const DEFAULT_PRIVATE_BULKDATA_THRESHOLD: usize = 1_024;

/// Default number of attempts for the optimistic retry-write protocol.
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

/// Engine configuration resolved at construction time.
#[derive(Clone, Debug)]
pub struct StoreConfig {
    root_dir: PathBuf,
    bulkdata_threshold: usize,
    private_bulkdata_threshold: usize,
    gzip_json: bool,
    retry_attempts: u32,
}

impl StoreConfig {
    /// Creates a configuration with the documented defaults rooted at
    /// `root_dir`.
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            bulkdata_threshold: DEFAULT_BULKDATA_THRESHOLD,
            private_bulkdata_threshold: DEFAULT_PRIVATE_BULKDATA_THRESHOLD,
            gzip_json: true,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
        }
    }

    /// Overrides the public-tag bulk-data threshold.
    pub fn with_bulkdata_threshold(mut self, bytes: usize) -> Self {
        self.bulkdata_threshold = bytes;
        self
    }

    /// Overrides the private-tag bulk-data threshold.
    pub fn with_private_bulkdata_threshold(mut self, bytes: usize) -> Self {
        self.private_bulkdata_threshold = bytes;
        self
    }

    /// Enables or disables gzip wrapping of stored JSON documents.
    pub fn with_gzip_json(mut self, gzip: bool) -> Self {
        self.gzip_json = gzip;
        self
    }

    /// Overrides the retry-write attempt count. Clamped to at least 1.
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts.max(1);
        self
    }

    /// Base directory under which the whole `studies/` hierarchy lives.
    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    pub fn bulkdata_threshold(&self) -> usize {
        self.bulkdata_threshold
    }

    pub fn private_bulkdata_threshold(&self) -> usize {
        self.private_bulkdata_threshold
    }

    pub fn gzip_json(&self) -> bool {
        self.gzip_json
    }

    pub fn retry_attempts(&self) -> u32 {
        self.retry_attempts
    }
}

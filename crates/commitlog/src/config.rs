use serde::{Deserialize, Serialize};

const DEFAULT_MAX_BYTES: u64 = 1024;

/// Segment sizing configuration for a [`crate::Log`].
///
/// # Example
/// ```
/// use commitlog::LogConfig;
///
/// let config = LogConfig::builder()
///     .max_store_bytes(4096)
///     .max_index_bytes(4096)
///     .build();
/// assert_eq!(config.initial_offset, 0);
/// ```
#[derive(Clone, Debug, Serialize, Deserialize, bon::Builder)]
pub struct LogConfig {
    /// Store file size at which the active segment stops accepting appends.
    #[builder(default = DEFAULT_MAX_BYTES)]
    pub max_store_bytes: u64,
    /// Index file size the memory map is pre-sized to.
    #[builder(default = DEFAULT_MAX_BYTES)]
    pub max_index_bytes: u64,
    /// Offset assigned to the first record of an empty log.
    #[builder(default = 0)]
    pub initial_offset: u64,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            max_store_bytes: DEFAULT_MAX_BYTES,
            max_index_bytes: DEFAULT_MAX_BYTES,
            initial_offset: 0,
        }
    }
}

impl LogConfig {
    /// Zero-valued limits fall back to the defaults so a partially filled
    /// config never produces a segment that is maxed from the start.
    pub(crate) fn normalized(mut self) -> Self {
        if self.max_store_bytes == 0 {
            self.max_store_bytes = DEFAULT_MAX_BYTES;
        }
        if self.max_index_bytes == 0 {
            self.max_index_bytes = DEFAULT_MAX_BYTES;
        }
        self
    }
}

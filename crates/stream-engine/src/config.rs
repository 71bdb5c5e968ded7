use crate::ingest::CompactionPolicy;
use crate::pool::MAX_BUFFER_BYTES;

/// Tuning parameters fixed for the lifetime of an engine.
#[derive(Clone, Copy, Debug)]
pub struct EngineConfig {
    /// Number of reusable hardware buffers in the pool.
    pub buffer_count: usize,
    /// Target duration of one buffer, in seconds. Smaller means lower
    /// latency but more callback churn.
    pub target_latency: f64,
    /// Ceiling on the derived per-buffer capacity, in bytes.
    pub max_buffer_bytes: usize,
    /// When the ingest queue physically drops its consumed prefix.
    pub compaction: CompactionPolicy,
}

impl Default for EngineConfig {
    /// Defaults tuned for conversational-latency streaming.
    fn default() -> Self {
        Self {
            buffer_count: 3,
            target_latency: 0.04,
            max_buffer_bytes: MAX_BUFFER_BYTES,
            compaction: CompactionPolicy::default(),
        }
    }
}

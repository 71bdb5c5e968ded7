//! Engine events and playback counters surfaced to the host.
//!
//! Failures on the driver callback path have no caller to return to, so
//! they are published on an event channel instead; counters give the host a
//! cheap snapshot of pipeline health without subscribing to events.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::driver::BufferId;
use crate::error::EngineError;
use crate::pool::ReleaseError;

/// Asynchronous notifications observed via
/// [`crate::engine::PlaybackEngine::events`].
#[derive(Debug)]
pub enum EngineEvent {
    /// Playback started or resumed.
    Started,
    /// Playback stopped; pending submissions were cancelled.
    Stopped,
    /// The driver reported a running-state transition.
    RunningChanged(bool),
    /// A refill-cycle resubmission failed; the buffer was left Free and the
    /// next cycle will retry naturally.
    ResubmitFailed {
        buffer: BufferId,
        error: EngineError,
    },
    /// A completion arrived for a buffer that was not Submitted.
    ReleaseViolation(ReleaseError),
}

/// Snapshot of the engine's counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Buffers handed to the hardware, including silent ones.
    pub submitted_buffers: u64,
    /// Buffers submitted as silence because the ingest queue was empty.
    pub silent_buffers: u64,
    /// Chunks accepted by `feed`.
    pub ingested_chunks: u64,
    /// Total bytes accepted by `feed`.
    pub ingested_bytes: u64,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub submitted_buffers: AtomicU64,
    pub silent_buffers: AtomicU64,
    pub ingested_chunks: AtomicU64,
    pub ingested_bytes: AtomicU64,
}

impl Counters {
    pub fn snapshot(&self) -> EngineStats {
        EngineStats {
            submitted_buffers: self.submitted_buffers.load(Ordering::Relaxed),
            silent_buffers: self.silent_buffers.load(Ordering::Relaxed),
            ingested_chunks: self.ingested_chunks.load(Ordering::Relaxed),
            ingested_bytes: self.ingested_bytes.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_counters() {
        let counters = Counters::default();
        counters.submitted_buffers.store(5, Ordering::Relaxed);
        counters.silent_buffers.store(2, Ordering::Relaxed);
        counters.ingested_chunks.store(9, Ordering::Relaxed);
        counters.ingested_bytes.store(1024, Ordering::Relaxed);
        assert_eq!(
            counters.snapshot(),
            EngineStats {
                submitted_buffers: 5,
                silent_buffers: 2,
                ingested_chunks: 9,
                ingested_bytes: 1024,
            }
        );
    }
}

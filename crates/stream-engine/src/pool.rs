//! Fixed pool of reusable playback buffers.
//!
//! Buffers are allocated once at configure time and cycle through
//! Free → Filling → Submitted → Free for the whole session. Pool membership
//! never changes after configuration; teardown frees everything at once.

use thiserror::Error;

use crate::driver::{BufferId, OutputDriver};
use crate::error::EngineError;
use crate::format::AudioFormat;

/// Upper bound on a derived buffer size, in bytes.
pub const MAX_BUFFER_BYTES: usize = 0x5000;

/// Lifecycle state of one pool slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferState {
    Free,
    Filling,
    Submitted,
}

/// Describes one packet inside a variable-rate buffer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PacketDescription {
    pub start_offset: u64,
    pub variable_frames: u32,
    pub data_byte_size: u32,
}

/// Protocol violations detected by [`BufferPool::release`].
///
/// A double release is a lifecycle bug in the caller or driver, reported
/// rather than silently accepted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReleaseError {
    #[error("unknown buffer {0:?}")]
    UnknownBuffer(BufferId),
    #[error("buffer {id:?} released while {state:?}, expected Submitted")]
    NotSubmitted { id: BufferId, state: BufferState },
}

/// One fixed-capacity buffer slot.
#[derive(Debug)]
pub struct PlaybackBuffer {
    id: BufferId,
    data: Vec<u8>,
    filled: usize,
    state: BufferState,
    /// Present only for variable-rate formats.
    packet_descriptions: Option<Vec<PacketDescription>>,
}

impl PlaybackBuffer {
    pub fn id(&self) -> BufferId {
        self.id
    }

    pub fn state(&self) -> BufferState {
        self.state
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn filled(&self) -> usize {
        self.filled
    }

    pub fn has_packet_descriptions(&self) -> bool {
        self.packet_descriptions.is_some()
    }

    /// Full-capacity scratch space for the refill cycle to write into.
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Record how many bytes of the scratch space are meaningful.
    pub fn set_filled(&mut self, filled: usize) {
        debug_assert!(filled <= self.data.len());
        self.filled = filled.min(self.data.len());
    }

    /// Zero the whole buffer and mark it fully filled.
    ///
    /// Used when the ingest queue is empty: submitting full-capacity silence
    /// keeps the hardware fed instead of starving it.
    pub fn write_silence(&mut self) {
        self.data.fill(0);
        self.filled = self.data.len();
    }
}

/// Derive the per-buffer byte capacity from format, packet size and target
/// latency, clamped to `max_bytes`.
pub fn derive_buffer_size(
    format: &AudioFormat,
    max_packet_size: u32,
    latency_seconds: f64,
    max_bytes: usize,
) -> usize {
    let bytes_for_time = format.sample_rate * f64::from(max_packet_size) * latency_seconds;
    if bytes_for_time >= max_bytes as f64 {
        max_bytes
    } else {
        bytes_for_time as usize
    }
}

/// Owns the N buffer slots of a session.
#[derive(Debug)]
pub struct BufferPool {
    buffers: Vec<PlaybackBuffer>,
}

impl BufferPool {
    /// Allocate `buffer_count` driver buffers sized for `target_latency`.
    ///
    /// The packet size comes from the format when it is constant-rate and
    /// from the driver's maximum-output-packet-size query otherwise. A
    /// derived capacity of zero is rejected.
    pub fn configure(
        format: &AudioFormat,
        buffer_count: usize,
        target_latency: f64,
        max_bytes: usize,
        driver: &mut dyn OutputDriver,
    ) -> Result<Self, EngineError> {
        if buffer_count == 0 {
            return Err(EngineError::Configuration(
                "buffer count must be at least 1".into(),
            ));
        }
        let max_packet_size = if format.bytes_per_packet != 0 {
            format.bytes_per_packet
        } else {
            driver.max_output_packet_size()?
        };
        let capacity = derive_buffer_size(format, max_packet_size, target_latency, max_bytes);
        if capacity == 0 {
            return Err(EngineError::Configuration(format!(
                "derived buffer capacity is zero (rate {} Hz, packet {} B, latency {} s)",
                format.sample_rate, max_packet_size, target_latency
            )));
        }
        tracing::debug!(
            capacity_bytes = capacity,
            buffers = buffer_count,
            vbr = format.is_vbr(),
            "allocating playback buffers"
        );

        let mut buffers = Vec::with_capacity(buffer_count);
        for _ in 0..buffer_count {
            let id = driver.allocate_buffer(capacity)?;
            buffers.push(PlaybackBuffer {
                id,
                data: vec![0; capacity],
                filled: 0,
                state: BufferState::Free,
                packet_descriptions: format
                    .is_vbr()
                    .then(|| vec![PacketDescription::default()]),
            });
        }
        Ok(Self { buffers })
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn capacity_bytes(&self) -> usize {
        self.buffers.first().map_or(0, PlaybackBuffer::capacity)
    }

    pub fn free_count(&self) -> usize {
        self.buffers
            .iter()
            .filter(|b| b.state == BufferState::Free)
            .count()
    }

    /// Hand out a Free buffer for filling, or `None` when all are busy.
    ///
    /// A `None` here is the pool's backpressure signal.
    pub fn acquire_free(&mut self) -> Option<&mut PlaybackBuffer> {
        let buf = self
            .buffers
            .iter_mut()
            .find(|b| b.state == BufferState::Free)?;
        buf.state = BufferState::Filling;
        Some(buf)
    }

    /// Submit a Filling buffer's bytes to the driver.
    ///
    /// On driver failure the buffer returns to Free (never stranded) and
    /// the error propagates.
    pub fn submit(
        &mut self,
        id: BufferId,
        driver: &mut dyn OutputDriver,
    ) -> Result<(), EngineError> {
        let buf = self
            .buffers
            .iter_mut()
            .find(|b| b.id == id)
            .ok_or_else(|| EngineError::Configuration(format!("unknown buffer {id:?}")))?;
        debug_assert_eq!(buf.state, BufferState::Filling);
        match driver.enqueue_buffer(id, &buf.data[..buf.filled]) {
            Ok(()) => {
                buf.state = BufferState::Submitted;
                Ok(())
            }
            Err(err) => {
                buf.state = BufferState::Free;
                buf.filled = 0;
                Err(EngineError::Hardware(err))
            }
        }
    }

    /// Return a drained buffer to the pool: Submitted → Free.
    pub fn release(&mut self, id: BufferId) -> Result<(), ReleaseError> {
        let buf = self
            .buffers
            .iter_mut()
            .find(|b| b.id == id)
            .ok_or(ReleaseError::UnknownBuffer(id))?;
        if buf.state != BufferState::Submitted {
            return Err(ReleaseError::NotSubmitted {
                id,
                state: buf.state,
            });
        }
        buf.state = BufferState::Free;
        buf.filled = 0;
        Ok(())
    }

    /// Reclaim every Submitted buffer, used when `stop` cancels pending
    /// submissions.
    pub fn reclaim_submitted(&mut self) {
        for buf in &mut self.buffers {
            if buf.state == BufferState::Submitted {
                buf.state = BufferState::Free;
                buf.filled = 0;
            }
        }
    }
}

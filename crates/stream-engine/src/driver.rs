//! Hardware output-queue driver contract.
//!
//! The engine never talks to audio hardware directly; it drives an
//! [`OutputDriver`], which owns the platform queue and invokes the
//! completion callback once per drained buffer, on a thread of the driver's
//! choosing. The callback must return promptly; the engine's refill cycle
//! is bounded and non-blocking to match.
//!
//! [`crate::cpal_driver::CpalDriver`] is the portable reference
//! implementation; tests use a scripted mock.

use std::sync::Arc;

use crate::error::DriverError;
use crate::format::AudioFormat;

/// Identifies one hardware buffer owned by a driver queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BufferId(pub u32);

/// Callbacks registered when the output queue is created.
#[derive(Clone)]
pub struct DriverCallbacks {
    /// Invoked once per drained buffer, on an unspecified thread.
    pub completion: Arc<dyn Fn(BufferId) + Send + Sync>,
    /// Invoked when the hardware queue starts or stops running.
    pub running_changed: Arc<dyn Fn(bool) + Send + Sync>,
}

/// Contract for a hardware audio output queue.
///
/// Call order: `create_queue`, then `allocate_buffer` for each pool slot,
/// then any number of `enqueue_buffer`/`start`/`stop` cycles, then
/// `dispose`. Calling `create_queue` again replaces the previous queue and
/// its buffers. `dispose` must be safe to call at any point and must not
/// fire further callbacks afterwards.
pub trait OutputDriver: Send {
    /// Create the output queue for `format` and register callbacks.
    fn create_queue(
        &mut self,
        format: &AudioFormat,
        callbacks: DriverCallbacks,
    ) -> Result<(), DriverError>;

    /// Allocate one reusable hardware buffer of `byte_size` bytes.
    fn allocate_buffer(&mut self, byte_size: usize) -> Result<BufferId, DriverError>;

    /// Hand `data` to the hardware for playback through buffer `id`.
    ///
    /// The driver copies the bytes; the caller's storage is free for reuse
    /// as soon as this returns.
    fn enqueue_buffer(&mut self, id: BufferId, data: &[u8]) -> Result<(), DriverError>;

    fn start(&mut self) -> Result<(), DriverError>;

    /// Halt playback and drop pending submissions without firing their
    /// completions.
    fn stop(&mut self) -> Result<(), DriverError>;

    /// Tear the queue down. Idempotent; no callbacks fire afterwards.
    fn dispose(&mut self);

    /// Largest packet the hardware will produce, in bytes.
    ///
    /// Queried for buffer sizing when the format itself does not pin a
    /// packet size (variable bit rate).
    fn max_output_packet_size(&self) -> Result<u32, DriverError>;
}

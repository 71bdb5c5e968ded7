//! cpal-backed reference implementation of the output-queue driver.
//!
//! The contract's buffers become plain byte slots here; `enqueue_buffer`
//! copies into a slot and appends it to the playout order, and the cpal
//! output callback drains the front slot frame by frame, converting 16-bit
//! signed PCM to the device sample format. When a slot is fully drained its
//! id is retired and the completion callback fires after the internal lock
//! is released, so the handler may re-enter `enqueue_buffer` without
//! deadlocking.
//!
//! `cpal::Stream` is not `Send`, so the stream lives on a dedicated worker
//! thread; control calls talk to it over a channel and block on the reply.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, StreamTrait};
use crossbeam_channel::{Receiver, Sender, bounded, unbounded};

use crate::device;
use crate::driver::{BufferId, DriverCallbacks, OutputDriver};
use crate::error::{DriverError, DriverErrorKind};
use crate::format::{AudioFormat, FormatTag};

/// Interleaved channel ceiling for the frame scratch array.
const MAX_SRC_CHANNELS: usize = 8;

/// Completions retired per output callback; bounded by the pool size, which
/// is far below this.
const MAX_COMPLETIONS: usize = 64;

struct Slot {
    data: Vec<u8>,
    filled: usize,
}

struct QueueData {
    slots: Vec<Slot>,
    /// Slot ids in playout order.
    queued: VecDeque<u32>,
    /// Bytes of the front queued slot already played.
    cursor: usize,
}

struct Shared {
    data: Mutex<QueueData>,
}

enum Command {
    Build {
        format: AudioFormat,
        callbacks: DriverCallbacks,
        reply: Sender<Result<(), DriverError>>,
    },
    Play(Sender<Result<(), DriverError>>),
    Pause(Sender<Result<(), DriverError>>),
    Shutdown,
}

pub struct CpalDriver {
    device_hint: Option<String>,
    shared: Arc<Shared>,
    commands: Sender<Command>,
    worker: Option<JoinHandle<()>>,
    format: Option<AudioFormat>,
    running_changed: Option<Arc<dyn Fn(bool) + Send + Sync>>,
}

impl CpalDriver {
    /// `device_hint` selects an output device by substring match; `None`
    /// uses the host default.
    pub fn new(device_hint: Option<String>) -> Self {
        let shared = Arc::new(Shared {
            data: Mutex::new(QueueData {
                slots: Vec::new(),
                queued: VecDeque::new(),
                cursor: 0,
            }),
        });
        let (commands, command_rx) = unbounded();
        let worker_hint = device_hint.clone();
        let worker_shared = Arc::clone(&shared);
        let worker = std::thread::spawn(move || worker_loop(command_rx, worker_shared, worker_hint));
        Self {
            device_hint,
            shared,
            commands,
            worker: Some(worker),
            format: None,
            running_changed: None,
        }
    }

    pub fn device_hint(&self) -> Option<&str> {
        self.device_hint.as_deref()
    }

    fn roundtrip(
        &self,
        make: impl FnOnce(Sender<Result<(), DriverError>>) -> Command,
    ) -> Result<(), DriverError> {
        let (reply_tx, reply_rx) = bounded(1);
        self.commands
            .send(make(reply_tx))
            .map_err(|_| DriverError::from_kind(DriverErrorKind::QueueInvalidated))?;
        reply_rx
            .recv()
            .map_err(|_| DriverError::from_kind(DriverErrorKind::QueueInvalidated))?
    }
}

impl OutputDriver for CpalDriver {
    fn create_queue(
        &mut self,
        format: &AudioFormat,
        callbacks: DriverCallbacks,
    ) -> Result<(), DriverError> {
        {
            let mut q = self.shared.data.lock().unwrap();
            q.slots.clear();
            q.queued.clear();
            q.cursor = 0;
        }
        self.format = Some(*format);
        self.running_changed = Some(Arc::clone(&callbacks.running_changed));
        let format = *format;
        self.roundtrip(move |reply| Command::Build {
            format,
            callbacks,
            reply,
        })
    }

    fn allocate_buffer(&mut self, byte_size: usize) -> Result<BufferId, DriverError> {
        if byte_size == 0 {
            return Err(DriverError::from_kind(DriverErrorKind::InvalidParameter));
        }
        let mut q = self.shared.data.lock().unwrap();
        q.slots.push(Slot {
            data: vec![0; byte_size],
            filled: 0,
        });
        Ok(BufferId(q.slots.len() as u32 - 1))
    }

    fn enqueue_buffer(&mut self, id: BufferId, data: &[u8]) -> Result<(), DriverError> {
        let mut q = self.shared.data.lock().unwrap();
        if q.queued.contains(&id.0) {
            return Err(DriverError::from_kind(DriverErrorKind::InvalidBuffer));
        }
        let Some(slot) = q.slots.get_mut(id.0 as usize) else {
            return Err(DriverError::from_kind(DriverErrorKind::InvalidBuffer));
        };
        if data.len() > slot.data.len() {
            return Err(DriverError::from_kind(DriverErrorKind::InvalidParameter));
        }
        if data.is_empty() {
            return Err(DriverError::from_kind(DriverErrorKind::BufferEmpty));
        }
        slot.data[..data.len()].copy_from_slice(data);
        slot.filled = data.len();
        q.queued.push_back(id.0);
        Ok(())
    }

    fn start(&mut self) -> Result<(), DriverError> {
        self.roundtrip(Command::Play)?;
        if let Some(cb) = &self.running_changed {
            cb(true);
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<(), DriverError> {
        self.roundtrip(Command::Pause)?;
        // Cancelled submissions never fire completions.
        let mut q = self.shared.data.lock().unwrap();
        q.queued.clear();
        q.cursor = 0;
        drop(q);
        if let Some(cb) = &self.running_changed {
            cb(false);
        }
        Ok(())
    }

    fn dispose(&mut self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        let mut q = self.shared.data.lock().unwrap();
        q.slots.clear();
        q.queued.clear();
        q.cursor = 0;
        drop(q);
        self.running_changed = None;
    }

    fn max_output_packet_size(&self) -> Result<u32, DriverError> {
        // Linear PCM: one packet is one frame; 2 bytes is the floor for the
        // 16-bit samples this driver renders.
        Ok(self
            .format
            .map(|f| f.bytes_per_frame.max(2))
            .unwrap_or(2))
    }
}

impl Drop for CpalDriver {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Owns the (non-`Send`) stream for its whole lifetime.
fn worker_loop(commands: Receiver<Command>, shared: Arc<Shared>, device_hint: Option<String>) {
    let mut stream: Option<cpal::Stream> = None;
    while let Ok(cmd) = commands.recv() {
        match cmd {
            Command::Build {
                format,
                callbacks,
                reply,
            } => {
                // Any previous queue is torn down before the replacement.
                stream = None;
                let result = build_stream(&shared, device_hint.as_deref(), &format, callbacks);
                let _ = reply.send(match result {
                    Ok(s) => {
                        stream = Some(s);
                        Ok(())
                    }
                    Err(e) => Err(e),
                });
            }
            Command::Play(reply) => {
                let result = match stream.as_ref() {
                    Some(s) => s.play().map_err(|e| {
                        tracing::warn!("stream play failed: {e}");
                        DriverError::from_kind(DriverErrorKind::CannotStart)
                    }),
                    None => Err(DriverError::from_kind(DriverErrorKind::InvalidRunState)),
                };
                let _ = reply.send(result);
            }
            Command::Pause(reply) => {
                let result = match stream.as_ref() {
                    Some(s) => s.pause().map_err(|e| {
                        tracing::warn!("stream pause failed: {e}");
                        DriverError::from_kind(DriverErrorKind::InvalidRunState)
                    }),
                    None => Err(DriverError::from_kind(DriverErrorKind::InvalidRunState)),
                };
                let _ = reply.send(result);
            }
            Command::Shutdown => break,
        }
    }
    drop(stream);
}

fn build_stream(
    shared: &Arc<Shared>,
    device_hint: Option<&str>,
    format: &AudioFormat,
    callbacks: DriverCallbacks,
) -> Result<cpal::Stream, DriverError> {
    if format.tag != FormatTag::LinearPcm
        || format.is_vbr()
        || format.bits_per_sample != 16
        || format.channels_per_frame == 0
        || format.channels_per_frame as usize > MAX_SRC_CHANNELS
    {
        return Err(DriverError::from_kind(DriverErrorKind::UnsupportedFormat));
    }

    let host = cpal::default_host();
    let device = device::pick_device(&host, device_hint)?;
    let config = device::pick_output_config(&device, format)?;
    let stream_config: cpal::StreamConfig = config.clone().into();
    tracing::info!(
        rate_hz = stream_config.sample_rate,
        channels = stream_config.channels,
        sample_format = ?config.sample_format(),
        "output stream config"
    );

    let src_channels = format.channels_per_frame as usize;
    match config.sample_format() {
        cpal::SampleFormat::F32 => {
            build_typed::<f32>(&device, &stream_config, shared, src_channels, callbacks)
        }
        cpal::SampleFormat::I16 => {
            build_typed::<i16>(&device, &stream_config, shared, src_channels, callbacks)
        }
        cpal::SampleFormat::I32 => {
            build_typed::<i32>(&device, &stream_config, shared, src_channels, callbacks)
        }
        cpal::SampleFormat::U16 => {
            build_typed::<u16>(&device, &stream_config, shared, src_channels, callbacks)
        }
        other => {
            tracing::warn!("unsupported device sample format: {other:?}");
            Err(DriverError::from_kind(DriverErrorKind::UnsupportedFormat))
        }
    }
}

/// Type-specialized stream builder for the device sample format.
fn build_typed<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    shared: &Arc<Shared>,
    src_channels: usize,
    callbacks: DriverCallbacks,
) -> Result<cpal::Stream, DriverError>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32>,
{
    let channels_out = config.channels as usize;
    let bytes_per_frame = src_channels * 2;
    let shared_cb = Arc::clone(shared);
    let completion = callbacks.completion;

    let err_fn = |err| tracing::warn!("stream error: {err}");

    let stream = device
        .build_output_stream(
            config,
            move |data: &mut [T], _| {
                let mut finished = FinishedList::default();
                {
                    let mut q = shared_cb.data.lock().unwrap();
                    let frames = data.len() / channels_out;
                    let mut src = [0.0f32; MAX_SRC_CHANNELS];
                    for frame in 0..frames {
                        if !next_source_frame(
                            &mut q,
                            bytes_per_frame,
                            &mut src[..src_channels],
                            &mut finished,
                        ) {
                            // Nothing queued: silence to the end of the slice.
                            for idx in (frame * channels_out)..data.len() {
                                data[idx] = <T as cpal::Sample>::from_sample::<f32>(0.0);
                            }
                            break;
                        }
                        for ch in 0..channels_out {
                            let sample = map_channel(&src[..src_channels], channels_out, ch);
                            data[frame * channels_out + ch] =
                                <T as cpal::Sample>::from_sample::<f32>(sample);
                        }
                    }
                }
                // Outside the data lock: the handler typically re-enters
                // enqueue_buffer.
                for id in finished.ids() {
                    completion(BufferId(*id));
                }
            },
            err_fn,
            None,
        )
        .map_err(|e| {
            tracing::warn!("failed to build output stream: {e}");
            DriverError::from_kind(DriverErrorKind::CannotStart)
        })?;
    Ok(stream)
}

struct FinishedList {
    ids: [u32; MAX_COMPLETIONS],
    len: usize,
}

impl Default for FinishedList {
    fn default() -> Self {
        Self {
            ids: [0; MAX_COMPLETIONS],
            len: 0,
        }
    }
}

impl FinishedList {
    fn push(&mut self, id: u32) {
        if self.len < self.ids.len() {
            self.ids[self.len] = id;
            self.len += 1;
        }
    }

    fn ids(&self) -> &[u32] {
        &self.ids[..self.len]
    }
}

impl Default for QueueData {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            queued: VecDeque::new(),
            cursor: 0,
        }
    }
}

/// Decode the next source frame from the front queued slot into `out`.
///
/// Retires drained slots (and trailing partial frames) into `finished`.
/// Returns `false` when nothing is queued.
fn next_source_frame(
    q: &mut QueueData,
    bytes_per_frame: usize,
    out: &mut [f32],
    finished: &mut FinishedList,
) -> bool {
    loop {
        let Some(&front) = q.queued.front() else {
            return false;
        };
        let slot = &q.slots[front as usize];
        if q.cursor + bytes_per_frame <= slot.filled {
            let start = q.cursor;
            for (i, sample) in out.iter_mut().enumerate() {
                let lo = slot.data[start + 2 * i];
                let hi = slot.data[start + 2 * i + 1];
                *sample = f32::from(i16::from_le_bytes([lo, hi])) / 32768.0;
            }
            q.cursor += bytes_per_frame;
            return true;
        }
        finished.push(front);
        q.queued.pop_front();
        q.cursor = 0;
    }
}

/// Basic channel mapping: mono duplicates, stereo downmixes to mono by
/// averaging, anything else clamps to the available channels.
fn map_channel(src: &[f32], dst_channels: usize, dst_ch: usize) -> f32 {
    match (src.len(), dst_channels) {
        (0, _) => 0.0,
        (1, _) => src[0],
        (2, 1) => 0.5 * (src[0] + src[1]),
        (2, 2) => src[dst_ch],
        _ => src[dst_ch.min(src.len() - 1)],
    }
}

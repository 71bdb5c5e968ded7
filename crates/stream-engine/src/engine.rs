//! Playback session orchestration: configure, prime, feed, refill, teardown.
//!
//! The engine owns the driver handle, the buffer pool and the ingest queue,
//! and drives the fill/enqueue/completion cycle. Producer calls and driver
//! completions meet in [`EngineShared`]: one mutex around the core (pool +
//! driver + session state) and the internally locked ingest queue, always
//! taken in that order.
//!
//! Teardown discipline: `dispose` flips the session state and takes the
//! driver out under the core lock, revokes the callback bridge, and only
//! then drops the driver *outside* the lock. An in-flight completion can
//! therefore always acquire the lock, observe `Disposed`, and stand down:
//! it never touches freed state, and the driver's own thread teardown never
//! deadlocks against a completion waiting on the core.

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

use crossbeam_channel::{Receiver, Sender};

use crate::bridge::CallbackBridge;
use crate::config::EngineConfig;
use crate::driver::{BufferId, DriverCallbacks, OutputDriver};
use crate::error::EngineError;
use crate::format::AudioFormat;
use crate::ingest::{AudioChunk, IngestQueue};
use crate::pool::BufferPool;
use crate::status::{Counters, EngineEvent, EngineStats};

/// Session lifecycle state.
///
/// `Disposed` is terminal; every operation on a disposed engine fails with
/// [`EngineError::InvalidState`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Unconfigured,
    Configured,
    Running,
    Stopped,
    Disposed,
}

struct EngineCore {
    state: SessionState,
    driver: Option<Box<dyn OutputDriver>>,
    pool: Option<BufferPool>,
    format: Option<AudioFormat>,
}

pub(crate) struct EngineShared {
    core: Mutex<EngineCore>,
    ingest: IngestQueue,
    counters: Counters,
    events: Sender<EngineEvent>,
}

/// Streaming PCM playback engine.
///
/// Host API: [`configure`](Self::configure), [`start`](Self::start),
/// [`feed`](Self::feed), [`stop`](Self::stop), [`dispose`](Self::dispose),
/// plus [`events`](Self::events) and [`stats`](Self::stats) for
/// observation. All methods are callable from any thread.
pub struct PlaybackEngine {
    shared: Arc<EngineShared>,
    bridge: Arc<CallbackBridge<EngineShared>>,
    config: EngineConfig,
    events_rx: Receiver<EngineEvent>,
}

impl PlaybackEngine {
    /// Wrap a driver. The engine exclusively owns it until `dispose`.
    pub fn new(driver: Box<dyn OutputDriver>, config: EngineConfig) -> Self {
        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        let shared = Arc::new(EngineShared {
            core: Mutex::new(EngineCore {
                state: SessionState::Unconfigured,
                driver: Some(driver),
                pool: None,
                format: None,
            }),
            ingest: IngestQueue::with_policy(config.compaction),
            counters: Counters::default(),
            events: events_tx,
        });
        Self {
            shared,
            bridge: Arc::new(CallbackBridge::new()),
            config,
            events_rx,
        }
    }

    /// Create the output queue and buffer pool for `format`.
    ///
    /// Legal from Unconfigured, Configured and Stopped; reconfiguring while
    /// Running is rejected. Reconfiguration replaces the driver queue and
    /// invalidates callbacks registered for the previous cycle.
    pub fn configure(&self, format: AudioFormat) -> Result<(), EngineError> {
        format.validate()?;
        let mut core = self.shared.core.lock().unwrap();
        match core.state {
            SessionState::Unconfigured | SessionState::Configured | SessionState::Stopped => {}
            state => return Err(EngineError::InvalidState {
                op: "configure",
                state,
            }),
        }
        let generation = self.bridge.register(&self.shared);
        let callbacks = self.driver_callbacks(generation);
        let Some(driver) = core.driver.as_deref_mut() else {
            return Err(EngineError::InvalidState {
                op: "configure",
                state: core.state,
            });
        };
        driver.create_queue(&format, callbacks)?;
        let pool = BufferPool::configure(
            &format,
            self.config.buffer_count,
            self.config.target_latency,
            self.config.max_buffer_bytes,
            driver,
        )?;
        tracing::info!(
            rate_hz = format.sample_rate,
            channels = format.channels_per_frame,
            buffers = pool.len(),
            buffer_bytes = pool.capacity_bytes(),
            "configured playback session"
        );
        core.pool = Some(pool);
        core.format = Some(format);
        core.state = SessionState::Configured;
        Ok(())
    }

    /// Prime all buffers and start the hardware queue.
    ///
    /// Priming fills and submits exactly N buffers synchronously, draining
    /// whatever `feed` already queued; buffers with no data available go
    /// out as full-capacity silence so startup never blocks on the
    /// producer.
    pub fn start(&self) -> Result<(), EngineError> {
        let mut core = self.shared.core.lock().unwrap();
        match core.state {
            SessionState::Configured | SessionState::Stopped => {}
            state => return Err(EngineError::InvalidState { op: "start", state }),
        }
        self.shared.prime(&mut core)?;
        let Some(driver) = core.driver.as_deref_mut() else {
            return Err(EngineError::InvalidState {
                op: "start",
                state: core.state,
            });
        };
        driver.start()?;
        core.state = SessionState::Running;
        let _ = self.shared.events.send(EngineEvent::Started);
        tracing::info!("playback running");
        Ok(())
    }

    /// Accept a chunk for playback.
    ///
    /// Legal before `start` as well; pre-fed data is what priming drains.
    /// Never triggers playback by itself; the cycle is completion-driven.
    pub fn feed(&self, chunk: AudioChunk) -> Result<(), EngineError> {
        let core = self.shared.core.lock().unwrap();
        match core.state {
            SessionState::Configured | SessionState::Running | SessionState::Stopped => {}
            state => return Err(EngineError::InvalidState { op: "feed", state }),
        }
        self.shared
            .counters
            .ingested_chunks
            .fetch_add(1, Ordering::Relaxed);
        self.shared
            .counters
            .ingested_bytes
            .fetch_add(chunk.len() as u64, Ordering::Relaxed);
        self.shared.ingest.enqueue(chunk);
        Ok(())
    }

    /// Halt the hardware queue and cancel pending submissions.
    ///
    /// Buffers stay allocated; `start` resumes by re-priming them.
    pub fn stop(&self) -> Result<(), EngineError> {
        let mut driver = {
            let mut core = self.shared.core.lock().unwrap();
            if core.state != SessionState::Running {
                return Err(EngineError::InvalidState {
                    op: "stop",
                    state: core.state,
                });
            }
            // State flips before the driver is told, so completions racing
            // this call observe Stopped and stand down.
            core.state = SessionState::Stopped;
            if let Some(pool) = core.pool.as_mut() {
                pool.reclaim_submitted();
            }
            core.driver.take()
        };
        // Halted outside the core lock: pausing may wait for an in-flight
        // completion, and that completion may be waiting on the core.
        let halted = match driver.as_deref_mut() {
            Some(driver) => driver.stop(),
            None => Ok(()),
        };
        {
            let mut core = self.shared.core.lock().unwrap();
            if core.state == SessionState::Disposed {
                // dispose() raced us while the driver was out; finish its
                // teardown here, outside the lock.
                drop(core);
                if let Some(mut driver) = driver {
                    driver.dispose();
                }
            } else {
                core.driver = driver;
            }
        }
        halted?;
        let _ = self.shared.events.send(EngineEvent::Stopped);
        tracing::info!("playback stopped");
        Ok(())
    }

    /// Irreversibly tear the session down.
    pub fn dispose(&self) -> Result<(), EngineError> {
        let driver = {
            let mut core = self.shared.core.lock().unwrap();
            if core.state == SessionState::Disposed {
                return Err(EngineError::InvalidState {
                    op: "dispose",
                    state: SessionState::Disposed,
                });
            }
            core.state = SessionState::Disposed;
            core.pool = None;
            core.format = None;
            core.driver.take()
        };
        // Invalidate the callback relation before the callback source goes
        // away; a completion that already resolved keeps the shared state
        // alive only until it returns.
        self.bridge.revoke();
        self.shared.ingest.clear();
        if let Some(mut driver) = driver {
            // Dropped outside the core lock: the driver may join its
            // callback thread here, and that thread may be waiting on the
            // core to observe Disposed.
            let _ = driver.stop();
            driver.dispose();
        }
        tracing::info!("engine disposed");
        Ok(())
    }

    pub fn state(&self) -> SessionState {
        self.shared.core.lock().unwrap().state
    }

    /// Format configured for the current session, if any.
    pub fn format(&self) -> Option<AudioFormat> {
        self.shared.core.lock().unwrap().format
    }

    /// Chunks accepted but not yet fully copied into buffers.
    pub fn pending_chunks(&self) -> usize {
        self.shared.ingest.count()
    }

    /// Receiver for asynchronous session events.
    pub fn events(&self) -> Receiver<EngineEvent> {
        self.events_rx.clone()
    }

    pub fn stats(&self) -> EngineStats {
        self.shared.counters.snapshot()
    }

    fn driver_callbacks(&self, generation: u64) -> DriverCallbacks {
        let bridge = Arc::clone(&self.bridge);
        let completion = {
            let bridge = Arc::clone(&bridge);
            Arc::new(move |id: BufferId| {
                let _ = bridge.with(generation, |shared| shared.on_buffer_consumed(id));
            }) as Arc<dyn Fn(BufferId) + Send + Sync>
        };
        let running_changed = Arc::new(move |running: bool| {
            let _ = bridge.with(generation, |shared| shared.on_running_changed(running));
        }) as Arc<dyn Fn(bool) + Send + Sync>;
        DriverCallbacks {
            completion,
            running_changed,
        }
    }
}

impl Drop for PlaybackEngine {
    fn drop(&mut self) {
        let _ = self.dispose();
    }
}

impl EngineShared {
    /// Fill and submit every pool buffer once.
    fn prime(&self, core: &mut EngineCore) -> Result<(), EngineError> {
        let EngineCore { pool, driver, .. } = core;
        let (Some(pool), Some(driver)) = (pool.as_mut(), driver.as_deref_mut()) else {
            return Err(EngineError::Configuration(
                "session has no buffer pool to prime".into(),
            ));
        };
        for _ in 0..pool.len() {
            let Some(buf) = pool.acquire_free() else {
                return Err(EngineError::ResourceExhausted(
                    "no free buffer available while priming",
                ));
            };
            let filled = self.ingest.fill(buf.data_mut());
            if filled == 0 {
                buf.write_silence();
                self.counters.silent_buffers.fetch_add(1, Ordering::Relaxed);
            } else {
                buf.set_filled(filled);
            }
            let id = buf.id();
            pool.submit(id, driver)?;
            self.counters
                .submitted_buffers
                .fetch_add(1, Ordering::Relaxed);
        }
        tracing::debug!(buffers = pool.len(), "primed playback buffers");
        Ok(())
    }

    /// The refill cycle, entered from the driver's completion callback.
    ///
    /// Bounded, non-blocking, and silent when the producer is behind; a
    /// failed resubmission leaves the buffer Free for the next cycle and is
    /// reported on the event channel.
    pub(crate) fn on_buffer_consumed(&self, id: BufferId) {
        let mut core = self.core.lock().unwrap();
        if core.state != SessionState::Running {
            return;
        }
        let EngineCore { pool, driver, .. } = &mut *core;
        let (Some(pool), Some(driver)) = (pool.as_mut(), driver.as_deref_mut()) else {
            return;
        };
        if let Err(err) = pool.release(id) {
            tracing::warn!(error = %err, "completion for a buffer that was not submitted");
            let _ = self.events.send(EngineEvent::ReleaseViolation(err));
            return;
        }
        // The release above freed one slot, so this only fails mid-teardown.
        let Some(buf) = pool.acquire_free() else {
            return;
        };
        let filled = self.ingest.fill(buf.data_mut());
        if filled == 0 {
            buf.write_silence();
            self.counters.silent_buffers.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(buffer = ?id, "ingest queue empty; submitting silence");
        } else {
            buf.set_filled(filled);
        }
        let next = buf.id();
        match pool.submit(next, driver) {
            Ok(()) => {
                self.counters
                    .submitted_buffers
                    .fetch_add(1, Ordering::Relaxed);
            }
            Err(error) => {
                tracing::warn!(buffer = ?next, %error, "resubmission failed; buffer left free");
                let _ = self.events.send(EngineEvent::ResubmitFailed {
                    buffer: next,
                    error,
                });
            }
        }
    }

    pub(crate) fn on_running_changed(&self, running: bool) {
        tracing::debug!(running, "driver running-state changed");
        let _ = self.events.send(EngineEvent::RunningChanged(running));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{DriverError, DriverErrorKind};
    use crate::testutil::{MockDriver, MockState, fire_completion};

    fn configured() -> (PlaybackEngine, Arc<Mutex<MockState>>) {
        let (driver, state) = MockDriver::new();
        let engine = PlaybackEngine::new(Box::new(driver), EngineConfig::default());
        engine
            .configure(AudioFormat::linear_pcm(16_000.0, 16, 1))
            .unwrap();
        (engine, state)
    }

    fn chunk(bytes: &[u8]) -> AudioChunk {
        AudioChunk::new(bytes.to_vec())
    }

    // 16 kHz * 2 B/frame * 0.04 s
    const CAPACITY: usize = 1280;

    #[test]
    fn configure_creates_pool_and_queue() {
        let (engine, state) = configured();
        assert_eq!(engine.state(), SessionState::Configured);
        let st = state.lock().unwrap();
        assert_eq!(st.allocated, vec![CAPACITY; 3]);
        assert_eq!(st.format.unwrap().sample_rate, 16_000.0);
    }

    #[test]
    fn configure_rejects_invalid_format() {
        let (driver, _) = MockDriver::new();
        let engine = PlaybackEngine::new(Box::new(driver), EngineConfig::default());
        let err = engine
            .configure(AudioFormat::linear_pcm(0.0, 16, 1))
            .unwrap_err();
        assert!(matches!(err, EngineError::Configuration(_)));
        assert_eq!(engine.state(), SessionState::Unconfigured);
    }

    #[test]
    fn vbr_configure_queries_driver_packet_size() {
        let (driver, state) = MockDriver::new();
        let engine = PlaybackEngine::new(Box::new(driver), EngineConfig::default());
        let mut fmt = AudioFormat::linear_pcm(16_000.0, 16, 1);
        fmt.frames_per_packet = 0;
        fmt.bytes_per_packet = 0;
        engine.configure(fmt).unwrap();
        assert_eq!(state.lock().unwrap().max_packet_queries, 1);
    }

    #[test]
    fn start_primes_exactly_n_silent_buffers() {
        let (engine, state) = configured();
        engine.start().unwrap();
        assert_eq!(engine.state(), SessionState::Running);
        let st = state.lock().unwrap();
        assert_eq!(st.starts, 1);
        assert_eq!(st.submissions.len(), 3);
        for (_, data) in &st.submissions {
            assert_eq!(data.len(), CAPACITY);
            assert!(data.iter().all(|b| *b == 0));
        }
    }

    #[test]
    fn prestart_feed_appears_first_in_order() {
        let (engine, state) = configured();
        engine.feed(chunk(b"first")).unwrap();
        engine.feed(chunk(b"second")).unwrap();
        engine.start().unwrap();
        let st = state.lock().unwrap();
        assert_eq!(st.submissions.len(), 3);
        assert_eq!(st.submissions[0].1, b"firstsecond".to_vec());
        assert_eq!(st.submissions[1].1.len(), CAPACITY);
        assert!(st.submissions[1].1.iter().all(|b| *b == 0));
    }

    #[test]
    fn priming_spans_chunk_boundaries() {
        let (engine, state) = configured();
        let data: Vec<u8> = (0..2000).map(|i| (i % 251) as u8).collect();
        engine.feed(chunk(&data)).unwrap();
        engine.start().unwrap();
        let st = state.lock().unwrap();
        assert_eq!(st.submissions[0].1, data[..CAPACITY].to_vec());
        assert_eq!(st.submissions[1].1, data[CAPACITY..].to_vec());
        assert_eq!(st.submissions[2].1.len(), CAPACITY);
        assert!(st.submissions[2].1.iter().all(|b| *b == 0));
    }

    #[test]
    fn completion_refills_from_queue() {
        let (engine, state) = configured();
        engine.start().unwrap();
        engine.feed(chunk(b"hello")).unwrap();
        fire_completion(&state, BufferId(0));
        let st = state.lock().unwrap();
        assert_eq!(st.submissions.len(), 4);
        assert_eq!(st.submissions[3].1, b"hello".to_vec());
    }

    #[test]
    fn completion_with_empty_queue_submits_silence() {
        let (engine, state) = configured();
        engine.start().unwrap();
        fire_completion(&state, BufferId(1));
        let st = state.lock().unwrap();
        assert_eq!(st.submissions.len(), 4);
        assert_eq!(st.submissions[3].1.len(), CAPACITY);
        assert!(st.submissions[3].1.iter().all(|b| *b == 0));
    }

    #[test]
    fn oversized_chunk_drains_across_cycles() {
        let (engine, state) = configured();
        engine.start().unwrap();
        let data: Vec<u8> = (0..2000).map(|i| (i % 251) as u8).collect();
        engine.feed(chunk(&data)).unwrap();
        fire_completion(&state, BufferId(0));
        fire_completion(&state, BufferId(0));
        let st = state.lock().unwrap();
        assert_eq!(st.submissions[3].1, data[..CAPACITY].to_vec());
        assert_eq!(st.submissions[4].1, data[CAPACITY..].to_vec());
    }

    #[test]
    fn completion_after_dispose_is_a_safe_noop() {
        let (engine, state) = configured();
        engine.start().unwrap();
        let before = state.lock().unwrap().submissions.len();
        engine.dispose().unwrap();
        assert!(state.lock().unwrap().disposed);
        fire_completion(&state, BufferId(0));
        assert_eq!(state.lock().unwrap().submissions.len(), before);
    }

    #[test]
    fn completion_while_stopped_is_a_noop() {
        let (engine, state) = configured();
        engine.start().unwrap();
        engine.stop().unwrap();
        let before = state.lock().unwrap().submissions.len();
        fire_completion(&state, BufferId(0));
        assert_eq!(state.lock().unwrap().submissions.len(), before);
    }

    #[test]
    fn disposed_is_terminal() {
        let (engine, _) = configured();
        engine.dispose().unwrap();
        assert_eq!(engine.state(), SessionState::Disposed);
        assert!(matches!(
            engine.start(),
            Err(EngineError::InvalidState { op: "start", .. })
        ));
        assert!(matches!(
            engine.feed(chunk(b"x")),
            Err(EngineError::InvalidState { op: "feed", .. })
        ));
        assert!(matches!(
            engine.stop(),
            Err(EngineError::InvalidState { op: "stop", .. })
        ));
        assert!(matches!(
            engine.configure(AudioFormat::linear_pcm(16_000.0, 16, 1)),
            Err(EngineError::InvalidState { op: "configure", .. })
        ));
        assert!(matches!(
            engine.dispose(),
            Err(EngineError::InvalidState { op: "dispose", .. })
        ));
    }

    #[test]
    fn start_before_configure_is_invalid() {
        let (driver, _) = MockDriver::new();
        let engine = PlaybackEngine::new(Box::new(driver), EngineConfig::default());
        assert!(matches!(
            engine.start(),
            Err(EngineError::InvalidState { op: "start", .. })
        ));
        assert!(matches!(
            engine.feed(chunk(b"x")),
            Err(EngineError::InvalidState { op: "feed", .. })
        ));
    }

    #[test]
    fn reconfigure_while_running_is_invalid() {
        let (engine, _) = configured();
        engine.start().unwrap();
        assert!(matches!(
            engine.configure(AudioFormat::linear_pcm(8_000.0, 16, 1)),
            Err(EngineError::InvalidState { op: "configure", .. })
        ));
    }

    #[test]
    fn stop_reclaims_and_start_resumes() {
        let (engine, state) = configured();
        engine.start().unwrap();
        engine.stop().unwrap();
        assert_eq!(engine.state(), SessionState::Stopped);
        assert_eq!(state.lock().unwrap().stops, 1);

        engine.feed(chunk(b"resume")).unwrap();
        engine.start().unwrap();
        let st = state.lock().unwrap();
        assert_eq!(st.starts, 2);
        assert_eq!(st.submissions.len(), 6);
        assert_eq!(st.submissions[3].1, b"resume".to_vec());
    }

    #[test]
    fn resubmit_failure_emits_event_and_recovers() {
        let (engine, state) = configured();
        engine.start().unwrap();
        state.lock().unwrap().fail_next_enqueue =
            Some(DriverError::from_kind(DriverErrorKind::InvalidRunState));
        fire_completion(&state, BufferId(0));
        assert_eq!(state.lock().unwrap().submissions.len(), 3);

        let events: Vec<_> = engine.events().try_iter().collect();
        assert!(events
            .iter()
            .any(|e| matches!(e, EngineEvent::ResubmitFailed { .. })));

        // The failed buffer stayed Free, so the next cycle resubmits it.
        fire_completion(&state, BufferId(1));
        assert_eq!(state.lock().unwrap().submissions.len(), 4);
    }

    #[test]
    fn unknown_completion_reports_violation() {
        let (engine, state) = configured();
        engine.start().unwrap();
        fire_completion(&state, BufferId(99));
        let events: Vec<_> = engine.events().try_iter().collect();
        assert!(events
            .iter()
            .any(|e| matches!(e, EngineEvent::ReleaseViolation(_))));
        assert_eq!(state.lock().unwrap().submissions.len(), 3);
    }

    #[test]
    fn stats_count_submissions_and_ingest() {
        let (engine, state) = configured();
        engine.feed(chunk(b"abcd")).unwrap();
        engine.start().unwrap();
        fire_completion(&state, BufferId(0));
        let stats = engine.stats();
        assert_eq!(stats.submitted_buffers, 4);
        assert_eq!(stats.silent_buffers, 3);
        assert_eq!(stats.ingested_chunks, 1);
        assert_eq!(stats.ingested_bytes, 4);
    }

    #[test]
    fn start_and_stop_emit_events() {
        let (engine, _) = configured();
        engine.start().unwrap();
        engine.stop().unwrap();
        let events: Vec<_> = engine.events().try_iter().collect();
        assert!(events.iter().any(|e| matches!(e, EngineEvent::Started)));
        assert!(events.iter().any(|e| matches!(e, EngineEvent::Stopped)));
    }
}

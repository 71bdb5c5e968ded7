//! Scripted output driver for unit tests.
//!
//! Records every driver call and lets tests fire the completion callback by
//! hand, standing in for the hardware thread.

use std::sync::{Arc, Mutex};

use crate::driver::{BufferId, DriverCallbacks, OutputDriver};
use crate::error::DriverError;
use crate::format::AudioFormat;

pub struct MockState {
    pub format: Option<AudioFormat>,
    pub callbacks: Option<DriverCallbacks>,
    /// Byte size of each allocated buffer, in allocation order.
    pub allocated: Vec<usize>,
    /// Every enqueue, in order, with the exact bytes handed over.
    pub submissions: Vec<(BufferId, Vec<u8>)>,
    pub starts: u32,
    pub stops: u32,
    pub disposed: bool,
    /// Answer for `max_output_packet_size`.
    pub max_packet_size: u32,
    pub max_packet_queries: u32,
    /// When set, the next enqueue fails with this error (taken once).
    pub fail_next_enqueue: Option<DriverError>,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            format: None,
            callbacks: None,
            allocated: Vec::new(),
            submissions: Vec::new(),
            starts: 0,
            stops: 0,
            disposed: false,
            max_packet_size: 2,
            max_packet_queries: 0,
            fail_next_enqueue: None,
        }
    }
}

pub struct MockDriver {
    state: Arc<Mutex<MockState>>,
}

impl MockDriver {
    pub fn new() -> (Self, Arc<Mutex<MockState>>) {
        let state = Arc::new(Mutex::new(MockState::default()));
        (
            Self {
                state: Arc::clone(&state),
            },
            state,
        )
    }
}

/// Invoke the registered completion callback the way a hardware thread
/// would: outside the mock's own lock.
pub fn fire_completion(state: &Arc<Mutex<MockState>>, id: BufferId) {
    let completion = state
        .lock()
        .unwrap()
        .callbacks
        .as_ref()
        .map(|c| Arc::clone(&c.completion));
    if let Some(completion) = completion {
        completion(id);
    }
}

impl OutputDriver for MockDriver {
    fn create_queue(
        &mut self,
        format: &AudioFormat,
        callbacks: DriverCallbacks,
    ) -> Result<(), DriverError> {
        let mut st = self.state.lock().unwrap();
        st.format = Some(*format);
        st.callbacks = Some(callbacks);
        Ok(())
    }

    fn allocate_buffer(&mut self, byte_size: usize) -> Result<BufferId, DriverError> {
        let mut st = self.state.lock().unwrap();
        st.allocated.push(byte_size);
        Ok(BufferId((st.allocated.len() - 1) as u32))
    }

    fn enqueue_buffer(&mut self, id: BufferId, data: &[u8]) -> Result<(), DriverError> {
        let mut st = self.state.lock().unwrap();
        if let Some(err) = st.fail_next_enqueue.take() {
            return Err(err);
        }
        st.submissions.push((id, data.to_vec()));
        Ok(())
    }

    fn start(&mut self) -> Result<(), DriverError> {
        self.state.lock().unwrap().starts += 1;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), DriverError> {
        self.state.lock().unwrap().stops += 1;
        Ok(())
    }

    fn dispose(&mut self) {
        self.state.lock().unwrap().disposed = true;
    }

    fn max_output_packet_size(&self) -> Result<u32, DriverError> {
        let mut st = self.state.lock().unwrap();
        st.max_packet_queries += 1;
        Ok(st.max_packet_size)
    }
}

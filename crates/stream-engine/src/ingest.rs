//! Chunk ingestion queue between the producer and the refill cycle.
//!
//! The queue is the only mutable structure shared by the producer thread and
//! the driver's completion callback. Both sides go through a single mutex
//! with short critical sections; nothing here ever blocks waiting for data.
//! An empty queue reports empty and the refill cycle plays silence instead.
//!
//! ## Storage
//! Consumed slots are tombstoned rather than removed, so every operation is
//! O(1) amortized. Once the backing storage is long enough *and* enough of
//! its prefix is consumed, the prefix is dropped in one pass and the head
//! index resets (see [`CompactionPolicy`]). Compaction is a storage
//! optimization only; FIFO order is unaffected.

use std::sync::Mutex;

/// Immutable blob of raw PCM bytes.
///
/// Ownership moves into the queue on enqueue and the chunk is dropped once
/// its bytes have been fully copied into a playback buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AudioChunk {
    data: Vec<u8>,
}

impl AudioChunk {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

impl From<Vec<u8>> for AudioChunk {
    fn from(data: Vec<u8>) -> Self {
        Self::new(data)
    }
}

/// When the consumed prefix of the backing storage is physically dropped.
///
/// Both conditions must hold. The thresholds are tuning knobs, not
/// correctness requirements: any values preserve FIFO order.
#[derive(Clone, Copy, Debug)]
pub struct CompactionPolicy {
    /// Backing storage must be longer than this many slots.
    pub min_backing_len: usize,
    /// Consumed prefix must exceed this fraction of the backing storage.
    pub min_consumed_fraction: f64,
}

impl Default for CompactionPolicy {
    fn default() -> Self {
        Self {
            min_backing_len: 50,
            min_consumed_fraction: 0.25,
        }
    }
}

/// Unbounded FIFO of audio chunks.
///
/// No backpressure: the producer is trusted not to outrun playback forever,
/// and accepting every chunk keeps `enqueue` wait-free from the producer's
/// point of view.
pub struct IngestQueue {
    inner: Mutex<Inner>,
    policy: CompactionPolicy,
}

struct Inner {
    slots: Vec<Option<AudioChunk>>,
    head: usize,
    /// Bytes of the front chunk already copied out by `fill`.
    front_offset: usize,
}

impl IngestQueue {
    pub fn new() -> Self {
        Self::with_policy(CompactionPolicy::default())
    }

    pub fn with_policy(policy: CompactionPolicy) -> Self {
        Self {
            inner: Mutex::new(Inner {
                slots: Vec::new(),
                head: 0,
                front_offset: 0,
            }),
            policy,
        }
    }

    /// Append a chunk. O(1) amortized.
    pub fn enqueue(&self, chunk: AudioChunk) {
        let mut g = self.inner.lock().unwrap();
        g.slots.push(Some(chunk));
    }

    /// Remove and return the oldest chunk, or `None` when empty.
    ///
    /// If `fill` already consumed part of the front chunk, the returned
    /// chunk holds only the remaining bytes.
    pub fn dequeue(&self) -> Option<AudioChunk> {
        let mut g = self.inner.lock().unwrap();
        if g.head >= g.slots.len() {
            return None;
        }
        let offset = g.front_offset;
        let head = g.head;
        let chunk = g.slots[head].take()?;
        g.head += 1;
        g.front_offset = 0;
        self.maybe_compact(&mut g);
        if offset == 0 {
            Some(chunk)
        } else {
            Some(AudioChunk::new(chunk.data[offset..].to_vec()))
        }
    }

    /// Copy of the oldest chunk's remaining bytes without removing it.
    pub fn peek_front(&self) -> Option<AudioChunk> {
        let g = self.inner.lock().unwrap();
        let chunk = g.slots.get(g.head)?.as_ref()?;
        Some(AudioChunk::new(chunk.data[g.front_offset..].to_vec()))
    }

    /// Discard all pending chunks.
    pub fn clear(&self) {
        let mut g = self.inner.lock().unwrap();
        g.slots.clear();
        g.head = 0;
        g.front_offset = 0;
    }

    /// Number of pending chunks.
    pub fn count(&self) -> usize {
        let g = self.inner.lock().unwrap();
        g.slots.len() - g.head
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Copy up to `dst.len()` pending bytes into `dst`, returning the count.
    ///
    /// Spans chunk boundaries; a partially consumed chunk keeps its
    /// remainder at the front for the next call. Never blocks; returns 0
    /// when the queue is empty.
    pub fn fill(&self, dst: &mut [u8]) -> usize {
        let mut g = self.inner.lock().unwrap();
        let mut written = 0;
        while written < dst.len() && g.head < g.slots.len() {
            let head = g.head;
            let offset = g.front_offset;
            let (take, exhausted) = {
                let Some(chunk) = g.slots[head].as_ref() else {
                    break;
                };
                let available = chunk.data.len() - offset;
                let take = available.min(dst.len() - written);
                dst[written..written + take].copy_from_slice(&chunk.data[offset..offset + take]);
                (take, take == available)
            };
            written += take;
            if exhausted {
                g.slots[head] = None;
                g.head += 1;
                g.front_offset = 0;
            } else {
                g.front_offset += take;
            }
        }
        self.maybe_compact(&mut g);
        written
    }

    fn maybe_compact(&self, g: &mut Inner) {
        if g.slots.len() <= self.policy.min_backing_len {
            return;
        }
        let consumed = g.head as f64 / g.slots.len() as f64;
        if consumed <= self.policy.min_consumed_fraction {
            return;
        }
        let dropped = g.head;
        g.slots.drain(..dropped);
        g.head = 0;
        tracing::debug!(dropped, remaining = g.slots.len(), "compacted ingest queue");
    }
}

impl Default for IngestQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(bytes: &[u8]) -> AudioChunk {
        AudioChunk::new(bytes.to_vec())
    }

    #[test]
    fn fifo_order_preserved() {
        let q = IngestQueue::new();
        for i in 0u8..10 {
            q.enqueue(chunk(&[i]));
        }
        for i in 0u8..10 {
            assert_eq!(q.dequeue().unwrap().as_bytes(), &[i]);
        }
        assert!(q.dequeue().is_none());
    }

    #[test]
    fn dequeue_empty_returns_none() {
        let q = IngestQueue::new();
        assert!(q.dequeue().is_none());
        assert!(q.is_empty());
        assert_eq!(q.count(), 0);
    }

    #[test]
    fn peek_does_not_remove() {
        let q = IngestQueue::new();
        q.enqueue(chunk(b"abc"));
        assert_eq!(q.peek_front().unwrap().as_bytes(), b"abc");
        assert_eq!(q.count(), 1);
        assert_eq!(q.dequeue().unwrap().as_bytes(), b"abc");
    }

    #[test]
    fn clear_discards_everything() {
        let q = IngestQueue::new();
        q.enqueue(chunk(b"a"));
        q.enqueue(chunk(b"b"));
        q.clear();
        assert!(q.is_empty());
        assert!(q.dequeue().is_none());
    }

    #[test]
    fn fifo_survives_compaction() {
        let q = IngestQueue::with_policy(CompactionPolicy {
            min_backing_len: 8,
            min_consumed_fraction: 0.25,
        });
        for i in 0u8..100 {
            q.enqueue(chunk(&[i]));
        }
        // Interleave enqueues so compaction fires mid-stream.
        for i in 0u8..100 {
            assert_eq!(q.dequeue().unwrap().as_bytes(), &[i]);
            if i % 3 == 0 {
                q.enqueue(chunk(&[100 + i / 3]));
            }
        }
        let mut expected = 100u8;
        while let Some(c) = q.dequeue() {
            assert_eq!(c.as_bytes(), &[expected]);
            expected += 1;
        }
        assert_eq!(expected, 134);
    }

    #[test]
    fn growth_past_thresholds_compacts() {
        let q = IngestQueue::new();
        for i in 0..80u8 {
            q.enqueue(chunk(&[i]));
        }
        for _ in 0..30 {
            q.dequeue();
        }
        // 30/80 consumed exceeds the default 25% on >50 slots.
        assert_eq!(q.count(), 50);
        assert_eq!(q.dequeue().unwrap().as_bytes(), &[30]);
    }

    #[test]
    fn fill_spans_chunks() {
        let q = IngestQueue::new();
        q.enqueue(chunk(b"abc"));
        q.enqueue(chunk(b"defg"));
        let mut dst = [0u8; 5];
        assert_eq!(q.fill(&mut dst), 5);
        assert_eq!(&dst, b"abcde");
        assert_eq!(q.count(), 1);
        let mut rest = [0u8; 8];
        assert_eq!(q.fill(&mut rest), 2);
        assert_eq!(&rest[..2], b"fg");
        assert!(q.is_empty());
    }

    #[test]
    fn fill_leaves_partial_remainder_at_front() {
        let q = IngestQueue::new();
        q.enqueue(chunk(b"0123456789"));
        let mut dst = [0u8; 4];
        assert_eq!(q.fill(&mut dst), 4);
        assert_eq!(q.peek_front().unwrap().as_bytes(), b"456789");
        assert_eq!(q.dequeue().unwrap().as_bytes(), b"456789");
    }

    #[test]
    fn fill_empty_returns_zero() {
        let q = IngestQueue::new();
        let mut dst = [0u8; 16];
        assert_eq!(q.fill(&mut dst), 0);
    }
}

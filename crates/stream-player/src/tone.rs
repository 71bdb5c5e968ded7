//! Sine-wave PCM source for the demo feed loop.

use std::f64::consts::TAU;

pub struct ToneSource {
    phase: f64,
    step: f64,
}

impl ToneSource {
    pub fn new(sample_rate: f64, frequency: f64) -> Self {
        Self {
            phase: 0.0,
            step: TAU * frequency / sample_rate,
        }
    }

    /// Next `frames` mono samples as 16-bit little-endian PCM.
    ///
    /// Phase carries over between calls, so consecutive chunks join without
    /// a click.
    pub fn next_chunk(&mut self, frames: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(frames * 2);
        for _ in 0..frames {
            let sample = (self.phase.sin() * 0.3 * f64::from(i16::MAX)) as i16;
            out.extend_from_slice(&sample.to_le_bytes());
            self.phase = (self.phase + self.step) % TAU;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_has_two_bytes_per_frame() {
        let mut tone = ToneSource::new(16_000.0, 440.0);
        assert_eq!(tone.next_chunk(320).len(), 640);
    }

    #[test]
    fn phase_is_continuous_across_chunks() {
        let mut split = ToneSource::new(16_000.0, 440.0);
        let mut whole = ToneSource::new(16_000.0, 440.0);
        let mut joined = split.next_chunk(100);
        joined.extend_from_slice(&split.next_chunk(100));
        assert_eq!(joined, whole.next_chunk(200));
    }

    #[test]
    fn amplitude_stays_within_headroom() {
        let mut tone = ToneSource::new(16_000.0, 1_000.0);
        let bytes = tone.next_chunk(1_000);
        for pair in bytes.chunks_exact(2) {
            let sample = i16::from_le_bytes([pair[0], pair[1]]);
            assert!(sample.unsigned_abs() <= (0.31 * f64::from(i16::MAX)) as u16);
        }
    }
}

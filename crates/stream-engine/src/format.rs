//! In-memory audio format descriptor.
//!
//! Describes the PCM layout of the bytes pushed through the engine. The
//! descriptor is handed to [`crate::engine::PlaybackEngine::configure`] once
//! per session and never changes while buffers exist.

use crate::error::EngineError;

/// Encoding of the samples carried by a format.
///
/// Only uncompressed linear PCM is defined; compressed formats would arrive
/// here already decoded (decoding is out of scope for this engine).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FormatTag {
    LinearPcm,
}

/// Stream format descriptor.
///
/// ## CBR vs. VBR
/// When `bytes_per_frame` and `frames_per_packet` are both non-zero every
/// packet has the same size (constant bit rate) and packet descriptions are
/// unused. When either is zero the stream is variable bit rate and each
/// playback buffer carries a packet-description array (see
/// [`crate::pool::PlaybackBuffer`]).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AudioFormat {
    /// Sample rate in Hz.
    pub sample_rate: f64,
    pub tag: FormatTag,
    pub bits_per_sample: u16,
    pub channels_per_frame: u16,
    /// Frames per packet; 0 marks a variable packet layout.
    pub frames_per_packet: u32,
    /// `channels_per_frame * bits_per_sample / 8`; 0 marks a variable layout.
    pub bytes_per_frame: u32,
    /// `frames_per_packet * bytes_per_frame`.
    pub bytes_per_packet: u32,
}

impl AudioFormat {
    /// Interleaved signed-integer PCM with one frame per packet.
    ///
    /// Example: `AudioFormat::linear_pcm(16_000.0, 16, 1)` describes the
    /// 16 kHz / 16-bit / mono stream used throughout the tests.
    pub fn linear_pcm(sample_rate: f64, bits_per_sample: u16, channels: u16) -> Self {
        let bytes_per_frame = u32::from(channels) * u32::from(bits_per_sample / 8);
        Self {
            sample_rate,
            tag: FormatTag::LinearPcm,
            bits_per_sample,
            channels_per_frame: channels,
            frames_per_packet: 1,
            bytes_per_frame,
            bytes_per_packet: bytes_per_frame,
        }
    }

    /// Whether the stream uses a variable bit rate.
    pub fn is_vbr(&self) -> bool {
        self.bytes_per_frame == 0 || self.frames_per_packet == 0
    }

    /// Reject descriptors the engine cannot derive buffer sizes from.
    pub fn validate(&self) -> Result<(), EngineError> {
        if !(self.sample_rate > 0.0) || !self.sample_rate.is_finite() {
            return Err(EngineError::Configuration(format!(
                "sample rate must be positive, got {}",
                self.sample_rate
            )));
        }
        if self.is_vbr() {
            // Variable layouts have no fixed packet size to check; the
            // driver is queried at pool-configure time instead.
            return Ok(());
        }
        if self.channels_per_frame == 0 || self.bits_per_sample == 0 {
            return Err(EngineError::Configuration(
                "constant-rate format requires channels and bit depth".into(),
            ));
        }
        if self.bits_per_sample % 8 != 0 {
            return Err(EngineError::Configuration(format!(
                "bits per sample must be byte aligned, got {}",
                self.bits_per_sample
            )));
        }
        let expected_frame =
            u32::from(self.channels_per_frame) * u32::from(self.bits_per_sample / 8);
        if self.bytes_per_frame != expected_frame {
            return Err(EngineError::Configuration(format!(
                "bytes per frame {} does not match {} channels at {} bits",
                self.bytes_per_frame, self.channels_per_frame, self.bits_per_sample
            )));
        }
        if self.bytes_per_packet != self.frames_per_packet * self.bytes_per_frame {
            return Err(EngineError::Configuration(
                "bytes per packet does not match frames per packet".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mono_16khz_is_cbr() {
        let fmt = AudioFormat::linear_pcm(16_000.0, 16, 1);
        assert_eq!(fmt.bytes_per_frame, 2);
        assert_eq!(fmt.frames_per_packet, 1);
        assert_eq!(fmt.bytes_per_packet, 2);
        assert!(!fmt.is_vbr());
        assert!(fmt.validate().is_ok());
    }

    #[test]
    fn zero_frames_per_packet_is_vbr() {
        let mut fmt = AudioFormat::linear_pcm(44_100.0, 16, 2);
        fmt.frames_per_packet = 0;
        fmt.bytes_per_packet = 0;
        assert!(fmt.is_vbr());
        assert!(fmt.validate().is_ok());
    }

    #[test]
    fn zero_bytes_per_frame_is_vbr() {
        let mut fmt = AudioFormat::linear_pcm(44_100.0, 16, 2);
        fmt.bytes_per_frame = 0;
        assert!(fmt.is_vbr());
    }

    #[test]
    fn rejects_bad_sample_rate() {
        let mut fmt = AudioFormat::linear_pcm(0.0, 16, 1);
        assert!(fmt.validate().is_err());
        fmt.sample_rate = f64::NAN;
        assert!(fmt.validate().is_err());
    }

    #[test]
    fn rejects_inconsistent_frame_size() {
        let mut fmt = AudioFormat::linear_pcm(48_000.0, 16, 2);
        fmt.bytes_per_frame = 3;
        assert!(fmt.validate().is_err());
    }

    #[test]
    fn rejects_unaligned_bit_depth() {
        let mut fmt = AudioFormat::linear_pcm(48_000.0, 12, 1);
        fmt.bits_per_sample = 12;
        assert!(fmt.validate().is_err());
    }
}

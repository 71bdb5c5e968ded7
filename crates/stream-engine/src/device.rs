//! Output device discovery for the cpal driver.
//!
//! Deliberately small: routing policy is out of scope, so this only covers
//! "default device" and "first device matching a substring".

use cpal::traits::{DeviceTrait, HostTrait};

use crate::error::{DriverError, DriverErrorKind};
use crate::format::AudioFormat;

/// Pick the first output device matching `needle` (case-insensitive), or
/// the default output device when `needle` is `None`.
pub fn pick_device(host: &cpal::Host, needle: Option<&str>) -> Result<cpal::Device, DriverError> {
    let mut devices: Vec<cpal::Device> = host
        .output_devices()
        .map_err(|_| DriverError::from_kind(DriverErrorKind::InvalidDevice))?
        .collect();

    if let Some(needle) = needle {
        if let Some(d) = devices.drain(..).find(|d| {
            d.description()
                .ok()
                .map(|n| matches_device_name(&n.name(), needle))
                .unwrap_or(false)
        }) {
            return Ok(d);
        }
        return Err(DriverError::from_kind(DriverErrorKind::InvalidDevice));
    }

    host.default_output_device()
        .ok_or_else(|| DriverError::from_kind(DriverErrorKind::InvalidDevice))
}

/// Choose a supported output config for the source format.
///
/// Prefers a range with the source channel count that contains the source
/// rate; otherwise falls back to the nearest rate, letting the stream
/// callback handle channel mapping.
pub fn pick_output_config(
    device: &cpal::Device,
    format: &AudioFormat,
) -> Result<cpal::SupportedStreamConfig, DriverError> {
    let rate = format.sample_rate as u32;
    let ranges: Vec<cpal::SupportedStreamConfigRange> = device
        .supported_output_configs()
        .map_err(|_| DriverError::from_kind(DriverErrorKind::InvalidDevice))?
        .collect();

    let mut best: Option<(u8, cpal::SupportedStreamConfig)> = None;
    for range in ranges {
        let in_range = rate >= range.min_sample_rate() && rate <= range.max_sample_rate();
        let chosen_rate = if in_range {
            rate
        } else if rate < range.min_sample_rate() {
            range.min_sample_rate()
        } else {
            range.max_sample_rate()
        };
        let rank = match (range.channels() == format.channels_per_frame, in_range) {
            (true, true) => 0,
            (true, false) => 1,
            (false, true) => 2,
            (false, false) => 3,
        };
        if best.as_ref().map(|(r, _)| rank < *r).unwrap_or(true) {
            best = Some((rank, range.with_sample_rate(chosen_rate)));
        }
    }

    best.map(|(_, cfg)| cfg)
        .ok_or_else(|| DriverError::from_kind(DriverErrorKind::InvalidDevice))
}

/// Log available output devices for the default host.
pub fn list_devices() -> Result<(), DriverError> {
    let host = cpal::default_host();
    let devices = host
        .output_devices()
        .map_err(|_| DriverError::from_kind(DriverErrorKind::InvalidDevice))?;
    for (i, d) in devices.enumerate() {
        match d.description() {
            Ok(desc) => println!("#{i}: {desc}"),
            Err(_) => println!("#{i}: <unnamed device>"),
        }
    }
    Ok(())
}

fn matches_device_name(name: &str, needle: &str) -> bool {
    let needle = needle.trim();
    if needle.is_empty() {
        return false;
    }
    name.to_lowercase().contains(&needle.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_device_name_is_case_insensitive() {
        assert!(matches_device_name("USB DAC", "dac"));
        assert!(matches_device_name("usb dac", "USB"));
        assert!(!matches_device_name("USB DAC", "speaker"));
        assert!(!matches_device_name("USB DAC", ""));
        assert!(!matches_device_name("USB DAC", "   "));
    }
}

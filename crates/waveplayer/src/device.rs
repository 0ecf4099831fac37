//! Output device selection for [`crate::output::CpalContext`] and `list-devices`.

use cpal::traits::{DeviceTrait, HostTrait};

use crate::error::{PlayerError, Result};

/// Output device metadata for `list-devices`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    pub min_rate: u32,
    pub max_rate: u32,
    pub is_default: bool,
}

pub fn device_name(device: &cpal::Device) -> Option<String> {
    device.description().ok().map(|d| d.name().to_string())
}

/// First output device whose name contains `needle` (case-insensitive), or the
/// host default when `needle` is `None` or blank.
pub fn pick_device(host: &cpal::Host, needle: Option<&str>) -> Result<cpal::Device> {
    let Some(needle) = needle.map(str::trim).filter(|n| !n.is_empty()) else {
        return host
            .default_output_device()
            .ok_or_else(|| init_failed("no default output device"));
    };
    host.output_devices()
        .map_err(|e| init_failed(format!("no output devices: {e}")))?
        .find(|d| device_name(d).is_some_and(|name| name_matches(&name, needle)))
        .ok_or_else(|| init_failed(format!("no output device matched: {needle}")))
}

/// The device's default stream config, moved to `sample_rate` when a supported
/// range covers it. Float formats win ties.
pub fn pick_output_config(
    device: &cpal::Device,
    sample_rate: Option<u32>,
) -> Result<cpal::SupportedStreamConfig> {
    let default = device
        .default_output_config()
        .map_err(|e| init_failed(format!("no default output config: {e}")))?;
    let Some(rate) = sample_rate.filter(|r| *r != default.sample_rate()) else {
        return Ok(default);
    };

    let mut covering: Vec<cpal::SupportedStreamConfigRange> = device
        .supported_output_configs()
        .map_err(|e| init_failed(format!("unable to query output configs: {e}")))?
        .filter(|r| r.channels() == default.channels())
        .filter(|r| (r.min_sample_rate()..=r.max_sample_rate()).contains(&rate))
        .collect();
    covering.sort_by_key(|r| !r.sample_format().is_float());
    match covering.into_iter().next() {
        Some(range) => Ok(range.with_sample_rate(rate)),
        None => {
            tracing::warn!(
                requested = rate,
                using = default.sample_rate(),
                "sample rate not supported by device; using its default"
            );
            Ok(default)
        }
    }
}

/// Enumerate output devices on `host`. Devices reporting no configs are skipped.
pub fn list_output_devices(host: &cpal::Host) -> Result<Vec<DeviceInfo>> {
    let default_name = host.default_output_device().and_then(|d| device_name(&d));
    let devices = host
        .output_devices()
        .map_err(|e| init_failed(format!("no output devices: {e}")))?;

    let mut out = Vec::new();
    for d in devices {
        let Some(name) = device_name(&d) else {
            continue;
        };
        let spans = d
            .supported_output_configs()
            .map(|ranges| {
                ranges
                    .map(|r| (r.min_sample_rate(), r.max_sample_rate()))
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        let Some((min_rate, max_rate)) = rate_span(&spans) else {
            tracing::warn!(device = %name, "skipping device without output configs");
            continue;
        };
        out.push(DeviceInfo {
            is_default: default_name.as_deref() == Some(name.as_str()),
            name,
            min_rate,
            max_rate,
        });
    }
    Ok(out)
}

fn init_failed(msg: impl Into<String>) -> PlayerError {
    PlayerError::ContextInitFailed(msg.into())
}

fn name_matches(name: &str, needle: &str) -> bool {
    name.to_lowercase().contains(&needle.to_lowercase())
}

fn rate_span(spans: &[(u32, u32)]) -> Option<(u32, u32)> {
    let min = spans.iter().map(|(lo, _)| *lo).min()?;
    let max = spans.iter().map(|(_, hi)| *hi).max()?;
    Some((min, max))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_names_match_case_insensitively() {
        assert!(name_matches("USB DAC", "dac"));
        assert!(name_matches("usb dac", "USB"));
        assert!(!name_matches("USB DAC", "speaker"));
    }

    #[test]
    fn rate_span_covers_all_ranges() {
        assert_eq!(rate_span(&[(44_100, 48_000), (8_000, 96_000)]), Some((8_000, 96_000)));
        assert_eq!(rate_span(&[]), None);
    }
}

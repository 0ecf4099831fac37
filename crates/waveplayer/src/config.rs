//! Player configuration.
//!
//! Every field is optional in TOML; missing values fall back to the defaults below.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{PlayerError, Result};

/// Default bytes per range request (1 MiB).
pub const DEFAULT_CHUNK_SIZE: u64 = 1024 * 1024;
/// Default ceiling for decoded audio held by the pool (100 MiB).
pub const DEFAULT_MAX_POOL_SIZE: u64 = 100 * 1024 * 1024;

/// Buffer pool / loader tuning.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct PoolConfig {
    /// Bytes per range request.
    pub chunk_size: u64,
    /// Max decoded bytes held across the current and next slots.
    pub max_pool_size: u64,
    /// Timeout applied to the HEAD probe and to each range request.
    pub fetch_timeout_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_pool_size: DEFAULT_MAX_POOL_SIZE,
            fetch_timeout_ms: 10_000,
        }
    }
}

impl PoolConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
}

/// Transport tuning.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Length of the gain ramp used by volume and mute changes.
    pub volume_ramp_ms: u64,
    /// Volume applied when the engine is created.
    pub initial_volume: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            volume_ramp_ms: 50,
            initial_volume: 1.0,
        }
    }
}

impl EngineConfig {
    pub fn volume_ramp_secs(&self) -> f64 {
        self.volume_ramp_ms as f64 / 1000.0
    }
}

/// Analyser node parameters (Web Audio compatible).
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct AnalyserConfig {
    pub fft_size: usize,
    pub smoothing_time_constant: f32,
    pub min_decibels: f32,
    pub max_decibels: f32,
}

impl Default for AnalyserConfig {
    fn default() -> Self {
        Self {
            fft_size: 2048,
            smoothing_time_constant: 0.8,
            min_decibels: -100.0,
            max_decibels: -30.0,
        }
    }
}

/// Output device selection.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct OutputConfig {
    /// Substring match against output device names; default device when unset.
    pub device: Option<String>,
    /// Preferred output sample rate in Hz.
    pub sample_rate: Option<u32>,
}

/// Top-level player configuration loaded from TOML.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct PlayerConfig {
    pub pool: PoolConfig,
    pub engine: EngineConfig,
    pub analyser: AnalyserConfig,
    pub output: OutputConfig,
}

impl PlayerConfig {
    /// Load and validate configuration from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| PlayerError::Config(format!("read config {:?}: {e}", path)))?;
        Self::from_toml_str(&raw)
            .map_err(|e| PlayerError::Config(format!("{:?}: {e}", path)))
    }

    /// Parse and validate configuration from a TOML string.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let cfg = toml::from_str::<PlayerConfig>(raw)
            .map_err(|e| PlayerError::Config(format!("parse config: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject values the player cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.pool.chunk_size == 0 {
            return Err(PlayerError::Config("pool.chunk_size must be > 0".into()));
        }
        if self.pool.max_pool_size == 0 {
            return Err(PlayerError::Config("pool.max_pool_size must be > 0".into()));
        }
        let fft = self.analyser.fft_size;
        if !fft.is_power_of_two() || !(32..=32768).contains(&fft) {
            return Err(PlayerError::Config(format!(
                "analyser.fft_size must be a power of two in 32..=32768, got {fft}"
            )));
        }
        if !(0.0..=1.0).contains(&self.analyser.smoothing_time_constant) {
            return Err(PlayerError::Config(
                "analyser.smoothing_time_constant must be within 0..=1".into(),
            ));
        }
        if self.analyser.min_decibels >= self.analyser.max_decibels {
            return Err(PlayerError::Config(
                "analyser.min_decibels must be below max_decibels".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.engine.initial_volume) {
            return Err(PlayerError::Config("engine.initial_volume must be within 0..=1".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = PlayerConfig::default();
        assert_eq!(cfg.pool.chunk_size, 1024 * 1024);
        assert_eq!(cfg.pool.max_pool_size, 100 * 1024 * 1024);
        assert_eq!(cfg.pool.fetch_timeout(), Duration::from_secs(10));
        assert_eq!(cfg.analyser.fft_size, 2048);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg = PlayerConfig::from_toml_str(
            r#"
            [pool]
            chunk_size = 65536

            [output]
            device = "USB"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.pool.chunk_size, 65536);
        assert_eq!(cfg.pool.max_pool_size, DEFAULT_MAX_POOL_SIZE);
        assert_eq!(cfg.output.device.as_deref(), Some("USB"));
        assert_eq!(cfg.engine.volume_ramp_ms, 50);
    }

    #[test]
    fn rejects_non_power_of_two_fft() {
        let err = PlayerConfig::from_toml_str("[analyser]\nfft_size = 1000\n").unwrap_err();
        assert!(matches!(err, PlayerError::Config(_)));
    }

    #[test]
    fn rejects_zero_chunk_size() {
        let err = PlayerConfig::from_toml_str("[pool]\nchunk_size = 0\n").unwrap_err();
        assert!(err.to_string().contains("chunk_size"));
    }

    #[test]
    fn rejects_inverted_decibel_range() {
        let err = PlayerConfig::from_toml_str(
            "[analyser]\nmin_decibels = -20.0\nmax_decibels = -30.0\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("min_decibels"));
    }
}

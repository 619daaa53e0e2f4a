use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::stimulus::VolumeMode;
use crate::tone::SmoothingRates;

/// Environment variable naming the directory that holds `config.toml`.
pub const CONFIG_DIR_ENV: &str = "PSYCHOACOUSTICS_CONFIG";

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct BackendConfig {
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "default_frames_per_buffer")]
    pub frames_per_buffer: usize,
    #[serde(default)]
    pub volume_mode: VolumeMode,
    /// dB per second.
    #[serde(default = "default_amplitude_rate_db")]
    pub amplitude_rate_db: f32,
    /// Linear amplitude units per second.
    #[serde(default = "default_amplitude_rate_linear")]
    pub amplitude_rate_linear: f32,
    /// Hz per second.
    #[serde(default = "default_frequency_rate")]
    pub frequency_rate: f32,
    /// Finest spacing the adaptive controller will refine down to.
    #[serde(default = "default_min_search_precision")]
    pub min_search_precision: f64,
    /// Fixed RNG seed for reproducible probe sequences.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

fn default_sample_rate() -> u32 {
    48000
}

fn default_frames_per_buffer() -> usize {
    1024
}

fn default_amplitude_rate_db() -> f32 {
    200.0
}

fn default_amplitude_rate_linear() -> f32 {
    2.0
}

fn default_frequency_rate() -> f32 {
    20_000.0
}

fn default_min_search_precision() -> f64 {
    1.0
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            frames_per_buffer: default_frames_per_buffer(),
            volume_mode: VolumeMode::default(),
            amplitude_rate_db: default_amplitude_rate_db(),
            amplitude_rate_linear: default_amplitude_rate_linear(),
            frequency_rate: default_frequency_rate(),
            min_search_precision: default_min_search_precision(),
            seed: None,
            output_dir: default_output_dir(),
            log_filter: default_log_filter(),
        }
    }
}

impl BackendConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let txt = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&txt)?)
    }

    /// Writes the default configuration to `path`.
    pub fn generate_default<P: AsRef<Path>>(path: P) -> Result<()> {
        let txt = toml::to_string_pretty(&BackendConfig::default())?;
        std::fs::write(path, txt)?;
        Ok(())
    }

    /// Envelope rates for the given volume mode.
    pub fn smoothing_rates(&self, mode: VolumeMode) -> SmoothingRates {
        SmoothingRates {
            amplitude: match mode {
                VolumeMode::Decibel => self.amplitude_rate_db,
                VolumeMode::Linear => self.amplitude_rate_linear,
            },
            frequency: self.frequency_rate,
        }
    }
}

fn config_path() -> PathBuf {
    let dir = std::env::var_os(CONFIG_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(env!("CARGO_MANIFEST_DIR")));
    dir.join("config.toml")
}

pub static CONFIG: Lazy<BackendConfig> = Lazy::new(|| {
    let path = config_path();
    if path.exists() {
        match BackendConfig::load(&path) {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::warn!("ignoring {}: {e}", path.display());
                BackendConfig::default()
            }
        }
    } else {
        BackendConfig::default()
    }
});

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::config::BackendConfig;
use crate::error::{BackendError, Result};
use crate::stimulus::{Stimulus, VolumeMode};
use crate::tone::{PureToneMono, PureToneStereo, SmoothingRates, ToneConfig, ToneSettings};

fn default_smoothing() -> bool {
    true
}

/// JSON description of a stimulus, as handed over by the CLI or the Python layer.
///
/// One entry in `tones` builds a mono tone, two build a stereo tone (left, right).
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct StimulusSpec {
    #[serde(default, alias = "sampleRate", alias = "Fs")]
    pub sample_rate: Option<u32>,
    #[serde(default, alias = "volumeMode")]
    pub volume_mode: Option<VolumeMode>,
    /// Seconds; omitted or `null` plays until stopped.
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default = "default_smoothing")]
    pub smoothing: bool,
    #[serde(default, alias = "smoothingRates")]
    pub smoothing_rates: Option<SmoothingRates>,
    #[serde(alias = "channels")]
    pub tones: Vec<ToneSettings>,
}

impl StimulusSpec {
    pub fn from_json(data: &str) -> Result<Self> {
        Ok(serde_json::from_str(data)?)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        Ok(serde_json::from_reader(file)?)
    }

    /// Resolves unset fields against `defaults`.
    pub fn tone_config(&self, defaults: &BackendConfig) -> ToneConfig {
        let volume_mode = self.volume_mode.unwrap_or(defaults.volume_mode);
        ToneConfig {
            sample_rate: self.sample_rate.unwrap_or(defaults.sample_rate),
            volume_mode,
            duration: self.duration.unwrap_or(f64::INFINITY),
            smoothing: self
                .smoothing
                .then(|| {
                    self.smoothing_rates
                        .unwrap_or_else(|| defaults.smoothing_rates(volume_mode))
                }),
        }
    }

    pub fn build(&self, defaults: &BackendConfig) -> Result<Box<dyn Stimulus>> {
        let config = self.tone_config(defaults);
        match self.tones.as_slice() {
            [tone] => Ok(Box::new(PureToneMono::new(&config, *tone)?)),
            [left, right] => Ok(Box::new(PureToneStereo::new(&config, *left, *right)?)),
            tones => Err(BackendError::InvalidStimulus(format!(
                "expected 1 or 2 tones, found {}",
                tones.len()
            ))),
        }
    }
}

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{BackendError, Result};
use crate::param::ParameterSet;

/// Sample rates a stimulus can be built at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum SampleRate {
    Hz44100,
    Hz48000,
}

impl SampleRate {
    pub const SUPPORTED: [u32; 2] = [44100, 48000];

    pub fn hz(self) -> u32 {
        match self {
            SampleRate::Hz44100 => 44100,
            SampleRate::Hz48000 => 48000,
        }
    }

    pub fn as_f32(self) -> f32 {
        self.hz() as f32
    }

    pub fn as_f64(self) -> f64 {
        self.hz() as f64
    }
}

impl TryFrom<u32> for SampleRate {
    type Error = BackendError;

    fn try_from(rate: u32) -> Result<Self> {
        match rate {
            44100 => Ok(SampleRate::Hz44100),
            48000 => Ok(SampleRate::Hz48000),
            _ => Err(BackendError::UnsupportedSampleRate { rate }),
        }
    }
}

impl From<SampleRate> for u32 {
    fn from(rate: SampleRate) -> u32 {
        rate.hz()
    }
}

/// How amplitude parameters are interpreted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VolumeMode {
    /// Peak amplitude in `[0, 1]`.
    Linear,
    /// Level in dB full scale, at most 0.
    #[default]
    #[serde(alias = "db")]
    Decibel,
}

impl VolumeMode {
    pub fn gain(self, amplitude: f32) -> f32 {
        match self {
            VolumeMode::Linear => amplitude,
            VolumeMode::Decibel => crate::dsp::db_to_gain(amplitude),
        }
    }
}

impl fmt::Display for VolumeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VolumeMode::Linear => f.write_str("linear"),
            VolumeMode::Decibel => f.write_str("decibel"),
        }
    }
}

/// Elapsed-frame counter with a sticky completion flag.
#[derive(Debug, Clone)]
pub struct Clock {
    sample_rate: f64,
    duration: f64,
    elapsed_frames: u64,
    complete: bool,
}

impl Clock {
    /// `duration` is in seconds and may be `f64::INFINITY`.
    pub fn new(sample_rate: SampleRate, duration: f64) -> Result<Self> {
        if duration.is_nan() || duration < 0.0 {
            return Err(BackendError::InvalidDuration { value: duration });
        }
        Ok(Self {
            sample_rate: sample_rate.as_f64(),
            duration,
            elapsed_frames: 0,
            complete: false,
        })
    }

    /// Accounts for a buffer of `frames` starting at the current position and
    /// returns the completion flag for it.
    pub fn advance(&mut self, frames: usize) -> bool {
        let start = self.elapsed_frames as f64;
        self.elapsed_frames += frames as u64;
        if start > self.duration * self.sample_rate {
            self.complete = true;
        }
        self.complete
    }

    pub fn reset(&mut self) {
        self.elapsed_frames = 0;
        self.complete = false;
    }

    pub fn elapsed_frames(&self) -> u64 {
        self.elapsed_frames
    }

    pub fn duration_seconds(&self) -> f64 {
        self.duration
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }
}

/// A waveform generator the audio stream pulls buffers from.
///
/// Implementations are driven from the audio thread: `fill_buffer` must not block
/// and should not allocate once [`Stimulus::reserve`] has sized the scratch space.
pub trait Stimulus: Send {
    fn sample_rate(&self) -> SampleRate;

    fn channel_count(&self) -> usize;

    fn duration_seconds(&self) -> f64;

    /// Control surface for the stimulus's declared parameters.
    fn parameters(&self) -> ParameterSet;

    /// Pre-sizes internal buffers for blocks of up to `max_frames` frames.
    fn reserve(&mut self, max_frames: usize);

    /// Rewinds to frame zero with zero phase and clears completion.
    fn reset(&mut self);

    /// Writes interleaved samples for `output.len() / channel_count()` frames and
    /// returns whether the stimulus has completed.
    fn fill_buffer(&mut self, output: &mut [f32]) -> bool;

    fn elapsed_frames(&self) -> u64;

    fn is_complete(&self) -> bool;

    /// Allocating form of [`Stimulus::fill_buffer`].
    fn render(&mut self, frame_count: usize) -> (Vec<f32>, bool) {
        let mut samples = vec![0.0; frame_count * self.channel_count()];
        let complete = self.fill_buffer(&mut samples);
        (samples, complete)
    }
}

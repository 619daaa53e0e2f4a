//! Pure tone stimuli.
//!
//! Each channel owns an amplitude and a frequency parameter (smoothed through an
//! envelope unless smoothing is switched off) plus a raw phase offset. The phase
//! accumulator integrates the per-sample frequency, so the waveform stays
//! continuous across buffer boundaries even while the frequency is ramping.

use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;

use crate::dsp::wrap_phase;
use crate::error::Result;
use crate::param::{ParameterKind, ParameterSet, StimulusParameter};
use crate::stimulus::{Clock, SampleRate, Stimulus, VolumeMode};

pub const MONO_PARAMETERS: [&str; 3] = ["amplitude", "frequency", "phase_offset"];

pub const STEREO_PARAMETERS: [&str; 6] = [
    "amplitude_left",
    "frequency_left",
    "phase_offset_left",
    "amplitude_right",
    "frequency_right",
    "phase_offset_right",
];

const DEFAULT_BLOCK_FRAMES: usize = 1024;

/// Envelope rates, in units per second.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SmoothingRates {
    pub amplitude: f32,
    pub frequency: f32,
}

impl SmoothingRates {
    pub fn for_mode(mode: VolumeMode) -> Self {
        match mode {
            VolumeMode::Decibel => Self {
                amplitude: 200.0,
                frequency: 20_000.0,
            },
            VolumeMode::Linear => Self {
                amplitude: 2.0,
                frequency: 20_000.0,
            },
        }
    }
}

/// Settings shared by every channel of a tone.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ToneConfig {
    pub sample_rate: u32,
    pub volume_mode: VolumeMode,
    /// Seconds; `f64::INFINITY` plays until stopped.
    pub duration: f64,
    /// `None` turns amplitude and frequency into raw parameters.
    pub smoothing: Option<SmoothingRates>,
}

impl Default for ToneConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            volume_mode: VolumeMode::Decibel,
            duration: f64::INFINITY,
            smoothing: Some(SmoothingRates::for_mode(VolumeMode::Decibel)),
        }
    }
}

/// Initial values for one channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ToneSettings {
    #[serde(alias = "A", alias = "amp")]
    pub amplitude: f32,
    #[serde(alias = "f", alias = "freq")]
    pub frequency: f32,
    #[serde(default, alias = "theta")]
    pub phase_offset: f32,
}

impl ToneSettings {
    pub fn new(amplitude: f32, frequency: f32) -> Self {
        Self {
            amplitude,
            frequency,
            phase_offset: 0.0,
        }
    }
}

struct ToneChannel {
    amplitude: StimulusParameter,
    frequency: StimulusParameter,
    phase_offset: StimulusParameter,
    /// Radians in `[0, 2π)` carried into the next buffer.
    phase: f64,
    amp_buf: Vec<f32>,
    freq_buf: Vec<f32>,
}

impl ToneChannel {
    fn new(config: &ToneConfig, sample_rate: SampleRate, tone: ToneSettings) -> Result<Self> {
        ParameterKind::Amplitude(config.volume_mode).validate(tone.amplitude)?;
        ParameterKind::Frequency.validate(tone.frequency)?;
        ParameterKind::PhaseOffset.validate(tone.phase_offset)?;

        let fs = sample_rate.as_f32();
        let (amplitude, frequency) = match config.smoothing {
            Some(rates) => (
                StimulusParameter::smoothed(tone.amplitude, rates.amplitude, fs)?,
                StimulusParameter::smoothed(tone.frequency, rates.frequency, fs)?,
            ),
            None => (
                StimulusParameter::raw(tone.amplitude),
                StimulusParameter::raw(tone.frequency),
            ),
        };
        Ok(Self {
            amplitude,
            frequency,
            phase_offset: StimulusParameter::raw(tone.phase_offset),
            phase: 0.0,
            amp_buf: vec![0.0; DEFAULT_BLOCK_FRAMES],
            freq_buf: vec![0.0; DEFAULT_BLOCK_FRAMES],
        })
    }

    fn register(&self, set: &mut ParameterSet, mode: VolumeMode, names: [&'static str; 3]) {
        set.register(names[0], ParameterKind::Amplitude(mode), &self.amplitude);
        set.register(names[1], ParameterKind::Frequency, &self.frequency);
        set.register(names[2], ParameterKind::PhaseOffset, &self.phase_offset);
    }

    fn reserve(&mut self, frames: usize) {
        if self.amp_buf.len() < frames {
            self.amp_buf.resize(frames, 0.0);
            self.freq_buf.resize(frames, 0.0);
        }
    }

    fn reset(&mut self) {
        self.phase = 0.0;
        self.amplitude.snap();
        self.frequency.snap();
    }

    /// Synthesizes `frames` samples into every `stride`-th slot of `output`,
    /// starting at `channel`.
    fn render(
        &mut self,
        output: &mut [f32],
        frames: usize,
        stride: usize,
        channel: usize,
        mode: VolumeMode,
        sample_rate: f64,
    ) {
        self.reserve(frames);
        let amp = &mut self.amp_buf[..frames];
        let freq = &mut self.freq_buf[..frames];
        self.amplitude.fill(amp);
        self.frequency.fill(freq);
        let offset = self.phase_offset.setpoint() as f64;

        let increment = TAU / sample_rate;
        let mut phase = self.phase;
        for (i, frame) in output.chunks_exact_mut(stride).take(frames).enumerate() {
            phase += increment * freq[i] as f64;
            let gain = mode.gain(amp[i]) as f64;
            frame[channel] = (gain * (phase + offset).sin()) as f32;
        }
        self.phase = wrap_phase(phase);
    }
}

/// Single-channel sine tone.
pub struct PureToneMono {
    sample_rate: SampleRate,
    volume_mode: VolumeMode,
    clock: Clock,
    tone: ToneChannel,
    parameters: ParameterSet,
}

impl PureToneMono {
    pub fn new(config: &ToneConfig, tone: ToneSettings) -> Result<Self> {
        let sample_rate = SampleRate::try_from(config.sample_rate)?;
        let clock = Clock::new(sample_rate, config.duration)?;
        let tone = ToneChannel::new(config, sample_rate, tone)?;
        let mut parameters = ParameterSet::new();
        tone.register(&mut parameters, config.volume_mode, MONO_PARAMETERS);
        Ok(Self {
            sample_rate,
            volume_mode: config.volume_mode,
            clock,
            tone,
            parameters,
        })
    }

    pub fn volume_mode(&self) -> VolumeMode {
        self.volume_mode
    }
}

impl Stimulus for PureToneMono {
    fn sample_rate(&self) -> SampleRate {
        self.sample_rate
    }

    fn channel_count(&self) -> usize {
        1
    }

    fn duration_seconds(&self) -> f64 {
        self.clock.duration_seconds()
    }

    fn parameters(&self) -> ParameterSet {
        self.parameters.clone()
    }

    fn reserve(&mut self, max_frames: usize) {
        self.tone.reserve(max_frames);
    }

    fn reset(&mut self) {
        self.clock.reset();
        self.tone.reset();
    }

    fn fill_buffer(&mut self, output: &mut [f32]) -> bool {
        let frames = output.len();
        self.tone.render(
            output,
            frames,
            1,
            0,
            self.volume_mode,
            self.sample_rate.as_f64(),
        );
        self.clock.advance(frames)
    }

    fn elapsed_frames(&self) -> u64 {
        self.clock.elapsed_frames()
    }

    fn is_complete(&self) -> bool {
        self.clock.is_complete()
    }
}

/// Two independent sine tones, interleaved left/right.
pub struct PureToneStereo {
    sample_rate: SampleRate,
    volume_mode: VolumeMode,
    clock: Clock,
    left: ToneChannel,
    right: ToneChannel,
    parameters: ParameterSet,
}

impl PureToneStereo {
    pub fn new(config: &ToneConfig, left: ToneSettings, right: ToneSettings) -> Result<Self> {
        let sample_rate = SampleRate::try_from(config.sample_rate)?;
        let clock = Clock::new(sample_rate, config.duration)?;
        let left = ToneChannel::new(config, sample_rate, left)?;
        let right = ToneChannel::new(config, sample_rate, right)?;
        let mut parameters = ParameterSet::new();
        let [al, fl, pl, ar, fr, pr] = STEREO_PARAMETERS;
        left.register(&mut parameters, config.volume_mode, [al, fl, pl]);
        right.register(&mut parameters, config.volume_mode, [ar, fr, pr]);
        Ok(Self {
            sample_rate,
            volume_mode: config.volume_mode,
            clock,
            left,
            right,
            parameters,
        })
    }

    pub fn volume_mode(&self) -> VolumeMode {
        self.volume_mode
    }
}

impl Stimulus for PureToneStereo {
    fn sample_rate(&self) -> SampleRate {
        self.sample_rate
    }

    fn channel_count(&self) -> usize {
        2
    }

    fn duration_seconds(&self) -> f64 {
        self.clock.duration_seconds()
    }

    fn parameters(&self) -> ParameterSet {
        self.parameters.clone()
    }

    fn reserve(&mut self, max_frames: usize) {
        self.left.reserve(max_frames);
        self.right.reserve(max_frames);
    }

    fn reset(&mut self) {
        self.clock.reset();
        self.left.reset();
        self.right.reset();
    }

    fn fill_buffer(&mut self, output: &mut [f32]) -> bool {
        let frames = output.len() / 2;
        let fs = self.sample_rate.as_f64();
        self.left.render(output, frames, 2, 0, self.volume_mode, fs);
        self.right.render(output, frames, 2, 1, self.volume_mode, fs);
        self.clock.advance(frames)
    }

    fn elapsed_frames(&self) -> u64 {
        self.clock.elapsed_frames()
    }

    fn is_complete(&self) -> bool {
        self.clock.is_complete()
    }
}

//! Controllable stimulus parameters and the control surface the test layer uses
//! to move them.

use std::sync::Arc;

use crate::dsp::AtomicF32;
use crate::envelope::EnvelopeGenerator;
use crate::error::{BackendError, Result};
use crate::stimulus::VolumeMode;

/// What a parameter means, which decides the values it accepts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParameterKind {
    Amplitude(VolumeMode),
    Frequency,
    PhaseOffset,
}

impl ParameterKind {
    pub fn validate(self, value: f32) -> Result<()> {
        match self {
            ParameterKind::Amplitude(mode) => {
                let ok = match mode {
                    VolumeMode::Decibel => !value.is_nan() && value <= 0.0,
                    VolumeMode::Linear => (0.0..=1.0).contains(&value),
                };
                if ok {
                    Ok(())
                } else {
                    Err(BackendError::InvalidAmplitude { value, mode })
                }
            }
            ParameterKind::Frequency => {
                if value.is_finite() && value >= 0.0 {
                    Ok(())
                } else {
                    Err(BackendError::InvalidFrequency { value })
                }
            }
            ParameterKind::PhaseOffset => {
                if value.is_finite() {
                    Ok(())
                } else {
                    Err(BackendError::InvalidParameterValue {
                        name: "phase_offset".to_string(),
                        value,
                    })
                }
            }
        }
    }
}

/// A scalar the audio thread reads once per block, either as-is or through an
/// [`EnvelopeGenerator`].
#[derive(Debug)]
pub enum StimulusParameter {
    Raw(Arc<AtomicF32>),
    Smoothed(EnvelopeGenerator),
}

impl StimulusParameter {
    pub fn raw(value: f32) -> Self {
        StimulusParameter::Raw(Arc::new(AtomicF32::new(value)))
    }

    pub fn smoothed(value: f32, rate: f32, sample_rate: f32) -> Result<Self> {
        Ok(StimulusParameter::Smoothed(EnvelopeGenerator::new(
            value,
            rate,
            sample_rate,
        )?))
    }

    pub fn handle(&self) -> Arc<AtomicF32> {
        match self {
            StimulusParameter::Raw(value) => Arc::clone(value),
            StimulusParameter::Smoothed(env) => env.setpoint_handle(),
        }
    }

    /// The requested value, not the transient one being played.
    pub fn setpoint(&self) -> f32 {
        match self {
            StimulusParameter::Raw(value) => value.load(),
            StimulusParameter::Smoothed(env) => env.setpoint(),
        }
    }

    pub fn is_smoothed(&self) -> bool {
        matches!(self, StimulusParameter::Smoothed(_))
    }

    pub fn fill(&mut self, out: &mut [f32]) {
        match self {
            StimulusParameter::Raw(value) => out.fill(value.load()),
            StimulusParameter::Smoothed(env) => env.fill(out),
        }
    }

    /// Drops any transition in progress; used when playback restarts.
    pub fn snap(&mut self) {
        if let StimulusParameter::Smoothed(env) = self {
            env.snap();
        }
    }
}

#[derive(Debug, Clone)]
struct ParameterEntry {
    name: &'static str,
    kind: ParameterKind,
    value: Arc<AtomicF32>,
}

/// The named parameters of one stimulus, shared with the control context.
///
/// Cloning is cheap and every clone writes the same setpoints the audio thread
/// reads, so a set can be handed to the UI before the stimulus moves into the
/// audio callback.
#[derive(Debug, Clone, Default)]
pub struct ParameterSet {
    entries: Vec<ParameterEntry>,
}

impl ParameterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &'static str, kind: ParameterKind, param: &StimulusParameter) {
        self.entries.push(ParameterEntry {
            name,
            kind,
            value: param.handle(),
        });
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.entries.iter().map(|e| e.name).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|e| e.name == name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn kind(&self, name: &str) -> Result<ParameterKind> {
        Ok(self.entry(name)?.kind)
    }

    pub fn get(&self, name: &str) -> Result<f32> {
        Ok(self.entry(name)?.value.load())
    }

    /// Stores a new setpoint. Out-of-range values are rejected and leave the
    /// previous setpoint in place.
    pub fn set(&self, name: &str, value: f32) -> Result<()> {
        let entry = self.entry(name)?;
        entry.kind.validate(value)?;
        entry.value.store(value);
        Ok(())
    }

    /// `(name, setpoint)` pairs in declaration order.
    pub fn values(&self) -> impl Iterator<Item = (&'static str, f32)> + '_ {
        self.entries.iter().map(|e| (e.name, e.value.load()))
    }

    fn entry(&self, name: &str) -> Result<&ParameterEntry> {
        self.entries
            .iter()
            .find(|e| e.name == name)
            .ok_or_else(|| BackendError::UnknownParameter {
                name: name.to_string(),
                available: self.names(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_set() -> (ParameterSet, StimulusParameter, StimulusParameter) {
        let amp = StimulusParameter::smoothed(-50.0, 200.0, 48000.0).unwrap();
        let freq = StimulusParameter::raw(1000.0);
        let mut set = ParameterSet::new();
        set.register("amplitude", ParameterKind::Amplitude(VolumeMode::Decibel), &amp);
        set.register("frequency", ParameterKind::Frequency, &freq);
        (set, amp, freq)
    }

    #[test]
    fn set_reaches_the_backing_parameter() {
        let (set, amp, mut freq) = sample_set();
        set.set("amplitude", -60.0).unwrap();
        set.set("frequency", 440.0).unwrap();
        assert_eq!(amp.setpoint(), -60.0);
        assert_eq!(freq.setpoint(), 440.0);

        let mut block = [0.0; 8];
        freq.fill(&mut block);
        assert!(block.iter().all(|v| *v == 440.0));
    }

    #[test]
    fn clones_share_setpoints() {
        let (set, amp, _freq) = sample_set();
        let ui = set.clone();
        ui.set("amplitude", -42.5).unwrap();
        assert_eq!(set.get("amplitude").unwrap(), -42.5);
        assert_eq!(amp.setpoint(), -42.5);
    }

    #[test]
    fn unknown_names_are_reported_with_alternatives() {
        let (set, _amp, _freq) = sample_set();
        match set.set("A", 1.0) {
            Err(BackendError::UnknownParameter { name, available }) => {
                assert_eq!(name, "A");
                assert_eq!(available, vec!["amplitude", "frequency"]);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(set.get("f").is_err());
    }

    #[test]
    fn out_of_range_values_keep_the_old_setpoint() {
        let (set, _amp, _freq) = sample_set();
        assert!(matches!(
            set.set("amplitude", 3.0),
            Err(BackendError::InvalidAmplitude { .. })
        ));
        assert_eq!(set.get("amplitude").unwrap(), -50.0);
        assert!(matches!(
            set.set("frequency", -1.0),
            Err(BackendError::InvalidFrequency { .. })
        ));
        assert_eq!(set.get("frequency").unwrap(), 1000.0);
    }

    #[test]
    fn linear_amplitude_range() {
        let kind = ParameterKind::Amplitude(VolumeMode::Linear);
        assert!(kind.validate(0.0).is_ok());
        assert!(kind.validate(1.0).is_ok());
        assert!(kind.validate(1.01).is_err());
        assert!(kind.validate(f32::NAN).is_err());
    }

    #[test]
    fn values_follow_declaration_order() {
        let (set, _amp, _freq) = sample_set();
        let values: Vec<_> = set.values().collect();
        assert_eq!(values, vec![("amplitude", -50.0), ("frequency", 1000.0)]);
    }
}

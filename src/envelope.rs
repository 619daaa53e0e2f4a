//! Rate-limited ramp toward a setpoint, used to change amplitude and frequency
//! without audible clicks.
//!
//! The setpoint is shared with the control thread through an [`AtomicF32`], so a
//! slider can move it at any time. Everything else belongs to the audio thread:
//! each [`EnvelopeGenerator::fill`] call loads the setpoint once and ramps from the
//! current interpolation point toward it.

use std::sync::Arc;

use crate::dsp::{linear_ramp, AtomicF32};
use crate::error::{BackendError, Result};

#[derive(Debug)]
pub struct EnvelopeGenerator {
    setpoint: Arc<AtomicF32>,
    /// Interpolation point. Kept in `f64` so slow ramps still advance where the
    /// per-block step is below `f32` resolution.
    current: f64,
    /// Units per second.
    rate: f32,
    sample_rate: f32,
    steady_state: bool,
}

impl EnvelopeGenerator {
    pub fn new(setpoint: f32, rate: f32, sample_rate: f32) -> Result<Self> {
        if !(rate.is_finite() && rate > 0.0) {
            return Err(BackendError::InvalidRate { rate });
        }
        Ok(Self {
            setpoint: Arc::new(AtomicF32::new(setpoint)),
            current: setpoint as f64,
            rate,
            sample_rate,
            steady_state: true,
        })
    }

    /// Shared handle to the setpoint. Writers on other threads store into it;
    /// the next block picks the new value up.
    pub fn setpoint_handle(&self) -> Arc<AtomicF32> {
        Arc::clone(&self.setpoint)
    }

    pub fn setpoint(&self) -> f32 {
        self.setpoint.load()
    }

    pub fn set_setpoint(&self, value: f32) {
        self.setpoint.store(value);
    }

    pub fn current(&self) -> f32 {
        self.current as f32
    }

    pub fn rate(&self) -> f32 {
        self.rate
    }

    pub fn is_steady(&self) -> bool {
        self.steady_state
    }

    /// Jumps straight to the setpoint, dropping any ramp in progress.
    pub fn snap(&mut self) {
        self.current = self.setpoint.load() as f64;
        self.steady_state = true;
    }

    /// Fills `out` with the next `out.len()` values of the envelope.
    pub fn fill(&mut self, out: &mut [f32]) {
        let n = out.len();
        if n == 0 {
            return;
        }

        let setpoint = self.setpoint.load();
        if setpoint as f64 != self.current {
            self.steady_state = false;
        }
        if self.steady_state {
            out.fill(setpoint);
            return;
        }

        let delta = setpoint as f64 - self.current;
        let step = delta.signum() * self.rate as f64 * n as f64 / self.sample_rate as f64;

        if delta.abs() > step.abs() {
            let end = self.current + step;
            linear_ramp(out, self.current, end);
            self.current = end;
            return;
        }

        let samples_until_steady =
            (delta.abs() * self.sample_rate as f64 / self.rate as f64).floor() as usize;
        debug_assert!(
            samples_until_steady <= n,
            "envelope needs {samples_until_steady} samples to settle but the block holds {n}"
        );
        let (ramp, hold) = out.split_at_mut(samples_until_steady.min(n));
        linear_ramp(ramp, self.current, setpoint as f64);
        hold.fill(setpoint);

        self.current = setpoint as f64;
        self.steady_state = true;
    }

    /// Allocating convenience wrapper around [`EnvelopeGenerator::fill`].
    pub fn next(&mut self, n: usize) -> Vec<f32> {
        let mut out = vec![0.0; n];
        self.fill(&mut out);
        out
    }
}

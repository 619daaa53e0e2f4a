use std::f64::consts::TAU;
use std::sync::atomic::{AtomicU32, Ordering};

/// Converts a level in dB (full scale) to a linear gain.
pub fn db_to_gain(db: f32) -> f32 {
    10f32.powf(db / 20.0)
}

/// Wraps a phase in radians into `[0, 2π)`.
pub fn wrap_phase(phase: f64) -> f64 {
    let wrapped = phase.rem_euclid(TAU);
    // rem_euclid can round up to exactly TAU for tiny negative inputs
    if wrapped >= TAU {
        0.0
    } else {
        wrapped
    }
}

/// An `f32` that can be shared between the control and audio threads.
///
/// Stored as raw bits in an [`AtomicU32`], so a load never observes a torn value.
#[derive(Debug, Default)]
pub struct AtomicF32(AtomicU32);

impl AtomicF32 {
    pub fn new(value: f32) -> Self {
        Self(AtomicU32::new(value.to_bits()))
    }

    pub fn load(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Acquire))
    }

    pub fn store(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Release);
    }
}

/// Writes `values.len()` points of a straight line that leaves `start` and lands
/// exactly on `end` at the last point.
pub fn linear_ramp(values: &mut [f32], start: f64, end: f64) {
    let len = values.len();
    if len == 0 {
        return;
    }
    let delta = end - start;
    for (i, v) in values.iter_mut().enumerate() {
        *v = (start + delta * (i + 1) as f64 / len as f64) as f32;
    }
    values[len - 1] = end as f32;
}

//! Next-probe selection for adjustment tests.
//!
//! Probes are drawn at random from a pool of evenly spaced candidates. Values
//! already tested are never offered again; once the pool runs dry it is rebuilt
//! at half the spacing, so coverage of the domain gets finer the longer a test
//! runs.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::{debug, warn};

/// The test parameter a controller searches over. `min` bounds the plotted
/// domain only; candidates always start at one precision step.
#[derive(Debug, Clone, PartialEq)]
pub struct TestControl {
    pub parameter: &'static str,
    pub min: f64,
    pub max: f64,
    pub default: f64,
    pub search_precision: f64,
}

pub struct AdaptiveTestController {
    pool: Vec<f32>,
    precision: f64,
    max: f64,
    min_precision: f64,
    rng: StdRng,
}

impl AdaptiveTestController {
    /// `seed` fixes the probe sequence; `None` seeds from the OS.
    pub fn new(control: &TestControl, min_precision: f64, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            pool: candidates(control.search_precision, control.max),
            precision: control.search_precision,
            max: control.max,
            min_precision,
            rng,
        }
    }

    pub fn precision(&self) -> f64 {
        self.precision
    }

    /// Candidates not yet ruled out by a history, in ascending order.
    pub fn pool(&self) -> &[f32] {
        &self.pool
    }

    /// Picks an untested value. Returns `None` once every candidate at the
    /// finest allowed spacing has been used.
    pub fn next_probe(&mut self, history: &[f32]) -> Option<f32> {
        self.discard_used(history);
        while self.pool.is_empty() {
            let precision = self.precision / 2.0;
            if precision < self.min_precision {
                warn!(
                    "probe pool exhausted at precision {}, floor is {}",
                    self.precision, self.min_precision
                );
                return None;
            }
            self.precision = precision;
            self.pool = candidates(precision, self.max);
            self.discard_used(history);
            debug!(
                "regenerated {} candidates at precision {precision}",
                self.pool.len()
            );
        }
        let probe = self.pool.choose(&mut self.rng).copied();
        if let Some(value) = probe {
            debug!("next probe {value}");
        }
        probe
    }

    fn discard_used(&mut self, history: &[f32]) {
        self.pool.retain(|c| !history.contains(c));
    }
}

/// `precision, 2·precision, ...` strictly below `max`.
fn candidates(precision: f64, max: f64) -> Vec<f32> {
    if precision.is_nan() || precision <= 0.0 {
        return Vec::new();
    }
    (1u64..)
        .map(|k| k as f64 * precision)
        .take_while(|v| *v < max)
        .map(|v| v as f32)
        .collect()
}

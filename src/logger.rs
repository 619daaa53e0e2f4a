use std::collections::HashMap;

use crate::error::{BackendError, Result};
use crate::param::ParameterSet;

/// Per-parameter history of the setpoints seen at each test update.
#[derive(Debug, Clone, Default)]
pub struct ParameterLogger {
    names: Vec<&'static str>,
    series: HashMap<&'static str, Vec<f32>>,
}

impl ParameterLogger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops every series and starts an empty one per name.
    pub fn reset(&mut self, names: &[&'static str]) {
        self.names = names.to_vec();
        self.series = names.iter().map(|n| (*n, Vec::new())).collect();
    }

    /// Appends the current setpoint of every tracked parameter. Nothing is
    /// appended if any of them cannot be read.
    pub fn record(&mut self, parameters: &ParameterSet) -> Result<()> {
        let values = self
            .names
            .iter()
            .map(|name| parameters.get(name))
            .collect::<Result<Vec<f32>>>()?;
        for (name, value) in self.names.iter().zip(values) {
            if let Some(series) = self.series.get_mut(name) {
                series.push(value);
            }
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<&[f32]> {
        self.series
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| BackendError::UnknownParameter {
                name: name.to_string(),
                available: self.names.clone(),
            })
    }

    pub fn names(&self) -> &[&'static str] {
        &self.names
    }

    /// Number of records taken since the last reset.
    pub fn len(&self) -> usize {
        self.names
            .first()
            .and_then(|n| self.series.get(n))
            .map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;

use crate::audio_io::{AudioOutputStream, Playback};
use crate::config::CONFIG;
use crate::error::BackendError;
use crate::models::StimulusSpec;

static ENGINE_STATE: Lazy<Mutex<Option<AudioOutputStream>>> = Lazy::new(|| Mutex::new(None));

fn to_py_err(err: BackendError) -> PyErr {
    match err {
        BackendError::UnsupportedSampleRate { .. }
        | BackendError::InvalidAmplitude { .. }
        | BackendError::InvalidFrequency { .. }
        | BackendError::InvalidParameterValue { .. }
        | BackendError::InvalidRate { .. }
        | BackendError::InvalidDuration { .. }
        | BackendError::UnknownParameter { .. }
        | BackendError::UnknownTest { .. }
        | BackendError::InvalidStimulus(_)
        | BackendError::Json(_) => PyValueError::new_err(err.to_string()),
        _ => PyRuntimeError::new_err(err.to_string()),
    }
}

fn with_stream<T>(f: impl FnOnce(&mut AudioOutputStream) -> crate::Result<T>) -> PyResult<T> {
    let mut state = ENGINE_STATE.lock();
    let stream = state
        .as_mut()
        .ok_or_else(|| PyRuntimeError::new_err("no stimulus has been started"))?;
    f(stream).map_err(to_py_err)
}

/// Builds a stimulus from JSON and opens it on the default device, stopped.
/// Any previous stimulus is closed first.
#[pyfunction]
fn start_stimulus(stimulus_json: &str) -> PyResult<()> {
    let spec = StimulusSpec::from_json(stimulus_json).map_err(to_py_err)?;
    let stimulus = spec.build(&CONFIG).map_err(to_py_err)?;
    let mut state = ENGINE_STATE.lock();
    if let Some(mut previous) = state.take() {
        previous.done().map_err(to_py_err)?;
    }
    *state = Some(AudioOutputStream::open(stimulus, CONFIG.frames_per_buffer).map_err(to_py_err)?);
    Ok(())
}

#[pyfunction]
fn play() -> PyResult<()> {
    with_stream(|s| s.play())
}

#[pyfunction]
fn stop() -> PyResult<()> {
    with_stream(|s| s.stop())
}

#[pyfunction]
fn done() -> PyResult<()> {
    match ENGINE_STATE.lock().take() {
        Some(mut stream) => stream.done().map_err(to_py_err),
        None => Ok(()),
    }
}

#[pyfunction]
fn is_playing() -> PyResult<bool> {
    with_stream(|s| Ok(s.is_playing()))
}

#[pyfunction]
fn set_parameter(name: &str, value: f32) -> PyResult<()> {
    with_stream(|s| s.parameters().set(name, value))
}

#[pyfunction]
fn get_parameter(name: &str) -> PyResult<f32> {
    with_stream(|s| s.parameters().get(name))
}

#[pyfunction]
fn parameters() -> PyResult<Vec<&'static str>> {
    with_stream(|s| Ok(s.parameters().names()))
}

#[pymodule]
fn psychoacoustics_backend(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(start_stimulus, m)?)?;
    m.add_function(wrap_pyfunction!(play, m)?)?;
    m.add_function(wrap_pyfunction!(stop, m)?)?;
    m.add_function(wrap_pyfunction!(done, m)?)?;
    m.add_function(wrap_pyfunction!(is_playing, m)?)?;
    m.add_function(wrap_pyfunction!(set_parameter, m)?)?;
    m.add_function(wrap_pyfunction!(get_parameter, m)?)?;
    m.add_function(wrap_pyfunction!(parameters, m)?)?;
    Ok(())
}

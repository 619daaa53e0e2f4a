//! Error types shared by the stimulus engine, the audio stream and the test layer.

use thiserror::Error;

use crate::stimulus::VolumeMode;

pub type Result<T> = std::result::Result<T, BackendError>;

#[derive(Debug, Error)]
pub enum BackendError {
    /// Only 44.1 kHz and 48 kHz stimuli can be built.
    #[error("sample rate of {rate} Hz is not supported, supported sample rates are 44100 and 48000")]
    UnsupportedSampleRate { rate: u32 },

    #[error("amplitude {value} is out of range for {mode} volume mode")]
    InvalidAmplitude { value: f32, mode: VolumeMode },

    #[error("frequency {value} Hz is invalid")]
    InvalidFrequency { value: f32 },

    #[error("value {value} is invalid for parameter '{name}'")]
    InvalidParameterValue { name: String, value: f32 },

    /// Envelope rates are in units per second and must be positive.
    #[error("envelope rate {rate} must be positive and finite")]
    InvalidRate { rate: f32 },

    #[error("duration {value} s is invalid")]
    InvalidDuration { value: f64 },

    #[error("'{name}' is not a stimulus parameter, available parameters are {available:?}")]
    UnknownParameter {
        name: String,
        available: Vec<&'static str>,
    },

    #[error("'{name}' is not a valid test, valid tests are {valid:?}")]
    UnknownTest {
        name: String,
        valid: Vec<&'static str>,
    },

    #[error("invalid stimulus description: {0}")]
    InvalidStimulus(String),

    #[error("unsupported stream configuration: {0}")]
    UnsupportedStreamConfig(String),

    #[error("audio device error: {0}")]
    Device(String),

    #[error("stream has been closed")]
    StreamClosed,

    #[error("no test has been selected")]
    NoActiveTest,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config parse error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("config write error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),
}

macro_rules! device_error_from {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for BackendError {
                fn from(err: $ty) -> Self {
                    BackendError::Device(err.to_string())
                }
            }
        )*
    };
}

device_error_from!(
    cpal::BuildStreamError,
    cpal::PlayStreamError,
    cpal::PauseStreamError,
    cpal::SupportedStreamConfigsError,
    cpal::DefaultStreamConfigError,
    cpal::DevicesError,
    cpal::DeviceNameError,
);

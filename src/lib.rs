pub mod adaptive;
pub mod audio_io;
pub mod command;
pub mod config;
pub mod dsp;
pub mod envelope;
pub mod error;
pub mod logger;
pub mod methods;
pub mod models;
pub mod param;
pub mod stimulus;
pub mod tone;

#[cfg(feature = "python")]
mod python;

pub use adaptive::{AdaptiveTestController, TestControl};
pub use audio_io::{
    AudioOutputStream, DeviceOpener, OfflineOpener, OfflineStream, Playback, StreamControl,
    StreamEngine, StreamOpener, StreamState,
};
pub use config::{BackendConfig, CONFIG};
pub use envelope::EnvelopeGenerator;
pub use error::{BackendError, Result};
pub use logger::ParameterLogger;
pub use methods::{MethodOfAdjustment, PsychoacousticTest, StimulusControl, TestResults};
pub use models::StimulusSpec;
pub use param::{ParameterKind, ParameterSet, StimulusParameter};
pub use stimulus::{SampleRate, Stimulus, VolumeMode};
pub use tone::{PureToneMono, PureToneStereo, SmoothingRates, ToneConfig, ToneSettings};

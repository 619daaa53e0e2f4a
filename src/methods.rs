//! Method of Adjustment: the listener moves one stimulus parameter until it
//! meets a criterion, the test layer logs the result and picks the next probe.

use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info, warn};

use crate::adaptive::{AdaptiveTestController, TestControl};
use crate::audio_io::{Playback, StreamOpener};
use crate::config::BackendConfig;
use crate::error::{BackendError, Result};
use crate::logger::ParameterLogger;
use crate::param::ParameterSet;
use crate::stimulus::{Stimulus, VolumeMode};
use crate::tone::{PureToneMono, PureToneStereo, ToneConfig, ToneSettings};

/// Ratio between the adjusted and target frequency a match trial starts from.
const MATCH_START_RATIO: f32 = 1.25;
const MATCH_LEVEL_DB: f32 = -30.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PsychoacousticTest {
    HearingThreshold,
    ToneMatch,
    OctaveMatch,
}

impl PsychoacousticTest {
    pub const ALL: [PsychoacousticTest; 3] = [
        PsychoacousticTest::HearingThreshold,
        PsychoacousticTest::ToneMatch,
        PsychoacousticTest::OctaveMatch,
    ];

    pub fn name(self) -> &'static str {
        match self {
            PsychoacousticTest::HearingThreshold => "Hearing Threshold",
            PsychoacousticTest::ToneMatch => "Tone Match",
            PsychoacousticTest::OctaveMatch => "Octave Match",
        }
    }

    /// Octaves between the reference and the frequency the listener aims for.
    fn octaves(self) -> f32 {
        match self {
            PsychoacousticTest::OctaveMatch => 1.0,
            _ => 0.0,
        }
    }
}

impl fmt::Display for PsychoacousticTest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PsychoacousticTest {
    type Err = BackendError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| BackendError::UnknownTest {
                name: s.to_string(),
                valid: Self::ALL.iter().map(|t| t.name()).collect(),
            })
    }
}

/// The slider the listener moves.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StimulusControl {
    pub parameter: &'static str,
    pub label: &'static str,
    pub min: f32,
    pub max: f32,
    pub default: f32,
    pub precision: f32,
    pub page_precision: f32,
    pub value: f32,
}

impl StimulusControl {
    pub fn clamp(&self, value: f32) -> f32 {
        value.clamp(self.min, self.max)
    }
}

/// Axis ranges and labels for plotting [`TestResults`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlotControl {
    pub title: &'static str,
    pub x_range: (f32, f32),
    pub y_range: (f32, f32),
    pub x_label: &'static str,
    pub x_units: &'static str,
    pub y_label: &'static str,
    pub y_units: &'static str,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TestResults {
    pub independent: Vec<f32>,
    pub dependent: Vec<f32>,
}

struct Layout {
    stimulus: Box<dyn Stimulus>,
    stimulus_control: StimulusControl,
    test_control: TestControl,
    plot: PlotControl,
    instructions: &'static str,
}

const THRESHOLD_INSTRUCTIONS: &str = "Start the test, then move the volume slider until the \
tone is just barely perceivable and update the plot. Repeat to capture more points, and stop \
the test when finished.";

const MATCH_INSTRUCTIONS: &str = "Start the test, then move the frequency slider until the \
right tone matches the left one and update the plot. Repeat to capture more points, and stop \
the test when finished.";

const OCTAVE_INSTRUCTIONS: &str = "Start the test, then move the frequency slider until the \
right tone sits one octave above the left one and update the plot. Repeat to capture more \
points, and stop the test when finished.";

fn tone_config(config: &BackendConfig) -> ToneConfig {
    ToneConfig {
        sample_rate: config.sample_rate,
        volume_mode: VolumeMode::Decibel,
        duration: f64::INFINITY,
        smoothing: Some(config.smoothing_rates(VolumeMode::Decibel)),
    }
}

fn hearing_threshold(config: &BackendConfig) -> Result<Layout> {
    let stimulus_control = StimulusControl {
        parameter: "amplitude",
        label: "Volume",
        min: -100.0,
        max: -40.0,
        default: -50.0,
        precision: 0.1,
        page_precision: 1.0,
        value: -50.0,
    };
    let test_control = TestControl {
        parameter: "frequency",
        min: 100.0,
        max: 15000.0,
        default: 1000.0,
        search_precision: 1000.0,
    };
    let tone = ToneSettings::new(stimulus_control.default, test_control.default as f32);
    Ok(Layout {
        stimulus: Box::new(PureToneMono::new(&tone_config(config), tone)?),
        plot: PlotControl {
            title: "Hearing Threshold Vs Frequency",
            x_range: (test_control.min as f32, test_control.max as f32),
            y_range: (stimulus_control.min, stimulus_control.max),
            x_label: "Frequency",
            x_units: "Hz",
            y_label: "Volume",
            y_units: "dB",
        },
        stimulus_control,
        test_control,
        instructions: THRESHOLD_INSTRUCTIONS,
    })
}

fn frequency_match(config: &BackendConfig, test: PsychoacousticTest) -> Result<Layout> {
    let (reference_max, title, instructions) = match test {
        PsychoacousticTest::OctaveMatch => (7500.0, "Octave Match Error", OCTAVE_INSTRUCTIONS),
        _ => (15000.0, "Tone Match Error", MATCH_INSTRUCTIONS),
    };
    let mut stimulus_control = StimulusControl {
        parameter: "frequency_right",
        label: "Frequency",
        min: 100.0,
        max: 15000.0,
        default: 0.0,
        precision: 1.0,
        page_precision: 100.0,
        value: 0.0,
    };
    let test_control = TestControl {
        parameter: "frequency_left",
        min: 100.0,
        max: reference_max,
        default: 1000.0,
        search_precision: 1000.0,
    };
    let reference = test_control.default as f32;
    stimulus_control.default = match_start(&stimulus_control, test, reference);
    stimulus_control.value = stimulus_control.default;

    let left = ToneSettings::new(MATCH_LEVEL_DB, reference);
    let right = ToneSettings::new(MATCH_LEVEL_DB, stimulus_control.default);
    Ok(Layout {
        stimulus: Box::new(PureToneStereo::new(&tone_config(config), left, right)?),
        plot: PlotControl {
            title,
            x_range: (test_control.min as f32, test_control.max as f32),
            y_range: (-1.0, 1.0),
            x_label: "Reference Frequency",
            x_units: "Hz",
            y_label: "Error",
            y_units: "octaves",
        },
        stimulus_control,
        test_control,
        instructions,
    })
}

/// Where the adjusted tone starts for a given reference.
fn match_start(control: &StimulusControl, test: PsychoacousticTest, reference: f32) -> f32 {
    control.clamp(reference * 2f32.powf(test.octaves()) * MATCH_START_RATIO)
}

struct Session<S> {
    test: PsychoacousticTest,
    stream: S,
    parameters: ParameterSet,
    stimulus_control: StimulusControl,
    test_control: TestControl,
    plot: PlotControl,
    instructions: &'static str,
    controller: AdaptiveTestController,
}

/// Runs adjustment tests against streams from `O`.
pub struct MethodOfAdjustment<O: StreamOpener> {
    opener: O,
    config: BackendConfig,
    session: Option<Session<O::Stream>>,
    logger: ParameterLogger,
    results: TestResults,
}

impl<O: StreamOpener> MethodOfAdjustment<O> {
    pub fn new(opener: O, config: BackendConfig) -> Self {
        Self {
            opener,
            config,
            session: None,
            logger: ParameterLogger::new(),
            results: TestResults::default(),
        }
    }

    pub fn tests() -> &'static [PsychoacousticTest] {
        &PsychoacousticTest::ALL
    }

    /// Closes the current stream and sets up `test` with its default stimulus.
    /// The previous test's log and results are cleared even if opening the new
    /// stream fails, which leaves no test selected.
    pub fn select_test(&mut self, test: PsychoacousticTest) -> Result<()> {
        self.logger.reset(&[]);
        self.results = TestResults::default();
        if let Some(mut previous) = self.session.take() {
            previous.stream.done()?;
        }

        let layout = match test {
            PsychoacousticTest::HearingThreshold => hearing_threshold(&self.config)?,
            PsychoacousticTest::ToneMatch | PsychoacousticTest::OctaveMatch => {
                frequency_match(&self.config, test)?
            }
        };
        let stream = self.opener.open(layout.stimulus)?;
        let parameters = stream.parameters();
        parameters.set(
            layout.stimulus_control.parameter,
            layout.stimulus_control.default,
        )?;
        parameters.set(
            layout.test_control.parameter,
            layout.test_control.default as f32,
        )?;

        let controller = AdaptiveTestController::new(
            &layout.test_control,
            self.config.min_search_precision,
            self.config.seed,
        );
        self.logger.reset(&parameters.names());
        self.session = Some(Session {
            test,
            stream,
            parameters,
            stimulus_control: layout.stimulus_control,
            test_control: layout.test_control,
            plot: layout.plot,
            instructions: layout.instructions,
            controller,
        });
        info!("selected test '{test}'");
        Ok(())
    }

    pub fn select_test_by_name(&mut self, name: &str) -> Result<()> {
        self.select_test(name.parse()?)
    }

    pub fn start_test(&mut self) -> Result<()> {
        let session = self.session_mut()?;
        session.stream.play()?;
        info!("started '{}'", session.test);
        Ok(())
    }

    pub fn stop_test(&mut self) -> Result<()> {
        let session = self.session_mut()?;
        session.stream.stop()?;
        info!("stopped '{}'", session.test);
        Ok(())
    }

    /// Releases the output stream. Results stay readable.
    pub fn done(&mut self) -> Result<()> {
        match self.session.as_mut() {
            Some(session) => session.stream.done(),
            None => Ok(()),
        }
    }

    /// Moves the listener-controlled parameter.
    pub fn adjust_stimulus(&mut self, value: f32) -> Result<()> {
        let session = self.session_mut()?;
        session
            .parameters
            .set(session.stimulus_control.parameter, value)?;
        session.stimulus_control.value = value;
        debug!("{} = {value}", session.stimulus_control.parameter);
        Ok(())
    }

    /// Logs the current setpoints, moves to the next probe and returns the
    /// refreshed results.
    pub fn update_data(&mut self) -> Result<&TestResults> {
        let session = self.session.as_mut().ok_or(BackendError::NoActiveTest)?;
        self.logger.record(&session.parameters)?;

        let test_parameter = session.test_control.parameter;
        let control_parameter = session.stimulus_control.parameter;
        let probe = session
            .controller
            .next_probe(self.logger.get(test_parameter)?);

        match session.test {
            PsychoacousticTest::HearingThreshold => {
                self.results = TestResults {
                    independent: self.logger.get(test_parameter)?.to_vec(),
                    dependent: self.logger.get(control_parameter)?.to_vec(),
                };
                if let Some(frequency) = probe {
                    session.parameters.set(test_parameter, frequency)?;
                }
                let level = session.stimulus_control.default;
                session.parameters.set(control_parameter, level)?;
                session.stimulus_control.value = level;
            }
            PsychoacousticTest::ToneMatch | PsychoacousticTest::OctaveMatch => {
                let references = self.logger.get(test_parameter)?;
                let adjusted = self.logger.get(control_parameter)?;
                let octaves = session.test.octaves();
                self.results = TestResults {
                    independent: references.to_vec(),
                    dependent: references
                        .iter()
                        .zip(adjusted)
                        .map(|(r, a)| (a / r).log2() - octaves)
                        .collect(),
                };
                if let Some(reference) = probe {
                    let start = match_start(&session.stimulus_control, session.test, reference);
                    session.parameters.set(test_parameter, reference)?;
                    session.parameters.set(control_parameter, start)?;
                    session.stimulus_control.value = start;
                }
            }
        }

        match probe {
            Some(value) => info!("next {test_parameter} probe: {value}"),
            None => warn!(
                "'{}' has tested every {test_parameter} down to the finest precision",
                session.test
            ),
        }
        Ok(&self.results)
    }

    pub fn active_test(&self) -> Option<PsychoacousticTest> {
        self.session.as_ref().map(|s| s.test)
    }

    pub fn stimulus_control(&self) -> Option<&StimulusControl> {
        self.session.as_ref().map(|s| &s.stimulus_control)
    }

    pub fn test_control(&self) -> Option<&TestControl> {
        self.session.as_ref().map(|s| &s.test_control)
    }

    pub fn plot_control(&self) -> Option<&PlotControl> {
        self.session.as_ref().map(|s| &s.plot)
    }

    pub fn instructions(&self) -> Option<&'static str> {
        self.session.as_ref().map(|s| s.instructions)
    }

    pub fn parameters(&self) -> Option<&ParameterSet> {
        self.session.as_ref().map(|s| &s.parameters)
    }

    pub fn stream(&self) -> Option<&O::Stream> {
        self.session.as_ref().map(|s| &s.stream)
    }

    pub fn stream_mut(&mut self) -> Option<&mut O::Stream> {
        self.session.as_mut().map(|s| &mut s.stream)
    }

    pub fn results(&self) -> &TestResults {
        &self.results
    }

    pub fn logged(&self, parameter: &str) -> Result<&[f32]> {
        self.logger.get(parameter)
    }

    fn session_mut(&mut self) -> Result<&mut Session<O::Stream>> {
        self.session.as_mut().ok_or(BackendError::NoActiveTest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio_io::{OfflineOpener, OfflineStream};
    use float_cmp::approx_eq;

    fn method() -> MethodOfAdjustment<OfflineOpener> {
        let config = BackendConfig {
            seed: Some(11),
            ..BackendConfig::default()
        };
        MethodOfAdjustment::new(OfflineOpener { frames_per_buffer: 512 }, config)
    }

    #[test]
    fn test_names_parse() {
        assert_eq!(
            "Hearing Threshold".parse::<PsychoacousticTest>().unwrap(),
            PsychoacousticTest::HearingThreshold
        );
        assert_eq!(
            "octave match".parse::<PsychoacousticTest>().unwrap(),
            PsychoacousticTest::OctaveMatch
        );
        match "Loudness".parse::<PsychoacousticTest>() {
            Err(BackendError::UnknownTest { name, valid }) => {
                assert_eq!(name, "Loudness");
                assert_eq!(valid.len(), 3);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn nothing_runs_before_a_test_is_selected() {
        let mut m = method();
        assert!(matches!(m.start_test(), Err(BackendError::NoActiveTest)));
        assert!(matches!(m.adjust_stimulus(-60.0), Err(BackendError::NoActiveTest)));
        assert!(matches!(m.update_data(), Err(BackendError::NoActiveTest)));
        assert!(m.done().is_ok());
    }

    #[test]
    fn hearing_threshold_defaults() {
        let mut m = method();
        m.select_test(PsychoacousticTest::HearingThreshold).unwrap();
        let params = m.parameters().unwrap();
        assert_eq!(params.get("amplitude").unwrap(), -50.0);
        assert_eq!(params.get("frequency").unwrap(), 1000.0);
        let control = m.stimulus_control().unwrap();
        assert_eq!(control.parameter, "amplitude");
        assert_eq!((control.min, control.max), (-100.0, -40.0));
        assert_eq!(m.plot_control().unwrap().y_units, "dB");
        assert!(m.results().independent.is_empty());
    }

    #[test]
    fn hearing_threshold_update_logs_and_resets_volume() {
        let mut m = method();
        m.select_test(PsychoacousticTest::HearingThreshold).unwrap();
        m.start_test().unwrap();
        m.adjust_stimulus(-72.5).unwrap();

        let results = m.update_data().unwrap().clone();
        assert_eq!(results.independent, vec![1000.0]);
        assert_eq!(results.dependent, vec![-72.5]);

        let params = m.parameters().unwrap();
        assert_eq!(params.get("amplitude").unwrap(), -50.0);
        assert_eq!(m.stimulus_control().unwrap().value, -50.0);
        let next = params.get("frequency").unwrap();
        assert_ne!(next, 1000.0);
        assert_eq!(next % 1000.0, 0.0);
    }

    #[test]
    fn adjusting_out_of_range_is_rejected() {
        let mut m = method();
        m.select_test(PsychoacousticTest::HearingThreshold).unwrap();
        assert!(matches!(
            m.adjust_stimulus(6.0),
            Err(BackendError::InvalidAmplitude { .. })
        ));
        assert_eq!(m.stimulus_control().unwrap().value, -50.0);
    }

    #[test]
    fn tone_match_error_is_in_octaves() {
        let mut m = method();
        m.select_test(PsychoacousticTest::ToneMatch).unwrap();
        assert_eq!(m.parameters().unwrap().get("frequency_right").unwrap(), 1250.0);
        m.adjust_stimulus(2000.0).unwrap();
        let results = m.update_data().unwrap();
        assert_eq!(results.independent, vec![1000.0]);
        assert!(approx_eq!(f32, results.dependent[0], 1.0, ulps = 4));

        let params = m.parameters().unwrap();
        let reference = params.get("frequency_left").unwrap();
        assert_eq!(
            params.get("frequency_right").unwrap(),
            (reference * 1.25).min(15000.0)
        );
    }

    #[test]
    fn octave_match_error_is_relative_to_the_octave() {
        let mut m = method();
        m.select_test_by_name("Octave Match").unwrap();
        assert_eq!(m.test_control().unwrap().max, 7500.0);
        assert_eq!(m.parameters().unwrap().get("frequency_right").unwrap(), 2500.0);
        m.adjust_stimulus(2000.0).unwrap();
        let results = m.update_data().unwrap();
        assert!(approx_eq!(f32, results.dependent[0], 0.0, epsilon = 1e-6));
        let reference = m.parameters().unwrap().get("frequency_left").unwrap();
        assert!(reference < 7500.0);
    }

    #[test]
    fn selecting_a_new_test_closes_the_old_stream() {
        let mut m = method();
        m.select_test(PsychoacousticTest::HearingThreshold).unwrap();
        let old = m.stream().unwrap().control().clone();
        m.start_test().unwrap();
        m.update_data().unwrap();
        m.select_test(PsychoacousticTest::ToneMatch).unwrap();
        assert!(old.is_closed());
        assert!(m.results().independent.is_empty());
        assert!(m.logged("frequency_left").unwrap().is_empty());
        assert!(m.logged("frequency").is_err());
    }

    /// Opens `remaining` streams, then reports a device failure.
    struct LimitedOpener {
        remaining: usize,
    }

    impl StreamOpener for LimitedOpener {
        type Stream = OfflineStream;

        fn open(&mut self, stimulus: Box<dyn Stimulus>) -> Result<OfflineStream> {
            if self.remaining == 0 {
                return Err(BackendError::Device("no output device available".to_string()));
            }
            self.remaining -= 1;
            Ok(OfflineStream::new(stimulus, 256))
        }
    }

    #[test]
    fn failed_open_clears_the_previous_test() {
        let mut m =
            MethodOfAdjustment::new(LimitedOpener { remaining: 1 }, BackendConfig::default());
        m.select_test(PsychoacousticTest::HearingThreshold).unwrap();
        m.update_data().unwrap();
        assert_eq!(m.results().independent.len(), 1);

        assert!(matches!(
            m.select_test(PsychoacousticTest::ToneMatch),
            Err(BackendError::Device(_))
        ));
        assert_eq!(m.active_test(), None);
        assert!(m.results().independent.is_empty());
        assert!(m.logged("frequency").is_err());
        assert!(matches!(m.update_data(), Err(BackendError::NoActiveTest)));
    }

    #[test]
    fn done_closes_the_stream() {
        let mut m = method();
        m.select_test(PsychoacousticTest::HearingThreshold).unwrap();
        m.start_test().unwrap();
        m.done().unwrap();
        assert!(m.stream().unwrap().control().is_closed());
        assert!(matches!(m.start_test(), Err(BackendError::StreamClosed)));
    }
}

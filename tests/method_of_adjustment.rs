use float_cmp::approx_eq;
use more_asserts::assert_gt;
use psychoacoustics_backend::audio_io::{OfflineOpener, Playback};
use psychoacoustics_backend::config::BackendConfig;
use psychoacoustics_backend::methods::{MethodOfAdjustment, PsychoacousticTest};
use psychoacoustics_backend::BackendError;

const FRAMES: usize = 1024;

fn session(seed: u64) -> MethodOfAdjustment<OfflineOpener> {
    let config = BackendConfig {
        seed: Some(seed),
        ..BackendConfig::default()
    };
    MethodOfAdjustment::new(OfflineOpener { frames_per_buffer: FRAMES }, config)
}

fn peak(samples: &[f32]) -> f32 {
    samples.iter().fold(0.0, |m, s| m.max(s.abs()))
}

#[test]
fn hearing_threshold_session_covers_every_frequency_once() {
    let mut method = session(5);
    method.select_test(PsychoacousticTest::HearingThreshold).unwrap();
    method.start_test().unwrap();

    for trial in 0..20 {
        let level = -60.0 - trial as f32;
        method.adjust_stimulus(level).unwrap();
        let stream = method.stream_mut().unwrap();
        let (samples, complete) = stream.pull(FRAMES);
        assert!(!complete);
        assert_gt!(peak(samples), 0.0);
        method.update_data().unwrap();
    }

    let results = method.results();
    assert_eq!(results.independent.len(), 20);
    assert_eq!(results.dependent.len(), 20);
    assert_eq!(results.dependent[3], -63.0);
    assert_eq!(results.independent[0], 1000.0);

    // 1000 Hz default, the 13 other multiples of 1000, then the 500 Hz grid
    let mut tested = results.independent.clone();
    tested.sort_by(f32::total_cmp);
    tested.dedup();
    assert_eq!(tested.len(), 20);
    for f in &results.independent[..14] {
        assert_eq!(f % 1000.0, 0.0);
    }
    for f in &results.independent[14..] {
        assert_eq!(f % 1000.0, 500.0);
    }
}

#[test]
fn volume_changes_reach_the_audio() {
    let mut method = session(1);
    method.select_test(PsychoacousticTest::HearingThreshold).unwrap();
    method.start_test().unwrap();
    // let the -50 dB default settle
    let stream = method.stream_mut().unwrap();
    let before = peak(stream.pull(4800).0);
    assert!(approx_eq!(f32, before, 10f32.powf(-2.5), epsilon = 1e-4));

    method.adjust_stimulus(-40.0).unwrap();
    let stream = method.stream_mut().unwrap();
    // 10 dB at 200 dB/s takes 2400 frames
    stream.pull(2400);
    let after = peak(stream.pull(4800).0);
    assert!(approx_eq!(f32, after, 10f32.powf(-2.0), epsilon = 1e-4));
}

#[test]
fn tone_match_session_reports_octave_errors() {
    let mut method = session(9);
    method.select_test_by_name("Tone Match").unwrap();
    method.start_test().unwrap();

    for _ in 0..5 {
        let reference = method.parameters().unwrap().get("frequency_left").unwrap();
        // listener lands a semitone sharp
        method.adjust_stimulus(reference * 2f32.powf(1.0 / 12.0)).unwrap();
        method.stream_mut().unwrap().pull(FRAMES);
        method.update_data().unwrap();
    }

    let results = method.results();
    assert_eq!(results.independent.len(), 5);
    for error in &results.dependent {
        assert!(approx_eq!(f32, *error, 1.0 / 12.0, epsilon = 1e-4));
    }
}

#[test]
fn stop_and_restart_then_close() {
    let mut method = session(2);
    method.select_test(PsychoacousticTest::OctaveMatch).unwrap();
    method.start_test().unwrap();
    method.stream_mut().unwrap().pull(FRAMES);
    method.stop_test().unwrap();
    assert!(!method.stream().unwrap().is_playing());
    let (silence, _) = method.stream_mut().unwrap().pull(FRAMES);
    assert_eq!(peak(silence), 0.0);

    method.start_test().unwrap();
    assert_eq!(method.stream().unwrap().control().elapsed_frames(), 0);
    method.done().unwrap();
    assert!(matches!(method.start_test(), Err(BackendError::StreamClosed)));
}

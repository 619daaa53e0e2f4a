//! Buffered playback of a [`Stimulus`].
//!
//! [`StreamEngine`] is what runs inside the audio callback: it owns the stimulus
//! and never blocks. Lifecycle requests from the control context go through
//! [`StreamControl`], which only flips atomics. [`AudioOutputStream`] wires the
//! engine to a cpal device on a dedicated thread; [`OfflineStream`] drives the
//! same engine without a device.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, SampleFormat, StreamConfig, SupportedBufferSize};
use crossbeam::channel::{self, RecvTimeoutError, Receiver, Sender};
use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::command::{DeviceCommand, StreamEvent};
use crate::error::{BackendError, Result};
use crate::param::ParameterSet;
use crate::stimulus::{SampleRate, Stimulus};

const EVENT_CAPACITY: usize = 16;
const COMMAND_POLL: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StreamState {
    Stopped = 0,
    Playing = 1,
    Closed = 2,
}

impl StreamState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => StreamState::Playing,
            2 => StreamState::Closed,
            _ => StreamState::Stopped,
        }
    }
}

#[derive(Debug, Default)]
struct StreamShared {
    state: AtomicU8,
    reset_pending: AtomicBool,
    elapsed_frames: AtomicU64,
}

impl StreamShared {
    fn state(&self) -> StreamState {
        StreamState::from_u8(self.state.load(Ordering::Acquire))
    }
}

/// Control-side view of a stream's lifecycle. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct StreamControl {
    shared: Arc<StreamShared>,
}

impl StreamControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves a stopped stream to playing from frame zero. Returns `Ok(false)`
    /// when it was already playing.
    pub fn play(&self) -> Result<bool> {
        match self.shared.state() {
            StreamState::Closed => Err(BackendError::StreamClosed),
            StreamState::Playing => Ok(false),
            StreamState::Stopped => {
                self.shared.reset_pending.store(true, Ordering::Release);
                self.shared.elapsed_frames.store(0, Ordering::Release);
                // a concurrent close wins
                Ok(self
                    .shared
                    .state
                    .compare_exchange(
                        StreamState::Stopped as u8,
                        StreamState::Playing as u8,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok())
            }
        }
    }

    /// Returns `true` if the stream was playing.
    pub fn stop(&self) -> bool {
        self.shared
            .state
            .compare_exchange(
                StreamState::Playing as u8,
                StreamState::Stopped as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Returns `true` the first time only.
    pub fn close(&self) -> bool {
        self.shared
            .state
            .swap(StreamState::Closed as u8, Ordering::AcqRel)
            != StreamState::Closed as u8
    }

    pub fn state(&self) -> StreamState {
        self.shared.state()
    }

    pub fn is_playing(&self) -> bool {
        self.state() == StreamState::Playing
    }

    pub fn is_stopped(&self) -> bool {
        self.state() == StreamState::Stopped
    }

    pub fn is_closed(&self) -> bool {
        self.state() == StreamState::Closed
    }

    pub fn elapsed_frames(&self) -> u64 {
        self.shared.elapsed_frames.load(Ordering::Acquire)
    }
}

/// The audio-thread half of a stream.
pub struct StreamEngine {
    stimulus: Box<dyn Stimulus>,
    shared: Arc<StreamShared>,
    events: Option<HeapProd<StreamEvent>>,
}

impl StreamEngine {
    pub fn new(stimulus: Box<dyn Stimulus>, control: &StreamControl) -> Self {
        Self {
            stimulus,
            shared: Arc::clone(&control.shared),
            events: None,
        }
    }

    fn with_events(mut self, events: HeapProd<StreamEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn channel_count(&self) -> usize {
        self.stimulus.channel_count()
    }

    pub fn sample_rate(&self) -> SampleRate {
        self.stimulus.sample_rate()
    }

    /// Fills one device buffer. Silence unless playing; on completion the
    /// buffer is still delivered and the stream drops to stopped.
    pub fn process(&mut self, output: &mut [f32]) -> bool {
        if self.shared.state() != StreamState::Playing {
            output.fill(0.0);
            return false;
        }
        if self.shared.reset_pending.swap(false, Ordering::AcqRel) {
            self.stimulus.reset();
        }

        let complete = self.stimulus.fill_buffer(output);
        let frames = self.stimulus.elapsed_frames();
        self.shared.elapsed_frames.store(frames, Ordering::Release);

        if complete {
            let _ = self.shared.state.compare_exchange(
                StreamState::Playing as u8,
                StreamState::Stopped as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            );
            if let Some(events) = &mut self.events {
                let _ = events.try_push(StreamEvent::Completed { frames });
            }
        }
        complete
    }
}

/// Lifecycle the test layer drives, independent of where the samples go.
pub trait Playback {
    fn play(&mut self) -> Result<()>;
    fn stop(&mut self) -> Result<()>;
    /// Releases the output; irreversible.
    fn done(&mut self) -> Result<()>;
    fn parameters(&self) -> ParameterSet;
    fn is_playing(&self) -> bool;
}

/// Opens a [`Playback`] for a freshly built stimulus.
pub trait StreamOpener {
    type Stream: Playback;

    fn open(&mut self, stimulus: Box<dyn Stimulus>) -> Result<Self::Stream>;
}

/// Plays a stimulus on the default output device.
pub struct AudioOutputStream {
    control: StreamControl,
    commands: Sender<DeviceCommand>,
    thread: Option<JoinHandle<()>>,
    parameters: ParameterSet,
    sample_rate: SampleRate,
    channels: usize,
}

impl AudioOutputStream {
    /// Opens the device in the stopped state. Fails if the device cannot play
    /// the stimulus's channel count and sample rate as 32-bit float.
    pub fn open(mut stimulus: Box<dyn Stimulus>, frames_per_buffer: usize) -> Result<Self> {
        stimulus.reserve(frames_per_buffer);
        let parameters = stimulus.parameters();
        let sample_rate = stimulus.sample_rate();
        let channels = stimulus.channel_count();

        let control = StreamControl::new();
        let (events_tx, events_rx) = HeapRb::<StreamEvent>::new(EVENT_CAPACITY).split();
        let engine = StreamEngine::new(stimulus, &control).with_events(events_tx);

        let (commands, command_rx) = channel::unbounded();
        let (ready_tx, ready_rx) = channel::bounded::<Result<()>>(1);
        let thread_control = control.clone();
        let thread = std::thread::Builder::new()
            .name("audio-output".to_string())
            .spawn(move || {
                run_device_thread(
                    engine,
                    frames_per_buffer,
                    thread_control,
                    command_rx,
                    events_rx,
                    ready_tx,
                )
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                info!(
                    "opened {channels}-channel output at {} Hz, {frames_per_buffer} frames per buffer",
                    sample_rate.hz()
                );
                Ok(Self {
                    control,
                    commands,
                    thread: Some(thread),
                    parameters,
                    sample_rate,
                    channels,
                })
            }
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(BackendError::Device(
                    "audio thread exited during setup".to_string(),
                ))
            }
        }
    }

    pub fn control(&self) -> &StreamControl {
        &self.control
    }

    pub fn sample_rate(&self) -> SampleRate {
        self.sample_rate
    }

    pub fn channel_count(&self) -> usize {
        self.channels
    }

    pub fn is_stopped(&self) -> bool {
        self.control.is_stopped()
    }

    pub fn is_closed(&self) -> bool {
        self.control.is_closed()
    }

    pub fn elapsed_frames(&self) -> u64 {
        self.control.elapsed_frames()
    }

    fn send(&self, command: DeviceCommand) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| BackendError::Device("audio thread is not running".to_string()))
    }
}

impl Playback for AudioOutputStream {
    fn play(&mut self) -> Result<()> {
        if self.control.play()? {
            debug!("stream playing");
            self.send(DeviceCommand::Play)?;
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if self.control.stop() {
            debug!("stream stopped");
            self.send(DeviceCommand::Stop)?;
        }
        Ok(())
    }

    fn done(&mut self) -> Result<()> {
        if self.control.close() {
            let _ = self.commands.send(DeviceCommand::Close);
        }
        if let Some(thread) = self.thread.take() {
            thread
                .join()
                .map_err(|_| BackendError::Device("audio thread panicked".to_string()))?;
            info!("output stream closed");
        }
        Ok(())
    }

    fn parameters(&self) -> ParameterSet {
        self.parameters.clone()
    }

    fn is_playing(&self) -> bool {
        self.control.is_playing()
    }
}

impl Drop for AudioOutputStream {
    fn drop(&mut self) {
        if let Err(e) = self.done() {
            error!("closing output stream: {e}");
        }
    }
}

fn run_device_thread(
    engine: StreamEngine,
    frames_per_buffer: usize,
    control: StreamControl,
    commands: Receiver<DeviceCommand>,
    mut events: HeapCons<StreamEvent>,
    ready: Sender<Result<()>>,
) {
    let stream = match build_stream(engine, frames_per_buffer) {
        Ok(stream) => {
            let _ = ready.send(Ok(()));
            stream
        }
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    loop {
        match commands.recv_timeout(COMMAND_POLL) {
            Ok(DeviceCommand::Play) => {
                if let Err(e) = stream.play() {
                    error!("failed to start output stream: {e}");
                }
            }
            Ok(DeviceCommand::Stop) => pause(&stream),
            Ok(DeviceCommand::Close) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }

        while let Some(event) = events.try_pop() {
            match event {
                StreamEvent::Completed { frames } => {
                    info!("stimulus completed after {frames} frames");
                    // play() may already have restarted it
                    if !control.is_playing() {
                        pause(&stream);
                    }
                }
            }
        }
    }
    drop(stream);
}

fn pause(stream: &cpal::Stream) {
    if let Err(e) = stream.pause() {
        warn!("device cannot pause, output stays silent instead: {e}");
    }
}

fn build_stream(mut engine: StreamEngine, frames_per_buffer: usize) -> Result<cpal::Stream> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| BackendError::Device("no output device available".to_string()))?;
    debug!("output device: {}", device.name()?);

    let channels = engine.channel_count() as u16;
    let rate = cpal::SampleRate(engine.sample_rate().hz());
    let matching: Vec<_> = device
        .supported_output_configs()?
        .filter(|c| {
            c.channels() == channels
                && c.sample_format() == SampleFormat::F32
                && c.min_sample_rate() <= rate
                && rate <= c.max_sample_rate()
        })
        .collect();
    let frames = frames_per_buffer as u32;
    let chosen = matching
        .iter()
        .find(|c| buffer_size_for(c.buffer_size(), frames) != BufferSize::Default)
        .or_else(|| matching.first())
        .ok_or_else(|| {
            BackendError::UnsupportedStreamConfig(format!(
                "device has no f32 output with {channels} channels at {} Hz",
                rate.0
            ))
        })?;

    let buffer_size = buffer_size_for(chosen.buffer_size(), frames);
    if buffer_size == BufferSize::Default {
        warn!("device does not accept {frames} frames per buffer, using its default size");
    }
    let config = StreamConfig {
        channels,
        sample_rate: rate,
        buffer_size,
    };
    let err_fn = |err| error!("stream error: {err}");
    let stream = device.build_output_stream(
        &config,
        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
            engine.process(data);
        },
        err_fn,
        None,
    )?;
    Ok(stream)
}

/// A fixed buffer of `frames` when the device range allows it, else the
/// device default.
fn buffer_size_for(supported: &SupportedBufferSize, frames: u32) -> BufferSize {
    match supported {
        SupportedBufferSize::Range { min, max } if (*min..=*max).contains(&frames) => {
            BufferSize::Fixed(frames)
        }
        _ => BufferSize::Default,
    }
}

/// Opens streams on the default output device.
#[derive(Debug, Clone, Copy)]
pub struct DeviceOpener {
    pub frames_per_buffer: usize,
}

impl StreamOpener for DeviceOpener {
    type Stream = AudioOutputStream;

    fn open(&mut self, stimulus: Box<dyn Stimulus>) -> Result<AudioOutputStream> {
        AudioOutputStream::open(stimulus, self.frames_per_buffer)
    }
}

/// A stream without a device: buffers are pulled by the caller.
pub struct OfflineStream {
    engine: StreamEngine,
    control: StreamControl,
    parameters: ParameterSet,
    buffer: Vec<f32>,
}

impl OfflineStream {
    pub fn new(mut stimulus: Box<dyn Stimulus>, frames_per_buffer: usize) -> Self {
        stimulus.reserve(frames_per_buffer);
        let parameters = stimulus.parameters();
        let channels = stimulus.channel_count();
        let control = StreamControl::new();
        Self {
            engine: StreamEngine::new(stimulus, &control),
            control,
            parameters,
            buffer: vec![0.0; frames_per_buffer * channels],
        }
    }

    pub fn control(&self) -> &StreamControl {
        &self.control
    }

    pub fn channel_count(&self) -> usize {
        self.engine.channel_count()
    }

    pub fn sample_rate(&self) -> SampleRate {
        self.engine.sample_rate()
    }

    /// Pulls one buffer of `frames` frames, as a device callback would.
    pub fn pull(&mut self, frames: usize) -> (&[f32], bool) {
        let len = frames * self.engine.channel_count();
        if self.buffer.len() < len {
            self.buffer.resize(len, 0.0);
        }
        let complete = self.engine.process(&mut self.buffer[..len]);
        (&self.buffer[..len], complete)
    }

    /// Plays from the start and writes `total_frames` frames to a 32-bit float WAV.
    pub fn render_to_wav<P: AsRef<Path>>(
        &mut self,
        path: P,
        total_frames: usize,
        frames_per_buffer: usize,
    ) -> Result<()> {
        let spec = hound::WavSpec {
            channels: self.channel_count() as u16,
            sample_rate: self.sample_rate().hz(),
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::create(path, spec)?;

        self.play()?;
        let mut remaining = total_frames;
        while remaining > 0 {
            let frames = frames_per_buffer.min(remaining);
            let (samples, complete) = self.pull(frames);
            for sample in samples {
                writer.write_sample(*sample)?;
            }
            remaining -= frames;
            if complete {
                break;
            }
        }
        writer.finalize()?;
        Ok(())
    }
}

impl Playback for OfflineStream {
    fn play(&mut self) -> Result<()> {
        self.control.play().map(|_| ())
    }

    fn stop(&mut self) -> Result<()> {
        self.control.stop();
        Ok(())
    }

    fn done(&mut self) -> Result<()> {
        self.control.close();
        Ok(())
    }

    fn parameters(&self) -> ParameterSet {
        self.parameters.clone()
    }

    fn is_playing(&self) -> bool {
        self.control.is_playing()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct OfflineOpener {
    pub frames_per_buffer: usize,
}

impl StreamOpener for OfflineOpener {
    type Stream = OfflineStream;

    fn open(&mut self, stimulus: Box<dyn Stimulus>) -> Result<OfflineStream> {
        Ok(OfflineStream::new(stimulus, self.frames_per_buffer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tone::{PureToneMono, PureToneStereo, ToneConfig, ToneSettings};

    fn one_second_tone() -> Box<dyn Stimulus> {
        let config = ToneConfig {
            duration: 1.0,
            ..ToneConfig::default()
        };
        Box::new(PureToneMono::new(&config, ToneSettings::new(-50.0, 1000.0)).unwrap())
    }

    #[test]
    fn stopped_stream_outputs_silence() {
        let mut stream = OfflineStream::new(one_second_tone(), 1024);
        let (samples, complete) = stream.pull(1024);
        assert!(!complete);
        assert!(samples.iter().all(|s| *s == 0.0));
        assert_eq!(stream.control().elapsed_frames(), 0);
    }

    #[test]
    fn lifecycle_transitions() {
        let mut stream = OfflineStream::new(one_second_tone(), 1024);
        assert!(stream.control().is_stopped());
        stream.play().unwrap();
        assert!(stream.is_playing());
        // already playing: no reset
        stream.pull(1024);
        stream.play().unwrap();
        stream.pull(1024);
        assert_eq!(stream.control().elapsed_frames(), 2048);

        stream.stop().unwrap();
        assert!(stream.control().is_stopped());
        let (samples, _) = stream.pull(64);
        assert!(samples.iter().all(|s| *s == 0.0));

        stream.play().unwrap();
        stream.pull(100);
        assert_eq!(stream.control().elapsed_frames(), 100);

        stream.done().unwrap();
        assert!(stream.control().is_closed());
        assert!(matches!(stream.play(), Err(BackendError::StreamClosed)));
        assert!(!stream.control().stop());
    }

    #[test]
    fn completion_stops_the_stream_after_the_last_buffer() {
        let mut stream = OfflineStream::new(one_second_tone(), 48000);
        stream.play().unwrap();
        assert!(!stream.pull(48000).1);
        assert!(!stream.pull(48000).1);
        let (samples, complete) = stream.pull(48000);
        assert!(complete);
        assert!(samples.iter().any(|s| *s != 0.0));
        assert!(stream.control().is_stopped());

        let (samples, complete) = stream.pull(48000);
        assert!(!complete);
        assert!(samples.iter().all(|s| *s == 0.0));

        // play() clears completion and restarts from zero
        stream.play().unwrap();
        assert!(!stream.pull(48000).1);
        assert_eq!(stream.control().elapsed_frames(), 48000);
    }

    #[test]
    fn replay_restarts_phase_from_zero() {
        let config = ToneConfig::default();
        let tone = PureToneMono::new(&config, ToneSettings::new(0.0, 440.0)).unwrap();
        let mut stream = OfflineStream::new(Box::new(tone), 256);
        stream.play().unwrap();
        let first = stream.pull(256).0.to_vec();
        stream.pull(333);
        stream.stop().unwrap();
        stream.play().unwrap();
        let again = stream.pull(256).0.to_vec();
        assert_eq!(first, again);
    }

    #[test]
    fn completion_event_is_published() {
        let control = StreamControl::new();
        let (tx, mut rx) = HeapRb::<StreamEvent>::new(EVENT_CAPACITY).split();
        let mut engine = StreamEngine::new(one_second_tone(), &control).with_events(tx);
        control.play().unwrap();
        let mut buf = vec![0.0; 48000];
        engine.process(&mut buf);
        assert!(rx.try_pop().is_none());
        engine.process(&mut buf);
        engine.process(&mut buf);
        assert_eq!(
            rx.try_pop(),
            Some(StreamEvent::Completed { frames: 144000 })
        );
    }

    #[test]
    fn parameters_reach_the_engine_through_the_stream() {
        let config = ToneConfig {
            smoothing: None,
            ..ToneConfig::default()
        };
        let tone = PureToneStereo::new(
            &config,
            ToneSettings::new(0.0, 0.0),
            ToneSettings::new(0.0, 0.0),
        )
        .unwrap();
        let mut stream = OfflineStream::new(Box::new(tone), 64);
        stream
            .parameters()
            .set("phase_offset_right", std::f32::consts::FRAC_PI_2)
            .unwrap();
        stream.play().unwrap();
        let (samples, _) = stream.pull(4);
        assert_eq!(samples.len(), 8);
        for frame in samples.chunks(2) {
            assert!(frame[0].abs() < 1e-6);
            assert!((frame[1] - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn buffer_size_falls_back_to_device_default() {
        let range = SupportedBufferSize::Range { min: 64, max: 4096 };
        assert_eq!(buffer_size_for(&range, 1024), BufferSize::Fixed(1024));
        assert_eq!(buffer_size_for(&range, 64), BufferSize::Fixed(64));
        assert_eq!(buffer_size_for(&range, 8192), BufferSize::Default);
        assert_eq!(
            buffer_size_for(&SupportedBufferSize::Unknown, 1024),
            BufferSize::Default
        );
    }

    #[test]
    fn render_to_wav_writes_expected_frames() {
        let path = std::env::temp_dir().join(format!(
            "psychoacoustics-render-{}.wav",
            std::process::id()
        ));
        let mut stream = OfflineStream::new(one_second_tone(), 1024);
        stream.render_to_wav(&path, 4800, 1024).unwrap();
        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().sample_rate, 48000);
        assert_eq!(reader.spec().channels, 1);
        assert_eq!(reader.len(), 4800);
        std::fs::remove_file(&path).unwrap();
    }
}

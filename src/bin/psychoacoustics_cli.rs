use clap::{Args as ClapArgs, Parser, Subcommand};
use psychoacoustics_backend::audio_io::{AudioOutputStream, OfflineOpener, OfflineStream, Playback};
use psychoacoustics_backend::config::{BackendConfig, CONFIG};
use psychoacoustics_backend::methods::{MethodOfAdjustment, PsychoacousticTest};
use psychoacoustics_backend::models::StimulusSpec;
use psychoacoustics_backend::stimulus::Stimulus;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Play, render or script psychoacoustic stimuli
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream a stimulus JSON file to the default output device
    Play(PlayArgs),
    /// Render a stimulus JSON file to a WAV file
    Render(RenderArgs),
    /// Run a scripted hearing-threshold session without an audio device
    Threshold(ThresholdArgs),
    /// Generate a default config file and exit
    GenerateConfig(ConfigArgs),
}

#[derive(ClapArgs)]
struct PlayArgs {
    /// Path to the stimulus JSON file
    #[arg(long)]
    path: String,
}

#[derive(ClapArgs)]
struct RenderArgs {
    /// Path to the stimulus JSON file
    #[arg(long)]
    path: String,
    /// Output WAV file, relative paths land in the configured output directory
    #[arg(long, default_value = "stimulus.wav")]
    out: String,
    /// Seconds to render, required when the stimulus has no duration
    #[arg(long)]
    seconds: Option<f64>,
}

#[derive(ClapArgs)]
struct ThresholdArgs {
    /// Number of trials to run
    #[arg(long, default_value_t = 10)]
    trials: usize,
    /// Level in dB the scripted listener settles on each trial
    #[arg(long, default_value_t = -70.0, allow_hyphen_values = true)]
    level: f32,
    /// RNG seed for the probe sequence
    #[arg(long)]
    seed: Option<u64>,
}

#[derive(ClapArgs)]
struct ConfigArgs {
    /// Output path for the generated configuration
    #[arg(long, default_value = "config.toml")]
    out: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(CONFIG.log_filter.as_str()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Play(args) => play_command(args)?,
        Commands::Render(args) => render_command(args)?,
        Commands::Threshold(args) => threshold_command(args)?,
        Commands::GenerateConfig(cfg) => {
            BackendConfig::generate_default(&cfg.out)?;
            println!("Generated default config at {}", cfg.out);
        }
    }
    Ok(())
}

fn play_command(args: PlayArgs) -> Result<(), Box<dyn std::error::Error>> {
    let spec = StimulusSpec::from_file(&args.path)?;
    let stimulus = spec.build(&CONFIG)?;
    let mut stream = AudioOutputStream::open(stimulus, CONFIG.frames_per_buffer)?;

    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&interrupted);
    ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst))?;

    stream.play()?;
    println!("Streaming {}... press Ctrl+C to stop", args.path);
    while stream.is_playing() && !interrupted.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(50));
    }
    stream.stop()?;
    info!("played {} frames", stream.elapsed_frames());
    stream.done()?;
    Ok(())
}

fn render_command(args: RenderArgs) -> Result<(), Box<dyn std::error::Error>> {
    let spec = StimulusSpec::from_file(&args.path)?;
    let stimulus = spec.build(&CONFIG)?;
    let seconds = match args.seconds {
        Some(s) => s,
        None if stimulus.duration_seconds().is_finite() => stimulus.duration_seconds(),
        None => return Err("stimulus plays until stopped, pass --seconds".into()),
    };
    let total_frames = (seconds * stimulus.sample_rate().as_f64()).round() as usize;

    let out_path = if Path::new(&args.out).is_absolute() {
        PathBuf::from(&args.out)
    } else {
        std::fs::create_dir_all(&CONFIG.output_dir)?;
        CONFIG.output_dir.join(&args.out)
    };
    let mut stream = OfflineStream::new(stimulus, CONFIG.frames_per_buffer);
    stream.render_to_wav(&out_path, total_frames, CONFIG.frames_per_buffer)?;
    println!("Rendered {total_frames} frames to {}", out_path.display());
    Ok(())
}

fn threshold_command(args: ThresholdArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = BackendConfig {
        seed: args.seed.or(CONFIG.seed),
        ..CONFIG.clone()
    };
    let frames = config.frames_per_buffer;
    let mut method = MethodOfAdjustment::new(OfflineOpener { frames_per_buffer: frames }, config);
    method.select_test(PsychoacousticTest::HearingThreshold)?;
    method.start_test()?;

    for _ in 0..args.trials {
        if let Some(stream) = method.stream_mut() {
            stream.pull(frames);
        }
        method.adjust_stimulus(args.level)?;
        if let Some(stream) = method.stream_mut() {
            stream.pull(frames);
        }
        method.update_data()?;
    }
    method.stop_test()?;
    method.done()?;

    println!("{}", serde_json::to_string_pretty(method.results())?);
    Ok(())
}

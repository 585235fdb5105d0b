use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use clap::{Parser, Subcommand};
use groovebox_core::{AppConfig, Sequencer, TriggerCounter, WavSink};
use tracing_subscriber::EnvFilter;

fn main() -> groovebox_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Play {
            config,
            bpm,
            seconds,
            seed,
        } => {
            let mut config = load_config(config.as_deref(), seed)?;
            if let Some(bpm) = bpm {
                config.engine.bpm = bpm;
            }
            run_play(&config, seconds)
        }
        Commands::Render {
            output,
            bars,
            config,
            seed,
        } => {
            let config = load_config(config.as_deref(), seed)?;
            run_render(&config, &output, bars)
        }
        Commands::Config => {
            println!("{}", AppConfig::live_defaults().to_json()?);
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>, seed: Option<u64>) -> groovebox_core::Result<AppConfig> {
    let mut config = match path {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::live_defaults(),
    };
    if seed.is_some() {
        config.seed = seed;
    }
    config.validate()?;
    Ok(config)
}

/// Builds a sequencer whose trigger side effect counts pulses.
fn build_sequencer(config: &AppConfig) -> groovebox_core::Result<(Sequencer, TriggerCounter)> {
    let pulses = TriggerCounter::new();
    let sequencer = Sequencer::from_app_config(config, Some(Arc::new(pulses.clone())))?;
    Ok((sequencer, pulses))
}

#[cfg(feature = "device")]
fn run_play(config: &AppConfig, seconds: Option<f64>) -> groovebox_core::Result<()> {
    use std::{
        thread,
        time::{Duration, Instant},
    };

    use groovebox_core::{DeviceSink, Transport};

    tracing::info!(bpm = config.engine.bpm, ?seconds, "starting live playback");
    let (sequencer, pulses) = build_sequencer(config)?;
    let mut transport = Transport::new(sequencer);
    transport.start(|| Ok(DeviceSink::new()))?;

    let deadline = seconds.map(Duration::from_secs_f64);
    let started = Instant::now();
    while transport.is_playing() && deadline.map_or(true, |limit| started.elapsed() < limit) {
        thread::sleep(Duration::from_millis(50));
    }

    let stats = transport.stop()?;
    tracing::info!(pulses = pulses.count(), ?stats, "playback finished");
    Ok(())
}

#[cfg(not(feature = "device"))]
fn run_play(_config: &AppConfig, _seconds: Option<f64>) -> groovebox_core::Result<()> {
    Err(groovebox_core::GrooveError::device(
        "live playback needs a build with the `device` feature",
    ))
}

fn run_render(config: &AppConfig, output: &Path, bars: u32) -> groovebox_core::Result<()> {
    let ticks = u64::from(bars) * u64::from(config.engine.beats_per_bar);
    tracing::info!(?output, bars, ticks, "rendering offline");

    let (mut sequencer, pulses) = build_sequencer(config)?;
    let mut sink = WavSink::create(output);
    let stats = sequencer.render(ticks, &mut sink)?.clone();
    sequencer.finish_triggers();

    tracing::info!(
        pulses = pulses.count(),
        played = stats.events_played,
        skipped = stats.generation_failures,
        "render finished"
    );
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Beat-synchronised generative sequencer", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Play through the default audio output device.
    Play {
        /// JSON configuration file.
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Overrides the configured tempo.
        #[arg(long)]
        bpm: Option<f64>,
        /// Stop after this many seconds instead of playing until interrupted.
        #[arg(long)]
        seconds: Option<f64>,
        /// Seed for reproducible sessions.
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Render a fixed number of bars to a WAV file without pacing.
    Render {
        /// Path of the WAV file to write.
        #[arg(short, long)]
        output: PathBuf,
        /// Bars to render, `beats_per_bar` ticks each.
        #[arg(long, default_value_t = 16)]
        bars: u32,
        /// JSON configuration file.
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Seed for reproducible sessions.
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Print the default configuration as JSON.
    Config,
}

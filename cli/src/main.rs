//! Resona command-line host
//!
//! ```text
//! resona play song.mp3 --preset slowedReverb
//! resona play song.wav --start 30 --end 45 --loop
//! resona render song.flac -o out.wav --reverb 0.4 --rate 0.85
//! resona presets --json
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::sync::Notify;
use tracing::info;
use tracing_subscriber::EnvFilter;

use resona_core::{
    EffectKey, EffectPatch, EngineConfig, OutputMode, PlaybackEngine, Region, PRESETS,
};

#[derive(Parser)]
#[command(name = "resona", version, about = "Real-time playback with effects and offline export")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Play a file through the effect chain
    Play {
        file: PathBuf,

        #[command(flatten)]
        settings: Settings,

        /// Run the graph without an audio device
        #[arg(long)]
        headless: bool,
    },
    /// Render a file to 16-bit stereo WAV
    Render {
        file: PathBuf,

        /// Output path
        #[arg(short, long)]
        output: PathBuf,

        /// Output sample rate
        #[arg(long, default_value_t = 44100)]
        sample_rate: u32,

        #[command(flatten)]
        settings: Settings,
    },
    /// List built-in presets
    Presets {
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args)]
struct Settings {
    /// Built-in preset, applied before individual options
    #[arg(long)]
    preset: Option<String>,

    /// Playback rate (0.25 - 4)
    #[arg(long)]
    rate: Option<f64>,

    /// Bass shelf gain in dB (-12 - 12)
    #[arg(long)]
    bass: Option<f32>,

    /// Pitch shift in semitones (-24 - 24)
    #[arg(long)]
    pitch: Option<f32>,

    /// Reverb wet level (0 - 1)
    #[arg(long)]
    reverb: Option<f32>,

    /// Reverb room size (0 - 1)
    #[arg(long)]
    room: Option<f32>,

    /// Reverb dampening in Hz (500 - 10000)
    #[arg(long)]
    dampening: Option<f32>,

    /// Master volume (0 - 1)
    #[arg(long)]
    volume: Option<f32>,

    /// Region start, seconds
    #[arg(long)]
    start: Option<f64>,

    /// Region end, seconds
    #[arg(long)]
    end: Option<f64>,

    /// Loop the region
    #[arg(long = "loop")]
    looping: bool,
}

impl Settings {
    fn patch(&self) -> EffectPatch {
        let mut patch = EffectPatch::default();
        let fields = [
            (EffectKey::BassGain, self.bass),
            (EffectKey::Pitch, self.pitch),
            (EffectKey::ReverbWet, self.reverb),
            (EffectKey::RoomSize, self.room),
            (EffectKey::Dampening, self.dampening),
        ];
        for (key, value) in fields {
            if let Some(value) = value {
                patch = patch.with(key, value);
            }
        }
        patch
    }

    fn region(&self) -> Option<Region> {
        if self.start.is_none() && self.end.is_none() && !self.looping {
            return None;
        }
        Some(Region::new(self.start.unwrap_or(0.0), self.end, self.looping))
    }

    fn apply(&self, engine: &PlaybackEngine) -> Result<()> {
        if let Some(name) = &self.preset {
            if !engine.apply_preset(name) {
                bail!("Unknown preset '{}' (see `resona presets`)", name);
            }
        }
        engine.set_effects(self.patch());
        if let Some(rate) = self.rate {
            engine.set_playback_rate(rate);
        }
        if let Some(volume) = self.volume {
            engine.set_volume(volume);
        }
        if let Some(region) = self.region() {
            engine.set_region(Some(region));
        }
        Ok(())
    }
}

async fn load(engine: &PlaybackEngine, file: &Path) -> Result<f64> {
    let data = tokio::fs::read(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let duration = engine
        .load(data)
        .await
        .with_context(|| format!("Failed to load {}", file.display()))?;
    info!("Loaded {} ({:.2}s)", file.display(), duration);
    Ok(duration)
}

async fn play(file: PathBuf, settings: Settings, headless: bool) -> Result<()> {
    let config = EngineConfig {
        output: if headless {
            OutputMode::Null
        } else {
            OutputMode::Device
        },
        ..EngineConfig::default()
    };
    let engine = PlaybackEngine::new(config)?;
    load(&engine, &file).await?;
    settings.apply(&engine)?;

    let ended = Arc::new(Notify::new());
    let notify = ended.clone();
    let _ended = engine.on_ended(move || notify.notify_one());
    let duration = engine.duration();
    let _position = engine.on_position_update(move |seconds| {
        eprint!("\r{:>7.2}s / {:.2}s", seconds, duration);
    });

    engine.play();
    ended.notified().await;
    eprintln!();

    engine.dispose();
    Ok(())
}

async fn render(
    file: PathBuf,
    output: PathBuf,
    sample_rate: u32,
    settings: Settings,
) -> Result<()> {
    let config = EngineConfig {
        render_sample_rate: sample_rate,
        ..EngineConfig::headless()
    };
    let engine = PlaybackEngine::new(config)?;
    load(&engine, &file).await?;
    settings.apply(&engine)?;

    let rendered = engine.render_to_file(None).await?;
    rendered
        .save(&output)
        .await
        .with_context(|| format!("Failed to write {}", output.display()))?;

    println!(
        "Wrote {} ({:.2}s, {} bytes)",
        output.display(),
        rendered.duration(),
        rendered.bytes().len()
    );
    engine.dispose();
    Ok(())
}

fn presets(json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(&PRESETS)?);
        return Ok(());
    }

    for preset in PRESETS.iter() {
        let fx = &preset.effects;
        println!(
            "{:<14} {:<16} rate {:.2}  bass {:+.1}dB  pitch {:+.1}  reverb {:.2} (room {:.2}, {:.0}Hz)",
            preset.name,
            preset.label,
            preset.rate,
            fx.bass_gain,
            fx.pitch,
            fx.reverb_wet,
            fx.room_size,
            fx.dampening
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("resona=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Play {
            file,
            settings,
            headless,
        } => play(file, settings, headless).await,
        Command::Render {
            file,
            output,
            sample_rate,
            settings,
        } => render(file, output, sample_rate, settings).await,
        Command::Presets { json } => presets(json),
    }
}

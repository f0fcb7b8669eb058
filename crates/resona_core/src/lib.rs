//! Resona Core - Playback & Effects Engine
//!
//! This crate provides the engine behind Resona, including:
//! - Source decoding (via Symphonia) and a live output stream (via CPAL)
//! - A fixed effect graph: bass shelf, pitch, reverb, fades, master gain
//! - A transport clock and the playback state machine
//! - Throttled event notification
//! - Deterministic offline rendering to 16-bit WAV
//! - Track persistence and a UI-facing player session
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Control Thread(s)                      │
//! │  Host ──calls──▶ PlaybackEngine ──events──▶ Listeners       │
//! │                   │        ▲                                │
//! │        TransportClock   tick() / poller (tokio)             │
//! └───────────────────┼─────────────────────────────────────────┘
//!                     │ rtrb commands        ▲ rtrb retired sources
//!                     ▼                      │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Audio Thread                           │
//! │  Voice ─▶ Shelf ─▶ Pitch ─▶ Reverb ─▶ Fade ─▶ Master ─▶ Tap │
//! │              (Zero allocation in this path)                 │
//! └─────────────────────────────────────────────────────────────┘
//! ```

mod clock;
mod config;
mod effects;
mod engine;
mod error;
mod graph;
mod message;
mod notifier;
mod region;
mod render;
mod session;
mod source;
mod stream;
mod track;
mod wav;

pub use clock::{
    clamp_rate, ManualClock, RuntimeClock, TimeSource, TransportClock, MAX_RATE, MIN_RATE,
};
pub use config::{EngineConfig, OutputMode, StreamConfig, TimingConfig};
pub use effects::{find_preset, EffectKey, EffectPatch, EffectSettings, Preset, PRESETS};
pub use engine::PlaybackEngine;
pub use error::{EngineError, EngineResult, GraphError, LoadError, RenderError, StorageError};
pub use graph::{EffectGraph, GraphProcessor, NodeParams};
pub use message::{EngineEvent, PlayerState};
pub use notifier::{EventNotifier, Subscription};
pub use region::Region;
pub use render::{RenderJob, RenderOptions, RenderedFile, RENDER_CHANNELS};
pub use session::{PlaybackSnapshot, PlayerSession};
pub use source::SourceBuffer;
pub use stream::OutputStream;
pub use track::{FileTrackRepository, MemoryTrackRepository, Track, TrackMeta, TrackRepository};
pub use wav::{encode_wav, quantize, WAV_HEADER_LEN};

// Re-export DSP types for convenience
pub use resona_dsp::{SpectrumAnalyzer, NUM_BINS};

//! Engine Error Types

use thiserror::Error;

/// Why a track could not be loaded
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Audio data is empty")]
    Empty,

    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),

    #[error("Failed to decode audio: {0}")]
    Decode(String),

    #[error("Audio contains no decodable frames")]
    NoFrames,

    #[error("Failed to activate audio output: {0}")]
    Output(String),

    #[error("Load was superseded by a newer load")]
    Superseded,

    #[error("Decode task failed: {0}")]
    Task(String),
}

/// Offline render failures
#[derive(Error, Debug)]
pub enum RenderError {
    #[error("Render span is empty")]
    EmptySpan,

    #[error("DSP error: {0}")]
    Dsp(#[from] resona_dsp::DspError),

    #[error("WAV encoding failed: {0}")]
    Encode(#[from] hound::Error),

    #[error("Render task failed: {0}")]
    Task(String),
}

/// Effect graph command failures
///
/// These never reach callers: effect writes are best-effort and a failed
/// write is logged.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphError {
    #[error("Graph command queue is full - audio thread can't keep up")]
    QueueFull,

    #[error("Graph processor is detached - output stream is gone")]
    Detached,

    #[error("Non-finite value for {0}")]
    NonFinite(crate::effects::EffectKey),

    #[error("Low-shelf coefficients rejected at this sample rate")]
    Coefficients,
}

/// Opaque persistence failure
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage index is corrupt: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Could not determine a storage directory")]
    NoStorageDir,
}

/// Errors that can occur in the audio engine
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Load failed: {0}")]
    Load(#[from] LoadError),

    #[error("No source loaded")]
    NoSourceLoaded,

    #[error("Render failed: {0}")]
    Render(#[from] RenderError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Track not found: {0}")]
    TrackNotFound(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Failed to build audio stream: {0}")]
    StreamBuildError(String),

    #[error("Failed to play audio stream: {0}")]
    StreamPlayError(String),

    #[error("No audio devices found")]
    NoDevicesFound,
}

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

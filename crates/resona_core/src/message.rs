//! Engine States and Events
//!
//! Events flow from the engine to observers (callbacks or channels).

use serde::{Deserialize, Serialize};

/// Playback controller state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PlayerState {
    /// Nothing loaded
    #[default]
    Idle,
    /// Decoding a new source
    Loading,
    /// Source loaded, not playing
    Ready,
    Playing,
    Paused,
    /// Fade-splice in flight; behaves as Playing for callers
    Seeking,
    /// Reached the end of the track or of a non-looping region
    Ended,
}

impl PlayerState {
    /// Whether audio is (or is about to be) running
    pub fn is_active(self) -> bool {
        matches!(self, PlayerState::Playing | PlayerState::Seeking)
    }

    /// Whether a source is loaded
    pub fn has_source(self) -> bool {
        !matches!(self, PlayerState::Idle | PlayerState::Loading)
    }
}

/// Events sent from the engine to observers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum EngineEvent {
    /// A source finished loading
    Ready { duration: f64 },

    /// Throttled playback position update
    Position { seconds: f64 },

    /// Playback reached the end of the track or region
    Ended,

    /// Controller state transition
    StateChanged { state: PlayerState },

    /// Error occurred
    Error { message: String },
}

impl EngineEvent {
    /// Create an error event from any error type
    pub fn error<E: std::fmt::Display>(err: E) -> Self {
        EngineEvent::Error {
            message: err.to_string(),
        }
    }
}

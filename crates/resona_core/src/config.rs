//! Engine and Stream Configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Audio stream configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Sample rate in Hz (e.g., 44100, 48000, 96000)
    pub sample_rate: u32,

    /// Number of audio channels (1 = mono, 2 = stereo)
    pub channels: u16,

    /// Buffer size in frames (lower = less latency, higher = more stability)
    pub buffer_size: u32,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            channels: 2,
            buffer_size: 512,
        }
    }
}

impl StreamConfig {
    /// Calculate latency in milliseconds for this configuration
    pub fn latency_ms(&self) -> f32 {
        (self.buffer_size as f32 / self.sample_rate as f32) * 1000.0
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.sample_rate < 8000 || self.sample_rate > 192000 {
            return Err(format!("Invalid sample rate: {}", self.sample_rate));
        }
        if self.channels == 0 || self.channels > 8 {
            return Err(format!("Invalid channel count: {}", self.channels));
        }
        if self.buffer_size < 32 || self.buffer_size > 8192 {
            return Err(format!("Invalid buffer size: {}", self.buffer_size));
        }
        Ok(())
    }
}

/// Where the live graph's output goes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    /// Default cpal output device
    #[default]
    Device,
    /// Clock-paced sink that runs the graph and discards the audio
    Null,
}

/// Transition timing (fades, seek settle, notification pacing)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Anti-click fade length
    pub fade_ms: u32,

    /// Delay between the start of a seek fade-out and the splice
    pub seek_settle_ms: u32,

    /// Minimum interval between position updates
    pub position_throttle_ms: u64,

    /// Polling loop period
    pub tick_interval_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            fade_ms: 20,
            seek_settle_ms: 25,
            position_throttle_ms: 100,
            tick_interval_ms: 16,
        }
    }
}

impl TimingConfig {
    pub fn fade(&self) -> Duration {
        Duration::from_millis(self.fade_ms as u64)
    }

    pub fn seek_settle(&self) -> Duration {
        Duration::from_millis(self.seek_settle_ms as u64)
    }

    pub fn position_throttle(&self) -> Duration {
        Duration::from_millis(self.position_throttle_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Fade length in frames at a given sample rate
    pub fn fade_frames(&self, sample_rate: u32) -> u32 {
        (self.fade_ms as u64 * sample_rate as u64 / 1000) as u32
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.seek_settle_ms < self.fade_ms {
            return Err(format!(
                "Seek settle ({}ms) must cover the fade ({}ms)",
                self.seek_settle_ms, self.fade_ms
            ));
        }
        if self.tick_interval_ms == 0 {
            return Err("Tick interval must be non-zero".to_string());
        }
        Ok(())
    }
}

/// Overall engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Live stream configuration
    pub stream: StreamConfig,

    /// Output backend
    #[serde(default)]
    pub output: OutputMode,

    /// Fade and notification timing
    #[serde(default)]
    pub timing: TimingConfig,

    /// Sample rate of exported files
    pub render_sample_rate: u32,

    /// Graph command ring capacity
    pub command_capacity: usize,

    /// Analysis tap publication rate
    pub analyzer_fps: u32,

    /// Spawn the position polling loop on the tokio runtime.
    /// When false (or outside a runtime) the host calls `tick()`.
    pub auto_poll: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            stream: StreamConfig::default(),
            output: OutputMode::Device,
            timing: TimingConfig::default(),
            render_sample_rate: 44100,
            command_capacity: 256,
            analyzer_fps: 30,
            auto_poll: true,
        }
    }
}

impl EngineConfig {
    /// No audio device; the graph still runs on a paced thread
    pub fn headless() -> Self {
        Self {
            output: OutputMode::Null,
            ..Self::default()
        }
    }

    /// Create config optimized for low latency
    pub fn low_latency() -> Self {
        Self {
            stream: StreamConfig {
                sample_rate: 48000,
                channels: 2,
                buffer_size: 128, // ~2.6ms latency
            },
            timing: TimingConfig {
                fade_ms: 10,
                seek_settle_ms: 12,
                ..TimingConfig::default()
            },
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        self.stream.validate()?;
        self.timing.validate()?;
        if self.render_sample_rate < 8000 || self.render_sample_rate > 192000 {
            return Err(format!(
                "Invalid render sample rate: {}",
                self.render_sample_rate
            ));
        }
        if self.command_capacity < 16 {
            return Err(format!(
                "Command capacity too small: {}",
                self.command_capacity
            ));
        }
        Ok(())
    }
}

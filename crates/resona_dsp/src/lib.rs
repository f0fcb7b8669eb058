//! Resona DSP - Digital Signal Processing Module
//!
//! This crate provides the processing stages used by the Resona engine:
//! - Low-shelf bass filter using BiQuad filters
//! - Delay-line pitch shifter
//! - Freeverb-style algorithmic reverb for live playback
//! - Convolution reverb with a seeded impulse response for offline renders
//! - Gain ramps for click-free fades
//! - Varispeed source reading
//! - FFT analysis tap for visualization
//!
//! # Architecture
//!
//! Everything on the live path follows a strict "no allocation in audio
//! callback" rule. Coefficients and delay lines are sized up front; the
//! engine hands precomputed values to the audio thread.

mod convolution;
mod error;
mod fft;
mod gain;
mod pitch;
mod processor;
mod reverb;
mod shelf;
mod varispeed;

pub use convolution::{decay_seconds, impulse_seed, ConvolutionReverb, ImpulseResponse};
pub use error::DspError;
pub use fft::{AnalyserTap, SpectrumAnalyzer, FFT_SIZE, NUM_BINS};
pub use gain::{db_to_linear, Gain, GainRamp};
pub use pitch::{semitones_to_ratio, PitchShifter, MAX_PITCH_SEMITONES, PITCH_WINDOW_SECONDS};
pub use processor::{AudioProcessor, ProcessContext, StageChain};
pub use reverb::{
    damping_coefficient, perceptual_wet, Reverb, MAX_DAMPENING_HZ, MAX_WET, MIN_DAMPENING_HZ,
};
pub use shelf::{LowShelf, MAX_SHELF_GAIN_DB, SHELF_FREQUENCY, SHELF_Q};
pub use varispeed::{playback_step, read_frame};

/// Re-exported so callers can carry shelf coefficients without a direct
/// `biquad` dependency
pub use biquad::Coefficients;

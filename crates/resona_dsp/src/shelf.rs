//! Low-Shelf Bass Filter
//!
//! A single stereo BiQuad low shelf, based on the RBJ (Robert
//! Bristow-Johnson) Audio EQ Cookbook. Coefficients can be computed on the
//! control thread with [`LowShelf::coefficients`] and handed to the audio
//! thread, so the audio callback never evaluates trig functions.

use biquad::{Biquad, Coefficients, DirectForm2Transposed, ToHertz, Type};

use crate::error::DspError;
use crate::processor::{AudioProcessor, ProcessContext};

/// Shelf corner frequency (Hz)
pub const SHELF_FREQUENCY: f32 = 200.0;

/// Shelf quality factor
pub const SHELF_Q: f32 = 0.7;

/// Maximum boost/cut in dB
pub const MAX_SHELF_GAIN_DB: f32 = 12.0;

/// Stereo low-shelf filter
pub struct LowShelf {
    // DirectForm2Transposed: better numerical stability than DF1
    left: DirectForm2Transposed<f32>,
    right: DirectForm2Transposed<f32>,
    gain_db: f32,
    sample_rate: f32,
}

impl LowShelf {
    /// Create a flat (0 dB) shelf
    pub fn new(sample_rate: f32) -> Result<Self, DspError> {
        Self::with_gain(sample_rate, 0.0)
    }

    /// Create a shelf with an initial gain
    pub fn with_gain(sample_rate: f32, gain_db: f32) -> Result<Self, DspError> {
        let gain_db = gain_db.clamp(-MAX_SHELF_GAIN_DB, MAX_SHELF_GAIN_DB);
        let coeffs = Self::coefficients(sample_rate, gain_db)?;
        Ok(Self {
            left: DirectForm2Transposed::<f32>::new(coeffs),
            right: DirectForm2Transposed::<f32>::new(coeffs),
            gain_db,
            sample_rate,
        })
    }

    /// Compute shelf coefficients for a gain in dB
    pub fn coefficients(sample_rate: f32, gain_db: f32) -> Result<Coefficients<f32>, DspError> {
        if !(sample_rate > 0.0) {
            return Err(DspError::InvalidSampleRate(sample_rate));
        }

        Coefficients::<f32>::from_params(
            Type::LowShelf(gain_db.clamp(-MAX_SHELF_GAIN_DB, MAX_SHELF_GAIN_DB)),
            sample_rate.hz(),
            SHELF_FREQUENCY.hz(),
            SHELF_Q,
        )
        .map_err(|_| DspError::InvalidCoefficients {
            frequency: SHELF_FREQUENCY,
            sample_rate,
        })
    }

    /// Recalculate coefficients for a new gain
    pub fn set_gain_db(&mut self, gain_db: f32) -> Result<(), DspError> {
        let gain_db = gain_db.clamp(-MAX_SHELF_GAIN_DB, MAX_SHELF_GAIN_DB);
        let coeffs = Self::coefficients(self.sample_rate, gain_db)?;
        self.apply(gain_db, coeffs);
        Ok(())
    }

    /// Install precomputed coefficients (audio-thread side of a gain change)
    #[inline]
    pub fn apply(&mut self, gain_db: f32, coeffs: Coefficients<f32>) {
        self.left.update_coefficients(coeffs);
        self.right.update_coefficients(coeffs);
        self.gain_db = gain_db;
    }

    pub fn gain_db(&self) -> f32 {
        self.gain_db
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    /// Process a stereo sample pair
    ///
    /// # Real-time Safety
    /// No allocations, no syscalls.
    #[inline]
    pub fn process_sample(&mut self, left: f32, right: f32) -> (f32, f32) {
        (self.left.run(left), self.right.run(right))
    }

    /// Clear filter memories
    pub fn reset_state(&mut self) {
        self.left.reset_state();
        self.right.reset_state();
    }
}

impl AudioProcessor for LowShelf {
    fn process(&mut self, buffer: &mut [f32], _context: &ProcessContext) {
        for frame in buffer.chunks_exact_mut(2) {
            let (l, r) = self.process_sample(frame[0], frame[1]);
            frame[0] = l;
            frame[1] = r;
        }
    }

    fn reset(&mut self) {
        self.reset_state();
    }

    fn name(&self) -> &'static str {
        "Low Shelf"
    }
}

//! Pitch Shifter
//!
//! Time-domain pitch shifting with a modulated dual-tap delay line.
//!
//! # Algorithm
//!
//! Two read taps sweep through a window of recent input at a speed set by
//! the pitch ratio. The taps sit half a window apart and are crossfaded
//! with complementary `sin²` gains, so each tap is silent at the moment its
//! delay wraps around. The tap gains always sum to one.
//!
//! Duration is unchanged; only pitch moves. At zero semitones the shifter
//! is bypassed and output equals input exactly.

use crate::error::DspError;
use crate::processor::{AudioProcessor, ProcessContext};

/// Semitone range accepted by [`PitchShifter::set_semitones`]
pub const MAX_PITCH_SEMITONES: f32 = 24.0;

/// Delay window in seconds
pub const PITCH_WINDOW_SECONDS: f32 = 0.1;

/// Stereo delay-line pitch shifter
pub struct PitchShifter {
    buffer_l: Vec<f32>,
    buffer_r: Vec<f32>,
    write_pos: usize,
    /// Window length in frames
    window: f32,
    /// Tap phase in [0, 1)
    phase: f32,
    /// Phase increment per frame, (1 - ratio) / window
    step: f32,
    semitones: f32,
    sample_rate: f32,
}

impl PitchShifter {
    pub fn new(sample_rate: f32) -> Result<Self, DspError> {
        if !(sample_rate > 0.0) {
            return Err(DspError::InvalidSampleRate(sample_rate));
        }

        let window = (PITCH_WINDOW_SECONDS * sample_rate).max(4.0);
        // Two guard frames for interpolation past the window edge
        let len = window.ceil() as usize + 2;

        Ok(Self {
            buffer_l: vec![0.0; len],
            buffer_r: vec![0.0; len],
            write_pos: 0,
            window,
            phase: 0.0,
            step: 0.0,
            semitones: 0.0,
            sample_rate,
        })
    }

    /// Set the shift in semitones (clamped to ±24)
    pub fn set_semitones(&mut self, semitones: f32) {
        let semitones = if semitones.is_finite() {
            semitones.clamp(-MAX_PITCH_SEMITONES, MAX_PITCH_SEMITONES)
        } else {
            0.0
        };
        self.semitones = semitones;
        self.step = (1.0 - semitones_to_ratio(semitones)) / self.window;
    }

    pub fn semitones(&self) -> f32 {
        self.semitones
    }

    /// Frequency ratio for the current shift
    pub fn ratio(&self) -> f32 {
        semitones_to_ratio(self.semitones)
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    pub fn is_bypassed(&self) -> bool {
        self.semitones == 0.0
    }

    /// Process a stereo sample pair
    ///
    /// # Real-time Safety
    /// No allocations, no syscalls.
    #[inline]
    pub fn process_sample(&mut self, left: f32, right: f32) -> (f32, f32) {
        let len = self.buffer_l.len();
        self.buffer_l[self.write_pos] = left;
        self.buffer_r[self.write_pos] = right;

        let out = if self.is_bypassed() {
            (left, right)
        } else {
            let phase_a = self.phase;
            let phase_b = (self.phase + 0.5).fract();

            let gain_a = (std::f32::consts::PI * phase_a).sin().powi(2);
            let gain_b = 1.0 - gain_a;

            let (al, ar) = self.tap(phase_a * self.window);
            let (bl, br) = self.tap(phase_b * self.window);

            self.phase = (self.phase + self.step).rem_euclid(1.0);
            // rem_euclid can round up to exactly 1.0 for tiny negatives
            if self.phase >= 1.0 {
                self.phase = 0.0;
            }

            (al * gain_a + bl * gain_b, ar * gain_a + br * gain_b)
        };

        self.write_pos = (self.write_pos + 1) % len;
        out
    }

    /// Read both channels `delay` frames behind the write head
    #[inline]
    fn tap(&self, delay: f32) -> (f32, f32) {
        let len = self.buffer_l.len();
        let whole = delay.floor();
        let frac = delay - whole;

        let i0 = (self.write_pos + len - (whole as usize % len)) % len;
        let i1 = (i0 + len - 1) % len;

        let l = self.buffer_l[i0] + (self.buffer_l[i1] - self.buffer_l[i0]) * frac;
        let r = self.buffer_r[i0] + (self.buffer_r[i1] - self.buffer_r[i0]) * frac;
        (l, r)
    }

    /// Clear the delay line
    pub fn reset_state(&mut self) {
        self.buffer_l.fill(0.0);
        self.buffer_r.fill(0.0);
        self.write_pos = 0;
        self.phase = 0.0;
    }
}

/// 2^(semitones / 12)
#[inline]
pub fn semitones_to_ratio(semitones: f32) -> f32 {
    2.0_f32.powf(semitones / 12.0)
}

impl AudioProcessor for PitchShifter {
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
        "Pitch Shift"
    }

    fn is_active(&self) -> bool {
        !self.is_bypassed()
    }
}

//! Live Reverb
//!
//! Freeverb-style algorithmic reverb: eight parallel damped comb filters per
//! channel followed by four series allpasses. All delay lines are allocated
//! up front, so parameter changes and processing never allocate.
//!
//! `dampening` is a corner frequency in Hz for the one-pole lowpass inside
//! each comb's feedback path; `room_size` sets comb feedback.

use crate::error::DspError;
use crate::processor::{AudioProcessor, ProcessContext};

// Tuning constants (scaled for 44100 Hz sample rate)
const COMB_TUNING: [usize; 8] = [1116, 1188, 1277, 1356, 1422, 1491, 1557, 1617];
const ALLPASS_TUNING: [usize; 4] = [556, 441, 341, 225];
const STEREO_SPREAD: usize = 23;

const INPUT_GAIN: f32 = 0.015;
const ROOM_SCALE: f32 = 0.28;
const ROOM_OFFSET: f32 = 0.7;

/// Lowest accepted dampening frequency (Hz)
pub const MIN_DAMPENING_HZ: f32 = 500.0;

/// Highest accepted dampening frequency (Hz)
pub const MAX_DAMPENING_HZ: f32 = 10000.0;

#[derive(Debug, Clone)]
struct CombFilter {
    buffer: Vec<f32>,
    index: usize,
    feedback: f32,
    damp1: f32,
    damp2: f32,
    filterstore: f32,
}

impl CombFilter {
    fn new(size: usize) -> Self {
        Self {
            buffer: vec![0.0; size.max(1)],
            index: 0,
            feedback: 0.84,
            damp1: 0.2,
            damp2: 0.8,
            filterstore: 0.0,
        }
    }

    #[inline]
    fn process(&mut self, input: f32) -> f32 {
        let output = self.buffer[self.index];

        self.filterstore = output * self.damp2 + self.filterstore * self.damp1;

        self.buffer[self.index] = input + self.filterstore * self.feedback;
        self.index = (self.index + 1) % self.buffer.len();

        output
    }

    fn clear(&mut self) {
        self.buffer.fill(0.0);
        self.filterstore = 0.0;
    }
}

#[derive(Debug, Clone)]
struct AllpassFilter {
    buffer: Vec<f32>,
    index: usize,
}

impl AllpassFilter {
    const FEEDBACK: f32 = 0.5;

    fn new(size: usize) -> Self {
        Self {
            buffer: vec![0.0; size.max(1)],
            index: 0,
        }
    }

    #[inline]
    fn process(&mut self, input: f32) -> f32 {
        let bufout = self.buffer[self.index];
        let output = bufout - input;

        self.buffer[self.index] = input + bufout * Self::FEEDBACK;
        self.index = (self.index + 1) % self.buffer.len();

        output
    }

    fn clear(&mut self) {
        self.buffer.fill(0.0);
    }
}

/// Stereo Freeverb
#[derive(Debug, Clone)]
pub struct Reverb {
    comb_l: Vec<CombFilter>,
    comb_r: Vec<CombFilter>,
    allpass_l: Vec<AllpassFilter>,
    allpass_r: Vec<AllpassFilter>,
    room_size: f32,
    dampening_hz: f32,
    wet: f32,
    sample_rate: f32,
}

impl Reverb {
    pub fn new(sample_rate: f32) -> Result<Self, DspError> {
        if !(sample_rate > 0.0) {
            return Err(DspError::InvalidSampleRate(sample_rate));
        }

        let scale = sample_rate / 44100.0;
        let scaled = |t: usize, spread: usize| ((t as f32) * scale) as usize + spread;

        let mut reverb = Self {
            comb_l: COMB_TUNING.iter().map(|&t| CombFilter::new(scaled(t, 0))).collect(),
            comb_r: COMB_TUNING
                .iter()
                .map(|&t| CombFilter::new(scaled(t, STEREO_SPREAD)))
                .collect(),
            allpass_l: ALLPASS_TUNING
                .iter()
                .map(|&t| AllpassFilter::new(scaled(t, 0)))
                .collect(),
            allpass_r: ALLPASS_TUNING
                .iter()
                .map(|&t| AllpassFilter::new(scaled(t, STEREO_SPREAD)))
                .collect(),
            room_size: 0.5,
            dampening_hz: 3000.0,
            wet: 0.0,
            sample_rate,
        };

        reverb.update_parameters();
        Ok(reverb)
    }

    /// Set all three parameters at once
    pub fn set_params(&mut self, room_size: f32, dampening_hz: f32, wet: f32) {
        self.room_size = room_size.clamp(0.0, 1.0);
        self.dampening_hz = dampening_hz.clamp(MIN_DAMPENING_HZ, MAX_DAMPENING_HZ);
        self.wet = wet.clamp(0.0, 1.0);
        self.update_parameters();
    }

    pub fn room_size(&self) -> f32 {
        self.room_size
    }

    pub fn dampening_hz(&self) -> f32 {
        self.dampening_hz
    }

    pub fn wet(&self) -> f32 {
        self.wet
    }

    fn update_parameters(&mut self) {
        let feedback = self.room_size * ROOM_SCALE + ROOM_OFFSET;
        let damp = damping_coefficient(self.dampening_hz, self.sample_rate);

        for comb in self.comb_l.iter_mut().chain(self.comb_r.iter_mut()) {
            comb.feedback = feedback;
            comb.damp1 = damp;
            comb.damp2 = 1.0 - damp;
        }
    }

    /// Process a stereo sample pair
    ///
    /// # Real-time Safety
    /// No allocations, no syscalls.
    #[inline]
    pub fn process_sample(&mut self, left: f32, right: f32) -> (f32, f32) {
        if self.wet == 0.0 {
            // Keep the tail ringing so raising wet later isn't a cold start
            self.run_tank(left, right);
            return (left, right);
        }

        let (wet_l, wet_r) = self.run_tank(left, right);
        let dry = 1.0 - self.wet;
        (
            left * dry + wet_l * self.wet,
            right * dry + wet_r * self.wet,
        )
    }

    #[inline]
    fn run_tank(&mut self, left: f32, right: f32) -> (f32, f32) {
        let input = (left + right) * INPUT_GAIN;

        let mut out_l = 0.0f32;
        let mut out_r = 0.0f32;

        for comb in &mut self.comb_l {
            out_l += comb.process(input);
        }
        for comb in &mut self.comb_r {
            out_r += comb.process(input);
        }

        for allpass in &mut self.allpass_l {
            out_l = allpass.process(out_l);
        }
        for allpass in &mut self.allpass_r {
            out_r = allpass.process(out_r);
        }

        (out_l, out_r)
    }

    /// Clear all delay lines
    pub fn clear(&mut self) {
        for comb in self.comb_l.iter_mut().chain(self.comb_r.iter_mut()) {
            comb.clear();
        }
        for allpass in self.allpass_l.iter_mut().chain(self.allpass_r.iter_mut()) {
            allpass.clear();
        }
    }
}

/// Ceiling on the effective wet mix
pub const MAX_WET: f32 = 0.8;

/// Map a 0..1 wet control to the mix actually applied
///
/// `value^0.7` lifts the low end of the control so small settings are
/// audible, then the result is capped at [`MAX_WET`]. Both the live graph
/// and the offline renderer go through this curve.
#[inline]
pub fn perceptual_wet(value: f32) -> f32 {
    if !value.is_finite() {
        return 0.0;
    }
    value.clamp(0.0, 1.0).powf(0.7).min(MAX_WET)
}

/// One-pole lowpass coefficient for a corner frequency: exp(-2π·fc/fs)
#[inline]
pub fn damping_coefficient(cutoff_hz: f32, sample_rate: f32) -> f32 {
    (-2.0 * std::f32::consts::PI * cutoff_hz / sample_rate).exp()
}

impl AudioProcessor for Reverb {
    fn process(&mut self, buffer: &mut [f32], _context: &ProcessContext) {
        for frame in buffer.chunks_exact_mut(2) {
            let (l, r) = self.process_sample(frame[0], frame[1]);
            frame[0] = l;
            frame[1] = r;
        }
    }

    fn reset(&mut self) {
        self.clear();
    }

    fn name(&self) -> &'static str {
        "Reverb"
    }
}

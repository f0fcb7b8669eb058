//! Gain Stages
//!
//! `GainRamp` is the fade-gain node: a linear, sample-accurate ramp used to
//! hide starts, stops and seek splices. `Gain` is a static gain processor
//! for the offline chain.

use crate::processor::{AudioProcessor, ProcessContext};

/// Convert decibels to linear amplitude
#[inline]
pub fn db_to_linear(db: f32) -> f32 {
    10.0_f32.powf(db / 20.0)
}

/// Linear gain ramp advanced once per frame
#[derive(Debug, Clone, Copy)]
pub struct GainRamp {
    current: f32,
    target: f32,
    step: f32,
    remaining: u32,
}

impl GainRamp {
    pub fn new(initial: f32) -> Self {
        Self {
            current: initial,
            target: initial,
            step: 0.0,
            remaining: 0,
        }
    }

    /// Jump to a value immediately, cancelling any ramp
    pub fn set(&mut self, value: f32) {
        self.current = value;
        self.target = value;
        self.step = 0.0;
        self.remaining = 0;
    }

    /// Ramp linearly from the current value to `target` over `frames` frames
    pub fn ramp_to(&mut self, target: f32, frames: u32) {
        if frames == 0 {
            self.set(target);
            return;
        }
        self.target = target;
        self.step = (target - self.current) / frames as f32;
        self.remaining = frames;
    }

    /// Advance one frame and return the gain to apply to it
    #[inline]
    pub fn next(&mut self) -> f32 {
        if self.remaining > 0 {
            self.remaining -= 1;
            if self.remaining == 0 {
                self.current = self.target;
            } else {
                self.current += self.step;
            }
        }
        self.current
    }

    pub fn value(&self) -> f32 {
        self.current
    }

    pub fn target(&self) -> f32 {
        self.target
    }

    pub fn is_ramping(&self) -> bool {
        self.remaining > 0
    }
}

/// Static linear gain
#[derive(Debug, Clone, Copy)]
pub struct Gain {
    gain: f32,
}

impl Gain {
    pub fn new(gain: f32) -> Self {
        Self { gain }
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }
}

impl AudioProcessor for Gain {
    fn process(&mut self, buffer: &mut [f32], _context: &ProcessContext) {
        for sample in buffer.iter_mut() {
            *sample *= self.gain;
        }
    }

    fn reset(&mut self) {}

    fn name(&self) -> &'static str {
        "Gain"
    }
}

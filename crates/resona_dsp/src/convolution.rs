//! Convolution Reverb (offline)
//!
//! The offline renderer cannot run the live Freeverb tank and stay
//! bit-stable across block sizes, so it convolves with a synthetic impulse
//! response instead: seeded white noise under an exponential decay envelope,
//! darkened by a one-pole lowpass at the dampening frequency.
//!
//! The seed is derived from `(room_size, dampening)` alone, so identical
//! settings always produce the identical impulse response and the render is
//! byte-for-byte reproducible.
//!
//! # Real-time Safety
//! None. Processing runs FFT overlap-add over large blocks and is meant for
//! the offline renderer only.

use std::sync::Arc;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rustfft::{num_complex::Complex, Fft, FftPlannerScalar};

use crate::error::DspError;
use crate::processor::{AudioProcessor, ProcessContext};
use crate::reverb::{damping_coefficient, MAX_DAMPENING_HZ, MIN_DAMPENING_HZ};

/// Shortest tail (room_size = 0), seconds
const MIN_DECAY_SECONDS: f32 = 0.3;

/// Additional tail at room_size = 1, seconds
const DECAY_RANGE_SECONDS: f32 = 3.7;

/// ln(1000): envelope reaches -60 dB at the end of the tail
const SIXTY_DB: f32 = 6.907_755;

/// Deterministic seed for an impulse response
pub fn impulse_seed(room_size: f32, dampening_hz: f32) -> u64 {
    let room = room_size.clamp(0.0, 1.0).to_bits() as u64;
    let damp = dampening_hz.clamp(MIN_DAMPENING_HZ, MAX_DAMPENING_HZ).to_bits() as u64;
    ((room << 32) | damp) ^ 0x5245_534f_4e41_4952
}

/// Tail length for a room size
pub fn decay_seconds(room_size: f32) -> f32 {
    MIN_DECAY_SECONDS + DECAY_RANGE_SECONDS * room_size.clamp(0.0, 1.0)
}

/// Stereo impulse response
#[derive(Debug, Clone, PartialEq)]
pub struct ImpulseResponse {
    left: Vec<f32>,
    right: Vec<f32>,
    sample_rate: f32,
}

impl ImpulseResponse {
    /// Synthesize a decaying-noise impulse response
    pub fn generate(
        sample_rate: f32,
        room_size: f32,
        dampening_hz: f32,
        seed: u64,
    ) -> Result<Self, DspError> {
        if !(sample_rate > 0.0) {
            return Err(DspError::InvalidSampleRate(sample_rate));
        }

        let decay = decay_seconds(room_size);
        let len = (decay * sample_rate).round() as usize;
        let damp = damping_coefficient(
            dampening_hz.clamp(MIN_DAMPENING_HZ, MAX_DAMPENING_HZ),
            sample_rate,
        );

        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut left = Vec::with_capacity(len);
        let mut right = Vec::with_capacity(len);
        let (mut lp_l, mut lp_r) = (0.0f32, 0.0f32);

        for i in 0..len {
            let t = i as f32 / sample_rate;
            let envelope = (-SIXTY_DB * t / decay).exp();

            let noise_l: f32 = rng.random_range(-1.0..1.0);
            let noise_r: f32 = rng.random_range(-1.0..1.0);

            lp_l = (1.0 - damp) * noise_l + damp * lp_l;
            lp_r = (1.0 - damp) * noise_r + damp * lp_r;

            left.push(lp_l * envelope);
            right.push(lp_r * envelope);
        }

        normalize_energy(&mut left);
        normalize_energy(&mut right);

        Self::from_channels(left, right, sample_rate)
    }

    /// Wrap existing channel data
    pub fn from_channels(left: Vec<f32>, right: Vec<f32>, sample_rate: f32) -> Result<Self, DspError> {
        if left.is_empty() || left.len() != right.len() {
            return Err(DspError::EmptyImpulseResponse);
        }
        Ok(Self {
            left,
            right,
            sample_rate,
        })
    }

    pub fn len(&self) -> usize {
        self.left.len()
    }

    pub fn is_empty(&self) -> bool {
        self.left.is_empty()
    }

    pub fn left(&self) -> &[f32] {
        &self.left
    }

    pub fn right(&self) -> &[f32] {
        &self.right
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }
}

fn normalize_energy(channel: &mut [f32]) {
    let energy: f32 = channel.iter().map(|s| s * s).sum();
    if energy > 0.0 {
        let scale = energy.sqrt().recip();
        for s in channel.iter_mut() {
            *s *= scale;
        }
    }
}

/// Stereo overlap-add convolver with dry/wet mix
///
/// Blocks are convolved as they arrive; contributions that spill past the
/// end of a block are carried in `tail` into the next `process` call.
pub struct ConvolutionReverb {
    block: usize,
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
    ir_spectrum: [Vec<Complex<f32>>; 2],
    tail: [Vec<f32>; 2],
    scratch: Vec<Complex<f32>>,
    wet: f32,
}

impl ConvolutionReverb {
    /// `wet` is the final mix amount (already through any perceptual curve)
    pub fn new(ir: &ImpulseResponse, wet: f32) -> Result<Self, DspError> {
        if ir.is_empty() {
            return Err(DspError::EmptyImpulseResponse);
        }

        let block = ir.len().next_power_of_two().max(1024);
        let fft_size = block * 2;

        // Scalar planner: identical output on every CPU
        let mut planner = FftPlannerScalar::<f32>::new();
        let forward = planner.plan_fft_forward(fft_size);
        let inverse = planner.plan_fft_inverse(fft_size);

        let spectrum = |channel: &[f32]| {
            let mut buf = vec![Complex::new(0.0, 0.0); fft_size];
            for (dst, &s) in buf.iter_mut().zip(channel) {
                dst.re = s;
            }
            forward.process(&mut buf);
            buf
        };
        let ir_spectrum = [spectrum(ir.left()), spectrum(ir.right())];

        Ok(Self {
            block,
            forward,
            inverse,
            ir_spectrum,
            tail: [vec![0.0; fft_size], vec![0.0; fft_size]],
            scratch: vec![Complex::new(0.0, 0.0); fft_size],
            wet: wet.clamp(0.0, 1.0),
        })
    }

    pub fn wet(&self) -> f32 {
        self.wet
    }

    /// Input frames consumed per FFT pass
    pub fn block_size(&self) -> usize {
        self.block
    }

    /// Convolve one block of a channel into that channel's tail
    fn convolve_block(&mut self, channel: usize, frames: &[f32], stride: usize, offset: usize) {
        let fft_size = self.scratch.len();
        let scale = 1.0 / fft_size as f32;

        for c in self.scratch.iter_mut() {
            *c = Complex::new(0.0, 0.0);
        }
        for (dst, frame) in self.scratch.iter_mut().zip(frames.chunks_exact(stride)) {
            dst.re = frame[offset];
        }

        self.forward.process(&mut self.scratch);
        for (s, h) in self.scratch.iter_mut().zip(&self.ir_spectrum[channel]) {
            *s *= *h;
        }
        self.inverse.process(&mut self.scratch);

        for (t, s) in self.tail[channel].iter_mut().zip(&self.scratch) {
            *t += s.re * scale;
        }
    }

    /// Drop `frames` samples from the front of each tail
    fn advance(&mut self, frames: usize) {
        for tail in &mut self.tail {
            let len = tail.len();
            tail.copy_within(frames.., 0);
            tail[len - frames..].fill(0.0);
        }
    }
}

impl AudioProcessor for ConvolutionReverb {
    fn process(&mut self, buffer: &mut [f32], context: &ProcessContext) {
        if self.wet == 0.0 {
            return;
        }

        let stride = context.channels.max(2);
        let dry = 1.0 - self.wet;

        for chunk in buffer.chunks_mut(self.block * stride) {
            let frames = chunk.len() / stride;
            if frames == 0 {
                continue;
            }

            self.convolve_block(0, chunk, stride, 0);
            self.convolve_block(1, chunk, stride, 1);

            for (i, frame) in chunk.chunks_exact_mut(stride).enumerate() {
                frame[0] = frame[0] * dry + self.tail[0][i] * self.wet;
                frame[1] = frame[1] * dry + self.tail[1][i] * self.wet;
            }

            self.advance(frames);
        }
    }

    fn reset(&mut self) {
        for tail in &mut self.tail {
            tail.fill(0.0);
        }
    }

    fn name(&self) -> &'static str {
        "Convolution Reverb"
    }

    fn is_active(&self) -> bool {
        self.wet > 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn context() -> ProcessContext {
        ProcessContext::new(44100.0, 2, 4096)
    }

    #[test]
    fn test_same_seed_same_response() {
        let seed = impulse_seed(0.5, 3000.0);
        let a = ImpulseResponse::generate(44100.0, 0.5, 3000.0, seed).unwrap();
        let b = ImpulseResponse::generate(44100.0, 0.5, 3000.0, seed).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_seed_depends_on_settings() {
        assert_ne!(impulse_seed(0.5, 3000.0), impulse_seed(0.6, 3000.0));
        assert_ne!(impulse_seed(0.5, 3000.0), impulse_seed(0.5, 4000.0));
        assert_eq!(impulse_seed(0.5, 3000.0), impulse_seed(0.5, 3000.0));
    }

    #[test]
    fn test_room_size_sets_length() {
        let small = ImpulseResponse::generate(44100.0, 0.0, 3000.0, 1).unwrap();
        let large = ImpulseResponse::generate(44100.0, 1.0, 3000.0, 1).unwrap();
        assert_eq!(small.len(), (0.3_f32 * 44100.0).round() as usize);
        assert_eq!(large.len(), (4.0_f32 * 44100.0).round() as usize);
    }

    #[test]
    fn test_unit_energy() {
        let ir = ImpulseResponse::generate(44100.0, 0.2, 5000.0, 7).unwrap();
        let energy: f32 = ir.left().iter().map(|s| s * s).sum();
        assert_abs_diff_eq!(energy, 1.0, epsilon = 1e-3);
    }

    #[test]
    fn test_empty_response_rejected() {
        assert!(matches!(
            ImpulseResponse::from_channels(vec![], vec![], 44100.0),
            Err(DspError::EmptyImpulseResponse)
        ));
    }

    #[test]
    fn test_impulse_reproduces_response() {
        let ir = ImpulseResponse::from_channels(
            vec![1.0, 0.5, 0.25, 0.125],
            vec![0.0, 1.0, 0.0, -1.0],
            44100.0,
        )
        .unwrap();
        let mut conv = ConvolutionReverb::new(&ir, 1.0).unwrap();

        let mut buffer = vec![0.0; 16];
        buffer[0] = 1.0;
        buffer[1] = 1.0;
        conv.process(&mut buffer, &context());

        let left: Vec<f32> = buffer.chunks(2).map(|f| f[0]).collect();
        let right: Vec<f32> = buffer.chunks(2).map(|f| f[1]).collect();
        for (got, want) in left.iter().zip([1.0, 0.5, 0.25, 0.125, 0.0]) {
            assert_abs_diff_eq!(*got, want, epsilon = 1e-5);
        }
        for (got, want) in right.iter().zip([0.0, 1.0, 0.0, -1.0, 0.0]) {
            assert_abs_diff_eq!(*got, want, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_tail_carries_across_calls() {
        let ir = ImpulseResponse::generate(44100.0, 0.0, 3000.0, 3).unwrap();
        let input: Vec<f32> = (0..8192).map(|i| ((i * 13) % 29) as f32 / 29.0 - 0.5).collect();

        let mut whole = input.clone();
        ConvolutionReverb::new(&ir, 0.5)
            .unwrap()
            .process(&mut whole, &context());

        let mut split = input.clone();
        let mut conv = ConvolutionReverb::new(&ir, 0.5).unwrap();
        let (a, b) = split.split_at_mut(3000);
        conv.process(a, &context());
        conv.process(b, &context());

        for (x, y) in whole.iter().zip(&split) {
            assert_abs_diff_eq!(*x, *y, epsilon = 1e-4);
        }
    }

    #[test]
    fn test_zero_wet_is_dry() {
        let ir = ImpulseResponse::generate(44100.0, 0.5, 3000.0, 9).unwrap();
        let mut conv = ConvolutionReverb::new(&ir, 0.0).unwrap();
        let mut buffer = vec![0.3, -0.3, 0.1, -0.1];
        conv.process(&mut buffer, &context());
        assert_eq!(buffer, vec![0.3, -0.3, 0.1, -0.1]);
    }

    #[test]
    fn test_deterministic_output() {
        let run = || {
            let ir = ImpulseResponse::generate(44100.0, 0.3, 2500.0, impulse_seed(0.3, 2500.0))
                .unwrap();
            let mut conv = ConvolutionReverb::new(&ir, 0.4).unwrap();
            let mut buffer: Vec<f32> = (0..4000).map(|i| (i as f32 * 0.05).sin()).collect();
            conv.process(&mut buffer, &context());
            buffer
        };
        assert_eq!(run(), run());
    }
}

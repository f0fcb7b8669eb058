//! Analysis Tap
//!
//! The last stage of the live graph. The audio thread owns an
//! [`AnalyserTap`] that mixes each frame to mono into a ring and, roughly
//! `fps` times per second, publishes the most recent [`FFT_SIZE`] samples.
//! The control side holds the matching [`SpectrumAnalyzer`], which turns the
//! latest published window into log-spaced magnitude bins on demand.
//!
//! Publishing uses `try_lock`: if a reader is mid-copy the tap simply tries
//! again on the next frame, so the audio thread never waits.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rustfft::{num_complex::Complex, Fft, FftPlanner};

/// FFT size (must be power of 2)
/// 2048 samples at 48kHz = ~42ms window, ~23Hz resolution
pub const FFT_SIZE: usize = 2048;

/// Number of frequency bins in a snapshot, logarithmically spaced
pub const NUM_BINS: usize = 32;

/// Smoothing factor for spectrum decay (0.0 = instant, 1.0 = no decay)
const SPECTRUM_DECAY: f32 = 0.7;

/// Attack factor for spectrum rise
const SPECTRUM_ATTACK: f32 = 0.5;

fn hann_window(n: usize, size: usize) -> f32 {
    0.5 * (1.0 - (2.0 * std::f32::consts::PI * n as f32 / (size - 1) as f32).cos())
}

/// Window most recently published by the tap
struct Published {
    frame: Mutex<Vec<f32>>,
    fresh: AtomicBool,
}

/// Audio-thread half: accumulates samples and publishes windows
pub struct AnalyserTap {
    ring: Vec<f32>,
    write_pos: usize,
    since_publish: u32,
    samples_per_publish: u32,
    shared: Arc<Published>,
}

impl AnalyserTap {
    /// Push a stereo sample pair
    ///
    /// # Real-time Safety
    /// No allocations. Never blocks: publication is skipped while the
    /// reader holds the window.
    #[inline]
    pub fn push_sample(&mut self, left: f32, right: f32) {
        self.ring[self.write_pos] = (left + right) * 0.5;
        self.write_pos = (self.write_pos + 1) % FFT_SIZE;
        self.since_publish = self.since_publish.saturating_add(1);

        if self.since_publish >= self.samples_per_publish {
            if let Some(mut frame) = self.shared.frame.try_lock() {
                // Oldest sample first
                let (newer, older) = self.ring.split_at(self.write_pos);
                frame[..older.len()].copy_from_slice(older);
                frame[older.len()..].copy_from_slice(newer);
                self.shared.fresh.store(true, Ordering::Release);
                self.since_publish = 0;
            }
        }
    }

    /// Zero the ring (e.g. when a new source is connected)
    pub fn clear(&mut self) {
        self.ring.fill(0.0);
        self.write_pos = 0;
        self.since_publish = 0;
    }
}

/// Control-side half: computes the spectrum from published windows
pub struct SpectrumAnalyzer {
    shared: Arc<Published>,
    window: Vec<f32>,
    fft: Arc<dyn Fft<f32>>,
    fft_buffer: Mutex<Vec<Complex<f32>>>,
    spectrum: RwLock<[f32; NUM_BINS]>,
    smoothed_spectrum: RwLock<[f32; NUM_BINS]>,
}

impl SpectrumAnalyzer {
    /// Create a connected analyzer/tap pair
    ///
    /// # Arguments
    /// * `sample_rate` - Audio sample rate in Hz
    /// * `fps` - Target publication rate (default 30)
    pub fn new(sample_rate: f32, fps: u32) -> (Self, AnalyserTap) {
        let samples_per_publish = ((sample_rate / fps.max(1) as f32) as u32).max(1);

        let shared = Arc::new(Published {
            frame: Mutex::new(vec![0.0; FFT_SIZE]),
            fresh: AtomicBool::new(false),
        });

        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(FFT_SIZE);

        let analyzer = Self {
            shared: shared.clone(),
            window: (0..FFT_SIZE).map(|i| hann_window(i, FFT_SIZE)).collect(),
            fft,
            fft_buffer: Mutex::new(vec![Complex::new(0.0, 0.0); FFT_SIZE]),
            spectrum: RwLock::new([0.0; NUM_BINS]),
            smoothed_spectrum: RwLock::new([0.0; NUM_BINS]),
        };

        let tap = AnalyserTap {
            ring: vec![0.0; FFT_SIZE],
            write_pos: 0,
            since_publish: 0,
            samples_per_publish,
            shared,
        };

        (analyzer, tap)
    }

    /// Recompute the spectrum if the tap published a new window
    ///
    /// Returns true if the spectrum changed.
    pub fn update(&self) -> bool {
        if !self.shared.fresh.swap(false, Ordering::Acquire) {
            return false;
        }

        let mut buffer = self.fft_buffer.lock();
        {
            let frame = self.shared.frame.lock();
            for ((dst, &s), &w) in buffer.iter_mut().zip(frame.iter()).zip(&self.window) {
                *dst = Complex::new(s * w, 0.0);
            }
        }
        self.fft.process(&mut buffer);

        let mut spectrum = self.spectrum.write();
        compute_log_spectrum(&buffer, &mut spectrum);

        // Asymmetric attack/decay: snappy rise, smooth falloff
        let mut smoothed = self.smoothed_spectrum.write();
        for (current, &raw) in smoothed.iter_mut().zip(spectrum.iter()) {
            if raw > *current {
                *current += (raw - *current) * SPECTRUM_ATTACK;
            } else {
                *current = *current * SPECTRUM_DECAY + raw * (1.0 - SPECTRUM_DECAY);
            }
        }

        true
    }

    /// Smoothed spectrum, each bin 0.0 to 1.0
    pub fn get_spectrum(&self) -> [f32; NUM_BINS] {
        *self.smoothed_spectrum.read()
    }

    /// Unsmoothed spectrum from the last update
    pub fn get_raw_spectrum(&self) -> [f32; NUM_BINS] {
        *self.spectrum.read()
    }

    /// Update if needed and return the smoothed bins
    pub fn snapshot(&self) -> Vec<f32> {
        self.update();
        self.get_spectrum().to_vec()
    }

    pub fn reset(&self) {
        self.shared.fresh.store(false, Ordering::Relaxed);
        self.shared.frame.lock().fill(0.0);
        *self.spectrum.write() = [0.0; NUM_BINS];
        *self.smoothed_spectrum.write() = [0.0; NUM_BINS];
    }
}

/// Convert FFT output to logarithmically-spaced magnitude bins
fn compute_log_spectrum(fft_output: &[Complex<f32>], spectrum: &mut [f32; NUM_BINS]) {
    let nyquist = FFT_SIZE / 2;

    let log_min = 0.0_f32; // ln(1): skip DC
    let log_max = (nyquist as f32).ln();
    let log_step = (log_max - log_min) / NUM_BINS as f32;

    // A full-scale sine under a Hann window peaks near FFT_SIZE / 4
    let reference_magnitude = (FFT_SIZE as f32) / 4.0;

    for (i, bin) in spectrum.iter_mut().enumerate() {
        let start = ((log_min + i as f32 * log_step).exp() as usize).max(1);
        let end = (((log_min + (i + 1) as f32 * log_step).exp() as usize) + 1)
            .min(nyquist)
            .max(start + 1);

        let slice = &fft_output[start..end];
        let avg_mag = slice.iter().map(|c| c.norm()).sum::<f32>() / slice.len() as f32;

        // Map -60dB..0dB onto 0..1
        let db = 20.0 * (avg_mag / reference_magnitude).max(1e-10).log10();
        *bin = ((db + 60.0) / 60.0).clamp(0.0, 1.0);
    }
}

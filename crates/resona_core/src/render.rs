//! Offline Renderer
//!
//! Rebuilds the live chain's semantics in a private, non-real-time path and
//! encodes the result as a 16-bit stereo WAV:
//!
//! ```text
//! varispeed read ─▶ low shelf ─▶ pitch ─▶ convolution reverb ─▶ volume ─▶ WAV
//! ```
//!
//! The convolution impulse response is seeded from the reverb parameters,
//! so identical inputs always produce identical bytes.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use resona_dsp::{
    impulse_seed, perceptual_wet, playback_step, read_frame, ConvolutionReverb, Gain,
    ImpulseResponse, LowShelf, PitchShifter, ProcessContext, StageChain,
};

use crate::clock::clamp_rate;
use crate::effects::EffectSettings;
use crate::error::{RenderError, StorageError};
use crate::region::{bounds, Region};
use crate::source::SourceBuffer;
use crate::wav::{encode_wav, WAV_HEADER_LEN};

/// Exported files are always stereo
pub const RENDER_CHANNELS: u16 = 2;

/// Overrides for an export; `None` fields take the engine's current values
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderOptions {
    #[serde(default)]
    pub region: Option<Region>,
    #[serde(default)]
    pub effects: Option<EffectSettings>,
    #[serde(default)]
    pub rate: Option<f64>,
    #[serde(default)]
    pub volume: Option<f32>,
}

impl RenderOptions {
    /// Render the whole track regardless of the engine's region
    pub fn whole_track() -> Self {
        Self {
            region: Some(Region::full(false)),
            ..Self::default()
        }
    }
}

/// A complete, encoded export
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedFile {
    bytes: Vec<u8>,
    sample_rate: u32,
    channels: u16,
    frames: usize,
}

impl RenderedFile {
    /// Encoded WAV, header included
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Size of the PCM payload in bytes
    pub fn data_len(&self) -> usize {
        self.bytes.len() - WAV_HEADER_LEN
    }

    pub fn duration(&self) -> f64 {
        self.frames as f64 / self.sample_rate as f64
    }

    /// Write to `path` via a sibling temp file and rename
    ///
    /// The destination either holds the complete file or is left untouched.
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<(), StorageError> {
        let path = path.as_ref();
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".part");

        if let Err(e) = tokio::fs::write(&tmp, &self.bytes).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        if let Err(e) = tokio::fs::rename(&tmp, path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        info!("Exported {:.2}s to {:?}", self.duration(), path);
        Ok(())
    }
}

/// Fully resolved render inputs
#[derive(Debug, Clone)]
pub struct RenderJob {
    pub source: Arc<SourceBuffer>,
    pub region: Option<Region>,
    pub effects: EffectSettings,
    pub rate: f64,
    pub volume: f32,
    pub sample_rate: u32,
}

impl RenderJob {
    /// Span in source seconds after fitting the region to the track
    pub fn span(&self) -> (f64, f64) {
        let duration = self.source.duration();
        let region = self.region.and_then(|r| r.clamped(duration));
        bounds(region.as_ref(), duration)
    }

    fn effective_rate(&self) -> f64 {
        if self.rate.is_finite() {
            clamp_rate(self.rate)
        } else {
            1.0
        }
    }

    fn effective_volume(&self) -> f32 {
        if self.volume.is_finite() {
            self.volume.clamp(0.0, 1.0)
        } else {
            1.0
        }
    }

    /// Output length: `(end - start) / rate` seconds at the render rate
    pub fn output_frames(&self) -> usize {
        let (start, end) = self.span();
        ((end - start) / self.effective_rate() * self.sample_rate as f64).round() as usize
    }

    /// Render and encode
    pub fn run(&self) -> Result<RenderedFile, RenderError> {
        let frames = self.output_frames();
        if frames == 0 {
            return Err(RenderError::EmptySpan);
        }

        let (start, _) = self.span();
        let rate = self.effective_rate();
        let fx = self.effects.sanitized();
        let sr = self.sample_rate as f32;

        let mut buffer = self.read_span(start, rate, frames);
        let mut chain = self.build_chain(&fx, sr, frames)?;
        debug!("Render path: {}", chain.active_names().join(" -> "));
        chain.process(&mut buffer);

        let bytes = encode_wav(&buffer, self.sample_rate, RENDER_CHANNELS)?;
        info!(
            "Rendered {} frames ({:.2}s at {}x) from {:.2}s",
            frames,
            frames as f64 / self.sample_rate as f64,
            rate,
            start
        );

        Ok(RenderedFile {
            bytes,
            sample_rate: self.sample_rate,
            channels: RENDER_CHANNELS,
            frames,
        })
    }

    /// Rate-adjusted read of the source into an interleaved stereo buffer
    fn read_span(&self, start: f64, rate: f64, frames: usize) -> Vec<f32> {
        let source = &self.source;
        let origin = start * source.sample_rate() as f64;
        let step = playback_step(rate, source.sample_rate(), self.sample_rate);

        let mut buffer = vec![0.0f32; frames * RENDER_CHANNELS as usize];
        for (i, frame) in buffer.chunks_exact_mut(2).enumerate() {
            let position = origin + i as f64 * step;
            if let Some((l, r)) = read_frame(source.samples(), source.channels(), position) {
                frame[0] = l;
                frame[1] = r;
            }
        }
        buffer
    }

    fn build_chain(
        &self,
        fx: &EffectSettings,
        sr: f32,
        frames: usize,
    ) -> Result<StageChain, RenderError> {
        let context = ProcessContext::new(sr, RENDER_CHANNELS as usize, frames);
        let mut chain = StageChain::new(context);

        chain.add(LowShelf::with_gain(sr, fx.bass_gain)?);

        let mut pitch = PitchShifter::new(sr)?;
        pitch.set_semitones(fx.pitch);
        chain.add(pitch);

        let wet = perceptual_wet(fx.reverb_wet);
        if wet > 0.0 {
            let seed = impulse_seed(fx.room_size, fx.dampening);
            let ir = ImpulseResponse::generate(sr, fx.room_size, fx.dampening, seed)?;
            chain.add(ConvolutionReverb::new(&ir, wet)?);
        }

        chain.add(Gain::new(self.effective_volume()));
        Ok(chain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(seconds: f64, sample_rate: u32) -> Arc<SourceBuffer> {
        let frames = (seconds * sample_rate as f64) as usize;
        let samples: Vec<f32> = (0..frames)
            .flat_map(|i| {
                let s = (2.0 * std::f64::consts::PI * 220.0 * i as f64 / sample_rate as f64).sin()
                    as f32
                    * 0.5;
                [s, s]
            })
            .collect();
        Arc::new(SourceBuffer::from_interleaved(samples, 2, sample_rate).unwrap())
    }

    fn job(source: Arc<SourceBuffer>) -> RenderJob {
        RenderJob {
            source,
            region: None,
            effects: EffectSettings::default(),
            rate: 1.0,
            volume: 1.0,
            sample_rate: 44100,
        }
    }

    fn data_size(bytes: &[u8]) -> u32 {
        u32::from_le_bytes([bytes[40], bytes[41], bytes[42], bytes[43]])
    }

    #[test]
    fn test_ten_second_region_size() {
        let mut job = job(tone(12.0, 48000));
        job.region = Some(Region::new(1.0, Some(11.0), false));

        let file = job.run().unwrap();
        assert_eq!(file.frames(), 441_000);
        assert_eq!(file.data_len(), 10 * 44100 * 2 * 2);
        assert_eq!(data_size(file.bytes()), 1_764_000);
        assert_eq!(&file.bytes()[0..4], b"RIFF");
    }

    #[test]
    fn test_rate_changes_length() {
        let mut job = job(tone(2.0, 44100));
        job.rate = 2.0;
        assert_eq!(job.output_frames(), 44100);

        job.rate = 0.5;
        assert_eq!(job.output_frames(), 176_400);

        // Out-of-range rates are clamped like the live setter
        job.rate = 100.0;
        assert_eq!(job.output_frames(), 22050);
    }

    #[test]
    fn test_region_is_clamped_to_track() {
        let mut job = job(tone(2.0, 44100));
        job.region = Some(Region::new(1.5, Some(9.0), false));
        assert_eq!(job.span(), (1.5, 2.0));
        assert_eq!(job.output_frames(), 22050);
    }

    #[test]
    fn test_deterministic_with_reverb() {
        let mut job = job(tone(1.0, 44100));
        job.effects = EffectSettings {
            reverb_wet: 0.5,
            room_size: 0.3,
            dampening: 4000.0,
            bass_gain: 4.0,
            pitch: 3.0,
        };

        let a = job.run().unwrap();
        let b = job.run().unwrap();
        assert_eq!(a.bytes(), b.bytes());
    }

    #[test]
    fn test_reverb_changes_output() {
        let dry = job(tone(1.0, 44100)).run().unwrap();
        let mut wet_job = job(tone(1.0, 44100));
        wet_job.effects.reverb_wet = 0.6;
        let wet = wet_job.run().unwrap();
        assert_eq!(dry.bytes().len(), wet.bytes().len());
        assert_ne!(dry.bytes(), wet.bytes());
    }

    #[test]
    fn test_volume_scales_output() {
        let mut silent = job(tone(0.5, 44100));
        silent.volume = 0.0;
        let file = silent.run().unwrap();
        assert!(file.bytes()[WAV_HEADER_LEN..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_default_render_matches_source() {
        let source = tone(0.5, 44100);
        let file = job(source.clone()).run().unwrap();

        let reader = hound::WavReader::new(std::io::Cursor::new(file.into_bytes())).unwrap();
        let samples: Vec<i16> = reader.into_samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples.len(), source.samples().len());

        // Flat shelf, no pitch, no reverb, unity volume: plain quantization
        let pairs = samples.iter().zip(source.samples()).enumerate();
        for (i, (&got, &want)) in pairs.skip(1000).take(100) {
            let expected = (want * 32767.0).round() as i16;
            assert!((got - expected).abs() <= 2, "sample {}: {} vs {}", i, got, expected);
        }
    }

    #[test]
    fn test_empty_span() {
        let mut job = job(tone(1.0, 44100));
        job.region = Some(Region::new(0.5, Some(0.5), false));
        // A degenerate region means "no region": the whole track renders
        assert_eq!(job.output_frames(), 44100);

        let empty = RenderJob {
            source: Arc::new(SourceBuffer::from_interleaved(vec![0.0; 2], 2, 44100).unwrap()),
            rate: 4.0,
            ..job
        };
        // One source frame at 4x rounds to zero output frames
        assert!(matches!(empty.run(), Err(RenderError::EmptySpan)));
    }

    #[tokio::test]
    async fn test_save_is_atomic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.wav");
        let file = job(tone(0.1, 44100)).run().unwrap();

        file.save(&path).await.unwrap();
        let written = std::fs::read(&path).unwrap();
        assert_eq!(written, file.bytes());
        assert!(!dir.path().join("out.wav.part").exists());

        let missing = dir.path().join("no-such-dir").join("out.wav");
        assert!(file.save(&missing).await.is_err());
        assert!(!missing.exists());
    }

    #[test]
    fn test_options_wire_format() {
        let options: RenderOptions = serde_json::from_str(r#"{"rate": 0.85}"#).unwrap();
        assert_eq!(options.rate, Some(0.85));
        assert!(options.region.is_none());
        assert_eq!(RenderOptions::whole_track().region, Some(Region::full(false)));
    }
}

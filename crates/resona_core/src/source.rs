//! Source Buffers
//!
//! A decoded, immutable track: interleaved f32 samples plus format. Each
//! buffer gets a process-unique id so stale seek continuations can tell a
//! replaced source from the current one.

use std::io::Cursor;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, warn};

use crate::error::LoadError;

static NEXT_SOURCE_ID: AtomicU64 = AtomicU64::new(1);

/// Decoded audio owned by the playback controller
#[derive(Debug)]
pub struct SourceBuffer {
    id: u64,
    samples: Vec<f32>,
    channels: usize,
    sample_rate: u32,
}

impl SourceBuffer {
    /// Wrap already-decoded interleaved samples
    pub fn from_interleaved(
        samples: Vec<f32>,
        channels: usize,
        sample_rate: u32,
    ) -> Result<Self, LoadError> {
        if channels == 0 || sample_rate == 0 {
            return Err(LoadError::Decode(format!(
                "invalid format: {} channels at {}Hz",
                channels, sample_rate
            )));
        }
        if samples.len() < channels {
            return Err(LoadError::NoFrames);
        }

        let mut samples = samples;
        samples.truncate(samples.len() - samples.len() % channels);

        Ok(Self {
            id: NEXT_SOURCE_ID.fetch_add(1, Ordering::Relaxed),
            samples,
            channels,
            sample_rate,
        })
    }

    /// Decode an encoded file (WAV, FLAC, OGG/Vorbis, MP3)
    pub fn decode(data: Arc<[u8]>) -> Result<Self, LoadError> {
        if data.is_empty() {
            return Err(LoadError::Empty);
        }

        let mss = MediaSourceStream::new(Box::new(Cursor::new(data)), Default::default());

        let probed = symphonia::default::get_probe()
            .format(
                &Hint::new(),
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| LoadError::UnsupportedFormat(e.to_string()))?;

        let mut format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| LoadError::UnsupportedFormat("no audio track".to_string()))?;

        let track_id = track.id;
        let codec_params = track.codec_params.clone();

        let mut decoder = symphonia::default::get_codecs()
            .make(&codec_params, &DecoderOptions::default())
            .map_err(|e| LoadError::UnsupportedFormat(e.to_string()))?;

        let mut samples: Vec<f32> = Vec::new();
        let mut channels = codec_params.channels.map(|c| c.count()).unwrap_or(0);
        let mut sample_rate = codec_params.sample_rate.unwrap_or(0);

        loop {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break;
                }
                Err(SymphoniaError::ResetRequired) => break,
                Err(e) => return Err(LoadError::Decode(e.to_string())),
            };

            if packet.track_id() != track_id {
                continue;
            }

            match decoder.decode(&packet) {
                Ok(decoded) => {
                    let spec = *decoded.spec();
                    channels = spec.channels.count();
                    sample_rate = spec.rate;

                    let mut sample_buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                    sample_buf.copy_interleaved_ref(decoded);
                    samples.extend_from_slice(sample_buf.samples());
                }
                Err(SymphoniaError::DecodeError(e)) => {
                    // Corrupt packet: skip it and keep going
                    warn!("Skipping undecodable packet: {}", e);
                }
                Err(e) => return Err(LoadError::Decode(e.to_string())),
            }
        }

        if samples.is_empty() {
            return Err(LoadError::NoFrames);
        }

        let buffer = Self::from_interleaved(samples, channels, sample_rate)?;
        debug!(
            "Decoded {} frames ({} ch @ {}Hz, {:.2}s)",
            buffer.frames(),
            buffer.channels,
            buffer.sample_rate,
            buffer.duration()
        );
        Ok(buffer)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Interleaved samples
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels
    }

    /// Length in seconds
    pub fn duration(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wav::encode_wav;

    fn sine_wav(seconds: f32, sample_rate: u32) -> Vec<u8> {
        let frames = (seconds * sample_rate as f32) as usize;
        let samples: Vec<f32> = (0..frames)
            .flat_map(|i| {
                let s = (2.0 * std::f32::consts::PI * 440.0 * i as f32 / sample_rate as f32).sin()
                    * 0.5;
                [s, -s]
            })
            .collect();
        encode_wav(&samples, sample_rate, 2).unwrap()
    }

    #[test]
    fn test_from_interleaved() {
        let buf = SourceBuffer::from_interleaved(vec![0.0; 88200], 2, 44100).unwrap();
        assert_eq!(buf.frames(), 44100);
        assert!((buf.duration() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_partial_frame_is_dropped() {
        let buf = SourceBuffer::from_interleaved(vec![0.0; 5], 2, 44100).unwrap();
        assert_eq!(buf.samples().len(), 4);
    }

    #[test]
    fn test_ids_are_unique() {
        let a = SourceBuffer::from_interleaved(vec![0.0; 2], 1, 8000).unwrap();
        let b = SourceBuffer::from_interleaved(vec![0.0; 2], 1, 8000).unwrap();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_invalid_format() {
        assert!(matches!(
            SourceBuffer::from_interleaved(vec![0.0; 4], 0, 44100),
            Err(LoadError::Decode(_))
        ));
        assert!(matches!(
            SourceBuffer::from_interleaved(vec![], 2, 44100),
            Err(LoadError::NoFrames)
        ));
    }

    #[test]
    fn test_decode_wav() {
        let wav = sine_wav(0.5, 44100);
        let buf = SourceBuffer::decode(wav.into()).unwrap();
        assert_eq!(buf.channels(), 2);
        assert_eq!(buf.sample_rate(), 44100);
        assert_eq!(buf.frames(), 22050);

        // Right channel is the inverted left
        let s = buf.samples();
        assert!((s[200] + s[201]).abs() < 1e-3);
    }

    #[test]
    fn test_decode_empty() {
        assert!(matches!(
            SourceBuffer::decode(Vec::<u8>::new().into()),
            Err(LoadError::Empty)
        ));
    }

    #[test]
    fn test_decode_garbage() {
        let garbage: Vec<u8> = (0..4096).map(|i| (i * 31 % 251) as u8).collect();
        assert!(SourceBuffer::decode(garbage.into()).is_err());
    }
}

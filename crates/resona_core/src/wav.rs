//! WAV Encoding
//!
//! Canonical 44-byte header, 16-bit signed little-endian PCM, written
//! through hound.

use std::io::Cursor;

/// Size of the canonical RIFF/WAVE header
pub const WAV_HEADER_LEN: usize = 44;

/// Quantize a float sample to 16-bit, clamping to [-1, 1] first
#[inline]
pub fn quantize(sample: f32) -> i16 {
    let s = if sample.is_nan() { 0.0 } else { sample.clamp(-1.0, 1.0) };
    (s * 32767.0).round() as i16
}

/// Encode interleaved float samples as a 16-bit PCM WAV file
pub fn encode_wav(
    samples: &[f32],
    sample_rate: u32,
    channels: u16,
) -> Result<Vec<u8>, hound::Error> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut output = Vec::with_capacity(WAV_HEADER_LEN + samples.len() * 2);
    let mut writer = hound::WavWriter::new(Cursor::new(&mut output), spec)?;
    for &sample in samples {
        writer.write_sample(quantize(sample))?;
    }
    writer.finalize()?;

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn u32_at(bytes: &[u8], offset: usize) -> u32 {
        u32::from_le_bytes([
            bytes[offset],
            bytes[offset + 1],
            bytes[offset + 2],
            bytes[offset + 3],
        ])
    }

    fn u16_at(bytes: &[u8], offset: usize) -> u16 {
        u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
    }

    #[test]
    fn test_header_layout() {
        let wav = encode_wav(&[0.0; 8], 44100, 2).unwrap();

        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        assert_eq!(&wav[12..16], b"fmt ");
        assert_eq!(&wav[36..40], b"data");

        assert_eq!(u32_at(&wav, 4), 36 + 16);
        assert_eq!(u16_at(&wav, 20), 1); // PCM
        assert_eq!(u16_at(&wav, 22), 2); // channels
        assert_eq!(u32_at(&wav, 24), 44100);
        assert_eq!(u32_at(&wav, 28), 44100 * 4); // byte rate
        assert_eq!(u16_at(&wav, 32), 4); // block align
        assert_eq!(u16_at(&wav, 34), 16);
        assert_eq!(u32_at(&wav, 40), 16); // data size
        assert_eq!(wav.len(), WAV_HEADER_LEN + 16);
    }

    #[test]
    fn test_quantize_clamps() {
        assert_eq!(quantize(0.0), 0);
        assert_eq!(quantize(1.0), 32767);
        assert_eq!(quantize(-1.0), -32767);
        assert_eq!(quantize(4.0), 32767);
        assert_eq!(quantize(-4.0), -32767);
        assert_eq!(quantize(0.5), 16384);
        assert_eq!(quantize(f32::NAN), 0);
    }

    #[test]
    fn test_readable_by_hound() {
        let samples = [0.25, -0.25, 0.5, -0.5, 1.5, -1.5];
        let wav = encode_wav(&samples, 22050, 2).unwrap();

        let reader = hound::WavReader::new(std::io::Cursor::new(wav)).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 2);
        assert_eq!(spec.sample_rate, 22050);
        assert_eq!(spec.bits_per_sample, 16);
        assert_eq!(spec.sample_format, hound::SampleFormat::Int);

        let decoded: Vec<i16> = reader.into_samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(decoded, vec![8192, -8192, 16384, -16384, 32767, -32767]);
    }
}

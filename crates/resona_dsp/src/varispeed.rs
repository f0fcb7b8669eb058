//! Varispeed Reading
//!
//! Rate-adjusted playback reads the source at a fractional frame position
//! that advances by `rate * source_rate / output_rate` per output frame.
//! Like tape varispeed, pitch follows rate. Both the live voice and the
//! offline renderer read through [`read_frame`].

/// Read a stereo frame at a fractional position with linear interpolation
///
/// `samples` is interleaved with `channels` channels. Mono sources are
/// duplicated to both sides; sources with more than two channels use the
/// first two. Returns `None` once `position` is past the last frame.
#[inline]
pub fn read_frame(samples: &[f32], channels: usize, position: f64) -> Option<(f32, f32)> {
    if channels == 0 || !(position >= 0.0) {
        return None;
    }

    let frames = samples.len() / channels;
    let index = position.floor() as usize;
    if index >= frames {
        return None;
    }

    let frac = (position - index as f64) as f32;
    let a = frame_at(samples, channels, index);
    if frac == 0.0 || index + 1 >= frames {
        return Some(a);
    }

    let b = frame_at(samples, channels, index + 1);
    Some((a.0 + (b.0 - a.0) * frac, a.1 + (b.1 - a.1) * frac))
}

#[inline]
fn frame_at(samples: &[f32], channels: usize, index: usize) -> (f32, f32) {
    let base = index * channels;
    let left = samples[base];
    let right = if channels > 1 { samples[base + 1] } else { left };
    (left, right)
}

/// Source frames advanced per output frame
#[inline]
pub fn playback_step(rate: f64, source_rate: u32, output_rate: u32) -> f64 {
    rate * source_rate as f64 / output_rate.max(1) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_positions() {
        let samples = [0.1, 0.2, 0.3, 0.4];
        assert_eq!(read_frame(&samples, 2, 0.0), Some((0.1, 0.2)));
        assert_eq!(read_frame(&samples, 2, 1.0), Some((0.3, 0.4)));
        assert_eq!(read_frame(&samples, 2, 2.0), None);
    }

    #[test]
    fn test_interpolates_between_frames() {
        let samples = [0.0, 1.0, 1.0, 0.0];
        let (l, r) = read_frame(&samples, 2, 0.25).unwrap();
        assert!((l - 0.25).abs() < 1e-6);
        assert!((r - 0.75).abs() < 1e-6);
    }

    #[test]
    fn test_mono_is_duplicated() {
        let samples = [0.5, -0.5];
        assert_eq!(read_frame(&samples, 1, 1.0), Some((-0.5, -0.5)));
    }

    #[test]
    fn test_multichannel_uses_front_pair() {
        let samples = [0.1, 0.2, 0.9, 0.9, 0.3, 0.4, 0.9, 0.9];
        assert_eq!(read_frame(&samples, 4, 1.0), Some((0.3, 0.4)));
    }

    #[test]
    fn test_last_frame_holds() {
        let samples = [0.1, 0.2, 0.3, 0.4];
        assert_eq!(read_frame(&samples, 2, 1.5), Some((0.3, 0.4)));
    }

    #[test]
    fn test_negative_and_nan_positions() {
        let samples = [0.1, 0.2];
        assert_eq!(read_frame(&samples, 2, -1.0), None);
        assert_eq!(read_frame(&samples, 2, f64::NAN), None);
        assert_eq!(read_frame(&samples, 0, 0.0), None);
    }

    #[test]
    fn test_playback_step() {
        assert_eq!(playback_step(1.0, 44100, 44100), 1.0);
        assert_eq!(playback_step(2.0, 48000, 48000), 2.0);
        assert!((playback_step(1.0, 44100, 48000) - 0.91875).abs() < 1e-9);
    }
}

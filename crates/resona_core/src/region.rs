//! Playback Regions

use serde::{Deserialize, Serialize};

/// A playable sub-range of a track, optionally looping
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Region {
    /// Start, seconds
    pub start: f64,
    /// End, seconds; `None` means the end of the track
    pub end: Option<f64>,
    /// Restart at `start` on reaching the end
    #[serde(rename = "loop")]
    pub looping: bool,
}

impl Region {
    pub fn new(start: f64, end: Option<f64>, looping: bool) -> Self {
        Self {
            start,
            end,
            looping,
        }
    }

    /// Whole-track region
    pub fn full(looping: bool) -> Self {
        Self::new(0.0, None, looping)
    }

    /// Fit the region to a track of `duration` seconds
    ///
    /// Bounds are clamped to `[0, duration]` and put in order. Returns
    /// `None` (no region) when the duration is unknown, a bound is not a
    /// number, or the clamped span is empty.
    pub fn clamped(self, duration: f64) -> Option<Region> {
        if !(duration > 0.0) || !self.start.is_finite() {
            return None;
        }
        if matches!(self.end, Some(end) if end.is_nan()) {
            return None;
        }

        let mut start = self.start.clamp(0.0, duration);
        let mut end = self.end.map(|e| e.clamp(0.0, duration));
        if let Some(e) = end {
            if e < start {
                end = Some(start);
                start = e;
            }
        }

        let region = Region {
            start,
            end,
            looping: self.looping,
        };
        if region.effective_end(duration) <= start {
            return None;
        }
        Some(region)
    }

    pub fn effective_end(&self, duration: f64) -> f64 {
        self.end.unwrap_or(duration)
    }

    /// Whether `position` lies in `[start, end]`
    pub fn contains(&self, position: f64, duration: f64) -> bool {
        position >= self.start && position <= self.effective_end(duration)
    }

    pub fn length(&self, duration: f64) -> f64 {
        (self.effective_end(duration) - self.start).max(0.0)
    }
}

/// Effective playback bounds for an optional region
pub fn bounds(region: Option<&Region>, duration: f64) -> (f64, f64) {
    match region {
        Some(r) => (r.start, r.effective_end(duration)),
        None => (0.0, duration),
    }
}

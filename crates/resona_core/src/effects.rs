//! Effect Settings and Presets
//!
//! `EffectSettings` is always fully defined. Every write goes through
//! [`EffectKey::sanitize`], so out-of-range values are clamped and
//! non-finite values are refused rather than stored.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The live-adjustable effect parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectSettings {
    /// Reverb mix control, 0..1 (shaped by a perceptual curve downstream)
    pub reverb_wet: f32,
    /// Reverb size, 0..1
    pub room_size: f32,
    /// Reverb high-frequency damping corner, Hz
    pub dampening: f32,
    /// Low-shelf gain, dB
    pub bass_gain: f32,
    /// Pitch shift, semitones
    pub pitch: f32,
}

impl Default for EffectSettings {
    fn default() -> Self {
        Self {
            reverb_wet: 0.0,
            room_size: 0.5,
            dampening: 3000.0,
            bass_gain: 0.0,
            pitch: 0.0,
        }
    }
}

impl EffectSettings {
    pub fn get(&self, key: EffectKey) -> f32 {
        match key {
            EffectKey::ReverbWet => self.reverb_wet,
            EffectKey::RoomSize => self.room_size,
            EffectKey::Dampening => self.dampening,
            EffectKey::BassGain => self.bass_gain,
            EffectKey::Pitch => self.pitch,
        }
    }

    /// Store a value for `key`, clamped to its range
    ///
    /// Returns the stored value, or `None` if `value` was not finite.
    pub fn set(&mut self, key: EffectKey, value: f32) -> Option<f32> {
        let value = key.sanitize(value)?;
        let slot = match key {
            EffectKey::ReverbWet => &mut self.reverb_wet,
            EffectKey::RoomSize => &mut self.room_size,
            EffectKey::Dampening => &mut self.dampening,
            EffectKey::BassGain => &mut self.bass_gain,
            EffectKey::Pitch => &mut self.pitch,
        };
        *slot = value;
        Some(value)
    }

    /// Copy with every field clamped; non-finite fields fall back to defaults
    pub fn sanitized(&self) -> Self {
        let defaults = Self::default();
        let mut out = defaults;
        for key in EffectKey::ALL {
            if out.set(key, self.get(key)).is_none() {
                out.set(key, defaults.get(key));
            }
        }
        out
    }

    /// (key, value) pairs in graph order
    pub fn iter(&self) -> impl Iterator<Item = (EffectKey, f32)> + '_ {
        EffectKey::ALL.into_iter().map(move |key| (key, self.get(key)))
    }
}

/// Identifies one effect parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EffectKey {
    ReverbWet,
    RoomSize,
    Dampening,
    BassGain,
    Pitch,
}

impl EffectKey {
    pub const ALL: [EffectKey; 5] = [
        EffectKey::BassGain,
        EffectKey::Pitch,
        EffectKey::ReverbWet,
        EffectKey::RoomSize,
        EffectKey::Dampening,
    ];

    /// Accepted (min, max)
    pub fn range(self) -> (f32, f32) {
        match self {
            EffectKey::ReverbWet => (0.0, 1.0),
            EffectKey::RoomSize => (0.0, 1.0),
            EffectKey::Dampening => (resona_dsp::MIN_DAMPENING_HZ, resona_dsp::MAX_DAMPENING_HZ),
            EffectKey::BassGain => (-resona_dsp::MAX_SHELF_GAIN_DB, resona_dsp::MAX_SHELF_GAIN_DB),
            EffectKey::Pitch => (
                -resona_dsp::MAX_PITCH_SEMITONES,
                resona_dsp::MAX_PITCH_SEMITONES,
            ),
        }
    }

    /// Clamp into range; `None` for NaN or infinity
    pub fn sanitize(self, value: f32) -> Option<f32> {
        if !value.is_finite() {
            return None;
        }
        let (min, max) = self.range();
        Some(value.clamp(min, max))
    }

    /// Wire name (camelCase)
    pub fn as_str(self) -> &'static str {
        match self {
            EffectKey::ReverbWet => "reverbWet",
            EffectKey::RoomSize => "roomSize",
            EffectKey::Dampening => "dampening",
            EffectKey::BassGain => "bassGain",
            EffectKey::Pitch => "pitch",
        }
    }
}

impl fmt::Display for EffectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EffectKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EffectKey::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("Unknown effect: {}", s))
    }
}

/// Partial update: only `Some` fields are written
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reverb_wet: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_size: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dampening: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bass_gain: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pitch: Option<f32>,
}

impl EffectPatch {
    pub fn get(&self, key: EffectKey) -> Option<f32> {
        match key {
            EffectKey::ReverbWet => self.reverb_wet,
            EffectKey::RoomSize => self.room_size,
            EffectKey::Dampening => self.dampening,
            EffectKey::BassGain => self.bass_gain,
            EffectKey::Pitch => self.pitch,
        }
    }

    pub fn with(mut self, key: EffectKey, value: f32) -> Self {
        let slot = match key {
            EffectKey::ReverbWet => &mut self.reverb_wet,
            EffectKey::RoomSize => &mut self.room_size,
            EffectKey::Dampening => &mut self.dampening,
            EffectKey::BassGain => &mut self.bass_gain,
            EffectKey::Pitch => &mut self.pitch,
        };
        *slot = Some(value);
        self
    }

    /// Present fields in graph order
    pub fn iter(&self) -> impl Iterator<Item = (EffectKey, f32)> + '_ {
        EffectKey::ALL
            .into_iter()
            .filter_map(move |key| self.get(key).map(|v| (key, v)))
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }
}

impl From<EffectSettings> for EffectPatch {
    fn from(settings: EffectSettings) -> Self {
        Self {
            reverb_wet: Some(settings.reverb_wet),
            room_size: Some(settings.room_size),
            dampening: Some(settings.dampening),
            bass_gain: Some(settings.bass_gain),
            pitch: Some(settings.pitch),
        }
    }
}

/// Named combination of effects and playback rate
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Preset {
    pub name: &'static str,
    pub label: &'static str,
    pub rate: f64,
    pub effects: EffectSettings,
}

/// Built-in presets
pub const PRESETS: [Preset; 4] = [
    Preset {
        name: "default",
        label: "Reset",
        rate: 1.0,
        effects: EffectSettings {
            reverb_wet: 0.0,
            room_size: 0.5,
            dampening: 3000.0,
            bass_gain: 0.0,
            pitch: 0.0,
        },
    },
    Preset {
        name: "slowedReverb",
        label: "Slowed + Reverb",
        rate: 0.85,
        effects: EffectSettings {
            reverb_wet: 0.45,
            room_size: 0.85,
            dampening: 2500.0,
            bass_gain: 3.0,
            pitch: 0.0,
        },
    },
    Preset {
        name: "bassBoost",
        label: "Bass Boost",
        rate: 1.0,
        effects: EffectSettings {
            reverb_wet: 0.0,
            room_size: 0.5,
            dampening: 3000.0,
            bass_gain: 9.0,
            pitch: 0.0,
        },
    },
    Preset {
        name: "nightcore",
        label: "Nightcore",
        rate: 1.25,
        effects: EffectSettings {
            reverb_wet: 0.0,
            room_size: 0.5,
            dampening: 3000.0,
            bass_gain: 2.0,
            pitch: 0.0,
        },
    },
];

/// Look up a preset by name (case-insensitive)
pub fn find_preset(name: &str) -> Option<&'static Preset> {
    PRESETS.iter().find(|p| p.name.eq_ignore_ascii_case(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let fx = EffectSettings::default();
        assert_eq!(fx.reverb_wet, 0.0);
        assert_eq!(fx.room_size, 0.5);
        assert_eq!(fx.dampening, 3000.0);
        assert_eq!(fx.bass_gain, 0.0);
        assert_eq!(fx.pitch, 0.0);
    }

    #[test]
    fn test_set_clamps() {
        let mut fx = EffectSettings::default();
        assert_eq!(fx.set(EffectKey::BassGain, 40.0), Some(12.0));
        assert_eq!(fx.set(EffectKey::ReverbWet, -1.0), Some(0.0));
        assert_eq!(fx.set(EffectKey::Dampening, 20.0), Some(500.0));
        assert_eq!(fx.set(EffectKey::Pitch, -30.0), Some(-24.0));
        assert_eq!(fx.bass_gain, 12.0);
        assert_eq!(fx.pitch, -24.0);
    }

    #[test]
    fn test_non_finite_refused() {
        let mut fx = EffectSettings::default();
        assert_eq!(fx.set(EffectKey::RoomSize, f32::NAN), None);
        assert_eq!(fx.room_size, 0.5);
        assert_eq!(fx.set(EffectKey::Pitch, f32::INFINITY), None);
    }

    #[test]
    fn test_sanitized() {
        let wild = EffectSettings {
            reverb_wet: 3.0,
            room_size: f32::NAN,
            dampening: 1e9,
            bass_gain: -99.0,
            pitch: 1.5,
        };
        let clean = wild.sanitized();
        assert_eq!(clean.reverb_wet, 1.0);
        assert_eq!(clean.room_size, 0.5);
        assert_eq!(clean.dampening, 10000.0);
        assert_eq!(clean.bass_gain, -12.0);
        assert_eq!(clean.pitch, 1.5);
    }

    #[test]
    fn test_camel_case_wire_format() {
        let json = serde_json::to_string(&EffectSettings::default()).unwrap();
        assert!(json.contains("reverbWet"));
        assert!(json.contains("bassGain"));

        let patch: EffectPatch = serde_json::from_str(r#"{"bassGain": 4}"#).unwrap();
        assert_eq!(patch.bass_gain, Some(4.0));
        assert_eq!(patch.pitch, None);
    }

    #[test]
    fn test_key_parsing() {
        assert_eq!("reverbWet".parse::<EffectKey>(), Ok(EffectKey::ReverbWet));
        assert_eq!("BASSGAIN".parse::<EffectKey>(), Ok(EffectKey::BassGain));
        assert!("volume".parse::<EffectKey>().is_err());
        assert_eq!(EffectKey::RoomSize.to_string(), "roomSize");
    }

    #[test]
    fn test_patch_iteration() {
        let patch = EffectPatch::default()
            .with(EffectKey::Pitch, 3.0)
            .with(EffectKey::ReverbWet, 0.2);
        let pairs: Vec<_> = patch.iter().collect();
        assert_eq!(pairs, vec![(EffectKey::Pitch, 3.0), (EffectKey::ReverbWet, 0.2)]);
        assert!(EffectPatch::default().is_empty());

        let full: EffectPatch = EffectSettings::default().into();
        assert_eq!(full.iter().count(), 5);
    }

    #[test]
    fn test_presets_are_in_range() {
        for preset in PRESETS.iter() {
            assert_eq!(preset.effects, preset.effects.sanitized(), "{}", preset.name);
            assert!((0.25..=4.0).contains(&preset.rate));
        }
    }

    #[test]
    fn test_find_preset() {
        assert_eq!(find_preset("nightcore").map(|p| p.rate), Some(1.25));
        assert_eq!(find_preset("SLOWEDREVERB").map(|p| p.name), Some("slowedReverb"));
        assert!(find_preset("vaporwave").is_none());
        assert_eq!(find_preset("default").map(|p| p.effects), Some(EffectSettings::default()));
    }
}

//! Effect Graph
//!
//! Fixed live chain:
//!
//! ```text
//! voice ─▶ low shelf ─▶ pitch ─▶ reverb ─▶ fade gain ─▶ master gain ─▶ tap ─▶ out
//! ```
//!
//! The graph is split in two. [`EffectGraph`] lives on the control side and
//! pushes [`GraphCommand`]s into an rtrb ring; [`GraphProcessor`] lives on
//! the audio thread, drains the ring at the top of every callback and runs
//! the chain. The topology never changes; only the voice is swapped.
//!
//! Connecting over an audible voice crossfades the two reads over the
//! fade-in length instead of cutting, so loop wraps and region jumps are
//! click-free.
//!
//! Sources retired by the audio thread are sent back on a second ring so the
//! final `Arc` drop (and the sample buffer's deallocation) happens on the
//! control side.

use std::sync::Arc;

use rtrb::{Consumer, Producer, PushError, RingBuffer};
use tracing::{debug, warn};

use resona_dsp::{
    perceptual_wet, playback_step, read_frame, AnalyserTap, Coefficients, DspError, GainRamp,
    LowShelf, PitchShifter, Reverb, SpectrumAnalyzer,
};

use crate::effects::{EffectKey, EffectSettings};
use crate::error::GraphError;
use crate::source::SourceBuffer;

/// Retired sources waiting for the control side to drop them
const GARBAGE_CAPACITY: usize = 16;

/// Master gain changes ramp over this long to avoid zipper noise
const MASTER_RAMP_SECONDS: f32 = 0.01;

/// Messages from the control side to the audio thread
pub enum GraphCommand {
    /// Replace the voice, crossfading if one is sounding; `position` is in
    /// source frames
    Connect {
        source: Arc<SourceBuffer>,
        position: f64,
        fade_in: u32,
    },
    /// Fade the voice out, then drop it
    Release { fade_out: u32 },
    /// Drop the voice immediately
    Disconnect,
    SetRate(f64),
    SetShelf {
        gain_db: f32,
        coefficients: Coefficients<f32>,
    },
    SetPitch(f32),
    SetReverb { room: f32, damp: f32, wet: f32 },
    SetMasterGain(f32),
}

/// Parameters most recently written to the graph nodes
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeParams {
    pub shelf_gain_db: f32,
    pub pitch_semitones: f32,
    pub room_size: f32,
    pub dampening_hz: f32,
    /// After the perceptual curve
    pub reverb_wet: f32,
    pub master_gain: f32,
    pub rate: f64,
}

impl Default for NodeParams {
    fn default() -> Self {
        let fx = EffectSettings::default();
        Self {
            shelf_gain_db: fx.bass_gain,
            pitch_semitones: fx.pitch,
            room_size: fx.room_size,
            dampening_hz: fx.dampening,
            reverb_wet: perceptual_wet(fx.reverb_wet),
            master_gain: 1.0,
            rate: 1.0,
        }
    }
}

/// Control-side handle to the live graph
pub struct EffectGraph {
    commands: Producer<GraphCommand>,
    garbage: Consumer<Arc<SourceBuffer>>,
    analyzer: SpectrumAnalyzer,
    params: NodeParams,
    sample_rate: u32,
}

impl EffectGraph {
    /// Build a connected control/audio pair
    pub fn new(
        sample_rate: u32,
        channels: usize,
        capacity: usize,
        analyzer_fps: u32,
    ) -> Result<(EffectGraph, GraphProcessor), DspError> {
        let sr = sample_rate as f32;
        let (commands, command_rx) = RingBuffer::<GraphCommand>::new(capacity.max(1));
        let (garbage_tx, garbage) = RingBuffer::<Arc<SourceBuffer>>::new(GARBAGE_CAPACITY);
        let (analyzer, tap) = SpectrumAnalyzer::new(sr, analyzer_fps);
        let params = NodeParams::default();

        let mut reverb = Reverb::new(sr)?;
        reverb.set_params(params.room_size, params.dampening_hz, params.reverb_wet);

        let processor = GraphProcessor {
            commands: command_rx,
            garbage: garbage_tx,
            voice: None,
            outgoing: None,
            crossfade: GainRamp::new(0.0),
            rate: params.rate,
            sample_rate,
            channels: channels.max(1),
            shelf: LowShelf::with_gain(sr, params.shelf_gain_db)?,
            pitch: PitchShifter::new(sr)?,
            reverb,
            fade: GainRamp::new(0.0),
            master: GainRamp::new(params.master_gain),
            master_ramp_frames: (sr * MASTER_RAMP_SECONDS) as u32,
            tap,
        };

        let graph = EffectGraph {
            commands,
            garbage,
            analyzer,
            params,
            sample_rate,
        };

        Ok((graph, processor))
    }

    fn send(&mut self, command: GraphCommand) -> Result<(), GraphError> {
        if self.commands.is_abandoned() {
            return Err(GraphError::Detached);
        }
        match self.commands.push(command) {
            Ok(()) => Ok(()),
            Err(PushError::Full(_)) => Err(GraphError::QueueFull),
        }
    }

    fn send_logged(&mut self, what: &str, command: GraphCommand) -> bool {
        match self.send(command) {
            Ok(()) => true,
            Err(e) => {
                warn!("Graph {} dropped: {}", what, e);
                false
            }
        }
    }

    /// Start `source` at `position` seconds with a fade-in
    pub fn connect(&mut self, source: Arc<SourceBuffer>, position: f64, fade_in: u32) -> bool {
        self.collect_garbage();
        let position = position.max(0.0) * source.sample_rate() as f64;
        self.send_logged(
            "connect",
            GraphCommand::Connect {
                source,
                position,
                fade_in,
            },
        )
    }

    /// Fade the current voice out and stop it
    pub fn release(&mut self, fade_out: u32) -> bool {
        self.send_logged("release", GraphCommand::Release { fade_out })
    }

    /// Stop the current voice without a fade
    pub fn disconnect(&mut self) -> bool {
        self.collect_garbage();
        self.send_logged("disconnect", GraphCommand::Disconnect)
    }

    pub fn set_rate(&mut self, rate: f64) -> bool {
        let sent = self.send_logged("rate change", GraphCommand::SetRate(rate));
        if sent {
            self.params.rate = rate;
        }
        sent
    }

    pub fn set_master_gain(&mut self, gain: f32) -> bool {
        let sent = self.send_logged("master gain", GraphCommand::SetMasterGain(gain));
        if sent {
            self.params.master_gain = gain;
        }
        sent
    }

    /// Clamp and apply one effect parameter to its node
    pub fn try_set_parameter(&mut self, key: EffectKey, value: f32) -> Result<(), GraphError> {
        let value = key.sanitize(value).ok_or(GraphError::NonFinite(key))?;
        let p = self.params;

        match key {
            EffectKey::BassGain => {
                let coefficients = LowShelf::coefficients(self.sample_rate as f32, value)
                    .map_err(|_| GraphError::Coefficients)?;
                self.send(GraphCommand::SetShelf {
                    gain_db: value,
                    coefficients,
                })?;
                self.params.shelf_gain_db = value;
            }
            EffectKey::Pitch => {
                self.send(GraphCommand::SetPitch(value))?;
                self.params.pitch_semitones = value;
            }
            EffectKey::ReverbWet => {
                let wet = perceptual_wet(value);
                self.send(GraphCommand::SetReverb {
                    room: p.room_size,
                    damp: p.dampening_hz,
                    wet,
                })?;
                self.params.reverb_wet = wet;
            }
            EffectKey::RoomSize => {
                self.send(GraphCommand::SetReverb {
                    room: value,
                    damp: p.dampening_hz,
                    wet: p.reverb_wet,
                })?;
                self.params.room_size = value;
            }
            EffectKey::Dampening => {
                self.send(GraphCommand::SetReverb {
                    room: p.room_size,
                    damp: value,
                    wet: p.reverb_wet,
                })?;
                self.params.dampening_hz = value;
            }
        }
        Ok(())
    }

    /// Best-effort parameter write: failures are logged, never raised
    pub fn set_parameter(&mut self, key: EffectKey, value: f32) -> bool {
        match self.try_set_parameter(key, value) {
            Ok(()) => true,
            Err(e) => {
                warn!("Effect {} = {} not applied: {}", key, value, e);
                false
            }
        }
    }

    /// Apply every key; returns false if any write failed
    pub fn set_all(&mut self, settings: &EffectSettings) -> bool {
        settings
            .iter()
            .fold(true, |ok, (key, value)| self.set_parameter(key, value) && ok)
    }

    /// Latest spectrum snapshot (log-spaced magnitudes, 0..1)
    pub fn read_analysis(&self) -> Vec<f32> {
        self.analyzer.update();
        self.analyzer.snapshot()
    }

    /// Drop sources the audio thread has retired
    pub fn collect_garbage(&mut self) -> usize {
        let mut count = 0;
        while let Ok(source) = self.garbage.pop() {
            drop(source);
            count += 1;
        }
        if count > 0 {
            debug!("Released {} retired source(s)", count);
        }
        count
    }

    pub fn params(&self) -> &NodeParams {
        &self.params
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Whether the audio side has been dropped
    pub fn is_detached(&self) -> bool {
        self.commands.is_abandoned()
    }
}

struct Voice {
    source: Arc<SourceBuffer>,
    position: f64,
    step: f64,
    releasing: bool,
}

/// Audio-thread half of the graph
pub struct GraphProcessor {
    commands: Consumer<GraphCommand>,
    garbage: Producer<Arc<SourceBuffer>>,
    voice: Option<Voice>,
    /// Voice being crossfaded out after a splice
    outgoing: Option<Voice>,
    crossfade: GainRamp,
    rate: f64,
    sample_rate: u32,
    channels: usize,
    shelf: LowShelf,
    pitch: PitchShifter,
    reverb: Reverb,
    fade: GainRamp,
    master: GainRamp,
    master_ramp_frames: u32,
    tap: AnalyserTap,
}

impl GraphProcessor {
    /// Fill an interleaved output buffer
    ///
    /// # Real-time Safety
    /// No allocations and no locks beyond the tap's `try_lock`.
    pub fn process(&mut self, output: &mut [f32]) {
        while let Ok(command) = self.commands.pop() {
            self.apply(command);
        }

        let channels = self.channels;
        for frame in output.chunks_mut(channels) {
            let (mut l, mut r) = self.next_source_frame();

            (l, r) = self.shelf.process_sample(l, r);
            (l, r) = self.pitch.process_sample(l, r);
            (l, r) = self.reverb.process_sample(l, r);

            let gain = self.fade.next() * self.master.next();
            l *= gain;
            r *= gain;

            self.tap.push_sample(l, r);

            match frame.len() {
                1 => frame[0] = (l + r) * 0.5,
                _ => {
                    frame[0] = l;
                    frame[1] = r;
                    frame[2..].fill(0.0);
                }
            }

            let released = self
                .voice
                .as_ref()
                .is_some_and(|v| v.releasing && !self.fade.is_ramping());
            if released {
                self.retire_voice();
                self.retire_outgoing();
            }
        }
    }

    #[inline]
    fn next_source_frame(&mut self) -> (f32, f32) {
        let (l, r) = match Self::advance(self.voice.as_mut()) {
            Some(frame) => frame,
            None => {
                self.retire_voice();
                (0.0, 0.0)
            }
        };
        if self.outgoing.is_none() {
            return (l, r);
        }

        let x = self.crossfade.next();
        let (ol, or) = match Self::advance(self.outgoing.as_mut()) {
            Some(frame) => frame,
            None => {
                self.retire_outgoing();
                (0.0, 0.0)
            }
        };
        if !self.crossfade.is_ramping() {
            self.retire_outgoing();
        }
        (l * (1.0 - x) + ol * x, r * (1.0 - x) + or * x)
    }

    /// Read one frame and step the read head; `None` past the end
    #[inline]
    fn advance(voice: Option<&mut Voice>) -> Option<(f32, f32)> {
        let voice = voice?;
        let frame = read_frame(voice.source.samples(), voice.source.channels(), voice.position)?;
        voice.position += voice.step;
        Some(frame)
    }

    fn apply(&mut self, command: GraphCommand) {
        match command {
            GraphCommand::Connect {
                source,
                position,
                fade_in,
            } => {
                let audible = self.voice.is_some() && self.fade.value() > 0.0;
                self.retire_outgoing();
                if audible && fade_in > 0 {
                    self.outgoing = self.voice.take();
                    self.crossfade.set(1.0);
                    self.crossfade.ramp_to(0.0, fade_in);
                } else {
                    self.retire_voice();
                    self.fade.set(0.0);
                }
                self.fade.ramp_to(1.0, fade_in);

                let step = playback_step(self.rate, source.sample_rate(), self.sample_rate);
                self.voice = Some(Voice {
                    source,
                    position,
                    step,
                    releasing: false,
                });
            }
            GraphCommand::Release { fade_out } => {
                if let Some(voice) = self.voice.as_mut() {
                    voice.releasing = true;
                    self.fade.ramp_to(0.0, fade_out);
                }
            }
            GraphCommand::Disconnect => {
                self.retire_voice();
                self.retire_outgoing();
                self.fade.set(0.0);
            }
            GraphCommand::SetRate(rate) => {
                self.rate = rate;
                for voice in self.voice.iter_mut().chain(self.outgoing.iter_mut()) {
                    voice.step = playback_step(rate, voice.source.sample_rate(), self.sample_rate);
                }
            }
            GraphCommand::SetShelf {
                gain_db,
                coefficients,
            } => self.shelf.apply(gain_db, coefficients),
            GraphCommand::SetPitch(semitones) => self.pitch.set_semitones(semitones),
            GraphCommand::SetReverb { room, damp, wet } => self.reverb.set_params(room, damp, wet),
            GraphCommand::SetMasterGain(gain) => self.master.ramp_to(gain, self.master_ramp_frames),
        }
    }

    fn retire_voice(&mut self) {
        if let Some(voice) = self.voice.take() {
            // If the control side is behind, the last reference drops here
            let _ = self.garbage.push(voice.source);
        }
    }

    fn retire_outgoing(&mut self) {
        if let Some(voice) = self.outgoing.take() {
            let _ = self.garbage.push(voice.source);
        }
    }

    pub fn is_connected(&self) -> bool {
        self.voice.is_some()
    }

    /// Whether a spliced-out voice is still fading under the new one
    pub fn is_crossfading(&self) -> bool {
        self.outgoing.is_some()
    }

    /// Voice read head, in source frames
    pub fn voice_position(&self) -> Option<f64> {
        self.voice.as_ref().map(|v| v.position)
    }

    pub fn fade_gain(&self) -> f32 {
        self.fade.value()
    }

    pub fn master_gain(&self) -> f32 {
        self.master.value()
    }

    pub fn shelf(&self) -> &LowShelf {
        &self.shelf
    }

    pub fn pitch(&self) -> &PitchShifter {
        &self.pitch
    }

    pub fn reverb(&self) -> &Reverb {
        &self.reverb
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

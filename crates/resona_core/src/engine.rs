//! Playback Engine - Main Entry Point
//!
//! `PlaybackEngine` owns one loaded source, the live effect graph and the
//! transport clock, and drives the playback state machine:
//!
//! ```text
//! Idle ─▶ Loading ─▶ Ready ⇄ Playing ⇄ Paused
//!                              │  ▲
//!                      seek ───┘  └─── splice
//!                     (Seeking)
//!                              │
//!                              ▼
//!                            Ended ─▶ Ready (seek) / Playing (play)
//! ```
//!
//! The engine is a cheap, cloneable handle. All controller state sits
//! behind one mutex; events are collected while it is held and dispatched
//! after it is released, so listeners may call straight back in.
//!
//! Seeks while playing are two-phase: the fade gain ramps down, and after
//! the settle delay a continuation splices a fresh voice in at the target
//! with a fade-in. Each continuation carries a generation number and the
//! source id it was issued for; a newer seek, a pause or a load supersedes
//! it and it does nothing.

use std::sync::{Arc, Weak};

use tokio::runtime::Handle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use resona_dsp::NUM_BINS;

use crate::clock::{clamp_rate, RuntimeClock, TimeSource, TransportClock};
use crate::config::EngineConfig;
use crate::effects::{find_preset, EffectKey, EffectPatch, EffectSettings};
use crate::error::{EngineError, EngineResult, LoadError, RenderError};
use crate::graph::{EffectGraph, NodeParams};
use crate::message::{EngineEvent, PlayerState};
use crate::notifier::{EventNotifier, Subscription};
use crate::region::{bounds, Region};
use crate::render::{RenderJob, RenderOptions, RenderedFile};
use crate::source::SourceBuffer;
use crate::stream::OutputStream;

/// Graph plus the stream driving its audio half
struct LiveOutput {
    graph: EffectGraph,
    _stream: OutputStream,
}

#[derive(Debug, Clone, Copy)]
struct PendingSeek {
    target: f64,
    source_id: u64,
    generation: u64,
}

struct Controller {
    state: PlayerState,
    source: Option<Arc<SourceBuffer>>,
    transport: TransportClock,
    effects: EffectSettings,
    region: Option<Region>,
    volume: f32,
    rate: f64,
    output: Option<LiveOutput>,
    load_ticket: u64,
    pending_loads: usize,
    seek: Option<PendingSeek>,
    seek_generation: u64,
    poller_active: bool,
    poller_generation: u64,
}

impl Controller {
    fn new() -> Self {
        Self {
            state: PlayerState::Idle,
            source: None,
            transport: TransportClock::new(0.0, 1.0),
            effects: EffectSettings::default(),
            region: None,
            volume: 1.0,
            rate: 1.0,
            output: None,
            load_ticket: 0,
            pending_loads: 0,
            seek: None,
            seek_generation: 0,
            poller_active: false,
            poller_generation: 0,
        }
    }

    fn graph(&mut self) -> Option<&mut EffectGraph> {
        self.output.as_mut().map(|o| &mut o.graph)
    }

    fn duration(&self) -> f64 {
        self.source.as_ref().map_or(0.0, |s| s.duration())
    }

    fn bounds(&self) -> (f64, f64) {
        bounds(self.region.as_ref(), self.duration())
    }

    fn set_state(&mut self, state: PlayerState, em: &mut Emitter<'_>) {
        if self.state != state {
            debug!("State {:?} -> {:?}", self.state, state);
            self.state = state;
            em.push(EngineEvent::StateChanged { state });
        }
    }

    fn position(&self, now: f64) -> f64 {
        match (self.state, self.seek) {
            (PlayerState::Seeking, Some(seek)) => seek.target,
            _ => self.transport.position_at(now),
        }
    }

    /// Start a fresh voice at `position` and run the transport from there
    fn splice(&mut self, now: f64, position: f64, fade: u32) {
        if let Some(source) = self.source.clone() {
            if let Some(graph) = self.graph() {
                graph.connect(source, position, fade);
            }
        }
        self.transport.set_offset(now, position);
        self.transport.start(now);
    }

    fn cancel_seek(&mut self) {
        if self.seek.take().is_some() {
            debug!("Pending seek cancelled");
        }
        self.seek_generation += 1;
    }

    fn stop_poller(&mut self) {
        self.poller_active = false;
        self.poller_generation += 1;
    }
}

/// Collects events while the controller is locked
struct Emitter<'a> {
    notifier: &'a EventNotifier,
    now: f64,
    events: Vec<EngineEvent>,
}

impl<'a> Emitter<'a> {
    fn new(notifier: &'a EventNotifier, now: f64) -> Self {
        Self {
            notifier,
            now,
            events: Vec::new(),
        }
    }

    fn push(&mut self, event: EngineEvent) {
        self.events.push(event);
    }

    /// Position update, subject to the throttle unless forced
    fn position(&mut self, seconds: f64, force: bool) {
        if self.notifier.position_due(self.now, force) {
            self.events.push(EngineEvent::Position { seconds });
        }
    }
}

/// Settles the pending-load count if `load` is dropped mid-decode
struct LoadGuard<'a> {
    engine: &'a PlaybackEngine,
    ticket: Option<u64>,
}

impl Drop for LoadGuard<'_> {
    fn drop(&mut self) {
        if let Some(ticket) = self.ticket.take() {
            self.engine.abandon_load(ticket);
        }
    }
}

struct EngineInner {
    config: EngineConfig,
    clock: Arc<dyn TimeSource>,
    notifier: EventNotifier,
    controller: Mutex<Controller>,
}

/// Handle to a playback engine
///
/// Clones share the same engine. There is no global instance: create one
/// and pass it to whatever needs it.
#[derive(Clone)]
pub struct PlaybackEngine {
    inner: Arc<EngineInner>,
}

impl PlaybackEngine {
    /// Create an engine on the runtime clock
    pub fn new(config: EngineConfig) -> EngineResult<Self> {
        Self::with_clock(config, Arc::new(RuntimeClock::new()))
    }

    /// Create an engine with an explicit time source
    pub fn with_clock(config: EngineConfig, clock: Arc<dyn TimeSource>) -> EngineResult<Self> {
        config.validate().map_err(EngineError::ConfigError)?;
        let notifier = EventNotifier::new(config.timing.position_throttle());

        info!(
            "Engine created ({:?} output, {}ms fade, {}ms seek settle)",
            config.output, config.timing.fade_ms, config.timing.seek_settle_ms
        );

        Ok(Self {
            inner: Arc::new(EngineInner {
                config,
                clock,
                notifier,
                controller: Mutex::new(Controller::new()),
            }),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    fn fade_frames(&self) -> u32 {
        let config = &self.inner.config;
        config.timing.fade_frames(config.stream.sample_rate)
    }

    /// Run `f` with the controller locked, then dispatch what it emitted
    ///
    /// The batch is queued before the lock is released, so observers on
    /// any thread see batches in the order the controller produced them.
    fn update<R>(&self, f: impl FnOnce(&mut Controller, &mut Emitter<'_>) -> R) -> R {
        let result = {
            let mut controller = self.inner.controller.lock();
            // Read under the lock so successive updates see ordered times
            let mut em = Emitter::new(&self.inner.notifier, self.inner.clock.now());
            let result = f(&mut controller, &mut em);
            self.inner.notifier.enqueue(std::mem::take(&mut em.events));
            result
        };
        self.inner.notifier.flush();
        result
    }

    // ---------------------------------------------------------------------
    // Loading
    // ---------------------------------------------------------------------

    /// Decode and load an encoded file; returns its duration in seconds
    ///
    /// Decoding happens before anything is torn down, so a failed load
    /// leaves the previous track (or `Idle`) untouched. When loads overlap,
    /// the last one issued wins and earlier ones fail with `Superseded`.
    pub async fn load(&self, data: impl Into<Arc<[u8]>>) -> Result<f64, LoadError> {
        let data: Arc<[u8]> = data.into();
        let ticket = self.begin_load();
        let mut guard = LoadGuard {
            engine: self,
            ticket: Some(ticket),
        };

        let decoded = match Handle::try_current() {
            Ok(handle) => handle
                .spawn_blocking(move || SourceBuffer::decode(data))
                .await
                .map_err(|e| LoadError::Task(e.to_string()))
                .and_then(|r| r),
            Err(_) => SourceBuffer::decode(data),
        };

        guard.ticket = None;
        self.finish_load(ticket, decoded)
    }

    /// Load an already-decoded source
    pub fn load_decoded(&self, source: SourceBuffer) -> Result<f64, LoadError> {
        let ticket = self.begin_load();
        self.finish_load(ticket, Ok(source))
    }

    fn begin_load(&self) -> u64 {
        self.update(|c, em| {
            c.load_ticket += 1;
            c.pending_loads += 1;
            if c.state == PlayerState::Idle {
                em.push(EngineEvent::StateChanged {
                    state: PlayerState::Loading,
                });
            }
            c.load_ticket
        })
    }

    fn finish_load(
        &self,
        ticket: u64,
        decoded: Result<SourceBuffer, LoadError>,
    ) -> Result<f64, LoadError> {
        self.update(|c, em| {
            c.pending_loads = c.pending_loads.saturating_sub(1);

            if ticket != c.load_ticket {
                debug!("Load {} superseded by {}", ticket, c.load_ticket);
                return Err(LoadError::Superseded);
            }

            let source = match decoded {
                Ok(source) => source,
                Err(e) => {
                    warn!("Load failed: {}", e);
                    if c.state == PlayerState::Idle {
                        em.push(EngineEvent::StateChanged {
                            state: PlayerState::Idle,
                        });
                    }
                    em.push(EngineEvent::error(&e));
                    return Err(e);
                }
            };

            if let Err(e) = self.ensure_output(c) {
                warn!("Output unavailable: {}", e);
                em.push(EngineEvent::error(&e));
                return Err(LoadError::Output(e.to_string()));
            }

            // Tear down the previous track
            c.cancel_seek();
            c.stop_poller();
            if let Some(graph) = c.graph() {
                graph.disconnect();
            }
            c.source = None;

            let source = Arc::new(source);
            let duration = source.duration();
            c.source = Some(source);
            c.transport = TransportClock::new(duration, c.rate);
            c.region = c.region.and_then(|r| r.clamped(duration));

            let (effects, volume, rate) = (c.effects, c.volume, c.rate);
            if let Some(graph) = c.graph() {
                graph.set_all(&effects);
                graph.set_master_gain(volume);
                graph.set_rate(rate);
            }

            self.inner.notifier.reset_throttle();
            c.state = PlayerState::Idle;
            c.set_state(PlayerState::Ready, em);
            em.push(EngineEvent::Ready { duration });

            info!("Loaded {:.2}s source", duration);
            Ok(duration)
        })
    }

    /// A load future dropped before it finished
    fn abandon_load(&self, ticket: u64) {
        self.update(|c, em| {
            c.pending_loads = c.pending_loads.saturating_sub(1);
            debug!("Load {} abandoned", ticket);
            if c.state == PlayerState::Idle && c.pending_loads == 0 {
                em.push(EngineEvent::StateChanged {
                    state: PlayerState::Idle,
                });
            }
        })
    }

    fn ensure_output(&self, c: &mut Controller) -> EngineResult<()> {
        let alive = c.output.as_ref().is_some_and(|o| !o.graph.is_detached());
        if alive {
            return Ok(());
        }

        let config = &self.inner.config;
        let (graph, processor) = EffectGraph::new(
            config.stream.sample_rate,
            config.stream.channels as usize,
            config.command_capacity,
            config.analyzer_fps,
        )
        .map_err(|e| EngineError::StreamBuildError(e.to_string()))?;

        let stream = OutputStream::open(&config.stream, config.output, processor)?;
        c.output = Some(LiveOutput {
            graph,
            _stream: stream,
        });
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Transport
    // ---------------------------------------------------------------------

    /// Start or resume playback
    ///
    /// No-op unless `Ready`, `Paused` or `Ended`. From `Ended` playback
    /// restarts at the region (or track) start. A position outside the
    /// active region, or at the end of a looping one, snaps to the region
    /// start.
    pub fn play(&self) {
        let fade = self.fade_frames();
        self.update(|c, em| {
            if !matches!(
                c.state,
                PlayerState::Ready | PlayerState::Paused | PlayerState::Ended
            ) {
                debug!("play() ignored in {:?}", c.state);
                return;
            }

            let now = em.now;
            let (start, end) = c.bounds();
            let mut position = if c.state == PlayerState::Ended {
                start
            } else {
                c.transport.offset()
            };
            let looping = c.region.is_some_and(|r| r.looping);
            if position < start || position > end || (looping && position >= end) {
                position = start;
            }
            c.transport.set_offset(now, position);

            if position >= end {
                em.position(end, true);
                c.set_state(PlayerState::Ended, em);
                em.push(EngineEvent::Ended);
                return;
            }

            c.splice(now, position, fade);
            c.set_state(PlayerState::Playing, em);
            self.ensure_poller(c);
        })
    }

    /// Pause, keeping the current position
    pub fn pause(&self) {
        let fade = self.fade_frames();
        self.update(|c, em| {
            let now = em.now;
            match c.state {
                PlayerState::Playing => {
                    c.transport.stop(now);
                }
                PlayerState::Seeking => {
                    let target = c.seek.map(|s| s.target);
                    c.cancel_seek();
                    c.transport.stop(now);
                    if let Some(target) = target {
                        c.transport.set_offset(now, target);
                    }
                }
                _ => {
                    debug!("pause() ignored in {:?}", c.state);
                    return;
                }
            }

            if let Some(graph) = c.graph() {
                graph.release(fade);
            }
            c.stop_poller();
            c.set_state(PlayerState::Paused, em);
            em.position(c.transport.offset(), true);
        })
    }

    /// Move the playhead to `time` seconds
    ///
    /// The target is clamped to the active region, or to the track. While
    /// playing this fades out, waits the settle delay and splices in at the
    /// target. A seek issued while another is in flight replaces its target
    /// instead of starting a second fade, so the latest call wins.
    pub async fn seek(&self, time: f64) {
        let Some(generation) = self.begin_seek(time) else {
            return;
        };

        if Handle::try_current().is_ok() {
            tokio::time::sleep(self.inner.config.timing.seek_settle()).await;
        }
        self.complete_seek(generation);
    }

    fn begin_seek(&self, time: f64) -> Option<u64> {
        let fade = self.fade_frames();
        self.update(|c, em| {
            if !time.is_finite() {
                warn!("Ignoring seek to {}", time);
                return None;
            }
            let source_id = c.source.as_ref()?.id();

            let now = em.now;
            let (start, end) = c.bounds();
            let target = time.clamp(start, end);

            match c.state {
                PlayerState::Seeking => {
                    if let Some(seek) = c.seek.as_mut() {
                        debug!("Seek retargeted {:.3} -> {:.3}", seek.target, target);
                        seek.target = target;
                    }
                    None
                }
                PlayerState::Playing => {
                    c.seek_generation += 1;
                    let generation = c.seek_generation;
                    c.seek = Some(PendingSeek {
                        target,
                        source_id,
                        generation,
                    });
                    c.transport.stop(now);
                    if let Some(graph) = c.graph() {
                        graph.release(fade);
                    }
                    c.set_state(PlayerState::Seeking, em);
                    Some(generation)
                }
                PlayerState::Ready | PlayerState::Paused | PlayerState::Ended => {
                    c.transport.set_offset(now, target);
                    if c.state == PlayerState::Ended {
                        c.set_state(PlayerState::Ready, em);
                    }
                    em.position(target, true);
                    None
                }
                PlayerState::Idle | PlayerState::Loading => None,
            }
        })
    }

    fn complete_seek(&self, generation: u64) {
        let fade = self.fade_frames();
        self.update(|c, em| {
            let current = c.source.as_ref().map(|s| s.id());
            let seek = match c.seek {
                Some(seek)
                    if seek.generation == generation
                        && c.state == PlayerState::Seeking
                        && current == Some(seek.source_id) =>
                {
                    seek
                }
                _ => {
                    debug!("Stale seek continuation {} dropped", generation);
                    return;
                }
            };

            c.seek = None;
            c.splice(em.now, seek.target, fade);
            c.set_state(PlayerState::Playing, em);
            em.position(seek.target, true);
            self.ensure_poller(c);
        })
    }

    /// One polling step: region/end enforcement and throttled position
    ///
    /// The built-in poller calls this while playing; hosts that disable
    /// `auto_poll` call it from their own periodic callback. Returns
    /// whether polling should continue.
    pub fn tick(&self) -> bool {
        self.update(|c, em| self.tick_locked(c, em))
    }

    fn tick_locked(&self, c: &mut Controller, em: &mut Emitter<'_>) -> bool {
        match c.state {
            PlayerState::Seeking => return true,
            PlayerState::Playing => {}
            _ => return false,
        }

        let now = em.now;
        let position = c.transport.position_at(now);
        let (start, end) = c.bounds();

        if position < end {
            em.position(position, false);
            return true;
        }

        if c.region.is_some_and(|r| r.looping) {
            debug!("Loop: {:.3} -> {:.3}", end, start);
            c.splice(now, start, self.fade_frames());
            em.position(start, true);
            return true;
        }

        c.transport.stop(now);
        c.transport.set_offset(now, end);
        if let Some(graph) = c.graph() {
            graph.release(self.fade_frames());
        }
        c.stop_poller();
        em.position(end, true);
        c.set_state(PlayerState::Ended, em);
        em.push(EngineEvent::Ended);
        false
    }

    fn ensure_poller(&self, c: &mut Controller) {
        if !self.inner.config.auto_poll || c.poller_active {
            return;
        }
        let Ok(handle) = Handle::try_current() else {
            return;
        };

        c.poller_active = true;
        c.poller_generation += 1;
        let generation = c.poller_generation;
        let weak: Weak<EngineInner> = Arc::downgrade(&self.inner);
        let period = self.inner.config.timing.tick_interval();

        handle.spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let engine = PlaybackEngine { inner };
                if !engine.poll(generation) {
                    break;
                }
            }
            debug!("Poller {} stopped", generation);
        });
    }

    fn poll(&self, generation: u64) -> bool {
        self.update(|c, em| {
            if !c.poller_active || c.poller_generation != generation {
                return false;
            }
            let keep = self.tick_locked(c, em);
            if !keep && c.poller_generation == generation {
                c.poller_active = false;
            }
            keep
        })
    }

    // ---------------------------------------------------------------------
    // Region and parameters
    // ---------------------------------------------------------------------

    /// Set or clear the playback region
    ///
    /// Bounds are clamped to the track; with no track loaded, or with an
    /// empty span, the region is cleared. If playing outside the new
    /// region, playback jumps to its start; a stopped playhead is clamped
    /// into it.
    pub fn set_region(&self, region: Option<Region>) {
        let fade = self.fade_frames();
        self.update(|c, em| {
            let duration = c.duration();
            let fitted = region.and_then(|r| r.clamped(duration));
            if region.is_some() && fitted.is_none() {
                warn!("Region {:?} rejected for {:.2}s track", region, duration);
            }
            c.region = fitted;

            let Some(r) = fitted else {
                return;
            };
            let now = em.now;
            match c.state {
                PlayerState::Playing => {
                    let position = c.transport.position_at(now);
                    if !r.contains(position, duration) {
                        c.splice(now, r.start, fade);
                        em.position(r.start, true);
                    }
                }
                PlayerState::Seeking => {
                    if let Some(seek) = c.seek.as_mut() {
                        if !r.contains(seek.target, duration) {
                            seek.target = r.start;
                        }
                    }
                }
                PlayerState::Ready | PlayerState::Paused | PlayerState::Ended => {
                    let (start, end) = (r.start, r.effective_end(duration));
                    let offset = c.transport.offset();
                    let clamped = offset.clamp(start, end);
                    if clamped != offset {
                        c.transport.set_offset(now, clamped);
                        em.position(clamped, true);
                    }
                }
                PlayerState::Idle | PlayerState::Loading => {}
            }
        })
    }

    /// Master volume, clamped to `[0, 1]`
    pub fn set_volume(&self, volume: f32) {
        if !volume.is_finite() {
            warn!("Ignoring volume {}", volume);
            return;
        }
        let volume = volume.clamp(0.0, 1.0);
        self.update(|c, _| {
            c.volume = volume;
            if let Some(graph) = c.graph() {
                graph.set_master_gain(volume);
            }
        })
    }

    /// Playback rate, clamped to `[0.25, 4]`; position stays continuous
    pub fn set_playback_rate(&self, rate: f64) {
        if !rate.is_finite() {
            warn!("Ignoring playback rate {}", rate);
            return;
        }
        let rate = clamp_rate(rate);
        self.update(|c, em| {
            c.rate = rate;
            c.transport.set_rate(em.now, rate);
            if let Some(graph) = c.graph() {
                graph.set_rate(rate);
            }
        })
    }

    /// Set one effect; the cached value and the graph node change together
    pub fn set_effect(&self, key: EffectKey, value: f32) {
        self.update(|c, _| {
            let Some(stored) = c.effects.set(key, value) else {
                warn!("Ignoring {} = {}", key, value);
                return;
            };
            if let Some(graph) = c.graph() {
                graph.set_parameter(key, stored);
            }
        })
    }

    /// Set several effects at once; missing fields are left alone
    pub fn set_effects(&self, patch: impl Into<EffectPatch>) {
        let patch = patch.into();
        self.update(|c, _| {
            for (key, value) in patch.iter() {
                let Some(stored) = c.effects.set(key, value) else {
                    warn!("Ignoring {} = {}", key, value);
                    continue;
                };
                if let Some(graph) = c.graph() {
                    graph.set_parameter(key, stored);
                }
            }
        })
    }

    /// Apply a built-in preset's effects and rate; false if unknown
    pub fn apply_preset(&self, name: &str) -> bool {
        match find_preset(name) {
            Some(preset) => {
                info!("Applying preset: {}", preset.label);
                self.set_effects(preset.effects);
                self.set_playback_rate(preset.rate);
                true
            }
            None => {
                warn!("Unknown preset: {}", name);
                false
            }
        }
    }

    // ---------------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------------

    /// Track length in seconds; 0 with nothing loaded
    pub fn duration(&self) -> f64 {
        self.inner.controller.lock().duration()
    }

    /// Derived playhead position; the pending target while seeking
    pub fn current_position(&self) -> f64 {
        let now = self.inner.clock.now();
        self.inner.controller.lock().position(now)
    }

    pub fn state(&self) -> PlayerState {
        let c = self.inner.controller.lock();
        if c.state == PlayerState::Idle && c.pending_loads > 0 {
            PlayerState::Loading
        } else {
            c.state
        }
    }

    pub fn is_playing(&self) -> bool {
        self.state().is_active()
    }

    pub fn volume(&self) -> f32 {
        self.inner.controller.lock().volume
    }

    pub fn playback_rate(&self) -> f64 {
        self.inner.controller.lock().rate
    }

    pub fn effects(&self) -> EffectSettings {
        self.inner.controller.lock().effects
    }

    pub fn region(&self) -> Option<Region> {
        self.inner.controller.lock().region
    }

    /// Parameters last written to the live graph, if one exists
    pub fn graph_params(&self) -> Option<NodeParams> {
        self.inner
            .controller
            .lock()
            .output
            .as_ref()
            .map(|o| *o.graph.params())
    }

    /// Latest spectrum snapshot; zeros before the first load
    pub fn analysis_snapshot(&self) -> Vec<f32> {
        match self.inner.controller.lock().output.as_ref() {
            Some(output) => output.graph.read_analysis(),
            None => vec![0.0; NUM_BINS],
        }
    }

    // ---------------------------------------------------------------------
    // Subscriptions
    // ---------------------------------------------------------------------

    pub fn on_position_update<F>(&self, f: F) -> Subscription
    where
        F: Fn(f64) + Send + Sync + 'static,
    {
        self.inner.notifier.on_position(f)
    }

    pub fn on_ended<F>(&self, f: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.notifier.on_ended(f)
    }

    pub fn on_ready<F>(&self, f: F) -> Subscription
    where
        F: Fn(f64) + Send + Sync + 'static,
    {
        self.inner.notifier.on_ready(f)
    }

    pub fn on_event<F>(&self, f: F) -> Subscription
    where
        F: Fn(&EngineEvent) + Send + Sync + 'static,
    {
        self.inner.notifier.on_event(f)
    }

    /// Every event on a channel
    pub fn event_channel(&self) -> Receiver<EngineEvent> {
        self.inner.notifier.channel()
    }

    // ---------------------------------------------------------------------
    // Export and teardown
    // ---------------------------------------------------------------------

    /// Render the loaded track offline with the current (or given) settings
    ///
    /// Runs on the blocking pool; live playback and polling carry on.
    pub async fn render_to_file(
        &self,
        options: Option<RenderOptions>,
    ) -> EngineResult<RenderedFile> {
        let job = self.render_job(options.unwrap_or_default())?;

        let rendered = match Handle::try_current() {
            Ok(handle) => handle
                .spawn_blocking(move || job.run())
                .await
                .map_err(|e| RenderError::Task(e.to_string()))
                .and_then(|r| r),
            Err(_) => job.run(),
        };

        rendered.map_err(|e| {
            warn!("Render failed: {}", e);
            EngineError::Render(e)
        })
    }

    fn render_job(&self, options: RenderOptions) -> EngineResult<RenderJob> {
        let c = self.inner.controller.lock();
        let source = c.source.clone().ok_or(EngineError::NoSourceLoaded)?;
        Ok(RenderJob {
            source,
            region: options.region.or(c.region),
            effects: options.effects.unwrap_or(c.effects),
            rate: options.rate.unwrap_or(c.rate),
            volume: options.volume.unwrap_or(c.volume),
            sample_rate: self.inner.config.render_sample_rate,
        })
    }

    /// Release the source and the output, drop every subscription
    ///
    /// Effects, region, volume and rate are kept; the engine can load again.
    pub fn dispose(&self) {
        let output = self.update(|c, em| {
            c.cancel_seek();
            c.stop_poller();
            c.source = None;
            c.transport = TransportClock::new(0.0, c.rate);
            c.region = None;
            c.set_state(PlayerState::Idle, em);
            c.output.take()
        });
        // Joins the output thread; done outside the lock
        drop(output);
        self.inner.notifier.clear();
        info!("Engine disposed");
    }
}

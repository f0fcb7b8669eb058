//! Player Session
//!
//! Glue between a track library and the engine, holding the state a
//! presentation layer renders from. Engine events are mirrored into a
//! [`PlaybackSnapshot`]; subscriptions are replaced on every track load.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::effects::{EffectPatch, EffectSettings};
use crate::engine::PlaybackEngine;
use crate::error::{EngineError, EngineResult, LoadError};
use crate::message::EngineEvent;
use crate::notifier::Subscription;
use crate::region::Region;
use crate::render::{RenderOptions, RenderedFile};
use crate::source::SourceBuffer;
use crate::track::{Track, TrackRepository};

/// Playback state as a UI sees it
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackSnapshot {
    pub is_playing: bool,
    pub is_loading: bool,
    pub current_time: f64,
    pub duration: f64,
    pub volume: f32,
    pub playback_rate: f64,
    pub current_track_id: Option<Uuid>,
    pub effects: EffectSettings,
    pub region: Option<Region>,
}

impl Default for PlaybackSnapshot {
    fn default() -> Self {
        Self {
            is_playing: false,
            is_loading: false,
            current_time: 0.0,
            duration: 0.0,
            volume: 1.0,
            playback_rate: 1.0,
            current_track_id: None,
            effects: EffectSettings::default(),
            region: None,
        }
    }
}

impl PlaybackSnapshot {
    /// Percent through the track, `0..=100`
    pub fn progress(&self) -> f64 {
        if self.duration > 0.0 {
            (self.current_time / self.duration * 100.0).clamp(0.0, 100.0)
        } else {
            0.0
        }
    }
}

/// Track library plus engine, with a mirrored snapshot
pub struct PlayerSession<R: TrackRepository> {
    engine: PlaybackEngine,
    repository: R,
    tracks: Vec<Track>,
    snapshot: Arc<Mutex<PlaybackSnapshot>>,
    subscriptions: Vec<Subscription>,
}

impl<R: TrackRepository> PlayerSession<R> {
    pub fn new(engine: PlaybackEngine, repository: R) -> Self {
        let snapshot = PlaybackSnapshot {
            volume: engine.volume(),
            playback_rate: engine.playback_rate(),
            effects: engine.effects(),
            region: engine.region(),
            ..Default::default()
        };
        Self {
            engine,
            repository,
            tracks: Vec::new(),
            snapshot: Arc::new(Mutex::new(snapshot)),
            subscriptions: Vec::new(),
        }
    }

    /// Reload the track list from the repository
    pub async fn refresh(&mut self) -> EngineResult<()> {
        self.tracks = self.repository.get_all().await?;
        info!("Library has {} tracks", self.tracks.len());
        Ok(())
    }

    /// Import an encoded file; a track with the same name is reused
    pub async fn import(&mut self, name: &str, data: Vec<u8>) -> EngineResult<Track> {
        if let Some(existing) = self.tracks.iter().find(|t| t.name == name) {
            info!("'{}' already imported", name);
            return Ok(existing.clone());
        }

        let data: Arc<[u8]> = data.into();
        let duration = probe_duration(data.clone()).await?;
        let track = Track::new(name, data, duration);
        self.repository.put(track.clone()).await?;
        self.tracks.push(track.clone());

        info!("Imported '{}' ({:.2}s)", name, duration);
        Ok(track)
    }

    /// Delete a track; removing the loaded one unloads the engine
    pub async fn remove(&mut self, id: Uuid) -> EngineResult<()> {
        self.repository.delete(id).await?;
        self.tracks.retain(|t| t.id != id);

        if self.snapshot.lock().current_track_id == Some(id) {
            self.subscriptions.clear();
            self.engine.dispose();
            let mut snapshot = self.snapshot.lock();
            snapshot.current_track_id = None;
            snapshot.is_playing = false;
            snapshot.current_time = 0.0;
            snapshot.duration = 0.0;
            snapshot.region = None;
        }
        Ok(())
    }

    /// Load a library track into the engine
    ///
    /// The snapshot switches to the new track straight away and is rolled
    /// back if the load fails.
    pub async fn load_track(&mut self, id: Uuid) -> EngineResult<f64> {
        let track = self
            .tracks
            .iter()
            .find(|t| t.id == id)
            .cloned()
            .ok_or_else(|| EngineError::TrackNotFound(id.to_string()))?;

        let previous = {
            let mut snapshot = self.snapshot.lock();
            let previous = snapshot.clone();
            snapshot.current_track_id = Some(id);
            snapshot.is_loading = true;
            snapshot.is_playing = false;
            snapshot.current_time = 0.0;
            previous
        };

        self.subscriptions.clear();
        let result = self.engine.load(track.data.clone()).await;
        self.subscribe();

        match result {
            Ok(duration) => {
                self.sync();
                info!("Loaded '{}'", track.name);
                Ok(duration)
            }
            Err(e) => {
                warn!("Loading '{}' failed: {}", track.name, e);
                *self.snapshot.lock() = PlaybackSnapshot {
                    is_loading: false,
                    ..previous
                };
                Err(e.into())
            }
        }
    }

    fn subscribe(&mut self) {
        let snapshot = self.snapshot.clone();
        self.subscriptions.push(self.engine.on_event(move |event| {
            let mut s = snapshot.lock();
            match event {
                EngineEvent::Position { seconds } => s.current_time = *seconds,
                EngineEvent::Ready { duration } => s.duration = *duration,
                EngineEvent::StateChanged { state } => {
                    s.is_playing = state.is_active();
                    s.is_loading = *state == crate::message::PlayerState::Loading;
                }
                EngineEvent::Ended => s.is_playing = false,
                EngineEvent::Error { .. } => {}
            }
        }));
    }

    /// Copy the engine's settings into the snapshot
    fn sync(&self) {
        let mut s = self.snapshot.lock();
        s.is_playing = self.engine.is_playing();
        s.is_loading = false;
        s.current_time = self.engine.current_position();
        s.duration = self.engine.duration();
        s.volume = self.engine.volume();
        s.playback_rate = self.engine.playback_rate();
        s.effects = self.engine.effects();
        s.region = self.engine.region();
    }

    pub fn play(&self) {
        self.engine.play();
        self.sync();
    }

    pub fn pause(&self) {
        self.engine.pause();
        self.sync();
    }

    pub fn toggle(&self) {
        if self.engine.is_playing() {
            self.pause();
        } else {
            self.play();
        }
    }

    pub async fn seek(&self, time: f64) {
        self.engine.seek(time).await;
        self.sync();
    }

    pub fn set_volume(&self, volume: f32) {
        self.engine.set_volume(volume);
        self.sync();
    }

    pub fn set_playback_rate(&self, rate: f64) {
        self.engine.set_playback_rate(rate);
        self.sync();
    }

    pub fn set_effects(&self, patch: impl Into<EffectPatch>) {
        self.engine.set_effects(patch);
        self.sync();
    }

    pub fn apply_preset(&self, name: &str) -> bool {
        let applied = self.engine.apply_preset(name);
        self.sync();
        applied
    }

    pub fn set_region(&self, region: Option<Region>) {
        self.engine.set_region(region);
        self.sync();
    }

    /// Render the loaded track with the current settings
    pub async fn export(&self, options: Option<RenderOptions>) -> EngineResult<RenderedFile> {
        self.engine.render_to_file(options).await
    }

    pub fn snapshot(&self) -> PlaybackSnapshot {
        self.snapshot.lock().clone()
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn current_track(&self) -> Option<&Track> {
        let id = self.snapshot.lock().current_track_id?;
        self.tracks.iter().find(|t| t.id == id)
    }

    pub fn engine(&self) -> &PlaybackEngine {
        &self.engine
    }

    pub fn repository(&self) -> &R {
        &self.repository
    }
}

/// Decode once to learn the duration
async fn probe_duration(data: Arc<[u8]>) -> Result<f64, LoadError> {
    tokio::task::spawn_blocking(move || SourceBuffer::decode(data).map(|s| s.duration()))
        .await
        .map_err(|e| LoadError::Task(e.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::EngineConfig;
    use crate::effects::EffectKey;
    use crate::track::MemoryTrackRepository;
    use crate::wav::encode_wav;

    fn wav(seconds: f64) -> Vec<u8> {
        let frames = (seconds * 8000.0) as usize;
        encode_wav(&vec![0.1; frames * 2], 8000, 2).unwrap()
    }

    fn session() -> (PlayerSession<MemoryTrackRepository>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let config = EngineConfig {
            auto_poll: false,
            ..EngineConfig::headless()
        };
        let engine = PlaybackEngine::with_clock(config, clock.clone()).unwrap();
        (PlayerSession::new(engine, MemoryTrackRepository::new()), clock)
    }

    #[tokio::test]
    async fn test_import_reuses_same_name() {
        let (mut session, _) = session();
        let a = session.import("song.wav", wav(1.0)).await.unwrap();
        let b = session.import("song.wav", wav(2.0)).await.unwrap();

        assert_eq!(a.id, b.id);
        assert_eq!(b.duration, 1.0);
        assert_eq!(session.tracks().len(), 1);
        assert_eq!(session.repository().len(), 1);
    }

    #[tokio::test]
    async fn test_import_rejects_undecodable() {
        let (mut session, _) = session();
        let result = session.import("junk.bin", vec![0u8; 64]).await;
        assert!(matches!(result, Err(EngineError::Load(_))));
        assert!(session.tracks().is_empty());
    }

    #[tokio::test]
    async fn test_load_track_mirrors_engine() {
        let (mut session, clock) = session();
        let track = session.import("a.wav", wav(4.0)).await.unwrap();

        let duration = session.load_track(track.id).await.unwrap();
        assert_eq!(duration, 4.0);

        let snap = session.snapshot();
        assert_eq!(snap.current_track_id, Some(track.id));
        assert_eq!(snap.duration, 4.0);
        assert!(!snap.is_loading);
        assert_eq!(session.current_track().map(|t| t.id), Some(track.id));

        session.play();
        assert!(session.snapshot().is_playing);

        clock.advance(1.0);
        session.engine().tick();
        assert_eq!(session.snapshot().current_time, 1.0);
        assert_eq!(session.snapshot().progress(), 25.0);

        session.toggle();
        assert!(!session.snapshot().is_playing);
    }

    #[tokio::test]
    async fn test_failed_load_rolls_back() {
        let (mut session, _) = session();
        let good = session.import("good.wav", wav(2.0)).await.unwrap();
        session.load_track(good.id).await.unwrap();

        let broken = Track::new("broken.wav", vec![9u8; 32], 3.0);
        session.repository().put(broken.clone()).await.unwrap();
        session.refresh().await.unwrap();

        assert!(session.load_track(broken.id).await.is_err());
        let snap = session.snapshot();
        assert_eq!(snap.current_track_id, Some(good.id));
        assert_eq!(snap.duration, 2.0);
        assert!(!snap.is_loading);

        // Events still reach the snapshot after the failed switch
        session.seek(1.5).await;
        assert_eq!(session.snapshot().current_time, 1.5);
    }

    #[tokio::test]
    async fn test_unknown_track() {
        let (mut session, _) = session();
        assert!(matches!(
            session.load_track(Uuid::new_v4()).await,
            Err(EngineError::TrackNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_remove_loaded_track_unloads() {
        let (mut session, _) = session();
        let track = session.import("a.wav", wav(1.0)).await.unwrap();
        session.load_track(track.id).await.unwrap();

        session.remove(track.id).await.unwrap();
        assert!(session.tracks().is_empty());
        assert_eq!(session.snapshot().current_track_id, None);
        assert_eq!(session.engine().duration(), 0.0);
    }

    #[tokio::test]
    async fn test_settings_and_export() {
        let (mut session, _) = session();
        let track = session.import("a.wav", wav(2.0)).await.unwrap();
        session.load_track(track.id).await.unwrap();

        session.set_volume(0.5);
        session.set_effects(EffectPatch::default().with(EffectKey::BassGain, 4.0));
        assert!(session.apply_preset("nightcore"));
        session.set_region(Some(Region::new(0.0, Some(1.0), false)));

        let snap = session.snapshot();
        assert_eq!(snap.volume, 0.5);
        assert_eq!(snap.playback_rate, 1.25);
        assert_eq!(snap.effects.bass_gain, 2.0);
        assert!(snap.region.is_some());

        let file = session.export(None).await.unwrap();
        assert_eq!(file.frames(), (1.0 / 1.25 * 44100.0_f64).round() as usize);
    }

    #[test]
    fn test_progress_without_duration() {
        assert_eq!(PlaybackSnapshot::default().progress(), 0.0);
    }
}

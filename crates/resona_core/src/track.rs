//! Track Library Persistence
//!
//! A [`Track`] is an imported audio file plus its metadata. Repositories
//! store whole tracks; the engine never touches them directly, the
//! [`PlayerSession`](crate::session::PlayerSession) moves bytes between the
//! two.
//!
//! `FileTrackRepository` keeps a JSON index next to one blob per track:
//!
//! ```text
//! <root>/index.json
//! <root>/tracks/<uuid>.bin
//! ```

use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::StorageError;

/// An imported audio file
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    pub id: Uuid,
    pub name: String,
    /// Encoded file contents, as imported
    pub data: Arc<[u8]>,
    /// Seconds
    pub duration: f64,
    pub added_at: DateTime<Utc>,
}

impl Track {
    pub fn new(name: impl Into<String>, data: impl Into<Arc<[u8]>>, duration: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            data: data.into(),
            duration,
            added_at: Utc::now(),
        }
    }

    pub fn meta(&self) -> TrackMeta {
        TrackMeta {
            id: self.id,
            name: self.name.clone(),
            duration: self.duration,
            added_at: self.added_at,
            size: self.data.len(),
        }
    }
}

/// Index entry for a stored track
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackMeta {
    pub id: Uuid,
    pub name: String,
    pub duration: f64,
    pub added_at: DateTime<Utc>,
    pub size: usize,
}

/// Track storage
///
/// `put` inserts or replaces by id. Failures are opaque `StorageError`s.
pub trait TrackRepository: Send + Sync {
    /// Every stored track, oldest first
    fn get_all(&self) -> impl Future<Output = Result<Vec<Track>, StorageError>> + Send;

    fn put(&self, track: Track) -> impl Future<Output = Result<(), StorageError>> + Send;

    /// Deleting an unknown id is not an error
    fn delete(&self, id: Uuid) -> impl Future<Output = Result<(), StorageError>> + Send;
}

/// In-process repository
#[derive(Debug, Default)]
pub struct MemoryTrackRepository {
    tracks: Mutex<Vec<Track>>,
}

impl MemoryTrackRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tracks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TrackRepository for MemoryTrackRepository {
    async fn get_all(&self) -> Result<Vec<Track>, StorageError> {
        Ok(self.tracks.lock().clone())
    }

    async fn put(&self, track: Track) -> Result<(), StorageError> {
        let mut tracks = self.tracks.lock();
        match tracks.iter_mut().find(|t| t.id == track.id) {
            Some(existing) => *existing = track,
            None => tracks.push(track),
        }
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<(), StorageError> {
        self.tracks.lock().retain(|t| t.id != id);
        Ok(())
    }
}

/// Directory-backed repository
pub struct FileTrackRepository {
    root: PathBuf,
    // Serialises index read-modify-write cycles
    index_lock: tokio::sync::Mutex<()>,
}

impl FileTrackRepository {
    /// Repository rooted at `root`; created on first write
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            index_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Repository under the platform data directory
    pub fn open_default() -> Result<Self, StorageError> {
        let dirs = ProjectDirs::from("com", "resona", "resona").ok_or(StorageError::NoStorageDir)?;
        Ok(Self::new(dirs.data_dir().join("tracks")))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn index_path(&self) -> PathBuf {
        self.root.join("index.json")
    }

    fn blob_path(&self, id: Uuid) -> PathBuf {
        self.root.join("tracks").join(format!("{}.bin", id))
    }

    async fn read_index(&self) -> Result<Vec<TrackMeta>, StorageError> {
        match tokio::fs::read(self.index_path()).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_index(&self, index: &[TrackMeta]) -> Result<(), StorageError> {
        let json = serde_json::to_vec_pretty(index)?;
        write_atomic(&self.index_path(), &json).await
    }
}

impl TrackRepository for FileTrackRepository {
    async fn get_all(&self) -> Result<Vec<Track>, StorageError> {
        let index = {
            let _guard = self.index_lock.lock().await;
            self.read_index().await?
        };

        let mut tracks = Vec::with_capacity(index.len());
        for meta in index {
            match tokio::fs::read(self.blob_path(meta.id)).await {
                Ok(data) => tracks.push(Track {
                    id: meta.id,
                    name: meta.name,
                    data: data.into(),
                    duration: meta.duration,
                    added_at: meta.added_at,
                }),
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    warn!("Track {} has no data file; skipping", meta.id);
                }
                Err(e) => return Err(e.into()),
            }
        }

        tracks.sort_by_key(|t| t.added_at);
        debug!("Read {} tracks from {:?}", tracks.len(), self.root);
        Ok(tracks)
    }

    async fn put(&self, track: Track) -> Result<(), StorageError> {
        let _guard = self.index_lock.lock().await;

        write_atomic(&self.blob_path(track.id), &track.data).await?;

        let mut index = self.read_index().await?;
        let meta = track.meta();
        match index.iter_mut().find(|m| m.id == meta.id) {
            Some(existing) => *existing = meta,
            None => index.push(meta),
        }
        self.write_index(&index).await?;

        info!("Stored track '{}' ({})", track.name, track.id);
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<(), StorageError> {
        let _guard = self.index_lock.lock().await;

        let mut index = self.read_index().await?;
        let before = index.len();
        index.retain(|m| m.id != id);
        if index.len() != before {
            self.write_index(&index).await?;
        }

        match tokio::fs::remove_file(self.blob_path(id)).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        info!("Deleted track {}", id);
        Ok(())
    }
}

/// Write to a sibling temp file, then rename over `path`
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("part");
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn track(name: &str, bytes: &[u8]) -> Track {
        Track::new(name, bytes.to_vec(), 1.5)
    }

    #[tokio::test]
    async fn test_memory_put_replaces_by_id() {
        let repo = MemoryTrackRepository::new();
        let mut t = track("a.wav", b"one");
        repo.put(t.clone()).await.unwrap();

        t.name = "renamed.wav".into();
        repo.put(t.clone()).await.unwrap();

        let all = repo.get_all().await.unwrap();
        assert_eq!(all, vec![t.clone()]);

        repo.delete(t.id).await.unwrap();
        repo.delete(t.id).await.unwrap();
        assert!(repo.is_empty());
    }

    #[tokio::test]
    async fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let repo = FileTrackRepository::new(dir.path());

        let mut first = track("first.wav", b"RIFF-first");
        let mut second = track("second.mp3", b"ID3-second");
        // Stored newest-first; read back oldest-first
        second.added_at = first.added_at + Duration::seconds(5);
        first.added_at -= Duration::seconds(5);
        repo.put(second.clone()).await.unwrap();
        repo.put(first.clone()).await.unwrap();

        let all = repo.get_all().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, first.id);
        assert_eq!(&*all[0].data, b"RIFF-first");
        assert_eq!(all[1].name, "second.mp3");
        assert_eq!(all[1].duration, 1.5);

        // A fresh handle sees the same library
        let reopened = FileTrackRepository::new(dir.path());
        assert_eq!(reopened.get_all().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_file_delete_removes_blob() {
        let dir = tempfile::tempdir().unwrap();
        let repo = FileTrackRepository::new(dir.path());
        let t = track("gone.wav", b"data");
        repo.put(t.clone()).await.unwrap();
        assert!(repo.blob_path(t.id).exists());

        repo.delete(t.id).await.unwrap();
        assert!(!repo.blob_path(t.id).exists());
        assert!(repo.get_all().await.unwrap().is_empty());

        // Unknown ids are fine
        repo.delete(Uuid::new_v4()).await.unwrap();
    }

    #[tokio::test]
    async fn test_empty_directory_has_no_tracks() {
        let dir = tempfile::tempdir().unwrap();
        let repo = FileTrackRepository::new(dir.path().join("missing"));
        assert!(repo.get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_index_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.json"), b"{not json").unwrap();
        let repo = FileTrackRepository::new(dir.path());
        assert!(matches!(repo.get_all().await, Err(StorageError::Json(_))));
    }

    #[tokio::test]
    async fn test_missing_blob_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let repo = FileTrackRepository::new(dir.path());
        let kept = track("kept.wav", b"k");
        let lost = track("lost.wav", b"l");
        repo.put(kept.clone()).await.unwrap();
        repo.put(lost.clone()).await.unwrap();
        std::fs::remove_file(repo.blob_path(lost.id)).unwrap();

        let all = repo.get_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, kept.id);
    }

    #[test]
    fn test_meta_serialises_camel_case() {
        let t = track("x.wav", b"abc");
        let json = serde_json::to_value(t.meta()).unwrap();
        assert_eq!(json["size"], 3);
        assert!(json.get("addedAt").is_some());
    }
}

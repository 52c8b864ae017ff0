//! Artifact store: where artifacts live and how fresh they are.
//!
//! The runner only ever asks three things of the store: where an artifact
//! lives, when it was last written, and to record that a stage produced it.
//! [`FsStore`] answers from file modification times; [`MemoryStore`] keeps a
//! logical clock so pipelines can be exercised without a filesystem.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::debug;

use crate::domain::{Artifact, ArtifactKind};

/// Freshness and publication of artifacts
pub trait ArtifactStore: Send + Sync {
    /// Concrete path handed to external commands
    fn locate(&self, artifact: &Artifact) -> PathBuf;

    /// Last-write time, or `None` if the artifact does not exist
    fn modified(&self, artifact: &Artifact) -> io::Result<Option<SystemTime>>;

    /// Record that the producing stage just succeeded.
    ///
    /// Markers are (re)created with the current time. File artifacts must
    /// already have been committed by the stage.
    fn mark_produced(&self, artifact: &Artifact) -> io::Result<()>;
}

/// Store backed by a directory on disk
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    /// Create a store rooted at `root`, creating the directory if needed
    pub fn open(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ArtifactStore for FsStore {
    fn locate(&self, artifact: &Artifact) -> PathBuf {
        // Absolute locations (the root input) are kept as-is by join
        self.root.join(&artifact.location)
    }

    fn modified(&self, artifact: &Artifact) -> io::Result<Option<SystemTime>> {
        match fs::metadata(self.locate(artifact)) {
            Ok(meta) => meta.modified().map(Some),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn mark_produced(&self, artifact: &Artifact) -> io::Result<()> {
        let path = self.locate(artifact);
        match artifact.kind {
            ArtifactKind::Marker => {
                let file = File::create(&path)?;
                file.set_modified(SystemTime::now())?;
                debug!(marker = %path.display(), "Touched marker");
                Ok(())
            }
            ArtifactKind::File => {
                if path.exists() {
                    Ok(())
                } else {
                    Err(io::Error::new(
                        io::ErrorKind::NotFound,
                        format!("stage reported success but {} was not written", artifact),
                    ))
                }
            }
        }
    }
}

/// In-memory store with a logical clock.
///
/// Every touch advances the clock by one second, so "newer" is always
/// strictly ordered.
#[derive(Debug, Default)]
pub struct MemoryStore {
    stamps: Mutex<HashMap<PathBuf, SystemTime>>,
    clock: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance the clock and return the new time
    pub fn tick(&self) -> SystemTime {
        let secs = self.clock.fetch_add(1, Ordering::SeqCst) + 1;
        UNIX_EPOCH + Duration::from_secs(secs)
    }

    /// Set `location`'s timestamp to a fresh tick
    pub fn touch(&self, location: impl AsRef<Path>) -> SystemTime {
        let now = self.tick();
        self.stamps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(location.as_ref().to_path_buf(), now);
        now
    }

    pub fn remove(&self, location: impl AsRef<Path>) {
        self.stamps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(location.as_ref());
    }

    pub fn stamp(&self, location: impl AsRef<Path>) -> Option<SystemTime> {
        self.stamps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(location.as_ref())
            .copied()
    }
}

impl ArtifactStore for MemoryStore {
    fn locate(&self, artifact: &Artifact) -> PathBuf {
        artifact.location.clone()
    }

    fn modified(&self, artifact: &Artifact) -> io::Result<Option<SystemTime>> {
        Ok(self.stamp(&artifact.location))
    }

    fn mark_produced(&self, artifact: &Artifact) -> io::Result<()> {
        self.touch(&artifact.location);
        Ok(())
    }
}

/// Newest modification time among `paths`, ignoring ones that do not exist.
///
/// Used to timestamp the pipeline definition itself (executable and config).
pub fn newest_modification<P: AsRef<Path>>(paths: &[P]) -> Option<SystemTime> {
    paths
        .iter()
        .filter_map(|p| fs::metadata(p.as_ref()).and_then(|m| m.modified()).ok())
        .max()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_fs_store_missing_artifact() {
        let temp = TempDir::new().unwrap();
        let store = FsStore::open(temp.path()).unwrap();
        let artifact = Artifact::file("place extract", "x-places.osm.pbf");

        assert_eq!(store.modified(&artifact).unwrap(), None);
        assert!(store.mark_produced(&artifact).is_err());
    }

    #[test]
    fn test_fs_store_marker_touch() {
        let temp = TempDir::new().unwrap();
        let store = FsStore::open(temp.path().join("out")).unwrap();
        let marker = Artifact::marker("place import marker", "x-places.imported");

        store.mark_produced(&marker).unwrap();
        let path = store.locate(&marker);
        assert!(path.exists());
        assert_eq!(fs::metadata(&path).unwrap().len(), 0);
        assert!(store.modified(&marker).unwrap().is_some());
    }

    #[test]
    fn test_fs_store_keeps_absolute_locations() {
        let temp = TempDir::new().unwrap();
        let store = FsStore::open(temp.path()).unwrap();
        let root = Artifact::file("root extract", "/data/planet.osm.pbf");
        assert_eq!(store.locate(&root), PathBuf::from("/data/planet.osm.pbf"));
    }

    #[test]
    fn test_memory_store_clock_is_monotonic() {
        let store = MemoryStore::new();
        let a = store.touch("a");
        let b = store.touch("b");
        assert!(b > a);
        assert_eq!(store.stamp("a"), Some(a));

        store.remove("a");
        assert_eq!(store.stamp("a"), None);
    }

    #[test]
    fn test_newest_modification_skips_missing() {
        let temp = TempDir::new().unwrap();
        let present = temp.path().join("config.yaml");
        fs::write(&present, "version: \"1.0\"").unwrap();
        let missing = temp.path().join("missing");

        let newest = newest_modification(&[missing.clone(), present.clone()]);
        assert_eq!(newest, fs::metadata(&present).unwrap().modified().ok());
        assert_eq!(newest_modification(&[missing]), None);
    }
}

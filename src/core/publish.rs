//! Atomic publication of file artifacts.
//!
//! A stage writes into a hidden temporary file next to its final path and
//! renames it into place once the producing process has succeeded. Readers
//! never see a partially written artifact; dropping an uncommitted
//! [`StagedFile`] deletes the temporary file.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use tempfile::{Builder, NamedTempFile};
use tracing::debug;

/// A temporary file destined to replace `target`
#[derive(Debug)]
pub struct StagedFile {
    temp: NamedTempFile,
    target: PathBuf,
}

impl StagedFile {
    /// Create the temporary file in `target`'s directory
    pub fn new(target: impl Into<PathBuf>) -> io::Result<Self> {
        let target = target.into();
        let dir = match target.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let file_name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "artifact".to_string());

        let temp = Builder::new()
            .prefix(&format!(".{}.", file_name))
            .suffix(".partial")
            .tempfile_in(&dir)?;

        Ok(Self { temp, target })
    }

    /// Path of the temporary file
    pub fn path(&self) -> &Path {
        self.temp.path()
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    pub fn file(&self) -> &File {
        self.temp.as_file()
    }

    /// Flush to disk and rename over the target
    pub fn commit(self) -> io::Result<PathBuf> {
        self.temp.as_file().sync_all()?;
        self.temp.persist(&self.target).map_err(|e| e.error)?;
        debug!(artifact = %self.target.display(), "Committed artifact");
        Ok(self.target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<_> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_commit_replaces_target() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("out.csv.gz");
        std::fs::write(&target, b"old").unwrap();

        let staged = StagedFile::new(&target).unwrap();
        assert!(staged
            .path()
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with(".out.csv.gz."));
        staged.file().write_all(b"new").unwrap();
        staged.commit().unwrap();

        assert_eq!(std::fs::read(&target).unwrap(), b"new");
        assert_eq!(entries(temp.path()), vec!["out.csv.gz"]);
    }

    #[test]
    fn test_drop_discards_temp_and_keeps_target() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("out.csv.gz");
        std::fs::write(&target, b"old").unwrap();

        {
            let staged = StagedFile::new(&target).unwrap();
            staged.file().write_all(b"half").unwrap();
        }

        assert_eq!(std::fs::read(&target).unwrap(), b"old");
        assert_eq!(entries(temp.path()), vec!["out.csv.gz"]);
    }
}

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("state directory {path:?} is unusable: {reason}")]
    StateDir { path: PathBuf, reason: String },
    #[error("{file} is not valid RON: {reason}")]
    Format { file: String, reason: String },
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Directory that holds the board's files (job cache, preferences, log).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateDir {
    root: PathBuf,
}

impl StateDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn file(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Creates the directory if needed; fails if the path is something else.
    pub fn ensure(&self) -> Result<(), PersistError> {
        let unusable = |reason: String| PersistError::StateDir {
            path: self.root.clone(),
            reason,
        };
        match fs::metadata(&self.root) {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(unusable("not a directory".into())),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                fs::create_dir_all(&self.root).map_err(|e| unusable(e.to_string()))
            }
            Err(err) => Err(unusable(err.to_string())),
        }
    }

    /// Replaces `name` as one unit: readers see the old or the new content,
    /// never a partial file.
    pub fn write_atomic(&self, name: &str, content: &str) -> Result<PathBuf, PersistError> {
        self.ensure()?;
        let target = self.file(name);
        let mut tmp = NamedTempFile::new_in(&self.root)?;
        tmp.write_all(content.as_bytes())?;
        tmp.as_file_mut().sync_all()?;
        tmp.persist(&target).map_err(|e| PersistError::Io(e.error))?;
        Ok(target)
    }

    /// `Ok(None)` when the file does not exist.
    pub fn read_ron<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, PersistError> {
        let content = match fs::read_to_string(self.file(name)) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        ron::from_str(&content)
            .map(Some)
            .map_err(|err| PersistError::Format {
                file: name.to_string(),
                reason: err.to_string(),
            })
    }

    pub fn write_ron<T: Serialize>(&self, name: &str, value: &T) -> Result<PathBuf, PersistError> {
        let content = ron::ser::to_string_pretty(value, ron::ser::PrettyConfig::new()).map_err(
            |err| PersistError::Format {
                file: name.to_string(),
                reason: err.to_string(),
            },
        )?;
        self.write_atomic(name, &content)
    }
}

//! Durable mapping of proxy names to the cloud resources backing them.
//!
//! The collection is stored as a pretty-printed JSON array. Callers load the
//! full collection, mutate it in memory, and save it back; there is no
//! locking, so only one process may work on a given file at a time.

use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Kind of resource a record points at.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    /// A live compute instance.
    Instance,
    /// A disk whose deletion failed and must not be forgotten.
    Disk,
}

/// One persisted proxy resource.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ProxyRecord {
    /// Logical proxy name.
    pub name: String,
    /// Provider identifier (for example `scaleway`).
    pub provider: String,
    /// Region the resource lives in.
    pub region: String,
    /// Zone the resource lives in.
    pub zone: String,
    /// Provider resource identifier (instance or disk).
    pub instance_id: String,
    /// Public address of the proxy.
    pub ip: String,
    /// Resource kind.
    #[serde(rename = "type")]
    pub kind: ResourceKind,
    /// Human-readable location label.
    #[serde(default)]
    pub location: String,
}

impl ProxyRecord {
    /// Returns `true` when this is the live instance record for `name`.
    #[must_use]
    pub fn is_instance_named(&self, name: &str) -> bool {
        self.kind == ResourceKind::Instance && self.name == name
    }
}

/// Returns the instance record for `name`, if any.
#[must_use]
pub fn find_instance<'a>(records: &'a [ProxyRecord], name: &str) -> Option<&'a ProxyRecord> {
    records.iter().find(|record| record.is_instance_named(name))
}

/// Errors raised while loading or saving records.
#[derive(Debug, Error)]
pub enum RecordStoreError {
    /// Raised when the file system refuses access.
    #[error("failed to access {path}: {message}")]
    Io {
        /// Path that could not be accessed.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when the stored JSON cannot be decoded.
    #[error("failed to parse {path}: {message}")]
    Parse {
        /// Path that could not be parsed.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when records cannot be encoded.
    #[error("failed to serialise records: {0}")]
    Serialise(String),
}

/// Load/save access to the persisted record collection.
pub trait RecordStore: Send + Sync {
    /// Loads every record; a store with no prior state yields an empty list.
    ///
    /// # Errors
    ///
    /// Returns [`RecordStoreError`] when existing state cannot be read.
    fn load(&self) -> Result<Vec<ProxyRecord>, RecordStoreError>;

    /// Replaces the persisted collection with `records`.
    ///
    /// # Errors
    ///
    /// Returns [`RecordStoreError`] when the collection cannot be written.
    fn save(&self, records: &[ProxyRecord]) -> Result<(), RecordStoreError>;
}

/// JSON file backed [`RecordStore`].
#[derive(Clone, Debug)]
pub struct JsonRecordStore {
    path: Utf8PathBuf,
}

impl JsonRecordStore {
    /// Creates a store for the file at `path`.
    #[must_use]
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    fn open_parent(&self) -> Result<Option<Dir>, RecordStoreError> {
        let parent = parent_of(&self.path);
        match Dir::open_ambient_dir(parent, ambient_authority()) {
            Ok(dir) => Ok(Some(dir)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(RecordStoreError::Io {
                path: parent.to_path_buf(),
                message: err.to_string(),
            }),
        }
    }

    fn file_name(&self) -> Result<&str, RecordStoreError> {
        self.path.file_name().ok_or_else(|| RecordStoreError::Io {
            path: self.path.clone(),
            message: String::from("record file path is missing a filename"),
        })
    }
}

fn parent_of(path: &Utf8Path) -> &Utf8Path {
    match path.parent() {
        Some(parent) if !parent.as_str().is_empty() => parent,
        _ => Utf8Path::new("."),
    }
}

impl RecordStore for JsonRecordStore {
    fn load(&self) -> Result<Vec<ProxyRecord>, RecordStoreError> {
        let file_name = self.file_name()?;
        let Some(dir) = self.open_parent()? else {
            return Ok(Vec::new());
        };

        let contents = match dir.read_to_string(file_name) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(RecordStoreError::Io {
                    path: self.path.clone(),
                    message: err.to_string(),
                });
            }
        };

        if contents.trim().is_empty() {
            return Ok(Vec::new());
        }

        serde_json::from_str(&contents).map_err(|err| RecordStoreError::Parse {
            path: self.path.clone(),
            message: err.to_string(),
        })
    }

    fn save(&self, records: &[ProxyRecord]) -> Result<(), RecordStoreError> {
        let parent = parent_of(&self.path);
        Dir::create_ambient_dir_all(parent, ambient_authority()).map_err(|err| {
            RecordStoreError::Io {
                path: parent.to_path_buf(),
                message: err.to_string(),
            }
        })?;
        let file_name = self.file_name()?;
        let dir = self.open_parent()?.ok_or_else(|| RecordStoreError::Io {
            path: parent.to_path_buf(),
            message: String::from("record directory vanished before write"),
        })?;

        let rendered = serde_json::to_string_pretty(records)
            .map_err(|err| RecordStoreError::Serialise(err.to_string()))?;

        dir.write(file_name, rendered)
            .map_err(|err| RecordStoreError::Io {
                path: self.path.clone(),
                message: err.to_string(),
            })
    }
}

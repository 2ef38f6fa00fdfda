//! # Usage Storage
//!
//! Persistence for the usage mapping. The whole mapping is written as one JSON
//! object keyed by track id:
//!
//! ```json
//! {
//!   "track-42": {
//!     "trackId": "track-42",
//!     "usageCount": 7,
//!     "lastUsed": "2025-02-05T10:30:00.123456789Z",
//!     "agencyId": "agency-1",
//!     "favorite": true
//!   }
//! }
//! ```
//!
//! Key order in the document is first-use order and is preserved on load.
//!
//! ## Storage Location
//!
//! ```text
//! ~/.local/share/track-usage/usage.json
//! ```

use super::record::UsageRecord;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use thiserror::Error;

/// File name of the usage store inside the data directory
pub const USAGE_FILE: &str = "usage.json";

/// Errors raised by a persistence backend
#[derive(Error, Debug)]
pub enum StorageError {
    /// Reading, writing or removing the backing file failed
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The stored document is not a valid usage mapping
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Storage cannot be used at all (no data directory, writes disabled)
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

impl StorageError {
    fn io(path: &Path, source: io::Error) -> Self {
        StorageError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Insertion-ordered mapping from track id to its usage record.
///
/// Records are never reordered after insertion, which is what makes the
/// stable sorts in the store break ties by first use.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UsageMap {
    records: Vec<UsageRecord>,
    index: HashMap<String, usize>,
}

impl UsageMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, track_id: &str) -> Option<&UsageRecord> {
        self.index.get(track_id).map(|&i| &self.records[i])
    }

    pub fn get_mut(&mut self, track_id: &str) -> Option<&mut UsageRecord> {
        self.index.get(track_id).map(|&i| &mut self.records[i])
    }

    /// Insert a record, replacing any record with the same track id in place.
    pub fn insert(&mut self, record: UsageRecord) {
        match self.index.get(&record.track_id) {
            Some(&i) => self.records[i] = record,
            None => {
                self.index.insert(record.track_id.clone(), self.records.len());
                self.records.push(record);
            }
        }
    }

    /// Records in insertion order.
    pub fn iter(&self) -> std::slice::Iter<'_, UsageRecord> {
        self.records.iter()
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.index.clear();
    }
}

impl<'a> IntoIterator for &'a UsageMap {
    type Item = &'a UsageRecord;
    type IntoIter = std::slice::Iter<'a, UsageRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl Serialize for UsageMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.records.len()))?;
        for record in &self.records {
            map.serialize_entry(&record.track_id, record)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for UsageMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(UsageMapVisitor)
    }
}

struct UsageMapVisitor;

impl<'de> Visitor<'de> for UsageMapVisitor {
    type Value = UsageMap;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a map of track id to usage record")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
        let mut usage = UsageMap::new();
        while let Some((track_id, mut record)) = access.next_entry::<String, UsageRecord>()? {
            // The key is authoritative
            record.track_id = track_id;
            usage.insert(record);
        }
        Ok(usage)
    }
}

/// Durable home of a usage mapping.
pub trait UsageBackend: fmt::Debug {
    /// Load the stored mapping; `Ok(None)` when nothing has been stored yet.
    fn load(&self) -> Result<Option<UsageMap>, StorageError>;

    /// Replace the stored mapping with `usage` as a single unit.
    fn save(&mut self, usage: &UsageMap) -> Result<(), StorageError>;

    /// Delete the stored mapping. Removing a missing copy is not an error.
    fn remove(&mut self) -> Result<(), StorageError>;

    /// Where the data lives, for log output.
    fn location(&self) -> String;
}

/// Stores the mapping in a single JSON file.
#[derive(Debug, Clone)]
pub struct JsonFileBackend {
    path: PathBuf,
}

impl JsonFileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Backend at the platform data directory (`~/.local/share/track-usage/usage.json` on Linux).
    pub fn at_default_location() -> Result<Self, StorageError> {
        Ok(Self::new(default_store_path()?))
    }

    fn temp_path(&self) -> PathBuf {
        self.path.with_extension("json.tmp")
    }
}

impl UsageBackend for JsonFileBackend {
    fn load(&self) -> Result<Option<UsageMap>, StorageError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::io(&self.path, e)),
        };

        if content.trim().is_empty() {
            return Ok(None);
        }

        Ok(Some(serde_json::from_str(&content)?))
    }

    fn save(&mut self, usage: &UsageMap) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| StorageError::io(parent, e))?;
        }

        let json = serde_json::to_string_pretty(usage)?;

        // Readers only ever see a complete document
        let temp_path = self.temp_path();
        fs::write(&temp_path, json).map_err(|e| StorageError::io(&temp_path, e))?;
        if let Err(e) = fs::rename(&temp_path, &self.path) {
            let _ = fs::remove_file(&temp_path);
            return Err(StorageError::io(&self.path, e));
        }

        Ok(())
    }

    fn remove(&mut self) -> Result<(), StorageError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::io(&self.path, e)),
        }
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}

/// Keeps the serialized mapping in memory.
///
/// Clones share the same slot, so opening a second store on a clone behaves
/// like a process restart against the same storage. Writes can be switched off
/// to reproduce a full or disabled storage area.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    slot: Rc<RefCell<MemorySlot>>,
}

#[derive(Debug, Default)]
struct MemorySlot {
    contents: Option<String>,
    fail_writes: bool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `save`/`remove` fail (or succeed again).
    pub fn set_fail_writes(&self, fail: bool) {
        self.slot.borrow_mut().fail_writes = fail;
    }

    /// The stored document, if any.
    pub fn raw(&self) -> Option<String> {
        self.slot.borrow().contents.clone()
    }

    /// Overwrite the stored document verbatim, bypassing serialization.
    pub fn put_raw(&self, contents: impl Into<String>) {
        self.slot.borrow_mut().contents = Some(contents.into());
    }

    fn check_writable(&self) -> Result<(), StorageError> {
        if self.slot.borrow().fail_writes {
            return Err(StorageError::Unavailable(
                "in-memory storage is not accepting writes".to_string(),
            ));
        }
        Ok(())
    }
}

impl UsageBackend for MemoryBackend {
    fn load(&self) -> Result<Option<UsageMap>, StorageError> {
        match &self.slot.borrow().contents {
            Some(contents) => Ok(Some(serde_json::from_str(contents)?)),
            None => Ok(None),
        }
    }

    fn save(&mut self, usage: &UsageMap) -> Result<(), StorageError> {
        self.check_writable()?;
        let json = serde_json::to_string(usage)?;
        self.slot.borrow_mut().contents = Some(json);
        Ok(())
    }

    fn remove(&mut self) -> Result<(), StorageError> {
        self.check_writable()?;
        self.slot.borrow_mut().contents = None;
        Ok(())
    }

    fn location(&self) -> String {
        "memory".to_string()
    }
}

/// Get the XDG-compliant path of the usage file
pub fn default_store_path() -> Result<PathBuf, StorageError> {
    let proj_dirs = directories::ProjectDirs::from("", "", "track-usage").ok_or_else(|| {
        StorageError::Unavailable("could not determine application data directory".to_string())
    })?;

    Ok(proj_dirs.data_dir().join(USAGE_FILE))
}

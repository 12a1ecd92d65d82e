#![forbid(unsafe_code)]

//! Video records, the in-memory library and its JSON persistence.
//!
//! The persisted form is a single JSON object keyed by video id. Field names
//! match what earlier deployments wrote to `videos.json`, so an existing index
//! loads without migration.

use std::{
    collections::{BTreeMap, HashSet},
    fs,
    io::{ErrorKind, Write},
    path::{Component, Path, PathBuf},
};

use serde::{Deserialize, Deserializer, Serialize};
use tempfile::NamedTempFile;
use tracing::{error, info, warn};

use crate::error::{LibraryError, Result};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Title used when the source reported none.
pub const UNKNOWN_TITLE: &str = "Unknown Title";

/// One stored media file and what we know about it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoRecord {
    pub id: String,
    #[serde(deserialize_with = "lenient_title")]
    pub title: String,
    /// Name of the media file inside the storage directory.
    pub filename: String,
    #[serde(
        rename = "duration",
        default,
        deserialize_with = "lenient_seconds"
    )]
    pub duration_seconds: u64,
    #[serde(
        rename = "thumbnail",
        default,
        deserialize_with = "lenient_string"
    )]
    pub thumbnail_url: String,
    /// Empty for files discovered on disk rather than downloaded.
    #[serde(
        rename = "original_url",
        default,
        deserialize_with = "lenient_string"
    )]
    pub source_url: String,
    /// Size in MiB captured at registration or scan time. Never refreshed.
    #[serde(rename = "file_size", default)]
    pub file_size_mb: f64,
}

impl VideoRecord {
    /// True when the record came from a scan instead of a download.
    pub fn is_local_discovery(&self) -> bool {
        self.source_url.is_empty()
    }
}

/// Converts a byte count to MiB rounded to two decimals.
pub fn bytes_to_mb(bytes: u64) -> f64 {
    ((bytes as f64 / BYTES_PER_MB) * 100.0).round() / 100.0
}

/// Older indexes stored `null` or fractional durations.
fn lenient_seconds<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<f64>::deserialize(deserializer)?;
    Ok(value
        .filter(|seconds| seconds.is_finite() && *seconds > 0.0)
        .map(|seconds| seconds.round() as u64)
        .unwrap_or(0))
}

fn lenient_title<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?
        .unwrap_or_else(|| UNKNOWN_TITLE.to_string()))
}

fn lenient_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// Mapping from video id to record. Insertion order is not significant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Library {
    records: BTreeMap<String, VideoRecord>,
}

impl Library {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.records.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Result<&VideoRecord> {
        self.records
            .get(id)
            .ok_or_else(|| LibraryError::NotFound(id.to_owned()))
    }

    /// Snapshot of every record, ordered by id.
    pub fn all(&self) -> Vec<VideoRecord> {
        self.records.values().cloned().collect()
    }

    /// Inserts or replaces the record with the same id. Does not persist.
    pub fn upsert(&mut self, record: VideoRecord) {
        self.records.insert(record.id.clone(), record);
    }

    /// Removes a record from memory. Does not persist.
    pub fn remove(&mut self, id: &str) -> Result<VideoRecord> {
        self.records
            .remove(id)
            .ok_or_else(|| LibraryError::NotFound(id.to_owned()))
    }

    /// Every id and filename currently tracked; used as the scanner's known set.
    pub fn known_names(&self) -> HashSet<String> {
        self.records
            .values()
            .flat_map(|record| [record.id.clone(), record.filename.clone()])
            .collect()
    }

    /// Drops entries whose map key disagrees with the record id or whose
    /// filename would resolve outside the storage directory.
    fn retain_valid_entries(&mut self) {
        self.records.retain(|key, record| {
            if *key != record.id {
                warn!(key = %key, id = %record.id, "skipping metadata entry with mismatched id");
                false
            } else if !is_plain_filename(&record.filename) {
                warn!(id = %record.id, filename = %record.filename, "skipping metadata entry with unsafe filename");
                false
            } else {
                true
            }
        });
    }
}

/// True for a single normal path component such as `abc.mp4`.
pub fn is_plain_filename(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

/// Result of reading the persisted index.
#[derive(Debug)]
pub enum LoadOutcome {
    Loaded(Library),
    /// No index on disk yet.
    Missing,
    /// The index could not be used; callers should rebuild from a full scan.
    Malformed(LibraryError),
}

impl LoadOutcome {
    pub fn needs_rebuild(&self) -> bool {
        matches!(self, Self::Malformed(_))
    }

    pub fn into_library(self) -> Library {
        match self {
            Self::Loaded(library) => library,
            Self::Missing | Self::Malformed(_) => Library::new(),
        }
    }
}

/// Reads and writes the JSON index at a fixed path.
#[derive(Debug, Clone)]
pub struct MetadataStore {
    path: PathBuf,
}

impl MetadataStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> LoadOutcome {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return LoadOutcome::Missing,
            Err(source) => {
                let err = LibraryError::LoadIo {
                    path: self.path.clone(),
                    source,
                };
                error!("{err}");
                return LoadOutcome::Malformed(err);
            }
        };

        match serde_json::from_slice::<Library>(&raw) {
            Ok(mut library) => {
                library.retain_valid_entries();
                info!(count = library.len(), path = %self.path.display(), "loaded video metadata");
                LoadOutcome::Loaded(library)
            }
            Err(source) => {
                let err = LibraryError::LoadFormat {
                    path: self.path.clone(),
                    source,
                };
                error!("{err}");
                LoadOutcome::Malformed(err)
            }
        }
    }

    /// Writes the whole library through a temporary file in the same directory
    /// and renames it over the index, so readers never see a partial write.
    pub fn save(&self, library: &Library) -> Result<()> {
        self.write_atomic(library).map_err(|source| {
            let err = LibraryError::Save {
                path: self.path.clone(),
                source,
            };
            error!("{err}");
            err
        })?;
        info!(count = library.len(), "saved video metadata");
        Ok(())
    }

    fn write_atomic(&self, library: &Library) -> std::io::Result<()> {
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent)?;
        let payload = serde_json::to_vec_pretty(library).map_err(std::io::Error::other)?;
        let mut tmp = NamedTempFile::new_in(parent)?;
        // Temp files start owner-only; keep whatever mode the index already had.
        match fs::metadata(&self.path) {
            Ok(existing) => tmp.as_file().set_permissions(existing.permissions())?,
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(err),
        }
        tmp.write_all(&payload)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|err| err.error)?;
        Ok(())
    }
}

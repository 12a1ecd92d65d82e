#![forbid(unsafe_code)]

//! Read-only discovery of media files the index does not know about yet.

use std::{collections::HashSet, path::Path};

use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{LibraryError, Result};

/// Container formats picked up by a scan.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["mp4", "webm", "mkv"];

/// A media file found on disk with no matching record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedFile {
    /// File stem, used as the record id.
    pub id: String,
    pub filename: String,
    pub size_bytes: u64,
}

pub fn is_supported_media(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            SUPPORTED_EXTENSIONS
                .iter()
                .any(|supported| ext.eq_ignore_ascii_case(supported))
        })
        .unwrap_or(false)
}

/// Lists supported media files directly inside `directory` whose id or
/// filename is not in `known`. Results are sorted by filename.
///
/// Nothing on disk is modified.
pub fn scan(directory: &Path, known: &HashSet<String>) -> Result<Vec<ScannedFile>> {
    let mut found = Vec::new();

    for entry in WalkDir::new(directory)
        .min_depth(1)
        .max_depth(1)
        .follow_links(false)
        .sort_by_file_name()
    {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) if err.depth() == 0 => {
                return Err(LibraryError::Scan {
                    path: directory.to_path_buf(),
                    source: err.into(),
                });
            }
            Err(err) => {
                warn!("skipping unreadable entry in {}: {err}", directory.display());
                continue;
            }
        };

        if !entry.file_type().is_file() || !is_supported_media(entry.path()) {
            continue;
        }

        let Some(filename) = entry.file_name().to_str().map(str::to_owned) else {
            warn!("skipping non UTF-8 filename {:?}", entry.file_name());
            continue;
        };
        let Some(id) = entry
            .path()
            .file_stem()
            .and_then(|stem| stem.to_str())
            .map(str::to_owned)
        else {
            continue;
        };
        if id.is_empty() || known.contains(&id) || known.contains(&filename) {
            continue;
        }

        let size_bytes = match entry.metadata() {
            Ok(metadata) => metadata.len(),
            Err(err) => {
                // The file may have vanished between listing and stat.
                warn!("skipping {filename}: {err}");
                continue;
            }
        };

        debug!(%filename, size_bytes, "found untracked media file");
        found.push(ScannedFile {
            id,
            filename,
            size_bytes,
        });
    }

    Ok(found)
}

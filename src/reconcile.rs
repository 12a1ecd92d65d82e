#![forbid(unsafe_code)]

//! Brings the library in line with the storage directory by adding records for
//! orphan media files.

use std::path::Path;

use tracing::info;

use crate::{
    error::Result,
    library::{Library, VideoRecord, bytes_to_mb},
    scanner::{self, ScannedFile},
};

const PLACEHOLDER_ID_CHARS: usize = 8;

/// Display title for a file we know nothing about.
pub fn placeholder_title(id: &str) -> String {
    let short: String = id.chars().take(PLACEHOLDER_ID_CHARS).collect();
    format!("Video {short}")
}

fn orphan_record(file: ScannedFile) -> VideoRecord {
    VideoRecord {
        title: placeholder_title(&file.id),
        id: file.id,
        filename: file.filename,
        duration_seconds: 0,
        thumbnail_url: String::new(),
        source_url: String::new(),
        file_size_mb: bytes_to_mb(file.size_bytes),
    }
}

/// Adds a record for every orphan file in `directory` and returns how many
/// were added. Existing records are never replaced.
///
/// The library is not persisted here; callers save when the count is non-zero.
pub fn reconcile(library: &mut Library, directory: &Path) -> Result<usize> {
    let orphans = scanner::scan(directory, &library.known_names())?;
    let mut added = 0;
    for file in orphans {
        if library.contains(&file.id) {
            continue;
        }
        library.upsert(orphan_record(file));
        added += 1;
    }
    if added > 0 {
        info!(added, directory = %directory.display(), "registered untracked media files");
    }
    Ok(added)
}

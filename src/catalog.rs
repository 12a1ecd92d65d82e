#![forbid(unsafe_code)]

//! The catalog owns the library, its metadata store and the storage directory.
//!
//! Every operation takes the same lock, so reconciliation, acquisition plus
//! registration, and deletion never interleave and a save always contains the
//! upserts that preceded it. Acquisition holds the lock for the full download;
//! listings queue behind it.

use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use anyhow::Context;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::{
    acquire::Gateway,
    error::{LibraryError, Result},
    library::{Library, MetadataStore, VideoRecord},
    reconcile::reconcile,
};

#[derive(Debug)]
pub struct Catalog {
    storage_dir: PathBuf,
    inner: Mutex<CatalogInner>,
}

#[derive(Debug)]
struct CatalogInner {
    library: Library,
    store: MetadataStore,
}

/// What happened to the backing file during a delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    FileRemoved,
    /// The file was already gone; only the record was dropped.
    FileAlreadyMissing,
    /// The file could not be removed; the record was dropped anyway.
    FileRemovalFailed,
}

/// Snapshot used by the diagnostics endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct CatalogReport {
    pub storage_dir: PathBuf,
    pub metadata_path: PathBuf,
    pub videos_count: usize,
    pub videos_keys: Vec<String>,
    /// Filenames of records whose file no longer exists.
    pub missing_files: Vec<String>,
}

impl Catalog {
    /// Creates the storage directory, loads the index and reconciles it with
    /// disk. A corrupt index is replaced by a full rebuild from the directory.
    pub fn open(store: MetadataStore, storage_dir: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let storage_dir = storage_dir.into();
        fs::create_dir_all(&storage_dir)
            .with_context(|| format!("creating storage directory {}", storage_dir.display()))?;

        let outcome = store.load();
        let rebuild = outcome.needs_rebuild();
        if rebuild {
            warn!("rebuilding video metadata from {}", storage_dir.display());
        }
        let mut library = outcome.into_library();
        let added = reconcile(&mut library, &storage_dir)
            .with_context(|| format!("scanning {}", storage_dir.display()))?;
        if (added > 0 || rebuild)
            && let Err(err) = store.save(&library)
        {
            // Memory stays authoritative; the next mutation retries the write.
            warn!("startup save failed: {err}");
        }
        info!(count = library.len(), "video catalog ready");

        Ok(Self {
            storage_dir,
            inner: Mutex::new(CatalogInner { library, store }),
        })
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    /// Reconciles with disk, then returns every record.
    ///
    /// A failed save of newly discovered records is logged and the listing is
    /// still returned; the records stay in memory.
    pub fn list(&self) -> Result<Vec<VideoRecord>> {
        let mut inner = self.inner.lock();
        let added = reconcile(&mut inner.library, &self.storage_dir)?;
        if added > 0
            && let Err(err) = inner.store.save(&inner.library)
        {
            error!("could not persist {added} discovered videos: {err}");
        }
        Ok(inner.library.all())
    }

    pub fn get(&self, id: &str) -> Result<VideoRecord> {
        self.inner.lock().library.get(id).cloned()
    }

    /// Path of the media file behind `id`, checked to exist.
    pub fn media_path(&self, id: &str) -> Result<PathBuf> {
        let record = self.get(id)?;
        let path = self.storage_dir.join(&record.filename);
        if path.is_file() {
            Ok(path)
        } else {
            warn!(%id, path = %path.display(), "video file missing on disk");
            Err(LibraryError::MissingFile {
                id: record.id,
                path,
            })
        }
    }

    /// Downloads `source_url` through the gateway, registers the new record
    /// and persists the library.
    pub fn acquire(&self, gateway: &Gateway, source_url: &str) -> Result<VideoRecord> {
        let mut inner = self.inner.lock();
        let record = gateway.acquire(source_url, &self.storage_dir)?;
        inner.library.upsert(record.clone());
        inner.store.save(&inner.library)?;
        Ok(record)
    }

    /// Removes the record and its file. A missing file still counts as a
    /// successful delete.
    pub fn delete(&self, id: &str) -> Result<DeleteOutcome> {
        let mut inner = self.inner.lock();
        let record = inner.library.get(id)?.clone();
        let path = self.storage_dir.join(&record.filename);

        let outcome = match fs::remove_file(&path) {
            Ok(()) => {
                info!("deleted file {}", path.display());
                DeleteOutcome::FileRemoved
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                warn!("file not found for deletion: {}", path.display());
                DeleteOutcome::FileAlreadyMissing
            }
            Err(err) => {
                error!("error deleting file {}: {err}", path.display());
                DeleteOutcome::FileRemovalFailed
            }
        };

        inner.library.remove(id)?;
        inner.store.save(&inner.library)?;
        Ok(outcome)
    }

    pub fn report(&self) -> CatalogReport {
        let inner = self.inner.lock();
        let records = inner.library.all();
        let missing_files = records
            .iter()
            .filter(|record| !self.storage_dir.join(&record.filename).is_file())
            .map(|record| record.filename.clone())
            .collect();
        CatalogReport {
            storage_dir: self.storage_dir.clone(),
            metadata_path: inner.store.path().to_path_buf(),
            videos_count: records.len(),
            videos_keys: records.into_iter().map(|record| record.id).collect(),
            missing_files,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquire::{AcquisitionErrorKind, tests::FakeExtractor};
    use std::{collections::HashSet, sync::Arc, thread};
    use tempfile::{TempDir, tempdir};

    struct Fixture {
        _temp: TempDir,
        storage: PathBuf,
        metadata: PathBuf,
    }

    impl Fixture {
        fn new() -> Self {
            let temp = tempdir().unwrap();
            let storage = temp.path().join("downloads");
            let metadata = temp.path().join("videos.json");
            Self {
                _temp: temp,
                storage,
                metadata,
            }
        }

        fn open(&self) -> Catalog {
            Catalog::open(MetadataStore::new(&self.metadata), &self.storage).unwrap()
        }

        fn persisted(&self) -> Library {
            MetadataStore::new(&self.metadata).load().into_library()
        }
    }

    fn gateway(extractor: FakeExtractor) -> Gateway {
        Gateway::new(Arc::new(extractor))
    }

    #[test]
    fn open_creates_storage_and_registers_orphans() {
        let fixture = Fixture::new();
        fs::create_dir_all(&fixture.storage).unwrap();
        fs::write(fixture.storage.join("abc123.mp4"), "x").unwrap();

        let catalog = fixture.open();
        assert!(catalog.get("abc123").is_ok());
        assert!(fixture.persisted().contains("abc123"));
    }

    #[test]
    fn open_rebuilds_from_disk_when_index_is_corrupt() {
        let fixture = Fixture::new();
        fs::create_dir_all(&fixture.storage).unwrap();
        fs::write(fixture.storage.join("keep.webm"), "x").unwrap();
        fs::write(&fixture.metadata, "[[[").unwrap();

        let catalog = fixture.open();
        let listed = catalog.list().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, "keep");
        assert!(fixture.persisted().contains("keep"));
    }

    #[test]
    fn index_entries_pointing_outside_storage_are_never_served_or_deleted() {
        let fixture = Fixture::new();
        fs::create_dir_all(&fixture.storage).unwrap();
        let victim = fixture._temp.path().join("victim.txt");
        fs::write(&victim, "keep me").unwrap();
        let index = serde_json::json!({
            "evil": {"id": "evil", "title": "E", "filename": victim.to_str().unwrap()},
            "sneaky": {"id": "sneaky", "title": "S", "filename": "../victim.txt"},
        });
        fs::write(&fixture.metadata, index.to_string()).unwrap();

        let catalog = fixture.open();
        for id in ["evil", "sneaky"] {
            assert!(catalog.media_path(id).unwrap_err().is_not_found());
            assert!(matches!(catalog.delete(id), Err(LibraryError::NotFound(_))));
        }
        assert!(victim.exists());
    }

    #[test]
    fn list_picks_up_files_added_later() {
        let fixture = Fixture::new();
        let catalog = fixture.open();
        assert!(catalog.list().unwrap().is_empty());

        fs::write(fixture.storage.join("late.mkv"), "x").unwrap();
        let listed = catalog.list().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].title, "Video late");
        assert!(fixture.persisted().contains("late"));
    }

    #[test]
    fn acquire_registers_and_persists() {
        let fixture = Fixture::new();
        let catalog = fixture.open();
        let record = catalog
            .acquire(&gateway(FakeExtractor::producing(16)), "https://youtu.be/x")
            .unwrap();
        assert_eq!(catalog.get(&record.id).unwrap(), record);
        assert_eq!(fixture.persisted().get(&record.id).unwrap(), &record);
    }

    #[test]
    fn acquire_failure_leaves_library_untouched() {
        let fixture = Fixture::new();
        let catalog = fixture.open();
        let err = catalog
            .acquire(&gateway(FakeExtractor::failing("Video unavailable")), "u")
            .unwrap_err();
        match err {
            LibraryError::Acquisition(failure) => {
                assert_eq!(failure.kind, AcquisitionErrorKind::ContentUnavailable)
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(catalog.list().unwrap().is_empty());
    }

    #[test]
    fn delete_removes_record_and_file() {
        let fixture = Fixture::new();
        let catalog = fixture.open();
        let record = catalog
            .acquire(&gateway(FakeExtractor::producing(16)), "https://youtu.be/x")
            .unwrap();
        let path = fixture.storage.join(&record.filename);
        assert!(path.exists());

        assert_eq!(catalog.delete(&record.id).unwrap(), DeleteOutcome::FileRemoved);
        assert!(!path.exists());
        assert!(catalog.get(&record.id).unwrap_err().is_not_found());
        assert!(catalog.list().unwrap().iter().all(|r| r.id != record.id));
        assert!(!fixture.persisted().contains(&record.id));
    }

    #[test]
    fn delete_with_missing_file_still_succeeds() {
        let fixture = Fixture::new();
        let catalog = fixture.open();
        let record = catalog
            .acquire(&gateway(FakeExtractor::producing(16)), "https://youtu.be/x")
            .unwrap();
        fs::remove_file(fixture.storage.join(&record.filename)).unwrap();

        assert_eq!(
            catalog.delete(&record.id).unwrap(),
            DeleteOutcome::FileAlreadyMissing
        );
        assert!(catalog.get(&record.id).is_err());
    }

    #[test]
    fn delete_unknown_id_is_not_found() {
        let fixture = Fixture::new();
        let catalog = fixture.open();
        assert!(matches!(
            catalog.delete("ghost"),
            Err(LibraryError::NotFound(_))
        ));
    }

    #[test]
    fn media_path_reports_dangling_records() {
        let fixture = Fixture::new();
        let catalog = fixture.open();
        let record = catalog
            .acquire(&gateway(FakeExtractor::producing(16)), "https://youtu.be/x")
            .unwrap();
        assert!(catalog.media_path(&record.id).is_ok());

        fs::remove_file(fixture.storage.join(&record.filename)).unwrap();
        let err = catalog.media_path(&record.id).unwrap_err();
        assert!(matches!(err, LibraryError::MissingFile { .. }));
        assert!(err.is_not_found());
        assert_eq!(catalog.report().missing_files, vec![record.filename]);
    }

    #[test]
    fn save_failure_keeps_memory_state() {
        let fixture = Fixture::new();
        fs::create_dir_all(&fixture.storage).unwrap();
        // A regular file where the index directory should be makes every save fail.
        let blocker = fixture.storage.join("blocker");
        fs::write(&blocker, "x").unwrap();
        let blocked = Catalog::open(
            MetadataStore::new(blocker.join("videos.json")),
            &fixture.storage,
        )
        .unwrap();

        let err = blocked
            .acquire(&gateway(FakeExtractor::producing(4)), "https://youtu.be/x")
            .unwrap_err();
        assert!(matches!(err, LibraryError::Save { .. }));
        // The record stays registered in memory even though the write failed.
        assert_eq!(blocked.report().videos_count, 1);
    }

    #[test]
    fn concurrent_acquisitions_are_all_persisted() {
        let fixture = Fixture::new();
        let catalog = Arc::new(fixture.open());
        let gateway = Arc::new(gateway(FakeExtractor::producing(8)));

        let handles: Vec<_> = (0..100)
            .map(|n| {
                let catalog = Arc::clone(&catalog);
                let gateway = Arc::clone(&gateway);
                thread::spawn(move || {
                    catalog
                        .acquire(&gateway, &format!("https://youtu.be/{n}"))
                        .unwrap()
                        .id
                })
            })
            .collect();
        let ids: HashSet<String> = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .collect();

        assert_eq!(ids.len(), 100);
        let persisted = fixture.persisted();
        assert_eq!(persisted.len(), 100);
        assert!(ids.iter().all(|id| persisted.contains(id)));
    }
}

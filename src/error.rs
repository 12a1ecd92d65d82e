#![forbid(unsafe_code)]

//! Error types shared by the catalog, the metadata store and the acquisition
//! gateway.

use std::path::PathBuf;

use thiserror::Error;

use crate::acquire::AcquisitionFailure;

#[derive(Debug, Error)]
pub enum LibraryError {
    /// The persisted index exists but could not be read.
    #[error("reading metadata file {}: {source}", path.display())]
    LoadIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The persisted index is not valid JSON for a library.
    #[error("parsing metadata file {}: {source}", path.display())]
    LoadFormat {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("saving metadata file {}: {source}", path.display())]
    Save {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("scanning storage directory {}: {source}", path.display())]
    Scan {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("video {0} not found")]
    NotFound(String),

    /// The record exists but its backing file is gone.
    #[error("file {} for video {id} is missing", path.display())]
    MissingFile { id: String, path: PathBuf },

    #[error(transparent)]
    Acquisition(#[from] AcquisitionFailure),
}

impl LibraryError {
    /// True for errors that a client should see as "not found".
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::MissingFile { .. })
    }
}

pub type Result<T> = std::result::Result<T, LibraryError>;

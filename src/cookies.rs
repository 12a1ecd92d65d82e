#![forbid(unsafe_code)]

//! Locates the cookie file handed to yt-dlp for sites that demand a login.

use std::{
    fs::{self, File},
    path::{Path, PathBuf},
};

use serde::Serialize;
use tracing::{info, warn};

/// Checked in order; the first existing file is used.
pub const COOKIE_FILE_NAMES: &[&str] = &["youtube_cookies.txt", "cookies.txt"];

pub fn find_cookie_file(dir: &Path) -> Option<PathBuf> {
    let found = COOKIE_FILE_NAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.is_file());
    match &found {
        Some(path) => info!("using cookie file {}", path.display()),
        None => warn!(
            "no cookie file found in {}; sites that require sign-in will fail",
            dir.display()
        ),
    }
    found
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CookieFileStatus {
    pub name: String,
    pub exists: bool,
    pub size_bytes: u64,
    pub readable: bool,
}

/// Reports every candidate cookie file, used by the diagnostics endpoint.
pub fn cookie_status(dir: &Path) -> Vec<CookieFileStatus> {
    COOKIE_FILE_NAMES
        .iter()
        .map(|name| {
            let path = dir.join(name);
            let metadata = fs::metadata(&path).ok().filter(|meta| meta.is_file());
            CookieFileStatus {
                name: (*name).to_string(),
                exists: metadata.is_some(),
                size_bytes: metadata.as_ref().map(|meta| meta.len()).unwrap_or(0),
                readable: metadata.is_some() && File::open(&path).is_ok(),
            }
        })
        .collect()
}

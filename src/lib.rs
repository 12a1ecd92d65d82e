#![forbid(unsafe_code)]

//! Local video library: a JSON-indexed store of downloaded media files, kept in
//! line with its storage directory and fed by an external downloader.

pub mod acquire;
pub mod catalog;
pub mod config;
pub mod cookies;
pub mod error;
pub mod library;
pub mod reconcile;
pub mod scanner;
pub mod security;
pub mod ytdlp;

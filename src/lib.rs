//! Page archiver library.
//!
//! Fetches a web page, stores its HTML together with the stylesheets,
//! scripts and images it references, tracks each job in SQLite, and serves
//! the archived bundle back over a small JSON API.

pub mod archiver;
pub mod config;
pub mod constants;
pub mod db;
pub mod error;
pub mod store;
pub mod web;

pub use archiver::{ArchiveContent, Archiver, ConvertOptions, ConvertOutcome};
pub use error::{ArchiveError, AssetError};
pub use store::{BlobStore, LocalBlobStore, RecordStore, StoreError};

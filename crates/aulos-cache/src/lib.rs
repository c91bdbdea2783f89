#![forbid(unsafe_code)]

//! Bounded on-disk LRU store for downloaded track bodies.
//!
//! Entries are keyed by a [`CacheId`] fingerprint of the transfer URI. An
//! entry is *in-progress* while a downloader writes it (`<id>.part`) and
//! becomes *finalized* when the download completes (`<id>.body` plus a JSON
//! sidecar carrying the content type). Only finalized entries are visible to
//! future openers and only finalized entries are evicted.

mod id;
mod registry;
mod store;

use thiserror::Error;

pub use id::CacheId;
pub use registry::cache_for;
pub use store::{EntryInfo, LruDiskCache};

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type CacheResult<T> = Result<T, CacheError>;

#![forbid(unsafe_code)]

//! Seekable HTTP data stream backed by a bounded disk cache.
//!
//! [`HttpDataStream`] lets a media pipeline read bytes from a remote URL as
//! if from a local seekable file. On first open the body is downloaded by a
//! background thread into a cache entry while a blocking reader serves
//! consumer reads over the same file; completed downloads are finalized into
//! a count-capped LRU cache and served without touching the network on later
//! opens.

mod config;
mod error;
mod reader;
mod stream;
mod uri;

pub use config::{
    settings_schema, SettingSpec, StreamEnv, StreamSettings, CHUNK_BYTES_KEY,
    DEFAULT_CHUNK_BYTES, DEFAULT_MAX_CACHE_FILES, DEFAULT_PRECACHE_BYTES, MAX_CACHE_FILES_KEY,
    MIN_CHUNK_BYTES, MIN_PRECACHE_BYTES, PRECACHE_BYTES_KEY,
};
pub use error::{StreamError, StreamResult};
pub use reader::FileReadStream;
pub use stream::{HttpDataStream, OpenFlags, StreamState};
pub use uri::REMOTE_TRACK_PREFIX;

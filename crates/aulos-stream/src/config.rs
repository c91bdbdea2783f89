use std::path::PathBuf;

use aulos_net::NetOptions;

pub const DEFAULT_MAX_CACHE_FILES: u32 = 35;
pub const DEFAULT_PRECACHE_BYTES: u64 = 524_288;
pub const DEFAULT_CHUNK_BYTES: u64 = 131_072;

pub const MIN_PRECACHE_BYTES: u64 = 32_768;
pub const MIN_CHUNK_BYTES: u64 = 32_768;

pub const MAX_CACHE_FILES_KEY: &str = "max_cache_files";
pub const PRECACHE_BYTES_KEY: &str = "precache_buffer_size_bytes";
pub const CHUNK_BYTES_KEY: &str = "chunk_size_bytes";

/// One advertised integer setting, for host configuration UIs.
#[derive(Clone, Copy, Debug)]
pub struct SettingSpec {
    pub key: &'static str,
    pub default: u64,
    pub min: Option<u64>,
}

/// The settings this stream advertises to its host.
pub fn settings_schema() -> &'static [SettingSpec] {
    &[
        SettingSpec {
            key: MAX_CACHE_FILES_KEY,
            default: DEFAULT_MAX_CACHE_FILES as u64,
            min: None,
        },
        SettingSpec {
            key: PRECACHE_BYTES_KEY,
            default: DEFAULT_PRECACHE_BYTES,
            min: Some(MIN_PRECACHE_BYTES),
        },
        SettingSpec {
            key: CHUNK_BYTES_KEY,
            default: DEFAULT_CHUNK_BYTES,
            min: Some(MIN_CHUNK_BYTES),
        },
    ]
}

/// Tunables for a stream open, normally sourced from host preferences.
#[derive(Clone, Debug)]
pub struct StreamSettings {
    /// Cap on finalized cache entries.
    pub max_cache_files: u32,
    /// Bytes that must be on disk before `open` unblocks the consumer.
    pub precache_bytes: u64,
    /// Bytes accumulated before the writer flushes and publishes progress.
    pub chunk_bytes: u64,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            max_cache_files: DEFAULT_MAX_CACHE_FILES,
            precache_bytes: DEFAULT_PRECACHE_BYTES,
            chunk_bytes: DEFAULT_CHUNK_BYTES,
        }
    }
}

impl StreamSettings {
    /// Clamp the byte thresholds to their advertised floors.
    pub fn clamped(mut self) -> Self {
        self.precache_bytes = self.precache_bytes.max(MIN_PRECACHE_BYTES);
        self.chunk_bytes = self.chunk_bytes.max(MIN_CHUNK_BYTES);
        self
    }
}

/// Host-provided context for stream construction.
///
/// Threaded explicitly through [`crate::HttpDataStream::open`]; the only
/// process-wide state is the per-root cache registry.
#[derive(Clone, Debug)]
pub struct StreamEnv {
    pub cache_dir: PathBuf,
    pub settings: StreamSettings,
    pub net: NetOptions,
}

impl StreamEnv {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            settings: StreamSettings::default(),
            net: NetOptions::default(),
        }
    }
}

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{Arc, OnceLock},
};

use parking_lot::Mutex;

use crate::{CacheResult, LruDiskCache};

static CACHES: OnceLock<Mutex<HashMap<PathBuf, Arc<LruDiskCache>>>> = OnceLock::new();

/// Return the process-wide cache for `root`, creating it on first use.
///
/// Repeated calls are idempotent; the first call for a given root wins the
/// configuration, so a later caller with a different `max_entries` receives
/// the existing instance unchanged.
pub fn cache_for(root: impl AsRef<Path>, max_entries: usize) -> CacheResult<Arc<LruDiskCache>> {
    let root = root.as_ref().to_path_buf();
    let caches = CACHES.get_or_init(|| Mutex::new(HashMap::new()));

    let mut caches = caches.lock();
    if let Some(cache) = caches.get(&root) {
        return Ok(Arc::clone(cache));
    }

    let cache = Arc::new(LruDiskCache::open(&root, max_entries)?);
    caches.insert(root, Arc::clone(&cache));
    Ok(cache)
}

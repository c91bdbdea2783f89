use std::{
    collections::HashMap,
    fs::{self, File, OpenOptions},
    path::{Path, PathBuf},
    time::SystemTime,
};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{CacheId, CacheResult};

/// Metadata persisted next to a finalized body.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct SidecarMeta {
    content_type: String,
}

/// Metadata returned when a finalized entry is opened for reading.
#[derive(Clone, Debug)]
pub struct EntryInfo {
    pub content_type: String,
    pub len: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum EntryState {
    InProgress,
    Finalized,
}

#[derive(Debug)]
struct Entry {
    state: EntryState,
    /// Empty until the entry is finalized.
    content_type: String,
}

#[derive(Default)]
struct Index {
    entries: HashMap<CacheId, Entry>,
    /// Finalized ids, least- to most-recently read.
    order: Vec<CacheId>,
}

/// Count-capped file store with LRU eviction of finalized entries.
///
/// All operations are safe under concurrent invocation; the in-memory index
/// is serialized by a single mutex held only for short bounded operations.
/// The store does not arbitrate semantic conflicts: two writers for the same
/// id share the in-progress slot and the last one to finalize wins.
pub struct LruDiskCache {
    root: PathBuf,
    max_entries: usize,
    index: Mutex<Index>,
}

impl LruDiskCache {
    /// Open (or create) a cache rooted at `root`, rebuilding the index from
    /// the files already present.
    ///
    /// Stale `.part` leftovers and entries with unreadable metadata are
    /// removed best-effort; a corrupt entry never poisons the rest of the
    /// index. If more finalized entries exist than `max_entries` allows
    /// (the cap was lowered), the excess is evicted immediately.
    pub fn open(root: impl Into<PathBuf>, max_entries: usize) -> CacheResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;

        let index = scan(&root)?;
        let cache = Self {
            root,
            max_entries,
            index: Mutex::new(index),
        };

        {
            let mut index = cache.index.lock();
            cache.evict_locked(&mut index);
        }

        Ok(cache)
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// True iff a finalized entry exists for `id`. Does not touch LRU order.
    pub fn cached(&self, id: CacheId) -> bool {
        let index = self.index.lock();
        matches!(
            index.entries.get(&id),
            Some(entry) if entry.state == EntryState::Finalized
        )
    }

    /// Reserve an in-progress slot for `id` and return a write handle
    /// positioned at zero. An existing finalized entry is replaced: its body
    /// and sidecar are removed before the new handle is returned.
    pub fn open_write(&self, id: CacheId) -> CacheResult<File> {
        let mut index = self.index.lock();

        if let Some(entry) = index.entries.remove(&id) {
            index.order.retain(|other| *other != id);
            if entry.state == EntryState::Finalized {
                let _ = fs::remove_file(self.body_path(id));
                let _ = fs::remove_file(self.meta_path(id));
            }
        }

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(self.part_path(id))?;

        index.entries.insert(
            id,
            Entry {
                state: EntryState::InProgress,
                content_type: String::new(),
            },
        );

        Ok(file)
    }

    /// Open a finalized entry for reading, restore its persisted metadata,
    /// and promote it to most-recently-used. Returns `None` when no readable
    /// finalized entry exists.
    pub fn open_read(&self, id: CacheId) -> Option<(File, EntryInfo)> {
        let mut index = self.index.lock();

        let entry = index.entries.get(&id)?;
        if entry.state != EntryState::Finalized {
            return None;
        }
        let content_type = entry.content_type.clone();

        let file = File::open(self.body_path(id)).ok()?;
        let len = file.metadata().ok().map_or(0, |m| m.len());

        index.order.retain(|other| *other != id);
        index.order.push(id);

        Some((file, EntryInfo { content_type, len }))
    }

    /// Open the body for a reader that already knows length and type, e.g. a
    /// reader attaching to an in-progress write. Does not touch LRU order.
    pub fn open_read_partial(&self, id: CacheId) -> Option<File> {
        let index = self.index.lock();
        let entry = index.entries.get(&id)?;
        let path = match entry.state {
            EntryState::InProgress => self.part_path(id),
            EntryState::Finalized => self.body_path(id),
        };
        File::open(path).ok()
    }

    /// Mark an in-progress entry as finalized: publish the body under its
    /// finalized name, persist the content type, insert at MRU, and evict
    /// past the cap.
    pub fn finalize(&self, id: CacheId, content_type: &str) -> CacheResult<()> {
        let mut guard = self.index.lock();
        let index = &mut *guard;

        let finalized = match index.entries.get_mut(&id) {
            Some(entry) if entry.state == EntryState::InProgress => {
                fs::rename(self.part_path(id), self.body_path(id))?;
                self.write_sidecar(id, content_type)?;

                entry.state = EntryState::Finalized;
                entry.content_type = content_type.to_string();
                index.order.push(id);
                debug!(%id, content_type, "cache entry finalized");
                true
            }
            Some(_) => false,
            None => {
                warn!(%id, "finalize for unknown cache entry");
                false
            }
        };

        if finalized {
            self.evict_locked(index);
        }

        Ok(())
    }

    /// Remove the on-disk body and metadata and drop `id` from the index,
    /// whether finalized or in-progress.
    pub fn delete(&self, id: CacheId) {
        let mut index = self.index.lock();
        index.entries.remove(&id);
        index.order.retain(|other| *other != id);

        let _ = fs::remove_file(self.part_path(id));
        let _ = fs::remove_file(self.body_path(id));
        let _ = fs::remove_file(self.meta_path(id));
    }

    /// Drop least-recently-used finalized entries until the cap holds.
    /// In-progress entries are not candidates. Unlink failures are logged;
    /// the index is updated regardless so an open reader can drain its
    /// existing handle while the entry is already gone from the index.
    fn evict_locked(&self, index: &mut Index) {
        while index.order.len() > self.max_entries {
            let id = index.order.remove(0);
            index.entries.remove(&id);
            debug!(%id, "evicting least-recently-used cache entry");

            if let Err(err) = fs::remove_file(self.body_path(id)) {
                warn!(%id, %err, "failed to unlink evicted cache body");
            }
            let _ = fs::remove_file(self.meta_path(id));
        }
    }

    fn write_sidecar(&self, id: CacheId, content_type: &str) -> CacheResult<()> {
        let meta = SidecarMeta {
            content_type: content_type.to_string(),
        };

        // Write-then-rename so a crash never leaves a half-written sidecar
        // next to a finalized body.
        let tmp = self.root.join(format!("{id}.meta.tmp"));
        fs::write(&tmp, serde_json::to_vec(&meta)?)?;
        fs::rename(&tmp, self.meta_path(id))?;
        Ok(())
    }

    fn part_path(&self, id: CacheId) -> PathBuf {
        self.root.join(format!("{id}.part"))
    }

    fn body_path(&self, id: CacheId) -> PathBuf {
        self.root.join(format!("{id}.body"))
    }

    fn meta_path(&self, id: CacheId) -> PathBuf {
        self.root.join(format!("{id}.meta.json"))
    }
}

fn scan(root: &Path) -> CacheResult<Index> {
    let mut finalized: Vec<(CacheId, String, SystemTime)> = Vec::new();
    let mut orphans: Vec<PathBuf> = Vec::new();

    for dir_entry in fs::read_dir(root)? {
        let Ok(dir_entry) = dir_entry else { continue };
        let path = dir_entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };

        if let Some(hex) = name.strip_suffix(".part") {
            // In-progress leftovers from a previous process are unusable.
            if parse_id(hex).is_some() {
                orphans.push(path);
            }
            continue;
        }

        let Some(hex) = name.strip_suffix(".body") else {
            continue;
        };
        let Some(id) = parse_id(hex) else { continue };

        match read_sidecar(root, id) {
            Some(meta) => {
                let modified = dir_entry
                    .metadata()
                    .and_then(|m| m.modified())
                    .unwrap_or(SystemTime::UNIX_EPOCH);
                finalized.push((id, meta.content_type, modified));
            }
            None => {
                warn!(%id, "dropping cache entry with unreadable metadata");
                orphans.push(path);
                orphans.push(root.join(format!("{id}.meta.json")));
            }
        }
    }

    for path in orphans {
        let _ = fs::remove_file(path);
    }

    // Seed LRU order from mtime; subsequent reads refresh it in memory.
    finalized.sort_by_key(|&(_, _, modified)| modified);

    let mut index = Index::default();
    for (id, content_type, _) in finalized {
        index.entries.insert(
            id,
            Entry {
                state: EntryState::Finalized,
                content_type,
            },
        );
        index.order.push(id);
    }

    Ok(index)
}

fn parse_id(hex: &str) -> Option<CacheId> {
    if hex.len() != 16 {
        return None;
    }
    u64::from_str_radix(hex, 16).ok().map(CacheId::from_raw)
}

fn read_sidecar(root: &Path, id: CacheId) -> Option<SidecarMeta> {
    let raw = fs::read_to_string(root.join(format!("{id}.meta.json"))).ok()?;
    serde_json::from_str(&raw).ok()
}

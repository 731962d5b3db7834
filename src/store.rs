// src/store.rs
//
// Persistent key->value map (spec.md §4.D). `sled` stands in for the
// transactional ACID-directory persistence library spec.md assumes: it is
// an embedded, crash-safe store, opened and checkpointed as a scoped
// resource exactly as `with_cache` requires.

use crate::error::{Error, Result};
use crate::key::ImageKey;
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// Current schema version. Bumped when `ImageKey::Scaled`'s DPI moved from
/// a binary float to a rational (spec.md §6).
pub const SCHEMA_VERSION: u32 = 2;

type Entry = std::result::Result<crate::key::ImageFile, Error>;

#[derive(serde::Serialize, serde::Deserialize)]
struct VersionedEntry {
    version: u32,
    entry: Entry,
}

/// A scoped handle to an open persistent map. Every mutation is a single
/// atomic `sled` transaction on the one tree this handle owns.
pub struct CacheMap {
    db: sled::Db,
}

impl CacheMap {
    fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = sled::open(path).map_err(|e| Error::io(e.to_string()))?;
        Ok(CacheMap { db })
    }

    fn checkpoint_and_close(self) -> Result<()> {
        self.db.flush().map_err(|e| Error::io(e.to_string()))?;
        Ok(())
    }

    pub fn put(&self, key: &ImageKey, value: Entry) -> Result<()> {
        let k = encode_key(key)?;
        let v = encode_value(&value)?;
        self.db.insert(k, v).map_err(|e| Error::io(e.to_string()))?;
        Ok(())
    }

    pub fn put_all(&self, entries: &HashMap<ImageKey, Entry>) -> Result<()> {
        for (k, v) in entries {
            self.put(k, v.clone())?;
        }
        Ok(())
    }

    pub fn look(&self, key: &ImageKey) -> Result<Option<Entry>> {
        let k = encode_key(key)?;
        match self.db.get(k).map_err(|e| Error::io(e.to_string()))? {
            Some(bytes) => Ok(Some(decode_value(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn look_many(&self, keys: &HashSet<ImageKey>) -> Result<HashMap<ImageKey, Entry>> {
        let mut out = HashMap::new();
        for key in keys {
            if let Some(entry) = self.look(key)? {
                out.insert(key.clone(), entry);
            }
        }
        Ok(out)
    }

    pub fn look_all(&self) -> Result<HashMap<ImageKey, Entry>> {
        let mut out = HashMap::new();
        for item in self.db.iter() {
            let (k, v) = item.map_err(|e| Error::io(e.to_string()))?;
            let key: ImageKey = bincode::deserialize(&k)
                .map_err(|e| Error::in_function("look_all", Error::other(e.to_string())))?;
            out.insert(key, decode_value(&v)?);
        }
        Ok(out)
    }

    pub fn delete(&self, key: &ImageKey) -> Result<()> {
        let k = encode_key(key)?;
        self.db.remove(k).map_err(|e| Error::io(e.to_string()))?;
        Ok(())
    }

    pub fn delete_many(&self, keys: &HashSet<ImageKey>) -> Result<()> {
        for key in keys {
            self.delete(key)?;
        }
        Ok(())
    }
}

fn encode_key(key: &ImageKey) -> Result<Vec<u8>> {
    bincode::serialize(key).map_err(|e| Error::in_function("encode_key", Error::other(e.to_string())))
}

fn encode_value(value: &Entry) -> Result<Vec<u8>> {
    let versioned = VersionedEntry {
        version: SCHEMA_VERSION,
        entry: value.clone(),
    };
    bincode::serialize(&versioned)
        .map_err(|e| Error::in_function("encode_value", Error::other(e.to_string())))
}

fn decode_value(bytes: &[u8]) -> Result<Entry> {
    if let Ok(versioned) = bincode::deserialize::<VersionedEntry>(bytes) {
        return Ok(migrate(versioned));
    }
    // Older snapshots stored a raw `ImageFile`, predating both the `Result`
    // wrapper and the version tag (spec.md §4.D: "older snapshots of a raw
    // Map<K,V> migrate by wrapping every value as Ok").
    let legacy: crate::key::ImageFile = bincode::deserialize(bytes)
        .map_err(|e| Error::in_function("decode_value", Error::other(e.to_string())))?;
    Ok(Ok(legacy))
}

/// `version < SCHEMA_VERSION` entries are returned unchanged because
/// `Result<ImageFile, Error>` itself did not change shape between v1 and
/// v2 -- only `ImageKey::Scaled`'s DPI representation did, and that is
/// migrated when the key (not the value) is decoded.
fn migrate(versioned: VersionedEntry) -> Entry {
    versioned.entry
}

/// Open `path` (initializing to empty if absent), run `body` with the
/// handle, then checkpoint and close on every exit path -- success, error,
/// or panic unwinding through `body`.
pub fn with_cache<R>(path: impl AsRef<Path>, body: impl FnOnce(&CacheMap) -> R) -> Result<R> {
    let map = CacheMap::open(path)?;
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| body(&map)));
    map.checkpoint_and_close()?;
    match result {
        Ok(value) => Ok(value),
        Err(panic) => std::panic::resume_unwind(panic),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file_cache::{File, FileSource};
    use crate::geometry::ImageType;
    use crate::key::ImageFile;

    fn sample(checksum: &str) -> ImageKey {
        ImageKey::Original(ImageFile {
            file: File {
                source: Some(FileSource::TheBytes),
                checksum: checksum.to_string(),
                messages: vec![],
                ext: ".png".to_string(),
            },
            image_type: ImageType::Png,
            width: 1,
            height: 1,
            max_val: 255,
        })
    }

    #[test]
    fn empty_map_miss_then_insert_then_hit() {
        let dir = tempfile::tempdir().unwrap();
        let key = sample("deadbeef");
        let img = key.root().clone();

        let result = with_cache(dir.path(), |map| -> Result<(bool, bool, HashMap<ImageKey, Entry>)> {
            let before = map.look(&key)?.is_some();
            map.put(&key, Ok(img.clone()))?;
            let after = map.look(&key)?.is_some();
            let all = map.look_all()?;
            Ok((before, after, all))
        })
        .unwrap()
        .unwrap();

        assert_eq!(result.0, false);
        assert_eq!(result.1, true);
        assert_eq!(result.2.len(), 1);
    }

    #[test]
    fn negative_entries_persist() {
        let dir = tempfile::tempdir().unwrap();
        let key = sample("negative");

        with_cache(dir.path(), |map| {
            map.put(&key, Err(Error::caller("derivation failed"))).unwrap();
        })
        .unwrap();

        with_cache(dir.path(), |map| {
            let entry = map.look(&key).unwrap().unwrap();
            assert!(entry.is_err());
        })
        .unwrap();
    }

    #[test]
    fn delete_removes_entry() {
        let dir = tempfile::tempdir().unwrap();
        let key = sample("todelete");
        with_cache(dir.path(), |map| {
            map.put(&key, Ok(key.root().clone())).unwrap();
            map.delete(&key).unwrap();
            assert!(map.look(&key).unwrap().is_none());
        })
        .unwrap();
    }

    #[test]
    fn legacy_bare_image_file_migrates_to_ok() {
        let dir = tempfile::tempdir().unwrap();
        let key = sample("legacy");

        with_cache(dir.path(), |map| {
            // Bypass `put`/`encode_value` to simulate a pre-`VersionedEntry`
            // snapshot: the raw bincode-serialized `ImageFile`, with no
            // `Result` wrapper and no version tag.
            let legacy_bytes = bincode::serialize(&key.root().clone()).unwrap();
            map.db.insert(encode_key(&key).unwrap(), legacy_bytes).unwrap();

            let entry = map.look(&key).unwrap().unwrap();
            assert_eq!(entry.unwrap(), key.root().clone());
        })
        .unwrap();
    }

    #[test]
    fn reopen_sees_checkpointed_state() {
        let dir = tempfile::tempdir().unwrap();
        let key = sample("persisted");
        with_cache(dir.path(), |map| {
            map.put(&key, Ok(key.root().clone())).unwrap();
        })
        .unwrap();

        with_cache(dir.path(), |map| {
            assert!(map.look(&key).unwrap().is_some());
        })
        .unwrap();
    }
}

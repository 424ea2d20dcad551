//! Persistent key-value stores backing the metadata and artifact caches.
//!
//! A [`PersistentIndexedCache`] is an append-only record log:
//!
//! ```text
//! magic "DPIX" | format version (u8) | generation (u64 LE) | record*
//! record := kind (u8: 1 = put, 2 = remove) | varint length | payload
//! payload := encoded key [ encoded value ]
//! ```
//!
//! The log is replayed into memory when the store is opened. Every mutation holds the
//! store's [`Mutex`] (threads of this process) and its [`CacheLock`] (other processes
//! and other instances on the same directory), and first catches up with the file:
//! records appended by other writers since this instance last looked are replayed,
//! and a changed generation means the log was rewritten elsewhere and is reloaded in
//! full. Reads are served from memory and see foreign writes after the next mutation
//! or [`PersistentIndexedCache::refresh`].
//!
//! When superseded records outnumber live entries the log is compacted by rewriting it
//! atomically under a new generation.
//!
//! A record that cannot be decoded, usually the tail of a write interrupted by a
//! crash, ends the replay: it and everything after it is dropped with a warning and
//! the file is truncated back to the last good record.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::hash::Hash;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, warn};

use super::codec::{Codec, Decoder, Encoder};
use super::lock::CacheLock;
use crate::constants::INDEX_EXTENSION;
use crate::core::ResolveError;
use crate::utils::atomic_write;

const MAGIC: &[u8; 4] = b"DPIX";
const INDEX_FORMAT_VERSION: u8 = 2;
const HEADER_LEN: usize = MAGIC.len() + 1 + 8;
const RECORD_PUT: u8 = 1;
const RECORD_REMOVE: u8 = 2;
const MIN_RECORDS_BEFORE_COMPACTION: usize = 64;

struct IndexState<K, V> {
    entries: HashMap<K, V>,
    records: usize,
    /// Generation of the log the entries were read from.
    generation: u64,
    /// Bytes of the log already reflected in `entries`.
    synced_len: u64,
}

impl<K, V> IndexState<K, V> {
    fn empty(generation: u64) -> Self {
        Self {
            entries: HashMap::new(),
            records: 0,
            generation,
            synced_len: HEADER_LEN as u64,
        }
    }
}

fn encode_header(generation: u64) -> Vec<u8> {
    let mut header = Vec::with_capacity(HEADER_LEN);
    header.extend_from_slice(MAGIC);
    header.push(INDEX_FORMAT_VERSION);
    header.extend_from_slice(&generation.to_le_bytes());
    header
}

/// The generation recorded in `bytes`, or `None` for a foreign or truncated header.
fn parse_header(bytes: &[u8]) -> Option<u64> {
    if bytes.len() < HEADER_LEN || &bytes[..MAGIC.len()] != MAGIC || bytes[MAGIC.len()] != INDEX_FORMAT_VERSION {
        return None;
    }
    let mut generation = [0u8; 8];
    generation.copy_from_slice(&bytes[MAGIC.len() + 1..HEADER_LEN]);
    Some(u64::from_le_bytes(generation))
}

/// A generation distinct from `previous`.
fn next_generation(previous: u64) -> u64 {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_nanos() as u64).unwrap_or(0);
    if now > previous { now } else { previous.wrapping_add(1) }
}

/// A persistent, process-safe map from `K` to `V`.
///
/// Reads are served from memory. All mutation is serialized per store.
pub struct PersistentIndexedCache<K, V> {
    name: String,
    path: PathBuf,
    lock_dir: PathBuf,
    key_codec: Box<dyn Codec<K>>,
    value_codec: Box<dyn Codec<V>>,
    state: Mutex<IndexState<K, V>>,
}

impl<K, V> std::fmt::Debug for PersistentIndexedCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistentIndexedCache")
            .field("name", &self.name)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl<K, V> PersistentIndexedCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Opens (or creates) the store `{dir}/{name}.bin`, replaying its log.
    ///
    /// # Errors
    ///
    /// Fails only on I/O errors. A file with a foreign header is discarded and the
    /// store starts empty.
    pub fn open(
        dir: &Path,
        name: &str,
        key_codec: impl Codec<K> + 'static,
        value_codec: impl Codec<V> + 'static,
    ) -> Result<Self, ResolveError> {
        std::fs::create_dir_all(dir)?;
        let cache = Self {
            name: name.to_string(),
            path: dir.join(format!("{name}.{INDEX_EXTENSION}")),
            lock_dir: dir.to_path_buf(),
            key_codec: Box::new(key_codec),
            value_codec: Box::new(value_codec),
            state: Mutex::new(IndexState::empty(0)),
        };

        let _lock = cache.acquire_lock()?;
        let state = cache.replay()?;
        debug!(
            store = %cache.name,
            entries = state.entries.len(),
            records = state.records,
            "Opened persistent cache store"
        );
        *cache.lock_state() = state;
        Ok(cache)
    }

    /// Name of the store.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_state(&self) -> MutexGuard<'_, IndexState<K, V>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn acquire_lock(&self) -> Result<CacheLock, ResolveError> {
        CacheLock::acquire(&self.lock_dir, &self.name)
    }

    /// Reads the whole log. Caller holds the store lock.
    fn replay(&self) -> Result<IndexState<K, V>, ResolveError> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return self.reset(0),
            Err(e) => return Err(e.into()),
        };
        let Some(generation) = parse_header(&bytes) else {
            warn!(store = %self.name, "Discarding cache store with unrecognised header");
            return self.reset(0);
        };

        let mut state = IndexState::empty(generation);
        self.apply_records(&bytes[HEADER_LEN..], &mut state)?;
        Ok(state)
    }

    /// Replaces the log with an empty one under a new generation.
    fn reset(&self, previous: u64) -> Result<IndexState<K, V>, ResolveError> {
        let generation = next_generation(previous);
        atomic_write(&self.path, &encode_header(generation))?;
        Ok(IndexState::empty(generation))
    }

    /// Applies the records in `bytes`, which start at `state.synced_len` in the file.
    fn apply_records(&self, bytes: &[u8], state: &mut IndexState<K, V>) -> Result<(), ResolveError> {
        let base = state.synced_len;
        let mut offset = 0;
        while offset < bytes.len() {
            match self.read_record(&bytes[offset..]) {
                Ok((consumed, record)) => {
                    match record {
                        Record::Put(key, value) => {
                            state.entries.insert(key, value);
                        }
                        Record::Remove(key) => {
                            state.entries.remove(&key);
                        }
                    }
                    state.records += 1;
                    offset += consumed;
                }
                Err(e) => {
                    warn!(
                        store = %self.name,
                        offset = base + offset as u64,
                        dropped_bytes = bytes.len() - offset,
                        "Dropping corrupt trailing records: {e}"
                    );
                    let file = OpenOptions::new().write(true).open(&self.path)?;
                    file.set_len(base + offset as u64)?;
                    break;
                }
            }
        }
        state.synced_len = base + offset as u64;
        Ok(())
    }

    /// Brings `state` up to date with the file. Caller holds the store lock.
    fn sync(&self, state: &mut IndexState<K, V>) -> Result<(), ResolveError> {
        let mut file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(store = %self.name, "Cache store file vanished, starting empty");
                *state = self.reset(state.generation)?;
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let len = file.metadata()?.len();
        let mut header = [0u8; HEADER_LEN];
        let generation = if len >= HEADER_LEN as u64 {
            file.read_exact(&mut header)?;
            parse_header(&header)
        } else {
            None
        };
        if generation != Some(state.generation) || len < state.synced_len {
            debug!(store = %self.name, "Cache store was rewritten by another writer, reloading");
            drop(file);
            *state = self.replay()?;
            return Ok(());
        }
        if len == state.synced_len {
            return Ok(());
        }

        file.seek(SeekFrom::Start(state.synced_len))?;
        let mut tail = Vec::new();
        file.read_to_end(&mut tail)?;
        drop(file);
        let before = state.records;
        self.apply_records(&tail, state)?;
        debug!(
            store = %self.name,
            records = state.records - before,
            "Replayed records appended by another writer"
        );
        Ok(())
    }

    fn read_record(&self, bytes: &[u8]) -> Result<(usize, Record<K, V>), ResolveError> {
        let mut header = Decoder::new(bytes, "cache record");
        let kind = header.read_byte()?;
        let len = header.read_small_int()?;
        let start = bytes.len() - header.remaining();
        let payload = bytes.get(start..start + len).ok_or_else(|| ResolveError::CorruptCacheEntry {
            store: self.name.clone(),
            reason: format!("record of {len} bytes runs past the end of the log"),
        })?;

        let mut decoder = Decoder::new(payload, "cache record");
        let key = self.key_codec.decode(&mut decoder)?;
        let record = match kind {
            RECORD_PUT => Record::Put(key, self.value_codec.decode(&mut decoder)?),
            RECORD_REMOVE => Record::Remove(key),
            other => {
                return Err(ResolveError::CorruptCacheEntry {
                    store: self.name.clone(),
                    reason: format!("unknown record kind {other}"),
                });
            }
        };
        decoder.finish()?;
        Ok((start + len, record))
    }

    fn encode_record(&self, kind: u8, key: &K, value: Option<&V>) -> Vec<u8> {
        let mut payload = Encoder::new();
        self.key_codec.encode(key, &mut payload);
        if let Some(value) = value {
            self.value_codec.encode(value, &mut payload);
        }
        let payload = payload.into_bytes();

        let mut record = Encoder::new();
        record.write_byte(kind);
        record.write_bytes(&payload);
        record.into_bytes()
    }

    /// Appends one record. Caller holds the store lock and has synced `state`.
    fn append(&self, state: &mut IndexState<K, V>, record: &[u8]) -> Result<(), ResolveError> {
        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        file.write_all(record)?;
        state.synced_len += record.len() as u64;
        state.records += 1;
        Ok(())
    }

    /// The value stored for `key`.
    pub fn get(&self, key: &K) -> Option<V> {
        self.lock_state().entries.get(key).cloned()
    }

    /// Whether `key` has a value.
    pub fn contains(&self, key: &K) -> bool {
        self.lock_state().entries.contains_key(key)
    }

    /// Picks up writes made through other instances or processes since the last sync.
    pub fn refresh(&self) -> Result<(), ResolveError> {
        let mut state = self.lock_state();
        let _lock = self.acquire_lock()?;
        self.sync(&mut state)
    }

    /// Stores `value` for `key`, replacing any previous value.
    pub fn put(&self, key: K, value: V) -> Result<(), ResolveError> {
        let record = self.encode_record(RECORD_PUT, &key, Some(&value));
        let mut state = self.lock_state();
        let _lock = self.acquire_lock()?;
        self.sync(&mut state)?;
        self.append(&mut state, &record)?;
        state.entries.insert(key, value);
        self.maybe_compact(&mut state)
    }

    /// Removes `key`, returning whether it was present.
    pub fn remove(&self, key: &K) -> Result<bool, ResolveError> {
        let mut state = self.lock_state();
        let _lock = self.acquire_lock()?;
        self.sync(&mut state)?;
        if !state.entries.contains_key(key) {
            return Ok(false);
        }
        let record = self.encode_record(RECORD_REMOVE, key, None);
        self.append(&mut state, &record)?;
        state.entries.remove(key);
        self.maybe_compact(&mut state)?;
        Ok(true)
    }

    /// Keeps only the entries for which `keep` returns true; returns the number removed.
    pub fn retain(&self, mut keep: impl FnMut(&K, &V) -> bool) -> Result<usize, ResolveError> {
        let mut state = self.lock_state();
        let _lock = self.acquire_lock()?;
        self.sync(&mut state)?;
        let before = state.entries.len();
        state.entries.retain(|k, v| keep(k, v));
        let removed = before - state.entries.len();
        if removed > 0 {
            self.rewrite(&mut state)?;
        }
        Ok(removed)
    }

    /// Removes every entry.
    pub fn clear(&self) -> Result<(), ResolveError> {
        let mut state = self.lock_state();
        let _lock = self.acquire_lock()?;
        self.sync(&mut state)?;
        state.entries.clear();
        self.rewrite(&mut state)
    }

    /// Snapshot of all entries, in no particular order.
    pub fn entries(&self) -> Vec<(K, V)> {
        self.lock_state().entries.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.lock_state().entries.len()
    }

    /// Whether the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of records in the log, including superseded ones.
    pub fn record_count(&self) -> usize {
        self.lock_state().records
    }

    /// Rewrites the log so it holds exactly one record per live entry.
    pub fn compact(&self) -> Result<(), ResolveError> {
        let mut state = self.lock_state();
        let _lock = self.acquire_lock()?;
        self.sync(&mut state)?;
        self.rewrite(&mut state)
    }

    fn maybe_compact(&self, state: &mut IndexState<K, V>) -> Result<(), ResolveError> {
        if state.records >= MIN_RECORDS_BEFORE_COMPACTION
            && state.records > state.entries.len() * 2
        {
            self.rewrite(state)?;
        }
        Ok(())
    }

    /// Writes `state.entries` as a fresh log. Caller holds the store lock and has
    /// synced `state` before changing it.
    fn rewrite(&self, state: &mut IndexState<K, V>) -> Result<(), ResolveError> {
        let generation = next_generation(state.generation);
        let mut bytes = encode_header(generation);
        for (key, value) in &state.entries {
            bytes.extend_from_slice(&self.encode_record(RECORD_PUT, key, Some(value)));
        }

        atomic_write(&self.path, &bytes)?;
        debug!(
            store = %self.name,
            superseded = state.records.saturating_sub(state.entries.len()),
            "Compacted persistent cache store"
        );
        state.records = state.entries.len();
        state.generation = generation;
        state.synced_len = bytes.len() as u64;
        Ok(())
    }
}

enum Record<K, V> {
    Put(K, V),
    Remove(K),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::codec::StringCodec;
    use tempfile::TempDir;

    fn open(dir: &Path) -> PersistentIndexedCache<String, String> {
        PersistentIndexedCache::open(dir, "test", StringCodec, StringCodec).unwrap()
    }

    #[test]
    fn test_values_survive_reopen() {
        let temp = TempDir::new().unwrap();
        {
            let cache = open(temp.path());
            cache.put("a".to_string(), "1".to_string()).unwrap();
            cache.put("b".to_string(), "2".to_string()).unwrap();
            cache.put("a".to_string(), "3".to_string()).unwrap();
            assert!(cache.remove(&"b".to_string()).unwrap());
        }

        let cache = open(temp.path());
        assert_eq!(cache.get(&"a".to_string()), Some("3".to_string()));
        assert_eq!(cache.get(&"b".to_string()), None);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.record_count(), 4);
    }

    #[test]
    fn test_corrupt_tail_is_dropped() {
        let temp = TempDir::new().unwrap();
        let path = {
            let cache = open(temp.path());
            cache.put("a".to_string(), "1".to_string()).unwrap();
            cache.put("b".to_string(), "2".to_string()).unwrap();
            cache.path().to_path_buf()
        };
        let good_len = std::fs::metadata(&path).unwrap().len();

        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&[RECORD_PUT, 40, 1, 2]).unwrap();
        drop(file);

        let cache = open(temp.path());
        assert_eq!(cache.len(), 2);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), good_len);

        cache.put("c".to_string(), "3".to_string()).unwrap();
        drop(cache);
        assert_eq!(open(temp.path()).len(), 3);
    }

    #[test]
    fn test_foreign_file_starts_empty() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("test.bin"), b"garbage").unwrap();
        let cache = open(temp.path());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_compaction_keeps_live_entries() {
        let temp = TempDir::new().unwrap();
        let cache = open(temp.path());
        for i in 0..100 {
            cache.put("key".to_string(), i.to_string()).unwrap();
        }
        assert!(cache.record_count() < 100);
        cache.compact().unwrap();
        assert_eq!(cache.record_count(), 1);
        drop(cache);

        let cache = open(temp.path());
        assert_eq!(cache.get(&"key".to_string()), Some("99".to_string()));
    }

    #[test]
    fn test_retain_rewrites_log() {
        let temp = TempDir::new().unwrap();
        let cache = open(temp.path());
        for i in 0..5 {
            cache.put(format!("k{i}"), i.to_string()).unwrap();
        }
        let removed = cache.retain(|_, v| v.parse::<u32>().unwrap() % 2 == 0).unwrap();
        assert_eq!(removed, 2);
        drop(cache);
        assert_eq!(open(temp.path()).len(), 3);
    }

    #[test]
    fn test_compaction_keeps_records_from_another_instance() {
        let temp = TempDir::new().unwrap();
        let a = open(temp.path());
        let b = open(temp.path());

        b.put("from-b".to_string(), "2".to_string()).unwrap();
        a.put("from-a".to_string(), "1".to_string()).unwrap();
        assert_eq!(a.get(&"from-b".to_string()), Some("2".to_string()));
        a.compact().unwrap();

        b.put("after-compaction".to_string(), "3".to_string()).unwrap();
        assert_eq!(b.get(&"from-a".to_string()), Some("1".to_string()));
        drop(a);
        drop(b);

        let reopened = open(temp.path());
        assert_eq!(reopened.get(&"from-a".to_string()), Some("1".to_string()));
        assert_eq!(reopened.get(&"from-b".to_string()), Some("2".to_string()));
        assert_eq!(reopened.get(&"after-compaction".to_string()), Some("3".to_string()));
        assert_eq!(reopened.len(), 3);
    }

    #[test]
    fn test_refresh_sees_removals_and_clears_from_another_instance() {
        let temp = TempDir::new().unwrap();
        let a = open(temp.path());
        let b = open(temp.path());

        a.put("k1".to_string(), "1".to_string()).unwrap();
        a.put("k2".to_string(), "2".to_string()).unwrap();
        assert!(b.is_empty());
        b.refresh().unwrap();
        assert_eq!(b.len(), 2);

        assert!(b.remove(&"k1".to_string()).unwrap());
        a.refresh().unwrap();
        assert_eq!(a.get(&"k1".to_string()), None);

        b.clear().unwrap();
        a.put("k3".to_string(), "3".to_string()).unwrap();
        assert_eq!(a.len(), 1);
        drop(a);
        drop(b);
        assert_eq!(open(temp.path()).len(), 1);
    }

    #[test]
    fn test_concurrent_puts() {
        use std::sync::Arc;

        let temp = TempDir::new().unwrap();
        let cache = Arc::new(open(temp.path()));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    for i in 0..10 {
                        cache.put(format!("{t}-{i}"), "v".to_string()).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(cache.len(), 80);
        drop(cache);
        assert_eq!(open(temp.path()).len(), 80);
    }
}

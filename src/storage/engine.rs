//! The database engine: orchestrates `open`/recovery, `put`/`get`/`delete`,
//! segment rotation, optional compaction, and `close`. Owns the writer side
//! of the active segment, the keydir, the sealed-segment reader cache, and
//! the directory lock.

use std::collections::HashMap;
use std::fs;
use std::ops::RangeBounds;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use log::{error, info};

use crate::error::{Error, Result};
use crate::storage::keydir::{Keydir, KeydirEntry};
use crate::storage::lock::DirLock;
use crate::storage::record::{Record, HEADER_SIZE};
use crate::storage::recovery;
use crate::storage::segment::Segment;

/// An open Bitcask database. Cheap to share across threads behind an `Arc`:
/// every operation takes `&self`, with a single readers-writer lock guarding
/// the keydir and the active-segment pointer together, as required to keep
/// a reader from ever observing a half-committed write.
pub struct Engine {
    dir: PathBuf,
    max_segment_size: u64,
    // Held for the engine's lifetime; never read again after acquisition,
    // but must outlive every other field so the lock is released last.
    _lock: DirLock,
    state: RwLock<State>,
    // Sealed segments are read-only and may be opened lazily; kept here so
    // repeated reads against the same sealed segment don't reopen the file.
    sealed: Mutex<HashMap<u32, Segment>>,
}

struct State {
    active: Segment,
    active_id: u32,
    keydir: Keydir,
}

/// Disk-usage accounting used to decide whether compaction is worthwhile.
#[derive(Debug, Clone, Copy)]
pub struct Status {
    pub keys: u64,
    pub live_disk_size: u64,
    pub total_disk_size: u64,
    pub garbage_disk_size: u64,
}

impl Engine {
    /// Opens (or creates) the database rooted at `dir`. Acquires the
    /// directory lock, replays every existing segment to rebuild the
    /// keydir, and opens (or creates) the highest-numbered segment as the
    /// active one.
    pub fn open(dir: impl Into<PathBuf>, max_segment_size: u64) -> Result<Self> {
        let dir = dir.into();
        fs::DirBuilder::new().recursive(true).mode(0o755).create(&dir)?;

        let lock = DirLock::acquire(&dir)?;

        let segment_ids = recovery::discover_segment_ids(&dir)?;
        let active_id = segment_ids.last().copied().unwrap_or(1);
        let keydir = recovery::load(&dir, &segment_ids)?;
        let active = Segment::open_for_append(&dir, active_id)?;

        info!(
            "opened database at {} ({} live keys, active segment {})",
            dir.display(),
            keydir.len(),
            Segment::format_id(active_id)
        );

        Ok(Self {
            dir,
            max_segment_size,
            _lock: lock,
            state: RwLock::new(State { active, active_id, keydir }),
            sealed: Mutex::new(HashMap::new()),
        })
    }

    /// Like `open`, but compacts immediately afterwards if the fraction of
    /// garbage bytes on disk is at least `garbage_ratio_threshold`.
    pub fn open_compact(
        dir: impl Into<PathBuf>,
        max_segment_size: u64,
        garbage_ratio_threshold: f64,
    ) -> Result<Self> {
        let engine = Self::open(dir, max_segment_size)?;
        let status = engine.status()?;
        if Self::should_compact(status.garbage_disk_size, status.total_disk_size, garbage_ratio_threshold)
        {
            info!(
                "compacting {} to remove {:.0}% garbage ({} of {} bytes)",
                engine.dir.display(),
                status.garbage_disk_size as f64 / status.total_disk_size as f64 * 100.0,
                status.garbage_disk_size,
                status.total_disk_size
            );
            engine.compact()?;
        }
        Ok(engine)
    }

    fn should_compact(garbage_size: u64, total_size: u64, min_ratio: f64) -> bool {
        if total_size == 0 {
            return false;
        }
        let ratio = garbage_size as f64 / total_size as f64;
        garbage_size > 0 && ratio >= min_ratio
    }

    /// Rejects an empty key or value; otherwise writes (or overwrites) the
    /// key's value, rotating the active segment first if the new record
    /// would not fit within `max_segment_size`.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(Error::EmptyKey);
        }
        if value.is_empty() {
            return Err(Error::EmptyValue);
        }
        self.append(Record::new(key.to_vec(), value.to_vec()))
    }

    /// Removes `key` by appending a tombstone record. Deleting an absent key
    /// is not an error: there is nothing to reconcile either way.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(Error::EmptyKey);
        }
        self.append(Record::tombstone(key.to_vec()))
    }

    /// Looks up `key` in the keydir and, if present, reads its current value
    /// from the segment it points into (which may be sealed).
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        let state = self.state.read().unwrap();
        let entry = *state.keydir.get(key).ok_or(Error::KeyNotFound)?;
        self.read_entry(&state, &entry)
    }

    /// Iterates live keys within `range` in ascending order, reading each
    /// value lazily (one positional read per `next()`) rather than holding
    /// the engine lock for the whole scan.
    pub fn scan(&self, range: impl RangeBounds<Vec<u8>>) -> ScanIterator<'_> {
        let state = self.state.read().unwrap();
        let keys: Vec<Vec<u8>> = state.keydir.range(range).map(|(k, _)| k.clone()).collect();
        ScanIterator { engine: self, keys: keys.into_iter() }
    }

    /// Disk-usage accounting: total bytes on disk across every segment
    /// versus the bytes that are still reachable from a live keydir entry.
    pub fn status(&self) -> Result<Status> {
        let state = self.state.read().unwrap();
        let keys = state.keydir.len() as u64;
        let live_disk_size: u64 = state
            .keydir
            .iter()
            .map(|(key, entry)| HEADER_SIZE as u64 + key.len() as u64 + entry.value_length as u64)
            .sum();

        let mut total_disk_size = 0u64;
        for id in recovery::discover_segment_ids(&self.dir)? {
            total_disk_size += fs::metadata(self.dir.join(Segment::format_id(id)))?.len();
        }
        let garbage_disk_size = total_disk_size.saturating_sub(live_disk_size);

        Ok(Status { keys, live_disk_size, total_disk_size, garbage_disk_size })
    }

    /// Rewrites every live key into a single fresh segment, discarding
    /// superseded values and tombstones, then retires every old segment
    /// file. Runs under the same exclusive lock as `put`/`delete`.
    pub fn compact(&self) -> Result<()> {
        let mut state = self.state.write().unwrap();

        let old_active_id = state.active_id;
        let merge_id = old_active_id + 1;
        let mut merge_segment = Segment::create_merge_staging(&self.dir, merge_id)?;
        let mut new_keydir = Keydir::new();

        for (key, entry) in state.keydir.iter() {
            let value = self.read_entry(&state, entry)?;
            let record = Record::new(key.clone(), value);
            let offset = merge_segment.append(&record.encode())?;
            let value_offset = offset + HEADER_SIZE as u64 + key.len() as u64;
            new_keydir.insert(
                key.clone(),
                KeydirEntry { segment_id: merge_id, value_offset, value_length: record.value.len() as u32 },
            );
        }
        merge_segment.sync()?;
        let merge_segment = merge_segment.publish()?;

        let stale_ids: Vec<u32> = {
            let mut sealed = self.sealed.lock().unwrap();
            let mut ids: Vec<u32> = sealed.keys().copied().filter(|id| *id < merge_id).collect();
            ids.push(old_active_id);
            for id in &ids {
                sealed.remove(id);
            }
            ids
        };
        for id in stale_ids {
            let path = self.dir.join(Segment::format_id(id));
            if path.exists() {
                fs::remove_file(path)?;
            }
        }

        // The merged segment becomes the new active file directly, rather
        // than sealing it behind a freshly opened empty one: compacting must
        // never grow the segment count.
        state.active = merge_segment;
        state.active_id = merge_id;
        state.keydir = new_keydir;

        info!("compacted database at {} into segment {}", self.dir.display(), Segment::format_id(merge_id));
        Ok(())
    }

    /// Flushes the active segment, drops cached sealed-segment descriptors,
    /// and releases the directory lock. Safe to call more than once.
    pub fn close(&self) -> Result<()> {
        {
            let state = self.state.read().unwrap();
            state.active.sync()?;
        }
        self.sealed.lock().unwrap().clear();
        self._lock.release()
    }

    fn append(&self, record: Record) -> Result<()> {
        let mut state = self.state.write().unwrap();
        let encoded = record.encode();
        if state.active.size()? + encoded.len() as u64 > self.max_segment_size {
            self.rotate(&mut state)?;
        }

        let offset = state.active.append(&encoded)?;
        state.active.sync()?;

        if record.is_tombstone() {
            state.keydir.remove(&record.key);
        } else {
            let value_offset = offset + HEADER_SIZE as u64 + record.key.len() as u64;
            state.keydir.insert(
                record.key.clone(),
                KeydirEntry { segment_id: state.active_id, value_offset, value_length: record.value.len() as u32 },
            );
        }
        Ok(())
    }

    fn rotate(&self, state: &mut State) -> Result<()> {
        state.active.sync()?;
        let old_id = state.active_id;
        let new_id = old_id + 1;
        let new_active = Segment::open_for_append(&self.dir, new_id)?;
        let old_active = std::mem::replace(&mut state.active, new_active);
        state.active_id = new_id;
        self.sealed.lock().unwrap().insert(old_id, old_active);
        info!("rotated active segment to {}", Segment::format_id(new_id));
        Ok(())
    }

    /// Reads the value an entry points to, whether it lives in the active
    /// segment or a sealed one (opening and caching the sealed segment's
    /// descriptor on first access).
    fn read_entry(&self, state: &State, entry: &KeydirEntry) -> Result<Vec<u8>> {
        if entry.segment_id == state.active_id {
            return state.active.read_at(entry.value_offset, entry.value_length);
        }
        let mut sealed = self.sealed.lock().unwrap();
        if !sealed.contains_key(&entry.segment_id) {
            sealed.insert(entry.segment_id, Segment::open_read_only(&self.dir, entry.segment_id)?);
        }
        sealed.get(&entry.segment_id).unwrap().read_at(entry.value_offset, entry.value_length)
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Ok(state) = self.state.read() {
            if let Err(err) = state.active.sync() {
                error!("failed to flush active segment on drop: {err}");
            }
        }
    }
}

/// Lazily reads live keys in ascending order; each `next()` performs one
/// positional read through the engine.
pub struct ScanIterator<'a> {
    engine: &'a Engine,
    keys: std::vec::IntoIter<Vec<u8>>,
}

impl Iterator for ScanIterator<'_> {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        let key = self.keys.next()?;
        match self.engine.get(&key) {
            Ok(value) => Some(Ok((key, value))),
            Err(err) => Some(Err(err)),
        }
    }
}

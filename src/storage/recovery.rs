//! The startup scan that rebuilds the keydir from the on-disk segments of a
//! data directory: discover segments, sort by id, replay every record in
//! order, and let the last write (or tombstone) for each key win.

use std::fs;
use std::path::Path;

use log::info;

use crate::error::Result;
use crate::storage::keydir::{Keydir, KeydirEntry};
use crate::storage::record::HEADER_SIZE;
use crate::storage::segment::Segment;

/// Discovers every `*.data` segment file under `dir` and returns their ids in
/// ascending order. Anything else in the directory (`db.lock`, a stray
/// `.data.merge` staging file left by an interrupted compaction) is ignored.
pub fn discover_segment_ids(dir: &Path) -> Result<Vec<u32>> {
    let mut ids = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let Some(name) = entry.file_name().to_str().map(str::to_owned) else { continue };
        if let Some(id) = Segment::parse_id(&name) {
            ids.push(id);
        }
    }
    ids.sort_unstable();
    Ok(ids)
}

/// Replays every segment in `segment_ids` (which must already be sorted
/// ascending) against a fresh keydir, applying last-write-wins semantics
/// across the whole run: a tombstone (`value_size == 0`) removes whatever
/// entry preceded it. Any checksum mismatch or short read is fatal.
pub fn load(dir: &Path, segment_ids: &[u32]) -> Result<Keydir> {
    let mut keydir = Keydir::new();

    for &id in segment_ids {
        let segment = Segment::open_read_only(dir, id)?;
        for result in segment.scan()? {
            let (record, start) = result?;
            if record.is_tombstone() {
                keydir.remove(&record.key);
            } else {
                let value_offset = start + HEADER_SIZE as u64 + record.key.len() as u64;
                keydir.insert(
                    record.key,
                    KeydirEntry {
                        segment_id: id,
                        value_offset,
                        value_length: record.value.len() as u32,
                    },
                );
            }
        }
    }

    info!("recovered {} live keys across {} segments", keydir.len(), segment_ids.len());
    Ok(keydir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::record::Record;
    use tempfile::TempDir;

    #[test]
    fn discovers_and_ignores_non_segment_files() -> Result<()> {
        let dir = TempDir::new().unwrap();
        Segment::open_for_append(dir.path(), 1)?;
        Segment::open_for_append(dir.path(), 2)?;
        fs::write(dir.path().join("db.lock"), b"")?;
        fs::write(dir.path().join("00000003.data.merge"), b"")?;

        let ids = discover_segment_ids(dir.path())?;
        assert_eq!(ids, vec![1, 2]);
        Ok(())
    }

    #[test]
    fn last_write_wins_across_segments() -> Result<()> {
        let dir = TempDir::new().unwrap();
        let mut seg1 = Segment::open_for_append(dir.path(), 1)?;
        seg1.append(&Record::new(b"k".to_vec(), b"v1".to_vec()).encode())?;
        let mut seg2 = Segment::open_for_append(dir.path(), 2)?;
        seg2.append(&Record::new(b"k".to_vec(), b"v2".to_vec()).encode())?;

        let keydir = load(dir.path(), &[1, 2])?;
        let entry = keydir.get(b"k".as_slice()).unwrap();
        assert_eq!(entry.segment_id, 2);
        let segment = Segment::open_read_only(dir.path(), 2)?;
        assert_eq!(segment.read_at(entry.value_offset, entry.value_length)?, b"v2");
        Ok(())
    }

    #[test]
    fn tombstone_removes_prior_entry() -> Result<()> {
        let dir = TempDir::new().unwrap();
        let mut seg = Segment::open_for_append(dir.path(), 1)?;
        seg.append(&Record::new(b"k".to_vec(), b"v".to_vec()).encode())?;
        seg.append(&Record::tombstone(b"k".to_vec()).encode())?;

        let keydir = load(dir.path(), &[1])?;
        assert!(keydir.get(b"k".as_slice()).is_none());
        Ok(())
    }
}

//! An append-only segment file: `NNNNNNNN.data`, an 8-digit zero-padded
//! decimal id. Only the active segment (the one with the highest id) is
//! appended to; every other segment is sealed and read-only.

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, Read, Write};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::storage::record::{self, Record, HEADER_SIZE};

const EXTENSION: &str = "data";

/// One append-only data file and the handle used to read and write it.
#[derive(Debug)]
pub struct Segment {
    pub id: u32,
    path: PathBuf,
    file: File,
}

impl Segment {
    /// Opens (creating if missing) the segment file for `id` under `dir` in
    /// append+read mode. Appends are positioned atomically at end-of-file by
    /// the OS relative to other appends from this process.
    pub fn open_for_append(dir: &Path, id: u32) -> Result<Self> {
        let path = dir.join(Self::format_id(id));
        let file = OpenOptions::new().create(true).read(true).append(true).open(&path)?;
        Ok(Self { id, path, file })
    }

    /// Opens an existing segment file read-only, for recovery or for serving
    /// reads against a sealed segment.
    pub fn open_read_only(dir: &Path, id: u32) -> Result<Self> {
        let path = dir.join(Self::format_id(id));
        let file = OpenOptions::new().read(true).open(&path)?;
        Ok(Self { id, path, file })
    }

    /// Creates the transient `NNNNNNNN.data.merge` staging file compaction
    /// writes a fresh segment into before renaming it into place.
    pub fn create_merge_staging(dir: &Path, id: u32) -> Result<Self> {
        let path = dir.join(format!("{}.merge", Self::format_id(id)));
        let file =
            OpenOptions::new().create(true).read(true).append(true).truncate(false).open(&path)?;
        Ok(Self { id, path, file })
    }

    /// Renames this segment's (staging) file into the canonical
    /// `NNNNNNNN.data` path for its id, reopening the handle against the new
    /// path. Used to atomically publish a compacted segment.
    pub fn publish(mut self) -> Result<Self> {
        let target = self.path.parent().unwrap().join(Self::format_id(self.id));
        fs::rename(&self.path, &target)?;
        self.path = target;
        Ok(self)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends an already-encoded record and returns the offset at which it
    /// starts. Does not flush.
    pub fn append(&mut self, encoded: &[u8]) -> Result<u64> {
        // The file was opened with `.append(true)`, so the OS positions this
        // write atomically at end-of-file regardless of the fd's seek
        // position; we only need the pre-write length to report the offset.
        let offset = self.size()?;
        self.file.write_all(encoded)?;
        Ok(offset)
    }

    /// Forces buffered writes to durable storage. Skipped in test builds to
    /// keep the test suite fast; crash/corruption semantics are exercised
    /// directly via truncation instead.
    pub fn sync(&self) -> Result<()> {
        #[cfg(not(test))]
        self.file.sync_all()?;
        Ok(())
    }

    /// Current byte length of the file.
    pub fn size(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    /// Positional read of exactly `length` bytes starting at `offset`. Does
    /// not disturb any other reader or writer's cursor on this file.
    pub fn read_at(&self, offset: u64, length: u32) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; length as usize];
        self.file.read_exact_at(&mut buf, offset)?;
        Ok(buf)
    }

    /// Sequentially scans the segment from the start, yielding each record
    /// together with the file offset its header starts at.
    pub fn scan(&self) -> Result<SegmentScanner> {
        let file = self.file.try_clone()?;
        let len = file.metadata()?.len();
        Ok(SegmentScanner { reader: BufReader::new(file), pos: 0, len })
    }

    /// `00000001.data`-style name for a segment id.
    pub fn format_id(id: u32) -> String {
        format!("{id:08}.{EXTENSION}")
    }

    /// Parses a segment id out of a `.data` filename, returning `None` for
    /// anything else (including `db.lock` and stray `.data.merge` files).
    pub fn parse_id(name: &str) -> Option<u32> {
        let stem = name.strip_suffix(&format!(".{EXTENSION}"))?;
        stem.parse::<u32>().ok()
    }

    /// Removes the underlying file from disk. Used only by compaction to
    /// retire segments it has fully superseded.
    pub fn remove(self) -> Result<()> {
        drop(self.file);
        fs::remove_file(&self.path)?;
        Ok(())
    }
}

/// Sequential scan over a segment's records, used by the recovery loader and
/// by compaction.
pub struct SegmentScanner {
    reader: BufReader<File>,
    pos: u64,
    len: u64,
}

impl Iterator for SegmentScanner {
    type Item = Result<(Record, u64)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.len {
            return None;
        }
        Some(self.read_one())
    }
}

impl SegmentScanner {
    fn read_one(&mut self) -> Result<(Record, u64)> {
        let start = self.pos;

        let mut header = [0u8; HEADER_SIZE];
        if let Err(err) = self.reader.read_exact(&mut header) {
            return Err(short_read_err(err, start));
        }
        let (crc, timestamp, key_size, value_size) = record::decode_header(&header);

        let mut key = vec![0u8; key_size as usize];
        if let Err(err) = self.reader.read_exact(&mut key) {
            return Err(short_read_err(err, start));
        }
        let mut value = vec![0u8; value_size as usize];
        if let Err(err) = self.reader.read_exact(&mut value) {
            return Err(short_read_err(err, start));
        }

        let record = Record { crc, timestamp, key, value };
        if !record.verify() {
            return Err(Error::Corruption(format!(
                "checksum mismatch for record at offset {start}"
            )));
        }

        self.pos = start + HEADER_SIZE as u64 + key_size as u64 + value_size as u64;
        Ok((record, start))
    }
}

fn short_read_err(err: std::io::Error, offset: u64) -> Error {
    if err.kind() == std::io::ErrorKind::UnexpectedEof {
        Error::Corruption(format!("truncated record at offset {offset}"))
    } else {
        Error::Io(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn format_and_parse_id_round_trip() {
        assert_eq!(Segment::format_id(1), "00000001.data");
        assert_eq!(Segment::format_id(42), "00000042.data");
        assert_eq!(Segment::parse_id("00000001.data"), Some(1));
        assert_eq!(Segment::parse_id("00000042.data"), Some(42));
        assert_eq!(Segment::parse_id("db.lock"), None);
        assert_eq!(Segment::parse_id("00000001.data.merge"), None);
    }

    #[test]
    fn append_and_read_at() -> Result<()> {
        let dir = TempDir::new().unwrap();
        let mut segment = Segment::open_for_append(dir.path(), 1)?;

        let record = Record::new(b"k".to_vec(), b"value".to_vec());
        let encoded = record.encode();
        let offset = segment.append(&encoded)?;
        assert_eq!(offset, 0);

        let value_offset = offset + HEADER_SIZE as u64 + 1;
        let value = segment.read_at(value_offset, 5)?;
        assert_eq!(value, b"value");
        Ok(())
    }

    #[test]
    fn scan_yields_records_in_order() -> Result<()> {
        let dir = TempDir::new().unwrap();
        let mut segment = Segment::open_for_append(dir.path(), 1)?;

        segment.append(&Record::new(b"a".to_vec(), b"1".to_vec()).encode())?;
        segment.append(&Record::new(b"b".to_vec(), b"2".to_vec()).encode())?;

        let results: Result<Vec<_>> = segment.scan()?.collect();
        let results = results?;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0.key, b"a");
        assert_eq!(results[1].0.key, b"b");
        Ok(())
    }

    #[test]
    fn scan_detects_truncation() -> Result<()> {
        let dir = TempDir::new().unwrap();
        let mut segment = Segment::open_for_append(dir.path(), 1)?;
        segment.append(&Record::new(b"a".to_vec(), b"1".to_vec()).encode())?;
        segment.append(&Record::new(b"b".to_vec(), b"2".to_vec()).encode())?;

        // Truncate mid-way through the second record's key.
        let path = dir.path().join(Segment::format_id(1));
        let full_len = fs::metadata(&path)?.len();
        let f = OpenOptions::new().write(true).open(&path)?;
        f.set_len(full_len - 1)?;
        drop(f);

        let segment = Segment::open_read_only(dir.path(), 1)?;
        let results: Vec<_> = segment.scan()?.collect();
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(Error::Corruption(_))));
        Ok(())
    }

    #[test]
    fn scan_detects_checksum_mismatch() -> Result<()> {
        let dir = TempDir::new().unwrap();
        let mut segment = Segment::open_for_append(dir.path(), 1)?;
        segment.append(&Record::new(b"a".to_vec(), b"1".to_vec()).encode())?;
        drop(segment);

        // Flip a byte inside the value.
        let path = dir.path().join(Segment::format_id(1));
        let mut bytes = fs::read(&path)?;
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        fs::write(&path, bytes)?;

        let segment = Segment::open_read_only(dir.path(), 1)?;
        let results: Vec<_> = segment.scan()?.collect();
        assert!(matches!(results[0], Err(Error::Corruption(_))));
        Ok(())
    }
}

//! # Persistent Key-Value Store
//!
//! A file-backed store with an in-memory memtable and a write-ahead log.
//! Writes append a fsync'd WAL record before mutating the memtable; after
//! enough writes the memtable is folded into the base file and the WAL is
//! truncated. On open, the base file is loaded and the WAL replayed, so a
//! crash between append and compaction loses nothing.
//!
//! Record format (both files, binary, little-endian lengths):
//!
//! ```text
//! record := op(u8) || keyLen(u32) || key || valLen(u32) || val
//! op     := 0 (put) | 1 (delete; valLen is 0)
//! ```

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

const OP_PUT: u8 = 0;
const OP_DELETE: u8 = 1;

/// WAL records folded into the base file after this many writes.
const COMPACT_THRESHOLD: usize = 1024;

/// Failure in the storage layer. Missing keys are *not* errors; reads of
/// absent keys return `None`.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Underlying file I/O failed.
    #[error("kv i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A log or base file record could not be parsed.
    #[error("corrupt kv record in {file}: {reason}")]
    Corrupt { file: String, reason: String },
}

struct Inner {
    memtable: BTreeMap<Vec<u8>, Vec<u8>>,
    wal: BufWriter<File>,
    writes_since_compact: usize,
}

/// The store handle. Cheap to share behind an `Arc`; all operations take
/// the internal lock briefly.
pub struct KvStore {
    base_path: PathBuf,
    wal_path: PathBuf,
    inner: Mutex<Inner>,
}

impl KvStore {
    /// Open (or create) a store rooted at `dir`.
    ///
    /// # Errors
    ///
    /// Surfaces I/O failures and corrupt records as [`StorageError`].
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self, StorageError> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let base_path = dir.join("base.db");
        let wal_path = dir.join("wal.log");

        let mut memtable = BTreeMap::new();
        load_records(&base_path, &mut memtable)?;
        let replayed = load_records(&wal_path, &mut memtable)?;
        if replayed > 0 {
            tracing::info!(records = replayed, "replayed kv write-ahead log");
        }

        let wal_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&wal_path)?;

        Ok(Self {
            base_path,
            wal_path,
            inner: Mutex::new(Inner {
                memtable,
                wal: BufWriter::new(wal_file),
                writes_since_compact: 0,
            }),
        })
    }

    /// Read a value. Absent keys return `None`.
    #[must_use]
    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.inner.lock().memtable.get(key).cloned()
    }

    /// Write a key. Durable once this returns.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        let mut inner = self.inner.lock();
        append_record(&mut inner.wal, OP_PUT, key, value)?;
        inner.memtable.insert(key.to_vec(), value.to_vec());
        self.after_write(&mut inner)
    }

    /// Delete a key. Deleting an absent key is a durable no-op.
    pub fn delete(&self, key: &[u8]) -> Result<(), StorageError> {
        let mut inner = self.inner.lock();
        append_record(&mut inner.wal, OP_DELETE, key, &[])?;
        inner.memtable.remove(key);
        self.after_write(&mut inner)
    }

    /// All `(key, value)` pairs whose key starts with `prefix`, in key
    /// order.
    #[must_use]
    pub fn prefix_scan(&self, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
        let inner = self.inner.lock();
        inner
            .memtable
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Number of live keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().memtable.len()
    }

    /// Whether the store holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fold the memtable into the base file and truncate the WAL.
    pub fn compact(&self) -> Result<(), StorageError> {
        let mut inner = self.inner.lock();
        self.compact_locked(&mut inner)
    }

    fn after_write(&self, inner: &mut Inner) -> Result<(), StorageError> {
        inner.writes_since_compact += 1;
        if inner.writes_since_compact >= COMPACT_THRESHOLD {
            self.compact_locked(inner)?;
        }
        Ok(())
    }

    fn compact_locked(&self, inner: &mut Inner) -> Result<(), StorageError> {
        let tmp_path = self.base_path.with_extension("db.tmp");
        {
            let mut tmp = BufWriter::new(File::create(&tmp_path)?);
            for (key, value) in &inner.memtable {
                write_record(&mut tmp, OP_PUT, key, value)?;
            }
            tmp.flush()?;
            tmp.get_ref().sync_data()?;
        }
        std::fs::rename(&tmp_path, &self.base_path)?;

        let wal_file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.wal_path)?;
        wal_file.sync_data()?;
        inner.wal = BufWriter::new(
            OpenOptions::new().append(true).open(&self.wal_path)?,
        );
        inner.writes_since_compact = 0;
        tracing::debug!(keys = inner.memtable.len(), "compacted kv store");
        Ok(())
    }
}

fn write_record<W: Write>(out: &mut W, op: u8, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
    out.write_all(&[op])?;
    out.write_all(&(key.len() as u32).to_le_bytes())?;
    out.write_all(key)?;
    out.write_all(&(value.len() as u32).to_le_bytes())?;
    out.write_all(value)?;
    Ok(())
}

fn append_record(
    wal: &mut BufWriter<File>,
    op: u8,
    key: &[u8],
    value: &[u8],
) -> Result<(), StorageError> {
    write_record(wal, op, key, value)?;
    wal.flush()?;
    wal.get_ref().sync_data()?;
    Ok(())
}

fn load_records(path: &Path, memtable: &mut BTreeMap<Vec<u8>, Vec<u8>>) -> Result<usize, StorageError> {
    let mut bytes = Vec::new();
    match File::open(path) {
        Ok(mut file) => {
            file.read_to_end(&mut bytes)?;
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(err) => return Err(err.into()),
    }

    let corrupt = |reason: &str| StorageError::Corrupt {
        file: path.display().to_string(),
        reason: reason.to_owned(),
    };

    let mut pos = 0usize;
    let mut count = 0usize;
    while pos < bytes.len() {
        let op = bytes[pos];
        pos += 1;
        let key = read_chunk(&bytes, &mut pos).ok_or_else(|| corrupt("truncated key"))?;
        let value = read_chunk(&bytes, &mut pos).ok_or_else(|| corrupt("truncated value"))?;
        match op {
            OP_PUT => {
                memtable.insert(key, value);
            }
            OP_DELETE => {
                memtable.remove(&key);
            }
            other => return Err(corrupt(&format!("unknown op {other}"))),
        }
        count += 1;
    }
    Ok(count)
}

fn read_chunk(bytes: &[u8], pos: &mut usize) -> Option<Vec<u8>> {
    if bytes.len() - *pos < 4 {
        return None;
    }
    let len = u32::from_le_bytes(bytes[*pos..*pos + 4].try_into().ok()?) as usize;
    *pos += 4;
    if bytes.len() - *pos < len {
        return None;
    }
    let out = bytes[*pos..*pos + len].to_vec();
    *pos += len;
    Some(out)
}

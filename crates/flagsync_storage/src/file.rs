//! File-based cache storages.
//!
//! Layout of a cache directory:
//!
//! ```text
//! <cache_dir>/
//! ├─ LOCK                     # Advisory lock, one process per directory
//! ├─ flags.cbor               # Flags snapshot
//! ├─ segments-<hex key>.cbor  # Membership per matching key
//! └─ <queue>.cbor             # Record queues (events, impressions)
//! ```
//!
//! Every file is rewritten whole through a `.tmp` sibling and a rename.

use crate::backend::{
    FlagsSnapshot, FlagsUpdate, PersistentFlagsStorage, PersistentRecordStorage,
    PersistentSegmentsStorage,
};
use crate::error::{StorageError, StorageResult};
use flagsync_protocol::{ChangeCursor, FeatureFlag};
use fs2::FileExt;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fmt::Write as _;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

const LOCK_FILE: &str = "LOCK";
const FLAGS_FILE: &str = "flags.cbor";

/// Reads a CBOR file, returning `None` if it does not exist.
fn read_cbor<T: DeserializeOwned>(path: &Path) -> StorageResult<Option<T>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    ciborium::from_reader(BufReader::new(file))
        .map(Some)
        .map_err(|e| StorageError::Corrupted(format!("{}: {e}", path.display())))
}

/// Writes a CBOR file atomically.
fn write_cbor<T: Serialize>(path: &Path, value: &T) -> StorageResult<()> {
    let tmp = path.with_extension("cbor.tmp");
    {
        let file = File::create(&tmp)?;
        let mut writer = BufWriter::new(file);
        ciborium::into_writer(value, &mut writer)
            .map_err(|e| StorageError::Codec(e.to_string()))?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

#[derive(Debug)]
struct DirLock {
    path: PathBuf,
    _lock_file: File,
}

/// A locked cache directory.
///
/// Cloning shares the lock; it is released when the last clone and every
/// storage opened from it are dropped.
///
/// # Example
///
/// ```rust,no_run
/// use flagsync_storage::StorageDir;
/// use std::path::Path;
///
/// let dir = StorageDir::open(Path::new("cache")).unwrap();
/// let flags = dir.flags_storage().unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct StorageDir {
    inner: Arc<DirLock>,
}

impl StorageDir {
    /// Opens or creates a cache directory and takes its lock.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The path exists and is not a directory
    /// - Another process holds the lock (returns [`StorageError::Locked`])
    /// - I/O errors occur
    pub fn open(path: &Path) -> StorageResult<Self> {
        fs::create_dir_all(path)?;
        if !path.is_dir() {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("not a directory: {}", path.display()),
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(StorageError::Locked(path.to_path_buf()));
        }

        debug!(path = %path.display(), "opened cache directory");
        Ok(Self {
            inner: Arc::new(DirLock {
                path: path.to_path_buf(),
                _lock_file: lock_file,
            }),
        })
    }

    /// Returns the directory path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Opens the flags cache.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing cache file cannot be decoded.
    pub fn flags_storage(&self) -> StorageResult<FileFlagsStorage> {
        FileFlagsStorage::open(self.clone())
    }

    /// Opens the membership cache of a matching key.
    #[must_use]
    pub fn segments_storage(&self, matching_key: &str) -> FileSegmentsStorage {
        let mut name = String::from("segments-");
        for byte in matching_key.as_bytes() {
            let _ = write!(name, "{byte:02x}");
        }
        name.push_str(".cbor");
        FileSegmentsStorage {
            path: self.inner.path.join(name),
            _dir: self.clone(),
        }
    }

    /// Opens a named record queue, e.g. `events`.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing queue file cannot be decoded.
    pub fn record_storage<T>(&self, queue: &str) -> StorageResult<FileRecordStorage<T>>
    where
        T: Serialize + DeserializeOwned + Send,
    {
        FileRecordStorage::open(self.clone(), queue)
    }
}

#[derive(Serialize, Deserialize)]
struct FlagsFile {
    cursor: ChangeCursor,
    flags: BTreeMap<String, FeatureFlag>,
}

/// Flags cache stored in `flags.cbor`.
#[derive(Debug)]
pub struct FileFlagsStorage {
    path: PathBuf,
    state: Mutex<(BTreeMap<String, FeatureFlag>, ChangeCursor)>,
    _dir: StorageDir,
}

impl FileFlagsStorage {
    fn open(dir: StorageDir) -> StorageResult<Self> {
        let path = dir.path().join(FLAGS_FILE);
        let (flags, cursor) = match read_cbor::<FlagsFile>(&path)? {
            Some(file) => (file.flags, file.cursor),
            None => (BTreeMap::new(), ChangeCursor::INITIAL),
        };
        Ok(Self {
            path,
            state: Mutex::new((flags, cursor)),
            _dir: dir,
        })
    }
}

impl PersistentFlagsStorage for FileFlagsStorage {
    fn load_snapshot(&self) -> StorageResult<FlagsSnapshot> {
        let state = self.state.lock();
        Ok(FlagsSnapshot {
            flags: state.0.values().cloned().collect(),
            cursor: state.1,
        })
    }

    fn persist(&self, update: &FlagsUpdate) -> StorageResult<()> {
        let mut state = self.state.lock();
        let mut flags = state.0.clone();
        for name in &update.removals {
            flags.remove(name);
        }
        for flag in &update.upserts {
            flags.insert(flag.name.clone(), flag.clone());
        }

        let file = FlagsFile {
            cursor: update.cursor,
            flags,
        };
        write_cbor(&self.path, &file)?;
        *state = (file.flags, file.cursor);
        Ok(())
    }
}

/// Membership cache of one matching key.
#[derive(Debug)]
pub struct FileSegmentsStorage {
    path: PathBuf,
    _dir: StorageDir,
}

impl PersistentSegmentsStorage for FileSegmentsStorage {
    fn load_snapshot(&self) -> StorageResult<Vec<String>> {
        Ok(read_cbor(&self.path)?.unwrap_or_default())
    }

    fn persist(&self, segments: &[String]) -> StorageResult<()> {
        write_cbor(&self.path, &segments)
    }
}

/// A record queue stored in `<queue>.cbor`.
///
/// The queue is held in memory and the file is rewritten on every change.
#[derive(Debug)]
pub struct FileRecordStorage<T> {
    path: PathBuf,
    queue: Mutex<VecDeque<T>>,
    _dir: StorageDir,
}

impl<T> FileRecordStorage<T>
where
    T: Serialize + DeserializeOwned + Send,
{
    fn open(dir: StorageDir, queue: &str) -> StorageResult<Self> {
        let path = dir.path().join(format!("{queue}.cbor"));
        let records: VecDeque<T> = read_cbor(&path)?.unwrap_or_default();
        Ok(Self {
            path,
            queue: Mutex::new(records),
            _dir: dir,
        })
    }
}

impl<T> PersistentRecordStorage<T> for FileRecordStorage<T>
where
    T: Serialize + DeserializeOwned + Send,
{
    fn push(&self, record: T) -> StorageResult<()> {
        let mut queue = self.queue.lock();
        queue.push_back(record);
        write_cbor(&self.path, &*queue)
    }

    fn pop(&self, count: usize) -> StorageResult<Vec<T>> {
        let mut queue = self.queue.lock();
        let take = count.min(queue.len());
        let records: Vec<T> = queue.drain(..take).collect();
        write_cbor(&self.path, &*queue)?;
        Ok(records)
    }

    fn set_active(&self, records: Vec<T>) -> StorageResult<()> {
        let mut queue = self.queue.lock();
        for record in records.into_iter().rev() {
            queue.push_front(record);
        }
        write_cbor(&self.path, &*queue)
    }

    fn len(&self) -> usize {
        self.queue.lock().len()
    }
}

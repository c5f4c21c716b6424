mod key_path;

pub use key_path::escape_key;

use log::{debug, warn};
use rustc_hash::FxHashMap;
use std::{
    fs,
    io::{self, Read, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex, PoisonError},
};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Error type for scratch store operations.
#[derive(Error, Debug)]
pub enum ScratchError {
    /// An I/O error while touching the store directory.
    #[error("scratch I/O error: {0}")]
    Io(#[from] io::Error),
}

// ---------------------------------------------------------------------------
// ScratchSpace – key/value byte store with path access
// ---------------------------------------------------------------------------

/// A key/value byte store whose values also live at real filesystem paths.
///
/// Content interfaces keep both their source data and derived artifacts in
/// a scratch store, addressing everything by string key. The one primitive
/// with concurrency guarantees is [`fetch`](Self::fetch): an implementation
/// must run `populate` at most once per cold key, even under concurrent
/// callers, and must never leave a partially populated value behind.
pub trait ScratchSpace {
    /// Returns `true` if a value is stored under `key`.
    fn exists(&self, key: &str) -> bool;

    /// Reads the whole value stored under `key`.
    fn read(&self, key: &str) -> Result<Vec<u8>, ScratchError>;

    /// Removes the value under `key`. Removing an absent key is a no-op.
    fn delete(&self, key: &str) -> Result<(), ScratchError>;

    /// Filesystem path where the value for `key` lives (or would live).
    fn path(&self, key: &str) -> PathBuf;

    /// Stores the full contents of `src` under `key`, replacing any previous
    /// value. Returns the number of bytes written.
    fn write(&self, key: &str, src: &mut dyn Read) -> Result<u64, ScratchError>;

    /// Returns the value under `key`, populating it first if it is absent.
    ///
    /// `populate` receives the destination and must write the complete value
    /// before returning `Ok`. If it fails, the error is returned unchanged and
    /// the key stays absent.
    fn fetch<F, E>(&self, key: &str, populate: F) -> Result<Vec<u8>, E>
    where
        F: FnOnce(&mut dyn Write) -> Result<(), E>,
        E: From<ScratchError>;
}

// ---------------------------------------------------------------------------
// DirScratch – one flat directory, one file per key
// ---------------------------------------------------------------------------

/// Directory-backed [`ScratchSpace`].
///
/// Every key is stored as a single file directly inside the root directory;
/// see [`escape_key`] for the name mapping. New values are written to a
/// hidden temporary file in the same directory and renamed into place, so
/// readers only ever see complete values.
#[derive(Debug)]
pub struct DirScratch {
    root: PathBuf,
    /// Per-key locks serializing `fetch` populates within this process.
    locks: Mutex<FxHashMap<String, Arc<Mutex<()>>>>,
}

impl DirScratch {
    /// Opens (creating if needed) a scratch store rooted at `root`.
    ///
    /// # Errors
    /// Returns `ScratchError::Io` if the directory cannot be created.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, ScratchError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            locks: Mutex::new(FxHashMap::default()),
        })
    }

    /// The directory holding the stored values.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn key_lock(&self, key: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(key.to_owned()).or_default().clone()
    }

    fn temp_file(&self) -> io::Result<tempfile::NamedTempFile> {
        tempfile::Builder::new()
            .prefix(".partial")
            .tempfile_in(&self.root)
    }
}

impl ScratchSpace for DirScratch {
    fn exists(&self, key: &str) -> bool {
        self.path(key).is_file()
    }

    fn read(&self, key: &str) -> Result<Vec<u8>, ScratchError> {
        Ok(fs::read(self.path(key))?)
    }

    fn delete(&self, key: &str) -> Result<(), ScratchError> {
        match fs::remove_file(self.path(key)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn path(&self, key: &str) -> PathBuf {
        self.root.join(escape_key(key).as_ref())
    }

    fn write(&self, key: &str, src: &mut dyn Read) -> Result<u64, ScratchError> {
        let mut tmp = self.temp_file()?;
        let written = io::copy(src, &mut tmp)?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.path(key)).map_err(|err| err.error)?;
        Ok(written)
    }

    fn fetch<F, E>(&self, key: &str, populate: F) -> Result<Vec<u8>, E>
    where
        F: FnOnce(&mut dyn Write) -> Result<(), E>,
        E: From<ScratchError>,
    {
        let lock = self.key_lock(key);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let dest = self.path(key);
        if dest.is_file() {
            debug!("scratch hit for `{key}`");
            return Ok(self.read(key)?);
        }

        let mut tmp = self.temp_file().map_err(ScratchError::from)?;
        if let Err(err) = populate(&mut tmp) {
            // Dropping `tmp` removes the partial file.
            warn!("populate of `{key}` failed, discarding partial value");
            return Err(err);
        }
        tmp.flush().map_err(ScratchError::from)?;
        tmp.as_file().sync_all().map_err(ScratchError::from)?;
        tmp.persist(&dest)
            .map_err(|err| ScratchError::from(err.error))?;
        debug!("scratch populated `{key}`");

        Ok(self.read(key)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::TempDir;

    fn new_store() -> (TempDir, DirScratch) {
        let dir = TempDir::new().unwrap();
        let store = DirScratch::new(dir.path().join("scratch")).unwrap();
        (dir, store)
    }

    #[test]
    fn write_read_delete() {
        let (_dir, store) = new_store();
        assert!(!store.exists("k"));

        let written = store.write("k", &mut Cursor::new(b"abc".to_vec())).unwrap();
        assert_eq!(written, 3);
        assert!(store.exists("k"));
        assert_eq!(store.read("k").unwrap(), b"abc");

        store.delete("k").unwrap();
        assert!(!store.exists("k"));
        // Deleting twice is fine.
        store.delete("k").unwrap();
    }

    #[test]
    fn keys_with_separators_stay_in_root() {
        let (_dir, store) = new_store();
        store.write("extracted_xl/workbook.xml", &mut &b"x"[..]).unwrap();
        let path = store.path("extracted_xl/workbook.xml");
        assert_eq!(path.parent(), Some(store.root()));
        assert!(path.is_file());
    }

    #[test]
    fn fetch_populates_once() {
        let (_dir, store) = new_store();
        let mut calls = 0;

        let first = store
            .fetch("k", |dest| -> Result<(), ScratchError> {
                calls += 1;
                dest.write_all(b"hello")?;
                Ok(())
            })
            .unwrap();
        let second = store
            .fetch("k", |_dest| -> Result<(), ScratchError> {
                panic!("populate must not run for a cached key")
            })
            .unwrap();

        assert_eq!(calls, 1);
        assert_eq!(first, b"hello");
        assert_eq!(second, b"hello");
    }

    #[test]
    fn failed_populate_leaves_nothing_behind() {
        let (_dir, store) = new_store();

        let result = store.fetch("k", |dest| -> Result<(), ScratchError> {
            dest.write_all(b"half")?;
            Err(io::Error::other("boom").into())
        });

        assert!(result.is_err());
        assert!(!store.exists("k"));
        let leftovers = fs::read_dir(store.root()).unwrap().count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn concurrent_fetch_runs_populate_once() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let (_dir, store) = new_store();
        let calls = AtomicUsize::new(0);

        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    let bytes = store
                        .fetch("shared", |dest| -> Result<(), ScratchError> {
                            calls.fetch_add(1, Ordering::SeqCst);
                            dest.write_all(b"payload")?;
                            Ok(())
                        })
                        .unwrap();
                    assert_eq!(bytes, b"payload");
                });
            }
        });

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}

//! Durable record of the last fully reconciled transaction boundary.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use tmr_types::TxnId;

use crate::error::{DaemonError, DaemonResult};

/// Storage for the persisted marker.
pub trait MarkerStore {
    /// The stored marker, or `None` if none was ever written.
    fn read(&self) -> DaemonResult<Option<TxnId>>;

    /// Replace the stored marker. Must be durable when it returns.
    fn write(&self, tid: TxnId) -> DaemonResult<()>;
}

/// Marker kept in a small text file as 16 hex digits.
///
/// Writes go to a temporary file in the same directory which is synced and
/// then renamed over the marker, so a crash leaves either the old or the
/// new value.
#[derive(Debug, Clone)]
pub struct FileMarkerStore {
    path: PathBuf,
}

impl FileMarkerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> DaemonError {
        DaemonError::MarkerIo {
            path: self.path.clone(),
            source,
        }
    }
}

impl MarkerStore for FileMarkerStore {
    fn read(&self) -> DaemonResult<Option<TxnId>> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) if e.kind() == ErrorKind::InvalidData => {
                return Err(DaemonError::MarkerCorrupt {
                    path: self.path.clone(),
                    reason: "not valid UTF-8".into(),
                })
            }
            Err(e) => return Err(self.io_error(e)),
        };
        TxnId::from_hex(&contents)
            .map(Some)
            .map_err(|e| DaemonError::MarkerCorrupt {
                path: self.path.clone(),
                reason: e.to_string(),
            })
    }

    fn write(&self, tid: TxnId) -> DaemonResult<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).map_err(|e| self.io_error(e))?;

        let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(|e| self.io_error(e))?;
        writeln!(tmp, "{}", tid.to_hex()).map_err(|e| self.io_error(e))?;
        tmp.as_file().sync_all().map_err(|e| self.io_error(e))?;
        tmp.persist(&self.path).map_err(|e| self.io_error(e.error))?;
        tracing::debug!(marker = %tid, path = %self.path.display(), "marker written");
        Ok(())
    }
}

/// Marker held in memory, counting writes.
#[derive(Debug, Default)]
pub struct InMemoryMarkerStore {
    value: Mutex<Option<TxnId>>,
    writes: AtomicUsize,
}

impl InMemoryMarkerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_marker(tid: TxnId) -> Self {
        Self {
            value: Mutex::new(Some(tid)),
            writes: AtomicUsize::new(0),
        }
    }

    /// Number of successful writes.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn current(&self) -> Option<TxnId> {
        self.value.lock().ok().and_then(|guard| *guard)
    }
}

impl MarkerStore for InMemoryMarkerStore {
    fn read(&self) -> DaemonResult<Option<TxnId>> {
        Ok(*self.value.lock().map_err(|_| DaemonError::Poisoned)?)
    }

    fn write(&self, tid: TxnId) -> DaemonResult<()> {
        let mut guard = self.value.lock().map_err(|_| DaemonError::Poisoned)?;
        *guard = Some(tid);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl<M: MarkerStore + ?Sized> MarkerStore for &M {
    fn read(&self) -> DaemonResult<Option<TxnId>> {
        (**self).read()
    }

    fn write(&self, tid: TxnId) -> DaemonResult<()> {
        (**self).write(tid)
    }
}

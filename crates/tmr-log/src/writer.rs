use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tmr_types::{ObjectId, TxnId};
use tracing::{debug, warn};

use crate::error::{LogError, LogResult};
use crate::format::{encode_file_header, encode_txn, TxnStatus, FILE_HEADER_LEN, STATUS_OFFSET};
use crate::reader::LogReader;

/// A transaction whose bytes are on disk but that readers do not see yet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PendingTxn {
    pub tid: TxnId,
    offset: u64,
    len: u64,
}

/// Appends transactions to a log.
///
/// A transaction is written in two steps: the full transaction is appended
/// with status `InFlight` and synced, then its status byte is flipped to
/// `Committed` and synced again. Readers never observe a partially
/// committed transaction.
///
/// Exactly one writer may have a log open at a time.
pub struct LogWriter {
    path: PathBuf,
    file: File,
    /// Offset just past the last committed transaction.
    end: u64,
    last_tid: TxnId,
    pending: Option<PendingTxn>,
}

impl LogWriter {
    /// Create a new, empty log. Fails if the file already exists.
    pub fn create(path: &Path) -> LogResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;
        file.write_all(&encode_file_header())?;
        file.sync_all()?;

        debug!(path = %path.display(), "created transaction log");
        Ok(Self {
            path: path.to_path_buf(),
            file,
            end: FILE_HEADER_LEN,
            last_tid: TxnId::ZERO,
            pending: None,
        })
    }

    /// Open an existing log for appending.
    ///
    /// Anything after the last committed transaction (a torn write or a
    /// transaction left in flight by a crashed writer) is truncated.
    pub fn open(path: &Path) -> LogResult<Self> {
        let tail = LogReader::open(path)?.tail()?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|source| LogError::LogUnavailable {
                path: path.to_path_buf(),
                source,
            })?;

        let len = file.metadata()?.len();
        if len > tail.end {
            warn!(
                path = %path.display(),
                discarded = len - tail.end,
                in_flight = ?tail.in_flight,
                "discarding uncommitted bytes at end of log"
            );
            file.set_len(tail.end)?;
            file.sync_all()?;
        }

        Ok(Self {
            path: path.to_path_buf(),
            file,
            end: tail.end,
            last_tid: tail.last_tid(),
            pending: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Id of the last committed transaction (`ZERO` if none).
    pub fn last_tid(&self) -> TxnId {
        self.last_tid
    }

    /// Id the next [`LogWriter::commit`] will use.
    pub fn next_tid(&self) -> TxnId {
        TxnId::from_time(SystemTime::now()).max(self.last_tid.increment())
    }

    /// Append and commit one transaction with a clock-derived id.
    pub fn commit(&mut self, records: &[(ObjectId, Vec<u8>)]) -> LogResult<TxnId> {
        let tid = self.next_tid();
        self.commit_at(tid, records)
    }

    /// Append and commit one transaction with an explicit id.
    pub fn commit_at(&mut self, tid: TxnId, records: &[(ObjectId, Vec<u8>)]) -> LogResult<TxnId> {
        let pending = self.begin_at(tid, records)?;
        self.finish(pending)
    }

    /// Write a transaction without committing it.
    pub fn begin_at(
        &mut self,
        tid: TxnId,
        records: &[(ObjectId, Vec<u8>)],
    ) -> LogResult<PendingTxn> {
        if let Some(pending) = self.pending {
            return Err(LogError::TxnInFlight(pending.tid));
        }
        // An empty log has `last_tid == ZERO`, so ZERO itself is never used.
        if tid <= self.last_tid {
            return Err(LogError::NonMonotonicTxn {
                tid,
                last: self.last_tid,
            });
        }

        let buf = encode_txn(tid, TxnStatus::InFlight, records)?;
        self.file.seek(SeekFrom::Start(self.end))?;
        self.file.write_all(&buf)?;
        self.file.sync_data()?;

        let pending = PendingTxn {
            tid,
            offset: self.end,
            len: buf.len() as u64,
        };
        self.pending = Some(pending);
        Ok(pending)
    }

    /// Commit a transaction written by [`LogWriter::begin_at`].
    pub fn finish(&mut self, pending: PendingTxn) -> LogResult<TxnId> {
        if self.pending != Some(pending) {
            return Err(LogError::CorruptTransaction {
                offset: pending.offset,
                reason: "not the pending transaction of this writer".into(),
            });
        }
        self.file
            .seek(SeekFrom::Start(pending.offset + STATUS_OFFSET))?;
        self.file.write_all(&[TxnStatus::Committed.as_byte()])?;
        self.file.sync_data()?;

        self.end = pending.offset + pending.len;
        self.last_tid = pending.tid;
        self.pending = None;

        debug!(tid = %pending.tid, offset = pending.offset, "committed transaction");
        Ok(pending.tid)
    }
}

impl std::fmt::Debug for LogWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogWriter")
            .field("path", &self.path)
            .field("end", &self.end)
            .field("last_tid", &self.last_tid)
            .finish()
    }
}

use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use tmr_types::{ObjectId, TxnId};
use tracing::{debug, warn};

use crate::error::{LogError, LogResult};
use crate::format::{
    decode_txn_header, RecordHeader, TxnInfo, TxnStatus, FILE_HEADER_LEN, MAGIC,
    RECORD_HEADER_LEN, TXN_HEADER_LEN, TXN_TRAILER_LEN, VERSION,
};

/// Result of walking transaction headers forward.
#[derive(Clone, Debug, Default)]
pub struct Walk {
    /// Committed transactions in log order.
    pub txns: Vec<TxnInfo>,
    /// Offset just past the last committed transaction.
    pub end: u64,
    /// Id of the transaction the walk stopped at because it is still being
    /// written.
    pub in_flight: Option<TxnId>,
}

impl Walk {
    /// Visible boundary after this walk, given the boundary that held
    /// before its starting offset.
    pub fn boundary(&self, previous: TxnId) -> TxnId {
        visible_boundary(self.txns.last().map(|t| t.tid), self.in_flight, previous)
    }
}

/// The committed end of a log.
#[derive(Clone, Copy, Debug)]
pub struct LogTail {
    pub last: Option<TxnInfo>,
    pub end: u64,
    pub in_flight: Option<TxnId>,
}

impl LogTail {
    /// Id of the last committed transaction, `ZERO` for an empty log.
    pub fn last_tid(&self) -> TxnId {
        self.last.map(|t| t.tid).unwrap_or(TxnId::ZERO)
    }

    /// Highest id whose effects are fully visible to this reader.
    pub fn boundary(&self) -> TxnId {
        visible_boundary(self.last.map(|t| t.tid), self.in_flight, TxnId::ZERO)
    }
}

fn visible_boundary(last: Option<TxnId>, in_flight: Option<TxnId>, previous: TxnId) -> TxnId {
    match (in_flight, last) {
        // Everything strictly before the first unfinished transaction is
        // visible.
        (Some(pending), _) => pending.decrement(),
        (None, Some(tid)) => tid,
        (None, None) => previous,
    }
}

enum Slot {
    Txn(TxnInfo),
    Incomplete,
}

/// Read-only access to a transaction log.
///
/// The reader works on the file length observed at open time (or the last
/// [`LogReader::reload_len`]); bytes appended afterwards are invisible.
pub struct LogReader {
    path: PathBuf,
    file: BufReader<File>,
    len: u64,
}

impl LogReader {
    /// Open a log read-only and validate its header.
    pub fn open(path: &Path) -> LogResult<Self> {
        let file = File::open(path).map_err(|source| LogError::LogUnavailable {
            path: path.to_path_buf(),
            source,
        })?;
        let len = file
            .metadata()
            .map_err(|source| LogError::LogUnavailable {
                path: path.to_path_buf(),
                source,
            })?
            .len();

        let mut reader = Self {
            path: path.to_path_buf(),
            file: BufReader::new(file),
            len,
        };
        reader.check_header()?;
        Ok(reader)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File length the reader currently works with.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len <= FILE_HEADER_LEN
    }

    /// Pick up bytes appended since the reader was opened.
    pub fn reload_len(&mut self) -> LogResult<u64> {
        self.len = self.file.get_ref().metadata()?.len();
        Ok(self.len)
    }

    fn check_header(&mut self) -> LogResult<()> {
        let mut buf = [0u8; FILE_HEADER_LEN as usize];
        match self.file.read_exact(&mut buf) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                return Err(LogError::InvalidHeader {
                    path: self.path.clone(),
                })
            }
            Err(e) => return Err(e.into()),
        }
        if &buf[0..4] != MAGIC {
            return Err(LogError::InvalidHeader {
                path: self.path.clone(),
            });
        }
        let version = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
        if version != VERSION {
            return Err(LogError::UnsupportedVersion(version));
        }
        Ok(())
    }

    /// Walk committed transactions forward from `offset`, reading only
    /// headers. Stops at the first in-flight or incomplete transaction.
    pub fn walk(&mut self, offset: u64) -> LogResult<Walk> {
        let mut walk = Walk {
            end: offset.max(FILE_HEADER_LEN),
            ..Walk::default()
        };
        loop {
            match self.slot_at(walk.end)? {
                Slot::Txn(txn) if txn.is_committed() => {
                    walk.end = txn.next_offset();
                    walk.txns.push(txn);
                }
                Slot::Txn(txn) => {
                    walk.in_flight = Some(txn.tid);
                    break;
                }
                Slot::Incomplete => break,
            }
        }
        debug!(
            path = %self.path.display(),
            txns = walk.txns.len(),
            end = walk.end,
            "walked transaction log"
        );
        Ok(walk)
    }

    /// Locate the committed end of the log.
    ///
    /// Uses the trailer of the physically last transaction when it is
    /// consistent and falls back to a full forward walk otherwise (torn
    /// tail after a crash).
    pub fn tail(&mut self) -> LogResult<LogTail> {
        if self.len <= FILE_HEADER_LEN {
            return Ok(LogTail {
                last: None,
                end: FILE_HEADER_LEN,
                in_flight: None,
            });
        }

        if let Some(last) = self.txn_ending_at(self.len)? {
            if last.is_committed() {
                return Ok(LogTail {
                    last: Some(last),
                    end: self.len,
                    in_flight: None,
                });
            }
            if last.offset == FILE_HEADER_LEN {
                return Ok(LogTail {
                    last: None,
                    end: FILE_HEADER_LEN,
                    in_flight: Some(last.tid),
                });
            }
            if let Some(prev) = self.txn_ending_at(last.offset)? {
                if prev.is_committed() {
                    return Ok(LogTail {
                        last: Some(prev),
                        end: last.offset,
                        in_flight: Some(last.tid),
                    });
                }
            }
        }

        let walk = self.walk(FILE_HEADER_LEN)?;
        Ok(LogTail {
            last: walk.txns.last().copied(),
            end: walk.end,
            in_flight: walk.in_flight,
        })
    }

    /// Offset of the first committed transaction whose id is `>= from`,
    /// or `tail.end` if there is none. Walks backwards from the tail.
    pub fn locate(&mut self, from: TxnId, tail: &LogTail) -> LogResult<u64> {
        let mut offset = tail.end;
        let mut cursor = tail.last;
        while let Some(txn) = cursor {
            if txn.tid < from {
                return Ok(offset);
            }
            offset = txn.offset;
            if offset == FILE_HEADER_LEN {
                return Ok(offset);
            }
            cursor = self.txn_ending_at(offset)?;
        }
        if offset == tail.end || offset == FILE_HEADER_LEN {
            return Ok(offset);
        }

        // Broken backward chain: fall back to a forward walk.
        warn!(
            path = %self.path.display(),
            offset,
            "inconsistent transaction trailer; locating by forward walk"
        );
        let walk = self.walk(FILE_HEADER_LEN)?;
        Ok(walk
            .txns
            .iter()
            .find(|t| t.tid >= from)
            .map(|t| t.offset)
            .unwrap_or(walk.end))
    }

    /// Read the transaction header at `offset`, which must be a committed
    /// transaction inside the visible part of the log.
    pub fn txn_at(&mut self, offset: u64) -> LogResult<TxnInfo> {
        match self.slot_at(offset)? {
            Slot::Txn(txn) => Ok(txn),
            Slot::Incomplete => Err(LogError::CorruptTransaction {
                offset,
                reason: "transaction extends beyond the end of the log".into(),
            }),
        }
    }

    /// Headers of every record in a transaction, in log order.
    pub fn records(&mut self, txn: &TxnInfo) -> LogResult<Vec<RecordHeader>> {
        let mut records = Vec::new();
        let mut pos = txn.data_start();
        let end = txn.data_end();
        while pos < end {
            if pos + RECORD_HEADER_LEN > end {
                return Err(LogError::CorruptTransaction {
                    offset: txn.offset,
                    reason: format!("truncated record header at offset {pos}"),
                });
            }
            let header = self.record_header_at(pos)?;
            let next = pos + header.record_len();
            if next > end {
                return Err(LogError::CorruptTransaction {
                    offset: txn.offset,
                    reason: format!("record at offset {pos} overruns its transaction"),
                });
            }
            records.push(header);
            pos = next;
        }
        Ok(records)
    }

    /// Read and verify the record at `offset`.
    pub fn read_record(&mut self, offset: u64) -> LogResult<(ObjectId, Vec<u8>)> {
        let header = self.record_header_at(offset)?;
        if offset + header.record_len() > self.len {
            return Err(LogError::CorruptTransaction {
                offset,
                reason: "record payload extends beyond the end of the log".into(),
            });
        }
        let mut payload = vec![0u8; header.payload_len as usize];
        self.file.read_exact(&mut payload)?;

        let actual = crc32fast::hash(&payload);
        if actual != header.crc {
            return Err(LogError::CrcMismatch {
                offset,
                expected: header.crc,
                actual,
            });
        }
        Ok((header.oid, payload))
    }

    fn record_header_at(&mut self, offset: u64) -> LogResult<RecordHeader> {
        self.file.seek(SeekFrom::Start(offset))?;
        let mut buf = [0u8; RECORD_HEADER_LEN as usize];
        self.file.read_exact(&mut buf)?;
        Ok(RecordHeader::decode(offset, &buf))
    }

    fn slot_at(&mut self, offset: u64) -> LogResult<Slot> {
        if offset + TXN_HEADER_LEN > self.len {
            return Ok(Slot::Incomplete);
        }
        self.file.seek(SeekFrom::Start(offset))?;
        let mut buf = [0u8; TXN_HEADER_LEN as usize];
        self.file.read_exact(&mut buf)?;
        let txn = decode_txn_header(offset, &buf)?;

        let complete_len = TXN_HEADER_LEN
            .checked_add(txn.body_len)
            .and_then(|n| n.checked_add(TXN_TRAILER_LEN));
        match complete_len {
            Some(n) if offset + n <= self.len => {}
            _ => return Ok(Slot::Incomplete),
        }

        if self.trailer_at(txn.data_end())? != txn.body_len {
            warn!(
                path = %self.path.display(),
                offset,
                "transaction trailer does not match its header; treating as incomplete"
            );
            return Ok(Slot::Incomplete);
        }
        Ok(Slot::Txn(txn))
    }

    /// The transaction whose trailer ends exactly at `end`, if the trailer
    /// and the header it points to agree.
    fn txn_ending_at(&mut self, end: u64) -> LogResult<Option<TxnInfo>> {
        if end < FILE_HEADER_LEN + TXN_HEADER_LEN + TXN_TRAILER_LEN {
            return Ok(None);
        }
        let body_len = self.trailer_at(end - TXN_TRAILER_LEN)?;
        let span = match body_len.checked_add(TXN_HEADER_LEN + TXN_TRAILER_LEN) {
            Some(span) if span <= end - FILE_HEADER_LEN => span,
            _ => return Ok(None),
        };
        let offset = end - span;
        match self.slot_at(offset) {
            Ok(Slot::Txn(txn)) if txn.next_offset() == end => Ok(Some(txn)),
            Ok(_) | Err(LogError::CorruptTransaction { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn trailer_at(&mut self, offset: u64) -> LogResult<u64> {
        self.file.seek(SeekFrom::Start(offset))?;
        let mut buf = [0u8; TXN_TRAILER_LEN as usize];
        self.file.read_exact(&mut buf)?;
        Ok(u64::from_be_bytes(buf))
    }
}

impl std::fmt::Debug for LogReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogReader")
            .field("path", &self.path)
            .field("len", &self.len)
            .finish()
    }
}

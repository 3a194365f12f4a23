//! Byte layout of the transaction log.

use tmr_types::{ObjectId, TxnId};

use crate::error::{LogError, LogResult};

/// File magic.
pub const MAGIC: &[u8; 4] = b"TMRL";

/// Current format version.
pub const VERSION: u32 = 1;

/// Magic plus version.
pub const FILE_HEADER_LEN: u64 = 8;

/// tid (8) + body length (8) + status (1).
pub const TXN_HEADER_LEN: u64 = 17;

/// Redundant body length after the records.
pub const TXN_TRAILER_LEN: u64 = 8;

/// oid (8) + payload length (4) + crc (4).
pub const RECORD_HEADER_LEN: u64 = 16;

/// Offset of the status byte inside a transaction header.
pub const STATUS_OFFSET: u64 = 16;

const STATUS_COMMITTED: u8 = b' ';
const STATUS_IN_FLIGHT: u8 = b'c';

/// Commit state of a transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxnStatus {
    /// Fully written and visible to readers.
    Committed,
    /// Still being appended; readers stop in front of it.
    InFlight,
}

impl TxnStatus {
    pub fn as_byte(self) -> u8 {
        match self {
            Self::Committed => STATUS_COMMITTED,
            Self::InFlight => STATUS_IN_FLIGHT,
        }
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            STATUS_COMMITTED => Some(Self::Committed),
            STATUS_IN_FLIGHT => Some(Self::InFlight),
            _ => None,
        }
    }
}

/// Location and header of one transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TxnInfo {
    pub tid: TxnId,
    /// Offset of the transaction header.
    pub offset: u64,
    /// Length of the record area.
    pub body_len: u64,
    pub status: TxnStatus,
}

impl TxnInfo {
    /// Offset of the first record.
    pub fn data_start(&self) -> u64 {
        self.offset + TXN_HEADER_LEN
    }

    /// Offset just past the last record.
    pub fn data_end(&self) -> u64 {
        self.data_start() + self.body_len
    }

    /// Offset of the following transaction.
    pub fn next_offset(&self) -> u64 {
        self.data_end() + TXN_TRAILER_LEN
    }

    pub fn is_committed(&self) -> bool {
        self.status == TxnStatus::Committed
    }
}

/// Header of one change record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecordHeader {
    pub oid: ObjectId,
    /// Offset of the record header.
    pub offset: u64,
    pub payload_len: u32,
    pub crc: u32,
}

impl RecordHeader {
    /// Total length of the record, used to locate the next one.
    pub fn record_len(&self) -> u64 {
        RECORD_HEADER_LEN + self.payload_len as u64
    }

    pub(crate) fn decode(offset: u64, buf: &[u8; RECORD_HEADER_LEN as usize]) -> Self {
        let mut oid = [0u8; 8];
        oid.copy_from_slice(&buf[0..8]);
        Self {
            oid: ObjectId::from_bytes(oid),
            offset,
            payload_len: u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]),
            crc: u32::from_be_bytes([buf[12], buf[13], buf[14], buf[15]]),
        }
    }
}

pub(crate) fn encode_file_header() -> [u8; FILE_HEADER_LEN as usize] {
    let mut buf = [0u8; FILE_HEADER_LEN as usize];
    buf[0..4].copy_from_slice(MAGIC);
    buf[4..8].copy_from_slice(&VERSION.to_be_bytes());
    buf
}

pub(crate) fn decode_txn_header(
    offset: u64,
    buf: &[u8; TXN_HEADER_LEN as usize],
) -> LogResult<TxnInfo> {
    let mut tid = [0u8; 8];
    tid.copy_from_slice(&buf[0..8]);
    let mut len = [0u8; 8];
    len.copy_from_slice(&buf[8..16]);
    let status = TxnStatus::from_byte(buf[16]).ok_or_else(|| LogError::CorruptTransaction {
        offset,
        reason: format!("unknown status byte {:#04x}", buf[16]),
    })?;
    Ok(TxnInfo {
        tid: TxnId::from_bytes(tid),
        offset,
        body_len: u64::from_be_bytes(len),
        status,
    })
}

/// Serialize a whole transaction, header through trailer.
pub(crate) fn encode_txn(
    tid: TxnId,
    status: TxnStatus,
    records: &[(ObjectId, Vec<u8>)],
) -> LogResult<Vec<u8>> {
    let mut body_len: u64 = 0;
    for (_, payload) in records {
        if payload.len() > u32::MAX as usize {
            return Err(LogError::PayloadTooLarge(payload.len()));
        }
        body_len += RECORD_HEADER_LEN + payload.len() as u64;
    }

    let total = TXN_HEADER_LEN + body_len + TXN_TRAILER_LEN;
    let mut buf = Vec::with_capacity(total as usize);
    buf.extend_from_slice(&tid.to_bytes());
    buf.extend_from_slice(&body_len.to_be_bytes());
    buf.push(status.as_byte());
    for (oid, payload) in records {
        buf.extend_from_slice(oid.as_bytes());
        buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        buf.extend_from_slice(&crc32fast::hash(payload).to_be_bytes());
        buf.extend_from_slice(payload);
    }
    buf.extend_from_slice(&body_len.to_be_bytes());
    Ok(buf)
}

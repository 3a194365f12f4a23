use std::io;
use std::path::PathBuf;

use tmr_types::TxnId;

/// Errors produced by the transaction log.
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    /// The log file cannot be opened.
    #[error("transaction log unavailable at {}: {source}", path.display())]
    LogUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The file does not start with the log magic.
    #[error("not a transaction log: {}", path.display())]
    InvalidHeader { path: PathBuf },

    /// The log was written by an incompatible version.
    #[error("unsupported log version {0}")]
    UnsupportedVersion(u32),

    /// The requested start id lies beyond every transaction in the log.
    #[error("unknown transaction boundary {requested} (last committed transaction is {last})")]
    UnknownTransactionBoundary { requested: TxnId, last: TxnId },

    /// Structural damage inside a complete transaction.
    #[error("corrupt transaction at offset {offset}: {reason}")]
    CorruptTransaction { offset: u64, reason: String },

    /// A record payload failed its CRC check.
    #[error("CRC mismatch for record at offset {offset}: expected {expected:#010x}, got {actual:#010x}")]
    CrcMismatch {
        offset: u64,
        expected: u32,
        actual: u32,
    },

    /// A transaction id that does not sort after the previous one.
    #[error("transaction id {tid} does not follow {last}")]
    NonMonotonicTxn { tid: TxnId, last: TxnId },

    /// A transaction was started while another one is still in flight.
    #[error("transaction {0} is still in flight")]
    TxnInFlight(TxnId),

    /// A record payload larger than the format allows.
    #[error("payload of {0} bytes exceeds the record size limit")]
    PayloadTooLarge(usize),

    /// I/O error on an already opened log.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Convenience alias used throughout the log crate.
pub type LogResult<T> = std::result::Result<T, LogError>;

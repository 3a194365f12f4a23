//! Append-only transaction log for the tree mirror.
//!
//! The log is the object store's durable history: every committed
//! transaction lists the objects it wrote, each with its new state. The
//! mirror never interprets payloads here; [`scan`] only needs the ids.
//!
//! # On-disk format
//!
//! ```text
//! file   := "TMRL" | version u32 BE | txn*
//! txn    := tid [8] | body_len u64 BE | status u8 | record* | body_len u64 BE
//! record := oid [8] | payload_len u32 BE | crc32 u32 BE | payload
//! ```
//!
//! The trailing copy of `body_len` lets readers walk the log backwards from
//! its end, which is how [`scan`] finds recent transactions without reading
//! the whole file.

pub mod error;
pub mod format;
pub mod reader;
pub mod scanner;
pub mod writer;

pub use error::{LogError, LogResult};
pub use format::{RecordHeader, TxnInfo, TxnStatus};
pub use reader::{LogReader, LogTail, Walk};
pub use scanner::scan;
pub use writer::{LogWriter, PendingTxn};

//! Map a transaction range to the set of objects it touched.

use std::collections::BTreeSet;
use std::path::Path;

use tmr_types::{ObjectId, TxnId};
use tracing::debug;

use crate::error::{LogError, LogResult};
use crate::reader::LogReader;

/// Collect the ids of every object written by committed transactions with
/// `from <= tid <= to_inclusive`.
///
/// `from` must be a known boundary: at most one past the visible boundary,
/// which with a transaction in flight reaches up to that transaction's id.
/// A start id further ahead means the caller's idea of the log
/// no longer matches the file and is reported as
/// [`LogError::UnknownTransactionBoundary`].
///
/// Read-only; ids written more than once in the range are reported once.
pub fn scan(path: &Path, from: TxnId, to_inclusive: TxnId) -> LogResult<BTreeSet<ObjectId>> {
    let mut reader = LogReader::open(path)?;
    let tail = reader.tail()?;

    let visible = tail.boundary();
    if visible != TxnId::MAX && from > visible.increment() {
        return Err(LogError::UnknownTransactionBoundary {
            requested: from,
            last: tail.last_tid(),
        });
    }

    let mut changed = BTreeSet::new();
    if from > to_inclusive {
        return Ok(changed);
    }

    let mut offset = reader.locate(from, &tail)?;
    let mut txns = 0usize;
    while offset < tail.end {
        let txn = reader.txn_at(offset)?;
        if txn.tid > to_inclusive {
            break;
        }
        for record in reader.records(&txn)? {
            changed.insert(record.oid);
        }
        txns += 1;
        offset = txn.next_offset();
    }

    debug!(
        from = %from,
        to = %to_inclusive,
        txns,
        objects = changed.len(),
        "scanned transaction range"
    );
    Ok(changed)
}

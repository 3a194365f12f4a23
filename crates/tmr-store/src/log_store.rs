//! Object store backed directly by the transaction log.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tmr_log::{LogReader, LogWriter};
use tmr_types::{ObjectId, TxnId};
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::object::{LiveObject, ObjectState};
use crate::traits::{ObjectAccessor, SnapshotSource};

/// Reads object states from the log.
///
/// The index maps every object to its most recent record at or below the
/// current boundary. [`SnapshotSource::refresh`] extends it by reading only
/// the transactions appended since the previous refresh, so the cost of a
/// poll is proportional to new log data.
pub struct LogStore {
    path: PathBuf,
    reader: Mutex<LogReader>,
    index: HashMap<ObjectId, u64>,
    /// Offset indexed through.
    end: u64,
    boundary: TxnId,
}

impl LogStore {
    /// Open a log and index everything committed so far.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let reader = LogReader::open(path)?;
        let mut store = Self {
            path: path.to_path_buf(),
            reader: Mutex::new(reader),
            index: HashMap::new(),
            end: 0,
            boundary: TxnId::ZERO,
        };
        store.refresh()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of distinct objects in the snapshot.
    pub fn object_count(&self) -> usize {
        self.index.len()
    }
}

impl ObjectAccessor for LogStore {
    fn fetch(&self, id: &ObjectId) -> StoreResult<LiveObject> {
        let offset = *self.index.get(id).ok_or(StoreError::ObjectNotFound(*id))?;
        let mut reader = self.reader.lock().map_err(|_| StoreError::Poisoned)?;
        let (oid, payload) = reader.read_record(offset)?;
        debug_assert_eq!(oid, *id);
        Ok(LiveObject::persistent(*id, ObjectState::decode(&payload)?))
    }
}

impl SnapshotSource for LogStore {
    fn refresh(&mut self) -> StoreResult<TxnId> {
        let reader = self.reader.get_mut().map_err(|_| StoreError::Poisoned)?;
        reader.reload_len()?;
        let walk = reader.walk(self.end)?;
        for txn in &walk.txns {
            for record in reader.records(txn)? {
                self.index.insert(record.oid, record.offset);
            }
        }
        self.end = walk.end;
        self.boundary = walk.boundary(self.boundary);

        debug!(
            path = %self.path.display(),
            new_txns = walk.txns.len(),
            objects = self.index.len(),
            boundary = %self.boundary,
            "refreshed log snapshot"
        );
        Ok(self.boundary)
    }

    fn boundary(&self) -> TxnId {
        self.boundary
    }
}

impl std::fmt::Debug for LogStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogStore")
            .field("path", &self.path)
            .field("objects", &self.index.len())
            .field("boundary", &self.boundary)
            .finish()
    }
}

/// Create a new log whose first transaction stores an empty root object.
pub fn create_log(path: &Path) -> StoreResult<TxnId> {
    let mut writer = LogWriter::create(path)?;
    commit_states(&mut writer, &[(ObjectId::ROOT, ObjectState::default())])
}

/// Validate and commit a set of object states as one transaction.
pub fn commit_states(
    writer: &mut LogWriter,
    states: &[(ObjectId, ObjectState)],
) -> StoreResult<TxnId> {
    let mut records = Vec::with_capacity(states.len());
    for (id, state) in states {
        state.validate(*id)?;
        records.push((*id, state.encode()?));
    }
    Ok(writer.commit(&records)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn oid(n: u64) -> ObjectId {
        ObjectId::from_u64(n)
    }

    #[test]
    fn fresh_log_has_an_empty_root() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.log");
        let tid = create_log(&path).unwrap();

        let store = LogStore::open(&path).unwrap();
        assert_eq!(SnapshotSource::boundary(&store), tid);
        assert!(store.root().unwrap().state.children.is_empty());
    }

    #[test]
    fn fetch_returns_latest_committed_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("latest.log");
        create_log(&path).unwrap();
        let mut writer = LogWriter::open(&path).unwrap();
        commit_states(&mut writer, &[(oid(1), ObjectState::new(b"v1".to_vec()))]).unwrap();
        commit_states(&mut writer, &[(oid(1), ObjectState::new(b"v2".to_vec()))]).unwrap();

        let store = LogStore::open(&path).unwrap();
        assert_eq!(store.fetch(&oid(1)).unwrap().state.content, b"v2");
        assert!(matches!(
            store.fetch(&oid(2)),
            Err(StoreError::ObjectNotFound(_))
        ));
    }

    #[test]
    fn refresh_picks_up_new_transactions_only_when_asked() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("refresh.log");
        create_log(&path).unwrap();
        let mut store = LogStore::open(&path).unwrap();
        let before = SnapshotSource::boundary(&store);

        let mut writer = LogWriter::open(&path).unwrap();
        let tid = commit_states(
            &mut writer,
            &[
                (oid(1), ObjectState::new(b"a".to_vec())),
                (ObjectId::ROOT, ObjectState::default().with_child("a", oid(1))),
            ],
        )
        .unwrap();

        // Old snapshot still in effect.
        assert!(store.fetch(&oid(1)).is_err());
        assert_eq!(store.root().unwrap().state.children.len(), 0);

        assert_eq!(store.refresh().unwrap(), tid);
        assert!(tid > before);
        let root = store.root().unwrap();
        let children = store.children(&root).unwrap();
        assert_eq!(children[0].0, "a");
        assert_eq!(store.object_count(), 2);
    }

    #[test]
    fn in_flight_transaction_is_invisible() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inflight.log");
        let first = create_log(&path).unwrap();
        let mut writer = LogWriter::open(&path).unwrap();
        let next = first.increment().increment();
        let payload = ObjectState::new(b"x".to_vec()).encode().unwrap();
        writer.begin_at(next, &[(oid(5), payload)]).unwrap();

        let store = LogStore::open(&path).unwrap();
        assert_eq!(SnapshotSource::boundary(&store), next.decrement());
        assert!(store.fetch(&oid(5)).is_err());
    }

    #[test]
    fn commit_rejects_invalid_states() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("invalid.log");
        create_log(&path).unwrap();
        let mut writer = LogWriter::open(&path).unwrap();
        let bad = ObjectState::default().with_child("a/b", oid(1));
        assert!(matches!(
            commit_states(&mut writer, &[(ObjectId::ROOT, bad)]),
            Err(StoreError::InvalidName { .. })
        ));
    }
}

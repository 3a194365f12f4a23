use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tmr_log::LogError;
use tmr_mirror::{ReconcileReport, Reconciler, Recorder, TreeMirror};
use tmr_store::SnapshotSource;
use tmr_types::{ObjectId, TxnId};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::error::{DaemonError, DaemonResult};
use crate::marker::MarkerStore;

/// How a cycle brought the mirror up to date.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CycleKind {
    /// No marker existed; the whole tree was recorded.
    Bootstrap,
    /// Startup with a marker; changed subtrees were re-recorded.
    CatchUp,
    /// Steady state; changes were replayed incrementally.
    Incremental,
    /// Nothing new was visible.
    Idle,
    /// The mirror was rebuilt, after a failed cycle or because the marker
    /// did not match the log.
    Resync,
}

/// Outcome of one cycle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CycleReport {
    pub kind: CycleKind,
    /// Marker the cycle started from; `None` on bootstrap.
    pub from: Option<TxnId>,
    /// Visible boundary the mirror now reflects.
    pub boundary: TxnId,
    /// Number of changed objects reported by the log.
    pub changed: usize,
    pub reconcile: ReconcileReport,
    /// Whether the persisted marker was rewritten.
    pub marker_written: bool,
}

impl fmt::Display for CycleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} to {}: {}", self.kind, self.boundary, self.reconcile)
    }
}

/// Keeps a persisted mirror in step with the object store.
///
/// Owns the in-memory [`TreeMirror`] and is the only writer of the marker.
/// Cycles never overlap: every method takes `&mut self`.
pub struct SyncDaemon<S, R, M> {
    log_path: PathBuf,
    store: S,
    recorder: R,
    markers: M,
    mirror: TreeMirror,
    /// Marker value as last read from or written to `markers`.
    marker: Option<TxnId>,
    started: bool,
    /// Set after a failed cycle; the next cycle rebuilds the mirror.
    stale: bool,
}

impl<S, R, M> SyncDaemon<S, R, M>
where
    S: SnapshotSource,
    R: Recorder,
    M: MarkerStore,
{
    /// `log_path` must be the transaction log `store` reads from.
    pub fn new(log_path: impl Into<PathBuf>, store: S, recorder: R, markers: M) -> Self {
        Self {
            log_path: log_path.into(),
            store,
            recorder,
            markers,
            mirror: TreeMirror::new(),
            marker: None,
            started: false,
            stale: false,
        }
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    pub fn mirror(&self) -> &TreeMirror {
        &self.mirror
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn recorder(&self) -> &R {
        &self.recorder
    }

    /// Current marker, `None` before the first successful cycle of a fresh
    /// installation.
    pub fn marker(&self) -> Option<TxnId> {
        self.marker
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }

    /// Build the mirror from the current snapshot and bring the persisted
    /// tree up to date with it.
    ///
    /// Without a marker the whole tree is recorded. With one, the subtrees
    /// of everything changed since the marker are re-recorded. Errors here
    /// are fatal: the caller should not run cycles on an unknown state.
    pub fn start(&mut self) -> DaemonResult<CycleReport> {
        let stored = self.markers.read()?;
        self.marker = stored;
        let boundary = self.store.refresh()?;
        self.rebuild()?;

        let report = match stored {
            None => {
                info!(%boundary, "no marker found, recording the full tree");
                self.record_all(CycleKind::Bootstrap, None, boundary)?
            }
            Some(marker) => {
                info!(%marker, %boundary, "catching up from marker");
                self.catch_up(marker, boundary)?
            }
        };
        self.started = true;
        info!(%report, "mirror ready");
        Ok(report)
    }

    /// Run one reconciliation cycle.
    ///
    /// On failure the marker stays where it was and the mirror is marked
    /// stale, so the next cycle redoes the same range from a fresh snapshot.
    pub fn run_cycle(&mut self) -> DaemonResult<CycleReport> {
        if !self.started {
            return Err(DaemonError::NotStarted);
        }
        let result = self.cycle();
        match &result {
            Ok(_) => self.stale = false,
            Err(e) => {
                warn!(error = %e, "cycle failed, mirror will be rebuilt");
                self.stale = true;
            }
        }
        result
    }

    /// Start if needed, then run cycles every `interval` until `shutdown`
    /// turns `true` (or its sender goes away).
    ///
    /// A shutdown request interrupts the sleep between cycles, never a cycle.
    /// Failed cycles are logged and retried on the next interval.
    pub async fn run(&mut self, interval: Duration, mut shutdown: watch::Receiver<bool>) -> DaemonResult<()> {
        if !self.started {
            self.start()?;
        }
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            }
            match self.run_cycle() {
                Ok(report) if report.kind == CycleKind::Idle => debug!(boundary = %report.boundary, "nothing to do"),
                Ok(report) => info!(%report, "cycle complete"),
                Err(e) => error!(error = %e, "cycle failed"),
            }
        }
        info!(marker = ?self.marker, "daemon stopped");
        Ok(())
    }

    fn cycle(&mut self) -> DaemonResult<CycleReport> {
        let marker = self.marker.ok_or(DaemonError::NotStarted)?;
        let boundary = self.store.refresh()?;

        if self.stale {
            info!(%marker, %boundary, "rebuilding mirror after a failed cycle");
            return self.resync(marker, boundary);
        }
        if boundary == marker {
            return Ok(CycleReport {
                kind: CycleKind::Idle,
                from: Some(marker),
                boundary,
                changed: 0,
                reconcile: ReconcileReport::default(),
                marker_written: false,
            });
        }
        if boundary < marker {
            return self.resync(marker, boundary);
        }

        let changed = match tmr_log::scan(&self.log_path, marker.increment(), boundary) {
            Ok(changed) => changed,
            Err(LogError::UnknownTransactionBoundary { .. }) => return self.resync(marker, boundary),
            Err(e) => return Err(e.into()),
        };
        let count = changed.len();
        let reconcile = Reconciler::new(&mut self.mirror, &self.store, &self.recorder).reconcile(changed)?;
        let marker_written = self.advance_marker(boundary)?;
        Ok(CycleReport {
            kind: CycleKind::Incremental,
            from: Some(marker),
            boundary,
            changed: count,
            reconcile,
            marker_written,
        })
    }

    /// Rebuild the mirror from the snapshot and catch up from `marker`.
    fn resync(&mut self, marker: TxnId, boundary: TxnId) -> DaemonResult<CycleReport> {
        self.rebuild()?;
        let mut report = self.catch_up(marker, boundary)?;
        report.kind = CycleKind::Resync;
        Ok(report)
    }

    fn rebuild(&mut self) -> DaemonResult<()> {
        let root = self.store.root()?;
        self.mirror.initialize_from_snapshot(&self.store, &root)?;
        Ok(())
    }

    /// Re-record the subtrees touched between `marker` and `boundary` on a
    /// freshly built mirror.
    fn catch_up(&mut self, marker: TxnId, boundary: TxnId) -> DaemonResult<CycleReport> {
        if boundary < marker {
            warn!(%marker, %boundary, "log is behind the marker, recording the full tree");
            return self.record_all(CycleKind::Resync, Some(marker), boundary);
        }
        let changed = match tmr_log::scan(&self.log_path, marker.increment(), boundary) {
            Ok(changed) => changed,
            Err(LogError::UnknownTransactionBoundary { requested, last }) => {
                warn!(%requested, %last, "marker does not match the log, recording the full tree");
                return self.record_all(CycleKind::Resync, Some(marker), boundary);
            }
            Err(e) => return Err(e.into()),
        };
        let reconcile = Reconciler::new(&mut self.mirror, &self.store, &self.recorder).catch_up(&changed)?;
        let marker_written = self.advance_marker(boundary)?;
        Ok(CycleReport {
            kind: CycleKind::CatchUp,
            from: Some(marker),
            boundary,
            changed: changed.len(),
            reconcile,
            marker_written,
        })
    }

    fn record_all(&mut self, kind: CycleKind, from: Option<TxnId>, boundary: TxnId) -> DaemonResult<CycleReport> {
        let root = self.mirror.root_id().unwrap_or(ObjectId::ROOT);
        let reconcile = Reconciler::new(&mut self.mirror, &self.store, &self.recorder).record_subtree(root)?;
        let marker_written = self.advance_marker(boundary)?;
        Ok(CycleReport {
            kind,
            from,
            boundary,
            changed: self.mirror.len(),
            reconcile,
            marker_written,
        })
    }

    /// Persist `boundary` unless it is already the stored marker.
    fn advance_marker(&mut self, boundary: TxnId) -> DaemonResult<bool> {
        if self.marker == Some(boundary) {
            return Ok(false);
        }
        self.markers.write(boundary)?;
        self.marker = Some(boundary);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    use tmr_log::LogWriter;
    use tmr_mirror::{MemoryRecorder, MirrorError, MirrorPath, WriteOutcome};
    use tmr_store::{commit_states, create_log, LogStore, ObjectState};

    use crate::marker::InMemoryMarkerStore;

    fn oid(n: u64) -> ObjectId {
        ObjectId::from_u64(n)
    }

    /// Memory recorder whose writes can be made to fail.
    #[derive(Default)]
    struct FlakyRecorder {
        inner: MemoryRecorder,
        fail: AtomicBool,
    }

    impl Recorder for FlakyRecorder {
        fn write(&self, path: &MirrorPath, content: &[u8]) -> tmr_mirror::MirrorResult<WriteOutcome> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(MirrorError::PersistFailure {
                    op: "write",
                    path: path.to_string(),
                    source: std::io::Error::other("disk full"),
                });
            }
            self.inner.write(path, content)
        }
        fn remove_tree(&self, path: &MirrorPath) -> tmr_mirror::MirrorResult<()> {
            self.inner.remove_tree(path)
        }
        fn rename(&self, from: &MirrorPath, to: &MirrorPath) -> tmr_mirror::MirrorResult<()> {
            self.inner.rename(from, to)
        }
        fn list_children(&self, path: &MirrorPath) -> tmr_mirror::MirrorResult<Vec<String>> {
            self.inner.list_children(path)
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        log: PathBuf,
        writer: LogWriter,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let log = dir.path().join("store.log");
            create_log(&log).unwrap();
            let writer = LogWriter::open(&log).unwrap();
            Self {
                _dir: dir,
                log,
                writer,
            }
        }

        fn commit(&mut self, states: &[(u64, ObjectState)]) -> TxnId {
            let states: Vec<_> = states.iter().map(|(id, s)| (oid(*id), s.clone())).collect();
            commit_states(&mut self.writer, &states).unwrap()
        }

        fn daemon<'m>(
            &self,
            markers: &'m InMemoryMarkerStore,
        ) -> SyncDaemon<LogStore, FlakyRecorder, &'m InMemoryMarkerStore> {
            let store = LogStore::open(&self.log).unwrap();
            SyncDaemon::new(&self.log, store, FlakyRecorder::default(), markers)
        }
    }

    #[test]
    fn cycle_before_start_is_refused() {
        let fx = Fixture::new();
        let markers = InMemoryMarkerStore::new();
        let mut daemon = fx.daemon(&markers);
        assert!(matches!(daemon.run_cycle(), Err(DaemonError::NotStarted)));
    }

    #[test]
    fn bootstrap_records_everything_and_writes_marker() {
        let mut fx = Fixture::new();
        let tid = fx.commit(&[
            (0, ObjectState::new(b"root".to_vec()).with_child("a", oid(1))),
            (1, ObjectState::new(b"a".to_vec())),
        ]);
        let markers = InMemoryMarkerStore::new();
        let mut daemon = fx.daemon(&markers);

        let report = daemon.start().unwrap();

        assert_eq!(report.kind, CycleKind::Bootstrap);
        assert_eq!(report.boundary, tid);
        assert!(report.marker_written);
        assert_eq!(markers.current(), Some(tid));
        assert_eq!(daemon.recorder().inner.content("/a/"), Some(b"a".to_vec()));
    }

    #[test]
    fn idle_cycles_leave_the_marker_file_alone() {
        let mut fx = Fixture::new();
        fx.commit(&[(0, ObjectState::new(b"root".to_vec()))]);
        let markers = InMemoryMarkerStore::new();
        let mut daemon = fx.daemon(&markers);
        daemon.start().unwrap();
        let writes = markers.writes();

        let report = daemon.run_cycle().unwrap();
        assert_eq!(report.kind, CycleKind::Idle);
        assert!(!report.marker_written);
        assert_eq!(markers.writes(), writes);
    }

    #[test]
    fn incremental_cycle_applies_new_transactions() {
        let mut fx = Fixture::new();
        fx.commit(&[
            (0, ObjectState::new(b"root".to_vec()).with_child("old", oid(1))),
            (1, ObjectState::new(b"one".to_vec())),
        ]);
        let markers = InMemoryMarkerStore::new();
        let mut daemon = fx.daemon(&markers);
        daemon.start().unwrap();

        let tid = fx.commit(&[(0, ObjectState::new(b"root".to_vec()).with_child("new", oid(1)))]);
        let report = daemon.run_cycle().unwrap();

        assert_eq!(report.kind, CycleKind::Incremental);
        assert_eq!(report.changed, 1);
        assert_eq!(report.reconcile.renamed, 1);
        assert_eq!(daemon.marker(), Some(tid));
        assert_eq!(daemon.recorder().inner.content("/new/"), Some(b"one".to_vec()));
        assert_eq!(daemon.recorder().inner.content("/old/"), None);
        daemon.mirror().check_invariants().unwrap();
    }

    #[test]
    fn failed_cycle_keeps_marker_and_next_cycle_recovers() {
        let mut fx = Fixture::new();
        fx.commit(&[
            (0, ObjectState::new(b"root".to_vec()).with_child("a", oid(1))),
            (1, ObjectState::new(b"v1".to_vec())),
        ]);
        let markers = InMemoryMarkerStore::new();
        let mut daemon = fx.daemon(&markers);
        let started = daemon.start().unwrap().boundary;

        let tid = fx.commit(&[(1, ObjectState::new(b"v2".to_vec()))]);
        daemon.recorder().fail.store(true, Ordering::SeqCst);
        assert!(daemon.run_cycle().is_err());
        assert!(daemon.is_stale());
        assert_eq!(daemon.marker(), Some(started));
        assert_eq!(markers.current(), Some(started));

        daemon.recorder().fail.store(false, Ordering::SeqCst);
        let report = daemon.run_cycle().unwrap();
        assert_eq!(report.kind, CycleKind::Resync);
        assert!(!daemon.is_stale());
        assert_eq!(markers.current(), Some(tid));
        assert_eq!(daemon.recorder().inner.content("/a/"), Some(b"v2".to_vec()));
    }

    #[test]
    fn in_flight_transaction_is_not_applied_until_committed() {
        let mut fx = Fixture::new();
        let base = fx.commit(&[(0, ObjectState::new(b"root".to_vec()))]);
        let markers = InMemoryMarkerStore::new();
        let mut daemon = fx.daemon(&markers);
        daemon.start().unwrap();

        let pending_tid = TxnId::new(base.as_u64() + 100);
        let state = ObjectState::new(b"root2".to_vec());
        let pending = fx
            .writer
            .begin_at(pending_tid, &[(ObjectId::ROOT, state.encode().unwrap())])
            .unwrap();

        let report = daemon.run_cycle().unwrap();
        assert_eq!(report.boundary, pending_tid.decrement());
        assert_eq!(report.changed, 0);
        assert_eq!(daemon.recorder().inner.content("/"), Some(b"root".to_vec()));

        fx.writer.finish(pending).unwrap();
        let report = daemon.run_cycle().unwrap();
        assert_eq!(report.boundary, pending_tid);
        assert_eq!(report.changed, 1);
        assert_eq!(daemon.recorder().inner.content("/"), Some(b"root2".to_vec()));
    }

    #[test]
    fn restart_while_a_transaction_is_in_flight_catches_up() {
        let mut fx = Fixture::new();
        let base = fx.commit(&[
            (0, ObjectState::new(b"root".to_vec()).with_child("a", oid(1))),
            (1, ObjectState::new(b"a".to_vec())),
        ]);
        let markers = InMemoryMarkerStore::new();
        fx.daemon(&markers).start().unwrap();

        let pending_tid = TxnId::new(base.as_u64() + 100);
        let state = ObjectState::new(b"a2".to_vec());
        let pending = fx
            .writer
            .begin_at(pending_tid, &[(oid(1), state.encode().unwrap())])
            .unwrap();
        {
            let mut daemon = fx.daemon(&markers);
            daemon.start().unwrap();
            daemon.run_cycle().unwrap();
        }
        assert_eq!(markers.current(), Some(pending_tid.decrement()));

        let mut restarted = fx.daemon(&markers);
        let report = restarted.start().unwrap();
        assert_eq!(report.kind, CycleKind::CatchUp);
        assert_eq!(report.changed, 0);
        assert_eq!(report.reconcile.written, 0);

        fx.writer.finish(pending).unwrap();
        let report = restarted.run_cycle().unwrap();
        assert_eq!(report.kind, CycleKind::Incremental);
        assert_eq!(report.changed, 1);
        assert_eq!(restarted.recorder().inner.content("/a/"), Some(b"a2".to_vec()));
    }

    #[test]
    fn marker_ahead_of_the_log_falls_back_to_full_recording() {
        let mut fx = Fixture::new();
        fx.commit(&[
            (0, ObjectState::new(b"root".to_vec()).with_child("a", oid(1))),
            (1, ObjectState::new(b"a".to_vec())),
        ]);
        let markers = InMemoryMarkerStore::with_marker(TxnId::MAX.decrement());
        let mut daemon = fx.daemon(&markers);

        let report = daemon.start().unwrap();
        assert_eq!(report.kind, CycleKind::Resync);
        assert_eq!(daemon.recorder().inner.content("/a/"), Some(b"a".to_vec()));
    }

    #[tokio::test]
    async fn run_stops_on_shutdown_request() {
        let mut fx = Fixture::new();
        fx.commit(&[(0, ObjectState::new(b"root".to_vec()))]);
        let markers = InMemoryMarkerStore::new();
        let mut daemon = fx.daemon(&markers);
        let (tx, rx) = crate::shutdown::shutdown_channel();

        tx.send(true).unwrap();
        daemon.run(Duration::from_secs(3600), rx).await.unwrap();
        assert!(daemon.marker().is_some());
    }

    #[tokio::test]
    async fn shutdown_interrupts_the_sleep_between_cycles() {
        let mut fx = Fixture::new();
        fx.commit(&[(0, ObjectState::new(b"root".to_vec()))]);
        let markers = InMemoryMarkerStore::new();
        let mut daemon = fx.daemon(&markers);
        let (tx, rx) = crate::shutdown::shutdown_channel();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let _ = tx.send(true);
        });
        let stopped = tokio::time::timeout(
            Duration::from_secs(5),
            daemon.run(Duration::from_secs(3600), rx),
        )
        .await;

        assert!(matches!(stopped, Ok(Ok(()))), "run did not stop while sleeping");
        assert!(daemon.marker().is_some());
    }
}

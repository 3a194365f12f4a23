//! End-to-end: log writer, log-backed store, daemon, filesystem recorder
//! and marker file.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tempfile::TempDir;
use tmr_daemon::{shutdown_channel, CycleKind, DaemonError, FileMarkerStore, MarkerStore, SyncDaemon};
use tmr_log::{LogError, LogWriter};
use tmr_mirror::FsRecorder;
use tmr_store::{commit_states, create_log, LogStore, ObjectState, StoreError};
use tmr_types::{ObjectId, TxnId};

type Daemon = SyncDaemon<LogStore, FsRecorder, FileMarkerStore>;

fn oid(n: u64) -> ObjectId {
    ObjectId::from_u64(n)
}

struct Env {
    dir: TempDir,
    writer: LogWriter,
}

impl Env {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("store.log");
        create_log(&log).unwrap();
        let writer = LogWriter::open(&log).unwrap();
        Self { dir, writer }
    }

    fn log(&self) -> PathBuf {
        self.dir.path().join("store.log")
    }

    fn mirror_root(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn marker_path(&self, name: &str) -> PathBuf {
        self.dir.path().join(format!("{name}.marker"))
    }

    fn commit(&mut self, states: &[(u64, ObjectState)]) -> TxnId {
        let states: Vec<_> = states.iter().map(|(id, s)| (oid(*id), s.clone())).collect();
        commit_states(&mut self.writer, &states).unwrap()
    }

    fn daemon(&self, name: &str) -> Daemon {
        SyncDaemon::new(
            self.log(),
            LogStore::open(&self.log()).unwrap(),
            FsRecorder::new(self.mirror_root(name)).unwrap(),
            FileMarkerStore::new(self.marker_path(name)),
        )
    }
}

fn state(content: &str) -> ObjectState {
    ObjectState::new(content.as_bytes().to_vec())
}

/// Every file below `root` with its bytes.
fn snapshot(root: &Path) -> BTreeMap<String, Vec<u8>> {
    walkdir::WalkDir::new(root)
        .into_iter()
        .map(|e| e.unwrap())
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            let rel = e.path().strip_prefix(root).unwrap().to_string_lossy().replace('\\', "/");
            (rel, fs::read(e.path()).unwrap())
        })
        .collect()
}

fn seed(env: &mut Env) -> TxnId {
    env.commit(&[
        (0, state("root").with_child("docs", oid(1)).with_child("src", oid(2))),
        (1, state("docs").with_child("readme", oid(3))),
        (2, state("src")),
        (3, state("hello")),
    ])
}

#[test]
fn bootstrap_writes_tree_and_marker() {
    let mut env = Env::new();
    let tid = seed(&mut env);
    let mut daemon = env.daemon("live");

    let report = daemon.start().unwrap();

    assert_eq!(report.kind, CycleKind::Bootstrap);
    assert_eq!(report.reconcile.recorded, 4);
    let files = snapshot(&env.mirror_root("live"));
    assert_eq!(files.get("docs/readme/__content__").map(Vec::as_slice), Some(&b"hello"[..]));
    assert_eq!(files.get("src/__content__").map(Vec::as_slice), Some(&b"src"[..]));
    assert_eq!(
        fs::read_to_string(env.marker_path("live")).unwrap().trim(),
        tid.to_hex()
    );
}

#[test]
fn steady_state_renames_and_moves_on_disk() {
    let mut env = Env::new();
    seed(&mut env);
    let mut daemon = env.daemon("live");
    daemon.start().unwrap();

    let tid = env.commit(&[
        (0, state("root").with_child("manual", oid(1)).with_child("src", oid(2))),
        (1, state("docs")),
        (2, state("src").with_child("README", oid(3))),
    ]);
    let report = daemon.run_cycle().unwrap();

    assert_eq!(report.kind, CycleKind::Incremental);
    assert_eq!(report.reconcile.renamed, 1);
    assert_eq!(report.reconcile.moved, 1);
    assert_eq!(report.reconcile.removed, 0);
    let root = env.mirror_root("live");
    assert!(!root.join("docs").exists());
    assert_eq!(fs::read(root.join("src/README/__content__")).unwrap(), b"hello");
    assert_eq!(FileMarkerStore::new(env.marker_path("live")).read().unwrap(), Some(tid));
}

#[test]
fn repeated_cycles_leave_disk_untouched() {
    let mut env = Env::new();
    seed(&mut env);
    let mut daemon = env.daemon("live");
    daemon.start().unwrap();
    env.commit(&[(3, state("hello again"))]);
    daemon.run_cycle().unwrap();
    let before = snapshot(&env.mirror_root("live"));

    let report = daemon.run_cycle().unwrap();

    assert_eq!(report.kind, CycleKind::Idle);
    assert_eq!(snapshot(&env.mirror_root("live")), before);
}

#[test]
fn restart_catches_up_to_what_a_fresh_bootstrap_would_write() {
    let mut env = Env::new();
    seed(&mut env);
    {
        let mut daemon = env.daemon("live");
        daemon.start().unwrap();
    }

    // changes made while the daemon is down
    env.commit(&[
        (0, state("root").with_child("docs", oid(1)).with_child("lib", oid(4))),
        (1, state("docs v2").with_child("intro", oid(3))),
        (4, state("lib")),
    ]);
    let tid = env.commit(&[(3, state("hello v2"))]);

    let mut restarted = env.daemon("live");
    let report = restarted.start().unwrap();
    assert_eq!(report.kind, CycleKind::CatchUp);
    assert_eq!(report.boundary, tid);

    let mut fresh = env.daemon("fresh");
    fresh.start().unwrap();

    assert_eq!(
        snapshot(&env.mirror_root("live")),
        snapshot(&env.mirror_root("fresh"))
    );
    assert!(!env.mirror_root("live").join("src").exists());
    assert!(!env.mirror_root("live").join("docs/readme").exists());
}

#[test]
fn restart_without_changes_does_not_rewrite_marker() {
    let mut env = Env::new();
    seed(&mut env);
    env.daemon("live").start().unwrap();
    let marker = env.marker_path("live");
    let before = fs::metadata(&marker).unwrap().modified().unwrap();

    let report = env.daemon("live").start().unwrap();

    assert!(!report.marker_written);
    assert_eq!(fs::metadata(&marker).unwrap().modified().unwrap(), before);
}

#[test]
fn corrupt_marker_is_fatal_at_startup() {
    let mut env = Env::new();
    seed(&mut env);
    fs::write(env.marker_path("live"), "definitely not hex").unwrap();

    let err = env.daemon("live").start().unwrap_err();
    assert!(matches!(err, DaemonError::MarkerCorrupt { .. }));
}

#[test]
fn missing_log_is_reported_as_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let err = LogStore::open(&dir.path().join("absent.log")).unwrap_err();
    assert!(matches!(err, StoreError::Log(LogError::LogUnavailable { .. })));
}

#[tokio::test]
async fn run_loop_applies_commits_until_shutdown() {
    let mut env = Env::new();
    seed(&mut env);
    let mut daemon = env.daemon("live");
    daemon.start().unwrap();
    let tid = env.commit(&[(2, state("src v2"))]);

    let (tx, rx) = shutdown_channel();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        let _ = tx.send(true);
    });
    daemon.run(Duration::from_millis(10), rx).await.unwrap();

    assert_eq!(daemon.marker(), Some(tid));
    assert_eq!(
        fs::read(env.mirror_root("live").join("src/__content__")).unwrap(),
        b"src v2"
    );
}

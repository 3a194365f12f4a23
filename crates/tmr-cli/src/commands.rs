use std::fs;

use anyhow::Context;
use colored::Colorize;
use serde_json::json;
use tmr_daemon::{listen_for_signals, DaemonConfig, FileMarkerStore, MarkerStore, SyncDaemon};
use tmr_log::{LogReader, LogWriter};
use tmr_mirror::FsRecorder;
use tmr_store::{commit_states, create_log, LogStore};
use tmr_types::TxnId;

use crate::cli::*;
use crate::input::parse_txn;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let format = cli.format;
    match cli.command {
        Command::Init(args) => cmd_init(args, format),
        Command::Commit(args) => cmd_commit(args, format),
        Command::Log(args) => cmd_log(args, format),
        Command::Marker(args) => cmd_marker(args, format),
        Command::Watch(args) => cmd_watch(args),
    }
}

fn cmd_init(args: InitArgs, format: OutputFormat) -> anyhow::Result<()> {
    anyhow::ensure!(!args.log.exists(), "{} already exists", args.log.display());
    let tid = create_log(&args.log).with_context(|| format!("failed to create {}", args.log.display()))?;
    match format {
        OutputFormat::Json => println!("{}", json!({ "log": args.log.display().to_string(), "tid": tid.to_hex() })),
        OutputFormat::Text => {
            println!("{} Created log {}", "✓".green().bold(), args.log.display().to_string().bold());
            println!("  Root committed in {}", tid.to_hex().yellow());
        }
    }
    Ok(())
}

fn cmd_commit(args: CommitArgs, format: OutputFormat) -> anyhow::Result<()> {
    let json = fs::read_to_string(&args.file).with_context(|| format!("failed to read {}", args.file.display()))?;
    let states = parse_txn(&json)?;
    let mut writer = LogWriter::open(&args.log).with_context(|| format!("failed to open {}", args.log.display()))?;
    let tid = commit_states(&mut writer, &states)?;

    match format {
        OutputFormat::Json => println!(
            "{}",
            json!({
                "tid": tid.to_hex(),
                "objects": states.iter().map(|(id, _)| id.to_hex()).collect::<Vec<_>>(),
            })
        ),
        OutputFormat::Text => {
            println!("{} Committed {}", "✓".green().bold(), tid.to_hex().yellow().bold());
            for (id, state) in &states {
                println!("  {} ({} children)", id.to_hex().cyan(), state.children.len());
            }
        }
    }
    Ok(())
}

fn cmd_log(args: LogArgs, format: OutputFormat) -> anyhow::Result<()> {
    let mut reader = LogReader::open(&args.log)?;
    let boundary = reader.tail()?.boundary();

    if let Some(from) = &args.from {
        let from = TxnId::from_hex(from).with_context(|| format!("invalid transaction id {from:?}"))?;
        let changed = tmr_log::scan(&args.log, from, boundary)?;
        match format {
            OutputFormat::Json => println!(
                "{}",
                json!({
                    "from": from.to_hex(),
                    "boundary": boundary.to_hex(),
                    "changed": changed.iter().map(|id| id.to_hex()).collect::<Vec<_>>(),
                })
            ),
            OutputFormat::Text => {
                println!(
                    "{} object(s) changed in {}..={}",
                    changed.len().to_string().bold(),
                    from.to_hex().yellow(),
                    boundary.to_hex().yellow()
                );
                for id in &changed {
                    println!("  {}", id.to_hex().cyan());
                }
            }
        }
        return Ok(());
    }

    let walk = reader.walk(0)?;
    let skip = args.limit.map_or(0, |n| walk.txns.len().saturating_sub(n));
    let mut entries = Vec::new();
    for txn in &walk.txns[skip..] {
        let objects: Vec<String> = reader.records(txn)?.iter().map(|r| r.oid.to_hex()).collect();
        entries.push((txn.tid, objects));
    }

    match format {
        OutputFormat::Json => println!(
            "{}",
            json!({
                "boundary": boundary.to_hex(),
                "in_flight": walk.in_flight.map(|t| t.to_hex()),
                "transactions": entries
                    .iter()
                    .map(|(tid, objects)| json!({ "tid": tid.to_hex(), "objects": objects }))
                    .collect::<Vec<_>>(),
            })
        ),
        OutputFormat::Text => {
            for (tid, objects) in &entries {
                println!("{}  {}", tid.to_hex().yellow().bold(), objects.join(" ").dimmed());
            }
            if let Some(pending) = walk.in_flight {
                println!("{} {} (in flight)", "…".yellow(), pending.to_hex().yellow());
            }
            println!("Visible boundary: {}", boundary.to_hex().green());
        }
    }
    Ok(())
}

fn cmd_marker(args: MarkerArgs, format: OutputFormat) -> anyhow::Result<()> {
    let marker = FileMarkerStore::new(&args.path).read()?;
    match (format, marker) {
        (OutputFormat::Json, marker) => {
            println!("{}", json!({ "path": args.path.display().to_string(), "marker": marker.map(|t| t.to_hex()) }))
        }
        (OutputFormat::Text, Some(tid)) => println!("Mirrored through {}", tid.to_hex().yellow().bold()),
        (OutputFormat::Text, None) => println!("No marker at {}; the next start bootstraps.", args.path.display()),
    }
    Ok(())
}

fn cmd_watch(args: WatchArgs) -> anyhow::Result<()> {
    let config = resolve_config(&args)?;
    tracing::info!(?config, "starting sync daemon");
    let store = LogStore::open(&config.log_path)
        .with_context(|| format!("failed to open {}", config.log_path.display()))?;
    let recorder = FsRecorder::new(&config.mirror_root)?;
    let markers = FileMarkerStore::new(&config.marker_path);
    let mut daemon = SyncDaemon::new(&config.log_path, store, recorder, markers);

    let report = daemon.start()?;
    println!(
        "{} Mirroring {} into {} ({})",
        "✓".green().bold(),
        config.log_path.display().to_string().bold(),
        config.mirror_root.display().to_string().bold(),
        report.to_string().cyan()
    );

    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
    runtime.block_on(async {
        let shutdown = listen_for_signals()?;
        daemon.run(config.interval(), shutdown).await?;
        Ok::<_, anyhow::Error>(())
    })?;

    if let Some(marker) = daemon.marker() {
        println!("Stopped at {}", marker.to_hex().yellow());
    }
    Ok(())
}

/// Config file (or defaults), then command-line overrides.
fn resolve_config(args: &WatchArgs) -> anyhow::Result<DaemonConfig> {
    let mut config = match &args.config {
        Some(path) => DaemonConfig::load(path)?,
        None => DaemonConfig::default(),
    };
    if let Some(log) = &args.log {
        config.log_path = log.clone();
    }
    if let Some(mirror) = &args.mirror {
        config.mirror_root = mirror.clone();
    }
    if let Some(marker) = &args.marker {
        config.marker_path = marker.clone();
    }
    if let Some(ms) = args.interval_ms {
        config.interval_ms = ms;
    }
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tmr_store::{ObjectAccessor, SnapshotSource};
    use tmr_types::ObjectId;

    #[test]
    fn resolve_defaults() {
        let config = resolve_config(&WatchArgs::default()).unwrap();
        assert_eq!(config, DaemonConfig::default());
    }

    #[test]
    fn flags_override_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tmr.toml");
        fs::write(&path, "log_path = \"a.log\"\nmirror_root = \"m\"\ninterval_ms = 50\n").unwrap();

        let config = resolve_config(&WatchArgs {
            config: Some(path),
            mirror: Some(PathBuf::from("elsewhere")),
            ..WatchArgs::default()
        })
        .unwrap();

        assert_eq!(config.log_path, PathBuf::from("a.log"));
        assert_eq!(config.mirror_root, PathBuf::from("elsewhere"));
        assert_eq!(config.interval_ms, 50);
    }

    #[test]
    fn overrides_are_validated() {
        let err = resolve_config(&WatchArgs {
            interval_ms: Some(0),
            ..WatchArgs::default()
        });
        assert!(err.is_err());

        let err = resolve_config(&WatchArgs {
            mirror: Some(PathBuf::from("/srv/m")),
            marker: Some(PathBuf::from("/srv/m/tmr.marker")),
            ..WatchArgs::default()
        });
        assert!(err.is_err());
    }

    #[test]
    fn init_commit_and_log() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("store.log");
        let txn = dir.path().join("txn.json");
        fs::write(
            &txn,
            r#"{"objects": [
                {"id": "0000000000000000", "content": "root",
                 "children": [{"name": "docs", "id": "0000000000000001"}]},
                {"id": "0000000000000001", "content": "docs"}
            ]}"#,
        )
        .unwrap();

        cmd_init(InitArgs { log: log.clone() }, OutputFormat::Text).unwrap();
        assert!(cmd_init(InitArgs { log: log.clone() }, OutputFormat::Text).is_err());
        cmd_commit(CommitArgs { log: log.clone(), file: txn }, OutputFormat::Json).unwrap();
        cmd_log(
            LogArgs { log: log.clone(), from: None, limit: Some(1) },
            OutputFormat::Text,
        )
        .unwrap();

        let mut store = LogStore::open(&log).unwrap();
        let boundary = store.refresh().unwrap();
        let docs = store.fetch(&ObjectId::from_u64(1)).unwrap();
        assert_eq!(docs.state.content, b"docs");

        cmd_log(
            LogArgs { log, from: Some(boundary.to_hex()), limit: None },
            OutputFormat::Json,
        )
        .unwrap();
    }

    #[test]
    fn commit_rejects_unknown_log() {
        let dir = tempfile::tempdir().unwrap();
        let txn = dir.path().join("txn.json");
        fs::write(&txn, r#"{"objects": [{"id": "0000000000000000"}]}"#).unwrap();
        let result = cmd_commit(
            CommitArgs { log: dir.path().join("missing.log"), file: txn },
            OutputFormat::Text,
        );
        assert!(result.is_err());
    }

    #[test]
    fn marker_missing_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let args = MarkerArgs { path: dir.path().join("tmr.marker") };
        cmd_marker(args, OutputFormat::Json).unwrap();
    }
}

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "tmr",
    about = "Tree mirror: keeps a directory tree in step with a transactional object store",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create a transaction log holding an empty root object
    Init(InitArgs),
    /// Commit object states from a JSON file as one transaction
    Commit(CommitArgs),
    /// List committed transactions, or the objects changed since an id
    Log(LogArgs),
    /// Show the stored marker
    Marker(MarkerArgs),
    /// Run the sync daemon until SIGTERM, SIGINT or SIGHUP
    Watch(WatchArgs),
}

#[derive(Args)]
pub struct InitArgs {
    /// Log file to create
    pub log: PathBuf,
}

#[derive(Args)]
pub struct CommitArgs {
    /// Transaction log
    pub log: PathBuf,
    /// JSON file describing the objects to write
    pub file: PathBuf,
}

#[derive(Args)]
pub struct LogArgs {
    /// Transaction log
    pub log: PathBuf,
    /// Report the objects changed from this transaction id (hex) through
    /// the visible boundary
    #[arg(long)]
    pub from: Option<String>,
    /// Show at most this many of the most recent transactions
    #[arg(short = 'n', long)]
    pub limit: Option<usize>,
}

#[derive(Args)]
pub struct MarkerArgs {
    /// Marker file
    pub path: PathBuf,
}

#[derive(Args, Default)]
pub struct WatchArgs {
    /// TOML config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// Transaction log (overrides the config file)
    #[arg(long)]
    pub log: Option<PathBuf>,
    /// Mirror root directory (overrides the config file)
    #[arg(long)]
    pub mirror: Option<PathBuf>,
    /// Marker file (overrides the config file)
    #[arg(long)]
    pub marker: Option<PathBuf>,
    /// Poll interval in milliseconds (overrides the config file)
    #[arg(long)]
    pub interval_ms: Option<u64>,
}

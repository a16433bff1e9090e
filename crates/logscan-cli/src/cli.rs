//! Command-line argument parsing with clap.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand, ValueEnum};
use logscan::{FollowFrom, WatchBackend};

/// Search and stream container log files.
#[derive(Parser, Debug, Clone)]
#[command(name = "logscan")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// JSON engine configuration file.
    #[arg(short, long, env = "LOGSCAN_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Bytes read per disk access.
    #[arg(long, env = "LOGSCAN_CHUNK_SIZE", global = true)]
    pub chunk_size: Option<usize>,

    /// Longest pause between file checks while following (milliseconds).
    #[arg(long, env = "LOGSCAN_POLL_INTERVAL_MS", global = true)]
    pub poll_interval_ms: Option<u64>,

    /// File change notification backend.
    #[arg(long, value_enum, env = "LOGSCAN_WATCH_BACKEND", global = true)]
    pub watch_backend: Option<BackendArg>,

    /// Output format.
    #[arg(short, long, value_enum, default_value_t = Format::Json, global = true)]
    pub format: Format,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Output format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum Format {
    /// One JSON object per line.
    #[default]
    Json,
    /// `TIMESTAMP MESSAGE` per line.
    Text,
}

/// Watch backend argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendArg {
    /// OS notifications with polling fallback.
    Notify,
    /// Size polling only.
    Poll,
}

impl From<BackendArg> for WatchBackend {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Notify => Self::Notify,
            BackendArg::Poll => Self::Poll,
        }
    }
}

/// Follow mode argument.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum FollowArg {
    /// Stop at the end of the file.
    #[default]
    None,
    /// Serve history, then follow new lines.
    Default,
    /// Follow only lines written after startup.
    End,
}

impl From<FollowArg> for FollowFrom {
    fn from(arg: FollowArg) -> Self {
        match arg {
            FollowArg::None => Self::None,
            FollowArg::Default => Self::Default,
            FollowArg::End => Self::End,
        }
    }
}

/// Top-level subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Stream records oldest first, optionally following the file.
    StreamForward(ForwardArgs),

    /// Stream records newest first.
    StreamBackward(BackwardArgs),

    /// Print lines matching a pattern, ignoring timestamps.
    Search(SearchArgs),
}

/// Time range and pattern shared by the stream commands.
#[derive(Args, Debug, Clone)]
pub struct RangeArgs {
    /// Log file to read.
    pub file: PathBuf,

    /// Oldest timestamp to include (RFC3339).
    #[arg(long, value_parser = parse_time)]
    pub start: Option<DateTime<Utc>>,

    /// Newest timestamp to include (RFC3339).
    #[arg(long, value_parser = parse_time)]
    pub stop: Option<DateTime<Utc>>,

    /// Only emit records whose message matches this regex.
    #[arg(short, long)]
    pub grep: Option<String>,

    /// Stop after this many records.
    #[arg(short = 'n', long)]
    pub limit: Option<u64>,
}

/// Arguments for `stream-forward`.
#[derive(Args, Debug, Clone)]
pub struct ForwardArgs {
    /// Range and filter.
    #[command(flatten)]
    pub range: RangeArgs,

    /// Keep streaming as the file grows.
    #[arg(long, value_enum, default_value_t = FollowArg::None)]
    pub follow: FollowArg,
}

/// Arguments for `stream-backward`.
#[derive(Args, Debug, Clone)]
pub struct BackwardArgs {
    /// Range and filter.
    #[command(flatten)]
    pub range: RangeArgs,
}

/// Arguments for `search`.
#[derive(Args, Debug, Clone)]
pub struct SearchArgs {
    /// File to search.
    pub file: PathBuf,

    /// Regex or literal to look for.
    pub pattern: String,
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>, String> {
    logscan::parser::parse_timestamp(raw).map_err(|e| e.to_string())
}

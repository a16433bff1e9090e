//! # logscan
//!
//! Time-bounded search and streaming over container log files.
//!
//! This crate provides:
//!
//! - [`parser`]: Decodes CRI and JSON log lines into [`LogRecord`]s
//! - [`CompiledFilter`]: Message filters compiled once per query
//! - [`BoundarySeeker`]: Resolves timestamps to byte offsets by binary search
//! - [`ForwardStreamer`]: Oldest-first streaming with live follow
//! - [`BackwardStreamer`]: Newest-first paged streaming
//! - [`FileWatcher`]: File growth notification (OS events or polling)
//! - [`raw`]: Timestamp-unaware pattern search
//! - [`Engine`]: Runs [`Query`]s end to end
//!
//! ## Example
//!
//! ```rust,no_run
//! use logscan::{Engine, EngineConfig, Query};
//!
//! # async fn run() -> logscan::Result<()> {
//! let engine = Engine::new(EngineConfig::default())?;
//! let query = Query::new("/var/log/pods/default_api/api/0.log").with_grep("timeout");
//!
//! let mut stream = engine.open(&query)?;
//! while let Some(record) = stream.next_record().await {
//!     let record = record?;
//!     println!("{} {}", record.timestamp.to_rfc3339(), record.message);
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod backward;
mod chunk;
pub mod config;
pub mod engine;
pub mod error;
pub mod filter;
pub mod forward;
pub mod parser;
pub mod raw;
pub mod seeker;
pub mod types;
pub mod watch;

// Re-export main types
pub use backward::{BackwardStreamer, Batch};
pub use config::{EngineConfig, WatchBackend};
pub use engine::{Engine, Query, QueryEvent, QueryStream};
pub use error::{Error, ParseError, RegexError, Result, SeekError, StreamError, WatchError};
pub use filter::CompiledFilter;
pub use forward::ForwardStreamer;
pub use raw::{RawMatch, RawSearch};
pub use seeker::BoundarySeeker;
pub use types::{
    Cursor, Direction, FollowFrom, FollowState, LogRecord, QuerySummary, SeekDirection,
    StreamKind, TimeBoundary,
};
pub use watch::{FileWatcher, NotifyWatcher, PollingWatcher, WaitOutcome, WatchHandle};

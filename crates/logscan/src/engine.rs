//! Query execution.
//!
//! An [`Engine`] turns a [`Query`] into a [`QueryStream`]: it validates the
//! query and compiles its pattern before touching the file, resolves time
//! boundaries with the seeker, and hands the resulting offsets to a forward
//! or backward streamer. [`Engine::spawn`] runs a query on its own task and
//! delivers [`QueryEvent`]s over a bounded channel.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::backward::BackwardStreamer;
use crate::chunk::line_start_before;
use crate::config::EngineConfig;
use crate::error::{Error, Result, SeekError};
use crate::filter::CompiledFilter;
use crate::forward::{open_file, ForwardStreamer};
use crate::raw::{self, RawMatch, RawSearch};
use crate::seeker::BoundarySeeker;
use crate::types::{Direction, FollowFrom, LogRecord, QuerySummary, SeekDirection, TimeBoundary};
use crate::watch::{self, FileWatcher};

/// A log query against a single file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Query {
    /// Log file to read
    pub file_path: PathBuf,
    /// Oldest timestamp of interest; unbounded when absent
    pub start_time: Option<DateTime<Utc>>,
    /// Newest timestamp of interest; unbounded when absent
    pub stop_time: Option<DateTime<Utc>>,
    /// Message pattern; all records match when absent
    pub grep: Option<String>,
    /// Follow behavior
    pub follow_from: FollowFrom,
    /// Scan direction
    pub direction: Direction,
}

impl Query {
    /// A forward, unfiltered, non-following query over `file_path`.
    pub fn new(file_path: impl Into<PathBuf>) -> Self {
        Self {
            file_path: file_path.into(),
            ..Self::default()
        }
    }

    /// Sets the start time.
    #[must_use]
    pub const fn with_start_time(mut self, start: DateTime<Utc>) -> Self {
        self.start_time = Some(start);
        self
    }

    /// Sets the stop time.
    #[must_use]
    pub const fn with_stop_time(mut self, stop: DateTime<Utc>) -> Self {
        self.stop_time = Some(stop);
        self
    }

    /// Sets the message pattern.
    #[must_use]
    pub fn with_grep(mut self, pattern: impl Into<String>) -> Self {
        self.grep = Some(pattern.into());
        self
    }

    /// Sets the follow mode.
    #[must_use]
    pub const fn with_follow_from(mut self, follow_from: FollowFrom) -> Self {
        self.follow_from = follow_from;
        self
    }

    /// Sets the scan direction.
    #[must_use]
    pub const fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    /// Rejects contradictory parameters.
    pub fn validate(&self) -> Result<()> {
        if let (Some(start), Some(stop)) = (self.start_time, self.stop_time) {
            if start > stop {
                return Err(Error::InvalidQuery(format!(
                    "start_time {} is after stop_time {}",
                    start.to_rfc3339(),
                    stop.to_rfc3339()
                )));
            }
        }
        if self.direction == Direction::Backward && self.follow_from != FollowFrom::None {
            return Err(Error::InvalidQuery(
                "backward queries cannot follow".to_string(),
            ));
        }
        if self.follow_from == FollowFrom::End && self.stop_time.is_some() {
            return Err(Error::InvalidQuery(
                "follow_from=end cannot be combined with stop_time".to_string(),
            ));
        }
        Ok(())
    }
}

/// An open query.
#[derive(Debug)]
pub enum QueryStream {
    /// Oldest first, optionally following.
    Forward(ForwardStreamer),
    /// Newest first.
    Backward(BackwardStreamer),
}

impl QueryStream {
    /// Returns the next record, `None` once the query is done.
    pub async fn next_record(&mut self) -> Option<Result<LogRecord>> {
        match self {
            Self::Forward(stream) => stream.next_record().await,
            Self::Backward(stream) => stream.next_record().map(|item| item.map_err(Error::from)),
        }
    }

    /// Counts and resume cursor so far.
    #[must_use]
    pub fn summary(&self) -> QuerySummary {
        match self {
            Self::Forward(stream) => stream.summary(),
            Self::Backward(stream) => stream.summary(),
        }
    }

    /// Stops the query and releases any watch registration.
    pub fn close(&mut self) {
        if let Self::Forward(stream) = self {
            stream.close();
        }
    }

    /// Converts the query into a [`Stream`] of records.
    pub fn into_stream(self) -> impl Stream<Item = Result<LogRecord>> + Send {
        futures::stream::unfold(self, |mut stream| async move {
            stream.next_record().await.map(|item| (item, stream))
        })
    }
}

/// Output of a spawned query.
#[derive(Debug)]
pub enum QueryEvent {
    /// A matching record.
    Record(LogRecord),
    /// The query ended normally.
    Finished(QuerySummary),
    /// The query ended with an error.
    Failed(Error),
}

/// Runs queries with shared configuration and file watcher.
pub struct Engine {
    config: EngineConfig,
    watcher: Arc<dyn FileWatcher>,
}

impl Engine {
    /// Creates an engine, choosing the watch backend from `config`.
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let watcher = watch::from_config(&config);
        Ok(Self { config, watcher })
    }

    /// Replaces the file watcher.
    #[must_use]
    pub fn with_watcher(mut self, watcher: Arc<dyn FileWatcher>) -> Self {
        self.watcher = watcher;
        self
    }

    /// The engine configuration.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The shared file watcher.
    #[must_use]
    pub fn watcher(&self) -> &Arc<dyn FileWatcher> {
        &self.watcher
    }

    /// Opens `query`.
    ///
    /// Invalid queries and patterns are rejected before the file is opened.
    pub fn open(&self, query: &Query) -> Result<QueryStream> {
        query.validate()?;
        let filter = CompiledFilter::from_optional(query.grep.as_deref())?;
        let path = query.file_path.as_path();
        let mut file = open_file(path)?;

        let stream = match query.direction {
            Direction::Forward => {
                let offset = match (query.follow_from, query.start_time) {
                    (FollowFrom::End, _) => self.live_offset(path, &mut file)?,
                    (_, Some(start)) => {
                        self.resolve(path, &mut file, start, SeekDirection::AtOrAfter)?
                            .resolved_offset
                    }
                    (_, None) => 0,
                };

                let start = match query.follow_from {
                    FollowFrom::End => None,
                    _ => query.start_time,
                };
                let mut stream = ForwardStreamer::from_file(path, file, offset, &self.config)?
                    .with_start(start)
                    .with_stop(query.stop_time)
                    .with_filter(filter);
                if query.follow_from != FollowFrom::None {
                    stream = stream.with_follow(Arc::clone(&self.watcher));
                }
                QueryStream::Forward(stream)
            }
            Direction::Backward => {
                let start = match query.stop_time {
                    Some(stop) => Some(self.resolve(path, &mut file, stop, SeekDirection::AtOrBefore)?),
                    None => None,
                };
                let stream = BackwardStreamer::from_file(file, start.as_ref(), &self.config)?
                    .with_floor(query.start_time)
                    .with_filter(filter);
                QueryStream::Backward(stream)
            }
        };

        debug!(
            path = %path.display(),
            direction = %query.direction,
            follow_from = %query.follow_from,
            "query opened"
        );
        Ok(stream)
    }

    /// Opens `query` and runs it on a new task.
    ///
    /// The task ends when the query finishes, fails, `cancel` fires, or the
    /// receiver is dropped; in every case its file handle and watch
    /// registration are released. Must be called within a Tokio runtime.
    pub fn spawn(
        &self,
        query: &Query,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<QueryEvent>> {
        let mut stream = self.open(query)?;
        let (tx, rx) = mpsc::channel(self.config.channel_capacity);
        let path = query.file_path.clone();

        tokio::spawn(async move {
            loop {
                let item = tokio::select! {
                    biased;
                    () = cancel.cancelled() => {
                        debug!(path = %path.display(), "query cancelled");
                        break;
                    }
                    () = tx.closed() => {
                        debug!(path = %path.display(), "query receiver dropped");
                        break;
                    }
                    item = stream.next_record() => item,
                };

                let (event, last) = match item {
                    Some(Ok(record)) => (QueryEvent::Record(record), false),
                    Some(Err(e)) => (QueryEvent::Failed(e), true),
                    None => (QueryEvent::Finished(stream.summary()), true),
                };

                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    sent = tx.send(event) => {
                        if sent.is_err() || last {
                            break;
                        }
                    }
                }
            }
            stream.close();
        });

        Ok(rx)
    }

    /// Starts a timestamp-unaware search of `path` for `pattern`. Matches are
    /// read lazily as the iterator advances.
    pub fn open_raw(&self, path: impl AsRef<Path>, pattern: &str) -> Result<RawSearch> {
        let filter = CompiledFilter::new(pattern)?;
        Ok(RawSearch::open(path, filter, &self.config)?)
    }

    /// Timestamp-unaware search of `path` for `pattern`, collected.
    pub fn search_raw(&self, path: impl AsRef<Path>, pattern: &str) -> Result<Vec<RawMatch>> {
        raw::search(path, pattern, &self.config)
    }

    fn resolve(
        &self,
        path: &Path,
        file: &mut File,
        target: DateTime<Utc>,
        direction: SeekDirection,
    ) -> Result<TimeBoundary> {
        let mut seeker = BoundarySeeker::new(file, self.config.chunk_size)
            .map_err(|e| SeekError::from_io(path, e))?;
        Ok(seeker.seek(target, direction)?)
    }

    /// End of the last complete line, where a tail-only follow starts.
    fn live_offset(&self, path: &Path, file: &mut File) -> Result<u64> {
        let len = file.metadata()?.len();
        let mut scratch = Vec::new();
        let offset = line_start_before(file, len, 0, self.config.chunk_size, &mut scratch)
            .map_err(|e| SeekError::from_io(path, e))?;
        Ok(offset)
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("watcher", &self.watcher.name())
            .finish()
    }
}

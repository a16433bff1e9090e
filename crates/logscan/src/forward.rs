//! Oldest-first streaming with optional live follow.
//!
//! A [`ForwardStreamer`] reads a file sequentially from a line-aligned offset.
//! Position is tracked as a byte offset, never as a timestamp, so runs of
//! identical timestamps are neither dropped nor repeated when a stream moves
//! from the historical range into live follow or is resumed from a [`Cursor`].
//!
//! Follow mode is a small state machine:
//!
//! ```text
//! Static --EOF, unbounded--> CatchingUpToLive --registered--> Live
//! ```
//!
//! `Live` always rescans before it waits, so lines appended between the EOF
//! read and the watch registration are picked up on the first pass.

use std::fs::{File, Metadata};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::Stream;
use tracing::{debug, trace, warn};

use crate::chunk::{is_line_start, ForwardLines};
use crate::config::EngineConfig;
use crate::error::{Error, ParseError, Result, StreamError, WatchError};
use crate::filter::CompiledFilter;
use crate::parser;
use crate::types::{Cursor, FollowState, LogRecord, QuerySummary, TimeBoundary};
use crate::watch::{FileWatcher, WatchHandle};

/// Device and inode of a file, used to notice rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileIdentity {
    dev: u64,
    ino: u64,
}

impl FileIdentity {
    #[cfg(unix)]
    fn of(meta: &Metadata) -> Option<Self> {
        use std::os::unix::fs::MetadataExt;
        Some(Self {
            dev: meta.dev(),
            ino: meta.ino(),
        })
    }

    #[cfg(not(unix))]
    fn of(_meta: &Metadata) -> Option<Self> {
        None
    }
}

/// Sequential, resumable reader of a log file in file order.
pub struct ForwardStreamer {
    path: PathBuf,
    lines: ForwardLines<File>,
    start: Option<DateTime<Utc>>,
    stop: Option<DateTime<Utc>>,
    filter: CompiledFilter,
    watcher: Option<Arc<dyn FileWatcher>>,
    handle: Option<WatchHandle>,
    state: FollowState,
    poll_interval: Duration,
    max_poll_failures: u32,
    poll_failures: u32,
    identity: Option<FileIdentity>,
    emitted: u64,
    skipped: u64,
    last_timestamp: Option<DateTime<Utc>>,
    stopped_at: Option<u64>,
    finished: bool,
}

impl ForwardStreamer {
    /// Opens `path` and starts at `start`, or at the beginning of the file.
    pub fn open(
        path: impl AsRef<Path>,
        start: Option<&TimeBoundary>,
        config: &EngineConfig,
    ) -> std::result::Result<Self, StreamError> {
        let offset = start.map_or(0, |b| b.resolved_offset);
        Self::open_at(path, offset, config)
    }

    /// Opens `path` at a known line-aligned `offset`.
    pub fn open_at(
        path: impl AsRef<Path>,
        offset: u64,
        config: &EngineConfig,
    ) -> std::result::Result<Self, StreamError> {
        let path = path.as_ref();
        let file = open_file(path)?;
        Self::from_file(path, file, offset, config)
    }

    /// Resumes a previous stream. The cursor must still point at a line
    /// boundary inside the file.
    pub fn resume(
        path: impl AsRef<Path>,
        cursor: &Cursor,
        config: &EngineConfig,
    ) -> std::result::Result<Self, StreamError> {
        let path = path.as_ref();
        let mut file = open_file(path)?;
        validate_cursor(&mut file, cursor.offset)?;

        let mut streamer = Self::from_file(path, file, cursor.offset, config)?;
        streamer.last_timestamp = cursor.last_timestamp;
        Ok(streamer)
    }

    /// Wraps an already open file.
    pub fn from_file(
        path: impl Into<PathBuf>,
        file: File,
        offset: u64,
        config: &EngineConfig,
    ) -> std::result::Result<Self, StreamError> {
        let identity = FileIdentity::of(&file.metadata()?);
        Ok(Self {
            path: path.into(),
            lines: ForwardLines::new(file, offset, config.chunk_size),
            start: None,
            stop: None,
            filter: CompiledFilter::match_all(),
            watcher: None,
            handle: None,
            state: FollowState::Static,
            poll_interval: config.poll_interval(),
            max_poll_failures: config.max_poll_failures.max(1),
            poll_failures: 0,
            identity,
            emitted: 0,
            skipped: 0,
            last_timestamp: None,
            stopped_at: None,
            finished: false,
        })
    }

    /// Passes over records older than `start` without counting them.
    #[must_use]
    pub const fn with_start(mut self, start: Option<DateTime<Utc>>) -> Self {
        self.start = start;
        self
    }

    /// Ends the stream at the first record newer than `stop`.
    #[must_use]
    pub const fn with_stop(mut self, stop: Option<DateTime<Utc>>) -> Self {
        self.stop = stop;
        self
    }

    /// Emits only records whose message passes `filter`.
    #[must_use]
    pub fn with_filter(mut self, filter: CompiledFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Keeps following the file through `watcher` once the historical range
    /// is exhausted. Ignored when a stop timestamp is set.
    #[must_use]
    pub fn with_follow(mut self, watcher: Arc<dyn FileWatcher>) -> Self {
        self.watcher = Some(watcher);
        self
    }

    /// Current follow state.
    #[must_use]
    pub const fn state(&self) -> FollowState {
        self.state
    }

    /// Path being streamed.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Position a follow-up stream should resume from.
    #[must_use]
    pub fn cursor(&self) -> Cursor {
        Cursor {
            offset: self.stopped_at.unwrap_or_else(|| self.lines.offset()),
            last_timestamp: self.last_timestamp,
            has_more: !self.finished || self.stopped_at.is_some(),
        }
    }

    /// Emitted and skipped counts so far, plus the resume cursor.
    #[must_use]
    pub fn summary(&self) -> QuerySummary {
        QuerySummary {
            emitted: self.emitted,
            skipped: self.skipped,
            cursor: self.cursor(),
        }
    }

    /// Whether the stream has ended.
    #[must_use]
    pub const fn is_finished(&self) -> bool {
        self.finished
    }

    fn follows(&self) -> bool {
        self.watcher.is_some() && self.stop.is_none()
    }

    /// Ends the stream and releases its watch registration.
    pub fn close(&mut self) {
        self.finished = true;
        if let Some(handle) = self.handle.take() {
            handle.unregister();
        }
    }

    /// Returns the next matching record, `None` once the stream has ended.
    ///
    /// In `Live` state this waits for the file to grow. An error ends the
    /// stream.
    pub async fn next_record(&mut self) -> Option<Result<LogRecord>> {
        if self.finished {
            return None;
        }
        match self.advance().await {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.close();
                None
            }
            Err(e) => {
                debug!(path = %self.path.display(), error = %e, "forward stream failed");
                self.close();
                Some(Err(e))
            }
        }
    }

    /// Converts the streamer into a [`Stream`] of records.
    pub fn into_stream(self) -> impl Stream<Item = Result<LogRecord>> + Send {
        futures::stream::unfold(self, |mut streamer| async move {
            streamer.next_record().await.map(|item| (item, streamer))
        })
    }

    async fn advance(&mut self) -> Result<Option<LogRecord>> {
        loop {
            match self.state {
                FollowState::Static => {
                    if let Some(record) = self.read_next()? {
                        return Ok(Some(record));
                    }
                    if self.stopped_at.is_some() || !self.follows() {
                        return Ok(None);
                    }
                    self.transition(FollowState::CatchingUpToLive);
                }
                FollowState::CatchingUpToLive => {
                    self.arm_watch();
                    self.transition(FollowState::Live);
                }
                FollowState::Live => {
                    if let Some(record) = self.read_next()? {
                        return Ok(Some(record));
                    }
                    self.check_file()?;
                    self.wait_for_growth().await?;
                }
            }
        }
    }

    fn transition(&mut self, next: FollowState) {
        debug!(
            path = %self.path.display(),
            from = ?self.state,
            to = ?next,
            offset = self.lines.offset(),
            "follow state transition"
        );
        self.state = next;
    }

    /// Reads lines until one is emitted, the range ends, or the readable
    /// data runs out.
    fn read_next(&mut self) -> Result<Option<LogRecord>> {
        if self.stopped_at.is_some() {
            return Ok(None);
        }
        let include_unterminated = !self.follows();

        while let Some(line) = self.lines.next_line(include_unterminated)? {
            let record = match parser::parse(line.bytes, line.offset) {
                Ok(record) => record,
                Err(ParseError::Empty) => continue,
                Err(e) => {
                    trace!(offset = line.offset, error = %e, "skipping unparseable line");
                    self.skipped += 1;
                    continue;
                }
            };

            if self.start.is_some_and(|start| record.timestamp < start) {
                continue;
            }

            if self.stop.is_some_and(|stop| record.timestamp > stop) {
                self.stopped_at = Some(record.source_offset);
                debug!(offset = record.source_offset, "reached stop boundary");
                return Ok(None);
            }

            if !self.filter.matches(&record) {
                continue;
            }

            self.emitted += 1;
            self.last_timestamp = Some(record.timestamp);
            return Ok(Some(record));
        }

        Ok(None)
    }

    fn arm_watch(&mut self) {
        let Some(watcher) = &self.watcher else {
            return;
        };
        match watcher.register(&self.path) {
            Ok(handle) => {
                debug!(
                    path = %self.path.display(),
                    id = handle.id(),
                    backend = watcher.name(),
                    "watch armed"
                );
                self.handle = Some(handle);
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "watch registration failed, polling");
            }
        }
    }

    /// Detects truncation, removal and rotation of the followed file.
    fn check_file(&mut self) -> Result<()> {
        let read_position = self.lines.read_position();
        let len = self.lines.get_ref().metadata()?.len();
        if len < read_position {
            return Err(StreamError::FileTruncated {
                path: self.path.clone(),
                offset: read_position,
                len,
            }
            .into());
        }

        match std::fs::metadata(&self.path) {
            Ok(meta) => {
                self.poll_failures = 0;
                let current = FileIdentity::of(&meta);
                if self.identity.is_some() && current != self.identity {
                    return Err(StreamError::FileRotated(self.path.clone()).into());
                }
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(StreamError::FileRemoved(self.path.clone()).into())
            }
            Err(e) => {
                self.poll_failures += 1;
                warn!(
                    path = %self.path.display(),
                    attempts = self.poll_failures,
                    error = %e,
                    "stat of followed file failed"
                );
                if self.poll_failures >= self.max_poll_failures {
                    return Err(WatchError::PollFailed {
                        path: self.path.clone(),
                        attempts: self.poll_failures,
                    }
                    .into());
                }
                Ok(())
            }
        }
    }

    async fn wait_for_growth(&mut self) -> Result<()> {
        match &self.handle {
            Some(handle) => match handle.wait_for_growth(self.poll_interval).await {
                Ok(outcome) => {
                    trace!(?outcome, "woke from watch");
                    Ok(())
                }
                Err(WatchError::Unregistered) => {
                    self.finished = true;
                    Err(Error::Watch(WatchError::Unregistered))
                }
                Err(e) => Err(e.into()),
            },
            None => {
                tokio::time::sleep(self.poll_interval).await;
                Ok(())
            }
        }
    }
}

impl std::fmt::Debug for ForwardStreamer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForwardStreamer")
            .field("path", &self.path)
            .field("offset", &self.lines.offset())
            .field("state", &self.state)
            .field("filter", &self.filter)
            .field("stop", &self.stop)
            .field("emitted", &self.emitted)
            .field("skipped", &self.skipped)
            .finish_non_exhaustive()
    }
}

pub(crate) fn open_file(path: &Path) -> std::result::Result<File, StreamError> {
    File::open(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => StreamError::FileNotFound(path.to_path_buf()),
        _ => StreamError::Io(e),
    })
}

pub(crate) fn validate_cursor(file: &mut File, offset: u64) -> std::result::Result<(), StreamError> {
    let len = file.metadata()?.len();
    if offset > len {
        return Err(StreamError::InvalidCursor {
            offset,
            reason: "offset is past the end of the file",
        });
    }
    if !is_line_start(file, offset)? {
        return Err(StreamError::InvalidCursor {
            offset,
            reason: "offset is not at a line boundary",
        });
    }
    Ok(())
}

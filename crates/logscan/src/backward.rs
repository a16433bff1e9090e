//! Newest-first streaming over historical data.
//!
//! [`BackwardStreamer`] walks a file from an end offset toward its start one
//! chunk at a time. Lines split across chunk edges are carried in the reverse
//! reader's buffer, so every record is parsed whole. Reaching offset 0 ends
//! the stream with `has_more = false`.

use std::fs::File;
use std::io::{Read, Seek};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, trace};

use crate::chunk::{line_end_at, ReverseLines};
use crate::config::EngineConfig;
use crate::error::{ParseError, StreamError};
use crate::filter::CompiledFilter;
use crate::forward::{open_file, validate_cursor};
use crate::parser;
use crate::types::{Cursor, LogRecord, QuerySummary, TimeBoundary};

/// One page of backward results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Batch {
    /// Records, newest first.
    pub records: Vec<LogRecord>,
    /// Where the next page starts.
    pub cursor: Cursor,
}

/// Reverse-chronological reader.
pub struct BackwardStreamer<R = File> {
    lines: ReverseLines<R>,
    floor: Option<DateTime<Utc>>,
    filter: CompiledFilter,
    batch_size: usize,
    emitted: u64,
    skipped: u64,
    last_timestamp: Option<DateTime<Utc>>,
    stopped_at: Option<u64>,
    finished: bool,
}

impl BackwardStreamer<File> {
    /// Opens `path` and reads backward from `start`.
    ///
    /// A found boundary includes the record it resolved to; an unresolved
    /// boundary starts at its offset; `None` starts at end of file.
    pub fn open(
        path: impl AsRef<Path>,
        start: Option<&TimeBoundary>,
        config: &EngineConfig,
    ) -> Result<Self, StreamError> {
        let file = open_file(path.as_ref())?;
        Self::from_file(file, start, config)
    }

    /// Like [`BackwardStreamer::open`] over an already open file.
    pub fn from_file(
        mut file: File,
        start: Option<&TimeBoundary>,
        config: &EngineConfig,
    ) -> Result<Self, StreamError> {
        let end = match start {
            None => file.metadata()?.len(),
            Some(boundary) if boundary.found => {
                line_end_at(&mut file, boundary.resolved_offset, config.chunk_size)?
            }
            Some(boundary) => boundary.resolved_offset,
        };
        Ok(Self::new(file, end, config))
    }

    /// Continues a previous backward stream from its cursor.
    pub fn resume(
        path: impl AsRef<Path>,
        cursor: &Cursor,
        config: &EngineConfig,
    ) -> Result<Self, StreamError> {
        let mut file = open_file(path.as_ref())?;
        validate_cursor(&mut file, cursor.offset)?;

        let mut streamer = Self::new(file, cursor.offset, config);
        streamer.last_timestamp = cursor.last_timestamp;
        Ok(streamer)
    }
}

impl<R: Read + Seek> BackwardStreamer<R> {
    /// Reads `inner` backward from the line boundary `end`.
    pub fn new(inner: R, end: u64, config: &EngineConfig) -> Self {
        debug!(end, batch_size = config.batch_size, "backward stream opened");
        Self {
            lines: ReverseLines::new(inner, end, config.chunk_size),
            floor: None,
            filter: CompiledFilter::match_all(),
            batch_size: config.batch_size.max(1),
            emitted: 0,
            skipped: 0,
            last_timestamp: None,
            stopped_at: None,
            finished: false,
        }
    }

    /// Ends the stream at the first record older than `floor`.
    #[must_use]
    pub const fn with_floor(mut self, floor: Option<DateTime<Utc>>) -> Self {
        self.floor = floor;
        self
    }

    /// Emits only records whose message passes `filter`.
    #[must_use]
    pub fn with_filter(mut self, filter: CompiledFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Position a follow-up page should resume from.
    #[must_use]
    pub fn cursor(&self) -> Cursor {
        let offset = self.stopped_at.unwrap_or_else(|| self.lines.offset());
        Cursor {
            offset,
            last_timestamp: self.last_timestamp,
            has_more: self.stopped_at.is_some() || (!self.finished && offset > 0),
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

    /// Returns the next older matching record.
    pub fn next_record(&mut self) -> Option<Result<LogRecord, StreamError>> {
        if self.finished {
            return None;
        }

        loop {
            let line = match self.lines.next_line() {
                Ok(Some(line)) => line,
                Ok(None) => {
                    self.finished = true;
                    return None;
                }
                Err(e) => {
                    self.finished = true;
                    return Some(Err(e.into()));
                }
            };

            let record = match parser::parse(line.bytes, line.offset) {
                Ok(record) => record,
                Err(ParseError::Empty) => continue,
                Err(e) => {
                    trace!(offset = line.offset, error = %e, "skipping unparseable line");
                    self.skipped += 1;
                    continue;
                }
            };

            if self.floor.is_some_and(|floor| record.timestamp < floor) {
                self.stopped_at = Some(line.end);
                self.finished = true;
                debug!(offset = line.offset, "reached floor boundary");
                return None;
            }

            if !self.filter.matches(&record) {
                continue;
            }

            self.emitted += 1;
            self.last_timestamp = Some(record.timestamp);
            return Some(Ok(record));
        }
    }

    /// Reads up to one batch of records, newest first.
    pub fn next_batch(&mut self) -> Result<Batch, StreamError> {
        let mut records = Vec::with_capacity(self.batch_size);
        while records.len() < self.batch_size {
            match self.next_record() {
                Some(record) => records.push(record?),
                None => break,
            }
        }
        Ok(Batch {
            records,
            cursor: self.cursor(),
        })
    }
}

impl<R: Read + Seek> Iterator for BackwardStreamer<R> {
    type Item = Result<LogRecord, StreamError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record()
    }
}

impl<R> std::fmt::Debug for BackwardStreamer<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackwardStreamer")
            .field("filter", &self.filter)
            .field("floor", &self.floor)
            .field("batch_size", &self.batch_size)
            .field("emitted", &self.emitted)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

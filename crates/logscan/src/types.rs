//! Core types shared by the seeker and streamers.
//!
//! This module provides:
//! - [`LogRecord`]: One decoded log line
//! - [`TimeBoundary`]: A resolved seek target
//! - [`Cursor`]: A resumable stream position
//! - [`FollowState`]: The forward streamer's follow-mode state machine
//! - [`FollowFrom`] / [`Direction`]: Query shape selectors

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which container output stream a line was written to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    /// Standard output
    Stdout,
    /// Standard error
    Stderr,
    /// Not recorded, or a tag this engine does not recognize
    #[default]
    Unknown,
}

impl StreamKind {
    /// Maps a runtime stream tag to a kind.
    #[must_use]
    pub fn from_tag(tag: &[u8]) -> Self {
        match tag {
            b"stdout" => Self::Stdout,
            b"stderr" => Self::Stderr,
            _ => Self::Unknown,
        }
    }

    /// Returns the string representation of this stream.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
            Self::Unknown => "unknown",
        }
    }
}

/// A single decoded log line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    /// When the line was written, nanosecond precision
    pub timestamp: DateTime<Utc>,
    /// The decoded log body
    pub message: String,
    /// Output stream the line came from
    #[serde(default)]
    pub stream: StreamKind,
    /// Whether the runtime marked this line as a partial write
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub partial: bool,
    /// Byte offset of the line start in the source file
    #[serde(skip)]
    pub source_offset: u64,
}

/// Which record a seek resolves to when timestamps tie or fall between lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SeekDirection {
    /// First record whose timestamp is at or after the target.
    AtOrAfter,
    /// Last record whose timestamp is at or before the target.
    AtOrBefore,
}

/// A resolved seek target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeBoundary {
    /// The timestamp that was asked for
    pub requested_timestamp: DateTime<Utc>,
    /// Line-aligned byte offset of the resolved record, or of the nearest
    /// edge of the file when nothing qualified
    pub resolved_offset: u64,
    /// Whether a qualifying record exists
    pub found: bool,
    /// How the boundary was resolved
    pub direction: SeekDirection,
}

/// Resumable position in a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    /// Line-aligned byte offset where the next batch starts (forward) or
    /// ends (backward)
    pub offset: u64,
    /// Timestamp of the last record emitted before this cursor was taken
    pub last_timestamp: Option<DateTime<Utc>>,
    /// Whether more records may be available past this cursor
    pub has_more: bool,
}

impl Cursor {
    /// A cursor at `offset` with nothing emitted yet.
    #[must_use]
    pub const fn at(offset: u64) -> Self {
        Self {
            offset,
            last_timestamp: None,
            has_more: true,
        }
    }
}

/// Follow-mode state of a forward stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FollowState {
    /// Serving the historical range already on disk.
    Static,
    /// Historical range exhausted; the watch is about to be armed.
    CatchingUpToLive,
    /// Waiting on file growth and emitting lines as they arrive.
    Live,
}

/// Where a query starts following new lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FollowFrom {
    /// Do not follow; stop at the end of the historical range.
    #[default]
    None,
    /// Serve the historical range, then keep following.
    Default,
    /// Skip history and follow only lines appended after the query starts.
    End,
}

impl FollowFrom {
    /// Returns the string representation of this mode.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Default => "default",
            Self::End => "end",
        }
    }
}

impl fmt::Display for FollowFrom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FollowFrom {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "default" => Ok(Self::Default),
            "end" => Ok(Self::End),
            other => Err(format!("unknown follow mode: {other}")),
        }
    }
}

/// Scan direction of a query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Oldest first.
    #[default]
    Forward,
    /// Newest first.
    Backward,
}

impl Direction {
    /// Returns the string representation of this direction.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Forward => "forward",
            Self::Backward => "backward",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "forward" => Ok(Self::Forward),
            "backward" => Ok(Self::Backward),
            other => Err(format!("unknown direction: {other}")),
        }
    }
}

/// End-of-query accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuerySummary {
    /// Records handed to the consumer
    pub emitted: u64,
    /// Lines dropped because they failed to parse
    pub skipped: u64,
    /// Where a follow-up query should resume
    pub cursor: Cursor,
}

//! Error types for the log search engine.
//!
//! Errors are grouped by the stage that produces them. Per-line
//! [`ParseError`]s are absorbed by the streamers (skip-and-continue); every
//! other family propagates to the caller through [`Error`].

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failure to decode a single log line.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// The line had no content after trimming.
    #[error("empty line")]
    Empty,

    /// The line structure could not be understood.
    #[error("malformed line: {0}")]
    Malformed(String),

    /// The timestamp field is present but is not valid RFC3339.
    #[error("bad timestamp: {0}")]
    BadTimestamp(String),
}

/// Failure to compile a user-supplied search pattern.
#[derive(Debug, Error)]
pub enum RegexError {
    /// The pattern is not valid regex syntax.
    #[error("invalid pattern {pattern:?}: {source}")]
    InvalidPattern {
        /// The pattern as given by the caller.
        pattern: String,
        /// Underlying compile error.
        #[source]
        source: regex::Error,
    },
}

/// I/O failure while probing a file for a time boundary.
#[derive(Debug, Error)]
pub enum SeekError {
    /// The file does not exist.
    #[error("file not found: {}", .0.display())]
    NotFound(PathBuf),

    /// The file exists but cannot be read.
    #[error("permission denied: {}", .0.display())]
    PermissionDenied(PathBuf),

    /// Any other I/O failure.
    #[error("I/O error while seeking: {0}")]
    Io(#[from] io::Error),
}

/// Conditions that terminate a running stream.
#[derive(Debug, Error)]
pub enum StreamError {
    /// The file shrank below the last read offset.
    #[error("file truncated: {} is {len} bytes, last read offset was {offset}", .path.display())]
    FileTruncated {
        /// Path of the followed file.
        path: PathBuf,
        /// Offset the stream had reached.
        offset: u64,
        /// Current file length.
        len: u64,
    },

    /// The file did not exist when the stream was opened.
    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    /// The file was deleted while being streamed.
    #[error("file removed: {}", .0.display())]
    FileRemoved(PathBuf),

    /// A different file now lives at the streamed path.
    #[error("file rotated: {}", .0.display())]
    FileRotated(PathBuf),

    /// A resume cursor no longer describes a valid position in the file.
    #[error("invalid cursor at offset {offset}: {reason}")]
    InvalidCursor {
        /// Offset carried by the cursor.
        offset: u64,
        /// Why the cursor was rejected.
        reason: &'static str,
    },

    /// Any other I/O failure.
    #[error("I/O error while streaming: {0}")]
    Io(#[from] io::Error),
}

/// Failures of the file-change notification layer.
#[derive(Debug, Error)]
pub enum WatchError {
    /// The OS notification backend reported an error.
    #[error("watch backend error: {0}")]
    Backend(#[from] notify::Error),

    /// Polling the file failed too many times in a row.
    #[error("polling {} failed {attempts} times in a row", .path.display())]
    PollFailed {
        /// Watched path.
        path: PathBuf,
        /// Consecutive failures observed.
        attempts: u32,
    },

    /// The handle was already unregistered.
    #[error("watch handle is no longer registered")]
    Unregistered,
}

/// Top-level engine error.
#[derive(Debug, Error)]
pub enum Error {
    /// Pattern compilation failed.
    #[error(transparent)]
    Regex(#[from] RegexError),

    /// Boundary resolution failed.
    #[error(transparent)]
    Seek(#[from] SeekError),

    /// A stream terminated abnormally.
    #[error(transparent)]
    Stream(#[from] StreamError),

    /// The watch layer failed beyond recovery.
    #[error(transparent)]
    Watch(#[from] WatchError),

    /// The query parameters contradict each other.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// Configuration could not be loaded.
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

impl SeekError {
    /// Classifies an I/O error raised while opening or probing `path`.
    pub(crate) fn from_io(path: impl Into<PathBuf>, err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => Self::NotFound(path.into()),
            io::ErrorKind::PermissionDenied => Self::PermissionDenied(path.into()),
            _ => Self::Io(err),
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::Stream(StreamError::Io(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let err = ParseError::Malformed("missing time".to_string());
        assert_eq!(err.to_string(), "malformed line: missing time");

        let err = ParseError::BadTimestamp("yesterday".to_string());
        assert_eq!(err.to_string(), "bad timestamp: yesterday");

        let err = StreamError::FileTruncated {
            path: PathBuf::from("/var/log/a.log"),
            offset: 100,
            len: 10,
        };
        assert_eq!(
            err.to_string(),
            "file truncated: /var/log/a.log is 10 bytes, last read offset was 100"
        );

        let err = Error::InvalidQuery("start after stop".to_string());
        assert_eq!(err.to_string(), "invalid query: start after stop");
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Error>();
        assert_send_sync::<ParseError>();
        assert_send_sync::<WatchError>();
    }

    #[test]
    fn seek_error_classifies_io_kinds() {
        let err = SeekError::from_io("/x", io::Error::new(io::ErrorKind::NotFound, "gone"));
        assert!(matches!(err, SeekError::NotFound(_)));

        let err = SeekError::from_io("/x", io::Error::new(io::ErrorKind::PermissionDenied, "no"));
        assert!(matches!(err, SeekError::PermissionDenied(_)));

        let err = SeekError::from_io("/x", io::Error::other("disk on fire"));
        assert!(matches!(err, SeekError::Io(_)));
    }

    #[test]
    fn regex_error_keeps_pattern() {
        let source = regex::Regex::new("(").err();
        assert!(source.is_some());
        if let Some(source) = source {
            let err = RegexError::InvalidPattern {
                pattern: "(".to_string(),
                source,
            };
            assert!(err.to_string().starts_with("invalid pattern \"(\""));
        }
    }

    #[test]
    fn transparent_wrapping_preserves_message() {
        let inner = StreamError::FileRemoved(PathBuf::from("/tmp/x.log"));
        let msg = inner.to_string();
        let err: Error = inner.into();
        assert_eq!(err.to_string(), msg);
    }

    #[test]
    fn io_error_converts_to_stream_error() {
        let err: Error = io::Error::other("boom").into();
        assert!(matches!(err, Error::Stream(StreamError::Io(_))));
    }
}

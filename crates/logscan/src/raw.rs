//! Timestamp-unaware pattern search.
//!
//! Raw search runs the filter over every line as text. It does not parse
//! records, seek, or skip anything, which makes it usable on files that are
//! not container logs at all.

use std::fs::File;
use std::io::{Read, Seek};
use std::path::Path;

use serde::Serialize;

use crate::chunk::ForwardLines;
use crate::config::EngineConfig;
use crate::error::{Result, StreamError};
use crate::filter::{self, CompiledFilter};
use crate::forward::open_file;

/// A line that matched a raw search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RawMatch {
    /// Byte offset of the line start
    pub offset: u64,
    /// 1-based line number
    pub line_number: u64,
    /// Line text, invalid UTF-8 replaced
    pub text: String,
}

/// Iterator over the lines of a source that match a filter.
pub struct RawSearch<R = File> {
    lines: ForwardLines<R>,
    filter: CompiledFilter,
    line_number: u64,
    done: bool,
}

impl RawSearch<File> {
    /// Opens `path` for searching.
    pub fn open(
        path: impl AsRef<Path>,
        filter: CompiledFilter,
        config: &EngineConfig,
    ) -> std::result::Result<Self, StreamError> {
        let file = open_file(path.as_ref())?;
        Ok(Self::new(file, filter, config))
    }
}

impl<R: Read + Seek> RawSearch<R> {
    /// Searches `inner` from its start.
    pub fn new(inner: R, filter: CompiledFilter, config: &EngineConfig) -> Self {
        Self {
            lines: ForwardLines::new(inner, 0, config.chunk_size),
            filter,
            line_number: 0,
            done: false,
        }
    }
}

impl<R: Read + Seek> Iterator for RawSearch<R> {
    type Item = std::result::Result<RawMatch, StreamError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            let line = match self.lines.next_line(true) {
                Ok(Some(line)) => line,
                Ok(None) => {
                    self.done = true;
                    return None;
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e.into()));
                }
            };
            self.line_number += 1;

            let text = String::from_utf8_lossy(line.bytes);
            if self.filter.is_match(&text) {
                return Some(Ok(RawMatch {
                    offset: line.offset,
                    line_number: self.line_number,
                    text: text.into_owned(),
                }));
            }
        }
    }
}

/// Compiles `pattern` and returns every matching line of `path`.
///
/// The pattern is compiled before the file is opened, so an invalid pattern
/// never touches the filesystem.
pub fn search(
    path: impl AsRef<Path>,
    pattern: &str,
    config: &EngineConfig,
) -> Result<Vec<RawMatch>> {
    let filter = filter::compile(pattern)?;
    let matches = RawSearch::open(path, filter, config)?.collect::<std::result::Result<_, _>>()?;
    Ok(matches)
}

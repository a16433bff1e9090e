//! Time-bounded seeking without reading whole files.
//!
//! [`BoundarySeeker`] binary-searches byte offsets. Each probe aligns to the
//! start of the line containing the probe offset, then reads forward to the
//! first line that parses and compares its timestamp with the target.
//! Unparseable regions shrink the search window instead of counting as
//! comparison points, so a damaged file degrades to a linear scan of the
//! damaged region rather than a wrong answer.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::chunk::{line_start_before, ForwardLines, ReverseLines};
use crate::error::SeekError;
use crate::parser;
use crate::types::{SeekDirection, TimeBoundary};

/// A parsed line found by a probe.
#[derive(Debug, Clone, Copy)]
struct Probe {
    offset: u64,
    end: u64,
    timestamp: DateTime<Utc>,
}

/// Resolves timestamps to line-aligned byte offsets.
pub struct BoundarySeeker<R> {
    lines: ForwardLines<R>,
    scratch: Vec<u8>,
    len: u64,
    chunk_size: usize,
}

impl BoundarySeeker<File> {
    /// Opens `path` read-only for seeking.
    pub fn open(path: impl AsRef<Path>, chunk_size: usize) -> Result<Self, SeekError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| SeekError::from_io(path, e))?;
        Self::new(file, chunk_size).map_err(|e| SeekError::from_io(path, e))
    }
}

impl<R: Read + Seek> BoundarySeeker<R> {
    /// Wraps a seekable source; its current length bounds every search.
    pub fn new(mut inner: R, chunk_size: usize) -> std::io::Result<Self> {
        let len = inner.seek(SeekFrom::End(0))?;
        Ok(Self {
            lines: ForwardLines::new(inner, 0, chunk_size),
            scratch: Vec::new(),
            len,
            chunk_size,
        })
    }

    /// Length of the source when the seeker was created.
    pub const fn len(&self) -> u64 {
        self.len
    }

    /// Returns true if the source was empty.
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Resolves `target` to a boundary.
    ///
    /// `AtOrAfter` finds the first record with a timestamp at or after the
    /// target. Unparseable lines ahead of the first record resolve to offset
    /// 0. When no record qualifies it reports `found = false` at the end of
    /// the last complete line. `AtOrBefore` finds
    /// the last record at or before the target, or reports `found = false` at
    /// offset 0. Equal timestamps resolve to the first (`AtOrAfter`) or last
    /// (`AtOrBefore`) record of the run.
    pub fn seek(
        &mut self,
        target: DateTime<Utc>,
        direction: SeekDirection,
    ) -> Result<TimeBoundary, SeekError> {
        let (resolved_offset, found) = match direction {
            SeekDirection::AtOrAfter => {
                let (offset, preceded) = self.first_where(|ts| ts >= target)?;
                if offset == self.len {
                    (self.last_line_end()?, false)
                } else if preceded {
                    (offset, true)
                } else {
                    // Nothing readable comes earlier; keep any leading
                    // unparseable lines in range so they are counted.
                    (0, true)
                }
            }
            SeekDirection::AtOrBefore => {
                let (after, _) = self.first_where(|ts| ts > target)?;
                match self.last_record_before(after)? {
                    Some(offset) => (offset, true),
                    None => (0, false),
                }
            }
        };

        debug!(
            target = %target.to_rfc3339(),
            ?direction,
            resolved_offset,
            found,
            "resolved time boundary"
        );

        Ok(TimeBoundary {
            requested_timestamp: target,
            resolved_offset,
            found,
            direction,
        })
    }

    /// Offset of the first parseable record whose timestamp satisfies `pred`,
    /// or the source length when none does, and whether any parseable record
    /// precedes it. `pred` must be monotone over the file's timestamps (false,
    /// then true).
    fn first_where(
        &mut self,
        pred: impl Fn(DateTime<Utc>) -> bool,
    ) -> Result<(u64, bool), SeekError> {
        let mut lo = 0;
        let mut hi = self.len;
        let mut candidate = self.len;

        // Records before `lo` fail `pred`; the answer is `candidate` or a
        // record starting in [lo, hi).
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let start =
                line_start_before(self.lines.get_mut(), mid, lo, self.chunk_size, &mut self.scratch)?;

            match self.probe(start, hi)? {
                Some(probe) if pred(probe.timestamp) => {
                    candidate = probe.offset;
                    hi = probe.offset;
                }
                Some(probe) => lo = probe.end,
                None => hi = start,
            }
        }

        Ok((candidate, lo > 0))
    }

    /// End of the last newline-terminated line. An unterminated tail is
    /// still being written and is not a valid place to start reading.
    fn last_line_end(&mut self) -> Result<u64, SeekError> {
        Ok(line_start_before(
            self.lines.get_mut(),
            self.len,
            0,
            self.chunk_size,
            &mut self.scratch,
        )?)
    }

    /// First parseable line starting in `[from, hi)`.
    fn probe(&mut self, from: u64, hi: u64) -> Result<Option<Probe>, SeekError> {
        self.lines.reset(from);
        while let Some(line) = self.lines.next_line(true)? {
            if line.offset >= hi {
                break;
            }
            if let Ok(record) = parser::parse(line.bytes, line.offset) {
                return Ok(Some(Probe {
                    offset: line.offset,
                    end: line.end,
                    timestamp: record.timestamp,
                }));
            }
        }
        Ok(None)
    }

    /// Offset of the last parseable record ending at or before `end`.
    fn last_record_before(&mut self, end: u64) -> Result<Option<u64>, SeekError> {
        let mut lines = ReverseLines::new(self.lines.get_mut(), end, self.chunk_size);
        while let Some(line) = lines.next_line()? {
            if parser::parse(line.bytes, line.offset).is_ok() {
                return Ok(Some(line.offset));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_timestamp;
    use proptest::prelude::*;
    use std::io::Cursor as IoCursor;

    fn ts(second: u32) -> DateTime<Utc> {
        parse_timestamp(&format!("2024-05-01T10:00:{second:02}Z")).expect("valid timestamp")
    }

    fn line(second: u32, message: &str) -> String {
        format!("2024-05-01T10:00:{second:02}Z stdout F {message}\n")
    }

    fn file_of(seconds: &[u32]) -> Vec<u8> {
        seconds
            .iter()
            .enumerate()
            .map(|(i, s)| line(*s, &format!("line-{i}")))
            .collect::<String>()
            .into_bytes()
    }

    fn seeker(data: &[u8], chunk: usize) -> BoundarySeeker<IoCursor<Vec<u8>>> {
        BoundarySeeker::new(IoCursor::new(data.to_vec()), chunk).expect("seeker")
    }

    fn message_at(data: &[u8], offset: u64) -> String {
        let rest = &data[offset as usize..];
        let end = rest.iter().position(|b| *b == b'\n').unwrap_or(rest.len());
        parser::parse(&rest[..end], offset).expect("parse").message
    }

    #[test]
    fn empty_file_is_never_found() {
        let mut s = seeker(b"", 16);
        for direction in [SeekDirection::AtOrAfter, SeekDirection::AtOrBefore] {
            let boundary = s.seek(ts(0), direction).expect("seek");
            assert!(!boundary.found);
            assert_eq!(boundary.resolved_offset, 0);
        }
    }

    #[test]
    fn at_or_after_exact_and_between() {
        let data = file_of(&[1, 3, 5, 7]);
        let mut s = seeker(&data, 8);

        let b = s.seek(ts(5), SeekDirection::AtOrAfter).expect("seek");
        assert!(b.found);
        assert_eq!(message_at(&data, b.resolved_offset), "line-2");

        let b = s.seek(ts(4), SeekDirection::AtOrAfter).expect("seek");
        assert_eq!(message_at(&data, b.resolved_offset), "line-2");
    }

    #[test]
    fn at_or_after_before_first_record_clamps_to_start() {
        let data = file_of(&[10, 20]);
        let b = seeker(&data, 8).seek(ts(0), SeekDirection::AtOrAfter).expect("seek");
        assert!(b.found);
        assert_eq!(b.resolved_offset, 0);
    }

    #[test]
    fn at_or_after_past_last_record_is_not_found() {
        let data = file_of(&[10, 20]);
        let b = seeker(&data, 8).seek(ts(30), SeekDirection::AtOrAfter).expect("seek");
        assert!(!b.found);
        assert_eq!(b.resolved_offset, data.len() as u64);
    }

    #[test]
    fn at_or_before_resolves_last_record() {
        let data = file_of(&[10, 20, 30]);
        let mut s = seeker(&data, 8);

        let b = s.seek(ts(25), SeekDirection::AtOrBefore).expect("seek");
        assert!(b.found);
        assert_eq!(message_at(&data, b.resolved_offset), "line-1");

        let b = s.seek(ts(59), SeekDirection::AtOrBefore).expect("seek");
        assert_eq!(message_at(&data, b.resolved_offset), "line-2");

        let b = s.seek(ts(5), SeekDirection::AtOrBefore).expect("seek");
        assert!(!b.found);
    }

    #[test]
    fn ties_resolve_to_run_edges() {
        let data = file_of(&[1, 2, 2, 2, 3]);
        let mut s = seeker(&data, 5);

        let first = s.seek(ts(2), SeekDirection::AtOrAfter).expect("seek");
        assert_eq!(message_at(&data, first.resolved_offset), "line-1");

        let last = s.seek(ts(2), SeekDirection::AtOrBefore).expect("seek");
        assert_eq!(message_at(&data, last.resolved_offset), "line-3");
    }

    #[test]
    fn unparseable_lines_are_skipped() {
        let mut data = Vec::new();
        data.extend_from_slice(line(1, "a").as_bytes());
        data.extend_from_slice(b"garbage without time\n{\"broken\":\n");
        data.extend_from_slice(line(2, "b").as_bytes());
        data.extend_from_slice(b"more garbage\n");
        data.extend_from_slice(line(3, "c").as_bytes());

        let mut s = seeker(&data, 4);
        let b = s.seek(ts(2), SeekDirection::AtOrAfter).expect("seek");
        assert_eq!(message_at(&data, b.resolved_offset), "b");

        let b = s.seek(ts(2), SeekDirection::AtOrBefore).expect("seek");
        assert_eq!(message_at(&data, b.resolved_offset), "b");
    }

    #[test]
    fn fully_unparseable_file_is_not_found() {
        let data = b"nothing\nto\nsee\n";
        let mut s = seeker(data, 4);
        assert!(!s.seek(ts(1), SeekDirection::AtOrAfter).expect("seek").found);
        assert!(!s.seek(ts(1), SeekDirection::AtOrBefore).expect("seek").found);
    }

    #[test]
    fn leading_garbage_stays_in_range() {
        let mut data = b"garbage one\ngarbage two\n".to_vec();
        data.extend_from_slice(&file_of(&[1, 2]));
        let mut s = seeker(&data, 4);

        let b = s.seek(ts(0), SeekDirection::AtOrAfter).expect("seek");
        assert!(b.found);
        assert_eq!(b.resolved_offset, 0);

        // Once a record precedes the target the offset is exact again.
        let b = s.seek(ts(2), SeekDirection::AtOrAfter).expect("seek");
        assert_eq!(message_at(&data, b.resolved_offset), "line-1");
    }

    #[test]
    fn not_found_stops_before_unterminated_tail() {
        let mut data = file_of(&[1, 2]);
        let complete = data.len() as u64;
        data.extend_from_slice(line(3, "tail").trim_end().as_bytes());

        let b = seeker(&data, 8).seek(ts(30), SeekDirection::AtOrAfter).expect("seek");
        assert!(!b.found);
        assert_eq!(b.resolved_offset, complete);
    }

    #[test]
    fn last_line_without_newline_counts() {
        let mut data = file_of(&[1, 2]);
        data.extend_from_slice(line(3, "tail").trim_end().as_bytes());
        let b = seeker(&data, 8).seek(ts(3), SeekDirection::AtOrAfter).expect("seek");
        assert!(b.found);
        assert_eq!(message_at(&data, b.resolved_offset), "tail");
    }

    #[test]
    fn seek_is_idempotent() {
        let data = file_of(&[1, 1, 4, 9, 9, 9, 12]);
        let mut s = seeker(&data, 7);
        let first = s.seek(ts(9), SeekDirection::AtOrAfter).expect("seek");
        for _ in 0..3 {
            assert_eq!(s.seek(ts(9), SeekDirection::AtOrAfter).expect("seek"), first);
        }
    }

    #[test]
    fn open_missing_file_reports_not_found() {
        let result = BoundarySeeker::open("/definitely/not/here.log", 1024);
        assert!(matches!(result, Err(SeekError::NotFound(_))));
    }

    proptest! {
        #[test]
        fn seek_agrees_with_linear_scan(
            mut seconds in proptest::collection::vec(0u32..60, 0..40),
            target in 0u32..60,
            chunk in 1usize..64,
        ) {
            seconds.sort_unstable();
            let data = file_of(&seconds);
            let mut s = seeker(&data, chunk);

            let after = s.seek(ts(target), SeekDirection::AtOrAfter).expect("seek");
            match seconds.iter().position(|sec| *sec >= target) {
                Some(idx) => {
                    prop_assert!(after.found);
                    prop_assert_eq!(message_at(&data, after.resolved_offset), format!("line-{idx}"));
                }
                None => prop_assert!(!after.found),
            }

            let before = s.seek(ts(target), SeekDirection::AtOrBefore).expect("seek");
            match seconds.iter().rposition(|sec| *sec <= target) {
                Some(idx) => {
                    prop_assert!(before.found);
                    prop_assert_eq!(message_at(&data, before.resolved_offset), format!("line-{idx}"));
                }
                None => prop_assert!(!before.found),
            }
        }
    }
}

//! Chunked line readers over seekable byte sources.
//!
//! Both readers keep one reusable buffer and never hold more than a chunk
//! plus the longest line in memory. Returned lines exclude the `\n`
//! terminator and a trailing `\r`.

use std::io::{self, Read, Seek, SeekFrom};

use memchr::{memchr, memrchr};

/// A line borrowed from a reader's buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Line<'a> {
    /// File offset of the first byte of the line.
    pub offset: u64,
    /// File offset just past the line terminator.
    pub end: u64,
    /// Line content.
    pub bytes: &'a [u8],
}

fn trim_cr(bytes: &[u8]) -> &[u8] {
    bytes.strip_suffix(b"\r").unwrap_or(bytes)
}

/// Reads until `buf` is full or the source reports end of file.
fn read_full<R: Read>(inner: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match inner.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Sequential line reader that can keep reading after hitting end of file,
/// which is what follow mode needs.
pub(crate) struct ForwardLines<R> {
    inner: R,
    chunk_size: usize,
    buf: Vec<u8>,
    /// File offset of `buf[0]`.
    buf_start: u64,
    /// Bytes of `buf` already handed out.
    pos: usize,
}

impl<R: Read + Seek> ForwardLines<R> {
    pub fn new(inner: R, offset: u64, chunk_size: usize) -> Self {
        Self {
            inner,
            chunk_size: chunk_size.max(1),
            buf: Vec::with_capacity(chunk_size),
            buf_start: offset,
            pos: 0,
        }
    }

    /// Offset of the next unread line.
    pub fn offset(&self) -> u64 {
        self.buf_start + self.pos as u64
    }

    /// Offset up to which the source has been read, including any buffered
    /// unterminated tail.
    pub fn read_position(&self) -> u64 {
        self.buf_start + self.buf.len() as u64
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    /// Restarts reading at `offset`, keeping the buffer allocation.
    pub fn reset(&mut self, offset: u64) {
        self.buf.clear();
        self.buf_start = offset;
        self.pos = 0;
    }

    /// Returns the next newline-terminated line. With `include_unterminated`,
    /// bytes left after the last newline at end of file are returned as a
    /// final line; otherwise they stay buffered until a newline arrives.
    pub fn next_line(&mut self, include_unterminated: bool) -> io::Result<Option<Line<'_>>> {
        loop {
            if let Some(idx) = memchr(b'\n', &self.buf[self.pos..]) {
                let start = self.pos;
                let newline = start + idx;
                self.pos = newline + 1;
                return Ok(Some(Line {
                    offset: self.buf_start + start as u64,
                    end: self.buf_start + self.pos as u64,
                    bytes: trim_cr(&self.buf[start..newline]),
                }));
            }

            if self.fill()? == 0 {
                if include_unterminated && self.pos < self.buf.len() {
                    let start = self.pos;
                    self.pos = self.buf.len();
                    return Ok(Some(Line {
                        offset: self.buf_start + start as u64,
                        end: self.buf_start + self.pos as u64,
                        bytes: trim_cr(&self.buf[start..]),
                    }));
                }
                return Ok(None);
            }
        }
    }

    /// Appends one chunk read from the source, dropping consumed bytes first.
    fn fill(&mut self) -> io::Result<usize> {
        if self.pos > 0 {
            self.buf.drain(..self.pos);
            self.buf_start += self.pos as u64;
            self.pos = 0;
        }

        let old_len = self.buf.len();
        self.inner
            .seek(SeekFrom::Start(self.buf_start + old_len as u64))?;
        self.buf.resize(old_len + self.chunk_size, 0);
        let read = read_full(&mut self.inner, &mut self.buf[old_len..]);
        let n = match read {
            Ok(n) => n,
            Err(e) => {
                self.buf.truncate(old_len);
                return Err(e);
            }
        };
        self.buf.truncate(old_len + n);
        tracing::trace!(offset = self.buf_start + old_len as u64, bytes = n, "read forward chunk");
        Ok(n)
    }
}

/// Line reader walking a source from an end offset toward its start.
///
/// The buffer holds the freshly read chunk followed by the carried-over
/// head of the previous chunk, i.e. the tail of a line whose start lies
/// further back.
pub(crate) struct ReverseLines<R> {
    inner: R,
    chunk_size: usize,
    buf: Vec<u8>,
    /// File offset of `buf[0]`.
    buf_start: u64,
    /// Leading bytes of `buf` that belong to a line starting before `buf_start`.
    head_len: usize,
    /// Lines at or after this buffer index have been handed out.
    cursor: usize,
}

impl<R: Read + Seek> ReverseLines<R> {
    /// Creates a reader yielding lines that end at or before `end`, which
    /// must be a line boundary.
    pub fn new(inner: R, end: u64, chunk_size: usize) -> Self {
        Self {
            inner,
            chunk_size: chunk_size.max(1),
            buf: Vec::with_capacity(chunk_size),
            buf_start: end,
            head_len: 0,
            cursor: 0,
        }
    }

    /// Start of the last line handed out, i.e. the exclusive end of
    /// everything not yet read.
    pub fn offset(&self) -> u64 {
        self.buf_start + self.cursor as u64
    }

    /// Returns the line preceding the previous one, or `None` at offset 0.
    pub fn next_line(&mut self) -> io::Result<Option<Line<'_>>> {
        loop {
            if self.cursor > self.head_len {
                let end = self.cursor;
                let content_end = if self.buf[end - 1] == b'\n' { end - 1 } else { end };
                let start = memrchr(b'\n', &self.buf[self.head_len..content_end])
                    .map_or(self.head_len, |idx| self.head_len + idx + 1);
                self.cursor = start;
                return Ok(Some(Line {
                    offset: self.buf_start + start as u64,
                    end: self.buf_start + end as u64,
                    bytes: trim_cr(&self.buf[start..content_end]),
                }));
            }

            if self.buf_start == 0 {
                return Ok(None);
            }
            self.load_previous()?;
        }
    }

    /// Reads the chunk before `buf_start`, keeping the carried head behind it.
    fn load_previous(&mut self) -> io::Result<()> {
        let carry = self.head_len;
        self.buf.truncate(carry);

        let read_len = self.buf_start.min(self.chunk_size as u64) as usize;
        let new_start = self.buf_start - read_len as u64;
        self.buf.resize(carry + read_len, 0);
        self.buf.copy_within(0..carry, read_len);

        self.inner.seek(SeekFrom::Start(new_start))?;
        self.inner.read_exact(&mut self.buf[..read_len])?;

        self.buf_start = new_start;
        self.cursor = self.buf.len();
        self.head_len = if new_start == 0 {
            0
        } else {
            memchr(b'\n', &self.buf).map_or(self.buf.len(), |idx| idx + 1)
        };
        tracing::trace!(offset = new_start, bytes = read_len, carry, "read backward chunk");
        Ok(())
    }
}

/// Finds the start of the line containing byte `pos`, never going below
/// `floor` (which must itself be a line start).
pub(crate) fn line_start_before<R: Read + Seek>(
    inner: &mut R,
    pos: u64,
    floor: u64,
    chunk_size: usize,
    scratch: &mut Vec<u8>,
) -> io::Result<u64> {
    let mut end = pos;
    while end > floor {
        let start = end.saturating_sub(chunk_size.max(1) as u64).max(floor);
        scratch.resize((end - start) as usize, 0);
        inner.seek(SeekFrom::Start(start))?;
        inner.read_exact(scratch)?;
        if let Some(idx) = memrchr(b'\n', scratch) {
            return Ok(start + idx as u64 + 1);
        }
        end = start;
    }
    Ok(floor)
}

/// Returns the offset just past the line starting at `offset`.
pub(crate) fn line_end_at<R: Read + Seek>(inner: R, offset: u64, chunk_size: usize) -> io::Result<u64> {
    let mut lines = ForwardLines::new(inner, offset, chunk_size);
    Ok(lines.next_line(true)?.map_or(offset, |line| line.end))
}

/// Whether `offset` sits at the start of a line.
pub(crate) fn is_line_start<R: Read + Seek>(inner: &mut R, offset: u64) -> io::Result<bool> {
    if offset == 0 {
        return Ok(true);
    }
    let mut byte = [0u8; 1];
    inner.seek(SeekFrom::Start(offset - 1))?;
    inner.read_exact(&mut byte)?;
    Ok(byte[0] == b'\n')
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Cursor as IoCursor;

    fn forward_all(data: &[u8], chunk: usize, include_unterminated: bool) -> Vec<(u64, Vec<u8>)> {
        let mut reader = ForwardLines::new(IoCursor::new(data), 0, chunk);
        let mut out = Vec::new();
        while let Some(line) = reader.next_line(include_unterminated).expect("read") {
            out.push((line.offset, line.bytes.to_vec()));
        }
        out
    }

    fn reverse_all(data: &[u8], end: u64, chunk: usize) -> Vec<(u64, Vec<u8>)> {
        let mut reader = ReverseLines::new(IoCursor::new(data), end, chunk);
        let mut out = Vec::new();
        while let Some(line) = reader.next_line().expect("read") {
            out.push((line.offset, line.bytes.to_vec()));
        }
        out
    }

    #[test]
    fn forward_splits_lines_across_tiny_chunks() {
        let lines = forward_all(b"alpha\nbeta\r\ngamma\n", 3, false);
        assert_eq!(
            lines,
            vec![
                (0, b"alpha".to_vec()),
                (6, b"beta".to_vec()),
                (12, b"gamma".to_vec()),
            ]
        );
    }

    #[test]
    fn forward_holds_unterminated_tail_unless_asked() {
        assert_eq!(forward_all(b"a\nb", 4, false), vec![(0, b"a".to_vec())]);
        assert_eq!(
            forward_all(b"a\nb", 4, true),
            vec![(0, b"a".to_vec()), (2, b"b".to_vec())]
        );
    }

    #[test]
    fn forward_offset_points_at_unterminated_tail() {
        let mut reader = ForwardLines::new(IoCursor::new(&b"a\nbc"[..]), 0, 2);
        assert!(reader.next_line(false).expect("read").is_some());
        assert!(reader.next_line(false).expect("read").is_none());
        assert_eq!(reader.offset(), 2);
        assert_eq!(reader.read_position(), 4);
    }

    #[test]
    fn forward_resumes_after_source_grows() {
        let mut data = b"one\ntw".to_vec();
        let mut reader = ForwardLines::new(IoCursor::new(data.clone()), 0, 4);
        assert_eq!(reader.next_line(false).expect("read").map(|l| l.offset), Some(0));
        assert!(reader.next_line(false).expect("read").is_none());

        data.extend_from_slice(b"o\nthree\n");
        *reader.get_mut() = IoCursor::new(data);
        let second = reader.next_line(false).expect("read").map(|l| (l.offset, l.bytes.to_vec()));
        assert_eq!(second, Some((4, b"two".to_vec())));
        let third = reader.next_line(false).expect("read").map(|l| l.offset);
        assert_eq!(third, Some(8));
    }

    #[test]
    fn reverse_yields_lines_newest_first() {
        let data = b"alpha\nbeta\ngamma\n";
        let lines = reverse_all(data, data.len() as u64, 4);
        assert_eq!(
            lines,
            vec![
                (11, b"gamma".to_vec()),
                (6, b"beta".to_vec()),
                (0, b"alpha".to_vec()),
            ]
        );
    }

    #[test]
    fn reverse_handles_unterminated_last_line_and_blank_lines() {
        let data = b"a\n\nb";
        let lines = reverse_all(data, data.len() as u64, 2);
        assert_eq!(
            lines,
            vec![(3, b"b".to_vec()), (2, b"".to_vec()), (0, b"a".to_vec())]
        );
    }

    #[test]
    fn reverse_from_middle_boundary() {
        let data = b"alpha\nbeta\ngamma\n";
        let lines = reverse_all(data, 11, 5);
        assert_eq!(lines, vec![(6, b"beta".to_vec()), (0, b"alpha".to_vec())]);
    }

    #[test]
    fn reverse_empty_source() {
        assert!(reverse_all(b"", 0, 8).is_empty());
    }

    #[test]
    fn reverse_offset_tracks_consumption() {
        let data = b"aa\nbb\n";
        let mut reader = ReverseLines::new(IoCursor::new(&data[..]), 6, 16);
        assert_eq!(reader.offset(), 6);
        assert!(reader.next_line().expect("read").is_some());
        assert_eq!(reader.offset(), 3);
        assert!(reader.next_line().expect("read").is_some());
        assert_eq!(reader.offset(), 0);
        assert!(reader.next_line().expect("read").is_none());
    }

    #[test]
    fn line_start_before_finds_containing_line() {
        let data = b"alpha\nbeta\ngamma\n";
        let mut src = IoCursor::new(&data[..]);
        let mut scratch = Vec::new();
        assert_eq!(line_start_before(&mut src, 8, 0, 2, &mut scratch).expect("read"), 6);
        assert_eq!(line_start_before(&mut src, 6, 0, 2, &mut scratch).expect("read"), 6);
        assert_eq!(line_start_before(&mut src, 3, 0, 2, &mut scratch).expect("read"), 0);
        assert_eq!(line_start_before(&mut src, 14, 11, 2, &mut scratch).expect("read"), 11);
    }

    #[test]
    fn line_end_and_alignment_helpers() {
        let data = b"alpha\nbeta\ngam";
        assert_eq!(line_end_at(IoCursor::new(&data[..]), 6, 3).expect("read"), 11);
        assert_eq!(line_end_at(IoCursor::new(&data[..]), 11, 3).expect("read"), 14);

        let mut src = IoCursor::new(&data[..]);
        assert!(is_line_start(&mut src, 0).expect("read"));
        assert!(is_line_start(&mut src, 6).expect("read"));
        assert!(!is_line_start(&mut src, 7).expect("read"));
    }

    proptest! {
        #[test]
        fn reverse_is_forward_reversed(
            lines in proptest::collection::vec("[a-z]{0,12}", 0..24),
            trailing_newline in any::<bool>(),
            chunk in 1usize..32,
        ) {
            let mut data = lines.join("\n").into_bytes();
            if trailing_newline && !lines.is_empty() {
                data.push(b'\n');
            }
            let mut forward = forward_all(&data, chunk, true);
            forward.reverse();
            let backward = reverse_all(&data, data.len() as u64, chunk);
            prop_assert_eq!(forward, backward);
        }
    }
}

/*
 * evtcp - reactor-driven TcpServer/TcpChannel with handler-chain dispatch
 * This is free and unencumbered software released into the public domain.
 */
use std::io::{Read, Result as IoResult, Write};

const DEFAULT_CAPACITY: usize = 1024;

/// A growable segmented byte accumulator with independent read/write cursors
///
/// `evtcp_rs::Buffer` stores bytes in a sequence of fixed-capacity segments.
/// Writing past the end of the current segment appends a new one sized
/// `first_segment_len * 2^(segment_count)`, so the number of allocations
/// stays logarithmic in the message size while small messages never grow
/// beyond their first segment. Fully-consumed leading segments are reclaimed
/// automatically after every read-cursor advance.
///
/// [`readable_bytes()`](Buffer::readable_bytes) and
/// [`writable_bytes()`](Buffer::writable_bytes) report the *current* segment
/// only: together with [`view_for_read()`](Buffer::view_for_read) and
/// [`view_for_write()`](Buffer::view_for_write) they hand one contiguous
/// region at a time to vectorless socket calls. Code that reads or writes
/// through a view must advance the matching cursor afterwards via
/// [`advance_read_position()`](Buffer::advance_read_position) /
/// [`advance_write_position()`](Buffer::advance_write_position).
///
/// [`mark()`](Buffer::mark) checkpoints the read cursor so a handler can
/// peek at data – e.g. to detect a not-yet-complete frame – and
/// [`reset()`](Buffer::reset) rewinds to the checkpoint. While a mark is
/// set, segment reclamation is suppressed so the checkpoint stays valid;
/// call [`unmark()`](Buffer::unmark) promptly, or retention is unbounded.
///
/// There is **no** upper bound on growth: a writer that outpaces the
/// drain – sustained backpressure – grows the buffer without limit. Callers
/// that need a bound must enforce it themselves.
#[derive(Debug)]
pub struct Buffer {
    segments: Vec<Vec<u8>>,
    read: Cursor,
    write: Cursor,
    mark: Option<Cursor>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct Cursor {
    segment: usize,
    offset: usize,
}

impl Buffer {
    /// Creates a buffer with a 1024-byte first segment.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Creates a buffer whose first segment holds `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "segment capacity must be non-zero");
        Self {
            segments: vec![vec![0; capacity]],
            read: Cursor::default(),
            write: Cursor::default(),
            mark: None,
        }
    }

    /// Returns `true` if at least one unread byte exists.
    pub fn readable(&self) -> bool {
        (self.read.segment < self.write.segment) || (self.read.offset < self.write.offset)
    }

    /// Number of bytes that can be read from the current segment in one go.
    pub fn readable_bytes(&self) -> usize {
        if self.read.segment == self.write.segment {
            self.write.offset - self.read.offset
        } else {
            self.segments[self.read.segment].len() - self.read.offset
        }
    }

    /// Number of bytes that fit into the current write segment in one go.
    pub fn writable_bytes(&self) -> usize {
        self.segments[self.write.segment].len() - self.write.offset
    }

    /// Reads the next byte, or `None` if the buffer is empty.
    pub fn read(&mut self) -> Option<u8> {
        if !self.readable() {
            return None;
        }
        let byte = self.segments[self.read.segment][self.read.offset];
        self.post_read(1);
        Some(byte)
    }

    /// Appends a single byte, growing the buffer if the current segment is
    /// exhausted.
    pub fn write(&mut self, byte: u8) {
        self.view_for_write()[0] = byte;
        self.advance_write(1, true);
    }

    /// Appends a whole slice, growing the buffer as needed.
    pub fn write_slice(&mut self, mut data: &[u8]) {
        while !data.is_empty() {
            let view = self.view_for_write();
            let count = view.len().min(data.len());
            view[..count].copy_from_slice(&data[..count]);
            self.advance_write(count, true);
            data = &data[count..];
        }
    }

    /// Transfers bytes from `other` into this buffer without allocating.
    ///
    /// Copies `min(other.readable_bytes(), self.writable_bytes())` bytes at a
    /// time, advancing both cursors, until `other` is drained or this buffer
    /// has no capacity left. `other` may be left partially drained; callers
    /// must pre-size this buffer or tolerate the partial transfer.
    pub fn write_from(&mut self, other: &mut Buffer) {
        loop {
            let count = other.readable_bytes().min(self.writable_bytes());
            if count == 0 {
                break;
            }
            let source = &other.segments[other.read.segment]
                [other.read.offset..other.read.offset + count];
            let offset = self.write.offset;
            self.segments[self.write.segment][offset..offset + count].copy_from_slice(source);
            other.post_read(count);
            self.advance_write(count, false);
        }
    }

    /// Exposes the unread region of the current segment.
    pub fn view_for_read(&self) -> &[u8] {
        let count = self.readable_bytes();
        &self.segments[self.read.segment][self.read.offset..self.read.offset + count]
    }

    /// Exposes the unwritten region of the current segment, rolling to a
    /// fresh segment first if the current one is exhausted. The returned
    /// slice is never empty.
    pub fn view_for_write(&mut self) -> &mut [u8] {
        if self.writable_bytes() == 0 {
            self.advance_write(0, true);
        }
        let offset = self.write.offset;
        &mut self.segments[self.write.segment][offset..]
    }

    /// Advances the read cursor after data was consumed directly from a
    /// [`view_for_read()`](Buffer::view_for_read) slice.
    pub fn advance_read_position(&mut self, count: usize) {
        self.post_read(count);
    }

    /// Advances the write cursor after data was stored directly into a
    /// [`view_for_write()`](Buffer::view_for_write) slice. Returns `true`
    /// if the advance crossed into a fresh segment.
    pub fn advance_write_position(&mut self, count: usize) -> bool {
        self.advance_write(count, true)
    }

    /// Snapshots the read cursor so [`reset()`](Buffer::reset) can rewind
    /// to it. Segment reclamation is suppressed until the mark is released.
    pub fn mark(&mut self) {
        self.mark = Some(self.read);
    }

    /// Releases the mark and performs the compaction that was suppressed
    /// while it was set.
    pub fn unmark(&mut self) {
        self.mark = None;
        self.compact();
    }

    /// Rewinds the read cursor to the marked position and releases the mark.
    pub fn reset(&mut self) {
        if let Some(mark) = self.mark {
            self.read = mark;
            self.unmark();
        }
    }

    pub fn marked(&self) -> bool {
        self.mark.is_some()
    }

    /// Resets both cursors and drops every segment but the first.
    pub fn clear(&mut self) {
        self.read = Cursor::default();
        self.write = Cursor::default();
        self.mark = None;
        self.segments.truncate(1);
    }

    /// Advances the write cursor by `count` bytes, which must fit into the
    /// current segment. When the segment is exhausted the cursor rolls over:
    /// with `allocate` a fresh segment is appended if none exists, otherwise
    /// the cursor parks at the segment end and `writable_bytes()` drops to
    /// zero until an allocating write rolls it forward.
    fn advance_write(&mut self, count: usize, allocate: bool) -> bool {
        debug_assert!(count <= self.writable_bytes());
        self.write.offset += count;
        let exhausted = self.write.offset >= self.segments[self.write.segment].len();
        if exhausted && (allocate || self.write.segment + 1 < self.segments.len()) {
            self.write.segment += 1;
            if self.write.segment >= self.segments.len() {
                let grown = self.segments[0]
                    .len()
                    .checked_shl(self.segments.len() as u32)
                    .expect("Numerical overflow!");
                self.segments.push(vec![0; grown]);
            }
            self.write.offset = 0;
            return true;
        }
        false
    }

    /// Advances the read cursor by `count` bytes, crossing segment
    /// boundaries as needed, then reclaims fully-consumed segments.
    fn post_read(&mut self, mut count: usize) {
        while count > 0 {
            let segment_len = self.segments[self.read.segment].len();
            let step = (segment_len - self.read.offset).min(count);
            debug_assert!(step > 0, "read cursor advanced beyond written data");
            count -= step;
            self.read.offset += step;
            if self.read.offset >= segment_len && self.read.segment < self.write.segment {
                self.read.segment += 1;
                self.read.offset = 0;
            }
        }
        self.compact();
    }

    /// Reclaims memory: a fully-drained buffer collapses back to its first
    /// segment; otherwise fully-consumed leading segments are shifted out so
    /// the read cursor's segment becomes index 0. No-op while marked.
    fn compact(&mut self) {
        if self.mark.is_some() {
            return;
        }
        if !self.readable() {
            self.clear();
        } else if self.read.segment > 0 {
            self.segments.drain(..self.read.segment);
            self.write.segment -= self.read.segment;
            self.read.segment = 0;
            self.segments.truncate(self.write.segment + 1);
        }
    }
}

impl Default for Buffer {
    fn default() -> Self {
        Self::new()
    }
}

impl Read for Buffer {
    fn read(&mut self, buf: &mut [u8]) -> IoResult<usize> {
        let mut total = 0;
        while total < buf.len() && self.readable() {
            let view = self.view_for_read();
            let count = view.len().min(buf.len() - total);
            buf[total..total + count].copy_from_slice(&view[..count]);
            self.advance_read_position(count);
            total += count;
        }
        Ok(total)
    }
}

impl Write for Buffer {
    fn write(&mut self, buf: &[u8]) -> IoResult<usize> {
        self.write_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> IoResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};

    #[test]
    fn round_trip_within_first_segment() {
        let mut buffer = Buffer::with_capacity(16);
        for byte in b"hello world" {
            buffer.write(*byte);
        }
        let mut output = Vec::new();
        while let Some(byte) = buffer.read() {
            output.push(byte);
        }
        assert_eq!(output, b"hello world");
        assert!(!buffer.readable());
        assert_eq!(buffer.readable_bytes(), 0);
    }

    #[test]
    fn empty_buffer_reads_nothing() {
        let mut buffer = Buffer::with_capacity(8);
        assert_eq!(buffer.read(), None);
        assert!(buffer.view_for_read().is_empty());
    }

    #[test]
    fn growth_doubles_the_next_segment() {
        let mut buffer = Buffer::with_capacity(8);
        buffer.write_slice(b"01234567");
        // first segment is exhausted, the appended one holds twice as much
        assert_eq!(buffer.writable_bytes(), 16);
        buffer.write_slice(b"89abcdef");
        let mut output = Vec::new();
        buffer.read_to_end(&mut output).unwrap();
        assert_eq!(output, b"0123456789abcdef");
    }

    #[test]
    fn write_advance_reports_segment_crossing() {
        let mut buffer = Buffer::with_capacity(4);
        assert!(!buffer.advance_write_position(3));
        assert!(buffer.advance_write_position(1));
    }

    #[test]
    fn drained_buffer_collapses_to_first_segment() {
        let mut buffer = Buffer::with_capacity(4);
        buffer.write_slice(b"abcdefgh");
        let mut output = vec![0; 8];
        buffer.read_exact(&mut output).unwrap();
        assert_eq!(&output, b"abcdefgh");
        // consumed segments are gone and the cursors are back at zero; the
        // surviving segment is the grown eight-byte one
        assert_eq!(buffer.writable_bytes(), 8);
        buffer.write_slice(b"wxyz");
        assert_eq!(buffer.view_for_read(), b"wxyz");
    }

    #[test]
    fn mark_and_reset_restore_the_read_cursor() {
        let mut buffer = Buffer::with_capacity(4);
        buffer.write_slice(b"abcdefgh");
        buffer.mark();
        for expected in b"abcdef" {
            assert_eq!(buffer.read(), Some(*expected));
        }
        buffer.reset();
        assert!(!buffer.marked());
        assert_eq!(buffer.read(), Some(b'a'));
    }

    #[test]
    fn compaction_is_suppressed_while_marked() {
        let mut buffer = Buffer::with_capacity(4);
        buffer.write_slice(b"abcdefgh");
        buffer.mark();
        // consume past the first segment; it must survive for the mark
        for _ in 0..6 {
            buffer.read();
        }
        buffer.reset();
        assert_eq!(buffer.read(), Some(b'a'));
        assert_eq!(buffer.read(), Some(b'b'));
    }

    #[test]
    fn unmark_compacts_consumed_segments() {
        let mut buffer = Buffer::with_capacity(4);
        buffer.write_slice(b"abcdefgh");
        buffer.mark();
        for _ in 0..4 {
            buffer.read();
        }
        buffer.unmark();
        // the first segment was reclaimed, the eight-byte one remains
        assert_eq!(buffer.writable_bytes(), 4);
        assert_eq!(buffer.read(), Some(b'e'));
    }

    #[test]
    fn write_from_transfers_without_allocating() {
        let mut source = Buffer::with_capacity(4);
        source.write_slice(b"abcdef");
        let mut target = Buffer::with_capacity(4);
        target.write_from(&mut source);
        assert_eq!(target.writable_bytes(), 0);
        assert_eq!(source.view_for_read(), b"ef");
        let mut received = Vec::new();
        target.read_to_end(&mut received).unwrap();
        assert_eq!(received, b"abcd");
    }

    #[test]
    fn allocating_write_resumes_after_full_transfer() {
        let mut source = Buffer::with_capacity(4);
        source.write_slice(b"abcd");
        let mut target = Buffer::with_capacity(4);
        target.write_from(&mut source);
        assert_eq!(target.writable_bytes(), 0);
        target.write(b'x');
        let mut received = Vec::new();
        target.read_to_end(&mut received).unwrap();
        assert_eq!(received, b"abcdx");
    }

    #[test]
    fn clear_drops_everything() {
        let mut buffer = Buffer::with_capacity(4);
        buffer.write_slice(b"abcdefgh");
        buffer.mark();
        buffer.clear();
        assert!(!buffer.readable());
        assert!(!buffer.marked());
        assert_eq!(buffer.writable_bytes(), 4);
    }

    #[test]
    fn io_traits_move_whole_slices() {
        let mut buffer = Buffer::with_capacity(8);
        buffer.write_all(b"segmented bytes").unwrap();
        let mut output = String::new();
        buffer.read_to_string(&mut output).unwrap();
        assert_eq!(output, "segmented bytes");
    }
}

//! Sparse map algebra and payload overlays.
//!
//! A [`SparseEntry`] is an `(offset, length)` pair in bytes. A `Vec<SparseEntry>`
//! represents either the *data fragments* view (physically present bytes,
//! internal) or the *hole fragments* view (zero-filled gaps, external/wire).

use std::io::{self, Read, Write};

use crate::error::SparseError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SparseEntry {
    pub offset: u64,
    pub length: u64,
}

impl SparseEntry {
    #[must_use]
    pub fn end(&self) -> Option<u64> {
        self.offset.checked_add(self.length)
    }
}

/// Rejects negative/overflowing/overlapping/out-of-order entries, or ones
/// that extend past the logical `size`.
pub fn validate(entries: &[SparseEntry], size: u64) -> Result<(), SparseError> {
    let mut prev_end: u64 = 0;
    for (i, e) in entries.iter().enumerate() {
        let end = e.end().ok_or(SparseError::Overflow)?;
        if end > size {
            return Err(SparseError::PastEnd { size });
        }
        if i > 0 && e.offset < prev_end {
            return Err(SparseError::OutOfOrder);
        }
        prev_end = end;
    }
    Ok(())
}

/// Rounds each fragment's start up and end down to 512-byte boundaries,
/// dropping fragments that collapse to empty. Only the final fragment's end
/// may equal `size` without being rounded down.
#[must_use]
pub fn align(entries: &[SparseEntry], size: u64) -> Vec<SparseEntry> {
    const BLOCK: u64 = 512;
    let round_up = |x: u64| (x + BLOCK - 1) / BLOCK * BLOCK;
    let round_down = |x: u64| x / BLOCK * BLOCK;

    let mut out = Vec::with_capacity(entries.len());
    for (i, e) in entries.iter().enumerate() {
        let Some(raw_end) = e.end() else { continue };
        let start = round_up(e.offset);
        let end = if i == entries.len() - 1 && raw_end == size {
            raw_end
        } else {
            round_down(raw_end)
        };
        if end > start {
            out.push(SparseEntry {
                offset: start,
                length: end - start,
            });
        }
    }
    out
}

/// Produces the complement map: the gaps between `entries`, always ending
/// with a (possibly empty) fragment whose end equals `size`. Adjacent
/// fragments are coalesced. Data fragments invert to hole fragments and
/// vice versa.
#[must_use]
pub fn invert(entries: &[SparseEntry], size: u64) -> Vec<SparseEntry> {
    let mut out = Vec::new();
    let mut prev_end: u64 = 0;
    for e in entries {
        if e.offset > prev_end {
            out.push(SparseEntry {
                offset: prev_end,
                length: e.offset - prev_end,
            });
        }
        prev_end = prev_end.max(e.end().unwrap_or(prev_end));
    }
    out.push(SparseEntry {
        offset: prev_end,
        length: size - prev_end,
    });
    out
}

/// Presents a continuous `size`-byte logical stream over an underlying
/// physical-data reader, given the *hole* fragments. Holes read back as
/// zero bytes; everything else is passed through from `inner`.
pub struct SparseReader<R> {
    inner: R,
    holes: Vec<SparseEntry>,
    hole_index: usize,
    pos: u64,
    size: u64,
    physical_remaining: u64,
}

impl<R: Read> SparseReader<R> {
    pub fn new(inner: R, holes: Vec<SparseEntry>, size: u64, physical_remaining: u64) -> Self {
        Self {
            inner,
            holes,
            hole_index: 0,
            pos: 0,
            size,
            physical_remaining,
        }
    }

    fn current_hole(&mut self) -> Option<SparseEntry> {
        while let Some(h) = self.holes.get(self.hole_index) {
            let end = h.end().unwrap_or(h.offset);
            if self.pos >= end {
                self.hole_index += 1;
                continue;
            }
            return Some(*h);
        }
        None
    }
}

impl<R: Read> Read for SparseReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos >= self.size {
            if self.physical_remaining != 0 {
                return Err(io::Error::new(io::ErrorKind::InvalidData, SparseError::UnreferencedData));
            }
            return Ok(0);
        }
        let logical_remaining = self.size - self.pos;
        let want = buf.len().min(logical_remaining as usize);
        if want == 0 {
            return Ok(0);
        }

        if let Some(hole) = self.current_hole() {
            if self.pos >= hole.offset {
                let hole_end = hole.end().unwrap();
                let n = want.min((hole_end - self.pos) as usize);
                buf[..n].fill(0);
                self.pos += n as u64;
                return Ok(n);
            }
            // Data region up to the next hole's start.
            let n = want.min((hole.offset - self.pos) as usize);
            self.read_data(buf, n)
        } else {
            self.read_data(buf, want)
        }
    }
}

impl<R: Read> SparseReader<R> {
    fn read_data(&mut self, buf: &mut [u8], want: usize) -> io::Result<usize> {
        if want == 0 {
            return Ok(0);
        }
        let n = self.inner.read(&mut buf[..want])?;
        if n == 0 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, SparseError::NonExistentData));
        }
        self.pos += n as u64;
        self.physical_remaining = self.physical_remaining.saturating_sub(n as u64);
        Ok(n)
    }
}

/// Accepts up to `size` logical bytes, given the *data* fragments, forwarding
/// bytes that fall in a data fragment to `inner` and discarding (but
/// counting) bytes that fall in a hole.
pub struct SparseWriter<W> {
    inner: W,
    data: Vec<SparseEntry>,
    data_index: usize,
    pos: u64,
    size: u64,
}

impl<W: Write> SparseWriter<W> {
    pub fn new(inner: W, data: Vec<SparseEntry>, size: u64) -> Self {
        Self {
            inner,
            data,
            data_index: 0,
            pos: 0,
            size,
        }
    }

    fn in_data_fragment(&mut self) -> bool {
        while let Some(d) = self.data.get(self.data_index) {
            let end = d.end().unwrap_or(d.offset);
            if self.pos >= end {
                self.data_index += 1;
                continue;
            }
            return self.pos >= d.offset;
        }
        false
    }

    fn next_boundary(&self) -> u64 {
        match self.data.get(self.data_index) {
            Some(d) if self.pos < d.offset => d.offset,
            Some(d) => d.end().unwrap_or(self.size),
            None => self.size,
        }
    }
}

impl<W: Write> Write for SparseWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.pos >= self.size || buf.is_empty() {
            return Ok(0);
        }
        let in_data = self.in_data_fragment();
        let boundary = self.next_boundary().min(self.size);
        let want = buf.len().min((boundary - self.pos) as usize);
        if want == 0 {
            return Ok(0);
        }
        if in_data {
            let n = self.inner.write(&buf[..want])?;
            self.pos += n as u64;
            Ok(n)
        } else {
            self.pos += want as u64;
            Ok(want)
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn e(offset: u64, length: u64) -> SparseEntry {
        SparseEntry { offset, length }
    }

    #[test]
    fn invert_is_involutive() {
        let data = vec![e(0, 2), e(10, 3), e(20, 5)];
        let size = 30;
        validate(&data, size).unwrap();
        let holes = invert(&data, size);
        let back = invert(&holes, size);
        // The inverse of the inverse should describe the same covered ranges
        // (holes collapse to exactly the original fragments plus possibly a
        // trailing empty one, which `align`-free invert also appends).
        let mut expected = data.clone();
        if expected.last().map(|d| d.end().unwrap()) != Some(size) {
            expected.push(e(size, 0));
        }
        assert_eq!(back, expected);
    }

    #[test]
    fn sparse_reader_fills_holes_with_zero() {
        let physical = b"abcdefgh".to_vec();
        let holes = vec![e(0, 2), e(7, 11), e(21, 4)];
        let size = 25;
        let mut reader = SparseReader::new(Cursor::new(physical), holes, size, 8);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out.len(), 25);
        assert_eq!(&out[0..2], b"\0\0");
        assert_eq!(&out[2..7], b"abcde");
        assert_eq!(&out[7..18], [0u8; 11]);
        assert_eq!(&out[18..21], b"fgh");
        assert_eq!(&out[21..25], [0u8; 4]);
    }

    #[test]
    fn sparse_writer_discards_holes() {
        let data = vec![e(2, 5), e(18, 3)];
        let size = 25;
        let mut dest = Vec::new();
        {
            let mut writer = SparseWriter::new(&mut dest, data, size);
            let logical = b"\0\0abcde\0\0\0\0\0\0\0\0\0\0\0\0fgh\0\0\0\0";
            assert_eq!(logical.len(), 25);
            let mut written = 0;
            while written < logical.len() {
                let n = writer.write(&logical[written..]).unwrap();
                assert!(n > 0);
                written += n;
            }
        }
        assert_eq!(dest, b"abcdefgh");
    }

    #[test]
    fn validate_rejects_overlap() {
        let bad = vec![e(0, 10), e(5, 10)];
        assert!(validate(&bad, 20).is_err());
    }

    #[test]
    fn validate_rejects_past_end() {
        let bad = vec![e(0, 10)];
        assert!(validate(&bad, 5).is_err());
    }

    #[test]
    fn align_drops_collapsed_fragments() {
        let entries = vec![e(10, 5), e(1000, 600)];
        let aligned = align(&entries, 2000);
        // First fragment [10,15) rounds to empty and is dropped.
        assert_eq!(aligned, vec![e(1024, 512)]);
    }
}

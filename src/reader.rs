//! Reader state machine: [`Reader::next_entry`] parses header and
//! meta-header blocks into a single logical [`Header`]; the reader itself
//! implements [`std::io::Read`] over the current entry's payload,
//! transparently applying the sparse overlay when the entry is sparse.

use std::collections::BTreeMap;
use std::io::{self, Read};

use log::{debug, trace, warn};

use crate::block::{
    self, field, BLOCK_SIZE, DEV_MAJOR, DEV_MINOR, FLAG, GID, GNAME, GNU_ACCESS_TIME, GNU_CHANGE_TIME, GNU_IS_EXTENDED,
    GNU_REAL_SIZE, GNU_SPARSE, LINK_NAME, MODE, MOD_TIME, NAME, SIZE, STAR_ACCESS_TIME, STAR_CHANGE_TIME, STAR_PREFIX,
    UID, UNAME, USTAR_PREFIX,
};
use crate::codec::{decode_numeric, decode_string};
use crate::error::{ChecksumError, Error, Result};
use crate::header::{Format, Header, Timestamp, TypeFlag};
use crate::limits::Limits;
use crate::pax::parse_pax_body;
use crate::sparse::{self, SparseEntry};

enum Payload {
    Done,
    Plain { remaining: u64 },
    Sparse { holes: Vec<SparseEntry>, hole_index: usize, pos: u64, size: u64, physical_remaining: u64 },
}

/// Parses a tar archive from an underlying synchronous, blocking `Read`.
pub struct Reader<R> {
    inner: R,
    limits: Limits,
    any_block_consumed: bool,
    pending_skip: u64,
    global_pax_records: BTreeMap<String, String>,
    local_pax_records: BTreeMap<String, String>,
    gnu_long_name: Option<String>,
    gnu_long_link: Option<String>,
    payload: Payload,
}

impl<R: Read> Reader<R> {
    #[must_use]
    pub fn new(inner: R) -> Self {
        Self::with_limits(inner, Limits::default())
    }

    #[must_use]
    pub fn with_limits(inner: R, limits: Limits) -> Self {
        Self {
            inner,
            limits,
            any_block_consumed: false,
            pending_skip: 0,
            global_pax_records: BTreeMap::new(),
            local_pax_records: BTreeMap::new(),
            gnu_long_name: None,
            gnu_long_link: None,
            payload: Payload::Done,
        }
    }

    /// Advances to the next real entry, absorbing any PAX/GNU meta-headers
    /// along the way. Returns `None` at the archive trailer.
    pub fn next_entry(&mut self) -> Result<Option<Header>> {
        loop {
            self.fold_unread_payload_into_skip();
            self.skip_pending()?;

            let mut block = [0u8; BLOCK_SIZE];
            self.inner.read_exact(&mut block)?;

            if block::is_zero_block(&block) {
                let mut second = [0u8; BLOCK_SIZE];
                self.inner.read_exact(&mut second)?;
                if block::is_zero_block(&second) {
                    return Ok(None);
                }
                return Err(Error::TruncatedTrailer);
            }

            let was_first = !self.any_block_consumed;
            self.any_block_consumed = true;

            let Some(format) = block::get_format(&block) else {
                if was_first {
                    warn!("first block failed checksum verification; treating archive as EOF");
                    return Ok(None);
                }
                let (unsigned, signed) = block::checksums(&block);
                let expected = decode_numeric(field(&block, crate::block::CHKSUM)).unwrap_or(0);
                return Err(Error::Checksum(ChecksumError::Mismatch {
                    expected: expected as u64,
                    computed: if expected == signed { signed as u64 } else { unsigned },
                }));
            };

            let mut header = parse_v7_fields(&block)?;
            header.format = format;
            apply_overlay(&mut header, &block, format);

            let flag = header.flag.unwrap_or(TypeFlag::Reg);

            match flag {
                TypeFlag::XHeader => {
                    let body = self.read_meta_body(header.size.max(0) as u64)?;
                    let parsed = parse_pax_body(&body, self.limits.max_pax_record_len)?;
                    debug!("absorbed PAX extended header with {} records", parsed.records.len());
                    self.local_pax_records.extend(parsed.records);
                },
                TypeFlag::XGlobalHeader => {
                    let body = self.read_meta_body(header.size.max(0) as u64)?;
                    let parsed = parse_pax_body(&body, self.limits.max_pax_record_len)?;
                    debug!("absorbed PAX global header with {} records", parsed.records.len());
                    self.global_pax_records.extend(parsed.records.clone());
                    let mut global_header = Header::new(TypeFlag::XGlobalHeader, header.name, 0);
                    global_header.format = Format::PAX;
                    global_header.pax_records = parsed.records;
                    self.payload = Payload::Done;
                    return Ok(Some(global_header));
                },
                TypeFlag::GnuLongName => {
                    let body = self.read_meta_body(header.size.max(0) as u64)?;
                    debug!("absorbed GNU long name meta-header");
                    self.gnu_long_name = Some(c_string(&body));
                },
                TypeFlag::GnuLongLink => {
                    let body = self.read_meta_body(header.size.max(0) as u64)?;
                    debug!("absorbed GNU long link meta-header");
                    self.gnu_long_link = Some(c_string(&body));
                },
                _ => {
                    self.finalize_entry(&mut header, flag, &block)?;
                    return Ok(Some(header));
                },
            }
        }
    }

    /// Reads the old-GNU sparse map: 4 `(offset, numbytes)` entries inline in
    /// the main header block, followed by chained 512-byte extension blocks
    /// (21 entries each) while `is_extended` stays set.
    fn parse_old_gnu_sparse(&mut self, block: &[u8; BLOCK_SIZE]) -> Result<Vec<SparseEntry>> {
        let mut entries = Vec::new();
        let sparse_field = field(block, GNU_SPARSE);
        for chunk in sparse_field.chunks(24) {
            read_sparse_pair(chunk, &mut entries)?;
        }
        let mut extended = block[GNU_IS_EXTENDED] != 0;
        while extended {
            let mut ext = [0u8; BLOCK_SIZE];
            self.inner.read_exact(&mut ext)?;
            self.any_block_consumed = true;
            for chunk in ext[..21 * 24].chunks(24) {
                read_sparse_pair(chunk, &mut entries)?;
            }
            extended = ext[21 * 24] != 0;
            if entries.len() > self.limits.max_sparse_entries {
                return Err(Error::TooManySparseEntries(entries.len()));
            }
        }
        Ok(entries)
    }

    /// Folds whatever of the current entry's payload the caller never read
    /// into `pending_skip`, so a caller that moves straight to the next
    /// entry without draining the current one still leaves the stream
    /// positioned at the next header block.
    fn fold_unread_payload_into_skip(&mut self) {
        let unread = match &self.payload {
            Payload::Done => 0,
            Payload::Plain { remaining } => *remaining,
            Payload::Sparse { physical_remaining, .. } => *physical_remaining,
        };
        self.pending_skip += unread;
        self.payload = Payload::Done;
    }

    fn skip_pending(&mut self) -> Result<()> {
        if self.pending_skip == 0 {
            return Ok(());
        }
        trace!("skipping {} bytes of unread payload and padding", self.pending_skip);
        let mut remaining = self.pending_skip;
        let mut scratch = [0u8; BLOCK_SIZE];
        while remaining > 0 {
            let want = remaining.min(BLOCK_SIZE as u64) as usize;
            self.inner.read_exact(&mut scratch[..want])?;
            remaining -= want as u64;
        }
        self.pending_skip = 0;
        Ok(())
    }

    fn read_meta_body(&mut self, size: u64) -> Result<Vec<u8>> {
        let mut body = vec![0u8; size as usize];
        self.inner.read_exact(&mut body)?;
        self.pending_skip = block::pad_len(size);
        self.skip_pending()?;
        Ok(body)
    }

    fn finalize_entry(&mut self, header: &mut Header, flag: TypeFlag, block: &[u8; BLOCK_SIZE]) -> Result<()> {
        if let Some(name) = self.gnu_long_name.take() {
            header.name = name;
        }
        if let Some(link) = self.gnu_long_link.take() {
            header.link_name = link;
        }

        let mut merged = self.global_pax_records.clone();
        merged.extend(self.local_pax_records.drain());
        apply_pax_overrides(header, &merged);

        if header.name.len() > self.limits.max_entry_name_len {
            return Err(Error::NameTooLong(header.name.len()));
        }

        if flag == TypeFlag::Reg && header.name.ends_with('/') {
            header.flag = Some(TypeFlag::Dir);
        }

        let physical_size = header.size.max(0) as u64;

        if flag == TypeFlag::GnuSparse {
            let entries = self.parse_old_gnu_sparse(block)?;
            let real_size = decode_numeric(field(block, GNU_REAL_SIZE)).unwrap_or(header.size).max(0) as u64;
            if entries.len() > self.limits.max_sparse_entries {
                return Err(Error::TooManySparseEntries(entries.len()));
            }
            sparse::validate(&entries, real_size)?;
            let holes = sparse::invert(&entries, real_size);
            header.size = real_size as i64;
            self.payload = Payload::Sparse {
                holes,
                hole_index: 0,
                pos: 0,
                size: real_size,
                physical_remaining: physical_size,
            };
            self.pending_skip = block::pad_len(physical_size);
            return Ok(());
        }

        let major = header.pax_records.get("GNU.sparse.major").map(String::as_str);
        let minor = header.pax_records.get("GNU.sparse.minor").map(String::as_str);
        // An explicit major="0" with an unrecognized minor is not a format
        // this reader understands; ignore the map and treat the entry as an
        // ordinary (non-sparse) file rather than guessing at its layout.
        let unrecognized_0_x = major == Some("0") && !matches!(minor, None | Some("0") | Some("1"));

        if !unrecognized_0_x {
            if let Some(map) = header.pax_records.get("GNU.sparse.map").cloned() {
                let real_size: u64 = header
                    .pax_records
                    .get("GNU.sparse.realsize")
                    .or_else(|| header.pax_records.get("GNU.sparse.size"))
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(physical_size);
                let is_1_0 = major == Some("1");

                let (entries, header_consumed) = if is_1_0 {
                    read_inline_sparse_map(&mut self.inner, physical_size, &self.limits)?
                } else {
                    (parse_sparse_map_string(&map, &self.limits)?, 0)
                };
                sparse::validate(&entries, real_size)?;
                let holes = sparse::invert(&entries, real_size);
                header.size = real_size as i64;
                self.payload = Payload::Sparse {
                    holes,
                    hole_index: 0,
                    pos: 0,
                    size: real_size,
                    physical_remaining: physical_size.saturating_sub(header_consumed),
                };
                self.pending_skip = block::pad_len(physical_size);
                return Ok(());
            }
        }

        self.payload = Payload::Plain { remaining: physical_size };
        self.pending_skip = block::pad_len(physical_size);
        Ok(())
    }
}

impl<R: Read> Read for Reader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.payload {
            Payload::Done => Ok(0),
            Payload::Plain { remaining } => {
                if *remaining == 0 || buf.is_empty() {
                    return Ok(0);
                }
                let want = buf.len().min(*remaining as usize);
                let n = self.inner.read(&mut buf[..want])?;
                *remaining -= n as u64;
                Ok(n)
            },
            Payload::Sparse { holes, hole_index, pos, size, physical_remaining } => {
                if *pos >= *size {
                    if *physical_remaining != 0 {
                        return Err(io::Error::new(
                            io::ErrorKind::InvalidData,
                            crate::error::SparseError::UnreferencedData,
                        ));
                    }
                    return Ok(0);
                }
                if buf.is_empty() {
                    return Ok(0);
                }
                let logical_remaining = *size - *pos;
                let want = buf.len().min(logical_remaining as usize);

                while let Some(h) = holes.get(*hole_index) {
                    let end = h.end().unwrap_or(h.offset);
                    if *pos >= end {
                        *hole_index += 1;
                    } else {
                        break;
                    }
                }

                if let Some(h) = holes.get(*hole_index).copied() {
                    if *pos >= h.offset {
                        let hole_end = h.end().unwrap_or(h.offset);
                        let n = want.min((hole_end - *pos) as usize);
                        buf[..n].fill(0);
                        *pos += n as u64;
                        return Ok(n);
                    }
                    let n = want.min((h.offset - *pos) as usize);
                    read_sparse_data(&mut self.inner, buf, n, pos, physical_remaining)
                } else {
                    read_sparse_data(&mut self.inner, buf, want, pos, physical_remaining)
                }
            },
        }
    }
}

fn read_sparse_data<R: Read>(inner: &mut R, buf: &mut [u8], want: usize, pos: &mut u64, physical_remaining: &mut u64) -> io::Result<usize> {
    if want == 0 {
        return Ok(0);
    }
    let n = inner.read(&mut buf[..want])?;
    if n == 0 {
        return Err(io::Error::new(io::ErrorKind::UnexpectedEof, crate::error::SparseError::NonExistentData));
    }
    *pos += n as u64;
    *physical_remaining = physical_remaining.saturating_sub(n as u64);
    Ok(n)
}

fn c_string(body: &[u8]) -> String {
    let end = body.iter().position(|&b| b == 0).unwrap_or(body.len());
    String::from_utf8_lossy(&body[..end]).into_owned()
}

fn parse_v7_fields(block: &[u8; BLOCK_SIZE]) -> Result<Header> {
    let mut header = Header::default();
    header.name = decode_string(field(block, NAME));
    header.link_name = decode_string(field(block, LINK_NAME));
    header.mode = decode_numeric(field(block, MODE))?;
    header.uid = decode_numeric(field(block, UID))? as i32;
    header.gid = decode_numeric(field(block, GID))? as i32;
    header.size = decode_numeric(field(block, SIZE))?;
    header.mod_time = Timestamp::new(decode_numeric(field(block, MOD_TIME))?, 0);
    header.dev_major = decode_numeric(field(block, DEV_MAJOR))?;
    header.dev_minor = decode_numeric(field(block, DEV_MINOR))?;
    header.uname = decode_string(field(block, UNAME));
    header.gname = decode_string(field(block, GNAME));
    header.flag = Some(TypeFlag::from(block[FLAG]));
    Ok(header)
}

fn apply_overlay(header: &mut Header, block: &[u8; BLOCK_SIZE], format: Format) {
    if format.contains(Format::GNU) {
        if let Ok(secs) = decode_numeric(field(block, GNU_ACCESS_TIME)) {
            if secs != 0 {
                header.access_time = Timestamp::new(secs, 0);
            }
        }
        if let Ok(secs) = decode_numeric(field(block, GNU_CHANGE_TIME)) {
            if secs != 0 {
                header.change_time = Timestamp::new(secs, 0);
            }
        }
    } else if format.contains(Format::STAR) {
        let prefix = decode_string(field(block, STAR_PREFIX));
        if !prefix.is_empty() {
            header.name = format!("{prefix}/{}", header.name);
        }
        if let Ok(secs) = decode_numeric(field(block, STAR_ACCESS_TIME)) {
            if secs != 0 {
                header.access_time = Timestamp::new(secs, 0);
            }
        }
        if let Ok(secs) = decode_numeric(field(block, STAR_CHANGE_TIME)) {
            if secs != 0 {
                header.change_time = Timestamp::new(secs, 0);
            }
        }
    } else {
        let prefix = decode_string(field(block, USTAR_PREFIX));
        if !prefix.is_empty() {
            header.name = format!("{prefix}/{}", header.name);
        }
    }
}

/// Applies known PAX keys directly onto header fields, splits `SCHILY.xattr.*`
/// into `header.xattr`, and leaves the rest (comment, charset, unrecognized
/// vendor keys) in `header.pax_records` for the caller to inspect.
fn apply_pax_overrides(header: &mut Header, records: &BTreeMap<String, String>) {
    for (key, value) in records {
        match key.as_str() {
            "path" => header.name = value.clone(),
            "linkpath" => header.link_name = value.clone(),
            "size" => {
                if let Ok(v) = value.parse() {
                    header.size = v;
                }
            },
            "uid" => {
                if let Ok(v) = value.parse() {
                    header.uid = v;
                }
            },
            "gid" => {
                if let Ok(v) = value.parse() {
                    header.gid = v;
                }
            },
            "uname" => header.uname = value.clone(),
            "gname" => header.gname = value.clone(),
            "mtime" => {
                if let Ok((s, n)) = crate::codec::parse_pax_time(value) {
                    header.mod_time = Timestamp::new(s, n);
                }
            },
            "atime" => {
                if let Ok((s, n)) = crate::codec::parse_pax_time(value) {
                    header.access_time = Timestamp::new(s, n);
                }
            },
            "ctime" => {
                if let Ok((s, n)) = crate::codec::parse_pax_time(value) {
                    header.change_time = Timestamp::new(s, n);
                }
            },
            _ => {
                if let Some(xattr_key) = key.strip_prefix("SCHILY.xattr.") {
                    header.xattr.insert(xattr_key.to_string(), value.clone());
                } else {
                    header.pax_records.insert(key.clone(), value.clone());
                }
            },
        }
    }
    if !records.is_empty() {
        header.format = Format::PAX;
    }
}

/// Decodes one 24-byte `(offset: 12 bytes, numbytes: 12 bytes)` old-GNU
/// sparse entry; an all-zero pair (padding in the last extension block) is
/// skipped rather than recorded as a zero-length fragment.
fn read_sparse_pair(chunk: &[u8], out: &mut Vec<SparseEntry>) -> Result<()> {
    if chunk.iter().all(|&b| b == 0) {
        return Ok(());
    }
    let offset = decode_numeric(&chunk[..12])?.max(0) as u64;
    let length = decode_numeric(&chunk[12..24])?.max(0) as u64;
    if length > 0 || offset > 0 {
        out.push(SparseEntry { offset, length });
    }
    Ok(())
}

fn read_inline_sparse_map<R: Read>(inner: &mut R, physical_size: u64, limits: &Limits) -> Result<(Vec<SparseEntry>, u64)> {
    let mut consumed: u64 = 0;
    let mut line_buf = Vec::new();

    let mut read_token = |inner: &mut R, consumed: &mut u64| -> Result<u64> {
        line_buf.clear();
        loop {
            let mut byte = [0u8; 1];
            inner.read_exact(&mut byte)?;
            *consumed += 1;
            if byte[0] == b'\n' {
                break;
            }
            line_buf.push(byte[0]);
        }
        let s = std::str::from_utf8(&line_buf).map_err(|_| Error::Pax(crate::error::PaxError::InvalidUtf8))?;
        s.parse::<u64>().map_err(|_| Error::Pax(crate::error::PaxError::InvalidLength(s.to_string())))
    };

    let count = read_token(inner, &mut consumed)?;
    if count as usize > limits.max_sparse_entries {
        return Err(Error::TooManySparseEntries(count as usize));
    }
    let mut entries = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let offset = read_token(inner, &mut consumed)?;
        let length = read_token(inner, &mut consumed)?;
        entries.push(SparseEntry { offset, length });
    }
    let padded = block::pad_len(consumed);
    if padded > 0 {
        let mut scratch = vec![0u8; padded as usize];
        inner.read_exact(&mut scratch)?;
        consumed += padded;
    }
    if consumed > physical_size {
        return Err(Error::Pax(crate::error::PaxError::InvalidLength(format!(
            "sparse map preamble ({consumed} bytes) exceeds the entry's declared size ({physical_size} bytes)"
        ))));
    }
    Ok((entries, consumed))
}

fn parse_sparse_map_string(map: &str, limits: &Limits) -> Result<Vec<SparseEntry>> {
    let parts: Vec<&str> = map.split(',').filter(|s| !s.is_empty()).collect();
    if parts.len() % 2 != 0 {
        return Err(Error::Pax(crate::error::PaxError::InvalidLength(map.to_string())));
    }
    if parts.len() / 2 > limits.max_sparse_entries {
        return Err(Error::TooManySparseEntries(parts.len() / 2));
    }
    let mut entries = Vec::with_capacity(parts.len() / 2);
    for chunk in parts.chunks(2) {
        let offset: u64 = chunk[0].parse().map_err(|_| Error::Pax(crate::error::PaxError::InvalidLength(map.to_string())))?;
        let length: u64 = chunk[1].parse().map_err(|_| Error::Pax(crate::error::PaxError::InvalidLength(map.to_string())))?;
        entries.push(SparseEntry { offset, length });
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::Writer;
    use std::io::Cursor;

    #[test]
    fn empty_archive_yields_no_entries() {
        let mut buf = Vec::new();
        Writer::new(Cursor::new(&mut buf)).close().unwrap();
        let mut r = Reader::new(Cursor::new(buf));
        assert!(r.next_entry().unwrap().is_none());
    }

    #[test]
    fn round_trips_a_simple_entry() {
        let mut buf = Vec::new();
        let mut w = Writer::new(Cursor::new(&mut buf));
        let mut h = Header::new(TypeFlag::Reg, "readme.txt", 5);
        h.mode = 0o600;
        w.write_header(&h).unwrap();
        w.write(b"hello").unwrap();
        w.close().unwrap();

        let mut r = Reader::new(Cursor::new(buf));
        let entry = r.next_entry().unwrap().unwrap();
        assert_eq!(entry.name, "readme.txt");
        assert_eq!(entry.mode, 0o600);
        assert_eq!(entry.size, 5);
        let mut payload = Vec::new();
        r.read_to_end(&mut payload).unwrap();
        assert_eq!(payload, b"hello");
        assert!(r.next_entry().unwrap().is_none());
    }

    #[test]
    fn long_name_round_trips_through_pax() {
        let mut buf = Vec::new();
        let mut w = Writer::new(Cursor::new(&mut buf));
        let name = "ab".repeat(100);
        let h = Header::new(TypeFlag::Reg, name.clone(), 5);
        w.write_header(&h).unwrap();
        w.write(b"     ").unwrap();
        w.close().unwrap();

        let mut r = Reader::new(Cursor::new(buf));
        let entry = r.next_entry().unwrap().unwrap();
        assert_eq!(entry.name, name);
        assert_eq!(entry.format, Format::PAX);
    }

    #[test]
    fn xattrs_round_trip() {
        let mut buf = Vec::new();
        let mut w = Writer::new(Cursor::new(&mut buf));
        let mut h = Header::new(TypeFlag::Reg, "f", 5);
        h.xattr.insert("user.key".to_string(), "value".to_string());
        w.write_header(&h).unwrap();
        w.write(b"Kilts").unwrap();
        w.close().unwrap();

        let mut r = Reader::new(Cursor::new(buf));
        let entry = r.next_entry().unwrap().unwrap();
        assert_eq!(entry.xattr.get("user.key").unwrap(), "value");
    }

    #[test]
    fn unrecognized_gnu_sparse_minor_is_treated_as_non_sparse() {
        let mut h = Header::new(TypeFlag::Reg, "weird.bin", 4);
        h.pax_records.insert("GNU.sparse.major".to_string(), "0".to_string());
        h.pax_records.insert("GNU.sparse.minor".to_string(), "9".to_string());
        h.pax_records.insert("GNU.sparse.map".to_string(), "0,4".to_string());

        let mut buf = Vec::new();
        let mut w = Writer::new(Cursor::new(&mut buf));
        w.write_header(&h).unwrap();
        w.write(b"abcd").unwrap();
        w.close().unwrap();

        let mut r = Reader::new(Cursor::new(buf));
        let entry = r.next_entry().unwrap().unwrap();
        assert_eq!(entry.size, 4);
        let mut out = Vec::new();
        r.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"abcd");
    }

    #[test]
    fn next_entry_skips_undrained_payload() {
        let mut buf = Vec::new();
        let mut w = Writer::new(Cursor::new(&mut buf));
        w.write_header(&Header::new(TypeFlag::Reg, "first", 5)).unwrap();
        w.write(b"hello").unwrap();
        w.write_header(&Header::new(TypeFlag::Reg, "second", 6)).unwrap();
        w.write(b"world!").unwrap();
        w.close().unwrap();

        let mut r = Reader::new(Cursor::new(buf));
        let first = r.next_entry().unwrap().unwrap();
        assert_eq!(first.name, "first");
        // Deliberately do not read the payload before moving on.
        let second = r.next_entry().unwrap().unwrap();
        assert_eq!(second.name, "second");
        let mut payload = Vec::new();
        r.read_to_end(&mut payload).unwrap();
        assert_eq!(payload, b"world!");
        assert!(r.next_entry().unwrap().is_none());
    }

    #[test]
    fn next_entry_skips_undrained_sparse_payload() {
        let mut h = Header::new(TypeFlag::Reg, "sparse.bin", 4);
        h.pax_records.insert("GNU.sparse.map".to_string(), "0,4".to_string());

        let mut buf = Vec::new();
        let mut w = Writer::new(Cursor::new(&mut buf));
        w.write_header(&h).unwrap();
        w.write(b"abcd").unwrap();
        w.write_header(&Header::new(TypeFlag::Reg, "after", 3)).unwrap();
        w.write(b"xyz").unwrap();
        w.close().unwrap();

        let mut r = Reader::new(Cursor::new(buf));
        let first = r.next_entry().unwrap().unwrap();
        assert_eq!(first.name, "sparse.bin");
        // Read only part of the sparse entry's payload before moving on.
        let mut partial = [0u8; 1];
        r.read_exact(&mut partial).unwrap();

        let second = r.next_entry().unwrap().unwrap();
        assert_eq!(second.name, "after");
        let mut payload = Vec::new();
        r.read_to_end(&mut payload).unwrap();
        assert_eq!(payload, b"xyz");
    }

    #[test]
    fn name_over_the_configured_limit_is_rejected() {
        let mut buf = Vec::new();
        let mut w = Writer::new(Cursor::new(&mut buf));
        let name = "ab".repeat(100);
        let h = Header::new(TypeFlag::Reg, name, 5);
        w.write_header(&h).unwrap();
        w.write(b"     ").unwrap();
        w.close().unwrap();

        let mut r = Reader::with_limits(Cursor::new(buf), Limits { max_entry_name_len: 10, ..Limits::default() });
        assert!(r.next_entry().is_err());
    }
}

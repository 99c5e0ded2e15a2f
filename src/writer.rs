//! Writer state machine: `Open -> EntryHeaderWritten <-> EntryDone ->
//! Closed`, driven through [`Writer::write_header`], [`Writer::write`] and
//! [`Writer::close`].

use std::io::{self, Write};

use log::debug;

use crate::block::{
    self, field_mut, BLOCK_SIZE, DEV_MAJOR, DEV_MINOR, FLAG, GID, GNU_ACCESS_TIME, GNU_CHANGE_TIME, LINK_NAME,
    MAGIC, MAGIC_GNU, MAGIC_USTAR, MODE, MOD_TIME, NAME, SIZE, UID, UNAME, USTAR_PREFIX, VERSION, VERSION_GNU,
    VERSION_USTAR, ZERO_BLOCK,
};
use crate::codec::{encode_base256, encode_octal, encode_string, fits_in_base256, fits_in_octal, format_pax_record};
use crate::error::{Error, Result};
use crate::header::{split_ustar_name, Format, Header, TypeFlag};
use crate::limits::Limits;

enum State {
    Open,
    InEntry { declared: u64, remaining: u64 },
    Closed,
}

/// Emits a tar archive to an underlying synchronous, blocking `Write`.
pub struct Writer<W> {
    inner: W,
    limits: Limits,
    state: State,
}

impl<W: Write> Writer<W> {
    #[must_use]
    pub fn new(inner: W) -> Self {
        Self::with_limits(inner, Limits::default())
    }

    #[must_use]
    pub fn with_limits(inner: W, limits: Limits) -> Self {
        Self {
            inner,
            limits,
            state: State::Open,
        }
    }

    /// Writes a new entry's header (and any PAX/GNU meta-headers it requires),
    /// first flushing the padding of the previous entry.
    pub fn write_header(&mut self, header: &Header) -> Result<()> {
        self.finish_entry()?;

        let mut header = header.clone();
        if header.flag == Some(TypeFlag::RegA) {
            header.flag = Some(if header.name.ends_with('/') { TypeFlag::Dir } else { TypeFlag::Reg });
        }
        if header.format.is_empty() {
            header.access_time = crate::header::Timestamp::ZERO;
            header.change_time = crate::header::Timestamp::ZERO;
        }

        let (allowed, overrides) = header.allowed_formats()?;
        let format = choose_format(allowed);
        if format != Format::USTAR && header.format.is_empty() {
            debug!("promoting entry {:?} from USTAR to {format}", header.name);
        }

        if format == Format::PAX && !overrides.is_empty() {
            let records: Vec<String> = overrides.iter().map(|(k, v)| format_pax_record(k, v)).collect();
            if let Some(rec) = records.iter().find(|r| r.len() > self.limits.max_pax_record_len) {
                return Err(Error::Pax(crate::error::PaxError::RecordTooLong(rec.len())));
            }
            let body: String = records.concat();
            let name = if header.flag == Some(TypeFlag::XGlobalHeader) {
                "GlobalHead.0.0".to_string()
            } else {
                pax_header_name(&header.name)
            };
            let flag = if header.flag == Some(TypeFlag::XGlobalHeader) {
                TypeFlag::XGlobalHeader
            } else {
                TypeFlag::XHeader
            };
            self.write_meta_entry(&name, flag, body.as_bytes(), Format::USTAR)?;
        }

        if header.flag == Some(TypeFlag::XGlobalHeader) {
            self.state = State::Open;
            return Ok(());
        }

        // `allowed_formats` already drops GNU from consideration once `name`
        // or `link_name` exceeds 100 bytes, demoting such entries to PAX, so
        // `choose_format` never returns GNU for an entry that would need a
        // `GnuLongName`/`GnuLongLink` meta-header. GNU archives this writer
        // produces only ever carry names that fit inline.

        let block = build_main_block(&header, format);
        self.inner.write_all(&block)?;

        let declared = header.size.max(0) as u64;
        self.state = State::InEntry { declared, remaining: declared };
        Ok(())
    }

    /// Appends payload bytes to the current entry. Writing more than the
    /// header's declared `size` is a terminal error.
    pub fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let State::InEntry { declared, remaining } = &mut self.state else {
            return Err(Error::WriteTooLong { written: 0, declared: 0 });
        };
        if buf.len() as u64 > *remaining {
            return Err(Error::WriteTooLong {
                written: *declared - *remaining + buf.len() as u64,
                declared: *declared,
            });
        }
        self.inner.write_all(buf)?;
        *remaining -= buf.len() as u64;
        Ok(buf.len())
    }

    /// Flushes the trailing padding of the current entry, writes the
    /// two-zero-block archive trailer, and marks the writer closed.
    pub fn close(&mut self) -> Result<()> {
        if matches!(self.state, State::Closed) {
            return Ok(());
        }
        self.finish_entry()?;
        self.inner.write_all(&ZERO_BLOCK)?;
        self.inner.write_all(&ZERO_BLOCK)?;
        self.inner.flush()?;
        self.state = State::Closed;
        Ok(())
    }

    fn finish_entry(&mut self) -> Result<()> {
        let (declared, remaining) = match &self.state {
            State::InEntry { declared, remaining } => (*declared, *remaining),
            _ => return Ok(()),
        };
        if remaining > 0 {
            return Err(Error::ShortWrite { remaining });
        }
        let pad = block::pad_len(declared);
        if pad > 0 {
            self.inner.write_all(&ZERO_BLOCK[..pad as usize])?;
        }
        self.state = State::Open;
        Ok(())
    }

    fn write_meta_entry(&mut self, name: &str, flag: TypeFlag, body: &[u8], format: Format) -> Result<()> {
        let mut header = Header::new(flag, name, body.len() as i64);
        header.mode = 0;
        let block = build_main_block(&header, format);
        self.inner.write_all(&block)?;
        self.inner.write_all(body)?;
        let pad = block::pad_len(body.len() as u64);
        if pad > 0 {
            self.inner.write_all(&ZERO_BLOCK[..pad as usize])?;
        }
        Ok(())
    }
}

/// USTAR is preferred when it remains feasible (widest compatibility), then
/// GNU, then PAX.
fn choose_format(allowed: Format) -> Format {
    if allowed.contains(Format::USTAR) {
        Format::USTAR
    } else if allowed.contains(Format::GNU) {
        Format::GNU
    } else {
        Format::PAX
    }
}

fn pax_header_name(name: &str) -> String {
    match name.rfind('/') {
        Some(i) if !name[..i].is_empty() && &name[..i] != "." => format!("{}/PaxHeaders.0/{}", &name[..i], &name[i + 1..]),
        Some(i) => format!("PaxHeaders.0/{}", &name[i + 1..]),
        None => format!("PaxHeaders.0/{name}"),
    }
}

fn write_numeric_field(field: &mut [u8], x: i64, allow_base256: bool) {
    let n = field.len();
    if fits_in_octal(n, x) {
        encode_octal(field, x);
    } else if allow_base256 && fits_in_base256(n, x) {
        encode_base256(field, x);
    }
    // else: leave zeroed; the true value travels as a PAX override.
}

/// Truncates `bytes` to `max_len`, and for a PAX entry (where the true value
/// already travels in the extended header) best-effort coerces the USTAR
/// portion to ASCII by dropping non-ASCII bytes and NULs rather than
/// truncating mid-codepoint.
fn ustar_field_bytes(bytes: &[u8], max_len: usize, format: Format) -> Vec<u8> {
    if format == Format::PAX {
        bytes.iter().copied().filter(|b| b.is_ascii() && *b != 0).take(max_len).collect()
    } else {
        bytes[..bytes.len().min(max_len)].to_vec()
    }
}

fn build_main_block(header: &Header, format: Format) -> [u8; BLOCK_SIZE] {
    let mut block = [0u8; BLOCK_SIZE];
    let gnu = format == Format::GNU;

    match split_ustar_name(&header.name) {
        Some((prefix, suffix)) if format != Format::GNU || header.name.len() <= 100 => {
            encode_string(field_mut(&mut block, NAME), suffix.as_bytes());
            if !prefix.is_empty() {
                encode_string(field_mut(&mut block, USTAR_PREFIX), prefix.as_bytes());
            }
        },
        _ => {
            let bytes = ustar_field_bytes(header.name.as_bytes(), 100, format);
            encode_string(field_mut(&mut block, NAME), &bytes);
        },
    }

    encode_string(field_mut(&mut block, LINK_NAME), &ustar_field_bytes(header.link_name.as_bytes(), 100, format));
    encode_string(field_mut(&mut block, UNAME), &ustar_field_bytes(header.uname.as_bytes(), 32, format));
    encode_string(field_mut(&mut block, crate::block::GNAME), &ustar_field_bytes(header.gname.as_bytes(), 32, format));

    write_numeric_field(field_mut(&mut block, MODE), header.mode, gnu);
    write_numeric_field(field_mut(&mut block, UID), i64::from(header.uid), gnu);
    write_numeric_field(field_mut(&mut block, GID), i64::from(header.gid), gnu);
    write_numeric_field(field_mut(&mut block, SIZE), header.size.max(0), gnu);
    write_numeric_field(field_mut(&mut block, MOD_TIME), header.mod_time.seconds, gnu);
    write_numeric_field(field_mut(&mut block, DEV_MAJOR), header.dev_major, gnu);
    write_numeric_field(field_mut(&mut block, DEV_MINOR), header.dev_minor, gnu);

    block[FLAG] = u8::from(header.flag.unwrap_or(TypeFlag::Reg));

    if gnu {
        field_mut(&mut block, MAGIC).copy_from_slice(MAGIC_GNU);
        field_mut(&mut block, VERSION).copy_from_slice(VERSION_GNU);
        if !header.access_time.is_zero() {
            write_numeric_field(field_mut(&mut block, GNU_ACCESS_TIME), header.access_time.seconds, true);
        }
        if !header.change_time.is_zero() {
            write_numeric_field(field_mut(&mut block, GNU_CHANGE_TIME), header.change_time.seconds, true);
        }
    } else {
        field_mut(&mut block, MAGIC).copy_from_slice(MAGIC_USTAR);
        field_mut(&mut block, VERSION).copy_from_slice(VERSION_USTAR);
    }

    block::write_checksum(&mut block);
    block
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn writes_trailer_on_close() {
        let mut buf = Vec::new();
        let mut w = Writer::new(Cursor::new(&mut buf));
        w.close().unwrap();
        assert_eq!(buf.len(), 1024);
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn close_is_idempotent() {
        let mut buf = Vec::new();
        let mut w = Writer::new(Cursor::new(&mut buf));
        w.close().unwrap();
        let len_after_first = buf.len();
        w.close().unwrap();
        assert_eq!(buf.len(), len_after_first);
    }

    #[test]
    fn write_beyond_declared_size_fails() {
        let mut buf = Vec::new();
        let mut w = Writer::new(Cursor::new(&mut buf));
        let h = Header::new(TypeFlag::Dir, "dir/", 0);
        w.write_header(&h).unwrap();
        assert!(w.write(b"x").is_err());
    }

    #[test]
    fn close_with_unwritten_payload_fails() {
        let mut buf = Vec::new();
        let mut w = Writer::new(Cursor::new(&mut buf));
        let h = Header::new(TypeFlag::Reg, "f", 5);
        w.write_header(&h).unwrap();
        assert!(w.close().is_err());
    }

    #[test]
    fn long_name_emits_pax_headers_entry() {
        let mut buf = Vec::new();
        let mut w = Writer::new(Cursor::new(&mut buf));
        let name = "ab".repeat(100);
        let h = Header::new(TypeFlag::Reg, name, 5);
        w.write_header(&h).unwrap();
        w.write(b"     ").unwrap();
        w.close().unwrap();
        let text = String::from_utf8_lossy(&buf);
        assert!(text.contains("PaxHeaders.0"));
    }

    #[test]
    fn oversized_pax_record_is_rejected() {
        let mut buf = Vec::new();
        let mut w = Writer::with_limits(Cursor::new(&mut buf), Limits { max_pax_record_len: 8, ..Limits::default() });
        let mut h = Header::new(TypeFlag::Reg, "f", 5);
        h.xattr.insert("user.key".to_string(), "a much longer value than the limit allows".to_string());
        assert!(w.write_header(&h).is_err());
    }

    #[test]
    fn non_ascii_name_is_coerced_in_ustar_portion() {
        let name = format!("caf{}-{}", '\u{e9}', "x".repeat(100));
        let mut h = Header::new(TypeFlag::Reg, name.clone(), 5);
        let (allowed, overrides) = h.allowed_formats().unwrap();
        assert_eq!(allowed, Format::PAX);
        assert_eq!(overrides.get("path").unwrap(), &name);
        h.format = Format::PAX;

        let block = build_main_block(&h, Format::PAX);
        let name_field = crate::block::field(&block, NAME);
        assert!(name_field.is_ascii());
        assert!(!name_field.contains(&0));
    }

    #[test]
    fn non_ascii_name_round_trips_through_pax_override() {
        let mut buf = Vec::new();
        let mut w = Writer::new(Cursor::new(&mut buf));
        let name = format!("caf{}-{}", '\u{e9}', "x".repeat(100));
        let h = Header::new(TypeFlag::Reg, name.clone(), 5);
        w.write_header(&h).unwrap();
        w.write(b"     ").unwrap();
        w.close().unwrap();

        let mut r = crate::reader::Reader::new(Cursor::new(buf));
        let entry = r.next_entry().unwrap().unwrap();
        assert_eq!(entry.name, name);
    }

    #[test]
    fn pax_keys_are_written_in_lexicographic_order() {
        let mut buf = Vec::new();
        let mut w = Writer::new(Cursor::new(&mut buf));
        let mut h = Header::new(TypeFlag::Reg, "f", 5);
        h.xattr.insert("foo".to_string(), "foo".to_string());
        h.xattr.insert("bar".to_string(), "bar".to_string());
        h.xattr.insert("baz".to_string(), "baz".to_string());
        h.xattr.insert("qux".to_string(), "qux".to_string());
        w.write_header(&h).unwrap();
        w.write(b"Kilts").unwrap();
        w.close().unwrap();
        let text = String::from_utf8_lossy(&buf);
        let bar = text.find("bar=bar").unwrap();
        let baz = text.find("baz=baz").unwrap();
        let foo = text.find("foo=foo").unwrap();
        let qux = text.find("qux=qux").unwrap();
        assert!(bar < baz && baz < foo && foo < qux);
    }
}

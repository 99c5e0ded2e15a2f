//! The logical header entity and the allowed-format decision procedure.

use std::collections::BTreeMap;
use std::fmt;

use bitflags::bitflags;

use crate::codec::{fits_in_base256, fits_in_octal, format_pax_time};
use crate::error::{Error, Result};

bitflags! {
    /// The set of physical tar formats that remain able to represent a
    /// header. Also doubles as the caller's requested format on write and
    /// the detected format on read, where exactly one bit is ever set.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Format: u8 {
        const V7    = 0b0000_0001;
        const USTAR = 0b0000_0010;
        const PAX   = 0b0000_0100;
        const GNU   = 0b0000_1000;
        const STAR  = 0b0001_0000;
    }
}

impl Default for Format {
    fn default() -> Self {
        Format::empty()
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = Vec::new();
        for (name, bit) in [
            ("V7", Format::V7),
            ("USTAR", Format::USTAR),
            ("PAX", Format::PAX),
            ("GNU", Format::GNU),
            ("STAR", Format::STAR),
        ] {
            if self.contains(bit) {
                names.push(name);
            }
        }
        if names.is_empty() {
            write!(f, "none")
        } else {
            write!(f, "{}", names.join("|"))
        }
    }
}

/// Single-byte type flag of a header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeFlag {
    Reg,
    RegA,
    Link,
    Symlink,
    Char,
    Block,
    Dir,
    Fifo,
    Cont,
    XHeader,
    XGlobalHeader,
    GnuLongName,
    GnuLongLink,
    GnuSparse,
    Unknown(u8),
}

impl TypeFlag {
    #[must_use]
    pub fn is_header_only(self) -> bool {
        matches!(
            self,
            TypeFlag::Link | TypeFlag::Symlink | TypeFlag::Char | TypeFlag::Block | TypeFlag::Dir | TypeFlag::Fifo
        )
    }

    #[must_use]
    pub fn is_regular_like(self) -> bool {
        matches!(self, TypeFlag::Reg | TypeFlag::Char | TypeFlag::Block | TypeFlag::Fifo | TypeFlag::GnuSparse)
    }

    #[must_use]
    pub fn is_meta_header(self) -> bool {
        matches!(
            self,
            TypeFlag::XHeader | TypeFlag::XGlobalHeader | TypeFlag::GnuLongName | TypeFlag::GnuLongLink
        )
    }
}

impl From<u8> for TypeFlag {
    fn from(b: u8) -> Self {
        match b {
            b'\0' => TypeFlag::RegA,
            b'0' => TypeFlag::Reg,
            b'1' => TypeFlag::Link,
            b'2' => TypeFlag::Symlink,
            b'3' => TypeFlag::Char,
            b'4' => TypeFlag::Block,
            b'5' => TypeFlag::Dir,
            b'6' => TypeFlag::Fifo,
            b'7' => TypeFlag::Cont,
            b'x' => TypeFlag::XHeader,
            b'g' => TypeFlag::XGlobalHeader,
            b'L' => TypeFlag::GnuLongName,
            b'K' => TypeFlag::GnuLongLink,
            b'S' => TypeFlag::GnuSparse,
            other => TypeFlag::Unknown(other),
        }
    }
}

impl From<TypeFlag> for u8 {
    fn from(t: TypeFlag) -> Self {
        match t {
            TypeFlag::RegA => b'\0',
            TypeFlag::Reg => b'0',
            TypeFlag::Link => b'1',
            TypeFlag::Symlink => b'2',
            TypeFlag::Char => b'3',
            TypeFlag::Block => b'4',
            TypeFlag::Dir => b'5',
            TypeFlag::Fifo => b'6',
            TypeFlag::Cont => b'7',
            TypeFlag::XHeader => b'x',
            TypeFlag::XGlobalHeader => b'g',
            TypeFlag::GnuLongName => b'L',
            TypeFlag::GnuLongLink => b'K',
            TypeFlag::GnuSparse => b'S',
            TypeFlag::Unknown(b) => b,
        }
    }
}

/// An instant with nanosecond resolution. The zero value means "not set".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Timestamp {
    pub seconds: i64,
    pub nanoseconds: u32,
}

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp { seconds: 0, nanoseconds: 0 };

    #[must_use]
    pub fn is_zero(self) -> bool {
        self.seconds == 0 && self.nanoseconds == 0
    }

    #[must_use]
    pub fn new(seconds: i64, nanoseconds: u32) -> Self {
        Self { seconds, nanoseconds }
    }

    #[must_use]
    pub fn to_pax_string(self) -> String {
        format_pax_time(self.seconds, self.nanoseconds)
    }
}

/// One logical archive entry.
#[derive(Debug, Clone, Default)]
pub struct Header {
    pub flag: Option<TypeFlag>,
    pub name: String,
    pub link_name: String,
    pub size: i64,
    pub mode: i64,
    pub uid: i32,
    pub gid: i32,
    pub uname: String,
    pub gname: String,
    pub mod_time: Timestamp,
    pub access_time: Timestamp,
    pub change_time: Timestamp,
    pub dev_major: i64,
    pub dev_minor: i64,
    pub pax_records: BTreeMap<String, String>,
    pub xattr: BTreeMap<String, String>,
    pub format: Format,
}

impl Header {
    #[must_use]
    pub fn new(flag: TypeFlag, name: impl Into<String>, size: i64) -> Self {
        Self {
            flag: Some(flag),
            name: name.into(),
            size,
            mode: 0o644,
            ..Default::default()
        }
    }

    fn flag(&self) -> TypeFlag {
        self.flag.unwrap_or(TypeFlag::Reg)
    }

    /// Merges `xattr` into `pax_records` under the `SCHILY.xattr.` prefix,
    /// as happens at encode time.
    pub(crate) fn merged_pax_records(&self) -> BTreeMap<String, String> {
        let mut merged = self.pax_records.clone();
        for (k, v) in &self.xattr {
            merged.insert(format!("SCHILY.xattr.{k}"), v.clone());
        }
        merged
    }

    /// Returns the set of formats still able to represent this header,
    /// plus the PAX overrides required for any field outside USTAR/GNU's
    /// reach.
    pub fn allowed_formats(&self) -> Result<(Format, BTreeMap<String, String>)> {
        let flag = self.flag();

        if flag.is_meta_header() {
            return Err(Error::ReservedTypeFlag(flag));
        }
        if flag.is_regular_like() && self.name.ends_with('/') {
            return Err(Error::TrailingSlashInName(self.name.clone()));
        }
        if flag == TypeFlag::XGlobalHeader {
            let default_header = Header {
                flag: self.flag,
                name: self.name.clone(),
                xattr: self.xattr.clone(),
                pax_records: self.pax_records.clone(),
                format: self.format,
                ..Default::default()
            };
            if !headers_equal_ignoring_listed_fields(self, &default_header) {
                return Err(Error::InvalidGlobalHeader);
            }
            let overrides = self.merged_pax_records();
            return Ok((Format::PAX, overrides));
        }
        if !flag.is_header_only() && self.size < 0 {
            return Err(Error::NoFormatFits("negative size".to_string()));
        }

        let mut allowed = Format::USTAR | Format::PAX | Format::GNU;
        let mut overrides: BTreeMap<String, String> = BTreeMap::new();
        let mut reasons: Vec<String> = Vec::new();
        let mut prefer_pax = false;

        let merged = self.merged_pax_records();
        if !merged.is_empty() {
            allowed &= Format::PAX;
            overrides.extend(merged);
        }

        // name / path
        {
            let name = self.name.as_bytes();
            let ustar_ok = split_ustar_name(&self.name).is_some();
            let gnu_ok = name.len() <= 100 && !name.contains(&0);
            if !ustar_ok {
                allowed &= !Format::USTAR;
            }
            if !gnu_ok {
                allowed &= !Format::GNU;
            }
            if !ustar_ok || !gnu_ok {
                if allowed.contains(Format::PAX) {
                    overrides.insert("path".to_string(), self.name.clone());
                } else {
                    reasons.push(format!("name {:?} does not fit any remaining format", self.name));
                }
            }
        }

        // link_name / linkpath
        {
            let v = self.link_name.as_bytes();
            let ustar_ok = v.len() <= 100 && v.is_ascii();
            let gnu_ok = v.len() <= 100 && !v.contains(&0);
            if !ustar_ok {
                allowed &= !Format::USTAR;
            }
            if !gnu_ok {
                allowed &= !Format::GNU;
            }
            if (!ustar_ok || !gnu_ok) && !self.link_name.is_empty() {
                if allowed.contains(Format::PAX) {
                    overrides.insert("linkpath".to_string(), self.link_name.clone());
                } else {
                    reasons.push(format!("link_name {:?} does not fit any remaining format", self.link_name));
                }
            }
        }

        // uname / gname
        for (field, key) in [(&self.uname, "uname"), (&self.gname, "gname")] {
            let v = field.as_bytes();
            let ustar_ok = v.len() <= 32 && v.is_ascii();
            let gnu_ok = v.len() <= 32 && !v.contains(&0);
            if !ustar_ok {
                allowed &= !Format::USTAR;
            }
            if !gnu_ok {
                allowed &= !Format::GNU;
            }
            if (!ustar_ok || !gnu_ok) && !field.is_empty() {
                if allowed.contains(Format::PAX) {
                    overrides.insert(key.to_string(), (*field).clone());
                } else {
                    reasons.push(format!("{key} {field:?} does not fit any remaining format"));
                }
            }
        }

        // mode
        if !fits_in_octal(8, self.mode) {
            allowed &= !Format::USTAR;
        }
        if !fits_in_base256(8, self.mode) {
            allowed &= !Format::GNU;
        }

        // uid / gid
        for (field, key) in [(self.uid as i64, "uid"), (self.gid as i64, "gid")] {
            let ustar_ok = fits_in_octal(8, field);
            let gnu_ok = fits_in_base256(8, field);
            if !ustar_ok {
                allowed &= !Format::USTAR;
            }
            if !gnu_ok {
                allowed &= !Format::GNU;
            }
            if !ustar_ok {
                if allowed.contains(Format::PAX) {
                    overrides.insert(key.to_string(), field.to_string());
                } else if !gnu_ok {
                    reasons.push(format!("{key} {field} does not fit any remaining format"));
                }
            }
        }

        // size
        {
            let ustar_ok = fits_in_octal(12, self.size);
            let gnu_ok = fits_in_base256(12, self.size);
            if !ustar_ok {
                allowed &= !Format::USTAR;
            }
            if !gnu_ok {
                allowed &= !Format::GNU;
            }
            if !ustar_ok {
                if allowed.contains(Format::PAX) {
                    overrides.insert("size".to_string(), self.size.to_string());
                } else if !gnu_ok {
                    reasons.push(format!("size {} does not fit any remaining format", self.size));
                }
            }
        }

        // dev_major / dev_minor
        for field in [self.dev_major, self.dev_minor] {
            if !fits_in_octal(8, field) {
                allowed &= !Format::USTAR;
            }
            if !fits_in_base256(8, field) {
                allowed &= !Format::GNU;
            }
        }

        // mod_time
        {
            let whole_second = self.mod_time.nanoseconds == 0;
            let ustar_ok = whole_second && fits_in_octal(12, self.mod_time.seconds);
            let gnu_ok = fits_in_base256(12, self.mod_time.seconds);
            if !ustar_ok {
                allowed &= !Format::USTAR;
            }
            if !gnu_ok {
                allowed &= !Format::GNU;
            }
            if !whole_second {
                prefer_pax = true;
            }
            if !ustar_ok {
                if allowed.contains(Format::PAX) {
                    overrides.insert("mtime".to_string(), self.mod_time.to_pax_string());
                } else if !gnu_ok {
                    reasons.push("mod_time does not fit any remaining format".to_string());
                }
            }
        }

        // access_time / change_time: USTAR cannot represent these at all.
        for (ts, key) in [(self.access_time, "atime"), (self.change_time, "ctime")] {
            if !ts.is_zero() {
                allowed &= !Format::USTAR;
                if !fits_in_base256(12, ts.seconds) {
                    allowed &= !Format::GNU;
                }
                if allowed.contains(Format::PAX) {
                    overrides.insert(key.to_string(), ts.to_pax_string());
                }
            }
        }

        if prefer_pax && allowed.contains(Format::PAX) {
            allowed &= !Format::USTAR;
        }

        if let Some(requested) = Some(self.format).filter(|f| !f.is_empty()) {
            let mut intersected = requested & allowed;
            if requested.contains(Format::PAX) && !prefer_pax {
                intersected |= allowed & Format::USTAR;
            }
            allowed = intersected;
        }

        if allowed.is_empty() {
            if reasons.is_empty() {
                reasons.push("no remaining format left after field checks".to_string());
            }
            return Err(Error::NoFormatFits(reasons.join("; ")));
        }

        if !allowed.contains(Format::PAX) {
            overrides.clear();
        }

        Ok((allowed, overrides))
    }
}

/// True if `a` and `b` agree on every field *other than* name, flag, xattr,
/// pax_records and format (used to validate the XGlobalHeader restriction).
fn headers_equal_ignoring_listed_fields(a: &Header, b: &Header) -> bool {
    a.link_name == b.link_name
        && a.size == b.size
        && a.mode == b.mode
        && a.uid == b.uid
        && a.gid == b.gid
        && a.uname == b.uname
        && a.gname == b.gname
        && a.mod_time == b.mod_time
        && a.access_time == b.access_time
        && a.change_time == b.change_time
        && a.dev_major == b.dev_major
        && a.dev_minor == b.dev_minor
}

/// Splits `name` at a `/` boundary such that the suffix is <=100 bytes and
/// the prefix is <=155 ASCII bytes, as required by the USTAR `prefix` field.
/// Returns `(prefix, suffix)`.
#[must_use]
pub fn split_ustar_name(name: &str) -> Option<(&str, &str)> {
    let bytes = name.as_bytes();
    if bytes.len() <= 100 && bytes.is_ascii() {
        return Some(("", name));
    }
    if bytes.len() > 255 || !bytes.is_ascii() {
        return None;
    }
    // Find the rightmost '/' such that the suffix fits in 100 bytes.
    let mut split_at = None;
    for (i, b) in bytes.iter().enumerate() {
        if *b == b'/' && bytes.len() - (i + 1) <= 100 && i <= 155 {
            split_at = Some(i);
        }
    }
    let i = split_at?;
    Some((&name[..i], &name[i + 1..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_100_byte_name_fits_ustar_without_split() {
        let name = "a".repeat(100);
        let h = Header::new(TypeFlag::Reg, name.clone(), 0);
        let (allowed, _) = h.allowed_formats().unwrap();
        assert!(allowed.contains(Format::USTAR));
        assert_eq!(split_ustar_name(&name), Some(("", name.as_str())));
    }

    #[test]
    fn long_name_demotes_ustar_direct_fit() {
        let name = "ab".repeat(100);
        let h = Header::new(TypeFlag::Reg, name, 5);
        let (allowed, overrides) = h.allowed_formats().unwrap();
        assert!(allowed.contains(Format::PAX));
        assert!(overrides.contains_key("path"));
    }

    #[test]
    fn subsecond_mtime_forces_pax() {
        let mut h = Header::new(TypeFlag::Reg, "f", 0);
        h.mod_time = Timestamp::new(100, 500_000_000);
        let (allowed, overrides) = h.allowed_formats().unwrap();
        assert!(!allowed.contains(Format::USTAR));
        assert!(allowed.contains(Format::PAX));
        assert!(overrides.contains_key("mtime"));
    }

    #[test]
    fn access_time_requires_pax_or_gnu() {
        let mut h = Header::new(TypeFlag::Reg, "f", 0);
        h.access_time = Timestamp::new(1, 0);
        let (allowed, _) = h.allowed_formats().unwrap();
        assert!(!allowed.contains(Format::USTAR));
        assert!(allowed.contains(Format::PAX) || allowed.contains(Format::GNU));
    }

    #[test]
    fn xattr_locks_pax() {
        let mut h = Header::new(TypeFlag::Reg, "f", 5);
        h.xattr.insert("user.key".to_string(), "value".to_string());
        let (allowed, overrides) = h.allowed_formats().unwrap();
        assert_eq!(allowed, Format::PAX);
        assert_eq!(overrides.get("SCHILY.xattr.user.key").unwrap(), "value");
    }

    #[test]
    fn reserved_flags_are_rejected() {
        let h = Header::new(TypeFlag::XHeader, "x", 0);
        assert!(h.allowed_formats().is_err());
    }

    #[test]
    fn trailing_slash_on_regular_file_is_rejected() {
        let h = Header::new(TypeFlag::Reg, "dir/", 0);
        assert!(h.allowed_formats().is_err());
    }
}

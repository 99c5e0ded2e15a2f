//! Error taxonomy for the tar reader and writer.
//!
//! Small, composable `thiserror` enums per concern (checksum, octal
//! parsing, PAX records) joined under one crate-root error via `#[from]`,
//! rather than a single flat enum with a field per case.

use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error returned by [`crate::Reader`] and [`crate::Writer`].
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Checksum(#[from] ChecksumError),

    #[error(transparent)]
    Numeric(#[from] NumericError),

    #[error(transparent)]
    Pax(#[from] PaxError),

    #[error(transparent)]
    Sparse(#[from] SparseError),

    #[error("{0} exceeds the {1} byte limit for the {2} format")]
    Overflow(&'static str, usize, &'static str),

    #[error("no tar format can represent this header: {0}")]
    NoFormatFits(String),

    #[error("type flag {0:?} may not be constructed by callers; it is reserved for the encoder")]
    ReservedTypeFlag(crate::header::TypeFlag),

    #[error("regular-file header name {0:?} must not end with '/'")]
    TrailingSlashInName(String),

    #[error("a global PAX header may only set name, flag, xattr, pax_records and format")]
    InvalidGlobalHeader,

    #[error("wrote {written} bytes, more than the {declared} bytes declared in the header")]
    WriteTooLong { written: u64, declared: u64 },

    #[error("entry closed with {remaining} bytes of its declared size unwritten")]
    ShortWrite { remaining: u64 },

    #[error("unexpected non-zero block after a single zero block")]
    TruncatedTrailer,

    #[error("sparse map has more than the configured limit of {0} entries")]
    TooManySparseEntries(usize),

    #[error("entry name is {0} bytes, over the configured limit")]
    NameTooLong(usize),
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumError {
    #[error("header checksum mismatch: expected {expected}, computed {computed}")]
    Mismatch { expected: u64, computed: u64 },
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumericError {
    #[error("base-256 value overflows 64 bits")]
    Base256Overflow,
    #[error("octal field is not valid ASCII octal")]
    InvalidOctalDigits,
    #[error("value does not fit in {0} bytes")]
    DoesNotFit(usize),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PaxError {
    #[error("PAX record shorter than the minimum length of 5 bytes")]
    TooShort,
    #[error("PAX record is missing its terminating newline")]
    MissingNewline,
    #[error("PAX record key is empty")]
    EmptyKey,
    #[error("PAX record key contains NUL or '='")]
    InvalidKeyBytes,
    #[error("PAX record value for key {0:?} contains a NUL byte")]
    NulInValue(String),
    #[error("PAX record is not valid UTF-8")]
    InvalidUtf8,
    #[error("PAX record length prefix {0:?} is not a valid decimal number")]
    InvalidLength(String),
    #[error("GNU sparse offset/numbytes records are out of order; expected {0}")]
    SparseKeyOutOfOrder(&'static str),
    #[error("PAX record is {0} bytes, over the configured limit")]
    RecordTooLong(usize),
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SparseError {
    #[error("sparse entry offset or length is negative")]
    Negative,
    #[error("sparse entry offset+length overflows")]
    Overflow,
    #[error("sparse entry extends past the logical size {size}")]
    PastEnd { size: u64 },
    #[error("sparse entries overlap or are out of order")]
    OutOfOrder,
    #[error("sparse stream has unreferenced physical data left after the logical size was reached")]
    UnreferencedData,
    #[error("sparse stream ran out of physical data before the logical size was reached")]
    NonExistentData,
}

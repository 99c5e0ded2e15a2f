//! Streaming reader and writer for V7, USTAR, PAX, GNU and STAR tar
//! archives over synchronous, blocking I/O.
//!
//! [`Writer`] emits a [`Header`] plus its payload, picking the narrowest
//! format (USTAR, then GNU, then PAX) able to represent it and promoting to
//! PAX extended records or GNU long-name meta-headers as needed. [`Reader`]
//! parses a stream of blocks back into [`Header`]s, transparently absorbing
//! PAX and GNU meta-headers and exposing the entry payload through
//! [`std::io::Read`], including the sparse-file overlay.

mod block;
mod codec;
mod error;
mod header;
mod limits;
mod pax;
mod reader;
mod sparse;
mod writer;

pub use error::{ChecksumError, Error, NumericError, PaxError, Result, SparseError};
pub use header::{Format, Header, Timestamp, TypeFlag};
pub use limits::Limits;
pub use reader::Reader;
pub use sparse::{SparseEntry, SparseReader, SparseWriter};
pub use writer::Writer;

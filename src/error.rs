//! Error types shared by the dictionary and the compact list.
//!
//! Allocation failure is deliberately absent: it is fatal and goes through
//! the hook in [`crate::alloc`]. Lookups that miss return `None`, not an
//! error.

use thiserror::Error;

/// Recoverable failures of [`crate::Dict`] mutation entry points.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DictError {
    #[error("key already exists in the dictionary")]
    DuplicateKey,
}

/// A compact list buffer (or a position into one) failed a structural check.
///
/// Every offset carried here is a byte offset from the start of the buffer.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    #[error("buffer of {len} bytes is shorter than the fixed header and end marker")]
    Truncated { len: usize },
    #[error("total length field says {stored} bytes but the buffer holds {actual}")]
    LengthMismatch { stored: usize, actual: usize },
    #[error("buffer does not end with the 0xff end marker")]
    MissingEnd,
    #[error("entry at offset {offset} extends past the end of the buffer")]
    OutOfBounds { offset: usize },
    #[error("offset {offset} is not the start of an entry")]
    NotAnEntry { offset: usize },
    #[error("invalid encoding byte {byte:#04x} at offset {offset}")]
    InvalidEncoding { offset: usize, byte: u8 },
    #[error("entry at offset {offset} records a predecessor of {stored} bytes, actual {actual}")]
    PrevLenMismatch {
        offset: usize,
        stored: usize,
        actual: usize,
    },
    #[error("tail offset field is {stored}, last entry starts at {actual}")]
    TailMismatch { stored: usize, actual: usize },
    #[error("entry count field is {stored}, buffer holds {actual} entries")]
    CountMismatch { stored: usize, actual: usize },
}

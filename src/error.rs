//! Error types for the mapped store and the lift-over engine.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

/// Fatal errors from the mapped-store layer. These always propagate to the
/// caller; none of them are recoverable mid-session.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("allocation of {requested} bytes at offset {next_offset} would exceed file size {file_size}")]
    CapacityExceeded {
        next_offset: u64,
        requested: u64,
        file_size: u64,
    },

    #[error("version mismatch: file major version {file_major} incompatible with implementation major version {impl_major}")]
    VersionMismatch { file_major: u16, impl_major: u16 },

    #[error("invalid format tag: expected {expected:?}, found {found:?}")]
    FormatInvalid { expected: String, found: String },

    #[error("file is marked dirty; a previous writer did not close cleanly")]
    DirtyOnOpen,

    #[error("root object has not been registered")]
    NoRoot,

    #[error("store is open read-only")]
    ReadOnly,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("navigator error: {0}")]
    Navigator(String),
}

/// Soft, per-record failures from the lift-over engine. These are isolated to
/// the record that triggered them; the caller warns once and continues with
/// the next record.
#[derive(Error, Debug)]
pub enum LiftSkip {
    #[error("unknown chromosome: {0}")]
    MissingSequence(String),

    #[error("interval end {end} exceeds sequence length {seq_len} for {chrom}")]
    OutOfRange {
        chrom: String,
        end: u64,
        seq_len: u64,
    },

    #[error("blocked record type {bed_type} has an empty block list")]
    EmptyBlocks { bed_type: u8 },
}

/// Errors raised while lifting a single record. `Navigator` is fatal and
/// propagates out of `convert`; every other variant is caught by the engine
/// and turned into a one-line warning plus a skip.
#[derive(Error, Debug)]
pub enum LiftError {
    #[error(transparent)]
    Skip(#[from] LiftSkip),

    #[error("navigator error: {0}")]
    Navigator(#[from] StoreError),
}

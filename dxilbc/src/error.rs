//! Error types for dxilbc operations

use thiserror::Error;

/// Error type for bitcode decoding
///
/// Every variant aborts the current decode pass. Unknown blocks and unknown
/// record codes are skipped by the reader and never surface here.
#[derive(Error, Debug)]
pub enum Error {
    /// The stream does not start with the `'B' 'C' 0xC0DE` magic
    #[error("Invalid bitcode signature")]
    MalformedSignature,

    /// Block structure is inconsistent
    ///
    /// Raised for an unexpected entry kind (e.g. a record at the top level),
    /// an END_BLOCK without a matching ENTER_SUBBLOCK, a zero code width, or
    /// a skip target outside the stream.
    #[error("Malformed block: {0}")]
    MalformedBlock(String),

    /// A record has too few operands, an out-of-range id, or a misplaced
    /// array operand
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    /// An abbreviation definition cannot be used
    #[error("Invalid abbreviation: {0}")]
    InvalidAbbrev(String),

    /// A read ran past the end of the bit window
    #[error("Stream truncated at bit {bit}")]
    StreamTruncated {
        /// Absolute bit offset at which the data ran out
        bit: u64,
    },

    /// The outer container around the bitstream is inconsistent
    #[error("Malformed container: {0}")]
    MalformedContainer(String),

    /// IO error while reading an input file
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns a short name for the error kind, used in tree annotations.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::MalformedSignature => "MalformedSignature",
            Error::MalformedBlock(_) => "MalformedBlock",
            Error::InvalidRecord(_) => "InvalidRecord",
            Error::InvalidAbbrev(_) => "InvalidAbbrev",
            Error::StreamTruncated { .. } => "StreamTruncated",
            Error::MalformedContainer(_) => "MalformedContainer",
            Error::Io(_) => "Io",
        }
    }
}

/// Result type for dxilbc operations
pub type Result<T> = std::result::Result<T, Error>;

//! Reader for the LLVM bitstream embedded in DXIL shader blobs
//!
//! This crate decodes the bit-packed block and record structure of LLVM
//! bitcode into a tree of labelled nodes, each carrying the bit range it was
//! read from. The module reader also recovers a summary of module-level
//! facts (types, globals, functions, names) while it walks the stream.
//!
//! # Example
//!
//! ```no_run
//! use dxilbc::{DecodeBuilder, DecodeFlags};
//!
//! let bytes = std::fs::read("shader.dxbc").unwrap();
//!
//! // Find the bitcode inside the container and decode it
//! let result = DecodeBuilder::new(&bytes)
//!     .locate()
//!     .unwrap()
//!     .flags(DecodeFlags::MATERIALIZE_FUNCTIONS)
//!     .decode();
//!
//! print!("{}", result.tree);
//! if let Some(error) = result.error {
//!     eprintln!("decode stopped: {error}");
//! }
//! ```

mod abbrev;
mod bits;
mod block_info;
mod container;
mod cursor;
mod decode;
mod error;
mod flags;
pub mod ids;
pub mod module;
mod target;
mod tree;
pub mod types;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

#[cfg(test)]
mod tests;

pub use abbrev::{Abbrev, AbbrevOperand, Encoding, decode_char6, encode_char6};
pub use bits::BitReader;
pub use block_info::{BlockInfo, BlockInfoTable};
pub use container::{
    BitcodeLocation, BitcodeSource, DxbcContainer, DxbcPart, DxilProgramHeader, FourCC,
    locate_bitcode,
};
pub use cursor::{Entry, Record, StreamCursor};
pub use decode::{DecodeBuilder, DecodeResult, decode, decode_container, read_input};
pub use error::{Error, Result};
pub use flags::{AdvanceFlags, DecodeFlags};
pub use ids::BlockId;
pub use module::{ModuleInfo, ModuleProgress, ModuleReader};
pub use target::{ShaderKind, ShaderTarget};
pub use tree::{BitRange, NoTrace, Trace, TreeBuilder, TreeNode};
pub use types::{Type, TypeTable};

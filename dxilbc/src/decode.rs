//! Decode entry points

use crate::bits::BitReader;
use crate::container::{BitcodeLocation, locate_bitcode};
use crate::flags::DecodeFlags;
use crate::module::{ModuleInfo, ModuleProgress, ModuleReader};
use crate::tree::{TreeBuilder, TreeNode};
use crate::{Error, Result};
use std::path::Path;
use tracing::debug;

/// Result of a decode pass
///
/// A failed pass still carries the tree and module facts gathered up to the
/// failure; the tree is closed and its open nodes are marked `[incomplete]`.
#[derive(Debug)]
pub struct DecodeResult {
    /// Trace of every field the pass consumed
    pub tree: TreeNode,
    /// Module facts recovered by the pass
    pub module: ModuleInfo,
    /// The error that stopped the pass, if any
    pub error: Option<Error>,
    /// Where the module pass stopped, if it got as far as the module block
    pub progress: Option<ModuleProgress>,
    /// Where the bitcode was found, for [`DecodeBuilder::locate`] input
    pub location: Option<BitcodeLocation>,
}

impl DecodeResult {
    /// Returns true if the pass finished without an error.
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// Converts into a `Result`, dropping the partial tree on failure.
    pub fn into_result(self) -> Result<(TreeNode, ModuleInfo)> {
        match self.error {
            Some(error) => Err(error),
            None => Ok((self.tree, self.module)),
        }
    }
}

/// Builder for a decode pass with fluent API
///
/// # Example
/// ```
/// use dxilbc::{DecodeBuilder, DecodeFlags};
///
/// let bytes = [0x42, 0x43, 0xC0, 0xDE];
/// let result = DecodeBuilder::new(&bytes)
///     .window(0, 32)
///     .flags(DecodeFlags::empty())
///     .decode();
/// assert!(result.error.is_some());
/// ```
#[derive(Debug, Clone)]
pub struct DecodeBuilder<'a> {
    bytes: &'a [u8],
    start_bit: u64,
    length_bits: Option<u64>,
    flags: DecodeFlags,
    label: String,
    location: Option<BitcodeLocation>,
}

impl<'a> DecodeBuilder<'a> {
    /// Creates a builder over the whole of `bytes`.
    pub fn new(bytes: &'a [u8]) -> Self {
        DecodeBuilder {
            bytes,
            start_bit: 0,
            length_bits: None,
            flags: DecodeFlags::default(),
            label: "Bitcode".to_string(),
            location: None,
        }
    }

    /// Restricts decoding to `length_bits` bits starting at `start_bit`.
    pub fn window(mut self, start_bit: u64, length_bits: u64) -> Self {
        self.start_bit = start_bit;
        self.length_bits = Some(length_bits);
        self
    }

    /// Sets decode flags (replaces any existing flags).
    pub fn flags(mut self, flags: DecodeFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Adds decode flags (bitwise OR with existing).
    pub fn with_flags(mut self, flags: DecodeFlags) -> Self {
        self.flags |= flags;
        self
    }

    /// Sets the label of the tree root.
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Sets the window from the bitcode found in a container or wrapper.
    pub fn locate(mut self) -> Result<Self> {
        let location = locate_bitcode(self.bytes)?;
        debug!(
            source = %location.source,
            start_bit = location.start_bit,
            length_bits = location.length_bits,
            "located bitcode"
        );
        self.start_bit = location.start_bit;
        self.length_bits = Some(location.length_bits);
        if let Some(program) = &location.program {
            self.label = format!("{} {}", location.source, program.target);
        }
        self.location = Some(location);
        Ok(self)
    }

    /// Runs the pass.
    pub fn decode(self) -> DecodeResult {
        let available = self.bytes.len() as u64 * 8;
        let length_bits = self
            .length_bits
            .unwrap_or_else(|| available.saturating_sub(self.start_bit));

        let reader = match BitReader::with_window(self.bytes, self.start_bit, length_bits) {
            Ok(reader) => reader,
            Err(error) => {
                return DecodeResult {
                    tree: TreeBuilder::new(self.label).fail(&error),
                    module: ModuleInfo::default(),
                    error: Some(error),
                    progress: None,
                    location: self.location,
                };
            }
        };

        let mut module = ModuleReader::new(reader, TreeBuilder::new(self.label));
        let mut progress = None;
        let outcome = run(&mut module, self.flags, &mut progress);
        let (info, builder) = module.into_parts();

        let (tree, error) = match outcome {
            Ok(()) => (builder.finish(), None),
            Err(error) => (builder.fail(&error), Some(error)),
        };
        DecodeResult {
            tree,
            module: info,
            error,
            progress,
            location: self.location,
        }
    }
}

fn run(
    module: &mut ModuleReader<'_, TreeBuilder>,
    flags: DecodeFlags,
    progress: &mut Option<ModuleProgress>,
) -> Result<()> {
    let mut state = module.parse_module()?;
    *progress = Some(state);

    while let ModuleProgress::Suspended { .. } = state {
        if flags.contains(DecodeFlags::STOP_AT_SUSPEND) {
            return Ok(());
        }
        state = module.resume()?;
        *progress = Some(state);
    }

    if flags.contains(DecodeFlags::MATERIALIZE_FUNCTIONS) {
        module.materialize_all()?;
    }
    Ok(())
}

/// Decodes `length_bits` bits of `bytes` starting at `start_bit`.
///
/// Returns the tree built so far and the error that stopped the pass, if any.
pub fn decode(bytes: &[u8], start_bit: u64, length_bits: u64) -> (TreeNode, Option<Error>) {
    let result = DecodeBuilder::new(bytes)
        .window(start_bit, length_bits)
        .decode();
    (result.tree, result.error)
}

/// Locates the bitcode in raw bitcode, a wrapper or a `DXBC` container and
/// decodes it.
///
/// Fails only if the bitcode cannot be located; decode errors are reported in
/// [`DecodeResult::error`].
pub fn decode_container(bytes: &[u8]) -> Result<DecodeResult> {
    Ok(DecodeBuilder::new(bytes).locate()?.decode())
}

/// Reads an input file for decoding.
pub fn read_input(path: impl AsRef<Path>) -> Result<Vec<u8>> {
    let path = path.as_ref();
    let bytes = std::fs::read(path)?;
    debug!(path = %path.display(), len = bytes.len(), "read input");
    Ok(bytes)
}

//! Locating the bitstream inside a shader blob
//!
//! A compiled DXIL shader is a `DXBC` container whose `DXIL` part starts with
//! a program header and a DXIL header pointing at the LLVM bitcode. Raw
//! bitcode and the LLVM bitcode wrapper are accepted as well.

use crate::target::ShaderTarget;
use crate::{Error, Result};
use byteorder::{ByteOrder, LittleEndian};
use std::fmt;

const DXBC_HEADER_SIZE: usize = 32;
const PART_HEADER_SIZE: usize = 8;
const MAX_PARTS: u32 = 4096;

const WRAPPER_MAGIC: u32 = 0x0B17_C0DE;
const WRAPPER_HEADER_SIZE: usize = 20;

const PROGRAM_HEADER_SIZE: usize = 24;
/// Offset of the DXIL header inside the program header.
const DXIL_HEADER_OFFSET: usize = 8;

/// Four-character code naming a container or part
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCC(pub [u8; 4]);

impl FourCC {
    /// Container magic
    pub const DXBC: FourCC = FourCC(*b"DXBC");
    /// DXIL program part
    pub const DXIL: FourCC = FourCC(*b"DXIL");
    /// DXIL program with debug info
    pub const ILDB: FourCC = FourCC(*b"ILDB");

    /// Reads a code from the first four bytes of `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        bytes.get(..4)?.try_into().ok().map(FourCC)
    }
}

impl fmt::Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &byte in &self.0 {
            if byte.is_ascii_graphic() || byte == b' ' {
                write!(f, "{}", byte as char)?;
            } else {
                write!(f, "\\x{byte:02x}")?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FourCC(\"{self}\")")
    }
}

fn read_u32(bytes: &[u8], offset: usize, what: &str) -> Result<u32> {
    offset
        .checked_add(4)
        .and_then(|end| bytes.get(offset..end))
        .map(LittleEndian::read_u32)
        .ok_or_else(|| Error::MalformedContainer(format!("{what} at byte {offset} is out of bounds")))
}

/// One part of a `DXBC` container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DxbcPart<'a> {
    /// Part code
    pub fourcc: FourCC,
    /// Byte offset of the part's payload within the container
    pub offset: usize,
    /// Part payload
    pub data: &'a [u8],
}

/// A parsed `DXBC` container
#[derive(Debug, Clone)]
pub struct DxbcContainer<'a> {
    total_size: u32,
    parts: Vec<DxbcPart<'a>>,
}

impl<'a> DxbcContainer<'a> {
    /// Parses the container header and part table.
    pub fn parse(bytes: &'a [u8]) -> Result<Self> {
        if bytes.len() < DXBC_HEADER_SIZE {
            return Err(Error::MalformedContainer(format!(
                "{} bytes is too small for a DXBC header",
                bytes.len()
            )));
        }
        if FourCC::from_bytes(bytes) != Some(FourCC::DXBC) {
            return Err(Error::MalformedContainer("missing DXBC magic".into()));
        }

        let total_size = read_u32(bytes, 24, "total size")?;
        if total_size as usize > bytes.len() {
            return Err(Error::MalformedContainer(format!(
                "total size {total_size} exceeds buffer of {} bytes",
                bytes.len()
            )));
        }
        let bytes = &bytes[..total_size as usize];

        let count = read_u32(bytes, 28, "part count")?;
        if count > MAX_PARTS {
            return Err(Error::MalformedContainer(format!("part count {count} is too large")));
        }

        let mut parts = Vec::with_capacity(count as usize);
        for i in 0..count as usize {
            let offset = read_u32(bytes, DXBC_HEADER_SIZE + i * 4, "part offset")? as usize;
            let header = bytes
                .get(offset..)
                .filter(|rest| rest.len() >= PART_HEADER_SIZE)
                .ok_or_else(|| {
                    Error::MalformedContainer(format!("part {i} header at {offset} is out of bounds"))
                })?;
            let fourcc = FourCC::from_bytes(header)
                .ok_or_else(|| Error::MalformedContainer(format!("part {i} has no code")))?;
            let size = read_u32(header, 4, "part size")? as usize;
            let start = offset + PART_HEADER_SIZE;
            let data = start
                .checked_add(size)
                .and_then(|end| bytes.get(start..end))
                .ok_or_else(|| {
                    Error::MalformedContainer(format!("part {fourcc} of {size} bytes is out of bounds"))
                })?;
            parts.push(DxbcPart {
                fourcc,
                offset: start,
                data,
            });
        }

        Ok(DxbcContainer { total_size, parts })
    }

    /// Total size recorded in the header.
    pub fn total_size(&self) -> u32 {
        self.total_size
    }

    /// Parts in table order.
    pub fn parts(&self) -> &[DxbcPart<'a>] {
        &self.parts
    }

    /// Returns the first part with the given code.
    pub fn part(&self, fourcc: FourCC) -> Option<&DxbcPart<'a>> {
        self.parts.iter().find(|part| part.fourcc == fourcc)
    }
}

/// Program header at the start of a `DXIL` or `ILDB` part
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DxilProgramHeader {
    /// Shader kind and model
    pub target: ShaderTarget,
    /// Program size in 32-bit words, header included
    pub size_in_dwords: u32,
    /// DXIL major version
    pub dxil_major: u32,
    /// DXIL minor version
    pub dxil_minor: u32,
    /// Bitcode offset from the start of the DXIL header
    pub bitcode_offset: u32,
    /// Bitcode size in bytes
    pub bitcode_size: u32,
}

impl DxilProgramHeader {
    /// Parses the header and checks that the bitcode lies inside `data`.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < PROGRAM_HEADER_SIZE {
            return Err(Error::MalformedContainer(format!(
                "{} bytes is too small for a DXIL program header",
                data.len()
            )));
        }
        let version = read_u32(data, 0, "program version")?;
        let size_in_dwords = read_u32(data, 4, "program size")?;
        if FourCC::from_bytes(&data[DXIL_HEADER_OFFSET..]) != Some(FourCC::DXIL) {
            return Err(Error::MalformedContainer("missing DXIL magic in program header".into()));
        }
        let dxil_version = read_u32(data, 12, "DXIL version")?;
        let bitcode_offset = read_u32(data, 16, "bitcode offset")?;
        let bitcode_size = read_u32(data, 20, "bitcode size")?;

        let header = DxilProgramHeader {
            target: ShaderTarget::from_program_version(version),
            size_in_dwords,
            dxil_major: dxil_version >> 8,
            dxil_minor: dxil_version & 0xFF,
            bitcode_offset,
            bitcode_size,
        };
        let (start, end) = header.bitcode_bytes();
        if end > data.len() as u64 {
            return Err(Error::MalformedContainer(format!(
                "bitcode [{start}..{end}) exceeds part of {} bytes",
                data.len()
            )));
        }
        Ok(header)
    }

    /// Byte range of the bitcode relative to the part start.
    pub fn bitcode_bytes(&self) -> (u64, u64) {
        let start = DXIL_HEADER_OFFSET as u64 + u64::from(self.bitcode_offset);
        (start, start + u64::from(self.bitcode_size))
    }
}

/// Where the bitcode was found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitcodeSource {
    /// The whole input is bitcode
    Raw,
    /// Inside an LLVM bitcode wrapper
    Wrapper,
    /// Inside the named part of a `DXBC` container
    Dxbc(FourCC),
}

impl fmt::Display for BitcodeSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BitcodeSource::Raw => f.write_str("raw bitcode"),
            BitcodeSource::Wrapper => f.write_str("bitcode wrapper"),
            BitcodeSource::Dxbc(fourcc) => write!(f, "DXBC part {fourcc}"),
        }
    }
}

/// Result of [`locate_bitcode`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitcodeLocation {
    /// Container kind
    pub source: BitcodeSource,
    /// Program header, for `DXBC` input
    pub program: Option<DxilProgramHeader>,
    /// Absolute bit offset of the bitcode
    pub start_bit: u64,
    /// Bitcode length in bits
    pub length_bits: u64,
}

/// Finds the bitcode window in raw bitcode, a wrapper, or a `DXBC` container.
///
/// For containers the `DXIL` part is preferred over `ILDB`.
pub fn locate_bitcode(bytes: &[u8]) -> Result<BitcodeLocation> {
    if bytes.starts_with(b"BC") {
        return Ok(BitcodeLocation {
            source: BitcodeSource::Raw,
            program: None,
            start_bit: 0,
            length_bits: bytes.len() as u64 * 8,
        });
    }

    if bytes.len() >= 4 && LittleEndian::read_u32(bytes) == WRAPPER_MAGIC {
        if bytes.len() < WRAPPER_HEADER_SIZE {
            return Err(Error::MalformedContainer("truncated bitcode wrapper header".into()));
        }
        let offset = u64::from(read_u32(bytes, 8, "wrapper offset")?);
        let size = u64::from(read_u32(bytes, 12, "wrapper size")?);
        if offset + size > bytes.len() as u64 {
            return Err(Error::MalformedContainer(format!(
                "wrapped bitcode [{offset}..{}) exceeds buffer of {} bytes",
                offset + size,
                bytes.len()
            )));
        }
        return Ok(BitcodeLocation {
            source: BitcodeSource::Wrapper,
            program: None,
            start_bit: offset * 8,
            length_bits: size * 8,
        });
    }

    if FourCC::from_bytes(bytes) == Some(FourCC::DXBC) {
        let container = DxbcContainer::parse(bytes)?;
        let part = container
            .part(FourCC::DXIL)
            .or_else(|| container.part(FourCC::ILDB))
            .ok_or_else(|| Error::MalformedContainer("container has no DXIL or ILDB part".into()))?;
        let program = DxilProgramHeader::parse(part.data)?;
        let (start, end) = program.bitcode_bytes();
        let base = part.offset as u64;
        return Ok(BitcodeLocation {
            source: BitcodeSource::Dxbc(part.fourcc),
            program: Some(program),
            start_bit: (base + start) * 8,
            length_bits: (end - start) * 8,
        });
    }

    Err(Error::MalformedContainer(
        "input is not bitcode, a bitcode wrapper, or a DXBC container".into(),
    ))
}

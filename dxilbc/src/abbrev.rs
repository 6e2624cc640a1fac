//! Abbreviation definitions (DEFINE_ABBREV)

use crate::bits::{BitReader, MAX_CHUNK_WIDTH};
use crate::{Error, Result};
use std::fmt;

/// Encoding tag of a non-literal abbreviation operand, as stored in the
/// stream's 3-bit field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Encoding {
    /// Fixed-width field
    Fixed = 1,
    /// Variable-bit-rate field
    Vbr = 2,
    /// Length-prefixed sequence of the following operand
    Array = 3,
    /// Six-bit character `[a-zA-Z0-9._]`
    Char6 = 4,
    /// Length-prefixed, 32-bit aligned byte payload
    Blob = 5,
}

impl Encoding {
    /// Maps the 3-bit stream tag to an encoding.
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(Encoding::Fixed),
            2 => Some(Encoding::Vbr),
            3 => Some(Encoding::Array),
            4 => Some(Encoding::Char6),
            5 => Some(Encoding::Blob),
            _ => None,
        }
    }

    /// Returns true if the encoding is followed by a width in the stream.
    pub fn has_data(self) -> bool {
        matches!(self, Encoding::Fixed | Encoding::Vbr)
    }
}

/// One operand of an abbreviation.
///
/// Only `Fixed` and `Vbr` carry a width; a zero width never reaches this type
/// because it is normalized to `Literal(0)` when the definition is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AbbrevOperand {
    /// Value known from the definition; consumes no bits
    Literal(u64),
    /// Fixed field of the given width
    Fixed(u32),
    /// VBR field with chunks of the given width
    Vbr(u32),
    /// Array whose elements use the next operand
    Array,
    /// Six-bit character
    Char6,
    /// Byte blob
    Blob,
}

impl AbbrevOperand {
    /// Returns true if the operand reads exactly one value.
    pub fn is_scalar(&self) -> bool {
        !matches!(self, AbbrevOperand::Array | AbbrevOperand::Blob)
    }
}

impl fmt::Display for AbbrevOperand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbbrevOperand::Literal(value) => write!(f, "literal({value})"),
            AbbrevOperand::Fixed(width) => write!(f, "fixed({width})"),
            AbbrevOperand::Vbr(width) => write!(f, "vbr({width})"),
            AbbrevOperand::Array => f.write_str("array"),
            AbbrevOperand::Char6 => f.write_str("char6"),
            AbbrevOperand::Blob => f.write_str("blob"),
        }
    }
}

/// An abbreviation: the positional recipe for a record's fields.
///
/// The first operand encodes the record code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Abbrev {
    operands: Vec<AbbrevOperand>,
}

impl Abbrev {
    /// Creates an abbreviation from operands.
    pub fn new(operands: Vec<AbbrevOperand>) -> Result<Self> {
        if operands.is_empty() {
            return Err(Error::InvalidAbbrev("abbreviation with no operands".into()));
        }
        Ok(Abbrev { operands })
    }

    /// Reads the body of a DEFINE_ABBREV record.
    pub fn read_definition(reader: &mut BitReader<'_>) -> Result<Self> {
        let count = reader.read_vbr(5)?;
        if count == 0 {
            return Err(Error::InvalidAbbrev("abbreviation with no operands".into()));
        }

        let mut operands = Vec::with_capacity(count.min(64) as usize);
        for _ in 0..count {
            let is_literal = reader.read_fixed(1)? == 1;
            if is_literal {
                operands.push(AbbrevOperand::Literal(reader.read_vbr64(8)?));
                continue;
            }

            let tag = reader.read_fixed(3)?;
            let encoding = Encoding::from_code(tag)
                .ok_or_else(|| Error::InvalidAbbrev(format!("invalid encoding {tag}")))?;

            let operand = match encoding {
                Encoding::Fixed | Encoding::Vbr => {
                    let width = reader.read_vbr64(5)?;
                    if width > u64::from(MAX_CHUNK_WIDTH) {
                        return Err(Error::InvalidAbbrev(format!(
                            "fixed or VBR abbreviation with size {width} > MaxChunkData"
                        )));
                    }
                    let width = width as u32;
                    match (encoding, width) {
                        // Zero-width fields read nothing; treat them as literal zero.
                        (_, 0) => AbbrevOperand::Literal(0),
                        (Encoding::Vbr, 1) => {
                            return Err(Error::InvalidAbbrev("VBR abbreviation of width 1".into()));
                        }
                        (Encoding::Fixed, _) => AbbrevOperand::Fixed(width),
                        _ => AbbrevOperand::Vbr(width),
                    }
                }
                Encoding::Array => AbbrevOperand::Array,
                Encoding::Char6 => AbbrevOperand::Char6,
                Encoding::Blob => AbbrevOperand::Blob,
            };
            operands.push(operand);
        }

        Ok(Abbrev { operands })
    }

    /// Returns the operands in order.
    pub fn operands(&self) -> &[AbbrevOperand] {
        &self.operands
    }

    /// Returns the number of operands.
    pub fn len(&self) -> usize {
        self.operands.len()
    }

    /// Always false: an abbreviation has at least one operand.
    pub fn is_empty(&self) -> bool {
        self.operands.is_empty()
    }
}

impl fmt::Display for Abbrev {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, operand) in self.operands.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{operand}")?;
        }
        f.write_str("]")
    }
}

/// Decodes a six-bit character.
pub fn decode_char6(value: u32) -> Result<char> {
    let ch = match value {
        0..=25 => (b'a' + value as u8) as char,
        26..=51 => (b'A' + (value - 26) as u8) as char,
        52..=61 => (b'0' + (value - 52) as u8) as char,
        62 => '.',
        63 => '_',
        _ => return Err(Error::InvalidAbbrev(format!("invalid char6 value {value}"))),
    };
    Ok(ch)
}

/// Encodes a character as char6, if it is in the alphabet.
pub fn encode_char6(ch: char) -> Option<u32> {
    match ch {
        'a'..='z' => Some(ch as u32 - 'a' as u32),
        'A'..='Z' => Some(ch as u32 - 'A' as u32 + 26),
        '0'..='9' => Some(ch as u32 - '0' as u32 + 52),
        '.' => Some(62),
        '_' => Some(63),
        _ => None,
    }
}

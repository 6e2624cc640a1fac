//! Bit-level reader over a window of a byte buffer
//!
//! Bits are consumed least-significant first from 32-bit little-endian
//! words, which is the layout of the LLVM bitstream. The window may start at
//! any bit of the underlying buffer; word alignment is measured from the
//! window start.

use crate::{Error, Result};
use byteorder::{ByteOrder, LittleEndian};

/// Widest fixed field or VBR chunk the reader extracts in one step.
pub const MAX_CHUNK_WIDTH: u32 = 32;

const WORD_BITS: u64 = 32;
const WORD_BYTES: u64 = 4;

#[inline]
fn mask(width: u32) -> u64 {
    (1u64 << width) - 1
}

/// Cursor over a bit window of an immutable byte buffer.
///
/// Reads past the end of the window never touch memory outside the buffer:
/// the missing bits read as zero and the reader is flagged as truncated.
/// The checked helpers ([`read_fixed`](Self::read_fixed),
/// [`read_vbr`](Self::read_vbr), [`read_vbr64`](Self::read_vbr64)) turn that
/// flag into [`Error::StreamTruncated`].
#[derive(Debug, Clone)]
pub struct BitReader<'a> {
    data: &'a [u8],
    start_bit: u64,
    len_bits: u64,
    /// Window-relative index of the next byte to load.
    next_byte: u64,
    word: u64,
    bits_in_word: u32,
    truncated: bool,
}

impl<'a> BitReader<'a> {
    /// Creates a reader over the whole buffer.
    pub fn new(data: &'a [u8]) -> Self {
        BitReader {
            data,
            start_bit: 0,
            len_bits: data.len() as u64 * 8,
            next_byte: 0,
            word: 0,
            bits_in_word: 0,
            truncated: false,
        }
    }

    /// Creates a reader over `len_bits` bits starting at `start_bit`.
    ///
    /// Fails if the window does not fit inside `data`.
    pub fn with_window(data: &'a [u8], start_bit: u64, len_bits: u64) -> Result<Self> {
        let available = data.len() as u64 * 8;
        let end = start_bit
            .checked_add(len_bits)
            .ok_or(Error::StreamTruncated { bit: available })?;
        if end > available {
            return Err(Error::StreamTruncated { bit: available });
        }

        Ok(BitReader {
            start_bit,
            len_bits,
            ..BitReader::new(data)
        })
    }

    /// Absolute bit offset of the window start within the buffer.
    pub fn start_bit(&self) -> u64 {
        self.start_bit
    }

    /// Length of the window in bits.
    pub fn len_bits(&self) -> u64 {
        self.len_bits
    }

    /// Current position, relative to the window start.
    #[inline]
    pub fn bit_position(&self) -> u64 {
        self.next_byte * 8 - u64::from(self.bits_in_word)
    }

    /// Current position as an absolute bit offset into the buffer.
    #[inline]
    pub fn absolute_bit(&self) -> u64 {
        self.start_bit + self.bit_position()
    }

    /// Returns true once every bit of the window has been consumed.
    pub fn is_at_end(&self) -> bool {
        self.bit_position() >= self.len_bits
    }

    /// Returns true if a read has run past the end of the window.
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    /// Returns true if `pos` (window-relative) is inside the window or exactly
    /// one past its end.
    pub fn can_skip_to(&self, pos: u64) -> bool {
        pos <= self.len_bits
    }

    /// Reads the byte at window-relative byte `index`, zeroing any bits that
    /// fall past the window end. Returns `None` once the index is past the end.
    fn window_byte(&self, index: u64) -> Option<u8> {
        let rel = index.checked_mul(8)?;
        if rel >= self.len_bits {
            return None;
        }

        let abs = self.start_bit + rel;
        let at = usize::try_from(abs / 8).ok()?;
        let shift = (abs % 8) as u32;
        let lo = *self.data.get(at)?;
        let mut value = if shift == 0 {
            lo
        } else {
            let hi = self.data.get(at + 1).copied().unwrap_or(0);
            (((u16::from(hi) << 8) | u16::from(lo)) >> shift) as u8
        };

        let remaining = self.len_bits - rel;
        if remaining < 8 {
            value &= (1u8 << remaining) - 1;
        }
        Some(value)
    }

    /// Loads the next word. Fewer than four bytes are loaded at the end of
    /// the window; zero bytes once it is exhausted.
    fn fill_word(&mut self) {
        let first = self.next_byte;
        let fast = if self.start_bit % 8 == 0 && (first + WORD_BYTES) * 8 <= self.len_bits {
            usize::try_from(self.start_bit / 8 + first)
                .ok()
                .and_then(|at| self.data.get(at..at + WORD_BYTES as usize))
                .map(LittleEndian::read_u32)
        } else {
            None
        };

        let loaded = match fast {
            Some(word) => {
                self.word = u64::from(word);
                WORD_BYTES
            }
            None => {
                let mut word = 0u64;
                let mut count = 0;
                while count < WORD_BYTES {
                    match self.window_byte(first + count) {
                        Some(byte) => {
                            word |= u64::from(byte) << (8 * count);
                            count += 1;
                        }
                        None => break,
                    }
                }
                self.word = word;
                count
            }
        };

        self.next_byte += loaded;
        self.bits_in_word = (loaded * 8) as u32;
    }

    fn check_overrun(&mut self) {
        if self.bit_position() > self.len_bits {
            self.truncated = true;
        }
    }

    /// Reads `width` bits (1..=32).
    ///
    /// Bits past the end of the window read as zero and set the truncation
    /// flag; this never fails.
    pub fn read(&mut self, width: u32) -> u32 {
        debug_assert!(
            (1..=MAX_CHUNK_WIDTH).contains(&width),
            "invalid read width {width}"
        );

        if self.bits_in_word >= width {
            let value = self.word & mask(width);
            self.word >>= width;
            self.bits_in_word -= width;
            self.check_overrun();
            return value as u32;
        }

        // Take what is left of this word, then the rest from the next one.
        let have = self.bits_in_word;
        let mut value = self.word & mask(have);
        let need = width - have;

        self.fill_word();
        if self.bits_in_word < need {
            self.truncated = true;
            value |= self.word << have;
            self.word = 0;
            self.bits_in_word = 0;
        } else {
            value |= (self.word & mask(need)) << have;
            self.word >>= need;
            self.bits_in_word -= need;
        }

        self.check_overrun();
        value as u32
    }

    /// Reads a fixed-width field, failing if it runs past the window end.
    pub fn read_fixed(&mut self, width: u32) -> Result<u32> {
        let value = self.read(width);
        if self.truncated {
            return Err(Error::StreamTruncated {
                bit: self.absolute_bit(),
            });
        }
        Ok(value)
    }

    /// Reads a VBR-encoded value that must fit in 32 bits.
    pub fn read_vbr(&mut self, width: u32) -> Result<u32> {
        self.read_vbr_bounded(width, 32).map(|value| value as u32)
    }

    /// Reads a VBR-encoded value that must fit in 64 bits.
    pub fn read_vbr64(&mut self, width: u32) -> Result<u64> {
        self.read_vbr_bounded(width, 64)
    }

    /// Each chunk carries `width - 1` payload bits below a continuation bit.
    /// The chunk count is capped so a stream of set continuation bits cannot
    /// spin forever.
    fn read_vbr_bounded(&mut self, width: u32, value_bits: u32) -> Result<u64> {
        if !(2..=MAX_CHUNK_WIDTH).contains(&width) {
            return Err(Error::InvalidAbbrev(format!(
                "VBR width {width} is outside 2..={MAX_CHUNK_WIDTH}"
            )));
        }

        let payload_bits = width - 1;
        let continue_bit = 1u32 << payload_bits;
        let max_chunks = value_bits.div_ceil(payload_bits);

        let mut result: u128 = 0;
        let mut shift = 0u32;
        for _ in 0..max_chunks {
            let piece = self.read_fixed(width)?;
            result |= u128::from(piece & (continue_bit - 1)) << shift;
            if piece & continue_bit == 0 {
                if result >> value_bits != 0 {
                    break;
                }
                return Ok(result as u64);
            }
            shift += payload_bits;
        }

        Err(Error::InvalidRecord(format!(
            "VBR{width} value does not fit in {value_bits} bits"
        )))
    }

    /// Repositions the reader at window-relative bit `pos`.
    ///
    /// `pos` may equal the window length; anything past it is rejected.
    pub fn jump_to_bit(&mut self, pos: u64) -> Result<()> {
        if !self.can_skip_to(pos) {
            return Err(Error::StreamTruncated {
                bit: self.start_bit + pos,
            });
        }

        let word_start = pos - pos % WORD_BITS;
        self.next_byte = word_start / 8;
        self.word = 0;
        self.bits_in_word = 0;
        self.truncated = false;

        let within = (pos - word_start) as u32;
        if within > 0 {
            self.read(within);
        }
        Ok(())
    }

    /// Discards the rest of a partially consumed 32-bit word.
    pub fn skip_to_four_byte_boundary(&mut self) {
        let pos = self.bit_position();
        if pos % WORD_BITS == 0 {
            return;
        }
        self.next_byte = pos.next_multiple_of(WORD_BITS) / 8;
        self.word = 0;
        self.bits_in_word = 0;
    }
}

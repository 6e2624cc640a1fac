//! Stream and container builders for tests
//!
//! [`BitstreamWriter`] emits the same bit layout the reader consumes, so
//! tests can describe inputs field by field. [`build_container`] and
//! [`build_dxil_part`] wrap a bitstream the way a compiled shader does.

use crate::abbrev::{AbbrevOperand, encode_char6};
use crate::container::FourCC;
use crate::ids::{DEFINE_ABBREV, END_BLOCK, ENTER_SUBBLOCK, UNABBREV_RECORD};

/// Writes a bitstream least-significant bit first into 32-bit words.
#[derive(Debug, Clone, Default)]
pub struct BitstreamWriter {
    bytes: Vec<u8>,
    current: u64,
    bits_in_current: u32,
    code_width: u32,
    /// Open blocks as (outer code width, byte offset of the length word)
    blocks: Vec<(u32, usize)>,
}

impl BitstreamWriter {
    /// Creates a writer with the top-level code width of 2.
    pub fn new() -> Self {
        BitstreamWriter {
            code_width: 2,
            ..Default::default()
        }
    }

    /// Current bit position.
    pub fn position(&self) -> u64 {
        self.bytes.len() as u64 * 8 + u64::from(self.bits_in_current)
    }

    /// Code width of the innermost open block.
    pub fn code_width(&self) -> u32 {
        self.code_width
    }

    /// Writes the low `width` bits of `value` (width 0..=32).
    pub fn emit(&mut self, value: u32, width: u32) {
        assert!(width <= 32, "emit width {width}");
        if width == 0 {
            return;
        }
        let value = u64::from(value) & ((1u64 << width) - 1);
        self.current |= value << self.bits_in_current;
        self.bits_in_current += width;
        while self.bits_in_current >= 8 {
            self.bytes.push(self.current as u8);
            self.current >>= 8;
            self.bits_in_current -= 8;
        }
    }

    /// Writes a 32-bit VBR value.
    pub fn emit_vbr(&mut self, value: u32, width: u32) {
        self.emit_vbr64(u64::from(value), width);
    }

    /// Writes a 64-bit VBR value.
    pub fn emit_vbr64(&mut self, mut value: u64, width: u32) {
        assert!((2..=32).contains(&width), "VBR width {width}");
        let payload = width - 1;
        let threshold = 1u64 << payload;
        while value >= threshold {
            self.emit(((value & (threshold - 1)) | threshold) as u32, width);
            value >>= payload;
        }
        self.emit(value as u32, width);
    }

    /// Pads with zero bits up to the next 32-bit boundary.
    pub fn align32(&mut self) {
        let pad = (32 - (self.position() % 32) as u32) % 32;
        self.emit(0, pad);
    }

    /// Writes the `BC 0xC0DE` signature.
    pub fn emit_magic(&mut self) {
        self.emit(u32::from(b'B'), 8);
        self.emit(u32::from(b'C'), 8);
        self.emit(0x0, 4);
        self.emit(0xC, 4);
        self.emit(0xE, 4);
        self.emit(0xD, 4);
    }

    /// Writes an abbreviation id in the current code width.
    pub fn emit_abbrev_id(&mut self, id: u32) {
        self.emit(id, self.code_width);
    }

    /// Opens a block; the length word is filled in by [`end_block`](Self::end_block).
    pub fn enter_subblock(&mut self, block_id: u32, code_width: u32) {
        self.emit_abbrev_id(ENTER_SUBBLOCK);
        self.emit_vbr(block_id, 8);
        self.emit_vbr(code_width, 4);
        self.align32();
        let length_at = self.bytes.len();
        self.emit(0, 32);
        self.blocks.push((self.code_width, length_at));
        self.code_width = code_width;
    }

    /// Closes the innermost block and backpatches its length.
    pub fn end_block(&mut self) {
        self.emit_abbrev_id(END_BLOCK);
        self.align32();
        let (outer_width, length_at) = self.blocks.pop().expect("end_block without a block");
        let words = ((self.bytes.len() - length_at - 4) / 4) as u32;
        self.bytes[length_at..length_at + 4].copy_from_slice(&words.to_le_bytes());
        self.code_width = outer_width;
    }

    /// Writes a raw END_BLOCK id with no block bookkeeping.
    pub fn emit_stray_end_block(&mut self) {
        self.emit_abbrev_id(END_BLOCK);
        self.align32();
    }

    /// Writes an UNABBREV_RECORD.
    pub fn emit_unabbrev_record(&mut self, code: u32, values: &[u64]) {
        self.emit_abbrev_id(UNABBREV_RECORD);
        self.emit_vbr(code, 6);
        self.emit_vbr(values.len() as u32, 6);
        for &value in values {
            self.emit_vbr64(value, 6);
        }
    }

    /// Writes an UNABBREV_RECORD whose operands are the bytes of `text`.
    pub fn emit_string_record(&mut self, code: u32, text: &str) {
        let values: Vec<u64> = text.bytes().map(u64::from).collect();
        self.emit_unabbrev_record(code, &values);
    }

    /// Writes a DEFINE_ABBREV record.
    pub fn emit_define_abbrev(&mut self, operands: &[AbbrevOperand]) {
        self.emit_abbrev_id(DEFINE_ABBREV);
        self.emit_abbrev_body(operands);
    }

    /// Writes the body of a DEFINE_ABBREV record without the abbreviation id.
    pub fn emit_abbrev_body(&mut self, operands: &[AbbrevOperand]) {
        self.emit_vbr(operands.len() as u32, 5);
        for operand in operands {
            match *operand {
                AbbrevOperand::Literal(value) => {
                    self.emit(1, 1);
                    self.emit_vbr64(value, 8);
                }
                AbbrevOperand::Fixed(width) => {
                    self.emit(0, 1);
                    self.emit(1, 3);
                    self.emit_vbr(width, 5);
                }
                AbbrevOperand::Vbr(width) => {
                    self.emit(0, 1);
                    self.emit(2, 3);
                    self.emit_vbr(width, 5);
                }
                AbbrevOperand::Array => {
                    self.emit(0, 1);
                    self.emit(3, 3);
                }
                AbbrevOperand::Char6 => {
                    self.emit(0, 1);
                    self.emit(4, 3);
                }
                AbbrevOperand::Blob => {
                    self.emit(0, 1);
                    self.emit(5, 3);
                }
            }
        }
    }

    /// Writes one scalar field with the given operand encoding.
    pub fn emit_scalar(&mut self, operand: AbbrevOperand, value: u64) {
        match operand {
            AbbrevOperand::Literal(_) => {}
            AbbrevOperand::Fixed(width) => self.emit(value as u32, width),
            AbbrevOperand::Vbr(width) => self.emit_vbr64(value, width),
            AbbrevOperand::Char6 => self.emit(value as u32, 6),
            AbbrevOperand::Array | AbbrevOperand::Blob => {
                panic!("{operand} is not a scalar operand")
            }
        }
    }

    /// Writes an array body: VBR6 length, then each element.
    pub fn emit_array(&mut self, element: AbbrevOperand, values: &[u64]) {
        self.emit_vbr(values.len() as u32, 6);
        for &value in values {
            self.emit_scalar(element, value);
        }
    }

    /// Writes an array body of char6 characters.
    pub fn emit_char6_array(&mut self, text: &str) {
        let values: Vec<u64> = text
            .chars()
            .map(|ch| u64::from(encode_char6(ch).expect("character outside the char6 set")))
            .collect();
        self.emit_array(AbbrevOperand::Char6, &values);
    }

    /// Writes a blob body: VBR6 length, alignment, bytes, alignment.
    pub fn emit_blob(&mut self, data: &[u8]) {
        self.emit_vbr(data.len() as u32, 6);
        self.align32();
        for &byte in data {
            self.emit(u32::from(byte), 8);
        }
        self.align32();
    }

    /// Returns the bytes written so far, padded to a 32-bit boundary.
    pub fn finish(mut self) -> Vec<u8> {
        self.align32();
        self.bytes
    }
}

/// Builds a minimal `DXBC` container holding the given parts.
///
/// The checksum is left zeroed; the reader does not verify it.
pub fn build_container(parts: &[(FourCC, &[u8])]) -> Vec<u8> {
    let header_size = 4 + 16 + 4 + 4 + 4 + 4 * parts.len();
    let mut out = Vec::with_capacity(header_size);

    out.extend_from_slice(b"DXBC");
    out.extend_from_slice(&[0u8; 16]);
    out.extend_from_slice(&1u32.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&(parts.len() as u32).to_le_bytes());

    let offsets_at = out.len();
    out.resize(offsets_at + 4 * parts.len(), 0);

    for (i, (fourcc, data)) in parts.iter().enumerate() {
        let offset = out.len() as u32;
        out[offsets_at + i * 4..offsets_at + i * 4 + 4].copy_from_slice(&offset.to_le_bytes());
        out.extend_from_slice(&fourcc.0);
        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
        out.extend_from_slice(data);
    }

    let total = out.len() as u32;
    out[24..28].copy_from_slice(&total.to_le_bytes());
    out
}

/// Builds the payload of a `DXIL` part: program header, DXIL header, and
/// `bitcode` at offset 16 from the DXIL header.
pub fn build_dxil_part(bitcode: &[u8], program_version: u32, dxil_version: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(24 + bitcode.len());
    let dwords = ((24 + bitcode.len()) / 4) as u32;

    out.extend_from_slice(&program_version.to_le_bytes());
    out.extend_from_slice(&dwords.to_le_bytes());
    out.extend_from_slice(b"DXIL");
    out.extend_from_slice(&dxil_version.to_le_bytes());
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&(bitcode.len() as u32).to_le_bytes());
    out.extend_from_slice(bitcode);
    out
}

/// Wraps `bitcode` in an LLVM bitcode wrapper header.
pub fn build_wrapper(bitcode: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(20 + bitcode.len());
    out.extend_from_slice(&0x0B17_C0DEu32.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&20u32.to_le_bytes());
    out.extend_from_slice(&(bitcode.len() as u32).to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(bitcode);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bits::BitReader;

    #[test]
    fn test_block_length_is_backpatched() {
        let mut writer = BitstreamWriter::new();
        writer.emit_magic();
        writer.enter_subblock(8, 3);
        writer.emit_unabbrev_record(1, &[1]);
        writer.end_block();
        let bytes = writer.finish();

        // magic | abbrev id, block id, code width, pad | length
        let length = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
        assert_eq!(length as usize, (bytes.len() - 12) / 4);
    }

    #[test]
    fn test_container_roundtrips_through_parser() {
        let payload = [1u8, 2, 3, 4];
        let bytes = build_container(&[(FourCC(*b"SHDR"), &payload[..])]);
        let container = crate::container::DxbcContainer::parse(&bytes).unwrap();
        assert_eq!(container.total_size() as usize, bytes.len());
        assert_eq!(container.part(FourCC(*b"SHDR")).unwrap().data, &payload);
    }

    #[test]
    fn test_blob_body_layout() {
        let mut writer = BitstreamWriter::new();
        writer.emit_blob(b"abc");
        let bytes = writer.finish();
        assert_eq!(bytes.len(), 8);

        let mut reader = BitReader::new(&bytes);
        assert_eq!(reader.read_vbr(6).unwrap(), 3);
        reader.skip_to_four_byte_boundary();
        assert_eq!(reader.read(8), u32::from(b'a'));
    }
}

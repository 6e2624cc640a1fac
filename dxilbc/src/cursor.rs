//! Stream cursor: abbreviation ids, block scopes and records
//!
//! [`StreamCursor`] reads the structural layer of the bitstream. It resolves
//! abbreviation ids against the scope stack, enters and leaves blocks, and
//! decodes records into [`Record`] values. Every field it consumes is
//! reported to its [`Trace`] with the field's bit range.

use crate::abbrev::{Abbrev, AbbrevOperand, decode_char6};
use crate::bits::{BitReader, MAX_CHUNK_WIDTH};
use crate::block_info::BlockInfoTable;
use crate::flags::AdvanceFlags;
use crate::ids::{self, BlockId};
use crate::tree::Trace;
use crate::{Error, Result};
use std::fmt;
use std::mem;
use std::rc::Rc;
use tracing::{debug, trace};

/// Values shown in a record label before it is elided.
const LABEL_VALUES: usize = 16;

/// What [`StreamCursor::advance`] found next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entry {
    /// The current block ended
    EndBlock,
    /// A sub-block with this id starts; enter or skip it next
    SubBlock(u32),
    /// A record with this abbreviation id follows; read it next
    Record(u32),
}

/// A decoded record.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Record {
    /// Abbreviation id the record was written with
    pub abbrev_id: u32,
    /// Record code
    pub code: u32,
    /// Operand values in stream order (blob excluded)
    pub values: Vec<u64>,
    /// Blob payload, if the abbreviation has a blob operand
    pub blob: Option<Vec<u8>>,
}

impl Record {
    /// Returns operand `index`, failing if the record is too short.
    pub fn value(&self, index: usize) -> Result<u64> {
        self.values.get(index).copied().ok_or_else(|| {
            Error::InvalidRecord(format!(
                "record {} has {} operands, needs at least {}",
                self.code,
                self.values.len(),
                index + 1
            ))
        })
    }

    /// Interprets the operands from `start` on as characters.
    pub fn string_from(&self, start: usize) -> Result<String> {
        self.string_between(start, self.values.len())
    }

    /// Interprets operands `start..end` as characters.
    pub fn string_between(&self, start: usize, end: usize) -> Result<String> {
        let values = self.values.get(start..end).unwrap_or(&[]);
        let bytes = values
            .iter()
            .map(|&value| {
                u8::try_from(value).map_err(|_| {
                    Error::InvalidRecord(format!(
                        "character value {value} in record {} does not fit in a byte",
                        self.code
                    ))
                })
            })
            .collect::<Result<Vec<u8>>>()?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

/// Saved state of an enclosing block.
#[derive(Debug)]
struct Scope {
    code_width: u32,
    abbrevs: Vec<Rc<Abbrev>>,
    block_id: Option<u32>,
}

/// Abbreviation id (and block id) read by `advance` but not yet traced.
/// They are emitted into the node the caller opens next.
#[derive(Debug, Clone, Copy)]
struct PendingEntry {
    start: u64,
    end: u64,
    abbrev_id: u32,
    block: Option<(u64, u32)>,
}

#[derive(Debug, Clone, Copy)]
enum Field {
    Code,
    Value(usize),
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::Code => f.write_str("code"),
            Field::Value(index) => write!(f, "value[{index}]"),
        }
    }
}

struct BlockLabel<'t> {
    block_id: u32,
    registered: Option<&'t str>,
}

impl fmt::Display for BlockLabel<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.registered {
            Some(name) => f.write_str(name),
            None => write!(f, "{}", BlockId::from(self.block_id)),
        }
    }
}

fn block_label(table: &BlockInfoTable, block_id: u32) -> BlockLabel<'_> {
    BlockLabel {
        block_id,
        registered: table.get(block_id).and_then(|info| info.name.as_deref()),
    }
}

/// Name of `code` in `block_id`: a SETRECORDNAME override, then the static
/// table.
fn record_name(table: &BlockInfoTable, block_id: Option<u32>, code: u32) -> Option<&str> {
    let block_id = block_id?;
    table
        .get(block_id)
        .and_then(|info| info.record_name(code))
        .or_else(|| BlockId::from(block_id).record_name(code))
}

/// Label of a record node: name, the first values, and the blob size.
struct RecordLabel<'r> {
    name: Option<&'r str>,
    record: &'r Record,
}

impl fmt::Display for RecordLabel<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name {
            Some(name) => f.write_str(name)?,
            None => write!(f, "record {}", self.record.code)?,
        }
        let values = &self.record.values;
        if !values.is_empty() {
            f.write_str(" [")?;
            for (i, value) in values.iter().take(LABEL_VALUES).enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{value}")?;
            }
            if values.len() > LABEL_VALUES {
                write!(f, ", ... {} more", values.len() - LABEL_VALUES)?;
            }
            f.write_str("]")?;
        }
        if let Some(blob) = &self.record.blob {
            write!(f, " blob({} bytes)", blob.len())?;
        }
        Ok(())
    }
}

/// Reader for the block and record structure of one bitstream window.
pub struct StreamCursor<'a, T: Trace> {
    reader: BitReader<'a>,
    code_width: u32,
    abbrevs: Vec<Rc<Abbrev>>,
    block_id: Option<u32>,
    scopes: Vec<Scope>,
    block_info: BlockInfoTable,
    trace: T,
    pending: Option<PendingEntry>,
}

impl<'a, T: Trace> StreamCursor<'a, T> {
    /// Creates a cursor at the reader's position, outside any block.
    pub fn new(reader: BitReader<'a>, trace: T) -> Self {
        StreamCursor {
            reader,
            code_width: ids::TOP_LEVEL_CODE_WIDTH,
            abbrevs: Vec::new(),
            block_id: None,
            scopes: Vec::new(),
            block_info: BlockInfoTable::new(),
            trace,
            pending: None,
        }
    }

    /// Hands a BLOCKINFO table read elsewhere to this cursor.
    pub fn with_block_info(mut self, table: BlockInfoTable) -> Self {
        self.block_info = table;
        self
    }

    /// Moves the BLOCKINFO table out of this cursor.
    pub fn take_block_info(&mut self) -> BlockInfoTable {
        self.block_info.take()
    }

    /// The BLOCKINFO table read so far.
    pub fn block_info(&self) -> &BlockInfoTable {
        &self.block_info
    }

    /// The underlying bit reader.
    pub fn reader(&self) -> &BitReader<'a> {
        &self.reader
    }

    /// The trace receiving decode progress.
    pub fn trace_mut(&mut self) -> &mut T {
        &mut self.trace
    }

    /// Consumes the cursor, returning its trace.
    pub fn into_trace(self) -> T {
        self.trace
    }

    /// Number of open blocks.
    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    /// Id of the innermost open block.
    pub fn block_id(&self) -> Option<u32> {
        self.block_id
    }

    /// Abbreviation id width of the current block.
    pub fn code_width(&self) -> u32 {
        self.code_width
    }

    /// Abbreviations of the current block; index `i` is abbreviation id `i + 4`.
    pub fn abbrevs(&self) -> &[Rc<Abbrev>] {
        &self.abbrevs
    }

    /// Window-relative bit position.
    pub fn bit_position(&self) -> u64 {
        self.reader.bit_position()
    }

    /// Absolute bit position.
    pub fn absolute_bit(&self) -> u64 {
        self.reader.absolute_bit()
    }

    /// Returns true once the window is exhausted.
    pub fn is_at_end(&self) -> bool {
        self.reader.is_at_end()
    }

    /// Moves to window-relative bit `pos` without changing the scope stack.
    pub fn jump_to_bit(&mut self, pos: u64) -> Result<()> {
        self.pending = None;
        self.reader.jump_to_bit(pos)
    }

    /// Reads and checks the `BC 0xC0DE` signature.
    ///
    /// All 32 signature bits are consumed whether or not they match.
    pub fn read_signature(&mut self) -> Result<()> {
        const SIGNATURE: [(u32, u32); 6] = [
            (8, b'B' as u32),
            (8, b'C' as u32),
            (4, 0x0),
            (4, 0xC),
            (4, 0xE),
            (4, 0xD),
        ];

        let start = self.reader.absolute_bit();
        let mut matches = true;
        for (width, expected) in SIGNATURE {
            if self.reader.read(width) != expected {
                matches = false;
            }
        }
        if !matches || self.reader.is_truncated() {
            return Err(Error::MalformedSignature);
        }
        self.trace.leaf(
            start,
            self.reader.absolute_bit(),
            format_args!("signature 'BC' 0xC0DE"),
        );
        Ok(())
    }

    /// Reads the next abbreviation id and classifies it.
    ///
    /// DEFINE_ABBREV is handled in place unless
    /// [`AdvanceFlags::DONT_AUTOPROCESS_ABBREVS`] is set. END_BLOCK leaves the
    /// block unless [`AdvanceFlags::DONT_POP_BLOCK_AT_END`] is set.
    pub fn advance(&mut self, flags: AdvanceFlags) -> Result<Entry> {
        loop {
            let start = self.reader.absolute_bit();
            let abbrev_id = self.reader.read_fixed(self.code_width)?;
            let end = self.reader.absolute_bit();
            self.pending = Some(PendingEntry {
                start,
                end,
                abbrev_id,
                block: None,
            });

            match abbrev_id {
                ids::END_BLOCK => {
                    self.flush_pending();
                    if self.scopes.is_empty() {
                        return Err(Error::MalformedBlock(
                            "END_BLOCK outside of any block".into(),
                        ));
                    }
                    if !flags.contains(AdvanceFlags::DONT_POP_BLOCK_AT_END) {
                        self.read_block_end()?;
                    }
                    return Ok(Entry::EndBlock);
                }
                ids::ENTER_SUBBLOCK => {
                    let block_id = self.reader.read_vbr(8)?;
                    if let Some(pending) = self.pending.as_mut() {
                        pending.block = Some((self.reader.absolute_bit(), block_id));
                    }
                    return Ok(Entry::SubBlock(block_id));
                }
                ids::DEFINE_ABBREV
                    if !flags.contains(AdvanceFlags::DONT_AUTOPROCESS_ABBREVS) =>
                {
                    self.read_abbrev_record()?;
                }
                _ => return Ok(Entry::Record(abbrev_id)),
            }
        }
    }

    fn flush_pending(&mut self) {
        let Some(pending) = self.pending.take() else {
            return;
        };
        match ids::abbrev_id_name(pending.abbrev_id) {
            Some(name) => self.trace.leaf(
                pending.start,
                pending.end,
                format_args!("abbrev id = {} ({name})", pending.abbrev_id),
            ),
            None => self.trace.leaf(
                pending.start,
                pending.end,
                format_args!("abbrev id = {}", pending.abbrev_id),
            ),
        }
        if let Some((end, block_id)) = pending.block {
            self.trace
                .leaf(pending.end, end, format_args!("block id = {block_id}"));
        }
    }

    fn align_traced(&mut self) {
        let start = self.reader.absolute_bit();
        self.reader.skip_to_four_byte_boundary();
        let end = self.reader.absolute_bit();
        if end > start {
            self.trace.leaf(start, end, format_args!("align32"));
        }
    }

    /// Reads the code width and length of a block header.
    fn read_block_header(&mut self) -> Result<(u32, u32)> {
        let start = self.reader.absolute_bit();
        let code_width = self.reader.read_vbr(4)?;
        self.trace.leaf(
            start,
            self.reader.absolute_bit(),
            format_args!("code width = {code_width}"),
        );
        self.align_traced();
        let start = self.reader.absolute_bit();
        let words = self.reader.read_fixed(32)?;
        self.trace.leaf(
            start,
            self.reader.absolute_bit(),
            format_args!("block length = {words} words"),
        );
        Ok((code_width, words))
    }

    /// Enters a block whose ENTER_SUBBLOCK and id were just read.
    ///
    /// The new block starts with the BLOCKINFO abbreviations for `block_id`.
    /// Returns the block length in 32-bit words.
    pub fn enter_sub_block(&mut self, block_id: u32) -> Result<u32> {
        let label = block_label(&self.block_info, block_id);
        self.trace.push(format_args!("{label}"));
        self.flush_pending();

        let outer = Scope {
            code_width: self.code_width,
            abbrevs: mem::take(&mut self.abbrevs),
            block_id: self.block_id,
        };
        self.scopes.push(outer);
        self.block_id = Some(block_id);
        if let Some(info) = self.block_info.get(block_id) {
            self.abbrevs.extend(info.abbrevs.iter().cloned());
        }

        let (code_width, words) = self.read_block_header()?;
        if code_width == 0 || code_width > MAX_CHUNK_WIDTH {
            return Err(Error::MalformedBlock(format!(
                "block {block_id} has code width {code_width}"
            )));
        }
        if self.reader.is_at_end() {
            return Err(Error::StreamTruncated {
                bit: self.reader.absolute_bit(),
            });
        }
        self.code_width = code_width;

        debug!(
            block_id,
            code_width,
            words,
            depth = self.scopes.len(),
            "entered block"
        );
        Ok(words)
    }

    /// Skips a block whose ENTER_SUBBLOCK and id were just read.
    ///
    /// The body shows up as one `skipped` leaf.
    pub fn skip_block(&mut self, block_id: u32) -> Result<()> {
        let label = block_label(&self.block_info, block_id);
        self.trace.push(format_args!("{label} (skipped)"));
        self.flush_pending();

        let (_, words) = self.read_block_header()?;
        let body = self.reader.bit_position();
        let target = body + u64::from(words) * 32;
        if !self.reader.can_skip_to(target) {
            return Err(Error::MalformedBlock(format!(
                "block {block_id} of {words} words runs past the end of the stream"
            )));
        }
        let start = self.reader.absolute_bit();
        self.reader.jump_to_bit(target)?;
        self.trace.leaf(
            start,
            self.reader.absolute_bit(),
            format_args!("skipped {words} words"),
        );
        self.trace.pop();

        debug!(block_id, words, "skipped block");
        Ok(())
    }

    /// Finishes the current block after its END_BLOCK and restores the outer
    /// scope.
    pub fn read_block_end(&mut self) -> Result<()> {
        let Some(scope) = self.scopes.pop() else {
            return Err(Error::MalformedBlock(
                "read block end without matching start".into(),
            ));
        };
        self.align_traced();
        self.trace.pop();

        trace!(block_id = ?self.block_id, "left block");
        self.code_width = scope.code_width;
        self.abbrevs = scope.abbrevs;
        self.block_id = scope.block_id;
        Ok(())
    }

    /// Reads a DEFINE_ABBREV body and adds the abbreviation to the current
    /// block.
    pub fn read_abbrev_record(&mut self) -> Result<Rc<Abbrev>> {
        self.trace.push(format_args!("DEFINE_ABBREV"));
        self.flush_pending();

        let start = self.reader.absolute_bit();
        let abbrev = Rc::new(Abbrev::read_definition(&mut self.reader)?);
        self.trace.leaf(
            start,
            self.reader.absolute_bit(),
            format_args!("operands = {abbrev}"),
        );

        let id = ids::FIRST_APPLICATION_ABBREV as usize + self.abbrevs.len();
        self.trace
            .relabel(format_args!("DEFINE_ABBREV {abbrev} -> abbrev id {id}"));
        self.trace.pop();

        self.abbrevs.push(Rc::clone(&abbrev));
        Ok(abbrev)
    }

    /// Reads the record whose abbreviation id `advance` returned.
    pub fn read_record(&mut self, abbrev_id: u32) -> Result<Record> {
        self.trace.push(format_args!("record"));
        self.flush_pending();

        let record = match abbrev_id {
            ids::UNABBREV_RECORD => self.read_unabbrev_record()?,
            id if id >= ids::FIRST_APPLICATION_ABBREV => self.read_abbreviated_record(id)?,
            id => {
                return Err(Error::InvalidRecord(format!(
                    "abbrev id {id} does not start a record"
                )));
            }
        };

        let name = record_name(&self.block_info, self.block_id, record.code);
        self.trace.relabel(format_args!(
            "{}",
            RecordLabel {
                name,
                record: &record
            }
        ));
        self.trace.pop();

        trace!(
            block_id = ?self.block_id,
            code = record.code,
            operands = record.values.len(),
            "record"
        );
        Ok(record)
    }

    /// Appends `summary` to the label of the record just read.
    pub fn annotate_record(&mut self, record: &Record, summary: fmt::Arguments<'_>) {
        let name = record_name(&self.block_info, self.block_id, record.code);
        self.trace
            .relabel_last(format_args!("{}: {summary}", RecordLabel { name, record }));
    }

    fn read_unabbrev_record(&mut self) -> Result<Record> {
        let start = self.reader.absolute_bit();
        let code = self.reader.read_vbr(6)?;
        self.trace.leaf(
            start,
            self.reader.absolute_bit(),
            format_args!("code = {code}"),
        );

        let start = self.reader.absolute_bit();
        let count = self.reader.read_vbr(6)?;
        self.trace.leaf(
            start,
            self.reader.absolute_bit(),
            format_args!("numops = {count}"),
        );

        let mut values = Vec::with_capacity(self.capacity_for(count));
        for index in 0..count as usize {
            let start = self.reader.absolute_bit();
            let value = self.reader.read_vbr64(6)?;
            self.trace.leaf(
                start,
                self.reader.absolute_bit(),
                format_args!("value[{index}] = {value}"),
            );
            values.push(value);
        }

        Ok(Record {
            abbrev_id: ids::UNABBREV_RECORD,
            code,
            values,
            blob: None,
        })
    }

    /// Each element takes at least one bit, so the remaining window bounds
    /// any honest count.
    fn capacity_for(&self, count: u32) -> usize {
        let remaining = self
            .reader
            .len_bits()
            .saturating_sub(self.reader.bit_position());
        u64::from(count).min(remaining) as usize
    }

    fn read_scalar(&mut self, operand: AbbrevOperand, field: Field) -> Result<u64> {
        let start = self.reader.absolute_bit();
        let value = match operand {
            AbbrevOperand::Literal(value) => value,
            AbbrevOperand::Fixed(width) => u64::from(self.reader.read_fixed(width)?),
            AbbrevOperand::Vbr(width) => self.reader.read_vbr64(width)?,
            AbbrevOperand::Char6 => {
                let ch = decode_char6(self.reader.read_fixed(6)?)?;
                self.trace.leaf(
                    start,
                    self.reader.absolute_bit(),
                    format_args!("{field} = '{ch}' (char6)"),
                );
                return Ok(u64::from(ch as u8));
            }
            AbbrevOperand::Array | AbbrevOperand::Blob => {
                return Err(Error::InvalidRecord(format!(
                    "{operand} operand where a scalar is required"
                )));
            }
        };
        self.trace.leaf(
            start,
            self.reader.absolute_bit(),
            format_args!("{field} = {value} ({operand})"),
        );
        Ok(value)
    }

    fn read_abbreviated_record(&mut self, abbrev_id: u32) -> Result<Record> {
        let index = (abbrev_id - ids::FIRST_APPLICATION_ABBREV) as usize;
        let abbrev = self.abbrevs.get(index).cloned().ok_or_else(|| {
            Error::InvalidRecord(format!(
                "abbrev id {abbrev_id} is not defined in this block"
            ))
        })?;
        let operands = abbrev.operands();

        let code = match operands[0] {
            op if op.is_scalar() => self.read_scalar(op, Field::Code)?,
            op => {
                return Err(Error::InvalidRecord(format!(
                    "abbreviation starts with {op} instead of a record code"
                )));
            }
        };
        let code = u32::try_from(code)
            .map_err(|_| Error::InvalidRecord(format!("record code {code} does not fit in 32 bits")))?;

        let mut values = Vec::new();
        let mut blob = None;
        let mut i = 1;
        while i < operands.len() {
            match operands[i] {
                AbbrevOperand::Array => {
                    if i + 2 != operands.len() {
                        return Err(Error::InvalidRecord(
                            "array operand is not the second to last".into(),
                        ));
                    }
                    let element = operands[i + 1];
                    if !matches!(
                        element,
                        AbbrevOperand::Fixed(_) | AbbrevOperand::Vbr(_) | AbbrevOperand::Char6
                    ) {
                        return Err(Error::InvalidRecord(format!(
                            "array element encoding {element} is not fixed, vbr or char6"
                        )));
                    }

                    let start = self.reader.absolute_bit();
                    let count = self.reader.read_vbr(6)?;
                    self.trace.leaf(
                        start,
                        self.reader.absolute_bit(),
                        format_args!("array length = {count}"),
                    );
                    values.reserve(self.capacity_for(count));
                    for _ in 0..count {
                        let value = self.read_scalar(element, Field::Value(values.len()))?;
                        values.push(value);
                    }
                    break;
                }
                AbbrevOperand::Blob => {
                    blob = Some(self.read_blob()?);
                }
                op => {
                    let value = self.read_scalar(op, Field::Value(values.len()))?;
                    values.push(value);
                }
            }
            i += 1;
        }

        Ok(Record {
            abbrev_id,
            code,
            values,
            blob,
        })
    }

    fn read_blob(&mut self) -> Result<Vec<u8>> {
        let start = self.reader.absolute_bit();
        let count = self.reader.read_vbr(6)?;
        self.trace.leaf(
            start,
            self.reader.absolute_bit(),
            format_args!("blob length = {count} bytes"),
        );
        self.align_traced();

        let data_start = self.reader.bit_position();
        let data_end = data_start + u64::from(count) * 8;
        let tail = data_end.next_multiple_of(32);
        if !self.reader.can_skip_to(tail) {
            return Err(Error::StreamTruncated {
                bit: self.reader.start_bit() + self.reader.len_bits(),
            });
        }

        let abs_start = self.reader.absolute_bit();
        let bytes = (0..count)
            .map(|_| self.reader.read(8) as u8)
            .collect::<Vec<u8>>();
        self.trace.leaf(
            abs_start,
            self.reader.absolute_bit(),
            format_args!("blob data ({count} bytes)"),
        );

        let pad_start = self.reader.absolute_bit();
        self.reader.jump_to_bit(tail)?;
        if self.reader.absolute_bit() > pad_start {
            self.trace
                .leaf(pad_start, self.reader.absolute_bit(), format_args!("align32"));
        }
        Ok(bytes)
    }

    /// Reads a BLOCKINFO block whose ENTER_SUBBLOCK and id were just read.
    ///
    /// A table that is already populated wins; later BLOCKINFO blocks are
    /// skipped.
    pub fn read_block_info_block(&mut self) -> Result<()> {
        if self.block_info.is_populated() {
            debug!("BLOCKINFO already read, skipping");
            return self.skip_block(0);
        }

        self.enter_sub_block(0)?;
        let mut current: Option<u32> = None;
        loop {
            match self.advance(AdvanceFlags::DONT_AUTOPROCESS_ABBREVS)? {
                Entry::EndBlock => {
                    self.block_info.mark_populated();
                    return Ok(());
                }
                Entry::SubBlock(id) => {
                    return Err(Error::MalformedBlock(format!(
                        "sub-block {id} inside BLOCKINFO"
                    )));
                }
                Entry::Record(ids::DEFINE_ABBREV) => {
                    let Some(block_id) = current else {
                        return Err(Error::InvalidRecord(
                            "DEFINE_ABBREV in BLOCKINFO before SETBID".into(),
                        ));
                    };
                    let abbrev = self.read_abbrev_record()?;
                    // Registered for `block_id`, not for BLOCKINFO itself.
                    self.abbrevs.pop();
                    self.trace.relabel_last(format_args!(
                        "DEFINE_ABBREV {abbrev} -> block {block_id}"
                    ));
                    self.block_info.get_or_insert(block_id).abbrevs.push(abbrev);
                }
                Entry::Record(abbrev_id) => {
                    let record = self.read_record(abbrev_id)?;
                    match record.code {
                        ids::BLOCKINFO_CODE_SETBID => {
                            let id = record.value(0)?;
                            let id = u32::try_from(id).map_err(|_| {
                                Error::InvalidRecord(format!("SETBID block id {id} is too large"))
                            })?;
                            current = Some(id);
                        }
                        ids::BLOCKINFO_CODE_BLOCKNAME => {
                            let block_id = current.ok_or_else(|| {
                                Error::InvalidRecord("BLOCKNAME before SETBID".into())
                            })?;
                            let name = record.string_from(0)?;
                            self.block_info.get_or_insert(block_id).name = Some(name);
                        }
                        ids::BLOCKINFO_CODE_SETRECORDNAME => {
                            let block_id = current.ok_or_else(|| {
                                Error::InvalidRecord("SETRECORDNAME before SETBID".into())
                            })?;
                            let code = record.value(0)?;
                            let code = u32::try_from(code).map_err(|_| {
                                Error::InvalidRecord(format!("record code {code} is too large"))
                            })?;
                            let name = record.string_from(1)?;
                            self.block_info
                                .get_or_insert(block_id)
                                .record_names
                                .push((code, name));
                        }
                        _ => {}
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::BitstreamWriter;
    use crate::tree::{NoTrace, TreeBuilder};
    use pretty_assertions::assert_eq;

    fn cursor(bytes: &[u8]) -> StreamCursor<'_, TreeBuilder> {
        StreamCursor::new(BitReader::new(bytes), TreeBuilder::new("test"))
    }

    #[test]
    fn test_unabbrev_record() {
        let mut writer = BitstreamWriter::new();
        writer.enter_subblock(8, 3);
        writer.emit_unabbrev_record(2, &[b'd' as u64, b'x' as u64, 1 << 40]);
        writer.end_block();
        let bytes = writer.finish();

        let mut cursor = cursor(&bytes);
        let Entry::SubBlock(id) = cursor.advance(AdvanceFlags::empty()).unwrap() else {
            panic!("expected a sub-block");
        };
        assert_eq!(id, 8);
        cursor.enter_sub_block(id).unwrap();
        assert_eq!(cursor.code_width(), 3);
        assert_eq!(cursor.depth(), 1);

        let entry = cursor.advance(AdvanceFlags::empty()).unwrap();
        assert_eq!(entry, Entry::Record(ids::UNABBREV_RECORD));
        let record = cursor.read_record(ids::UNABBREV_RECORD).unwrap();
        assert_eq!(record.code, 2);
        assert_eq!(record.values, vec![100, 120, 1 << 40]);

        assert_eq!(cursor.advance(AdvanceFlags::empty()).unwrap(), Entry::EndBlock);
        assert_eq!(cursor.depth(), 0);
        assert_eq!(cursor.code_width(), ids::TOP_LEVEL_CODE_WIDTH);
        assert!(cursor.is_at_end());

        let tree = cursor.into_trace().finish();
        let block = &tree.children[0];
        assert_eq!(block.label, "Module Block");
        assert_eq!(block.children[0].label, "abbrev id = 1 (ENTER_SUBBLOCK)");
        assert_eq!(block.children[1].label, "block id = 8");
        let record = block.find("TRIPLE").unwrap();
        assert_eq!(record.label, "TRIPLE [100, 120, 1099511627776]");
    }

    #[test]
    fn test_abbreviated_record_with_array_and_literal() {
        let mut writer = BitstreamWriter::new();
        writer.enter_subblock(17, 4);
        writer.emit_define_abbrev(&[
            AbbrevOperand::Literal(7),
            AbbrevOperand::Fixed(3),
            AbbrevOperand::Array,
            AbbrevOperand::Vbr(4),
        ]);
        writer.emit_abbrev_id(4);
        writer.emit(5, 3);
        writer.emit_array(AbbrevOperand::Vbr(4), &[1, 9, 100]);
        writer.end_block();
        let bytes = writer.finish();

        let mut cursor = cursor(&bytes);
        cursor.advance(AdvanceFlags::empty()).unwrap();
        cursor.enter_sub_block(17).unwrap();
        // DEFINE_ABBREV is absorbed.
        let entry = cursor.advance(AdvanceFlags::empty()).unwrap();
        assert_eq!(entry, Entry::Record(4));
        assert_eq!(cursor.abbrevs().len(), 1);

        let record = cursor.read_record(4).unwrap();
        assert_eq!(record.code, 7);
        assert_eq!(record.values, vec![5, 1, 9, 100]);
        assert_eq!(record.abbrev_id, 4);
        assert_eq!(cursor.advance(AdvanceFlags::empty()).unwrap(), Entry::EndBlock);
    }

    #[test]
    fn test_char6_array_record() {
        let mut writer = BitstreamWriter::new();
        writer.enter_subblock(14, 4);
        writer.emit_define_abbrev(&[
            AbbrevOperand::Literal(1),
            AbbrevOperand::Vbr(8),
            AbbrevOperand::Array,
            AbbrevOperand::Char6,
        ]);
        writer.emit_abbrev_id(4);
        writer.emit_vbr(3, 8);
        writer.emit_char6_array("main_0.x");
        writer.end_block();
        let bytes = writer.finish();

        let mut cursor = cursor(&bytes);
        cursor.advance(AdvanceFlags::empty()).unwrap();
        cursor.enter_sub_block(14).unwrap();
        let Entry::Record(id) = cursor.advance(AdvanceFlags::empty()).unwrap() else {
            panic!("expected a record");
        };
        let record = cursor.read_record(id).unwrap();
        assert_eq!(record.value(0).unwrap(), 3);
        assert_eq!(record.string_from(1).unwrap(), "main_0.x");
    }

    #[test]
    fn test_blob_record() {
        let mut writer = BitstreamWriter::new();
        writer.enter_subblock(15, 3);
        writer.emit_define_abbrev(&[AbbrevOperand::Literal(35), AbbrevOperand::Blob]);
        writer.emit_abbrev_id(4);
        writer.emit_blob(b"hello");
        writer.emit_unabbrev_record(1, &[7]);
        writer.end_block();
        let bytes = writer.finish();

        let mut cursor = cursor(&bytes);
        cursor.advance(AdvanceFlags::empty()).unwrap();
        cursor.enter_sub_block(15).unwrap();
        cursor.advance(AdvanceFlags::empty()).unwrap();
        let record = cursor.read_record(4).unwrap();
        assert_eq!(record.code, 35);
        assert!(record.values.is_empty());
        assert_eq!(record.blob.as_deref(), Some(&b"hello"[..]));
        assert_eq!(cursor.bit_position() % 32, 0);

        // The stream continues after the padded blob.
        let entry = cursor.advance(AdvanceFlags::empty()).unwrap();
        assert_eq!(entry, Entry::Record(ids::UNABBREV_RECORD));
        assert_eq!(cursor.read_record(ids::UNABBREV_RECORD).unwrap().values, vec![7]);
    }

    #[test]
    fn test_truncated_blob() {
        let mut writer = BitstreamWriter::new();
        writer.enter_subblock(15, 3);
        writer.emit_define_abbrev(&[AbbrevOperand::Literal(35), AbbrevOperand::Blob]);
        writer.emit_abbrev_id(4);
        writer.emit_vbr(1000, 6);
        let bytes = writer.finish();

        let mut cursor = StreamCursor::new(BitReader::new(&bytes), NoTrace);
        cursor.advance(AdvanceFlags::empty()).unwrap();
        // Length word is zero because the block was never closed.
        cursor.enter_sub_block(15).unwrap();
        cursor.advance(AdvanceFlags::empty()).unwrap();
        assert!(matches!(
            cursor.read_record(4),
            Err(Error::StreamTruncated { .. })
        ));
    }

    #[test]
    fn test_misplaced_array_operand() {
        let mut writer = BitstreamWriter::new();
        writer.enter_subblock(8, 3);
        writer.emit_define_abbrev(&[
            AbbrevOperand::Literal(1),
            AbbrevOperand::Array,
            AbbrevOperand::Fixed(8),
            AbbrevOperand::Fixed(8),
        ]);
        writer.emit_abbrev_id(4);
        writer.emit_array(AbbrevOperand::Fixed(8), &[1]);
        writer.emit(2, 8);
        writer.end_block();
        let bytes = writer.finish();

        let mut cursor = cursor(&bytes);
        cursor.advance(AdvanceFlags::empty()).unwrap();
        cursor.enter_sub_block(8).unwrap();
        cursor.advance(AdvanceFlags::empty()).unwrap();
        assert!(matches!(cursor.read_record(4), Err(Error::InvalidRecord(_))));
    }

    #[test]
    fn test_array_of_blob_is_invalid() {
        let mut writer = BitstreamWriter::new();
        writer.enter_subblock(8, 3);
        writer.emit_define_abbrev(&[
            AbbrevOperand::Literal(1),
            AbbrevOperand::Array,
            AbbrevOperand::Blob,
        ]);
        writer.emit_abbrev_id(4);
        writer.emit_vbr(0, 6);
        writer.end_block();
        let bytes = writer.finish();

        let mut cursor = cursor(&bytes);
        cursor.advance(AdvanceFlags::empty()).unwrap();
        cursor.enter_sub_block(8).unwrap();
        cursor.advance(AdvanceFlags::empty()).unwrap();
        assert!(matches!(cursor.read_record(4), Err(Error::InvalidRecord(_))));
    }

    #[test]
    fn test_undefined_abbrev_id() {
        let mut writer = BitstreamWriter::new();
        writer.enter_subblock(8, 3);
        writer.emit_abbrev_id(6);
        writer.end_block();
        let bytes = writer.finish();

        let mut cursor = cursor(&bytes);
        cursor.advance(AdvanceFlags::empty()).unwrap();
        cursor.enter_sub_block(8).unwrap();
        assert_eq!(cursor.advance(AdvanceFlags::empty()).unwrap(), Entry::Record(6));
        assert!(matches!(cursor.read_record(6), Err(Error::InvalidRecord(_))));
    }

    #[test]
    fn test_end_block_at_top_level() {
        let mut writer = BitstreamWriter::new();
        writer.emit_stray_end_block();
        let bytes = writer.finish();

        let mut cursor = cursor(&bytes);
        assert!(matches!(
            cursor.advance(AdvanceFlags::empty()),
            Err(Error::MalformedBlock(_))
        ));

        let mut cursor = StreamCursor::new(BitReader::new(&bytes), NoTrace);
        assert!(matches!(cursor.read_block_end(), Err(Error::MalformedBlock(_))));
    }

    #[test]
    fn test_dont_pop_block_at_end() {
        let mut writer = BitstreamWriter::new();
        writer.enter_subblock(8, 3);
        writer.end_block();
        let bytes = writer.finish();

        let mut cursor = cursor(&bytes);
        cursor.advance(AdvanceFlags::empty()).unwrap();
        cursor.enter_sub_block(8).unwrap();
        let entry = cursor.advance(AdvanceFlags::DONT_POP_BLOCK_AT_END).unwrap();
        assert_eq!(entry, Entry::EndBlock);
        assert_eq!(cursor.depth(), 1);
        cursor.read_block_end().unwrap();
        assert_eq!(cursor.depth(), 0);
        assert!(cursor.is_at_end());
    }

    #[test]
    fn test_invalid_code_width() {
        let mut writer = BitstreamWriter::new();
        writer.enter_subblock(8, 0);
        writer.emit(0, 32);
        let bytes = writer.finish();

        let mut cursor = cursor(&bytes);
        cursor.advance(AdvanceFlags::empty()).unwrap();
        assert!(matches!(cursor.enter_sub_block(8), Err(Error::MalformedBlock(_))));
    }

    #[test]
    fn test_skip_block_covers_body() {
        let mut writer = BitstreamWriter::new();
        writer.enter_subblock(99, 5);
        writer.emit_unabbrev_record(1, &[1, 2, 3, 4, 5, 6]);
        writer.end_block();
        let bytes = writer.finish();

        let mut cursor = cursor(&bytes);
        cursor.advance(AdvanceFlags::empty()).unwrap();
        cursor.skip_block(99).unwrap();
        assert!(cursor.is_at_end());
        assert_eq!(cursor.depth(), 0);

        let tree = cursor.into_trace().finish();
        let block = &tree.children[0];
        assert_eq!(block.label, "Block 99 (skipped)");
        let skipped: Vec<_> = block.children_labelled("skipped").collect();
        assert_eq!(skipped.len(), 1);
        let words = u64::from(u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]));
        assert_eq!(skipped[0].range.unwrap().len(), words * 32);
        assert_eq!(skipped[0].range.unwrap().start, 64);
    }

    #[test]
    fn test_skip_block_past_end() {
        let mut writer = BitstreamWriter::new();
        writer.enter_subblock(99, 5);
        let mut bytes = writer.finish();
        bytes[4..8].copy_from_slice(&100u32.to_le_bytes());

        let mut cursor = cursor(&bytes);
        cursor.advance(AdvanceFlags::empty()).unwrap();
        assert!(matches!(cursor.skip_block(99), Err(Error::MalformedBlock(_))));
    }

    fn block_info_stream() -> Vec<u8> {
        let mut writer = BitstreamWriter::new();
        writer.enter_subblock(0, 2);
        writer.emit_unabbrev_record(ids::BLOCKINFO_CODE_SETBID, &[12]);
        writer.emit_string_record(ids::BLOCKINFO_CODE_BLOCKNAME, "FUNC");
        writer.emit_define_abbrev(&[AbbrevOperand::Literal(10), AbbrevOperand::Fixed(4)]);
        writer.emit_unabbrev_record(
            ids::BLOCKINFO_CODE_SETRECORDNAME,
            &[10, b'R' as u64, b'E' as u64, b'T' as u64],
        );
        writer.end_block();
        writer.finish()
    }

    #[test]
    fn test_read_block_info_block() {
        let bytes = block_info_stream();
        let mut cursor = cursor(&bytes);
        assert_eq!(cursor.advance(AdvanceFlags::empty()).unwrap(), Entry::SubBlock(0));
        cursor.read_block_info_block().unwrap();
        assert_eq!(cursor.depth(), 0);
        assert!(cursor.abbrevs().is_empty());

        let info = cursor.block_info().get(12).unwrap();
        assert_eq!(info.name.as_deref(), Some("FUNC"));
        assert_eq!(info.record_name(10), Some("RET"));
        assert_eq!(info.abbrevs.len(), 1);
        assert!(cursor.block_info().get(0).is_none());

        let tree = cursor.into_trace().finish();
        assert!(tree.find("DEFINE_ABBREV [literal(10), fixed(4)] -> block 12").is_some());
        assert!(tree.find("SETBID [12]").is_some());
    }

    #[test]
    fn test_second_block_info_is_skipped() {
        let bytes = block_info_stream();
        let mut cursor = StreamCursor::new(BitReader::new(&bytes), NoTrace);
        cursor.advance(AdvanceFlags::empty()).unwrap();
        cursor.read_block_info_block().unwrap();

        cursor.jump_to_bit(0).unwrap();
        cursor.advance(AdvanceFlags::empty()).unwrap();
        cursor.read_block_info_block().unwrap();
        assert_eq!(cursor.block_info().get(12).unwrap().abbrevs.len(), 1);
    }

    #[test]
    fn test_empty_block_info_still_counts_as_read() {
        let mut writer = BitstreamWriter::new();
        writer.enter_subblock(0, 2);
        writer.end_block();
        writer.enter_subblock(0, 2);
        writer.emit_unabbrev_record(ids::BLOCKINFO_CODE_SETBID, &[12]);
        writer.emit_define_abbrev(&[AbbrevOperand::Literal(10), AbbrevOperand::Fixed(4)]);
        writer.end_block();
        let bytes = writer.finish();

        let mut cursor = cursor(&bytes);
        assert_eq!(cursor.advance(AdvanceFlags::empty()).unwrap(), Entry::SubBlock(0));
        cursor.read_block_info_block().unwrap();
        assert!(cursor.block_info().is_populated());
        assert!(cursor.block_info().is_empty());

        assert_eq!(cursor.advance(AdvanceFlags::empty()).unwrap(), Entry::SubBlock(0));
        cursor.read_block_info_block().unwrap();
        assert!(cursor.is_at_end());
        assert!(cursor.block_info().get(12).is_none());

        let tree = cursor.into_trace().finish();
        assert_eq!(tree.children_labelled("BlockInfo Block").count(), 2);
        assert!(tree.find("BlockInfo Block (skipped)").is_some());
        assert!(tree.find("SETBID").is_none());
    }

    #[test]
    fn test_define_abbrev_before_setbid() {
        let mut writer = BitstreamWriter::new();
        writer.enter_subblock(0, 2);
        writer.emit_define_abbrev(&[AbbrevOperand::Literal(1)]);
        writer.end_block();
        let bytes = writer.finish();

        let mut cursor = cursor(&bytes);
        cursor.advance(AdvanceFlags::empty()).unwrap();
        assert!(matches!(
            cursor.read_block_info_block(),
            Err(Error::InvalidRecord(_))
        ));
    }

    #[test]
    fn test_sub_block_inside_block_info() {
        let mut writer = BitstreamWriter::new();
        writer.enter_subblock(0, 2);
        writer.enter_subblock(8, 2);
        writer.end_block();
        writer.end_block();
        let bytes = writer.finish();

        let mut cursor = cursor(&bytes);
        cursor.advance(AdvanceFlags::empty()).unwrap();
        assert!(matches!(
            cursor.read_block_info_block(),
            Err(Error::MalformedBlock(_))
        ));
    }

    #[test]
    fn test_block_info_abbrevs_apply_to_later_blocks() {
        let mut writer = BitstreamWriter::new();
        writer.enter_subblock(8, 3);
        writer.enter_subblock(0, 2);
        writer.emit_unabbrev_record(ids::BLOCKINFO_CODE_SETBID, &[12]);
        writer.emit_define_abbrev(&[AbbrevOperand::Literal(10), AbbrevOperand::Fixed(4)]);
        writer.end_block();
        writer.enter_subblock(11, 3);
        writer.end_block();
        writer.enter_subblock(12, 3);
        writer.emit_abbrev_id(4);
        writer.emit(9, 4);
        writer.end_block();
        writer.end_block();
        let bytes = writer.finish();

        let mut cursor = cursor(&bytes);
        cursor.advance(AdvanceFlags::empty()).unwrap();
        cursor.enter_sub_block(8).unwrap();
        assert_eq!(cursor.advance(AdvanceFlags::empty()).unwrap(), Entry::SubBlock(0));
        cursor.read_block_info_block().unwrap();

        // Block 11 has no registered abbreviations.
        assert_eq!(cursor.advance(AdvanceFlags::empty()).unwrap(), Entry::SubBlock(11));
        cursor.enter_sub_block(11).unwrap();
        assert!(cursor.abbrevs().is_empty());
        assert_eq!(cursor.advance(AdvanceFlags::empty()).unwrap(), Entry::EndBlock);

        assert_eq!(cursor.advance(AdvanceFlags::empty()).unwrap(), Entry::SubBlock(12));
        cursor.enter_sub_block(12).unwrap();
        assert_eq!(cursor.abbrevs().len(), 1);
        assert_eq!(cursor.advance(AdvanceFlags::empty()).unwrap(), Entry::Record(4));
        let record = cursor.read_record(4).unwrap();
        assert_eq!((record.code, record.values), (10, vec![9]));
        assert_eq!(cursor.advance(AdvanceFlags::empty()).unwrap(), Entry::EndBlock);

        // The module block itself did not inherit them.
        assert!(cursor.abbrevs().is_empty());
    }

    #[test]
    fn test_block_info_transfer() {
        let bytes = block_info_stream();
        let mut first = StreamCursor::new(BitReader::new(&bytes), NoTrace);
        first.advance(AdvanceFlags::empty()).unwrap();
        first.read_block_info_block().unwrap();

        let table = first.take_block_info();
        assert!(first.block_info().is_empty());
        let second = StreamCursor::new(BitReader::new(&bytes), NoTrace).with_block_info(table);
        assert_eq!(second.block_info().get(12).unwrap().name.as_deref(), Some("FUNC"));
    }

    #[test]
    fn test_dont_autoprocess_abbrevs() {
        let mut writer = BitstreamWriter::new();
        writer.enter_subblock(8, 3);
        writer.emit_define_abbrev(&[AbbrevOperand::Literal(1), AbbrevOperand::Vbr(6)]);
        writer.end_block();
        let bytes = writer.finish();

        let mut cursor = cursor(&bytes);
        cursor.advance(AdvanceFlags::empty()).unwrap();
        cursor.enter_sub_block(8).unwrap();
        let entry = cursor.advance(AdvanceFlags::DONT_AUTOPROCESS_ABBREVS).unwrap();
        assert_eq!(entry, Entry::Record(ids::DEFINE_ABBREV));
        assert!(cursor.abbrevs().is_empty());
        cursor.read_abbrev_record().unwrap();
        assert_eq!(cursor.abbrevs().len(), 1);
    }

    #[test]
    fn test_truncated_record() {
        let mut writer = BitstreamWriter::new();
        writer.enter_subblock(8, 3);
        writer.emit_abbrev_id(ids::UNABBREV_RECORD);
        writer.emit_vbr(1, 6);
        writer.emit_vbr(40, 6);
        writer.emit_vbr(1, 6);
        let bytes = writer.finish();

        let mut cursor = cursor(&bytes);
        cursor.advance(AdvanceFlags::empty()).unwrap();
        cursor.enter_sub_block(8).unwrap();
        cursor.advance(AdvanceFlags::empty()).unwrap();
        let error = cursor.read_record(ids::UNABBREV_RECORD).unwrap_err();
        assert!(matches!(error, Error::StreamTruncated { .. }));

        let tree = cursor.into_trace().fail(&error);
        let record = tree.find("record [incomplete]").unwrap();
        assert!(record.find("error: Stream truncated").is_some());
    }

    #[test]
    fn test_string_from_rejects_wide_values() {
        let record = Record {
            code: 2,
            values: vec![b'a' as u64, 300],
            ..Record::default()
        };
        assert!(matches!(record.string_from(0), Err(Error::InvalidRecord(_))));
        assert_eq!(record.string_from(2).unwrap(), "");
        assert!(record.value(2).is_err());
    }
}

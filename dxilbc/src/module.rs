//! Module reader
//!
//! [`ModuleReader`] drives a [`StreamCursor`] over the top level of the
//! stream and through the module block, collecting what it learns into
//! [`ModuleInfo`]. Function bodies are remembered and skipped on the first
//! pass; [`ModuleReader::materialize_function`] parses one later.

use crate::bits::BitReader;
use crate::cursor::{Entry, Record, StreamCursor};
use crate::flags::AdvanceFlags;
use crate::ids::{self, BlockId, constants_code, module_code};
use crate::tree::Trace;
use crate::types::{Type, TypeTable};
use crate::{Error, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, warn};

/// Largest accepted alignment exponent (log2 + 1).
const MAX_ALIGNMENT_EXPONENT: u64 = 30;
/// Parameter index of function-level attributes.
const FUNCTION_INDEX: u64 = 0xFFFF_FFFF;

const PARAMATTR_CODE_ENTRY_OLD: u32 = 1;
const PARAMATTR_CODE_ENTRY: u32 = 2;
const PARAMATTR_GRP_CODE_ENTRY: u32 = 3;

const VST_CODE_ENTRY: u32 = 1;
const VST_CODE_BBENTRY: u32 = 2;
const VST_CODE_FNENTRY: u32 = 3;

const METADATA_STRING: u32 = 1;
const METADATA_VALUE: u32 = 2;
const METADATA_NODE: u32 = 3;
const METADATA_NAME: u32 = 4;
const METADATA_DISTINCT_NODE: u32 = 5;
const METADATA_KIND: u32 = 6;
const METADATA_NAMED_NODE: u32 = 10;

const FUNC_CODE_DECLAREBLOCKS: u32 = 1;

/// A global variable from a GLOBALVAR record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GlobalVar {
    /// Module value id
    pub value_id: u64,
    /// Name from the value symbol table
    pub name: Option<String>,
    /// Value type when `explicit_type`, otherwise the pointer type
    pub type_id: u32,
    /// Whether `type_id` is the value type
    pub explicit_type: bool,
    /// Declared `constant`
    pub is_const: bool,
    /// Address space (explicit-type records only)
    pub address_space: u32,
    /// Value id of the initializer
    pub initializer: Option<u64>,
    /// Linkage name
    pub linkage: &'static str,
    /// Alignment in bytes, 0 if unspecified
    pub alignment: u64,
    /// Index into `ModuleInfo::section_names`
    pub section: Option<u64>,
}

/// A function from a FUNCTION record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FunctionDecl {
    /// Module value id
    pub value_id: u64,
    /// Name from the value symbol table
    pub name: Option<String>,
    /// Function (or pointer to function) type
    pub type_id: u32,
    /// Calling convention
    pub calling_conv: u64,
    /// Declaration without a body
    pub is_proto: bool,
    /// Linkage name
    pub linkage: &'static str,
    /// 1-based index into `ModuleInfo::attribute_lists`, 0 for none
    pub attributes: u64,
    /// Alignment in bytes, 0 if unspecified
    pub alignment: u64,
    /// Index into `ModuleInfo::section_names`
    pub section: Option<u64>,
}

/// An alias from an ALIAS record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Alias {
    /// Module value id
    pub value_id: u64,
    /// Name from the value symbol table
    pub name: Option<String>,
    /// Alias type
    pub type_id: u32,
    /// Value id of the aliasee
    pub aliasee: u64,
    /// Linkage name
    pub linkage: &'static str,
}

/// A COMDAT record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Comdat {
    /// Selection kind
    pub selection_kind: u64,
    /// Comdat name
    pub name: String,
}

/// One attribute of an attribute group
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Attribute {
    /// Attribute without a value (`nounwind`)
    Enum { name: String },
    /// Attribute with an integer (`align=16`)
    Int { name: String, value: u64 },
    /// String attribute, with an optional value
    String { key: String, value: Option<String> },
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Attribute::Enum { name } => f.write_str(name),
            Attribute::Int { name, value } => write!(f, "{name}={value}"),
            Attribute::String { key, value: None } => write!(f, "{key:?}"),
            Attribute::String {
                key,
                value: Some(value),
            } => write!(f, "{key:?}={value:?}"),
        }
    }
}

/// A PARAMATTR_GROUP entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttributeGroup {
    /// Group id
    pub id: u64,
    /// 0 for the return value, `0xFFFFFFFF` for the function, else parameter + 1
    pub param_index: u64,
    /// Attributes in record order
    pub attributes: Vec<Attribute>,
}

impl fmt::Display for AttributeGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "group {} ", self.id)?;
        match self.param_index {
            FUNCTION_INDEX => f.write_str("function")?,
            0 => f.write_str("return")?,
            index => write!(f, "param {}", index - 1)?,
        }
        f.write_str(":")?;
        for attribute in &self.attributes {
            write!(f, " {attribute}")?;
        }
        Ok(())
    }
}

/// A metadata kind registered by a KIND record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetadataKind {
    /// Kind id
    pub id: u64,
    /// Kind name
    pub name: String,
}

/// A function body found during the module pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FunctionBody {
    /// Index into `ModuleInfo::functions`
    pub function: usize,
    /// Window-relative bit of the block's code width field
    pub bit: u64,
    /// Whether the body has been parsed
    pub materialized: bool,
}

/// What the module pass recovered.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ModuleInfo {
    /// VERSION record
    pub version: Option<u64>,
    /// Operands use relative value ids (version 1 and later)
    pub relative_ids: bool,
    /// Target triple
    pub triple: Option<String>,
    /// Data layout
    pub datalayout: Option<String>,
    /// Module-level inline assembly
    pub asm: Option<String>,
    /// SECTIONNAME records
    pub section_names: Vec<String>,
    /// GCNAME records
    pub gc_names: Vec<String>,
    /// DEPLIB records
    pub dependent_libraries: Vec<String>,
    /// Global variables
    pub globals: Vec<GlobalVar>,
    /// Functions
    pub functions: Vec<FunctionDecl>,
    /// Aliases
    pub aliases: Vec<Alias>,
    /// Comdats
    pub comdats: Vec<Comdat>,
    /// Attribute groups
    pub attribute_groups: Vec<AttributeGroup>,
    /// PARAMATTR entries as lists of group ids
    pub attribute_lists: Vec<Vec<u64>>,
    /// Type table
    pub types: TypeTable,
    /// Names of module-level values by value id
    pub value_names: BTreeMap<u64, String>,
    /// Metadata kinds
    pub metadata_kinds: Vec<MetadataKind>,
    /// Named metadata
    pub named_metadata: Vec<String>,
    /// Number of module-level values
    pub value_count: u64,
    /// Function bodies in stream order
    pub function_bodies: Vec<FunctionBody>,
}

impl ModuleInfo {
    /// Display name of a function: its symbol name or its value id.
    pub fn function_name(&self, index: usize) -> String {
        match self.functions.get(index) {
            Some(FunctionDecl {
                name: Some(name), ..
            }) => format!("@{name}"),
            Some(function) => format!("@{}", function.value_id),
            None => format!("@<function {index}>"),
        }
    }
}

/// How far the module pass got.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ModuleProgress {
    /// The module block has been read to its end
    Complete,
    /// The pass stopped after a function body; `resume` continues at
    /// `next_unread_bit`
    Suspended { next_unread_bit: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    NotStarted,
    InModule,
    Suspended(u64),
    Complete,
}

/// Decodes sign-rotated integers: the low bit is the sign.
pub fn decode_sign_rotated(value: u64) -> i64 {
    if value & 1 == 0 {
        (value >> 1) as i64
    } else if value != 1 {
        -((value >> 1) as i64)
    } else {
        i64::MIN
    }
}

fn decode_alignment(exponent: u64) -> Result<u64> {
    if exponent > MAX_ALIGNMENT_EXPONENT {
        return Err(Error::InvalidRecord(format!(
            "alignment exponent {exponent} is too large"
        )));
    }
    Ok((1u64 << exponent) >> 1)
}

fn type_id(value: u64) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| Error::InvalidRecord(format!("type id {value} is too large")))
}

fn need(record: &Record, count: usize) -> Result<()> {
    if record.values.len() < count {
        return Err(Error::InvalidRecord(format!(
            "record {} has {} operands, needs {count}",
            record.code,
            record.values.len()
        )));
    }
    Ok(())
}

/// Values joined as `%a, %b`.
struct ValueList<'v>(&'v [u64]);

impl fmt::Display for ValueList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, value) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "%{value}")?;
        }
        Ok(())
    }
}

/// Metadata operands joined as `!a, null, !b`; operands are stored plus one.
struct MetadataList<'v>(&'v [u64]);

impl fmt::Display for MetadataList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, value) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            match value {
                0 => f.write_str("null")?,
                id => write!(f, "!{}", id - 1)?,
            }
        }
        Ok(())
    }
}

fn parse_attribute_group(record: &Record) -> Result<AttributeGroup> {
    let id = record.value(0)?;
    let param_index = record.value(1)?;
    let values = &record.values;

    // Zero-terminated string starting at `*i`.
    let read_string = |i: &mut usize| -> Result<String> {
        let mut bytes = Vec::new();
        loop {
            let value = *values.get(*i).ok_or_else(|| {
                Error::InvalidRecord("unterminated string attribute".into())
            })?;
            *i += 1;
            if value == 0 {
                break;
            }
            bytes.push(u8::try_from(value).map_err(|_| {
                Error::InvalidRecord(format!("attribute character {value} is not a byte"))
            })?);
        }
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    };
    let kind_name = |kind: u64| {
        ids::attribute_name(kind)
            .map(str::to_owned)
            .unwrap_or_else(|| format!("attr{kind}"))
    };

    let mut attributes = Vec::new();
    let mut i = 2;
    while i < values.len() {
        let encoding = values[i];
        i += 1;
        let attribute = match encoding {
            0 => {
                let kind = record.value(i)?;
                i += 1;
                Attribute::Enum {
                    name: kind_name(kind),
                }
            }
            1 => {
                let kind = record.value(i)?;
                let value = record.value(i + 1)?;
                i += 2;
                Attribute::Int {
                    name: kind_name(kind),
                    value,
                }
            }
            3 | 4 => {
                let key = read_string(&mut i)?;
                let value = if encoding == 4 {
                    Some(read_string(&mut i)?)
                } else {
                    None
                };
                Attribute::String { key, value }
            }
            other => {
                return Err(Error::InvalidRecord(format!(
                    "unknown attribute encoding {other}"
                )));
            }
        };
        attributes.push(attribute);
    }

    Ok(AttributeGroup {
        id,
        param_index,
        attributes,
    })
}

fn constant_summary(
    types: &TypeTable,
    record: &Record,
    cur_type: Option<u32>,
) -> Result<Option<String>> {
    let ty = match cur_type {
        Some(id) => types.display(id).to_string(),
        None => "<no type>".to_string(),
    };
    let values = &record.values;

    let summary = match record.code {
        constants_code::NULL => format!("{ty} null"),
        constants_code::UNDEF => format!("{ty} undef"),
        constants_code::INTEGER => format!("{ty} {}", decode_sign_rotated(record.value(0)?)),
        constants_code::WIDE_INTEGER => {
            let words: Vec<String> = values
                .iter()
                .map(|&word| decode_sign_rotated(word).to_string())
                .collect();
            format!("{ty} wide [{}]", words.join(", "))
        }
        constants_code::FLOAT => {
            let bits = record.value(0)?;
            match cur_type.and_then(|id| types.get(id)) {
                Some(Type::Half) => format!("half 0xH{:04X}", bits as u16),
                Some(Type::Float) => format!("float {:?}", f32::from_bits(bits as u32)),
                Some(Type::Double) => format!("double {:?}", f64::from_bits(bits)),
                _ => format!("{ty} 0x{bits:X}"),
            }
        }
        constants_code::AGGREGATE => format!("{ty} {{{}}}", ValueList(values)),
        constants_code::STRING => format!("{ty} c{:?}", record.string_from(0)?),
        constants_code::CSTRING => format!("{ty} c{:?}", record.string_from(0)? + "\0"),
        constants_code::DATA => {
            let elements: Vec<String> = values.iter().map(u64::to_string).collect();
            format!("{ty} data [{}]", elements.join(", "))
        }
        constants_code::CE_BINOP => {
            need(record, 3)?;
            format!(
                "{} ({})",
                ids::binop_name(values[0]),
                ValueList(&values[1..3])
            )
        }
        constants_code::CE_CAST => {
            need(record, 3)?;
            let from = types.display(type_id(values[1])?);
            format!("{} ({from} %{}) to {ty}", ids::cast_name(values[0]), values[2])
        }
        constants_code::CE_GEP | constants_code::CE_INBOUNDS_GEP => {
            let inbounds = if record.code == constants_code::CE_INBOUNDS_GEP {
                " inbounds"
            } else {
                ""
            };
            // An odd operand count carries the source element type first.
            let operands = if values.len() % 2 == 1 {
                &values[1..]
            } else {
                &values[..]
            };
            let indices: Vec<u64> = operands
                .chunks(2)
                .filter_map(|pair| pair.get(1).copied())
                .collect();
            format!("getelementptr{inbounds} ({})", ValueList(&indices))
        }
        constants_code::CE_SELECT => {
            need(record, 3)?;
            format!("select ({})", ValueList(&values[..3]))
        }
        constants_code::CE_EXTRACTELT => {
            need(record, 3)?;
            format!("extractelement (%{}, %{})", values[1], values[values.len() - 1])
        }
        constants_code::CE_INSERTELT => {
            need(record, 3)?;
            format!(
                "insertelement (%{}, %{}, %{})",
                values[0],
                values[1],
                values[values.len() - 1]
            )
        }
        constants_code::CE_SHUFFLEVEC => {
            need(record, 3)?;
            format!("shufflevector ({})", ValueList(&values[..3]))
        }
        constants_code::CE_CMP => {
            need(record, 4)?;
            format!("cmp {} (%{}, %{})", values[3], values[1], values[2])
        }
        _ => return Ok(None),
    };
    Ok(Some(summary))
}

/// Reader for one module.
pub struct ModuleReader<'a, T: Trace> {
    cursor: StreamCursor<'a, T>,
    info: ModuleInfo,
    state: State,
    seen_value_symtab: bool,
    /// Indices into `info.functions` that have bodies, in declaration order
    bodies_pending: Option<Vec<usize>>,
}

impl<'a, T: Trace> ModuleReader<'a, T> {
    /// Creates a reader at the start of a bitstream window.
    pub fn new(reader: BitReader<'a>, trace: T) -> Self {
        Self::from_cursor(StreamCursor::new(reader, trace))
    }

    /// Creates a reader over an existing cursor, e.g. one carrying a
    /// BLOCKINFO table.
    pub fn from_cursor(cursor: StreamCursor<'a, T>) -> Self {
        ModuleReader {
            cursor,
            info: ModuleInfo::default(),
            state: State::NotStarted,
            seen_value_symtab: false,
            bodies_pending: None,
        }
    }

    /// What the pass has recovered so far.
    pub fn info(&self) -> &ModuleInfo {
        &self.info
    }

    /// The underlying cursor.
    pub fn cursor(&self) -> &StreamCursor<'a, T> {
        &self.cursor
    }

    /// The underlying cursor, mutably.
    pub fn cursor_mut(&mut self) -> &mut StreamCursor<'a, T> {
        &mut self.cursor
    }

    /// Where [`resume`](Self::resume) continues, while suspended.
    pub fn next_unread_bit(&self) -> Option<u64> {
        match self.state {
            State::Suspended(bit) => Some(bit),
            _ => None,
        }
    }

    /// Returns true once the module block has been read to its end.
    pub fn is_complete(&self) -> bool {
        self.state == State::Complete
    }

    /// Splits the reader into what it recovered and its trace.
    pub fn into_parts(self) -> (ModuleInfo, T) {
        (self.info, self.cursor.into_trace())
    }

    /// Reads the signature and top-level blocks up to and through the module
    /// block, or until the pass suspends.
    pub fn parse_module(&mut self) -> Result<ModuleProgress> {
        match self.state {
            State::NotStarted => {}
            State::Suspended(_) => return self.resume(),
            State::Complete => return Ok(ModuleProgress::Complete),
            State::InModule => return self.parse_module_body(),
        }

        self.cursor.read_signature()?;
        loop {
            if self.cursor.is_at_end() {
                return Err(Error::MalformedBlock(
                    "stream ends before a module block".into(),
                ));
            }
            match self.cursor.advance(AdvanceFlags::empty())? {
                Entry::SubBlock(id) => match BlockId::from(id) {
                    BlockId::BlockInfo => self.cursor.read_block_info_block()?,
                    BlockId::Module => {
                        self.cursor.enter_sub_block(id)?;
                        self.state = State::InModule;
                        return self.parse_module_body();
                    }
                    BlockId::Identification => {
                        debug!("skipping identification block");
                        self.cursor.skip_block(id)?;
                    }
                    _ => {
                        warn!(block_id = id, "skipping unknown top-level block");
                        self.cursor.skip_block(id)?;
                    }
                },
                Entry::Record(abbrev_id) => {
                    return Err(Error::MalformedBlock(format!(
                        "record with abbrev id {abbrev_id} at top level"
                    )));
                }
                Entry::EndBlock => {
                    return Err(Error::MalformedBlock("END_BLOCK at top level".into()));
                }
            }
        }
    }

    /// Continues a suspended pass at `next_unread_bit`.
    pub fn resume(&mut self) -> Result<ModuleProgress> {
        match self.state {
            State::Suspended(bit) => {
                debug!(next_unread_bit = bit, "resuming module pass");
                self.cursor.jump_to_bit(bit)?;
                self.state = State::InModule;
                self.parse_module_body()
            }
            State::Complete => Ok(ModuleProgress::Complete),
            State::NotStarted | State::InModule => Err(Error::MalformedBlock(
                "resume without a suspended module pass".into(),
            )),
        }
    }

    fn parse_module_body(&mut self) -> Result<ModuleProgress> {
        loop {
            match self.cursor.advance(AdvanceFlags::empty())? {
                Entry::EndBlock => {
                    self.state = State::Complete;
                    debug!(
                        functions = self.info.functions.len(),
                        bodies = self.info.function_bodies.len(),
                        "module block complete"
                    );
                    return Ok(ModuleProgress::Complete);
                }
                Entry::SubBlock(id) => match BlockId::from(id) {
                    BlockId::BlockInfo => self.cursor.read_block_info_block()?,
                    BlockId::ParamAttr => self.parse_paramattr_block()?,
                    BlockId::ParamAttrGroup => self.parse_paramattr_group_block()?,
                    BlockId::TypeTable => self.parse_type_table()?,
                    BlockId::Constants => self.parse_constants_block(true)?,
                    BlockId::Metadata => self.parse_metadata_block()?,
                    BlockId::MetadataAttachment | BlockId::UseList => {
                        self.parse_plain_block(id)?
                    }
                    BlockId::ValueSymtab => {
                        self.parse_value_symtab(true)?;
                        self.seen_value_symtab = true;
                    }
                    BlockId::Function => {
                        self.remember_and_skip_function_body()?;
                        if self.seen_value_symtab {
                            let bit = self.cursor.bit_position();
                            self.state = State::Suspended(bit);
                            debug!(next_unread_bit = bit, "suspending module pass");
                            return Ok(ModuleProgress::Suspended {
                                next_unread_bit: bit,
                            });
                        }
                    }
                    _ => {
                        warn!(block_id = id, "skipping unknown block in module");
                        self.cursor.skip_block(id)?;
                    }
                },
                Entry::Record(abbrev_id) => {
                    let record = self.cursor.read_record(abbrev_id)?;
                    self.apply_module_record(&record)?;
                }
            }
        }
    }

    fn next_value_id(&mut self) -> u64 {
        let id = self.info.value_count;
        self.info.value_count += 1;
        id
    }

    fn apply_module_record(&mut self, record: &Record) -> Result<()> {
        match record.code {
            module_code::VERSION => {
                let version = record.value(0)?;
                if version > 2 {
                    return Err(Error::InvalidRecord(format!(
                        "unsupported module version {version}"
                    )));
                }
                self.info.version = Some(version);
                self.info.relative_ids = version >= 1;
                let mode = if version >= 1 { "relative" } else { "absolute" };
                self.cursor
                    .annotate_record(record, format_args!("version {version}, {mode} value ids"));
            }
            module_code::TRIPLE => {
                let triple = record.string_from(0)?;
                self.cursor.annotate_record(record, format_args!("{triple:?}"));
                self.info.triple = Some(triple);
            }
            module_code::DATALAYOUT => {
                let layout = record.string_from(0)?;
                self.cursor.annotate_record(record, format_args!("{layout:?}"));
                self.info.datalayout = Some(layout);
            }
            module_code::ASM => {
                let asm = record.string_from(0)?;
                self.cursor.annotate_record(record, format_args!("{asm:?}"));
                self.info.asm = Some(asm);
            }
            module_code::SECTIONNAME => {
                let name = record.string_from(0)?;
                self.cursor.annotate_record(record, format_args!("{name:?}"));
                self.info.section_names.push(name);
            }
            module_code::DEPLIB => {
                let name = record.string_from(0)?;
                self.cursor.annotate_record(record, format_args!("{name:?}"));
                self.info.dependent_libraries.push(name);
            }
            module_code::GCNAME => {
                let name = record.string_from(0)?;
                self.cursor.annotate_record(record, format_args!("{name:?}"));
                self.info.gc_names.push(name);
            }
            module_code::GLOBALVAR => self.apply_global_var(record)?,
            module_code::FUNCTION => self.apply_function(record)?,
            module_code::ALIAS => {
                need(record, 3)?;
                let alias = Alias {
                    value_id: self.next_value_id(),
                    name: None,
                    type_id: type_id(record.values[0])?,
                    aliasee: record.values[1],
                    linkage: ids::linkage_name(record.values[2]),
                };
                let ty = self.info.types.display(alias.type_id);
                self.cursor.annotate_record(
                    record,
                    format_args!(
                        "@{} = {} alias {ty} %{}",
                        alias.value_id, alias.linkage, alias.aliasee
                    ),
                );
                self.info.aliases.push(alias);
            }
            module_code::PURGEVALS => {
                let count = record.value(0)?;
                if count > self.info.value_count {
                    return Err(Error::InvalidRecord(format!(
                        "PURGEVALS to {count} with only {} values",
                        self.info.value_count
                    )));
                }
                self.info.value_count = count;
            }
            module_code::COMDAT => {
                need(record, 2)?;
                let size = usize::try_from(record.values[1]).unwrap_or(usize::MAX);
                let end = 2usize.saturating_add(size);
                if end > record.values.len() {
                    return Err(Error::InvalidRecord(format!(
                        "COMDAT name of {size} characters exceeds the record"
                    )));
                }
                let comdat = Comdat {
                    selection_kind: record.values[0],
                    name: record.string_between(2, end)?,
                };
                self.cursor
                    .annotate_record(record, format_args!("${:?}", comdat.name));
                self.info.comdats.push(comdat);
            }
            code => {
                warn!(code, "ignoring unknown module record");
            }
        }
        Ok(())
    }

    fn apply_global_var(&mut self, record: &Record) -> Result<()> {
        need(record, 6)?;
        let values = &record.values;
        let flags = values[1];
        let explicit_type = flags & 2 != 0;
        let address_space = if explicit_type {
            u32::try_from(flags >> 2).map_err(|_| {
                Error::InvalidRecord(format!("address space {} is too large", flags >> 2))
            })?
        } else {
            0
        };
        let global = GlobalVar {
            value_id: self.next_value_id(),
            name: None,
            type_id: type_id(values[0])?,
            explicit_type,
            is_const: flags & 1 != 0,
            address_space,
            initializer: values[2].checked_sub(1),
            linkage: ids::linkage_name(values[3]),
            alignment: decode_alignment(values[4])?,
            section: values[5].checked_sub(1),
        };

        let ty = self.info.types.display(global.type_id);
        let kind = if global.is_const { "constant" } else { "global" };
        self.cursor.annotate_record(
            record,
            format_args!("@{} = {} {kind} {ty}", global.value_id, global.linkage),
        );
        self.info.globals.push(global);
        Ok(())
    }

    fn apply_function(&mut self, record: &Record) -> Result<()> {
        need(record, 8)?;
        let values = &record.values;
        let function = FunctionDecl {
            value_id: self.next_value_id(),
            name: None,
            type_id: type_id(values[0])?,
            calling_conv: values[1],
            is_proto: values[2] != 0,
            linkage: ids::linkage_name(values[3]),
            attributes: values[4],
            alignment: decode_alignment(values[5])?,
            section: values[6].checked_sub(1),
        };

        let ty = self.info.types.display(function.type_id);
        let kind = if function.is_proto { "declare" } else { "define" };
        self.cursor.annotate_record(
            record,
            format_args!(
                "@{} = {kind} {} {ty}",
                function.value_id, function.linkage
            ),
        );
        self.info.functions.push(function);
        Ok(())
    }

    fn name_value(&mut self, value_id: u64, name: &str) {
        let info = &mut self.info;
        if let Some(global) = info.globals.iter_mut().find(|g| g.value_id == value_id) {
            global.name = Some(name.to_owned());
        } else if let Some(function) = info.functions.iter_mut().find(|f| f.value_id == value_id) {
            function.name = Some(name.to_owned());
        } else if let Some(alias) = info.aliases.iter_mut().find(|a| a.value_id == value_id) {
            alias.name = Some(name.to_owned());
        }
        info.value_names.insert(value_id, name.to_owned());
    }

    fn remember_and_skip_function_body(&mut self) -> Result<()> {
        let pending = self.bodies_pending.get_or_insert_with(|| {
            self.info
                .functions
                .iter()
                .enumerate()
                .filter(|(_, function)| !function.is_proto)
                .map(|(index, _)| index)
                .collect()
        });

        let index = self.info.function_bodies.len();
        let function = pending.get(index).copied().ok_or_else(|| {
            Error::MalformedBlock(format!(
                "function body {index} has no matching FUNCTION record"
            ))
        })?;
        let bit = self.cursor.bit_position();
        self.cursor.skip_block(BlockId::Function.id())?;
        self.cursor.trace_mut().relabel_last(format_args!(
            "Function Block (deferred body {index})"
        ));

        debug!(index, function, bit, "deferred function body");
        self.info.function_bodies.push(FunctionBody {
            function,
            bit,
            materialized: false,
        });
        Ok(())
    }

    /// Parses deferred function body `index` under its own trace node.
    ///
    /// The cursor position is restored afterwards, so this may be called
    /// while the module pass is suspended.
    pub fn materialize_function(&mut self, index: usize) -> Result<()> {
        let body = self.info.function_bodies.get(index).cloned().ok_or_else(|| {
            Error::MalformedBlock(format!("no deferred function body {index}"))
        })?;
        if body.materialized {
            return Ok(());
        }

        let name = self.info.function_name(body.function);
        let saved = self.cursor.bit_position();
        self.cursor
            .trace_mut()
            .push(format_args!("Function Body {index} {name}"));
        self.cursor.jump_to_bit(body.bit)?;
        self.cursor.enter_sub_block(BlockId::Function.id())?;
        self.parse_function_block()?;
        self.cursor.trace_mut().pop();
        self.cursor.jump_to_bit(saved)?;

        if let Some(body) = self.info.function_bodies.get_mut(index) {
            body.materialized = true;
        }
        debug!(index, %name, "materialized function body");
        Ok(())
    }

    /// Materializes every deferred body under one `Function Bodies` node.
    pub fn materialize_all(&mut self) -> Result<()> {
        if self.info.function_bodies.is_empty() {
            return Ok(());
        }
        self.cursor.trace_mut().push(format_args!("Function Bodies"));
        for index in 0..self.info.function_bodies.len() {
            self.materialize_function(index)?;
        }
        self.cursor.trace_mut().pop();
        Ok(())
    }

    fn parse_function_block(&mut self) -> Result<()> {
        loop {
            match self.cursor.advance(AdvanceFlags::empty())? {
                Entry::EndBlock => return Ok(()),
                Entry::SubBlock(id) => match BlockId::from(id) {
                    BlockId::Constants => self.parse_constants_block(false)?,
                    BlockId::ValueSymtab => self.parse_value_symtab(false)?,
                    BlockId::Metadata => self.parse_metadata_block()?,
                    BlockId::MetadataAttachment | BlockId::UseList => {
                        self.parse_plain_block(id)?
                    }
                    _ => self.cursor.skip_block(id)?,
                },
                Entry::Record(abbrev_id) => {
                    let record = self.cursor.read_record(abbrev_id)?;
                    if record.code == FUNC_CODE_DECLAREBLOCKS {
                        let count = record.value(0)?;
                        self.cursor
                            .annotate_record(&record, format_args!("{count} basic blocks"));
                    }
                }
            }
        }
    }

    /// Reads a block whose records need no interpretation.
    fn parse_plain_block(&mut self, block_id: u32) -> Result<()> {
        self.cursor.enter_sub_block(block_id)?;
        loop {
            match self.cursor.advance(AdvanceFlags::empty())? {
                Entry::EndBlock => return Ok(()),
                Entry::SubBlock(id) => self.cursor.skip_block(id)?,
                Entry::Record(abbrev_id) => {
                    self.cursor.read_record(abbrev_id)?;
                }
            }
        }
    }

    fn parse_paramattr_block(&mut self) -> Result<()> {
        self.cursor.enter_sub_block(BlockId::ParamAttr.id())?;
        loop {
            match self.cursor.advance(AdvanceFlags::empty())? {
                Entry::EndBlock => return Ok(()),
                Entry::SubBlock(id) => self.cursor.skip_block(id)?,
                Entry::Record(abbrev_id) => {
                    let record = self.cursor.read_record(abbrev_id)?;
                    match record.code {
                        PARAMATTR_CODE_ENTRY => {
                            let index = self.info.attribute_lists.len() + 1;
                            self.cursor.annotate_record(
                                &record,
                                format_args!("attribute list {index}"),
                            );
                            self.info.attribute_lists.push(record.values);
                        }
                        PARAMATTR_CODE_ENTRY_OLD => {
                            if record.values.len() % 2 != 0 {
                                return Err(Error::InvalidRecord(
                                    "legacy attribute entry with an odd operand count".into(),
                                ));
                            }
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    fn parse_paramattr_group_block(&mut self) -> Result<()> {
        self.cursor.enter_sub_block(BlockId::ParamAttrGroup.id())?;
        loop {
            match self.cursor.advance(AdvanceFlags::empty())? {
                Entry::EndBlock => return Ok(()),
                Entry::SubBlock(id) => self.cursor.skip_block(id)?,
                Entry::Record(abbrev_id) => {
                    let record = self.cursor.read_record(abbrev_id)?;
                    if record.code == PARAMATTR_GRP_CODE_ENTRY {
                        let group = parse_attribute_group(&record)?;
                        self.cursor.annotate_record(&record, format_args!("{group}"));
                        self.info.attribute_groups.push(group);
                    }
                }
            }
        }
    }

    fn parse_type_table(&mut self) -> Result<()> {
        self.cursor.enter_sub_block(BlockId::TypeTable.id())?;
        loop {
            match self.cursor.advance(AdvanceFlags::DONT_POP_BLOCK_AT_END)? {
                Entry::EndBlock => {
                    self.info.types.finish()?;
                    return self.cursor.read_block_end();
                }
                Entry::SubBlock(id) => self.cursor.skip_block(id)?,
                Entry::Record(abbrev_id) => {
                    let record = self.cursor.read_record(abbrev_id)?;
                    if let Some(id) = self.info.types.apply(record.code, &record.values)? {
                        let ty = self.info.types.display(id);
                        self.cursor
                            .annotate_record(&record, format_args!("type {id} = {ty}"));
                    }
                }
            }
        }
    }

    fn parse_constants_block(&mut self, module_level: bool) -> Result<()> {
        self.cursor.enter_sub_block(BlockId::Constants.id())?;
        let mut cur_type: Option<u32> = None;
        loop {
            match self.cursor.advance(AdvanceFlags::empty())? {
                Entry::EndBlock => return Ok(()),
                Entry::SubBlock(id) => self.cursor.skip_block(id)?,
                Entry::Record(abbrev_id) => {
                    let record = self.cursor.read_record(abbrev_id)?;
                    if record.code == constants_code::SETTYPE {
                        let id = type_id(record.value(0)?)?;
                        if self.info.types.get(id).is_none() {
                            return Err(Error::InvalidRecord(format!(
                                "SETTYPE to undefined type {id}"
                            )));
                        }
                        cur_type = Some(id);
                        let ty = self.info.types.display(id);
                        self.cursor.annotate_record(&record, format_args!("{ty}"));
                        continue;
                    }

                    let summary = constant_summary(&self.info.types, &record, cur_type)?;
                    let value_id = module_level.then(|| self.next_value_id());
                    match (summary, value_id) {
                        (Some(summary), Some(id)) => self
                            .cursor
                            .annotate_record(&record, format_args!("%{id} = {summary}")),
                        (Some(summary), None) => {
                            self.cursor.annotate_record(&record, format_args!("{summary}"))
                        }
                        (None, _) => {}
                    }
                }
            }
        }
    }

    fn parse_metadata_block(&mut self) -> Result<()> {
        self.cursor.enter_sub_block(BlockId::Metadata.id())?;
        loop {
            match self.cursor.advance(AdvanceFlags::empty())? {
                Entry::EndBlock => return Ok(()),
                Entry::SubBlock(id) => self.cursor.skip_block(id)?,
                Entry::Record(abbrev_id) => {
                    let record = self.cursor.read_record(abbrev_id)?;
                    match record.code {
                        METADATA_STRING => {
                            let text = record.string_from(0)?;
                            self.cursor.annotate_record(&record, format_args!("!{text:?}"));
                        }
                        METADATA_NAME => {
                            let name = record.string_from(0)?;
                            self.cursor.annotate_record(&record, format_args!("!{name}"));
                            self.info.named_metadata.push(name);
                        }
                        METADATA_KIND => {
                            let id = record.value(0)?;
                            let name = record.string_from(1)?;
                            self.cursor
                                .annotate_record(&record, format_args!("!{name} = kind {id}"));
                            self.info.metadata_kinds.push(MetadataKind { id, name });
                        }
                        METADATA_VALUE => {
                            need(&record, 2)?;
                            let ty = self.info.types.display(type_id(record.values[0])?);
                            self.cursor.annotate_record(
                                &record,
                                format_args!("{ty} %{}", record.values[1]),
                            );
                        }
                        METADATA_NODE | METADATA_DISTINCT_NODE => {
                            let distinct = if record.code == METADATA_DISTINCT_NODE {
                                "distinct "
                            } else {
                                ""
                            };
                            self.cursor.annotate_record(
                                &record,
                                format_args!("{distinct}!{{{}}}", MetadataList(&record.values)),
                            );
                        }
                        METADATA_NAMED_NODE => {
                            let nodes: Vec<String> =
                                record.values.iter().map(|id| format!("!{id}")).collect();
                            self.cursor.annotate_record(
                                &record,
                                format_args!("!{{{}}}", nodes.join(", ")),
                            );
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    fn parse_value_symtab(&mut self, module_level: bool) -> Result<()> {
        self.cursor.enter_sub_block(BlockId::ValueSymtab.id())?;
        loop {
            match self.cursor.advance(AdvanceFlags::empty())? {
                Entry::EndBlock => return Ok(()),
                Entry::SubBlock(id) => self.cursor.skip_block(id)?,
                Entry::Record(abbrev_id) => {
                    let record = self.cursor.read_record(abbrev_id)?;
                    match record.code {
                        VST_CODE_ENTRY => {
                            let id = record.value(0)?;
                            let name = record.string_from(1)?;
                            self.cursor
                                .annotate_record(&record, format_args!("%{id} = {name:?}"));
                            if module_level {
                                self.name_value(id, &name);
                            }
                        }
                        VST_CODE_BBENTRY => {
                            let id = record.value(0)?;
                            let name = record.string_from(1)?;
                            self.cursor
                                .annotate_record(&record, format_args!("label {id} = {name:?}"));
                        }
                        VST_CODE_FNENTRY => {
                            let id = record.value(0)?;
                            let offset = record.value(1)?;
                            let name = record.string_from(2)?;
                            self.cursor.annotate_record(
                                &record,
                                format_args!("%{id} = {name:?}, body at word {offset}"),
                            );
                            if module_level {
                                self.name_value(id, &name);
                            }
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
    use crate::abbrev::AbbrevOperand;
    use crate::test_utils::BitstreamWriter;
    use crate::tree::{NoTrace, TreeBuilder};
    use crate::types::type_code;
    use pretty_assertions::assert_eq;

    const MODULE: u32 = 8;
    const TYPES: u32 = 17;
    const FUNCTION: u32 = 12;
    const VST: u32 = 14;

    fn reader(bytes: &[u8]) -> ModuleReader<'_, TreeBuilder> {
        ModuleReader::new(BitReader::new(bytes), TreeBuilder::new("Bitcode"))
    }

    /// `void ()` at type 1 and `void ()*` at type 2.
    fn emit_function_types(writer: &mut BitstreamWriter) {
        writer.enter_subblock(TYPES, 4);
        writer.emit_unabbrev_record(type_code::NUMENTRY, &[3]);
        writer.emit_unabbrev_record(type_code::VOID, &[]);
        writer.emit_unabbrev_record(type_code::FUNCTION, &[0, 0]);
        writer.emit_unabbrev_record(type_code::POINTER, &[1, 0]);
        writer.end_block();
    }

    fn emit_function_body(writer: &mut BitstreamWriter) {
        writer.enter_subblock(FUNCTION, 4);
        writer.emit_unabbrev_record(FUNC_CODE_DECLAREBLOCKS, &[1]);
        writer.emit_unabbrev_record(10, &[]);
        writer.end_block();
    }

    #[test]
    fn test_module_records() {
        let mut writer = BitstreamWriter::new();
        writer.emit_magic();
        writer.enter_subblock(MODULE, 3);
        writer.emit_unabbrev_record(module_code::VERSION, &[1]);
        writer.emit_string_record(module_code::TRIPLE, "dxil-ms-dx");
        writer.emit_string_record(module_code::DATALAYOUT, "e-m:e");
        writer.emit_string_record(module_code::SECTIONNAME, ".text");
        writer.emit_unabbrev_record(99, &[1, 2]);
        writer.end_block();
        let bytes = writer.finish();

        let mut module = reader(&bytes);
        assert_eq!(module.parse_module().unwrap(), ModuleProgress::Complete);
        let info = module.info();
        assert_eq!(info.version, Some(1));
        assert!(info.relative_ids);
        assert_eq!(info.triple.as_deref(), Some("dxil-ms-dx"));
        assert_eq!(info.datalayout.as_deref(), Some("e-m:e"));
        assert_eq!(info.section_names, vec![".text".to_string()]);

        let (_, trace) = module.into_parts();
        let tree = trace.finish();
        assert!(
            tree.find("VERSION [1]: version 1, relative value ids")
                .is_some()
        );
        assert!(tree.find("record 99 [1, 2]").is_some());
    }

    #[test]
    fn test_unsupported_version() {
        let mut writer = BitstreamWriter::new();
        writer.emit_magic();
        writer.enter_subblock(MODULE, 3);
        writer.emit_unabbrev_record(module_code::VERSION, &[3]);
        writer.end_block();
        let bytes = writer.finish();

        let mut module = ModuleReader::new(BitReader::new(&bytes), NoTrace);
        assert!(matches!(module.parse_module(), Err(Error::InvalidRecord(_))));
    }

    #[test]
    fn test_globals_functions_and_names() {
        let mut writer = BitstreamWriter::new();
        writer.emit_magic();
        writer.enter_subblock(MODULE, 3);
        writer.enter_subblock(TYPES, 4);
        writer.emit_unabbrev_record(type_code::NUMENTRY, &[2]);
        writer.emit_unabbrev_record(type_code::INTEGER, &[32]);
        writer.emit_unabbrev_record(type_code::POINTER, &[0, 0]);
        writer.end_block();
        // i32* global, constant, no initializer, internal, align 4
        writer.emit_unabbrev_record(module_code::GLOBALVAR, &[1, 1, 0, 3, 3, 0]);
        writer.emit_unabbrev_record(module_code::FUNCTION, &[1, 0, 1, 0, 0, 0, 0, 0]);
        writer.enter_subblock(VST, 4);
        writer.emit_unabbrev_record(VST_CODE_ENTRY, &[0, b'g' as u64]);
        writer.emit_unabbrev_record(VST_CODE_ENTRY, &[1, b'f' as u64]);
        writer.end_block();
        writer.end_block();
        let bytes = writer.finish();

        let mut module = reader(&bytes);
        module.parse_module().unwrap();
        let info = module.info();
        assert_eq!(info.value_count, 2);

        let global = &info.globals[0];
        assert_eq!(global.name.as_deref(), Some("g"));
        assert!(global.is_const);
        assert_eq!(global.linkage, "internal");
        assert_eq!(global.alignment, 4);
        assert_eq!(global.initializer, None);

        let function = &info.functions[0];
        assert_eq!(function.name.as_deref(), Some("f"));
        assert!(function.is_proto);
        assert_eq!(info.value_names.get(&1).map(String::as_str), Some("f"));

        let tree = module.into_parts().1.finish();
        assert!(tree.find("GLOBALVAR [1, 1, 0, 3, 3, 0]: @0 = internal constant i32*").is_some());
        assert!(tree.find("ENTRY [0, 103]: %0 = \"g\"").is_some());
    }

    #[test]
    fn test_function_bodies_are_deferred_without_suspending() {
        let mut writer = BitstreamWriter::new();
        writer.emit_magic();
        writer.enter_subblock(MODULE, 3);
        emit_function_types(&mut writer);
        writer.emit_unabbrev_record(module_code::FUNCTION, &[2, 0, 0, 0, 0, 0, 0, 0]);
        emit_function_body(&mut writer);
        writer.enter_subblock(VST, 4);
        writer.emit_string_record(VST_CODE_ENTRY, "\0main");
        writer.end_block();
        writer.end_block();
        let bytes = writer.finish();

        let mut module = reader(&bytes);
        assert_eq!(module.parse_module().unwrap(), ModuleProgress::Complete);
        assert_eq!(module.info().function_bodies.len(), 1);
        assert!(!module.info().function_bodies[0].materialized);

        module.materialize_all().unwrap();
        assert!(module.info().function_bodies[0].materialized);

        let tree = module.into_parts().1.finish();
        let bodies = tree.find("Function Bodies").unwrap();
        let body = bodies.find("Function Body 0 @main").unwrap();
        assert!(body.find("Function Block").is_some());
        assert!(body.find("DECLAREBLOCKS [1]: 1 basic blocks").is_some());
        assert!(tree.find("Function Block (deferred body 0)").is_some());
    }

    #[test]
    fn test_suspend_after_value_symtab() {
        let mut writer = BitstreamWriter::new();
        writer.emit_magic();
        writer.enter_subblock(MODULE, 3);
        emit_function_types(&mut writer);
        writer.emit_unabbrev_record(module_code::FUNCTION, &[2, 0, 0, 0, 0, 0, 0, 0]);
        writer.emit_unabbrev_record(module_code::FUNCTION, &[2, 0, 0, 0, 0, 0, 0, 0]);
        writer.enter_subblock(VST, 4);
        writer.emit_string_record(VST_CODE_ENTRY, "\0a");
        writer.emit_string_record(VST_CODE_ENTRY, "\u{1}b");
        writer.end_block();
        emit_function_body(&mut writer);
        let after_first = writer.position();
        emit_function_body(&mut writer);
        writer.emit_string_record(module_code::GCNAME, "gc");
        writer.end_block();
        let bytes = writer.finish();

        let mut module = reader(&bytes);
        let progress = module.parse_module().unwrap();
        assert_eq!(
            progress,
            ModuleProgress::Suspended {
                next_unread_bit: after_first
            }
        );
        assert_eq!(module.next_unread_bit(), Some(after_first));
        assert_eq!(module.info().function_bodies.len(), 1);
        assert!(module.info().gc_names.is_empty());

        // Parsing a body while suspended leaves the pass where it was.
        module.materialize_function(0).unwrap();
        assert_eq!(module.cursor().bit_position(), after_first);

        let progress = module.resume().unwrap();
        assert_eq!(progress, ModuleProgress::Suspended {
            next_unread_bit: module.next_unread_bit().unwrap()
        });
        assert_eq!(module.info().function_bodies.len(), 2);

        assert_eq!(module.resume().unwrap(), ModuleProgress::Complete);
        assert!(module.is_complete());
        assert_eq!(module.info().gc_names, vec!["gc".to_string()]);
        assert_eq!(module.info().function_name(1), "@b");
    }

    #[test]
    fn test_body_without_function_record() {
        let mut writer = BitstreamWriter::new();
        writer.emit_magic();
        writer.enter_subblock(MODULE, 3);
        emit_function_body(&mut writer);
        writer.end_block();
        let bytes = writer.finish();

        let mut module = ModuleReader::new(BitReader::new(&bytes), NoTrace);
        assert!(matches!(module.parse_module(), Err(Error::MalformedBlock(_))));
    }

    #[test]
    fn test_resume_requires_suspension() {
        let bytes = [0u8; 4];
        let mut module = ModuleReader::new(BitReader::new(&bytes), NoTrace);
        assert!(matches!(module.resume(), Err(Error::MalformedBlock(_))));
    }

    #[test]
    fn test_attribute_groups() {
        let mut writer = BitstreamWriter::new();
        writer.emit_magic();
        writer.enter_subblock(MODULE, 3);
        writer.enter_subblock(10, 4);
        let mut values = vec![1, FUNCTION_INDEX, 0, 18, 1, 1, 16, 3];
        values.extend(b"fp32".iter().map(|&b| u64::from(b)));
        values.push(0);
        values.push(4);
        values.extend(b"k".iter().map(|&b| u64::from(b)));
        values.push(0);
        values.extend(b"v".iter().map(|&b| u64::from(b)));
        values.push(0);
        writer.emit_unabbrev_record(PARAMATTR_GRP_CODE_ENTRY, &values);
        writer.end_block();
        writer.enter_subblock(9, 4);
        writer.emit_unabbrev_record(PARAMATTR_CODE_ENTRY, &[1]);
        writer.end_block();
        writer.end_block();
        let bytes = writer.finish();

        let mut module = reader(&bytes);
        module.parse_module().unwrap();
        let info = module.info();
        let group = &info.attribute_groups[0];
        assert_eq!(group.id, 1);
        assert_eq!(
            group.attributes,
            vec![
                Attribute::Enum {
                    name: "nounwind".into()
                },
                Attribute::Int {
                    name: "align".into(),
                    value: 16
                },
                Attribute::String {
                    key: "fp32".into(),
                    value: None
                },
                Attribute::String {
                    key: "k".into(),
                    value: Some("v".into())
                },
            ]
        );
        assert_eq!(
            group.to_string(),
            "group 1 function: nounwind align=16 \"fp32\" \"k\"=\"v\""
        );
        assert_eq!(info.attribute_lists, vec![vec![1]]);
    }

    #[test]
    fn test_constants_block() {
        let mut writer = BitstreamWriter::new();
        writer.emit_magic();
        writer.enter_subblock(MODULE, 3);
        writer.enter_subblock(TYPES, 4);
        writer.emit_unabbrev_record(type_code::NUMENTRY, &[2]);
        writer.emit_unabbrev_record(type_code::INTEGER, &[32]);
        writer.emit_unabbrev_record(type_code::FLOAT, &[]);
        writer.end_block();
        writer.enter_subblock(11, 4);
        writer.emit_unabbrev_record(constants_code::SETTYPE, &[0]);
        writer.emit_unabbrev_record(constants_code::INTEGER, &[11]);
        writer.emit_unabbrev_record(constants_code::UNDEF, &[]);
        writer.emit_unabbrev_record(constants_code::SETTYPE, &[1]);
        writer.emit_unabbrev_record(constants_code::FLOAT, &[u64::from(1.5f32.to_bits())]);
        writer.emit_unabbrev_record(constants_code::CE_BINOP, &[0, 0, 1]);
        writer.end_block();
        writer.end_block();
        let bytes = writer.finish();

        let mut module = reader(&bytes);
        module.parse_module().unwrap();
        assert_eq!(module.info().value_count, 4);

        let tree = module.into_parts().1.finish();
        assert!(tree.find("INTEGER [11]: %0 = i32 -5").is_some());
        assert!(tree.find("UNDEF: %1 = i32 undef").is_some());
        assert!(tree.find("FLOAT [1069547520]: %2 = float 1.5").is_some());
        assert!(tree.find("CE_BINOP [0, 0, 1]: %3 = add (%0, %1)").is_some());
    }

    #[test]
    fn test_settype_to_undefined_type() {
        let mut writer = BitstreamWriter::new();
        writer.emit_magic();
        writer.enter_subblock(MODULE, 3);
        writer.enter_subblock(11, 4);
        writer.emit_unabbrev_record(constants_code::SETTYPE, &[5]);
        writer.end_block();
        writer.end_block();
        let bytes = writer.finish();

        let mut module = ModuleReader::new(BitReader::new(&bytes), NoTrace);
        assert!(matches!(module.parse_module(), Err(Error::InvalidRecord(_))));
    }

    #[test]
    fn test_metadata_block() {
        let mut writer = BitstreamWriter::new();
        writer.emit_magic();
        writer.enter_subblock(MODULE, 3);
        writer.enter_subblock(15, 4);
        writer.emit_define_abbrev(&[
            AbbrevOperand::Literal(u64::from(METADATA_STRING)),
            AbbrevOperand::Array,
            AbbrevOperand::Fixed(8),
        ]);
        writer.emit_abbrev_id(4);
        writer.emit_array(AbbrevOperand::Fixed(8), &[b'h' as u64, b'i' as u64]);
        writer.emit_unabbrev_record(METADATA_NODE, &[1, 0]);
        writer.emit_string_record(METADATA_NAME, "dx.version");
        writer.emit_unabbrev_record(METADATA_NAMED_NODE, &[1]);
        writer.emit_string_record(METADATA_KIND, "\u{0}dbg");
        writer.end_block();
        writer.end_block();
        let bytes = writer.finish();

        let mut module = reader(&bytes);
        module.parse_module().unwrap();
        let info = module.info();
        assert_eq!(info.named_metadata, vec!["dx.version".to_string()]);
        assert_eq!(
            info.metadata_kinds,
            vec![MetadataKind {
                id: 0,
                name: "dbg".into()
            }]
        );

        let tree = module.into_parts().1.finish();
        assert!(tree.find("STRING [104, 105]: !\"hi\"").is_some());
        assert!(tree.find("NODE [1, 0]: !{!0, null}").is_some());
        assert!(tree.find("NAMED_NODE [1]: !{!1}").is_some());
    }

    #[test]
    fn test_sign_rotation_and_alignment() {
        assert_eq!(decode_sign_rotated(0), 0);
        assert_eq!(decode_sign_rotated(4), 2);
        assert_eq!(decode_sign_rotated(5), -2);
        assert_eq!(decode_sign_rotated(1), i64::MIN);
        assert_eq!(decode_alignment(0).unwrap(), 0);
        assert_eq!(decode_alignment(5).unwrap(), 16);
        assert!(decode_alignment(31).is_err());
    }

    #[test]
    fn test_comdat_and_purgevals() {
        let mut writer = BitstreamWriter::new();
        writer.emit_magic();
        writer.enter_subblock(MODULE, 3);
        writer.enter_subblock(TYPES, 4);
        writer.emit_unabbrev_record(type_code::NUMENTRY, &[2]);
        writer.emit_unabbrev_record(type_code::INTEGER, &[8]);
        writer.emit_unabbrev_record(type_code::POINTER, &[0, 0]);
        writer.end_block();
        writer.emit_unabbrev_record(module_code::COMDAT, &[1, 2, b'c' as u64, b'd' as u64]);
        writer.emit_unabbrev_record(module_code::GLOBALVAR, &[1, 0, 1, 0, 0, 0]);
        writer.emit_unabbrev_record(module_code::GLOBALVAR, &[1, 0, 0, 0, 0, 2]);
        writer.emit_unabbrev_record(module_code::PURGEVALS, &[1]);
        writer.end_block();
        let bytes = writer.finish();

        let mut module = ModuleReader::new(BitReader::new(&bytes), NoTrace);
        module.parse_module().unwrap();
        let info = module.info();
        assert_eq!(
            info.comdats,
            vec![Comdat {
                selection_kind: 1,
                name: "cd".into()
            }]
        );
        assert_eq!(info.globals.len(), 2);
        assert_eq!(info.globals[0].initializer, Some(0));
        assert_eq!(info.globals[1].section, Some(1));
        assert_eq!(info.value_count, 1);
    }

    #[test]
    fn test_comdat_name_past_record_end() {
        let mut writer = BitstreamWriter::new();
        writer.emit_magic();
        writer.enter_subblock(MODULE, 3);
        writer.emit_unabbrev_record(module_code::COMDAT, &[1, 5, b'c' as u64]);
        writer.end_block();
        let bytes = writer.finish();

        let mut module = ModuleReader::new(BitReader::new(&bytes), NoTrace);
        assert!(matches!(module.parse_module(), Err(Error::InvalidRecord(_))));
    }

    #[test]
    fn test_missing_module_block() {
        let mut writer = BitstreamWriter::new();
        writer.emit_magic();
        writer.enter_subblock(13, 3);
        writer.emit_string_record(1, "LLVM");
        writer.end_block();
        let bytes = writer.finish();

        let mut module = ModuleReader::new(BitReader::new(&bytes), NoTrace);
        assert!(matches!(module.parse_module(), Err(Error::MalformedBlock(_))));
    }
}

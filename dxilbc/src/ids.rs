//! Block ids, fixed abbreviation ids, and record code names
//!
//! Names follow the LLVM 3.7 bitcode schema that DXIL is built on.

use std::fmt;

/// Abbreviation id that closes the current block.
pub const END_BLOCK: u32 = 0;
/// Abbreviation id that opens a sub-block.
pub const ENTER_SUBBLOCK: u32 = 1;
/// Abbreviation id that defines a new abbreviation.
pub const DEFINE_ABBREV: u32 = 2;
/// Abbreviation id of a record written without an abbreviation.
pub const UNABBREV_RECORD: u32 = 3;
/// First abbreviation id that indexes the block's abbreviation list.
pub const FIRST_APPLICATION_ABBREV: u32 = 4;

/// Code width in effect outside any block.
pub const TOP_LEVEL_CODE_WIDTH: u32 = 2;

/// BLOCKINFO record: select the block id later records apply to.
pub const BLOCKINFO_CODE_SETBID: u32 = 1;
/// BLOCKINFO record: name of the selected block.
pub const BLOCKINFO_CODE_BLOCKNAME: u32 = 2;
/// BLOCKINFO record: name of one record code of the selected block.
pub const BLOCKINFO_CODE_SETRECORDNAME: u32 = 3;

/// Returns the name of a fixed abbreviation id, if it is one.
pub fn abbrev_id_name(id: u32) -> Option<&'static str> {
    match id {
        END_BLOCK => Some("END_BLOCK"),
        ENTER_SUBBLOCK => Some("ENTER_SUBBLOCK"),
        DEFINE_ABBREV => Some("DEFINE_ABBREV"),
        UNABBREV_RECORD => Some("UNABBREV_RECORD"),
        _ => None,
    }
}

/// Block ids understood by the reader
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockId {
    /// BLOCKINFO (0)
    BlockInfo,
    /// MODULE_BLOCK (8)
    Module,
    /// PARAMATTR_BLOCK (9)
    ParamAttr,
    /// PARAMATTR_GROUP_BLOCK (10)
    ParamAttrGroup,
    /// CONSTANTS_BLOCK (11)
    Constants,
    /// FUNCTION_BLOCK (12)
    Function,
    /// IDENTIFICATION_BLOCK (13)
    Identification,
    /// VALUE_SYMTAB_BLOCK (14)
    ValueSymtab,
    /// METADATA_BLOCK (15)
    Metadata,
    /// METADATA_ATTACHMENT (16)
    MetadataAttachment,
    /// TYPE_BLOCK_NEW (17)
    TypeTable,
    /// USELIST_BLOCK (18)
    UseList,
    /// Any other id
    Other(u32),
}

impl From<u32> for BlockId {
    fn from(value: u32) -> Self {
        match value {
            0 => BlockId::BlockInfo,
            8 => BlockId::Module,
            9 => BlockId::ParamAttr,
            10 => BlockId::ParamAttrGroup,
            11 => BlockId::Constants,
            12 => BlockId::Function,
            13 => BlockId::Identification,
            14 => BlockId::ValueSymtab,
            15 => BlockId::Metadata,
            16 => BlockId::MetadataAttachment,
            17 => BlockId::TypeTable,
            18 => BlockId::UseList,
            other => BlockId::Other(other),
        }
    }
}

impl BlockId {
    /// Returns the numeric id.
    pub fn id(self) -> u32 {
        match self {
            BlockId::BlockInfo => 0,
            BlockId::Module => 8,
            BlockId::ParamAttr => 9,
            BlockId::ParamAttrGroup => 10,
            BlockId::Constants => 11,
            BlockId::Function => 12,
            BlockId::Identification => 13,
            BlockId::ValueSymtab => 14,
            BlockId::Metadata => 15,
            BlockId::MetadataAttachment => 16,
            BlockId::TypeTable => 17,
            BlockId::UseList => 18,
            BlockId::Other(id) => id,
        }
    }

    /// Returns the display name, or `None` for unknown ids.
    pub fn name(self) -> Option<&'static str> {
        let name = match self {
            BlockId::BlockInfo => "BlockInfo Block",
            BlockId::Module => "Module Block",
            BlockId::ParamAttr => "ParamAttr Block",
            BlockId::ParamAttrGroup => "ParamAttrGroup Block",
            BlockId::Constants => "Constants Block",
            BlockId::Function => "Function Block",
            BlockId::Identification => "Identification Block",
            BlockId::ValueSymtab => "ValueSymtab Block",
            BlockId::Metadata => "Metadata Block",
            BlockId::MetadataAttachment => "MetadataAttachment Block",
            BlockId::TypeTable => "Type Table Block",
            BlockId::UseList => "UseList Block",
            BlockId::Other(_) => return None,
        };
        Some(name)
    }

    /// Returns the name of a record code in this block.
    pub fn record_name(self, code: u32) -> Option<&'static str> {
        match self {
            BlockId::BlockInfo => blockinfo_record_name(code),
            BlockId::Module => module_record_name(code),
            BlockId::ParamAttr => match code {
                1 => Some("ENTRY_OLD"),
                2 => Some("ENTRY"),
                _ => None,
            },
            BlockId::ParamAttrGroup => match code {
                3 => Some("GRP_ENTRY"),
                _ => None,
            },
            BlockId::Constants => constants_record_name(code),
            BlockId::Function => function_record_name(code),
            BlockId::Identification => match code {
                1 => Some("STRING"),
                2 => Some("EPOCH"),
                _ => None,
            },
            BlockId::ValueSymtab => match code {
                1 => Some("ENTRY"),
                2 => Some("BBENTRY"),
                3 => Some("FNENTRY"),
                5 => Some("COMBINED_FNENTRY"),
                _ => None,
            },
            BlockId::Metadata | BlockId::MetadataAttachment => metadata_record_name(code),
            BlockId::TypeTable => type_record_name(code),
            BlockId::UseList => match code {
                1 => Some("ENTRY"),
                2 => Some("DEFAULT"),
                _ => None,
            },
            BlockId::Other(_) => None,
        }
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "Block {}", self.id()),
        }
    }
}

fn blockinfo_record_name(code: u32) -> Option<&'static str> {
    match code {
        BLOCKINFO_CODE_SETBID => Some("SETBID"),
        BLOCKINFO_CODE_BLOCKNAME => Some("BLOCKNAME"),
        BLOCKINFO_CODE_SETRECORDNAME => Some("SETRECORDNAME"),
        _ => None,
    }
}

/// Module block record codes
pub mod module_code {
    /// `[version#]`
    pub const VERSION: u32 = 1;
    /// `[strchr x N]`
    pub const TRIPLE: u32 = 2;
    /// `[strchr x N]`
    pub const DATALAYOUT: u32 = 3;
    /// `[strchr x N]`
    pub const ASM: u32 = 4;
    /// `[strchr x N]`
    pub const SECTIONNAME: u32 = 5;
    /// `[strchr x N]`
    pub const DEPLIB: u32 = 6;
    /// `[pointer type, isconst, initid, linkage, alignment, section, ...]`
    pub const GLOBALVAR: u32 = 7;
    /// `[type, callingconv, isproto, linkage, paramattr, alignment, ...]`
    pub const FUNCTION: u32 = 8;
    /// `[alias type, aliasee val#, linkage, visibility]`
    pub const ALIAS: u32 = 9;
    /// `[numvals]`
    pub const PURGEVALS: u32 = 10;
    /// `[strchr x N]`
    pub const GCNAME: u32 = 11;
    /// `[selection_kind, name]`
    pub const COMDAT: u32 = 12;
}

fn module_record_name(code: u32) -> Option<&'static str> {
    match code {
        1 => Some("VERSION"),
        2 => Some("TRIPLE"),
        3 => Some("DATALAYOUT"),
        4 => Some("ASM"),
        5 => Some("SECTIONNAME"),
        6 => Some("DEPLIB"),
        7 => Some("GLOBALVAR"),
        8 => Some("FUNCTION"),
        9 => Some("ALIAS"),
        10 => Some("PURGEVALS"),
        11 => Some("GCNAME"),
        12 => Some("COMDAT"),
        13 => Some("VSTOFFSET"),
        14 => Some("ALIAS_NEW"),
        15 => Some("METADATA_VALUES"),
        _ => None,
    }
}

fn type_record_name(code: u32) -> Option<&'static str> {
    match code {
        1 => Some("NUMENTRY"),
        2 => Some("VOID"),
        3 => Some("FLOAT"),
        4 => Some("DOUBLE"),
        5 => Some("LABEL"),
        6 => Some("OPAQUE"),
        7 => Some("INTEGER"),
        8 => Some("POINTER"),
        9 => Some("FUNCTION_OLD"),
        10 => Some("HALF"),
        11 => Some("ARRAY"),
        12 => Some("VECTOR"),
        13 => Some("X86_FP80"),
        14 => Some("FP128"),
        15 => Some("PPC_FP128"),
        16 => Some("METADATA"),
        17 => Some("X86_MMX"),
        18 => Some("STRUCT_ANON"),
        19 => Some("STRUCT_NAME"),
        20 => Some("STRUCT_NAMED"),
        21 => Some("FUNCTION"),
        _ => None,
    }
}

/// Constants block record codes
pub mod constants_code {
    /// `[typeid]`
    pub const SETTYPE: u32 = 1;
    /// `[]`
    pub const NULL: u32 = 2;
    /// `[]`
    pub const UNDEF: u32 = 3;
    /// `[intval]`
    pub const INTEGER: u32 = 4;
    /// `[n x intval]`
    pub const WIDE_INTEGER: u32 = 5;
    /// `[fpval]`
    pub const FLOAT: u32 = 6;
    /// `[n x value number]`
    pub const AGGREGATE: u32 = 7;
    /// `[values]`
    pub const STRING: u32 = 8;
    /// `[values]`
    pub const CSTRING: u32 = 9;
    /// `[opcode, opval, opval]`
    pub const CE_BINOP: u32 = 10;
    /// `[opcode, opty, opval]`
    pub const CE_CAST: u32 = 11;
    /// `[n x operands]`
    pub const CE_GEP: u32 = 12;
    /// `[opval, opval, opval]`
    pub const CE_SELECT: u32 = 13;
    /// `[opty, opval, opval]`
    pub const CE_EXTRACTELT: u32 = 14;
    /// `[opval, opval, opval]`
    pub const CE_INSERTELT: u32 = 15;
    /// `[opval, opval, opval]`
    pub const CE_SHUFFLEVEC: u32 = 16;
    /// `[opty, opval, opval, pred]`
    pub const CE_CMP: u32 = 17;
    /// `[n x operands]`
    pub const CE_INBOUNDS_GEP: u32 = 20;
    /// `[n x elements]`
    pub const DATA: u32 = 22;
}

fn constants_record_name(code: u32) -> Option<&'static str> {
    match code {
        1 => Some("SETTYPE"),
        2 => Some("NULL"),
        3 => Some("UNDEF"),
        4 => Some("INTEGER"),
        5 => Some("WIDE_INTEGER"),
        6 => Some("FLOAT"),
        7 => Some("AGGREGATE"),
        8 => Some("STRING"),
        9 => Some("CSTRING"),
        10 => Some("CE_BINOP"),
        11 => Some("CE_CAST"),
        12 => Some("CE_GEP"),
        13 => Some("CE_SELECT"),
        14 => Some("CE_EXTRACTELT"),
        15 => Some("CE_INSERTELT"),
        16 => Some("CE_SHUFFLEVEC"),
        17 => Some("CE_CMP"),
        18 => Some("INLINEASM_OLD"),
        19 => Some("CE_SHUFVEC_EX"),
        20 => Some("CE_INBOUNDS_GEP"),
        21 => Some("BLOCKADDRESS"),
        22 => Some("DATA"),
        23 => Some("INLINEASM"),
        _ => None,
    }
}

fn function_record_name(code: u32) -> Option<&'static str> {
    match code {
        1 => Some("DECLAREBLOCKS"),
        2 => Some("INST_BINOP"),
        3 => Some("INST_CAST"),
        4 => Some("INST_GEP_OLD"),
        5 => Some("INST_SELECT"),
        6 => Some("INST_EXTRACTELT"),
        7 => Some("INST_INSERTELT"),
        8 => Some("INST_SHUFFLEVEC"),
        9 => Some("INST_CMP"),
        10 => Some("INST_RET"),
        11 => Some("INST_BR"),
        12 => Some("INST_SWITCH"),
        13 => Some("INST_INVOKE"),
        15 => Some("INST_UNREACHABLE"),
        16 => Some("INST_PHI"),
        19 => Some("INST_ALLOCA"),
        20 => Some("INST_LOAD"),
        23 => Some("INST_VAARG"),
        24 => Some("INST_STORE_OLD"),
        26 => Some("INST_EXTRACTVAL"),
        27 => Some("INST_INSERTVAL"),
        28 => Some("INST_CMP2"),
        29 => Some("INST_VSELECT"),
        30 => Some("INST_INBOUNDS_GEP_OLD"),
        31 => Some("INST_INDIRECTBR"),
        33 => Some("DEBUG_LOC_AGAIN"),
        34 => Some("INST_CALL"),
        35 => Some("DEBUG_LOC"),
        36 => Some("INST_FENCE"),
        37 => Some("INST_CMPXCHG_OLD"),
        38 => Some("INST_ATOMICRMW"),
        39 => Some("INST_RESUME"),
        40 => Some("INST_LANDINGPAD_OLD"),
        41 => Some("INST_LOADATOMIC"),
        42 => Some("INST_STOREATOMIC_OLD"),
        43 => Some("INST_GEP"),
        44 => Some("INST_STORE"),
        45 => Some("INST_STOREATOMIC"),
        46 => Some("INST_CMPXCHG"),
        47 => Some("INST_LANDINGPAD"),
        _ => None,
    }
}

fn metadata_record_name(code: u32) -> Option<&'static str> {
    match code {
        1 => Some("STRING"),
        2 => Some("VALUE"),
        3 => Some("NODE"),
        4 => Some("NAME"),
        5 => Some("DISTINCT_NODE"),
        6 => Some("KIND"),
        7 => Some("LOCATION"),
        8 => Some("OLD_NODE"),
        9 => Some("OLD_FN_NODE"),
        10 => Some("NAMED_NODE"),
        11 => Some("ATTACHMENT"),
        12 => Some("GENERIC_DEBUG"),
        13 => Some("SUBRANGE"),
        14 => Some("ENUMERATOR"),
        15 => Some("BASIC_TYPE"),
        16 => Some("FILE"),
        17 => Some("DERIVED_TYPE"),
        18 => Some("COMPOSITE_TYPE"),
        19 => Some("SUBROUTINE_TYPE"),
        20 => Some("COMPILE_UNIT"),
        21 => Some("SUBPROGRAM"),
        22 => Some("LEXICAL_BLOCK"),
        23 => Some("LEXICAL_BLOCK_FILE"),
        24 => Some("NAMESPACE"),
        25 => Some("TEMPLATE_TYPE"),
        26 => Some("TEMPLATE_VALUE"),
        27 => Some("GLOBAL_VAR"),
        28 => Some("LOCAL_VAR"),
        29 => Some("EXPRESSION"),
        30 => Some("OBJC_PROPERTY"),
        31 => Some("IMPORTED_ENTITY"),
        32 => Some("MODULE"),
        _ => None,
    }
}

/// Name of a binary operator opcode in CE_BINOP / INST_BINOP.
pub fn binop_name(opcode: u64) -> &'static str {
    match opcode {
        0 => "add",
        1 => "sub",
        2 => "mul",
        3 => "udiv",
        4 => "sdiv",
        5 => "urem",
        6 => "srem",
        7 => "shl",
        8 => "lshr",
        9 => "ashr",
        10 => "and",
        11 => "or",
        12 => "xor",
        _ => "binop?",
    }
}

/// Name of a cast opcode in CE_CAST / INST_CAST.
pub fn cast_name(opcode: u64) -> &'static str {
    match opcode {
        0 => "trunc",
        1 => "zext",
        2 => "sext",
        3 => "fptoui",
        4 => "fptosi",
        5 => "uitofp",
        6 => "sitofp",
        7 => "fptrunc",
        8 => "fpext",
        9 => "ptrtoint",
        10 => "inttoptr",
        11 => "bitcast",
        12 => "addrspacecast",
        _ => "cast?",
    }
}

/// Name of an encoded linkage value.
pub fn linkage_name(linkage: u64) -> &'static str {
    match linkage {
        0 | 5 | 6 => "external",
        1 | 16 => "weak",
        2 => "appending",
        3 => "internal",
        4 | 18 => "linkonce",
        7 => "extern_weak",
        8 => "common",
        9 | 13 | 14 => "private",
        10 | 17 => "weak_odr",
        11 | 15 | 19 => "linkonce_odr",
        12 => "available_externally",
        _ => "external",
    }
}

/// Name of an enum or integer attribute kind in a PARAMATTR_GROUP entry.
pub fn attribute_name(kind: u64) -> Option<&'static str> {
    let name = match kind {
        1 => "align",
        2 => "alwaysinline",
        3 => "byval",
        4 => "inlinehint",
        5 => "inreg",
        6 => "minsize",
        7 => "naked",
        8 => "nest",
        9 => "noalias",
        10 => "nobuiltin",
        11 => "nocapture",
        12 => "noduplicate",
        13 => "noimplicitfloat",
        14 => "noinline",
        15 => "nonlazybind",
        16 => "noredzone",
        17 => "noreturn",
        18 => "nounwind",
        19 => "optsize",
        20 => "readnone",
        21 => "readonly",
        22 => "returned",
        23 => "returns_twice",
        24 => "signext",
        25 => "alignstack",
        26 => "ssp",
        27 => "sspreq",
        28 => "sspstrong",
        29 => "sret",
        30 => "sanitize_address",
        31 => "sanitize_thread",
        32 => "sanitize_memory",
        33 => "uwtable",
        34 => "zeroext",
        35 => "builtin",
        36 => "cold",
        37 => "optnone",
        38 => "inalloca",
        39 => "nonnull",
        40 => "jumptable",
        41 => "dereferenceable",
        42 => "dereferenceable_or_null",
        43 => "convergent",
        44 => "safestack",
        45 => "argmemonly",
        _ => return None,
    };
    Some(name)
}

//! Module type table
//!
//! Types live in an arena indexed by type id. Slots are sized by NUMENTRY and
//! filled in order; a reference to a slot that is not filled yet leaves a
//! placeholder struct there that a later named struct or opaque record
//! completes.

use crate::{Error, Result};
use serde::Serialize;
use std::fmt;

/// Widest integer type the table accepts.
const MAX_INT_BITS: u64 = (1 << 24) - 1;
/// Upper bound on NUMENTRY.
const MAX_TYPES: u64 = 1 << 20;
/// Nesting depth at which rendering gives up.
const MAX_RENDER_DEPTH: usize = 16;
/// Number of type nodes one rendering may print before eliding the rest.
const MAX_RENDER_NODES: usize = 64;

/// Type table record codes
pub mod type_code {
    /// `[numentries]`
    pub const NUMENTRY: u32 = 1;
    /// `[]`
    pub const VOID: u32 = 2;
    /// `[]`
    pub const FLOAT: u32 = 3;
    /// `[]`
    pub const DOUBLE: u32 = 4;
    /// `[]`
    pub const LABEL: u32 = 5;
    /// `[ispacked]`
    pub const OPAQUE: u32 = 6;
    /// `[width]`
    pub const INTEGER: u32 = 7;
    /// `[pointee type, address space]`
    pub const POINTER: u32 = 8;
    /// `[vararg, attrid, retty, paramty x N]`
    pub const FUNCTION_OLD: u32 = 9;
    /// `[]`
    pub const HALF: u32 = 10;
    /// `[numelts, eltty]`
    pub const ARRAY: u32 = 11;
    /// `[numelts, eltty]`
    pub const VECTOR: u32 = 12;
    /// `[]`
    pub const X86_FP80: u32 = 13;
    /// `[]`
    pub const FP128: u32 = 14;
    /// `[]`
    pub const PPC_FP128: u32 = 15;
    /// `[]`
    pub const METADATA: u32 = 16;
    /// `[]`
    pub const X86_MMX: u32 = 17;
    /// `[ispacked, eltty x N]`
    pub const STRUCT_ANON: u32 = 18;
    /// `[strchr x N]`
    pub const STRUCT_NAME: u32 = 19;
    /// `[ispacked, eltty x N]`
    pub const STRUCT_NAMED: u32 = 20;
    /// `[vararg, retty, paramty x N]`
    pub const FUNCTION: u32 = 21;
}

/// Body of a struct type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StructBody {
    /// Laid out without padding
    pub packed: bool,
    /// Element type ids
    pub elements: Vec<u32>,
}

/// One type table entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Type {
    Void,
    Half,
    Float,
    Double,
    X86Fp80,
    Fp128,
    PpcFp128,
    Label,
    Metadata,
    X86Mmx,
    Integer {
        bits: u32,
    },
    Pointer {
        pointee: u32,
        address_space: u32,
    },
    Function {
        vararg: bool,
        ret: u32,
        params: Vec<u32>,
    },
    Array {
        len: u64,
        element: u32,
    },
    Vector {
        len: u64,
        element: u32,
    },
    /// Literal structs have no identity; identified structs may have a name
    /// and no body (opaque).
    Struct {
        literal: bool,
        name: Option<String>,
        body: Option<StructBody>,
    },
}

impl Type {
    fn placeholder() -> Self {
        Type::Struct {
            literal: false,
            name: None,
            body: None,
        }
    }

    /// Bit width for integer and floating point types.
    pub fn scalar_bits(&self) -> Option<u32> {
        match self {
            Type::Integer { bits } => Some(*bits),
            Type::Half => Some(16),
            Type::Float => Some(32),
            Type::Double => Some(64),
            Type::X86Fp80 => Some(80),
            Type::Fp128 | Type::PpcFp128 => Some(128),
            _ => None,
        }
    }
}

/// The type arena of one module
#[derive(Debug, Clone, Default, Serialize)]
pub struct TypeTable {
    slots: Vec<Option<Type>>,
    #[serde(skip)]
    next: usize,
    #[serde(skip)]
    pending_name: Option<String>,
}

impl TypeTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns true if NUMENTRY has not been seen or was zero.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Number of slots defined so far.
    pub fn defined(&self) -> usize {
        self.next
    }

    /// Returns the type with id `id`.
    pub fn get(&self, id: u32) -> Option<&Type> {
        self.slots.get(id as usize)?.as_ref()
    }

    /// Iterates over (id, type) for filled slots.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &Type)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(id, slot)| slot.as_ref().map(|ty| (id as u32, ty)))
    }

    /// Resolves a type id operand, leaving a placeholder struct in an empty
    /// slot.
    fn reference(&mut self, id: u64) -> Result<u32> {
        let len = self.slots.len();
        let slot = usize::try_from(id)
            .ok()
            .and_then(|index| self.slots.get_mut(index))
            .ok_or_else(|| {
                Error::InvalidRecord(format!(
                    "type id {id} is out of range for a table of {len}"
                ))
            })?;
        if slot.is_none() {
            *slot = Some(Type::placeholder());
        }
        Ok(id as u32)
    }

    fn references(&mut self, ids: &[u64]) -> Result<Vec<u32>> {
        ids.iter().map(|&id| self.reference(id)).collect()
    }

    fn next_slot(&mut self) -> Result<usize> {
        if self.next >= self.slots.len() {
            return Err(Error::InvalidRecord(format!(
                "more type entries than the {} declared by NUMENTRY",
                self.slots.len()
            )));
        }
        Ok(self.next)
    }

    /// Fills the next slot with a type that may not replace a placeholder.
    fn define(&mut self, ty: Type) -> Result<u32> {
        let index = self.next_slot()?;
        if self.slots[index].is_some() {
            return Err(Error::InvalidRecord(format!(
                "type {index} was referenced as a struct before its definition"
            )));
        }
        self.slots[index] = Some(ty);
        self.next += 1;
        Ok(index as u32)
    }

    /// Fills the next slot with an identified struct, completing a
    /// placeholder if one is there.
    fn define_identified(&mut self, body: Option<StructBody>) -> Result<u32> {
        let index = self.next_slot()?;
        let name = self.pending_name.take();
        match &self.slots[index] {
            None
            | Some(Type::Struct {
                literal: false,
                body: None,
                ..
            }) => {}
            Some(_) => {
                return Err(Error::InvalidRecord(format!(
                    "type {index} is already defined"
                )));
            }
        }
        self.slots[index] = Some(Type::Struct {
            literal: false,
            name,
            body,
        });
        self.next += 1;
        Ok(index as u32)
    }

    /// Applies one TYPE_BLOCK record. Returns the id it defined, if any.
    ///
    /// Unknown codes are ignored.
    pub fn apply(&mut self, code: u32, values: &[u64]) -> Result<Option<u32>> {
        let need = |n: usize| -> Result<()> {
            if values.len() < n {
                return Err(Error::InvalidRecord(format!(
                    "type record {code} has {} operands, needs {n}",
                    values.len()
                )));
            }
            Ok(())
        };

        let id = match code {
            type_code::NUMENTRY => {
                need(1)?;
                if self.next > 0 {
                    return Err(Error::InvalidRecord(
                        "NUMENTRY after type entries were defined".into(),
                    ));
                }
                if values[0] > MAX_TYPES {
                    return Err(Error::InvalidRecord(format!(
                        "NUMENTRY {} is too large",
                        values[0]
                    )));
                }
                self.slots.resize(values[0] as usize, None);
                return Ok(None);
            }
            type_code::VOID => self.define(Type::Void)?,
            type_code::HALF => self.define(Type::Half)?,
            type_code::FLOAT => self.define(Type::Float)?,
            type_code::DOUBLE => self.define(Type::Double)?,
            type_code::X86_FP80 => self.define(Type::X86Fp80)?,
            type_code::FP128 => self.define(Type::Fp128)?,
            type_code::PPC_FP128 => self.define(Type::PpcFp128)?,
            type_code::LABEL => self.define(Type::Label)?,
            type_code::METADATA => self.define(Type::Metadata)?,
            type_code::X86_MMX => self.define(Type::X86Mmx)?,
            type_code::INTEGER => {
                need(1)?;
                let bits = values[0];
                if bits == 0 || bits > MAX_INT_BITS {
                    return Err(Error::InvalidRecord(format!("invalid integer width {bits}")));
                }
                self.define(Type::Integer { bits: bits as u32 })?
            }
            type_code::POINTER => {
                need(1)?;
                let pointee = self.reference(values[0])?;
                let address_space = values.get(1).copied().unwrap_or(0);
                let address_space = u32::try_from(address_space).map_err(|_| {
                    Error::InvalidRecord(format!("address space {address_space} is too large"))
                })?;
                self.define(Type::Pointer {
                    pointee,
                    address_space,
                })?
            }
            type_code::FUNCTION_OLD => {
                need(3)?;
                let ret = self.reference(values[2])?;
                let params = self.references(&values[3..])?;
                self.define(Type::Function {
                    vararg: values[0] != 0,
                    ret,
                    params,
                })?
            }
            type_code::FUNCTION => {
                need(2)?;
                let ret = self.reference(values[1])?;
                let params = self.references(&values[2..])?;
                self.define(Type::Function {
                    vararg: values[0] != 0,
                    ret,
                    params,
                })?
            }
            type_code::ARRAY | type_code::VECTOR => {
                need(2)?;
                let element = self.reference(values[1])?;
                let len = values[0];
                if code == type_code::VECTOR {
                    if len == 0 {
                        return Err(Error::InvalidRecord("vector of length zero".into()));
                    }
                    self.define(Type::Vector { len, element })?
                } else {
                    self.define(Type::Array { len, element })?
                }
            }
            type_code::STRUCT_ANON => {
                need(1)?;
                let elements = self.references(&values[1..])?;
                self.define(Type::Struct {
                    literal: true,
                    name: None,
                    body: Some(StructBody {
                        packed: values[0] != 0,
                        elements,
                    }),
                })?
            }
            type_code::STRUCT_NAME => {
                let bytes = values
                    .iter()
                    .map(|&v| {
                        u8::try_from(v).map_err(|_| {
                            Error::InvalidRecord(format!("struct name character {v} is not a byte"))
                        })
                    })
                    .collect::<Result<Vec<u8>>>()?;
                self.pending_name = Some(String::from_utf8_lossy(&bytes).into_owned());
                return Ok(None);
            }
            type_code::STRUCT_NAMED => {
                need(1)?;
                let elements = self.references(&values[1..])?;
                self.define_identified(Some(StructBody {
                    packed: values[0] != 0,
                    elements,
                }))?
            }
            type_code::OPAQUE => self.define_identified(None)?,
            _ => return Ok(None),
        };
        Ok(Some(id))
    }

    /// Checks that every slot declared by NUMENTRY was defined.
    pub fn finish(&self) -> Result<()> {
        if self.next != self.slots.len() {
            return Err(Error::MalformedBlock(format!(
                "type table defines {} of {} entries",
                self.next,
                self.slots.len()
            )));
        }
        Ok(())
    }

    /// Renders type `id` as LLVM assembly text.
    ///
    /// Rendering prints at most a fixed number of type nodes; whatever is
    /// left is elided as `...`.
    pub fn display(&self, id: u32) -> TypeDisplay<'_> {
        TypeDisplay { table: self, id }
    }
}

/// LLVM-style rendering of a type, returned by [`TypeTable::display`].
pub struct TypeDisplay<'t> {
    table: &'t TypeTable,
    id: u32,
}

/// Remaining depth and node allowance of one rendering.
struct Budget {
    depth: usize,
    nodes: usize,
}

impl TypeDisplay<'_> {
    fn write_type(
        &self,
        f: &mut fmt::Formatter<'_>,
        id: u32,
        budget: &mut Budget,
    ) -> fmt::Result {
        if budget.depth > MAX_RENDER_DEPTH || budget.nodes == 0 {
            return f.write_str("...");
        }
        budget.nodes -= 1;
        let Some(ty) = self.table.get(id) else {
            return write!(f, "<type {id}>");
        };
        match ty {
            Type::Void => f.write_str("void"),
            Type::Half => f.write_str("half"),
            Type::Float => f.write_str("float"),
            Type::Double => f.write_str("double"),
            Type::X86Fp80 => f.write_str("x86_fp80"),
            Type::Fp128 => f.write_str("fp128"),
            Type::PpcFp128 => f.write_str("ppc_fp128"),
            Type::Label => f.write_str("label"),
            Type::Metadata => f.write_str("metadata"),
            Type::X86Mmx => f.write_str("x86_mmx"),
            Type::Integer { bits } => write!(f, "i{bits}"),
            Type::Pointer {
                pointee,
                address_space,
            } => {
                self.write_nested(f, *pointee, budget)?;
                match address_space {
                    0 => f.write_str("*"),
                    space => write!(f, " addrspace({space})*"),
                }
            }
            Type::Function {
                vararg,
                ret,
                params,
            } => {
                self.write_nested(f, *ret, budget)?;
                f.write_str(" (")?;
                self.write_list(f, params, budget)?;
                if *vararg {
                    f.write_str(if params.is_empty() { "..." } else { ", ..." })?;
                }
                f.write_str(")")
            }
            Type::Array { len, element } => {
                write!(f, "[{len} x ")?;
                self.write_nested(f, *element, budget)?;
                f.write_str("]")
            }
            Type::Vector { len, element } => {
                write!(f, "<{len} x ")?;
                self.write_nested(f, *element, budget)?;
                f.write_str(">")
            }
            Type::Struct {
                literal: false,
                name,
                ..
            } => match name {
                Some(name) => write!(f, "%{name}"),
                None => write!(f, "%{id}"),
            },
            Type::Struct {
                literal: true,
                body,
                ..
            } => {
                let (packed, elements) = match body {
                    Some(body) => (body.packed, body.elements.as_slice()),
                    None => (false, &[][..]),
                };
                if elements.is_empty() {
                    return f.write_str(if packed { "<{}>" } else { "{}" });
                }
                f.write_str(if packed { "<{ " } else { "{ " })?;
                self.write_list(f, elements, budget)?;
                f.write_str(if packed { " }>" } else { " }" })
            }
        }
    }

    fn write_nested(
        &self,
        f: &mut fmt::Formatter<'_>,
        id: u32,
        budget: &mut Budget,
    ) -> fmt::Result {
        budget.depth += 1;
        let result = self.write_type(f, id, budget);
        budget.depth -= 1;
        result
    }

    fn write_list(
        &self,
        f: &mut fmt::Formatter<'_>,
        ids: &[u32],
        budget: &mut Budget,
    ) -> fmt::Result {
        for (i, &id) in ids.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            if budget.nodes == 0 {
                return f.write_str("...");
            }
            self.write_nested(f, id, budget)?;
        }
        Ok(())
    }
}

impl fmt::Display for TypeDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut budget = Budget {
            depth: 0,
            nodes: MAX_RENDER_NODES,
        };
        self.write_type(f, self.id, &mut budget)
    }
}

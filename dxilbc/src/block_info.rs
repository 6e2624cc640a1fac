//! Abbreviations and names registered by a BLOCKINFO block

use crate::abbrev::Abbrev;
use std::mem;
use std::rc::Rc;

/// What a BLOCKINFO block registered for one block id.
#[derive(Debug, Clone, Default)]
pub struct BlockInfo {
    /// Block id the entry applies to
    pub block_id: u32,
    /// Name from a BLOCKNAME record
    pub name: Option<String>,
    /// Names from SETRECORDNAME records, as (record code, name)
    pub record_names: Vec<(u32, String)>,
    /// Abbreviations every instance of the block starts with
    pub abbrevs: Vec<Rc<Abbrev>>,
}

impl BlockInfo {
    /// Returns the registered name of a record code.
    pub fn record_name(&self, code: u32) -> Option<&str> {
        self.record_names
            .iter()
            .find(|(id, _)| *id == code)
            .map(|(_, name)| name.as_str())
    }
}

/// The BLOCKINFO registry of one module.
///
/// The table is populated once and then only read. Two readers over the same
/// module hand it over with [`take`](Self::take); there is no shared mutable
/// access.
#[derive(Debug, Clone, Default)]
pub struct BlockInfoTable {
    infos: Vec<BlockInfo>,
    populated: bool,
}

impl BlockInfoTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the table holds no entries.
    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }

    /// Returns true once a BLOCKINFO block has been read into this table,
    /// even one that registered nothing.
    pub fn is_populated(&self) -> bool {
        self.populated
    }

    /// Records that a BLOCKINFO block has been read.
    pub fn mark_populated(&mut self) {
        self.populated = true;
    }

    /// Returns the entry for `block_id`.
    pub fn get(&self, block_id: u32) -> Option<&BlockInfo> {
        self.infos.iter().find(|info| info.block_id == block_id)
    }

    /// Returns the entry for `block_id`, creating it if needed.
    pub fn get_or_insert(&mut self, block_id: u32) -> &mut BlockInfo {
        let index = match self.infos.iter().position(|info| info.block_id == block_id) {
            Some(index) => index,
            None => {
                self.infos.push(BlockInfo {
                    block_id,
                    ..BlockInfo::default()
                });
                self.infos.len() - 1
            }
        };
        &mut self.infos[index]
    }

    /// Iterates over all entries in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &BlockInfo> {
        self.infos.iter()
    }

    /// Moves the contents out, leaving this table empty and unpopulated.
    pub fn take(&mut self) -> BlockInfoTable {
        mem::take(self)
    }
}

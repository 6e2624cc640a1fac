//! Cursor and decode flags

use bitflags::bitflags;

bitflags! {
    /// Flags for [`StreamCursor::advance`](crate::StreamCursor::advance)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AdvanceFlags: u32 {
        /// Report END_BLOCK without leaving the block; the caller finishes
        /// with [`read_block_end`](crate::StreamCursor::read_block_end)
        const DONT_POP_BLOCK_AT_END = 1 << 0;

        /// Report DEFINE_ABBREV as a record instead of registering it
        const DONT_AUTOPROCESS_ABBREVS = 1 << 1;
    }
}

impl Default for AdvanceFlags {
    fn default() -> Self {
        AdvanceFlags::empty()
    }
}

bitflags! {
    /// Flags for a decode pass
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DecodeFlags: u32 {
        /// Parse the deferred function bodies once the module is read
        const MATERIALIZE_FUNCTIONS = 1 << 0;

        /// Leave the module suspended at its first function body instead of
        /// resuming to the end of the module block
        const STOP_AT_SUSPEND = 1 << 1;
    }
}

impl Default for DecodeFlags {
    fn default() -> Self {
        DecodeFlags::MATERIALIZE_FUNCTIONS
    }
}

pub type BlockId = u32;
pub type ColumnId = u16;
pub type SlotOffset = u32;

pub const INVALID_BLOCK_ID: BlockId = 0;
pub const BLOCK_SIZE: u32 = 1 << 20;

pub const MAX_COLUMNS: u16 = u16::MAX;

/// The primary key column (or one column of a multi-column primary key) is always laid out first,
/// so its null bitmap doubles as the presence bitmap of the block.
pub const PRIMARY_KEY_COLUMN: ColumnId = 0;

//! BIFF8 record type constants and format limits.
//!
//! Reference: [MS-XLS] 2.3 Record Enumeration

// Stream structure
pub const BOF: u16 = 0x0809;
pub const EOF: u16 = 0x000A;
pub const CONTINUE: u16 = 0x003C;

// Workbook globals
pub const BOUNDSHEET: u16 = 0x0085;
pub const SST: u16 = 0x00FC;
pub const EXTSST: u16 = 0x00FF;
pub const CODEPAGE: u16 = 0x0042;
pub const MSODRAWINGGROUP: u16 = 0x00EB;

// Cell records
pub const DIMENSIONS: u16 = 0x0200;
pub const BLANK: u16 = 0x0201;
pub const NUMBER: u16 = 0x0203;
pub const LABEL: u16 = 0x0204;
pub const BOOLERR: u16 = 0x0205;
pub const FORMULA: u16 = 0x0006;
pub const STRING: u16 = 0x0207;
pub const RK: u16 = 0x027E;
pub const LABELSST: u16 = 0x00FD;
pub const MULRK: u16 = 0x00BD;
pub const MULBLANK: u16 = 0x00BE;
pub const SHRFMLA: u16 = 0x04BC;
pub const ARRAY: u16 = 0x0221;

// Sheet structure
pub const ROW: u16 = 0x0208;
pub const COLINFO: u16 = 0x007D;
pub const INDEX: u16 = 0x020B;
pub const DBCELL: u16 = 0x00D7;
pub const WINDOW2: u16 = 0x023E;

// Drawing layer
pub const MSODRAWING: u16 = 0x00EC;
pub const OBJ: u16 = 0x005D;
pub const TXO: u16 = 0x01B6;
pub const NOTE: u16 = 0x001C;

// BOF substream types (the `dt` field)
pub const BOF_WORKBOOK_GLOBALS: u16 = 0x0005;
pub const BOF_WORKSHEET: u16 = 0x0010;

/// BIFF8 version number in BOF
pub const BIFF8_VERSION: u16 = 0x0600;

/// Maximum number of payload bytes in a single physical record
pub const MAX_RECORD_DATA: usize = 8224;

/// Number of rows in a BIFF8 worksheet
pub const MAX_ROWS: u32 = 65_536;

/// Number of columns in a BIFF8 worksheet
pub const MAX_COLUMNS: u32 = 256;

/// Longest string a 16-bit character count can describe
pub const MAX_STRING_CHARS: usize = 0xFFFF;

/// Rows per ROW/cell block in the assembled cell table
pub const ROWS_PER_BLOCK: u32 = 32;

/// Whether `opcode` is one of the records filed in the cell index.
pub fn is_cell_record(opcode: u16) -> bool {
    matches!(
        opcode,
        BLANK | NUMBER | LABEL | BOOLERR | FORMULA | RK | LABELSST | MULRK | MULBLANK
    )
}

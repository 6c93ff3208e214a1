//! Stream-structure and worksheet metadata records.

use bitflags::bitflags;

use super::{BiffRecord, require_len};
use crate::common::binary::{self, push_u16_le, push_u32_le};
use crate::xls::consts;
use crate::xls::error::{XlsError, XlsResult};

/// BOF (Beginning of File) record
///
/// Record type: 0x0809
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bof {
    pub version: u16,
    /// Substream type (0x0005 = workbook globals, 0x0010 = worksheet)
    pub substream: u16,
    pub build: u16,
    pub year: u16,
    pub history: u32,
    pub lowest_version: u32,
}

impl Bof {
    pub fn new(substream: u16) -> Self {
        Bof {
            version: consts::BIFF8_VERSION,
            substream,
            build: 0x0DBB,
            year: 0x07CC,
            history: 0x0000_0041,
            lowest_version: 0x0000_0006,
        }
    }
}

impl BiffRecord for Bof {
    const OPCODE: u16 = consts::BOF;

    fn parse(data: &[u8]) -> XlsResult<Self> {
        require_len(Self::OPCODE, data, 4)?;
        let opt16 = |at| binary::read_u16_le(data, at).unwrap_or(0);
        let opt32 = |at| binary::read_u32_le(data, at).unwrap_or(0);
        Ok(Bof {
            version: binary::read_u16_le(data, 0)?,
            substream: binary::read_u16_le(data, 2)?,
            build: opt16(4),
            year: opt16(6),
            history: opt32(8),
            lowest_version: opt32(12),
        })
    }

    fn write_payload(&self, out: &mut Vec<u8>) {
        push_u16_le(out, self.version);
        push_u16_le(out, self.substream);
        push_u16_le(out, self.build);
        push_u16_le(out, self.year);
        push_u32_le(out, self.history);
        push_u32_le(out, self.lowest_version);
    }
}

/// DIMENSIONS record (used range of a worksheet)
///
/// Record type: 0x0200. `last_row` and `last_col` are exclusive bounds, the
/// way BIFF8 stores them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Dimensions {
    pub first_row: u32,
    pub last_row: u32,
    pub first_col: u16,
    pub last_col: u16,
}

impl BiffRecord for Dimensions {
    const OPCODE: u16 = consts::DIMENSIONS;

    fn parse(data: &[u8]) -> XlsResult<Self> {
        match data.len() {
            10 => Ok(Dimensions {
                // BIFF5 layout, tolerated on read
                first_row: binary::read_u16_le(data, 0)? as u32,
                last_row: binary::read_u16_le(data, 2)? as u32,
                first_col: binary::read_u16_le(data, 4)?,
                last_col: binary::read_u16_le(data, 6)?,
            }),
            n if n >= 12 => Ok(Dimensions {
                first_row: binary::read_u32_le(data, 0)?,
                last_row: binary::read_u32_le(data, 4)?,
                first_col: binary::read_u16_le(data, 8)?,
                last_col: binary::read_u16_le(data, 10)?,
            }),
            n => Err(XlsError::malformed(
                Self::OPCODE,
                format!("payload is {n} bytes, expected 10 or 14"),
            )),
        }
    }

    fn write_payload(&self, out: &mut Vec<u8>) {
        push_u32_le(out, self.first_row);
        push_u32_le(out, self.last_row);
        push_u16_le(out, self.first_col);
        push_u16_le(out, self.last_col);
        push_u16_le(out, 0);
    }
}

bitflags! {
    /// Option word of a ROW record (offset 12)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RowFlags: u16 {
        /// Outline level (3 bits)
        const OUTLINE_LEVEL = 0x0007;
        /// Row is collapsed in outlining
        const COLLAPSED = 0x0010;
        /// Row is hidden (zero height)
        const HIDDEN = 0x0020;
        /// Height differs from the default
        const UNSYNCED = 0x0040;
        /// Row carries an explicit format (`xf` is valid)
        const FORMATTED = 0x0080;
        /// Reserved, always written as 1
        const RESERVED = 0x0100;
    }
}

/// ROW record (row height, visibility, default format)
///
/// Record type: 0x0208
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowRecord {
    pub row: u32,
    /// First used column
    pub first_col: u16,
    /// Last used column + 1
    pub last_col: u16,
    /// Height in twips; bit 15 marks the default height
    pub height: u16,
    pub flags: RowFlags,
    /// Low 12 bits: XF index; high bits: thick-border/phonetic flags
    pub xf_word: u16,
    reserved: u32,
}

impl RowRecord {
    /// Default height as written by Excel (0x00FF with the default bit clear).
    pub const DEFAULT_HEIGHT: u16 = 0x00FF;

    pub fn new(row: u32) -> Self {
        RowRecord {
            row,
            first_col: 0,
            last_col: 0,
            height: Self::DEFAULT_HEIGHT,
            flags: RowFlags::RESERVED,
            xf_word: 0x000F,
            reserved: 0,
        }
    }

    pub fn outline_level(&self) -> u8 {
        (self.flags & RowFlags::OUTLINE_LEVEL).bits() as u8
    }

    pub fn set_outline_level(&mut self, level: u8) {
        self.flags = (self.flags - RowFlags::OUTLINE_LEVEL)
            | RowFlags::from_bits_retain(u16::from(level.min(7)));
    }

    /// Explicit row format, if the row has one.
    pub fn xf(&self) -> Option<u16> {
        self.flags
            .contains(RowFlags::FORMATTED)
            .then_some(self.xf_word & 0x0FFF)
    }

    pub fn set_xf(&mut self, xf: Option<u16>) {
        match xf {
            Some(xf) => {
                self.flags |= RowFlags::FORMATTED;
                self.xf_word = (self.xf_word & 0xF000) | (xf & 0x0FFF);
            },
            None => {
                self.flags -= RowFlags::FORMATTED;
                self.xf_word = (self.xf_word & 0xF000) | 0x000F;
            },
        }
    }
}

impl BiffRecord for RowRecord {
    const OPCODE: u16 = consts::ROW;

    fn parse(data: &[u8]) -> XlsResult<Self> {
        require_len(Self::OPCODE, data, 16)?;
        Ok(RowRecord {
            row: binary::read_u16_le(data, 0)? as u32,
            first_col: binary::read_u16_le(data, 2)?,
            last_col: binary::read_u16_le(data, 4)?,
            height: binary::read_u16_le(data, 6)?,
            reserved: binary::read_u32_le(data, 8)?,
            flags: RowFlags::from_bits_retain(binary::read_u16_le(data, 12)?),
            xf_word: binary::read_u16_le(data, 14)?,
        })
    }

    fn write_payload(&self, out: &mut Vec<u8>) {
        push_u16_le(out, self.row as u16);
        push_u16_le(out, self.first_col);
        push_u16_le(out, self.last_col);
        push_u16_le(out, self.height);
        push_u32_le(out, self.reserved);
        push_u16_le(out, self.flags.bits());
        push_u16_le(out, self.xf_word);
    }
}

bitflags! {
    /// Option word of a COLINFO record
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ColInfoFlags: u16 {
        const HIDDEN = 0x0001;
        const USER_SET = 0x0002;
        const BEST_FIT = 0x0004;
        const PHONETIC = 0x0008;
        const OUTLINE_LEVEL = 0x0700;
        const COLLAPSED = 0x1000;
    }
}

/// COLINFO record (width and format of an inclusive column range)
///
/// Record type: 0x007D
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColInfo {
    pub first_col: u16,
    pub last_col: u16,
    /// Width in 1/256 of a character
    pub width: u16,
    pub xf: u16,
    pub flags: ColInfoFlags,
    unused: u16,
}

impl ColInfo {
    /// Default width, matching the COLINFO records Excel writes.
    pub const DEFAULT_WIDTH: u16 = 2275;

    pub fn new(first_col: u16, last_col: u16, width: u16, xf: u16) -> Self {
        ColInfo {
            first_col,
            last_col,
            width,
            xf,
            flags: ColInfoFlags::empty(),
            unused: 0,
        }
    }

    #[inline]
    pub fn contains(&self, col: u16) -> bool {
        self.first_col <= col && col <= self.last_col
    }

    /// Copy of this range with different bounds.
    pub fn with_bounds(&self, first_col: u16, last_col: u16) -> Self {
        ColInfo {
            first_col,
            last_col,
            ..*self
        }
    }
}

impl BiffRecord for ColInfo {
    const OPCODE: u16 = consts::COLINFO;

    fn parse(data: &[u8]) -> XlsResult<Self> {
        require_len(Self::OPCODE, data, 10)?;
        Ok(ColInfo {
            first_col: binary::read_u16_le(data, 0)?,
            last_col: binary::read_u16_le(data, 2)?,
            width: binary::read_u16_le(data, 4)?,
            xf: binary::read_u16_le(data, 6)?,
            flags: ColInfoFlags::from_bits_retain(binary::read_u16_le(data, 8)?),
            unused: binary::read_u16_le(data, 10).unwrap_or(0),
        })
    }

    fn write_payload(&self, out: &mut Vec<u8>) {
        push_u16_le(out, self.first_col);
        push_u16_le(out, self.last_col);
        push_u16_le(out, self.width);
        push_u16_le(out, self.xf);
        push_u16_le(out, self.flags.bits());
        push_u16_le(out, self.unused);
    }
}

/// BoundSheet8 record (worksheet name, type, visibility, stream offset)
///
/// Record type: 0x0085
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundSheet {
    /// Stream position of the sheet's BOF record
    pub position: u32,
    pub visibility: u8,
    pub sheet_type: u8,
    pub name: String,
    /// `ShortXLUnicodeString` bytes exactly as read or generated
    name_bytes: Vec<u8>,
}

impl BoundSheet {
    pub fn new(name: &str) -> Self {
        let units: Vec<u16> = name.encode_utf16().take(31).collect();
        let wide = units.iter().any(|&u| u > 0xFF);
        let mut name_bytes = vec![units.len() as u8, u8::from(wide)];
        for unit in &units {
            if wide {
                push_u16_le(&mut name_bytes, *unit);
            } else {
                name_bytes.push(*unit as u8);
            }
        }
        BoundSheet {
            position: 0,
            visibility: 0,
            sheet_type: 0,
            name: String::from_utf16_lossy(&units),
            name_bytes,
        }
    }
}

impl BiffRecord for BoundSheet {
    const OPCODE: u16 = consts::BOUNDSHEET;

    fn parse(data: &[u8]) -> XlsResult<Self> {
        require_len(Self::OPCODE, data, 8)?;
        let name_bytes = data[6..].to_vec();
        let cch = name_bytes[0] as usize;
        let wide = name_bytes[1] & 0x01 != 0;
        let chars = &name_bytes[2..];
        let name = if wide {
            let units = binary::utf16le_units(&chars[..(cch * 2).min(chars.len())]);
            String::from_utf16_lossy(&units)
        } else {
            chars.iter().take(cch).map(|&b| char::from(b)).collect()
        };
        Ok(BoundSheet {
            position: binary::read_u32_le(data, 0)?,
            visibility: data[4],
            sheet_type: data[5],
            name,
            name_bytes,
        })
    }

    fn write_payload(&self, out: &mut Vec<u8>) {
        push_u32_le(out, self.position);
        out.push(self.visibility);
        out.push(self.sheet_type);
        out.extend_from_slice(&self.name_bytes);
    }
}

/// Row/column range header shared by SHRFMLA (0x04BC) and ARRAY (0x0221).
///
/// Only the `RefU` header is interpreted; the formula bytes that follow are
/// kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefRange {
    pub opcode: u16,
    pub first_row: u32,
    pub last_row: u32,
    pub first_col: u16,
    pub last_col: u16,
    pub rest: Vec<u8>,
}

impl RefRange {
    pub fn parse(opcode: u16, data: &[u8]) -> XlsResult<Self> {
        require_len(opcode, data, 6)?;
        Ok(RefRange {
            opcode,
            first_row: binary::read_u16_le(data, 0)? as u32,
            last_row: binary::read_u16_le(data, 2)? as u32,
            first_col: data[4] as u16,
            last_col: data[5] as u16,
            rest: data[6..].to_vec(),
        })
    }

    pub fn write_payload(&self, out: &mut Vec<u8>) {
        push_u16_le(out, self.first_row as u16);
        push_u16_le(out, self.last_row as u16);
        out.push(self.first_col as u8);
        out.push(self.last_col as u8);
        out.extend_from_slice(&self.rest);
    }

    pub fn contains(&self, row: u32, col: u16) -> bool {
        (self.first_row..=self.last_row).contains(&row)
            && (self.first_col..=self.last_col).contains(&col)
    }
}

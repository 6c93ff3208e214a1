//! Row aggregate: ROW metadata plus the row's own cell collection.

use std::collections::BTreeMap;

use crate::xls::cell::CellId;
use crate::xls::records::{BiffRecord, RawRecord, RowFlags, RowRecord};

/// One worksheet row.
///
/// The row keeps its cells keyed by first column. The collection mirrors
/// the sheet's cell index for this row and is resynchronised by the
/// worksheet after every mutation touching the row.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    record: RowRecord,
    cells: BTreeMap<u16, CellId>,
}

impl Row {
    pub fn new(row: u32) -> Self {
        Row {
            record: RowRecord::new(row),
            cells: BTreeMap::new(),
        }
    }

    pub fn from_record(record: RowRecord) -> Self {
        Row {
            record,
            cells: BTreeMap::new(),
        }
    }

    #[inline]
    pub fn number(&self) -> u32 {
        self.record.row
    }

    pub(crate) fn set_number(&mut self, row: u32) {
        self.record.row = row;
    }

    /// Height in twips.
    #[inline]
    pub fn height(&self) -> u16 {
        self.record.height & 0x7FFF
    }

    pub fn set_height(&mut self, twips: u16) {
        self.record.height = twips & 0x7FFF;
        self.record.flags |= RowFlags::UNSYNCED;
    }

    #[inline]
    pub fn is_hidden(&self) -> bool {
        self.record.flags.contains(RowFlags::HIDDEN)
    }

    pub fn set_hidden(&mut self, hidden: bool) {
        self.record.flags.set(RowFlags::HIDDEN, hidden);
    }

    #[inline]
    pub fn is_collapsed(&self) -> bool {
        self.record.flags.contains(RowFlags::COLLAPSED)
    }

    pub fn set_collapsed(&mut self, collapsed: bool) {
        self.record.flags.set(RowFlags::COLLAPSED, collapsed);
    }

    #[inline]
    pub fn outline_level(&self) -> u8 {
        self.record.outline_level()
    }

    pub fn set_outline_level(&mut self, level: u8) {
        self.record.set_outline_level(level);
    }

    /// Explicit row format, if any.
    #[inline]
    pub fn xf(&self) -> Option<u16> {
        self.record.xf()
    }

    pub fn set_xf(&mut self, xf: Option<u16>) {
        self.record.set_xf(xf);
    }

    #[inline]
    pub fn metadata(&self) -> &RowRecord {
        &self.record
    }

    /// Cell ids in column order.
    pub fn cell_ids(&self) -> impl Iterator<Item = CellId> + '_ {
        self.cells.values().copied()
    }

    #[inline]
    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub(crate) fn set_cells(&mut self, cells: impl IntoIterator<Item = (u16, CellId)>) {
        self.cells = cells.into_iter().collect();
    }

    /// Render the ROW record with the used column span `first..last_exclusive`.
    pub fn render(&self, first_col: u16, last_col_exclusive: u16) -> RawRecord {
        let mut record = self.record;
        record.first_col = first_col;
        record.last_col = last_col_exclusive;
        record.render()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_flags() {
        let mut row = Row::new(4);
        assert_eq!(row.xf(), None);
        row.set_xf(Some(21));
        row.set_height(600);
        row.set_hidden(true);
        row.set_outline_level(2);
        assert_eq!(row.xf(), Some(21));
        assert_eq!(row.height(), 600);
        assert!(row.is_hidden());
        assert_eq!(row.outline_level(), 2);

        let raw = row.render(1, 5);
        let parsed = RowRecord::from_raw(&raw).unwrap();
        assert_eq!(parsed.row, 4);
        assert_eq!((parsed.first_col, parsed.last_col), (1, 5));
        assert_eq!(Row::from_record(parsed).xf(), Some(21));
    }
}

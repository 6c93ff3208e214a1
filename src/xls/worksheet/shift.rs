//! Row and column insert/delete with shift.
//!
//! Records are moved one at a time through the cell index, in the order
//! that keeps every target address free: highest first when opening a gap,
//! lowest first when closing one. Embedded ranges (`SHRFMLA`, `ARRAY`),
//! ROW aggregates, COLINFO ranges and shape anchors move with the cells;
//! references inside formulas are left to the [`ReferenceTracker`].

use super::Worksheet;
use crate::xls::cell::CellId;
use crate::xls::collab::{NoopReferenceTracker, ReferenceTracker};
use crate::xls::consts::{COLINFO, MAX_COLUMNS, MAX_ROWS, ROW};
use crate::xls::error::{XlsError, XlsResult};
use crate::xls::records::{CellBody, RefRange};

/// Position of `value` after `count` lines are inserted at `at`.
fn inserted(value: u32, at: u32, count: u32) -> u32 {
    if value >= at { value + count } else { value }
}

/// New bounds of an inclusive span after `count` lines are deleted at `at`;
/// `None` when the span lies inside the deleted band.
fn deleted(first: u32, last: u32, at: u32, count: u32) -> Option<(u32, u32)> {
    let end = at + count;
    if first >= at && last < end {
        return None;
    }
    let first = if first < at {
        first
    } else if first >= end {
        first - count
    } else {
        at
    };
    let last = if last < at {
        last
    } else if last >= end {
        last - count
    } else {
        at - 1
    };
    Some((first, last))
}

impl Worksheet {
    /// Insert `count` empty rows at `at`, shifting the rows below down.
    pub fn insert_rows(&mut self, at: u32, count: u32) -> XlsResult<()> {
        self.insert_rows_with(at, count, &mut NoopReferenceTracker)
    }

    /// Insert rows and tell `tracker` about the shift.
    ///
    /// Fails with `InvalidRecord`, leaving the sheet unchanged, when a
    /// shifted row would pass the last sheet row.
    pub fn insert_rows_with(&mut self, at: u32, count: u32, tracker: &mut dyn ReferenceTracker) -> XlsResult<()> {
        if at >= MAX_ROWS {
            return Err(XlsError::invalid(ROW, format!("row {at} is outside the sheet")));
        }
        if count == 0 {
            return Ok(());
        }
        let affected = self.cells.row_ids(at..=MAX_ROWS - 1);
        let last_used = affected
            .last()
            .and_then(|&id| self.cells.record(id))
            .map(|cell| cell.row())
            .into_iter()
            .chain(self.rows.range(at..).next_back().map(|(&row, _)| row))
            .max();
        if let Some(last) = last_used {
            if u64::from(last) + u64::from(count) >= u64::from(MAX_ROWS) {
                return Err(XlsError::invalid(
                    ROW,
                    format!("inserting {count} rows at {at} would push row {last} off the sheet"),
                ));
            }
        }

        for &id in affected.iter().rev() {
            self.move_by(id, i64::from(count), 0)?;
        }
        let moved: Vec<u32> = self.rows.range(at..).map(|(&row, _)| row).rev().collect();
        for row in moved {
            if let Some(mut aggregate) = self.rows.remove(&row) {
                aggregate.set_number(row + count);
                self.rows.insert(row + count, aggregate);
            }
        }
        self.for_each_range(|range| {
            range.first_row = inserted(range.first_row, at, count).min(MAX_ROWS - 1);
            range.last_row = inserted(range.last_row, at, count).min(MAX_ROWS - 1);
            true
        });
        if let Some(drawing) = self.drawing.as_mut() {
            drawing.shift_rows(at, i64::from(count));
        }
        self.sync_rows();
        tracker.rows_shifted(self.id, at, i64::from(count));
        Ok(())
    }

    /// Delete rows `at..at + count`, shifting the rows below up.
    pub fn delete_rows(&mut self, at: u32, count: u32) -> XlsResult<()> {
        self.delete_rows_with(at, count, &mut NoopReferenceTracker)
    }

    /// Delete rows and tell `tracker` about the shift.
    pub fn delete_rows_with(&mut self, at: u32, count: u32, tracker: &mut dyn ReferenceTracker) -> XlsResult<()> {
        if at >= MAX_ROWS {
            return Err(XlsError::invalid(ROW, format!("row {at} is outside the sheet")));
        }
        let count = count.min(MAX_ROWS - at);
        if count == 0 {
            return Ok(());
        }
        let end = at + count;

        for id in self.cells.row_ids(at..=end - 1) {
            self.cells.remove(id)?;
        }
        let dropped: Vec<u32> = self.rows.range(at..end).map(|(&row, _)| row).collect();
        for row in dropped {
            self.rows.remove(&row);
        }

        for id in self.cells.row_ids(end..=MAX_ROWS - 1) {
            self.move_by(id, -i64::from(count), 0)?;
        }
        let moved: Vec<u32> = self.rows.range(end..).map(|(&row, _)| row).collect();
        for row in moved {
            if let Some(mut aggregate) = self.rows.remove(&row) {
                aggregate.set_number(row - count);
                self.rows.insert(row - count, aggregate);
            }
        }
        self.for_each_range(|range| match deleted(range.first_row, range.last_row, at, count) {
            Some((first, last)) => {
                range.first_row = first;
                range.last_row = last;
                true
            },
            None => false,
        });
        if let Some(drawing) = self.drawing.as_mut() {
            drawing.shift_rows(at, -i64::from(count));
        }
        self.sync_rows();
        tracker.rows_shifted(self.id, at, -i64::from(count));
        Ok(())
    }

    /// Insert `count` empty columns at `at`, shifting the columns to the
    /// right. A run straddling `at` is split first.
    pub fn insert_columns(&mut self, at: u16, count: u16) -> XlsResult<()> {
        self.insert_columns_with(at, count, &mut NoopReferenceTracker)
    }

    /// Insert columns and tell `tracker` about the shift.
    ///
    /// Fails with `InvalidRecord`, leaving the sheet unchanged, when a
    /// shifted cell would pass the last sheet column.
    pub fn insert_columns_with(&mut self, at: u16, count: u16, tracker: &mut dyn ReferenceTracker) -> XlsResult<()> {
        if u32::from(at) >= MAX_COLUMNS {
            return Err(XlsError::invalid(COLINFO, format!("column {at} is outside the sheet")));
        }
        if count == 0 {
            return Ok(());
        }
        let (at32, count32) = (u32::from(at), u32::from(count));
        let affected = self.cells.col_ids(at32..=MAX_COLUMNS - 1);
        let last_used = affected
            .iter()
            .filter_map(|&id| self.cells.record(id))
            .map(|cell| u32::from(cell.last_col()))
            .max();
        if let Some(last) = last_used {
            if last + count32 >= MAX_COLUMNS {
                return Err(XlsError::invalid(
                    COLINFO,
                    format!("inserting {count} columns at {at} would push column {last} off the sheet"),
                ));
            }
        }

        self.split_runs_at(at)?;
        let mut ids = self.cells.col_ids(at32..=MAX_COLUMNS - 1);
        self.sort_by_col(&mut ids);
        for &id in ids.iter().rev() {
            self.move_by(id, 0, i64::from(count))?;
        }
        self.columns.insert_columns(at, count);
        self.for_each_range(|range| {
            range.first_col = inserted(u32::from(range.first_col), at32, count32).min(MAX_COLUMNS - 1) as u16;
            range.last_col = inserted(u32::from(range.last_col), at32, count32).min(MAX_COLUMNS - 1) as u16;
            true
        });
        if let Some(drawing) = self.drawing.as_mut() {
            drawing.shift_cols(at32, i64::from(count));
        }
        self.sync_rows();
        tracker.cols_shifted(self.id, at, i64::from(count));
        Ok(())
    }

    /// Delete columns `at..at + count`, shifting the columns to the right
    /// leftwards. Runs lose the deleted columns and keep the rest.
    pub fn delete_columns(&mut self, at: u16, count: u16) -> XlsResult<()> {
        self.delete_columns_with(at, count, &mut NoopReferenceTracker)
    }

    /// Delete columns and tell `tracker` about the shift.
    pub fn delete_columns_with(&mut self, at: u16, count: u16, tracker: &mut dyn ReferenceTracker) -> XlsResult<()> {
        if u32::from(at) >= MAX_COLUMNS {
            return Err(XlsError::invalid(COLINFO, format!("column {at} is outside the sheet")));
        }
        let count = count.min((MAX_COLUMNS - u32::from(at)) as u16);
        if count == 0 {
            return Ok(());
        }
        let (at32, count32) = (u32::from(at), u32::from(count));
        let end = at32 + count32;

        self.split_runs_at(at)?;
        if end < MAX_COLUMNS {
            self.split_runs_at(end as u16)?;
        }
        for id in self.cells.col_ids(at32..=end - 1) {
            self.cells.remove(id)?;
        }
        let mut ids = self.cells.col_ids(end..=MAX_COLUMNS - 1);
        self.sort_by_col(&mut ids);
        for &id in &ids {
            self.move_by(id, 0, -i64::from(count))?;
        }
        self.columns.delete_columns(at, count);
        self.for_each_range(|range| {
            match deleted(u32::from(range.first_col), u32::from(range.last_col), at32, count32) {
                Some((first, last)) => {
                    range.first_col = first as u16;
                    range.last_col = last as u16;
                    true
                },
                None => false,
            }
        });
        if let Some(drawing) = self.drawing.as_mut() {
            drawing.shift_cols(at32, -i64::from(count));
        }
        self.sync_rows();
        tracker.cols_shifted(self.id, at, -i64::from(count));
        Ok(())
    }

    /// Move a record by (rows, cols).
    fn move_by(&mut self, id: CellId, rows: i64, cols: i64) -> XlsResult<()> {
        let cell = self
            .cells
            .record(id)
            .ok_or_else(|| XlsError::not_found(format!("cell id {}", id.index())))?;
        let row = i64::from(cell.row()) + rows;
        let col = i64::from(cell.col()) + cols;
        let (Ok(row), Ok(col)) = (u32::try_from(row), u16::try_from(col)) else {
            return Err(XlsError::invalid(cell.opcode(), "shift moves a cell off the sheet"));
        };
        self.cells.move_cell(id, row, col)
    }

    /// Split every run that covers `col` without starting there.
    fn split_runs_at(&mut self, col: u16) -> XlsResult<()> {
        let straddling: Vec<u32> = self
            .cells
            .col_ids(u32::from(col)..=u32::from(col))
            .into_iter()
            .filter_map(|id| self.cells.record(id))
            .filter(|cell| cell.is_run() && cell.col() < col)
            .map(|cell| cell.row())
            .collect();
        for row in straddling {
            self.cells.split_run_at(row, col)?;
        }
        Ok(())
    }

    fn sort_by_col(&self, ids: &mut [CellId]) {
        ids.sort_by_key(|&id| {
            self.cells
                .record(id)
                .map_or((0, 0), |cell| (cell.col(), cell.row()))
        });
    }

    /// Apply `f` to every `SHRFMLA`/`ARRAY` range of the sheet; a range for
    /// which `f` returns false is dropped with its record.
    fn for_each_range(&mut self, mut f: impl FnMut(&mut RefRange) -> bool) {
        let ids: Vec<CellId> = self.cells.iter().map(|(id, _)| id).collect();
        for id in ids {
            let Some(cell) = self.cells.record_mut(id) else {
                continue;
            };
            if let CellBody::Formula { companions, .. } = cell.body_mut() {
                companions.retain_mut(|companion| companion.range_mut().is_none_or(&mut f));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::escher::ClientAnchor;
    use crate::xls::cell::{CellRecord, CellValue};
    use crate::xls::drawing::{DrawingCounters, NewShape};
    use crate::xls::records::{FormulaCached, FormulaCompanion, SheetId};
    use crate::xls::consts::SHRFMLA;

    #[derive(Default)]
    struct Recorder {
        rows: Vec<(u32, i64)>,
        cols: Vec<(u16, i64)>,
    }

    impl ReferenceTracker for Recorder {
        fn rows_shifted(&mut self, _sheet: SheetId, first_row: u32, delta: i64) {
            self.rows.push((first_row, delta));
        }

        fn cols_shifted(&mut self, _sheet: SheetId, first_col: u16, delta: i64) {
            self.cols.push((first_col, delta));
        }
    }

    fn sheet_with_rows(rows: &[(u32, f64)]) -> Worksheet {
        let mut sheet = Worksheet::new(SheetId(0), "S");
        for &(row, value) in rows {
            sheet.add_value(row, 0, CellValue::Number(value), 0).unwrap();
        }
        sheet
    }

    fn shared_formula(row: u32, col: u16, range: (u32, u32, u16, u16)) -> CellRecord {
        let companion = FormulaCompanion::SharedFormula(RefRange {
            opcode: SHRFMLA,
            first_row: range.0,
            last_row: range.1,
            first_col: range.2,
            last_col: range.3,
            rest: vec![0, 0, 1, 0, 0x1E],
        });
        CellRecord::new(
            row,
            col,
            0,
            CellBody::Formula {
                cached: FormulaCached::Number(0.0),
                options: 0x0008,
                chn: 0,
                tokens: vec![0x01, 0, 0, 0, 0],
                extra: Vec::new(),
                companions: vec![companion],
            },
        )
    }

    fn range_of(sheet: &Worksheet, row: u32, col: u16) -> Option<(u32, u32, u16, u16)> {
        let id = sheet.cells().find(row, col)?;
        match sheet.cells().record(id)?.body() {
            CellBody::Formula { companions, .. } => companions.iter().find_map(|c| match c {
                FormulaCompanion::SharedFormula(r) => Some((r.first_row, r.last_row, r.first_col, r.last_col)),
                _ => None,
            }),
            _ => None,
        }
    }

    #[test]
    fn test_insert_row_moves_rows_below() {
        let mut sheet = sheet_with_rows(&[(0, 1.0), (5, 2.0), (10, 3.0)]);
        let mut tracker = Recorder::default();
        sheet.insert_rows_with(5, 1, &mut tracker).unwrap();

        assert_eq!(sheet.cell_value(0, 0).unwrap(), CellValue::Number(1.0));
        assert_eq!(sheet.cell_value(6, 0).unwrap(), CellValue::Number(2.0));
        assert_eq!(sheet.cell_value(11, 0).unwrap(), CellValue::Number(3.0));
        assert!(sheet.cell_value(5, 0).unwrap_err().is_not_found());
        assert!(sheet.row(5).is_none());
        assert_eq!(sheet.row(6).map(|r| r.number()), Some(6));
        assert_eq!(sheet.dimensions().last_row, 12);
        assert_eq!(tracker.rows, vec![(5, 1)]);
        sheet.cells().check_consistency().unwrap();
    }

    #[test]
    fn test_delete_rows_closes_gap() {
        let mut sheet = sheet_with_rows(&[(0, 1.0), (3, 2.0), (4, 3.0), (9, 4.0)]);
        sheet.delete_rows(3, 2).unwrap();
        assert_eq!(sheet.cell_value(7, 0).unwrap(), CellValue::Number(4.0));
        assert!(sheet.cell_value(3, 0).is_err());
        assert_eq!(sheet.cells().len(), 2);
        assert_eq!(sheet.dimensions().last_row, 8);
        assert!(sheet.row(9).is_none());
        sheet.cells().check_consistency().unwrap();
    }

    #[test]
    fn test_insert_rows_past_last_row_is_rejected() {
        let mut sheet = sheet_with_rows(&[(0, 1.0), (MAX_ROWS - 1, 2.0)]);
        let mut tracker = Recorder::default();
        let err = sheet.insert_rows_with(0, 1, &mut tracker).unwrap_err();
        assert!(matches!(err, XlsError::InvalidRecord { .. }));
        assert_eq!(sheet.cell_value(0, 0).unwrap(), CellValue::Number(1.0));
        assert_eq!(sheet.cell_value(MAX_ROWS - 1, 0).unwrap(), CellValue::Number(2.0));
        assert!(tracker.rows.is_empty());
        assert!(sheet.insert_rows(MAX_ROWS, 1).is_err());

        let mut sheet = sheet_with_rows(&[(0, 1.0), (MAX_ROWS - 2, 2.0)]);
        sheet.insert_rows(0, 1).unwrap();
        assert_eq!(sheet.cell_value(1, 0).unwrap(), CellValue::Number(1.0));
        assert_eq!(sheet.cell_value(MAX_ROWS - 1, 0).unwrap(), CellValue::Number(2.0));
        sheet.cells().check_consistency().unwrap();
    }

    #[test]
    fn test_insert_columns_past_last_column_is_rejected() {
        let last = (MAX_COLUMNS - 1) as u16;
        let mut sheet = Worksheet::new(SheetId(0), "S");
        sheet.add_value(0, 0, CellValue::Number(1.0), 0).unwrap();
        sheet.add_value(0, last, CellValue::Number(2.0), 0).unwrap();
        let err = sheet.insert_columns(0, 1).unwrap_err();
        assert!(matches!(err, XlsError::InvalidRecord { .. }));
        assert_eq!(sheet.cell_value(0, 0).unwrap(), CellValue::Number(1.0));
        assert_eq!(sheet.cell_value(0, last).unwrap(), CellValue::Number(2.0));

        sheet.remove_cell(0, last).unwrap();
        sheet.add_value(0, last - 1, CellValue::Number(3.0), 0).unwrap();
        sheet.insert_columns(0, 1).unwrap();
        assert_eq!(sheet.cell_value(0, 1).unwrap(), CellValue::Number(1.0));
        assert_eq!(sheet.cell_value(0, last).unwrap(), CellValue::Number(3.0));
        sheet.cells().check_consistency().unwrap();
    }

    #[test]
    fn test_shared_formula_range_follows_rows() {
        let mut sheet = Worksheet::new(SheetId(0), "S");
        sheet.add_cell(shared_formula(2, 1, (2, 6, 1, 1))).unwrap();
        sheet.insert_rows(4, 3).unwrap();
        assert_eq!(range_of(&sheet, 2, 1), Some((2, 9, 1, 1)));
        sheet.delete_rows(0, 1).unwrap();
        assert_eq!(range_of(&sheet, 1, 1), Some((1, 8, 1, 1)));
    }

    #[test]
    fn test_insert_column_splits_run() {
        let mut sheet = Worksheet::new(SheetId(0), "S");
        let run = CellRecord::number_run(3, 2, &[(7, 1.0), (8, 2.0), (9, 3.0), (10, 4.0)]).unwrap();
        sheet.add_cell(run).unwrap();
        sheet.add_column_metadata(2, 5, 3000, 0).unwrap();
        let mut tracker = Recorder::default();
        sheet.insert_columns_with(4, 2, &mut tracker).unwrap();

        assert_eq!(sheet.cell_value(3, 3).unwrap(), CellValue::Number(2.0));
        assert!(sheet.cell_value(3, 4).is_err());
        assert_eq!(sheet.cell_value(3, 6).unwrap(), CellValue::Number(3.0));
        assert_eq!(sheet.cell_value(3, 7).unwrap(), CellValue::Number(4.0));
        let runs: Vec<(u16, u16)> = sheet
            .row_cells(3)
            .unwrap()
            .iter()
            .map(|c| (c.col(), c.last_col()))
            .collect();
        assert_eq!(runs, vec![(2, 3), (6, 7)]);
        assert_eq!(sheet.column_metadata(7).map(|c| c.width), Some(3000));
        assert!(sheet.column_metadata(4).is_none());
        assert_eq!(tracker.cols, vec![(4, 2)]);
        sheet.cells().check_consistency().unwrap();
    }

    #[test]
    fn test_delete_column_inside_run() {
        let mut sheet = Worksheet::new(SheetId(0), "S");
        let run = CellRecord::number_run(3, 2, &[(7, 5.0); 6]).unwrap();
        sheet.add_cell(run).unwrap();
        sheet.add_value(3, 9, CellValue::Bool(true), 0).unwrap();
        sheet.delete_columns(4, 1).unwrap();

        for col in 2..=6 {
            assert_eq!(sheet.cell_value(3, col).unwrap(), CellValue::Number(5.0));
        }
        assert_eq!(sheet.cell_value(3, 8).unwrap(), CellValue::Bool(true));
        assert!(sheet.cell_value(3, 7).is_err());
        sheet.cells().check_consistency().unwrap();
    }

    #[test]
    fn test_shift_moves_shape_anchor() {
        let mut counters = DrawingCounters::new();
        let mut sheet = Worksheet::new(SheetId(0), "S");
        let spid = sheet
            .add_shape(&mut counters, &NewShape::rectangle(ClientAnchor::cells(2, 2, 4, 4)))
            .unwrap();
        sheet.insert_rows(0, 2).unwrap();
        sheet.delete_columns(0, 1).unwrap();
        let anchor = sheet.drawing().and_then(|d| d.shape(spid)).and_then(|s| s.anchor()).unwrap();
        assert_eq!(anchor.top_left(), (1, 4));
        assert_eq!(anchor.bottom_right(), (3, 6));
    }

    #[test]
    fn test_span_helpers() {
        assert_eq!(inserted(4, 5, 2), 4);
        assert_eq!(inserted(5, 5, 2), 7);
        assert_eq!(deleted(2, 9, 4, 2), Some((2, 7)));
        assert_eq!(deleted(4, 5, 4, 2), None);
        assert_eq!(deleted(5, 9, 4, 2), Some((4, 7)));
        assert_eq!(deleted(0, 4, 4, 2), Some((0, 3)));
    }
}

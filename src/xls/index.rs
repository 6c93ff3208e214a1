//! Sheet cell index: two ordered views over one arena of cell records.
//!
//! - `by_row` is keyed by (row, column) and holds one entry per record; a
//!   multi-cell run is keyed at its first column.
//! - `by_col` is keyed by (column, row) and holds one entry per column a
//!   record covers, so a column query finds runs without scanning rows.
//!
//! Both maps store [`CellId`]s into the same arena, so a record is stored
//! once and both views always name the same identities. A record's address
//! is part of both keys; moving a record is remove-then-reinsert through
//! [`CellIndex::move_cell`].

use std::collections::{BTreeMap, BTreeSet};
use std::ops::RangeInclusive;

use crate::xls::cell::{CellId, CellRecord};
use crate::xls::error::{XlsError, XlsResult};
use crate::xls::utils::{cell_reference, check_address};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct RowKey {
    row: u32,
    col: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct ColKey {
    col: u16,
    row: u32,
}

/// Observed bounding box of the occupied cells (inclusive).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bounds {
    pub first_row: u32,
    pub last_row: u32,
    pub first_col: u16,
    pub last_col: u16,
}

/// Cell index of one worksheet.
#[derive(Debug, Clone, Default)]
pub struct CellIndex {
    arena: Vec<Option<CellRecord>>,
    free: Vec<u32>,
    by_row: BTreeMap<RowKey, CellId>,
    by_col: BTreeMap<ColKey, CellId>,
}

impl CellIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records (a run counts once).
    #[inline]
    pub fn len(&self) -> usize {
        self.by_row.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.by_row.is_empty()
    }

    #[inline]
    pub fn record(&self, id: CellId) -> Option<&CellRecord> {
        self.arena.get(id.index()).and_then(Option::as_ref)
    }

    #[inline]
    pub(crate) fn record_mut(&mut self, id: CellId) -> Option<&mut CellRecord> {
        self.arena.get_mut(id.index()).and_then(Option::as_mut)
    }

    fn live(&self, id: CellId) -> XlsResult<&CellRecord> {
        self.record(id)
            .ok_or_else(|| XlsError::not_found(format!("cell id {}", id.0)))
    }

    /// Record covering (row, col) without touching its cursor.
    pub fn find(&self, row: u32, col: u16) -> Option<CellId> {
        let (key, &id) = self.by_row.range(..=RowKey { row, col }).next_back()?;
        if key.row != row {
            return None;
        }
        self.record(id).filter(|cell| cell.covers(col)).map(|_| id)
    }

    /// Point lookup. A run is repositioned to `col` before it is returned.
    pub fn get(&mut self, row: u32, col: u16) -> XlsResult<&CellRecord> {
        let id = self
            .find(row, col)
            .ok_or_else(|| XlsError::not_found(format!("cell {}", cell_reference(row, col))))?;
        let cell = self
            .record_mut(id)
            .ok_or_else(|| XlsError::not_found(format!("cell id {}", id.0)))?;
        cell.seek(col);
        Ok(&*cell)
    }

    /// Records of one row in increasing column order.
    pub fn range_by_row(&self, row: u32) -> XlsResult<Vec<&CellRecord>> {
        let cells: Vec<&CellRecord> = self
            .row_ids(row..=row)
            .into_iter()
            .filter_map(|id| self.record(id))
            .collect();
        if cells.is_empty() {
            return Err(XlsError::not_found(format!("row {}", row + 1)));
        }
        Ok(cells)
    }

    /// Records covering one column in increasing row order. Each run is
    /// repositioned to `col`.
    pub fn range_by_col(&mut self, col: u16) -> XlsResult<Vec<&CellRecord>> {
        let ids = self.col_ids(u32::from(col)..=u32::from(col));
        if ids.is_empty() {
            return Err(XlsError::not_found(format!(
                "column {}",
                crate::xls::utils::column_name(col)
            )));
        }
        for &id in &ids {
            if let Some(cell) = self.record_mut(id) {
                cell.seek(col);
            }
        }
        Ok(ids.into_iter().filter_map(|id| self.record(id)).collect())
    }

    /// Ids of records whose row is in `rows`, in row-major order.
    pub fn row_ids(&self, rows: RangeInclusive<u32>) -> Vec<CellId> {
        let (first, last) = rows.into_inner();
        if first > last {
            return Vec::new();
        }
        self.by_row
            .range(RowKey { row: first, col: 0 }..=RowKey { row: last, col: u16::MAX })
            .map(|(_, &id)| id)
            .collect()
    }

    /// Ids of records covering any column in `cols`, each once, in
    /// column-major order of their first covered column in the range.
    pub fn col_ids(&self, cols: RangeInclusive<u32>) -> Vec<CellId> {
        let (first, last) = cols.into_inner();
        if first > last || first > u32::from(u16::MAX) {
            return Vec::new();
        }
        let last = last.min(u32::from(u16::MAX)) as u16;
        let mut seen = BTreeSet::new();
        self.by_col
            .range(ColKey { col: first as u16, row: 0 }..=ColKey { col: last, row: u32::MAX })
            .filter(|(_, id)| seen.insert(**id))
            .map(|(_, &id)| id)
            .collect()
    }

    /// All records in row-major order.
    pub fn iter(&self) -> impl Iterator<Item = (CellId, &CellRecord)> {
        self.by_row
            .values()
            .filter_map(|&id| self.record(id).map(|cell| (id, cell)))
    }

    /// Whether `cell` could be filed: inside the sheet, with every covered
    /// column free.
    pub fn check_vacant(&self, cell: &CellRecord) -> XlsResult<()> {
        let last = u32::from(cell.col()) + u32::from(cell.width()).max(1) - 1;
        check_address(cell.opcode(), cell.row(), last)?;
        if cell.width() == 0 {
            return Err(XlsError::invalid(cell.opcode(), "run without columns"));
        }
        for col in cell.col()..=cell.last_col() {
            if self.by_col.contains_key(&ColKey { col, row: cell.row() }) {
                return Err(XlsError::invalid(
                    cell.opcode(),
                    format!("{} is already occupied", cell_reference(cell.row(), col)),
                ));
            }
        }
        Ok(())
    }

    /// File a record under its current address.
    ///
    /// Fails with `InvalidRecord`, leaving the index unchanged, when the
    /// address is outside the sheet or any covered column is taken.
    pub fn insert(&mut self, cell: CellRecord) -> XlsResult<CellId> {
        self.check_vacant(&cell)?;

        let id = match self.free.pop() {
            Some(slot) => {
                self.arena[slot as usize] = Some(cell);
                CellId(slot)
            },
            None => {
                self.arena.push(Some(cell));
                CellId((self.arena.len() - 1) as u32)
            },
        };
        self.link(id);
        Ok(id)
    }

    fn link(&mut self, id: CellId) {
        let Some(cell) = self.record(id) else {
            return;
        };
        let (row, first, last) = (cell.row(), cell.col(), cell.last_col());
        self.by_row.insert(RowKey { row, col: first }, id);
        for col in first..=last {
            self.by_col.insert(ColKey { col, row }, id);
        }
    }

    fn unlink(&mut self, id: CellId) {
        let Some(cell) = self.record(id) else {
            return;
        };
        let (row, first, last) = (cell.row(), cell.col(), cell.last_col());
        self.by_row.remove(&RowKey { row, col: first });
        for col in first..=last {
            self.by_col.remove(&ColKey { col, row });
        }
    }

    /// Remove a whole record from both views.
    pub fn remove(&mut self, id: CellId) -> XlsResult<CellRecord> {
        self.live(id)?;
        self.unlink(id);
        self.free.push(id.0);
        self.arena[id.index()]
            .take()
            .ok_or_else(|| XlsError::not_found(format!("cell id {}", id.0)))
    }

    /// Remove the cell at (row, col).
    ///
    /// For a multi-cell run only column `col` goes: the run is truncated
    /// from the matching end, or split into the parts left and right of
    /// `col`. A part that keeps two or more columns stays a run; a part
    /// of one column becomes a plain record with that column's value and
    /// format. Returns the removed cell as a single-column record.
    pub fn remove_at(&mut self, row: u32, col: u16) -> XlsResult<CellRecord> {
        let id = self
            .find(row, col)
            .ok_or_else(|| XlsError::not_found(format!("cell {}", cell_reference(row, col))))?;
        let run = self.live(id)?;
        if !run.is_run() {
            return self.remove(id);
        }

        let removed = run.slice(col, col);
        let left = if col > run.col() { run.slice(run.col(), col - 1) } else { None };
        let right = if col < run.last_col() { run.slice(col + 1, run.last_col()) } else { None };
        self.remove(id)?;
        for part in left.into_iter().chain(right) {
            self.insert(part)?;
        }
        removed.ok_or_else(|| XlsError::not_found(format!("cell {}", cell_reference(row, col))))
    }

    /// Split the run covering (row, col) so that a new record starts at
    /// `col`. No-op for plain records and when `col` is the run's first
    /// column.
    pub fn split_run_at(&mut self, row: u32, col: u16) -> XlsResult<()> {
        let Some(id) = self.find(row, col) else {
            return Ok(());
        };
        let run = self.live(id)?;
        if !run.is_run() || run.col() == col {
            return Ok(());
        }
        let left = run.slice(run.col(), col - 1);
        let right = run.slice(col, run.last_col());
        self.remove(id)?;
        for part in left.into_iter().chain(right) {
            self.insert(part)?;
        }
        Ok(())
    }

    /// Move a record to a new (row, first column), keeping its id.
    ///
    /// The target columns must be free of other records.
    pub fn move_cell(&mut self, id: CellId, row: u32, col: u16) -> XlsResult<()> {
        let cell = self.live(id)?;
        let opcode = cell.opcode();
        let width = u32::from(cell.width());
        let last = u32::from(col) + width - 1;
        check_address(opcode, row, last)?;
        for c in u32::from(col)..=last {
            let key = ColKey { col: c as u16, row };
            if self.by_col.get(&key).is_some_and(|&other| other != id) {
                return Err(XlsError::invalid(
                    opcode,
                    format!("{} is already occupied", cell_reference(row, c as u16)),
                ));
            }
        }

        self.unlink(id);
        if let Some(cell) = self.record_mut(id) {
            cell.set_address(row, col);
        }
        self.link(id);
        Ok(())
    }

    /// Bounding box of the occupied cells, `None` when empty.
    pub fn bounds(&self) -> Option<Bounds> {
        let first_row = self.by_row.keys().next()?.row;
        let last_row = self.by_row.keys().next_back()?.row;
        let first_col = self.by_col.keys().next()?.col;
        let last_col = self.by_col.keys().next_back()?.col;
        Some(Bounds {
            first_row,
            last_row,
            first_col,
            last_col,
        })
    }

    /// Verify that both views name the same records under their current
    /// addresses.
    pub fn check_consistency(&self) -> Result<(), String> {
        let row_ids: BTreeSet<CellId> = self.by_row.values().copied().collect();
        let col_ids: BTreeSet<CellId> = self.by_col.values().copied().collect();
        if row_ids != col_ids {
            return Err(format!(
                "row view has {} records, column view {}",
                row_ids.len(),
                col_ids.len()
            ));
        }
        if row_ids.len() != self.by_row.len() {
            return Err("a record is filed twice in the row view".to_string());
        }

        let mut covered = 0usize;
        for (key, &id) in &self.by_row {
            let cell = self.record(id).ok_or(format!("dangling id {}", id.0))?;
            if (cell.row(), cell.col()) != (key.row, key.col) {
                return Err(format!(
                    "record at {} is filed under {}",
                    cell_reference(cell.row(), cell.col()),
                    cell_reference(key.row, key.col)
                ));
            }
            covered += cell.width() as usize;
        }
        for (key, &id) in &self.by_col {
            let cell = self.record(id).ok_or(format!("dangling id {}", id.0))?;
            if cell.row() != key.row || !cell.covers(key.col) {
                return Err(format!(
                    "column entry {} does not match its record",
                    cell_reference(key.row, key.col)
                ));
            }
        }
        if covered != self.by_col.len() {
            return Err(format!(
                "records cover {covered} columns, column view has {} entries",
                self.by_col.len()
            ));
        }
        Ok(())
    }
}

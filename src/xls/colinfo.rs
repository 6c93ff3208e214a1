//! Column metadata ranges (`COLINFO`).
//!
//! Ranges are kept sorted by first column and never overlap: adding a range
//! truncates or splits whatever it covers, and column insert/delete shift,
//! split and truncate ranges so each column is claimed at most once.

use std::collections::BTreeMap;

use crate::xls::consts::{COLINFO, MAX_COLUMNS};
use crate::xls::error::{XlsError, XlsResult};
use crate::xls::records::{BiffRecord, ColInfo, RawRecord};

/// Non-overlapping column ranges keyed by first column.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnInfoTable {
    ranges: BTreeMap<u16, ColInfo>,
}

impl ColumnInfoTable {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ColInfo> {
        self.ranges.values()
    }

    /// Range containing `col`.
    pub fn get(&self, col: u16) -> Option<&ColInfo> {
        self.ranges
            .range(..=col)
            .next_back()
            .map(|(_, info)| info)
            .filter(|info| info.contains(col))
    }

    /// Add a range, truncating or splitting the ranges it overlaps.
    pub fn add(&mut self, info: ColInfo) -> XlsResult<()> {
        if info.first_col > info.last_col || u32::from(info.last_col) >= MAX_COLUMNS {
            return Err(XlsError::invalid(
                COLINFO,
                format!("column range {}..={} is invalid", info.first_col, info.last_col),
            ));
        }
        self.clear_range(info.first_col, info.last_col);
        self.ranges.insert(info.first_col, info);
        Ok(())
    }

    /// Set width and format for `first..=last`.
    pub fn set(&mut self, first: u16, last: u16, width: u16, xf: u16) -> XlsResult<()> {
        self.add(ColInfo::new(first, last, width, xf))
    }

    /// Remove every claim on `first..=last`, keeping the parts outside it.
    fn clear_range(&mut self, first: u16, last: u16) {
        let overlapping: Vec<ColInfo> = self
            .ranges
            .values()
            .filter(|info| info.first_col <= last && info.last_col >= first)
            .copied()
            .collect();
        for info in overlapping {
            self.ranges.remove(&info.first_col);
            if info.first_col < first {
                self.ranges
                    .insert(info.first_col, info.with_bounds(info.first_col, first - 1));
            }
            if info.last_col > last {
                self.ranges.insert(last + 1, info.with_bounds(last + 1, info.last_col));
            }
        }
    }

    /// Shift for `count` columns inserted at `at`.
    ///
    /// A range straddling `at` is split into `[first, at-1]` and
    /// `[at+count, last+count]`. Columns pushed past the last sheet column
    /// are dropped.
    pub fn insert_columns(&mut self, at: u16, count: u16) {
        let max = (MAX_COLUMNS - 1) as u32;
        let old = std::mem::take(&mut self.ranges);
        for info in old.into_values() {
            let parts = if info.last_col < at {
                vec![(u32::from(info.first_col), u32::from(info.last_col))]
            } else if info.first_col >= at {
                vec![(
                    u32::from(info.first_col) + u32::from(count),
                    u32::from(info.last_col) + u32::from(count),
                )]
            } else {
                vec![
                    (u32::from(info.first_col), u32::from(at) - 1),
                    (u32::from(at) + u32::from(count), u32::from(info.last_col) + u32::from(count)),
                ]
            };
            for (first, last) in parts {
                if first > max {
                    continue;
                }
                let last = last.min(max);
                self.ranges
                    .insert(first as u16, info.with_bounds(first as u16, last as u16));
            }
        }
    }

    /// Shift for `count` columns deleted at `at`: ranges inside the block
    /// vanish, overlapping ranges are truncated, later ranges move left.
    pub fn delete_columns(&mut self, at: u16, count: u16) {
        let (at, count) = (u32::from(at), u32::from(count));
        let end = at + count;
        let old = std::mem::take(&mut self.ranges);
        for info in old.into_values() {
            let (first, last) = (u32::from(info.first_col), u32::from(info.last_col));
            let before = if first < at { last.min(at - 1) + 1 - first } else { 0 };
            let after_first = first.max(end);
            let after = if last >= after_first { last + 1 - after_first } else { 0 };
            if before + after == 0 {
                continue;
            }
            let new_first = if before > 0 { first } else { after_first - count };
            let new_last = new_first + before + after - 1;
            self.ranges.insert(
                new_first as u16,
                info.with_bounds(new_first as u16, new_last as u16),
            );
        }
    }

    /// Render one `COLINFO` record per range.
    pub fn render(&self) -> Vec<RawRecord> {
        self.ranges.values().map(BiffRecord::render).collect()
    }
}

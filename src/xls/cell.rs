//! Cell records as filed in the sheet cell index.

use crate::xls::records::cells::{ParsedCell, f64_to_rk, render_cell, rk_to_f64};
use crate::xls::records::{BoolErr, CellBody, FormulaCached, RawRecord};
use crate::xls::strings::XlUnicodeString;

/// Stable handle of a cell record inside its sheet's index arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellId(pub(crate) u32);

impl CellId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Logical value of one cell address.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Blank,
    Number(f64),
    /// Index into the workbook's shared string table
    SharedString(u32),
    /// Inline text
    Text(String),
    Bool(bool),
    /// BIFF error code (0x07 = #DIV/0!, ...)
    Error(u8),
    /// Cached result of a formula
    Formula(FormulaCached),
}

impl CellValue {
    /// Record body for a single cell holding this value.
    ///
    /// Numbers use the compact RK form when the conversion is lossless.
    pub fn to_body(&self) -> CellBody {
        match self {
            CellValue::Blank => CellBody::Blank,
            CellValue::Number(n) => f64_to_rk(*n).map_or(CellBody::Number(*n), CellBody::Rk),
            CellValue::SharedString(index) => CellBody::LabelSst(*index),
            CellValue::Text(text) => CellBody::Label(XlUnicodeString::new(text)),
            CellValue::Bool(b) => CellBody::BoolErr(BoolErr::Bool(*b)),
            CellValue::Error(e) => CellBody::BoolErr(BoolErr::Error(*e)),
            CellValue::Formula(cached) => CellBody::Formula {
                cached: *cached,
                options: 0,
                chn: 0,
                tokens: Vec::new(),
                extra: Vec::new(),
                companions: Vec::new(),
            },
        }
    }
}

/// A cell record: address, format and opcode-specific body.
///
/// A multi-cell run (`MULRK`, `MULBLANK`) covers columns
/// `col..=last_col()` of one row. Reads of its value and format go through
/// a cursor that the index moves to the addressed column on every lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct CellRecord {
    row: u32,
    col: u16,
    xf: u16,
    body: CellBody,
    cursor: u16,
}

impl CellRecord {
    pub fn new(row: u32, col: u16, xf: u16, body: CellBody) -> Self {
        CellRecord {
            row,
            col,
            xf,
            body,
            cursor: 0,
        }
    }

    pub fn from_value(row: u32, col: u16, value: &CellValue, xf: u16) -> Self {
        Self::new(row, col, xf, value.to_body())
    }

    pub(crate) fn from_parsed(parsed: ParsedCell) -> Self {
        Self::new(parsed.row, parsed.col, parsed.xf, parsed.body)
    }

    /// Run over `first..` with one (xf, value) per column; numbers that are
    /// not RK-representable cannot live in a run and yield `None`.
    pub fn number_run(row: u32, first: u16, entries: &[(u16, f64)]) -> Option<Self> {
        let rks = entries
            .iter()
            .map(|&(xf, n)| f64_to_rk(n).map(|rk| (xf, rk)))
            .collect::<Option<Vec<_>>>()?;
        let xf = rks.first()?.0;
        Some(Self::new(row, first, xf, CellBody::MulRk(rks)))
    }

    /// Blank run over `first..` with one XF per column.
    pub fn blank_run(row: u32, first: u16, xfs: Vec<u16>) -> Option<Self> {
        let xf = *xfs.first()?;
        Some(Self::new(row, first, xf, CellBody::MulBlank(xfs)))
    }

    #[inline]
    pub fn row(&self) -> u32 {
        self.row
    }

    /// First column covered.
    #[inline]
    pub fn col(&self) -> u16 {
        self.col
    }

    #[inline]
    pub fn last_col(&self) -> u16 {
        self.col.saturating_add(self.body.width().saturating_sub(1))
    }

    #[inline]
    pub fn width(&self) -> u16 {
        self.body.width()
    }

    #[inline]
    pub fn is_run(&self) -> bool {
        self.body.is_run()
    }

    #[inline]
    pub fn covers(&self, col: u16) -> bool {
        (self.col..=self.last_col()).contains(&col)
    }

    #[inline]
    pub fn opcode(&self) -> u16 {
        self.body.opcode()
    }

    #[inline]
    pub fn body(&self) -> &CellBody {
        &self.body
    }

    pub(crate) fn body_mut(&mut self) -> &mut CellBody {
        &mut self.body
    }

    pub(crate) fn set_address(&mut self, row: u32, col: u16) {
        self.row = row;
        self.col = col;
        self.cursor = 0;
    }

    /// Point the run cursor at `col`. Returns false when `col` is outside
    /// the record.
    pub(crate) fn seek(&mut self, col: u16) -> bool {
        if !self.covers(col) {
            return false;
        }
        self.cursor = col - self.col;
        true
    }

    /// Column the cursor addresses.
    #[inline]
    pub fn current_col(&self) -> u16 {
        self.col + self.cursor
    }

    /// Format at the cursor.
    pub fn xf(&self) -> u16 {
        self.xf_at(self.current_col()).unwrap_or(self.xf)
    }

    /// Value at the cursor.
    pub fn value(&self) -> CellValue {
        self.value_at(self.current_col())
            .unwrap_or(CellValue::Blank)
    }

    /// Format of column `col`, if covered.
    pub fn xf_at(&self, col: u16) -> Option<u16> {
        if !self.covers(col) {
            return None;
        }
        let i = (col - self.col) as usize;
        Some(match &self.body {
            CellBody::MulRk(entries) => entries[i].0,
            CellBody::MulBlank(xfs) => xfs[i],
            _ => self.xf,
        })
    }

    /// Value of column `col`, if covered.
    pub fn value_at(&self, col: u16) -> Option<CellValue> {
        if !self.covers(col) {
            return None;
        }
        let i = (col - self.col) as usize;
        Some(match &self.body {
            CellBody::Blank | CellBody::MulBlank(_) => CellValue::Blank,
            CellBody::Number(n) => CellValue::Number(*n),
            CellBody::Rk(rk) => CellValue::Number(rk_to_f64(*rk)),
            CellBody::MulRk(entries) => CellValue::Number(rk_to_f64(entries[i].1)),
            CellBody::LabelSst(index) => CellValue::SharedString(*index),
            CellBody::Label(s) => CellValue::Text(s.text()),
            CellBody::BoolErr(BoolErr::Bool(b)) => CellValue::Bool(*b),
            CellBody::BoolErr(BoolErr::Error(e)) => CellValue::Error(*e),
            CellBody::Formula { cached, .. } => CellValue::Formula(*cached),
        })
    }

    /// The part of this record covering `first..=last`, clipped to the
    /// record. One column yields a plain `RK`/`BLANK` cell; more yield a run.
    pub fn slice(&self, first: u16, last: u16) -> Option<CellRecord> {
        let first = first.max(self.col);
        let last = last.min(self.last_col());
        if first > last {
            return None;
        }
        if !self.is_run() {
            return Some(self.clone());
        }
        let from = (first - self.col) as usize;
        let to = (last - self.col) as usize;
        let body = match &self.body {
            CellBody::MulRk(entries) if from == to => CellBody::Rk(entries[from].1),
            CellBody::MulRk(entries) => CellBody::MulRk(entries[from..=to].to_vec()),
            CellBody::MulBlank(_) if from == to => CellBody::Blank,
            CellBody::MulBlank(xfs) => CellBody::MulBlank(xfs[from..=to].to_vec()),
            other => other.clone(),
        };
        let xf = self.xf_at(first).unwrap_or(self.xf);
        Some(CellRecord::new(self.row, first, xf, body))
    }

    /// Render the cell record (formula companions are not included).
    pub fn render(&self) -> RawRecord {
        render_cell(self.row, self.col, self.xf, &self.body)
    }

    /// Render the cell record followed by its formula companions.
    pub fn render_all(&self) -> Vec<RawRecord> {
        let mut out = vec![self.render()];
        if let CellBody::Formula { companions, .. } = &self.body {
            out.extend(companions.iter().map(|c| c.render()));
        }
        out
    }
}

//! Worksheet aggregate: record stream, cell index, rows, column metadata
//! and drawing of one sheet substream.

mod shift;

use std::collections::BTreeMap;

use crate::escher::ClientAnchor;
use crate::xls::cell::{CellId, CellRecord, CellValue};
use crate::xls::colinfo::ColumnInfoTable;
use crate::xls::collab::{FormulaContext, FormulaEngine, FormulaValue};
use crate::xls::consts::{
    BOF, BOF_WORKSHEET, COLINFO, DBCELL, DIMENSIONS, EOF, FORMULA, INDEX, LABEL, MSODRAWING, OBJ, ROW,
    STRING, TXO, WINDOW2, is_cell_record,
};
use crate::xls::drawing::{DrawingCounters, DrawingShape, NewShape, SheetDrawing};
use crate::xls::error::{Diagnostic, XlsError, XlsResult};
use crate::xls::index::CellIndex;
use crate::xls::records::cells::parse_cell;
use crate::xls::records::{
    BiffRecord, Bof, CellBody, ColInfo, Dimensions, FormulaCompanion, RawRecord, RecordId, RowRecord,
    SheetId,
};
use crate::xls::row::Row;
use crate::xls::stream::{Anchor, Block, RecordStream};
use crate::xls::strings::XlUnicodeString;
use crate::xls::utils::{cell_reference, check_address, check_text};

/// `WINDOW2` payload of a new sheet: gridlines, headers, zeros, default
/// grid colour.
const DEFAULT_WINDOW2: [u8; 18] = [0xB6, 0x02, 0, 0, 0, 0, 0x40, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];

/// One worksheet.
///
/// Cells, ROW records, COLINFO ranges and the drawing are held in their own
/// structures; every other record of the substream stays in the record
/// stream in file order.
#[derive(Debug, Clone)]
pub struct Worksheet {
    id: SheetId,
    name: String,
    stream: RecordStream,
    cells: CellIndex,
    rows: BTreeMap<u32, Row>,
    columns: ColumnInfoTable,
    drawing: Option<SheetDrawing>,
}

impl Worksheet {
    /// Create an empty worksheet: `BOF`, `DIMENSIONS`, `WINDOW2`, `EOF`.
    pub fn new(id: SheetId, name: &str) -> Self {
        let mut stream = RecordStream::new(Some(id));
        let bof = stream.push(Bof::new(BOF_WORKSHEET).render());
        let dimensions = stream.push(Dimensions::default().render());
        stream.push(RawRecord::new(WINDOW2, DEFAULT_WINDOW2.to_vec()));
        stream.push(RawRecord::new(EOF, Vec::new()));
        stream.set_anchor(Block::ColumnInfo, Anchor::After(bof));
        stream.set_anchor(Block::Cells, Anchor::After(dimensions));
        Worksheet {
            id,
            name: name.to_string(),
            stream,
            cells: CellIndex::new(),
            rows: BTreeMap::new(),
            columns: ColumnInfoTable::new(),
            drawing: None,
        }
    }

    /// Load a sheet substream, `BOF` through its `EOF`.
    ///
    /// Records that fail to parse are kept verbatim in the stream and
    /// reported in `diagnostics`; `DBCELL` and `INDEX` are dropped since
    /// their offsets cannot survive an edit.
    pub fn from_records(
        id: SheetId,
        name: &str,
        records: Vec<RawRecord>,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> XlsResult<Self> {
        let mut sheet = Worksheet {
            id,
            name: name.to_string(),
            stream: RecordStream::new(Some(id)),
            cells: CellIndex::new(),
            rows: BTreeMap::new(),
            columns: ColumnInfoTable::new(),
            drawing: None,
        };
        let mut last: Option<RecordId> = None;
        let anchor_here = |last: Option<RecordId>| last.map_or(Anchor::Start, Anchor::After);

        let mut iter = records.into_iter().enumerate().peekable();
        while let Some((index, record)) = iter.next() {
            match record.opcode {
                ROW => {
                    sheet.anchor_once(Block::Cells, anchor_here(last));
                    match RowRecord::from_raw(&record) {
                        Ok(row) => {
                            sheet.rows.insert(row.row, Row::from_record(row));
                        },
                        Err(err) => {
                            diagnostics.push(Diagnostic::warn(ROW, err.to_string()));
                        },
                    }
                },
                opcode if is_cell_record(opcode) => {
                    sheet.anchor_once(Block::Cells, anchor_here(last));
                    let mut parsed = match parse_cell(&record, diagnostics) {
                        Ok(parsed) => parsed,
                        Err(err) => {
                            diagnostics.push(Diagnostic::warn(opcode, err.to_string()));
                            last = Some(sheet.stream.push(record));
                            continue;
                        },
                    };
                    if let CellBody::Formula { companions, .. } = &mut parsed.body {
                        while let Some((_, next)) = iter.peek() {
                            match FormulaCompanion::from_raw(next) {
                                Ok(Some(companion)) => {
                                    companions.push(companion);
                                    iter.next();
                                },
                                Ok(None) => break,
                                Err(err) => {
                                    diagnostics.push(Diagnostic::warn(
                                        next.opcode,
                                        format!("formula companion kept as is: {err}"),
                                    ));
                                    if let Some((_, raw)) = iter.next() {
                                        companions.push(FormulaCompanion::Other(raw));
                                    }
                                },
                            }
                        }
                    }
                    let cell = CellRecord::from_parsed(parsed);
                    // a record that cannot be filed stays in the stream as it was read
                    if let Err(err) = sheet.cells.check_vacant(&cell) {
                        diagnostics.push(Diagnostic::warn(opcode, format!("cell kept as a raw record: {err}")));
                        for raw in cell.render_all() {
                            last = Some(sheet.stream.push(raw));
                        }
                        continue;
                    }
                    sheet.cells.insert(cell)?;
                },
                DBCELL | INDEX => {
                    log::debug!("dropping record 0x{:04X} at index {index}", record.opcode);
                },
                COLINFO => {
                    sheet.anchor_once(Block::ColumnInfo, anchor_here(last));
                    match ColInfo::from_raw(&record).and_then(|info| sheet.columns.add(info)) {
                        Ok(()) => {},
                        Err(err) => {
                            diagnostics.push(Diagnostic::warn(COLINFO, err.to_string()));
                        },
                    }
                },
                MSODRAWING if sheet.drawing.is_none() => {
                    let mut run = vec![record];
                    let mut depth = 0usize;
                    while let Some((_, next)) = iter.peek() {
                        let inside = depth > 0 || matches!(next.opcode, MSODRAWING | OBJ | TXO | BOF);
                        if !inside {
                            break;
                        }
                        match next.opcode {
                            BOF => depth += 1,
                            EOF => depth = depth.saturating_sub(1),
                            _ => {},
                        }
                        if let Some((_, next)) = iter.next() {
                            run.push(next);
                        }
                    }
                    match SheetDrawing::parse(&run, diagnostics) {
                        Ok(drawing) => {
                            sheet.anchor_once(Block::Drawing, anchor_here(last));
                            sheet.drawing = Some(drawing);
                        },
                        Err(err) => {
                            diagnostics.push(Diagnostic::warn(
                                MSODRAWING,
                                format!("drawing kept as raw records: {err}"),
                            ));
                            for record in run {
                                last = Some(sheet.stream.push(record));
                            }
                        },
                    }
                },
                _ => {
                    last = Some(sheet.stream.push(record));
                },
            }
        }

        if sheet.stream.find(BOF).is_none() {
            return Err(XlsError::malformed(BOF, format!("sheet {name} has no BOF record")));
        }
        sheet.place_default_anchors();
        sheet.sync_rows();
        log::debug!(
            "sheet {name}: {} cell records, {} rows, {} column ranges",
            sheet.cells.len(),
            sheet.rows.len(),
            sheet.columns.len()
        );
        Ok(sheet)
    }

    fn anchor_once(&mut self, block: Block, anchor: Anchor) {
        if self.stream.anchor(block).is_none() {
            self.stream.set_anchor(block, anchor);
        }
    }

    /// Anchor blocks the loaded stream did not place: cells after
    /// `DIMENSIONS` (or ahead of `WINDOW2`/`EOF`), column ranges ahead of
    /// `DIMENSIONS`.
    fn place_default_anchors(&mut self) {
        let before = |stream: &RecordStream, id: RecordId| {
            stream
                .position(id)
                .and_then(|p| p.checked_sub(1))
                .and_then(|p| stream.iter().nth(p))
                .map_or(Anchor::Start, |(prev, _)| Anchor::After(prev))
        };
        if self.stream.anchor(Block::Cells).is_none() {
            let anchor = match self.stream.find(DIMENSIONS) {
                Some(dimensions) => Anchor::After(dimensions),
                None => self
                    .stream
                    .find(WINDOW2)
                    .or_else(|| self.stream.find(EOF))
                    .map_or(Anchor::Start, |id| before(&self.stream, id)),
            };
            self.stream.set_anchor(Block::Cells, anchor);
        }
        if self.stream.anchor(Block::ColumnInfo).is_none() {
            let anchor = match self.stream.find(DIMENSIONS) {
                Some(dimensions) => before(&self.stream, dimensions),
                None => self.stream.anchor(Block::Cells).unwrap_or(Anchor::Start),
            };
            self.stream.set_anchor(Block::ColumnInfo, anchor);
        }
    }

    #[inline]
    pub fn id(&self) -> SheetId {
        self.id
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Records other than cells, rows, column ranges and drawing.
    #[inline]
    pub fn stream(&self) -> &RecordStream {
        &self.stream
    }

    #[inline]
    pub fn stream_mut(&mut self) -> &mut RecordStream {
        &mut self.stream
    }

    #[inline]
    pub fn cells(&self) -> &CellIndex {
        &self.cells
    }

    // ---- cells --------------------------------------------------------

    /// Write a value at (row, col), replacing whatever covered the address.
    ///
    /// A run covering the address loses that column. Fails with
    /// `InvalidRecord`, leaving the sheet unchanged, outside the sheet
    /// limits or for text longer than a `LABEL` can hold.
    pub fn add_value(&mut self, row: u32, col: u16, value: CellValue, xf: u16) -> XlsResult<CellId> {
        if let CellValue::Text(text) = &value {
            check_text(LABEL, text)?;
        }
        let cell = CellRecord::from_value(row, col, &value, xf);
        check_address(cell.opcode(), row, u32::from(col))?;
        self.vacate(row, col)?;
        self.file_cell(cell)
    }

    /// File a prepared record (a run, a formula with companions). Fails
    /// with `InvalidRecord` when any covered column is taken.
    pub fn add_cell(&mut self, cell: CellRecord) -> XlsResult<CellId> {
        self.file_cell(cell)
    }

    /// Place a formula. The engine turns `text` into tokens and evaluates
    /// them; a text result is cached in a trailing `STRING` record.
    pub fn add_formula(
        &mut self,
        row: u32,
        col: u16,
        text: &str,
        xf: u16,
        engine: &dyn FormulaEngine,
    ) -> XlsResult<CellId> {
        check_address(FORMULA, row, u32::from(col))?;
        let context = FormulaContext {
            sheet: self.id,
            row,
            col,
        };
        let tokens = engine.parse(text, &context)?;
        let value = engine.evaluate(&tokens, &context)?;
        let mut companions = Vec::new();
        if let FormulaValue::Text(result) = &value {
            check_text(STRING, result)?;
            if !result.is_empty() {
                companions.push(FormulaCompanion::StringResult(XlUnicodeString::new(result)));
            }
        }
        let body = CellBody::Formula {
            cached: value.cached(),
            options: 0,
            chn: 0,
            tokens,
            extra: Vec::new(),
            companions,
        };
        self.vacate(row, col)?;
        self.file_cell(CellRecord::new(row, col, xf, body))
    }

    fn vacate(&mut self, row: u32, col: u16) -> XlsResult<()> {
        if self.cells.find(row, col).is_some() {
            self.cells.remove_at(row, col)?;
        }
        Ok(())
    }

    fn file_cell(&mut self, cell: CellRecord) -> XlsResult<CellId> {
        let row = cell.row();
        let id = self.cells.insert(cell)?;
        self.sync_row(row);
        Ok(id)
    }

    /// Record covering (row, col); a run is positioned at `col`.
    pub fn cell(&mut self, row: u32, col: u16) -> XlsResult<&CellRecord> {
        self.cells.get(row, col)
    }

    /// Value at (row, col).
    pub fn cell_value(&self, row: u32, col: u16) -> XlsResult<CellValue> {
        self.cells
            .find(row, col)
            .and_then(|id| self.cells.record(id))
            .and_then(|cell| cell.value_at(col))
            .ok_or_else(|| XlsError::not_found(format!("cell {}", cell_reference(row, col))))
    }

    /// Remove the cell at (row, col); a run only loses that column.
    pub fn remove_cell(&mut self, row: u32, col: u16) -> XlsResult<CellRecord> {
        let removed = self.cells.remove_at(row, col)?;
        self.sync_row(row);
        Ok(removed)
    }

    pub fn row_cells(&self, row: u32) -> XlsResult<Vec<&CellRecord>> {
        self.cells.range_by_row(row)
    }

    pub fn column_cells(&mut self, col: u16) -> XlsResult<Vec<&CellRecord>> {
        self.cells.range_by_col(col)
    }

    // ---- rows and columns ---------------------------------------------

    pub fn row(&self, row: u32) -> Option<&Row> {
        self.rows.get(&row)
    }

    /// Row aggregate, created on first use.
    pub fn row_mut(&mut self, row: u32) -> XlsResult<&mut Row> {
        check_address(ROW, row, 0)?;
        Ok(self.rows.entry(row).or_insert_with(|| Row::new(row)))
    }

    pub fn rows(&self) -> impl Iterator<Item = &Row> {
        self.rows.values()
    }

    pub fn set_row_height(&mut self, row: u32, twips: u16) -> XlsResult<()> {
        self.row_mut(row)?.set_height(twips);
        Ok(())
    }

    /// Width (1/256 character) and format for columns `first..=last`.
    pub fn add_column_metadata(&mut self, first: u16, last: u16, width: u16, xf: u16) -> XlsResult<()> {
        self.columns.set(first, last, width, xf)
    }

    pub fn column_metadata(&self, col: u16) -> Option<&ColInfo> {
        self.columns.get(col)
    }

    pub fn columns(&self) -> &ColumnInfoTable {
        &self.columns
    }

    /// Rebuild one row's cell collection from the index.
    fn sync_row(&mut self, row: u32) {
        let ids = self.cells.row_ids(row..=row);
        if ids.is_empty() && !self.rows.contains_key(&row) {
            return;
        }
        let cells: Vec<(u16, CellId)> = ids
            .into_iter()
            .filter_map(|id| self.cells.record(id).map(|cell| (cell.col(), id)))
            .collect();
        self.rows
            .entry(row)
            .or_insert_with(|| Row::new(row))
            .set_cells(cells);
    }

    fn sync_rows(&mut self) {
        let mut numbers: Vec<u32> = self.rows.keys().copied().collect();
        let mut last_row = None;
        for (_, cell) in self.cells.iter() {
            if last_row != Some(cell.row()) {
                numbers.push(cell.row());
                last_row = Some(cell.row());
            }
        }
        numbers.sort_unstable();
        numbers.dedup();
        for row in numbers {
            self.sync_row(row);
        }
    }

    /// Used range from the cells present (exclusive last bounds).
    pub fn dimensions(&self) -> Dimensions {
        match self.cells.bounds() {
            Some(bounds) => Dimensions {
                first_row: bounds.first_row,
                last_row: bounds.last_row + 1,
                first_col: bounds.first_col,
                last_col: bounds.last_col + 1,
            },
            None => Dimensions::default(),
        }
    }

    // ---- drawing ------------------------------------------------------

    pub fn drawing(&self) -> Option<&SheetDrawing> {
        self.drawing.as_ref()
    }

    pub fn shapes(&self) -> &[DrawingShape] {
        match &self.drawing {
            Some(drawing) => drawing.shapes(),
            None => &[],
        }
    }

    /// Add a shape, opening the sheet's drawing if it has none.
    pub fn add_shape(&mut self, counters: &mut DrawingCounters, shape: &NewShape) -> XlsResult<u32> {
        let (col, row) = shape.anchor.bottom_right();
        check_address(MSODRAWING, u32::from(row), u32::from(col))?;
        if let Some(text) = &shape.text {
            check_text(TXO, text)?;
        }
        if self.drawing.is_none() {
            let anchor = self
                .stream
                .anchor(Block::Cells)
                .unwrap_or(Anchor::Start);
            self.anchor_once(Block::Drawing, anchor);
        }
        let drawing = self
            .drawing
            .get_or_insert_with(|| SheetDrawing::new(counters));
        drawing.add_shape(counters, shape)
    }

    pub fn remove_shape(&mut self, counters: &mut DrawingCounters, shape_id: u32) -> XlsResult<DrawingShape> {
        self.drawing
            .as_mut()
            .ok_or_else(|| XlsError::not_found(format!("shape {shape_id}")))?
            .remove_shape(counters, shape_id)
    }

    pub fn set_shape_anchor(&mut self, shape_id: u32, anchor: &ClientAnchor) -> XlsResult<()> {
        self.drawing
            .as_mut()
            .ok_or_else(|| XlsError::not_found(format!("shape {shape_id}")))?
            .set_shape_anchor(shape_id, anchor)
    }

    /// Bring the drawing's container lengths and counters up to date.
    pub fn update_drawing_lengths(&mut self, counters: &DrawingCounters) -> XlsResult<()> {
        match self.drawing.as_mut() {
            Some(drawing) => drawing.update_lengths(counters),
            None => Ok(()),
        }
    }

    // ---- assembly -----------------------------------------------------

    /// Records of the substream in file order, with the stream id of each
    /// record that lives in the stream.
    fn assemble_entries(&self) -> Vec<(Option<RecordId>, RawRecord)> {
        let dimensions = self.dimensions().render();
        let mut out = Vec::with_capacity(self.stream.len() + self.cells.len() + self.rows.len());
        for block in self.stream.blocks_at(Anchor::Start) {
            self.emit_block(block, &mut out);
        }
        for (id, record) in self.stream.iter() {
            let record = if record.opcode == DIMENSIONS {
                dimensions.clone()
            } else {
                record.clone()
            };
            out.push((Some(id), record));
            for block in self.stream.blocks_at(Anchor::After(id)) {
                self.emit_block(block, &mut out);
            }
        }
        out
    }

    fn emit_block(&self, block: Block, out: &mut Vec<(Option<RecordId>, RawRecord)>) {
        let records = match block {
            Block::ColumnInfo => self.columns.render(),
            Block::Cells => self.cell_table(),
            Block::Drawing => self.drawing.as_ref().map(SheetDrawing::render).unwrap_or_default(),
            Block::SharedStrings => Vec::new(),
        };
        out.extend(records.into_iter().map(|record| (None, record)));
    }

    /// Cell table: per block of 32 rows, the ROW records and then the
    /// block's cells in row-major order.
    fn cell_table(&self) -> Vec<RawRecord> {
        let mut blocks: BTreeMap<u32, Vec<u32>> = BTreeMap::new();
        for &row in self.rows.keys() {
            blocks
                .entry(row / crate::xls::consts::ROWS_PER_BLOCK)
                .or_default()
                .push(row);
        }
        let mut out = Vec::new();
        for rows in blocks.values() {
            for row in rows.iter().filter_map(|r| self.rows.get(r)) {
                let span = self.row_span(row);
                out.push(row.render(span.0, span.1));
            }
            for row in rows {
                for id in self.cells.row_ids(*row..=*row) {
                    if let Some(cell) = self.cells.record(id) {
                        out.extend(cell.render_all());
                    }
                }
            }
        }
        out
    }

    /// (first column, last column + 1) of a row's cells.
    fn row_span(&self, row: &Row) -> (u16, u16) {
        let mut span: Option<(u16, u16)> = None;
        for cell in row.cell_ids().filter_map(|id| self.cells.record(id)) {
            let (first, last) = span.get_or_insert((cell.col(), cell.last_col()));
            *first = (*first).min(cell.col());
            *last = (*last).max(cell.last_col());
        }
        span.map_or((0, 0), |(first, last)| (first, last + 1))
    }

    /// Records of the substream in file order.
    pub fn assemble(&self) -> Vec<RawRecord> {
        self.assemble_entries()
            .into_iter()
            .map(|(_, record)| record)
            .collect()
    }

    /// Lay the substream out from `base`; stream records receive their
    /// offsets. Returns the assembled records and the end offset.
    pub(crate) fn layout(&mut self, base: u32, max_record_size: usize) -> (Vec<RawRecord>, u32) {
        let entries = self.assemble_entries();
        let mut offsets = Vec::new();
        let mut at = base;
        let mut records = Vec::with_capacity(entries.len());
        for (id, mut record) in entries {
            record.offset = Some(at);
            if let Some(id) = id {
                offsets.push((id, at));
            }
            at += record.byte_len(max_record_size) as u32;
            records.push(record);
        }
        self.stream.set_offsets(&offsets);
        (records, at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xls::consts::{LABELSST, MULRK, NUMBER, RK, STRING};
    use crate::xls::records::FormulaCached;

    struct ConstEngine(FormulaValue);

    impl FormulaEngine for ConstEngine {
        fn parse(&self, text: &str, _context: &FormulaContext) -> XlsResult<Vec<u8>> {
            if text.is_empty() {
                return Err(XlsError::Formula("empty formula".into()));
            }
            Ok(vec![0x1E, 0x01, 0x00])
        }

        fn evaluate(&self, _tokens: &[u8], _context: &FormulaContext) -> XlsResult<FormulaValue> {
            Ok(self.0.clone())
        }
    }

    fn opcodes(records: &[RawRecord]) -> Vec<u16> {
        records.iter().map(|r| r.opcode).collect()
    }

    fn content(records: &[RawRecord]) -> Vec<(u16, Vec<u8>)> {
        records.iter().map(|r| (r.opcode, r.joined())).collect()
    }

    #[test]
    fn test_new_sheet_layout() {
        let mut sheet = Worksheet::new(SheetId(0), "Sheet1");
        sheet.add_value(2, 1, CellValue::Number(1.5), 15).unwrap();
        sheet.add_column_metadata(0, 3, 3000, 15).unwrap();
        let records = sheet.assemble();
        assert_eq!(
            opcodes(&records),
            vec![BOF, COLINFO, DIMENSIONS, ROW, RK, WINDOW2, EOF]
        );
        let dimensions = Dimensions::from_raw(&records[2]).unwrap();
        assert_eq!((dimensions.first_row, dimensions.last_row), (2, 3));
        assert_eq!((dimensions.first_col, dimensions.last_col), (1, 2));
    }

    #[test]
    fn test_add_value_replaces_and_validates() {
        let mut sheet = Worksheet::new(SheetId(0), "S");
        sheet.add_value(0, 0, CellValue::Number(1.0), 0).unwrap();
        sheet.add_value(0, 0, CellValue::Bool(true), 0).unwrap();
        assert_eq!(sheet.cell_value(0, 0).unwrap(), CellValue::Bool(true));
        assert_eq!(sheet.cells().len(), 1);

        let err = sheet.add_value(0, 256, CellValue::Blank, 0).unwrap_err();
        assert!(matches!(err, XlsError::InvalidRecord { .. }));
        assert!(sheet.cell_value(5, 5).unwrap_err().is_not_found());
        assert_eq!(sheet.row(0).map(Row::cell_count), Some(1));
    }

    #[test]
    fn test_overlong_text_is_rejected() {
        let mut sheet = Worksheet::new(SheetId(0), "S");
        sheet.add_value(0, 0, CellValue::Number(2.0), 0).unwrap();
        let long = "a".repeat(70_000);

        let err = sheet.add_value(0, 0, CellValue::Text(long.clone()), 0).unwrap_err();
        assert!(matches!(err, XlsError::InvalidRecord { .. }));
        assert_eq!(sheet.cell_value(0, 0).unwrap(), CellValue::Number(2.0));

        let engine = ConstEngine(FormulaValue::Text(long));
        assert!(sheet.add_formula(1, 0, "=REPT(\"a\",70000)", 0, &engine).is_err());
        assert!(sheet.cell_value(1, 0).is_err());
        assert_eq!(sheet.cells().len(), 1);
    }

    #[test]
    fn test_add_value_inside_run() {
        let mut sheet = Worksheet::new(SheetId(0), "S");
        let run = CellRecord::number_run(1, 0, &[(15, 1.0), (15, 2.0), (15, 3.0)]).unwrap();
        sheet.add_cell(run).unwrap();
        sheet.add_value(1, 1, CellValue::SharedString(4), 16).unwrap();

        let ops: Vec<u16> = sheet.row_cells(1).unwrap().iter().map(|c| c.opcode()).collect();
        assert_eq!(ops, vec![RK, LABELSST, RK]);
        assert_eq!(sheet.cell_value(1, 2).unwrap(), CellValue::Number(3.0));
        sheet.cells().check_consistency().unwrap();
    }

    #[test]
    fn test_formula_with_string_result() {
        let mut sheet = Worksheet::new(SheetId(2), "S");
        let engine = ConstEngine(FormulaValue::Text("ok".into()));
        sheet.add_formula(3, 3, "=\"ok\"", 0, &engine).unwrap();
        assert_eq!(sheet.cell_value(3, 3).unwrap(), CellValue::Formula(FormulaCached::String));
        let ops = opcodes(&sheet.assemble());
        let at = ops.iter().position(|&op| op == FORMULA).unwrap();
        assert_eq!(ops[at + 1], STRING);

        let err = sheet.add_formula(4, 4, "", 0, &engine).unwrap_err();
        assert!(matches!(err, XlsError::Formula(_)));
        assert!(sheet.cell_value(4, 4).is_err());
    }

    #[test]
    fn test_load_keeps_order_and_companions() {
        let mut source = Worksheet::new(SheetId(0), "S");
        source.add_value(0, 0, CellValue::Number(std::f64::consts::PI), 0).unwrap();
        let engine = ConstEngine(FormulaValue::Text("x".into()));
        source.add_formula(1, 0, "=A1", 0, &engine).unwrap();
        source
            .add_cell(CellRecord::number_run(40, 2, &[(0, 1.0), (0, 2.0)]).unwrap())
            .unwrap();
        source.set_row_height(5, 400).unwrap();
        let records = source.assemble();

        let mut diagnostics = Vec::new();
        let loaded = Worksheet::from_records(SheetId(0), "S", records.clone(), &mut diagnostics).unwrap();
        assert!(diagnostics.is_empty());
        assert_eq!(content(&loaded.assemble()), content(&records));
        assert_eq!(loaded.row(5).map(Row::height), Some(400));
        assert_eq!(loaded.cell_value(40, 3).unwrap(), CellValue::Number(2.0));
        assert_eq!(
            opcodes(&records),
            vec![BOF, DIMENSIONS, ROW, ROW, ROW, NUMBER, FORMULA, STRING, ROW, MULRK, WINDOW2, EOF]
        );
    }

    #[test]
    fn test_load_drops_index_records() {
        let mut records = Worksheet::new(SheetId(0), "S").assemble();
        records.insert(1, RawRecord::new(INDEX, vec![0; 16]));
        records.insert(3, RawRecord::new(DBCELL, vec![0; 4]));
        let loaded = Worksheet::from_records(SheetId(0), "S", records, &mut Vec::new()).unwrap();
        assert_eq!(opcodes(&loaded.assemble()), vec![BOF, DIMENSIONS, WINDOW2, EOF]);
    }

    #[test]
    fn test_unparseable_cell_is_kept_verbatim() {
        let mut records = Worksheet::new(SheetId(0), "S").assemble();
        records.insert(2, RawRecord::new(NUMBER, vec![0; 4]));
        let mut diagnostics = Vec::new();
        let loaded = Worksheet::from_records(SheetId(0), "S", records.clone(), &mut diagnostics).unwrap();
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(loaded.cells().len(), 0);
        assert_eq!(content(&loaded.assemble()), content(&records));
    }

    #[test]
    fn test_unreadable_string_result_survives_reload() {
        let mut source = Worksheet::new(SheetId(0), "S");
        let engine = ConstEngine(FormulaValue::Text("cached".into()));
        source.add_formula(0, 0, "=A2", 0, &engine).unwrap();
        let mut records = source.assemble();
        let at = records.iter().position(|r| r.opcode == STRING).unwrap();
        // five characters declared, one present
        records[at] = RawRecord::new(STRING, vec![5, 0, 0, b'c']);

        let mut diagnostics = Vec::new();
        let loaded = Worksheet::from_records(SheetId(0), "S", records.clone(), &mut diagnostics).unwrap();
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(loaded.cells().len(), 1);
        assert_eq!(content(&loaded.assemble()), content(&records));
    }

    #[test]
    fn test_colliding_cells_are_kept_verbatim() {
        let mut plain = Worksheet::new(SheetId(0), "S");
        plain.add_value(0, 0, CellValue::Number(1.0), 0).unwrap();
        let duplicate = CellRecord::from_value(0, 0, &CellValue::Number(9.0), 0).render();

        let mut run = Worksheet::new(SheetId(0), "S");
        run.add_cell(CellRecord::number_run(0, 0, &[(0, 1.0), (0, 2.0)]).unwrap())
            .unwrap();
        let overlapping = CellRecord::from_value(0, 1, &CellValue::Number(7.0), 0).render();

        for (sheet, extra) in [(plain, duplicate), (run, overlapping)] {
            let mut records = sheet.assemble();
            let at = records.iter().position(|r| r.opcode == WINDOW2).unwrap();
            records.insert(at, extra);

            let mut diagnostics = Vec::new();
            let loaded = Worksheet::from_records(SheetId(0), "S", records.clone(), &mut diagnostics).unwrap();
            assert_eq!(diagnostics.len(), 1);
            assert_eq!(loaded.cell_value(0, 0).unwrap(), CellValue::Number(1.0));
            assert_eq!(loaded.cells().len(), 1);
            assert_eq!(content(&loaded.assemble()), content(&records));
            loaded.cells().check_consistency().unwrap();
        }
    }

    #[test]
    fn test_shapes_and_drawing_placement() {
        let mut counters = DrawingCounters::new();
        let mut sheet = Worksheet::new(SheetId(0), "S");
        sheet.add_value(0, 0, CellValue::Number(1.0), 0).unwrap();
        let spid = sheet
            .add_shape(&mut counters, &NewShape::rectangle(ClientAnchor::cells(1, 1, 2, 2)))
            .unwrap();
        assert_eq!(spid, 1025);
        assert_eq!(sheet.shapes().len(), 1);
        assert_eq!(
            opcodes(&sheet.assemble()),
            vec![BOF, DIMENSIONS, ROW, RK, MSODRAWING, OBJ, WINDOW2, EOF]
        );

        let records = sheet.assemble();
        let loaded = Worksheet::from_records(SheetId(0), "S", records.clone(), &mut Vec::new()).unwrap();
        assert_eq!(loaded.shapes().len(), 1);
        assert_eq!(content(&loaded.assemble()), content(&records));

        sheet.remove_shape(&mut counters, spid).unwrap();
        assert!(sheet.set_shape_anchor(spid, &ClientAnchor::cells(0, 0, 0, 0)).is_err());
    }

    #[test]
    fn test_layout_sets_stream_offsets() {
        let mut sheet = Worksheet::new(SheetId(0), "S");
        sheet.add_value(0, 0, CellValue::Number(1.0), 0).unwrap();
        let (records, end) = sheet.layout(1000, crate::xls::consts::MAX_RECORD_DATA);
        let total: usize = records.iter().map(|r| r.byte_len(crate::xls::consts::MAX_RECORD_DATA)).sum();
        assert_eq!(end as usize, 1000 + total);
        let eof = sheet.stream().find(EOF).unwrap();
        assert_eq!(sheet.stream().get(eof).and_then(|r| r.offset), Some(end - 4));
    }
}

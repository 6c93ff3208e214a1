//! Workbook aggregate: the globals substream, the shared string table, the
//! worksheets and the workbook-wide drawing counters.
//!
//! Loading splits the byte stream into the globals substream (`BOF` of type
//! 0x0005 through the first `EOF`) and one substream per `BOUNDSHEET`.
//! `SST`, `EXTSST` and `MSODRAWINGGROUP` are lifted out of the globals and
//! regenerated on save, after which every `BOUNDSHEET` is patched with the
//! new position of its sheet.

use crate::common::binary;
use crate::escher::{self, EscherNode, EscherRecordType, parse_forest};
use crate::xls::cell::{CellId, CellValue};
use crate::xls::consts::{
    BOF, BOF_WORKBOOK_GLOBALS, BOUNDSHEET, CODEPAGE, EOF, EXTSST, LABELSST, MAX_RECORD_DATA, MSODRAWINGGROUP,
    SST,
};
use crate::xls::drawing::{DrawingCounters, DrawingShape, NewShape};
use crate::xls::error::{Diagnostic, XlsError, XlsResult};
use crate::xls::records::{BiffRecord, Bof, BoundSheet, RawRecord, RecordId, SheetId, read_records};
use crate::xls::sst::{RenderedSst, SharedStringTable};
use crate::xls::stream::{Anchor, Block, RecordStream};
use crate::xls::utils::check_address;
use crate::xls::worksheet::Worksheet;

/// UTF-16 code page
const CODEPAGE_UTF16: u16 = 0x04B0;

/// Longest sheet name Excel accepts
const MAX_SHEET_NAME: usize = 31;

/// Characters a sheet name may not contain
const SHEET_NAME_FORBIDDEN: &[char] = &['[', ']', ':', '*', '?', '/', '\\'];

/// Options for [`Workbook::from_bytes`].
#[derive(Debug, Clone, Copy, Default)]
pub struct LoadOptions {
    /// Fail on the first recovered malformation instead of collecting it
    pub strict: bool,
}

/// Options for [`Workbook::to_bytes`].
#[derive(Debug, Clone, Copy)]
pub struct SaveOptions {
    /// Largest payload of one physical record; longer records continue in
    /// `CONTINUE` records
    pub max_record_size: usize,
}

impl Default for SaveOptions {
    fn default() -> Self {
        SaveOptions {
            max_record_size: MAX_RECORD_DATA,
        }
    }
}

/// State of the workbook's `MSODRAWINGGROUP`.
#[derive(Debug, Clone)]
enum DrawingGroup {
    Absent,
    Parsed(EscherNode),
    /// Unreadable; the records stay in the globals stream as they were
    Verbatim,
}

/// A BIFF8 workbook held as records, edited in place.
#[derive(Debug, Clone)]
pub struct Workbook {
    globals: RecordStream,
    sst: SharedStringTable,
    sheets: Vec<Worksheet>,
    /// `BOUNDSHEET` record of each sheet, parallel to `sheets`
    boundsheets: Vec<RecordId>,
    counters: DrawingCounters,
    drawing_group: DrawingGroup,
    diagnostics: Vec<Diagnostic>,
}

impl Default for Workbook {
    fn default() -> Self {
        Self::new()
    }
}

impl Workbook {
    /// Empty workbook: `BOF`, `CODEPAGE` and `EOF` in the globals, no sheets.
    pub fn new() -> Self {
        let mut globals = RecordStream::new(None);
        globals.push(Bof::new(BOF_WORKBOOK_GLOBALS).render());
        let codepage = globals.push(RawRecord::new(CODEPAGE, CODEPAGE_UTF16.to_le_bytes().to_vec()));
        globals.push(RawRecord::new(EOF, Vec::new()));
        globals.set_anchor(Block::Drawing, Anchor::After(codepage));
        globals.set_anchor(Block::SharedStrings, Anchor::After(codepage));

        Workbook {
            globals,
            sst: SharedStringTable::new(),
            sheets: Vec::new(),
            boundsheets: Vec::new(),
            counters: DrawingCounters::new(),
            drawing_group: DrawingGroup::Absent,
            diagnostics: Vec::new(),
        }
    }

    /// Load a workbook stream.
    ///
    /// Fails with `Unparseable` when the stream does not start with a
    /// workbook globals `BOF`. Recovered malformations are collected in
    /// [`diagnostics`](Self::diagnostics), or fail the load in strict mode.
    pub fn from_bytes(data: &[u8], options: LoadOptions) -> XlsResult<Self> {
        let mut diagnostics = Vec::new();
        let mut records = read_records(data, &mut diagnostics)?;

        let is_globals = records
            .first()
            .filter(|record| record.opcode == BOF)
            .and_then(|record| Bof::from_raw(record).ok())
            .is_some_and(|bof| bof.substream == BOF_WORKBOOK_GLOBALS);
        if !is_globals {
            return Err(XlsError::Unparseable(
                "stream does not start with a workbook globals BOF".into(),
            ));
        }

        let globals_end = records
            .iter()
            .position(|record| record.opcode == EOF)
            .map_or(records.len(), |i| i + 1);
        let rest = records.split_off(globals_end);

        let mut workbook = Workbook::new();
        workbook.globals = RecordStream::new(None);
        let entries = workbook.load_globals(records, &mut diagnostics);
        workbook.load_sheets(entries, split_substreams(rest, &mut diagnostics), &mut diagnostics)?;

        for sheet in &workbook.sheets {
            if let Some(drawing) = sheet.drawing() {
                workbook.counters.register(drawing.drawing_id(), drawing.cluster());
            }
        }

        if options.strict {
            if let Some(first) = diagnostics.first() {
                return Err(XlsError::malformed(first.record_type, first.message.clone()));
            }
        }
        log::debug!(
            "loaded workbook: {} sheets, {} shared strings, {} diagnostics",
            workbook.sheets.len(),
            workbook.sst.len(),
            diagnostics.len()
        );
        workbook.diagnostics = diagnostics;
        Ok(workbook)
    }

    /// Fill the globals stream; returns the parsed `BOUNDSHEET`s.
    fn load_globals(
        &mut self,
        records: Vec<RawRecord>,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Vec<(RecordId, BoundSheet)> {
        let mut bound = Vec::new();
        let mut last: Option<RecordId> = None;
        let mut iter = records.into_iter().peekable();

        while let Some(record) = iter.next() {
            match record.opcode {
                SST => match SharedStringTable::parse(&record, diagnostics) {
                    Ok(sst) => {
                        self.sst = sst;
                        self.anchor_once(Block::SharedStrings, here(last));
                    },
                    Err(err) => {
                        diagnostics.push(Diagnostic::warn(SST, format!("kept verbatim: {err}")));
                        last = Some(self.globals.push(record));
                    },
                },
                EXTSST => log::debug!("EXTSST dropped, rebuilt on save"),
                MSODRAWINGGROUP => {
                    let mut run = vec![record];
                    while let Some(next) = iter.next_if(|r| r.opcode == MSODRAWINGGROUP) {
                        run.push(next);
                    }
                    match parse_drawing_group(&run, diagnostics) {
                        Ok(root) => {
                            self.drawing_group = DrawingGroup::Parsed(root);
                            self.anchor_once(Block::Drawing, here(last));
                        },
                        Err(err) => {
                            diagnostics.push(Diagnostic::warn(
                                MSODRAWINGGROUP,
                                format!("drawing group kept verbatim: {err}"),
                            ));
                            self.drawing_group = DrawingGroup::Verbatim;
                            for record in run {
                                last = Some(self.globals.push(record));
                            }
                        },
                    }
                },
                BOUNDSHEET => {
                    let parsed = BoundSheet::from_raw(&record);
                    let id = self.globals.push(record);
                    last = Some(id);
                    match parsed {
                        Ok(sheet) => bound.push((id, sheet)),
                        Err(err) => diagnostics.push(Diagnostic::warn(BOUNDSHEET, err.to_string())),
                    }
                },
                _ => last = Some(self.globals.push(record)),
            }
        }

        if self.globals.anchor(Block::SharedStrings).is_none() {
            let anchor = self.anchor_before_eof();
            self.globals.set_anchor(Block::SharedStrings, anchor);
        }
        if self.globals.anchor(Block::Drawing).is_none() {
            let anchor = self
                .globals
                .anchor(Block::SharedStrings)
                .unwrap_or(Anchor::Start);
            self.globals.set_anchor(Block::Drawing, anchor);
        }
        bound
    }

    fn anchor_once(&mut self, block: Block, anchor: Anchor) {
        if self.globals.anchor(block).is_none() {
            self.globals.set_anchor(block, anchor);
        }
    }

    fn anchor_before_eof(&self) -> Anchor {
        let ids: Vec<RecordId> = self.globals.iter().map(|(id, _)| id).collect();
        let eof = self.globals.find(EOF).and_then(|id| self.globals.position(id));
        match eof {
            Some(0) => Anchor::Start,
            Some(position) => Anchor::After(ids[position - 1]),
            None => here(ids.last().copied()),
        }
    }

    /// Pair every `BOUNDSHEET` with its substream: by stream position first,
    /// then the unclaimed substreams in order.
    fn load_sheets(
        &mut self,
        bound: Vec<(RecordId, BoundSheet)>,
        substreams: Vec<Vec<RawRecord>>,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> XlsResult<()> {
        let starts: Vec<Option<u32>> = substreams
            .iter()
            .map(|records| records.first().and_then(|record| record.offset))
            .collect();
        let mut picks: Vec<Option<usize>> = bound
            .iter()
            .map(|(_, sheet)| starts.iter().position(|start| *start == Some(sheet.position)))
            .collect();
        let unclaimed: Vec<usize> = (0..substreams.len())
            .filter(|i| !picks.contains(&Some(*i)))
            .collect();
        let mut unclaimed = unclaimed.into_iter();
        for (pick, (_, sheet)) in picks.iter_mut().zip(&bound).filter(|(pick, _)| pick.is_none()) {
            *pick = unclaimed.next();
            if let Some(i) = pick {
                diagnostics.push(Diagnostic::warn(
                    BOUNDSHEET,
                    format!(
                        "sheet '{}' points at offset {}, using the substream at {:?}",
                        sheet.name, sheet.position, starts[*i]
                    ),
                ));
            }
        }

        let mut pool: Vec<Option<Vec<RawRecord>>> = substreams.into_iter().map(Some).collect();
        for ((record_id, sheet), pick) in bound.into_iter().zip(picks) {
            let Some(records) = pick.and_then(|i| pool[i].take()) else {
                diagnostics.push(Diagnostic::warn(
                    BOUNDSHEET,
                    format!("sheet '{}' has no substream; dropped", sheet.name),
                ));
                self.globals.remove(record_id);
                continue;
            };
            let id = SheetId(self.sheets.len() as u16);
            let worksheet = Worksheet::from_records(id, &sheet.name, records, diagnostics)?;
            self.sheets.push(worksheet);
            self.boundsheets.push(record_id);
        }

        for records in pool.into_iter().flatten() {
            diagnostics.push(Diagnostic::warn(
                BOF,
                format!(
                    "substream at offset {:?} has no BOUNDSHEET; dropped",
                    records.first().and_then(|record| record.offset)
                ),
            ));
        }
        Ok(())
    }

    /// Diagnostics recorded while loading.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    #[inline]
    pub fn globals(&self) -> &RecordStream {
        &self.globals
    }

    pub fn globals_mut(&mut self) -> &mut RecordStream {
        &mut self.globals
    }

    #[inline]
    pub fn sheet_count(&self) -> usize {
        self.sheets.len()
    }

    pub fn sheets(&self) -> &[Worksheet] {
        &self.sheets
    }

    pub fn sheet(&self, index: usize) -> XlsResult<&Worksheet> {
        self.sheets
            .get(index)
            .ok_or_else(|| XlsError::not_found(format!("sheet {index}")))
    }

    pub fn sheet_mut(&mut self, index: usize) -> XlsResult<&mut Worksheet> {
        self.sheets
            .get_mut(index)
            .ok_or_else(|| XlsError::not_found(format!("sheet {index}")))
    }

    /// Index of the sheet named `name`, compared case-insensitively.
    pub fn sheet_index(&self, name: &str) -> Option<usize> {
        self.sheets
            .iter()
            .position(|sheet| sheet.name().to_lowercase() == name.to_lowercase())
    }

    pub fn sheet_by_name(&self, name: &str) -> XlsResult<&Worksheet> {
        let index = self
            .sheet_index(name)
            .ok_or_else(|| XlsError::not_found(format!("sheet '{name}'")))?;
        self.sheet(index)
    }

    pub fn sheet_by_name_mut(&mut self, name: &str) -> XlsResult<&mut Worksheet> {
        let index = self
            .sheet_index(name)
            .ok_or_else(|| XlsError::not_found(format!("sheet '{name}'")))?;
        self.sheet_mut(index)
    }

    /// Append an empty worksheet; returns its index.
    pub fn add_sheet(&mut self, name: &str) -> XlsResult<usize> {
        let units = name.encode_utf16().count();
        if units == 0 || units > MAX_SHEET_NAME {
            return Err(XlsError::invalid(
                BOUNDSHEET,
                format!("sheet name must be 1 to {MAX_SHEET_NAME} characters, got {units}"),
            ));
        }
        if name.contains(SHEET_NAME_FORBIDDEN) {
            return Err(XlsError::invalid(
                BOUNDSHEET,
                format!("sheet name '{name}' contains one of {SHEET_NAME_FORBIDDEN:?}"),
            ));
        }
        if self.sheet_index(name).is_some() {
            return Err(XlsError::invalid(BOUNDSHEET, format!("sheet '{name}' already exists")));
        }
        if self.sheets.len() > u16::MAX as usize {
            return Err(XlsError::invalid(BOUNDSHEET, "too many sheets"));
        }

        let after = match self.boundsheets.last() {
            Some(&id) => id,
            None => match self.globals.anchor(Block::SharedStrings) {
                Some(Anchor::After(id)) => id,
                _ => self
                    .globals
                    .find(BOF)
                    .ok_or_else(|| XlsError::malformed(BOF, "globals stream has no BOF"))?,
            },
        };
        let record_id = self
            .globals
            .insert_ahead_of_blocks(after, BoundSheet::new(name).render())?;

        let index = self.sheets.len();
        self.sheets.push(Worksheet::new(SheetId(index as u16), name));
        self.boundsheets.push(record_id);
        log::debug!("added sheet '{name}' at index {index}");
        Ok(index)
    }

    #[inline]
    pub fn sst(&self) -> &SharedStringTable {
        &self.sst
    }

    /// Add plain text to the shared string table; returns its index.
    pub fn intern_string(&mut self, text: &str) -> XlsResult<u32> {
        self.sst.intern(text)
    }

    /// Text of a string value: shared strings resolve through the table.
    pub fn text_of(&self, value: &CellValue) -> Option<String> {
        match value {
            CellValue::SharedString(index) => self.sst.get(*index).map(|string| string.text()),
            CellValue::Text(text) => Some(text.clone()),
            _ => None,
        }
    }

    /// Set a cell on sheet `sheet`. Text is interned into the shared string
    /// table and stored as `LABELSST`.
    pub fn add_value(&mut self, sheet: usize, row: u32, col: u16, value: CellValue, xf: u16) -> XlsResult<CellId> {
        if sheet >= self.sheets.len() {
            return Err(XlsError::not_found(format!("sheet {sheet}")));
        }
        let value = match value {
            CellValue::Text(text) => {
                check_address(LABELSST, row, u32::from(col))?;
                CellValue::SharedString(self.sst.intern(&text)?)
            },
            other => other,
        };
        self.sheets[sheet].add_value(row, col, value, xf)
    }

    #[inline]
    pub fn drawing_counters(&self) -> &DrawingCounters {
        &self.counters
    }

    /// A sheet together with the counters its drawing edits need.
    pub fn sheet_and_counters_mut(&mut self, index: usize) -> XlsResult<(&mut Worksheet, &mut DrawingCounters)> {
        let sheet = self
            .sheets
            .get_mut(index)
            .ok_or_else(|| XlsError::not_found(format!("sheet {index}")))?;
        Ok((sheet, &mut self.counters))
    }

    /// Add a shape to sheet `sheet`; returns its shape id.
    pub fn add_shape(&mut self, sheet: usize, shape: &NewShape) -> XlsResult<u32> {
        let (sheet, counters) = self.sheet_and_counters_mut(sheet)?;
        sheet.add_shape(counters, shape)
    }

    pub fn remove_shape(&mut self, sheet: usize, shape_id: u32) -> XlsResult<DrawingShape> {
        let (sheet, counters) = self.sheet_and_counters_mut(sheet)?;
        sheet.remove_shape(counters, shape_id)
    }

    /// Recompute every container length and shape count of every drawing.
    pub fn refresh_drawing_lengths(&mut self) -> XlsResult<()> {
        for sheet in &mut self.sheets {
            sheet.update_drawing_lengths(&self.counters)?;
        }
        Ok(())
    }

    /// `MSODRAWINGGROUP` with its `Dgg` atom rebuilt from the counters.
    fn drawing_group_record(&self) -> Option<RawRecord> {
        let mut root = match &self.drawing_group {
            DrawingGroup::Verbatim => return None,
            DrawingGroup::Absent if self.counters.is_empty() => return None,
            DrawingGroup::Absent => escher::writer::drawing_group(&self.counters.dgg()),
            DrawingGroup::Parsed(root) if self.counters.is_empty() => root.clone(),
            DrawingGroup::Parsed(root) => {
                let mut root = root.clone();
                let dgg = self.counters.dgg().to_node();
                match root.find_mut(EscherRecordType::Dgg) {
                    Some(node) => *node = dgg,
                    None => {
                        if let Some(container) = root.as_container_mut() {
                            container.children.insert(0, dgg);
                        }
                    },
                }
                root
            },
        };
        escher::recompute(&mut root);
        Some(RawRecord::new(MSODRAWINGGROUP, root.to_bytes()))
    }

    /// Serialize the workbook stream.
    ///
    /// Drawing lengths are refreshed, the globals are laid out with the
    /// regenerated blocks, the sheets follow, and each `BOUNDSHEET` gets
    /// the offset of its sheet's `BOF`. Stream offsets of every record are
    /// valid afterwards.
    pub fn to_bytes(&mut self, options: SaveOptions) -> XlsResult<Vec<u8>> {
        self.refresh_drawing_lengths()?;
        let max = options.max_record_size;

        let sst = self.sst.render(max);
        let group = self.drawing_group_record();
        // An SST that could not be read stays in the stream as it was
        let sst_block = self.globals.find(SST).is_none().then_some(&sst);
        let (mut globals, extsst_at) = self.globals_entries(sst_block, group.as_ref());

        let mut offsets = Vec::with_capacity(globals.len());
        let mut at = 0u32;
        for (id, record) in &mut globals {
            record.offset = Some(at);
            if let Some(id) = id {
                offsets.push((*id, at));
            }
            at += record.byte_len(max) as u32;
        }

        if let Some(i) = extsst_at {
            let sst_offset = globals[i - 1].1.offset.unwrap_or(0);
            let mut extsst = sst.extsst(sst_offset);
            extsst.offset = globals[i].1.offset;
            globals[i].1 = extsst;
        }

        let mut sheet_records = Vec::with_capacity(self.sheets.len());
        let mut positions = Vec::with_capacity(self.sheets.len());
        for sheet in &mut self.sheets {
            positions.push(at);
            let (records, end) = sheet.layout(at, max);
            sheet_records.push(records);
            at = end;
        }

        for (&record_id, &position) in self.boundsheets.iter().zip(&positions) {
            if let Some((_, record)) = globals.iter_mut().find(|(id, _)| *id == Some(record_id)) {
                binary::put_u32_le(&mut record.payload, 0, position)?;
            }
            if let Some(record) = self.globals.get_mut(record_id) {
                binary::put_u32_le(&mut record.payload, 0, position)?;
            }
        }
        self.globals.set_offsets(&offsets);

        let mut out = Vec::with_capacity(at as usize);
        for record in globals.iter().map(|(_, record)| record).chain(sheet_records.iter().flatten()) {
            record.write_to(&mut out, max);
        }
        log::debug!("saved workbook: {} bytes, {} sheets", out.len(), self.sheets.len());
        Ok(out)
    }

    /// Globals records in emission order with the regenerated blocks
    /// spliced in. The second value is the index of the `EXTSST`
    /// placeholder; the `SST` record sits right before it.
    fn globals_entries(
        &self,
        sst: Option<&RenderedSst>,
        group: Option<&RawRecord>,
    ) -> (Vec<(Option<RecordId>, RawRecord)>, Option<usize>) {
        let mut entries = Vec::with_capacity(self.globals.len() + 3);
        let mut extsst_at = None;
        for block in self.globals.blocks_at(Anchor::Start) {
            emit_block(block, sst, group, &mut entries, &mut extsst_at);
        }
        for (id, record) in self.globals.iter() {
            entries.push((Some(id), record.clone()));
            for block in self.globals.blocks_at(Anchor::After(id)) {
                emit_block(block, sst, group, &mut entries, &mut extsst_at);
            }
        }
        (entries, extsst_at)
    }
}

fn emit_block(
    block: Block,
    sst: Option<&RenderedSst>,
    group: Option<&RawRecord>,
    entries: &mut Vec<(Option<RecordId>, RawRecord)>,
    extsst_at: &mut Option<usize>,
) {
    match block {
        Block::Drawing => {
            if let Some(group) = group {
                entries.push((None, group.clone()));
            }
        },
        Block::SharedStrings => {
            let Some(sst) = sst else { return };
            entries.push((None, sst.record.clone()));
            *extsst_at = Some(entries.len());
            entries.push((None, RawRecord::new(EXTSST, vec![0; sst.extsst_len()])));
        },
        Block::ColumnInfo | Block::Cells => {},
    }
}

#[inline]
fn here(last: Option<RecordId>) -> Anchor {
    last.map_or(Anchor::Start, Anchor::After)
}

/// Join a run of `MSODRAWINGGROUP` records and read its `DggContainer`.
fn parse_drawing_group(run: &[RawRecord], diagnostics: &mut Vec<Diagnostic>) -> XlsResult<EscherNode> {
    let data: Vec<u8> = run.iter().flat_map(RawRecord::joined).collect();
    let mut warnings = Vec::new();
    let nodes = parse_forest(&data, &mut warnings)?;
    for warning in warnings {
        diagnostics.push(Diagnostic::warn(MSODRAWINGGROUP, warning));
    }
    let mut nodes = nodes.into_iter();
    match (nodes.next(), nodes.next()) {
        (Some(root), None) if root.kind() == EscherRecordType::DggContainer => Ok(root),
        _ => Err(XlsError::malformed(
            MSODRAWINGGROUP,
            "expected a single DggContainer",
        )),
    }
}

/// Split the records after the globals into `BOF`..`EOF` substreams,
/// nested substreams (charts) included in their parent.
fn split_substreams(records: Vec<RawRecord>, diagnostics: &mut Vec<Diagnostic>) -> Vec<Vec<RawRecord>> {
    let mut substreams = Vec::new();
    let mut current: Vec<RawRecord> = Vec::new();
    let mut depth = 0usize;

    for record in records {
        if depth == 0 && record.opcode != BOF {
            diagnostics.push(Diagnostic::warn(
                record.opcode,
                format!("record at offset {:?} lies outside any substream; dropped", record.offset),
            ));
            continue;
        }
        match record.opcode {
            BOF => depth += 1,
            EOF => depth = depth.saturating_sub(1),
            _ => {},
        }
        current.push(record);
        if depth == 0 {
            substreams.push(std::mem::take(&mut current));
        }
    }

    if !current.is_empty() {
        diagnostics.push(Diagnostic::warn(EOF, "last substream has no EOF"));
        substreams.push(current);
    }
    substreams
}

//! Ordered record list of one substream (workbook globals or a worksheet).
//!
//! Some records do not live here: cells and ROW records sit in the cell
//! index, COLINFO ranges in the column table, the drawing records in the
//! sheet drawing, and `SST`/`EXTSST` in the shared string table. Each such
//! block has an anchor in the stream and is spliced back in right after it
//! when the stream is assembled.

use std::collections::BTreeMap;

use crate::xls::error::{XlsError, XlsResult};
use crate::xls::records::{RawRecord, RecordId, SheetId};

/// Record blocks kept outside the stream, in emission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Block {
    ColumnInfo,
    Cells,
    /// `MSODRAWING` run of a sheet, `MSODRAWINGGROUP` of the globals
    Drawing,
    /// `SST` and `EXTSST`
    SharedStrings,
}

/// Where a block is spliced in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anchor {
    /// Before the first record
    Start,
    /// Right after a record
    After(RecordId),
}

/// Records of one substream, in stream order, with stable ids.
#[derive(Debug, Clone, Default)]
pub struct RecordStream {
    records: Vec<(RecordId, RawRecord)>,
    next_id: u32,
    sheet: Option<SheetId>,
    anchors: BTreeMap<Block, Anchor>,
    layout_valid: bool,
}

impl RecordStream {
    pub fn new(sheet: Option<SheetId>) -> Self {
        RecordStream {
            sheet,
            ..Self::default()
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[inline]
    pub fn sheet(&self) -> Option<SheetId> {
        self.sheet
    }

    fn allocate(&mut self, mut record: RawRecord) -> (RecordId, RawRecord) {
        let id = RecordId(self.next_id);
        self.next_id += 1;
        record.sheet = self.sheet;
        record.offset = None;
        self.layout_valid = false;
        (id, record)
    }

    /// Append a record.
    pub fn push(&mut self, record: RawRecord) -> RecordId {
        let entry = self.allocate(record);
        let id = entry.0;
        self.records.push(entry);
        id
    }

    /// Insert a record at `position` (clamped to the end).
    pub fn insert_at(&mut self, position: usize, record: RawRecord) -> RecordId {
        let entry = self.allocate(record);
        let id = entry.0;
        self.records.insert(position.min(self.records.len()), entry);
        id
    }

    pub fn insert_after(&mut self, anchor: RecordId, record: RawRecord) -> XlsResult<RecordId> {
        let position = self.require(anchor)?;
        Ok(self.insert_at(position + 1, record))
    }

    pub fn insert_before(&mut self, anchor: RecordId, record: RawRecord) -> XlsResult<RecordId> {
        let position = self.require(anchor)?;
        Ok(self.insert_at(position, record))
    }

    /// Insert right after `anchor`, ahead of any block spliced in there.
    pub fn insert_ahead_of_blocks(&mut self, anchor: RecordId, record: RawRecord) -> XlsResult<RecordId> {
        let id = self.insert_after(anchor, record)?;
        for block_anchor in self.anchors.values_mut() {
            if *block_anchor == Anchor::After(anchor) {
                *block_anchor = Anchor::After(id);
            }
        }
        Ok(id)
    }

    fn require(&self, id: RecordId) -> XlsResult<usize> {
        self.position(id)
            .ok_or_else(|| XlsError::not_found(format!("record {}", id.0)))
    }

    /// Remove a record. Removing a record that is not in the stream logs a
    /// warning and changes nothing.
    pub fn remove(&mut self, id: RecordId) -> Option<RawRecord> {
        let Some(position) = self.position(id) else {
            log::warn!("record {} is not in the stream; nothing removed", id.0);
            return None;
        };
        let fallback = match position.checked_sub(1) {
            Some(p) => Anchor::After(self.records[p].0),
            None => Anchor::Start,
        };
        for anchor in self.anchors.values_mut() {
            if *anchor == Anchor::After(id) {
                *anchor = fallback;
            }
        }
        self.layout_valid = false;
        let (_, mut record) = self.records.remove(position);
        record.sheet = None;
        record.offset = None;
        Some(record)
    }

    /// Replace a record's content in place.
    pub fn replace(&mut self, id: RecordId, mut record: RawRecord) -> XlsResult<RawRecord> {
        let position = self.require(id)?;
        record.sheet = self.sheet;
        record.offset = None;
        self.layout_valid = false;
        Ok(std::mem::replace(&mut self.records[position].1, record))
    }

    pub fn position(&self, id: RecordId) -> Option<usize> {
        self.records.iter().position(|(rid, _)| *rid == id)
    }

    pub fn get(&self, id: RecordId) -> Option<&RawRecord> {
        self.records
            .iter()
            .find(|(rid, _)| *rid == id)
            .map(|(_, record)| record)
    }

    /// Mutable access; the layout becomes stale.
    pub fn get_mut(&mut self, id: RecordId) -> Option<&mut RawRecord> {
        self.layout_valid = false;
        self.records
            .iter_mut()
            .find(|(rid, _)| *rid == id)
            .map(|(_, record)| record)
    }

    /// First record with `opcode`.
    pub fn find(&self, opcode: u16) -> Option<RecordId> {
        self.records
            .iter()
            .find(|(_, record)| record.opcode == opcode)
            .map(|(id, _)| *id)
    }

    /// Every record with `opcode`, in stream order.
    pub fn find_all(&self, opcode: u16) -> Vec<RecordId> {
        self.records
            .iter()
            .filter(|(_, record)| record.opcode == opcode)
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (RecordId, &RawRecord)> {
        self.records.iter().map(|(id, record)| (*id, record))
    }

    #[inline]
    pub fn anchor(&self, block: Block) -> Option<Anchor> {
        self.anchors.get(&block).copied()
    }

    pub fn set_anchor(&mut self, block: Block, anchor: Anchor) {
        self.anchors.insert(block, anchor);
        self.layout_valid = false;
    }

    /// Blocks spliced in at `anchor`, in emission order.
    pub fn blocks_at(&self, anchor: Anchor) -> impl Iterator<Item = Block> + '_ {
        self.anchors
            .iter()
            .filter(move |(_, a)| **a == anchor)
            .map(|(block, _)| *block)
    }

    /// Mark every offset stale.
    pub fn invalidate(&mut self) {
        self.layout_valid = false;
        for (_, record) in &mut self.records {
            record.offset = None;
        }
    }

    #[inline]
    pub fn is_layout_valid(&self) -> bool {
        self.layout_valid
    }

    /// Assign offsets to consecutive records starting at `base`; returns the
    /// offset just past the last record.
    pub fn layout(&mut self, base: u32, max_record_size: usize) -> u32 {
        let mut at = base;
        for (_, record) in &mut self.records {
            record.offset = Some(at);
            at += record.byte_len(max_record_size) as u32;
        }
        self.layout_valid = true;
        at
    }

    /// Set offsets from an external layout pass that interleaved other
    /// records (the cell table) with this stream's records.
    pub(crate) fn set_offsets(&mut self, offsets: &[(RecordId, u32)]) {
        for &(id, offset) in offsets {
            if let Some((_, record)) = self.records.iter_mut().find(|(rid, _)| *rid == id) {
                record.offset = Some(offset);
            }
        }
        self.layout_valid = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(opcode: u16, len: usize) -> RawRecord {
        RawRecord::new(opcode, vec![0; len])
    }

    #[test]
    fn test_positional_edits() {
        let mut stream = RecordStream::new(Some(SheetId(1)));
        let bof = stream.push(rec(0x0809, 16));
        let eof = stream.push(rec(0x000A, 0));
        let dim = stream.insert_after(bof, rec(0x0200, 14)).unwrap();
        let win = stream.insert_before(eof, rec(0x023E, 18)).unwrap();
        let order: Vec<u16> = stream.iter().map(|(_, r)| r.opcode).collect();
        assert_eq!(order, vec![0x0809, 0x0200, 0x023E, 0x000A]);
        assert_eq!(stream.position(win), Some(2));
        assert_eq!(stream.find(0x0200), Some(dim));
        assert_eq!(stream.get(dim).and_then(|r| r.sheet), Some(SheetId(1)));
    }

    #[test]
    fn test_remove_absent_is_noop() {
        let mut stream = RecordStream::new(None);
        let id = stream.push(rec(0x0042, 2));
        assert!(stream.remove(id).is_some());
        assert!(stream.remove(id).is_none());
        assert!(stream.is_empty());
    }

    #[test]
    fn test_layout_and_invalidation() {
        let mut stream = RecordStream::new(None);
        let a = stream.push(rec(0x0809, 16));
        let b = stream.push(rec(0x000A, 0));
        assert_eq!(stream.layout(100, 8224), 100 + 20 + 4);
        assert!(stream.is_layout_valid());
        assert_eq!(stream.get(b).and_then(|r| r.offset), Some(120));

        stream.insert_after(a, rec(0x0042, 2)).unwrap();
        assert!(!stream.is_layout_valid());
        stream.invalidate();
        assert_eq!(stream.get(b).and_then(|r| r.offset), None);
    }

    #[test]
    fn test_anchor_follows_removal() {
        let mut stream = RecordStream::new(None);
        let a = stream.push(rec(0x0809, 16));
        let b = stream.push(rec(0x0200, 14));
        stream.push(rec(0x000A, 0));
        stream.set_anchor(Block::Cells, Anchor::After(b));
        stream.set_anchor(Block::Drawing, Anchor::After(b));
        stream.remove(b);
        assert_eq!(stream.anchor(Block::Cells), Some(Anchor::After(a)));
        let blocks: Vec<Block> = stream.blocks_at(Anchor::After(a)).collect();
        assert_eq!(blocks, vec![Block::Cells, Block::Drawing]);
        stream.remove(a);
        assert_eq!(stream.anchor(Block::Drawing), Some(Anchor::Start));
    }

    #[test]
    fn test_insert_ahead_of_blocks() {
        let mut stream = RecordStream::new(None);
        let bof = stream.push(rec(0x0809, 16));
        stream.push(rec(0x000A, 0));
        stream.set_anchor(Block::SharedStrings, Anchor::After(bof));
        let sheet = stream.insert_ahead_of_blocks(bof, rec(0x0085, 12)).unwrap();
        assert_eq!(stream.position(sheet), Some(1));
        assert_eq!(stream.anchor(Block::SharedStrings), Some(Anchor::After(sheet)));
    }
}

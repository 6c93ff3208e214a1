//! BIFF record framing for XLS streams
//!
//! Each BIFF record consists of:
//! - Record type (2 bytes) - identifies the record
//! - Record length (2 bytes) - length of data in bytes
//! - Record data (variable length, at most 8224 bytes)
//!
//! Logical records longer than the physical limit continue in `CONTINUE`
//! (0x003C) records. The reader folds those into the owning record so that
//! every [`RawRecord`] is one logical record with its fragments kept apart.
//!
//! Typed records implement [`BiffRecord`]: parsing is an explicit step from
//! the raw payload, rendering is an explicit step back to bytes.

use crate::common::binary;
use crate::xls::consts::{CONTINUE, MAX_RECORD_DATA};
use crate::xls::error::{Diagnostic, XlsError, XlsResult};

pub mod cells;
pub mod drawing;
pub mod sheet;

pub use cells::{BoolErr, CellBody, FormulaCached, FormulaCompanion};
pub use drawing::{Obj, Txo, TxoRun, obj_type};
pub use sheet::{Bof, BoundSheet, ColInfo, ColInfoFlags, Dimensions, RefRange, RowFlags, RowRecord};

/// Index of a worksheet within its workbook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SheetId(pub u16);

/// Stable handle of a record inside its [`RecordStream`](crate::xls::stream::RecordStream).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId(pub u32);

/// BIFF record header (4 bytes: type + length)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub record_type: u16,
    pub data_len: u16,
}

impl RecordHeader {
    /// Parse a record header at `offset`.
    pub fn parse(data: &[u8], offset: usize) -> XlsResult<Self> {
        Ok(RecordHeader {
            record_type: binary::read_u16_le(data, offset)?,
            data_len: binary::read_u16_le(data, offset + 2)?,
        })
    }

    #[inline]
    pub fn write(&self, out: &mut Vec<u8>) {
        binary::push_u16_le(out, self.record_type);
        binary::push_u16_le(out, self.data_len);
    }
}

/// A logical record: opcode, owned payload and any continuation fragments.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    /// Record type
    pub opcode: u16,
    /// Payload of the first physical record
    pub payload: Vec<u8>,
    /// Payloads of the `CONTINUE` records that follow it
    pub continues: Vec<Vec<u8>>,
    /// Byte position of the header in the enclosing stream, valid only
    /// right after a layout pass
    pub offset: Option<u32>,
    /// Owning worksheet; `None` for workbook-global records
    pub sheet: Option<SheetId>,
}

impl RawRecord {
    pub fn new(opcode: u16, payload: Vec<u8>) -> Self {
        RawRecord {
            opcode,
            payload,
            continues: Vec::new(),
            offset: None,
            sheet: None,
        }
    }

    /// Build a record whose payload already arrives split into fragments.
    pub fn with_fragments(opcode: u16, mut fragments: Vec<Vec<u8>>) -> Self {
        let payload = if fragments.is_empty() {
            Vec::new()
        } else {
            fragments.remove(0)
        };
        RawRecord {
            opcode,
            payload,
            continues: fragments,
            offset: None,
            sheet: None,
        }
    }

    /// Payload length of the first physical record.
    #[inline]
    pub fn length(&self) -> usize {
        self.payload.len()
    }

    /// Payload followed by every continuation, as one buffer.
    pub fn joined(&self) -> Vec<u8> {
        let mut out = self.payload.clone();
        for fragment in &self.continues {
            out.extend_from_slice(fragment);
        }
        out
    }

    /// All fragments in order, the payload first.
    pub fn fragments(&self) -> impl Iterator<Item = &[u8]> {
        std::iter::once(self.payload.as_slice()).chain(self.continues.iter().map(Vec::as_slice))
    }

    /// Replace the payload, dropping continuations and the stale offset.
    pub fn set_payload(&mut self, payload: Vec<u8>) {
        self.payload = payload;
        self.continues.clear();
        self.offset = None;
    }

    /// Serialized size in bytes once written with `max_record_size`.
    pub fn byte_len(&self, max_record_size: usize) -> usize {
        self.physical_payloads(max_record_size)
            .map(|chunk| 4 + chunk.len())
            .sum()
    }

    /// Write header + payload, and one `CONTINUE` per fragment.
    ///
    /// Fragments larger than `max_record_size` are cut into plain
    /// `CONTINUE` chunks; callers that need boundary rules (strings) build
    /// their fragments with [`ContinueWriter`](crate::xls::continuation::ContinueWriter).
    pub fn write_to(&self, out: &mut Vec<u8>, max_record_size: usize) {
        for (i, chunk) in self.physical_payloads(max_record_size).enumerate() {
            let record_type = if i == 0 { self.opcode } else { CONTINUE };
            RecordHeader {
                record_type,
                data_len: chunk.len() as u16,
            }
            .write(out);
            out.extend_from_slice(chunk);
        }
    }

    fn physical_payloads(&self, max_record_size: usize) -> impl Iterator<Item = &[u8]> {
        let max = max_record_size.clamp(1, MAX_RECORD_DATA);
        self.fragments().flat_map(move |fragment| {
            let empty: &[u8] = &[];
            let chunks: Vec<&[u8]> = if fragment.is_empty() {
                vec![empty]
            } else {
                fragment.chunks(max).collect()
            };
            chunks
        })
    }
}

/// A typed record with an explicit parse/render pair.
///
/// `render(parse(p)) == p` holds for any payload `p` produced by `render`.
pub trait BiffRecord: Sized {
    /// Record type
    const OPCODE: u16;

    /// Materialize the structured fields from a payload.
    fn parse(payload: &[u8]) -> XlsResult<Self>;

    /// Append the payload bytes for the current field state.
    fn write_payload(&self, out: &mut Vec<u8>);

    /// Parse a raw record, checking its opcode.
    fn from_raw(raw: &RawRecord) -> XlsResult<Self> {
        if raw.opcode != Self::OPCODE {
            return Err(XlsError::invalid(
                raw.opcode,
                format!("expected record 0x{:04X}", Self::OPCODE),
            ));
        }
        Self::parse(&raw.payload)
    }

    /// Regenerate a raw record from the current field state.
    fn render(&self) -> RawRecord {
        let mut payload = Vec::new();
        self.write_payload(&mut payload);
        RawRecord::new(Self::OPCODE, payload)
    }
}

/// Fail with `Malformed` unless `data` holds at least `min` bytes.
#[inline]
pub(crate) fn require_len(record_type: u16, data: &[u8], min: usize) -> XlsResult<()> {
    if data.len() < min {
        return Err(XlsError::malformed(
            record_type,
            format!("payload is {} bytes, at least {} required", data.len(), min),
        ));
    }
    Ok(())
}

/// Split a byte stream into logical records.
///
/// Fails only when the stream cannot hold a single record header. A header
/// that declares more bytes than remain is truncated to what is there and
/// reported as a diagnostic; reading stops at that point.
pub fn read_records(data: &[u8], diagnostics: &mut Vec<Diagnostic>) -> XlsResult<Vec<RawRecord>> {
    if data.len() < 4 {
        return Err(XlsError::Unparseable(format!(
            "stream of {} bytes cannot hold a record header",
            data.len()
        )));
    }

    let mut records: Vec<RawRecord> = Vec::new();
    let mut pos = 0usize;

    while pos + 4 <= data.len() {
        let header = RecordHeader::parse(data, pos)?;
        let start = pos + 4;
        let declared_end = start + header.data_len as usize;
        let end = declared_end.min(data.len());
        if declared_end > data.len() {
            diagnostics.push(Diagnostic::warn(
                header.record_type,
                format!(
                    "declared length {} exceeds the {} bytes left in the stream",
                    header.data_len,
                    data.len() - start
                ),
            ));
        }
        let payload = data[start..end].to_vec();

        match records.last_mut() {
            Some(last) if header.record_type == CONTINUE => last.continues.push(payload),
            _ => {
                let mut record = RawRecord::new(header.record_type, payload);
                record.offset = Some(pos as u32);
                records.push(record);
            },
        }

        pos = end;
        if declared_end > data.len() {
            break;
        }
    }

    if pos < data.len() {
        diagnostics.push(Diagnostic::warn(
            0,
            format!("{} trailing bytes after the last record", data.len() - pos),
        ));
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn physical(opcode: u16, payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        RecordHeader {
            record_type: opcode,
            data_len: payload.len() as u16,
        }
        .write(&mut out);
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn test_read_folds_continue() {
        let mut stream = physical(0x00FC, &[1, 2, 3]);
        stream.extend(physical(CONTINUE, &[4, 5]));
        stream.extend(physical(0x000A, &[]));

        let mut diags = Vec::new();
        let records = read_records(&stream, &mut diags).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].payload, vec![1, 2, 3]);
        assert_eq!(records[0].continues, vec![vec![4, 5]]);
        assert_eq!(records[0].joined(), vec![1, 2, 3, 4, 5]);
        assert_eq!(records[1].offset, Some(13));
        assert!(diags.is_empty());
    }

    #[test]
    fn test_truncated_record_is_recovered() {
        let mut stream = physical(0x0809, &[0; 4]);
        stream.extend_from_slice(&[0x03, 0x02, 0x20, 0x00, 0xAA]);

        let mut diags = Vec::new();
        let records = read_records(&stream, &mut diags).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].payload, vec![0xAA]);
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].record_type, 0x0203);
    }

    #[test]
    fn test_unparseable_stream() {
        let mut diags = Vec::new();
        assert!(matches!(
            read_records(&[0x09, 0x08], &mut diags),
            Err(XlsError::Unparseable(_))
        ));
    }

    #[test]
    fn test_write_splits_oversized_payload() {
        let record = RawRecord::new(0x00EC, vec![7u8; 10]);
        let mut out = Vec::new();
        record.write_to(&mut out, 4);
        // 3 physical records: 4 + 4 + 2 bytes
        assert_eq!(out.len(), 3 * 4 + 10);
        assert_eq!(record.byte_len(4), out.len());
        assert_eq!(&out[8..10], &CONTINUE.to_le_bytes());

        let mut diags = Vec::new();
        let back = read_records(&out, &mut diags).unwrap();
        assert_eq!(back.len(), 1);
        assert_eq!(back[0].joined(), vec![7u8; 10]);
    }

    #[test]
    fn test_empty_payload_still_written() {
        let record = RawRecord::new(0x000A, Vec::new());
        let mut out = Vec::new();
        record.write_to(&mut out, MAX_RECORD_DATA);
        assert_eq!(out, vec![0x0A, 0x00, 0x00, 0x00]);
    }
}

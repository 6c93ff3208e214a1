//! Records that accompany drawing objects in a worksheet substream.
//!
//! Every shape stored in an `MSODRAWING` record is followed by an `OBJ`
//! record (common object data). A text box additionally owns a `TXO` record
//! whose text and formatting runs live in trailing `CONTINUE` records.

use crate::common::binary::{self, push_u16_le};
use crate::xls::consts::{MAX_RECORD_DATA, OBJ, TXO};
use crate::xls::error::{XlsError, XlsResult};
use crate::xls::records::{BiffRecord, RawRecord, require_len};

/// Object types of the `ftCmo` sub-record ([MS-XLS] 2.5.69)
pub mod obj_type {
    pub const GROUP: u16 = 0x0000;
    pub const LINE: u16 = 0x0001;
    pub const RECTANGLE: u16 = 0x0002;
    pub const OVAL: u16 = 0x0003;
    pub const TEXT: u16 = 0x0006;
    pub const PICTURE: u16 = 0x0008;
    pub const COMMENT: u16 = 0x0019;
}

const FT_CMO: u16 = 0x0015;
const FT_CMO_LEN: u16 = 0x0012;

/// `OBJ` record: the `ftCmo` common data followed by the remaining
/// sub-records, which are kept as bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Obj {
    pub object_type: u16,
    /// Object id; equals the low bits of the owning shape id
    pub object_id: u16,
    pub flags: u16,
    reserved: [u8; 12],
    /// Sub-records after `ftCmo`, including the closing `ftEnd`
    pub tail: Vec<u8>,
}

impl Obj {
    /// Locked, printable object with only `ftCmo` and `ftEnd`.
    pub fn new(object_type: u16, object_id: u16) -> Self {
        Obj {
            object_type,
            object_id,
            flags: 0x6011,
            reserved: [0; 12],
            tail: vec![0; 4],
        }
    }
}

impl BiffRecord for Obj {
    const OPCODE: u16 = OBJ;

    fn parse(payload: &[u8]) -> XlsResult<Self> {
        require_len(OBJ, payload, 22)?;
        let ft = binary::read_u16_le(payload, 0)?;
        if ft != FT_CMO {
            return Err(XlsError::malformed(
                OBJ,
                format!("first sub-record is 0x{ft:04X}, expected ftCmo"),
            ));
        }
        let mut reserved = [0u8; 12];
        reserved.copy_from_slice(&payload[10..22]);
        Ok(Obj {
            object_type: binary::read_u16_le(payload, 4)?,
            object_id: binary::read_u16_le(payload, 6)?,
            flags: binary::read_u16_le(payload, 8)?,
            reserved,
            tail: payload[22..].to_vec(),
        })
    }

    fn write_payload(&self, out: &mut Vec<u8>) {
        push_u16_le(out, FT_CMO);
        push_u16_le(out, FT_CMO_LEN);
        push_u16_le(out, self.object_type);
        push_u16_le(out, self.object_id);
        push_u16_le(out, self.flags);
        out.extend_from_slice(&self.reserved);
        out.extend_from_slice(&self.tail);
    }
}

/// One `TXO` formatting run: font index from `char_index` on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxoRun {
    pub char_index: u16,
    pub font: u16,
}

/// `TXO` text object record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Txo {
    /// Alignment and lock bits
    pub options: u16,
    pub rotation: u16,
    pub text: Vec<u16>,
    /// Formatting runs, without the closing run at `text.len()`
    pub runs: Vec<TxoRun>,
    reserved: [u8; 6],
}

impl Txo {
    const FIXED: usize = 18;

    /// Left/top aligned text using font 0.
    pub fn new(text: &str) -> Self {
        Txo {
            options: 0x0212,
            rotation: 0,
            text: text.encode_utf16().collect(),
            runs: vec![TxoRun {
                char_index: 0,
                font: 0,
            }],
            reserved: [0; 6],
        }
    }

    pub fn text(&self) -> String {
        String::from_utf16_lossy(&self.text)
    }

    /// Parse the fixed part from the payload and text/runs from the
    /// continuations.
    pub fn parse(raw: &RawRecord) -> XlsResult<Self> {
        if raw.opcode != TXO {
            return Err(XlsError::invalid(raw.opcode, "expected TXO"));
        }
        let payload = &raw.payload;
        require_len(TXO, payload, 14)?;
        let options = binary::read_u16_le(payload, 0)?;
        let rotation = binary::read_u16_le(payload, 2)?;
        let mut reserved = [0u8; 6];
        reserved.copy_from_slice(&payload[4..10]);
        let cch = binary::read_u16_le(payload, 10)? as usize;
        let cb_runs = binary::read_u16_le(payload, 12)? as usize;

        let mut fragments = raw.continues.iter();
        let mut text = Vec::with_capacity(cch);
        while text.len() < cch {
            let Some(fragment) = fragments.next() else {
                return Err(XlsError::malformed(TXO, "text continuation missing"));
            };
            let wide = binary::read_u8(fragment, 0)? & 0x01 != 0;
            let body = &fragment[1..];
            let wanted = cch - text.len();
            if wide {
                let units = binary::utf16le_units(body);
                text.extend(units.into_iter().take(wanted));
            } else {
                text.extend(body.iter().take(wanted).map(|&b| u16::from(b)));
            }
        }

        let run_bytes: Vec<u8> = fragments.flat_map(|f| f.iter().copied()).collect();
        let run_count = (cb_runs.min(run_bytes.len()) / 8).saturating_sub(1);
        let mut runs = Vec::with_capacity(run_count);
        for i in 0..run_count {
            runs.push(TxoRun {
                char_index: binary::read_u16_le(&run_bytes, i * 8)?,
                font: binary::read_u16_le(&run_bytes, i * 8 + 2)?,
            });
        }

        Ok(Txo {
            options,
            rotation,
            text,
            runs,
            reserved,
        })
    }

    /// Render the fixed part plus the text and run continuations.
    pub fn render(&self) -> RawRecord {
        let run_count = if self.text.is_empty() { 0 } else { self.runs.len() + 1 };
        let mut payload = Vec::with_capacity(Self::FIXED);
        push_u16_le(&mut payload, self.options);
        push_u16_le(&mut payload, self.rotation);
        payload.extend_from_slice(&self.reserved);
        push_u16_le(&mut payload, self.text.len() as u16);
        push_u16_le(&mut payload, (run_count * 8) as u16);
        payload.extend_from_slice(&[0; 4]);

        let mut record = RawRecord::new(TXO, payload);
        if self.text.is_empty() {
            return record;
        }

        let wide = self.text.iter().any(|&unit| unit > 0xFF);
        let per_fragment = if wide {
            (MAX_RECORD_DATA - 1) / 2
        } else {
            MAX_RECORD_DATA - 1
        };
        for chunk in self.text.chunks(per_fragment) {
            let mut fragment = vec![u8::from(wide)];
            for &unit in chunk {
                if wide {
                    push_u16_le(&mut fragment, unit);
                } else {
                    fragment.push(unit as u8);
                }
            }
            record.continues.push(fragment);
        }

        let mut runs = Vec::with_capacity(run_count * 8);
        let closing = TxoRun {
            char_index: self.text.len() as u16,
            font: 0,
        };
        for run in self.runs.iter().chain(std::iter::once(&closing)) {
            push_u16_le(&mut runs, run.char_index);
            push_u16_le(&mut runs, run.font);
            runs.extend_from_slice(&[0; 4]);
        }
        record.continues.push(runs);
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_obj_roundtrip() {
        let obj = Obj::new(obj_type::TEXT, 3);
        let raw = obj.render();
        assert_eq!(raw.payload.len(), 26);
        assert_eq!(Obj::from_raw(&raw).unwrap(), obj);
    }

    #[test]
    fn test_obj_requires_cmo() {
        let mut payload = Obj::new(obj_type::PICTURE, 1).render().payload;
        payload[0] = 0x0D;
        assert!(matches!(Obj::parse(&payload), Err(XlsError::Malformed { .. })));
        assert!(Obj::parse(&[0x15, 0x00]).is_err());
    }

    #[test]
    fn test_txo_roundtrip() {
        let txo = Txo::new("Note text");
        let raw = txo.render();
        assert_eq!(raw.payload.len(), 18);
        assert_eq!(raw.continues.len(), 2);
        assert_eq!(raw.continues[0][0], 0x00);
        assert_eq!(raw.continues[1].len(), 16);

        let back = Txo::parse(&raw).unwrap();
        assert_eq!(back, txo);
        assert_eq!(back.text(), "Note text");
    }

    #[test]
    fn test_txo_wide_text() {
        let txo = Txo::new("メモ");
        let raw = txo.render();
        assert_eq!(raw.continues[0], vec![0x01, 0xE1, 0x30, 0xE2, 0x30]);
        assert_eq!(Txo::parse(&raw).unwrap().text(), "メモ");
    }

    #[test]
    fn test_txo_missing_text_is_malformed() {
        let mut raw = Txo::new("abc").render();
        raw.continues.clear();
        assert!(Txo::parse(&raw).is_err());
    }
}

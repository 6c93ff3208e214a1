//! Cell records: parse and render of every opcode filed in the cell index.
//!
//! A cell record body is opcode-specific. Row, column and XF index are the
//! first six bytes of every single-cell record; the multi-cell runs (`MULRK`,
//! `MULBLANK`) carry one XF per column and a trailing last-column field.

use super::{RawRecord, RefRange, require_len};
use crate::common::binary::{self, push_f64_le, push_u16_le, push_u32_le};
use crate::xls::consts;
use crate::xls::error::{Diagnostic, XlsError, XlsResult};
use crate::xls::strings::XlUnicodeString;

/// BOOLERR payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolErr {
    Bool(bool),
    Error(u8),
}

/// Cached result stored in a FORMULA record
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FormulaCached {
    Number(f64),
    /// The result is a string held by the following STRING record
    String,
    Bool(bool),
    Error(u8),
    /// Empty string result
    Empty,
}

impl FormulaCached {
    fn parse(data: &[u8]) -> XlsResult<Self> {
        require_len(consts::FORMULA, data, 8)?;
        if data[6] != 0xFF || data[7] != 0xFF {
            return Ok(FormulaCached::Number(binary::read_f64_le(data, 0)?));
        }
        Ok(match data[0] {
            0x00 => FormulaCached::String,
            0x01 => FormulaCached::Bool(data[2] != 0),
            0x02 => FormulaCached::Error(data[2]),
            0x03 => FormulaCached::Empty,
            other => {
                return Err(XlsError::malformed(
                    consts::FORMULA,
                    format!("unknown cached result type {other}"),
                ));
            },
        })
    }

    fn write(&self, out: &mut Vec<u8>) {
        let (kind, value) = match *self {
            FormulaCached::Number(n) => {
                push_f64_le(out, n);
                return;
            },
            FormulaCached::String => (0x00, 0),
            FormulaCached::Bool(b) => (0x01, u8::from(b)),
            FormulaCached::Error(e) => (0x02, e),
            FormulaCached::Empty => (0x03, 0),
        };
        out.extend_from_slice(&[kind, 0, value, 0, 0, 0, 0xFF, 0xFF]);
    }
}

/// Records that travel with a FORMULA record and follow it in the stream.
#[derive(Debug, Clone, PartialEq)]
pub enum FormulaCompanion {
    /// SHRFMLA: formula shared by a rectangular range
    SharedFormula(RefRange),
    /// ARRAY: array formula over a range
    Array(RefRange),
    /// STRING: cached string result
    StringResult(XlUnicodeString),
    /// TABLE, or a companion that could not be read, kept as is
    Other(RawRecord),
}

impl FormulaCompanion {
    /// Classify a record that directly follows a FORMULA record.
    ///
    /// Returns `None` when the record is not a formula companion.
    pub fn from_raw(raw: &RawRecord) -> XlsResult<Option<Self>> {
        Ok(Some(match raw.opcode {
            consts::SHRFMLA => FormulaCompanion::SharedFormula(RefRange::parse(raw.opcode, &raw.joined())?),
            consts::ARRAY => FormulaCompanion::Array(RefRange::parse(raw.opcode, &raw.joined())?),
            consts::STRING => {
                FormulaCompanion::StringResult(XlUnicodeString::parse_exact(&raw.joined())?)
            },
            0x0236 => FormulaCompanion::Other(raw.clone()),
            _ => return Ok(None),
        }))
    }

    pub fn render(&self) -> RawRecord {
        match self {
            FormulaCompanion::SharedFormula(range) | FormulaCompanion::Array(range) => {
                let mut payload = Vec::new();
                range.write_payload(&mut payload);
                RawRecord::new(range.opcode, payload)
            },
            FormulaCompanion::StringResult(s) => RawRecord::new(consts::STRING, s.to_bytes()),
            FormulaCompanion::Other(raw) => raw.clone(),
        }
    }

    /// Row/column range carried by the companion, if any.
    pub fn range_mut(&mut self) -> Option<&mut RefRange> {
        match self {
            FormulaCompanion::SharedFormula(range) | FormulaCompanion::Array(range) => Some(range),
            _ => None,
        }
    }
}

/// Opcode-specific body of a cell record.
#[derive(Debug, Clone, PartialEq)]
pub enum CellBody {
    Blank,
    Number(f64),
    /// RK-encoded number (raw 32-bit RK value)
    Rk(u32),
    /// Index into the shared string table
    LabelSst(u32),
    /// Inline string (legacy LABEL record)
    Label(XlUnicodeString),
    BoolErr(BoolErr),
    Formula {
        cached: FormulaCached,
        options: u16,
        chn: u32,
        tokens: Vec<u8>,
        /// Bytes after the token array (`rgcb`)
        extra: Vec<u8>,
        companions: Vec<FormulaCompanion>,
    },
    /// Run of RK numbers; entry `i` is column `first + i`
    MulRk(Vec<(u16, u32)>),
    /// Run of blanks; entry `i` is the XF of column `first + i`
    MulBlank(Vec<u16>),
}

impl CellBody {
    /// Record type written for this body.
    pub fn opcode(&self) -> u16 {
        match self {
            CellBody::Blank => consts::BLANK,
            CellBody::Number(_) => consts::NUMBER,
            CellBody::Rk(_) => consts::RK,
            CellBody::LabelSst(_) => consts::LABELSST,
            CellBody::Label(_) => consts::LABEL,
            CellBody::BoolErr(_) => consts::BOOLERR,
            CellBody::Formula { .. } => consts::FORMULA,
            CellBody::MulRk(_) => consts::MULRK,
            CellBody::MulBlank(_) => consts::MULBLANK,
        }
    }

    /// Whether this body covers a column range rather than one cell.
    #[inline]
    pub fn is_run(&self) -> bool {
        matches!(self, CellBody::MulRk(_) | CellBody::MulBlank(_))
    }

    /// Number of columns covered.
    pub fn width(&self) -> u16 {
        match self {
            CellBody::MulRk(entries) => entries.len() as u16,
            CellBody::MulBlank(xfs) => xfs.len() as u16,
            _ => 1,
        }
    }
}

/// A parsed cell record before it is filed in the index.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedCell {
    pub row: u32,
    pub col: u16,
    /// XF index; for runs, the XF of the first column
    pub xf: u16,
    pub body: CellBody,
}

/// Parse any cell record.
///
/// A run whose trailing last-column field disagrees with the number of
/// entries actually present is recovered from the entry count, with a
/// diagnostic.
pub fn parse_cell(raw: &RawRecord, diagnostics: &mut Vec<Diagnostic>) -> XlsResult<ParsedCell> {
    let opcode = raw.opcode;
    let joined;
    let data: &[u8] = if raw.continues.is_empty() {
        &raw.payload
    } else {
        joined = raw.joined();
        &joined
    };

    require_len(opcode, data, 6)?;
    let row = binary::read_u16_le(data, 0)? as u32;
    let col = binary::read_u16_le(data, 2)?;

    if opcode == consts::MULRK || opcode == consts::MULBLANK {
        let entry = if opcode == consts::MULRK { 6 } else { 2 };
        require_len(opcode, data, 4 + entry + 2)?;
        let count = (data.len() - 6) / entry;
        let stray = (data.len() - 6) % entry;
        if stray != 0 {
            diagnostics.push(Diagnostic::warn(
                opcode,
                format!("{stray} trailing bytes after {count} entries ignored"),
            ));
        }
        let declared_last = binary::read_u16_le(data, data.len() - 2)?;
        if declared_last as usize + 1 != col as usize + count {
            diagnostics.push(Diagnostic::warn(
                opcode,
                format!(
                    "last column {} disagrees with {} entries from column {}",
                    declared_last, count, col
                ),
            ));
        }
        let body = if opcode == consts::MULRK {
            let mut entries = Vec::with_capacity(count);
            for i in 0..count {
                let at = 4 + i * 6;
                entries.push((binary::read_u16_le(data, at)?, binary::read_u32_le(data, at + 2)?));
            }
            CellBody::MulRk(entries)
        } else {
            let mut xfs = Vec::with_capacity(count);
            for i in 0..count {
                xfs.push(binary::read_u16_le(data, 4 + i * 2)?);
            }
            CellBody::MulBlank(xfs)
        };
        let xf = match &body {
            CellBody::MulRk(entries) => entries[0].0,
            CellBody::MulBlank(xfs) => xfs[0],
            _ => 0,
        };
        return Ok(ParsedCell { row, col, xf, body });
    }

    let xf = binary::read_u16_le(data, 4)?;
    let body = match opcode {
        consts::BLANK => CellBody::Blank,
        consts::NUMBER => {
            require_len(opcode, data, 14)?;
            CellBody::Number(binary::read_f64_le(data, 6)?)
        },
        consts::RK => {
            require_len(opcode, data, 10)?;
            CellBody::Rk(binary::read_u32_le(data, 6)?)
        },
        consts::LABELSST => {
            require_len(opcode, data, 10)?;
            CellBody::LabelSst(binary::read_u32_le(data, 6)?)
        },
        consts::LABEL => {
            require_len(opcode, data, 9)?;
            CellBody::Label(XlUnicodeString::parse_exact(&data[6..])?)
        },
        consts::BOOLERR => {
            require_len(opcode, data, 8)?;
            CellBody::BoolErr(if data[7] == 0 {
                BoolErr::Bool(data[6] != 0)
            } else {
                BoolErr::Error(data[6])
            })
        },
        consts::FORMULA => {
            require_len(opcode, data, 22)?;
            let cce = binary::read_u16_le(data, 20)? as usize;
            let end = (22 + cce).min(data.len());
            if 22 + cce > data.len() {
                diagnostics.push(Diagnostic::warn(
                    opcode,
                    format!("token length {} exceeds the {} bytes present", cce, data.len() - 22),
                ));
            }
            CellBody::Formula {
                cached: FormulaCached::parse(&data[6..14])?,
                options: binary::read_u16_le(data, 14)?,
                chn: binary::read_u32_le(data, 16)?,
                tokens: data[22..end].to_vec(),
                extra: data[end..].to_vec(),
                companions: Vec::new(),
            }
        },
        other => {
            return Err(XlsError::invalid(other, "not a cell record"));
        },
    };

    Ok(ParsedCell { row, col, xf, body })
}

/// Render a cell record (companions are rendered separately).
pub fn render_cell(row: u32, col: u16, xf: u16, body: &CellBody) -> RawRecord {
    let mut out = Vec::with_capacity(16);
    push_u16_le(&mut out, row as u16);
    push_u16_le(&mut out, col);

    match body {
        CellBody::MulRk(entries) => {
            for (entry_xf, rk) in entries {
                push_u16_le(&mut out, *entry_xf);
                push_u32_le(&mut out, *rk);
            }
            push_u16_le(&mut out, (col + entries.len() as u16).saturating_sub(1));
        },
        CellBody::MulBlank(xfs) => {
            for entry_xf in xfs {
                push_u16_le(&mut out, *entry_xf);
            }
            push_u16_le(&mut out, (col + xfs.len() as u16).saturating_sub(1));
        },
        _ => {
            push_u16_le(&mut out, xf);
            match body {
                CellBody::Blank | CellBody::MulRk(_) | CellBody::MulBlank(_) => {},
                CellBody::Number(n) => push_f64_le(&mut out, *n),
                CellBody::Rk(rk) => push_u32_le(&mut out, *rk),
                CellBody::LabelSst(idx) => push_u32_le(&mut out, *idx),
                CellBody::Label(s) => out.extend_from_slice(&s.to_bytes()),
                CellBody::BoolErr(BoolErr::Bool(b)) => out.extend_from_slice(&[u8::from(*b), 0]),
                CellBody::BoolErr(BoolErr::Error(e)) => out.extend_from_slice(&[*e, 1]),
                CellBody::Formula {
                    cached,
                    options,
                    chn,
                    tokens,
                    extra,
                    ..
                } => {
                    cached.write(&mut out);
                    push_u16_le(&mut out, *options);
                    push_u32_le(&mut out, *chn);
                    push_u16_le(&mut out, tokens.len() as u16);
                    out.extend_from_slice(tokens);
                    out.extend_from_slice(extra);
                },
            }
        },
    }

    RawRecord::new(body.opcode(), out)
}

/// Decode an RK value.
///
/// RK values are compressed numbers: bit 0 selects a division by 100,
/// bit 1 selects a 30-bit signed integer over the top 30 bits of an IEEE
/// double.
pub fn rk_to_f64(rk: u32) -> f64 {
    let value = if rk & 0x02 != 0 {
        ((rk as i32) >> 2) as f64
    } else {
        f64::from_bits(u64::from(rk & 0xFFFF_FFFC) << 32)
    };
    if rk & 0x01 != 0 { value / 100.0 } else { value }
}

/// Encode `value` as an RK number when that is lossless.
pub fn f64_to_rk(value: f64) -> Option<u32> {
    const INT_MIN: f64 = -(1i64 << 29) as f64;
    const INT_MAX: f64 = ((1i64 << 29) - 1) as f64;

    let as_int = |v: f64| -> Option<u32> {
        (v.fract() == 0.0 && (INT_MIN..=INT_MAX).contains(&v)).then(|| ((v as i32) << 2) as u32)
    };
    let as_float = |v: f64| -> Option<u32> {
        let bits = v.to_bits();
        (bits & 0x0000_0003_FFFF_FFFF == 0).then_some((bits >> 32) as u32)
    };

    if !value.is_finite() {
        return None;
    }
    if let Some(rk) = as_float(value) {
        return Some(rk);
    }
    if let Some(rk) = as_int(value) {
        return Some(rk | 0x02);
    }
    let scaled = value * 100.0;
    if let Some(rk) = as_int(scaled).filter(|&rk| rk_to_f64(rk | 0x03) == value) {
        return Some(rk | 0x03);
    }
    as_float(scaled)
        .filter(|&rk| rk_to_f64(rk | 0x01) == value)
        .map(|rk| rk | 0x01)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(row: u32, col: u16, xf: u16, body: CellBody) {
        let raw = render_cell(row, col, xf, &body);
        let mut diags = Vec::new();
        let parsed = parse_cell(&raw, &mut diags).unwrap();
        assert!(diags.is_empty());
        assert_eq!(parsed.row, row);
        assert_eq!(parsed.col, col);
        assert_eq!(parsed.xf, xf);
        assert_eq!(parsed.body, body);
        assert_eq!(render_cell(parsed.row, parsed.col, parsed.xf, &parsed.body), raw);
    }

    #[test]
    fn test_every_cell_opcode_roundtrips() {
        roundtrip(0, 0, 15, CellBody::Blank);
        roundtrip(3, 4, 16, CellBody::Number(3.25));
        roundtrip(9, 1, 15, CellBody::Rk(f64_to_rk(42.0).unwrap()));
        roundtrip(1, 1, 15, CellBody::LabelSst(7));
        roundtrip(2, 200, 15, CellBody::Label(XlUnicodeString::new("inline")));
        roundtrip(5, 5, 15, CellBody::BoolErr(BoolErr::Bool(true)));
        roundtrip(5, 6, 15, CellBody::BoolErr(BoolErr::Error(0x07)));
        roundtrip(
            8,
            2,
            15,
            CellBody::Formula {
                cached: FormulaCached::Number(12.5),
                options: 0x0002,
                chn: 0,
                tokens: vec![0x1E, 0x01, 0x00],
                extra: Vec::new(),
                companions: Vec::new(),
            },
        );
        roundtrip(
            8,
            3,
            15,
            CellBody::Formula {
                cached: FormulaCached::Bool(true),
                options: 0,
                chn: 0,
                tokens: vec![0x1D, 0x01],
                extra: vec![],
                companions: Vec::new(),
            },
        );
        roundtrip(3, 2, 21, CellBody::MulRk(vec![(21, 0x02), (22, 0x06), (21, 0x0A)]));
        roundtrip(4, 0, 15, CellBody::MulBlank(vec![15, 15, 16]));
    }

    #[test]
    fn test_short_payload_is_malformed() {
        let raw = RawRecord::new(consts::NUMBER, vec![0, 0, 0, 0, 15, 0, 1]);
        let mut diags = Vec::new();
        assert!(matches!(
            parse_cell(&raw, &mut diags),
            Err(XlsError::Malformed { .. })
        ));
    }

    #[test]
    fn test_run_with_wrong_last_column_is_recovered() {
        // MULBLANK row 1, first col 2, three XFs, last col claims 9
        let raw = RawRecord::new(
            consts::MULBLANK,
            vec![1, 0, 2, 0, 15, 0, 15, 0, 15, 0, 9, 0],
        );
        let mut diags = Vec::new();
        let parsed = parse_cell(&raw, &mut diags).unwrap();
        assert_eq!(parsed.body.width(), 3);
        assert_eq!(diags.len(), 1);
    }

    #[test]
    fn test_run_with_stray_bytes_is_reported() {
        let rk = f64_to_rk(1.0).unwrap().to_le_bytes();
        let mut payload = vec![0, 0, 0, 0];
        for _ in 0..2 {
            payload.extend_from_slice(&[15, 0]);
            payload.extend_from_slice(&rk);
        }
        payload.extend_from_slice(&[0xAA, 0xBB, 0xCC]);
        payload.extend_from_slice(&[1, 0]);
        let raw = RawRecord::new(consts::MULRK, payload);

        let mut diags = Vec::new();
        let parsed = parse_cell(&raw, &mut diags).unwrap();
        assert_eq!(parsed.body.width(), 2);
        assert_eq!(diags.len(), 1);
    }

    #[test]
    fn test_rk_encoding() {
        for value in [0.0, 1.0, -1.0, 42.0, 1.5, 0.01, 123.45, -7.25, 536_870_911.0] {
            let rk = f64_to_rk(value).unwrap_or_else(|| panic!("{value} should encode"));
            assert_eq!(rk_to_f64(rk), value, "rk {rk:#x}");
        }
        assert_eq!(f64_to_rk(0.1 + 0.2), None);
        assert_eq!(f64_to_rk(f64::NAN), None);
        assert_eq!(rk_to_f64(0x3FF0_0000), 1.0);
        assert_eq!(rk_to_f64((100 << 2) | 0x03), 1.0);
    }
}

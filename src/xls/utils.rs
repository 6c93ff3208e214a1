//! Cell addressing helpers

use crate::xls::consts::{MAX_COLUMNS, MAX_ROWS, MAX_STRING_CHARS};
use crate::xls::error::{XlsError, XlsResult};

/// Column letters for a 0-based column (0 = "A", 26 = "AA").
pub fn column_name(col: u16) -> String {
    let mut col = u32::from(col) + 1;
    let mut name = Vec::new();
    while col > 0 {
        col -= 1;
        name.push(b'A' + (col % 26) as u8);
        col /= 26;
    }
    name.reverse();
    String::from_utf8_lossy(&name).into_owned()
}

/// 0-based column for column letters, case-insensitive.
pub fn column_index(name: &str) -> Option<u16> {
    if name.is_empty() {
        return None;
    }
    let mut result: u32 = 0;
    for ch in name.chars() {
        let ch = ch.to_ascii_uppercase();
        if !ch.is_ascii_uppercase() {
            return None;
        }
        result = result * 26 + (ch as u32 - 'A' as u32) + 1;
        if result > MAX_COLUMNS {
            return None;
        }
    }
    Some((result - 1) as u16)
}

/// A1-style reference for a 0-based row and column.
pub fn cell_reference(row: u32, col: u16) -> String {
    format!("{}{}", column_name(col), row + 1)
}

/// Parse an A1-style reference into a 0-based (row, column).
///
/// Fails for malformed references and addresses outside the sheet.
pub fn parse_cell_reference(reference: &str) -> Option<(u32, u16)> {
    let split = reference.find(|c: char| c.is_ascii_digit())?;
    let (letters, digits) = reference.split_at(split);
    let col = column_index(letters)?;
    let row: u32 = digits.parse().ok()?;
    if row == 0 || row > MAX_ROWS {
        return None;
    }
    Some((row - 1, col))
}

/// Reject addresses outside the sheet with `InvalidRecord`.
pub fn check_address(record_type: u16, row: u32, col: u32) -> XlsResult<()> {
    if row >= MAX_ROWS {
        return Err(XlsError::invalid(
            record_type,
            format!("row {row} exceeds the last row {}", MAX_ROWS - 1),
        ));
    }
    if col >= MAX_COLUMNS {
        return Err(XlsError::invalid(
            record_type,
            format!("column {col} exceeds the last column {}", MAX_COLUMNS - 1),
        ));
    }
    Ok(())
}

/// Reject text longer than a string record can count with `InvalidRecord`.
pub fn check_text(record_type: u16, text: &str) -> XlsResult<()> {
    let units = text.encode_utf16().count();
    if units > MAX_STRING_CHARS {
        return Err(XlsError::invalid(
            record_type,
            format!("text of {units} characters exceeds {MAX_STRING_CHARS}"),
        ));
    }
    Ok(())
}

//! Collaborators the record model calls out to.
//!
//! Formula text and formula semantics, and the rewriting of references after
//! a shift, live outside this crate. The worksheet calls these traits at the
//! points where it needs them.

use crate::xls::error::XlsResult;
use crate::xls::records::{FormulaCached, SheetId};

/// Address a formula is being placed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormulaContext {
    pub sheet: SheetId,
    pub row: u32,
    pub col: u16,
}

/// Result of evaluating a formula.
#[derive(Debug, Clone, PartialEq)]
pub enum FormulaValue {
    Number(f64),
    Text(String),
    Bool(bool),
    Error(u8),
    Empty,
}

impl FormulaValue {
    /// Cached form written into the FORMULA record. Text goes to a STRING
    /// record that follows it.
    pub fn cached(&self) -> FormulaCached {
        match self {
            FormulaValue::Number(n) => FormulaCached::Number(*n),
            FormulaValue::Text(text) if text.is_empty() => FormulaCached::Empty,
            FormulaValue::Text(_) => FormulaCached::String,
            FormulaValue::Bool(b) => FormulaCached::Bool(*b),
            FormulaValue::Error(e) => FormulaCached::Error(*e),
            FormulaValue::Empty => FormulaCached::Empty,
        }
    }
}

/// Parses formula text into BIFF8 tokens and evaluates them.
pub trait FormulaEngine {
    /// Token bytes (`rgce`) for `text` placed at `context`.
    fn parse(&self, text: &str, context: &FormulaContext) -> XlsResult<Vec<u8>>;

    /// Evaluate tokens placed at `context`.
    fn evaluate(&self, tokens: &[u8], context: &FormulaContext) -> XlsResult<FormulaValue>;
}

/// Told about every physical shift so that references elsewhere in the
/// workbook can follow.
pub trait ReferenceTracker {
    /// Rows from `first_row` on moved by `delta` (negative for deletes).
    fn rows_shifted(&mut self, sheet: SheetId, first_row: u32, delta: i64);

    /// Columns from `first_col` on moved by `delta` (negative for deletes).
    fn cols_shifted(&mut self, sheet: SheetId, first_col: u16, delta: i64);
}

/// Tracker that ignores every notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopReferenceTracker;

impl ReferenceTracker for NoopReferenceTracker {
    fn rows_shifted(&mut self, _sheet: SheetId, _first_row: u32, _delta: i64) {}

    fn cols_shifted(&mut self, _sheet: SheetId, _first_col: u16, _delta: i64) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cached_forms() {
        assert_eq!(FormulaValue::Number(2.5).cached(), FormulaCached::Number(2.5));
        assert_eq!(FormulaValue::Text("x".into()).cached(), FormulaCached::String);
        assert_eq!(FormulaValue::Text(String::new()).cached(), FormulaCached::Empty);
        assert_eq!(FormulaValue::Error(0x07).cached(), FormulaCached::Error(0x07));
    }
}

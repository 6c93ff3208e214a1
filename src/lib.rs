//! biffedit - An editable record model for BIFF8 (.xls) workbook streams
//!
//! This library loads the workbook stream of a legacy Excel file into typed
//! records, lets callers edit cells, rows, columns, shared strings and
//! drawings in place, and writes a stream whose record order, lengths and
//! offsets are consistent again.
//!
//! # Features
//!
//! - **Record model**: every record round-trips byte for byte unless edited
//! - **Cell index**: cells addressable by row and by column, with multi-cell
//!   runs (`MULRK`, `MULBLANK`) split and truncated as cells are replaced
//! - **Row and column shifts**: insert and delete rows or columns, with
//!   shared formula ranges, column metadata and shape anchors following
//! - **Strings**: compressed/UTF-16 strings with rich-text runs and phonetic
//!   blocks, split across `CONTINUE` records at legal boundaries
//! - **Drawings**: OfficeArt (Escher) container lengths rebuilt after shapes
//!   are added, removed or re-anchored
//!
//! # Example
//!
//! ```
//! use biffedit::xls::{CellValue, LoadOptions, SaveOptions, Workbook};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut workbook = Workbook::new();
//! let sheet = workbook.add_sheet("Data")?;
//! workbook.add_value(sheet, 0, 0, CellValue::Number(1.5), 0)?;
//! workbook.add_value(sheet, 0, 1, CellValue::Text("total".into()), 0)?;
//!
//! // Two rows above the data
//! workbook.sheet_mut(sheet)?.insert_rows(0, 2)?;
//!
//! let bytes = workbook.to_bytes(SaveOptions::default())?;
//! let reloaded = Workbook::from_bytes(&bytes, LoadOptions::default())?;
//! assert_eq!(reloaded.sheet(0)?.cell_value(2, 0)?, CellValue::Number(1.5));
//! # Ok(())
//! # }
//! ```
//!
//! Formula text is parsed and evaluated by a caller-supplied
//! [`FormulaEngine`](xls::FormulaEngine); references elsewhere in the
//! workbook follow shifts through a [`ReferenceTracker`](xls::ReferenceTracker).

/// Format-agnostic binary helpers
pub mod common;

/// OfficeArt (Escher) drawing records
pub mod escher;

/// BIFF8 workbook record model
pub mod xls;

pub use xls::{LoadOptions, SaveOptions, Workbook, Worksheet, XlsError, XlsResult};

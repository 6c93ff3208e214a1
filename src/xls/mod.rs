//! BIFF8 (.xls) workbook streams as an editable record model
//!
//! A workbook stream is held as typed and raw records, grouped into the
//! globals substream and one substream per worksheet. Cells live in a
//! per-sheet index addressable by row and by column; rows, column metadata,
//! shared strings and drawings are kept in their own structures and spliced
//! back into the record order when the stream is written.
//!
//! Formula parsing and evaluation, and the rewriting of references after a
//! row or column shift, are delegated to the [`FormulaEngine`] and
//! [`ReferenceTracker`] traits.

/// Record type numbers and format limits
pub mod consts;

/// Error types for the record model
mod error;

/// BIFF record framing and typed records
pub mod records;

/// Variable-width Unicode strings
pub mod strings;

/// Writing and reading records split across `CONTINUE`
pub mod continuation;

/// Workbook shared string table
pub mod sst;

/// Cell address helpers
pub mod utils;

/// Cell records and values
mod cell;

/// Sheet cell index
mod index;

/// Row metadata
mod row;

/// Column metadata
mod colinfo;

/// Ordered record list of a substream
pub mod stream;

/// Sheet drawings and shape id allocation
pub mod drawing;

/// Worksheet aggregate
mod worksheet;

/// Workbook aggregate
mod workbook;

/// Formula engine and reference tracker interfaces
mod collab;

#[cfg(test)]
mod tests;

pub use cell::{CellId, CellRecord, CellValue};
pub use colinfo::ColumnInfoTable;
pub use collab::{FormulaContext, FormulaEngine, FormulaValue, NoopReferenceTracker, ReferenceTracker};
pub use drawing::{DrawingCounters, DrawingShape, NewShape, SheetDrawing};
pub use error::{Diagnostic, XlsError, XlsResult};
pub use index::CellIndex;
pub use records::{RawRecord, RecordId, SheetId};
pub use row::Row;
pub use sst::SharedStringTable;
pub use stream::{Anchor, Block, RecordStream};
pub use strings::XlUnicodeString;
pub use workbook::{LoadOptions, SaveOptions, Workbook};
pub use worksheet::Worksheet;

//! OfficeArt (Escher) drawing records.
//!
//! Escher is the drawing layer format shared by the Office binary formats.
//! In BIFF8 it travels inside `MSODRAWINGGROUP` (workbook) and `MSODRAWING`
//! (sheet) records. This module parses those payloads into an owned record
//! tree, rebuilds the tree's container lengths after edits, and builds the
//! records a new shape needs.
//!
//! # Modules
//!
//! - `types`: record types, shape types and shape flags
//! - `record`: the 8-byte record header
//! - `tree`: owned container/atom tree and its parser
//! - `length`: the container length engine
//! - `writer`: shape and drawing-group construction

pub mod length;
pub mod record;
pub mod tree;
pub mod types;
pub mod writer;

pub use length::{DrawingTotals, check_lengths, recompute, update_drawing_header};
pub use record::{EscherError, EscherHeader, EscherResult, HEADER_SIZE};
pub use tree::{EscherAtom, EscherContainer, EscherNode, forest_to_bytes, parse_forest};
pub use types::{EscherRecordType, ShapeFlags, property_id, shape_type};
pub use writer::{ClientAnchor, Dgg, FileIdCluster};

//! Error types for BIFF8 record handling

use thiserror::Error;

use crate::common::binary::BinaryError;
use crate::escher::EscherError;
use crate::xls::consts::MSODRAWING;

/// Result type alias for XLS operations
pub type XlsResult<T> = Result<T, XlsError>;

/// Errors surfaced by the record model, the cell index and the aggregates.
///
/// `NotFound` is the expected, recoverable outcome of a lookup; callers
/// branch on it (for example "create on first write"). `InvalidRecord` is
/// returned for rejected mutations and guarantees the model was left as it
/// was before the call.
#[derive(Debug, Error)]
pub enum XlsError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Cell, row, column range, record or sheet absent
    #[error("{0} not found")]
    NotFound(String),

    /// Value or address outside the format limits, or a rejected mutation
    #[error("Invalid record 0x{record_type:04X}: {message}")]
    InvalidRecord {
        /// Record type
        record_type: u16,
        /// Error description
        message: String,
    },

    /// Record payload shorter than its fixed header, or otherwise unreadable
    #[error("Malformed record 0x{record_type:04X}: {message}")]
    Malformed {
        /// Record type
        record_type: u16,
        /// Error description
        message: String,
    },

    /// Invalid data length
    #[error("Invalid length: expected {expected}, found {found}")]
    InvalidLength {
        /// Expected length
        expected: usize,
        /// Found length
        found: usize,
    },

    /// The stream cannot be split into records at all
    #[error("Unparseable stream: {0}")]
    Unparseable(String),

    /// Raised by the external formula engine
    #[error("Formula error: {0}")]
    Formula(String),
}

impl XlsError {
    /// Shorthand for a `NotFound` with a formatted subject.
    pub fn not_found(what: impl Into<String>) -> Self {
        XlsError::NotFound(what.into())
    }

    /// Shorthand for an `InvalidRecord`.
    pub fn invalid(record_type: u16, message: impl Into<String>) -> Self {
        XlsError::InvalidRecord {
            record_type,
            message: message.into(),
        }
    }

    /// Shorthand for a `Malformed` record.
    pub fn malformed(record_type: u16, message: impl Into<String>) -> Self {
        XlsError::Malformed {
            record_type,
            message: message.into(),
        }
    }

    /// Whether this is the recoverable lookup miss.
    pub fn is_not_found(&self) -> bool {
        matches!(self, XlsError::NotFound(_))
    }
}

impl From<BinaryError> for XlsError {
    fn from(err: BinaryError) -> Self {
        XlsError::Malformed {
            record_type: 0,
            message: err.to_string(),
        }
    }
}

impl From<EscherError> for XlsError {
    fn from(err: EscherError) -> Self {
        XlsError::Malformed {
            record_type: MSODRAWING,
            message: err.to_string(),
        }
    }
}

/// A recovered malformation, recorded while loading.
///
/// Every diagnostic is also emitted through `log::warn!`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// Opcode of the record being parsed when the problem was found
    pub record_type: u16,
    /// Human readable description
    pub message: String,
}

impl Diagnostic {
    pub(crate) fn warn(record_type: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        log::warn!("record 0x{record_type:04X}: {message}");
        Diagnostic {
            record_type,
            message,
        }
    }
}

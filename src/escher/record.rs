//! Escher record header.
//!
//! # Format
//!
//! Escher records have an 8-byte header:
//! - Bytes 0-1: Version (4 bits) | Instance (12 bits)
//! - Bytes 2-3: Record Type
//! - Bytes 4-7: Record Length (32-bit)

use thiserror::Error;
use zerocopy::byteorder::{LittleEndian, U16, U32};
use zerocopy::{FromBytes, IntoBytes};
use zerocopy_derive::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use super::types::EscherRecordType;

/// Size of an Escher record header in bytes.
pub const HEADER_SIZE: usize = 8;

/// Version nibble of container records.
pub const CONTAINER_VERSION: u8 = 0x0F;

/// Errors raised while decoding Escher records.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EscherError {
    #[error("not enough data for an Escher record header at offset {offset}")]
    TruncatedHeader { offset: usize },

    #[error("atom 0x{record_type:04X} at offset {offset} declares {declared} bytes, {available} available")]
    TruncatedAtom {
        record_type: u16,
        offset: usize,
        declared: u32,
        available: usize,
    },

    #[error("expected record 0x{expected:04X}, found 0x{found:04X}")]
    UnexpectedRecord { expected: u16, found: u16 },

    #[error("{0}")]
    Invalid(String),
}

pub type EscherResult<T> = Result<T, EscherError>;

/// On-disk header layout.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
struct RawHeader {
    ver_inst: U16<LittleEndian>,
    rec_type: U16<LittleEndian>,
    length: U32<LittleEndian>,
}

/// Decoded Escher record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EscherHeader {
    /// Version (4 bits)
    pub version: u8,
    /// Instance (12 bits)
    pub instance: u16,
    /// Raw record type
    pub record_type: u16,
    /// Declared length of the record data, excluding the header
    pub length: u32,
}

impl EscherHeader {
    pub const fn new(version: u8, instance: u16, record_type: u16, length: u32) -> Self {
        EscherHeader {
            version: version & 0x0F,
            instance: instance & 0x0FFF,
            record_type,
            length,
        }
    }

    /// Header of a container record; its length is filled in by the
    /// length engine.
    pub const fn container(record_type: u16, instance: u16) -> Self {
        Self::new(CONTAINER_VERSION, instance, record_type, 0)
    }

    /// Parse the header at `offset`.
    pub fn parse(data: &[u8], offset: usize) -> EscherResult<Self> {
        let bytes = data
            .get(offset..offset + HEADER_SIZE)
            .ok_or(EscherError::TruncatedHeader { offset })?;
        let raw = RawHeader::read_from_bytes(bytes)
            .map_err(|_| EscherError::TruncatedHeader { offset })?;
        let ver_inst = raw.ver_inst.get();
        Ok(EscherHeader {
            version: (ver_inst & 0x000F) as u8,
            instance: ver_inst >> 4,
            record_type: raw.rec_type.get(),
            length: raw.length.get(),
        })
    }

    #[inline]
    pub fn kind(&self) -> EscherRecordType {
        EscherRecordType::from(self.record_type)
    }

    /// Containers are identified by their version nibble.
    #[inline]
    pub fn is_container(&self) -> bool {
        self.version == CONTAINER_VERSION
    }

    pub fn write(&self, out: &mut Vec<u8>) {
        let raw = RawHeader {
            ver_inst: U16::new(u16::from(self.version & 0x0F) | ((self.instance & 0x0FFF) << 4)),
            rec_type: U16::new(self.record_type),
            length: U32::new(self.length),
        };
        out.extend_from_slice(raw.as_bytes());
    }
}

//! Format-agnostic helpers shared by the BIFF and Escher record layers.

/// Little-endian primitives and byte splice helpers
pub mod binary;

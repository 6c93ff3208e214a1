//! Shared String Table (`SST`) and its index (`EXTSST`).
//!
//! The SST holds every string referenced by `LABELSST` cells. It is one
//! logical record continued over as many `CONTINUE` records as needed;
//! strings are cut with the string split rules. `EXTSST` stores, for every
//! bucket of strings, the stream position of the bucket's first string and
//! is regenerated on every save.

use std::collections::HashMap;

use crate::common::binary::{push_u16_le, push_u32_le};
use crate::xls::consts::{EXTSST, SST};
use crate::xls::continuation::{ContinueWriter, FragmentReader};
use crate::xls::error::{Diagnostic, XlsResult};
use crate::xls::records::RawRecord;
use crate::xls::strings::XlUnicodeString;
use crate::xls::utils::check_text;

/// Minimum number of strings per `EXTSST` bucket
pub const MIN_BUCKET_SIZE: usize = 8;

/// Largest bucket count that keeps `EXTSST` inside one record
const MAX_BUCKETS: usize = 1024;

/// Workbook-wide string table.
#[derive(Debug, Clone, Default)]
pub struct SharedStringTable {
    strings: Vec<XlUnicodeString>,
    /// Plain (unformatted) strings by content
    lookup: HashMap<Vec<u16>, u32>,
    /// Total number of references from cells (`cstTotal`)
    total_refs: u32,
}

impl SharedStringTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse an `SST` record and its continuations.
    ///
    /// A string that cannot be read ends the table with a diagnostic; the
    /// strings read so far are kept.
    pub fn parse(record: &RawRecord, diagnostics: &mut Vec<Diagnostic>) -> XlsResult<Self> {
        let mut reader = FragmentReader::new(record);
        let total_refs = reader.read_u32()?;
        let unique = reader.read_u32()? as usize;

        let mut table = SharedStringTable {
            strings: Vec::with_capacity(unique.min(1 << 16)),
            lookup: HashMap::new(),
            total_refs,
        };
        for i in 0..unique {
            match reader.read_string() {
                Ok(string) => {
                    table.push(string);
                },
                Err(err) => {
                    diagnostics.push(Diagnostic::warn(
                        SST,
                        format!("string {i} of {unique} unreadable, table truncated: {err}"),
                    ));
                    break;
                },
            }
        }
        log::debug!("SST: {} unique strings, {} references", table.len(), total_refs);
        Ok(table)
    }

    fn push(&mut self, string: XlUnicodeString) -> u32 {
        let index = self.strings.len() as u32;
        if string.runs.is_empty() && string.ext.is_none() {
            self.lookup.entry(string.units().to_vec()).or_insert(index);
        }
        self.strings.push(string);
        index
    }

    /// Add a string, reusing an equal plain entry. Counts one reference.
    pub fn add(&mut self, string: XlUnicodeString) -> u32 {
        self.total_refs = self.total_refs.saturating_add(1);
        if string.runs.is_empty() && string.ext.is_none() {
            if let Some(&index) = self.lookup.get(string.units()) {
                return index;
            }
        }
        self.push(string)
    }

    /// Intern plain text. Text too long for a string record is rejected
    /// and the table is left unchanged.
    pub fn intern(&mut self, text: &str) -> XlsResult<u32> {
        check_text(SST, text)?;
        Ok(self.add(XlUnicodeString::new(text)))
    }

    pub fn get(&self, index: u32) -> Option<&XlUnicodeString> {
        self.strings.get(index as usize)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.strings.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    #[inline]
    pub fn total_refs(&self) -> u32 {
        self.total_refs
    }

    pub fn iter(&self) -> impl Iterator<Item = &XlUnicodeString> {
        self.strings.iter()
    }

    /// Strings per `EXTSST` bucket for the current table size.
    pub fn bucket_size(&self) -> usize {
        MIN_BUCKET_SIZE.max(self.strings.len().div_ceil(MAX_BUCKETS))
    }

    /// Render the `SST` record, remembering where each bucket starts.
    pub fn render(&self, max_record_size: usize) -> RenderedSst {
        let mut writer = ContinueWriter::new(max_record_size);
        let mut header = Vec::with_capacity(8);
        push_u32_le(&mut header, self.total_refs.max(self.strings.len() as u32));
        push_u32_le(&mut header, self.strings.len() as u32);
        writer.write_atomic(&header);

        let bucket_size = self.bucket_size();
        let mut bucket_starts = Vec::with_capacity(self.strings.len().div_ceil(bucket_size));
        for (i, string) in self.strings.iter().enumerate() {
            let placement = writer.write_string(string);
            if i % bucket_size == 0 {
                bucket_starts.push((placement.fragment, placement.offset));
            }
        }

        RenderedSst {
            record: writer.finish(SST),
            bucket_size,
            bucket_starts,
        }
    }
}

/// An `SST` record ready to be written, with the positions `EXTSST` needs.
#[derive(Debug, Clone)]
pub struct RenderedSst {
    pub record: RawRecord,
    bucket_size: usize,
    /// (fragment, offset) of the first string of each bucket
    bucket_starts: Vec<(usize, usize)>,
}

impl RenderedSst {
    /// Payload length of the matching `EXTSST` record.
    pub fn extsst_len(&self) -> usize {
        2 + 8 * self.bucket_starts.len()
    }

    /// Build `EXTSST` once the `SST` record's stream offset is known.
    pub fn extsst(&self, sst_offset: u32) -> RawRecord {
        let mut fragment_starts = Vec::with_capacity(1 + self.record.continues.len());
        let mut at = sst_offset;
        for fragment in self.record.fragments() {
            fragment_starts.push(at);
            at += 4 + fragment.len() as u32;
        }

        let mut payload = Vec::with_capacity(self.extsst_len());
        push_u16_le(&mut payload, self.bucket_size as u16);
        for &(fragment, offset) in &self.bucket_starts {
            let record_start = fragment_starts.get(fragment).copied().unwrap_or(at);
            let in_record = 4 + offset as u32;
            push_u32_le(&mut payload, record_start + in_record);
            push_u16_le(&mut payload, in_record as u16);
            push_u16_le(&mut payload, 0);
        }
        RawRecord::new(EXTSST, payload)
    }
}

//! Logical records spread over `CONTINUE` fragments.
//!
//! [`ContinueWriter`] cuts a logical record into physical payloads of at most
//! `max_record_size` bytes. Opaque blocks written with
//! [`write_atomic`](ContinueWriter::write_atomic) move to the next fragment
//! whole; strings are cut only where [`StringLayout::is_legal_split`]
//! allows, and a cut inside the character data is followed by the repeated
//! flags byte.
//!
//! [`FragmentReader`] is the inverse: it reads across fragment boundaries and
//! honours the repeated flags byte, so the character width may change from
//! one fragment to the next.

use smallvec::SmallVec;

use crate::common::binary;
use crate::xls::consts::MAX_RECORD_DATA;
use crate::xls::error::{XlsError, XlsResult};
use crate::xls::records::RawRecord;
use crate::xls::strings::{ExtRst, FormatRun, StringFlags, StringHeader, XlUnicodeString};

/// Smallest fragment size the writer accepts; any string header plus one
/// wide character fits.
pub const MIN_FRAGMENT_SIZE: usize = 16;

/// Where a string landed in the fragments of a [`ContinueWriter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StringPlacement {
    /// Fragment holding the first byte of the string (0 = the record payload)
    pub fragment: usize,
    /// Offset of the string within that fragment's payload
    pub offset: usize,
    /// Byte offsets within the encoded string at which it was cut
    pub splits: SmallVec<[usize; 2]>,
}

/// Builds one logical record as a list of size-limited fragments.
#[derive(Debug)]
pub struct ContinueWriter {
    max: usize,
    fragments: Vec<Vec<u8>>,
    current: Vec<u8>,
}

impl ContinueWriter {
    pub fn new(max_record_size: usize) -> Self {
        ContinueWriter {
            max: max_record_size.clamp(MIN_FRAGMENT_SIZE, MAX_RECORD_DATA),
            fragments: Vec::new(),
            current: Vec::new(),
        }
    }

    #[inline]
    fn available(&self) -> usize {
        self.max.saturating_sub(self.current.len())
    }

    fn flush(&mut self) {
        self.fragments.push(std::mem::take(&mut self.current));
    }

    /// Current write position as (fragment, offset).
    #[inline]
    pub fn position(&self) -> (usize, usize) {
        (self.fragments.len(), self.current.len())
    }

    /// Append a block that must not be cut. Blocks longer than a whole
    /// fragment are cut at the fragment limit.
    pub fn write_atomic(&mut self, bytes: &[u8]) {
        if bytes.len() > self.available() && !self.current.is_empty() {
            self.flush();
        }
        let mut rest = bytes;
        while rest.len() > self.available() {
            let (head, tail) = rest.split_at(self.available());
            self.current.extend_from_slice(head);
            self.flush();
            rest = tail;
        }
        self.current.extend_from_slice(rest);
    }

    /// Append a string, cutting it only at legal offsets.
    pub fn write_string(&mut self, string: &XlUnicodeString) -> StringPlacement {
        let bytes = string.to_bytes();
        let layout = string.layout();
        let total = bytes.len();

        if layout.min_split().min(total) > self.available() && !self.current.is_empty() {
            self.flush();
        }
        let (fragment, offset) = self.position();
        let mut splits = SmallVec::new();

        let mut pos = 0;
        loop {
            let avail = self.available();
            if total - pos <= avail {
                self.current.extend_from_slice(&bytes[pos..]);
                break;
            }
            let cut = (pos + 1..=pos + avail)
                .rev()
                .find(|&n| layout.is_legal_split(n));
            let Some(cut) = cut else {
                // Only reachable below MIN_FRAGMENT_SIZE
                self.current.extend_from_slice(&bytes[pos..]);
                break;
            };
            self.current.extend_from_slice(&bytes[pos..cut]);
            self.flush();
            if layout.needs_flag_byte(cut) {
                self.current.push(layout.continuation_flags());
            }
            splits.push(cut);
            pos = cut;
        }

        StringPlacement {
            fragment,
            offset,
            splits,
        }
    }

    /// Number of fragments written so far, counting the open one.
    pub fn fragment_count(&self) -> usize {
        self.fragments.len() + usize::from(!self.current.is_empty())
    }

    /// Close the writer into a record of type `opcode`.
    pub fn finish(mut self, opcode: u16) -> RawRecord {
        if !self.current.is_empty() || self.fragments.is_empty() {
            self.flush();
        }
        RawRecord::with_fragments(opcode, self.fragments)
    }
}

/// Sequential reader over the payload and continuations of one record.
#[derive(Debug, Clone)]
pub struct FragmentReader<'a> {
    fragments: Vec<&'a [u8]>,
    index: usize,
    pos: usize,
}

impl<'a> FragmentReader<'a> {
    pub fn new(record: &'a RawRecord) -> Self {
        Self::from_fragments(record.fragments().collect())
    }

    pub fn from_fragments(fragments: Vec<&'a [u8]>) -> Self {
        FragmentReader {
            fragments,
            index: 0,
            pos: 0,
        }
    }

    #[inline]
    fn left_in_fragment(&self) -> usize {
        self.fragments
            .get(self.index)
            .map_or(0, |fragment| fragment.len() - self.pos)
    }

    fn next_fragment(&mut self) -> XlsResult<()> {
        if self.index + 1 >= self.fragments.len() {
            return Err(XlsError::InvalidLength {
                expected: 1,
                found: 0,
            });
        }
        self.index += 1;
        self.pos = 0;
        Ok(())
    }

    /// Whether every byte of every fragment has been consumed.
    pub fn is_exhausted(&self) -> bool {
        self.fragments[self.index.min(self.fragments.len())..]
            .iter()
            .enumerate()
            .all(|(i, fragment)| {
                let start = if i == 0 { self.pos } else { 0 };
                fragment.len() <= start
            })
    }

    /// Current position as (fragment, offset).
    #[inline]
    pub fn position(&self) -> (usize, usize) {
        (self.index, self.pos)
    }

    /// Read `n` bytes, crossing fragment boundaries without flag bytes.
    pub fn read_bytes(&mut self, n: usize) -> XlsResult<Vec<u8>> {
        let mut out = Vec::with_capacity(n);
        while out.len() < n {
            if self.left_in_fragment() == 0 {
                self.next_fragment()?;
                continue;
            }
            let take = (n - out.len()).min(self.left_in_fragment());
            let fragment = self.fragments[self.index];
            out.extend_from_slice(&fragment[self.pos..self.pos + take]);
            self.pos += take;
        }
        Ok(out)
    }

    pub fn skip(&mut self, n: usize) -> XlsResult<()> {
        self.read_bytes(n).map(|_| ())
    }

    pub fn read_u16(&mut self) -> XlsResult<u16> {
        let bytes = self.read_bytes(2)?;
        Ok(binary::read_u16_le(&bytes, 0)?)
    }

    pub fn read_u32(&mut self) -> XlsResult<u32> {
        let bytes = self.read_bytes(4)?;
        Ok(binary::read_u32_le(&bytes, 0)?)
    }

    /// Read one string that may cross fragment boundaries.
    pub fn read_string(&mut self) -> XlsResult<XlUnicodeString> {
        if self.left_in_fragment() == 0 {
            self.next_fragment()?;
        }

        let mut fixed = self.read_bytes(3)?;
        let flags = StringFlags::from_bits_retain(fixed[2]);
        if flags.contains(StringFlags::RICH) {
            fixed.extend(self.read_bytes(2)?);
        }
        if flags.contains(StringFlags::EXTENDED) {
            fixed.extend(self.read_bytes(4)?);
        }
        let header = StringHeader::parse(&fixed)?;

        let mut wide = flags.contains(StringFlags::WIDE);
        let mut any_wide = wide;
        let mut chars = Vec::with_capacity(header.cch);
        while chars.len() < header.cch {
            if self.left_in_fragment() == 0 {
                self.next_fragment()?;
                let repeated = self.read_bytes(1)?;
                wide = repeated[0] & StringFlags::WIDE.bits() != 0;
                any_wide |= wide;
                continue;
            }
            let width = if wide { 2 } else { 1 };
            let take = (self.left_in_fragment() / width).min(header.cch - chars.len());
            if take == 0 {
                return Err(XlsError::malformed(0, "character split across fragments"));
            }
            let raw = self.read_bytes(take * width)?;
            if wide {
                chars.extend(binary::utf16le_units(&raw));
            } else {
                chars.extend(raw.iter().map(|&b| u16::from(b)));
            }
        }

        let mut runs = Vec::with_capacity(header.run_count);
        for _ in 0..header.run_count {
            runs.push(FormatRun {
                char_index: self.read_u16()?,
                font: self.read_u16()?,
            });
        }

        let ext = if flags.contains(StringFlags::EXTENDED) {
            Some(ExtRst::from_bytes(&self.read_bytes(header.ext_len)?))
        } else {
            None
        };

        Ok(XlUnicodeString::from_units(chars, any_wide)
            .with_runs(runs)
            .with_ext(ext))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_atomic_blocks_move_whole() {
        let mut writer = ContinueWriter::new(16);
        writer.write_atomic(&[1; 10]);
        writer.write_atomic(&[2; 8]);
        let record = writer.finish(0x00FC);
        assert_eq!(record.payload, vec![1; 10]);
        assert_eq!(record.continues, vec![vec![2; 8]]);
    }

    #[test]
    fn test_narrow_string_split_repeats_flags() {
        let text = "abcdefghijklmnopqrstuvwxyz";
        let string = XlUnicodeString::new(text);
        let mut writer = ContinueWriter::new(16);
        let placement = writer.write_string(&string);
        let record = writer.finish(0x00FC);

        assert_eq!(placement.fragment, 0);
        assert_eq!(placement.splits.as_slice(), &[16]);
        assert_eq!(record.payload.len(), 16);
        assert_eq!(record.continues[0][0], 0x00);
        assert_eq!(record.continues[0].len(), 1 + 13);

        let mut reader = FragmentReader::new(&record);
        assert_eq!(reader.read_string().unwrap().text(), text);
        assert!(reader.is_exhausted());
    }

    #[test]
    fn test_string_header_never_split_from_first_char() {
        let mut writer = ContinueWriter::new(16);
        writer.write_atomic(&[0; 12]);
        let placement = writer.write_string(&XlUnicodeString::new("日本"));
        // 3-byte header + 2-byte char does not fit in 4 bytes: new fragment.
        assert_eq!((placement.fragment, placement.offset), (1, 0));
        assert!(placement.splits.is_empty());
    }

    #[test]
    fn test_split_at_run_boundary_has_no_flag_byte() {
        let string = XlUnicodeString::new("abcdefghijk").with_runs(vec![
            FormatRun { char_index: 0, font: 1 },
            FormatRun { char_index: 4, font: 2 },
        ]);
        // header 5 + chars 11 = 16: the cut falls exactly at the runs.
        let mut writer = ContinueWriter::new(16);
        let placement = writer.write_string(&string);
        let record = writer.finish(0x00FC);
        assert_eq!(placement.splits.as_slice(), &[16]);
        assert_eq!(record.continues[0].len(), 8);

        let mut reader = FragmentReader::new(&record);
        assert_eq!(reader.read_string().unwrap(), string);
    }

    #[test]
    fn test_reader_follows_width_change() {
        // "ab" narrow, continued as wide "日"
        let payload = vec![3, 0, 0x00, b'a', b'b'];
        let cont = vec![0x01, 0xE5, 0x65];
        let record = RawRecord::with_fragments(0x00FC, vec![payload, cont]);
        let mut reader = FragmentReader::new(&record);
        let string = reader.read_string().unwrap();
        assert_eq!(string.text(), "ab日");
        assert!(string.is_wide());
    }

    #[test]
    fn test_reader_reports_truncation() {
        let record = RawRecord::new(0x00FC, vec![5, 0, 0, b'a']);
        let mut reader = FragmentReader::new(&record);
        assert!(reader.read_string().is_err());
    }

    fn string_strategy() -> impl Strategy<Value = XlUnicodeString> {
        let chars = prop_oneof![
            prop::collection::vec(0x20u16..0x7F, 0..40),
            prop::collection::vec(0x3000u16..0x3100, 0..40),
        ];
        let runs = prop::collection::vec((any::<u16>(), any::<u16>()), 0..4);
        let ext = prop_oneof![
            Just(None),
            Just(Some(ExtRst::Empty)),
            prop::collection::vec(any::<u8>(), 1..13).prop_map(|b| Some(ExtRst::Opaque(b))),
        ];
        (chars, any::<bool>(), runs, ext).prop_map(|(chars, wide, runs, ext)| {
            let runs = runs
                .into_iter()
                .map(|(char_index, font)| FormatRun { char_index, font })
                .collect();
            XlUnicodeString::from_units(chars, wide)
                .with_runs(runs)
                .with_ext(ext)
        })
    }

    proptest! {
        #[test]
        fn prop_writer_splits_are_legal_and_lossless(
            string in string_strategy(),
            pad in 0usize..40,
            max in 16usize..48,
        ) {
            let mut writer = ContinueWriter::new(max);
            writer.write_atomic(&vec![0xAB; pad]);
            let placement = writer.write_string(&string);
            writer.write_atomic(&[0xCD; 3]);
            let record = writer.finish(0x00FC);

            let layout = string.layout();
            for &split in &placement.splits {
                prop_assert!(layout.is_legal_split(split), "illegal split at {}", split);
            }
            for fragment in record.fragments() {
                prop_assert!(fragment.len() <= max);
            }

            let mut reader = FragmentReader::new(&record);
            reader.skip(pad).unwrap();
            let (index, offset) = reader.position();
            let at_end = record.fragments().nth(index).is_some_and(|f| f.len() == offset);
            let normalized = if at_end { (index + 1, 0) } else { (index, offset) };
            prop_assert_eq!(normalized, (placement.fragment, placement.offset));
            let back = reader.read_string().unwrap();
            prop_assert_eq!(back.units(), string.units());
            prop_assert_eq!(&back, &string);
            prop_assert_eq!(reader.read_bytes(3).unwrap(), vec![0xCD; 3]);
        }
    }
}

//! BIFF8 variable-width strings (`XLUnicodeRichExtendedString`, [MS-XLS] 2.5.293)
//!
//! # Layout
//!
//! ```text
//! cch        u16   character count (not bytes)
//! flags      u8    0x01 wide characters, 0x04 extended block, 0x08 rich text
//! [cRun]     u16   present when rich text
//! [cbExtRst] u32   present when extended
//! chars            cch or 2 * cch bytes
//! [runs]           4 * cRun bytes (char index u16, font u16)
//! [ExtRst]         cbExtRst bytes (phonetic data)
//! ```
//!
//! When a string is cut across physical records the cut must respect the
//! rules encoded by [`StringLayout::is_legal_split`]; a cut inside the
//! character data is followed by a one-byte flags field in the next record.

use bitflags::bitflags;

use crate::common::binary::{self, push_u16_le, push_u32_le};
use crate::xls::error::{Diagnostic, XlsError, XlsResult};

bitflags! {
    /// Option byte of a BIFF8 string
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StringFlags: u8 {
        /// Every character takes two bytes
        const WIDE = 0x01;
        /// An ExtRst (phonetic) block follows the runs
        const EXTENDED = 0x04;
        /// Formatting runs follow the characters
        const RICH = 0x08;
    }
}

/// One formatting run: font applied from `char_index` onward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatRun {
    pub char_index: u16,
    pub font: u16,
}

/// Position of one phonetic portion (`PhRuns`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhoneticRun {
    /// First character of the phonetic text covered
    pub first: u16,
    /// First character of the base text the portion annotates
    pub base_first: u16,
    /// Number of base characters annotated
    pub base_len: u16,
}

/// Parsed ExtRst phonetic block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhoneticBlock {
    pub reserved: u16,
    pub font_index: u16,
    /// Phonetic type and alignment bits (`Phs.info`)
    pub info: u16,
    pub text: Vec<u16>,
    pub runs: Vec<PhoneticRun>,
}

impl PhoneticBlock {
    const FIXED: usize = 14;

    fn byte_len(&self) -> usize {
        Self::FIXED + self.text.len() * 2 + self.runs.len() * 6
    }

    fn parse(data: &[u8]) -> XlsResult<Self> {
        if data.len() < Self::FIXED {
            return Err(XlsError::InvalidLength {
                expected: Self::FIXED,
                found: data.len(),
            });
        }
        let reserved = binary::read_u16_le(data, 0)?;
        let cb = binary::read_u16_le(data, 2)? as usize;
        let font_index = binary::read_u16_le(data, 4)?;
        let info = binary::read_u16_le(data, 6)?;
        let run_count = binary::read_u16_le(data, 8)? as usize;
        let cch = binary::read_u16_le(data, 10)? as usize;
        let st_cch = binary::read_u16_le(data, 12)? as usize;
        if st_cch != cch {
            return Err(XlsError::malformed(
                0,
                format!("phonetic text length {st_cch} disagrees with {cch}"),
            ));
        }

        let expected = Self::FIXED + cch * 2 + run_count * 6;
        if expected != data.len() || cb + 4 != expected {
            return Err(XlsError::InvalidLength {
                expected,
                found: data.len(),
            });
        }

        let text = binary::utf16le_units(&data[Self::FIXED..Self::FIXED + cch * 2]);
        let mut runs = Vec::with_capacity(run_count);
        let mut at = Self::FIXED + cch * 2;
        for _ in 0..run_count {
            runs.push(PhoneticRun {
                first: binary::read_u16_le(data, at)?,
                base_first: binary::read_u16_le(data, at + 2)?,
                base_len: binary::read_u16_le(data, at + 4)?,
            });
            at += 6;
        }

        Ok(PhoneticBlock {
            reserved,
            font_index,
            info,
            text,
            runs,
        })
    }

    fn write(&self, out: &mut Vec<u8>) {
        push_u16_le(out, self.reserved);
        push_u16_le(out, (self.byte_len() - 4) as u16);
        push_u16_le(out, self.font_index);
        push_u16_le(out, self.info);
        push_u16_le(out, self.runs.len() as u16);
        push_u16_le(out, self.text.len() as u16);
        push_u16_le(out, self.text.len() as u16);
        for unit in &self.text {
            push_u16_le(out, *unit);
        }
        for run in &self.runs {
            push_u16_le(out, run.first);
            push_u16_le(out, run.base_first);
            push_u16_le(out, run.base_len);
        }
    }
}

/// Extended (phonetic) block of a string.
///
/// A string without the extended flag has `ext == None`; a string whose
/// flag is set but whose block is zero bytes long has `Some(ExtRst::Empty)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtRst {
    /// Declared length of zero
    Empty,
    Phonetic(PhoneticBlock),
    /// Bytes whose structure did not parse; kept verbatim
    Opaque(Vec<u8>),
}

impl ExtRst {
    /// Interpret an extended block, keeping it verbatim when it does not parse.
    pub fn from_bytes(data: &[u8]) -> Self {
        if data.is_empty() {
            return ExtRst::Empty;
        }
        match PhoneticBlock::parse(data) {
            Ok(block) => ExtRst::Phonetic(block),
            Err(err) => {
                log::debug!("keeping {} byte phonetic block verbatim: {err}", data.len());
                ExtRst::Opaque(data.to_vec())
            },
        }
    }

    pub fn byte_len(&self) -> usize {
        match self {
            ExtRst::Empty => 0,
            ExtRst::Phonetic(block) => block.byte_len(),
            ExtRst::Opaque(bytes) => bytes.len(),
        }
    }

    pub fn write(&self, out: &mut Vec<u8>) {
        match self {
            ExtRst::Empty => {},
            ExtRst::Phonetic(block) => block.write(out),
            ExtRst::Opaque(bytes) => out.extend_from_slice(bytes),
        }
    }
}

/// Byte layout of an encoded string, and the split rules derived from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StringLayout {
    pub header_len: usize,
    pub char_width: usize,
    pub char_count: usize,
    pub run_count: usize,
    pub ext_len: usize,
    pub wide: bool,
}

impl StringLayout {
    #[inline]
    pub fn chars_start(&self) -> usize {
        self.header_len
    }

    #[inline]
    pub fn runs_start(&self) -> usize {
        self.header_len + self.char_count * self.char_width
    }

    #[inline]
    pub fn ext_start(&self) -> usize {
        self.runs_start() + self.run_count * 4
    }

    #[inline]
    pub fn total_len(&self) -> usize {
        self.ext_start() + self.ext_len
    }

    /// Smallest non-zero offset at which the string may be cut: the header
    /// and the first character always stay together.
    #[inline]
    pub fn min_split(&self) -> usize {
        self.header_len + self.char_count.min(1) * self.char_width
    }

    /// Whether the string may be cut so that the next record starts at byte
    /// `n` of the encoded string.
    ///
    /// Offsets 0 and the total length are always legal (the cut falls
    /// between strings). Inside the string, a cut may not fall in the
    /// header or before the first character, inside a wide character, or
    /// inside a 4-byte formatting run.
    pub fn is_legal_split(&self, n: usize) -> bool {
        let total = self.total_len();
        if n == 0 || n == total {
            return true;
        }
        if n > total || n < self.min_split() {
            return false;
        }
        let runs_start = self.runs_start();
        let ext_start = self.ext_start();
        if n < runs_start {
            (n - self.chars_start()) % self.char_width == 0
        } else if n <= ext_start {
            (n - runs_start) % 4 == 0
        } else {
            true
        }
    }

    /// Whether a cut at `n` must be followed by the repeated flags byte.
    #[inline]
    pub fn needs_flag_byte(&self, n: usize) -> bool {
        n > self.chars_start() && n < self.runs_start()
    }

    /// Flags byte repeated at the start of a continuation: only the width bit.
    #[inline]
    pub fn continuation_flags(&self) -> u8 {
        if self.wide { StringFlags::WIDE.bits() } else { 0 }
    }
}

/// A BIFF8 string with its optional rich-text and phonetic sections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XlUnicodeString {
    chars: Vec<u16>,
    wide: bool,
    pub runs: Vec<FormatRun>,
    pub ext: Option<ExtRst>,
}

impl XlUnicodeString {
    /// Plain string; stored narrow when every character fits in one byte.
    ///
    /// Only the first `MAX_STRING_CHARS` units are kept. The editing entry
    /// points reject longer text with [`check_text`](crate::xls::utils::check_text)
    /// before a string is built.
    pub fn new(text: &str) -> Self {
        let chars: Vec<u16> = text.encode_utf16().take(u16::MAX as usize).collect();
        let wide = chars.iter().any(|&unit| unit > 0xFF);
        XlUnicodeString {
            chars,
            wide,
            runs: Vec::new(),
            ext: None,
        }
    }

    /// String from raw UTF-16 code units with an explicit width.
    ///
    /// A narrow request with units above 0xFF is widened.
    pub fn from_units(chars: Vec<u16>, wide: bool) -> Self {
        let wide = wide || chars.iter().any(|&unit| unit > 0xFF);
        XlUnicodeString {
            chars,
            wide,
            runs: Vec::new(),
            ext: None,
        }
    }

    pub fn with_runs(mut self, runs: Vec<FormatRun>) -> Self {
        self.runs = runs;
        self
    }

    pub fn with_ext(mut self, ext: Option<ExtRst>) -> Self {
        self.ext = ext;
        self
    }

    #[inline]
    pub fn units(&self) -> &[u16] {
        &self.chars
    }

    #[inline]
    pub fn is_wide(&self) -> bool {
        self.wide
    }

    #[inline]
    pub fn char_count(&self) -> usize {
        self.chars.len()
    }

    /// Text content, without formatting.
    pub fn text(&self) -> String {
        String::from_utf16_lossy(&self.chars)
    }

    pub fn flags(&self) -> StringFlags {
        let mut flags = StringFlags::empty();
        flags.set(StringFlags::WIDE, self.wide);
        flags.set(StringFlags::RICH, !self.runs.is_empty());
        flags.set(StringFlags::EXTENDED, self.ext.is_some());
        flags
    }

    pub fn layout(&self) -> StringLayout {
        let flags = self.flags();
        let mut header_len = 3;
        if flags.contains(StringFlags::RICH) {
            header_len += 2;
        }
        if flags.contains(StringFlags::EXTENDED) {
            header_len += 4;
        }
        StringLayout {
            header_len,
            char_width: if self.wide { 2 } else { 1 },
            char_count: self.chars.len(),
            run_count: self.runs.len(),
            ext_len: self.ext.as_ref().map_or(0, ExtRst::byte_len),
            wide: self.wide,
        }
    }

    /// Encode header, characters, runs and extended block.
    pub fn to_bytes(&self) -> Vec<u8> {
        let layout = self.layout();
        let mut out = Vec::with_capacity(layout.total_len());
        push_u16_le(&mut out, self.chars.len() as u16);
        out.push(self.flags().bits());
        if !self.runs.is_empty() {
            push_u16_le(&mut out, self.runs.len() as u16);
        }
        if let Some(ext) = &self.ext {
            push_u32_le(&mut out, ext.byte_len() as u32);
        }
        self.write_chars(&mut out, 0, self.chars.len());
        for run in &self.runs {
            push_u16_le(&mut out, run.char_index);
            push_u16_le(&mut out, run.font);
        }
        if let Some(ext) = &self.ext {
            ext.write(&mut out);
        }
        out
    }

    fn write_chars(&self, out: &mut Vec<u8>, from: usize, to: usize) {
        for &unit in &self.chars[from..to] {
            if self.wide {
                push_u16_le(out, unit);
            } else {
                out.push(unit as u8);
            }
        }
    }

    /// Parse one string that occupies the whole of `data`.
    ///
    /// If the declared extended-block length disagrees with the bytes that
    /// actually remain after the header, characters and runs, the computed
    /// remainder wins and a diagnostic is emitted.
    pub fn parse_exact(data: &[u8]) -> XlsResult<Self> {
        let mut diagnostics = Vec::new();
        Self::parse_exact_with(data, &mut diagnostics)
    }

    /// [`parse_exact`](Self::parse_exact), collecting diagnostics.
    pub fn parse_exact_with(data: &[u8], diagnostics: &mut Vec<Diagnostic>) -> XlsResult<Self> {
        let header = StringHeader::parse(data)?;
        let (mut string, offset) = header.parse_body(data)?;
        if header.flags.contains(StringFlags::EXTENDED) {
            let computed = data.len().saturating_sub(offset);
            if computed != header.ext_len {
                diagnostics.push(Diagnostic::warn(
                    0,
                    format!(
                        "extended string block declares {} bytes, {} remain; using {}",
                        header.ext_len, computed, computed
                    ),
                ));
            }
            string.ext = Some(ExtRst::from_bytes(&data[offset..]));
        }
        Ok(string)
    }

    /// Parse one string at the start of `data`, trusting the declared
    /// lengths. Returns the string and the bytes consumed.
    pub fn parse_prefix(data: &[u8]) -> XlsResult<(Self, usize)> {
        let header = StringHeader::parse(data)?;
        let (mut string, offset) = header.parse_body(data)?;
        if !header.flags.contains(StringFlags::EXTENDED) {
            return Ok((string, offset));
        }
        let end = offset + header.ext_len;
        let block = data.get(offset..end).ok_or(XlsError::InvalidLength {
            expected: end,
            found: data.len(),
        })?;
        string.ext = Some(ExtRst::from_bytes(block));
        Ok((string, end))
    }
}

impl std::fmt::Display for XlUnicodeString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.text())
    }
}

/// The fixed header (items 1-4 of the layout).
#[derive(Debug, Clone, Copy)]
pub(crate) struct StringHeader {
    pub cch: usize,
    pub flags: StringFlags,
    pub run_count: usize,
    pub ext_len: usize,
    pub len: usize,
}

impl StringHeader {
    pub(crate) fn parse(data: &[u8]) -> XlsResult<Self> {
        let cch = binary::read_u16_le(data, 0)? as usize;
        let flags = StringFlags::from_bits_retain(binary::read_u8(data, 2)?);
        let mut len = 3;
        let mut run_count = 0;
        let mut ext_len = 0;
        if flags.contains(StringFlags::RICH) {
            run_count = binary::read_u16_le(data, len)? as usize;
            len += 2;
        }
        if flags.contains(StringFlags::EXTENDED) {
            ext_len = binary::read_u32_le(data, len)? as usize;
            len += 4;
        }
        Ok(StringHeader {
            cch,
            flags,
            run_count,
            ext_len,
            len,
        })
    }

    /// Characters and runs following the header; returns the string (no
    /// extended block yet) and the offset just past the runs.
    fn parse_body(&self, data: &[u8]) -> XlsResult<(XlUnicodeString, usize)> {
        let wide = self.flags.contains(StringFlags::WIDE);
        let char_bytes = if wide { self.cch * 2 } else { self.cch };
        let chars_end = self.len + char_bytes;
        let raw = data.get(self.len..chars_end).ok_or(XlsError::InvalidLength {
            expected: chars_end,
            found: data.len(),
        })?;
        let chars = if wide {
            binary::utf16le_units(raw)
        } else {
            raw.iter().map(|&b| u16::from(b)).collect()
        };

        let runs_end = chars_end + self.run_count * 4;
        if runs_end > data.len() {
            return Err(XlsError::InvalidLength {
                expected: runs_end,
                found: data.len(),
            });
        }
        let runs = (0..self.run_count)
            .map(|i| {
                let at = chars_end + i * 4;
                Ok(FormatRun {
                    char_index: binary::read_u16_le(data, at)?,
                    font: binary::read_u16_le(data, at + 2)?,
                })
            })
            .collect::<XlsResult<Vec<_>>>()?;

        Ok((
            XlUnicodeString {
                chars,
                wide,
                runs,
                ext: None,
            },
            runs_end,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn phonetic() -> ExtRst {
        ExtRst::Phonetic(PhoneticBlock {
            reserved: 1,
            font_index: 3,
            info: 0x0031,
            text: "カナ".encode_utf16().collect(),
            runs: vec![PhoneticRun {
                first: 0,
                base_first: 0,
                base_len: 2,
            }],
        })
    }

    #[test]
    fn test_plain_narrow_and_wide() {
        let narrow = XlUnicodeString::new("Hello");
        assert!(!narrow.is_wide());
        assert_eq!(narrow.to_bytes(), b"\x05\x00\x00Hello");

        let wide = XlUnicodeString::new("日本");
        assert!(wide.is_wide());
        let bytes = wide.to_bytes();
        assert_eq!(bytes.len(), 3 + 4);
        assert_eq!(XlUnicodeString::parse_exact(&bytes).unwrap(), wide);
    }

    #[test]
    fn test_rich_and_extended_roundtrip() {
        let s = XlUnicodeString::new("漢字です")
            .with_runs(vec![
                FormatRun { char_index: 0, font: 5 },
                FormatRun { char_index: 2, font: 6 },
            ])
            .with_ext(Some(phonetic()));
        let bytes = s.to_bytes();
        let layout = s.layout();
        assert_eq!(layout.header_len, 9);
        assert_eq!(bytes.len(), layout.total_len());
        assert_eq!(XlUnicodeString::parse_exact(&bytes).unwrap(), s);
        let (prefix, used) = XlUnicodeString::parse_prefix(&bytes).unwrap();
        assert_eq!(prefix, s);
        assert_eq!(used, bytes.len());
    }

    #[test]
    fn test_empty_extended_block_is_distinct_from_absent() {
        let absent = XlUnicodeString::new("abc");
        let empty = XlUnicodeString::new("abc").with_ext(Some(ExtRst::Empty));
        assert_ne!(absent.to_bytes(), empty.to_bytes());

        let parsed = XlUnicodeString::parse_exact(&empty.to_bytes()).unwrap();
        assert_eq!(parsed.ext, Some(ExtRst::Empty));
        let parsed = XlUnicodeString::parse_exact(&absent.to_bytes()).unwrap();
        assert_eq!(parsed.ext, None);
    }

    #[test]
    fn test_declared_extended_length_mismatch_uses_computed() {
        let s = XlUnicodeString::new("ab").with_ext(Some(phonetic()));
        let mut bytes = s.to_bytes();
        // Declare 200 bytes of phonetic data; only the real block follows.
        bytes[3..7].copy_from_slice(&200u32.to_le_bytes());

        let mut diags = Vec::new();
        let parsed = XlUnicodeString::parse_exact_with(&bytes, &mut diags).unwrap();
        assert_eq!(parsed.ext, Some(phonetic()));
        assert_eq!(diags.len(), 1);

        // Declared shorter than present: the computed remainder is used too.
        bytes[3..7].copy_from_slice(&2u32.to_le_bytes());
        let mut diags = Vec::new();
        let parsed = XlUnicodeString::parse_exact_with(&bytes, &mut diags).unwrap();
        assert_eq!(parsed.ext.as_ref().map(ExtRst::byte_len), Some(phonetic().byte_len()));
        assert_eq!(diags.len(), 1);

        // parse_prefix trusts the declared length and fails instead.
        bytes[3..7].copy_from_slice(&200u32.to_le_bytes());
        assert!(XlUnicodeString::parse_prefix(&bytes).is_err());
    }

    #[test]
    fn test_unparseable_phonetic_block_kept_verbatim() {
        let s = XlUnicodeString::new("x").with_ext(Some(ExtRst::Opaque(vec![9, 9, 9])));
        let parsed = XlUnicodeString::parse_exact(&s.to_bytes()).unwrap();
        assert_eq!(parsed.ext, Some(ExtRst::Opaque(vec![9, 9, 9])));
        assert_eq!(parsed.to_bytes(), s.to_bytes());
    }

    #[test]
    fn test_truncated_characters_fail() {
        assert!(XlUnicodeString::parse_exact(b"\x05\x00\x00Hel").is_err());
        assert!(XlUnicodeString::parse_exact(b"\x05\x00").is_err());
    }

    #[test]
    fn test_split_rules_wide_rich() {
        let s = XlUnicodeString::new("日本語")
            .with_runs(vec![FormatRun { char_index: 0, font: 1 }]);
        let layout = s.layout();
        // header 5, chars 5..11, runs 11..15
        assert_eq!(layout.header_len, 5);
        assert!(layout.is_legal_split(0));
        for n in 1..7 {
            assert!(!layout.is_legal_split(n), "{n} splits header or first char");
        }
        assert!(layout.is_legal_split(7));
        assert!(!layout.is_legal_split(8));
        assert!(layout.is_legal_split(9));
        assert!(layout.is_legal_split(11));
        assert!(!layout.is_legal_split(12));
        assert!(layout.is_legal_split(15));
        assert!(!layout.is_legal_split(16));

        assert!(layout.needs_flag_byte(7));
        assert!(layout.needs_flag_byte(9));
        assert!(!layout.needs_flag_byte(11));
        assert_eq!(layout.continuation_flags(), 0x01);
    }

    #[test]
    fn test_split_rules_narrow_extended() {
        let s = XlUnicodeString::new("ab").with_ext(Some(ExtRst::Opaque(vec![0; 6])));
        let layout = s.layout();
        // header 7, chars 7..9, ext 9..15
        assert!(!layout.is_legal_split(7));
        assert!(layout.is_legal_split(8));
        assert!(layout.is_legal_split(9));
        assert!(layout.is_legal_split(12));
        assert!(!layout.needs_flag_byte(12));
        assert_eq!(layout.continuation_flags(), 0x00);
    }

    #[test]
    fn test_empty_string_split_rules() {
        let s = XlUnicodeString::new("");
        let layout = s.layout();
        assert_eq!(layout.total_len(), 3);
        assert!(!layout.is_legal_split(2));
        assert!(layout.is_legal_split(3));
    }
}

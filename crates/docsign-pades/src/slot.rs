//! Byte-level location of a signature dictionary's reserved region
//!
//! lopdf gives us object ids, but the signature covers raw file bytes, so
//! the reserved `/Contents` hex string and the `/ByteRange` array have to
//! be found again in the serialized output.

use lopdf::ObjectId;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{PadesError, Result};

/// Value written into each ByteRange slot before the real offsets are known.
/// Ten digits leave room for files up to ~10GB.
pub(crate) const BYTE_RANGE_PLACEHOLDER: i64 = 9_999_999_999;

/// `[offset1 length1 offset2 length2]` covering everything except the
/// signature container, angle brackets included
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteRange(pub [usize; 4]);

impl ByteRange {
    /// Range for a file of `total_len` bytes whose gap spans `gap_start..gap_end`
    pub(crate) fn around_gap(total_len: usize, gap_start: usize, gap_end: usize) -> Self {
        ByteRange([0, gap_start, gap_end, total_len - gap_end])
    }

    /// The two covered slices of `pdf`, in file order.
    ///
    /// The range may stop short of the end of `pdf` when later revisions
    /// were appended after the signed one.
    pub fn covered<'a>(&self, pdf: &'a [u8]) -> Result<(&'a [u8], &'a [u8])> {
        let [start1, len1, start2, len2] = self.0;
        let end1 = start1 + len1;
        let end2 = self.end();
        if start1 != 0 || end1 > start2 || end2 > pdf.len() {
            return Err(PadesError::format(format!(
                "ByteRange {} does not cover a {} byte file",
                self,
                pdf.len()
            )));
        }
        Ok((&pdf[start1..end1], &pdf[start2..end2]))
    }

    /// Concatenation of the covered slices
    pub fn signed_bytes(&self, pdf: &[u8]) -> Result<Vec<u8>> {
        let (first, second) = self.covered(pdf)?;
        let mut out = Vec::with_capacity(first.len() + second.len());
        out.extend_from_slice(first);
        out.extend_from_slice(second);
        Ok(out)
    }

    /// Offset just past the last covered byte
    pub fn end(&self) -> usize {
        self.0[2] + self.0[3]
    }

    /// Offsets of the excluded gap
    pub fn gap(&self) -> (usize, usize) {
        (self.0[1], self.0[2])
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} {} {} {}]", self.0[0], self.0[1], self.0[2], self.0[3])
    }
}

/// Positions of the reserved region inside one serialized signature dictionary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SignatureSlot {
    /// Index of `<` opening the Contents hex string
    contents_open: usize,
    /// Index of `>` closing it
    contents_close: usize,
    /// Index of `[` opening the ByteRange array
    range_open: usize,
    /// Index of `]` closing it
    range_close: usize,
}

impl SignatureSlot {
    pub(crate) fn locate(pdf: &[u8], object_id: ObjectId) -> Result<Self> {
        let (obj_start, obj_end) = object_span(pdf, object_id)?;
        let body = &pdf[obj_start..obj_end];

        let contents_key = find(body, b"/Contents")
            .ok_or_else(|| PadesError::format("Signature dictionary has no /Contents"))?;
        let contents_open = skip_whitespace(body, contents_key + b"/Contents".len());
        if body.get(contents_open) != Some(&b'<') || body.get(contents_open + 1) == Some(&b'<') {
            return Err(PadesError::format("/Contents is not a hex string"));
        }
        let contents_close = find(&body[contents_open..], b">")
            .map(|i| contents_open + i)
            .ok_or_else(|| PadesError::format("Unterminated /Contents hex string"))?;
        if !body[contents_open + 1..contents_close]
            .iter()
            .all(u8::is_ascii_hexdigit)
        {
            return Err(PadesError::format("/Contents holds non-hex data"));
        }

        let range_key = find(body, b"/ByteRange")
            .ok_or_else(|| PadesError::format("Signature dictionary has no /ByteRange"))?;
        let range_open = skip_whitespace(body, range_key + b"/ByteRange".len());
        if body.get(range_open) != Some(&b'[') {
            return Err(PadesError::format("/ByteRange is not an array"));
        }
        let range_close = find(&body[range_open..], b"]")
            .map(|i| range_open + i)
            .ok_or_else(|| PadesError::format("Unterminated /ByteRange array"))?;

        Ok(Self {
            contents_open: obj_start + contents_open,
            contents_close: obj_start + contents_close,
            range_open: obj_start + range_open,
            range_close: obj_start + range_close,
        })
    }

    /// Bytes available for the DER container
    pub(crate) fn capacity(&self) -> usize {
        (self.contents_close - self.contents_open - 1) / 2
    }

    /// The ByteRange implied by this slot's position
    pub(crate) fn expected_range(&self, total_len: usize) -> ByteRange {
        ByteRange::around_gap(total_len, self.contents_open, self.contents_close + 1)
    }

    /// Parse the ByteRange currently written in the file
    pub(crate) fn written_range(&self, pdf: &[u8]) -> Result<ByteRange> {
        let text = std::str::from_utf8(&pdf[self.range_open + 1..self.range_close])
            .map_err(|_| PadesError::format("/ByteRange is not ASCII"))?;
        let values: Vec<usize> = text
            .split_ascii_whitespace()
            .map(str::parse)
            .collect::<std::result::Result<_, _>>()
            .map_err(|_| PadesError::format(format!("Malformed /ByteRange [{}]", text.trim())))?;
        let values: [usize; 4] = values
            .try_into()
            .map_err(|_| PadesError::format("/ByteRange must hold four integers"))?;
        Ok(ByteRange(values))
    }

    /// Overwrite the placeholder array in place, padding with spaces so no
    /// offset after it moves
    pub(crate) fn write_range(&self, pdf: &mut [u8], range: &ByteRange) -> Result<()> {
        let rendered = range.to_string();
        let width = self.range_close + 1 - self.range_open;
        if rendered.len() > width {
            return Err(PadesError::format(format!(
                "ByteRange {} does not fit the {} byte placeholder",
                rendered, width
            )));
        }
        let target = &mut pdf[self.range_open..=self.range_close];
        target.fill(b' ');
        target[..rendered.len() - 1].copy_from_slice(&rendered.as_bytes()[..rendered.len() - 1]);
        // keep the closing bracket where the placeholder had it
        target[width - 1] = b']';
        Ok(())
    }

    /// Hex digits currently stored in the slot
    pub(crate) fn hex<'a>(&self, pdf: &'a [u8]) -> &'a [u8] {
        &pdf[self.contents_open + 1..self.contents_close]
    }

    pub(crate) fn is_empty(&self, pdf: &[u8]) -> bool {
        self.hex(pdf).iter().all(|&b| b == b'0')
    }

    /// Write `container` as lowercase hex, right-padded with zeros
    pub(crate) fn write_container(&self, pdf: &mut [u8], container: &[u8]) -> Result<()> {
        if container.is_empty() || container.len() > self.capacity() {
            return Err(PadesError::SignatureSizeMismatch {
                reserved: self.capacity(),
                actual: container.len(),
            });
        }
        let encoded = hex::encode(container);
        let target = &mut pdf[self.contents_open + 1..self.contents_close];
        target.fill(b'0');
        target[..encoded.len()].copy_from_slice(encoded.as_bytes());
        Ok(())
    }
}

/// Byte span of the last `N G obj ... endobj` block for `object_id`.
/// Later definitions win, as with incremental updates.
fn object_span(pdf: &[u8], (num, generation): ObjectId) -> Result<(usize, usize)> {
    let header = format!("{} {} obj", num, generation);
    let start = find_all(pdf, header.as_bytes())
        .filter(|&i| i == 0 || !pdf[i - 1].is_ascii_digit())
        .last()
        .ok_or_else(|| {
            PadesError::format(format!("Object {} {} not found in file", num, generation))
        })?;
    let end = find(&pdf[start..], b"endobj")
        .map(|i| start + i)
        .ok_or_else(|| PadesError::format(format!("Object {} {} is unterminated", num, generation)))?;
    Ok((start, end))
}

/// Find the first occurrence of a pattern
fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn find_all<'a>(haystack: &'a [u8], needle: &'a [u8]) -> impl Iterator<Item = usize> + 'a {
    haystack
        .windows(needle.len())
        .enumerate()
        .filter(move |(_, w)| *w == needle)
        .map(|(i, _)| i)
}

fn skip_whitespace(data: &[u8], mut pos: usize) -> usize {
    while pos < data.len() && data[pos].is_ascii_whitespace() {
        pos += 1;
    }
    pos
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &[u8] = b"%PDF-1.7\n1 0 obj\n<</A 1>>\nendobj\n11 0 obj\n<</Type /Sig /ByteRange [0 9999999999 9999999999 9999999999] /Contents <0000000000>>>\nendobj\ntrailer\n";

    #[test]
    fn test_locate_skips_longer_object_numbers() {
        let slot = SignatureSlot::locate(SAMPLE, (1, 0)).err().unwrap();
        assert!(slot.to_string().contains("/Contents"));

        let slot = SignatureSlot::locate(SAMPLE, (11, 0)).unwrap();
        assert_eq!(slot.capacity(), 5);
        assert!(slot.is_empty(SAMPLE));
    }

    #[test]
    fn test_expected_range_excludes_brackets() {
        let slot = SignatureSlot::locate(SAMPLE, (11, 0)).unwrap();
        let range = slot.expected_range(SAMPLE.len());
        let (gap_start, gap_end) = range.gap();
        assert_eq!(SAMPLE[gap_start], b'<');
        assert_eq!(SAMPLE[gap_end - 1], b'>');
        assert_eq!(range.0[3], SAMPLE.len() - gap_end);
    }

    #[test]
    fn test_write_range_preserves_length() {
        let mut pdf = SAMPLE.to_vec();
        let slot = SignatureSlot::locate(&pdf, (11, 0)).unwrap();
        let range = slot.expected_range(pdf.len());
        slot.write_range(&mut pdf, &range).unwrap();

        assert_eq!(pdf.len(), SAMPLE.len());
        assert_eq!(slot.written_range(&pdf).unwrap(), range);
        // the covered bytes still include the padded array
        assert!(range.signed_bytes(&pdf).is_ok());
    }

    #[test]
    fn test_write_container_pads_with_zeros() {
        let mut pdf = SAMPLE.to_vec();
        let slot = SignatureSlot::locate(&pdf, (11, 0)).unwrap();
        slot.write_container(&mut pdf, &[0xab, 0xcd]).unwrap();
        assert_eq!(slot.hex(&pdf), b"abcd000000");
        assert!(!slot.is_empty(&pdf));
    }

    #[test]
    fn test_write_container_size_checks() {
        let mut pdf = SAMPLE.to_vec();
        let slot = SignatureSlot::locate(&pdf, (11, 0)).unwrap();
        assert_eq!(
            slot.write_container(&mut pdf, &[1; 6]),
            Err(PadesError::SignatureSizeMismatch { reserved: 5, actual: 6 })
        );
        assert_eq!(
            slot.write_container(&mut pdf, &[]),
            Err(PadesError::SignatureSizeMismatch { reserved: 5, actual: 0 })
        );
        assert_eq!(&pdf[..], SAMPLE);
    }

    #[test]
    fn test_covered_rejects_inconsistent_range() {
        let pdf = b"0123456789";
        assert!(ByteRange([0, 2, 5, 5]).covered(pdf).is_ok());
        assert!(ByteRange([1, 2, 5, 5]).covered(pdf).is_err());
        assert!(ByteRange([0, 6, 5, 5]).covered(pdf).is_err());
        assert!(ByteRange([0, 2, 5, 6]).covered(pdf).is_err());
        // an earlier revision covers a prefix
        let (first, second) = ByteRange([0, 2, 5, 3]).covered(pdf).unwrap();
        assert_eq!((first, second), (&b"01"[..], &b"567"[..]));
    }

    #[test]
    fn test_display() {
        assert_eq!(ByteRange([0, 10, 20, 30]).to_string(), "[0 10 20 30]");
    }
}

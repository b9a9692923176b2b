//! Reading back the signed region of a document

use crate::digest::{ContentDigest, DigestAlgorithm};
use crate::error::{PadesError, Result};
use crate::parser::PdfDocument;
use crate::slot::{ByteRange, SignatureSlot};

/// What a verifier sees for one signature field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedRegion {
    pub byte_range: ByteRange,
    /// Concatenation of the covered ranges
    pub signed_bytes: Vec<u8>,
    /// Embedded container with the zero padding removed; empty when unsigned
    pub container: Vec<u8>,
    /// False when revisions were appended after the one this field signs
    pub covers_whole_file: bool,
}

impl SignedRegion {
    pub fn is_signed(&self) -> bool {
        !self.container.is_empty()
    }

    pub fn digest(&self, algorithm: DigestAlgorithm) -> ContentDigest {
        ContentDigest::compute(algorithm, &self.signed_bytes)
    }
}

/// Extract the byte range, covered bytes and container of `field_name`.
///
/// The range must exclude exactly the field's reserved container and end
/// inside the file; it may end before later incremental updates.
pub fn inspect(signed_pdf: &[u8], field_name: &str) -> Result<SignedRegion> {
    let doc = PdfDocument::from_bytes(signed_pdf)?;
    let sig_dict_id = doc.signature_dictionary_id(field_name)?;
    let slot = SignatureSlot::locate(signed_pdf, sig_dict_id)?;

    let byte_range = slot.written_range(signed_pdf)?;
    let revision_end = byte_range.end();
    let (_, gap_end) = slot.expected_range(signed_pdf.len()).gap();
    if revision_end > signed_pdf.len()
        || revision_end < gap_end
        || byte_range != slot.expected_range(revision_end)
    {
        return Err(PadesError::format(format!(
            "ByteRange {} of '{}' does not exclude exactly the signature container",
            byte_range, field_name
        )));
    }
    let signed_bytes = byte_range.signed_bytes(signed_pdf)?;

    let raw = hex::decode(slot.hex(signed_pdf))
        .map_err(|e| PadesError::format(format!("Invalid /Contents hex: {}", e)))?;
    let container = trim_container(raw);

    Ok(SignedRegion {
        byte_range,
        signed_bytes,
        container,
        covers_whole_file: revision_end == signed_pdf.len(),
    })
}

/// Drop the zero padding after the container. A DER SEQUENCE header tells
/// the exact length; anything else loses its trailing zero bytes.
fn trim_container(mut raw: Vec<u8>) -> Vec<u8> {
    if let Some(len) = der_length(&raw) {
        if len <= raw.len() {
            raw.truncate(len);
            return raw;
        }
    }
    while raw.last() == Some(&0) {
        raw.pop();
    }
    raw
}

/// Total encoded length of a DER SEQUENCE starting at `bytes[0]`
fn der_length(bytes: &[u8]) -> Option<usize> {
    if bytes.len() < 2 || bytes[0] != 0x30 {
        return None;
    }
    let first = bytes[1] as usize;
    if first < 0x80 {
        return Some(2 + first);
    }
    let count = first & 0x7f;
    if count == 0 || count > 4 || bytes.len() < 2 + count {
        return None;
    }
    let len = bytes[2..2 + count]
        .iter()
        .fold(0usize, |acc, &b| (acc << 8) | b as usize);
    Some(2 + count + len)
}

//! Signature container embedding

use tracing::debug;

use crate::error::{PadesError, Result};
use crate::parser::PdfDocument;
use crate::slot::SignatureSlot;

/// Write `signature_container` into the slot reserved for `field_name`.
///
/// The container is hex-encoded into the existing zero-filled string and
/// right-padded with zeros; no other byte of `placeholder_pdf` changes.
/// An empty container, or one larger than the reserved slot, fails with
/// [`PadesError::SignatureSizeMismatch`].
#[tracing::instrument(skip_all, fields(field_name = %field_name, container_len = signature_container.len()))]
pub fn embed(placeholder_pdf: &[u8], signature_container: &[u8], field_name: &str) -> Result<Vec<u8>> {
    let doc = PdfDocument::from_bytes(placeholder_pdf)?;
    let sig_dict_id = doc.signature_dictionary_id(field_name)?;
    let slot = SignatureSlot::locate(placeholder_pdf, sig_dict_id)?;

    let written = slot.written_range(placeholder_pdf)?;
    let expected = slot.expected_range(placeholder_pdf.len());
    if written != expected {
        return Err(PadesError::format(format!(
            "ByteRange {} does not match the reserved slot {} for '{}'",
            written, expected, field_name
        )));
    }
    if !slot.is_empty(placeholder_pdf) {
        return Err(PadesError::format(format!(
            "Signature field '{}' already holds a signature",
            field_name
        )));
    }

    let mut signed = placeholder_pdf.to_vec();
    slot.write_container(&mut signed, signature_container)?;

    debug!(reserved = slot.capacity(), "Embedded signature container");
    Ok(signed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::DigestAlgorithm;
    use crate::fixtures;
    use crate::inspect::inspect;
    use crate::prepare::{prepare, prepare_with, PrepareOptions};

    fn small_placeholder() -> crate::prepare::PreparedDocument {
        prepare_with(
            &fixtures::sample_pdf(),
            "Signature1",
            &PrepareOptions {
                reserved_size: 128,
                ..Default::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn test_embed_only_touches_the_slot() {
        let prepared = small_placeholder();
        let container = fixtures::fake_container(40);
        let signed = embed(&prepared.placeholder_pdf, &container, "Signature1").unwrap();

        assert_eq!(signed.len(), prepared.placeholder_pdf.len());
        assert_eq!(prepared.byte_range.signed_bytes(&signed).unwrap(), prepared.bytes_to_sign);

        let (gap_start, _) = prepared.byte_range.gap();
        let hex = hex::encode(&container);
        assert_eq!(&signed[gap_start + 1..gap_start + 1 + hex.len()], hex.as_bytes());
    }

    #[test]
    fn test_exactly_full_container_fits() {
        let prepared = small_placeholder();
        let container = vec![0x5a; 128];
        assert!(embed(&prepared.placeholder_pdf, &container, "Signature1").is_ok());
    }

    #[test]
    fn test_size_mismatch() {
        let prepared = small_placeholder();
        let err = embed(&prepared.placeholder_pdf, &[1u8; 129], "Signature1").unwrap_err();
        assert_eq!(
            err,
            PadesError::SignatureSizeMismatch {
                reserved: 128,
                actual: 129
            }
        );

        let err = embed(&prepared.placeholder_pdf, &[], "Signature1").unwrap_err();
        assert!(matches!(err, PadesError::SignatureSizeMismatch { actual: 0, .. }));
    }

    #[test]
    fn test_unknown_field() {
        let prepared = small_placeholder();
        let err = embed(&prepared.placeholder_pdf, &[1, 2, 3], "Other").unwrap_err();
        assert!(matches!(err, PadesError::DocumentFormat(_)));
    }

    #[test]
    fn test_refuses_to_embed_twice() {
        let prepared = small_placeholder();
        let signed = embed(&prepared.placeholder_pdf, &[0x30, 0x00], "Signature1").unwrap();
        let err = embed(&signed, &[0x30, 0x00], "Signature1").unwrap_err();
        assert!(err.to_string().contains("already holds a signature"));
    }

    #[test]
    fn test_resaved_placeholder_is_rejected() {
        // re-serializing moves the slot, so the written ByteRange goes stale
        let prepared = prepare(&fixtures::sample_pdf(), "Signature1").unwrap();
        let mut doc = PdfDocument::from_bytes(&prepared.placeholder_pdf).unwrap();
        let resaved = doc.save_to_bytes().unwrap();
        assert_ne!(resaved, prepared.placeholder_pdf);

        assert!(embed(&resaved, &[0x30, 0x00], "Signature1").is_err());
    }

    #[test]
    fn test_embedded_region_verifies() {
        let prepared = small_placeholder();
        let digest = prepared.digest(DigestAlgorithm::Sha256);
        let signed = embed(
            &prepared.placeholder_pdf,
            &fixtures::fake_container(64),
            "Signature1",
        )
        .unwrap();

        let region = inspect(&signed, "Signature1").unwrap();
        assert_eq!(region.byte_range, prepared.byte_range);
        assert!(digest.matches(&region.signed_bytes));
    }
}

//! Signature placeholder preparation
//!
//! The source file is never rewritten. A new revision holding the signature
//! dictionary, the widget and the updated form and page objects is appended
//! as an incremental update, so the source stays a byte prefix of the
//! placeholder and any signature already in it keeps verifying. The real
//! `/ByteRange` is written over the placeholder after serialization and only
//! then are the bytes to sign read back.

use lopdf::{Dictionary, IncrementalDocument, Object, ObjectId, StringFormat};
use tracing::debug;

use crate::digest::{ContentDigest, DigestAlgorithm};
use crate::error::{PadesError, Result};
use crate::parser::PdfDocument;
use crate::slot::{ByteRange, SignatureSlot, BYTE_RANGE_PLACEHOLDER};

/// Default bytes reserved for the signature container
pub const DEFAULT_RESERVED_SIZE: usize = 16_384;

/// Annotation flags: Print (4) + Locked (128)
const WIDGET_FLAGS: i64 = 132;

/// AcroForm SigFlags: SignaturesExist (1) + AppendOnly (2)
const SIG_FLAGS: i64 = 3;

/// Options for [`prepare_with`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrepareOptions {
    /// Bytes reserved for the DER container; the hex slot is twice as wide
    pub reserved_size: usize,
    pub sub_filter: String,
    pub signer_name: Option<String>,
    pub reason: Option<String>,
    pub location: Option<String>,
}

impl Default for PrepareOptions {
    fn default() -> Self {
        Self {
            reserved_size: DEFAULT_RESERVED_SIZE,
            sub_filter: "ETSI.CAdES.detached".to_string(),
            signer_name: None,
            reason: None,
            location: None,
        }
    }
}

/// Output of a preparation call.
///
/// `placeholder_pdf` and `bytes_to_sign` belong together: embedding must be
/// done on this exact placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedDocument {
    pub placeholder_pdf: Vec<u8>,
    pub bytes_to_sign: Vec<u8>,
    pub byte_range: ByteRange,
    pub reserved_size: usize,
}

impl PreparedDocument {
    pub fn digest(&self, algorithm: DigestAlgorithm) -> ContentDigest {
        ContentDigest::compute(algorithm, &self.bytes_to_sign)
    }
}

/// Prepare `source` with default options
pub fn prepare(source: &[u8], field_name: &str) -> Result<PreparedDocument> {
    prepare_with(source, field_name, &PrepareOptions::default())
}

#[tracing::instrument(skip(source, options), fields(source_len = source.len()))]
pub fn prepare_with(
    source: &[u8],
    field_name: &str,
    options: &PrepareOptions,
) -> Result<PreparedDocument> {
    validate_field_name(field_name)?;
    if options.reserved_size == 0 {
        return Err(PadesError::format("Reserved signature size must be positive"));
    }

    let doc = PdfDocument::from_bytes(source)?;
    if doc.field_names()?.iter().any(|name| name == field_name) {
        return Err(PadesError::format(format!(
            "Signature field '{}' already exists",
            field_name
        )));
    }
    let page_id = doc
        .page_id(1)
        .ok_or_else(|| PadesError::format("Document has no pages"))?;
    let root_id = doc.root_id()?;

    let mut update = IncrementalDocument::create_from(source.to_vec(), doc.into_inner());
    update.new_document.version = update.get_prev_documents().version.clone();
    // filter parameters of the previous xref stream do not describe ours
    update.new_document.trailer.remove(b"DecodeParms");
    update.new_document.trailer.remove(b"XRefStm");

    let sig_dict_id = update
        .new_document
        .add_object(Object::Dictionary(signature_dictionary(options)));
    let field_id = update
        .new_document
        .add_object(Object::Dictionary(signature_field(sig_dict_id, page_id, field_name)));
    add_to_acroform(&mut update, root_id, field_id)?;
    add_to_page_annots(&mut update, page_id, field_id)?;

    let mut placeholder_pdf = Vec::new();
    update
        .save_to(&mut placeholder_pdf)
        .map_err(|e| PadesError::format(format!("Failed to append signature revision: {}", e)))?;
    if !placeholder_pdf.starts_with(source) {
        return Err(PadesError::format("Incremental update did not preserve the source bytes"));
    }

    let slot = SignatureSlot::locate(&placeholder_pdf, sig_dict_id)?;
    let byte_range = slot.expected_range(placeholder_pdf.len());
    slot.write_range(&mut placeholder_pdf, &byte_range)?;

    // hashed after the offsets are written, so the ByteRange itself is covered
    let bytes_to_sign = byte_range.signed_bytes(&placeholder_pdf)?;

    debug!(
        %byte_range,
        reserved = slot.capacity(),
        output_len = placeholder_pdf.len(),
        "Prepared signature placeholder"
    );

    Ok(PreparedDocument {
        placeholder_pdf,
        bytes_to_sign,
        byte_range,
        reserved_size: slot.capacity(),
    })
}

fn validate_field_name(field_name: &str) -> Result<()> {
    if field_name.is_empty() {
        return Err(PadesError::format("Signature field name must not be empty"));
    }
    // '.' separates partial names in qualified field names
    if field_name.contains('.') || field_name.chars().any(|c| c.is_control()) {
        return Err(PadesError::format(format!(
            "Invalid signature field name '{}'",
            field_name
        )));
    }
    Ok(())
}

fn literal(text: &str) -> Object {
    Object::String(text.as_bytes().to_vec(), StringFormat::Literal)
}

/// Build the signature dictionary.
///
/// ByteRange and Contents go first so they precede any caller-supplied
/// strings in the serialized dictionary.
fn signature_dictionary(options: &PrepareOptions) -> Dictionary {
    let mut sig_dict = Dictionary::new();
    sig_dict.set(
        "ByteRange",
        Object::Array(vec![
            Object::Integer(0),
            Object::Integer(BYTE_RANGE_PLACEHOLDER),
            Object::Integer(BYTE_RANGE_PLACEHOLDER),
            Object::Integer(BYTE_RANGE_PLACEHOLDER),
        ]),
    );
    sig_dict.set(
        "Contents",
        Object::String(vec![0; options.reserved_size], StringFormat::Hexadecimal),
    );
    sig_dict.set("Type", Object::Name(b"Sig".to_vec()));
    sig_dict.set("Filter", Object::Name(b"Adobe.PPKLite".to_vec()));
    sig_dict.set("SubFilter", Object::Name(options.sub_filter.as_bytes().to_vec()));

    // No /M entry: the signing time lives in the CMS container, and a
    // wall-clock value here would make preparation non-deterministic.
    if let Some(name) = &options.signer_name {
        sig_dict.set("Name", literal(name));
    }
    if let Some(reason) = &options.reason {
        sig_dict.set("Reason", literal(reason));
    }
    if let Some(location) = &options.location {
        sig_dict.set("Location", literal(location));
    }
    sig_dict
}

/// Build the merged field/widget dictionary with a zero-size rectangle
fn signature_field(sig_dict_id: ObjectId, page_id: ObjectId, field_name: &str) -> Dictionary {
    let mut field_dict = Dictionary::new();
    field_dict.set("Type", Object::Name(b"Annot".to_vec()));
    field_dict.set("Subtype", Object::Name(b"Widget".to_vec()));
    field_dict.set("FT", Object::Name(b"Sig".to_vec()));
    field_dict.set("T", literal(field_name));
    field_dict.set("V", Object::Reference(sig_dict_id));
    field_dict.set(
        "Rect",
        Object::Array(vec![
            Object::Integer(0),
            Object::Integer(0),
            Object::Integer(0),
            Object::Integer(0),
        ]),
    );
    field_dict.set("F", Object::Integer(WIDGET_FLAGS));
    field_dict.set("P", Object::Reference(page_id));
    field_dict
}

/// Add the field to the catalog's AcroForm, creating one when missing.
///
/// Every object that changes is copied into the new revision; the previous
/// revisions are only read.
fn add_to_acroform(update: &mut IncrementalDocument, root_id: ObjectId, field_id: ObjectId) -> Result<()> {
    let prev = update.get_prev_documents();
    let mut catalog = prev
        .get_object(root_id)
        .and_then(Object::as_dict)
        .map_err(|_| PadesError::format("Document catalog is not a dictionary"))?
        .clone();

    match catalog.get(b"AcroForm").ok().cloned() {
        Some(Object::Reference(id)) => {
            let mut acroform = prev
                .get_object(id)
                .and_then(Object::as_dict)
                .map_err(|_| PadesError::format("AcroForm is not a dictionary"))?
                .clone();
            append_field(prev, &mut acroform, field_id)?;
            update.new_document.set_object(id, Object::Dictionary(acroform));
        }
        Some(Object::Dictionary(mut acroform)) => {
            append_field(prev, &mut acroform, field_id)?;
            catalog.set("AcroForm", Object::Dictionary(acroform));
            update.new_document.set_object(root_id, Object::Dictionary(catalog));
        }
        Some(_) => return Err(PadesError::format("AcroForm is not a dictionary")),
        None => {
            let mut acroform = Dictionary::new();
            append_field(prev, &mut acroform, field_id)?;
            let id = update.new_document.add_object(Object::Dictionary(acroform));
            catalog.set("AcroForm", Object::Reference(id));
            update.new_document.set_object(root_id, Object::Dictionary(catalog));
        }
    }
    Ok(())
}

fn append_field(prev: &lopdf::Document, acroform: &mut Dictionary, field_id: ObjectId) -> Result<()> {
    let mut fields = match acroform.get(b"Fields") {
        Ok(Object::Reference(id)) => prev
            .get_object(*id)
            .and_then(Object::as_array)
            .map_err(|_| PadesError::format("AcroForm Fields is not an array"))?
            .clone(),
        Ok(obj) => obj
            .as_array()
            .map_err(|_| PadesError::format("AcroForm Fields is not an array"))?
            .clone(),
        Err(_) => Vec::new(),
    };
    fields.push(Object::Reference(field_id));
    acroform.set("Fields", Object::Array(fields));
    acroform.set("SigFlags", Object::Integer(SIG_FLAGS));
    Ok(())
}

/// Append the widget to the page's Annots, whether inline or referenced
fn add_to_page_annots(update: &mut IncrementalDocument, page_id: ObjectId, field_id: ObjectId) -> Result<()> {
    let prev = update.get_prev_documents();
    let mut page = prev
        .get_object(page_id)
        .and_then(Object::as_dict)
        .map_err(|_| PadesError::format("Page is not a dictionary"))?
        .clone();

    match page.get(b"Annots").ok().cloned() {
        Some(Object::Reference(annots_id)) => {
            let mut annots = prev
                .get_object(annots_id)
                .and_then(Object::as_array)
                .map_err(|_| PadesError::format("Page Annots is not an array"))?
                .clone();
            annots.push(Object::Reference(field_id));
            update.new_document.set_object(annots_id, Object::Array(annots));
        }
        Some(Object::Array(mut annots)) => {
            annots.push(Object::Reference(field_id));
            page.set("Annots", Object::Array(annots));
            update.new_document.set_object(page_id, Object::Dictionary(page));
        }
        Some(_) => return Err(PadesError::format("Page Annots is not an array")),
        None => {
            page.set("Annots", Object::Array(vec![Object::Reference(field_id)]));
            update.new_document.set_object(page_id, Object::Dictionary(page));
        }
    }
    Ok(())
}

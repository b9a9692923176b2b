//! PDF loading and form-field lookup using lopdf

use lopdf::{Dictionary, Document, Object, ObjectId};

use crate::error::{PadesError, Result};

/// Nested form fields deeper than this are treated as malformed
const MAX_FIELD_DEPTH: usize = 32;

/// Wrapper around lopdf::Document for placeholder operations
pub struct PdfDocument {
    pub(crate) doc: Document,
}

impl PdfDocument {
    /// Load a PDF from raw bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if !bytes.starts_with(b"%PDF-") {
            return Err(PadesError::format("Input does not start with a PDF header"));
        }
        let doc = Document::load_mem(bytes)
            .map_err(|e| PadesError::format(format!("PDF parse error: {}", e)))?;
        Ok(Self { doc })
    }

    /// Get the number of pages
    pub fn page_count(&self) -> usize {
        self.doc.get_pages().len()
    }

    /// Get page object ID for a given page number (1-indexed)
    pub fn page_id(&self, page_num: u32) -> Option<ObjectId> {
        self.doc.get_pages().get(&page_num).copied()
    }

    pub(crate) fn into_inner(self) -> Document {
        self.doc
    }

    /// Serialize the document
    pub fn save_to_bytes(&mut self) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        self.doc
            .save_to(&mut buffer)
            .map_err(|e| PadesError::format(format!("Failed to save PDF: {}", e)))?;
        Ok(buffer)
    }

    pub(crate) fn root_id(&self) -> Result<ObjectId> {
        self.doc
            .trailer
            .get(b"Root")
            .and_then(Object::as_reference)
            .map_err(|_| PadesError::format("Trailer has no document catalog"))
    }

    pub(crate) fn catalog(&self) -> Result<&Dictionary> {
        let root_id = self.root_id()?;
        self.doc
            .get_object(root_id)
            .and_then(Object::as_dict)
            .map_err(|_| PadesError::format("Document catalog is not a dictionary"))
    }

    /// Follow a reference to the object it points at
    pub(crate) fn resolve<'a>(&'a self, obj: &'a Object) -> Result<&'a Object> {
        match obj {
            Object::Reference(id) => self
                .doc
                .get_object(*id)
                .map_err(|e| PadesError::format(format!("Dangling reference {:?}: {}", id, e))),
            other => Ok(other),
        }
    }

    /// Fully qualified names of every terminal form field
    pub fn field_names(&self) -> Result<Vec<String>> {
        Ok(self
            .form_fields()?
            .into_iter()
            .map(|field| field.name)
            .collect())
    }

    /// Object id of the signature dictionary held by the named field
    pub fn signature_dictionary_id(&self, field_name: &str) -> Result<ObjectId> {
        let field = self
            .form_fields()?
            .into_iter()
            .find(|field| field.name == field_name)
            .ok_or_else(|| {
                PadesError::format(format!("Signature field '{}' not found", field_name))
            })?;

        if field.field_type.as_deref() != Some(b"Sig".as_slice()) {
            return Err(PadesError::format(format!(
                "Field '{}' is not a signature field",
                field_name
            )));
        }

        match field.value {
            Some(Object::Reference(id)) => Ok(id),
            Some(_) => Err(PadesError::format(format!(
                "Signature value of '{}' is not an indirect object",
                field_name
            ))),
            None => Err(PadesError::format(format!(
                "Signature field '{}' has no value",
                field_name
            ))),
        }
    }

    fn form_fields(&self) -> Result<Vec<FormField>> {
        let catalog = self.catalog()?;
        let acroform = match catalog.get(b"AcroForm") {
            Ok(obj) => self
                .resolve(obj)?
                .as_dict()
                .map_err(|_| PadesError::format("AcroForm is not a dictionary"))?,
            Err(_) => return Ok(Vec::new()),
        };
        let roots = match acroform.get(b"Fields") {
            Ok(obj) => self
                .resolve(obj)?
                .as_array()
                .map_err(|_| PadesError::format("AcroForm Fields is not an array"))?,
            Err(_) => return Ok(Vec::new()),
        };

        let mut fields = Vec::new();
        for field in roots {
            self.collect_fields(field, None, None, 0, &mut fields)?;
        }
        Ok(fields)
    }

    fn collect_fields(
        &self,
        obj: &Object,
        parent_name: Option<&str>,
        inherited_type: Option<&[u8]>,
        depth: usize,
        out: &mut Vec<FormField>,
    ) -> Result<()> {
        if depth > MAX_FIELD_DEPTH {
            return Err(PadesError::format("Form field tree is too deep"));
        }
        let dict = self
            .resolve(obj)?
            .as_dict()
            .map_err(|_| PadesError::format("Form field is not a dictionary"))?;

        let partial = match dict.get(b"T") {
            Ok(Object::String(bytes, _)) => Some(String::from_utf8_lossy(bytes).into_owned()),
            _ => None,
        };
        let name = match (parent_name, partial) {
            (Some(parent), Some(partial)) => Some(format!("{}.{}", parent, partial)),
            (Some(parent), None) => Some(parent.to_string()),
            (None, partial) => partial,
        };
        let field_type = match dict.get(b"FT") {
            Ok(Object::Name(name)) => Some(name.as_slice()),
            _ => inherited_type,
        };

        // Kids without their own /T are widget annotations of this field
        let child_fields: Vec<&Object> = match dict.get(b"Kids") {
            Ok(kids) => self
                .resolve(kids)?
                .as_array()
                .map_err(|_| PadesError::format("Field Kids is not an array"))?
                .iter()
                .filter(|kid| {
                    self.resolve(kid)
                        .ok()
                        .and_then(|k| k.as_dict().ok())
                        .map(|k| k.has(b"T"))
                        .unwrap_or(false)
                })
                .collect(),
            Err(_) => Vec::new(),
        };

        if child_fields.is_empty() {
            if let Some(name) = name {
                out.push(FormField {
                    name,
                    field_type: field_type.map(<[u8]>::to_vec),
                    value: dict.get(b"V").ok().cloned(),
                });
            }
            return Ok(());
        }

        for kid in child_fields {
            self.collect_fields(kid, name.as_deref(), field_type, depth + 1, out)?;
        }
        Ok(())
    }
}

struct FormField {
    name: String,
    field_type: Option<Vec<u8>>,
    value: Option<Object>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;

    #[test]
    fn test_rejects_non_pdf() {
        let err = PdfDocument::from_bytes(b"hello world").err().unwrap();
        assert!(matches!(err, PadesError::DocumentFormat(_)));
    }

    #[test]
    fn test_page_lookup() {
        let doc = PdfDocument::from_bytes(&fixtures::sample_pdf_with_pages(3)).unwrap();
        assert_eq!(doc.page_count(), 3);
        assert!(doc.page_id(1).is_some());
        assert!(doc.page_id(4).is_none());
    }

    #[test]
    fn test_blank_document_has_no_fields() {
        let doc = PdfDocument::from_bytes(&fixtures::sample_pdf()).unwrap();
        assert!(doc.field_names().unwrap().is_empty());
    }

    #[test]
    fn test_nested_field_names_are_qualified() {
        let doc = PdfDocument::from_bytes(&fixtures::pdf_with_nested_fields()).unwrap();
        let mut names = doc.field_names().unwrap();
        names.sort();
        assert_eq!(names, vec!["approvals.director", "approvals.manager", "comment"]);
    }

    #[test]
    fn test_signature_lookup_on_text_field_fails() {
        let doc = PdfDocument::from_bytes(&fixtures::pdf_with_nested_fields()).unwrap();
        let err = doc.signature_dictionary_id("comment").unwrap_err();
        assert!(err.to_string().contains("not a signature field"));
    }

    #[test]
    fn test_signature_lookup_missing_field() {
        let doc = PdfDocument::from_bytes(&fixtures::sample_pdf()).unwrap();
        assert!(doc.signature_dictionary_id("Signature1").is_err());
    }
}

//! Small, valid PDFs for tests

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream, StringFormat};

/// One-page document with a line of text
pub fn sample_pdf() -> Vec<u8> {
    sample_pdf_with_pages(1)
}

pub fn sample_pdf_with_pages(count: u32) -> Vec<u8> {
    let mut doc = Document::with_version("1.7");
    let (pages_id, _) = build_pages(&mut doc, count);
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    save(&mut doc)
}

/// Document whose referenced AcroForm already holds a signature field
pub fn pdf_with_signature_field(field_name: &str) -> Vec<u8> {
    let mut doc = Document::with_version("1.7");
    let (pages_id, first_page) = build_pages(&mut doc, 1);

    let sig_id = doc.add_object(dictionary! {
        "Type" => "Sig",
        "Filter" => "Adobe.PPKLite",
    });
    let field_id = doc.add_object(dictionary! {
        "Type" => "Annot",
        "Subtype" => "Widget",
        "FT" => "Sig",
        "T" => Object::String(field_name.as_bytes().to_vec(), StringFormat::Literal),
        "V" => sig_id,
        "P" => first_page,
        "Rect" => vec![0.into(), 0.into(), 0.into(), 0.into()],
    });
    let acroform_id = doc.add_object(dictionary! {
        "Fields" => vec![field_id.into()],
        "SigFlags" => 3,
    });
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
        "AcroForm" => acroform_id,
    });
    doc.trailer.set("Root", catalog_id);
    save(&mut doc)
}

/// Document with an inline AcroForm holding `approvals.{manager,director}`
/// signature fields and a `comment` text field
pub fn pdf_with_nested_fields() -> Vec<u8> {
    let mut doc = Document::with_version("1.7");
    let (pages_id, _) = build_pages(&mut doc, 1);

    let parent_id = doc.new_object_id();
    let manager_id = doc.add_object(dictionary! {
        "T" => Object::string_literal("manager"),
        "Parent" => parent_id,
    });
    let director_id = doc.add_object(dictionary! {
        "T" => Object::string_literal("director"),
        "Parent" => parent_id,
    });
    doc.objects.insert(
        parent_id,
        Object::Dictionary(dictionary! {
            "T" => Object::string_literal("approvals"),
            "FT" => "Sig",
            "Kids" => vec![manager_id.into(), director_id.into()],
        }),
    );
    let comment_id = doc.add_object(dictionary! {
        "T" => Object::string_literal("comment"),
        "FT" => "Tx",
        "V" => Object::string_literal("ok"),
    });

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
        "AcroForm" => dictionary! {
            "Fields" => vec![parent_id.into(), comment_id.into()],
        },
    });
    doc.trailer.set("Root", catalog_id);
    save(&mut doc)
}

/// DER SEQUENCE wrapping `body`, standing in for a CMS container
pub fn der_sequence(body: &[u8]) -> Vec<u8> {
    let mut out = vec![0x30];
    let len = body.len();
    if len < 0x80 {
        out.push(len as u8);
    } else if len <= 0xff {
        out.extend_from_slice(&[0x81, len as u8]);
    } else {
        out.extend_from_slice(&[0x82, (len >> 8) as u8, len as u8]);
    }
    out.extend_from_slice(body);
    out
}

/// DER-shaped container of `body_len` non-zero bytes
pub fn fake_container(body_len: usize) -> Vec<u8> {
    let body: Vec<u8> = (0..body_len).map(|i| (i % 251) as u8 + 1).collect();
    der_sequence(&body)
}

fn build_pages(doc: &mut Document, count: u32) -> (lopdf::ObjectId, lopdf::ObjectId) {
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });

    let mut kids = Vec::new();
    for n in 1..=count.max(1) {
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 18.into()]),
                Operation::new("Td", vec![72.into(), 720.into()]),
                Operation::new(
                    "Tj",
                    vec![Object::string_literal(format!("Contract page {}", n))],
                ),
                Operation::new("ET", vec![]),
            ],
        };
        let encoded = content.encode().unwrap_or_default();
        let content_id = doc.add_object(Stream::new(dictionary! {}, encoded));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            "Contents" => content_id,
            "Resources" => dictionary! {
                "Font" => dictionary! { "F1" => font_id },
            },
        });
        kids.push(page_id);
    }

    let first_page = kids[0];
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids.iter().map(|id| Object::Reference(*id)).collect::<Vec<_>>(),
            "Count" => kids.len() as i64,
        }),
    );
    (pages_id, first_page)
}

fn save(doc: &mut Document) -> Vec<u8> {
    let mut buffer = Vec::new();
    doc.save_to(&mut buffer)
        .unwrap_or_else(|e| panic!("fixture PDF failed to serialize: {}", e));
    buffer
}

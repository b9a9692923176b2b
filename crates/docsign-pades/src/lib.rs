//! PAdES signature placeholders for remote hash signing
//!
//! This crate provides the document side of hash-based remote signing:
//! - reserving a signature slot in a PDF and computing the exact bytes to sign
//! - embedding a CMS/PKCS#7 container returned by a signing service into that slot
//! - inspecting a signed document so the embedded range and container can be checked
//!
//! Preparation and embedding agree on offsets purely through the placeholder
//! bytes: the embedder never recomputes the byte range, it only fills the
//! reserved hex string in place.

pub mod digest;
pub mod embed;
pub mod error;
#[cfg(any(test, feature = "test-fixtures"))]
pub mod fixtures;
pub mod inspect;
pub mod parser;
pub mod prepare;
mod slot;

pub use digest::{ContentDigest, DigestAlgorithm};
pub use embed::embed;
pub use error::{PadesError, Result};
pub use inspect::{inspect, SignedRegion};
pub use parser::PdfDocument;
pub use prepare::{prepare, prepare_with, PrepareOptions, PreparedDocument, DEFAULT_RESERVED_SIZE};
pub use slot::ByteRange;

//! Content digests over the bytes a signature covers

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha384, Sha512};
use std::fmt;
use std::str::FromStr;

use crate::error::PadesError;

/// Hash algorithm used for the content digest sent to a signing service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    #[default]
    Sha256,
    Sha384,
    Sha512,
}

impl DigestAlgorithm {
    pub fn name(&self) -> &'static str {
        match self {
            DigestAlgorithm::Sha256 => "sha256",
            DigestAlgorithm::Sha384 => "sha384",
            DigestAlgorithm::Sha512 => "sha512",
        }
    }

    /// Digest length in bytes
    pub fn output_len(&self) -> usize {
        match self {
            DigestAlgorithm::Sha256 => 32,
            DigestAlgorithm::Sha384 => 48,
            DigestAlgorithm::Sha512 => 64,
        }
    }

    pub fn digest(&self, data: &[u8]) -> Vec<u8> {
        self.digest_parts(&[data])
    }

    /// Hash several slices as one contiguous message
    pub fn digest_parts(&self, parts: &[&[u8]]) -> Vec<u8> {
        fn run<D: Digest>(parts: &[&[u8]]) -> Vec<u8> {
            let mut hasher = D::new();
            for part in parts {
                hasher.update(part);
            }
            hasher.finalize().to_vec()
        }

        match self {
            DigestAlgorithm::Sha256 => run::<Sha256>(parts),
            DigestAlgorithm::Sha384 => run::<Sha384>(parts),
            DigestAlgorithm::Sha512 => run::<Sha512>(parts),
        }
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DigestAlgorithm {
    type Err = PadesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "").as_str() {
            "sha256" => Ok(DigestAlgorithm::Sha256),
            "sha384" => Ok(DigestAlgorithm::Sha384),
            "sha512" => Ok(DigestAlgorithm::Sha512),
            other => Err(PadesError::format(format!(
                "Unsupported digest algorithm: {}",
                other
            ))),
        }
    }
}

/// Algorithm-tagged hex digest, rendered as `sha256:<lowercase hex>`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentDigest {
    pub algorithm: DigestAlgorithm,
    pub hex: String,
}

impl ContentDigest {
    pub fn compute(algorithm: DigestAlgorithm, data: &[u8]) -> Self {
        Self {
            algorithm,
            hex: hex::encode(algorithm.digest(data)),
        }
    }

    /// Raw digest bytes
    pub fn bytes(&self) -> Vec<u8> {
        // hex is always produced by this type or validated by `from_str`
        hex::decode(&self.hex).unwrap_or_default()
    }

    /// Upper-case hex form, as hash-signing services expect it
    pub fn to_upper_hex(&self) -> String {
        self.hex.to_ascii_uppercase()
    }

    /// Whether `data` hashes to this digest under the same algorithm
    pub fn matches(&self, data: &[u8]) -> bool {
        ContentDigest::compute(self.algorithm, data) == *self
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.hex)
    }
}

impl FromStr for ContentDigest {
    type Err = PadesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (alg, hex_part) = s
            .split_once(':')
            .ok_or_else(|| PadesError::format("Digest must be tagged as <algorithm>:<hex>"))?;
        let algorithm: DigestAlgorithm = alg.parse()?;
        let raw = hex::decode(hex_part)
            .map_err(|e| PadesError::format(format!("Invalid digest hex: {}", e)))?;
        if raw.len() != algorithm.output_len() {
            return Err(PadesError::format(format!(
                "{} digest must be {} bytes, got {}",
                algorithm,
                algorithm.output_len(),
                raw.len()
            )));
        }
        Ok(Self {
            algorithm,
            hex: hex::encode(raw),
        })
    }
}

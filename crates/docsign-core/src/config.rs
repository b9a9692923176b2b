//! Signing pipeline settings

use docsign_pades::{DigestAlgorithm, DEFAULT_RESERVED_SIZE};
use serde::Deserialize;
use std::time::Duration;

/// Explicit settings handed to the service and provider backends
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SigningConfig {
    /// Upper bound on any single provider call
    #[serde(with = "seconds")]
    pub provider_timeout: Duration,
    #[serde(with = "seconds")]
    pub poll_interval: Duration,
    #[serde(with = "seconds")]
    pub expiry_interval: Duration,
    /// Consecutive poll failures before a request is escalated in the logs
    pub failure_escalation_threshold: u32,
    pub digest_algorithm: DigestAlgorithm,
    pub field_name: String,
    pub reserved_signature_size: usize,
    /// Public address used to build signing links and callback URLs
    pub public_base_url: String,
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            provider_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_secs(300),
            expiry_interval: Duration::from_secs(3600),
            failure_escalation_threshold: 5,
            digest_algorithm: DigestAlgorithm::Sha256,
            field_name: "Signature1".to_string(),
            reserved_signature_size: DEFAULT_RESERVED_SIZE,
            public_base_url: "http://localhost:3000".to_string(),
        }
    }
}

impl SigningConfig {
    /// Base URL without a trailing slash
    pub fn base_url(&self) -> &str {
        self.public_base_url.trim_end_matches('/')
    }

    pub fn callback_url(&self, token: &str) -> String {
        format!("{}/signature/callback/{}", self.base_url(), token)
    }
}

mod seconds {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SigningConfig::default();
        assert_eq!(config.provider_timeout, Duration::from_secs(30));
        assert_eq!(config.failure_escalation_threshold, 5);
        assert_eq!(config.reserved_signature_size, 16_384);
        assert_eq!(config.field_name, "Signature1");
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: SigningConfig =
            serde_json::from_str(r#"{"poll_interval": 60, "public_base_url": "https://sign.example.com/"}"#)
                .unwrap();
        assert_eq!(config.poll_interval, Duration::from_secs(60));
        assert_eq!(config.expiry_interval, Duration::from_secs(3600));
        assert_eq!(
            config.callback_url("abc"),
            "https://sign.example.com/signature/callback/abc"
        );
    }
}

//! Simulated backend for demos and tests
//!
//! Nothing is signed cryptographically. A signer "signs" by visiting the
//! confirmation link from their invitation, which feeds a signed update
//! through the normal reconciliation path.

use async_trait::async_trait;
use docsign_pades::ContentDigest;
use tracing::info;
use uuid::Uuid;

use super::{CancelOutcome, ProviderGateway, ResultArtifact, StatusReport, SubmitReceipt};
use crate::error::{Result, SigningError};
use crate::model::{SignatureRequest, Signer, SignerState};
use crate::reconcile::{OverallStatus, ReportedStatus, SignerKey, SignerUpdate};

pub struct SimulatedProvider {
    base_url: String,
}

impl SimulatedProvider {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Confirmation page for one signer
    pub fn signing_url(&self, request: &SignatureRequest, signer: &Signer) -> String {
        format!(
            "{}/signature/demo/{}/{}/{}",
            self.base_url,
            request.id,
            signer.id,
            request.token().link_secret(signer.id)
        )
    }
}

fn short_ref(len: usize) -> String {
    Uuid::new_v4().simple().to_string()[..len].to_ascii_uppercase()
}

/// DER SEQUENCE { OCTET STRING digest } standing in for a CMS container
fn stand_in_container(digest: &ContentDigest) -> Vec<u8> {
    let bytes = digest.bytes();
    let mut octets = vec![0x04, bytes.len() as u8];
    octets.extend_from_slice(&bytes);
    let mut container = vec![0x30, octets.len() as u8];
    container.extend_from_slice(&octets);
    container
}

#[async_trait]
impl ProviderGateway for SimulatedProvider {
    fn backend(&self) -> &'static str {
        "simulated"
    }

    async fn test_connection(&self) -> Result<()> {
        Ok(())
    }

    async fn submit(
        &self,
        request: &SignatureRequest,
        _digest: &ContentDigest,
        signers: &[&Signer],
    ) -> Result<SubmitReceipt> {
        let provider_reference = request
            .provider_reference()
            .map(str::to_string)
            .unwrap_or_else(|| format!("SIM-{}", short_ref(8)));
        let signer_refs = signers
            .iter()
            .map(|s| (s.id, format!("SIM-SIGNER-{}", short_ref(16))))
            .collect();

        info!(
            request_id = %request.id,
            provider_reference = %provider_reference,
            signers = signers.len(),
            "Simulated submission"
        );
        Ok(SubmitReceipt::new(provider_reference, signer_refs))
    }

    /// Echoes the local signer states; signing only happens through the link
    async fn poll_status(&self, request: &SignatureRequest) -> Result<StatusReport> {
        let signers = request
            .signers
            .iter()
            .filter_map(|s| {
                let reference = s.provider_signer_ref.clone()?;
                let status = match s.state() {
                    SignerState::Signed => ReportedStatus::Signed,
                    SignerState::Refused => ReportedStatus::Refused,
                    SignerState::Waiting | SignerState::Sent => ReportedStatus::Pending,
                };
                Some(SignerUpdate {
                    signer: SignerKey::ProviderRef(reference),
                    status,
                    signed_at: s.signed_at,
                    signature_value: None,
                })
            })
            .collect();
        Ok(StatusReport {
            overall: OverallStatus::InProgress,
            signers,
        })
    }

    async fn download_result(&self, request: &SignatureRequest) -> Result<ResultArtifact> {
        let digest = request
            .content_hash()
            .ok_or_else(|| SigningError::Provider("Request has no content hash".into()))?;
        Ok(ResultArtifact::SignatureContainer(stand_in_container(digest)))
    }

    async fn cancel(&self, request: &SignatureRequest) -> Result<CancelOutcome> {
        info!(request_id = %request.id, "Simulated cancellation");
        Ok(CancelOutcome::Cancelled)
    }

    fn signing_reference(&self, request: &SignatureRequest, signer: &Signer) -> Option<String> {
        Some(self.signing_url(request, signer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DocumentId, ProviderId, SignerContact, SignerRole, SourceDocument};
    use docsign_pades::DigestAlgorithm;

    fn request() -> SignatureRequest {
        let mut request = SignatureRequest::new(
            "t",
            ProviderId::from("sim"),
            SourceDocument {
                document_id: DocumentId("d".into()),
                filename: "d.pdf".into(),
            },
            "Signature1",
        );
        request.signers.push(Signer::new(
            SignerRole::Internal,
            1,
            SignerContact {
                name: "Lan".into(),
                email: "lan@example.com".into(),
                subject_id: None,
                certificate_serial: None,
            },
        ));
        request
    }

    #[tokio::test]
    async fn test_submit_refs() {
        let provider = SimulatedProvider::new("http://localhost:3000/");
        let request = request();
        let digest = ContentDigest::compute(DigestAlgorithm::Sha256, b"x");
        let signers: Vec<&Signer> = request.signers.iter().collect();
        let receipt = provider.submit(&request, &digest, &signers).await.unwrap();

        assert!(receipt.provider_reference.starts_with("SIM-"));
        assert_eq!(receipt.provider_reference.len(), 12);
        assert_eq!(receipt.signer_refs.len(), 1);
        assert!(receipt.signer_refs[0].1.starts_with("SIM-SIGNER-"));
        assert_eq!(receipt.signer_refs[0].1.len(), "SIM-SIGNER-".len() + 16);
    }

    #[test]
    fn test_signing_url() {
        let provider = SimulatedProvider::new("http://localhost:3000/");
        let request = request();
        let signer = &request.signers[0];
        let url = provider.signing_url(&request, signer);
        assert_eq!(
            url,
            format!(
                "http://localhost:3000/signature/demo/{}/{}/{}",
                request.id,
                signer.id,
                request.token().link_secret(signer.id)
            )
        );
        assert!(!url.contains(request.token().as_str()));
    }

    #[test]
    fn test_stand_in_container_is_der() {
        let digest = ContentDigest::compute(DigestAlgorithm::Sha256, b"x");
        let container = stand_in_container(&digest);
        assert_eq!(container[0], 0x30);
        assert_eq!(container[1] as usize, container.len() - 2);
        assert_eq!(&container[4..], digest.bytes().as_slice());
    }
}

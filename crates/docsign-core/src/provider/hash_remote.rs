//! Hash-signing remote backend (SmartCA-style)
//!
//! Each signer gets their own transaction carrying the upper-case hex
//! digest of the prepared document. The signer approves it out of band on
//! their device; a later status call returns the base64 CMS container as
//! `signature_value`.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::Utc;
use docsign_pades::ContentDigest;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::{ProviderGateway, ResultArtifact, StatusReport, SubmitReceipt};
use crate::config::SigningConfig;
use crate::error::{Result, SigningError};
use crate::flow;
use crate::model::{ProviderConfig, Secret, SignatureRequest, Signer};
use crate::reconcile::{OverallStatus, ReportedStatus, SignerKey, SignerUpdate};

const BACKEND: &str = "hash_remote";

/// Transaction states that end a signer's transaction without a signature
const REFUSED_STATES: &[&str] = &["rejected", "refused", "cancel", "canceled", "cancelled", "expired", "failed"];

pub struct HashRemoteProvider {
    client: reqwest::Client,
    base_url: String,
    sp_id: String,
    sp_password: Secret,
}

#[derive(Debug, Serialize)]
struct SignPayload<'a> {
    sp_id: &'a str,
    sp_password: &'a str,
    user_id: &'a str,
    transaction_id: &'a str,
    transaction_desc: &'a str,
    serial_number: &'a str,
    time_stamp: String,
    sign_files: Vec<SignFile<'a>>,
}

#[derive(Debug, Serialize)]
struct SignFile<'a> {
    doc_id: &'a str,
    file_type: &'static str,
    sign_type: &'static str,
    data_to_be_signed: String,
}

#[derive(Debug, Serialize)]
struct CertificatePayload<'a> {
    sp_id: &'a str,
    sp_password: &'a str,
    user_id: &'a str,
    serial_number: &'a str,
    transaction_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    status_code: Option<i64>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Option<T>,
}

#[derive(Debug, Default, Deserialize)]
struct SignData {
    #[serde(default)]
    transaction_id: Option<String>,
    #[serde(default)]
    tran_code: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StatusData {
    #[serde(default)]
    transaction_status: Option<String>,
    #[serde(default)]
    signatures: Vec<SignatureItem>,
}

#[derive(Debug, Deserialize)]
struct SignatureItem {
    #[serde(default)]
    doc_id: Option<String>,
    #[serde(default)]
    signature_value: Option<String>,
}

/// Outcome of one transaction status call
#[derive(Debug, PartialEq, Eq)]
enum TransactionStatus {
    Pending,
    Signed(String),
    Refused,
}

impl HashRemoteProvider {
    pub fn new(config: &ProviderConfig, settings: &SigningConfig) -> Result<Self> {
        let (Some(base_url), Some(sp_id), Some(sp_password)) = (
            config.base_url.as_deref(),
            config.client_id.as_deref(),
            config.client_secret.clone(),
        ) else {
            return Err(SigningError::ProviderNotConfigured(format!(
                "{}: base_url, client_id and client_secret are required",
                config.id
            )));
        };

        let client = reqwest::Client::builder()
            .timeout(settings.provider_timeout)
            .build()
            .map_err(|e| SigningError::Provider(format!("HTTP client error: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            sp_id: sp_id.to_string(),
            sp_password,
        })
    }

    /// POST and unwrap the `{status_code, message, data}` envelope, logging
    /// operation, duration and outcome
    async fn post<P, T>(&self, operation: &'static str, path: &str, payload: &P) -> Result<T>
    where
        P: Serialize + ?Sized + Sync,
        T: DeserializeOwned + Default,
    {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        let started = Instant::now();
        let result = self.exchange(&url, payload).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match &result {
            Ok(_) => info!(backend = BACKEND, operation, elapsed_ms, success = true, "Provider call"),
            Err(e) => warn!(
                backend = BACKEND,
                operation,
                elapsed_ms,
                success = false,
                error = %e,
                "Provider call"
            ),
        }
        result
    }

    async fn exchange<P, T>(&self, url: &str, payload: &P) -> Result<T>
    where
        P: Serialize + ?Sized + Sync,
        T: DeserializeOwned + Default,
    {
        let response = self
            .client
            .post(url)
            .json(payload)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if status.is_server_error() {
            return Err(SigningError::Transient(format!("HTTP {}", status)));
        }
        if !status.is_success() {
            return Err(SigningError::Provider(format!("HTTP {}", status)));
        }

        let envelope: Envelope<T> = response
            .json()
            .await
            .map_err(|e| SigningError::Provider(format!("Invalid response body: {}", e)))?;
        if let Some(code) = envelope.status_code {
            if code != 200 {
                return Err(SigningError::Provider(format!(
                    "status_code {}: {}",
                    code,
                    envelope.message.unwrap_or_default()
                )));
            }
        }
        Ok(envelope.data.unwrap_or_default())
    }

    async fn transaction_status(&self, transaction_id: &str, doc_id: Option<&str>) -> Result<TransactionStatus> {
        let path = format!("v1/signatures/sign/{}/status", transaction_id);
        let data: StatusData = self
            .post("poll_status", &path, &serde_json::json!({}))
            .await?;

        let item = doc_id
            .and_then(|doc_id| {
                data.signatures
                    .iter()
                    .find(|item| item.doc_id.as_deref() == Some(doc_id))
            })
            .or_else(|| data.signatures.first());
        if let Some(value) = item.and_then(|item| item.signature_value.as_deref()) {
            if !value.trim().is_empty() {
                return Ok(TransactionStatus::Signed(value.to_string()));
            }
        }

        let refused = data
            .transaction_status
            .map(|s| REFUSED_STATES.contains(&s.to_ascii_lowercase().as_str()))
            .unwrap_or(false);
        Ok(if refused {
            TransactionStatus::Refused
        } else {
            TransactionStatus::Pending
        })
    }
}

fn transport_error(err: reqwest::Error) -> SigningError {
    if err.is_builder() {
        SigningError::Provider(format!("Invalid request: {}", err))
    } else {
        SigningError::Transient(format!("Transport failure: {}", err))
    }
}

fn short_hex() -> String {
    Uuid::new_v4().simple().to_string()[..12].to_ascii_uppercase()
}

fn decode_container(value: &str) -> Result<Vec<u8>> {
    let compact: String = value.chars().filter(|c| !c.is_whitespace()).collect();
    STANDARD
        .decode(compact)
        .map_err(|e| SigningError::Provider(format!("signature_value is not base64: {}", e)))
}

#[async_trait]
impl ProviderGateway for HashRemoteProvider {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    #[instrument(skip(self))]
    async fn test_connection(&self) -> Result<()> {
        let transaction_id = format!("SP_CA_{}", short_hex());
        let payload = CertificatePayload {
            sp_id: &self.sp_id,
            sp_password: self.sp_password.expose(),
            user_id: "",
            serial_number: "",
            transaction_id: &transaction_id,
        };
        self.post::<_, serde_json::Value>("test_connection", "v1/credentials/get_certificate", &payload)
            .await
            .map(|_| ())
            .map_err(|e| SigningError::ProviderUnavailable(e.to_string()))
    }

    #[instrument(skip_all, fields(request_id = %request.id, signers = signers.len()))]
    async fn submit(
        &self,
        request: &SignatureRequest,
        digest: &ContentDigest,
        signers: &[&Signer],
    ) -> Result<SubmitReceipt> {
        for signer in signers {
            if signer.contact.subject_id.as_deref().map_or(true, str::is_empty) {
                return Err(SigningError::Validation(format!(
                    "Signer {} has no subject identifier for hash signing",
                    signer.contact.email
                )));
            }
        }

        let provider_reference = request
            .provider_reference()
            .map(str::to_string)
            .unwrap_or_else(|| format!("DOC-{}", short_hex()));
        let hash = digest.to_upper_hex();

        let mut signer_refs = Vec::with_capacity(signers.len());
        for signer in signers {
            let transaction_id = format!("SP_CA_{}", short_hex());
            let payload = SignPayload {
                sp_id: &self.sp_id,
                sp_password: self.sp_password.expose(),
                user_id: signer.contact.subject_id.as_deref().unwrap_or_default(),
                transaction_id: &transaction_id,
                transaction_desc: &request.title,
                serial_number: signer.contact.certificate_serial.as_deref().unwrap_or_default(),
                time_stamp: Utc::now().format("%Y%m%d%H%M%SZ").to_string(),
                sign_files: vec![SignFile {
                    doc_id: &provider_reference,
                    file_type: "pdf",
                    sign_type: "hash",
                    data_to_be_signed: hash.clone(),
                }],
            };
            let data: SignData = match self.post("submit", "v1/signatures/sign", &payload).await {
                Ok(data) => data,
                Err(err) if signer_refs.is_empty() => return Err(err),
                Err(err) => {
                    warn!(
                        signer = %signer.contact.email,
                        opened = signer_refs.len(),
                        error = %err,
                        "Submission interrupted after some transactions were opened"
                    );
                    return Ok(SubmitReceipt {
                        provider_reference: provider_reference.clone(),
                        signer_refs,
                        interrupted: Some(err),
                    });
                }
            };
            if let Some(code) = &data.tran_code {
                info!(signer = %signer.contact.email, tran_code = %code, "Signer transaction opened");
            }
            signer_refs.push((signer.id, data.transaction_id.unwrap_or(transaction_id)));
        }

        Ok(SubmitReceipt::new(provider_reference, signer_refs))
    }

    #[instrument(skip_all, fields(request_id = %request.id))]
    async fn poll_status(&self, request: &SignatureRequest) -> Result<StatusReport> {
        let mut signers = Vec::new();
        for signer in &request.signers {
            if signer.state().is_terminal() {
                continue;
            }
            let Some(transaction_id) = signer.provider_signer_ref.as_deref() else {
                continue;
            };
            let status = self
                .transaction_status(transaction_id, request.provider_reference())
                .await?;
            let update = match status {
                TransactionStatus::Pending => continue,
                TransactionStatus::Signed(value) => SignerUpdate {
                    signer: SignerKey::ProviderRef(transaction_id.to_string()),
                    status: ReportedStatus::Signed,
                    signed_at: Some(Utc::now()),
                    signature_value: Some(value),
                },
                TransactionStatus::Refused => SignerUpdate {
                    signer: SignerKey::ProviderRef(transaction_id.to_string()),
                    status: ReportedStatus::Refused,
                    signed_at: None,
                    signature_value: None,
                },
            };
            signers.push(update);
        }
        Ok(StatusReport {
            overall: OverallStatus::InProgress,
            signers,
        })
    }

    /// Container of the last signer in flow order
    #[instrument(skip_all, fields(request_id = %request.id))]
    async fn download_result(&self, request: &SignatureRequest) -> Result<ResultArtifact> {
        let last = flow::in_flow_order(request.flow, &request.signers)
            .last()
            .and_then(|id| request.signer(*id))
            .ok_or_else(|| SigningError::Provider("Request has no signers".into()))?;

        let value = match &last.signature_value {
            Some(value) => value.clone(),
            None => {
                let transaction_id = last.provider_signer_ref.as_deref().ok_or_else(|| {
                    SigningError::Provider("Last signer has no transaction".into())
                })?;
                match self
                    .transaction_status(transaction_id, request.provider_reference())
                    .await?
                {
                    TransactionStatus::Signed(value) => value,
                    _ => {
                        return Err(SigningError::Provider(
                            "Signature value not available yet".into(),
                        ))
                    }
                }
            }
        };
        Ok(ResultArtifact::SignatureContainer(decode_container(&value)?))
    }
}

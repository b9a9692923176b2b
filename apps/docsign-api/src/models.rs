//! Data models for DocSign API

use chrono::{DateTime, NaiveDate, Utc};
use docsign_core::{
    AuditEvent, Contact, NewSigner, ProviderId, RequestState, SignatureRequest, Signer,
    SignerRole, SignerState, SigningConfig, SigningFlow,
};
use serde::{Deserialize, Serialize};

/// Request to create a signature request
#[derive(Debug, Clone, Deserialize)]
pub struct CreateRequestBody {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub provider_id: ProviderId,
    #[serde(default)]
    pub flow: SigningFlow,
    #[serde(default)]
    pub deadline: Option<NaiveDate>,
    pub filename: String,
    pub pdf_base64: String,
    #[serde(default)]
    pub requester: Option<Contact>,
    #[serde(default)]
    pub field_name: Option<String>,
    /// Validated together with the request; one bad entry rejects all
    #[serde(default)]
    pub signers: Vec<NewSigner>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignerResponse {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: SignerRole,
    pub order: u32,
    pub state: SignerState,
    pub provider_signer_ref: Option<String>,
    pub invited_at: Option<DateTime<Utc>>,
    pub signed_at: Option<DateTime<Utc>>,
}

impl From<&Signer> for SignerResponse {
    fn from(signer: &Signer) -> Self {
        Self {
            id: signer.id.to_string(),
            name: signer.contact.name.clone(),
            email: signer.contact.email.clone(),
            role: signer.role,
            order: signer.order,
            state: signer.state(),
            provider_signer_ref: signer.provider_signer_ref.clone(),
            invited_at: signer.invited_at,
            signed_at: signer.signed_at,
        }
    }
}

/// Signature request response for API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestResponse {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub state: RequestState,
    pub provider_id: ProviderId,
    pub provider_reference: Option<String>,
    pub flow: SigningFlow,
    pub deadline: Option<NaiveDate>,
    pub filename: String,
    pub field_name: String,
    pub content_hash: Option<String>,
    pub signed_document_available: bool,
    /// Webhook address to register with the provider
    pub callback_url: String,
    pub signers: Vec<SignerResponse>,
    pub audit_events: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RequestResponse {
    pub fn new(request: &SignatureRequest, config: &SigningConfig) -> Self {
        Self {
            id: request.id.to_string(),
            title: request.title.clone(),
            description: request.description.clone(),
            state: request.state(),
            provider_id: request.provider_id.clone(),
            provider_reference: request.provider_reference().map(str::to_string),
            flow: request.flow,
            deadline: request.deadline,
            filename: request.source.filename.clone(),
            field_name: request.field_name.clone(),
            content_hash: request.content_hash().map(|d| d.to_string()),
            signed_document_available: request.result().is_some(),
            callback_url: config.callback_url(request.token().as_str()),
            signers: request.signers.iter().map(SignerResponse::from).collect(),
            audit_events: request.audit.events.len(),
            created_at: request.created_at,
            updated_at: request.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditResponse {
    pub verified: bool,
    pub events: Vec<AuditEvent>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResponse {
    pub id: ProviderId,
    pub backend: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpirySweepResponse {
    pub expired: Vec<String>,
}

//! Provider gateways
//!
//! Every signing backend implements [`ProviderGateway`]. Configured
//! providers become a [`ProviderBackend`], a closed set of variants chosen
//! by [`BackendKind`]; no backend is looked up by name at call time.

pub mod hash_remote;
pub mod simulated;

use async_trait::async_trait;
use docsign_pades::ContentDigest;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

use crate::config::SigningConfig;
use crate::error::{Result, SigningError};
use crate::model::{BackendKind, ProviderConfig, ProviderId, SignatureRequest, Signer, SignerId};
use crate::reconcile::{OverallStatus, SignerUpdate};

pub use hash_remote::HashRemoteProvider;
pub use simulated::SimulatedProvider;

/// Provider answer to a submission
#[derive(Debug)]
pub struct SubmitReceipt {
    /// Session reference shared by every signer of the request
    pub provider_reference: String,
    pub signer_refs: Vec<(SignerId, String)>,
    /// Set when the provider stopped accepting transactions part way
    /// through. The refs above were opened before that and are live.
    pub interrupted: Option<SigningError>,
}

impl SubmitReceipt {
    pub fn new(provider_reference: String, signer_refs: Vec<(SignerId, String)>) -> Self {
        Self {
            provider_reference,
            signer_refs,
            interrupted: None,
        }
    }

    pub fn opened(&self) -> Vec<SignerId> {
        self.signer_refs.iter().map(|(id, _)| *id).collect()
    }
}

/// Snapshot of what the provider knows about a request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusReport {
    pub overall: OverallStatus,
    pub signers: Vec<SignerUpdate>,
}

/// What `download_result` hands back
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultArtifact {
    /// A finished signed PDF
    Document(Vec<u8>),
    /// A CMS container to embed into the locally kept placeholder
    SignatureContainer(Vec<u8>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled,
    /// The backend has no cancel operation
    Unsupported,
}

/// Uniform contract over remote signing backends
#[async_trait]
pub trait ProviderGateway: Send + Sync {
    /// Backend name for logs and errors
    fn backend(&self) -> &'static str;

    async fn test_connection(&self) -> Result<()>;

    /// Hand `signers` the content digest to sign.
    ///
    /// Called once per signer group; `request.provider_reference()` is set
    /// from the second call on and must be reused. An error is only returned
    /// when nothing was opened; once a transaction exists the receipt carries
    /// it together with the failure in `interrupted`.
    async fn submit(
        &self,
        request: &SignatureRequest,
        digest: &ContentDigest,
        signers: &[&Signer],
    ) -> Result<SubmitReceipt>;

    async fn poll_status(&self, request: &SignatureRequest) -> Result<StatusReport>;

    async fn download_result(&self, _request: &SignatureRequest) -> Result<ResultArtifact> {
        Err(SigningError::ProviderCapabilityMissing {
            backend: self.backend(),
            operation: "download_result",
        })
    }

    /// Best effort; backends without a cancel operation only log
    async fn cancel(&self, request: &SignatureRequest) -> Result<CancelOutcome> {
        warn!(
            backend = self.backend(),
            request_id = %request.id,
            "Provider has no cancel operation, cancelling locally only"
        );
        Ok(CancelOutcome::Unsupported)
    }

    /// Link or reference code put in a signer's invitation
    fn signing_reference(&self, _request: &SignatureRequest, signer: &Signer) -> Option<String> {
        signer.provider_signer_ref.clone()
    }
}

/// A configured provider
pub enum ProviderBackend {
    Simulated(SimulatedProvider),
    HashRemote(HashRemoteProvider),
}

impl ProviderBackend {
    pub fn from_config(config: &ProviderConfig, settings: &SigningConfig) -> Result<Self> {
        match config.backend {
            BackendKind::Simulated => Ok(ProviderBackend::Simulated(SimulatedProvider::new(
                settings.base_url(),
            ))),
            BackendKind::HashRemote => Ok(ProviderBackend::HashRemote(HashRemoteProvider::new(
                config, settings,
            )?)),
        }
    }

    fn inner(&self) -> &dyn ProviderGateway {
        match self {
            ProviderBackend::Simulated(p) => p,
            ProviderBackend::HashRemote(p) => p,
        }
    }
}

#[async_trait]
impl ProviderGateway for ProviderBackend {
    fn backend(&self) -> &'static str {
        self.inner().backend()
    }

    async fn test_connection(&self) -> Result<()> {
        self.inner().test_connection().await
    }

    async fn submit(
        &self,
        request: &SignatureRequest,
        digest: &ContentDigest,
        signers: &[&Signer],
    ) -> Result<SubmitReceipt> {
        self.inner().submit(request, digest, signers).await
    }

    async fn poll_status(&self, request: &SignatureRequest) -> Result<StatusReport> {
        self.inner().poll_status(request).await
    }

    async fn download_result(&self, request: &SignatureRequest) -> Result<ResultArtifact> {
        self.inner().download_result(request).await
    }

    async fn cancel(&self, request: &SignatureRequest) -> Result<CancelOutcome> {
        self.inner().cancel(request).await
    }

    fn signing_reference(&self, request: &SignatureRequest, signer: &Signer) -> Option<String> {
        self.inner().signing_reference(request, signer)
    }
}

/// Gateways by provider id
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    gateways: HashMap<ProviderId, Arc<dyn ProviderGateway>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build every configured provider
    pub fn from_configs(configs: &[ProviderConfig], settings: &SigningConfig) -> Result<Self> {
        let mut registry = Self::new();
        for config in configs {
            let backend = ProviderBackend::from_config(config, settings)?;
            registry.register(config.id.clone(), Arc::new(backend));
        }
        Ok(registry)
    }

    pub fn register(&mut self, id: ProviderId, gateway: Arc<dyn ProviderGateway>) {
        self.gateways.insert(id, gateway);
    }

    pub fn get(&self, id: &ProviderId) -> Result<Arc<dyn ProviderGateway>> {
        self.gateways
            .get(id)
            .cloned()
            .ok_or_else(|| SigningError::ProviderNotConfigured(id.to_string()))
    }

    pub fn contains(&self, id: &ProviderId) -> bool {
        self.gateways.contains_key(id)
    }

    pub fn ids(&self) -> Vec<ProviderId> {
        let mut ids: Vec<ProviderId> = self.gateways.keys().cloned().collect();
        ids.sort_by(|a, b| a.0.cmp(&b.0));
        ids
    }
}

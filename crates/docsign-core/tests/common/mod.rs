//! Shared harness for service-level tests
#![allow(dead_code)]

use async_trait::async_trait;
use docsign_core::{
    CallbackPayload, Contact, DocumentStore, MemoryDocumentStore, MemoryRequestStore, NewRequest,
    NewSigner, OverallStatus, ProviderBackend, ProviderGateway, ProviderId, ProviderRegistry,
    RecordingNotifier, ReportedStatus, RequestId, RequestStore, ResultArtifact, SignatureRequest,
    SignatureService, Signer, SignerContact, SignerId, SignerKey, SignerRole, SignerUpdate,
    SigningConfig, SigningError, SigningFlow, SimulatedProvider, StatusReport, SubmitReceipt,
};
use docsign_pades::ContentDigest;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const REQUESTER: &str = "owner@example.com";

pub struct Harness {
    pub service: Arc<SignatureService>,
    pub requests: Arc<MemoryRequestStore>,
    pub documents: Arc<MemoryDocumentStore>,
    pub notifier: Arc<RecordingNotifier>,
    pub provider_id: ProviderId,
}

impl Harness {
    pub fn simulated() -> Self {
        let gateway = ProviderBackend::Simulated(SimulatedProvider::new("http://localhost:3000"));
        Self::with_gateway(Arc::new(gateway), SigningConfig::default())
    }

    pub fn with_gateway(gateway: Arc<dyn ProviderGateway>, config: SigningConfig) -> Self {
        let provider_id = ProviderId::from("demo");
        let mut registry = ProviderRegistry::new();
        registry.register(provider_id.clone(), gateway);
        Self::with_registry(registry, provider_id, config)
    }

    pub fn with_registry(registry: ProviderRegistry, provider_id: ProviderId, config: SigningConfig) -> Self {
        Self::build(registry, provider_id, config, |requests| requests as Arc<dyn RequestStore>)
    }

    /// Simulated provider behind a store that rejects saves on demand
    pub fn with_failing_saves() -> (Self, Arc<SaveFailingStore>) {
        let provider_id = ProviderId::from("demo");
        let mut registry = ProviderRegistry::new();
        let gateway = ProviderBackend::Simulated(SimulatedProvider::new("http://localhost:3000"));
        registry.register(provider_id.clone(), Arc::new(gateway));
        let mut wrapper = None;
        let harness = Self::build(registry, provider_id, SigningConfig::default(), |requests| {
            let store = Arc::new(SaveFailingStore::new(requests));
            wrapper = Some(store.clone());
            store as Arc<dyn RequestStore>
        });
        (harness, wrapper.unwrap())
    }

    fn build(
        registry: ProviderRegistry,
        provider_id: ProviderId,
        config: SigningConfig,
        wrap: impl FnOnce(Arc<MemoryRequestStore>) -> Arc<dyn RequestStore>,
    ) -> Self {
        let requests = Arc::new(MemoryRequestStore::new());
        let documents = Arc::new(MemoryDocumentStore::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let service = Arc::new(SignatureService::new(
            wrap(requests.clone()),
            documents.clone(),
            notifier.clone(),
            registry,
            config,
        ));
        Self {
            service,
            requests,
            documents,
            notifier,
            provider_id,
        }
    }

    /// Draft request with one signer per `(email, order)`
    pub async fn draft(&self, flow: SigningFlow, signers: &[(&str, u32)]) -> (RequestId, Vec<SignerId>) {
        let request = self
            .service
            .create_request(NewRequest {
                title: "Service agreement".into(),
                description: None,
                provider_id: self.provider_id.clone(),
                flow,
                deadline: None,
                filename: "agreement.pdf".into(),
                document: docsign_pades::fixtures::sample_pdf(),
                requester: Some(Contact {
                    name: "Owner".into(),
                    email: REQUESTER.into(),
                }),
                field_name: None,
                signers: Vec::new(),
            })
            .await
            .unwrap();

        let mut ids = Vec::new();
        for (email, order) in signers {
            let signer = self
                .service
                .add_signer(
                    request.id,
                    NewSigner {
                        role: SignerRole::Internal,
                        order: *order,
                        contact: contact(email),
                    },
                )
                .await
                .unwrap();
            ids.push(signer.id);
        }
        (request.id, ids)
    }

    pub async fn sent(&self, flow: SigningFlow, signers: &[(&str, u32)]) -> (SignatureRequest, Vec<SignerId>) {
        let (id, signer_ids) = self.draft(flow, signers).await;
        let request = self.service.send(id).await.unwrap();
        (request, signer_ids)
    }

    pub async fn load(&self, id: RequestId) -> SignatureRequest {
        self.requests.load(id).await.unwrap()
    }

    pub async fn signed_bytes(&self, request: &SignatureRequest) -> Vec<u8> {
        let id = request.result().expect("request has a signed document");
        self.documents.get_bytes(id).await.unwrap()
    }
}

pub fn contact(email: &str) -> SignerContact {
    let name = email.split('@').next().unwrap_or(email).to_string();
    SignerContact {
        name,
        email: email.to_string(),
        subject_id: Some(format!("0{:011}", email.len())),
        certificate_serial: None,
    }
}

pub fn signed_callback(signer: SignerId) -> CallbackPayload {
    CallbackPayload {
        event: Some("signer.signed".into()),
        signer_id: Some(signer.to_string()),
        status: Some("signed".into()),
        ..Default::default()
    }
}

pub fn refused_callback(signer: SignerId) -> CallbackPayload {
    CallbackPayload {
        event: Some("signer.refused".into()),
        signer_id: Some(signer.to_string()),
        status: Some("refused".into()),
        ..Default::default()
    }
}

/// Poll behaviour of [`ScriptedProvider`]
pub enum PollScript {
    Report(StatusReport),
    Fail(SigningError),
    Hang,
}

/// Gateway whose answers are queued by the test
#[derive(Default)]
pub struct ScriptedProvider {
    polls: Mutex<VecDeque<PollScript>>,
    downloads: Mutex<VecDeque<Result<ResultArtifact, SigningError>>>,
    fail_submit: Mutex<Option<SigningError>>,
    pub submit_calls: AtomicUsize,
    pub download_calls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_poll(&self, script: PollScript) {
        self.polls.lock().unwrap().push_back(script);
    }

    pub fn push_download(&self, result: Result<ResultArtifact, SigningError>) {
        self.downloads.lock().unwrap().push_back(result);
    }

    pub fn fail_next_submit(&self, err: SigningError) {
        *self.fail_submit.lock().unwrap() = Some(err);
    }

    pub fn submits(&self) -> usize {
        self.submit_calls.load(Ordering::SeqCst)
    }

    pub fn downloads(&self) -> usize {
        self.download_calls.load(Ordering::SeqCst)
    }
}

pub fn signed_by_ref(reference: &str) -> SignerUpdate {
    SignerUpdate {
        signer: SignerKey::ProviderRef(reference.to_string()),
        status: ReportedStatus::Signed,
        signed_at: None,
        signature_value: None,
    }
}

pub fn report(signers: Vec<SignerUpdate>) -> StatusReport {
    StatusReport {
        overall: OverallStatus::InProgress,
        signers,
    }
}

#[async_trait]
impl ProviderGateway for ScriptedProvider {
    fn backend(&self) -> &'static str {
        "scripted"
    }

    async fn test_connection(&self) -> Result<(), SigningError> {
        Ok(())
    }

    async fn submit(
        &self,
        request: &SignatureRequest,
        _digest: &ContentDigest,
        signers: &[&Signer],
    ) -> Result<SubmitReceipt, SigningError> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.fail_submit.lock().unwrap().take() {
            return Err(err);
        }
        Ok(SubmitReceipt::new(
            request
                .provider_reference()
                .unwrap_or("SCRIPTED-1")
                .to_string(),
            signers
                .iter()
                .map(|s| (s.id, format!("ref-{}", s.contact.email)))
                .collect(),
        ))
    }

    async fn poll_status(&self, _request: &SignatureRequest) -> Result<StatusReport, SigningError> {
        let next = self.polls.lock().unwrap().pop_front();
        match next {
            Some(PollScript::Report(report)) => Ok(report),
            Some(PollScript::Fail(err)) => Err(err),
            Some(PollScript::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(StatusReport::default())
            }
            None => Ok(StatusReport::default()),
        }
    }

    async fn download_result(&self, _request: &SignatureRequest) -> Result<ResultArtifact, SigningError> {
        self.download_calls.fetch_add(1, Ordering::SeqCst);
        self.downloads
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(ResultArtifact::SignatureContainer(docsign_pades::fixtures::der_sequence(b"scripted"))))
    }
}

/// Memory store that fails `save` for selected requests
pub struct SaveFailingStore {
    inner: Arc<MemoryRequestStore>,
    failing: Mutex<Vec<RequestId>>,
}

impl SaveFailingStore {
    pub fn new(inner: Arc<MemoryRequestStore>) -> Self {
        Self {
            inner,
            failing: Mutex::new(Vec::new()),
        }
    }

    pub fn fail_saves_for(&self, id: RequestId) {
        self.failing.lock().unwrap().push(id);
    }
}

#[async_trait]
impl RequestStore for SaveFailingStore {
    async fn insert(&self, request: &SignatureRequest) -> Result<(), SigningError> {
        self.inner.insert(request).await
    }

    async fn save(&self, request: &SignatureRequest) -> Result<(), SigningError> {
        if self.failing.lock().unwrap().contains(&request.id) {
            return Err(SigningError::Storage("disk full".into()));
        }
        self.inner.save(request).await
    }

    async fn load(&self, id: RequestId) -> Result<SignatureRequest, SigningError> {
        self.inner.load(id).await
    }

    async fn find_by_token_digest(&self, digest: &str) -> Result<Option<SignatureRequest>, SigningError> {
        self.inner.find_by_token_digest(digest).await
    }

    async fn list_active(&self) -> Result<Vec<RequestId>, SigningError> {
        self.inner.list_active().await
    }

    async fn list_all(&self) -> Result<Vec<SignatureRequest>, SigningError> {
        self.inner.list_all().await
    }
}

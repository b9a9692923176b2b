//! Signature request orchestration
//!
//! [`SignatureService`] serializes all work on one request behind a
//! per-request lock, so a callback and a poll for the same request never
//! interleave. Each operation follows the same order: mutate the request,
//! save it, then deliver notifications.

use chrono::{DateTime, NaiveDate, Utc};
use docsign_pades::{ContentDigest, PrepareOptions, PreparedDocument};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

use crate::audit::AuditAction;
use crate::config::SigningConfig;
use crate::error::{Result, SigningError};
use crate::flow;
use crate::model::{
    Contact, DocumentId, ProviderId, RequestEvent, RequestId, RequestState, SignatureRequest,
    Signer, SignerContact, SignerId, SignerRole, SigningFlow, SourceDocument,
};
use crate::notify::{Notifier, TemplateKey};
use crate::provider::{ProviderGateway, ProviderRegistry, ResultArtifact, SubmitReceipt};
use crate::reconcile::{
    apply_status_update, OverallStatus, Reconciliation, ReportedStatus, SignerKey, SignerUpdate,
};
use crate::store::{DocumentStore, RequestStore};

/// Input for [`SignatureService::create_request`]
#[derive(Debug, Clone, Deserialize)]
pub struct NewRequest {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub provider_id: ProviderId,
    #[serde(default)]
    pub flow: SigningFlow,
    #[serde(default)]
    pub deadline: Option<NaiveDate>,
    pub filename: String,
    #[serde(skip)]
    pub document: Vec<u8>,
    #[serde(default)]
    pub requester: Option<Contact>,
    /// Defaults to the configured field name
    #[serde(default)]
    pub field_name: Option<String>,
    /// Initial signers; one invalid entry rejects the whole request
    #[serde(default)]
    pub signers: Vec<NewSigner>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewSigner {
    #[serde(default)]
    pub role: SignerRole,
    pub order: u32,
    pub contact: SignerContact,
}

impl NewSigner {
    pub fn validate(&self) -> Result<()> {
        if self.contact.name.trim().is_empty() || !self.contact.email.contains('@') {
            return Err(SigningError::Validation(format!(
                "Signer needs a name and an email address, got {:?}",
                self.contact.email
            )));
        }
        Ok(())
    }
}

/// Inbound webhook body. Either signer field may identify the signer;
/// a body naming no signer makes the service poll the provider instead.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackPayload {
    #[serde(default)]
    pub event: Option<String>,
    #[serde(default)]
    pub signer_id: Option<String>,
    #[serde(default)]
    pub signer_ref: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub signature_value: Option<String>,
}

impl CallbackPayload {
    fn into_update(self) -> Result<Option<SignerUpdate>> {
        let signer = match (self.signer_id, self.signer_ref) {
            (Some(id), _) => SignerKey::Id(id.parse()?),
            (None, Some(reference)) => SignerKey::ProviderRef(reference),
            (None, None) => return Ok(None),
        };
        let raw = self
            .status
            .ok_or_else(|| SigningError::Validation("Callback is missing a status".into()))?;
        let status = ReportedStatus::parse(&raw)
            .ok_or_else(|| SigningError::Validation(format!("Unknown status '{}'", raw)))?;
        Ok(Some(SignerUpdate {
            signer,
            status,
            signed_at: self.timestamp,
            signature_value: self.signature_value,
        }))
    }
}

/// How a valid callback was handled; both are acknowledged with success
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackAck {
    Processed,
    /// The request was already terminal; nothing was written
    AlreadyFinal,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub examined: usize,
    /// Requests whose lock was held by another operation
    pub skipped_busy: usize,
    pub updated: usize,
    pub completed: usize,
    pub failed: usize,
}

/// A notification held back until the state that caused it is saved
struct Outgoing {
    template: TemplateKey,
    recipient: Contact,
    context: serde_json::Value,
}

pub struct SignatureService {
    requests: Arc<dyn RequestStore>,
    documents: Arc<dyn DocumentStore>,
    notifier: Arc<dyn Notifier>,
    providers: ProviderRegistry,
    config: SigningConfig,
    // entries nobody holds or waits on are dropped by the sweeps
    locks: Mutex<HashMap<RequestId, Arc<AsyncMutex<()>>>>,
}

impl SignatureService {
    pub fn new(
        requests: Arc<dyn RequestStore>,
        documents: Arc<dyn DocumentStore>,
        notifier: Arc<dyn Notifier>,
        providers: ProviderRegistry,
        config: SigningConfig,
    ) -> Self {
        Self {
            requests,
            documents,
            notifier,
            providers,
            config,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &SigningConfig {
        &self.config
    }

    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    // ============================================================
    // Locking and provider calls
    // ============================================================

    fn lock_handle(&self, id: RequestId) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(id).or_default().clone()
    }

    async fn lock(&self, id: RequestId) -> OwnedMutexGuard<()> {
        self.lock_handle(id).lock_owned().await
    }

    fn try_lock(&self, id: RequestId) -> Option<OwnedMutexGuard<()>> {
        self.lock_handle(id).try_lock_owned().ok()
    }

    /// Forget locks only the map still refers to. Holders and waiters keep
    /// their own `Arc`, and a later operation simply creates a fresh entry.
    fn evict_idle_locks(&self) -> usize {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        let before = locks.len();
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        let evicted = before - locks.len();
        if evicted > 0 {
            debug!(evicted, remaining = locks.len(), "Evicted idle request locks");
        }
        evicted
    }

    /// Bound a provider call by the configured timeout
    async fn call<T>(&self, operation: &'static str, fut: impl Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.config.provider_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(SigningError::Transient(format!(
                "{} timed out after {}s",
                operation,
                self.config.provider_timeout.as_secs()
            ))),
        }
    }

    /// Submission opens one transaction per signer, so the bound grows
    /// with the group
    async fn submit(
        &self,
        gateway: &dyn ProviderGateway,
        request: &SignatureRequest,
        digest: &ContentDigest,
        signers: &[&Signer],
    ) -> Result<SubmitReceipt> {
        let budget = self.config.provider_timeout * (signers.len() as u32 + 1);
        match tokio::time::timeout(budget, gateway.submit(request, digest, signers)).await {
            Ok(result) => result,
            Err(_) => Err(SigningError::Transient(format!(
                "submit timed out after {}s",
                budget.as_secs()
            ))),
        }
    }

    async fn deliver(&self, outgoing: Vec<Outgoing>) {
        for message in outgoing {
            if let Err(err) = self
                .notifier
                .send(message.template, &message.recipient, &message.context)
                .await
            {
                warn!(
                    template = message.template.as_str(),
                    to = %message.recipient.email,
                    error = %err,
                    "Notification failed"
                );
            }
        }
    }

    // ============================================================
    // Draft editing
    // ============================================================

    #[instrument(skip_all, fields(title = %new.title, provider = %new.provider_id))]
    pub async fn create_request(&self, new: NewRequest) -> Result<SignatureRequest> {
        if new.title.trim().is_empty() {
            return Err(SigningError::Validation("Title is required".into()));
        }
        if new.document.is_empty() {
            return Err(SigningError::Validation("Document is empty".into()));
        }
        docsign_pades::PdfDocument::from_bytes(&new.document)?;
        for signer in &new.signers {
            signer.validate()?;
        }

        let document_id = self.documents.put_bytes(&new.filename, new.document).await?;
        let field_name = new
            .field_name
            .unwrap_or_else(|| self.config.field_name.clone());
        let mut request = SignatureRequest::new(
            new.title,
            new.provider_id,
            SourceDocument {
                document_id,
                filename: new.filename,
            },
            field_name,
        );
        request.description = new.description;
        request.flow = new.flow;
        request.deadline = new.deadline;
        request.requester = new.requester;
        for signer in new.signers {
            push_signer(&mut request, signer);
        }

        self.requests.insert(&request).await?;
        info!(request_id = %request.id, signers = request.signers.len(), "Signature request created");
        Ok(request)
    }

    pub async fn add_signer(&self, id: RequestId, new: NewSigner) -> Result<Signer> {
        new.validate()?;

        let _guard = self.lock(id).await;
        let mut request = self.requests.load(id).await?;
        request.ensure_draft("edit signers of")?;

        let signer = push_signer(&mut request, new);
        request.touch();
        self.requests.save(&request).await?;
        Ok(signer)
    }

    pub async fn remove_signer(&self, id: RequestId, signer_id: SignerId) -> Result<()> {
        let _guard = self.lock(id).await;
        let mut request = self.requests.load(id).await?;
        request.ensure_draft("edit signers of")?;

        let before = request.signers.len();
        request.signers.retain(|s| s.id != signer_id);
        if request.signers.len() == before {
            return Err(SigningError::NotFound(format!("signer {}", signer_id)));
        }
        request.audit.append(
            AuditAction::SignerRemoved {
                signer_id: signer_id.to_string(),
            },
            "api",
            None,
            None,
        );
        request.touch();
        self.requests.save(&request).await
    }

    // ============================================================
    // Send / cancel
    // ============================================================

    /// Prepare the document, submit the first signer group and invite it
    #[instrument(skip(self))]
    pub async fn send(&self, id: RequestId) -> Result<SignatureRequest> {
        let _guard = self.lock(id).await;
        let mut request = self.requests.load(id).await?;
        request.ensure_draft("send")?;
        if request.signers.is_empty() {
            return Err(SigningError::Validation(
                "A request needs at least one signer".into(),
            ));
        }
        let gateway = self.providers.get(&request.provider_id)?;

        let source = self.documents.get_bytes(&request.source.document_id).await?;
        if source.is_empty() {
            return Err(SigningError::Validation("Document is empty".into()));
        }
        let prepared = self.prepare(&request, &source)?;
        let digest = prepared.digest(self.config.digest_algorithm);

        // kept before any remote transaction exists; preparation is
        // deterministic, so a retried send reuses the stored placeholder
        let placeholder = match request.placeholder() {
            Some(existing) if request.content_hash() == Some(&digest) => existing.clone(),
            _ => {
                self.documents
                    .put_bytes(
                        &derived_filename(&request.source.filename, "placeholder"),
                        prepared.placeholder_pdf,
                    )
                    .await?
            }
        };
        request.record_prepared(digest.clone(), placeholder);
        request.touch();
        self.requests.save(&request).await?;

        let first_group = flow::eligible_signers(request.flow, &request.signers);
        let receipt = {
            let signers: Vec<&Signer> = first_group
                .iter()
                .filter_map(|id| request.signer(*id))
                .collect();
            self.submit(gateway.as_ref(), &request, &digest, &signers).await?
        };

        let provider_reference = receipt.provider_reference.clone();
        request.record_submission(provider_reference.clone());
        let ready = store_signer_refs(&mut request, receipt, &first_group);
        request.apply(RequestEvent::Send)?;
        request.audit.append(
            AuditAction::Sent {
                provider_reference: provider_reference.clone(),
            },
            "api",
            Some(&digest.to_string()),
            None,
        );
        let outgoing = self.mark_invited(&mut request, gateway.as_ref(), &ready);

        self.requests.save(&request).await?;
        info!(
            request_id = %request.id,
            provider_reference = %provider_reference,
            invited = ready.len(),
            "Signature request sent"
        );
        self.deliver(outgoing).await;
        Ok(request)
    }

    fn prepare(&self, request: &SignatureRequest, source: &[u8]) -> Result<PreparedDocument> {
        let options = PrepareOptions {
            reserved_size: self.config.reserved_signature_size,
            reason: Some(request.title.clone()),
            ..Default::default()
        };
        Ok(docsign_pades::prepare_with(
            source,
            &request.field_name,
            &options,
        )?)
    }

    /// Cancel any non-terminal request. The provider is asked to cancel too,
    /// but its failure only produces a warning.
    #[instrument(skip(self))]
    pub async fn cancel(&self, id: RequestId) -> Result<SignatureRequest> {
        let _guard = self.lock(id).await;
        let mut request = self.requests.load(id).await?;
        request.state().next(RequestEvent::Cancel)?;

        if request.state().is_submitted() {
            match self.providers.get(&request.provider_id) {
                Ok(gateway) => {
                    if let Err(err) = self.call("cancel", gateway.cancel(&request)).await {
                        warn!(request_id = %id, error = %err, "Provider cancel failed");
                    }
                }
                Err(err) => warn!(request_id = %id, error = %err, "Cannot reach provider to cancel"),
            }
        }

        request.apply(RequestEvent::Cancel)?;
        for signer in request.signers.iter_mut() {
            signer.reset_pending();
        }
        let content_hash = request.content_hash().map(|d| d.to_string());
        request
            .audit
            .append(AuditAction::Cancelled, "api", content_hash.as_deref(), None);
        self.requests.save(&request).await?;

        info!(request_id = %id, "Signature request cancelled");
        let outgoing = self.requester_notice(&request, TemplateKey::RequestCancelled);
        self.deliver(outgoing).await;
        Ok(request)
    }

    // ============================================================
    // Reconciliation entry points
    // ============================================================

    /// Push channel. Invalid tokens are rejected before anything is loaded
    /// under lock; terminal requests are acknowledged without any write.
    pub async fn handle_callback(&self, token: &str, payload: CallbackPayload) -> Result<CallbackAck> {
        let id = self.authenticate(token).await?;
        let update = payload.into_update()?;

        let _guard = self.lock(id).await;
        let request = self.requests.load(id).await?;
        if request.state().is_terminal() {
            debug!(request_id = %id, "Callback for finished request");
            return Ok(CallbackAck::AlreadyFinal);
        }

        match update {
            Some(update) => {
                self.reconcile(request, vec![update], OverallStatus::InProgress, "callback")
                    .await?;
            }
            None => {
                // the provider stays the source of truth
                if let Err(err) = self.poll_loaded(request).await {
                    warn!(request_id = %id, error = %err, "Poll after callback failed");
                }
            }
        }
        Ok(CallbackAck::Processed)
    }

    /// Confirmation link of the simulated backend. `secret` is the signer's
    /// link secret, never the callback token.
    pub async fn simulate_signature(
        &self,
        id: RequestId,
        signer_id: SignerId,
        secret: &str,
    ) -> Result<(SignatureRequest, Reconciliation)> {
        let _guard = self.lock(id).await;
        let request = self.requests.load(id).await?;
        if !request.token().verify_link_secret(signer_id, secret) {
            warn!(request_id = %id, signer_id = %signer_id, "Rejected confirmation link");
            return Err(SigningError::InvalidCallbackToken);
        }

        let gateway = self.providers.get(&request.provider_id)?;
        if gateway.backend() != "simulated" {
            return Err(SigningError::Validation(
                "Confirmation links only exist for the simulated provider".into(),
            ));
        }
        if request.signer(signer_id).is_none() {
            return Err(SigningError::NotFound(format!("signer {}", signer_id)));
        }
        if request.state().is_terminal() {
            return Ok((request, Reconciliation::default()));
        }

        let update = SignerUpdate::signed(SignerKey::Id(signer_id), Some(Utc::now()));
        self.reconcile(request, vec![update], OverallStatus::InProgress, "demo-link")
            .await
    }

    /// Manual status check
    pub async fn check_status(&self, id: RequestId) -> Result<SignatureRequest> {
        let _guard = self.lock(id).await;
        let request = self.requests.load(id).await?;
        if request.state().is_submitted() && !request.state().is_terminal() {
            self.poll_loaded(request).await?;
        }
        self.requests.load(id).await
    }

    /// Poll every active request. Requests already locked by another
    /// operation are skipped until the next sweep; the rest run in parallel.
    pub async fn poll_sweep(self: &Arc<Self>) -> Result<SweepReport> {
        let mut report = SweepReport::default();
        let mut tasks = JoinSet::new();

        for id in self.requests.list_active().await? {
            report.examined += 1;
            let Some(guard) = self.try_lock(id) else {
                report.skipped_busy += 1;
                continue;
            };
            let service = Arc::clone(self);
            tasks.spawn(async move {
                let _guard = guard;
                let result = match service.requests.load(id).await {
                    Ok(request) if request.state().is_submitted() => {
                        service.poll_loaded(request).await.map(Some)
                    }
                    Ok(_) => Ok(None),
                    Err(err) => Err(err),
                };
                (id, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(Some(outcome)))) => {
                    if outcome.changed() {
                        report.updated += 1;
                    }
                    if outcome.completed() {
                        report.completed += 1;
                    }
                }
                Ok((_, Ok(None))) => {}
                Ok((id, Err(err))) => {
                    report.failed += 1;
                    debug!(request_id = %id, error = %err, "Poll failed");
                }
                Err(err) => {
                    report.failed += 1;
                    error!(error = %err, "Poll task panicked");
                }
            }
        }

        if report.examined > 0 {
            info!(
                examined = report.examined,
                updated = report.updated,
                completed = report.completed,
                failed = report.failed,
                skipped_busy = report.skipped_busy,
                "Poll sweep finished"
            );
        }
        self.evict_idle_locks();
        Ok(report)
    }

    /// Expire every non-terminal request whose deadline is before `today`
    pub async fn expire_overdue(&self, today: NaiveDate) -> Result<Vec<RequestId>> {
        let mut expired = Vec::new();
        for id in self.requests.list_active().await? {
            let _guard = self.lock(id).await;
            let mut request = match self.requests.load(id).await {
                Ok(request) => request,
                Err(err) => {
                    warn!(request_id = %id, error = %err, "Skipping request in expiry sweep");
                    continue;
                }
            };
            if !request.is_overdue(today) {
                continue;
            }

            if let Err(err) = request.apply(RequestEvent::Expire) {
                warn!(request_id = %id, error = %err, "Skipping request in expiry sweep");
                continue;
            }
            let content_hash = request.content_hash().map(|d| d.to_string());
            request.audit.append(
                AuditAction::Expired,
                "system",
                content_hash.as_deref(),
                request.deadline.map(|d| format!("deadline {}", d)),
            );
            if let Err(err) = self.requests.save(&request).await {
                error!(request_id = %id, error = %err, "Failed to save expired request");
                continue;
            }
            info!(request_id = %id, "Signature request expired");

            let outgoing = self.requester_notice(&request, TemplateKey::RequestExpired);
            self.deliver(outgoing).await;
            expired.push(id);
        }
        self.evict_idle_locks();
        Ok(expired)
    }

    // ============================================================
    // Completion and artifacts
    // ============================================================

    /// Fetch the result again for a completed request that has none
    pub async fn retry_download(&self, id: RequestId) -> Result<SignatureRequest> {
        let _guard = self.lock(id).await;
        let mut request = self.requests.load(id).await?;
        if request.state() != RequestState::Completed {
            return Err(SigningError::InvalidTransition {
                from: request.state(),
                action: "download the result of",
            });
        }
        if request.result().is_some() {
            return Ok(request);
        }

        let gateway = self.providers.get(&request.provider_id)?;
        let outcome = self.attach_result(&mut request, gateway.as_ref()).await;
        self.requests.save(&request).await?;
        outcome.map(|_| request)
    }

    /// Signed document bytes and a filename for download
    pub async fn signed_document(&self, id: RequestId) -> Result<(String, Vec<u8>)> {
        let request = self.requests.load(id).await?;
        let document = request
            .result()
            .ok_or_else(|| SigningError::NotFound(format!("signed document for request {}", id)))?;
        let bytes = self.documents.get_bytes(document).await?;
        Ok((derived_filename(&request.source.filename, "signed"), bytes))
    }

    pub async fn test_connection(&self, provider_id: &ProviderId) -> Result<()> {
        let gateway = self.providers.get(provider_id)?;
        self.call("test_connection", gateway.test_connection())
            .await
            .map_err(|err| match err {
                SigningError::Transient(msg) => SigningError::ProviderUnavailable(msg),
                other => other,
            })
    }

    pub async fn get(&self, id: RequestId) -> Result<SignatureRequest> {
        self.requests.load(id).await
    }

    pub async fn list(&self) -> Result<Vec<SignatureRequest>> {
        self.requests.list_all().await
    }

    // ============================================================
    // Internals (caller holds the request lock)
    // ============================================================

    async fn authenticate(&self, token: &str) -> Result<RequestId> {
        let digest = crate::model::CallbackToken::digest_of(token);
        match self.requests.find_by_token_digest(&digest).await? {
            Some(request) if request.token().verify(token) => Ok(request.id),
            _ => {
                warn!("Rejected callback with invalid token");
                Err(SigningError::InvalidCallbackToken)
            }
        }
    }

    async fn poll_loaded(&self, mut request: SignatureRequest) -> Result<Reconciliation> {
        let gateway = self.providers.get(&request.provider_id)?;
        match self.call("poll_status", gateway.poll_status(&request)).await {
            Ok(report) => {
                if request.record_poll_success() {
                    info!(request_id = %request.id, "Provider reachable again");
                    request.touch();
                    self.requests.save(&request).await?;
                }
                self.reconcile(request, report.signers, report.overall, "poll")
                    .await
                    .map(|(_, outcome)| outcome)
            }
            Err(err) => {
                let failures = request.record_poll_failure();
                let threshold = self.config.failure_escalation_threshold;
                if failures == threshold {
                    warn!(
                        request_id = %request.id,
                        failures,
                        error = %err,
                        "Provider keeps failing for this request; needs a human decision"
                    );
                    request
                        .audit
                        .append(AuditAction::PollEscalated { failures }, "system", None, Some(err.to_string()));
                } else {
                    debug!(request_id = %request.id, failures, error = %err, "Poll failed");
                }
                self.requests.save(&request).await?;
                Err(err)
            }
        }
    }

    /// Apply updates, then persist and run whatever the outcome calls for
    async fn reconcile(
        &self,
        mut request: SignatureRequest,
        updates: Vec<SignerUpdate>,
        overall: OverallStatus,
        actor: &str,
    ) -> Result<(SignatureRequest, Reconciliation)> {
        let outcome = apply_status_update(&mut request, &updates, overall, actor);
        let gateway = self.providers.get(&request.provider_id)?;

        let mut outgoing: Vec<Outgoing> = outcome
            .newly_signed
            .iter()
            .filter_map(|id| request.signer(*id))
            .flat_map(|signer| {
                let context = json!({
                    "request_id": request.id,
                    "title": request.title,
                    "signer_name": signer.contact.name,
                });
                request.requester.clone().map(|recipient| Outgoing {
                    template: TemplateKey::SignerCompleted,
                    recipient,
                    context,
                })
            })
            .collect();
        if !outcome.deferred.is_empty() {
            debug!(request_id = %request.id, deferred = outcome.deferred.len(), "Signatures reported out of turn");
        }

        match outcome.reached() {
            Some(RequestState::Completed) => {
                self.requests.save(&request).await?;
                info!(request_id = %request.id, "All signers signed");
                outgoing.extend(self.requester_notice(&request, TemplateKey::RequestCompleted));
                // completion stands even when the artifact cannot be fetched
                let _ = self.attach_result(&mut request, gateway.as_ref()).await;
                self.requests.save(&request).await?;
            }
            Some(state) if state.is_terminal() => {
                self.requests.save(&request).await?;
                info!(request_id = %request.id, state = %state, "Signature request closed by provider update");
                let template = match state {
                    RequestState::Expired => TemplateKey::RequestExpired,
                    _ => TemplateKey::RequestCancelled,
                };
                outgoing.extend(self.requester_notice(&request, template));
            }
            _ => {
                let invited = match self.invite_next(&mut request, gateway.as_ref()).await {
                    Ok(invited) => invited,
                    Err(err) => {
                        warn!(request_id = %request.id, error = %err, "Inviting next signers failed");
                        Vec::new()
                    }
                };
                let changed = outcome.changed() || !invited.is_empty();
                outgoing.extend(invited);
                if changed {
                    self.requests.save(&request).await?;
                }
            }
        }

        self.deliver(outgoing).await;
        Ok((request, outcome))
    }

    /// Submit and invite the next eligible group, if any
    async fn invite_next(
        &self,
        request: &mut SignatureRequest,
        gateway: &dyn ProviderGateway,
    ) -> Result<Vec<Outgoing>> {
        let eligible = flow::eligible_signers(request.flow, &request.signers);
        if eligible.is_empty() {
            return Ok(Vec::new());
        }

        let unsubmitted: Vec<SignerId> = eligible
            .iter()
            .copied()
            .filter(|id| {
                request
                    .signer(*id)
                    .is_some_and(|s| s.provider_signer_ref.is_none())
            })
            .collect();
        if !unsubmitted.is_empty() {
            let digest = request
                .content_hash()
                .cloned()
                .ok_or_else(|| SigningError::Provider("Request has no content hash".into()))?;
            let receipt = {
                let signers: Vec<&Signer> = unsubmitted
                    .iter()
                    .filter_map(|id| request.signer(*id))
                    .collect();
                self.submit(gateway, request, &digest, &signers).await?
            };
            store_signer_refs(request, receipt, &unsubmitted);
        }

        // a signer is only invited once their transaction exists
        let ready: Vec<SignerId> = eligible
            .into_iter()
            .filter(|id| {
                request
                    .signer(*id)
                    .is_some_and(|s| s.provider_signer_ref.is_some())
            })
            .collect();
        Ok(self.mark_invited(request, gateway, &ready))
    }

    /// `waiting -> sent` for each id, returning the invitations to deliver.
    /// Signers already past `waiting` are left alone.
    fn mark_invited(
        &self,
        request: &mut SignatureRequest,
        gateway: &dyn ProviderGateway,
        ids: &[SignerId],
    ) -> Vec<Outgoing> {
        let now = Utc::now();
        let mut outgoing = Vec::new();
        for id in ids {
            let invited = request.signer_mut(*id).map(|s| s.invite(now)).unwrap_or(false);
            if !invited {
                continue;
            }
            let Some(signer) = request.signer(*id) else { continue };
            let reference = gateway.signing_reference(request, signer);
            let recipient = signer.contact.recipient();
            outgoing.push(Outgoing {
                template: TemplateKey::SigningInvitation,
                context: json!({
                    "request_id": request.id,
                    "title": request.title,
                    "signer_name": signer.contact.name,
                    "signing_reference": reference,
                    "deadline": request.deadline,
                }),
                recipient,
            });
            request.audit.append(
                AuditAction::Invited {
                    signer_id: id.to_string(),
                },
                "system",
                None,
                None,
            );
        }
        if !outgoing.is_empty() {
            request.touch();
        }
        outgoing
    }

    /// Download the result, embed it when it is a bare container, and store
    /// the signed document. Failures are logged and audited.
    async fn attach_result(
        &self,
        request: &mut SignatureRequest,
        gateway: &dyn ProviderGateway,
    ) -> Result<DocumentId> {
        let content_hash = request.content_hash().map(|d| d.to_string());
        match self.produce_artifact(request, gateway).await {
            Ok(document_id) => {
                request.set_result(document_id.clone());
                request.audit.append(
                    AuditAction::ArtifactStored {
                        document_id: document_id.to_string(),
                    },
                    "system",
                    content_hash.as_deref(),
                    None,
                );
                info!(request_id = %request.id, document_id = %document_id, "Signed document stored");
                Ok(document_id)
            }
            Err(err) => {
                warn!(request_id = %request.id, error = %err, "Signed document unavailable");
                request.audit.append(
                    AuditAction::DownloadFailed {
                        reason: err.to_string(),
                    },
                    "system",
                    content_hash.as_deref(),
                    None,
                );
                request.touch();
                Err(err)
            }
        }
    }

    async fn produce_artifact(
        &self,
        request: &SignatureRequest,
        gateway: &dyn ProviderGateway,
    ) -> Result<DocumentId> {
        let artifact = self
            .call("download_result", gateway.download_result(request))
            .await?;
        let signed = match artifact {
            ResultArtifact::Document(bytes) => bytes,
            ResultArtifact::SignatureContainer(container) => {
                let placeholder_id = request
                    .placeholder()
                    .ok_or_else(|| SigningError::NotFound("placeholder document".into()))?;
                let placeholder = self.documents.get_bytes(placeholder_id).await?;
                docsign_pades::embed(&placeholder, &container, &request.field_name)?
            }
        };
        self.documents
            .put_bytes(&derived_filename(&request.source.filename, "signed"), signed)
            .await
    }

    fn requester_notice(&self, request: &SignatureRequest, template: TemplateKey) -> Vec<Outgoing> {
        request
            .requester
            .iter()
            .map(|recipient| Outgoing {
                template,
                recipient: recipient.clone(),
                context: json!({
                    "request_id": request.id,
                    "title": request.title,
                    "state": request.state(),
                    "has_document": request.result().is_some(),
                }),
            })
            .collect()
    }
}

fn push_signer(request: &mut SignatureRequest, new: NewSigner) -> Signer {
    let signer = Signer::new(new.role, new.order, new.contact);
    request.audit.append(
        AuditAction::SignerAdded {
            signer_id: signer.id.to_string(),
        },
        "api",
        None,
        Some(signer.contact.email.clone()),
    );
    request.signers.push(signer.clone());
    signer
}

/// Put the refs of a receipt on their signers and return the ids of
/// `group` that now have a transaction. An interrupted submission leaves
/// the rest without one; they are submitted again on the next poll.
fn store_signer_refs(request: &mut SignatureRequest, receipt: SubmitReceipt, group: &[SignerId]) -> Vec<SignerId> {
    if let Some(err) = &receipt.interrupted {
        warn!(
            request_id = %request.id,
            opened = receipt.signer_refs.len(),
            requested = group.len(),
            error = %err,
            "Provider accepted only part of the signer group"
        );
    }
    for (signer_id, reference) in receipt.signer_refs {
        if let Some(signer) = request.signer_mut(signer_id) {
            signer.provider_signer_ref = Some(reference);
        }
    }
    group
        .iter()
        .copied()
        .filter(|id| {
            request
                .signer(*id)
                .is_some_and(|s| s.provider_signer_ref.is_some())
        })
        .collect()
}

/// `contract.pdf` -> `contract (signed).pdf`
fn derived_filename(filename: &str, suffix: &str) -> String {
    match filename.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{} ({}).{}", stem, suffix, ext),
        _ => format!("{} ({})", filename, suffix),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::RecordingNotifier;
    use crate::store::{MemoryDocumentStore, MemoryRequestStore};

    fn bare_service() -> SignatureService {
        SignatureService::new(
            Arc::new(MemoryRequestStore::new()),
            Arc::new(MemoryDocumentStore::new()),
            Arc::new(RecordingNotifier::new()),
            ProviderRegistry::new(),
            SigningConfig::default(),
        )
    }

    fn tracked_locks(service: &SignatureService) -> usize {
        service.locks.lock().unwrap().len()
    }

    #[tokio::test]
    async fn test_idle_locks_are_evicted() {
        let service = bare_service();
        let (busy, idle) = (RequestId::new(), RequestId::new());
        let held = service.lock(busy).await;
        drop(service.lock(idle).await);
        assert_eq!(tracked_locks(&service), 2);

        assert_eq!(service.evict_idle_locks(), 1);
        assert_eq!(tracked_locks(&service), 1);
        // the held entry still serializes callers
        assert!(service.try_lock(busy).is_none());

        drop(held);
        assert_eq!(service.evict_idle_locks(), 1);
        assert_eq!(tracked_locks(&service), 0);
        assert!(service.try_lock(busy).is_some());
    }

    #[tokio::test]
    async fn test_sweeps_leave_no_locks_behind() {
        let service = Arc::new(bare_service());
        drop(service.lock(RequestId::new()).await);
        service.expire_overdue(Utc::now().date_naive()).await.unwrap();
        assert_eq!(tracked_locks(&service), 0);

        drop(service.lock(RequestId::new()).await);
        service.poll_sweep().await.unwrap();
        assert_eq!(tracked_locks(&service), 0);
    }

    #[test]
    fn test_derived_filename() {
        assert_eq!(derived_filename("contract.pdf", "signed"), "contract (signed).pdf");
        assert_eq!(derived_filename("README", "signed"), "README (signed)");
        assert_eq!(derived_filename(".pdf", "signed"), ".pdf (signed)");
    }

    #[test]
    fn test_callback_payload_parsing() {
        let payload = CallbackPayload {
            signer_ref: Some("REF".into()),
            status: Some("signed".into()),
            ..Default::default()
        };
        let update = payload.into_update().unwrap().unwrap();
        assert_eq!(update.signer, SignerKey::ProviderRef("REF".into()));
        assert_eq!(update.status, ReportedStatus::Signed);

        assert!(CallbackPayload::default().into_update().unwrap().is_none());

        let missing_status = CallbackPayload {
            signer_ref: Some("REF".into()),
            ..Default::default()
        };
        assert!(matches!(
            missing_status.into_update(),
            Err(SigningError::Validation(_))
        ));

        let bad_id = CallbackPayload {
            signer_id: Some("not-a-uuid".into()),
            status: Some("signed".into()),
            ..Default::default()
        };
        assert!(bad_id.into_update().is_err());
    }
}

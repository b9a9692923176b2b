//! Remote PDF signing workflow
//!
//! A [`SignatureRequest`] moves through `draft -> sent -> partially_signed ->
//! completed` (or `cancelled` / `expired`). [`SignatureService`] drives it:
//! it prepares the document with `docsign-pades`, talks to a provider through
//! [`ProviderGateway`], and folds provider callbacks and polls into the
//! request with [`apply_status_update`].

pub mod audit;
pub mod config;
pub mod error;
pub mod flow;
pub mod model;
pub mod notify;
pub mod provider;
pub mod reconcile;
pub mod service;
pub mod store;

pub use audit::{AuditAction, AuditChain, AuditEvent};
pub use config::SigningConfig;
pub use error::{Result, SigningError};
pub use model::{
    BackendKind, CallbackToken, Contact, DocumentId, ProviderConfig, ProviderId, RequestEvent,
    RequestId, RequestState, Secret, SignatureRequest, Signer, SignerContact, SignerId, SignerRole,
    SignerState, SigningFlow, SourceDocument,
};
pub use notify::{Notifier, RecordingNotifier, SentMessage, TemplateKey, TracingNotifier};
pub use provider::{
    CancelOutcome, HashRemoteProvider, ProviderBackend, ProviderGateway, ProviderRegistry,
    ResultArtifact, SimulatedProvider, StatusReport, SubmitReceipt,
};
pub use reconcile::{
    apply_status_update, OverallStatus, Reconciliation, ReportedStatus, SignerKey, SignerUpdate,
};
pub use service::{CallbackAck, CallbackPayload, NewRequest, NewSigner, SignatureService, SweepReport};
pub use store::{DocumentStore, MemoryDocumentStore, MemoryRequestStore, RequestStore};

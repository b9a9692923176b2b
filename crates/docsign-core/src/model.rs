//! Signature request data model
//!
//! `SignatureRequest` owns its signers and its state. The request state is
//! private: every change goes through [`RequestState::next`], called from
//! [`SignatureRequest::apply`].

use chrono::{DateTime, NaiveDate, Utc};
use docsign_pades::ContentDigest;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::audit::{AuditAction, AuditChain};
use crate::error::{Result, SigningError};

type HmacSha256 = Hmac<Sha256>;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = SigningError;

            fn from_str(s: &str) -> Result<Self> {
                Uuid::parse_str(s)
                    .map(Self)
                    .map_err(|_| SigningError::Validation(format!("Invalid id: {}", s)))
            }
        }
    };
}

uuid_id!(
    /// Signature request identifier
    RequestId
);
uuid_id!(
    /// Signer identifier, unique across requests
    SignerId
);

/// Configured provider identifier, e.g. `smartca-prod`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderId(pub String);

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProviderId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Opaque handle into the document store
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(pub String);

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================
// Request state machine
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestState {
    Draft,
    Sent,
    PartiallySigned,
    Completed,
    Cancelled,
    Expired,
}

/// Inputs to the request state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestEvent {
    Send,
    FirstSignature,
    AllSigned,
    SignerRefused,
    Cancel,
    Expire,
}

impl RequestEvent {
    pub fn name(&self) -> &'static str {
        match self {
            RequestEvent::Send => "send",
            RequestEvent::FirstSignature => "record a first signature on",
            RequestEvent::AllSigned => "complete",
            RequestEvent::SignerRefused => "record a refusal on",
            RequestEvent::Cancel => "cancel",
            RequestEvent::Expire => "expire",
        }
    }
}

impl RequestState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RequestState::Completed | RequestState::Cancelled | RequestState::Expired
        )
    }

    /// States in which the request has been handed to a provider
    pub fn is_submitted(&self) -> bool {
        !matches!(self, RequestState::Draft)
    }

    /// The only transition function
    pub fn next(self, event: RequestEvent) -> Result<RequestState> {
        use RequestEvent as E;
        use RequestState as S;

        match (self, event) {
            (S::Draft, E::Send) => Ok(S::Sent),
            (S::Sent, E::FirstSignature) => Ok(S::PartiallySigned),
            (S::Sent | S::PartiallySigned, E::AllSigned) => Ok(S::Completed),
            (S::Sent | S::PartiallySigned, E::SignerRefused) => Ok(S::Cancelled),
            (state, E::Cancel) if !state.is_terminal() => Ok(S::Cancelled),
            (state, E::Expire) if !state.is_terminal() => Ok(S::Expired),
            (from, event) => Err(SigningError::InvalidTransition {
                from,
                action: event.name(),
            }),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestState::Draft => "draft",
            RequestState::Sent => "sent",
            RequestState::PartiallySigned => "partially_signed",
            RequestState::Completed => "completed",
            RequestState::Cancelled => "cancelled",
            RequestState::Expired => "expired",
        }
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestState {
    type Err = SigningError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "draft" => Ok(RequestState::Draft),
            "sent" => Ok(RequestState::Sent),
            "partially_signed" => Ok(RequestState::PartiallySigned),
            "completed" => Ok(RequestState::Completed),
            "cancelled" => Ok(RequestState::Cancelled),
            "expired" => Ok(RequestState::Expired),
            other => Err(SigningError::Validation(format!(
                "Unknown request state: {}",
                other
            ))),
        }
    }
}

// ============================================================
// Signers
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignerState {
    Waiting,
    Sent,
    Signed,
    Refused,
}

impl SignerState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SignerState::Signed | SignerState::Refused)
    }
}

/// Business routing only; see [`SigningFlow`] for how it affects ordering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignerRole {
    #[default]
    Internal,
    External,
}

/// Ordering rule applied to the signers of one request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SigningFlow {
    /// Order index as given
    #[default]
    Sequential,
    /// Everyone at once
    Parallel,
    /// Internal signers before external ones, then by order index
    InternalFirst,
    /// External signers before internal ones, then by order index
    PartnerFirst,
}

impl SigningFlow {
    /// Effective ordering key; equal keys sign concurrently
    pub fn rank(&self, signer: &Signer) -> (u8, u32) {
        match self {
            SigningFlow::Sequential => (0, signer.order),
            SigningFlow::Parallel => (0, 0),
            SigningFlow::InternalFirst => match signer.role {
                SignerRole::Internal => (0, signer.order),
                SignerRole::External => (1, signer.order),
            },
            SigningFlow::PartnerFirst => match signer.role {
                SignerRole::External => (0, signer.order),
                SignerRole::Internal => (1, signer.order),
            },
        }
    }
}

/// How to reach a person
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignerContact {
    pub name: String,
    pub email: String,
    /// Provider-side subject, e.g. a national id or SmartCA user id
    #[serde(default)]
    pub subject_id: Option<String>,
    /// Certificate to sign with, when the subject holds several
    #[serde(default)]
    pub certificate_serial: Option<String>,
}

impl SignerContact {
    pub fn recipient(&self) -> Contact {
        Contact {
            name: self.name.clone(),
            email: self.email.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signer {
    pub id: SignerId,
    pub role: SignerRole,
    /// Signers with equal order sign concurrently
    pub order: u32,
    pub contact: SignerContact,
    state: SignerState,
    pub provider_signer_ref: Option<String>,
    pub invited_at: Option<DateTime<Utc>>,
    pub signed_at: Option<DateTime<Utc>>,
    /// Raw provider signature value, kept for audit
    pub signature_value: Option<String>,
}

impl Signer {
    pub fn new(role: SignerRole, order: u32, contact: SignerContact) -> Self {
        Self {
            id: SignerId::new(),
            role,
            order,
            contact,
            state: SignerState::Waiting,
            provider_signer_ref: None,
            invited_at: None,
            signed_at: None,
            signature_value: None,
        }
    }

    pub fn state(&self) -> SignerState {
        self.state
    }

    /// `waiting -> sent`; returns false when there was nothing to do
    pub(crate) fn invite(&mut self, now: DateTime<Utc>) -> bool {
        if self.state != SignerState::Waiting {
            return false;
        }
        self.state = SignerState::Sent;
        self.invited_at = Some(now);
        true
    }

    /// `sent -> signed`. A signer must be invited first, so any other
    /// starting state is left untouched and reported as no change.
    pub(crate) fn mark_signed(&mut self, at: DateTime<Utc>, signature_value: Option<String>) -> bool {
        if self.state != SignerState::Sent {
            return false;
        }
        self.state = SignerState::Signed;
        self.signed_at = Some(at);
        if signature_value.is_some() {
            self.signature_value = signature_value;
        }
        true
    }

    /// `sent -> refused`, same precondition as [`Signer::mark_signed`]
    pub(crate) fn mark_refused(&mut self) -> bool {
        if self.state != SignerState::Sent {
            return false;
        }
        self.state = SignerState::Refused;
        true
    }

    /// Put an invited signer back in line, used on cancel
    pub(crate) fn reset_pending(&mut self) -> bool {
        if self.state != SignerState::Sent {
            return false;
        }
        self.state = SignerState::Waiting;
        true
    }
}

// ============================================================
// Correlation token
// ============================================================

/// Per-request secret that authenticates provider callbacks.
///
/// Stores look requests up by [`CallbackToken::digest`]; the final comparison
/// is done in constant time by [`CallbackToken::verify`].
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallbackToken(String);

impl CallbackToken {
    pub fn generate() -> Self {
        Self(format!(
            "{}{}",
            Uuid::new_v4().simple(),
            Uuid::new_v4().simple()
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn digest(&self) -> String {
        Self::digest_of(&self.0)
    }

    /// Lookup key for a presented token
    pub fn digest_of(token: &str) -> String {
        hex::encode(Sha256::digest(token.as_bytes()))
    }

    /// Secret for one signer's confirmation link. Keyed by the token, so a
    /// link neither reveals the token nor works for another signer.
    pub fn link_secret(&self, signer: SignerId) -> String {
        self.link_mac(signer)
            .map(|mac| hex::encode(mac.finalize().into_bytes()))
            .unwrap_or_default()
    }

    pub fn verify_link_secret(&self, signer: SignerId, candidate: &str) -> bool {
        match (self.link_mac(signer), hex::decode(candidate)) {
            (Some(mac), Ok(presented)) => mac.verify_slice(&presented).is_ok(),
            _ => false,
        }
    }

    fn link_mac(&self, signer: SignerId) -> Option<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(self.0.as_bytes()).ok()?;
        mac.update(b"signing-link:");
        mac.update(signer.0.as_bytes());
        Some(mac)
    }

    /// Constant-time comparison against a presented token
    pub fn verify(&self, candidate: &str) -> bool {
        let tag = |input: &[u8]| {
            HmacSha256::new_from_slice(self.0.as_bytes()).map(|mut mac| {
                mac.update(input);
                mac
            })
        };
        match (tag(self.0.as_bytes()), tag(candidate.as_bytes())) {
            (Ok(expected), Ok(presented)) => presented
                .verify_slice(&expected.finalize().into_bytes())
                .is_ok(),
            _ => false,
        }
    }
}

impl fmt::Debug for CallbackToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CallbackToken(***)")
    }
}

// ============================================================
// Signature request
// ============================================================

/// Source document as handed in by the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDocument {
    pub document_id: DocumentId,
    pub filename: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureRequest {
    pub id: RequestId,
    pub title: String,
    pub description: Option<String>,
    pub provider_id: ProviderId,
    pub flow: SigningFlow,
    pub deadline: Option<NaiveDate>,
    pub source: SourceDocument,
    /// Receives completion, cancellation and expiry notices
    pub requester: Option<Contact>,
    /// Signature field reserved in the placeholder
    pub field_name: String,
    pub signers: Vec<Signer>,
    state: RequestState,
    token: CallbackToken,
    provider_reference: Option<String>,
    content_hash: Option<ContentDigest>,
    placeholder: Option<DocumentId>,
    result: Option<DocumentId>,
    consecutive_poll_failures: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub audit: AuditChain,
}

impl SignatureRequest {
    pub fn new(
        title: impl Into<String>,
        provider_id: ProviderId,
        source: SourceDocument,
        field_name: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        let id = RequestId::new();
        let mut audit = AuditChain::new(&id.to_string());
        audit.append(AuditAction::Created, "api", None, None);
        Self {
            id,
            title: title.into(),
            description: None,
            provider_id,
            flow: SigningFlow::default(),
            deadline: None,
            source,
            requester: None,
            field_name: field_name.into(),
            signers: Vec::new(),
            state: RequestState::Draft,
            token: CallbackToken::generate(),
            provider_reference: None,
            content_hash: None,
            placeholder: None,
            result: None,
            consecutive_poll_failures: 0,
            created_at: now,
            updated_at: now,
            audit,
        }
    }

    pub fn state(&self) -> RequestState {
        self.state
    }

    pub fn token(&self) -> &CallbackToken {
        &self.token
    }

    pub fn provider_reference(&self) -> Option<&str> {
        self.provider_reference.as_deref()
    }

    pub fn content_hash(&self) -> Option<&ContentDigest> {
        self.content_hash.as_ref()
    }

    pub fn placeholder(&self) -> Option<&DocumentId> {
        self.placeholder.as_ref()
    }

    pub fn result(&self) -> Option<&DocumentId> {
        self.result.as_ref()
    }

    pub fn consecutive_poll_failures(&self) -> u32 {
        self.consecutive_poll_failures
    }

    pub fn signer(&self, id: SignerId) -> Option<&Signer> {
        self.signers.iter().find(|s| s.id == id)
    }

    pub(crate) fn signer_mut(&mut self, id: SignerId) -> Option<&mut Signer> {
        self.signers.iter_mut().find(|s| s.id == id)
    }

    pub fn signer_by_ref(&self, provider_ref: &str) -> Option<&Signer> {
        self.signers
            .iter()
            .find(|s| s.provider_signer_ref.as_deref() == Some(provider_ref))
    }

    pub fn all_signed(&self) -> bool {
        !self.signers.is_empty() && self.signers.iter().all(|s| s.state == SignerState::Signed)
    }

    pub fn any_refused(&self) -> bool {
        self.signers.iter().any(|s| s.state == SignerState::Refused)
    }

    pub fn signed_count(&self) -> usize {
        self.signers
            .iter()
            .filter(|s| s.state == SignerState::Signed)
            .count()
    }

    pub fn is_overdue(&self, today: NaiveDate) -> bool {
        !self.state.is_terminal() && self.deadline.is_some_and(|deadline| deadline < today)
    }

    /// Run one state machine step; the only place `state` changes
    pub(crate) fn apply(&mut self, event: RequestEvent) -> Result<RequestState> {
        let next = self.state.next(event)?;
        self.state = next;
        self.touch();
        Ok(next)
    }

    pub(crate) fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub(crate) fn ensure_draft(&self, action: &'static str) -> Result<()> {
        if self.state != RequestState::Draft {
            return Err(SigningError::InvalidTransition {
                from: self.state,
                action,
            });
        }
        Ok(())
    }

    /// Keep the digest and the placeholder it was computed from. Done
    /// before the first submission so both survive a failed send.
    pub(crate) fn record_prepared(&mut self, content_hash: ContentDigest, placeholder: DocumentId) {
        self.content_hash = Some(content_hash);
        self.placeholder = Some(placeholder);
    }

    pub(crate) fn record_submission(&mut self, provider_reference: String) {
        self.provider_reference = Some(provider_reference);
    }

    pub(crate) fn set_result(&mut self, document: DocumentId) {
        self.result = Some(document);
        self.touch();
    }

    /// Count a failed poll; returns the new streak length
    pub(crate) fn record_poll_failure(&mut self) -> u32 {
        self.consecutive_poll_failures += 1;
        self.consecutive_poll_failures
    }

    /// Returns true when a failure streak was cleared
    pub(crate) fn record_poll_success(&mut self) -> bool {
        std::mem::replace(&mut self.consecutive_poll_failures, 0) > 0
    }
}

// ============================================================
// Provider configuration
// ============================================================

/// Credential string that never shows up in logs
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

/// Which gateway implementation serves a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Simulated,
    HashRemote,
}

impl BackendKind {
    pub fn name(&self) -> &'static str {
        match self {
            BackendKind::Simulated => "simulated",
            BackendKind::HashRemote => "hash_remote",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    pub id: ProviderId,
    #[serde(default)]
    pub name: String,
    pub backend: BackendKind,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<Secret>,
    #[serde(default)]
    pub test_mode: bool,
}

impl ProviderConfig {
    pub fn simulated(id: &str) -> Self {
        Self {
            id: ProviderId::from(id),
            name: "Simulated".to_string(),
            backend: BackendKind::Simulated,
            base_url: None,
            client_id: None,
            client_secret: None,
            test_mode: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contact(name: &str) -> SignerContact {
        SignerContact {
            name: name.to_string(),
            email: format!("{}@example.com", name.to_lowercase()),
            subject_id: None,
            certificate_serial: None,
        }
    }

    #[test]
    fn test_happy_path_transitions() {
        let state = RequestState::Draft.next(RequestEvent::Send).unwrap();
        assert_eq!(state, RequestState::Sent);
        let state = state.next(RequestEvent::FirstSignature).unwrap();
        assert_eq!(state, RequestState::PartiallySigned);
        let state = state.next(RequestEvent::AllSigned).unwrap();
        assert_eq!(state, RequestState::Completed);
    }

    #[test]
    fn test_terminal_states_reject_everything() {
        let events = [
            RequestEvent::Send,
            RequestEvent::FirstSignature,
            RequestEvent::AllSigned,
            RequestEvent::SignerRefused,
            RequestEvent::Cancel,
            RequestEvent::Expire,
        ];
        for state in [
            RequestState::Completed,
            RequestState::Cancelled,
            RequestState::Expired,
        ] {
            for event in events {
                assert!(state.next(event).is_err(), "{:?} accepted {:?}", state, event);
            }
        }
    }

    #[test]
    fn test_draft_cannot_complete() {
        assert!(RequestState::Draft.next(RequestEvent::AllSigned).is_err());
        assert!(RequestState::Draft.next(RequestEvent::SignerRefused).is_err());
        assert_eq!(
            RequestState::Draft.next(RequestEvent::Cancel).unwrap(),
            RequestState::Cancelled
        );
        assert_eq!(
            RequestState::Draft.next(RequestEvent::Expire).unwrap(),
            RequestState::Expired
        );
    }

    #[test]
    fn test_state_string_round_trip() {
        for state in [
            RequestState::Draft,
            RequestState::Sent,
            RequestState::PartiallySigned,
            RequestState::Completed,
            RequestState::Cancelled,
            RequestState::Expired,
        ] {
            assert_eq!(state.as_str().parse::<RequestState>().unwrap(), state);
            assert_eq!(
                serde_json::to_string(&state).unwrap(),
                format!("\"{}\"", state)
            );
        }
    }

    #[test]
    fn test_flow_ranks() {
        let internal = Signer::new(SignerRole::Internal, 2, contact("Lan"));
        let external = Signer::new(SignerRole::External, 1, contact("Minh"));

        assert!(SigningFlow::Sequential.rank(&external) < SigningFlow::Sequential.rank(&internal));
        assert_eq!(
            SigningFlow::Parallel.rank(&external),
            SigningFlow::Parallel.rank(&internal)
        );
        assert!(
            SigningFlow::InternalFirst.rank(&internal) < SigningFlow::InternalFirst.rank(&external)
        );
        assert!(SigningFlow::PartnerFirst.rank(&external) < SigningFlow::PartnerFirst.rank(&internal));
    }

    #[test]
    fn test_signer_transitions_are_idempotent() {
        let mut signer = Signer::new(SignerRole::Internal, 1, contact("Lan"));
        let now = Utc::now();
        assert!(signer.invite(now));
        assert!(!signer.invite(now));
        assert!(signer.mark_signed(now, Some("MIIB".into())));
        assert!(!signer.mark_signed(now, None));
        assert!(!signer.mark_refused());
        assert_eq!(signer.signature_value.as_deref(), Some("MIIB"));
        assert!(!signer.reset_pending());
    }

    #[test]
    fn test_waiting_signer_cannot_sign_or_refuse() {
        let mut signer = Signer::new(SignerRole::Internal, 1, contact("Minh"));
        assert!(!signer.mark_signed(Utc::now(), Some("MIIB".into())));
        assert!(!signer.mark_refused());
        assert_eq!(signer.state(), SignerState::Waiting);
        assert!(signer.signed_at.is_none());
        assert!(signer.signature_value.is_none());

        assert!(signer.invite(Utc::now()));
        assert!(signer.mark_refused());
        assert_eq!(signer.state(), SignerState::Refused);
    }

    #[test]
    fn test_link_secret_is_per_signer() {
        let token = CallbackToken::generate();
        let (alice, bob) = (SignerId::new(), SignerId::new());
        let secret = token.link_secret(alice);
        assert_eq!(secret.len(), 64);
        assert!(!secret.contains(token.as_str()));
        assert!(token.verify_link_secret(alice, &secret));
        assert!(!token.verify_link_secret(bob, &secret));
        assert!(!token.verify_link_secret(alice, token.as_str()));
        assert!(!token.verify_link_secret(alice, "not hex"));
        assert!(!CallbackToken::generate().verify_link_secret(alice, &secret));
    }

    #[test]
    fn test_callback_token() {
        let token = CallbackToken::generate();
        assert_eq!(token.as_str().len(), 64);
        assert!(token.verify(token.as_str()));
        assert!(!token.verify(""));
        assert!(!token.verify(&token.as_str()[..63]));
        assert_ne!(token, CallbackToken::generate());
        assert_eq!(token.digest(), CallbackToken::digest_of(token.as_str()));
        assert_eq!(format!("{:?}", token), "CallbackToken(***)");
    }

    #[test]
    fn test_secret_is_redacted() {
        let config: ProviderConfig = serde_json::from_str(
            r#"{"id":"smartca","backend":"hash_remote","client_id":"sp","client_secret":"hunter2"}"#,
        )
        .unwrap();
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("hunter2"));
        assert_eq!(config.client_secret.unwrap().expose(), "hunter2");
    }

    #[test]
    fn test_request_json_round_trip_keeps_private_state() {
        let request = SignatureRequest::new(
            "Lease",
            ProviderId::from("sim"),
            SourceDocument {
                document_id: DocumentId("doc-1".into()),
                filename: "lease.pdf".into(),
            },
            "Signature1",
        );
        let json = serde_json::to_string(&request).unwrap();
        let back: SignatureRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back.state(), RequestState::Draft);
        assert_eq!(back.token(), request.token());
        assert_eq!(back.audit.events.len(), 1);
    }

    #[test]
    fn test_overdue() {
        let mut request = SignatureRequest::new(
            "Lease",
            ProviderId::from("sim"),
            SourceDocument {
                document_id: DocumentId("doc-1".into()),
                filename: "lease.pdf".into(),
            },
            "Signature1",
        );
        let today = NaiveDate::from_ymd_opt(2026, 3, 10).unwrap();
        assert!(!request.is_overdue(today));
        request.deadline = NaiveDate::from_ymd_opt(2026, 3, 10);
        assert!(!request.is_overdue(today));
        request.deadline = NaiveDate::from_ymd_opt(2026, 3, 9);
        assert!(request.is_overdue(today));
    }
}

//! Tamper-evident audit log for signature requests

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Types of auditable events
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    Created,
    SignerAdded { signer_id: String },
    SignerRemoved { signer_id: String },
    Sent { provider_reference: String },
    Invited { signer_id: String },
    Signed { signer_id: String },
    Refused { signer_id: String },
    Completed,
    ArtifactStored { document_id: String },
    DownloadFailed { reason: String },
    Cancelled,
    Expired,
    PollEscalated { failures: u32 },
}

/// A single audit log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub action: AuditAction,
    /// `api`, `system`, `provider:<id>` or a signer's email
    pub actor: String,
    /// Content digest the event refers to, when one exists yet
    pub content_hash: Option<String>,
    pub previous_hash: Option<String>,
    pub details: Option<String>,
}

impl AuditEvent {
    fn new(
        action: AuditAction,
        actor: &str,
        content_hash: Option<&str>,
        previous_hash: Option<String>,
        details: Option<String>,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            action,
            actor: actor.to_string(),
            content_hash: content_hash.map(str::to_string),
            previous_hash,
            details,
        }
    }

    /// Compute the hash of this event (for chain linking)
    pub fn compute_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.event_id.as_bytes());
        hasher.update(self.timestamp.to_rfc3339().as_bytes());
        hasher.update(serde_json::to_vec(&self.action).unwrap_or_default());
        hasher.update(self.actor.as_bytes());
        if let Some(ref hash) = self.content_hash {
            hasher.update(hash.as_bytes());
        }
        if let Some(ref prev) = self.previous_hash {
            hasher.update(prev.as_bytes());
        }
        if let Some(ref details) = self.details {
            hasher.update(details.as_bytes());
        }
        hex::encode(hasher.finalize())
    }
}

/// Chain of audit events with hash linking
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct AuditChain {
    pub request_id: String,
    pub events: Vec<AuditEvent>,
}

impl AuditChain {
    pub fn new(request_id: &str) -> Self {
        Self {
            request_id: request_id.to_string(),
            events: Vec::new(),
        }
    }

    /// Get the hash of the last event (for linking)
    pub fn last_hash(&self) -> Option<String> {
        self.events.last().map(|e| e.compute_hash())
    }

    /// Append an event, automatically linking to previous hash
    pub fn append(
        &mut self,
        action: AuditAction,
        actor: &str,
        content_hash: Option<&str>,
        details: Option<String>,
    ) {
        let previous_hash = self.last_hash();
        self.events.push(AuditEvent::new(
            action,
            actor,
            content_hash,
            previous_hash,
            details,
        ));
    }

    /// Verify the integrity of the chain
    pub fn verify(&self) -> Result<(), String> {
        let mut expected_prev: Option<String> = None;

        for (i, event) in self.events.iter().enumerate() {
            if event.previous_hash != expected_prev {
                return Err(format!(
                    "Chain broken at event {}: expected prev {:?}, got {:?}",
                    i, expected_prev, event.previous_hash
                ));
            }
            expected_prev = Some(event.compute_hash());
        }

        Ok(())
    }

    pub fn count(&self, matches: impl Fn(&AuditAction) -> bool) -> usize {
        self.events.iter().filter(|e| matches(&e.action)).count()
    }
}

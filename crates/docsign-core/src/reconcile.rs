//! Status reconciliation
//!
//! Callbacks and polls both end up here. [`apply_status_update`] only
//! touches the in-memory request; the service persists the result and runs
//! side effects (invitations, completion, notifications) afterwards, based
//! on the returned [`Reconciliation`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::audit::AuditAction;
use crate::flow;
use crate::model::{RequestEvent, RequestState, SignatureRequest, SignerId};

/// Per-signer status as reported by a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportedStatus {
    Pending,
    Signed,
    Refused,
}

impl ReportedStatus {
    /// Lenient mapping of provider and webhook vocabulary
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "signed" | "completed" | "success" | "done" => Some(ReportedStatus::Signed),
            "refused" | "rejected" | "declined" | "denied" => Some(ReportedStatus::Refused),
            "pending" | "waiting" | "sent" | "processing" => Some(ReportedStatus::Pending),
            _ => None,
        }
    }
}

/// Which signer an update is about
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignerKey {
    Id(SignerId),
    ProviderRef(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignerUpdate {
    pub signer: SignerKey,
    pub status: ReportedStatus,
    pub signed_at: Option<DateTime<Utc>>,
    /// Provider signature value (base64 CMS for hash signing)
    pub signature_value: Option<String>,
}

impl SignerUpdate {
    pub fn signed(signer: SignerKey, signed_at: Option<DateTime<Utc>>) -> Self {
        Self {
            signer,
            status: ReportedStatus::Signed,
            signed_at,
            signature_value: None,
        }
    }
}

/// Whole-request verdict some providers report next to signer updates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    #[default]
    InProgress,
    Completed,
    Cancelled,
    Expired,
}

/// What one reconciliation pass changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    pub newly_signed: Vec<SignerId>,
    pub newly_refused: Vec<SignerId>,
    /// Signed or refused reports for signers whose turn has not come yet
    pub deferred: Vec<SignerId>,
    pub transition: Option<(RequestState, RequestState)>,
}

impl Reconciliation {
    /// Whether anything needs to be persisted
    pub fn changed(&self) -> bool {
        !self.newly_signed.is_empty() || !self.newly_refused.is_empty() || self.transition.is_some()
    }

    pub fn completed(&self) -> bool {
        matches!(self.transition, Some((_, RequestState::Completed)))
    }

    pub fn reached(&self) -> Option<RequestState> {
        self.transition.map(|(_, to)| to)
    }
}

/// Fold provider updates into `request`.
///
/// Terminal requests are left alone. Updates are applied in flow order, so a
/// batch reporting two consecutive groups as signed is accepted in one pass.
/// Re-applying an update that already took effect changes nothing.
pub fn apply_status_update(
    request: &mut SignatureRequest,
    updates: &[SignerUpdate],
    overall: OverallStatus,
    actor: &str,
) -> Reconciliation {
    let mut outcome = Reconciliation::default();
    let from = request.state();
    if from.is_terminal() || from == RequestState::Draft {
        debug!(request_id = %request.id, state = %from, "Ignoring status update");
        return outcome;
    }

    let mut resolved: Vec<(SignerId, &SignerUpdate)> = updates
        .iter()
        .filter_map(|update| match resolve(request, &update.signer) {
            Some(id) => Some((id, update)),
            None => {
                warn!(request_id = %request.id, signer = ?update.signer, "Status update for unknown signer");
                None
            }
        })
        .collect();
    let order = flow::in_flow_order(request.flow, &request.signers);
    resolved.sort_by_key(|(id, _)| order.iter().position(|o| o == id));

    let content_hash = request.content_hash().map(|d| d.to_string());
    for (signer_id, update) in resolved {
        match update.status {
            ReportedStatus::Pending => {}
            ReportedStatus::Signed => {
                let Some(signer) = request.signer(signer_id) else { continue };
                if signer.state().is_terminal() {
                    continue;
                }
                if !flow::may_proceed(request.flow, &request.signers, signer) {
                    outcome.deferred.push(signer_id);
                    continue;
                }
                let email = signer.contact.email.clone();
                let at = update.signed_at.unwrap_or_else(Utc::now);
                // a signer whose turn came within this batch was never invited
                let marked = request.signer_mut(signer_id).is_some_and(|s| {
                    s.invite(at);
                    s.mark_signed(at, update.signature_value.clone())
                });
                if marked {
                    outcome.newly_signed.push(signer_id);
                    request.audit.append(
                        AuditAction::Signed {
                            signer_id: signer_id.to_string(),
                        },
                        &email,
                        content_hash.as_deref(),
                        Some(format!("reported by {}", actor)),
                    );
                }
            }
            ReportedStatus::Refused => {
                let Some(signer) = request.signer(signer_id) else { continue };
                if signer.state().is_terminal() {
                    continue;
                }
                if !flow::may_proceed(request.flow, &request.signers, signer) {
                    outcome.deferred.push(signer_id);
                    continue;
                }
                let refused = request.signer_mut(signer_id).map(|s| {
                    s.invite(Utc::now());
                    (s.mark_refused(), s.contact.email.clone())
                });
                if let Some((true, email)) = refused {
                    outcome.newly_refused.push(signer_id);
                    request.audit.append(
                        AuditAction::Refused {
                            signer_id: signer_id.to_string(),
                        },
                        &email,
                        content_hash.as_deref(),
                        Some(format!("reported by {}", actor)),
                    );
                }
            }
        }
    }

    let event = if request.any_refused() {
        Some(RequestEvent::SignerRefused)
    } else if request.all_signed() {
        Some(RequestEvent::AllSigned)
    } else if !outcome.newly_signed.is_empty() && from == RequestState::Sent {
        Some(RequestEvent::FirstSignature)
    } else {
        match overall {
            OverallStatus::Cancelled => Some(RequestEvent::Cancel),
            OverallStatus::Expired => Some(RequestEvent::Expire),
            // a provider claiming completion without every signature is not trusted
            OverallStatus::InProgress | OverallStatus::Completed => None,
        }
    };

    if let Some(event) = event {
        match request.apply(event) {
            Ok(to) => {
                outcome.transition = Some((from, to));
                let action = match to {
                    RequestState::Completed => Some(AuditAction::Completed),
                    RequestState::Cancelled => Some(AuditAction::Cancelled),
                    RequestState::Expired => Some(AuditAction::Expired),
                    _ => None,
                };
                if let Some(action) = action {
                    request
                        .audit
                        .append(action, actor, content_hash.as_deref(), None);
                }
            }
            Err(err) => warn!(request_id = %request.id, error = %err, "Rejected transition"),
        }
    } else if outcome.changed() {
        request.touch();
    }

    outcome
}

fn resolve(request: &SignatureRequest, key: &SignerKey) -> Option<SignerId> {
    match key {
        SignerKey::Id(id) => request.signer(*id).map(|s| s.id),
        SignerKey::ProviderRef(reference) => request.signer_by_ref(reference).map(|s| s.id),
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use crate::model::{DocumentId, ProviderId, Signer, SignerContact, SignerRole, SourceDocument};
    use proptest::prelude::*;

    fn build(orders: &[u32], flow: crate::model::SigningFlow) -> SignatureRequest {
        let mut request = SignatureRequest::new(
            "p",
            ProviderId::from("sim"),
            SourceDocument {
                document_id: DocumentId("d".into()),
                filename: "d.pdf".into(),
            },
            "Signature1",
        );
        request.flow = flow;
        for (i, order) in orders.iter().enumerate() {
            let role = if i % 2 == 0 { SignerRole::Internal } else { SignerRole::External };
            let mut signer = Signer::new(
                role,
                *order,
                SignerContact {
                    name: i.to_string(),
                    email: format!("{}@example.com", i),
                    subject_id: None,
                    certificate_serial: None,
                },
            );
            signer.provider_signer_ref = Some(i.to_string());
            request.signers.push(signer);
        }
        request.apply(RequestEvent::Send).unwrap();
        request
    }

    fn flows() -> impl Strategy<Value = crate::model::SigningFlow> {
        use crate::model::SigningFlow;
        prop_oneof![
            Just(SigningFlow::Sequential),
            Just(SigningFlow::Parallel),
            Just(SigningFlow::InternalFirst),
            Just(SigningFlow::PartnerFirst),
        ]
    }

    proptest! {
        /// Arbitrary update sequences keep the ordering, fail-fast and
        /// completion invariants
        #[test]
        fn invariants_hold_under_any_update_sequence(
            orders in proptest::collection::vec(0u32..4, 1..6),
            flow in flows(),
            script in proptest::collection::vec((0usize..6, 0u8..3), 0..24),
        ) {
            let mut request = build(&orders, flow);
            for (idx, status) in script {
                let idx = idx % orders.len();
                // invite whoever is eligible, the way the service does
                for id in flow::eligible_signers(request.flow, &request.signers) {
                    if let Some(s) = request.signer_mut(id) {
                        s.invite(Utc::now());
                    }
                }
                let status = match status {
                    0 => ReportedStatus::Pending,
                    1 => ReportedStatus::Signed,
                    _ => ReportedStatus::Refused,
                };
                let update = SignerUpdate {
                    signer: SignerKey::ProviderRef(idx.to_string()),
                    status,
                    signed_at: None,
                    signature_value: None,
                };
                apply_status_update(&mut request, &[update], OverallStatus::InProgress, "prop");

                prop_assert!(flow::ordering_holds(request.flow, &request.signers));
                if request.any_refused() {
                    prop_assert_eq!(request.state(), RequestState::Cancelled);
                }
                prop_assert_eq!(
                    request.state() == RequestState::Completed,
                    request.all_signed()
                );
            }
        }
    }
}

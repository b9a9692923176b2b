//! Signer ordering
//!
//! Signers are grouped by their effective rank under the request's
//! [`SigningFlow`]. A group may be invited once every lower-ranked signer
//! has signed.

use crate::model::{Signer, SignerId, SignerState, SigningFlow};

/// Whether every signer ranked strictly below `signer` has signed
pub fn may_proceed(flow: SigningFlow, signers: &[Signer], signer: &Signer) -> bool {
    let rank = flow.rank(signer);
    signers
        .iter()
        .filter(|other| flow.rank(other) < rank)
        .all(|other| other.state() == SignerState::Signed)
}

/// Waiting signers that may be invited now
pub fn eligible_signers(flow: SigningFlow, signers: &[Signer]) -> Vec<SignerId> {
    if signers.iter().any(|s| s.state() == SignerState::Refused) {
        return Vec::new();
    }
    signers
        .iter()
        .filter(|s| s.state() == SignerState::Waiting)
        .filter(|s| may_proceed(flow, signers, s))
        .map(|s| s.id)
        .collect()
}

/// Signer ids sorted by effective rank, stable within a rank
pub fn in_flow_order(flow: SigningFlow, signers: &[Signer]) -> Vec<SignerId> {
    let mut ordered: Vec<&Signer> = signers.iter().collect();
    ordered.sort_by_key(|s| flow.rank(s));
    ordered.into_iter().map(|s| s.id).collect()
}

/// No signer is `sent` or `signed` while a lower-ranked one is still
/// `waiting` or has `refused`
pub fn ordering_holds(flow: SigningFlow, signers: &[Signer]) -> bool {
    signers
        .iter()
        .filter(|s| matches!(s.state(), SignerState::Sent | SignerState::Signed))
        .all(|s| {
            let rank = flow.rank(s);
            signers.iter().all(|other| {
                flow.rank(other) >= rank
                    || !matches!(other.state(), SignerState::Waiting | SignerState::Refused)
            })
        })
}

//! Hash-signing backend against an in-process mock of the remote API

mod common;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use common::*;
use docsign_core::{
    NewSigner, ProviderBackend, ProviderConfig, ProviderGateway, RequestState, SignerContact,
    SignerRole, SigningConfig, SigningError, SigningFlow,
};
use docsign_pades::DigestAlgorithm;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

const PENDING: u8 = 0;
const SIGNED: u8 = 1;
const REJECTED: u8 = 2;
const DOWN: u8 = 3;

#[derive(Default)]
struct MockState {
    sign_requests: Mutex<Vec<Value>>,
    status_calls: Mutex<Vec<String>>,
    mode: AtomicU8,
    sign_calls: AtomicUsize,
    // 1-based sign call answered with 502; 0 never fails
    fail_sign_call: AtomicUsize,
}

impl MockState {
    fn set(&self, mode: u8) {
        self.mode.store(mode, Ordering::SeqCst);
    }
}

fn remote_container() -> Vec<u8> {
    docsign_pades::fixtures::der_sequence(b"remote-cms")
}

async fn certificate(State(state): State<Arc<MockState>>) -> Response {
    if state.mode.load(Ordering::SeqCst) == DOWN {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    Json(json!({"status_code": 200, "message": "ok", "data": {"user_certificates": []}})).into_response()
}

async fn sign(State(state): State<Arc<MockState>>, Json(body): Json<Value>) -> Response {
    let call = state.sign_calls.fetch_add(1, Ordering::SeqCst) + 1;
    if call == state.fail_sign_call.load(Ordering::SeqCst) {
        return StatusCode::BAD_GATEWAY.into_response();
    }
    let transaction_id = body["transaction_id"].clone();
    state.sign_requests.lock().unwrap().push(body);
    Json(json!({
        "status_code": 200,
        "message": "ok",
        "data": {"transaction_id": transaction_id, "tran_code": "4C7F"}
    }))
    .into_response()
}

async fn status(State(state): State<Arc<MockState>>, Path(tx): Path<String>) -> Response {
    state.status_calls.lock().unwrap().push(tx);
    let data = match state.mode.load(Ordering::SeqCst) {
        SIGNED => json!({
            "transaction_status": "completed",
            "signatures": [{"signature_value": STANDARD.encode(remote_container())}]
        }),
        REJECTED => json!({"transaction_status": "rejected", "signatures": []}),
        DOWN => return StatusCode::BAD_GATEWAY.into_response(),
        _ => json!({"transaction_status": "pending", "signatures": []}),
    };
    Json(json!({"status_code": 200, "message": "ok", "data": data})).into_response()
}

async fn spawn_mock(state: Arc<MockState>) -> String {
    let app = Router::new()
        .route("/v1/credentials/get_certificate", post(certificate))
        .route("/v1/signatures/sign", post(sign))
        .route("/v1/signatures/sign/:tx/status", post(status))
        .with_state(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}/", addr)
}

async fn harness(state: Arc<MockState>) -> Harness {
    let base_url = spawn_mock(state).await;
    let config: ProviderConfig = serde_json::from_value(json!({
        "id": "demo",
        "name": "Remote CA",
        "backend": "hash_remote",
        "base_url": base_url,
        "client_id": "sp-001",
        "client_secret": "sp-secret",
    }))
    .unwrap();
    let settings = SigningConfig::default();
    let gateway = ProviderBackend::from_config(&config, &settings).unwrap();
    Harness::with_gateway(Arc::new(gateway), settings)
}

#[tokio::test]
async fn test_hash_signing_round_trip() {
    let state = Arc::new(MockState::default());
    let h = harness(state.clone()).await;
    h.service.test_connection(&h.provider_id).await.unwrap();

    let (request, _) = h.sent(SigningFlow::Sequential, &[("alice@example.com", 1)]).await;
    {
        let submitted = state.sign_requests.lock().unwrap();
        assert_eq!(submitted.len(), 1);
        let body = &submitted[0];
        assert_eq!(body["sp_id"], "sp-001");
        assert_eq!(body["sp_password"], "sp-secret");
        assert_eq!(body["user_id"], contact("alice@example.com").subject_id.unwrap());
        assert_eq!(body["transaction_desc"], "Service agreement");
        let file = &body["sign_files"][0];
        assert_eq!(file["sign_type"], "hash");
        assert_eq!(file["file_type"], "pdf");
        assert_eq!(
            file["data_to_be_signed"],
            request.content_hash().unwrap().to_upper_hex()
        );
        assert!(file["doc_id"].as_str().unwrap().starts_with("DOC-"));
        assert!(body["transaction_id"].as_str().unwrap().starts_with("SP_CA_"));
    }

    let pending = h.service.check_status(request.id).await.unwrap();
    assert_eq!(pending.state(), RequestState::Sent);

    state.set(SIGNED);
    let done = h.service.check_status(request.id).await.unwrap();
    assert_eq!(done.state(), RequestState::Completed);

    let signed = h.signed_bytes(&done).await;
    let region = docsign_pades::inspect(&signed, "Signature1").unwrap();
    assert_eq!(region.container, remote_container());
    assert_eq!(
        &region.digest(DigestAlgorithm::Sha256),
        done.content_hash().unwrap()
    );
}

#[tokio::test]
async fn test_next_signer_submitted_after_first_signs() {
    let state = Arc::new(MockState::default());
    let h = harness(state.clone()).await;
    let (request, _) = h
        .sent(
            SigningFlow::Sequential,
            &[("alice@example.com", 1), ("bob@example.com", 2)],
        )
        .await;
    assert_eq!(state.sign_requests.lock().unwrap().len(), 1);

    state.set(SIGNED);
    let partial = h.service.check_status(request.id).await.unwrap();
    assert_eq!(partial.state(), RequestState::PartiallySigned);

    let submitted = state.sign_requests.lock().unwrap();
    assert_eq!(submitted.len(), 2);
    // one session reference across both signer transactions
    assert_eq!(
        submitted[0]["sign_files"][0]["doc_id"],
        submitted[1]["sign_files"][0]["doc_id"]
    );
    assert_eq!(
        submitted[1]["user_id"],
        contact("bob@example.com").subject_id.unwrap()
    );
}

#[tokio::test]
async fn test_interrupted_submission_keeps_opened_transactions() {
    let state = Arc::new(MockState::default());
    let h = harness(state.clone()).await;
    let (request, ids) = h
        .sent(
            SigningFlow::Sequential,
            &[
                ("alice@example.com", 1),
                ("bob@example.com", 2),
                ("carolyn@example.com", 2),
            ],
        )
        .await;

    // the second signer of the next group hits a gateway error
    state.fail_sign_call.store(3, Ordering::SeqCst);
    state.set(SIGNED);
    let partial = h.service.check_status(request.id).await.unwrap();
    assert_eq!(partial.state(), RequestState::PartiallySigned);
    let opened: Vec<_> = ids[1..]
        .iter()
        .filter(|id| partial.signer(**id).unwrap().provider_signer_ref.is_some())
        .collect();
    assert_eq!(opened.len(), 1);
    let invited = partial.signer(*opened[0]).unwrap();
    assert_eq!(invited.state(), docsign_core::SignerState::Sent);

    state.set(PENDING);
    let resumed = h.service.check_status(request.id).await.unwrap();
    assert_eq!(state.sign_calls.load(Ordering::SeqCst), 4);
    for id in &ids[1..] {
        let signer = resumed.signer(*id).unwrap();
        assert!(signer.provider_signer_ref.is_some());
        assert_eq!(signer.state(), docsign_core::SignerState::Sent);
    }

    let submitted = state.sign_requests.lock().unwrap();
    for email in ["alice@example.com", "bob@example.com", "carolyn@example.com"] {
        let subject = contact(email).subject_id.unwrap();
        let transactions = submitted
            .iter()
            .filter(|body| body["user_id"] == subject.as_str())
            .count();
        assert_eq!(transactions, 1, "{email}");
    }
}

#[tokio::test]
async fn test_rejected_transaction_cancels_request() {
    let state = Arc::new(MockState::default());
    let h = harness(state.clone()).await;
    let (request, _) = h.sent(SigningFlow::Sequential, &[("alice@example.com", 1)]).await;

    state.set(REJECTED);
    let cancelled = h.service.check_status(request.id).await.unwrap();
    assert_eq!(cancelled.state(), RequestState::Cancelled);
    assert!(cancelled.result().is_none());
}

#[tokio::test]
async fn test_gateway_errors_are_transient() {
    let state = Arc::new(MockState::default());
    let h = harness(state.clone()).await;
    let (request, _) = h.sent(SigningFlow::Sequential, &[("alice@example.com", 1)]).await;

    state.set(DOWN);
    let err = h.service.check_status(request.id).await.unwrap_err();
    assert!(err.is_transient());
    let current = h.load(request.id).await;
    assert_eq!(current.state(), RequestState::Sent);
    assert_eq!(current.consecutive_poll_failures(), 1);

    let err = h.service.test_connection(&h.provider_id).await.unwrap_err();
    assert!(matches!(err, SigningError::ProviderUnavailable(_)));
}

#[tokio::test]
async fn test_signer_without_subject_id_cannot_be_sent() {
    let state = Arc::new(MockState::default());
    let h = harness(state.clone()).await;
    let (id, _) = h.draft(SigningFlow::Sequential, &[]).await;
    h.service
        .add_signer(
            id,
            NewSigner {
                role: SignerRole::External,
                order: 1,
                contact: SignerContact {
                    name: "Carol".into(),
                    email: "carol@example.com".into(),
                    subject_id: None,
                    certificate_serial: None,
                },
            },
        )
        .await
        .unwrap();

    let err = h.service.send(id).await.unwrap_err();
    assert!(matches!(err, SigningError::Validation(_)));
    assert_eq!(h.load(id).await.state(), RequestState::Draft);
    assert!(state.sign_requests.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_missing_credentials_is_a_configuration_error() {
    let config: ProviderConfig = serde_json::from_value(json!({
        "id": "remote",
        "backend": "hash_remote",
        "base_url": "http://127.0.0.1:9",
    }))
    .unwrap();
    let err = ProviderBackend::from_config(&config, &SigningConfig::default())
        .err()
        .unwrap();
    assert!(err.is_configuration());
}

#[tokio::test]
async fn test_download_uses_stored_signature_value() {
    let state = Arc::new(MockState::default());
    let h = harness(state.clone()).await;
    let (request, _) = h.sent(SigningFlow::Sequential, &[("alice@example.com", 1)]).await;

    state.set(SIGNED);
    let done = h.service.check_status(request.id).await.unwrap();
    // one status call for the poll; the container came from the stored value
    assert_eq!(state.status_calls.lock().unwrap().len(), 1);

    let config: ProviderConfig = serde_json::from_value(json!({
        "id": "demo",
        "backend": "hash_remote",
        "base_url": "http://127.0.0.1:9",
        "client_id": "sp-001",
        "client_secret": "sp-secret",
    }))
    .unwrap();
    let offline = ProviderBackend::from_config(&config, &SigningConfig::default()).unwrap();
    let artifact = offline.download_result(&done).await.unwrap();
    assert_eq!(
        artifact,
        docsign_core::ResultArtifact::SignatureContainer(remote_container())
    );
}

//! HTTP handlers for DocSign API

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    Json,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::Utc;
use docsign_core::{
    CallbackPayload, NewRequest, NewSigner, ProviderId, RequestId, SignerId, SigningError,
    SweepReport,
};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::error::{callback_error, ApiError};
use crate::models::*;
use crate::state::AppState;

type ApiResult<T> = Result<T, ApiError>;

fn request_id(raw: &str) -> ApiResult<RequestId> {
    Ok(raw.parse()?)
}

/// Health check endpoint
pub async fn health() -> Json<Value> {
    Json(json!({"status": "healthy", "service": "docsign-api"}))
}

// ============================================================
// Requests
// ============================================================

pub async fn create_request(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateRequestBody>,
) -> ApiResult<(StatusCode, Json<RequestResponse>)> {
    let document = BASE64
        .decode(&body.pdf_base64)
        .map_err(|e| ApiError::InvalidRequest(format!("Invalid PDF base64: {}", e)))?;

    let request = state
        .service
        .create_request(NewRequest {
            title: body.title,
            description: body.description,
            provider_id: body.provider_id,
            flow: body.flow,
            deadline: body.deadline,
            filename: body.filename,
            document,
            requester: body.requester,
            field_name: body.field_name,
            signers: body.signers,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(RequestResponse::new(&request, state.service.config())),
    ))
}

pub async fn list_requests(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<RequestResponse>>> {
    let config = state.service.config();
    let requests = state.service.list().await?;
    Ok(Json(
        requests
            .iter()
            .map(|r| RequestResponse::new(r, config))
            .collect(),
    ))
}

pub async fn get_request(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<RequestResponse>> {
    let request = state.service.get(request_id(&id)?).await?;
    Ok(Json(RequestResponse::new(&request, state.service.config())))
}

pub async fn add_signer(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<NewSigner>,
) -> ApiResult<(StatusCode, Json<SignerResponse>)> {
    let signer = state.service.add_signer(request_id(&id)?, body).await?;
    Ok((StatusCode::CREATED, Json(SignerResponse::from(&signer))))
}

pub async fn remove_signer(
    State(state): State<Arc<AppState>>,
    Path((id, signer_id)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    let signer_id: SignerId = signer_id.parse()?;
    state
        .service
        .remove_signer(request_id(&id)?, signer_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn send_request(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<RequestResponse>> {
    let request = state.service.send(request_id(&id)?).await?;
    Ok(Json(RequestResponse::new(&request, state.service.config())))
}

pub async fn cancel_request(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<RequestResponse>> {
    let request = state.service.cancel(request_id(&id)?).await?;
    Ok(Json(RequestResponse::new(&request, state.service.config())))
}

/// Manual status check against the provider
pub async fn check_request(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<RequestResponse>> {
    let request = state.service.check_status(request_id(&id)?).await?;
    Ok(Json(RequestResponse::new(&request, state.service.config())))
}

pub async fn retry_download(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<RequestResponse>> {
    let request = state.service.retry_download(request_id(&id)?).await?;
    Ok(Json(RequestResponse::new(&request, state.service.config())))
}

/// Signed PDF of a completed request
pub async fn get_signed_document(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let (filename, bytes) = state.service.signed_document(request_id(&id)?).await?;
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename.replace('"', "")),
            ),
        ],
        bytes,
    ))
}

pub async fn get_audit(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<AuditResponse>> {
    let request = state.service.get(request_id(&id)?).await?;
    Ok(Json(AuditResponse {
        verified: request.audit.verify().is_ok(),
        events: request.audit.events,
    }))
}

// ============================================================
// Providers and sweeps
// ============================================================

pub async fn list_providers(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<ProviderResponse>>> {
    let registry = state.service.providers();
    let mut providers = Vec::new();
    for id in registry.ids() {
        let gateway = registry.get(&id)?;
        providers.push(ProviderResponse {
            backend: gateway.backend().to_string(),
            id,
        });
    }
    Ok(Json(providers))
}

pub async fn test_provider(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    state.service.test_connection(&ProviderId(id.clone())).await?;
    Ok(Json(json!({"status": "ok", "provider": id})))
}

pub async fn run_poll_sweep(State(state): State<Arc<AppState>>) -> ApiResult<Json<SweepReport>> {
    Ok(Json(state.service.poll_sweep().await?))
}

pub async fn run_expiry_sweep(State(state): State<Arc<AppState>>) -> ApiResult<Json<ExpirySweepResponse>> {
    let expired = state
        .service
        .expire_overdue(Utc::now().date_naive())
        .await?;
    Ok(Json(ExpirySweepResponse {
        expired: expired.iter().map(|id| id.to_string()).collect(),
    }))
}

// ============================================================
// Provider-facing endpoints
// ============================================================

/// Provider webhook. Answers `{"status": "ok"}` for every authenticated
/// delivery, including repeats for finished requests.
pub async fn signature_callback(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
    payload: Result<Json<CallbackPayload>, JsonRejection>,
) -> Response {
    let payload = match payload {
        Ok(Json(payload)) => payload,
        Err(rejection) => {
            tracing::warn!(error = %rejection, "Malformed callback body");
            return callback_error(ApiError::InvalidRequest(rejection.body_text()));
        }
    };

    match state.service.handle_callback(&token, payload).await {
        Ok(ack) => {
            tracing::debug!(?ack, "Callback acknowledged");
            Json(json!({"status": "ok"})).into_response()
        }
        Err(err) => callback_error(err.into()),
    }
}

/// Confirmation link for the simulated provider
pub async fn demo_sign(
    State(state): State<Arc<AppState>>,
    Path((id, signer_id, secret)): Path<(String, String, String)>,
) -> Response {
    let ids = id
        .parse::<RequestId>()
        .and_then(|id| Ok((id, signer_id.parse::<SignerId>()?)));
    let outcome = match ids {
        Ok((id, signer_id)) => state.service.simulate_signature(id, signer_id, &secret).await,
        Err(err) => Err(err),
    };

    match outcome {
        Ok((request, result)) => {
            let message = if !result.deferred.is_empty() {
                "It is not your turn to sign yet. Please wait for the previous signers."
            } else if result.completed() {
                "Thank you. All parties have signed this document."
            } else {
                "Thank you. Your signature has been recorded."
            };
            Html(demo_page(&request.title, message)).into_response()
        }
        Err(err) => {
            let status = match &err {
                SigningError::InvalidCallbackToken | SigningError::NotFound(_) => {
                    StatusCode::NOT_FOUND
                }
                SigningError::Validation(_) => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            let message = match &err {
                SigningError::InvalidCallbackToken => "This signing link is not valid.".to_string(),
                SigningError::NotFound(_) => "Request or signer not found.".to_string(),
                SigningError::Validation(msg) => msg.clone(),
                other => {
                    tracing::error!(error = %other, "Demo signing failed");
                    "Something went wrong.".to_string()
                }
            };
            (status, Html(demo_page("Signature", &message))).into_response()
        }
    }
}

fn demo_page(title: &str, message: &str) -> String {
    format!(
        "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><title>{title}</title></head>\
         <body><h1>{title}</h1><p>{message}</p></body></html>",
        title = escape_html(title),
        message = escape_html(message),
    )
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

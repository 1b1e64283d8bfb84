//! HTTP API
//!
//! REST surface around the real-time core: credential minting
//! (register/login/logout), the people directory, conversation history,
//! attachment download, and health/metrics endpoints.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::attachment_store::AttachmentStore;
use crate::auth::{self, Identity, TokenVerifier};
use crate::message_store::MessageStore;
use crate::metrics::ChatMetrics;
use crate::protocol::WireMessage;
use crate::user_store::{UserStore, UserStoreError};

/// Shared state for HTTP handlers.
#[derive(Clone)]
pub struct HttpState {
    pub users: Arc<dyn UserStore>,
    pub messages: Arc<dyn MessageStore>,
    pub attachments: Arc<AttachmentStore>,
    pub verifier: TokenVerifier,
    pub metrics: ChatMetrics,
    pub metrics_token: Option<String>,
}

/// Middleware to check bearer token for the metrics endpoint.
async fn metrics_auth_middleware(
    State(state): State<HttpState>,
    request: Request<axum::body::Body>,
    next: Next,
) -> Response {
    if request.uri().path() == "/metrics" {
        if let Some(ref expected_token) = state.metrics_token {
            let auth_header = request.headers().get(header::AUTHORIZATION);
            let is_authorized = auth_header.is_some_and(|h| {
                h.to_str()
                    .map(|s| {
                        s.strip_prefix("Bearer ")
                            .is_some_and(|token| token == expected_token)
                    })
                    .unwrap_or(false)
            });

            if !is_authorized {
                return (
                    StatusCode::UNAUTHORIZED,
                    [(header::WWW_AUTHENTICATE, "Bearer")],
                    "Unauthorized",
                )
                    .into_response();
            }
        }
    }

    next.run(request).await
}

/// Creates the HTTP router.
pub fn create_router(state: HttpState) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/register", post(register_handler))
        .route("/login", post(login_handler))
        .route("/logout", post(logout_handler))
        .route("/profile", get(profile_handler))
        .route("/people", get(people_handler))
        .route("/messages/{user_id}", get(messages_handler))
        .route("/attachments/{name}", get(attachment_handler))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            metrics_auth_middleware,
        ))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct CredentialsBody {
    username: String,
    password: String,
}

#[derive(Debug, Serialize)]
struct PersonEntry {
    #[serde(rename = "_id")]
    id: String,
    username: String,
}

/// Resolves the caller's identity from the `token` cookie.
fn caller_identity(state: &HttpState, headers: &HeaderMap) -> Result<Identity, StatusCode> {
    let token = headers
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .and_then(auth::token_from_cookie_header);
    state
        .verifier
        .resolve(token)
        .map_err(|_| StatusCode::UNAUTHORIZED)
}

fn session_cookie(token: &str) -> String {
    format!("token={}; Path=/; SameSite=Lax", token)
}

fn cleared_cookie() -> String {
    "token=; Path=/; Max-Age=0; SameSite=Lax".to_string()
}

/// Root handler - returns basic info.
async fn root_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "service": "parley",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Health check endpoint - always returns 200 if the server is running.
async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn metrics_handler(State(state): State<HttpState>) -> impl IntoResponse {
    let metrics_text = state.metrics.encode();

    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        metrics_text,
    )
}

/// Creates a user and issues its first credential.
async fn register_handler(
    State(state): State<HttpState>,
    Json(body): Json<CredentialsBody>,
) -> Response {
    if body.username.is_empty() || body.password.is_empty() {
        return (StatusCode::BAD_REQUEST, "username and password required").into_response();
    }

    let hash = match bcrypt::hash(&body.password, bcrypt::DEFAULT_COST) {
        Ok(hash) => hash,
        Err(e) => {
            tracing::error!("password hash failed: {}", e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let record = match state.users.create(&body.username, &hash) {
        Ok(record) => record,
        Err(UserStoreError::UsernameTaken) => {
            return (StatusCode::CONFLICT, "username already taken").into_response()
        }
        Err(e) => {
            tracing::error!("user create failed: {}", e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    issue_session(&state, record.id, record.username, StatusCode::CREATED)
}

/// Verifies a password and issues a fresh credential.
async fn login_handler(
    State(state): State<HttpState>,
    Json(body): Json<CredentialsBody>,
) -> Response {
    let record = match state.users.find_by_username(&body.username) {
        Ok(Some(record)) => record,
        Ok(None) => return (StatusCode::UNAUTHORIZED, "invalid credentials").into_response(),
        Err(e) => {
            tracing::error!("user lookup failed: {}", e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    match bcrypt::verify(&body.password, &record.password_hash) {
        Ok(true) => issue_session(&state, record.id, record.username, StatusCode::OK),
        Ok(false) => (StatusCode::UNAUTHORIZED, "invalid credentials").into_response(),
        Err(e) => {
            tracing::error!("password verify failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn issue_session(state: &HttpState, id: String, username: String, status: StatusCode) -> Response {
    let identity = Identity { id, username };
    match state.verifier.issue(&identity) {
        Ok(token) => (
            status,
            [(header::SET_COOKIE, session_cookie(&token))],
            Json(serde_json::json!({ "id": identity.id })),
        )
            .into_response(),
        Err(e) => {
            tracing::error!("token mint failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn logout_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::SET_COOKIE, cleared_cookie())],
        Json(serde_json::json!("ok")),
    )
}

/// Returns the caller's identity claims.
async fn profile_handler(State(state): State<HttpState>, headers: HeaderMap) -> Response {
    match caller_identity(&state, &headers) {
        Ok(identity) => Json(serde_json::json!({
            "userId": identity.id,
            "username": identity.username,
        }))
        .into_response(),
        Err(status) => status.into_response(),
    }
}

/// Lists all known users.
async fn people_handler(State(state): State<HttpState>) -> Response {
    match state.users.list() {
        Ok(users) => Json(
            users
                .into_iter()
                .map(|(id, username)| PersonEntry { id, username })
                .collect::<Vec<_>>(),
        )
        .into_response(),
        Err(e) => {
            tracing::error!("people listing failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Returns the conversation between the caller and `{user_id}`, ascending
/// by creation time.
async fn messages_handler(
    State(state): State<HttpState>,
    Path(user_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let caller = match caller_identity(&state, &headers) {
        Ok(identity) => identity,
        Err(status) => return status.into_response(),
    };

    match state.messages.conversation(&caller.id, &user_id) {
        Ok(messages) => Json(
            messages
                .iter()
                .map(WireMessage::history)
                .collect::<Vec<_>>(),
        )
        .into_response(),
        Err(e) => {
            tracing::error!("history query failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Serves a stored attachment's raw bytes.
async fn attachment_handler(
    State(state): State<HttpState>,
    Path(name): Path<String>,
) -> Response {
    let Some(path) = state.attachments.path_of(&name) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    match tokio::fs::read(&path).await {
        Ok(bytes) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/octet-stream")],
            bytes,
        )
            .into_response(),
        Err(_) => StatusCode::NOT_FOUND.into_response(),
    }
}

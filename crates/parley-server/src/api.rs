//! HTTP endpoints: ticket login and the `/api/v1` user surface.

use crate::auth::{basic_credentials, bearer_token, permissions::GUEST_LOGIN, Principal};
use crate::server::AppState;
use crate::store::{StoreError, UserInfo};
use axum::extract::{ConnectInfo, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use parley_core::{create_token, verify_token};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

/// JSON error response: `{"error": msg, "code": status}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized")
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn too_many_requests() -> Self {
        Self::new(StatusCode::TOO_MANY_REQUESTS, "too many attempts, retry later")
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "error": self.message, "code": self.status.as_u16() }));
        (self.status, body).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::InvalidInput(msg) => Self::bad_request(msg),
            StoreError::AlreadyExists(user) => Self::bad_request(format!("user already exists: {user}")),
            StoreError::Internal(e) => {
                warn!(error = %e, "user store failure");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
            }
        }
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub user: String,
    pub pass: String,
}

#[derive(Debug, Serialize)]
struct UserView {
    username: String,
    created_at: u64,
    online: bool,
}

pub async fn root() -> Json<serde_json::Value> {
    Json(json!({ "status": "online" }))
}

/// `GET /login`: Basic-Auth credentials in, one-time ticket out (text/plain).
pub async fn login(
    State(state): State<Arc<AppState>>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> ApiResult<String> {
    check_rate_limit(&state, remote).await?;
    let (user, pass) = basic_credentials(&headers).ok_or_else(ApiError::unauthorized)?;

    let principal = if user == GUEST_LOGIN && pass.is_empty() && state.config.allow_guests {
        Principal::guest()
    } else if state.users.auth_user(&user, &pass).await {
        Principal::user(user)
    } else {
        info!(user = %user, remote = %remote, "login rejected");
        return Err(ApiError::unauthorized());
    };

    info!(user = %principal.username, guest = principal.guest, remote = %remote, "login accepted");
    Ok(state.otp.issue(principal).await)
}

/// `POST /api/v1/register`
pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    state.users.create_user(&req.user, &req.pass).await?;
    Ok((StatusCode::CREATED, Json(json!({ "user": req.user.trim() }))))
}

/// `POST /api/v1/users/token`: Basic-Auth credentials in, bearer token out.
pub async fn create_user_token(
    State(state): State<Arc<AppState>>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    check_rate_limit(&state, remote).await?;
    let (user, pass) = basic_credentials(&headers).ok_or_else(ApiError::unauthorized)?;
    if !state.users.auth_user(&user, &pass).await {
        info!(user = %user, remote = %remote, "token request rejected");
        return Err(ApiError::unauthorized());
    }

    let token = create_token(&state.secret, &user, state.config.token_ttl_secs);
    info!(user = %user, "bearer token issued");
    Ok((StatusCode::CREATED, Json(json!({ "token": token }))))
}

/// `GET /api/v1/users/token`: validate the presented bearer token.
pub async fn check_user_token(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Json<serde_json::Value>> {
    let user = authorize_bearer(&state, &headers)?;
    Ok(Json(json!({ "user": user, "valid": true })))
}

/// `GET /api/v1/status`
pub async fn status(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Json<serde_json::Value>> {
    authorize_bearer(&state, &headers)?;
    let clients = state.registry.count().await;
    Ok(Json(json!({ "status": "online", "clients": clients })))
}

/// `GET /api/v1/users`
pub async fn list_users(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Json<serde_json::Value>> {
    authorize_bearer(&state, &headers)?;
    let mut users = Vec::new();
    for info in state.users.users().await {
        users.push(view(&state, info).await);
    }
    Ok(Json(json!({ "users": users })))
}

/// `GET /api/v1/users/{user_id}`
pub async fn user_info(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Json<serde_json::Value>> {
    authorize_bearer(&state, &headers)?;
    let info = state
        .users
        .user_info(&user_id)
        .await
        .ok_or_else(|| ApiError::not_found(format!("no such user: {user_id}")))?;
    Ok(Json(json!(view(&state, info).await)))
}

async fn view(state: &AppState, info: UserInfo) -> UserView {
    let online = state.registry.is_online(&info.username).await;
    UserView {
        username: info.username,
        created_at: info.created_at,
        online,
    }
}

fn authorize_bearer(state: &AppState, headers: &HeaderMap) -> ApiResult<String> {
    let token = bearer_token(headers).ok_or_else(ApiError::unauthorized)?;
    verify_token(&state.secret, token).map_err(|_| ApiError::unauthorized())
}

async fn check_rate_limit(state: &AppState, remote: SocketAddr) -> ApiResult<()> {
    if state.login_limiter.lock().await.check_and_record(remote.ip()) {
        Ok(())
    } else {
        warn!(remote = %remote, "login rate limit exceeded");
        Err(ApiError::too_many_requests())
    }
}

//! Front-end handlers.

use axum::Json;
use axum::extract::{Form, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use fleetmend_state::FleetSnapshot;

use crate::ApiState;

/// Response header carrying the daemon version.
pub const VERSION_HEADER: &str = "server-version";

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ErrorBody {
            error: msg.to_string(),
        }),
    )
}

/// GET /
pub async fn root(State(state): State<ApiState>) -> impl IntoResponse {
    ([(VERSION_HEADER, state.version)], "Working!")
}

/// GET /healthcheck
pub async fn healthcheck(State(state): State<ApiState>) -> impl IntoResponse {
    let body = format!("server version {}", state.version);
    ([(VERSION_HEADER, state.version)], body)
}

// ── Sessions ───────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct LoginResponse {
    pub user_level: u32,
    pub auth_code: String,
    pub username: String,
}

/// POST /auth
pub async fn authenticate(
    State(state): State<ApiState>,
    Form(form): Form<LoginForm>,
) -> impl IntoResponse {
    let level = match state.credentials.user_level(&form.username, &form.password) {
        Ok(level) => level,
        Err(e) => {
            error!(error = %e, "credential lookup failed");
            return error_response("server error", StatusCode::INTERNAL_SERVER_ERROR)
                .into_response();
        }
    };
    if level == 0 {
        warn!(username = %form.username, "login rejected");
        return error_response("user not found", StatusCode::FORBIDDEN).into_response();
    }

    match state.tokens.issue(level).await {
        Ok(auth_code) => {
            info!(username = %form.username, user_level = level, "session issued");
            Json(LoginResponse {
                user_level: level,
                auth_code,
                username: form.username,
            })
            .into_response()
        }
        Err(e) => {
            error!(error = %e, "token generation failed");
            error_response("server error", StatusCode::INTERNAL_SERVER_ERROR).into_response()
        }
    }
}

// ── Snapshot ───────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct CheckParams {
    pub token: Option<String>,
}

/// GET /check?token=
pub async fn check(
    State(state): State<ApiState>,
    Query(params): Query<CheckParams>,
) -> impl IntoResponse {
    let level = match params.token.as_deref() {
        Some(token) if !token.is_empty() => state.tokens.level(token).await,
        _ => 0,
    };
    if level < 1 {
        return error_response("not authenticated", StatusCode::FORBIDDEN).into_response();
    }

    let snapshot = state.snapshots.latest();
    Json(FleetSnapshot::clone(&snapshot)).into_response()
}

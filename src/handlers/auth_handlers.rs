//! Login, first-run registration and the current-user endpoint.

use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
};
use serde_json::{Value, json};

use crate::{
    errors::AppError,
    services::{
        accounts::{Credentials, LoginResponse, SetupStatus},
        guard::Identity,
    },
    state::{AppState, json_body},
};

/// `POST /api/auth/login`
pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<Credentials>, JsonRejection>,
) -> Result<Json<LoginResponse>, AppError> {
    let credentials = json_body(payload)?;
    Ok(Json(state.accounts.login(credentials).await?))
}

/// `POST /api/auth/register`: only while no users exist.
pub async fn register(
    State(state): State<AppState>,
    payload: Result<Json<Credentials>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let credentials = json_body(payload)?;
    let user = state.accounts.register(credentials).await?;
    Ok(Json(json!({ "success": true, "user": user })))
}

/// `GET /api/auth/setup-status`
pub async fn setup_status(State(state): State<AppState>) -> Result<Json<SetupStatus>, AppError> {
    Ok(Json(state.accounts.setup_status().await?))
}

/// `GET /api/auth/me`
pub async fn me(
    State(state): State<AppState>,
    identity: Identity,
) -> Result<Json<Value>, AppError> {
    let user = state.accounts.me(&identity).await?;
    Ok(Json(json!({ "user": user })))
}

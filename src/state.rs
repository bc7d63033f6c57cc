//! Shared router state and the bearer-token extractors.

use axum::{
    Json,
    extract::{FromRequestParts, rejection::JsonRejection},
    http::{StatusCode, header, request::Parts},
};

use crate::{
    errors::{AppError, GatewayError},
    models::user::Role,
    services::{
        accounts::Accounts,
        gateway::Gateway,
        guard::{Identity, check_role},
    },
};

#[derive(Clone)]
pub struct AppState {
    pub gateway: Gateway,
    pub accounts: Accounts,
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Any authenticated caller.
impl FromRequestParts<AppState> for Identity {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts).ok_or_else(|| GatewayError::auth("Unauthorized"))?;
        Ok(state.accounts.tokens().verify(token)?)
    }
}

/// An authenticated caller holding the admin role.
#[derive(Clone, Debug)]
pub struct AdminIdentity(pub Identity);

impl FromRequestParts<AppState> for AdminIdentity {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let identity = Identity::from_request_parts(parts, state).await?;
        check_role(Some(&identity), Role::Admin)?;
        Ok(AdminIdentity(identity))
    }
}

/// Unwrap a JSON body, answering malformed payloads in the error envelope.
pub fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    match payload {
        Ok(Json(value)) => Ok(value),
        Err(rejection) => Err(AppError::new(
            StatusCode::BAD_REQUEST,
            format!("Validation error: {}", rejection.body_text()),
        )),
    }
}

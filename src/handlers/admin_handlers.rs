//! Registry administration: destinations and users. All handlers require
//! the admin role except `available_destinations`.

use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::{
    errors::{AppError, GatewayError},
    models::{
        destination::{ConnectionConfig, DestinationPatch, NewDestination},
        user::{NewUser, UserPatch},
    },
    services::{guard::Identity, store_client::ConnectionTest},
    state::{AdminIdentity, AppState, json_body},
};

fn parse_id(raw: &str, what: &str) -> Result<Uuid, GatewayError> {
    Uuid::parse_str(raw).map_err(|_| GatewayError::not_found(format!("{what} not found")))
}

/// `GET /api/destinations/available`: destinations the caller may open,
/// without credentials.
pub async fn available_destinations(
    State(state): State<AppState>,
    identity: Identity,
) -> Result<Json<Value>, AppError> {
    let destinations = state.gateway.available_destinations(&identity).await?;
    Ok(Json(json!({ "destinations": destinations })))
}

/// `POST /api/destinations/test`
pub async fn test_connection(
    State(state): State<AppState>,
    _admin: AdminIdentity,
    payload: Result<Json<ConnectionConfig>, JsonRejection>,
) -> Result<Json<ConnectionTest>, AppError> {
    let config = json_body(payload)?;
    Ok(Json(state.gateway.test_connection(&config).await))
}

/// `GET /api/admin/destinations`
pub async fn list_destinations(
    State(state): State<AppState>,
    _admin: AdminIdentity,
) -> Result<Json<Value>, AppError> {
    let destinations = state.gateway.list_destinations().await?;
    Ok(Json(json!({ "destinations": destinations })))
}

/// `POST /api/admin/destinations`
pub async fn create_destination(
    State(state): State<AppState>,
    _admin: AdminIdentity,
    payload: Result<Json<NewDestination>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let input = json_body(payload)?;
    let destination = state.gateway.create_destination(input).await?;
    Ok(Json(json!({ "destination": destination })))
}

/// `GET /api/admin/destinations/{id}`
pub async fn get_destination(
    State(state): State<AppState>,
    _admin: AdminIdentity,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let id = parse_id(&id, "Destination")?;
    let destination = state.gateway.get_destination(id).await?;
    Ok(Json(json!({ "destination": destination })))
}

/// `PUT /api/admin/destinations/{id}`
pub async fn update_destination(
    State(state): State<AppState>,
    _admin: AdminIdentity,
    Path(id): Path<String>,
    payload: Result<Json<DestinationPatch>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let id = parse_id(&id, "Destination")?;
    let patch = json_body(payload)?;
    let destination = state.gateway.update_destination(id, patch).await?;
    Ok(Json(json!({ "destination": destination })))
}

/// `DELETE /api/admin/destinations/{id}`
pub async fn delete_destination(
    State(state): State<AppState>,
    _admin: AdminIdentity,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let id = parse_id(&id, "Destination")?;
    state.gateway.delete_destination(id).await?;
    Ok(Json(json!({ "success": true })))
}

/// `GET /api/admin/users`
pub async fn list_users(
    State(state): State<AppState>,
    _admin: AdminIdentity,
) -> Result<Json<Value>, AppError> {
    let users = state.accounts.list_users().await?;
    Ok(Json(json!({ "users": users })))
}

/// `POST /api/admin/users`
pub async fn create_user(
    State(state): State<AppState>,
    _admin: AdminIdentity,
    payload: Result<Json<NewUser>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let input = json_body(payload)?;
    let user = state.accounts.create_user(input).await?;
    Ok(Json(json!({ "user": user })))
}

/// `PUT /api/admin/users/{id}`
pub async fn update_user(
    State(state): State<AppState>,
    _admin: AdminIdentity,
    Path(id): Path<String>,
    payload: Result<Json<UserPatch>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let id = parse_id(&id, "User")?;
    let patch = json_body(payload)?;
    let user = state.accounts.update_user(id, patch).await?;
    Ok(Json(json!({ "user": user })))
}

/// `DELETE /api/admin/users/{id}`
pub async fn delete_user(
    State(state): State<AppState>,
    AdminIdentity(admin): AdminIdentity,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let id = parse_id(&id, "User")?;
    state.accounts.delete_user(&admin, id).await?;
    Ok(Json(json!({ "success": true })))
}

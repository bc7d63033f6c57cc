//! Defines routes for the gateway API.
//!
//! ## Structure
//! - **Auth** (`/api/auth/*`): login, first-run registration, setup status,
//!   current user.
//! - **Browsing** (`/api/s3/*`): bucket, folder and object operations on a
//!   destination selected with `?id=`; bearer token required.
//! - **Public** (`/api/public/*`): read-only browsing by destination slug,
//!   no token.
//! - **Administration** (`/api/admin/*`, `/api/destinations/*`): registry
//!   and user management.
//!
//! The wildcard `*key` allows nested keys like `photos/2025/img.jpg`.

use crate::{
    handlers::{admin_handlers, auth_handlers, health_handlers, public_handlers, s3_handlers},
    state::AppState,
};
use axum::{
    Router,
    routing::{get, post, put},
};

/// Build and return the router for every gateway endpoint.
///
/// The router carries shared state (`AppState`) to all handlers.
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(health_handlers::healthz))
        .route("/readyz", get(health_handlers::readyz))
        .nest("/api/auth", auth_routes())
        .nest("/api/s3", s3_routes())
        .nest("/api/public", public_routes())
        .nest("/api/admin", admin_routes())
        .route(
            "/api/destinations/available",
            get(admin_handlers::available_destinations),
        )
        .route(
            "/api/destinations/test",
            post(admin_handlers::test_connection),
        )
}

fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/login", post(auth_handlers::login))
        .route("/register", post(auth_handlers::register))
        .route("/setup-status", get(auth_handlers::setup_status))
        .route("/me", get(auth_handlers::me))
}

fn s3_routes() -> Router<AppState> {
    Router::new()
        // Bucket-level routes
        .route("/buckets", get(s3_handlers::list_buckets))
        .route("/buckets/create", post(s3_handlers::create_bucket))
        .route("/buckets/rename", post(s3_handlers::rename_bucket))
        .route(
            "/buckets/reconcile",
            post(s3_handlers::reconcile_bucket_rename),
        )
        .route("/list", get(s3_handlers::list_objects))
        // Folder-level routes
        .route("/folders/count", get(s3_handlers::count_folder))
        .route("/folders/create", post(s3_handlers::create_folder))
        .route("/folders/delete", post(s3_handlers::delete_folder))
        .route("/folders/rename", post(s3_handlers::rename_folder))
        .route(
            "/folders/reconcile",
            post(s3_handlers::reconcile_folder_rename),
        )
        // Object-level routes; POST is the `rename` action
        .route(
            "/objects/{*key}",
            get(s3_handlers::download_url)
                .delete(s3_handlers::delete_object)
                .post(s3_handlers::rename_object),
        )
        .route("/upload-url", post(s3_handlers::upload_url))
        .route(
            "/metadata",
            get(s3_handlers::get_metadata).put(s3_handlers::put_metadata),
        )
}

fn public_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/destinations/{slug}",
            get(public_handlers::get_destination),
        )
        .route("/s3/buckets", get(public_handlers::list_buckets))
        .route("/s3/list", get(public_handlers::list_objects))
        .route("/s3/objects/{*key}", get(public_handlers::download_url))
}

fn admin_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/destinations",
            get(admin_handlers::list_destinations).post(admin_handlers::create_destination),
        )
        .route(
            "/destinations/{id}",
            get(admin_handlers::get_destination)
                .put(admin_handlers::update_destination)
                .delete(admin_handlers::delete_destination),
        )
        .route(
            "/users",
            get(admin_handlers::list_users).post(admin_handlers::create_user),
        )
        .route(
            "/users/{id}",
            put(admin_handlers::update_user).delete(admin_handlers::delete_user),
        )
}

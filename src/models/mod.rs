//! Core data models for the bucket gateway.
//!
//! Destinations and users map to registry tables via `sqlx::FromRow`; listing
//! types are derived per request. Everything serializes as JSON via `serde`.

pub mod destination;
pub mod listing;
pub mod user;

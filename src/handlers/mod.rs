pub mod admin_handlers;
pub mod auth_handlers;
pub mod health_handlers;
pub mod public_handlers;
pub mod s3_handlers;

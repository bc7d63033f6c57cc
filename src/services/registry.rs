//! src/services/registry.rs
//!
//! Registry of destinations, users and process secrets, persisted in SQLite.
//! Records are read-modify-write with last-write-wins semantics; nothing here
//! talks to an object store.

use chrono::Utc;
use sqlx::{SqlitePool, types::Json};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    errors::{GatewayError, GatewayResult},
    models::{
        destination::{Destination, DestinationPatch, DestinationRow, NewDestination},
        user::{Role, User},
    },
};

const INIT_MIGRATION: &str = include_str!("../../migrations/0001_init.sql");

const DESTINATION_COLUMNS: &str = "id, name, slug, endpoint, region, access_key_id, \
     secret_access_key, force_path_style, bucket_names, allow_public_access, \
     allowed_user_ids, metadata_columns, created_at, updated_at";

const USER_COLUMNS: &str = "id, username, password_hash, role, created_at, updated_at";

pub const JWT_SECRET_NAME: &str = "jwt_secret";

#[derive(Clone)]
pub struct Registry {
    /// Shared SQLite connection pool.
    pub db: Arc<SqlitePool>,
}

/// Run the embedded schema. Statements are idempotent.
pub async fn run_migrations(db: &SqlitePool) -> GatewayResult<()> {
    let statements = INIT_MIGRATION
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();

    info!("Running {} migration statements...", statements.len());

    for stmt in statements {
        debug!("Executing migration SQL: {}", stmt);
        sqlx::query(stmt).execute(db).await?;
    }
    Ok(())
}

impl Registry {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    pub async fn ping(&self) -> GatewayResult<()> {
        sqlx::query("SELECT 1").execute(&*self.db).await?;
        Ok(())
    }

    // ---- destinations ----

    pub async fn create_destination(&self, input: NewDestination) -> GatewayResult<Destination> {
        input.validate()?;
        let destination = input.into_destination(Utc::now());

        let result = sqlx::query(&format!(
            "INSERT INTO destinations ({DESTINATION_COLUMNS}) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(destination.id)
        .bind(&destination.name)
        .bind(&destination.slug)
        .bind(&destination.endpoint)
        .bind(&destination.region)
        .bind(&destination.access_key_id)
        .bind(&destination.secret_access_key)
        .bind(destination.force_path_style)
        .bind(Json(destination.bucket_names.clone()))
        .bind(destination.allow_public_access)
        .bind(Json(destination.allowed_user_ids.clone()))
        .bind(Json(destination.metadata_columns.clone()))
        .bind(destination.created_at)
        .bind(destination.updated_at)
        .execute(&*self.db)
        .await;

        match result {
            Ok(_) => {
                info!(id = %destination.id, slug = %destination.slug, "destination created");
                Ok(destination)
            }
            Err(err) if is_unique_violation(&err) => Err(slug_taken(&destination.slug)),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn get_destination(&self, id: Uuid) -> GatewayResult<Destination> {
        sqlx::query_as::<_, DestinationRow>(&format!(
            "SELECT {DESTINATION_COLUMNS} FROM destinations WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&*self.db)
        .await?
        .map(Destination::from)
        .ok_or_else(|| GatewayError::not_found("Destination not found"))
    }

    pub async fn get_destination_by_slug(&self, slug: &str) -> GatewayResult<Destination> {
        sqlx::query_as::<_, DestinationRow>(&format!(
            "SELECT {DESTINATION_COLUMNS} FROM destinations WHERE slug = ?"
        ))
        .bind(slug)
        .fetch_optional(&*self.db)
        .await?
        .map(Destination::from)
        .ok_or_else(|| GatewayError::not_found("Destination not found"))
    }

    pub async fn list_destinations(&self) -> GatewayResult<Vec<Destination>> {
        let rows = sqlx::query_as::<_, DestinationRow>(&format!(
            "SELECT {DESTINATION_COLUMNS} FROM destinations ORDER BY created_at, name"
        ))
        .fetch_all(&*self.db)
        .await?;
        Ok(rows.into_iter().map(Destination::from).collect())
    }

    /// Merge `patch` into the stored record. Returns `(before, after)` so
    /// callers can drop anything keyed on the previous connection settings.
    pub async fn update_destination(
        &self,
        id: Uuid,
        patch: DestinationPatch,
    ) -> GatewayResult<(Destination, Destination)> {
        patch.validate()?;
        let before = self.get_destination(id).await?;
        let mut after = before.clone();
        patch.apply(&mut after, Utc::now());
        self.save_destination(&after).await?;
        info!(id = %id, slug = %after.slug, "destination updated");
        Ok((before, after))
    }

    /// Write every mutable field of `destination` back.
    pub async fn save_destination(&self, destination: &Destination) -> GatewayResult<()> {
        let result = sqlx::query(
            "UPDATE destinations SET name = ?, slug = ?, endpoint = ?, region = ?, \
             access_key_id = ?, secret_access_key = ?, force_path_style = ?, \
             bucket_names = ?, allow_public_access = ?, allowed_user_ids = ?, \
             metadata_columns = ?, updated_at = ? WHERE id = ?",
        )
        .bind(&destination.name)
        .bind(&destination.slug)
        .bind(&destination.endpoint)
        .bind(&destination.region)
        .bind(&destination.access_key_id)
        .bind(&destination.secret_access_key)
        .bind(destination.force_path_style)
        .bind(Json(destination.bucket_names.clone()))
        .bind(destination.allow_public_access)
        .bind(Json(destination.allowed_user_ids.clone()))
        .bind(Json(destination.metadata_columns.clone()))
        .bind(destination.updated_at)
        .bind(destination.id)
        .execute(&*self.db)
        .await;

        match result {
            Ok(done) if done.rows_affected() == 0 => {
                Err(GatewayError::not_found("Destination not found"))
            }
            Ok(_) => Ok(()),
            Err(err) if is_unique_violation(&err) => Err(slug_taken(&destination.slug)),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn delete_destination(&self, id: Uuid) -> GatewayResult<Destination> {
        let destination = self.get_destination(id).await?;
        sqlx::query("DELETE FROM destinations WHERE id = ?")
            .bind(id)
            .execute(&*self.db)
            .await?;
        info!(id = %id, slug = %destination.slug, "destination deleted");
        Ok(destination)
    }

    // ---- users ----

    pub async fn create_user(
        &self,
        username: &str,
        password_hash: &str,
        role: Role,
    ) -> GatewayResult<User> {
        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            username: username.to_string(),
            password_hash: password_hash.to_string(),
            role,
            created_at: now,
            updated_at: now,
        };

        let result = sqlx::query(&format!(
            "INSERT INTO users ({USER_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?)"
        ))
        .bind(user.id)
        .bind(&user.username)
        .bind(&user.password_hash)
        .bind(user.role)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&*self.db)
        .await;

        match result {
            Ok(_) => Ok(user),
            Err(err) if is_unique_violation(&err) => Err(username_taken(username)),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn get_user(&self, id: Uuid) -> GatewayResult<User> {
        sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?"))
            .bind(id)
            .fetch_optional(&*self.db)
            .await?
            .ok_or_else(|| GatewayError::not_found("User not found"))
    }

    pub async fn get_user_by_username(&self, username: &str) -> GatewayResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE username = ?"
        ))
        .bind(username)
        .fetch_optional(&*self.db)
        .await?;
        Ok(user)
    }

    pub async fn list_users(&self) -> GatewayResult<Vec<User>> {
        let users = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY created_at, username"
        ))
        .fetch_all(&*self.db)
        .await?;
        Ok(users)
    }

    pub async fn save_user(&self, user: &User) -> GatewayResult<()> {
        let result = sqlx::query(
            "UPDATE users SET username = ?, password_hash = ?, role = ?, updated_at = ? \
             WHERE id = ?",
        )
        .bind(&user.username)
        .bind(&user.password_hash)
        .bind(user.role)
        .bind(user.updated_at)
        .bind(user.id)
        .execute(&*self.db)
        .await;

        match result {
            Ok(done) if done.rows_affected() == 0 => Err(GatewayError::not_found("User not found")),
            Ok(_) => Ok(()),
            Err(err) if is_unique_violation(&err) => Err(username_taken(&user.username)),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn delete_user(&self, id: Uuid) -> GatewayResult<()> {
        let done = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(id)
            .execute(&*self.db)
            .await?;
        if done.rows_affected() == 0 {
            return Err(GatewayError::not_found("User not found"));
        }
        Ok(())
    }

    pub async fn count_users(&self) -> GatewayResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(&*self.db)
            .await?;
        Ok(count)
    }

    pub async fn count_admins(&self) -> GatewayResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE role = ?")
            .bind(Role::Admin)
            .fetch_one(&*self.db)
            .await?;
        Ok(count)
    }

    // ---- secrets ----

    /// Return the persisted secret `name`, storing `generate()` first if none
    /// exists. Concurrent first calls agree on a single value.
    pub async fn load_or_create_secret(
        &self,
        name: &str,
        generate: impl FnOnce() -> String,
    ) -> GatewayResult<String> {
        let inserted = sqlx::query(
            "INSERT OR IGNORE INTO app_secrets (name, value, created_at) VALUES (?, ?, ?)",
        )
        .bind(name)
        .bind(generate())
        .bind(Utc::now())
        .execute(&*self.db)
        .await?;
        if inserted.rows_affected() > 0 {
            info!(name, "generated new secret");
        }

        let value: String = sqlx::query_scalar("SELECT value FROM app_secrets WHERE name = ?")
            .bind(name)
            .fetch_one(&*self.db)
            .await?;
        Ok(value)
    }
}

fn slug_taken(slug: &str) -> GatewayError {
    GatewayError::conflict(format!("Slug `{slug}` is already in use"))
}

fn username_taken(username: &str) -> GatewayError {
    GatewayError::conflict(format!("Username `{username}` is already taken"))
}

/// Return true if SQLx error indicates a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}

//! User accounts: password hashing, token issuance, and the user
//! administration rules (first-run registration, last-admin protection).

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
};
use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use super::{
    guard::Identity,
    registry::{JWT_SECRET_NAME, Registry},
};
use crate::{
    errors::{GatewayError, GatewayResult},
    models::user::{NewUser, Role, User, UserPatch, UserView},
};

const TOKEN_TTL_HOURS: i64 = 24;
const MIN_USERNAME_LEN: usize = 3;
const MIN_PASSWORD_LEN: usize = 6;
const DEFAULT_ADMIN_USERNAME: &str = "admin";

/// Token claims.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    pub user_id: Uuid,
    pub username: String,
    pub role: Role,
    pub iat: i64,
    pub exp: i64,
}

/// HS256 token issuer and verifier.
#[derive(Clone)]
pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl TokenIssuer {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    pub fn issue(&self, user: &User) -> GatewayResult<String> {
        let now = Utc::now();
        let claims = Claims {
            user_id: user.id,
            username: user.username.clone(),
            role: user.role,
            iat: now.timestamp(),
            exp: (now + Duration::hours(TOKEN_TTL_HOURS)).timestamp(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| GatewayError::Internal(format!("token signing failed: {e}")))
    }

    /// Any failure (bad signature, expiry, malformed) is an auth error.
    pub fn verify(&self, token: &str) -> GatewayResult<Identity> {
        let data = decode::<Claims>(token, &self.decoding, &Validation::new(Algorithm::HS256))
            .map_err(|_| GatewayError::auth("Invalid token"))?;
        Ok(Identity {
            user_id: data.claims.user_id,
            username: data.claims.username,
            role: data.claims.role,
        })
    }
}

pub fn hash_password(password: &str) -> GatewayResult<String> {
    let mut salt_bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut salt_bytes);
    let salt = SaltString::encode_b64(&salt_bytes)
        .map_err(|e| GatewayError::Internal(e.to_string()))?;
    let phc = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| GatewayError::Internal(e.to_string()))?
        .to_string();
    Ok(phc)
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    if let Ok(parsed) = PasswordHash::new(hash) {
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    } else {
        false
    }
}

fn random_hex(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    buf.iter().map(|b| format!("{b:02x}")).collect()
}

/// Signing secret: explicit override, else the persisted one, else a fresh
/// 32-byte secret that is stored for the next start.
pub async fn resolve_jwt_secret(
    registry: &Registry,
    configured: Option<&str>,
) -> GatewayResult<String> {
    if let Some(secret) = configured.map(str::trim).filter(|s| !s.is_empty()) {
        return Ok(secret.to_string());
    }
    registry
        .load_or_create_secret(JWT_SECRET_NAME, || {
            let mut bytes = [0u8; 32];
            rand::thread_rng().fill_bytes(&mut bytes);
            STANDARD.encode(bytes)
        })
        .await
}

fn validate_username(username: &str) -> GatewayResult<()> {
    if username.chars().count() < MIN_USERNAME_LEN {
        return Err(GatewayError::validation(
            "Username must be at least 3 characters",
        ));
    }
    Ok(())
}

fn validate_password(password: &str) -> GatewayResult<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(GatewayError::validation(
            "Password must be at least 6 characters",
        ));
    }
    Ok(())
}

#[derive(Deserialize, Debug)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SetupStatus {
    pub has_users: bool,
}

#[derive(Serialize, Debug)]
pub struct LoginResponse {
    pub token: String,
    pub user: UserView,
}

#[derive(Clone)]
pub struct Accounts {
    registry: Registry,
    tokens: TokenIssuer,
}

impl Accounts {
    pub fn new(registry: Registry, tokens: TokenIssuer) -> Self {
        Self { registry, tokens }
    }

    pub fn tokens(&self) -> &TokenIssuer {
        &self.tokens
    }

    pub async fn setup_status(&self) -> GatewayResult<SetupStatus> {
        Ok(SetupStatus {
            has_users: self.registry.count_users().await? > 0,
        })
    }

    /// First-run registration; the account becomes an admin.
    pub async fn register(&self, input: Credentials) -> GatewayResult<UserView> {
        if self.registry.count_users().await? > 0 {
            return Err(GatewayError::forbidden(
                "Registration is disabled. Users already exist.",
            ));
        }
        validate_username(&input.username)?;
        validate_password(&input.password)?;
        let hash = hash_password(&input.password)?;
        let user = self
            .registry
            .create_user(&input.username, &hash, Role::Admin)
            .await?;
        info!(username = %user.username, "registered first administrator");
        Ok(user.view())
    }

    pub async fn login(&self, input: Credentials) -> GatewayResult<LoginResponse> {
        if input.username.is_empty() || input.password.is_empty() {
            return Err(GatewayError::validation("username and password are required"));
        }
        let user = match self.registry.get_user_by_username(&input.username).await? {
            Some(user) if verify_password(&input.password, &user.password_hash) => user,
            _ => {
                warn!(username = %input.username, "failed login");
                return Err(GatewayError::auth("Invalid credentials"));
            }
        };
        let token = self.tokens.issue(&user)?;
        Ok(LoginResponse {
            token,
            user: user.view(),
        })
    }

    pub async fn me(&self, identity: &Identity) -> GatewayResult<UserView> {
        Ok(self.registry.get_user(identity.user_id).await?.view())
    }

    pub async fn list_users(&self) -> GatewayResult<Vec<UserView>> {
        let users = self.registry.list_users().await?;
        Ok(users.iter().map(User::view).collect())
    }

    pub async fn create_user(&self, input: NewUser) -> GatewayResult<UserView> {
        validate_username(&input.username)?;
        validate_password(&input.password)?;
        let hash = hash_password(&input.password)?;
        let user = self
            .registry
            .create_user(&input.username, &hash, input.role)
            .await?;
        info!(username = %user.username, role = ?user.role, "user created");
        Ok(user.view())
    }

    /// Partial update. Demoting the only remaining admin is refused.
    pub async fn update_user(&self, id: Uuid, patch: UserPatch) -> GatewayResult<UserView> {
        let mut user = self.registry.get_user(id).await?;

        if let Some(username) = patch.username {
            validate_username(&username)?;
            user.username = username;
        }
        if let Some(password) = patch.password {
            validate_password(&password)?;
            user.password_hash = hash_password(&password)?;
        }
        if let Some(role) = patch.role {
            if user.role.is_admin() && !role.is_admin() && self.registry.count_admins().await? <= 1
            {
                return Err(GatewayError::conflict(
                    "Cannot demote the last administrator",
                ));
            }
            user.role = role;
        }
        user.updated_at = Utc::now();

        self.registry.save_user(&user).await?;
        info!(user_id = %id, "user updated");
        Ok(user.view())
    }

    pub async fn delete_user(&self, caller: &Identity, id: Uuid) -> GatewayResult<()> {
        if caller.user_id == id {
            return Err(GatewayError::conflict("Cannot delete your own account"));
        }
        let target = self.registry.get_user(id).await?;
        if target.role.is_admin() && self.registry.count_admins().await? <= 1 {
            return Err(GatewayError::conflict(
                "Cannot delete the last administrator",
            ));
        }
        self.registry.delete_user(id).await?;
        info!(user_id = %id, username = %target.username, "user deleted");
        Ok(())
    }

    /// Create the initial admin when the registry has no users. Returns the
    /// created username, or `None` when users already exist.
    pub async fn bootstrap_admin(
        &self,
        username: Option<&str>,
        password: Option<&str>,
    ) -> GatewayResult<Option<String>> {
        if self.registry.count_users().await? > 0 {
            return Ok(None);
        }
        let username = username
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .unwrap_or(DEFAULT_ADMIN_USERNAME);
        let password = match password.map(str::trim).filter(|p| !p.is_empty()) {
            Some(p) => p.to_string(),
            None => random_hex(5),
        };
        let hash = hash_password(&password)?;
        let user = self
            .registry
            .create_user(username, &hash, Role::Admin)
            .await?;

        info!("Admin user created successfully.");
        info!(username = %user.username, password = %password, "initial admin credentials");
        info!("Save these credentials securely - the password cannot be recovered.");
        Ok(Some(user.username))
    }
}

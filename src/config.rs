use anyhow::{Context, Result};
use clap::Parser;
use std::{env, fmt, time::Duration};

use crate::services::store_client::MAX_PRESIGN_TTL;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    /// Signing secret for bearer tokens. When unset, one is generated and
    /// kept in the registry so tokens survive restarts.
    pub jwt_secret: Option<String>,
    pub admin_username: Option<String>,
    pub admin_password: Option<String>,
    pub presign_ttl: Duration,
}

/// Secrets are never printed.
impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database_url", &self.database_url)
            .field("jwt_secret", &self.jwt_secret.as_ref().map(|_| "<redacted>"))
            .field("admin_username", &self.admin_username)
            .field(
                "admin_password",
                &self.admin_password.as_ref().map(|_| "<redacted>"),
            )
            .field("presign_ttl", &self.presign_ttl)
            .finish()
    }
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Multi-tenant S3 file-system gateway")]
pub struct Args {
    /// Host to bind to (overrides GATEWAY_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides GATEWAY_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Registry database URL (overrides GATEWAY_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Lifetime of presigned URLs in seconds (overrides GATEWAY_PRESIGN_TTL_SECS)
    #[arg(long)]
    pub presign_ttl_secs: Option<u64>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        // Parse CLI once
        let args = Args::parse();

        // --- Environment fallback ---
        let env_host = env::var("GATEWAY_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = parse_env("GATEWAY_PORT", 3000u16)?;
        let env_db = env::var("GATEWAY_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/gateway.db".into());
        let env_ttl = parse_env("GATEWAY_PRESIGN_TTL_SECS", 3600u64)?;

        // --- Merge ---
        let presign_ttl = presign_ttl(args.presign_ttl_secs.unwrap_or(env_ttl))?;
        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            database_url: args.database_url.unwrap_or(env_db),
            jwt_secret: optional_env("GATEWAY_JWT_SECRET"),
            admin_username: optional_env("GATEWAY_ADMIN_USERNAME"),
            admin_password: optional_env("GATEWAY_ADMIN_PASSWORD"),
            presign_ttl,
        };

        Ok((cfg, args.migrate))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_env<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}

/// Presigned URL lifetime, bounded by what SigV4 signing accepts.
fn presign_ttl(secs: u64) -> Result<Duration> {
    let ttl = Duration::from_secs(secs);
    if ttl.is_zero() {
        anyhow::bail!("presigned URL lifetime must be at least one second");
    }
    if ttl > MAX_PRESIGN_TTL {
        anyhow::bail!(
            "presigned URL lifetime of {}s exceeds the {}s maximum",
            secs,
            MAX_PRESIGN_TTL.as_secs()
        );
    }
    Ok(ttl)
}

fn optional_env(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

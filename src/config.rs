use anyhow::{Context, Result};
use clap::Parser;
use std::env;
use std::str::FromStr;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub retention_days: i64,
    pub sweep_interval_secs: u64,
    pub chunk_session_ttl_secs: i64,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "File sharing and transfer service")]
pub struct Args {
    /// Host to bind to (overrides FILEDROP_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides FILEDROP_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where files and snapshots are stored (overrides FILEDROP_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Default retention window in days for chunked uploads and transfers
    /// (overrides FILEDROP_RETENTION_DAYS)
    #[arg(long)]
    pub retention_days: Option<i64>,

    /// Seconds between maintenance sweeps (overrides FILEDROP_SWEEP_INTERVAL_SECS)
    #[arg(long)]
    pub sweep_interval_secs: Option<u64>,

    /// Seconds before an abandoned chunk session is evicted
    /// (overrides FILEDROP_CHUNK_SESSION_TTL_SECS)
    #[arg(long)]
    pub chunk_session_ttl_secs: Option<i64>,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig.
    pub fn from_env_and_args() -> Result<Self> {
        // Parse CLI once
        let args = Args::parse();

        // --- Environment fallback ---
        let env_host = env::var("FILEDROP_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = env_number("FILEDROP_PORT", 3000u16)?;
        let env_storage =
            env::var("FILEDROP_STORAGE_DIR").unwrap_or_else(|_| "./data/files".into());
        let env_retention = env_number("FILEDROP_RETENTION_DAYS", 30i64)?;
        let env_sweep = env_number("FILEDROP_SWEEP_INTERVAL_SECS", 300u64)?;
        let env_chunk_ttl = env_number("FILEDROP_CHUNK_SESSION_TTL_SECS", 86_400i64)?;

        // --- Merge ---
        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            retention_days: args.retention_days.unwrap_or(env_retention),
            sweep_interval_secs: args.sweep_interval_secs.unwrap_or(env_sweep),
            chunk_session_ttl_secs: args.chunk_session_ttl_secs.unwrap_or(env_chunk_ttl),
        };

        if cfg.retention_days <= 0 {
            anyhow::bail!("retention days must be positive, got {}", cfg.retention_days);
        }

        Ok(cfg)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Read a numeric env var, falling back to `default` when absent.
fn env_number<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
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

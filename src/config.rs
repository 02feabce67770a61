use anyhow::{Context, Result};
use clap::Parser;
use std::{env, str::FromStr};

use crate::services::capture_pipeline::PipelineConfig;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub staging_dir: String,
    pub durable_dir: String,
    pub database_url: String,
    pub upload_base_url: String,
    pub bucket_name: String,
    pub multipart: bool,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Capture finalization and archival service")]
pub struct Args {
    /// Host to bind to (overrides CAPTURE_STORE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides CAPTURE_STORE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory the capture front end records into (overrides CAPTURE_STORE_STAGING_DIR)
    #[arg(long)]
    pub staging_dir: Option<String>,

    /// Long-term capture storage (overrides CAPTURE_STORE_DURABLE_DIR)
    #[arg(long)]
    pub durable_dir: Option<String>,

    /// Database URL (overrides CAPTURE_STORE_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Base bucket URL archives are uploaded under (overrides CAPTURE_STORE_UPLOAD_BASE_URL)
    #[arg(long)]
    pub upload_base_url: Option<String>,

    /// Bucket name recorded on upload requests (overrides CAPTURE_STORE_BUCKET)
    #[arg(long)]
    pub bucket: Option<String>,

    /// Whether uploads use multipart sessions (overrides CAPTURE_STORE_MULTIPART)
    #[arg(long)]
    pub multipart: Option<bool>,

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
        let env_host = env::var("CAPTURE_STORE_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = parse_env("CAPTURE_STORE_PORT", 3000u16)?;
        let env_staging =
            env::var("CAPTURE_STORE_STAGING_DIR").unwrap_or_else(|_| "./data/staging".into());
        let env_durable =
            env::var("CAPTURE_STORE_DURABLE_DIR").unwrap_or_else(|_| "./data/durable".into());
        let env_db = env::var("CAPTURE_STORE_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/captures.db".into());
        let env_upload_base = env::var("CAPTURE_STORE_UPLOAD_BASE_URL")
            .unwrap_or_else(|_| "http://localhost:9000/captures".into());
        let env_bucket = env::var("CAPTURE_STORE_BUCKET").unwrap_or_else(|_| "captures".into());
        let env_multipart = parse_env("CAPTURE_STORE_MULTIPART", true)?;

        // --- Merge ---
        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            staging_dir: args.staging_dir.unwrap_or(env_staging),
            durable_dir: args.durable_dir.unwrap_or(env_durable),
            database_url: args.database_url.unwrap_or(env_db),
            upload_base_url: args.upload_base_url.unwrap_or(env_upload_base),
            bucket_name: args.bucket.unwrap_or(env_bucket),
            multipart: args.multipart.unwrap_or(env_multipart),
        };

        Ok((cfg, args.migrate))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn pipeline(&self) -> PipelineConfig {
        PipelineConfig {
            bucket_name: self.bucket_name.clone(),
            upload_base_url: self.upload_base_url.clone(),
            multipart: self.multipart,
        }
    }
}

/// Read and parse an environment variable, falling back to `default` when
/// it is unset.
fn parse_env<T>(name: &str, default: T) -> Result<T>
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

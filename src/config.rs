use crate::services::signer::{Credentials, DEFAULT_REGION, Signer};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::{env, fmt, path::PathBuf};
use thiserror::Error;

pub const DEFAULT_PRESIGN_EXPIRES: u64 = 3600;
pub const DEFAULT_CONCURRENCY: usize = 3;

/// Centralized server configuration.
/// Combines environment variables and CLI arguments; CLI wins.
#[derive(Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub storage: StorageConfig,
    /// Shared secret expected in `x-admin-key`. Unset rejects every admin call.
    pub admin_key: Option<String>,
}

/// Storage provider settings as configured. Any of them may be absent at
/// startup; [`StorageConfig::require`] is checked before every storage call.
#[derive(Clone, Default)]
pub struct StorageConfig {
    pub endpoint: Option<String>,
    pub bucket: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub region: String,
    pub presign_expires: u64,
}

/// Storage settings with every required value present.
#[derive(Clone, Debug)]
pub struct StorageSettings {
    pub endpoint: String,
    pub bucket: String,
    pub credentials: Credentials,
    pub region: String,
    pub presign_expires: u64,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Missing storage config: {}", .0.join(", "))]
pub struct MissingConfig(pub Vec<&'static str>);

/// Command-line interface.
#[derive(Parser, Debug)]
#[command(author, version, about = "Private media vault: upload API and client")]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the upload API server (default)
    Serve(ServeArgs),
    /// Upload a file through a running server
    Upload(UploadArgs),
}

/// Server arguments. Secrets are only read from the environment.
#[derive(clap::Args, Debug, Default, Clone)]
pub struct ServeArgs {
    /// Host to bind to (overrides VAULT_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides VAULT_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Database URL (overrides VAULT_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// S3-compatible endpoint (overrides VAULT_S3_ENDPOINT)
    #[arg(long)]
    pub s3_endpoint: Option<String>,

    /// Bucket name (overrides VAULT_S3_BUCKET)
    #[arg(long)]
    pub s3_bucket: Option<String>,

    /// Signing region (overrides VAULT_S3_REGION)
    #[arg(long)]
    pub s3_region: Option<String>,

    /// Lifetime of presigned URLs in seconds (overrides VAULT_PRESIGN_EXPIRES)
    #[arg(long)]
    pub presign_expires: Option<u64>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

/// Client upload arguments.
#[derive(clap::Args, Debug, Clone)]
pub struct UploadArgs {
    /// File to upload
    pub file: PathBuf,

    /// Title of the media item
    #[arg(long)]
    pub title: String,

    /// Base URL of the vault server (overrides VAULT_SERVER_URL)
    #[arg(long)]
    pub server: Option<String>,

    /// Admin key sent as `x-admin-key` (overrides VAULT_ADMIN_KEY)
    #[arg(long)]
    pub admin_key: Option<String>,

    /// MIME type of the file
    #[arg(long, default_value = "video/mp4")]
    pub content_type: String,

    /// Parts uploaded at the same time
    #[arg(long, default_value_t = DEFAULT_CONCURRENCY)]
    pub concurrency: usize,

    /// Explicit retry rounds for failed parts before giving up
    #[arg(long, default_value_t = 0)]
    pub retry_rounds: u32,
}

impl AppConfig {
    /// Merge server CLI args over the process environment.
    pub fn from_env_and_args(args: &ServeArgs) -> Result<Self> {
        Self::from_sources(args, |name| env::var(name).ok())
    }

    /// Merge server CLI args over an arbitrary variable lookup.
    pub fn from_sources(args: &ServeArgs, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let env_host = lookup("VAULT_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let env_port = match lookup("VAULT_PORT") {
            Some(value) => value
                .parse::<u16>()
                .with_context(|| format!("parsing VAULT_PORT value `{}`", value))?,
            None => 3000,
        };
        let env_db = lookup("VAULT_DATABASE_URL")
            .unwrap_or_else(|| "sqlite://./data/meta/vault.db".into());
        let env_expires = match lookup("VAULT_PRESIGN_EXPIRES") {
            Some(value) => value
                .parse::<u64>()
                .with_context(|| format!("parsing VAULT_PRESIGN_EXPIRES value `{}`", value))?,
            None => DEFAULT_PRESIGN_EXPIRES,
        };

        let non_empty = |value: Option<String>| {
            value
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let storage = StorageConfig {
            endpoint: non_empty(args.s3_endpoint.clone().or_else(|| lookup("VAULT_S3_ENDPOINT"))),
            bucket: non_empty(args.s3_bucket.clone().or_else(|| lookup("VAULT_S3_BUCKET"))),
            access_key_id: non_empty(lookup("VAULT_S3_ACCESS_KEY_ID")),
            secret_access_key: non_empty(lookup("VAULT_S3_SECRET_ACCESS_KEY")),
            region: non_empty(args.s3_region.clone().or_else(|| lookup("VAULT_S3_REGION")))
                .unwrap_or_else(|| DEFAULT_REGION.into()),
            presign_expires: args.presign_expires.unwrap_or(env_expires),
        };

        Ok(Self {
            host: args.host.clone().unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            database_url: args.database_url.clone().unwrap_or(env_db),
            storage,
            admin_key: non_empty(lookup("VAULT_ADMIN_KEY")),
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl StorageConfig {
    /// Fully specified storage settings, or the names of what is missing.
    pub fn require(&self) -> Result<StorageSettings, MissingConfig> {
        let mut missing = Vec::new();
        if self.access_key_id.is_none() {
            missing.push("VAULT_S3_ACCESS_KEY_ID");
        }
        if self.secret_access_key.is_none() {
            missing.push("VAULT_S3_SECRET_ACCESS_KEY");
        }
        if self.endpoint.is_none() {
            missing.push("VAULT_S3_ENDPOINT");
        }
        if self.bucket.is_none() {
            missing.push("VAULT_S3_BUCKET");
        }

        match (
            &self.endpoint,
            &self.bucket,
            &self.access_key_id,
            &self.secret_access_key,
        ) {
            (Some(endpoint), Some(bucket), Some(access_key_id), Some(secret)) => {
                Ok(StorageSettings {
                    endpoint: endpoint.clone(),
                    bucket: bucket.clone(),
                    credentials: Credentials::new(access_key_id, secret),
                    region: if self.region.is_empty() {
                        DEFAULT_REGION.into()
                    } else {
                        self.region.clone()
                    },
                    presign_expires: if self.presign_expires == 0 {
                        DEFAULT_PRESIGN_EXPIRES
                    } else {
                        self.presign_expires
                    },
                })
            }
            _ => Err(MissingConfig(missing)),
        }
    }
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database_url", &self.database_url)
            .field("storage", &self.storage)
            .field("admin_key", &self.admin_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageConfig")
            .field("endpoint", &self.endpoint)
            .field("bucket", &self.bucket)
            .field("access_key_id", &self.access_key_id)
            .field(
                "secret_access_key",
                &self.secret_access_key.as_ref().map(|_| "<redacted>"),
            )
            .field("region", &self.region)
            .field("presign_expires", &self.presign_expires)
            .finish()
    }
}

impl StorageSettings {
    pub fn signer(&self) -> Signer {
        Signer::new(self.credentials.clone(), self.region.clone())
    }
}

impl UploadArgs {
    pub fn server_url(&self) -> String {
        self.server
            .clone()
            .or_else(|| env::var("VAULT_SERVER_URL").ok())
            .unwrap_or_else(|| "http://127.0.0.1:3000".into())
    }

    pub fn admin_key(&self) -> Option<String> {
        self.admin_key
            .clone()
            .or_else(|| env::var("VAULT_ADMIN_KEY").ok())
    }
}

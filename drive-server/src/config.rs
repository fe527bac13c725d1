use std::path::PathBuf;
use std::time::Duration;

use drive_blob::{S3Config, StorageBackend, TransferConfig};

const DEV_TOKEN_SECRET: &str = "drive-dev-secret-change-me";

/// Deployment configuration, read from `DRIVE_*` environment variables
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub storage: StorageBackend,
    pub transfer: TransferConfig,
    pub token_secret: String,
    pub token_ttl: Duration,
    /// How long finished upload sessions are kept around
    pub session_retention: Duration,
}

impl ServerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (tests pass a map)
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let storage = match lookup("DRIVE_STORAGE").as_deref().unwrap_or("local") {
            "local" => StorageBackend::local(
                lookup("DRIVE_STORAGE_ROOT")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("data/chunks")),
            ),
            "s3" => StorageBackend::S3(s3_config(&lookup)?),
            "memory" => StorageBackend::Memory,
            other => anyhow::bail!("Unknown DRIVE_STORAGE backend: {other} (expected local, s3 or memory)"),
        };

        let chunk_size: u64 = var_or(&lookup, "DRIVE_CHUNK_SIZE", 5_000_000)?;
        if chunk_size == 0 {
            anyhow::bail!("DRIVE_CHUNK_SIZE must be positive");
        }

        let mut transfer = TransferConfig::default()
            .with_chunk_size(chunk_size)
            .with_max_file_bytes(var_or(&lookup, "DRIVE_MAX_FILE_BYTES", TransferConfig::default().max_file_bytes)?)
            .with_max_chunks(var_or(&lookup, "DRIVE_MAX_CHUNKS", TransferConfig::default().max_chunks)?)
            .with_download_prefetch(var_or(&lookup, "DRIVE_DOWNLOAD_PREFETCH", 1usize)?);
        let timeout_secs: u64 = var_or(&lookup, "DRIVE_REQUEST_TIMEOUT_SECS", 0)?;
        if timeout_secs > 0 {
            transfer = transfer.with_request_timeout(Duration::from_secs(timeout_secs));
        }

        let token_secret = match lookup("DRIVE_TOKEN_SECRET") {
            Some(secret) if !secret.is_empty() => secret,
            _ => {
                tracing::warn!("DRIVE_TOKEN_SECRET not set; using the development secret");
                DEV_TOKEN_SECRET.to_string()
            }
        };

        Ok(Self {
            host: var_or(&lookup, "DRIVE_HTTP_HOST", "127.0.0.1".to_string())?,
            port: var_or(&lookup, "DRIVE_HTTP_PORT", 3030)?,
            storage,
            transfer,
            token_secret,
            token_ttl: Duration::from_secs(var_or(&lookup, "DRIVE_TOKEN_TTL_SECS", 3600)?),
            session_retention: Duration::from_secs(var_or(&lookup, "DRIVE_SESSION_RETENTION_SECS", 86_400)?),
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn s3_config<F>(lookup: &F) -> anyhow::Result<S3Config>
where
    F: Fn(&str) -> Option<String>,
{
    let bucket = lookup("DRIVE_S3_BUCKET")
        .ok_or_else(|| anyhow::anyhow!("DRIVE_S3_BUCKET is required when DRIVE_STORAGE=s3"))?;

    let mut config = S3Config::new(bucket);
    config.region = var_or(lookup, "DRIVE_S3_REGION", config.region.clone())?;
    if let Some(endpoint) = lookup("DRIVE_S3_ENDPOINT_URL") {
        config = config.with_endpoint(endpoint);
    }
    if let (Some(key), Some(secret)) = (lookup("DRIVE_S3_ACCESS_KEY_ID"), lookup("DRIVE_S3_SECRET_ACCESS_KEY")) {
        config = config.with_credentials(key, secret);
    }
    config.force_path_style = var_or(lookup, "DRIVE_S3_FORCE_PATH_STYLE", config.force_path_style)?;
    Ok(config)
}

fn var_or<F, T>(lookup: &F, key: &str, default: T) -> anyhow::Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        Some(value) => match value.trim().parse() {
            Ok(parsed) => Ok(parsed),
            Err(_) => anyhow::bail!("Invalid value for {key}: {value:?}"),
        },
        None => Ok(default),
    }
}

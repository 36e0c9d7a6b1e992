//! Configuration management for the ingestion server

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use serde::Deserialize;

use crate::error::AppError;
use crate::upload::{DEFAULT_CHUNK_SIZE, DEFAULT_SIMPLE_UPLOAD_MAX, SESSION_EXPIRY_HOURS};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub database: DatabaseConfig,
    pub upload: UploadConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub provider: StorageProvider,
    /// Root directory for the `local` provider
    pub local_path: PathBuf,
    pub endpoint: Option<String>,
    pub bucket: String,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub region: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageProvider {
    Local,
    Minio,
    R2,
    S3,
    B2,
}

impl FromStr for StorageProvider {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "minio" => Ok(Self::Minio),
            "r2" => Ok(Self::R2),
            "s3" => Ok(Self::S3),
            "b2" => Ok(Self::B2),
            other => Err(AppError::Config(format!("unknown storage provider: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

/// Tuning for the ingestion pipeline
#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    /// Size of every chunk except the last
    pub chunk_size: u64,
    /// Lifetime of an upload session from creation
    pub session_ttl_hours: i64,
    /// Largest payload accepted by the one-shot path
    pub simple_upload_max_bytes: u64,
    /// Scratch directory for assembling chunks
    pub staging_dir: PathBuf,
    /// How often the expired-session sweep runs
    pub sweep_interval_secs: u64,
    /// Key prefix for transient chunk artifacts
    pub chunk_prefix: String,
    /// Key prefix for durable assets
    pub asset_prefix: String,
}

impl Default for UploadConfig {
    fn default() -> Self {
        UploadConfig {
            chunk_size: DEFAULT_CHUNK_SIZE,
            session_ttl_hours: SESSION_EXPIRY_HOURS,
            simple_upload_max_bytes: DEFAULT_SIMPLE_UPLOAD_MAX,
            staging_dir: env::temp_dir().join("lightshow-ingest"),
            sweep_interval_secs: 300,
            chunk_prefix: "uploads/chunks".to_string(),
            asset_prefix: "assets".to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 3000,
            },
            storage: StorageConfig {
                provider: StorageProvider::Local,
                local_path: PathBuf::from("./data/blobs"),
                endpoint: None,
                bucket: "lightshow".to_string(),
                access_key: None,
                secret_key: None,
                region: Some("us-east-1".to_string()),
            },
            database: DatabaseConfig {
                url: "sqlite:./lightshow-ingest.db".to_string(),
            },
            upload: UploadConfig::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let defaults = Config::default();

        let provider = match env::var("STORAGE_PROVIDER") {
            Ok(value) => value.parse()?,
            Err(_) => defaults.storage.provider,
        };

        let storage = StorageConfig {
            provider,
            local_path: env::var("LOCAL_STORAGE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.storage.local_path),
            endpoint: env::var("S3_ENDPOINT").ok(),
            bucket: env::var("S3_BUCKET").unwrap_or(defaults.storage.bucket),
            access_key: env::var("S3_ACCESS_KEY").ok(),
            secret_key: env::var("S3_SECRET_KEY").ok(),
            region: env::var("S3_REGION").ok().or(defaults.storage.region),
        };

        if storage.provider != StorageProvider::Local
            && (storage.access_key.is_none() || storage.secret_key.is_none())
        {
            return Err(AppError::Config(
                "S3_ACCESS_KEY and S3_SECRET_KEY must be set for remote storage".to_string(),
            ));
        }

        let upload_defaults = defaults.upload;
        let upload = UploadConfig {
            chunk_size: parse_var("UPLOAD_CHUNK_SIZE", upload_defaults.chunk_size)?,
            session_ttl_hours: parse_var("UPLOAD_SESSION_TTL_HOURS", upload_defaults.session_ttl_hours)?,
            simple_upload_max_bytes: parse_var(
                "UPLOAD_SIMPLE_MAX_BYTES",
                upload_defaults.simple_upload_max_bytes,
            )?,
            staging_dir: env::var("UPLOAD_STAGING_DIR")
                .map(PathBuf::from)
                .unwrap_or(upload_defaults.staging_dir),
            sweep_interval_secs: parse_var("UPLOAD_SWEEP_INTERVAL_SECS", upload_defaults.sweep_interval_secs)?,
            chunk_prefix: env::var("UPLOAD_CHUNK_PREFIX").unwrap_or(upload_defaults.chunk_prefix),
            asset_prefix: env::var("UPLOAD_ASSET_PREFIX").unwrap_or(upload_defaults.asset_prefix),
        };

        if upload.chunk_size == 0 {
            return Err(AppError::Config("UPLOAD_CHUNK_SIZE must be positive".to_string()));
        }
        if upload.session_ttl_hours <= 0 {
            return Err(AppError::Config("UPLOAD_SESSION_TTL_HOURS must be positive".to_string()));
        }

        Ok(Config {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or(defaults.server.host),
                port: parse_var("SERVER_PORT", defaults.server.port)?,
            },
            storage,
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").unwrap_or(defaults.database.url),
            },
            upload,
        })
    }
}

fn parse_var<T: FromStr>(name: &str, default: T) -> Result<T, AppError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| AppError::Config(format!("{name} has an invalid value: {raw}"))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_local() {
        let config = Config::default();
        assert_eq!(config.storage.provider, StorageProvider::Local);
        assert_eq!(config.upload.chunk_size, 5 * 1024 * 1024);
        assert_eq!(config.upload.simple_upload_max_bytes, 10 * 1024 * 1024);
        assert_eq!(config.upload.session_ttl_hours, 24);
    }

    #[test]
    fn test_provider_parse() {
        assert_eq!("MinIO".parse::<StorageProvider>().unwrap(), StorageProvider::Minio);
        assert_eq!("r2".parse::<StorageProvider>().unwrap(), StorageProvider::R2);
        assert!("ftp".parse::<StorageProvider>().is_err());
    }
}

use std::env;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// OAuth scopes requested for the Google service account.
pub const GOOGLE_SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/spreadsheets",
    "https://www.googleapis.com/auth/drive.readonly",
];

const DEFAULT_SERVICE_ACCOUNT_FILE: &str = "database/sync/google/service_account.json";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {name}: {value:?}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Clone, Debug, Default)]
pub struct DropboxCredentials {
    pub app_key: Option<String>,
    pub app_secret: Option<String>,
    pub refresh_token: Option<String>,
    pub access_token: Option<String>,
}

impl DropboxCredentials {
    /// Reads only the Dropbox variables, for tools that need no database.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        Self {
            app_key: get("DROPBOX_APP_KEY"),
            app_secret: get("DROPBOX_APP_SECRET"),
            refresh_token: get("DROPBOX_REFRESH_TOKEN"),
            access_token: get("DROPBOX_ACCESS_TOKEN"),
        }
    }

    pub fn has_app(&self) -> bool {
        self.app_key.is_some() && self.app_secret.is_some()
    }

    /// Whether a session can be opened: a refresh token with its app
    /// credentials, or a long-lived access token.
    pub fn is_configured(&self) -> bool {
        (self.has_app() && self.refresh_token.is_some()) || self.access_token.is_some()
    }
}

#[derive(Clone, Debug)]
pub struct GoogleCredentials {
    pub service_account_file: PathBuf,
    pub scopes: Vec<String>,
    pub default_spreadsheet_id: Option<String>,
}

#[derive(Clone, Debug)]
pub struct SyncDirectories {
    pub downloads: PathBuf,
    pub uploads: PathBuf,
    pub temp: PathBuf,
}

impl SyncDirectories {
    /// Creates any of the working directories that do not exist yet.
    pub fn ensure(&self) -> std::io::Result<()> {
        for dir in [&self.downloads, &self.uploads, &self.temp] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

/// Which external services have enough configuration to be attempted.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct ConfigValidation {
    pub database: bool,
    pub google_api: bool,
    pub dropbox: bool,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub server_host: String,
    pub server_port: u16,
    pub db_pool_size: u32,
    pub db_max_overflow: u32,
    pub jwt_secret: Option<String>,
    pub access_token_expire_minutes: i64,
    pub http_timeout_secs: u64,
    pub http_read_retries: usize,
    pub dropbox: DropboxCredentials,
    pub google: GoogleCredentials,
    pub sync_dirs: SyncDirectories,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the configuration from an arbitrary variable lookup.
    /// Empty values are treated as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let database_url = get("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?;

        let service_account_file = get("GOOGLE_SERVICE_ACCOUNT_FILE")
            .unwrap_or_else(|| DEFAULT_SERVICE_ACCOUNT_FILE.to_string());

        Ok(Config {
            database_url,
            server_host: get("SERVER_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            server_port: parse_or(&get, "SERVER_PORT", 8000)?,
            db_pool_size: parse_or(&get, "DB_POOL_SIZE", 5)?,
            db_max_overflow: parse_or(&get, "DB_MAX_OVERFLOW", 10)?,
            jwt_secret: get("JWT_SECRET"),
            access_token_expire_minutes: parse_or(&get, "ACCESS_TOKEN_EXPIRE_MINUTES", 30)?,
            http_timeout_secs: parse_or(&get, "HTTP_TIMEOUT_SECS", 30)?,
            http_read_retries: parse_or(&get, "HTTP_READ_RETRIES", 2)?,
            dropbox: DropboxCredentials::from_lookup(&lookup),
            google: GoogleCredentials {
                service_account_file: resolve_path(Path::new(&service_account_file)),
                scopes: GOOGLE_SCOPES.iter().map(|s| s.to_string()).collect(),
                default_spreadsheet_id: get("GOOGLE_DEFAULT_SPREADSHEET_ID"),
            },
            sync_dirs: SyncDirectories {
                downloads: PathBuf::from(
                    get("SYNC_DOWNLOADS_DIR").unwrap_or_else(|| "downloads".to_string()),
                ),
                uploads: PathBuf::from(
                    get("SYNC_UPLOADS_DIR").unwrap_or_else(|| "uploads".to_string()),
                ),
                temp: PathBuf::from(get("SYNC_TEMP_DIR").unwrap_or_else(|| "temp".to_string())),
            },
        })
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }

    pub fn db_max_connections(&self) -> u32 {
        self.db_pool_size + self.db_max_overflow
    }

    pub fn validate(&self) -> ConfigValidation {
        ConfigValidation {
            database: !self.database_url.is_empty(),
            google_api: self.google.service_account_file.exists(),
            dropbox: self.dropbox.has_app(),
        }
    }
}

fn parse_or<T, G>(get: &G, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(name) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
        None => Ok(default),
    }
}

fn resolve_path(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

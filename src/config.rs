use crate::auth::OAuthConfig;
use crate::loader::SUPPORTED_EXTENSIONS;
use clap::Args;
use std::path::PathBuf;
use thiserror::Error;

/// Minimum length of `SECRET_KEY`, in bytes.
pub const MIN_SECRET_LEN: usize = 32;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required setting: {0}")]
    Missing(&'static str),

    #[error("SECRET_KEY must be at least 32 bytes, got {0}")]
    ShortSecret(usize),

    #[error("page size must be greater than zero")]
    ZeroPageSize,

    #[error("at least one upload extension must be allowed")]
    EmptyAllowList,

    #[error("unsupported upload extension: {0}")]
    UnsupportedExtension(String),
}

/// Flags shared by both servers.
#[derive(Args, Debug, Clone)]
pub struct ServerArgs {
    /// Host address to bind to
    #[arg(long, env = "HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Port number to bind to
    #[arg(long, env = "PORT", default_value_t = 5000)]
    pub port: u16,

    /// Directory holding uploaded files
    #[arg(long, env = "DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Rows per page
    #[arg(long, env = "PAGE_SIZE")]
    pub page_size: Option<usize>,

    /// Upload extensions accepted (comma-separated)
    #[arg(long, env = "ALLOWED_EXTENSIONS", value_delimiter = ',', default_value = "xls")]
    pub allowed_extensions: Vec<String>,

    /// Maximum upload size in megabytes
    #[arg(long, env = "UPLOAD_LIMIT_MB", default_value_t = 50)]
    pub upload_limit_mb: usize,

    /// Externally visible base URL, used to build the OAuth redirect target
    #[arg(long, env = "PUBLIC_URL")]
    pub public_url: Option<String>,

    /// Key material for signing session cookies
    #[arg(long, env = "SECRET_KEY", hide_env_values = true)]
    pub secret_key: Option<String>,
}

/// Google OAuth client settings.
#[derive(Args, Debug, Clone, Default)]
pub struct OAuthArgs {
    /// OAuth client id
    #[arg(long, env = "GOOGLE_CONSUMER_KEY")]
    pub google_client_id: Option<String>,

    /// OAuth client secret
    #[arg(long, env = "GOOGLE_CONSUMER_SECRET", hide_env_values = true)]
    pub google_client_secret: Option<String>,
}

/// Per-binary fallbacks for settings left unset.
#[derive(Debug, Clone)]
pub struct Defaults {
    pub data_dir: &'static str,
    pub page_size: usize,
}

pub const PORTAL_DEFAULTS: Defaults = Defaults {
    data_dir: "data",
    page_size: 50,
};

pub const API_DEFAULTS: Defaults = Defaults {
    data_dir: "uploads",
    page_size: 10,
};

/// Validated server settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub bind_addr: String,
    pub data_dir: PathBuf,
    pub page_size: usize,
    pub allowed_extensions: Vec<String>,
    pub upload_limit_bytes: usize,
    pub public_url: String,
    pub secret_key: Option<Vec<u8>>,
}

impl ServerArgs {
    pub fn resolve(&self, defaults: &Defaults) -> Result<Settings, ConfigError> {
        let page_size = self.page_size.unwrap_or(defaults.page_size);
        if page_size == 0 {
            return Err(ConfigError::ZeroPageSize);
        }

        let allowed_extensions: Vec<String> = self
            .allowed_extensions
            .iter()
            .map(|e| e.trim().trim_start_matches('.').to_lowercase())
            .filter(|e| !e.is_empty())
            .collect();
        if allowed_extensions.is_empty() {
            return Err(ConfigError::EmptyAllowList);
        }
        if let Some(bad) = allowed_extensions
            .iter()
            .find(|e| !SUPPORTED_EXTENSIONS.contains(&e.as_str()))
        {
            return Err(ConfigError::UnsupportedExtension(bad.clone()));
        }

        let secret_key = match &self.secret_key {
            Some(s) if s.len() < MIN_SECRET_LEN => return Err(ConfigError::ShortSecret(s.len())),
            Some(s) => Some(s.as_bytes().to_vec()),
            None => None,
        };

        let public_url = self
            .public_url
            .clone()
            .unwrap_or_else(|| format!("http://{}:{}", self.host, self.port));

        Ok(Settings {
            bind_addr: format!("{}:{}", self.host, self.port),
            data_dir: self
                .data_dir
                .clone()
                .unwrap_or_else(|| PathBuf::from(defaults.data_dir)),
            page_size,
            allowed_extensions,
            upload_limit_bytes: self.upload_limit_mb.saturating_mul(1024 * 1024),
            public_url: public_url.trim_end_matches('/').to_string(),
            secret_key,
        })
    }
}

impl OAuthArgs {
    /// Google client configuration with the callback mounted under `public_url`.
    pub fn resolve(&self, public_url: &str) -> Result<OAuthConfig, ConfigError> {
        let client_id = self
            .google_client_id
            .clone()
            .ok_or(ConfigError::Missing("GOOGLE_CONSUMER_KEY"))?;
        let client_secret = self
            .google_client_secret
            .clone()
            .ok_or(ConfigError::Missing("GOOGLE_CONSUMER_SECRET"))?;

        Ok(OAuthConfig::google(
            client_id,
            client_secret,
            format!("{}/login/authorized", public_url),
        ))
    }
}

use crate::issuer::IssuerConfig;
use crate::rate_limit::RateLimits;
use anyhow::Result;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Shortest accepted signing secret, in bytes
pub const MIN_SECRET_LEN: usize = 16;

/// Longest accepted token lifetime (7 days)
pub const MAX_TOKEN_TTL: u64 = 604_800;

/// Main configuration structure that can be loaded from CLI, environment, or config file
///
/// Example configuration file content
/// # Audio signer configuration
///
/// listen_on_port = 32145
/// secret_key = "change-me-to-a-long-random-value"
/// token_ttl = 3600
///
/// # Rate limits per session
/// max_requests_per_hour = 100
/// max_requests_per_day = 500
///
/// # Files and links
/// audio_dir = "./assets/audio"
/// base_url = "https://example.com/audio/"
/// file_extension = "mp3"
///
/// # Optional
/// access_log = "./logs/audio_access.log"
/// allowed_origin = "https://example.com"
#[derive(Debug, Clone, Serialize, Deserialize, Parser)]
#[command(version, about, long_about = None)]
#[serde(default)]
pub struct Config {
    /// Port to listen on
    #[arg(short, long, env = "AUDIO_SIGNER_PORT", default_value_t = 32145)]
    #[serde(default = "default_port")]
    pub listen_on_port: u16,

    /// HMAC signing secret
    #[arg(long, env = "AUDIO_SIGNER_SECRET_KEY", hide_env_values = true, default_value = "")]
    pub secret_key: String,

    /// Lifetime of an issued URL in seconds
    #[arg(short, long, env = "AUDIO_SIGNER_TOKEN_TTL", default_value_t = 3600)]
    #[serde(default = "default_token_ttl")]
    pub token_ttl: u64,

    /// Issued URLs allowed per session per hour
    #[arg(long, env = "AUDIO_SIGNER_MAX_PER_HOUR", default_value_t = 100)]
    #[serde(default = "default_max_per_hour")]
    pub max_requests_per_hour: u32,

    /// Issued URLs allowed per session per calendar day (UTC)
    #[arg(long, env = "AUDIO_SIGNER_MAX_PER_DAY", default_value_t = 500)]
    #[serde(default = "default_max_per_day")]
    pub max_requests_per_day: u32,

    /// Directory holding the audio files
    #[arg(short, long, env = "AUDIO_SIGNER_AUDIO_DIR", default_value = "./assets/audio")]
    #[serde(default = "default_audio_dir")]
    pub audio_dir: String,

    /// Public URL prefix the signed filenames are appended to
    #[arg(short, long, env = "AUDIO_SIGNER_BASE_URL", default_value = "http://localhost:32145/audio/")]
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Extension appended to a track id to get its filename
    #[arg(long, env = "AUDIO_SIGNER_FILE_EXTENSION", default_value = "mp3")]
    #[serde(default = "default_file_extension")]
    pub file_extension: String,

    /// Access log file (JSON lines); tracing only when unset
    #[arg(long, env = "AUDIO_SIGNER_ACCESS_LOG")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_log: Option<String>,

    /// Single origin allowed by CORS, with credentials
    #[arg(long, env = "AUDIO_SIGNER_ALLOWED_ORIGIN")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_origin: Option<String>,

    /// Seconds between sweeps of stale rate limit sessions
    #[arg(long, default_value_t = 600)]
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval: u64,

    /// Configuration file path
    #[arg(short, long)]
    #[serde(skip)]
    pub config: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_on_port: default_port(),
            secret_key: String::new(),
            token_ttl: default_token_ttl(),
            max_requests_per_hour: default_max_per_hour(),
            max_requests_per_day: default_max_per_day(),
            audio_dir: default_audio_dir(),
            base_url: default_base_url(),
            file_extension: default_file_extension(),
            access_log: None,
            allowed_origin: None,
            cleanup_interval: default_cleanup_interval(),
            config: None,
        }
    }
}

impl Config {
    /// Load configuration from CLI args and environment, optionally merging with a config file
    pub fn load() -> Result<Self> {
        let mut config = Config::parse();

        if let Some(config_path) = &config.config {
            let file_config = Self::from_file(Path::new(config_path))?;
            config = config.merge_with_file(file_config);
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Merge with file config, CLI args take precedence
    fn merge_with_file(mut self, file_config: Config) -> Self {
        // If CLI value is default, use file value
        if self.listen_on_port == default_port() {
            self.listen_on_port = file_config.listen_on_port;
        }
        if self.secret_key.is_empty() {
            self.secret_key = file_config.secret_key;
        }
        if self.token_ttl == default_token_ttl() {
            self.token_ttl = file_config.token_ttl;
        }
        if self.max_requests_per_hour == default_max_per_hour() {
            self.max_requests_per_hour = file_config.max_requests_per_hour;
        }
        if self.max_requests_per_day == default_max_per_day() {
            self.max_requests_per_day = file_config.max_requests_per_day;
        }
        if self.audio_dir == default_audio_dir() {
            self.audio_dir = file_config.audio_dir;
        }
        if self.base_url == default_base_url() {
            self.base_url = file_config.base_url;
        }
        if self.file_extension == default_file_extension() {
            self.file_extension = file_config.file_extension;
        }
        if self.cleanup_interval == default_cleanup_interval() {
            self.cleanup_interval = file_config.cleanup_interval;
        }

        // For Option fields, CLI takes precedence if Some
        if self.access_log.is_none() {
            self.access_log = file_config.access_log;
        }
        if self.allowed_origin.is_none() {
            self.allowed_origin = file_config.allowed_origin;
        }

        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.secret_key.len() < MIN_SECRET_LEN {
            return Err(anyhow::anyhow!(
                "Secret key must be at least {MIN_SECRET_LEN} bytes (set AUDIO_SIGNER_SECRET_KEY)"
            ));
        }

        if self.token_ttl == 0 || self.token_ttl > MAX_TOKEN_TTL {
            return Err(anyhow::anyhow!(
                "Token TTL must be between 1 and {MAX_TOKEN_TTL} seconds"
            ));
        }

        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(anyhow::anyhow!(
                "Base URL must start with http:// or https://"
            ));
        }

        let extension = self.file_extension.trim_start_matches('.');
        if extension.is_empty() || !extension.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return Err(anyhow::anyhow!("File extension must be alphanumeric"));
        }

        if let Some(origin) = &self.allowed_origin
            && !origin.starts_with("http://")
            && !origin.starts_with("https://")
        {
            return Err(anyhow::anyhow!(
                "Allowed origin must start with http:// or https://"
            ));
        }

        if self.cleanup_interval == 0 {
            return Err(anyhow::anyhow!("Cleanup interval cannot be 0"));
        }

        Ok(())
    }

    /// Convert to the issuer's configuration subset
    pub fn to_issuer_config(&self) -> IssuerConfig {
        IssuerConfig {
            secret_key: self.secret_key.clone(),
            ttl_secs: self.token_ttl,
            limits: RateLimits {
                per_hour: self.max_requests_per_hour,
                per_day: self.max_requests_per_day,
            },
            audio_dir: PathBuf::from(&self.audio_dir),
            base_url: self.base_url.clone(),
            file_extension: self.file_extension.clone(),
        }
    }
}

// Default value functions
fn default_port() -> u16 {
    32145
}

fn default_token_ttl() -> u64 {
    3600
}

fn default_max_per_hour() -> u32 {
    100
}

fn default_max_per_day() -> u32 {
    500
}

fn default_audio_dir() -> String {
    "./assets/audio".to_string()
}

fn default_base_url() -> String {
    "http://localhost:32145/audio/".to_string()
}

fn default_file_extension() -> String {
    "mp3".to_string()
}

fn default_cleanup_interval() -> u64 {
    600
}

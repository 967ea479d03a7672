//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! API keys and the Supabase anon key come from env vars or key files,
//! never from the TOML itself.

use common::Secret;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Env vars holding the credential pool, in rotation order.
pub const API_KEY_ENV_VARS: &[&str] = &[
    "GEMINI_API_KEY_1",
    "GEMINI_API_KEY_2",
    "GEMINI_API_KEY_3",
    "GEMINI_API_KEY_4",
    "GEMINI_API_KEY_5",
];

const ANON_KEY_ENV_VAR: &str = "SUPABASE_ANON_KEY";

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub gemini: GeminiConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

/// HTTP listener settings
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// Generation provider settings
#[derive(Debug, Deserialize)]
pub struct GeminiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Per-attempt timeout
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// File with one API key per line (used when no GEMINI_API_KEY_n is set)
    #[serde(default)]
    pub api_keys_file: Option<PathBuf>,
    #[serde(skip)]
    pub api_keys: Vec<Secret<String>>,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            timeout_secs: default_timeout(),
            api_keys_file: None,
            api_keys: Vec::new(),
        }
    }
}

/// Session verification backend
#[derive(Debug, Deserialize)]
pub struct AuthConfig {
    pub supabase_url: String,
    #[serde(default)]
    pub anon_key_file: Option<PathBuf>,
    #[serde(skip)]
    pub anon_key: Option<Secret<String>>,
}

/// Per-user request limit for the itinerary endpoint
#[derive(Debug, Deserialize)]
pub struct RateLimitConfig {
    /// 0 disables the limiter
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: default_max_requests(),
            window_secs: default_window_secs(),
        }
    }
}

fn default_max_connections() -> usize {
    1000
}

fn default_base_url() -> String {
    provider::gemini::DEFAULT_BASE_URL.to_string()
}

fn default_model() -> String {
    provider::gemini::DEFAULT_MODEL.to_string()
}

fn default_timeout() -> u64 {
    30
}

fn default_max_requests() -> u32 {
    3
}

fn default_window_secs() -> u64 {
    86_400
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// API key resolution: GEMINI_API_KEY_1..5 (blank ones skipped, order kept);
    /// if none are set, non-empty lines of `gemini.api_keys_file`.
    /// Anon key resolution: SUPABASE_ANON_KEY, then `auth.anon_key_file`.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;
        config.validate()?;

        config.gemini.api_keys = resolve_api_keys(config.gemini.api_keys_file.as_deref())?;
        config.auth.anon_key = resolve_anon_key(config.auth.anon_key_file.as_deref())?;
        if config.auth.anon_key.is_none() {
            return Err(common::Error::Config(format!(
                "Supabase anon key missing: set {ANON_KEY_ENV_VAR} or auth.anon_key_file"
            )));
        }

        Ok(config)
    }

    fn validate(&self) -> common::Result<()> {
        require_http_url("auth.supabase_url", &self.auth.supabase_url)?;
        require_http_url("gemini.base_url", &self.gemini.base_url)?;

        if self.gemini.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }
        if self.server.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }
        if self.rate_limit.window_secs == 0 {
            return Err(common::Error::Config(
                "window_secs must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("itinerary-api.toml")
    }
}

fn require_http_url(field: &str, value: &str) -> common::Result<()> {
    if value.starts_with("http://") || value.starts_with("https://") {
        Ok(())
    } else {
        Err(common::Error::Config(format!(
            "{field} must start with http:// or https://, got: {value}"
        )))
    }
}

fn resolve_api_keys(keys_file: Option<&Path>) -> common::Result<Vec<Secret<String>>> {
    let from_env: Vec<Secret<String>> = API_KEY_ENV_VARS
        .iter()
        .filter_map(|name| std::env::var(name).ok())
        .map(|value| Secret::new(value.trim().to_owned()))
        .filter(|key| !key.is_blank())
        .collect();
    if !from_env.is_empty() {
        return Ok(from_env);
    }

    let Some(path) = keys_file else {
        return Ok(Vec::new());
    };
    let contents = std::fs::read_to_string(path).map_err(|e| {
        common::Error::Config(format!(
            "failed to read api_keys_file {}: {e}",
            path.display()
        ))
    })?;
    Ok(contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| Secret::new(line.to_owned()))
        .collect())
}

fn resolve_anon_key(key_file: Option<&Path>) -> common::Result<Option<Secret<String>>> {
    if let Ok(key) = std::env::var(ANON_KEY_ENV_VAR)
        && !key.trim().is_empty()
    {
        return Ok(Some(Secret::new(key.trim().to_owned())));
    }
    let Some(path) = key_file else {
        return Ok(None);
    };
    let key = std::fs::read_to_string(path).map_err(|e| {
        common::Error::Config(format!(
            "failed to read anon_key_file {}: {e}",
            path.display()
        ))
    })?;
    let key = key.trim().to_owned();
    Ok((!key.is_empty()).then(|| Secret::new(key)))
}

use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration build error: {0}")]
    Build(#[from] config::ConfigError),
    #[error("Invalid configuration: {0}")]
    Validation(String),
}

#[derive(Clone, Debug, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

#[derive(Clone, Debug, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Mark the session cookie `Secure`. Disable only for plain-HTTP development setups.
    #[serde(default = "default_secure_cookies")]
    pub secure_cookies: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            secure_cookies: default_secure_cookies(),
        }
    }
}

/// Upper bound for any configured lifetime: ten years.
pub const MAX_EXPIRY_SECS: u64 = 10 * 365 * 24 * 60 * 60;

/// Token, code and session lifetimes. All durations are in seconds unless noted.
#[derive(Clone, Debug, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_issuer")]
    pub issuer: String,
    #[serde(default = "default_access_token_expiry")]
    pub access_token_expiry: u64,
    #[serde(default = "default_refresh_token_expiry")]
    pub refresh_token_expiry: u64,
    #[serde(default = "default_authorize_code_expiry")]
    pub authorize_code_expiry: u64,
    #[serde(default = "default_session_expiry")]
    pub session_expiry: u64,
    /// Realm used when a login form does not name one.
    #[serde(default = "default_realm")]
    pub default_realm: String,
    /// Upper bound for any single store or directory call, in milliseconds.
    #[serde(default = "default_io_timeout_ms")]
    pub io_timeout_ms: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            issuer: default_issuer(),
            access_token_expiry: default_access_token_expiry(),
            refresh_token_expiry: default_refresh_token_expiry(),
            authorize_code_expiry: default_authorize_code_expiry(),
            session_expiry: default_session_expiry(),
            default_realm: default_realm(),
            io_timeout_ms: default_io_timeout_ms(),
        }
    }
}

impl AuthConfig {
    pub fn access_ttl(&self) -> Duration {
        Duration::from_secs(self.access_token_expiry)
    }

    pub fn refresh_ttl(&self) -> Duration {
        Duration::from_secs(self.refresh_token_expiry)
    }

    pub fn code_ttl(&self) -> Duration {
        Duration::from_secs(self.authorize_code_expiry)
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_expiry)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.issuer.trim().is_empty() {
            return Err(ConfigError::Validation("auth.issuer must not be empty".into()));
        }
        if self.access_token_expiry == 0
            || self.refresh_token_expiry == 0
            || self.authorize_code_expiry == 0
            || self.session_expiry == 0
        {
            return Err(ConfigError::Validation(
                "auth expiries must all be greater than zero".into(),
            ));
        }
        if self.refresh_token_expiry > MAX_EXPIRY_SECS || self.session_expiry > MAX_EXPIRY_SECS {
            return Err(ConfigError::Validation(format!(
                "auth expiries must not exceed {MAX_EXPIRY_SECS} seconds"
            )));
        }
        if self.authorize_code_expiry >= self.access_token_expiry {
            return Err(ConfigError::Validation(
                "auth.authorize_code_expiry must be shorter than auth.access_token_expiry".into(),
            ));
        }
        if self.access_token_expiry >= self.refresh_token_expiry {
            return Err(ConfigError::Validation(
                "auth.access_token_expiry must be shorter than auth.refresh_token_expiry".into(),
            ));
        }
        if self.io_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "auth.io_timeout_ms must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    #[default]
    Database,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
}

fn default_listen_addr() -> String {
    "0.0.0.0:9900".to_string()
}

fn default_secure_cookies() -> bool {
    true
}

fn default_issuer() -> String {
    "authgate".to_string()
}

fn default_access_token_expiry() -> u64 {
    2 * 60 * 60
}

fn default_refresh_token_expiry() -> u64 {
    30 * 24 * 60 * 60
}

fn default_authorize_code_expiry() -> u64 {
    5 * 60
}

fn default_session_expiry() -> u64 {
    24 * 60 * 60
}

fn default_realm() -> String {
    "default".to_string()
}

fn default_io_timeout_ms() -> u64 {
    5_000
}

/// Load application configuration from an optional `config.yaml` plus environment overrides.
///
/// Environment variables use the `AUTHGATE` prefix and `__` as the key path separator,
/// e.g. `AUTHGATE__AUTH__ACCESS_TOKEN_EXPIRY=600` or `AUTHGATE__DATABASE_URL=...`.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    use config::{Config, Environment, File};
    let cfg = Config::builder()
        .add_source(File::with_name("config.yaml").required(false))
        .add_source(Environment::with_prefix("AUTHGATE").separator("__"))
        .build()?;

    let app: AppConfig = cfg.try_deserialize()?;
    app.validate()?;
    Ok(app)
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        // The directory always lives in the database, whatever the store backend.
        if self.database_url.trim().is_empty() {
            return Err(ConfigError::Validation("database_url must not be empty".into()));
        }
        self.auth.validate()
    }
}

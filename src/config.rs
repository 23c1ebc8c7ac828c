//! Application configuration module
//! Handles environment variable loading, configuration validation, and application settings

use std::env;
use std::fmt;
use std::time::Duration;

pub const SANDBOX_BASE_URL: &str = "https://sandbox.safaricom.co.ke";
pub const PRODUCTION_BASE_URL: &str = "https://api.safaricom.co.ke";

/// `SKIP_EXTERNALS=true` runs the service without Postgres.
pub fn skip_externals() -> bool {
    env::var("SKIP_EXTERNALS")
        .map(|v| v.trim().eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Main application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: Option<DatabaseConfig>,
    pub logging: LoggingConfig,
    pub mpesa: MpesaConfig,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout: u64,   // seconds
    pub idle_timeout: Option<u64>, // seconds
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log format options
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Plain,
}

/// Which Daraja deployment the credentials belong to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MpesaEnvironment {
    Sandbox,
    Production,
}

impl MpesaEnvironment {
    pub fn default_base_url(&self) -> &'static str {
        match self {
            MpesaEnvironment::Sandbox => SANDBOX_BASE_URL,
            MpesaEnvironment::Production => PRODUCTION_BASE_URL,
        }
    }
}

/// M-Pesa credentials and endpoints. Read once at startup, never mutated.
#[derive(Clone)]
pub struct MpesaConfig {
    pub consumer_key: String,
    pub consumer_secret: String,
    pub shortcode: String,
    pub passkey: String,
    pub callback_url: String,
    pub environment: MpesaEnvironment,
    pub base_url: String,
    pub timeout_secs: u64,
}

impl fmt::Debug for MpesaConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MpesaConfig")
            .field("consumer_key", &"<redacted>")
            .field("consumer_secret", &"<redacted>")
            .field("shortcode", &self.shortcode)
            .field("passkey", &"<redacted>")
            .field("callback_url", &self.callback_url)
            .field("environment", &self.environment)
            .field("base_url", &self.base_url)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    ///
    /// With `skip_database` the database section is left out and the
    /// service runs against the in-memory store.
    pub fn from_env(skip_database: bool) -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenv::dotenv().ok();

        let database = if skip_database {
            None
        } else {
            Some(DatabaseConfig::from_env()?)
        };

        Ok(AppConfig {
            server: ServerConfig::from_env()?,
            database,
            logging: LoggingConfig::from_env()?,
            mpesa: MpesaConfig::from_env()?,
        })
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        if let Some(database) = &self.database {
            database.validate()?;
        }
        self.logging.validate()?;
        self.mpesa.validate()?;

        Ok(())
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(ServerConfig {
            host: env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8000".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("PORT".to_string()))?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidValue("PORT cannot be 0".to_string()));
        }

        if self.host.is_empty() {
            return Err(ConfigError::InvalidValue(
                "HOST cannot be empty".to_string(),
            ));
        }

        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(DatabaseConfig {
            url: env::var("DATABASE_URL")
                .map_err(|_| ConfigError::MissingVariable("DATABASE_URL".to_string()))?,
            max_connections: env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DB_MAX_CONNECTIONS".to_string()))?,
            min_connections: env::var("DB_MIN_CONNECTIONS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DB_MIN_CONNECTIONS".to_string()))?,
            connection_timeout: env::var("DB_CONNECTION_TIMEOUT")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DB_CONNECTION_TIMEOUT".to_string()))?,
            idle_timeout: env::var("DB_IDLE_TIMEOUT")
                .ok()
                .and_then(|val| val.parse().ok()),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.is_empty() {
            return Err(ConfigError::InvalidValue("DATABASE_URL".to_string()));
        }

        if self.max_connections == 0 {
            return Err(ConfigError::InvalidValue("DB_MAX_CONNECTIONS".to_string()));
        }

        if self.min_connections > self.max_connections {
            return Err(ConfigError::InvalidValue(
                "DB_MIN_CONNECTIONS must be <= DB_MAX_CONNECTIONS".to_string(),
            ));
        }

        Ok(())
    }
}

impl LoggingConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "plain".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Plain,
            },
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["TRACE", "DEBUG", "INFO", "WARN", "ERROR"];
        if !valid_levels.contains(&self.level.to_uppercase().as_str()) {
            return Err(ConfigError::InvalidValue("LOG_LEVEL".to_string()));
        }

        Ok(())
    }
}

impl MpesaConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let environment = match env::var("MPESA_ENV")
            .unwrap_or_else(|_| "sandbox".to_string())
            .to_lowercase()
            .as_str()
        {
            "production" | "live" => MpesaEnvironment::Production,
            "sandbox" => MpesaEnvironment::Sandbox,
            _ => return Err(ConfigError::InvalidValue("MPESA_ENV".to_string())),
        };

        Ok(MpesaConfig {
            consumer_key: required("MPESA_CONSUMER_KEY")?,
            consumer_secret: required("MPESA_CONSUMER_SECRET")?,
            shortcode: required("MPESA_SHORTCODE")?,
            passkey: required("MPESA_PASSKEY")?,
            callback_url: required("MPESA_CALLBACK_URL")?,
            base_url: env::var("MPESA_BASE_URL")
                .ok()
                .filter(|url| !url.trim().is_empty())
                .unwrap_or_else(|| environment.default_base_url().to_string()),
            environment,
            timeout_secs: env::var("MPESA_TIMEOUT_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("MPESA_TIMEOUT_SECS".to_string()))?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let required_fields = [
            ("MPESA_CONSUMER_KEY", &self.consumer_key),
            ("MPESA_CONSUMER_SECRET", &self.consumer_secret),
            ("MPESA_SHORTCODE", &self.shortcode),
            ("MPESA_PASSKEY", &self.passkey),
            ("MPESA_CALLBACK_URL", &self.callback_url),
        ];
        for (name, value) in required_fields {
            if value.trim().is_empty() {
                return Err(ConfigError::InvalidValue(name.to_string()));
            }
        }

        if !is_http_url(&self.base_url) {
            return Err(ConfigError::InvalidValue(
                "MPESA_BASE_URL must be a valid URL".to_string(),
            ));
        }

        if !is_http_url(&self.callback_url) {
            return Err(ConfigError::InvalidValue(
                "MPESA_CALLBACK_URL must be a valid URL".to_string(),
            ));
        }

        if self.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue("MPESA_TIMEOUT_SECS".to_string()));
        }

        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn oauth_url(&self) -> String {
        format!(
            "{}/oauth/v1/generate?grant_type=client_credentials",
            self.base_url.trim_end_matches('/')
        )
    }

    pub fn stk_push_url(&self) -> String {
        format!(
            "{}/mpesa/stkpush/v1/processrequest",
            self.base_url.trim_end_matches('/')
        )
    }
}

fn required(name: &str) -> Result<String, ConfigError> {
    env::var(name)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingVariable(name.to_string()))
}

fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),

    #[error("Invalid value for configuration: {0}")]
    InvalidValue(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}

#[cfg(test)]
pub(crate) fn test_mpesa_config(base_url: &str) -> MpesaConfig {
    MpesaConfig {
        consumer_key: "key".to_string(),
        consumer_secret: "secret".to_string(),
        shortcode: "174379".to_string(),
        passkey: "passkey".to_string(),
        callback_url: "https://example.com/mpesa/callback".to_string(),
        environment: MpesaEnvironment::Sandbox,
        base_url: base_url.to_string(),
        timeout_secs: 30,
    }
}

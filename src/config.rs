//! Configuration module
//!
//! Loads configuration from environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::domain::phone::DEFAULT_COUNTRY_CODE;

pub const SANDBOX_BASE_URL: &str = "https://sandbox.safaricom.co.ke";

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Database connection URL
    pub database_url: String,

    /// Maximum database connections in pool
    pub database_max_connections: u32,

    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Environment (development, production)
    pub environment: String,

    pub mpesa: MpesaConfig,

    pub jobs: JobsConfig,

    /// Conflict retries when settling a transaction
    pub reconcile_max_retries: u32,
}

/// Gateway credentials and endpoints
#[derive(Clone)]
pub struct MpesaConfig {
    pub base_url: String,
    pub consumer_key: String,
    pub consumer_secret: String,
    pub shortcode: String,
    pub passkey: String,
    /// Public base URL the gateway posts callbacks to
    pub callback_url: String,
    pub b2c_shortcode: String,
    pub b2c_initiator_name: String,
    pub b2c_security_credential: String,
    pub b2c_command_id: String,
    pub account_reference_prefix: String,
    pub phone_country_code: String,
    pub timeout: Duration,
}

// Secrets stay out of logs
impl std::fmt::Debug for MpesaConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MpesaConfig")
            .field("base_url", &self.base_url)
            .field("shortcode", &self.shortcode)
            .field("callback_url", &self.callback_url)
            .field("b2c_shortcode", &self.b2c_shortcode)
            .field("b2c_initiator_name", &self.b2c_initiator_name)
            .field("b2c_command_id", &self.b2c_command_id)
            .field("account_reference_prefix", &self.account_reference_prefix)
            .field("phone_country_code", &self.phone_country_code)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl MpesaConfig {
    /// Collection result endpoint
    pub fn collection_callback_url(&self) -> String {
        format!("{}/mpesaCallback", self.callback_url.trim_end_matches('/'))
    }

    /// Disbursement result endpoint
    pub fn disbursement_result_url(&self) -> String {
        format!("{}/b2cResult", self.callback_url.trim_end_matches('/'))
    }

    /// Disbursement timeout endpoint
    pub fn disbursement_timeout_url(&self) -> String {
        format!("{}/timeout", self.callback_url.trim_end_matches('/'))
    }
}

/// Background job settings
#[derive(Debug, Clone)]
pub struct JobsConfig {
    pub inbox_replay_interval: Duration,
    /// Processing attempts before an inbox entry is dead-lettered
    pub inbox_max_attempts: i32,
    /// Age after which a pending transaction without a correlation key is failed
    pub stale_pending_after: Duration,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &'static str| lookup(key).ok_or(ConfigError::MissingEnv(key));
        let or_default =
            |key: &'static str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let database_url = required("DATABASE_URL")?;
        let database_max_connections =
            parse(&or_default("DATABASE_MAX_CONNECTIONS", "10"), "DATABASE_MAX_CONNECTIONS")?;
        let host = or_default("HOST", "127.0.0.1");
        let port = parse(&or_default("PORT", "3000"), "PORT")?;
        let environment = or_default("ENVIRONMENT", "development");

        let mpesa = MpesaConfig {
            base_url: or_default("MPESA_BASE_URL", SANDBOX_BASE_URL),
            consumer_key: required("CONSUMER_KEY")?,
            consumer_secret: required("CONSUMER_SECRET")?,
            shortcode: required("SHORTCODE")?,
            passkey: required("PASSKEY")?,
            callback_url: required("CALLBACK_URL")?,
            b2c_shortcode: required("B2C_SHORTCODE")?,
            b2c_initiator_name: required("B2C_INITIATOR_NAME")?,
            b2c_security_credential: required("B2C_SECURITY_CREDENTIAL")?,
            b2c_command_id: or_default("B2C_COMMAND_ID", "BusinessPayment"),
            account_reference_prefix: or_default("ACCOUNT_REFERENCE_PREFIX", "SafePull"),
            phone_country_code: or_default("PHONE_COUNTRY_CODE", DEFAULT_COUNTRY_CODE),
            timeout: Duration::from_secs(parse(
                &or_default("GATEWAY_TIMEOUT_SECS", "30"),
                "GATEWAY_TIMEOUT_SECS",
            )?),
        };

        let jobs = JobsConfig {
            inbox_replay_interval: Duration::from_secs(parse(
                &or_default("INBOX_REPLAY_INTERVAL_SECS", "30"),
                "INBOX_REPLAY_INTERVAL_SECS",
            )?),
            inbox_max_attempts: parse(&or_default("INBOX_MAX_ATTEMPTS", "10"), "INBOX_MAX_ATTEMPTS")?,
            stale_pending_after: Duration::from_secs(parse(
                &or_default("STALE_PENDING_AFTER_SECS", "900"),
                "STALE_PENDING_AFTER_SECS",
            )?),
        };

        let reconcile_max_retries =
            parse(&or_default("RECONCILE_MAX_RETRIES", "5"), "RECONCILE_MAX_RETRIES")?;

        Ok(Self {
            database_url,
            database_max_connections,
            host,
            port,
            environment,
            mpesa,
            jobs,
            reconcile_max_retries,
        })
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

fn parse<T: FromStr>(raw: &str, key: &'static str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidValue(key))
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnv(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(&'static str),
}

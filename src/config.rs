use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_RATE_SERVICE_URL: &str = "http://localhost:3001/api/shipping/rates";
const DEFAULT_SHIPPING_TIMEOUT_MS: u64 = 3_000;
const DEFAULT_EXCHANGE_RATE_TTL_SECS: u64 = 1_800;
const DEFAULT_PUSH_PAYMENT_PATH: &str = "/api/orders/mpesa-payment";

/// Merchant dispatch location sent as the origin of every shipping quote
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct OriginConfig {
    #[validate(length(min = 1))]
    pub city: String,
    #[validate(length(min = 1))]
    pub postal_code: String,
    #[validate(length(min = 2))]
    pub country: String,
}

impl Default for OriginConfig {
    fn default() -> Self {
        Self {
            city: "Eldoret".to_string(),
            postal_code: "30100".to_string(),
            country: "KE".to_string(),
        }
    }
}

/// Shipping quote configuration
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct ShippingConfig {
    /// Endpoint of the external rate service (`POST {origin, destination, weight} -> {rate}`)
    #[serde(default = "default_rate_service_url")]
    #[validate(length(min = 1))]
    pub rate_service_url: String,

    /// Upper bound on a single rate lookup, in milliseconds
    #[serde(default = "default_shipping_timeout_ms")]
    #[validate(range(min = 100, max = 30000))]
    pub timeout_ms: u64,

    /// Shipping cost charged when the live quote cannot be obtained
    #[serde(default = "default_fallback_rate")]
    #[validate(custom = "validate_non_negative")]
    pub fallback_rate: Decimal,

    /// Currency every order total is expressed in
    #[serde(default = "default_store_currency")]
    #[validate(length(equal = 3))]
    pub store_currency: String,

    #[serde(default)]
    #[validate]
    pub origin: OriginConfig,

    /// Price per kilogram charged by the built-in rate service
    #[serde(default = "default_per_kg_rate")]
    #[validate(custom = "validate_non_negative")]
    pub per_kg_rate: Decimal,

    /// Base URL of the exchange-rate service; conversion is disabled when unset
    #[serde(default)]
    pub exchange_rate_url: Option<String>,

    /// How long a fetched exchange rate stays fresh
    #[serde(default = "default_exchange_rate_ttl_secs")]
    pub exchange_rate_ttl_secs: u64,
}

impl Default for ShippingConfig {
    fn default() -> Self {
        Self {
            rate_service_url: default_rate_service_url(),
            timeout_ms: default_shipping_timeout_ms(),
            fallback_rate: default_fallback_rate(),
            store_currency: default_store_currency(),
            origin: OriginConfig::default(),
            per_kg_rate: default_per_kg_rate(),
            exchange_rate_url: None,
            exchange_rate_ttl_secs: default_exchange_rate_ttl_secs(),
        }
    }
}

impl ShippingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn exchange_rate_ttl(&self) -> Duration {
        Duration::from_secs(self.exchange_rate_ttl_secs)
    }
}

/// Payment hand-off configuration
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct PaymentConfig {
    /// Client route that initiates a mobile-money push payment
    #[serde(default = "default_push_payment_path")]
    #[validate(custom = "validate_path")]
    pub push_payment_path: String,
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            push_payment_path: default_push_payment_path(),
        }
    }
}

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    #[validate(length(min = 1))]
    pub database_url: String,

    /// Server host address
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    #[validate(length(min = 1))]
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// Secret used to verify bearer tokens issued by the auth service
    #[validate(length(min = 32))]
    pub jwt_secret: String,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// DB timeouts (seconds)
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "default_db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// Whole-request timeout applied by the HTTP layer (seconds)
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default)]
    #[validate]
    pub shipping: ShippingConfig,

    #[serde(default)]
    #[validate]
    pub payments: PaymentConfig,
}

impl AppConfig {
    /// Creates a configuration with defaults for everything but the essentials
    pub fn new(database_url: String, jwt_secret: String, environment: String) -> Self {
        Self {
            database_url,
            host: "0.0.0.0".to_string(),
            port: default_port(),
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            jwt_secret,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            shipping: ShippingConfig::default(),
            payments: PaymentConfig::default(),
        }
    }

    /// Gets log level reference
    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    /// Checks if running in production environment
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_db_max_connections() -> u32 {
    16
}
fn default_db_min_connections() -> u32 {
    2
}
fn default_db_connect_timeout_secs() -> u64 {
    30
}
fn default_db_idle_timeout_secs() -> u64 {
    600
}
fn default_db_acquire_timeout_secs() -> u64 {
    8
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_rate_service_url() -> String {
    DEFAULT_RATE_SERVICE_URL.to_string()
}

fn default_shipping_timeout_ms() -> u64 {
    DEFAULT_SHIPPING_TIMEOUT_MS
}

fn default_fallback_rate() -> Decimal {
    dec!(5.00)
}

fn default_store_currency() -> String {
    "KES".to_string()
}

fn default_per_kg_rate() -> Decimal {
    dec!(200)
}

fn default_exchange_rate_ttl_secs() -> u64 {
    DEFAULT_EXCHANGE_RATE_TTL_SECS
}

fn default_push_payment_path() -> String {
    DEFAULT_PUSH_PAYMENT_PATH.to_string()
}

/// Validates log level values
fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if valid_levels.contains(&level.to_lowercase().as_str()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("log_level");
        err.message = Some("Must be one of: trace, debug, info, warn, error".into());
        Err(err)
    }
}

fn validate_non_negative(value: &Decimal) -> Result<(), ValidationError> {
    if value.is_sign_negative() {
        let mut err = ValidationError::new("non_negative");
        err.message = Some("Amount must not be negative".into());
        return Err(err);
    }
    Ok(())
}

fn validate_path(path: &str) -> Result<(), ValidationError> {
    if !path.starts_with('/') || path.contains('?') {
        let mut err = ValidationError::new("push_payment_path");
        err.message = Some("Must be an absolute path without a query string".into());
        return Err(err);
    }
    Ok(())
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("storefront_checkout={},tower_http=debug", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    let builder = fmt().with_env_filter(EnvFilter::new(filter_directive));
    // A subscriber may already be installed (tests); keep the existing one.
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Built-in defaults
/// 2. Default config (config/default.toml)
/// 3. Environment-specific config (config/{env}.toml)
/// 4. Environment variables (APP__*)
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !Path::new(CONFIG_DIR).exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            CONFIG_DIR
        );
    }

    // jwt_secret has no default and must come from a file or APP__JWT_SECRET.
    let config = Config::builder()
        .set_default("database_url", "sqlite://storefront.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", i64::from(DEFAULT_PORT))?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    if config.get_string("jwt_secret").is_err() {
        error!("JWT secret is not configured. Set APP__JWT_SECRET (minimum 32 characters).");
        return Err(AppConfigError::Load(ConfigError::NotFound(
            "jwt_secret is required but not configured. Set APP__JWT_SECRET environment variable."
                .into(),
        )));
    }

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> AppConfig {
        AppConfig::new(
            "sqlite::memory:".into(),
            "a_test_secret_that_is_comfortably_longer_than_32".into(),
            "test".into(),
        )
    }

    #[test]
    fn defaults_pass_validation() {
        let cfg = base_config();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.shipping.fallback_rate, dec!(5.00));
        assert_eq!(cfg.shipping.timeout(), Duration::from_millis(3_000));
        assert_eq!(cfg.payments.push_payment_path, "/api/orders/mpesa-payment");
    }

    #[test]
    fn short_jwt_secret_is_rejected() {
        let mut cfg = base_config();
        cfg.jwt_secret = "short".into();
        let errors = cfg.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("jwt_secret"));
    }

    #[test]
    fn negative_fallback_rate_is_rejected() {
        let mut cfg = base_config();
        cfg.shipping.fallback_rate = dec!(-1);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn push_payment_path_must_be_absolute() {
        let mut cfg = base_config();
        cfg.payments.push_payment_path = "pay?x=1".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn unknown_log_level_is_rejected() {
        let mut cfg = base_config();
        cfg.log_level = "loud".into();
        let errors = cfg.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("log_level"));
    }
}

use secrecy::Secret;
use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct EstimatingConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub service_name: String,
    /// Prefix for `/view-estimate/{token}` and `/view-invoice/{token}` links.
    pub public_base_url: String,
    /// Absent means the in-memory store.
    pub database: Option<DatabaseConfig>,
    pub payment: PaymentConfig,
    pub smtp: SmtpConfig,
    pub workers: WorkerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: Secret<String>,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessorKind {
    Mock,
    Http,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentConfig {
    pub processor: ProcessorKind,
    pub api_base_url: String,
    pub api_key: Secret<String>,
    /// Upper bound on one authorization, retries included.
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub currency: String,
}

impl PaymentConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Secret<String>,
    pub from_email: String,
    pub from_name: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    pub event_queue_size: usize,
    pub reconcile_interval_secs: u64,
    pub reconcile_batch_size: usize,
    /// Passes an entry gets before it is escalated.
    pub reconcile_max_attempts: i32,
}

impl WorkerConfig {
    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }
}

impl EstimatingConfig {
    pub fn load() -> Result<Self, AppError> {
        let mut common_config = core_config::Config::load()?;
        if let Ok(level) = env::var("LOG_LEVEL") {
            common_config.log_level = level;
        }
        if let Ok(endpoint) = env::var("OTLP_ENDPOINT") {
            common_config.otlp_endpoint = Some(endpoint);
        }
        let is_prod = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string()) == "prod";

        let database = match env::var("DATABASE_URL") {
            Ok(url) => Some(DatabaseConfig {
                url: Secret::new(url),
                max_connections: get_env("DATABASE_MAX_CONNECTIONS", Some("10"), false)?
                    .parse()
                    .unwrap_or(10),
                min_connections: get_env("DATABASE_MIN_CONNECTIONS", Some("1"), false)?
                    .parse()
                    .unwrap_or(1),
            }),
            Err(_) if is_prod => {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "DATABASE_URL is required in production but not set"
                )))
            }
            Err(_) => None,
        };

        let processor = match get_env("PAYMENT_PROCESSOR", Some("mock"), false)?.as_str() {
            "http" => ProcessorKind::Http,
            "mock" if !is_prod => ProcessorKind::Mock,
            other => {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "Unsupported PAYMENT_PROCESSOR '{}'",
                    other
                )))
            }
        };
        let needs_processor = processor == ProcessorKind::Http;

        Ok(EstimatingConfig {
            common: common_config,
            service_name: "estimating-service".to_string(),
            public_base_url: get_env("PUBLIC_BASE_URL", Some("http://localhost:3000"), is_prod)?
                .trim_end_matches('/')
                .to_string(),
            database,
            payment: PaymentConfig {
                processor,
                api_base_url: get_env(
                    "PAYMENT_API_BASE_URL",
                    Some("http://localhost:9090"),
                    needs_processor && is_prod,
                )?,
                api_key: Secret::new(get_env(
                    "PAYMENT_API_KEY",
                    Some(""),
                    needs_processor && is_prod,
                )?),
                timeout_ms: get_env("PAYMENT_TIMEOUT_MS", Some("10000"), false)?
                    .parse()
                    .unwrap_or(10_000),
                max_retries: get_env("PAYMENT_MAX_RETRIES", Some("2"), false)?
                    .parse()
                    .unwrap_or(2),
                currency: get_env("PAYMENT_CURRENCY", Some("USD"), false)?,
            },
            smtp: SmtpConfig {
                host: get_env("SMTP_HOST", Some("localhost"), is_prod)?,
                port: get_env("SMTP_PORT", Some("587"), is_prod)?
                    .parse()
                    .unwrap_or(587),
                user: get_env("SMTP_USER", Some(""), is_prod)?,
                password: Secret::new(get_env("SMTP_PASSWORD", Some(""), is_prod)?),
                from_email: get_env("SMTP_FROM_EMAIL", Some("noreply@example.com"), is_prod)?,
                from_name: get_env("SMTP_FROM_NAME", Some("Estimates"), false)?,
                enabled: env::var("SMTP_ENABLED")
                    .unwrap_or_else(|_| "false".to_string())
                    .parse()
                    .unwrap_or(false),
            },
            workers: WorkerConfig {
                event_queue_size: get_env("EVENT_QUEUE_SIZE", Some("1024"), false)?
                    .parse()
                    .unwrap_or(1024),
                reconcile_interval_secs: get_env("RECONCILE_INTERVAL_SECS", Some("60"), false)?
                    .parse()
                    .unwrap_or(60),
                reconcile_batch_size: get_env("RECONCILE_BATCH_SIZE", Some("50"), false)?
                    .parse()
                    .unwrap_or(50),
                reconcile_max_attempts: get_env("RECONCILE_MAX_ATTEMPTS", Some("10"), false)?
                    .parse()
                    .unwrap_or(10),
            },
        })
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required in production but not set",
                    key
                )))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required but not set",
                    key
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_env_falls_back_outside_production() {
        let value = get_env("ESTIMATING_TEST_UNSET_KEY", Some("fallback"), false).unwrap();
        assert_eq!(value, "fallback");
    }

    #[test]
    fn get_env_requires_value_in_production() {
        assert!(get_env("ESTIMATING_TEST_UNSET_KEY", Some("fallback"), true).is_err());
        assert!(get_env("ESTIMATING_TEST_UNSET_KEY", None, false).is_err());
    }
}

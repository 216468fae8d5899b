use anyhow::{bail, Context};
use dotenvy::dotenv;
use serde::Deserialize;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::domain::payment::BPS_DENOMINATOR;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Postgres,
    Memory,
}

impl FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" => Ok(StorageBackend::Postgres),
            "memory" => Ok(StorageBackend::Memory),
            other => bail!("STORAGE_BACKEND must be 'postgres' or 'memory', got '{}'", other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server_port: u16,
    pub storage_backend: StorageBackend,
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    /// Base URL of the payment gateway, or `sandbox` for the built-in one.
    pub payment_gateway_url: String,
    pub payment_gateway_api_key: String,
    pub gateway_timeout_ms: u64,
    pub gateway_failure_threshold: u32,
    pub gateway_reset_timeout_secs: u64,
    pub platform_commission_bps: u32,
    pub push_service_url: Option<String>,
    pub notify_max_attempts: u32,
    pub notify_retry_base_ms: u64,
    pub reconcile_interval_secs: u64,
    pub reconcile_max_retries: i32,
    pub archive_schedule: String,
    pub auth_token_secret: String,
    pub admin_api_key: String,
    pub system_api_key: Option<String>,
    pub cors_allowed_origins: Option<Vec<String>>,
    pub log_format: LogFormat,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv().ok(); // Load .env file if present

        let storage_backend: StorageBackend = env::var("STORAGE_BACKEND")
            .unwrap_or_else(|_| "postgres".to_string())
            .parse()?;
        let database_url = env::var("DATABASE_URL").ok();
        if storage_backend == StorageBackend::Postgres && database_url.is_none() {
            bail!("DATABASE_URL is required when STORAGE_BACKEND=postgres");
        }

        let config = Config {
            server_port: env::var("SERVER_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()?,
            storage_backend,
            database_url,
            db_max_connections: env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()?,
            payment_gateway_url: env::var("PAYMENT_GATEWAY_URL")
                .context("PAYMENT_GATEWAY_URL is required")?,
            payment_gateway_api_key: env::var("PAYMENT_GATEWAY_API_KEY").unwrap_or_default(),
            gateway_timeout_ms: env::var("GATEWAY_TIMEOUT_MS")
                .unwrap_or_else(|_| "10000".to_string())
                .parse()?,
            gateway_failure_threshold: env::var("GATEWAY_FAILURE_THRESHOLD")
                .unwrap_or_else(|_| "3".to_string())
                .parse()?,
            gateway_reset_timeout_secs: env::var("GATEWAY_RESET_TIMEOUT_SECS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()?,
            platform_commission_bps: parse_commission_bps(
                &env::var("PLATFORM_COMMISSION_BPS")
                    .context("PLATFORM_COMMISSION_BPS is required")?,
            )?,
            push_service_url: env::var("PUSH_SERVICE_URL").ok().filter(|v| !v.trim().is_empty()),
            notify_max_attempts: env::var("NOTIFY_MAX_ATTEMPTS")
                .unwrap_or_else(|_| "3".to_string())
                .parse()?,
            notify_retry_base_ms: env::var("NOTIFY_RETRY_BASE_MS")
                .unwrap_or_else(|_| "100".to_string())
                .parse()?,
            reconcile_interval_secs: env::var("RECONCILE_INTERVAL_SECS")
                .unwrap_or_else(|_| "300".to_string())
                .parse()?,
            reconcile_max_retries: env::var("RECONCILE_MAX_RETRIES")
                .unwrap_or_else(|_| "5".to_string())
                .parse()?,
            archive_schedule: env::var("ARCHIVE_SCHEDULE")
                .unwrap_or_else(|_| "0 0 * * * *".to_string()),
            auth_token_secret: env::var("AUTH_TOKEN_SECRET")
                .context("AUTH_TOKEN_SECRET is required")?,
            admin_api_key: env::var("ADMIN_API_KEY").context("ADMIN_API_KEY is required")?,
            system_api_key: env::var("SYSTEM_API_KEY").ok().filter(|v| !v.trim().is_empty()),
            cors_allowed_origins: env::var("CORS_ALLOWED_ORIGINS")
                .ok()
                .map(|raw| parse_origins(&raw))
                .filter(|origins| !origins.is_empty()),
            log_format: match env::var("LOG_FORMAT").as_deref() {
                Ok("json") => LogFormat::Json,
                _ => LogFormat::Text,
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.notify_max_attempts == 0 {
            bail!("NOTIFY_MAX_ATTEMPTS must be at least 1");
        }
        if self.gateway_failure_threshold == 0 {
            bail!("GATEWAY_FAILURE_THRESHOLD must be at least 1");
        }
        if self.auth_token_secret.len() < 16 {
            bail!("AUTH_TOKEN_SECRET must be at least 16 characters");
        }
        if !self.uses_sandbox_gateway() {
            url::Url::parse(&self.payment_gateway_url)
                .with_context(|| format!("PAYMENT_GATEWAY_URL is not a valid URL: {}", self.payment_gateway_url))?;
        }
        if let Some(push) = &self.push_service_url {
            url::Url::parse(push)
                .with_context(|| format!("PUSH_SERVICE_URL is not a valid URL: {}", push))?;
        }
        cron::Schedule::from_str(&self.archive_schedule)
            .map_err(|e| anyhow::anyhow!("ARCHIVE_SCHEDULE is not a valid cron expression: {}", e))?;
        Ok(())
    }

    pub fn gateway_timeout(&self) -> Duration {
        Duration::from_millis(self.gateway_timeout_ms)
    }

    pub fn uses_sandbox_gateway(&self) -> bool {
        self.payment_gateway_url.eq_ignore_ascii_case("sandbox")
    }
}

fn parse_commission_bps(raw: &str) -> anyhow::Result<u32> {
    let bps: u32 = raw
        .trim()
        .parse()
        .with_context(|| format!("PLATFORM_COMMISSION_BPS must be an integer, got '{}'", raw))?;
    if bps as i64 > BPS_DENOMINATOR {
        bail!("PLATFORM_COMMISSION_BPS must be between 0 and {}", BPS_DENOMINATOR);
    }
    Ok(bps)
}

fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .map(str::to_string)
        .collect()
}

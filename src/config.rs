use anyhow::Context;
use bigdecimal::BigDecimal;
use dotenvy::dotenv;
use serde::Deserialize;
use std::env;
use std::str::FromStr;

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum QrStrategy {
    /// Image URL from img.vietqr.io, no network call.
    VietQr,
    /// Image URL from qr.sepay.vn for personal accounts, no network call.
    SepayQr,
    /// QR created through the SePay merchant API.
    SepayApi,
}

impl FromStr for QrStrategy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "vietqr" => Ok(QrStrategy::VietQr),
            "sepay-qr" => Ok(QrStrategy::SepayQr),
            "sepay-api" => Ok(QrStrategy::SepayApi),
            other => anyhow::bail!("QR_STRATEGY must be vietqr, sepay-qr or sepay-api, got '{}'", other),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct BankConfig {
    pub account_number: String,
    pub bank_code: String,
    pub account_name: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProviderConfig {
    pub api_key: Option<String>,
    pub secret_key: Option<String>,
    pub merchant_id: Option<String>,
    pub base_url: String,
    pub webhook_url: String,
    pub return_url: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DepositPolicy {
    pub expiration_minutes: i64,
    pub amount_tolerance: BigDecimal,
    pub hourly_limit: i64,
    pub min_amount: BigDecimal,
    pub max_amount: BigDecimal,
}

impl Default for DepositPolicy {
    fn default() -> Self {
        Self {
            expiration_minutes: 15,
            amount_tolerance: BigDecimal::from(2000),
            hourly_limit: 5,
            min_amount: BigDecimal::from(10_000),
            max_amount: BigDecimal::from(50_000_000),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server_port: u16,
    pub database_url: String,
    pub database_max_connections: u32,
    pub bank: BankConfig,
    pub qr_strategy: QrStrategy,
    pub provider: ProviderConfig,
    pub casso_webhook_secret: Option<String>,
    pub deposit: DepositPolicy,
    pub expiry_sweep_interval_secs: u64,
    pub admin_api_key: Option<String>,
    pub cors_allowed_origins: Option<String>,
    pub log_format: LogFormat,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl Config {
    /// Baseline configuration with every optional setting at its default.
    pub fn with_defaults(database_url: impl Into<String>, bank_account_number: impl Into<String>) -> Self {
        Config {
            server_port: 3000,
            database_url: database_url.into(),
            database_max_connections: 5,
            bank: BankConfig {
                account_number: bank_account_number.into(),
                bank_code: "970422".to_string(),
                account_name: "ACCOUNT SHOP".to_string(),
            },
            qr_strategy: QrStrategy::VietQr,
            provider: ProviderConfig {
                api_key: None,
                secret_key: None,
                merchant_id: None,
                base_url: "https://api.sepay.vn/v1".to_string(),
                webhook_url: "http://localhost:3000/sepay/webhook".to_string(),
                return_url: "http://localhost:5173/auto-deposit".to_string(),
                timeout_secs: 10,
            },
            casso_webhook_secret: None,
            deposit: DepositPolicy::default(),
            expiry_sweep_interval_secs: 60,
            admin_api_key: None,
            cors_allowed_origins: None,
            log_format: LogFormat::Pretty,
        }
    }

    pub fn from_env() -> anyhow::Result<Self> {
        dotenv().ok(); // Load .env file if present

        let defaults = Config::with_defaults(
            env::var("DATABASE_URL").context("DATABASE_URL is required")?,
            env::var("BANK_ACCOUNT_NUMBER").context("BANK_ACCOUNT_NUMBER is required")?,
        );

        let return_url = match non_empty("FRONTEND_URL") {
            Some(frontend) => format!("{}/auto-deposit", frontend.trim_end_matches('/')),
            None => defaults.provider.return_url.clone(),
        };

        let config = Config {
            server_port: parse_or("SERVER_PORT", defaults.server_port)?,
            database_max_connections: parse_or(
                "DATABASE_MAX_CONNECTIONS",
                defaults.database_max_connections,
            )?,
            bank: BankConfig {
                bank_code: env::var("BANK_CODE").unwrap_or(defaults.bank.bank_code),
                account_name: env::var("BANK_ACCOUNT_NAME").unwrap_or(defaults.bank.account_name),
                account_number: defaults.bank.account_number,
            },
            qr_strategy: match non_empty("QR_STRATEGY") {
                Some(raw) => raw.parse()?,
                None => defaults.qr_strategy,
            },
            provider: ProviderConfig {
                api_key: non_empty("SEPAY_API_KEY"),
                secret_key: non_empty("SEPAY_SECRET_KEY"),
                merchant_id: non_empty("SEPAY_MERCHANT_ID"),
                base_url: env::var("SEPAY_BASE_URL").unwrap_or(defaults.provider.base_url),
                webhook_url: env::var("SEPAY_WEBHOOK_URL").unwrap_or(defaults.provider.webhook_url),
                return_url,
                timeout_secs: parse_or("PROVIDER_TIMEOUT_SECS", defaults.provider.timeout_secs)?,
            },
            casso_webhook_secret: non_empty("CASSO_WEBHOOK_SECRET"),
            deposit: DepositPolicy {
                expiration_minutes: parse_or(
                    "DEPOSIT_EXPIRATION_MINUTES",
                    defaults.deposit.expiration_minutes,
                )?,
                amount_tolerance: parse_or("AMOUNT_TOLERANCE", defaults.deposit.amount_tolerance)?,
                hourly_limit: parse_or("DEPOSIT_HOURLY_LIMIT", defaults.deposit.hourly_limit)?,
                min_amount: parse_or("DEPOSIT_MIN_AMOUNT", defaults.deposit.min_amount)?,
                max_amount: parse_or("DEPOSIT_MAX_AMOUNT", defaults.deposit.max_amount)?,
            },
            expiry_sweep_interval_secs: parse_or(
                "EXPIRY_SWEEP_INTERVAL_SECS",
                defaults.expiry_sweep_interval_secs,
            )?,
            admin_api_key: non_empty("ADMIN_API_KEY"),
            cors_allowed_origins: non_empty("CORS_ALLOWED_ORIGINS"),
            log_format: match env::var("LOG_FORMAT").as_deref() {
                Ok("json") => LogFormat::Json,
                _ => defaults.log_format,
            },
            database_url: defaults.database_url,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.bank.account_number.trim().is_empty() {
            anyhow::bail!("BANK_ACCOUNT_NUMBER is empty");
        }
        if self.deposit.expiration_minutes <= 0 {
            anyhow::bail!("DEPOSIT_EXPIRATION_MINUTES must be greater than 0");
        }
        if self.deposit.hourly_limit <= 0 {
            anyhow::bail!("DEPOSIT_HOURLY_LIMIT must be greater than 0");
        }
        if self.deposit.amount_tolerance < BigDecimal::from(0) {
            anyhow::bail!("AMOUNT_TOLERANCE must not be negative");
        }
        if self.expiry_sweep_interval_secs == 0 {
            anyhow::bail!("EXPIRY_SWEEP_INTERVAL_SECS must be greater than 0");
        }
        if self.deposit.min_amount > self.deposit.max_amount {
            anyhow::bail!("DEPOSIT_MIN_AMOUNT must not exceed DEPOSIT_MAX_AMOUNT");
        }
        if self.qr_strategy == QrStrategy::SepayApi {
            if self.provider.api_key.is_none()
                || self.provider.secret_key.is_none()
                || self.provider.merchant_id.is_none()
            {
                anyhow::bail!(
                    "QR_STRATEGY=sepay-api requires SEPAY_API_KEY, SEPAY_SECRET_KEY and SEPAY_MERCHANT_ID"
                );
            }
            url::Url::parse(&self.provider.base_url).context("SEPAY_BASE_URL is not a valid URL")?;
        }
        Ok(())
    }
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_or<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("{} is invalid: {}", key, e)),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> Config {
    let mut config = Config::with_defaults("postgres://localhost/account_shop_test", "1234567890");
    config.provider.secret_key = Some("test_secret_key".to_string());
    config.admin_api_key = Some("admin-secret-key".to_string());
    config
}

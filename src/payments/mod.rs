//! QR payment instructions for deposit intents.
//!
//! Two of the three strategies are pure URL templates. The third asks the
//! SePay merchant API to mint the QR and returns its transaction id for
//! later status polling.

pub mod provider;
pub mod qr;
pub mod signature;

use bigdecimal::BigDecimal;
use thiserror::Error;

use crate::config::{Config, QrStrategy};

pub use provider::{ProviderTransactionStatus, SepayClient};
pub use qr::QrTemplate;

#[derive(Error, Debug)]
pub enum QrError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("payment provider timed out")]
    Timeout,
    #[error("payment provider returned {status}: {message}")]
    Rejected { status: u16, message: String },
    #[error("invalid response from payment provider: {0}")]
    InvalidResponse(String),
    #[error("circuit breaker open: {0}")]
    CircuitBreakerOpen(String),
    #[error("invalid QR configuration: {0}")]
    InvalidConfiguration(String),
}

impl QrError {
    pub(crate) fn from_request(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            QrError::Timeout
        } else {
            QrError::Request(err)
        }
    }
}

/// What the user scans, plus the provider's handle when one exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QrPayment {
    pub qr_url: String,
    pub provider_transaction_id: Option<String>,
}

#[derive(Clone)]
pub enum QrBuilder {
    Template(QrTemplate),
    Provider(SepayClient),
}

impl QrBuilder {
    pub fn from_config(config: &Config) -> Result<Self, QrError> {
        match config.qr_strategy {
            QrStrategy::VietQr => Ok(QrBuilder::Template(QrTemplate::vietqr(&config.bank))),
            QrStrategy::SepayQr => Ok(QrBuilder::Template(QrTemplate::sepay_image(&config.bank))),
            QrStrategy::SepayApi => Ok(QrBuilder::Provider(SepayClient::from_config(
                &config.provider,
                config.deposit.expiration_minutes,
            )?)),
        }
    }

    /// Payment instructions for `amount` to `bank_account` carrying
    /// `reference` as the transfer memo.
    pub async fn build(
        &self,
        bank_account: &str,
        amount: &BigDecimal,
        reference: &str,
    ) -> Result<QrPayment, QrError> {
        match self {
            QrBuilder::Template(template) => Ok(QrPayment {
                qr_url: template.render(bank_account, amount, reference)?,
                provider_transaction_id: None,
            }),
            QrBuilder::Provider(client) => client.create_qr(amount, reference).await,
        }
    }

    /// The provider client, when QRs are minted through the merchant API.
    pub fn provider(&self) -> Option<&SepayClient> {
        match self {
            QrBuilder::Provider(client) => Some(client),
            QrBuilder::Template(_) => None,
        }
    }
}

/// Render an amount for URLs and provider payloads: whole amounts without
/// a fractional part, others as-is.
pub(crate) fn amount_param(amount: &BigDecimal) -> String {
    let whole = amount.with_scale(0);
    if &whole == amount {
        whole.to_string()
    } else {
        amount.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use std::str::FromStr;

    #[test]
    fn test_amount_param_drops_zero_fraction() {
        assert_eq!(amount_param(&BigDecimal::from_str("100000.00").unwrap()), "100000");
        assert_eq!(amount_param(&BigDecimal::from(50_000)), "50000");
        assert_eq!(amount_param(&BigDecimal::from_str("10000.50").unwrap()), "10000.50");
    }

    #[test]
    fn test_builder_follows_configured_strategy() {
        let mut config = test_config();
        assert!(QrBuilder::from_config(&config).unwrap().provider().is_none());

        config.qr_strategy = QrStrategy::SepayApi;
        config.provider.api_key = Some("key".to_string());
        config.provider.merchant_id = Some("merchant".to_string());
        assert!(QrBuilder::from_config(&config).unwrap().provider().is_some());
    }

    #[tokio::test]
    async fn test_template_builder_has_no_provider_id() {
        let builder = QrBuilder::from_config(&test_config()).unwrap();
        let payment = builder
            .build("1234567890", &BigDecimal::from(100_000), "NAP42T1700000000R1234")
            .await
            .unwrap();

        assert!(payment.qr_url.starts_with("https://img.vietqr.io/image/"));
        assert!(payment.provider_transaction_id.is_none());
    }
}

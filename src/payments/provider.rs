use bigdecimal::BigDecimal;
use failsafe::futures::CircuitBreaker as FuturesCircuitBreaker;
use failsafe::{backoff, failure_policy, Config, Error as FailsafeError, StateMachine};
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use super::signature::sign_hex;
use super::{amount_param, QrError, QrPayment};
use crate::config::ProviderConfig;

pub const SIGNATURE_HEADER: &str = "X-SePay-Signature";

type Breaker = StateMachine<failure_policy::ConsecutiveFailures<backoff::EqualJittered>, ()>;

fn breaker(failure_threshold: u32, reset_timeout_secs: u64) -> Breaker {
    let backoff = backoff::equal_jittered(
        Duration::from_secs(reset_timeout_secs),
        Duration::from_secs(reset_timeout_secs * 2),
    );
    let policy = failure_policy::consecutive_failures(failure_threshold, backoff);
    Config::new().failure_policy(policy).build()
}

#[derive(Debug, Serialize)]
struct CreateQrRequest<'a> {
    merchant_id: &'a str,
    amount: serde_json::Number,
    reference: &'a str,
    description: String,
    expires_in: i64,
    callback_url: &'a str,
    return_url: &'a str,
}

#[derive(Debug, Deserialize)]
struct CreateQrResponse {
    qr_code_url: Option<String>,
    transaction_id: Option<Value>,
}

/// Provider-side view of a transaction. Informational only: balances move
/// on webhooks, never on a poll.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderTransactionStatus {
    pub status: Option<String>,
    pub raw: Value,
}

/// HTTP client for the SePay merchant API
#[derive(Clone)]
pub struct SepayClient {
    client: Client,
    base_url: String,
    api_key: String,
    secret_key: String,
    merchant_id: String,
    callback_url: String,
    return_url: String,
    expires_in_secs: i64,
    circuit_breaker: Breaker,
    // Status polls are user-driven; their failures must not block QR creation.
    status_breaker: Breaker,
}

impl SepayClient {
    pub fn from_config(config: &ProviderConfig, expiration_minutes: i64) -> Result<Self, QrError> {
        let required = |value: &Option<String>, name: &str| {
            value
                .clone()
                .ok_or_else(|| QrError::InvalidConfiguration(format!("{} is not set", name)))
        };

        Ok(Self::with_circuit_breaker(
            config.base_url.clone(),
            required(&config.api_key, "SEPAY_API_KEY")?,
            required(&config.secret_key, "SEPAY_SECRET_KEY")?,
            required(&config.merchant_id, "SEPAY_MERCHANT_ID")?,
            config.webhook_url.clone(),
            config.return_url.clone(),
            expiration_minutes * 60,
            Duration::from_secs(config.timeout_secs),
            3,
            60,
        ))
    }

    #[allow(clippy::too_many_arguments)]
    pub fn with_circuit_breaker(
        base_url: String,
        api_key: String,
        secret_key: String,
        merchant_id: String,
        callback_url: String,
        return_url: String,
        expires_in_secs: i64,
        timeout: Duration,
        failure_threshold: u32,
        reset_timeout_secs: u64,
    ) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();

        SepayClient {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            secret_key,
            merchant_id,
            callback_url,
            return_url,
            expires_in_secs,
            circuit_breaker: breaker(failure_threshold, reset_timeout_secs),
            status_breaker: breaker(failure_threshold, reset_timeout_secs),
        }
    }

    /// State of the breaker guarding QR creation.
    pub fn circuit_state(&self) -> String {
        if self.circuit_breaker.is_call_permitted() {
            "closed".to_string()
        } else {
            "open".to_string()
        }
    }

    /// Ask the provider to mint a QR for this deposit. The request body is
    /// signed exactly as sent.
    pub async fn create_qr(&self, amount: &BigDecimal, reference: &str) -> Result<QrPayment, QrError> {
        let amount: serde_json::Number = amount_param(amount)
            .parse()
            .map_err(|_| QrError::InvalidConfiguration(format!("unrepresentable amount {}", amount)))?;

        let payload = CreateQrRequest {
            merchant_id: &self.merchant_id,
            amount,
            reference,
            description: format!("Nap tien {}", reference),
            expires_in: self.expires_in_secs,
            callback_url: &self.callback_url,
            return_url: &self.return_url,
        };
        let body = serde_json::to_vec(&payload)
            .map_err(|e| QrError::InvalidConfiguration(e.to_string()))?;
        let signature = sign_hex(&self.secret_key, &body);

        let url = format!("{}/qr/create", self.base_url);
        let request = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header(CONTENT_TYPE, "application/json")
            .header(SIGNATURE_HEADER, signature)
            .body(body);

        let result = self
            .circuit_breaker
            .call(async move {
                let response = request.send().await.map_err(QrError::from_request)?;
                let status = response.status();
                if !status.is_success() {
                    let message = response.text().await.unwrap_or_default();
                    return Err(QrError::Rejected {
                        status: status.as_u16(),
                        message,
                    });
                }

                let parsed = response
                    .json::<CreateQrResponse>()
                    .await
                    .map_err(|e| QrError::InvalidResponse(e.to_string()))?;
                let qr_url = parsed
                    .qr_code_url
                    .filter(|u| !u.is_empty())
                    .ok_or_else(|| QrError::InvalidResponse("qr_code_url missing".to_string()))?;

                Ok(QrPayment {
                    qr_url,
                    provider_transaction_id: parsed.transaction_id.as_ref().and_then(id_to_string),
                })
            })
            .await;

        match result {
            Ok(payment) => {
                tracing::info!(
                    reference = %reference,
                    provider_transaction_id = ?payment.provider_transaction_id,
                    "provider QR created"
                );
                Ok(payment)
            }
            Err(FailsafeError::Rejected) => Err(QrError::CircuitBreakerOpen(
                "SePay API circuit breaker is open".to_string(),
            )),
            Err(FailsafeError::Inner(e)) => Err(e),
        }
    }

    /// Look up a provider transaction. Used by the status endpoint for
    /// diagnostics; the result never changes a balance.
    pub async fn check_transaction_status(
        &self,
        transaction_id: &str,
    ) -> Result<ProviderTransactionStatus, QrError> {
        let request = self
            .client
            .get(format!("{}/transaction/{}", self.base_url, transaction_id))
            .bearer_auth(&self.api_key);

        let result = self
            .status_breaker
            .call(async move {
                let response = request.send().await.map_err(QrError::from_request)?;
                let status = response.status();
                if !status.is_success() {
                    return Err(QrError::Rejected {
                        status: status.as_u16(),
                        message: response.text().await.unwrap_or_default(),
                    });
                }
                let raw = response
                    .json::<Value>()
                    .await
                    .map_err(|e| QrError::InvalidResponse(e.to_string()))?;
                Ok(ProviderTransactionStatus {
                    status: raw.get("status").and_then(Value::as_str).map(str::to_string),
                    raw,
                })
            })
            .await;

        match result {
            Ok(status) => Ok(status),
            Err(FailsafeError::Rejected) => Err(QrError::CircuitBreakerOpen(
                "SePay status circuit breaker is open".to_string(),
            )),
            Err(FailsafeError::Inner(e)) => Err(e),
        }
    }
}

fn id_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

//! Webhook adapters. Each endpoint verifies its provider's signature over
//! the raw body, normalises the payload into a `SettledPaymentEvent` and
//! hands it to the reconciliation engine.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use bigdecimal::{BigDecimal, Zero};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::domain::SettledPaymentEvent;
use crate::error::AppError;
use crate::handlers::auth::{Casso, SepayBank, SepayGateway, VerifiedWebhook, WebhookSource};
use crate::use_cases::{NoMatchReason, ReconcileOutcome};
use crate::utils::sanitize::sanitize_json;
use crate::AppState;

/// Result of applying one payment notification.
#[derive(Debug, Serialize, ToSchema)]
pub struct WebhookResult {
    pub success: bool,
    /// credited | already_processed | no_reference | no_pending_deposit | amount_mismatch | skipped | error
    pub outcome: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_transaction_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deposit_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_code: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct BatchWebhookResult {
    pub success: bool,
    pub results: Vec<WebhookResult>,
}

impl WebhookResult {
    fn from_outcome(external_id: &str, outcome: ReconcileOutcome) -> (StatusCode, Self) {
        let base = |success, outcome: &str, message: String| WebhookResult {
            success,
            outcome: outcome.to_string(),
            message,
            external_transaction_id: Some(external_id.to_string()),
            deposit_id: None,
            reference_code: None,
        };

        match outcome {
            ReconcileOutcome::AlreadyProcessed => (
                StatusCode::OK,
                base(true, "already_processed", "Transaction already processed".to_string()),
            ),
            ReconcileOutcome::Credited {
                deposit_id,
                reference_code,
                amount,
                ..
            } => (
                StatusCode::OK,
                WebhookResult {
                    deposit_id: Some(deposit_id),
                    reference_code: Some(reference_code),
                    ..base(true, "credited", format!("Deposit of {} credited", amount))
                },
            ),
            ReconcileOutcome::NoMatch(NoMatchReason::NoReference) => (
                StatusCode::BAD_REQUEST,
                base(false, "no_reference", "No deposit reference code in transfer content".to_string()),
            ),
            ReconcileOutcome::NoMatch(NoMatchReason::NoPendingDeposit) => (
                StatusCode::NOT_FOUND,
                base(false, "no_pending_deposit", "No pending deposit for this reference code".to_string()),
            ),
            ReconcileOutcome::AmountMismatch {
                reference_code,
                expected,
                received,
            } => (
                StatusCode::BAD_REQUEST,
                WebhookResult {
                    reference_code: Some(reference_code),
                    ..base(
                        false,
                        "amount_mismatch",
                        format!("Amount mismatch: expected {}, received {}", expected, received),
                    )
                },
            ),
        }
    }
}

/// Provider QR payment callback.
#[derive(Debug, Deserialize)]
struct GatewayPayload {
    id: Option<Value>,
    transaction_id: Option<Value>,
    amount: Option<Value>,
    reference: Option<String>,
    status: Option<String>,
}

/// Bank transfer notification. Carries no status: every notification is a
/// completed transfer.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BankPayload {
    transaction_id: Option<Value>,
    id: Option<Value>,
    transfer_amount: Option<Value>,
    amount: Option<Value>,
    content: Option<String>,
    transfer_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CassoPayload {
    #[serde(default)]
    error: i64,
    #[serde(default)]
    data: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct CassoRecord {
    id: Option<Value>,
    tid: Option<Value>,
    amount: Option<Value>,
    description: Option<String>,
}

fn parse_json(body: &[u8]) -> Result<Value, AppError> {
    serde_json::from_slice(body).map_err(|e| AppError::BadRequest(format!("Invalid JSON payload: {}", e)))
}

fn decode<T: serde::de::DeserializeOwned>(raw: &Value) -> Result<T, AppError> {
    T::deserialize(raw).map_err(|e| AppError::BadRequest(format!("Invalid payload: {}", e)))
}

/// Identifiers arrive as strings from some providers and integers from others.
fn id_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Amounts arrive as JSON numbers or decimal strings; both parse exactly.
pub(crate) fn parse_amount(value: Option<&Value>) -> Result<BigDecimal, AppError> {
    let parsed = match value {
        Some(Value::Number(n)) => BigDecimal::from_str(&n.to_string()).ok(),
        Some(Value::String(s)) => BigDecimal::from_str(s.trim()).ok(),
        _ => None,
    };
    let amount = parsed.ok_or_else(|| AppError::BadRequest("Missing or invalid amount".to_string()))?;
    if amount <= BigDecimal::zero() {
        return Err(AppError::BadRequest("Amount must be positive".to_string()));
    }
    Ok(amount)
}

fn required(value: Option<String>, field: &str) -> Result<String, AppError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| AppError::BadRequest(format!("Missing required field: {}", field)))
}

/// Provider ids are only unique within one provider's feed, so the stored
/// external id is prefixed with the ingesting source.
fn scoped_id<S: WebhookSource>(raw_id: Option<String>, field: &str) -> Result<String, AppError> {
    Ok(format!("{}:{}", S::NAME, required(raw_id, field)?))
}

pub(crate) fn gateway_event(raw: Value) -> Result<SettledPaymentEvent, AppError> {
    let payload: GatewayPayload = decode(&raw)?;

    let status = required(payload.status, "status")?;
    if !status.eq_ignore_ascii_case("success") {
        return Err(AppError::BadRequest(format!("Payment status is '{}', not success", status)));
    }

    Ok(SettledPaymentEvent {
        external_transaction_id: scoped_id::<SepayGateway>(
            id_string(payload.id.as_ref()).or_else(|| id_string(payload.transaction_id.as_ref())),
            "id",
        )?,
        amount: parse_amount(payload.amount.as_ref())?,
        memo_text: required(payload.reference, "reference")?,
        status,
        raw_payload: raw,
    })
}

pub(crate) fn bank_event(raw: Value) -> Result<SettledPaymentEvent, AppError> {
    let payload: BankPayload = decode(&raw)?;

    if let Some(kind) = payload.transfer_type.as_deref() {
        if !kind.eq_ignore_ascii_case("in") {
            return Err(AppError::BadRequest(format!("Ignoring '{}' transfer", kind)));
        }
    }

    Ok(SettledPaymentEvent {
        external_transaction_id: scoped_id::<SepayBank>(
            id_string(payload.transaction_id.as_ref()).or_else(|| id_string(payload.id.as_ref())),
            "transactionId",
        )?,
        amount: parse_amount(payload.transfer_amount.as_ref().or(payload.amount.as_ref()))?,
        memo_text: required(payload.content, "content")?,
        status: "success".to_string(),
        raw_payload: raw,
    })
}

fn casso_event(raw: Value) -> Result<SettledPaymentEvent, AppError> {
    let record: CassoRecord = decode(&raw)?;

    Ok(SettledPaymentEvent {
        external_transaction_id: scoped_id::<Casso>(
            id_string(record.id.as_ref()).or_else(|| id_string(record.tid.as_ref())),
            "id",
        )?,
        amount: parse_amount(record.amount.as_ref())?,
        memo_text: required(record.description, "description")?,
        status: "success".to_string(),
        raw_payload: raw,
    })
}

async fn reconcile(
    state: &AppState,
    event: SettledPaymentEvent,
) -> Result<(StatusCode, WebhookResult), AppError> {
    let external_id = event.external_transaction_id.clone();
    let outcome = state.reconciler.execute(event, Utc::now()).await?;
    Ok(WebhookResult::from_outcome(&external_id, outcome))
}

#[utoipa::path(
    post,
    path = "/sepay/webhook",
    request_body(content = String, description = "Provider payment callback, signed with X-SePay-Signature"),
    responses(
        (status = 200, description = "Payment credited or already processed", body = WebhookResult),
        (status = 400, description = "Malformed payload, missing reference or amount mismatch", body = WebhookResult),
        (status = 401, description = "Signature verification failed"),
        (status = 404, description = "No pending deposit for the reference", body = WebhookResult)
    ),
    tag = "Webhooks"
)]
pub async fn sepay_webhook(
    State(state): State<AppState>,
    webhook: VerifiedWebhook<SepayGateway>,
) -> Result<impl IntoResponse, AppError> {
    let raw = parse_json(&webhook.body)?;
    tracing::info!(source = "sepay", payload = %sanitize_json(&raw), "webhook received");

    let event = gateway_event(raw)?;
    let (status, result) = reconcile(&state, event).await?;
    Ok((status, Json(result)))
}

#[utoipa::path(
    post,
    path = "/bank/sepay-webhook",
    request_body(content = String, description = "Bank transfer notification, signed with X-SePay-Signature"),
    responses(
        (status = 200, description = "Payment credited or already processed", body = WebhookResult),
        (status = 400, description = "Malformed payload, outgoing transfer or amount mismatch", body = WebhookResult),
        (status = 401, description = "Signature verification failed"),
        (status = 404, description = "No pending deposit for the reference", body = WebhookResult)
    ),
    tag = "Webhooks"
)]
pub async fn bank_webhook(
    State(state): State<AppState>,
    webhook: VerifiedWebhook<SepayBank>,
) -> Result<impl IntoResponse, AppError> {
    let raw = parse_json(&webhook.body)?;
    tracing::info!(source = "sepay-bank", payload = %sanitize_json(&raw), "webhook received");

    let event = bank_event(raw)?;
    let (status, result) = reconcile(&state, event).await?;
    Ok((status, Json(result)))
}

#[utoipa::path(
    post,
    path = "/bank/casso-webhook",
    request_body(content = String, description = "Batch bank notification, signed with X-Casso-Signature"),
    responses(
        (status = 200, description = "Per-record outcomes", body = BatchWebhookResult),
        (status = 400, description = "Provider reported an error"),
        (status = 401, description = "Signature verification failed"),
        (status = 500, description = "At least one record hit an internal error", body = BatchWebhookResult)
    ),
    tag = "Webhooks"
)]
pub async fn casso_webhook(
    State(state): State<AppState>,
    webhook: VerifiedWebhook<Casso>,
) -> Result<impl IntoResponse, AppError> {
    let raw = parse_json(&webhook.body)?;
    tracing::info!(source = "casso", payload = %sanitize_json(&raw), "webhook received");

    let payload: CassoPayload = decode(&raw)?;
    if payload.error != 0 {
        return Err(AppError::BadRequest(format!("Casso reported error {}", payload.error)));
    }

    let mut results = Vec::with_capacity(payload.data.len());
    let mut internal_error = false;

    for record in payload.data {
        let event = match casso_event(record) {
            Ok(event) => event,
            Err(e) => {
                results.push(WebhookResult {
                    success: false,
                    outcome: "skipped".to_string(),
                    message: e.to_string(),
                    external_transaction_id: None,
                    deposit_id: None,
                    reference_code: None,
                });
                continue;
            }
        };

        let external_id = event.external_transaction_id.clone();
        match reconcile(&state, event).await {
            Ok((_, result)) => results.push(result),
            Err(e) => {
                tracing::error!(external_transaction_id = %external_id, "Casso record failed: {}", e);
                internal_error = true;
                results.push(WebhookResult {
                    success: false,
                    outcome: "error".to_string(),
                    message: "Internal server error".to_string(),
                    external_transaction_id: Some(external_id),
                    deposit_id: None,
                    reference_code: None,
                });
            }
        }
    }

    let status = if internal_error {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::OK
    };
    Ok((
        status,
        Json(BatchWebhookResult {
            success: !internal_error,
            results,
        }),
    ))
}

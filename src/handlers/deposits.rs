use axum::{
    async_trait,
    extract::{FromRequestParts, Path, Query, State},
    http::{request::Parts, StatusCode},
    response::IntoResponse,
    Json,
};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::domain::{DepositIntent, DepositStatus, LedgerTransaction, UserId};
use crate::error::AppError;
use crate::handlers::webhook::parse_amount;
use crate::AppState;

pub const USER_ID_HEADER: &str = "X-User-Id";

const DEFAULT_PAGE_SIZE: i64 = 20;
const MAX_PAGE_SIZE: i64 = 100;

/// The caller, as identified by the upstream auth layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticatedUser(pub UserId);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for AuthenticatedUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<UserId>().ok())
            .filter(|id| *id > 0)
            .map(AuthenticatedUser)
            .ok_or_else(|| AppError::Unauthorized("Authentication required".to_string()))
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateDepositRequest {
    /// Amount in VND, as a number or a decimal string.
    #[schema(value_type = String, example = "100000")]
    pub amount: Value,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CreateDepositResponse {
    pub id: Uuid,
    pub reference_code: String,
    #[schema(value_type = String, example = "100000")]
    pub amount: BigDecimal,
    pub bank_account: String,
    pub qr_url: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub provider_transaction_id: Option<String>,
    pub instructions: Vec<String>,
}

impl CreateDepositResponse {
    fn from_intent(intent: DepositIntent) -> Self {
        let instructions = vec![
            "Scan the QR code with your banking app".to_string(),
            format!("Transfer exactly {} VND to account {}", intent.amount, intent.target_bank_account),
            format!("Keep the transfer content exactly as: {}", intent.reference_code),
            format!("The code expires at {}", intent.expires_at.to_rfc3339()),
        ];
        CreateDepositResponse {
            id: intent.id,
            reference_code: intent.reference_code,
            amount: intent.amount,
            bank_account: intent.target_bank_account,
            qr_url: intent.qr_url,
            expires_at: intent.expires_at,
            provider_transaction_id: intent.provider_transaction_id,
            instructions,
        }
    }
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct PageParams {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl PageParams {
    fn resolve(&self) -> (i64, i64) {
        (
            self.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE),
            self.offset.unwrap_or(0).max(0),
        )
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DepositStatusResponse {
    #[serde(flatten)]
    pub deposit: DepositIntent,
    pub is_expired: bool,
    /// Provider-side status, when the QR was minted by the provider API.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_status: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct BalanceResponse {
    pub user_id: UserId,
    #[schema(value_type = String, example = "100000.00")]
    pub balance: BigDecimal,
    pub recent_transactions: Vec<LedgerTransaction>,
}

#[utoipa::path(
    post,
    path = "/auto-deposits",
    request_body = CreateDepositRequest,
    params(("X-User-Id" = i64, Header, description = "Authenticated user id")),
    responses(
        (status = 201, description = "Deposit intent created", body = CreateDepositResponse),
        (status = 401, description = "Missing user identity"),
        (status = 422, description = "Amount out of range"),
        (status = 429, description = "Hourly deposit limit reached"),
        (status = 502, description = "QR provider failure")
    ),
    tag = "Deposits"
)]
pub async fn create_deposit(
    State(state): State<AppState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    Json(payload): Json<CreateDepositRequest>,
) -> Result<impl IntoResponse, AppError> {
    let amount = parse_amount(Some(&payload.amount))
        .map_err(|_| AppError::Validation("amount must be a positive number".to_string()))?;

    let intent = state.deposits.execute(user_id, amount, Utc::now()).await?;
    Ok((StatusCode::CREATED, Json(CreateDepositResponse::from_intent(intent))))
}

#[utoipa::path(
    get,
    path = "/auto-deposits",
    params(
        ("X-User-Id" = i64, Header, description = "Authenticated user id"),
        PageParams
    ),
    responses(
        (status = 200, description = "Caller's deposits, newest first", body = [DepositIntent]),
        (status = 401, description = "Missing user identity")
    ),
    tag = "Deposits"
)]
pub async fn list_deposits(
    State(state): State<AppState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    Query(page): Query<PageParams>,
) -> Result<impl IntoResponse, AppError> {
    let (limit, offset) = page.resolve();
    let deposits = state.repository.list_for_user(user_id, limit, offset).await?;
    Ok(Json(deposits))
}

#[utoipa::path(
    get,
    path = "/auto-deposits/{id}/status",
    params(
        ("id" = Uuid, Path, description = "Deposit id"),
        ("X-User-Id" = i64, Header, description = "Authenticated user id")
    ),
    responses(
        (status = 200, description = "Deposit status", body = DepositStatusResponse),
        (status = 401, description = "Missing user identity"),
        (status = 404, description = "No such deposit for this user")
    ),
    tag = "Deposits"
)]
pub async fn deposit_status(
    State(state): State<AppState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let not_found = || AppError::NotFound(format!("Deposit {} not found", id));
    let now = Utc::now();

    let mut deposit = state
        .repository
        .get_for_user(user_id, id)
        .await?
        .ok_or_else(not_found)?;

    if deposit.is_stale_at(now) {
        if state.repository.expire_if_stale(id, now).await? {
            tracing::info!(deposit_id = %id, "deposit expired on status check");
        }
        deposit = state
            .repository
            .get_for_user(user_id, id)
            .await?
            .ok_or_else(not_found)?;
    }

    let provider_status = match (&state.provider, &deposit.provider_transaction_id) {
        (Some(client), Some(transaction_id)) if deposit.status == DepositStatus::Pending => {
            match client.check_transaction_status(transaction_id).await {
                Ok(status) => {
                    tracing::debug!(deposit_id = %id, provider_status = ?status.status, "provider status polled");
                    status.status
                }
                Err(e) => {
                    tracing::warn!(deposit_id = %id, "provider status check failed: {}", e);
                    None
                }
            }
        }
        _ => None,
    };

    Ok(Json(DepositStatusResponse {
        is_expired: deposit.status == DepositStatus::Expired
            || (deposit.status == DepositStatus::Pending && deposit.is_expired_at(now)),
        deposit,
        provider_status,
    }))
}

#[utoipa::path(
    get,
    path = "/balance",
    params(("X-User-Id" = i64, Header, description = "Authenticated user id")),
    responses(
        (status = 200, description = "Balance and recent ledger entries", body = BalanceResponse),
        (status = 401, description = "Missing user identity"),
        (status = 404, description = "Unknown user")
    ),
    tag = "Deposits"
)]
pub async fn balance(
    State(state): State<AppState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
) -> Result<impl IntoResponse, AppError> {
    let balance = state
        .repository
        .get_balance(user_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("User {} not found", user_id)))?;
    let recent_transactions = state
        .repository
        .list_ledger(user_id, DEFAULT_PAGE_SIZE, 0)
        .await?;

    Ok(Json(BalanceResponse {
        user_id,
        balance,
        recent_transactions,
    }))
}

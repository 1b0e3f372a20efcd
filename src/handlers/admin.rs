use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use bigdecimal::BigDecimal;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::domain::DepositIntent;
use crate::error::AppError;
use crate::AppState;

const DEFAULT_ACTOR: &str = "admin";

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct ManualActionRequest {
    /// Recorded as `processed_by` on the ledger entry.
    pub actor: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ManualActionResponse {
    pub deposit: DepositIntent,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<String>)]
    pub new_balance: Option<BigDecimal>,
}

fn actor(payload: Option<Json<ManualActionRequest>>) -> String {
    payload
        .and_then(|Json(p)| p.actor)
        .filter(|a| !a.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_ACTOR.to_string())
}

#[utoipa::path(
    post,
    path = "/admin/auto-deposits/{id}/approve",
    params(("id" = Uuid, Path, description = "Deposit id")),
    request_body(content = Option<ManualActionRequest>),
    responses(
        (status = 200, description = "Deposit completed and balance credited", body = ManualActionResponse),
        (status = 401, description = "Invalid admin key"),
        (status = 404, description = "Deposit not found"),
        (status = 409, description = "Deposit is not pending")
    ),
    security(("admin_key" = [])),
    tag = "Admin"
)]
pub async fn approve_deposit(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    payload: Option<Json<ManualActionRequest>>,
) -> Result<impl IntoResponse, AppError> {
    let approved = state
        .manual
        .approve(id, &actor(payload), Utc::now())
        .await?;

    Ok(Json(ManualActionResponse {
        deposit: approved.intent,
        new_balance: Some(approved.new_balance),
    }))
}

#[utoipa::path(
    post,
    path = "/admin/auto-deposits/{id}/reject",
    params(("id" = Uuid, Path, description = "Deposit id")),
    request_body(content = Option<ManualActionRequest>),
    responses(
        (status = 200, description = "Deposit marked failed", body = ManualActionResponse),
        (status = 401, description = "Invalid admin key"),
        (status = 404, description = "Deposit not found"),
        (status = 409, description = "Deposit is not pending")
    ),
    security(("admin_key" = [])),
    tag = "Admin"
)]
pub async fn reject_deposit(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    payload: Option<Json<ManualActionRequest>>,
) -> Result<impl IntoResponse, AppError> {
    let deposit = state
        .manual
        .reject(id, &actor(payload), Utc::now())
        .await?;

    Ok(Json(ManualActionResponse {
        deposit,
        new_balance: None,
    }))
}

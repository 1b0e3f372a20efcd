//! Deposit domain entities.
//! Framework-agnostic representation of deposit intents, ledger rows and
//! the settled-payment events produced by webhook adapters.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;

use super::reference::ReferenceCode;

pub type UserId = i64;

/// Lifecycle state of a deposit intent.
///
/// `Pending` is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum DepositStatus {
    Pending,
    Completed,
    Expired,
    Failed,
}

impl DepositStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DepositStatus::Pending => "pending",
            DepositStatus::Completed => "completed",
            DepositStatus::Expired => "expired",
            DepositStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for DepositStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DepositStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DepositStatus::Pending),
            "completed" => Ok(DepositStatus::Completed),
            "expired" => Ok(DepositStatus::Expired),
            "failed" => Ok(DepositStatus::Failed),
            other => Err(format!("unknown deposit status '{}'", other)),
        }
    }
}

/// A user's request to add funds, awaiting external payment confirmation.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DepositIntent {
    pub id: Uuid,
    pub user_id: UserId,
    pub reference_code: String,
    #[schema(value_type = String, example = "100000.00")]
    pub amount: BigDecimal,
    pub target_bank_account: String,
    pub qr_url: Option<String>,
    pub provider_transaction_id: Option<String>,
    pub status: DepositStatus,
    pub external_transaction_id: Option<String>,
    #[serde(skip_serializing)]
    pub raw_webhook_payload: Option<serde_json::Value>,
    pub expires_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DepositIntent {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }

    /// Pending and past its window: the sweeper (or an inline status check)
    /// is allowed to move it to `expired`.
    pub fn is_stale_at(&self, now: DateTime<Utc>) -> bool {
        self.status == DepositStatus::Pending && self.is_expired_at(now)
    }
}

/// Everything needed to insert a fresh pending intent.
#[derive(Debug, Clone)]
pub struct NewDepositIntent {
    pub id: Uuid,
    pub user_id: UserId,
    pub reference_code: ReferenceCode,
    pub amount: BigDecimal,
    pub target_bank_account: String,
    pub qr_url: Option<String>,
    pub provider_transaction_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl NewDepositIntent {
    pub fn into_intent(self) -> DepositIntent {
        DepositIntent {
            id: self.id,
            user_id: self.user_id,
            reference_code: self.reference_code.into_string(),
            amount: self.amount,
            target_bank_account: self.target_bank_account,
            qr_url: self.qr_url,
            provider_transaction_id: self.provider_transaction_id,
            status: DepositStatus::Pending,
            external_transaction_id: None,
            raw_webhook_payload: None,
            expires_at: self.expires_at,
            completed_at: None,
            created_at: self.created_at,
            updated_at: self.created_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum LedgerEntryType {
    Deposit,
    Purchase,
    Refund,
}

impl LedgerEntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerEntryType::Deposit => "deposit",
            LedgerEntryType::Purchase => "purchase",
            LedgerEntryType::Refund => "refund",
        }
    }
}

impl FromStr for LedgerEntryType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deposit" => Ok(LedgerEntryType::Deposit),
            "purchase" => Ok(LedgerEntryType::Purchase),
            "refund" => Ok(LedgerEntryType::Refund),
            other => Err(format!("unknown ledger entry type '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum LedgerStatus {
    Pending,
    Completed,
    Failed,
    Cancelled,
}

impl LedgerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerStatus::Pending => "pending",
            LedgerStatus::Completed => "completed",
            LedgerStatus::Failed => "failed",
            LedgerStatus::Cancelled => "cancelled",
        }
    }
}

impl FromStr for LedgerStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(LedgerStatus::Pending),
            "completed" => Ok(LedgerStatus::Completed),
            "failed" => Ok(LedgerStatus::Failed),
            "cancelled" => Ok(LedgerStatus::Cancelled),
            other => Err(format!("unknown ledger status '{}'", other)),
        }
    }
}

/// Audit record of a balance change.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LedgerTransaction {
    pub id: Uuid,
    pub user_id: UserId,
    #[serde(rename = "type")]
    pub entry_type: LedgerEntryType,
    #[schema(value_type = String, example = "100000.00")]
    pub amount: BigDecimal,
    pub status: LedgerStatus,
    pub reference_code: Option<String>,
    pub description: Option<String>,
    pub processed_by: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Provider-independent shape of a settled incoming payment.
#[derive(Debug, Clone, PartialEq)]
pub struct SettledPaymentEvent {
    pub external_transaction_id: String,
    pub amount: BigDecimal,
    pub memo_text: String,
    pub status: String,
    pub raw_payload: serde_json::Value,
}

/// Input to the atomic settlement primitive shared by the reconciliation
/// engine and the manual admin override.
#[derive(Debug, Clone)]
pub struct SettlementRequest {
    pub intent_id: Uuid,
    pub external_transaction_id: String,
    pub raw_payload: Option<serde_json::Value>,
    pub processed_by: Option<String>,
    pub description: String,
    pub settled_at: DateTime<Utc>,
}

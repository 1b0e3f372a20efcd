//! Storage port for the deposit ledger.
//!
//! Every guarantee the reconciliation pipeline relies on lives behind this
//! trait: unique reference codes, unique external transaction ids, the
//! single-transaction settlement and the `status = 'pending'` precondition
//! on every transition. Adapters must enforce them in storage, not in
//! callers.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{
    DepositIntent, LedgerTransaction, NewDepositIntent, SettlementRequest, UserId,
};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("deposit rate limit reached for user {0}")]
    RateLimited(UserId),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Rolling-window ceiling re-checked at insert time.
#[derive(Debug, Clone, Copy)]
pub struct CreationWindow {
    pub since: DateTime<Utc>,
    pub max_per_window: i64,
}

/// Result of the atomic settlement primitive.
#[derive(Debug, Clone)]
pub enum SettlementResult {
    /// Intent completed, balance credited, ledger row written, all in one commit.
    Settled {
        intent: DepositIntent,
        ledger_entry: LedgerTransaction,
        new_balance: BigDecimal,
    },
    /// Another intent already holds this external transaction id.
    DuplicateExternalId,
    /// The intent left `pending` before this settlement could apply.
    NotPending,
}

#[async_trait]
pub trait DepositRepository: Send + Sync {
    async fn count_created_since(&self, user_id: UserId, since: DateTime<Utc>)
        -> RepositoryResult<i64>;

    /// Insert a pending intent unless the user already has
    /// `window.max_per_window` intents created since `window.since`.
    /// A duplicate reference code is reported as `Conflict`.
    async fn insert_pending(
        &self,
        intent: &NewDepositIntent,
        window: CreationWindow,
    ) -> RepositoryResult<DepositIntent>;

    /// Record the payment QR on an intent created without one.
    async fn attach_qr(
        &self,
        id: Uuid,
        qr_url: &str,
        provider_transaction_id: Option<&str>,
    ) -> RepositoryResult<DepositIntent>;

    /// Delete an intent that never got a QR. Only pending rows are removed;
    /// returns false when nothing was deleted.
    async fn discard_pending(&self, id: Uuid) -> RepositoryResult<bool>;

    async fn get_by_id(&self, id: Uuid) -> RepositoryResult<Option<DepositIntent>>;

    async fn get_for_user(&self, user_id: UserId, id: Uuid)
        -> RepositoryResult<Option<DepositIntent>>;

    async fn list_for_user(
        &self,
        user_id: UserId,
        limit: i64,
        offset: i64,
    ) -> RepositoryResult<Vec<DepositIntent>>;

    async fn find_by_external_id(&self, external_transaction_id: &str)
        -> RepositoryResult<Option<DepositIntent>>;

    async fn find_pending_by_reference(&self, reference_code: &str)
        -> RepositoryResult<Option<DepositIntent>>;

    /// pending -> completed, balance += intent.amount, ledger insert. One unit.
    async fn settle(&self, request: &SettlementRequest) -> RepositoryResult<SettlementResult>;

    /// pending -> failed. Returns false when the intent was no longer pending.
    async fn mark_failed(&self, id: Uuid, at: DateTime<Utc>) -> RepositoryResult<bool>;

    /// pending -> expired for one intent whose window has passed.
    async fn expire_if_stale(&self, id: Uuid, now: DateTime<Utc>) -> RepositoryResult<bool>;

    /// pending -> expired for every intent whose window has passed.
    async fn expire_stale(&self, now: DateTime<Utc>) -> RepositoryResult<u64>;

    async fn get_balance(&self, user_id: UserId) -> RepositoryResult<Option<BigDecimal>>;

    async fn list_ledger(
        &self,
        user_id: UserId,
        limit: i64,
        offset: i64,
    ) -> RepositoryResult<Vec<LedgerTransaction>>;
}

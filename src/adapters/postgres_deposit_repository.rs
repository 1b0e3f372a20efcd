//! Postgres implementation of DepositRepository.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::{
    DepositIntent, LedgerEntryType, LedgerStatus, LedgerTransaction, NewDepositIntent,
    SettlementRequest, UserId,
};
use crate::ports::{
    CreationWindow, DepositRepository, RepositoryError, RepositoryResult, SettlementResult,
};

const INTENT_COLUMNS: &str = "id, user_id, reference_code, amount, target_bank_account, qr_url, \
     provider_transaction_id, status, external_transaction_id, raw_webhook_payload, \
     expires_at, completed_at, created_at, updated_at";

const LEDGER_COLUMNS: &str = "id, user_id, type, amount, status, reference_code, description, \
     processed_by, processed_at, created_at";

/// Postgres-backed deposit ledger.
#[derive(Clone)]
pub struct PostgresDepositRepository {
    pool: PgPool,
}

impl PostgresDepositRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DepositRepository for PostgresDepositRepository {
    async fn count_created_since(
        &self,
        user_id: UserId,
        since: DateTime<Utc>,
    ) -> RepositoryResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM deposit_intents WHERE user_id = $1 AND created_at >= $2",
        )
        .bind(user_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    async fn insert_pending(
        &self,
        intent: &NewDepositIntent,
        window: CreationWindow,
    ) -> RepositoryResult<DepositIntent> {
        let mut tx = self.pool.begin().await?;

        // Serialises concurrent creations for one user so the count below
        // cannot be raced past the ceiling.
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(intent.user_id)
            .execute(&mut *tx)
            .await?;

        let recent: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM deposit_intents WHERE user_id = $1 AND created_at >= $2",
        )
        .bind(intent.user_id)
        .bind(window.since)
        .fetch_one(&mut *tx)
        .await?;

        if recent >= window.max_per_window {
            tx.rollback().await?;
            return Err(RepositoryError::RateLimited(intent.user_id));
        }

        let sql = format!(
            r#"
            INSERT INTO deposit_intents (
                id, user_id, reference_code, amount, target_bank_account, qr_url,
                provider_transaction_id, status, expires_at, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, 'pending', $8, $9, $9)
            RETURNING {INTENT_COLUMNS}
            "#
        );

        let row = sqlx::query_as::<_, DepositIntentRow>(&sql)
            .bind(intent.id)
            .bind(intent.user_id)
            .bind(intent.reference_code.as_str())
            .bind(&intent.amount)
            .bind(&intent.target_bank_account)
            .bind(&intent.qr_url)
            .bind(&intent.provider_transaction_id)
            .bind(intent.expires_at)
            .bind(intent.created_at)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    RepositoryError::Conflict(format!(
                        "reference code {} already exists",
                        intent.reference_code
                    ))
                } else {
                    RepositoryError::from(e)
                }
            })?;

        tx.commit().await?;
        row.into_domain()
    }

    async fn attach_qr(
        &self,
        id: Uuid,
        qr_url: &str,
        provider_transaction_id: Option<&str>,
    ) -> RepositoryResult<DepositIntent> {
        let sql = format!(
            "UPDATE deposit_intents SET qr_url = $2, provider_transaction_id = $3, updated_at = NOW() \
             WHERE id = $1 RETURNING {INTENT_COLUMNS}"
        );
        let row = sqlx::query_as::<_, DepositIntentRow>(&sql)
            .bind(id)
            .bind(qr_url)
            .bind(provider_transaction_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| RepositoryError::NotFound(format!("deposit {}", id)))?;

        row.into_domain()
    }

    async fn discard_pending(&self, id: Uuid) -> RepositoryResult<bool> {
        let result = sqlx::query("DELETE FROM deposit_intents WHERE id = $1 AND status = 'pending'")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn get_by_id(&self, id: Uuid) -> RepositoryResult<Option<DepositIntent>> {
        let sql = format!("SELECT {INTENT_COLUMNS} FROM deposit_intents WHERE id = $1");
        let row = sqlx::query_as::<_, DepositIntentRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(DepositIntentRow::into_domain).transpose()
    }

    async fn get_for_user(
        &self,
        user_id: UserId,
        id: Uuid,
    ) -> RepositoryResult<Option<DepositIntent>> {
        let sql = format!(
            "SELECT {INTENT_COLUMNS} FROM deposit_intents WHERE id = $1 AND user_id = $2"
        );
        let row = sqlx::query_as::<_, DepositIntentRow>(&sql)
            .bind(id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(DepositIntentRow::into_domain).transpose()
    }

    async fn list_for_user(
        &self,
        user_id: UserId,
        limit: i64,
        offset: i64,
    ) -> RepositoryResult<Vec<DepositIntent>> {
        let sql = format!(
            "SELECT {INTENT_COLUMNS} FROM deposit_intents WHERE user_id = $1 \
             ORDER BY created_at DESC LIMIT $2 OFFSET $3"
        );
        let rows = sqlx::query_as::<_, DepositIntentRow>(&sql)
            .bind(user_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(DepositIntentRow::into_domain).collect()
    }

    async fn find_by_external_id(
        &self,
        external_transaction_id: &str,
    ) -> RepositoryResult<Option<DepositIntent>> {
        let sql = format!(
            "SELECT {INTENT_COLUMNS} FROM deposit_intents WHERE external_transaction_id = $1"
        );
        let row = sqlx::query_as::<_, DepositIntentRow>(&sql)
            .bind(external_transaction_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(DepositIntentRow::into_domain).transpose()
    }

    async fn find_pending_by_reference(
        &self,
        reference_code: &str,
    ) -> RepositoryResult<Option<DepositIntent>> {
        let sql = format!(
            "SELECT {INTENT_COLUMNS} FROM deposit_intents \
             WHERE reference_code = $1 AND status = 'pending'"
        );
        let row = sqlx::query_as::<_, DepositIntentRow>(&sql)
            .bind(reference_code)
            .fetch_optional(&self.pool)
            .await?;

        row.map(DepositIntentRow::into_domain).transpose()
    }

    async fn settle(&self, request: &SettlementRequest) -> RepositoryResult<SettlementResult> {
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            r#"
            UPDATE deposit_intents
            SET status = 'completed',
                external_transaction_id = $2,
                raw_webhook_payload = $3,
                completed_at = $4,
                updated_at = $4
            WHERE id = $1 AND status = 'pending'
            RETURNING {INTENT_COLUMNS}
            "#
        );

        let updated = sqlx::query_as::<_, DepositIntentRow>(&sql)
            .bind(request.intent_id)
            .bind(&request.external_transaction_id)
            .bind(&request.raw_payload)
            .bind(request.settled_at)
            .fetch_optional(&mut *tx)
            .await;

        let row = match updated {
            Ok(Some(row)) => row,
            Ok(None) => {
                tx.rollback().await?;
                // A concurrent delivery of the same event that won the row
                // lock shows up here as "not pending" once it has committed.
                let holder = self
                    .find_by_external_id(&request.external_transaction_id)
                    .await?;
                return Ok(match holder {
                    Some(_) => SettlementResult::DuplicateExternalId,
                    None => SettlementResult::NotPending,
                });
            }
            Err(e) if is_unique_violation(&e) => {
                tx.rollback().await?;
                return Ok(SettlementResult::DuplicateExternalId);
            }
            Err(e) => return Err(e.into()),
        };

        let new_balance: BigDecimal = sqlx::query_scalar(
            "UPDATE users SET balance = balance + $2, updated_at = NOW() WHERE id = $1 RETURNING balance",
        )
        .bind(row.user_id)
        .bind(&row.amount)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| RepositoryError::NotFound(format!("user {}", row.user_id)))?;

        let sql = format!(
            r#"
            INSERT INTO ledger_transactions (
                id, user_id, type, amount, status, reference_code, description,
                processed_by, processed_at, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $9)
            RETURNING {LEDGER_COLUMNS}
            "#
        );

        let ledger_row = sqlx::query_as::<_, LedgerRow>(&sql)
            .bind(Uuid::new_v4())
            .bind(row.user_id)
            .bind(LedgerEntryType::Deposit.as_str())
            .bind(&row.amount)
            .bind(LedgerStatus::Completed.as_str())
            .bind(&row.reference_code)
            .bind(&request.description)
            .bind(&request.processed_by)
            .bind(request.settled_at)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(SettlementResult::Settled {
            intent: row.into_domain()?,
            ledger_entry: ledger_row.into_domain()?,
            new_balance,
        })
    }

    async fn mark_failed(&self, id: Uuid, at: DateTime<Utc>) -> RepositoryResult<bool> {
        let result = sqlx::query(
            "UPDATE deposit_intents SET status = 'failed', updated_at = $2 \
             WHERE id = $1 AND status = 'pending'",
        )
        .bind(id)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn expire_if_stale(&self, id: Uuid, now: DateTime<Utc>) -> RepositoryResult<bool> {
        let result = sqlx::query(
            "UPDATE deposit_intents SET status = 'expired', updated_at = $2 \
             WHERE id = $1 AND status = 'pending' AND expires_at < $2",
        )
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn expire_stale(&self, now: DateTime<Utc>) -> RepositoryResult<u64> {
        let result = sqlx::query(
            "UPDATE deposit_intents SET status = 'expired', updated_at = $1 \
             WHERE status = 'pending' AND expires_at < $1",
        )
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn get_balance(&self, user_id: UserId) -> RepositoryResult<Option<BigDecimal>> {
        let balance: Option<BigDecimal> = sqlx::query_scalar("SELECT balance FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(balance)
    }

    async fn list_ledger(
        &self,
        user_id: UserId,
        limit: i64,
        offset: i64,
    ) -> RepositoryResult<Vec<LedgerTransaction>> {
        let sql = format!(
            "SELECT {LEDGER_COLUMNS} FROM ledger_transactions WHERE user_id = $1 \
             ORDER BY created_at DESC LIMIT $2 OFFSET $3"
        );
        let rows = sqlx::query_as::<_, LedgerRow>(&sql)
            .bind(user_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(LedgerRow::into_domain).collect()
    }
}

fn is_unique_violation(error: &sqlx::Error) -> bool {
    error
        .as_database_error()
        .and_then(|db| db.code())
        .map(|code| code == "23505")
        .unwrap_or(false)
}

fn decode_error(message: String) -> RepositoryError {
    RepositoryError::Database(sqlx::Error::Decode(message.into()))
}

/// Internal row type for SQLx. Not exposed outside the adapter.
#[derive(Debug, sqlx::FromRow)]
struct DepositIntentRow {
    id: Uuid,
    user_id: i64,
    reference_code: String,
    amount: BigDecimal,
    target_bank_account: String,
    qr_url: Option<String>,
    provider_transaction_id: Option<String>,
    status: String,
    external_transaction_id: Option<String>,
    raw_webhook_payload: Option<serde_json::Value>,
    expires_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl DepositIntentRow {
    fn into_domain(self) -> RepositoryResult<DepositIntent> {
        Ok(DepositIntent {
            id: self.id,
            user_id: self.user_id,
            reference_code: self.reference_code,
            amount: self.amount,
            target_bank_account: self.target_bank_account,
            qr_url: self.qr_url,
            provider_transaction_id: self.provider_transaction_id,
            status: self.status.parse().map_err(decode_error)?,
            external_transaction_id: self.external_transaction_id,
            raw_webhook_payload: self.raw_webhook_payload,
            expires_at: self.expires_at,
            completed_at: self.completed_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct LedgerRow {
    id: Uuid,
    user_id: i64,
    #[sqlx(rename = "type")]
    entry_type: String,
    amount: BigDecimal,
    status: String,
    reference_code: Option<String>,
    description: Option<String>,
    processed_by: Option<String>,
    processed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl LedgerRow {
    fn into_domain(self) -> RepositoryResult<LedgerTransaction> {
        Ok(LedgerTransaction {
            id: self.id,
            user_id: self.user_id,
            entry_type: self.entry_type.parse().map_err(decode_error)?,
            amount: self.amount,
            status: self.status.parse().map_err(decode_error)?,
            reference_code: self.reference_code,
            description: self.description,
            processed_by: self.processed_by,
            processed_at: self.processed_at,
            created_at: self.created_at,
        })
    }
}

//! In-process implementation of DepositRepository.
//!
//! All state sits behind one async mutex, which gives every operation the
//! same all-or-nothing behaviour the Postgres adapter gets from a database
//! transaction. Used by the test suite and for running the router without a
//! database.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::{
    DepositIntent, DepositStatus, LedgerEntryType, LedgerStatus, LedgerTransaction,
    NewDepositIntent, SettlementRequest, UserId,
};
use crate::ports::{
    CreationWindow, DepositRepository, RepositoryError, RepositoryResult, SettlementResult,
};

#[derive(Default)]
struct State {
    intents: HashMap<Uuid, DepositIntent>,
    by_reference: HashMap<String, Uuid>,
    by_external_id: HashMap<String, Uuid>,
    balances: HashMap<UserId, BigDecimal>,
    ledger: Vec<LedgerTransaction>,
}

#[derive(Default)]
pub struct InMemoryDepositRepository {
    state: Mutex<State>,
}

impl InMemoryDepositRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user with an opening balance. Settlement for unknown users
    /// fails the same way a missing `users` row does in Postgres.
    pub async fn add_user(&self, user_id: UserId, balance: BigDecimal) {
        self.state.lock().await.balances.insert(user_id, balance);
    }

    pub async fn ledger_entries(&self) -> Vec<LedgerTransaction> {
        self.state.lock().await.ledger.clone()
    }

    pub async fn intent_count(&self) -> usize {
        self.state.lock().await.intents.len()
    }

    /// Move an intent's creation time, for exercising the rolling window and
    /// expiry without sleeping.
    pub async fn backdate(&self, id: Uuid, created_at: DateTime<Utc>, expires_at: DateTime<Utc>) {
        if let Some(intent) = self.state.lock().await.intents.get_mut(&id) {
            intent.created_at = created_at;
            intent.expires_at = expires_at;
        }
    }
}

fn count_since(state: &State, user_id: UserId, since: DateTime<Utc>) -> i64 {
    state
        .intents
        .values()
        .filter(|i| i.user_id == user_id && i.created_at >= since)
        .count() as i64
}

#[async_trait]
impl DepositRepository for InMemoryDepositRepository {
    async fn count_created_since(
        &self,
        user_id: UserId,
        since: DateTime<Utc>,
    ) -> RepositoryResult<i64> {
        let state = self.state.lock().await;
        Ok(count_since(&state, user_id, since))
    }

    async fn insert_pending(
        &self,
        intent: &NewDepositIntent,
        window: CreationWindow,
    ) -> RepositoryResult<DepositIntent> {
        let mut state = self.state.lock().await;

        if count_since(&state, intent.user_id, window.since) >= window.max_per_window {
            return Err(RepositoryError::RateLimited(intent.user_id));
        }
        if state.by_reference.contains_key(intent.reference_code.as_str()) {
            return Err(RepositoryError::Conflict(format!(
                "reference code {} already exists",
                intent.reference_code
            )));
        }

        let stored = intent.clone().into_intent();
        state
            .by_reference
            .insert(stored.reference_code.clone(), stored.id);
        state.intents.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn attach_qr(
        &self,
        id: Uuid,
        qr_url: &str,
        provider_transaction_id: Option<&str>,
    ) -> RepositoryResult<DepositIntent> {
        let mut state = self.state.lock().await;
        let intent = state
            .intents
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(format!("deposit {}", id)))?;
        intent.qr_url = Some(qr_url.to_string());
        intent.provider_transaction_id = provider_transaction_id.map(str::to_string);
        intent.updated_at = Utc::now();
        Ok(intent.clone())
    }

    async fn discard_pending(&self, id: Uuid) -> RepositoryResult<bool> {
        let mut state = self.state.lock().await;
        match state.intents.get(&id) {
            Some(intent) if intent.status == DepositStatus::Pending => {
                let reference = intent.reference_code.clone();
                state.intents.remove(&id);
                state.by_reference.remove(&reference);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get_by_id(&self, id: Uuid) -> RepositoryResult<Option<DepositIntent>> {
        Ok(self.state.lock().await.intents.get(&id).cloned())
    }

    async fn get_for_user(
        &self,
        user_id: UserId,
        id: Uuid,
    ) -> RepositoryResult<Option<DepositIntent>> {
        let state = self.state.lock().await;
        Ok(state
            .intents
            .get(&id)
            .filter(|i| i.user_id == user_id)
            .cloned())
    }

    async fn list_for_user(
        &self,
        user_id: UserId,
        limit: i64,
        offset: i64,
    ) -> RepositoryResult<Vec<DepositIntent>> {
        let state = self.state.lock().await;
        let mut intents: Vec<DepositIntent> = state
            .intents
            .values()
            .filter(|i| i.user_id == user_id)
            .cloned()
            .collect();
        intents.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(intents
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn find_by_external_id(
        &self,
        external_transaction_id: &str,
    ) -> RepositoryResult<Option<DepositIntent>> {
        let state = self.state.lock().await;
        Ok(state
            .by_external_id
            .get(external_transaction_id)
            .and_then(|id| state.intents.get(id))
            .cloned())
    }

    async fn find_pending_by_reference(
        &self,
        reference_code: &str,
    ) -> RepositoryResult<Option<DepositIntent>> {
        let state = self.state.lock().await;
        Ok(state
            .by_reference
            .get(reference_code)
            .and_then(|id| state.intents.get(id))
            .filter(|i| i.status == DepositStatus::Pending)
            .cloned())
    }

    async fn settle(&self, request: &SettlementRequest) -> RepositoryResult<SettlementResult> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        if state
            .by_external_id
            .contains_key(&request.external_transaction_id)
        {
            return Ok(SettlementResult::DuplicateExternalId);
        }

        let intent = state
            .intents
            .get(&request.intent_id)
            .ok_or_else(|| RepositoryError::NotFound(format!("deposit {}", request.intent_id)))?;
        if intent.status != DepositStatus::Pending {
            return Ok(SettlementResult::NotPending);
        }
        if !state.balances.contains_key(&intent.user_id) {
            return Err(RepositoryError::NotFound(format!("user {}", intent.user_id)));
        }

        // Every precondition is checked above; nothing below can fail.
        let mut settled = intent.clone();
        settled.status = DepositStatus::Completed;
        settled.external_transaction_id = Some(request.external_transaction_id.clone());
        settled.raw_webhook_payload = request.raw_payload.clone();
        settled.completed_at = Some(request.settled_at);
        settled.updated_at = request.settled_at;

        let balance = state
            .balances
            .entry(settled.user_id)
            .or_insert_with(|| BigDecimal::from(0));
        *balance += &settled.amount;
        let new_balance = balance.clone();

        let ledger_entry = LedgerTransaction {
            id: Uuid::new_v4(),
            user_id: settled.user_id,
            entry_type: LedgerEntryType::Deposit,
            amount: settled.amount.clone(),
            status: LedgerStatus::Completed,
            reference_code: Some(settled.reference_code.clone()),
            description: Some(request.description.clone()),
            processed_by: request.processed_by.clone(),
            processed_at: Some(request.settled_at),
            created_at: request.settled_at,
        };

        state
            .by_external_id
            .insert(request.external_transaction_id.clone(), settled.id);
        state.intents.insert(settled.id, settled.clone());
        state.ledger.push(ledger_entry.clone());

        Ok(SettlementResult::Settled {
            intent: settled,
            ledger_entry,
            new_balance,
        })
    }

    async fn mark_failed(&self, id: Uuid, at: DateTime<Utc>) -> RepositoryResult<bool> {
        let mut state = self.state.lock().await;
        match state.intents.get_mut(&id) {
            Some(intent) if intent.status == DepositStatus::Pending => {
                intent.status = DepositStatus::Failed;
                intent.updated_at = at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn expire_if_stale(&self, id: Uuid, now: DateTime<Utc>) -> RepositoryResult<bool> {
        let mut state = self.state.lock().await;
        match state.intents.get_mut(&id) {
            Some(intent) if intent.is_stale_at(now) => {
                intent.status = DepositStatus::Expired;
                intent.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn expire_stale(&self, now: DateTime<Utc>) -> RepositoryResult<u64> {
        let mut state = self.state.lock().await;
        let mut expired = 0;
        for intent in state.intents.values_mut().filter(|i| i.is_stale_at(now)) {
            intent.status = DepositStatus::Expired;
            intent.updated_at = now;
            expired += 1;
        }
        Ok(expired)
    }

    async fn get_balance(&self, user_id: UserId) -> RepositoryResult<Option<BigDecimal>> {
        Ok(self.state.lock().await.balances.get(&user_id).cloned())
    }

    async fn list_ledger(
        &self,
        user_id: UserId,
        limit: i64,
        offset: i64,
    ) -> RepositoryResult<Vec<LedgerTransaction>> {
        let state = self.state.lock().await;
        Ok(state
            .ledger
            .iter()
            .rev()
            .filter(|e| e.user_id == user_id)
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }
}

//! Reconcile payment use case.
//! Matches a settled incoming payment to a pending deposit intent and
//! credits the user exactly once.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::{ReferenceCode, SettledPaymentEvent, SettlementRequest, UserId};
use crate::ports::{DepositRepository, RepositoryResult, SettlementResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoMatchReason {
    /// The memo carries no reference code.
    NoReference,
    /// No pending intent holds the extracted reference code.
    NoPendingDeposit,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    /// The external transaction was already applied; nothing changed.
    AlreadyProcessed,
    Credited {
        deposit_id: Uuid,
        user_id: UserId,
        reference_code: String,
        amount: BigDecimal,
        new_balance: BigDecimal,
    },
    NoMatch(NoMatchReason),
    /// The paid amount is outside the tolerance; the intent stays pending.
    AmountMismatch {
        reference_code: String,
        expected: BigDecimal,
        received: BigDecimal,
    },
}

/// Use case for applying settled payment events.
pub struct ReconcilePayment {
    repository: Arc<dyn DepositRepository>,
    amount_tolerance: BigDecimal,
}

impl ReconcilePayment {
    pub fn new(repository: Arc<dyn DepositRepository>, amount_tolerance: BigDecimal) -> Self {
        Self {
            repository,
            amount_tolerance,
        }
    }

    pub async fn execute(
        &self,
        event: SettledPaymentEvent,
        now: DateTime<Utc>,
    ) -> RepositoryResult<ReconcileOutcome> {
        let external_id = event.external_transaction_id.as_str();

        if let Some(existing) = self.repository.find_by_external_id(external_id).await? {
            tracing::info!(
                external_transaction_id = %external_id,
                deposit_id = %existing.id,
                "payment already processed"
            );
            return Ok(ReconcileOutcome::AlreadyProcessed);
        }

        let Some(reference) = ReferenceCode::extract(&event.memo_text) else {
            tracing::warn!(
                external_transaction_id = %external_id,
                memo = %event.memo_text,
                "no reference code in payment memo"
            );
            return Ok(ReconcileOutcome::NoMatch(NoMatchReason::NoReference));
        };

        let Some(intent) = self
            .repository
            .find_pending_by_reference(reference.as_str())
            .await?
        else {
            tracing::warn!(
                external_transaction_id = %external_id,
                reference_code = %reference,
                "no pending deposit for reference"
            );
            return Ok(ReconcileOutcome::NoMatch(NoMatchReason::NoPendingDeposit));
        };

        let difference = (&event.amount - &intent.amount).abs();
        if difference > self.amount_tolerance {
            tracing::warn!(
                deposit_id = %intent.id,
                reference_code = %intent.reference_code,
                expected = %intent.amount,
                received = %event.amount,
                "payment amount outside tolerance"
            );
            return Ok(ReconcileOutcome::AmountMismatch {
                reference_code: intent.reference_code,
                expected: intent.amount,
                received: event.amount,
            });
        }

        let request = SettlementRequest {
            intent_id: intent.id,
            external_transaction_id: event.external_transaction_id.clone(),
            raw_payload: Some(event.raw_payload),
            processed_by: None,
            description: format!(
                "Auto deposit {} (bank transaction {})",
                intent.reference_code, event.external_transaction_id
            ),
            settled_at: now,
        };

        match self.repository.settle(&request).await? {
            SettlementResult::Settled {
                intent,
                new_balance,
                ..
            } => {
                tracing::info!(
                    deposit_id = %intent.id,
                    user_id = intent.user_id,
                    reference_code = %intent.reference_code,
                    amount = %intent.amount,
                    received = %event.amount,
                    external_transaction_id = %request.external_transaction_id,
                    "deposit credited"
                );
                Ok(ReconcileOutcome::Credited {
                    deposit_id: intent.id,
                    user_id: intent.user_id,
                    reference_code: intent.reference_code,
                    amount: intent.amount,
                    new_balance,
                })
            }
            SettlementResult::DuplicateExternalId => {
                tracing::info!(
                    external_transaction_id = %request.external_transaction_id,
                    "payment processed concurrently"
                );
                Ok(ReconcileOutcome::AlreadyProcessed)
            }
            SettlementResult::NotPending => {
                tracing::warn!(
                    deposit_id = %request.intent_id,
                    "deposit left pending before settlement"
                );
                Ok(ReconcileOutcome::NoMatch(NoMatchReason::NoPendingDeposit))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DepositStatus, NewDepositIntent};
    use crate::adapters::InMemoryDepositRepository;
    use crate::ports::CreationWindow;
    use chrono::Duration;
    use serde_json::json;

    async fn setup(amount: i64) -> (Arc<InMemoryDepositRepository>, ReconcilePayment, Uuid) {
        let repo = Arc::new(InMemoryDepositRepository::new());
        repo.add_user(42, BigDecimal::from(0)).await;
        let now = Utc::now();
        let id = Uuid::new_v4();
        let intent = NewDepositIntent {
            id,
            user_id: 42,
            reference_code: ReferenceCode::parse("NAP42T1700000000R1234").unwrap(),
            amount: BigDecimal::from(amount),
            target_bank_account: "1234567890".to_string(),
            qr_url: None,
            provider_transaction_id: None,
            created_at: now,
            expires_at: now + Duration::minutes(15),
        };
        let window = CreationWindow { since: now - Duration::hours(1), max_per_window: 5 };
        repo.insert_pending(&intent, window).await.unwrap();
        let use_case = ReconcilePayment::new(repo.clone(), BigDecimal::from(2000));
        (repo, use_case, id)
    }

    fn event(external_id: &str, amount: i64, memo: &str) -> SettledPaymentEvent {
        SettledPaymentEvent {
            external_transaction_id: external_id.to_string(),
            amount: BigDecimal::from(amount),
            memo_text: memo.to_string(),
            status: "success".to_string(),
            raw_payload: json!({"id": external_id}),
        }
    }

    #[tokio::test]
    async fn test_credits_intended_amount_within_tolerance() {
        let (repo, use_case, id) = setup(100_000).await;

        let outcome = use_case
            .execute(event("TXN1", 99_500, "chuyen tien NAP42T1700000000R1234"), Utc::now())
            .await
            .unwrap();

        match outcome {
            ReconcileOutcome::Credited { deposit_id, amount, new_balance, .. } => {
                assert_eq!(deposit_id, id);
                assert_eq!(amount, BigDecimal::from(100_000));
                assert_eq!(new_balance, BigDecimal::from(100_000));
            }
            other => panic!("expected credit, got {:?}", other),
        }

        let stored = repo.get_by_id(id).await.unwrap().unwrap();
        assert_eq!(stored.status, DepositStatus::Completed);
        assert_eq!(stored.external_transaction_id.as_deref(), Some("TXN1"));
    }

    #[tokio::test]
    async fn test_memo_without_reference() {
        let (_, use_case, _) = setup(100_000).await;
        let outcome = use_case
            .execute(event("TXN1", 100_000, "tien nha thang 10"), Utc::now())
            .await
            .unwrap();
        assert_eq!(outcome, ReconcileOutcome::NoMatch(NoMatchReason::NoReference));
    }

    #[tokio::test]
    async fn test_unknown_reference() {
        let (_, use_case, _) = setup(100_000).await;
        let outcome = use_case
            .execute(event("TXN1", 100_000, "NAP42T1700000000R9999"), Utc::now())
            .await
            .unwrap();
        assert_eq!(outcome, ReconcileOutcome::NoMatch(NoMatchReason::NoPendingDeposit));
    }

    #[tokio::test]
    async fn test_mismatch_leaves_intent_pending() {
        let (repo, use_case, id) = setup(100_000).await;
        let outcome = use_case
            .execute(event("TXN1", 50_000, "NAP42T1700000000R1234"), Utc::now())
            .await
            .unwrap();

        assert!(matches!(outcome, ReconcileOutcome::AmountMismatch { .. }));
        assert_eq!(repo.get_by_id(id).await.unwrap().unwrap().status, DepositStatus::Pending);
        assert_eq!(repo.get_balance(42).await.unwrap(), Some(BigDecimal::from(0)));
    }
}

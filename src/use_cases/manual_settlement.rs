//! Manual settlement use case.
//! Lets an operator complete or fail a pending deposit when the automatic
//! match did not happen, through the same settlement primitive webhooks use.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{DepositIntent, DepositStatus, SettlementRequest};
use crate::ports::{DepositRepository, RepositoryError, SettlementResult};

pub const MANUAL_EXTERNAL_ID_PREFIX: &str = "MANUAL-";

#[derive(Debug, Error)]
pub enum ManualSettlementError {
    #[error("deposit {0} not found")]
    NotFound(Uuid),
    #[error("deposit {id} is {status}, only pending deposits can be changed")]
    NotPending { id: Uuid, status: DepositStatus },
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

#[derive(Debug, Clone)]
pub struct ApprovedDeposit {
    pub intent: DepositIntent,
    pub new_balance: BigDecimal,
}

/// Use case for operator overrides.
pub struct ManualSettlement {
    repository: Arc<dyn DepositRepository>,
}

impl ManualSettlement {
    pub fn new(repository: Arc<dyn DepositRepository>) -> Self {
        Self { repository }
    }

    /// Complete a pending deposit and credit its intended amount.
    pub async fn approve(
        &self,
        id: Uuid,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<ApprovedDeposit, ManualSettlementError> {
        let intent = self.pending_intent(id).await?;

        let request = SettlementRequest {
            intent_id: intent.id,
            external_transaction_id: format!("{}{}", MANUAL_EXTERNAL_ID_PREFIX, intent.id),
            raw_payload: None,
            processed_by: Some(actor.to_string()),
            description: format!("Manual deposit approval {}", intent.reference_code),
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
                    amount = %intent.amount,
                    actor,
                    "deposit approved manually"
                );
                Ok(ApprovedDeposit { intent, new_balance })
            }
            SettlementResult::DuplicateExternalId | SettlementResult::NotPending => {
                Err(self.not_pending(id).await)
            }
        }
    }

    /// Fail a pending deposit. No balance effect.
    pub async fn reject(
        &self,
        id: Uuid,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<DepositIntent, ManualSettlementError> {
        if !self.repository.mark_failed(id, now).await? {
            return Err(self.not_pending(id).await);
        }

        let intent = self
            .repository
            .get_by_id(id)
            .await?
            .ok_or(ManualSettlementError::NotFound(id))?;
        tracing::info!(deposit_id = %id, actor, "deposit rejected manually");
        Ok(intent)
    }

    async fn pending_intent(&self, id: Uuid) -> Result<DepositIntent, ManualSettlementError> {
        let intent = self
            .repository
            .get_by_id(id)
            .await?
            .ok_or(ManualSettlementError::NotFound(id))?;
        if intent.status != DepositStatus::Pending {
            return Err(ManualSettlementError::NotPending {
                id,
                status: intent.status,
            });
        }
        Ok(intent)
    }

    async fn not_pending(&self, id: Uuid) -> ManualSettlementError {
        match self.repository.get_by_id(id).await {
            Ok(Some(intent)) => ManualSettlementError::NotPending {
                id,
                status: intent.status,
            },
            Ok(None) => ManualSettlementError::NotFound(id),
            Err(e) => ManualSettlementError::Repository(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryDepositRepository;
    use crate::domain::{NewDepositIntent, ReferenceCode};
    use crate::ports::CreationWindow;
    use chrono::Duration;

    async fn setup() -> (Arc<InMemoryDepositRepository>, ManualSettlement, Uuid) {
        let repo = Arc::new(InMemoryDepositRepository::new());
        repo.add_user(7, BigDecimal::from(1_000)).await;
        let now = Utc::now();
        let id = Uuid::new_v4();
        let intent = NewDepositIntent {
            id,
            user_id: 7,
            reference_code: ReferenceCode::parse("NAP7T1700000000R4321").unwrap(),
            amount: BigDecimal::from(200_000),
            target_bank_account: "1234567890".to_string(),
            qr_url: None,
            provider_transaction_id: None,
            created_at: now,
            expires_at: now + Duration::minutes(15),
        };
        let window = CreationWindow { since: now - Duration::hours(1), max_per_window: 5 };
        repo.insert_pending(&intent, window).await.unwrap();
        (repo.clone(), ManualSettlement::new(repo), id)
    }

    #[tokio::test]
    async fn test_approve_credits_and_records_actor() {
        let (repo, use_case, id) = setup().await;

        let approved = use_case.approve(id, "admin@shop", Utc::now()).await.unwrap();

        assert_eq!(approved.intent.status, DepositStatus::Completed);
        assert_eq!(
            approved.intent.external_transaction_id,
            Some(format!("MANUAL-{}", id))
        );
        assert_eq!(approved.new_balance, BigDecimal::from(201_000));

        let ledger = repo.ledger_entries().await;
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger[0].processed_by.as_deref(), Some("admin@shop"));
    }

    #[tokio::test]
    async fn test_second_approval_is_rejected() {
        let (repo, use_case, id) = setup().await;
        use_case.approve(id, "admin", Utc::now()).await.unwrap();

        let again = use_case.approve(id, "admin", Utc::now()).await;
        assert!(matches!(
            again,
            Err(ManualSettlementError::NotPending { status: DepositStatus::Completed, .. })
        ));
        assert_eq!(repo.get_balance(7).await.unwrap(), Some(BigDecimal::from(201_000)));
    }

    #[tokio::test]
    async fn test_reject_fails_without_credit() {
        let (repo, use_case, id) = setup().await;

        let rejected = use_case.reject(id, "admin", Utc::now()).await.unwrap();
        assert_eq!(rejected.status, DepositStatus::Failed);
        assert_eq!(repo.get_balance(7).await.unwrap(), Some(BigDecimal::from(1_000)));

        assert!(matches!(
            use_case.approve(id, "admin", Utc::now()).await,
            Err(ManualSettlementError::NotPending { .. })
        ));
    }

    #[tokio::test]
    async fn test_unknown_deposit() {
        let (_, use_case, _) = setup().await;
        let missing = Uuid::new_v4();
        assert!(matches!(
            use_case.reject(missing, "admin", Utc::now()).await,
            Err(ManualSettlementError::NotFound(id)) if id == missing
        ));
    }
}

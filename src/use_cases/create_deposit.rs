//! Create deposit use case.
//! Validates the amount, applies the hourly ceiling, persists a pending
//! intent with a fresh reference code and attaches its payment QR.

use bigdecimal::{BigDecimal, Zero};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::config::DepositPolicy;
use crate::domain::{DepositIntent, NewDepositIntent, ReferenceCode, UserId};
use crate::payments::{QrBuilder, QrError};
use crate::ports::{CreationWindow, DepositRepository, RepositoryError};
use crate::services::{RateDecision, RateLimiter};

const MAX_REFERENCE_ATTEMPTS: usize = 3;
const MAX_AMOUNT_SCALE: i64 = 2;

#[derive(Debug, Error)]
pub enum CreateDepositError {
    #[error("{0}")]
    InvalidAmount(String),
    #[error("Too many deposit requests in the last hour, please try again later")]
    RateLimited,
    #[error("QR generation failed: {0}")]
    Qr(#[from] QrError),
    #[error("could not allocate a unique reference code")]
    ReferenceExhausted,
    #[error(transparent)]
    Repository(RepositoryError),
}

impl From<RepositoryError> for CreateDepositError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::RateLimited(_) => CreateDepositError::RateLimited,
            other => CreateDepositError::Repository(other),
        }
    }
}

/// Use case for opening a deposit intent.
pub struct CreateDeposit {
    repository: Arc<dyn DepositRepository>,
    rate_limiter: RateLimiter,
    qr_builder: QrBuilder,
    bank_account: String,
    policy: DepositPolicy,
}

impl CreateDeposit {
    pub fn new(
        repository: Arc<dyn DepositRepository>,
        qr_builder: QrBuilder,
        bank_account: String,
        policy: DepositPolicy,
    ) -> Self {
        let rate_limiter = RateLimiter::new(repository.clone(), policy.hourly_limit);
        Self {
            repository,
            rate_limiter,
            qr_builder,
            bank_account,
            policy,
        }
    }

    pub fn bank_account(&self) -> &str {
        &self.bank_account
    }

    pub async fn execute(
        &self,
        user_id: UserId,
        amount: BigDecimal,
        now: DateTime<Utc>,
    ) -> Result<DepositIntent, CreateDepositError> {
        validate_amount(&amount, &self.policy)?;

        if let RateDecision::Deny { .. } = self.rate_limiter.check(user_id, now).await? {
            return Err(CreateDepositError::RateLimited);
        }

        let window = self.rate_limiter.creation_window(now);
        let expires_at = now + Duration::minutes(self.policy.expiration_minutes);
        let intent = self.insert_with_fresh_reference(user_id, &amount, now, expires_at, window).await?;

        // The intent exists before any provider order does, so a paid
        // provider QR always has a reference to settle against.
        let qr = match self
            .qr_builder
            .build(&self.bank_account, &amount, &intent.reference_code)
            .await
        {
            Ok(qr) => qr,
            Err(e) => {
                tracing::error!(user_id, reference_code = %intent.reference_code, "QR generation failed: {}", e);
                if let Err(discard_err) = self.repository.discard_pending(intent.id).await {
                    tracing::error!(deposit_id = %intent.id, "failed to discard deposit without QR: {}", discard_err);
                }
                return Err(e.into());
            }
        };

        let intent = self
            .repository
            .attach_qr(intent.id, &qr.qr_url, qr.provider_transaction_id.as_deref())
            .await?;

        tracing::info!(
            deposit_id = %intent.id,
            user_id,
            reference_code = %intent.reference_code,
            amount = %intent.amount,
            "deposit intent created"
        );
        Ok(intent)
    }

    async fn insert_with_fresh_reference(
        &self,
        user_id: UserId,
        amount: &BigDecimal,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
        window: CreationWindow,
    ) -> Result<DepositIntent, CreateDepositError> {
        for attempt in 1..=MAX_REFERENCE_ATTEMPTS {
            let new_intent = NewDepositIntent {
                id: Uuid::new_v4(),
                user_id,
                reference_code: ReferenceCode::generate(user_id, now),
                amount: amount.clone(),
                target_bank_account: self.bank_account.clone(),
                qr_url: None,
                provider_transaction_id: None,
                created_at: now,
                expires_at,
            };

            match self.repository.insert_pending(&new_intent, window).await {
                Ok(intent) => return Ok(intent),
                Err(RepositoryError::Conflict(msg)) => {
                    tracing::warn!(user_id, attempt, "reference code collision: {}", msg);
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(CreateDepositError::ReferenceExhausted)
    }
}

/// Amount must be within the policy bounds with at most two decimals.
pub fn validate_amount(amount: &BigDecimal, policy: &DepositPolicy) -> Result<(), CreateDepositError> {
    if amount <= &BigDecimal::zero() {
        return Err(CreateDepositError::InvalidAmount("amount must be positive".to_string()));
    }
    if amount < &policy.min_amount {
        return Err(CreateDepositError::InvalidAmount(format!(
            "amount must be at least {}",
            policy.min_amount
        )));
    }
    if amount > &policy.max_amount {
        return Err(CreateDepositError::InvalidAmount(format!(
            "amount must not exceed {}",
            policy.max_amount
        )));
    }
    let (_, scale) = amount.normalized().as_bigint_and_exponent();
    if scale > MAX_AMOUNT_SCALE {
        return Err(CreateDepositError::InvalidAmount(
            "amount must have at most 2 decimal places".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryDepositRepository;
    use crate::config::test_config;
    use crate::domain::DepositStatus;
    use std::str::FromStr;

    fn use_case(repo: Arc<InMemoryDepositRepository>) -> CreateDeposit {
        let config = test_config();
        CreateDeposit::new(
            repo,
            QrBuilder::from_config(&config).unwrap(),
            config.bank.account_number.clone(),
            config.deposit.clone(),
        )
    }

    #[test]
    fn test_amount_bounds() {
        let policy = DepositPolicy::default();
        assert!(validate_amount(&BigDecimal::from(10_000), &policy).is_ok());
        assert!(validate_amount(&BigDecimal::from(50_000_000), &policy).is_ok());
        assert!(validate_amount(&BigDecimal::from(9_999), &policy).is_err());
        assert!(validate_amount(&BigDecimal::from(50_000_001), &policy).is_err());
        assert!(validate_amount(&BigDecimal::from(-5), &policy).is_err());
    }

    #[test]
    fn test_amount_precision() {
        let policy = DepositPolicy::default();
        assert!(validate_amount(&BigDecimal::from_str("10000.25").unwrap(), &policy).is_ok());
        assert!(validate_amount(&BigDecimal::from_str("10000.500").unwrap(), &policy).is_ok());
        assert!(validate_amount(&BigDecimal::from_str("10000.125").unwrap(), &policy).is_err());
    }

    #[tokio::test]
    async fn test_creates_pending_intent_with_qr() {
        let repo = Arc::new(InMemoryDepositRepository::new());
        let now = Utc::now();

        let intent = use_case(repo.clone())
            .execute(42, BigDecimal::from(100_000), now)
            .await
            .unwrap();

        assert_eq!(intent.status, DepositStatus::Pending);
        assert_eq!(intent.user_id, 42);
        assert_eq!(intent.target_bank_account, "1234567890");
        assert_eq!(intent.expires_at, now + Duration::minutes(15));
        assert!(intent.reference_code.starts_with("NAP42T"));
        assert!(intent.qr_url.as_deref().unwrap().contains(&intent.reference_code));
        assert_eq!(ReferenceCode::parse(&intent.reference_code).unwrap().user_id(), 42);
    }

    #[tokio::test]
    async fn test_invalid_amount_persists_nothing() {
        let repo = Arc::new(InMemoryDepositRepository::new());
        let result = use_case(repo.clone())
            .execute(42, BigDecimal::from(5_000), Utc::now())
            .await;

        assert!(matches!(result, Err(CreateDepositError::InvalidAmount(_))));
        assert_eq!(repo.intent_count().await, 0);
    }

    fn provider_use_case(repo: Arc<dyn DepositRepository>, base_url: String) -> CreateDeposit {
        let mut config = test_config();
        config.qr_strategy = crate::config::QrStrategy::SepayApi;
        config.provider.api_key = Some("api-key".to_string());
        config.provider.merchant_id = Some("merchant-1".to_string());
        config.provider.base_url = base_url;
        CreateDeposit::new(
            repo,
            QrBuilder::from_config(&config).unwrap(),
            config.bank.account_number.clone(),
            config.deposit.clone(),
        )
    }

    #[tokio::test]
    async fn test_provider_failure_persists_nothing() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/qr/create")
            .with_status(500)
            .with_body("upstream down")
            .create_async()
            .await;

        let repo = Arc::new(InMemoryDepositRepository::new());
        let result = provider_use_case(repo.clone(), server.url())
            .execute(42, BigDecimal::from(100_000), Utc::now())
            .await;

        assert!(matches!(result, Err(CreateDepositError::Qr(QrError::Rejected { status: 500, .. }))));
        assert_eq!(repo.intent_count().await, 0);
    }

    #[tokio::test]
    async fn test_provider_qr_is_attached_to_stored_intent() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/qr/create")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"qr_code_url":"https://qr.sepay.vn/abc.png","transaction_id":"T-77"}"#)
            .expect(1)
            .create_async()
            .await;

        let repo = Arc::new(InMemoryDepositRepository::new());
        let intent = provider_use_case(repo.clone(), server.url())
            .execute(42, BigDecimal::from(100_000), Utc::now())
            .await
            .unwrap();

        mock.assert_async().await;
        let stored = repo.get_by_id(intent.id).await.unwrap().unwrap();
        assert_eq!(stored.qr_url.as_deref(), Some("https://qr.sepay.vn/abc.png"));
        assert_eq!(stored.provider_transaction_id.as_deref(), Some("T-77"));
    }

    /// Passes the pre-check but loses the insert-time ceiling, as a
    /// concurrent creation for the same user would.
    struct CeilingAtInsert(InMemoryDepositRepository);

    #[async_trait::async_trait]
    impl DepositRepository for CeilingAtInsert {
        async fn count_created_since(&self, user_id: UserId, since: DateTime<Utc>) -> crate::ports::RepositoryResult<i64> {
            self.0.count_created_since(user_id, since).await
        }
        async fn insert_pending(&self, intent: &NewDepositIntent, _window: CreationWindow) -> crate::ports::RepositoryResult<DepositIntent> {
            Err(RepositoryError::RateLimited(intent.user_id))
        }
        async fn attach_qr(&self, id: Uuid, qr_url: &str, provider_transaction_id: Option<&str>) -> crate::ports::RepositoryResult<DepositIntent> {
            self.0.attach_qr(id, qr_url, provider_transaction_id).await
        }
        async fn discard_pending(&self, id: Uuid) -> crate::ports::RepositoryResult<bool> {
            self.0.discard_pending(id).await
        }
        async fn get_by_id(&self, id: Uuid) -> crate::ports::RepositoryResult<Option<DepositIntent>> {
            self.0.get_by_id(id).await
        }
        async fn get_for_user(&self, user_id: UserId, id: Uuid) -> crate::ports::RepositoryResult<Option<DepositIntent>> {
            self.0.get_for_user(user_id, id).await
        }
        async fn list_for_user(&self, user_id: UserId, limit: i64, offset: i64) -> crate::ports::RepositoryResult<Vec<DepositIntent>> {
            self.0.list_for_user(user_id, limit, offset).await
        }
        async fn find_by_external_id(&self, external_transaction_id: &str) -> crate::ports::RepositoryResult<Option<DepositIntent>> {
            self.0.find_by_external_id(external_transaction_id).await
        }
        async fn find_pending_by_reference(&self, reference_code: &str) -> crate::ports::RepositoryResult<Option<DepositIntent>> {
            self.0.find_pending_by_reference(reference_code).await
        }
        async fn settle(&self, request: &crate::domain::SettlementRequest) -> crate::ports::RepositoryResult<crate::ports::SettlementResult> {
            self.0.settle(request).await
        }
        async fn mark_failed(&self, id: Uuid, at: DateTime<Utc>) -> crate::ports::RepositoryResult<bool> {
            self.0.mark_failed(id, at).await
        }
        async fn expire_if_stale(&self, id: Uuid, now: DateTime<Utc>) -> crate::ports::RepositoryResult<bool> {
            self.0.expire_if_stale(id, now).await
        }
        async fn expire_stale(&self, now: DateTime<Utc>) -> crate::ports::RepositoryResult<u64> {
            self.0.expire_stale(now).await
        }
        async fn get_balance(&self, user_id: UserId) -> crate::ports::RepositoryResult<Option<BigDecimal>> {
            self.0.get_balance(user_id).await
        }
        async fn list_ledger(&self, user_id: UserId, limit: i64, offset: i64) -> crate::ports::RepositoryResult<Vec<crate::domain::LedgerTransaction>> {
            self.0.list_ledger(user_id, limit, offset).await
        }
    }

    #[tokio::test]
    async fn test_rejected_insert_never_reaches_provider() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/qr/create")
            .expect(0)
            .create_async()
            .await;

        let repo = Arc::new(CeilingAtInsert(InMemoryDepositRepository::new()));
        let result = provider_use_case(repo, server.url())
            .execute(42, BigDecimal::from(100_000), Utc::now())
            .await;

        assert!(matches!(result, Err(CreateDepositError::RateLimited)));
        mock.assert_async().await;
    }
}

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::ports::{DepositRepository, RepositoryResult};

/// Moves pending intents past their `expires_at` to `expired`.
///
/// The transition is conditional on `status = 'pending'`, so a sweep that
/// races a settlement on the same row leaves whichever one commits first.
#[derive(Clone)]
pub struct ExpirySweeper {
    repository: Arc<dyn DepositRepository>,
    interval: Duration,
}

impl ExpirySweeper {
    pub fn new(repository: Arc<dyn DepositRepository>, interval: Duration) -> Self {
        Self { repository, interval }
    }

    pub async fn sweep(&self, now: DateTime<Utc>) -> RepositoryResult<u64> {
        let expired = self.repository.expire_stale(now).await?;
        if expired > 0 {
            info!(expired, "expired stale deposit intents");
        } else {
            debug!("no stale deposit intents");
        }
        Ok(expired)
    }

    /// Sweep forever on the configured interval. A failed sweep is logged
    /// and retried on the next tick.
    pub async fn run(self) {
        info!(interval_secs = self.interval.as_secs(), "expiry sweeper started");

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if let Err(e) = self.sweep(Utc::now()).await {
                error!("Expiry sweep failed: {}", e);
            }
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryDepositRepository;
    use crate::domain::{DepositStatus, NewDepositIntent, ReferenceCode};
    use crate::ports::CreationWindow;
    use bigdecimal::BigDecimal;
    use chrono::Duration as ChronoDuration;
    use uuid::Uuid;

    async fn pending(repo: &InMemoryDepositRepository, code: &str, expires_at: DateTime<Utc>) -> Uuid {
        let id = Uuid::new_v4();
        let intent = NewDepositIntent {
            id,
            user_id: 1,
            reference_code: ReferenceCode::parse(code).unwrap(),
            amount: BigDecimal::from(100_000),
            target_bank_account: "1234567890".to_string(),
            qr_url: None,
            provider_transaction_id: None,
            created_at: expires_at - ChronoDuration::minutes(15),
            expires_at,
        };
        let window = CreationWindow { since: Utc::now() - ChronoDuration::days(1), max_per_window: 100 };
        repo.insert_pending(&intent, window).await.unwrap();
        id
    }

    #[tokio::test]
    async fn test_sweep_only_expires_past_due_pending() {
        let repo = Arc::new(InMemoryDepositRepository::new());
        let now = Utc::now();
        let stale = pending(&repo, "NAP1T100R1001", now - ChronoDuration::seconds(1)).await;
        let fresh = pending(&repo, "NAP1T100R1002", now + ChronoDuration::minutes(5)).await;

        let sweeper = ExpirySweeper::new(repo.clone(), Duration::from_secs(60));
        assert_eq!(sweeper.sweep(now).await.unwrap(), 1);

        assert_eq!(repo.get_by_id(stale).await.unwrap().unwrap().status, DepositStatus::Expired);
        assert_eq!(repo.get_by_id(fresh).await.unwrap().unwrap().status, DepositStatus::Pending);

        // Nothing left to sweep.
        assert_eq!(sweeper.sweep(now).await.unwrap(), 0);
    }
}

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

use crate::domain::UserId;
use crate::ports::{CreationWindow, DepositRepository, RepositoryResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allow,
    Deny { recent: i64 },
}

/// Caps deposit creations per user over a trailing window.
///
/// `check` is an early exit before the provider call. The same ceiling is
/// enforced again by `DepositRepository::insert_pending` through
/// [`RateLimiter::creation_window`], which is what actually holds under
/// concurrent requests.
#[derive(Clone)]
pub struct RateLimiter {
    repository: Arc<dyn DepositRepository>,
    max_per_window: i64,
    window: Duration,
}

impl RateLimiter {
    pub fn new(repository: Arc<dyn DepositRepository>, max_per_window: i64) -> Self {
        Self {
            repository,
            max_per_window,
            window: Duration::minutes(60),
        }
    }

    pub fn creation_window(&self, now: DateTime<Utc>) -> CreationWindow {
        CreationWindow {
            since: now - self.window,
            max_per_window: self.max_per_window,
        }
    }

    pub async fn check(&self, user_id: UserId, now: DateTime<Utc>) -> RepositoryResult<RateDecision> {
        let window = self.creation_window(now);
        let recent = self
            .repository
            .count_created_since(user_id, window.since)
            .await?;

        if recent >= window.max_per_window {
            tracing::warn!(user_id, recent, limit = window.max_per_window, "deposit rate limit reached");
            Ok(RateDecision::Deny { recent })
        } else {
            Ok(RateDecision::Allow)
        }
    }
}

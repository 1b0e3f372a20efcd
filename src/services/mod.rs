pub mod expiry_sweeper;
pub mod rate_limiter;

pub use expiry_sweeper::ExpirySweeper;
pub use rate_limiter::{RateDecision, RateLimiter};

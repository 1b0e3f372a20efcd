//! Reference codes correlate a bank transfer memo with a pending deposit.
//!
//! Format: `NAP{user_id}T{unix_seconds}R{4 random digits}`, e.g.
//! `NAP7T1700000000R1234`. The code only has to survive being typed into a
//! free-text memo field, so it is plain ASCII and has no separators that
//! banking apps tend to strip.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;

use super::deposit::UserId;

pub const REFERENCE_PREFIX: &str = "NAP";

static REFERENCE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)NAP(\d+)T(\d+)R(\d{4})").expect("reference pattern is a valid regex")
});

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReferenceCode {
    code: String,
    user_id: UserId,
}

impl ReferenceCode {
    /// Build a fresh code for `user_id`. Uniqueness is probabilistic; the
    /// storage layer rejects the rare collision and the caller retries.
    pub fn generate(user_id: UserId, now: DateTime<Utc>) -> Self {
        let suffix = fastrand::u16(1000..=9999);
        let code = format!("{}{}T{}R{}", REFERENCE_PREFIX, user_id, now.timestamp(), suffix);
        Self { code, user_id }
    }

    /// Parse a string that must be exactly one reference code.
    pub fn parse(value: &str) -> Option<Self> {
        let found = Self::extract(value)?;
        if found.code.len() == value.trim().len() {
            Some(found)
        } else {
            None
        }
    }

    /// Scan free text (a bank memo) for the first embedded reference code
    /// whose user id fits a `UserId`.
    pub fn extract(memo: &str) -> Option<Self> {
        REFERENCE_PATTERN.captures_iter(memo).find_map(|captures| {
            let user_id = captures.get(1)?.as_str().parse::<UserId>().ok()?;
            let code = captures.get(0)?.as_str().to_ascii_uppercase();
            Some(Self { code, user_id })
        })
    }

    pub fn as_str(&self) -> &str {
        &self.code
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn into_string(self) -> String {
        self.code
    }
}

impl fmt::Display for ReferenceCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.code)
    }
}

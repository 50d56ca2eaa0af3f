//! Risk signals as fetched from the platform.
//!
//! Every signal carries its availability. `Restricted` (the account hides the
//! data) and `Unavailable` (the fetch failed or missed the deadline) are
//! distinct from any real value and score as neutral.

use serde::Serialize;

use crate::error::ExternalError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum Signal<T> {
    Available(T),
    Restricted,
    Unavailable(String),
}

impl<T> Signal<T> {
    pub fn available(&self) -> Option<&T> {
        match self {
            Signal::Available(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Signal::Available(_))
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, Signal::Unavailable(_))
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Signal<U> {
        match self {
            Signal::Available(value) => Signal::Available(f(value)),
            Signal::Restricted => Signal::Restricted,
            Signal::Unavailable(reason) => Signal::Unavailable(reason),
        }
    }
}

impl<T> From<Result<T, ExternalError>> for Signal<T> {
    fn from(result: Result<T, ExternalError>) -> Self {
        match result {
            Ok(value) => Signal::Available(value),
            Err(ExternalError::Forbidden) => Signal::Restricted,
            Err(e) => Signal::Unavailable(e.to_string()),
        }
    }
}

/// Badge count summed over the pages that were fetched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BadgeTally {
    pub count: u64,
    /// The page cap was hit; `count` is a lower bound
    pub truncated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RiskSignals {
    pub account_age_days: Signal<i64>,
    pub badges: Signal<BadgeTally>,
    pub friends: Signal<u64>,
    pub premium: Signal<bool>,
    pub verified_badge: Signal<bool>,
    /// Blacklisted groups the account belongs to
    pub blacklisted_groups: Signal<Vec<u64>>,
    /// Reported only, neither formula uses it
    pub banned: Signal<bool>,
}

impl RiskSignals {
    /// Every signal unavailable for the same reason
    pub fn unavailable(reason: &str) -> Self {
        Self {
            account_age_days: Signal::Unavailable(reason.to_string()),
            badges: Signal::Unavailable(reason.to_string()),
            friends: Signal::Unavailable(reason.to_string()),
            premium: Signal::Unavailable(reason.to_string()),
            verified_badge: Signal::Unavailable(reason.to_string()),
            blacklisted_groups: Signal::Unavailable(reason.to_string()),
            banned: Signal::Unavailable(reason.to_string()),
        }
    }

    pub fn is_blacklisted(&self) -> bool {
        self.blacklisted_groups
            .available()
            .is_some_and(|groups| !groups.is_empty())
    }

    /// Some fetch failed or missed the deadline. Restricted data is a stable
    /// answer and does not count.
    pub fn is_degraded(&self) -> bool {
        self.account_age_days.is_unavailable()
            || self.badges.is_unavailable()
            || self.friends.is_unavailable()
            || self.premium.is_unavailable()
            || self.verified_badge.is_unavailable()
            || self.blacklisted_groups.is_unavailable()
            || self.banned.is_unavailable()
    }

    pub fn unavailable_count(&self) -> usize {
        [
            self.account_age_days.is_available(),
            self.badges.is_available(),
            self.friends.is_available(),
            self.premium.is_available(),
            self.verified_badge.is_available(),
            self.blacklisted_groups.is_available(),
        ]
        .iter()
        .filter(|available| !**available)
        .count()
    }
}

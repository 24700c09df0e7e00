//! Retry budget and linear backoff for lock acquisition.

use std::time::Duration;

/// How many times to retry after the first attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retries {
    /// `n` retries, `n + 1` attempts in total.
    Limited(u32),
    /// Keep trying until the lock is won or the caller is interrupted.
    Unlimited,
}

impl Retries {
    /// Interpret a command line retry count; negative means unlimited.
    pub fn from_count(count: i64) -> Self {
        match u32::try_from(count) {
            Ok(n) => Retries::Limited(n),
            Err(_) if count < 0 => Retries::Unlimited,
            Err(_) => Retries::Limited(u32::MAX),
        }
    }

    /// The command line form of this budget, `-1` for unlimited.
    pub fn as_count(self) -> i64 {
        match self {
            Retries::Limited(n) => i64::from(n),
            Retries::Unlimited => -1,
        }
    }
}

impl Default for Retries {
    fn default() -> Self {
        Retries::Limited(5)
    }
}

/// Linear backoff with an upper bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub step: Duration,
    pub cap: Duration,
}

impl Backoff {
    /// Sleep before attempt number `attempt` (the first attempt is 0).
    pub fn delay(&self, attempt: u32) -> Duration {
        self.step.saturating_mul(attempt).min(self.cap)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            step: Duration::from_secs(5),
            cap: Duration::from_secs(60),
        }
    }
}

/// Attempt counter for one acquisition call.
#[derive(Debug)]
pub(crate) struct RetryBudget {
    retries: Retries,
    next: u32,
}

impl RetryBudget {
    pub(crate) fn new(retries: Retries) -> Self {
        Self { retries, next: 0 }
    }

    /// Number of the next attempt, or `None` once the budget is spent.
    pub(crate) fn next_attempt(&mut self) -> Option<u32> {
        if let Retries::Limited(n) = self.retries
            && self.next > n
        {
            return None;
        }
        let attempt = self.next;
        self.next = self.next.saturating_add(1);
        Some(attempt)
    }

    /// Give back the attempt just used, e.g. after reclaiming a stale lock.
    pub(crate) fn refund(&mut self) {
        self.next = self.next.saturating_sub(1);
    }
}

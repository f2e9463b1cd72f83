//! Store-backed outbox for reward intents that could not be applied.
//!
//! A failed payout never rolls back the membership or state change that
//! earned it. The intent is parked here and replayed later; intent ids are
//! the ledger/XP idempotency keys, so a replay can never double-pay.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::intents::RewardIntent;
use crate::error::{CoreError, Result};
use crate::storage::{KeyValueStore, Repository};

/// Longest wait between retries of the same intent.
const MAX_BACKOFF_MINUTES: i64 = 60;

/// Parked intent with retry bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingIntent {
    pub intent: RewardIntent,
    pub attempts: u32,
    pub last_error: String,
    pub retry_after: DateTime<Utc>,
}

/// Outbox of reward intents awaiting retry.
pub struct RewardOutbox {
    pending: Repository<PendingIntent>,
}

fn backoff(attempts: u32) -> Duration {
    // 2^6 minutes is already past the cap.
    let exponent = attempts.saturating_sub(1).min(6);
    Duration::minutes((1i64 << exponent).min(MAX_BACKOFF_MINUTES))
}

impl RewardOutbox {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            pending: Repository::new(store, "outbox"),
        }
    }

    /// Park `intent` after a failed attempt, or bump its attempt count if it
    /// is already parked.
    pub fn park(&self, intent: &RewardIntent, error: &str, now: DateTime<Utc>) -> Result<PendingIntent> {
        let mutation = self.pending.modify(&intent.intent_id, |existing| {
            let attempts = existing.map_or(1, |p| p.attempts.saturating_add(1));
            Some(PendingIntent {
                intent: intent.clone(),
                attempts,
                last_error: error.to_string(),
                retry_after: now + backoff(attempts),
            })
        })?;
        mutation
            .into_current()
            .ok_or_else(|| CoreError::not_found("outbox intent", intent.intent_id.clone()))
    }

    /// Drop an intent once it has been applied.
    pub fn resolve(&self, intent_id: &str) -> Result<bool> {
        self.pending.remove(intent_id)
    }

    /// Intents whose backoff has elapsed, up to `n`, oldest retry first.
    pub fn ready(&self, now: DateTime<Utc>, n: usize) -> Result<Vec<PendingIntent>> {
        let mut ready: Vec<PendingIntent> = self
            .pending
            .list("")?
            .into_iter()
            .filter(|p| p.retry_after <= now)
            .collect();
        ready.sort_by(|a, b| a.retry_after.cmp(&b.retry_after));
        ready.truncate(n);
        Ok(ready)
    }

    pub fn all(&self) -> Result<Vec<PendingIntent>> {
        self.pending.list("")
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.all()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Time until the next parked intent becomes ready.
    pub fn time_until_next(&self, now: DateTime<Utc>) -> Result<Option<Duration>> {
        Ok(self
            .all()?
            .iter()
            .map(|p| p.retry_after)
            .min()
            .map(|t| if t > now { t - now } else { Duration::zero() }))
    }
}

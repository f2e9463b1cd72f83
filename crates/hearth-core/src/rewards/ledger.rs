//! Append-only Pi ledger.
//!
//! Every reward in the engine is paid through [`RewardLedger`]. Entries are
//! written once under `ledger/<user>/<entry id>` and never updated or
//! deleted; a user's balance is the sum of their completed entries.
//!
//! Internal payouts use [`RewardLedger::grant_once`] with a deterministic key
//! (`level-up:<user>:<level>`, `badge:<user>:<badge>:pi`, ...), which makes a
//! retried payout return the original entry instead of paying twice.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::payment::PaymentSink;
use crate::clock::Clock;
use crate::error::{CoreError, Result};
use crate::events::{Event, EventLog};
use crate::storage::{key_segment, KeyValueStore, Repository};

/// What a grant was paid for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RewardSource {
    Booking,
    Review,
    Referral,
    Achievement,
    Daily,
    Streak,
    LevelUp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RewardStatus {
    Pending,
    Completed,
}

/// One immutable ledger line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardEntry {
    pub id: String,
    pub user_id: String,
    pub amount: Decimal,
    pub source: RewardSource,
    pub description: String,
    pub timestamp: DateTime<Utc>,
    pub status: RewardStatus,
    /// Receipt from the payment sink.
    pub receipt_id: Option<String>,
}

/// Outcome of [`RewardLedger::grant_once`].
#[derive(Debug, Clone, PartialEq)]
pub enum Grant {
    Paid(RewardEntry),
    /// The key was paid earlier; nothing new was transferred.
    AlreadyGranted(RewardEntry),
}

impl Grant {
    pub fn entry(&self) -> &RewardEntry {
        match self {
            Grant::Paid(entry) | Grant::AlreadyGranted(entry) => entry,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, Grant::Paid(_))
    }
}

pub struct RewardLedger {
    entries: Repository<RewardEntry>,
    sink: Arc<dyn PaymentSink>,
    clock: Arc<dyn Clock>,
    events: Arc<EventLog>,
}

/// Ledger keys are `<user>/<entry id>` with both components escaped.
fn entry_key(user_id: &str, entry_id: &str) -> String {
    format!("{}/{}", key_segment(user_id), key_segment(entry_id))
}

impl RewardLedger {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        sink: Arc<dyn PaymentSink>,
        clock: Arc<dyn Clock>,
        events: Arc<EventLog>,
    ) -> Self {
        Self {
            entries: Repository::new(store, "ledger"),
            sink,
            clock,
            events,
        }
    }

    /// Pay `amount` to `user_id` under a fresh entry id.
    ///
    /// # Errors
    /// `InvalidAmount` for non-positive amounts, `Payment` if the sink
    /// rejects the transfer (nothing is recorded in that case).
    pub fn grant(
        &self,
        user_id: &str,
        amount: Decimal,
        source: RewardSource,
        description: &str,
    ) -> Result<RewardEntry> {
        let key = uuid::Uuid::new_v4().to_string();
        self.grant_once(&key, user_id, amount, source, description)
            .map(|grant| grant.entry().clone())
    }

    /// Pay `amount` to `user_id` at most once for `key`.
    pub fn grant_once(
        &self,
        key: &str,
        user_id: &str,
        amount: Decimal,
        source: RewardSource,
        description: &str,
    ) -> Result<Grant> {
        if amount <= Decimal::ZERO {
            return Err(CoreError::InvalidAmount { amount });
        }

        let storage_key = entry_key(user_id, key);
        if let Some(existing) = self.entries.get(&storage_key)? {
            return Ok(Grant::AlreadyGranted(existing));
        }

        // Sinks deduplicate by memo, so the memo must name the payee too.
        let memo = storage_key.as_str();
        let receipt = self.sink.transfer(user_id, amount, memo).map_err(|e| {
            warn!(%user_id, %amount, %key, error = %e, "payment transfer failed");
            CoreError::Payment(e.to_string())
        })?;
        if receipt.user_id != user_id || receipt.amount != amount {
            warn!(
                %user_id, %amount, %key,
                receipt_user = %receipt.user_id,
                receipt_amount = %receipt.amount,
                "payment receipt does not match the grant"
            );
            return Err(CoreError::Payment(format!(
                "receipt {} settled {} to {}, expected {} to {}",
                receipt.receipt_id, receipt.amount, receipt.user_id, amount, user_id
            )));
        }

        let entry = RewardEntry {
            id: key.to_string(),
            user_id: user_id.to_string(),
            amount,
            source,
            description: description.to_string(),
            timestamp: self.clock.now(),
            status: RewardStatus::Completed,
            receipt_id: Some(receipt.receipt_id),
        };

        if !self.entries.insert_new(&storage_key, &entry)? {
            // A concurrent grant with the same key won; the sink deduplicated
            // the transfer by memo, so report the winner's entry.
            let winner = self
                .entries
                .get(&storage_key)?
                .ok_or_else(|| CoreError::not_found("ledger entry", storage_key.clone()))?;
            return Ok(Grant::AlreadyGranted(winner));
        }

        info!(%user_id, %amount, ?source, entry_id = %entry.id, "reward granted");
        self.events.push(Event::RewardGranted {
            entry_id: entry.id.clone(),
            user_id: entry.user_id.clone(),
            amount,
            source,
            at: entry.timestamp,
        });
        Ok(Grant::Paid(entry))
    }

    /// Whether a keyed grant has already been paid.
    pub fn has_grant(&self, user_id: &str, key: &str) -> Result<bool> {
        self.entries.contains(&entry_key(user_id, key))
    }

    /// All entries for `user_id`, oldest first.
    pub fn entries_for(&self, user_id: &str) -> Result<Vec<RewardEntry>> {
        let mut entries = self.entries.list(&format!("{}/", key_segment(user_id)))?;
        entries.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
        Ok(entries)
    }

    /// Sum of completed entries. Unknown users have a balance of zero.
    pub fn balance_of(&self, user_id: &str) -> Result<Decimal> {
        Ok(self
            .entries_for(user_id)?
            .iter()
            .filter(|e| e.status == RewardStatus::Completed)
            .map(|e| e.amount)
            .sum())
    }

    /// Total Pi ever granted across all users.
    pub fn total_granted(&self) -> Result<Decimal> {
        Ok(self
            .entries
            .list("")?
            .iter()
            .filter(|e| e.status == RewardStatus::Completed)
            .map(|e| e.amount)
            .sum())
    }
}

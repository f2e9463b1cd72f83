//! Referral lifecycle.
//!
//! ```text
//! invited ──signup──▶ signed_up ──first booking──▶ completed_first_booking ──▶ rewarded
//!    └──────────────first booking───────────────────────▲
//! ```
//!
//! Status only moves forward. Completion commits `completed_first_booking`
//! first, then emits the reward intents, then moves to `rewarded`. A record
//! found in `completed_first_booking` is an interrupted run: the intents are
//! emitted again (their keys make that free) and the record is finished.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::intents::{RewardDispatcher, RewardIntent};
use super::ledger::RewardSource;
use crate::clock::Clock;
use crate::error::{CoreError, Result};
use crate::events::{Event, EventLog};
use crate::storage::{KeyValueStore, Mutation, Repository, RewardsConfig};
use crate::transition::Transition;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferralStatus {
    Invited,
    SignedUp,
    CompletedFirstBooking,
    Rewarded,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferralRecord {
    pub referral_id: String,
    pub referrer_id: String,
    pub referred_user_id: Option<String>,
    pub referred_email: String,
    pub status: ReferralStatus,
    pub referrer_reward_amount: Decimal,
    pub referred_reward_amount: Decimal,
    pub referrer_xp_reward: u64,
    pub created_at: DateTime<Utc>,
    pub signed_up_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub rewarded_at: Option<DateTime<Utc>>,
}

impl ReferralRecord {
    /// Payouts owed once the referred user completes a first booking.
    fn intents(&self, referred_user_id: &str, now: DateTime<Utc>) -> Vec<RewardIntent> {
        let id = &self.referral_id;
        let mut intents = Vec::with_capacity(3);
        if self.referrer_reward_amount > Decimal::ZERO {
            intents.push(RewardIntent::pi(
                format!("referral:{id}:referrer-pi"),
                &self.referrer_id,
                self.referrer_reward_amount,
                RewardSource::Referral,
                format!("Referral bonus for inviting {}", self.referred_email),
                now,
            ));
        }
        if self.referred_reward_amount > Decimal::ZERO {
            intents.push(RewardIntent::pi(
                format!("referral:{id}:referred-pi"),
                referred_user_id,
                self.referred_reward_amount,
                RewardSource::Referral,
                "Welcome bonus for your first booking",
                now,
            ));
        }
        if self.referrer_xp_reward > 0 {
            intents.push(RewardIntent::xp(
                format!("referral:{id}:referrer-xp"),
                &self.referrer_id,
                self.referrer_xp_reward,
                RewardSource::Referral,
                now,
            ));
        }
        intents
    }
}

pub struct ReferralService {
    records: Repository<ReferralRecord>,
    dispatcher: Arc<RewardDispatcher>,
    clock: Arc<dyn Clock>,
    events: Arc<EventLog>,
    rewards: RewardsConfig,
}

impl ReferralService {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        dispatcher: Arc<RewardDispatcher>,
        clock: Arc<dyn Clock>,
        events: Arc<EventLog>,
        rewards: RewardsConfig,
    ) -> Self {
        Self {
            records: Repository::new(store, "referral"),
            dispatcher,
            clock,
            events,
            rewards,
        }
    }

    /// Open an invitation. Reward amounts are fixed from policy now.
    pub fn create(&self, referrer_id: &str, referred_email: &str) -> Result<ReferralRecord> {
        let now = self.clock.now();
        let record = ReferralRecord {
            referral_id: uuid::Uuid::new_v4().to_string(),
            referrer_id: referrer_id.to_string(),
            referred_user_id: None,
            referred_email: referred_email.to_string(),
            status: ReferralStatus::Invited,
            referrer_reward_amount: self.rewards.referrer_reward,
            referred_reward_amount: self.rewards.referred_reward,
            referrer_xp_reward: self.rewards.referrer_xp,
            created_at: now,
            signed_up_at: None,
            completed_at: None,
            rewarded_at: None,
        };
        self.records.insert_new(&record.referral_id, &record)?;

        info!(referral_id = %record.referral_id, %referrer_id, "referral created");
        self.events.push(Event::ReferralCreated {
            referral_id: record.referral_id.clone(),
            referrer_id: referrer_id.to_string(),
            at: now,
        });
        Ok(record)
    }

    pub fn get(&self, referral_id: &str) -> Result<Option<ReferralRecord>> {
        self.records.get(referral_id)
    }

    /// Every referral opened by `referrer_id`, oldest first.
    pub fn referrals_by(&self, referrer_id: &str) -> Result<Vec<ReferralRecord>> {
        let mut records: Vec<_> = self
            .records
            .list("")?
            .into_iter()
            .filter(|r| r.referrer_id == referrer_id)
            .collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(records)
    }

    /// `invited → signed_up`.
    pub fn mark_signed_up(
        &self,
        referral_id: &str,
        referred_user_id: &str,
    ) -> Result<Transition<ReferralRecord>> {
        let now = self.clock.now();
        let mutation = self.records.modify(referral_id, |current| {
            let record = current?;
            if record.status != ReferralStatus::Invited {
                return None;
            }
            let mut next = record.clone();
            next.status = ReferralStatus::SignedUp;
            next.referred_user_id = Some(referred_user_id.to_string());
            next.signed_up_at = Some(now);
            Some(next)
        })?;

        match mutation {
            Mutation::Written { current, .. } => {
                info!(%referral_id, %referred_user_id, "referral signed up");
                self.events.push(Event::ReferralSignedUp {
                    referral_id: referral_id.to_string(),
                    referred_user_id: referred_user_id.to_string(),
                    at: now,
                });
                Ok(Transition::Applied(current))
            }
            Mutation::Unchanged(Some(record)) => {
                debug!(%referral_id, status = ?record.status, "referral already past signup");
                Ok(Transition::AlreadyTerminal(record))
            }
            Mutation::Unchanged(None) => Err(CoreError::not_found("referral", referral_id)),
        }
    }

    /// Record the referred user's first booking and pay both sides.
    pub fn complete(
        &self,
        referral_id: &str,
        referred_user_id: &str,
    ) -> Result<Transition<ReferralRecord>> {
        let now = self.clock.now();
        let mutation = self.records.modify(referral_id, |current| {
            let record = current?;
            match record.status {
                ReferralStatus::Invited | ReferralStatus::SignedUp => {
                    let mut next = record.clone();
                    next.status = ReferralStatus::CompletedFirstBooking;
                    next.referred_user_id = Some(referred_user_id.to_string());
                    next.signed_up_at = next.signed_up_at.or(Some(now));
                    next.completed_at = Some(now);
                    Some(next)
                }
                ReferralStatus::CompletedFirstBooking | ReferralStatus::Rewarded => None,
            }
        })?;

        let record = match mutation {
            Mutation::Written { current, .. } => {
                info!(%referral_id, %referred_user_id, "referral completed");
                self.events.push(Event::ReferralCompleted {
                    referral_id: referral_id.to_string(),
                    referred_user_id: referred_user_id.to_string(),
                    at: now,
                });
                current
            }
            Mutation::Unchanged(Some(record)) if record.status == ReferralStatus::Rewarded => {
                debug!(%referral_id, "referral already rewarded");
                return Ok(Transition::AlreadyTerminal(record));
            }
            Mutation::Unchanged(Some(record)) => {
                info!(%referral_id, "resuming interrupted referral payout");
                record
            }
            Mutation::Unchanged(None) => return Err(CoreError::not_found("referral", referral_id)),
        };

        let payee = record
            .referred_user_id
            .clone()
            .unwrap_or_else(|| referred_user_id.to_string());
        self.dispatcher.dispatch(&record.intents(&payee, now))?;

        let rewarded = self.records.modify(referral_id, |current| {
            let record = current?;
            if record.status != ReferralStatus::CompletedFirstBooking {
                return None;
            }
            let mut next = record.clone();
            next.status = ReferralStatus::Rewarded;
            next.rewarded_at = Some(now);
            Some(next)
        })?;

        match rewarded {
            Mutation::Written { current, .. } => {
                info!(%referral_id, "referral rewarded");
                self.events.push(Event::ReferralRewarded {
                    referral_id: referral_id.to_string(),
                    at: now,
                });
                Ok(Transition::Applied(current))
            }
            // A concurrent completion finished the record first.
            Mutation::Unchanged(Some(record)) => Ok(Transition::AlreadyTerminal(record)),
            Mutation::Unchanged(None) => Err(CoreError::not_found("referral", referral_id)),
        }
    }
}

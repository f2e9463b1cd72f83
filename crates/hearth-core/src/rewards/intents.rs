//! Reward intents and their dispatcher.
//!
//! Components that earn a user something (a badge, a referral) commit their
//! own state first and then hand the payouts over as [`RewardIntent`]s. The
//! dispatcher applies each one through the ledger or the leveling engine
//! using the intent id as idempotency key; failures are parked in the
//! [`RewardOutbox`] and replayed by [`RewardDispatcher::retry_pending`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::leveling::LevelingEngine;
use super::ledger::{RewardLedger, RewardSource};
use super::outbox::RewardOutbox;
use crate::clock::Clock;
use crate::error::{CoreError, Result};
use crate::events::{Event, EventLog};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RewardKind {
    Pi {
        amount: Decimal,
        source: RewardSource,
        description: String,
    },
    Xp {
        amount: u64,
        source: RewardSource,
    },
}

/// A payout owed to a user. `intent_id` is the idempotency key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardIntent {
    pub intent_id: String,
    pub user_id: String,
    pub kind: RewardKind,
    pub created_at: DateTime<Utc>,
}

impl RewardIntent {
    pub fn pi(
        intent_id: impl Into<String>,
        user_id: &str,
        amount: Decimal,
        source: RewardSource,
        description: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            intent_id: intent_id.into(),
            user_id: user_id.to_string(),
            kind: RewardKind::Pi {
                amount,
                source,
                description: description.into(),
            },
            created_at,
        }
    }

    pub fn xp(
        intent_id: impl Into<String>,
        user_id: &str,
        amount: u64,
        source: RewardSource,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            intent_id: intent_id.into(),
            user_id: user_id.to_string(),
            kind: RewardKind::Xp { amount, source },
            created_at,
        }
    }
}

/// Tally of one dispatch or retry pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    /// Intents that paid something now.
    pub applied: usize,
    /// Intents whose key had already been paid.
    pub already_applied: usize,
    /// Intents parked in the outbox.
    pub deferred: usize,
    /// Intents dropped because no retry could ever apply them.
    pub rejected: usize,
}

impl DispatchReport {
    pub fn is_clean(&self) -> bool {
        self.deferred == 0 && self.rejected == 0
    }
}

pub struct RewardDispatcher {
    ledger: Arc<RewardLedger>,
    leveling: Arc<LevelingEngine>,
    outbox: Arc<RewardOutbox>,
    clock: Arc<dyn Clock>,
    events: Arc<EventLog>,
}

impl RewardDispatcher {
    pub fn new(
        ledger: Arc<RewardLedger>,
        leveling: Arc<LevelingEngine>,
        outbox: Arc<RewardOutbox>,
        clock: Arc<dyn Clock>,
        events: Arc<EventLog>,
    ) -> Self {
        Self {
            ledger,
            leveling,
            outbox,
            clock,
            events,
        }
    }

    pub fn outbox(&self) -> &RewardOutbox {
        &self.outbox
    }

    /// Apply `intents` in order. A failing intent is parked and the rest
    /// still run; only a failure to park is returned as an error.
    pub fn dispatch(&self, intents: &[RewardIntent]) -> Result<DispatchReport> {
        let mut report = DispatchReport::default();
        for intent in intents {
            match self.apply(intent) {
                Ok(true) => report.applied += 1,
                Ok(false) => report.already_applied += 1,
                Err(e) if is_permanent(&e) => {
                    warn!(intent_id = %intent.intent_id, error = %e, "reward intent rejected");
                    report.rejected += 1;
                }
                Err(e) => {
                    self.defer(intent, &e.to_string())?;
                    report.deferred += 1;
                }
            }
        }
        Ok(report)
    }

    /// Replay every parked intent whose backoff has elapsed.
    pub fn retry_pending(&self) -> Result<DispatchReport> {
        let now = self.clock.now();
        let mut report = DispatchReport::default();

        for pending in self.outbox.ready(now, usize::MAX)? {
            let intent = &pending.intent;
            match self.apply(intent) {
                Ok(applied) => {
                    self.outbox.resolve(&intent.intent_id)?;
                    if applied {
                        report.applied += 1;
                    } else {
                        report.already_applied += 1;
                    }
                    info!(intent_id = %intent.intent_id, attempts = pending.attempts, "parked reward applied");
                }
                Err(e) if is_permanent(&e) => {
                    warn!(intent_id = %intent.intent_id, error = %e, "parked reward rejected, dropping");
                    self.outbox.resolve(&intent.intent_id)?;
                    report.rejected += 1;
                }
                Err(e) => {
                    self.defer(intent, &e.to_string())?;
                    report.deferred += 1;
                }
            }
        }
        debug!(?report, "outbox retry pass finished");
        Ok(report)
    }

    /// Returns whether the intent paid something new.
    fn apply(&self, intent: &RewardIntent) -> Result<bool> {
        match &intent.kind {
            RewardKind::Pi {
                amount,
                source,
                description,
            } => self
                .ledger
                .grant_once(&intent.intent_id, &intent.user_id, *amount, *source, description)
                .map(|grant| grant.is_new()),
            RewardKind::Xp { amount, source } => self
                .leveling
                .add_xp_once(&intent.intent_id, &intent.user_id, *amount, *source)
                .map(|state| state.is_some()),
        }
    }

    fn defer(&self, intent: &RewardIntent, reason: &str) -> Result<()> {
        let now = self.clock.now();
        let parked = self.outbox.park(intent, reason, now)?;
        warn!(
            intent_id = %intent.intent_id,
            user_id = %intent.user_id,
            attempts = parked.attempts,
            %reason,
            "reward intent deferred"
        );
        self.events.push(Event::RewardIntentDeferred {
            intent_id: intent.intent_id.clone(),
            user_id: intent.user_id.clone(),
            reason: reason.to_string(),
            at: now,
        });
        Ok(())
    }
}

/// Errors a retry cannot fix.
fn is_permanent(err: &CoreError) -> bool {
    matches!(err, CoreError::InvalidAmount { .. })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::rewards::payment::{PaymentReceipt, PaymentSink, SimulatedWallet};
    use crate::storage::{KeyValueStore, MemoryStore};
    use chrono::{Duration, TimeZone};
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Wallet that can be switched offline.
    struct FlakyWallet {
        inner: SimulatedWallet,
        offline: AtomicBool,
    }

    impl PaymentSink for FlakyWallet {
        fn transfer(
            &self,
            user_id: &str,
            amount: Decimal,
            memo: &str,
        ) -> std::result::Result<PaymentReceipt, Box<dyn std::error::Error + Send + Sync>> {
            if self.offline.load(Ordering::SeqCst) {
                return Err("wallet offline".into());
            }
            self.inner.transfer(user_id, amount, memo)
        }
    }

    struct Fixture {
        dispatcher: RewardDispatcher,
        ledger: Arc<RewardLedger>,
        leveling: Arc<LevelingEngine>,
        wallet: Arc<FlakyWallet>,
        clock: Arc<ManualClock>,
        events: Arc<EventLog>,
    }

    fn fixture() -> Fixture {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 5, 1, 12, 0, 0).unwrap()));
        let events = Arc::new(EventLog::new());
        let wallet = Arc::new(FlakyWallet {
            inner: SimulatedWallet::new(store.clone()),
            offline: AtomicBool::new(false),
        });
        let ledger = Arc::new(RewardLedger::new(
            store.clone(),
            wallet.clone(),
            clock.clone(),
            events.clone(),
        ));
        let outbox = Arc::new(RewardOutbox::new(store.clone()));
        let leveling = Arc::new(LevelingEngine::new(
            store,
            ledger.clone(),
            outbox.clone(),
            clock.clone(),
            events.clone(),
            Decimal::ONE,
        ));
        let dispatcher = RewardDispatcher::new(
            ledger.clone(),
            leveling.clone(),
            outbox,
            clock.clone(),
            events.clone(),
        );
        Fixture {
            dispatcher,
            ledger,
            leveling,
            wallet,
            clock,
            events,
        }
    }

    fn intents(now: DateTime<Utc>) -> Vec<RewardIntent> {
        vec![
            RewardIntent::pi("badge:alice:first_stay:pi", "alice", Decimal::ONE, RewardSource::Achievement, "First stay", now),
            RewardIntent::xp("badge:alice:first_stay:xp", "alice", 50, RewardSource::Achievement, now),
        ]
    }

    #[test]
    fn dispatch_applies_each_intent_once() {
        let f = fixture();
        let batch = intents(f.clock.now());

        let first = f.dispatcher.dispatch(&batch).unwrap();
        assert_eq!(first.applied, 2);
        let second = f.dispatcher.dispatch(&batch).unwrap();
        assert_eq!(second.already_applied, 2);

        assert_eq!(f.ledger.balance_of("alice").unwrap(), Decimal::ONE);
        assert_eq!(f.leveling.level_of("alice").unwrap().unwrap().xp, 50);
    }

    #[test]
    fn failed_payment_is_parked_and_retried() {
        let f = fixture();
        f.wallet.offline.store(true, Ordering::SeqCst);

        let report = f.dispatcher.dispatch(&intents(f.clock.now())).unwrap();
        assert_eq!(report.deferred, 1);
        assert_eq!(report.applied, 1, "the xp intent does not touch the wallet");
        assert_eq!(f.dispatcher.outbox().len().unwrap(), 1);
        assert!(f
            .events
            .snapshot()
            .iter()
            .any(|e| matches!(e, Event::RewardIntentDeferred { .. })));

        f.wallet.offline.store(false, Ordering::SeqCst);
        // Still inside the backoff window.
        assert_eq!(f.dispatcher.retry_pending().unwrap(), DispatchReport::default());

        f.clock.advance(Duration::minutes(2));
        let retried = f.dispatcher.retry_pending().unwrap();
        assert_eq!(retried.applied, 1);
        assert!(f.dispatcher.outbox().is_empty().unwrap());
        assert_eq!(f.ledger.balance_of("alice").unwrap(), Decimal::ONE);
    }

    #[test]
    fn zero_amount_intent_is_rejected_not_parked() {
        let f = fixture();
        let zero = RewardIntent::pi("streak:zero", "alice", Decimal::ZERO, RewardSource::Streak, "7 days", f.clock.now());

        let report = f.dispatcher.dispatch(&[zero]).unwrap();
        assert_eq!(report.rejected, 1);
        assert_eq!(report.deferred, 0);
        assert!(!report.is_clean());
        assert!(f.dispatcher.outbox().is_empty().unwrap());
    }

    #[test]
    fn parked_zero_amount_intent_is_dropped_on_retry() {
        let f = fixture();
        let zero = RewardIntent::pi("streak:zero", "alice", Decimal::ZERO, RewardSource::Streak, "7 days", f.clock.now());
        f.dispatcher.outbox().park(&zero, "invalid amount", f.clock.now()).unwrap();

        f.clock.advance(Duration::minutes(2));
        let report = f.dispatcher.retry_pending().unwrap();
        assert_eq!(report.rejected, 1);
        assert!(f.dispatcher.outbox().is_empty().unwrap());
        assert_eq!(f.dispatcher.retry_pending().unwrap(), DispatchReport::default());
    }

    #[test]
    fn intents_serialize_with_kind_tag() {
        let intent = RewardIntent::xp("k", "alice", 10, RewardSource::Referral, Utc::now());
        let json = serde_json::to_value(&intent).unwrap();
        assert_eq!(json["kind"]["kind"], "xp");
        assert_eq!(json["kind"]["amount"], 10);
    }
}

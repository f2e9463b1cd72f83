//! Engine facade.
//!
//! [`Engine`] wires every component over one store, clock and event log and
//! exposes the operations callers use. Build one with [`EngineBuilder`]:
//!
//! ```no_run
//! use std::sync::Arc;
//! use hearth_core::{EngineBuilder, SqliteStore};
//!
//! let store = Arc::new(SqliteStore::open_default()?);
//! let engine = EngineBuilder::new().store(store).build();
//! engine.add_xp("alice", 120, hearth_core::RewardSource::Booking)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::clock::{Clock, SystemClock};
use crate::error::Result;
use crate::events::{Event, EventLog};
use crate::rewards::{
    ActivityType, BadgeAward, BadgeEngine, DispatchReport, LevelingEngine, PaymentSink,
    ReferralRecord, ReferralService, RewardDispatcher, RewardEntry, RewardLedger, RewardOutbox,
    RewardSource, SimulatedWallet, StreakState, StreakTracker, UserBadgeGrant, UserLevelState,
};
use crate::safety::{
    DeferredScheduler, EmergencyContactDirectory, EmergencyResponse, LoggingDispatcher,
    ManualScheduler, NotificationDispatcher, Resolution, SafetyCheckIn, SafetyCheckInService,
    StoreContactDirectory,
};
use crate::storage::{Config, KeyValueStore, MemoryStore};
use crate::transition::Transition;

/// Collaborators and policy for an [`Engine`]. Anything left unset falls
/// back to an in-memory store, the system clock, a manual scheduler and the
/// store-backed reference collaborators.
#[derive(Default)]
pub struct EngineBuilder {
    store: Option<Arc<dyn KeyValueStore>>,
    clock: Option<Arc<dyn Clock>>,
    scheduler: Option<Arc<dyn DeferredScheduler>>,
    payments: Option<Arc<dyn PaymentSink>>,
    contacts: Option<Arc<dyn EmergencyContactDirectory>>,
    notifier: Option<Arc<dyn NotificationDispatcher>>,
    config: Config,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn scheduler(mut self, scheduler: Arc<dyn DeferredScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn payments(mut self, payments: Arc<dyn PaymentSink>) -> Self {
        self.payments = Some(payments);
        self
    }

    pub fn contacts(mut self, contacts: Arc<dyn EmergencyContactDirectory>) -> Self {
        self.contacts = Some(contacts);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn NotificationDispatcher>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Engine {
        let store: Arc<dyn KeyValueStore> =
            self.store.unwrap_or_else(|| Arc::new(MemoryStore::new()));
        let clock: Arc<dyn Clock> = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let scheduler: Arc<dyn DeferredScheduler> = self
            .scheduler
            .unwrap_or_else(|| Arc::new(ManualScheduler::new()));
        let payments: Arc<dyn PaymentSink> = self
            .payments
            .unwrap_or_else(|| Arc::new(SimulatedWallet::new(store.clone())));
        let contacts: Arc<dyn EmergencyContactDirectory> = self
            .contacts
            .unwrap_or_else(|| Arc::new(StoreContactDirectory::new(store.clone())));
        let notifier: Arc<dyn NotificationDispatcher> =
            self.notifier.unwrap_or_else(|| Arc::new(LoggingDispatcher));
        let config = self.config;
        let events = Arc::new(EventLog::new());

        let ledger = Arc::new(RewardLedger::new(
            store.clone(),
            payments,
            clock.clone(),
            events.clone(),
        ));
        let outbox = Arc::new(RewardOutbox::new(store.clone()));
        let leveling = Arc::new(LevelingEngine::new(
            store.clone(),
            ledger.clone(),
            outbox.clone(),
            clock.clone(),
            events.clone(),
            config.rewards.level_up_bonus_per_level,
        ));
        let dispatcher = Arc::new(RewardDispatcher::new(
            ledger.clone(),
            leveling.clone(),
            outbox,
            clock.clone(),
            events.clone(),
        ));
        let badges = Arc::new(BadgeEngine::new(
            store.clone(),
            dispatcher.clone(),
            clock.clone(),
            events.clone(),
        ));
        let streaks = StreakTracker::new(
            store.clone(),
            dispatcher.clone(),
            badges.clone(),
            clock.clone(),
            events.clone(),
            config.streaks.clone(),
            config.rewards.clone(),
        );
        let referrals = ReferralService::new(
            store.clone(),
            dispatcher.clone(),
            clock.clone(),
            events.clone(),
            config.rewards.clone(),
        );
        let safety = SafetyCheckInService::new(
            store.clone(),
            contacts,
            notifier,
            scheduler,
            clock.clone(),
            events.clone(),
            config.safety.clone(),
        );

        Engine {
            store,
            clock,
            events,
            ledger,
            leveling,
            dispatcher,
            badges,
            streaks,
            referrals,
            safety,
            config,
        }
    }
}

pub struct Engine {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    events: Arc<EventLog>,
    ledger: Arc<RewardLedger>,
    leveling: Arc<LevelingEngine>,
    dispatcher: Arc<RewardDispatcher>,
    badges: Arc<BadgeEngine>,
    streaks: StreakTracker,
    referrals: ReferralService,
    safety: SafetyCheckInService,
    config: Config,
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn ledger(&self) -> &RewardLedger {
        &self.ledger
    }

    pub fn referrals(&self) -> &ReferralService {
        &self.referrals
    }

    pub fn safety(&self) -> &SafetyCheckInService {
        &self.safety
    }

    // Rewards

    pub fn add_xp(&self, user_id: &str, amount: i64, source: RewardSource) -> Result<Option<UserLevelState>> {
        self.leveling.add_xp(user_id, amount, source)
    }

    pub fn award_badge(&self, user_id: &str, badge_id: &str) -> Result<BadgeAward> {
        self.badges.award_badge(user_id, badge_id)
    }

    pub fn record_activity(&self, user_id: &str, activity: ActivityType) -> Result<StreakState> {
        self.streaks.record_activity(user_id, activity)
    }

    pub fn create_referral(&self, referrer_id: &str, referred_email: &str) -> Result<ReferralRecord> {
        self.referrals.create(referrer_id, referred_email)
    }

    pub fn mark_referral_signed_up(
        &self,
        referral_id: &str,
        referred_user_id: &str,
    ) -> Result<Transition<ReferralRecord>> {
        self.referrals.mark_signed_up(referral_id, referred_user_id)
    }

    pub fn complete_referral(
        &self,
        referral_id: &str,
        referred_user_id: &str,
    ) -> Result<Transition<ReferralRecord>> {
        self.referrals.complete(referral_id, referred_user_id)
    }

    pub fn retry_pending_rewards(&self) -> Result<DispatchReport> {
        self.dispatcher.retry_pending()
    }

    // Safety

    pub fn schedule_check_in(
        &self,
        booking_id: &str,
        user_id: &str,
        property_id: &str,
        scheduled_time: DateTime<Utc>,
    ) -> Result<SafetyCheckIn> {
        self.safety
            .schedule(booking_id, user_id, property_id, scheduled_time)
    }

    pub fn confirm_check_in(&self, check_in_id: &str) -> Result<Transition<SafetyCheckIn>> {
        self.safety.confirm(check_in_id)
    }

    pub fn escalate(&self, check_in_id: &str) -> Result<Option<EmergencyResponse>> {
        self.safety.escalate(check_in_id)
    }

    pub fn resolve_emergency(
        &self,
        check_in_id: &str,
        resolution: Resolution,
    ) -> Result<Transition<SafetyCheckIn>> {
        self.safety.resolve_emergency(check_in_id, resolution)
    }

    pub fn escalate_overdue(&self) -> Result<Vec<String>> {
        self.safety.escalate_overdue()
    }

    pub fn rearm_pending(&self) -> Result<usize> {
        self.safety.rearm_pending()
    }

    // Queries

    pub fn balance_of(&self, user_id: &str) -> Result<Decimal> {
        self.ledger.balance_of(user_id)
    }

    pub fn entries_for(&self, user_id: &str) -> Result<Vec<RewardEntry>> {
        self.ledger.entries_for(user_id)
    }

    pub fn level_of(&self, user_id: &str) -> Result<Option<UserLevelState>> {
        self.leveling.level_of(user_id)
    }

    pub fn badges_of(&self, user_id: &str) -> Result<Vec<UserBadgeGrant>> {
        self.badges.badges_of(user_id)
    }

    pub fn streak_of(&self, user_id: &str, activity: ActivityType) -> Result<Option<StreakState>> {
        self.streaks.streak_of(user_id, activity)
    }

    pub fn streaks_of(&self, user_id: &str) -> Result<Vec<StreakState>> {
        self.streaks.streaks_of(user_id)
    }

    pub fn pending_rewards(&self) -> Result<usize> {
        self.dispatcher.outbox().len()
    }

    pub fn drain_events(&self) -> Vec<Event> {
        self.events.drain()
    }
}

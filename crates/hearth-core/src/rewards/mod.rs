//! Gamification: Pi ledger, XP levels, badges, streaks and referrals.
//!
//! Every payout ends up in the [`RewardLedger`] (Pi) or the
//! [`LevelingEngine`] (XP) under a deterministic idempotency key, so any
//! award path can be retried without paying twice.

mod badges;
mod intents;
mod ledger;
mod leveling;
mod outbox;
mod payment;
mod referral;
mod streak;

pub use badges::{
    catalog, find_badge, BadgeAward, BadgeDefinition, BadgeEngine, BadgeRarity, UserBadgeGrant,
    STREAK_MASTER,
};
pub use intents::{DispatchReport, RewardDispatcher, RewardIntent, RewardKind};
pub use ledger::{Grant, RewardEntry, RewardLedger, RewardSource, RewardStatus};
pub use leveling::{
    benefits_for, LevelDefinition, LevelingEngine, UserLevelState, LEVEL_TABLE, MAX_LEVEL_SENTINEL,
};
pub use outbox::{PendingIntent, RewardOutbox};
pub use payment::{PaymentReceipt, PaymentSink, SimulatedWallet};
pub use referral::{ReferralRecord, ReferralService, ReferralStatus};
pub use streak::{ActivityType, StreakState, StreakTracker};

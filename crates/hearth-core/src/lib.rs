//! # Hearth Core Library
//!
//! Rewards and safety-escalation engine for a vacation-rental marketplace.
//! The library holds all business logic; the `hearth-cli` binary is a thin
//! operator interface over the same [`Engine`].
//!
//! ## Architecture
//!
//! - **Rewards**: append-only Pi ledger, XP levels with cascading level-ups,
//!   one-time badges, per-activity daily streaks and referrals. Every payout
//!   carries a deterministic idempotency key.
//! - **Safety**: one check-in per booking, escalated to an emergency
//!   notification fan-out when the guest does not confirm in time.
//! - **Storage**: a key-value store with compare-and-swap (SQLite or memory)
//!   behind typed repositories, and TOML configuration.
//!
//! ## Key Components
//!
//! - [`Engine`]: facade over every component
//! - [`RewardLedger`]: Pi balances
//! - [`SafetyCheckInService`]: check-in lifecycle and escalation
//! - [`KeyValueStore`]: storage abstraction

pub mod clock;
pub mod engine;
pub mod error;
pub mod events;
pub mod rewards;
pub mod safety;
pub mod storage;
pub mod transition;

pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::{Engine, EngineBuilder};
pub use error::{ConfigError, CoreError, Result, StoreError};
pub use events::{Event, EventLog};
pub use rewards::{
    ActivityType, BadgeAward, BadgeRarity, DispatchReport, PaymentSink, ReferralRecord,
    ReferralStatus, RewardEntry, RewardLedger, RewardSource, SimulatedWallet, StreakState,
    UserBadgeGrant, UserLevelState,
};
pub use safety::{
    CheckInStatus, DeferredScheduler, EmergencyContact, EmergencyContactDirectory,
    EmergencyResponse, EmergencyStatus, LoggingDispatcher, ManualScheduler,
    NotificationDispatcher, Resolution, SafetyCheckIn, SafetyCheckInService,
    StoreContactDirectory, TokioScheduler,
};
pub use storage::{Config, KeyValueStore, MemoryStore, SqliteStore};
pub use transition::Transition;

//! XP and level progression.
//!
//! XP deposits are converted into levels using a fixed table of cumulative
//! thresholds. One deposit can cross several levels; each level crossed is
//! its own event with its own bonus grant.
//!
//! ## Level-up loop
//!
//! ```text
//! xp += amount
//! while xp >= xp_to_next_level:
//!     level += 1, title/benefits from table
//!     xp_to_next_level = next threshold (or u64::MAX at the top)
//!     grant level × bonus_per_level Pi (key "level-up:<user>:<level>")
//! ```

use std::collections::BTreeSet;
use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::intents::{RewardIntent, RewardKind};
use super::ledger::{RewardLedger, RewardSource};
use super::outbox::RewardOutbox;
use crate::clock::Clock;
use crate::error::Result;
use crate::events::{Event, EventLog};
use crate::storage::{KeyValueStore, Mutation, Repository};

/// `xp_to_next_level` at the highest defined level.
pub const MAX_LEVEL_SENTINEL: u64 = u64::MAX;

/// One row of the level table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelDefinition {
    pub level: u32,
    pub title: &'static str,
    /// Cumulative XP needed to reach this level.
    pub threshold: u64,
    /// Perk unlocked on reaching this level.
    pub benefit: Option<&'static str>,
}

pub const LEVEL_TABLE: &[LevelDefinition] = &[
    LevelDefinition { level: 1, title: "Explorer", threshold: 0, benefit: Some("Earn Pi on every stay") },
    LevelDefinition { level: 2, title: "Wanderer", threshold: 100, benefit: Some("Priority support") },
    LevelDefinition { level: 3, title: "Traveler", threshold: 250, benefit: Some("5% booking discount") },
    LevelDefinition { level: 4, title: "Adventurer", threshold: 500, benefit: Some("Free late checkout") },
    LevelDefinition { level: 5, title: "Globetrotter", threshold: 1000, benefit: Some("10% booking discount") },
    LevelDefinition { level: 6, title: "Voyager", threshold: 2000, benefit: Some("Early access to new listings") },
    LevelDefinition { level: 7, title: "Nomad", threshold: 3500, benefit: Some("Free cancellation upgrade") },
    LevelDefinition { level: 8, title: "Pathfinder", threshold: 5500, benefit: Some("15% booking discount") },
    LevelDefinition { level: 9, title: "Ambassador", threshold: 8000, benefit: Some("Dedicated concierge") },
    LevelDefinition { level: 10, title: "Legend", threshold: 12000, benefit: Some("Annual free night") },
];

fn definition(level: u32) -> Option<&'static LevelDefinition> {
    LEVEL_TABLE.iter().find(|d| d.level == level)
}

/// Threshold of the level after `level`, or the sentinel at the top.
fn next_threshold(level: u32) -> u64 {
    definition(level + 1).map_or(MAX_LEVEL_SENTINEL, |d| d.threshold)
}

/// Benefits accumulate: a level keeps every perk below it.
pub fn benefits_for(level: u32) -> Vec<String> {
    LEVEL_TABLE
        .iter()
        .filter(|d| d.level <= level)
        .filter_map(|d| d.benefit.map(str::to_string))
        .collect()
}

/// Per-user progression state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserLevelState {
    pub user_id: String,
    pub current_level: u32,
    pub xp: u64,
    pub xp_to_next_level: u64,
    pub title: String,
    pub benefits: Vec<String>,
    /// Keys of the keyed deposits already counted in `xp`.
    #[serde(default)]
    pub applied_deposits: BTreeSet<String>,
}

impl UserLevelState {
    pub fn initial(user_id: &str) -> Self {
        let first = &LEVEL_TABLE[0];
        Self {
            user_id: user_id.to_string(),
            current_level: first.level,
            xp: 0,
            xp_to_next_level: next_threshold(first.level),
            title: first.title.to_string(),
            benefits: benefits_for(first.level),
            applied_deposits: BTreeSet::new(),
        }
    }

    pub fn is_max_level(&self) -> bool {
        self.xp_to_next_level == MAX_LEVEL_SENTINEL
    }

    /// Add XP and advance through every level reached. Returns the levels
    /// crossed, in order.
    fn deposit(&mut self, amount: u64) -> Vec<u32> {
        self.xp = self.xp.saturating_add(amount);

        let mut crossed = Vec::new();
        while self.xp >= self.xp_to_next_level {
            let Some(next) = definition(self.current_level + 1) else {
                self.xp_to_next_level = MAX_LEVEL_SENTINEL;
                break;
            };
            self.current_level = next.level;
            self.title = next.title.to_string();
            self.xp_to_next_level = next_threshold(next.level);
            self.benefits = benefits_for(next.level);
            crossed.push(next.level);
        }
        crossed
    }
}

pub struct LevelingEngine {
    states: Repository<UserLevelState>,
    ledger: Arc<RewardLedger>,
    outbox: Arc<RewardOutbox>,
    clock: Arc<dyn Clock>,
    events: Arc<EventLog>,
    bonus_per_level: Decimal,
}

impl LevelingEngine {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        ledger: Arc<RewardLedger>,
        outbox: Arc<RewardOutbox>,
        clock: Arc<dyn Clock>,
        events: Arc<EventLog>,
        bonus_per_level: Decimal,
    ) -> Self {
        Self {
            states: Repository::new(store, "level"),
            ledger,
            outbox,
            clock,
            events,
            bonus_per_level,
        }
    }

    /// Level state, or `None` for a user who never earned XP.
    pub fn level_of(&self, user_id: &str) -> Result<Option<UserLevelState>> {
        self.states.get(user_id)
    }

    /// Deposit XP. Non-positive amounts are a no-op that returns the current
    /// state.
    pub fn add_xp(
        &self,
        user_id: &str,
        amount: i64,
        source: RewardSource,
    ) -> Result<Option<UserLevelState>> {
        match u64::try_from(amount) {
            Ok(amount) if amount > 0 => self.apply_deposit(user_id, amount, source, None),
            _ => self.level_of(user_id),
        }
    }

    /// Deposit XP at most once for `key`.
    ///
    /// The key is recorded in the same write as the XP, so a deposit that
    /// failed can be retried and one that succeeded cannot repeat. Returns
    /// `None` when the key was applied before.
    pub fn add_xp_once(
        &self,
        key: &str,
        user_id: &str,
        amount: u64,
        source: RewardSource,
    ) -> Result<Option<UserLevelState>> {
        self.apply_deposit(user_id, amount, source, Some(key))
    }

    fn apply_deposit(
        &self,
        user_id: &str,
        amount: u64,
        source: RewardSource,
        key: Option<&str>,
    ) -> Result<Option<UserLevelState>> {
        let mut crossed = Vec::new();
        let mutation = self.states.modify(user_id, |current| {
            let mut state = current
                .cloned()
                .unwrap_or_else(|| UserLevelState::initial(user_id));
            if let Some(key) = key {
                if !state.applied_deposits.insert(key.to_string()) {
                    return None;
                }
            }
            crossed = state.deposit(amount);
            Some(state)
        })?;

        let Mutation::Written { current: state, .. } = mutation else {
            debug!(%user_id, key = key.unwrap_or_default(), "xp deposit already applied");
            return Ok(None);
        };
        debug!(%user_id, amount, ?source, xp = state.xp, level = state.current_level, "xp added");

        for level in crossed {
            self.pay_level_up(user_id, level)?;
        }
        Ok(Some(state))
    }

    fn pay_level_up(&self, user_id: &str, level: u32) -> Result<()> {
        let title = definition(level).map_or("", |d| d.title);
        let bonus = self.bonus_per_level * Decimal::from(level);
        let key = format!("level-up:{user_id}:{level}");
        let description = format!("Reached level {level} ({title})");

        info!(%user_id, level, %title, %bonus, "level up");
        self.events.push(Event::LevelUp {
            user_id: user_id.to_string(),
            level,
            title: title.to_string(),
            bonus,
            at: self.clock.now(),
        });

        if bonus <= Decimal::ZERO {
            return Ok(());
        }

        if let Err(e) = self
            .ledger
            .grant_once(&key, user_id, bonus, RewardSource::LevelUp, &description)
        {
            warn!(%user_id, level, error = %e, "level-up bonus deferred");
            let intent = RewardIntent {
                intent_id: key,
                user_id: user_id.to_string(),
                kind: RewardKind::Pi {
                    amount: bonus,
                    source: RewardSource::LevelUp,
                    description,
                },
                created_at: self.clock.now(),
            };
            self.outbox.park(&intent, &e.to_string(), self.clock.now())?;
            self.events.push(Event::RewardIntentDeferred {
                intent_id: intent.intent_id,
                user_id: user_id.to_string(),
                reason: e.to_string(),
                at: self.clock.now(),
            });
        }
        Ok(())
    }
}

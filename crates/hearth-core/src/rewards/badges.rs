//! One-time badge awards.
//!
//! A badge grant is written with insert-if-absent under
//! `badge/<user>/<badge>`, so concurrent awards of the same badge race on a
//! single key and exactly one wins. Only the winner emits the Pi and XP
//! intents.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::intents::{DispatchReport, RewardDispatcher, RewardIntent};
use super::ledger::RewardSource;
use crate::clock::Clock;
use crate::error::Result;
use crate::events::{Event, EventLog};
use crate::storage::{key_segment, KeyValueStore, Repository};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BadgeRarity {
    Common,
    Rare,
    Epic,
    Legendary,
}

impl BadgeRarity {
    /// XP paid alongside the badge's Pi reward.
    pub fn xp_reward(self) -> u64 {
        match self {
            BadgeRarity::Common => 50,
            BadgeRarity::Rare => 100,
            BadgeRarity::Epic => 200,
            BadgeRarity::Legendary => 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BadgeDefinition {
    pub badge_id: &'static str,
    pub name: &'static str,
    pub rarity: BadgeRarity,
    pub requirement_description: &'static str,
    pub pi_reward: Decimal,
}

pub const STREAK_MASTER: &str = "streak_master";

const CATALOG: &[(&str, &str, BadgeRarity, &str, i64)] = &[
    ("first_stay", "First Stay", BadgeRarity::Common, "Complete your first stay", 1),
    ("first_review", "First Review", BadgeRarity::Common, "Write your first review", 1),
    ("trusted_reviewer", "Trusted Reviewer", BadgeRarity::Rare, "Write 10 helpful reviews", 5),
    ("globetrotter", "Globetrotter", BadgeRarity::Epic, "Stay in 5 different countries", 10),
    (STREAK_MASTER, "Streak Master", BadgeRarity::Epic, "Keep a 30-day activity streak", 15),
    ("safe_traveler", "Safe Traveler", BadgeRarity::Rare, "Confirm 10 safety check-ins on time", 5),
    ("super_referrer", "Super Referrer", BadgeRarity::Epic, "Refer 5 friends who complete a booking", 12),
    ("founding_guest", "Founding Guest", BadgeRarity::Legendary, "Join during the launch season", 50),
];

/// The static badge catalog.
pub fn catalog() -> Vec<BadgeDefinition> {
    CATALOG
        .iter()
        .map(|&(badge_id, name, rarity, requirement_description, pi)| BadgeDefinition {
            badge_id,
            name,
            rarity,
            requirement_description,
            pi_reward: Decimal::from(pi),
        })
        .collect()
}

pub fn find_badge(badge_id: &str) -> Option<BadgeDefinition> {
    catalog().into_iter().find(|b| b.badge_id == badge_id)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserBadgeGrant {
    pub user_id: String,
    pub badge_id: String,
    pub earned_at: DateTime<Utc>,
}

/// Outcome of [`BadgeEngine::award_badge`].
#[derive(Debug, Clone, PartialEq)]
pub enum BadgeAward {
    Granted {
        grant: UserBadgeGrant,
        rewards: DispatchReport,
    },
    AlreadyHeld(UserBadgeGrant),
    UnknownBadge,
}

impl BadgeAward {
    pub fn granted(&self) -> bool {
        matches!(self, BadgeAward::Granted { .. })
    }
}

pub struct BadgeEngine {
    grants: Repository<UserBadgeGrant>,
    dispatcher: Arc<RewardDispatcher>,
    clock: Arc<dyn Clock>,
    events: Arc<EventLog>,
}

impl BadgeEngine {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        dispatcher: Arc<RewardDispatcher>,
        clock: Arc<dyn Clock>,
        events: Arc<EventLog>,
    ) -> Self {
        Self {
            grants: Repository::new(store, "badge"),
            dispatcher,
            clock,
            events,
        }
    }

    pub fn award_badge(&self, user_id: &str, badge_id: &str) -> Result<BadgeAward> {
        let Some(badge) = find_badge(badge_id) else {
            warn!(%user_id, %badge_id, "award requested for unknown badge");
            return Ok(BadgeAward::UnknownBadge);
        };

        let now = self.clock.now();
        let grant = UserBadgeGrant {
            user_id: user_id.to_string(),
            badge_id: badge_id.to_string(),
            earned_at: now,
        };
        let key = grant_key(user_id, badge_id);

        if !self.grants.insert_new(&key, &grant)? {
            debug!(%user_id, %badge_id, "badge already held");
            let held = self.grants.get(&key)?.unwrap_or(grant);
            return Ok(BadgeAward::AlreadyHeld(held));
        }

        info!(%user_id, %badge_id, rarity = ?badge.rarity, "badge awarded");
        self.events.push(Event::BadgeAwarded {
            user_id: user_id.to_string(),
            badge_id: badge_id.to_string(),
            at: now,
        });

        let intents = [
            RewardIntent::pi(
                format!("badge:{user_id}:{badge_id}:pi"),
                user_id,
                badge.pi_reward,
                RewardSource::Achievement,
                format!("Badge earned: {}", badge.name),
                now,
            ),
            RewardIntent::xp(
                format!("badge:{user_id}:{badge_id}:xp"),
                user_id,
                badge.rarity.xp_reward(),
                RewardSource::Achievement,
                now,
            ),
        ];
        let rewards = self.dispatcher.dispatch(&intents)?;

        Ok(BadgeAward::Granted { grant, rewards })
    }

    pub fn has_badge(&self, user_id: &str, badge_id: &str) -> Result<bool> {
        self.grants.contains(&grant_key(user_id, badge_id))
    }

    /// Badges held by `user_id`, in the order earned.
    pub fn badges_of(&self, user_id: &str) -> Result<Vec<UserBadgeGrant>> {
        let mut grants = self.grants.list(&format!("{}/", key_segment(user_id)))?;
        grants.sort_by(|a, b| a.earned_at.cmp(&b.earned_at).then_with(|| a.badge_id.cmp(&b.badge_id)));
        Ok(grants)
    }
}

fn grant_key(user_id: &str, badge_id: &str) -> String {
    format!("{}/{}", key_segment(user_id), key_segment(badge_id))
}

//! Per-activity daily streaks.
//!
//! One [`StreakState`] per `(user, activity)`, stored under
//! `streak/<user>/<activity>`. Days are calendar dates in the configured
//! UTC offset, so "yesterday" means the previous local date, not 24 hours
//! ago.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::badges::{BadgeEngine, STREAK_MASTER};
use super::intents::{RewardDispatcher, RewardIntent};
use super::ledger::RewardSource;
use crate::clock::{local_date, Clock};
use crate::error::{CoreError, Result};
use crate::events::{Event, EventLog};
use crate::storage::{
    key_segment, KeyValueStore, Mutation, Repository, RewardsConfig, StreaksConfig,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    DailyLogin,
    Booking,
    Review,
    CheckIn,
}

impl ActivityType {
    pub const ALL: [ActivityType; 4] = [
        ActivityType::DailyLogin,
        ActivityType::Booking,
        ActivityType::Review,
        ActivityType::CheckIn,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ActivityType::DailyLogin => "daily_login",
            ActivityType::Booking => "booking",
            ActivityType::Review => "review",
            ActivityType::CheckIn => "check_in",
        }
    }
}

impl fmt::Display for ActivityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActivityType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        ActivityType::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| format!("unknown activity type: {s}"))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreakState {
    pub user_id: String,
    pub activity_type: ActivityType,
    pub current_streak: u32,
    pub longest_streak: u32,
    pub last_activity_date: NaiveDate,
    pub bonus_multiplier: f64,
    /// First day of the current unbroken run.
    pub run_started_on: NaiveDate,
}

/// How one recorded activity changed the streak.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreakStep {
    Started,
    SameDay,
    Extended,
    Broken { previous: u32 },
}

/// Pure streak transition for an activity on `today`.
fn step(
    current: Option<&StreakState>,
    user_id: &str,
    activity: ActivityType,
    today: NaiveDate,
    config: &StreaksConfig,
) -> (StreakStep, Option<StreakState>) {
    let Some(state) = current else {
        let fresh = StreakState {
            user_id: user_id.to_string(),
            activity_type: activity,
            current_streak: 1,
            longest_streak: 1,
            last_activity_date: today,
            bonus_multiplier: 1.0,
            run_started_on: today,
        };
        return (StreakStep::Started, Some(fresh));
    };

    let diff = (today - state.last_activity_date).num_days();
    if diff <= 0 {
        // Same day, or the clock went backwards.
        return (StreakStep::SameDay, None);
    }

    let mut next = state.clone();
    next.last_activity_date = today;
    if diff == 1 {
        next.current_streak += 1;
        next.longest_streak = next.longest_streak.max(next.current_streak);
        next.bonus_multiplier = (1.0 + f64::from(next.current_streak) * config.multiplier_step)
            .min(config.multiplier_cap);
        (StreakStep::Extended, Some(next))
    } else {
        next.current_streak = 1;
        next.bonus_multiplier = 1.0;
        next.run_started_on = today;
        (
            StreakStep::Broken {
                previous: state.current_streak,
            },
            Some(next),
        )
    }
}

pub struct StreakTracker {
    states: Repository<StreakState>,
    dispatcher: Arc<RewardDispatcher>,
    badges: Arc<BadgeEngine>,
    clock: Arc<dyn Clock>,
    events: Arc<EventLog>,
    config: StreaksConfig,
    rewards: RewardsConfig,
}

impl StreakTracker {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        dispatcher: Arc<RewardDispatcher>,
        badges: Arc<BadgeEngine>,
        clock: Arc<dyn Clock>,
        events: Arc<EventLog>,
        config: StreaksConfig,
        rewards: RewardsConfig,
    ) -> Self {
        Self {
            states: Repository::new(store, "streak"),
            dispatcher,
            badges,
            clock,
            events,
            config,
            rewards,
        }
    }

    fn key(user_id: &str, activity: ActivityType) -> String {
        format!("{}/{activity}", key_segment(user_id))
    }

    pub fn streak_of(&self, user_id: &str, activity: ActivityType) -> Result<Option<StreakState>> {
        self.states.get(&Self::key(user_id, activity))
    }

    pub fn streaks_of(&self, user_id: &str) -> Result<Vec<StreakState>> {
        self.states.list(&format!("{}/", key_segment(user_id)))
    }

    /// Record one activity for today and pay any milestone it reaches.
    pub fn record_activity(&self, user_id: &str, activity: ActivityType) -> Result<StreakState> {
        let now = self.clock.now();
        let today = local_date(now, self.config.utc_offset_hours);

        let mut outcome = StreakStep::SameDay;
        let mutation = self.states.modify(&Self::key(user_id, activity), |current| {
            let (taken, next) = step(current, user_id, activity, today, &self.config);
            outcome = taken;
            next
        })?;

        let state = match mutation {
            Mutation::Written { current, .. } => current,
            Mutation::Unchanged(Some(current)) => {
                debug!(%user_id, %activity, streak = current.current_streak, "activity already counted today");
                return Ok(current);
            }
            Mutation::Unchanged(None) => {
                return Err(CoreError::not_found("streak", Self::key(user_id, activity)))
            }
        };

        match outcome {
            StreakStep::Broken { previous } => {
                info!(%user_id, %activity, previous, "streak broken");
                self.events.push(Event::StreakBroken {
                    user_id: user_id.to_string(),
                    activity,
                    previous_streak: previous,
                    at: now,
                });
            }
            StreakStep::Started | StreakStep::Extended => {
                debug!(%user_id, %activity, streak = state.current_streak, "streak extended");
                self.events.push(Event::StreakExtended {
                    user_id: user_id.to_string(),
                    activity,
                    current_streak: state.current_streak,
                    at: now,
                });
            }
            StreakStep::SameDay => {}
        }

        if state.current_streak == self.config.milestone_days {
            self.pay_milestone(&state)?;
        }
        if state.current_streak == self.config.master_badge_days {
            self.badges.award_badge(user_id, STREAK_MASTER)?;
        }

        Ok(state)
    }

    fn pay_milestone(&self, state: &StreakState) -> Result<()> {
        let now = self.clock.now();
        let days = state.current_streak;
        info!(user_id = %state.user_id, activity = %state.activity_type, days, "streak milestone");
        self.events.push(Event::StreakMilestone {
            user_id: state.user_id.clone(),
            activity: state.activity_type,
            days,
            at: now,
        });

        let bonus = self.rewards.streak_milestone_bonus;
        if bonus <= Decimal::ZERO {
            debug!(user_id = %state.user_id, %bonus, "milestone bonus disabled");
            return Ok(());
        }

        let intent = RewardIntent::pi(
            format!(
                "streak-milestone:{}:{}:{}",
                state.user_id, state.activity_type, state.run_started_on
            ),
            &state.user_id,
            bonus,
            RewardSource::Streak,
            format!("{days}-day {} streak", state.activity_type),
            now,
        );
        self.dispatcher.dispatch(&[intent])?;
        Ok(())
    }
}

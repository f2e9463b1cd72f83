use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::rewards::{ActivityType, RewardSource};
use crate::safety::EmergencyStatus;

/// Every state change in the engine produces an Event.
/// The UI polls for events; notification integrations subscribe to them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    RewardGranted {
        entry_id: String,
        user_id: String,
        amount: Decimal,
        source: RewardSource,
        at: DateTime<Utc>,
    },
    LevelUp {
        user_id: String,
        level: u32,
        title: String,
        bonus: Decimal,
        at: DateTime<Utc>,
    },
    BadgeAwarded {
        user_id: String,
        badge_id: String,
        at: DateTime<Utc>,
    },
    StreakExtended {
        user_id: String,
        activity: ActivityType,
        current_streak: u32,
        at: DateTime<Utc>,
    },
    /// A gap of more than one day reset the run.
    StreakBroken {
        user_id: String,
        activity: ActivityType,
        previous_streak: u32,
        at: DateTime<Utc>,
    },
    StreakMilestone {
        user_id: String,
        activity: ActivityType,
        days: u32,
        at: DateTime<Utc>,
    },
    ReferralCreated {
        referral_id: String,
        referrer_id: String,
        at: DateTime<Utc>,
    },
    ReferralSignedUp {
        referral_id: String,
        referred_user_id: String,
        at: DateTime<Utc>,
    },
    ReferralCompleted {
        referral_id: String,
        referred_user_id: String,
        at: DateTime<Utc>,
    },
    ReferralRewarded {
        referral_id: String,
        at: DateTime<Utc>,
    },
    CheckInScheduled {
        check_in_id: String,
        booking_id: String,
        deadline: DateTime<Utc>,
        at: DateTime<Utc>,
    },
    CheckInConfirmed {
        check_in_id: String,
        at: DateTime<Utc>,
    },
    EmergencyTriggered {
        check_in_id: String,
        response_id: String,
        contacts_notified: usize,
        at: DateTime<Utc>,
    },
    /// A contact could not be reached; the emergency itself stands.
    NotificationFailed {
        check_in_id: String,
        contact_id: String,
        reason: String,
        at: DateTime<Utc>,
    },
    EmergencyStatusChanged {
        check_in_id: String,
        status: EmergencyStatus,
        at: DateTime<Utc>,
    },
    /// A reward could not be paid right away and waits in the outbox.
    RewardIntentDeferred {
        intent_id: String,
        user_id: String,
        reason: String,
        at: DateTime<Utc>,
    },
}

/// Events kept when nobody drains the log.
pub const DEFAULT_EVENT_CAPACITY: usize = 10_000;

#[derive(Debug, Default)]
struct Buffer {
    events: VecDeque<Event>,
    dropped: u64,
}

/// Shared, bounded buffer of engine events. When full, the oldest event is
/// dropped to make room.
#[derive(Debug)]
pub struct EventLog {
    buffer: Mutex<Buffer>,
    capacity: usize,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Mutex::new(Buffer::default()),
            capacity: capacity.max(1),
        }
    }

    fn buffer(&self) -> MutexGuard<'_, Buffer> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, event: Event) {
        let mut buffer = self.buffer();
        if buffer.events.len() >= self.capacity {
            buffer.events.pop_front();
            buffer.dropped += 1;
            if buffer.dropped == 1 {
                warn!(capacity = self.capacity, "event log full, dropping oldest events");
            }
        }
        buffer.events.push_back(event);
    }

    /// Take every buffered event, oldest first.
    pub fn drain(&self) -> Vec<Event> {
        self.buffer().events.drain(..).collect()
    }

    /// Copy of the buffer without consuming it.
    pub fn snapshot(&self) -> Vec<Event> {
        self.buffer().events.iter().cloned().collect()
    }

    /// Events discarded because the buffer was full.
    pub fn dropped(&self) -> u64 {
        self.buffer().dropped
    }

    pub fn len(&self) -> usize {
        self.buffer().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_empties_the_log() {
        let log = EventLog::new();
        log.push(Event::ReferralRewarded {
            referral_id: "r1".into(),
            at: Utc::now(),
        });
        assert_eq!(log.len(), 1);
        assert_eq!(log.drain().len(), 1);
        assert!(log.is_empty());
    }

    #[test]
    fn full_log_drops_oldest_and_counts() {
        let log = EventLog::with_capacity(3);
        for i in 0..5 {
            log.push(Event::ReferralRewarded {
                referral_id: format!("r{i}"),
                at: Utc::now(),
            });
        }
        assert_eq!(log.len(), 3);
        assert_eq!(log.dropped(), 2);
        let ids: Vec<_> = log
            .drain()
            .into_iter()
            .map(|e| match e {
                Event::ReferralRewarded { referral_id, .. } => referral_id,
                other => panic!("unexpected event {other:?}"),
            })
            .collect();
        assert_eq!(ids, ["r2", "r3", "r4"]);
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let event = Event::CheckInConfirmed {
            check_in_id: "c1".into(),
            at: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "CheckInConfirmed");
        assert_eq!(json["check_in_id"], "c1");
    }
}

//! Integration tests for the SQLite-backed engine.
//!
//! Every aggregate must survive reopening the database, and idempotency keys
//! must keep holding across process restarts.

use std::sync::Arc;

use hearth_core::rewards::{ReferralStatus, RewardSource};
use hearth_core::{
    ActivityType, CheckInStatus, Engine, KeyValueStore, ManualScheduler, SqliteStore,
};
use rust_decimal::Decimal;
use tempfile::TempDir;

fn open(dir: &TempDir) -> Arc<dyn KeyValueStore> {
    Arc::new(SqliteStore::open(&dir.path().join("hearth.db")).unwrap())
}

#[test]
fn test_state_survives_reopen() {
    let dir = TempDir::new().unwrap();

    let referral_id = {
        let engine = Engine::builder().store(open(&dir)).build();
        engine.add_xp("alice", 150, RewardSource::Booking).unwrap();
        engine.award_badge("alice", "first_review").unwrap();
        engine.record_activity("alice", ActivityType::DailyLogin).unwrap();
        engine.create_referral("alice", "bob@example.com").unwrap().referral_id
    };

    let engine = Engine::builder().store(open(&dir)).build();
    let level = engine.level_of("alice").unwrap().unwrap();
    assert_eq!(level.xp, 200);
    assert_eq!(level.current_level, 2);
    // 2 Pi level bonus + 1 Pi badge.
    assert_eq!(engine.balance_of("alice").unwrap(), Decimal::from(3));
    assert_eq!(engine.badges_of("alice").unwrap().len(), 1);
    assert!(engine
        .streak_of("alice", ActivityType::DailyLogin)
        .unwrap()
        .is_some());

    let referral = engine.referrals().get(&referral_id).unwrap().unwrap();
    assert_eq!(referral.status, ReferralStatus::Invited);
}

#[test]
fn test_badge_stays_unique_across_restarts() {
    let dir = TempDir::new().unwrap();
    {
        let engine = Engine::builder().store(open(&dir)).build();
        assert!(engine.award_badge("alice", "founding_guest").unwrap().granted());
    }
    let engine = Engine::builder().store(open(&dir)).build();
    assert!(!engine.award_badge("alice", "founding_guest").unwrap().granted());
    let founding: Decimal = engine
        .entries_for("alice")
        .unwrap()
        .iter()
        .filter(|e| e.source == RewardSource::Achievement)
        .map(|e| e.amount)
        .sum();
    assert_eq!(founding, Decimal::from(50));
}

#[test]
fn test_check_in_escalates_after_restart() {
    let dir = TempDir::new().unwrap();
    let check_in = {
        let engine = Engine::builder().store(open(&dir)).build();
        engine
            .schedule_check_in("booking-7", "alice", "cabin-3", chrono::Utc::now() - chrono::Duration::hours(3))
            .unwrap()
    };

    let scheduler = Arc::new(ManualScheduler::new());
    let engine = Engine::builder()
        .store(open(&dir))
        .scheduler(scheduler.clone())
        .build();
    assert_eq!(engine.rearm_pending().unwrap(), 0, "deadline already passed");
    assert_eq!(engine.escalate_overdue().unwrap(), vec![check_in.check_in_id.clone()]);

    let stored = engine.safety().get(&check_in.check_in_id).unwrap().unwrap();
    assert_eq!(stored.status, CheckInStatus::Emergency);
}

//! Integration tests for safety check-ins.
//!
//! Drives the full check-in lifecycle against a manual scheduler (and the
//! tokio scheduler with paused time): confirmation racing the deadline,
//! escalation with contact snapshots, overdue sweeps and emergency
//! resolution.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, TimeZone, Utc};
use hearth_core::safety::{Job, NotificationAck};
use hearth_core::{
    CheckInStatus, Clock, CoreError, DeferredScheduler, EmergencyContact, EmergencyStatus, Engine,
    Event, KeyValueStore, ManualClock, ManualScheduler, MemoryStore, NotificationDispatcher,
    Resolution, StoreContactDirectory, SystemClock, TokioScheduler, Transition,
};

/// Records every notification; fails for contacts named in `failing`.
#[derive(Default)]
struct RecordingDispatcher {
    sent: Mutex<Vec<String>>,
    failing: Vec<String>,
}

impl RecordingDispatcher {
    fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

impl NotificationDispatcher for RecordingDispatcher {
    fn notify(
        &self,
        contact: &EmergencyContact,
        _message: &str,
    ) -> Result<NotificationAck, Box<dyn std::error::Error + Send + Sync>> {
        if self.failing.contains(&contact.name) {
            return Err(format!("sms gateway rejected {}", contact.phone).into());
        }
        self.sent.lock().unwrap().push(contact.name.clone());
        Ok(NotificationAck {
            contact_id: contact.contact_id.clone(),
            channel: "sms".into(),
            sent_at: Utc::now(),
        })
    }
}

/// Scheduler whose first `schedule` call fails.
struct FailFirstScheduler {
    inner: ManualScheduler,
    failed: AtomicBool,
}

impl DeferredScheduler for FailFirstScheduler {
    fn schedule(&self, job_id: &str, due: DateTime<Utc>, job: Job) -> hearth_core::Result<()> {
        if !self.failed.swap(true, Ordering::SeqCst) {
            return Err(CoreError::Scheduler("timer service unavailable".into()));
        }
        self.inner.schedule(job_id, due, job)
    }

    fn cancel(&self, job_id: &str) -> bool {
        self.inner.cancel(job_id)
    }

    fn pending(&self) -> usize {
        self.inner.pending()
    }
}

struct Harness {
    engine: Engine,
    clock: Arc<ManualClock>,
    scheduler: Arc<ManualScheduler>,
    contacts: StoreContactDirectory,
    dispatcher: Arc<RecordingDispatcher>,
}

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 7, 10, 15, 0, 0).unwrap()
}

fn harness_with(scheduler: ManualScheduler, dispatcher: RecordingDispatcher) -> Harness {
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(start()));
    let scheduler = Arc::new(scheduler);
    let dispatcher = Arc::new(dispatcher);
    let engine = Engine::builder()
        .store(store.clone())
        .clock(clock.clone())
        .scheduler(scheduler.clone())
        .notifier(dispatcher.clone())
        .build();
    Harness {
        engine,
        clock,
        scheduler,
        contacts: StoreContactDirectory::new(store),
        dispatcher,
    }
}

fn harness() -> Harness {
    harness_with(ManualScheduler::new(), RecordingDispatcher::default())
}

impl Harness {
    /// Move time to `at` and run whatever came due.
    fn fire_at(&self, at: DateTime<Utc>) -> usize {
        self.clock.set(at);
        self.scheduler.run_due(at)
    }
}

#[test]
fn test_schedule_sets_deadline_after_grace_period() {
    let h = harness();
    let check_in = h
        .engine
        .schedule_check_in("booking-1", "alice", "villa-9", start())
        .unwrap();
    assert_eq!(check_in.status, CheckInStatus::Pending);
    assert_eq!(check_in.deadline, start() + Duration::hours(2));
    assert_eq!(h.scheduler.due_times(), vec![(check_in.check_in_id, check_in.deadline)]);
}

#[test]
fn test_one_check_in_per_booking() {
    let h = harness();
    let first = h
        .engine
        .schedule_check_in("booking-1", "alice", "villa-9", start())
        .unwrap();
    let second = h
        .engine
        .schedule_check_in("booking-1", "alice", "villa-9", start() + Duration::hours(1))
        .unwrap();
    assert_eq!(first, second);
    assert_eq!(h.scheduler.pending(), 1);
    assert_eq!(
        h.engine.safety().for_booking("booking-1").unwrap().unwrap().check_in_id,
        first.check_in_id
    );
}

#[test]
fn test_confirm_before_deadline_prevents_escalation() {
    let h = harness();
    let check_in = h
        .engine
        .schedule_check_in("booking-1", "alice", "villa-9", start())
        .unwrap();

    h.clock.advance(Duration::minutes(30));
    let confirmed = h.engine.confirm_check_in(&check_in.check_in_id).unwrap();
    assert!(confirmed.is_applied());
    assert_eq!(h.scheduler.pending(), 0);

    h.fire_at(check_in.deadline + Duration::minutes(1));
    let stored = h.engine.safety().get(&check_in.check_in_id).unwrap().unwrap();
    assert_eq!(stored.status, CheckInStatus::Confirmed);
    assert!(stored.emergency_response.is_none());
}

#[test]
fn test_late_timer_after_confirm_is_harmless() {
    let h = harness_with(
        ManualScheduler::ignoring_cancellation(),
        RecordingDispatcher::default(),
    );
    h.contacts.add("alice", "Mum", "+1555", "mum@example.com", true).unwrap();
    let check_in = h
        .engine
        .schedule_check_in("booking-1", "alice", "villa-9", start())
        .unwrap();
    h.engine.confirm_check_in(&check_in.check_in_id).unwrap();

    // Cancellation was lost; the job still runs.
    assert_eq!(h.fire_at(check_in.deadline), 1);

    let stored = h.engine.safety().get(&check_in.check_in_id).unwrap().unwrap();
    assert_eq!(stored.status, CheckInStatus::Confirmed);
    assert!(stored.emergency_response.is_none());
    assert!(h.dispatcher.sent().is_empty());
    assert!(!h
        .engine
        .drain_events()
        .iter()
        .any(|e| matches!(e, Event::EmergencyTriggered { .. })));
}

#[test]
fn test_missed_deadline_escalates_with_contact_snapshot() {
    let h = harness();
    h.contacts.add("alice", "Mum", "+1555", "mum@example.com", true).unwrap();
    let check_in = h
        .engine
        .schedule_check_in("booking-1", "alice", "villa-9", start())
        .unwrap();
    // Added before the trigger, so part of the snapshot.
    h.contacts.add("alice", "Sam", "+1556", "sam@example.com", false).unwrap();

    assert_eq!(h.fire_at(check_in.deadline), 1);

    let stored = h.engine.safety().get(&check_in.check_in_id).unwrap().unwrap();
    assert_eq!(stored.status, CheckInStatus::Emergency);
    let response = stored.emergency_response.clone().unwrap();
    assert_eq!(response.status, EmergencyStatus::Active);
    assert!(response.authorities_notified);
    assert_eq!(response.triggered_at, check_in.deadline);
    let names: Vec<_> = response.notified_contacts.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, ["Mum", "Sam"]);
    assert_eq!(h.dispatcher.sent(), ["Mum", "Sam"]);

    // Contacts added afterwards do not change the stored response.
    h.contacts.add("alice", "Late", "+1557", "late@example.com", false).unwrap();
    let again = h.engine.escalate(&check_in.check_in_id).unwrap();
    assert!(again.is_none());
    let stored = h.engine.safety().get(&check_in.check_in_id).unwrap().unwrap();
    assert_eq!(stored.emergency_response.unwrap(), response);
    assert_eq!(h.dispatcher.sent().len(), 2);
}

#[test]
fn test_concurrent_escalations_raise_one_emergency() {
    let h = harness();
    h.contacts.add("alice", "Mum", "+1555", "mum@example.com", true).unwrap();
    let check_in = h
        .engine
        .schedule_check_in("booking-1", "alice", "villa-9", start())
        .unwrap();
    h.clock.set(check_in.deadline);

    let winners = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| scope.spawn(|| h.engine.escalate(&check_in.check_in_id).unwrap()))
            .collect();
        handles
            .into_iter()
            .filter_map(|handle| handle.join().unwrap())
            .count()
    });

    assert_eq!(winners, 1);
    assert_eq!(h.dispatcher.sent(), ["Mum"]);
}

#[test]
fn test_confirm_after_emergency_does_not_unescalate() {
    let h = harness();
    let check_in = h
        .engine
        .schedule_check_in("booking-1", "alice", "villa-9", start())
        .unwrap();
    h.fire_at(check_in.deadline);

    let late = h.engine.confirm_check_in(&check_in.check_in_id).unwrap();
    assert!(matches!(late, Transition::AlreadyTerminal(_)));
    assert_eq!(late.value().status, CheckInStatus::Emergency);
}

#[test]
fn test_failed_notification_keeps_emergency() {
    let h = harness_with(
        ManualScheduler::new(),
        RecordingDispatcher {
            failing: vec!["Mum".into()],
            ..Default::default()
        },
    );
    h.contacts.add("alice", "Mum", "+1555", "mum@example.com", true).unwrap();
    h.contacts.add("alice", "Sam", "+1556", "sam@example.com", false).unwrap();
    let check_in = h
        .engine
        .schedule_check_in("booking-1", "alice", "villa-9", start())
        .unwrap();
    h.fire_at(check_in.deadline);

    let stored = h.engine.safety().get(&check_in.check_in_id).unwrap().unwrap();
    assert_eq!(stored.status, CheckInStatus::Emergency);
    assert_eq!(h.dispatcher.sent(), ["Sam"]);

    let events = h.engine.drain_events();
    assert!(events
        .iter()
        .any(|e| matches!(e, Event::NotificationFailed { .. })));
    assert!(events.iter().any(|e| matches!(
        e,
        Event::EmergencyTriggered {
            contacts_notified: 1,
            ..
        }
    )));
}

#[test]
fn test_escalation_without_contacts_still_triggers() {
    let h = harness();
    let check_in = h
        .engine
        .schedule_check_in("booking-1", "alice", "villa-9", start())
        .unwrap();
    h.fire_at(check_in.deadline);

    let response = h
        .engine
        .safety()
        .get(&check_in.check_in_id)
        .unwrap()
        .unwrap()
        .emergency_response
        .unwrap();
    assert!(response.notified_contacts.is_empty());
    assert!(response.authorities_notified);
}

#[test]
fn test_resolve_emergency_only_from_active() {
    let h = harness();
    let check_in = h
        .engine
        .schedule_check_in("booking-1", "alice", "villa-9", start())
        .unwrap();

    let early = h
        .engine
        .resolve_emergency(&check_in.check_in_id, Resolution::Resolved)
        .unwrap();
    assert!(!early.is_applied());

    h.fire_at(check_in.deadline);
    h.clock.advance(Duration::minutes(20));
    let resolved = h
        .engine
        .resolve_emergency(&check_in.check_in_id, Resolution::FalseAlarm)
        .unwrap();
    assert!(resolved.is_applied());
    let response = resolved.value().emergency_response.clone().unwrap();
    assert_eq!(response.status, EmergencyStatus::FalseAlarm);
    assert_eq!(response.resolved_at, Some(h.clock.now()));
    assert_eq!(resolved.value().status, CheckInStatus::Emergency);

    let again = h
        .engine
        .resolve_emergency(&check_in.check_in_id, Resolution::Resolved)
        .unwrap();
    assert!(!again.is_applied());
    assert_eq!(
        again.value().emergency_response.as_ref().unwrap().status,
        EmergencyStatus::FalseAlarm
    );
}

#[test]
fn test_escalate_before_deadline_is_refused() {
    let h = harness();
    h.contacts.add("alice", "Mum", "+1555", "mum@example.com", true).unwrap();
    let check_in = h
        .engine
        .schedule_check_in("booking-1", "alice", "villa-9", start())
        .unwrap();

    h.clock.advance(Duration::minutes(1));
    assert!(h.engine.escalate(&check_in.check_in_id).unwrap().is_none());

    let stored = h.engine.safety().get(&check_in.check_in_id).unwrap().unwrap();
    assert_eq!(stored.status, CheckInStatus::Pending);
    assert!(stored.emergency_response.is_none());
    assert!(h.dispatcher.sent().is_empty());
    assert!(h.engine.confirm_check_in(&check_in.check_in_id).unwrap().is_applied());
}

#[test]
fn test_snapshot_excludes_contacts_of_other_users() {
    let h = harness();
    h.contacts.add("alice", "Mum", "+1555", "mum@example.com", true).unwrap();
    h.contacts.add("alice/guest", "Stranger", "+1999", "x@example.com", true).unwrap();
    let check_in = h
        .engine
        .schedule_check_in("booking-1", "alice", "villa-9", start())
        .unwrap();

    h.fire_at(check_in.deadline);

    let stored = h.engine.safety().get(&check_in.check_in_id).unwrap().unwrap();
    let names: Vec<_> = stored
        .emergency_response
        .unwrap()
        .notified_contacts
        .into_iter()
        .map(|c| c.name)
        .collect();
    assert_eq!(names, ["Mum"]);
    assert_eq!(h.dispatcher.sent(), ["Mum"]);
}

#[test]
fn test_reschedule_arms_check_in_left_without_timer() {
    let clock = Arc::new(ManualClock::new(start()));
    let scheduler = Arc::new(FailFirstScheduler {
        inner: ManualScheduler::new(),
        failed: AtomicBool::new(false),
    });
    let engine = Engine::builder()
        .clock(clock.clone())
        .scheduler(scheduler.clone())
        .build();

    let err = engine
        .schedule_check_in("booking-1", "alice", "villa-9", start())
        .unwrap_err();
    assert!(matches!(err, CoreError::Scheduler(_)));
    assert_eq!(scheduler.pending(), 0);

    let check_in = engine
        .schedule_check_in("booking-1", "alice", "villa-9", start())
        .unwrap();
    assert_eq!(check_in.status, CheckInStatus::Pending);
    assert_eq!(scheduler.pending(), 1);

    clock.set(check_in.deadline);
    assert_eq!(scheduler.inner.run_due(check_in.deadline), 1);
    let stored = engine.safety().get(&check_in.check_in_id).unwrap().unwrap();
    assert_eq!(stored.status, CheckInStatus::Emergency);
}

#[test]
fn test_unknown_check_in_is_not_found() {
    let h = harness();
    assert!(matches!(
        h.engine.confirm_check_in("nope"),
        Err(CoreError::NotFound { .. })
    ));
    assert!(matches!(h.engine.escalate("nope"), Err(CoreError::NotFound { .. })));
}

#[test]
fn test_overdue_sweep_recovers_lost_timers() {
    let h = harness();
    let due_soon = h
        .engine
        .schedule_check_in("booking-1", "alice", "villa-9", start())
        .unwrap();
    let due_later = h
        .engine
        .schedule_check_in("booking-2", "bob", "loft-2", start() + Duration::hours(6))
        .unwrap();

    assert!(h.engine.escalate_overdue().unwrap().is_empty());

    // Time passes without the scheduler running.
    h.clock.set(due_soon.deadline + Duration::minutes(5));
    let escalated = h.engine.escalate_overdue().unwrap();
    assert_eq!(escalated, vec![due_soon.check_in_id.clone()]);
    assert_eq!(h.scheduler.pending(), 1, "the sweep drops the stale job");

    let later = h.engine.safety().get(&due_later.check_in_id).unwrap().unwrap();
    assert_eq!(later.status, CheckInStatus::Pending);
    assert!(h.engine.escalate_overdue().unwrap().is_empty());
}

#[test]
fn test_rearm_after_restart() {
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(start()));

    let before = Engine::builder()
        .store(store.clone())
        .clock(clock.clone())
        .build();
    let pending = before
        .schedule_check_in("booking-1", "alice", "villa-9", start())
        .unwrap();
    let confirmed = before
        .schedule_check_in("booking-2", "bob", "loft-2", start())
        .unwrap();
    before.confirm_check_in(&confirmed.check_in_id).unwrap();
    drop(before);

    let scheduler = Arc::new(ManualScheduler::new());
    let after = Engine::builder()
        .store(store)
        .clock(clock.clone())
        .scheduler(scheduler.clone())
        .build();
    assert_eq!(after.rearm_pending().unwrap(), 1);
    assert_eq!(scheduler.due_times()[0].0, pending.check_in_id);

    clock.set(pending.deadline);
    scheduler.run_due(pending.deadline);
    let stored = after.safety().get(&pending.check_in_id).unwrap().unwrap();
    assert_eq!(stored.status, CheckInStatus::Emergency);
}

#[tokio::test(start_paused = true)]
async fn test_tokio_scheduler_escalates_at_deadline() {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let scheduler = Arc::new(TokioScheduler::current(clock.clone()).unwrap());
    let engine = Engine::builder()
        .clock(clock.clone())
        .scheduler(scheduler.clone())
        .build();

    let check_in = engine
        .schedule_check_in("booking-1", "alice", "villa-9", clock.now())
        .unwrap();
    assert_eq!(scheduler.pending(), 1);

    tokio::time::sleep(std::time::Duration::from_secs(2 * 3600 + 60)).await;
    let mut status = CheckInStatus::Pending;
    for _ in 0..100 {
        status = engine.safety().get(&check_in.check_in_id).unwrap().unwrap().status;
        if status == CheckInStatus::Emergency {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(status, CheckInStatus::Emergency);
    assert_eq!(scheduler.pending(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_tokio_scheduler_confirm_cancels_escalation() {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let scheduler = Arc::new(TokioScheduler::current(clock.clone()).unwrap());
    let engine = Engine::builder()
        .clock(clock.clone())
        .scheduler(scheduler.clone())
        .build();

    let check_in = engine
        .schedule_check_in("booking-1", "alice", "villa-9", clock.now())
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_secs(600)).await;
    engine.confirm_check_in(&check_in.check_in_id).unwrap();
    assert_eq!(scheduler.pending(), 0);

    tokio::time::sleep(std::time::Duration::from_secs(3 * 3600)).await;
    let stored = engine.safety().get(&check_in.check_in_id).unwrap().unwrap();
    assert_eq!(stored.status, CheckInStatus::Confirmed);
}

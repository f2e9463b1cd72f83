//! Check-in scheduling and escalation.
//!
//! ## Lifecycle
//!
//! ```text
//! schedule ──▶ pending ──confirm──▶ confirmed
//!                 │
//!           deadline passes
//!                 ▼
//!              missed ──contacts snapshotted──▶ emergency (+ EmergencyResponse)
//! ```
//!
//! Every transition is a compare-and-swap on the check-in document. The
//! deferred escalation and a late confirm can race freely: whichever commits
//! first decides, and only the writer of `emergency` sends notifications.

use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::checkin::{CheckInStatus, EmergencyResponse, EmergencyStatus, SafetyCheckIn};
use super::contacts::{EmergencyContact, EmergencyContactDirectory};
use super::notify::NotificationDispatcher;
use super::scheduler::DeferredScheduler;
use crate::clock::Clock;
use crate::error::{CoreError, Result};
use crate::events::{Event, EventLog};
use crate::storage::{KeyValueStore, Mutation, Repository, SafetyConfig};
use crate::transition::Transition;

/// How an active emergency ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    Resolved,
    FalseAlarm,
}

impl From<Resolution> for EmergencyStatus {
    fn from(resolution: Resolution) -> Self {
        match resolution {
            Resolution::Resolved => EmergencyStatus::Resolved,
            Resolution::FalseAlarm => EmergencyStatus::FalseAlarm,
        }
    }
}

/// Check-in ids are derived from the booking id, which makes the
/// one-check-in-per-booking rule a plain insert-if-absent.
pub fn check_in_id_for(booking_id: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, booking_id.as_bytes()).to_string()
}

struct Inner {
    check_ins: Repository<SafetyCheckIn>,
    contacts: Arc<dyn EmergencyContactDirectory>,
    notifier: Arc<dyn NotificationDispatcher>,
    scheduler: Arc<dyn DeferredScheduler>,
    clock: Arc<dyn Clock>,
    events: Arc<EventLog>,
    config: SafetyConfig,
}

#[derive(Clone)]
pub struct SafetyCheckInService {
    inner: Arc<Inner>,
}

impl SafetyCheckInService {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        contacts: Arc<dyn EmergencyContactDirectory>,
        notifier: Arc<dyn NotificationDispatcher>,
        scheduler: Arc<dyn DeferredScheduler>,
        clock: Arc<dyn Clock>,
        events: Arc<EventLog>,
        config: SafetyConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                check_ins: Repository::new(store, "checkin"),
                contacts,
                notifier,
                scheduler,
                clock,
                events,
                config,
            }),
        }
    }

    pub fn get(&self, check_in_id: &str) -> Result<Option<SafetyCheckIn>> {
        self.inner.check_ins.get(check_in_id)
    }

    pub fn for_booking(&self, booking_id: &str) -> Result<Option<SafetyCheckIn>> {
        self.get(&check_in_id_for(booking_id))
    }

    pub fn all(&self) -> Result<Vec<SafetyCheckIn>> {
        let mut all = self.inner.check_ins.list("")?;
        all.sort_by(|a, b| a.deadline.cmp(&b.deadline));
        Ok(all)
    }

    /// Create the check-in for a booking and arm its escalation. A booking
    /// that already has one gets it back unchanged.
    pub fn schedule(
        &self,
        booking_id: &str,
        user_id: &str,
        property_id: &str,
        scheduled_time: DateTime<Utc>,
    ) -> Result<SafetyCheckIn> {
        let check_in = SafetyCheckIn {
            check_in_id: check_in_id_for(booking_id),
            booking_id: booking_id.to_string(),
            user_id: user_id.to_string(),
            property_id: property_id.to_string(),
            scheduled_time,
            deadline: scheduled_time + self.inner.config.grace_period(),
            status: CheckInStatus::Pending,
            confirmed_at: None,
            emergency_response: None,
        };

        if !self.inner.check_ins.insert_new(&check_in.check_in_id, &check_in)? {
            debug!(%booking_id, "check-in already scheduled for booking");
            let existing = self
                .get(&check_in.check_in_id)?
                .ok_or_else(|| CoreError::not_found("check-in", check_in.check_in_id.clone()))?;
            // An earlier call may have stored the check-in but failed to arm it.
            // Schedulers replace jobs by id, so arming again is harmless.
            if existing.status == CheckInStatus::Pending {
                arm(&self.inner, &existing)?;
            }
            return Ok(existing);
        }

        arm(&self.inner, &check_in)?;
        info!(
            check_in_id = %check_in.check_in_id,
            %booking_id,
            %user_id,
            deadline = %check_in.deadline,
            "check-in scheduled"
        );
        self.inner.events.push(Event::CheckInScheduled {
            check_in_id: check_in.check_in_id.clone(),
            booking_id: booking_id.to_string(),
            deadline: check_in.deadline,
            at: self.inner.clock.now(),
        });
        Ok(check_in)
    }

    /// Guest confirmed they are fine.
    pub fn confirm(&self, check_in_id: &str) -> Result<Transition<SafetyCheckIn>> {
        let now = self.inner.clock.now();
        let mutation = self.inner.check_ins.modify(check_in_id, |current| {
            let check_in = current?;
            if check_in.status != CheckInStatus::Pending {
                return None;
            }
            let mut next = check_in.clone();
            next.status = CheckInStatus::Confirmed;
            next.confirmed_at = Some(now);
            Some(next)
        })?;

        match mutation {
            Mutation::Written { current, .. } => {
                let cancelled = self.inner.scheduler.cancel(check_in_id);
                info!(%check_in_id, cancelled, "check-in confirmed");
                self.inner.events.push(Event::CheckInConfirmed {
                    check_in_id: check_in_id.to_string(),
                    at: now,
                });
                Ok(Transition::Applied(current))
            }
            Mutation::Unchanged(Some(check_in)) => {
                debug!(%check_in_id, status = ?check_in.status, "confirm on settled check-in");
                Ok(Transition::AlreadyTerminal(check_in))
            }
            Mutation::Unchanged(None) => Err(CoreError::not_found("check-in", check_in_id)),
        }
    }

    /// Escalate a check-in whose deadline passed without confirmation.
    ///
    /// Returns the response when this call raised the emergency, `None` when
    /// there was nothing to do. A pending check-in whose deadline is still
    /// ahead is left alone.
    pub fn escalate(&self, check_in_id: &str) -> Result<Option<EmergencyResponse>> {
        escalate(&self.inner, check_in_id, Trigger::OnDemand)
    }

    /// Escalate every check-in past its deadline that is still awaiting
    /// escalation. Returns the ids escalated by this sweep.
    pub fn escalate_overdue(&self) -> Result<Vec<String>> {
        let now = self.inner.clock.now();
        let mut escalated = Vec::new();
        for check_in in self.inner.check_ins.list("")? {
            if !check_in.is_overdue(now) {
                continue;
            }
            self.inner.scheduler.cancel(&check_in.check_in_id);
            if escalate(&self.inner, &check_in.check_in_id, Trigger::OnDemand)?.is_some() {
                escalated.push(check_in.check_in_id);
            }
        }
        if !escalated.is_empty() {
            info!(count = escalated.len(), "overdue check-ins escalated");
        }
        Ok(escalated)
    }

    /// Re-arm escalation for pending check-ins still before their deadline.
    pub fn rearm_pending(&self) -> Result<usize> {
        let now = self.inner.clock.now();
        let mut armed = 0;
        for check_in in self.inner.check_ins.list("")? {
            if check_in.status == CheckInStatus::Pending && check_in.deadline > now {
                arm(&self.inner, &check_in)?;
                armed += 1;
            }
        }
        debug!(armed, "pending check-ins re-armed");
        Ok(armed)
    }

    /// Close an active emergency.
    pub fn resolve_emergency(
        &self,
        check_in_id: &str,
        resolution: Resolution,
    ) -> Result<Transition<SafetyCheckIn>> {
        let now = self.inner.clock.now();
        let status = EmergencyStatus::from(resolution);
        let mutation = self.inner.check_ins.modify(check_in_id, |current| {
            let check_in = current?;
            let response = check_in.emergency_response.as_ref()?;
            if response.status != EmergencyStatus::Active {
                return None;
            }
            let mut next = check_in.clone();
            if let Some(response) = next.emergency_response.as_mut() {
                response.status = status;
                response.resolved_at = Some(now);
            }
            Some(next)
        })?;

        match mutation {
            Mutation::Written { current, .. } => {
                info!(%check_in_id, ?status, "emergency closed");
                self.inner.events.push(Event::EmergencyStatusChanged {
                    check_in_id: check_in_id.to_string(),
                    status,
                    at: now,
                });
                Ok(Transition::Applied(current))
            }
            Mutation::Unchanged(Some(check_in)) => Ok(Transition::AlreadyTerminal(check_in)),
            Mutation::Unchanged(None) => Err(CoreError::not_found("check-in", check_in_id)),
        }
    }
}

fn arm(inner: &Arc<Inner>, check_in: &SafetyCheckIn) -> Result<()> {
    let weak: Weak<Inner> = Arc::downgrade(inner);
    let id = check_in.check_in_id.clone();
    inner.scheduler.schedule(
        &check_in.check_in_id,
        check_in.deadline,
        Box::new(move || {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if let Err(e) = escalate(&inner, &id, Trigger::Timer) {
                error!(check_in_id = %id, error = %e, "deferred escalation failed");
            }
        }),
    )
}

/// What started an escalation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    /// The armed job fired. Schedulers only run a job once it is due, and the
    /// job's clock may differ from the scheduler's timer.
    Timer,
    /// An explicit call or an overdue sweep, checked against the clock.
    OnDemand,
}

fn escalate(
    inner: &Inner,
    check_in_id: &str,
    trigger: Trigger,
) -> Result<Option<EmergencyResponse>> {
    let asked_at = inner.clock.now();

    // pending → missed. A check-in already missed without a response is an
    // escalation interrupted after this step.
    let missed = inner.check_ins.modify(check_in_id, |current| {
        let check_in = current?;
        if check_in.status != CheckInStatus::Pending {
            return None;
        }
        if trigger == Trigger::OnDemand && asked_at < check_in.deadline {
            return None;
        }
        let mut next = check_in.clone();
        next.status = CheckInStatus::Missed;
        Some(next)
    })?;

    let check_in = match missed.into_current() {
        Some(c) if c.status == CheckInStatus::Missed && c.emergency_response.is_none() => c,
        Some(c) if c.status == CheckInStatus::Pending => {
            debug!(%check_in_id, deadline = %c.deadline, "check-in not yet due");
            return Ok(None);
        }
        Some(c) => {
            debug!(%check_in_id, status = ?c.status, "escalation not needed");
            return Ok(None);
        }
        None => return Err(CoreError::not_found("check-in", check_in_id)),
    };
    warn!(%check_in_id, user_id = %check_in.user_id, "check-in missed");

    let contacts = match inner.contacts.list_contacts(&check_in.user_id) {
        Ok(contacts) => contacts,
        Err(e) => {
            // Escalate regardless; authorities are still notified.
            let err = CoreError::Directory(e.to_string());
            error!(%check_in_id, error = %err, "contact lookup failed");
            Vec::new()
        }
    };

    let now = inner.clock.now();
    let response = EmergencyResponse {
        response_id: Uuid::new_v4().to_string(),
        check_in_id: check_in_id.to_string(),
        triggered_at: now,
        notified_contacts: contacts,
        authorities_notified: inner.config.notify_authorities,
        status: EmergencyStatus::Active,
        resolved_at: None,
    };

    let raised = inner.check_ins.modify(check_in_id, |current| {
        let check_in = current?;
        if check_in.status != CheckInStatus::Missed || check_in.emergency_response.is_some() {
            return None;
        }
        let mut next = check_in.clone();
        next.status = CheckInStatus::Emergency;
        next.emergency_response = Some(response.clone());
        Some(next)
    })?;
    if !raised.is_written() {
        debug!(%check_in_id, "another escalation raised the emergency first");
        return Ok(None);
    }

    let message = alert_message(&check_in);
    let mut delivered = 0;
    for contact in &response.notified_contacts {
        if dispatch(inner, check_in_id, contact, &message) {
            delivered += 1;
        }
    }

    error!(
        %check_in_id,
        response_id = %response.response_id,
        contacts = response.notified_contacts.len(),
        delivered,
        authorities = response.authorities_notified,
        "emergency triggered"
    );
    inner.events.push(Event::EmergencyTriggered {
        check_in_id: check_in_id.to_string(),
        response_id: response.response_id.clone(),
        contacts_notified: delivered,
        at: now,
    });
    Ok(Some(response))
}

fn dispatch(inner: &Inner, check_in_id: &str, contact: &EmergencyContact, message: &str) -> bool {
    match inner.notifier.notify(contact, message) {
        Ok(ack) => {
            debug!(%check_in_id, contact_id = %ack.contact_id, channel = %ack.channel, "contact notified");
            true
        }
        Err(e) => {
            warn!(%check_in_id, contact_id = %contact.contact_id, error = %e, "notification failed");
            inner.events.push(Event::NotificationFailed {
                check_in_id: check_in_id.to_string(),
                contact_id: contact.contact_id.clone(),
                reason: e.to_string(),
                at: inner.clock.now(),
            });
            false
        }
    }
}

fn alert_message(check_in: &SafetyCheckIn) -> String {
    format!(
        "Safety alert: guest {} did not confirm their arrival check-in at property {} \
         (booking {}, due {}). Please try to reach them.",
        check_in.user_id,
        check_in.property_id,
        check_in.booking_id,
        check_in.deadline.format("%Y-%m-%d %H:%M UTC"),
    )
}

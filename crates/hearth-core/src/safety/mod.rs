//! Post-arrival safety check-ins and emergency escalation.

mod checkin;
mod contacts;
mod notify;
mod scheduler;
mod service;

pub use checkin::{CheckInStatus, EmergencyResponse, EmergencyStatus, SafetyCheckIn};
pub use contacts::{EmergencyContact, EmergencyContactDirectory, StoreContactDirectory};
pub use notify::{LoggingDispatcher, NotificationAck, NotificationDispatcher};
pub use scheduler::{DeferredScheduler, Job, ManualScheduler, TokioScheduler};
pub use service::{check_in_id_for, Resolution, SafetyCheckInService};

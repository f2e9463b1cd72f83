use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::contacts::EmergencyContact;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckInStatus {
    Pending,
    Confirmed,
    Missed,
    Emergency,
}

impl CheckInStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, CheckInStatus::Confirmed | CheckInStatus::Emergency)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmergencyStatus {
    Active,
    Resolved,
    FalseAlarm,
}

/// Created once when a check-in escalates. Only `status` and `resolved_at`
/// change afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmergencyResponse {
    pub response_id: String,
    pub check_in_id: String,
    pub triggered_at: DateTime<Utc>,
    /// Contacts as listed at trigger time.
    pub notified_contacts: Vec<EmergencyContact>,
    pub authorities_notified: bool,
    pub status: EmergencyStatus,
    pub resolved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyCheckIn {
    pub check_in_id: String,
    pub booking_id: String,
    pub user_id: String,
    pub property_id: String,
    pub scheduled_time: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    pub status: CheckInStatus,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub emergency_response: Option<EmergencyResponse>,
}

impl SafetyCheckIn {
    /// Whether the deferred escalation still has work to do.
    pub fn awaiting_escalation(&self) -> bool {
        match self.status {
            CheckInStatus::Pending => true,
            CheckInStatus::Missed => self.emergency_response.is_none(),
            CheckInStatus::Confirmed | CheckInStatus::Emergency => false,
        }
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.awaiting_escalation() && self.deadline <= now
    }
}

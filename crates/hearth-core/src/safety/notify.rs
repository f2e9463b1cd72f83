use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::contacts::EmergencyContact;

/// Delivery acknowledgement from a notification channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationAck {
    pub contact_id: String,
    pub channel: String,
    pub sent_at: DateTime<Utc>,
}

pub trait NotificationDispatcher: Send + Sync {
    fn notify(
        &self,
        contact: &EmergencyContact,
        message: &str,
    ) -> Result<NotificationAck, Box<dyn std::error::Error + Send + Sync>>;
}

/// Dispatcher that writes each notification to the log instead of sending it.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingDispatcher;

impl NotificationDispatcher for LoggingDispatcher {
    fn notify(
        &self,
        contact: &EmergencyContact,
        message: &str,
    ) -> Result<NotificationAck, Box<dyn std::error::Error + Send + Sync>> {
        warn!(
            contact_id = %contact.contact_id,
            name = %contact.name,
            phone = %contact.phone,
            %message,
            "emergency notification"
        );
        Ok(NotificationAck {
            contact_id: contact.contact_id.clone(),
            channel: "log".to_string(),
            sent_at: Utc::now(),
        })
    }
}

//! FinePay Notify - Notification Dispatcher seam
//!
//! Both engines report fee and sanction events through a [`Notifier`]. Calls are
//! made only after the owning transaction has committed, and a failed delivery
//! never undoes the ledger write that caused it.

pub mod error;

pub use error::{NotifyError, NotifyResult};

use async_trait::async_trait;
use finepay_core::{LicenseStatus, SanctionType, SuspensionRecord, Ticket};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use strum_macros::{Display, EnumString};
use tokio::sync::Mutex;

/// What happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum NotificationEvent {
    LateFeeApplied,
    SuspensionImposed,
    RevocationImposed,
    SanctionLifted,
}

/// Channel a notification went out on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMethod {
    Sms,
    Email,
    Log,
}

/// Outcome of one dispatch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delivery {
    pub success: bool,
    pub method: DeliveryMethod,
}

/// A message about a ticket or a profile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub event: NotificationEvent,
    pub government_id: String,
    pub ticket_id: Option<String>,
    pub profile_id: Option<String>,
    pub amount: Option<Decimal>,
    pub message: String,
}

impl Notification {
    pub fn late_fee(ticket: &Ticket, amount: Decimal) -> Self {
        Self {
            event: NotificationEvent::LateFeeApplied,
            government_id: ticket.government_id.clone(),
            ticket_id: Some(ticket.id.clone()),
            profile_id: ticket.profile_id.clone(),
            amount: Some(amount),
            message: format!(
                "A late fee of {} was added to ticket {}. Amount now due: {}",
                amount,
                ticket.id,
                ticket.amount_due()
            ),
        }
    }

    pub fn sanction_imposed(record: &SuspensionRecord) -> Self {
        let event = match record.sanction_type {
            SanctionType::Suspension => NotificationEvent::SuspensionImposed,
            SanctionType::Revocation => NotificationEvent::RevocationImposed,
        };
        let status = record.sanction_type.license_status();
        Self {
            event,
            government_id: record.government_id.clone(),
            ticket_id: None,
            profile_id: Some(record.profile_id.clone()),
            amount: None,
            message: format!(
                "Your licence is {} from {} until {} ({} demerit points)",
                describe(status),
                record.effective_date,
                record.end_date,
                record.points_at_incident
            ),
        }
    }

    pub fn sanction_lifted(record: &SuspensionRecord) -> Self {
        Self {
            event: NotificationEvent::SanctionLifted,
            government_id: record.government_id.clone(),
            ticket_id: None,
            profile_id: Some(record.profile_id.clone()),
            amount: None,
            message: format!("Your licence {} has been lifted", record.sanction_type),
        }
    }

    /// Ticket id if present, otherwise profile id
    pub fn subject(&self) -> &str {
        self.ticket_id
            .as_deref()
            .or(self.profile_id.as_deref())
            .unwrap_or("")
    }
}

fn describe(status: LicenseStatus) -> &'static str {
    match status {
        LicenseStatus::Revoked => "revoked",
        LicenseStatus::Suspended => "suspended",
        LicenseStatus::Warning | LicenseStatus::Clear => "restricted",
    }
}

/// Notification Dispatcher
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Channel name for logging
    fn name(&self) -> &str;

    /// Deliver one notification
    async fn notify(&self, notification: &Notification) -> NotifyResult<Delivery>;
}

/// Writes notifications to the tracing log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn notify(&self, notification: &Notification) -> NotifyResult<Delivery> {
        tracing::info!(
            event = %notification.event,
            government_id = %notification.government_id,
            subject = notification.subject(),
            "{}",
            notification.message
        );
        Ok(Delivery {
            success: true,
            method: DeliveryMethod::Log,
        })
    }
}

/// In-memory notifier for testing
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
    failing: Mutex<HashSet<String>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make deliveries about `subject` (ticket or profile id) fail
    pub async fn fail_for(&self, subject: impl Into<String>) {
        self.failing.lock().await.insert(subject.into());
    }

    /// Notifications delivered so far
    pub async fn sent(&self) -> Vec<Notification> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    fn name(&self) -> &str {
        "recording"
    }

    async fn notify(&self, notification: &Notification) -> NotifyResult<Delivery> {
        if self.failing.lock().await.contains(notification.subject()) {
            return Err(NotifyError::Delivery(format!(
                "simulated failure for {}",
                notification.subject()
            )));
        }
        self.sent.lock().await.push(notification.clone());
        Ok(Delivery {
            success: true,
            method: DeliveryMethod::Sms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn ticket() -> Ticket {
        let mut t = Ticket::new(
            "T-1",
            "GOV-1",
            "SPD",
            dec!(100),
            NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
        );
        t.late_fee_total = dec!(25);
        t
    }

    #[test]
    fn test_late_fee_message() {
        let n = Notification::late_fee(&ticket(), dec!(25));
        assert_eq!(n.event, NotificationEvent::LateFeeApplied);
        assert_eq!(n.subject(), "T-1");
        assert!(n.message.contains("125"));
    }

    #[tokio::test]
    async fn test_recording_notifier_failures() {
        let notifier = RecordingNotifier::new();
        notifier.fail_for("T-1").await;

        let err = notifier
            .notify(&Notification::late_fee(&ticket(), dec!(25)))
            .await
            .unwrap_err();
        assert!(matches!(err, NotifyError::Delivery(_)));
        assert!(notifier.sent().await.is_empty());

        let mut other = ticket();
        other.id = "T-2".to_string();
        let delivery = notifier
            .notify(&Notification::late_fee(&other, dec!(25)))
            .await
            .unwrap();
        assert!(delivery.success);
        assert_eq!(notifier.sent().await.len(), 1);
    }

    #[tokio::test]
    async fn test_log_notifier_always_succeeds() {
        let delivery = LogNotifier
            .notify(&Notification::late_fee(&ticket(), dec!(5)))
            .await
            .unwrap();
        assert_eq!(delivery.method, DeliveryMethod::Log);
    }
}

//! Tickets (fee/status fields mutated by the late-fee engine)

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// Ticket payment status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Unpaid,
    Overdue,
    Paid,
    Voided,
}

impl TicketStatus {
    /// Whether a ticket in this status can still accrue late fees
    pub fn is_open(&self) -> bool {
        matches!(self, TicketStatus::Unpaid | TicketStatus::Overdue)
    }
}

/// A traffic fine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: String,
    pub government_id: String,
    pub profile_id: Option<String>,
    pub offence_code: String,
    pub offence_category: Option<String>,
    pub fine_amount: Decimal,
    /// Late fees accrued so far
    pub late_fee_total: Decimal,
    pub due_date: NaiveDate,
    pub status: TicketStatus,
    /// Set while the ticket is under challenge
    pub late_fee_paused: bool,
    pub notification_sent: bool,
    pub notification_sent_at: Option<DateTime<Utc>>,
    pub last_late_fee_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Ticket {
    pub fn new(
        id: impl Into<String>,
        government_id: impl Into<String>,
        offence_code: impl Into<String>,
        fine_amount: Decimal,
        due_date: NaiveDate,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            government_id: government_id.into(),
            profile_id: None,
            offence_code: offence_code.into(),
            offence_category: None,
            fine_amount,
            late_fee_total: Decimal::ZERO,
            due_date,
            status: TicketStatus::Unpaid,
            late_fee_paused: false,
            notification_sent: false,
            notification_sent_at: None,
            last_late_fee_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.offence_category = Some(category.into());
        self
    }

    pub fn with_profile(mut self, profile_id: impl Into<String>) -> Self {
        self.profile_id = Some(profile_id.into());
        self
    }

    /// Days past the due date (zero or negative when not yet due)
    pub fn days_overdue(&self, today: NaiveDate) -> i64 {
        (today - self.due_date).num_days()
    }

    /// Fine plus accrued late fees
    pub fn amount_due(&self) -> Decimal {
        self.fine_amount + self.late_fee_total
    }
}

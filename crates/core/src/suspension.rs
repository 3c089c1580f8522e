//! Licence sanctions

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::{REVOCATION_DAYS, SUSPENSION_DAYS};

/// Licence status derived from the rolling demerit total.
///
/// Variants are ordered by severity.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, EnumString, Display,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum LicenseStatus {
    Clear,
    Warning,
    Suspended,
    Revoked,
}

/// Kind of sanction a record imposes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, EnumString, Display)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SanctionType {
    Suspension,
    Revocation,
}

impl SanctionType {
    /// Length of an automatically imposed sanction
    pub fn default_days(&self) -> i64 {
        match self {
            SanctionType::Suspension => SUSPENSION_DAYS,
            SanctionType::Revocation => REVOCATION_DAYS,
        }
    }

    /// Licence status this sanction corresponds to
    pub fn license_status(&self) -> LicenseStatus {
        match self {
            SanctionType::Suspension => LicenseStatus::Suspended,
            SanctionType::Revocation => LicenseStatus::Revoked,
        }
    }
}

/// Record lifecycle. Everything except `Active` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SanctionStatus {
    Active,
    Lifted,
    Expired,
    /// Replaced by a more severe sanction in the same episode
    Superseded,
}

/// Who imposed the sanction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SanctionSource {
    Automatic,
    Manual,
}

/// A suspension or revocation episode
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuspensionRecord {
    pub id: String,
    pub government_id: String,
    pub profile_id: String,
    pub sanction_type: SanctionType,
    pub status: SanctionStatus,
    pub points_at_incident: i64,
    pub threshold_exceeded: i64,
    pub effective_date: NaiveDate,
    pub end_date: NaiveDate,
    pub reason: String,
    pub offence_codes: Vec<String>,
    pub source: SanctionSource,
    pub source_reference: Option<String>,
    pub lifted_at: Option<DateTime<Utc>>,
    pub lifted_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl SuspensionRecord {
    /// End date for a sanction starting on `effective_date`
    pub fn end_date_for(sanction_type: SanctionType, effective_date: NaiveDate) -> NaiveDate {
        effective_date + Duration::days(sanction_type.default_days())
    }

    /// Whether the record still restricts the licence on `today`
    pub fn is_in_force(&self, today: NaiveDate) -> bool {
        self.status == SanctionStatus::Active && self.end_date > today
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_severity_order() {
        assert!(LicenseStatus::Clear < LicenseStatus::Warning);
        assert!(LicenseStatus::Warning < LicenseStatus::Suspended);
        assert!(LicenseStatus::Suspended < LicenseStatus::Revoked);
    }

    #[test]
    fn test_end_dates() {
        let start = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        assert_eq!(
            SuspensionRecord::end_date_for(SanctionType::Suspension, start),
            NaiveDate::from_ymd_opt(2026, 1, 1).unwrap()
        );
        assert_eq!(
            SuspensionRecord::end_date_for(SanctionType::Revocation, start),
            NaiveDate::from_ymd_opt(2027, 1, 1).unwrap()
        );
    }
}

//! Citizen profiles

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::IdentityKind;

/// Contact details used by the notification dispatcher
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactInfo {
    pub phone: Option<String>,
    pub email: Option<String>,
}

/// One profile per (government, identity hash).
///
/// Created lazily on the first violation or merit award; never hard-deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CitizenProfile {
    pub id: String,
    pub government_id: String,
    pub identity_kind: IdentityKind,
    pub identity_hash: String,
    pub identifier_hint: String,
    pub contact: ContactInfo,
    /// Demerit points ever assigned, including expired ones
    pub lifetime_demerit_points: i64,
    pub violation_count: i64,
    pub clean_streak_days: i64,
    pub last_violation_at: Option<DateTime<Utc>>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CitizenProfile {
    /// Date the current clean streak started
    pub fn clean_since(&self) -> NaiveDate {
        self.last_violation_at
            .unwrap_or(self.created_at)
            .date_naive()
    }

    /// Whole days without a violation as of `today`
    pub fn clean_days(&self, today: NaiveDate) -> i64 {
        (today - self.clean_since()).num_days().max(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn profile(created: DateTime<Utc>, last_violation: Option<DateTime<Utc>>) -> CitizenProfile {
        CitizenProfile {
            id: "P-1".to_string(),
            government_id: "GOV-1".to_string(),
            identity_kind: IdentityKind::DriverLicense,
            identity_hash: "hash".to_string(),
            identifier_hint: "1234".to_string(),
            contact: ContactInfo::default(),
            lifetime_demerit_points: 0,
            violation_count: 0,
            clean_streak_days: 0,
            last_violation_at: last_violation,
            active: true,
            created_at: created,
            updated_at: created,
        }
    }

    #[test]
    fn test_clean_days_from_creation() {
        let created = Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap();
        let p = profile(created, None);
        let today = NaiveDate::from_ymd_opt(2024, 7, 1).unwrap();
        assert_eq!(p.clean_days(today), 182);
    }

    #[test]
    fn test_clean_days_from_last_violation() {
        let created = Utc.with_ymd_and_hms(2022, 1, 1, 8, 0, 0).unwrap();
        let violation = Utc.with_ymd_and_hms(2024, 6, 21, 8, 0, 0).unwrap();
        let p = profile(created, Some(violation));
        let today = NaiveDate::from_ymd_opt(2024, 7, 1).unwrap();
        assert_eq!(p.clean_days(today), 10);
    }
}

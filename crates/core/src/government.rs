//! Government (tenant) records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// Tenant lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum GovernmentStatus {
    /// Live tenant
    Active,
    /// Trial tenant, processed like an active one
    Pilot,
    /// Onboarded but not yet live
    Inactive,
    /// Access withdrawn
    Suspended,
}

impl GovernmentStatus {
    /// Whether the daily batch job processes this tenant
    pub fn is_scheduled(&self) -> bool {
        matches!(self, GovernmentStatus::Active | GovernmentStatus::Pilot)
    }
}

/// An isolated customer organisation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Government {
    pub id: String,
    pub name: String,
    pub status: GovernmentStatus,
    pub created_at: DateTime<Utc>,
}

impl Government {
    pub fn new(id: impl Into<String>, name: impl Into<String>, status: GovernmentStatus) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            status,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_scheduled_statuses() {
        assert!(GovernmentStatus::Active.is_scheduled());
        assert!(GovernmentStatus::Pilot.is_scheduled());
        assert!(!GovernmentStatus::Inactive.is_scheduled());
        assert!(!GovernmentStatus::Suspended.is_scheduled());
    }

    #[test]
    fn test_status_string_form() {
        assert_eq!(GovernmentStatus::Pilot.to_string(), "pilot");
        assert_eq!(GovernmentStatus::from_str("active").unwrap(), GovernmentStatus::Active);
    }
}

//! Late-fee schedules and audit events

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::ticket::Ticket;

/// How a fee is computed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum FeeStructure {
    /// Fixed amount, charged once
    Flat,
    /// Amount banded by days overdue
    Tiered,
    /// Share of the fine amount
    Percentage,
    /// Rate per day overdue, optionally capped
    Daily,
    /// Sum of every active rule of the configuration
    Combination,
}

/// One band of a tiered schedule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeTier {
    /// Inclusive
    pub min_days: i64,
    /// Inclusive; open-ended when absent
    pub max_days: Option<i64>,
    pub amount: Decimal,
}

impl FeeTier {
    pub fn contains(&self, days_overdue: i64) -> bool {
        days_overdue >= self.min_days && self.max_days.map_or(true, |max| days_overdue <= max)
    }
}

/// One fee component of a configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LateFeeRule {
    pub id: String,
    pub configuration_id: String,
    pub structure: FeeStructure,
    pub active: bool,
    /// Lower runs first
    pub priority: i64,
    pub flat_amount: Option<Decimal>,
    /// Percentage rate as a fraction (0.10 = 10%)
    pub rate: Option<Decimal>,
    pub daily_rate: Option<Decimal>,
    /// Ceiling for this rule's cumulative contribution
    pub cap: Option<Decimal>,
    pub tiers: Vec<FeeTier>,
}

impl LateFeeRule {
    /// A rule with no parameters set
    pub fn new(id: impl Into<String>, configuration_id: impl Into<String>, structure: FeeStructure) -> Self {
        Self {
            id: id.into(),
            configuration_id: configuration_id.into(),
            structure,
            active: true,
            priority: 100,
            flat_amount: None,
            rate: None,
            daily_rate: None,
            cap: None,
            tiers: Vec::new(),
        }
    }

    pub fn flat(id: impl Into<String>, configuration_id: impl Into<String>, amount: Decimal) -> Self {
        let mut rule = Self::new(id, configuration_id, FeeStructure::Flat);
        rule.flat_amount = Some(amount);
        rule
    }

    pub fn daily(
        id: impl Into<String>,
        configuration_id: impl Into<String>,
        daily_rate: Decimal,
        cap: Option<Decimal>,
    ) -> Self {
        let mut rule = Self::new(id, configuration_id, FeeStructure::Daily);
        rule.daily_rate = Some(daily_rate);
        rule.cap = cap;
        rule
    }

    pub fn percentage(id: impl Into<String>, configuration_id: impl Into<String>, rate: Decimal) -> Self {
        let mut rule = Self::new(id, configuration_id, FeeStructure::Percentage);
        rule.rate = Some(rate);
        rule
    }

    pub fn tiered(id: impl Into<String>, configuration_id: impl Into<String>, tiers: Vec<FeeTier>) -> Self {
        let mut rule = Self::new(id, configuration_id, FeeStructure::Tiered);
        rule.tiers = tiers;
        rule
    }
}

/// Late-fee schedule for a government, an offence category, or a single offence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LateFeeConfiguration {
    pub id: String,
    pub government_id: String,
    pub offence_category: Option<String>,
    pub offence_code: Option<String>,
    pub structure: FeeStructure,
    pub enabled: bool,
    pub active: bool,
    /// Days after the due date before the first cycle starts
    pub grace_period_days: i64,
    /// Length of one accrual cycle
    pub cycle_days: i64,
    /// Ceiling on the ticket's accrued late fees
    pub max_total_fee: Option<Decimal>,
    pub rules: Vec<LateFeeRule>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LateFeeConfiguration {
    /// Government-wide schedule
    pub fn government_wide(id: impl Into<String>, government_id: impl Into<String>, structure: FeeStructure) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            government_id: government_id.into(),
            offence_category: None,
            offence_code: None,
            structure,
            enabled: true,
            active: true,
            grace_period_days: 0,
            cycle_days: 7,
            max_total_fee: None,
            rules: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_rule(mut self, rule: LateFeeRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// 0 = government-wide, 1 = offence category, 2 = single offence
    pub fn specificity(&self) -> u8 {
        match (&self.offence_code, &self.offence_category) {
            (Some(_), _) => 2,
            (None, Some(_)) => 1,
            (None, None) => 0,
        }
    }

    pub fn is_government_wide(&self) -> bool {
        self.specificity() == 0
    }

    /// Whether this schedule covers `ticket`
    pub fn applies_to(&self, ticket: &Ticket) -> bool {
        if !self.active || self.government_id != ticket.government_id {
            return false;
        }
        match (&self.offence_code, &self.offence_category) {
            (Some(code), _) => *code == ticket.offence_code,
            (None, Some(category)) => ticket.offence_category.as_deref() == Some(category.as_str()),
            (None, None) => true,
        }
    }

    /// Active rules ordered by priority
    pub fn active_rules(&self) -> Vec<&LateFeeRule> {
        let mut rules: Vec<&LateFeeRule> = self.rules.iter().filter(|r| r.active).collect();
        rules.sort_by_key(|r| r.priority);
        rules
    }
}

/// One line of a fee computation breakdown
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeComponent {
    pub rule_id: String,
    pub structure: FeeStructure,
    pub detail: String,
    pub amount: Decimal,
}

/// Immutable audit record of one fee application
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LateFeeEvent {
    pub id: String,
    pub government_id: String,
    pub ticket_id: String,
    pub configuration_id: String,
    pub structure: FeeStructure,
    /// Accrual cycle this charge belongs to (1-based)
    pub cycle: i64,
    pub days_overdue: i64,
    /// Cumulative fee the schedule calls for
    pub target_total: Decimal,
    pub previously_accrued: Decimal,
    /// Amount charged by this event
    pub amount: Decimal,
    pub cap_applied: bool,
    pub breakdown: Vec<FeeComponent>,
    pub created_at: DateTime<Utc>,
}

/// Round a monetary amount to cents
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn ticket() -> Ticket {
        Ticket::new(
            "T-1",
            "GOV-1",
            "SPD-20",
            dec!(150),
            NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
        )
        .with_category("speeding")
    }

    #[test]
    fn test_specificity() {
        let mut config = LateFeeConfiguration::government_wide("C-1", "GOV-1", FeeStructure::Flat);
        assert_eq!(config.specificity(), 0);
        config.offence_category = Some("speeding".to_string());
        assert_eq!(config.specificity(), 1);
        config.offence_code = Some("SPD-20".to_string());
        assert_eq!(config.specificity(), 2);
    }

    #[test]
    fn test_applies_to() {
        let t = ticket();
        let wide = LateFeeConfiguration::government_wide("C-1", "GOV-1", FeeStructure::Flat);
        assert!(wide.applies_to(&t));

        let mut category = wide.clone();
        category.offence_category = Some("parking".to_string());
        assert!(!category.applies_to(&t));

        let mut offence = wide.clone();
        offence.offence_code = Some("SPD-20".to_string());
        assert!(offence.applies_to(&t));

        let other_tenant = LateFeeConfiguration::government_wide("C-2", "GOV-2", FeeStructure::Flat);
        assert!(!other_tenant.applies_to(&t));
    }

    #[test]
    fn test_tier_contains() {
        let tier = FeeTier {
            min_days: 31,
            max_days: Some(60),
            amount: dec!(50),
        };
        assert!(tier.contains(31));
        assert!(tier.contains(60));
        assert!(!tier.contains(61));
        assert!(!tier.contains(30));
    }

    #[test]
    fn test_round_money() {
        assert_eq!(round_money(dec!(10.005)), dec!(10.01));
        assert_eq!(round_money(dec!(3.3333)), dec!(3.33));
    }
}

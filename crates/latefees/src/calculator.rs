//! Pure late-fee computation
//!
//! Every structure yields a cumulative target for the ticket as of the
//! current cycle; the engine charges the difference to what was already
//! accrued. Nothing here touches the store.

use finepay_core::{FeeComponent, FeeStructure, LateFeeConfiguration, LateFeeRule, Ticket};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::LateFeeSettings;
use crate::error::{LateFeeError, LateFeeResult};

/// Computed fee for one ticket and cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeAssessment {
    pub configuration_id: String,
    pub structure: FeeStructure,
    pub cycle: i64,
    pub days_overdue: i64,
    /// Cumulative fee the ticket should carry
    pub target_total: Decimal,
    pub previously_accrued: Decimal,
    /// Charge for this cycle, never negative
    pub amount: Decimal,
    pub cap_applied: bool,
    pub breakdown: Vec<FeeComponent>,
}

/// Accrual cycle for `days_overdue`, or `None` while inside the grace period.
///
/// Cycle `n` covers days `grace + (n-1)*cycle_days + 1 ..= grace + n*cycle_days`.
pub fn accrual_cycle(days_overdue: i64, grace_period_days: i64, cycle_days: i64) -> Option<i64> {
    let chargeable = days_overdue - grace_period_days.max(0);
    if chargeable <= 0 {
        return None;
    }
    Some((chargeable - 1) / cycle_days.max(1) + 1)
}

/// Most specific active configuration applying to the ticket:
/// offence code over offence category over government-wide
pub fn resolve_configuration<'a>(
    configs: &'a [LateFeeConfiguration],
    ticket: &Ticket,
) -> Option<&'a LateFeeConfiguration> {
    configs
        .iter()
        .filter(|c| c.applies_to(ticket))
        .max_by(|a, b| {
            a.specificity()
                .cmp(&b.specificity())
                .then_with(|| a.created_at.cmp(&b.created_at))
        })
}

/// Target contributed by one rule, and whether the rule's own cap was hit
pub fn rule_component(rule: &LateFeeRule, ticket: &Ticket, days_overdue: i64) -> LateFeeResult<(FeeComponent, bool)> {
    let days = Decimal::from(days_overdue.max(0));
    let (amount, detail, capped) = match rule.structure {
        FeeStructure::Flat => {
            let amount = required(rule, rule.flat_amount, "flat_amount")?;
            (amount, format!("flat {amount}"), false)
        }
        FeeStructure::Daily => {
            let rate = required(rule, rule.daily_rate, "daily_rate")?;
            let raw = checked(rule, rate.checked_mul(days))?;
            match rule.cap {
                Some(cap) if raw > cap => (cap, format!("{rate}/day x {days_overdue} days, capped at {cap}"), true),
                _ => (raw, format!("{rate}/day x {days_overdue} days"), false),
            }
        }
        FeeStructure::Percentage => {
            let rate = required(rule, rule.rate, "rate")?;
            (
                checked(rule, ticket.fine_amount.checked_mul(rate))?,
                format!("{rate} x fine {}", ticket.fine_amount),
                false,
            )
        }
        FeeStructure::Tiered => {
            let mut tiers: Vec<_> = rule.tiers.iter().collect();
            tiers.sort_by_key(|t| t.min_days);
            match tiers.into_iter().find(|t| t.contains(days_overdue)) {
                Some(tier) => (
                    tier.amount,
                    match tier.max_days {
                        Some(max) => format!("tier {}-{} days", tier.min_days, max),
                        None => format!("tier {}+ days", tier.min_days),
                    },
                    false,
                ),
                None => (Decimal::ZERO, "no matching tier".to_string(), false),
            }
        }
        FeeStructure::Combination => {
            return Err(LateFeeError::validation(format!(
                "rule {} cannot itself be a combination",
                rule.id
            )))
        }
    };

    Ok((
        FeeComponent {
            rule_id: rule.id.clone(),
            structure: rule.structure,
            detail,
            amount,
        },
        capped,
    ))
}

fn checked(rule: &LateFeeRule, value: Option<Decimal>) -> LateFeeResult<Decimal> {
    value.ok_or_else(|| LateFeeError::validation(format!("rule {} fee is out of range", rule.id)))
}

fn required(rule: &LateFeeRule, value: Option<Decimal>, field: &str) -> LateFeeResult<Decimal> {
    match value {
        Some(v) if v >= Decimal::ZERO => Ok(v),
        Some(v) => Err(LateFeeError::validation(format!("rule {} has negative {field} {v}", rule.id))),
        None => Err(LateFeeError::validation(format!("rule {} is missing {field}", rule.id))),
    }
}

/// Rules a configuration charges with: every active rule for a combination,
/// otherwise the first active rule of the configuration's structure
fn charging_rules(config: &LateFeeConfiguration) -> LateFeeResult<Vec<&LateFeeRule>> {
    let active = config.active_rules();
    if config.structure == FeeStructure::Combination {
        if active.is_empty() {
            return Err(LateFeeError::validation(format!(
                "configuration {} has no active rules",
                config.id
            )));
        }
        return Ok(active);
    }
    active
        .into_iter()
        .find(|r| r.structure == config.structure)
        .map(|r| vec![r])
        .ok_or_else(|| {
            LateFeeError::validation(format!(
                "configuration {} has no active {} rule",
                config.id, config.structure
            ))
        })
}

/// Compute the fee owed for `cycle`
pub fn assess(
    config: &LateFeeConfiguration,
    ticket: &Ticket,
    days_overdue: i64,
    cycle: i64,
    settings: &LateFeeSettings,
) -> LateFeeResult<FeeAssessment> {
    let mut breakdown = Vec::new();
    let mut target = Decimal::ZERO;
    let mut cap_applied = false;

    for rule in charging_rules(config)? {
        let (component, capped) = rule_component(rule, ticket, days_overdue)?;
        target = target
            .checked_add(component.amount)
            .ok_or_else(|| LateFeeError::validation(format!("configuration {} fee is out of range", config.id)))?;
        cap_applied |= capped;
        breakdown.push(component);
    }

    if let Some(max) = config.max_total_fee {
        if target > max {
            target = max;
            cap_applied = true;
        }
    }

    let target = settings.round(target);
    let previously_accrued = ticket.late_fee_total;
    let amount = settings.round((target - previously_accrued).max(Decimal::ZERO));

    Ok(FeeAssessment {
        configuration_id: config.id.clone(),
        structure: config.structure,
        cycle,
        days_overdue,
        target_total: target,
        previously_accrued,
        amount,
        cap_applied,
        breakdown,
    })
}

/// Reject configurations the calculator could not charge with
pub fn validate_configuration(config: &LateFeeConfiguration) -> LateFeeResult<()> {
    if config.cycle_days <= 0 {
        return Err(LateFeeError::validation("cycle_days must be positive"));
    }
    if config.grace_period_days < 0 {
        return Err(LateFeeError::validation("grace_period_days must not be negative"));
    }
    if config.max_total_fee.is_some_and(|max| max < Decimal::ZERO) {
        return Err(LateFeeError::validation("max_total_fee must not be negative"));
    }
    for tier in config.rules.iter().flat_map(|r| r.tiers.iter()) {
        if tier.min_days < 0 || tier.max_days.is_some_and(|max| max < tier.min_days) || tier.amount < Decimal::ZERO {
            return Err(LateFeeError::validation(format!(
                "invalid tier starting at day {}",
                tier.min_days
            )));
        }
    }

    let sample = Ticket::new("sample", config.government_id.clone(), "sample", Decimal::ZERO, chrono::NaiveDate::MIN);
    for rule in charging_rules(config)? {
        rule_component(rule, &sample, 0)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};
    use finepay_core::FeeTier;
    use rust_decimal_macros::dec;

    fn ticket(fine: Decimal) -> Ticket {
        Ticket::new("T-1", "GOV-1", "SPD-20", fine, NaiveDate::from_ymd_opt(2025, 1, 1).unwrap())
            .with_category("speeding")
    }

    fn config(structure: FeeStructure, rule: LateFeeRule) -> LateFeeConfiguration {
        LateFeeConfiguration::government_wide("C-1", "GOV-1", structure).with_rule(rule)
    }

    #[test]
    fn test_accrual_cycle_boundaries() {
        assert_eq!(accrual_cycle(0, 0, 7), None);
        assert_eq!(accrual_cycle(1, 0, 7), Some(1));
        assert_eq!(accrual_cycle(7, 0, 7), Some(1));
        assert_eq!(accrual_cycle(8, 0, 7), Some(2));
        assert_eq!(accrual_cycle(10, 10, 7), None);
        assert_eq!(accrual_cycle(11, 10, 7), Some(1));
    }

    #[test]
    fn test_most_specific_configuration_wins() {
        let t = ticket(dec!(100));
        let wide = LateFeeConfiguration::government_wide("WIDE", "GOV-1", FeeStructure::Flat);
        let mut category = LateFeeConfiguration::government_wide("CAT", "GOV-1", FeeStructure::Flat);
        category.offence_category = Some("speeding".to_string());
        let mut offence = LateFeeConfiguration::government_wide("OFF", "GOV-1", FeeStructure::Flat);
        offence.offence_code = Some("SPD-20".to_string());

        let configs = vec![wide.clone(), category.clone(), offence.clone()];
        assert_eq!(resolve_configuration(&configs, &t).unwrap().id, "OFF");

        offence.active = false;
        let configs = vec![wide, category, offence];
        assert_eq!(resolve_configuration(&configs, &t).unwrap().id, "CAT");
    }

    #[test]
    fn test_daily_fee_capped() {
        let cfg = config(
            FeeStructure::Daily,
            LateFeeRule::daily("R-1", "C-1", dec!(2.50), Some(dec!(50))),
        );
        let t = ticket(dec!(100));

        let early = assess(&cfg, &t, 10, 2, &LateFeeSettings::default()).unwrap();
        assert_eq!(early.target_total, dec!(25.00));
        assert_eq!(early.amount, dec!(25.00));
        assert!(!early.cap_applied);

        let late = assess(&cfg, &t, 40, 6, &LateFeeSettings::default()).unwrap();
        assert_eq!(late.target_total, dec!(50));
        assert!(late.cap_applied);
    }

    #[test]
    fn test_charge_is_difference_to_accrued() {
        let cfg = config(FeeStructure::Percentage, LateFeeRule::percentage("R-1", "C-1", dec!(0.10)));
        let mut t = ticket(dec!(150));

        let first = assess(&cfg, &t, 3, 1, &LateFeeSettings::default()).unwrap();
        assert_eq!(first.amount, dec!(15.00));

        t.late_fee_total = dec!(15.00);
        let second = assess(&cfg, &t, 10, 2, &LateFeeSettings::default()).unwrap();
        assert_eq!(second.amount, Decimal::ZERO);
    }

    #[test]
    fn test_first_matching_tier() {
        let tiers = vec![
            FeeTier { min_days: 31, max_days: Some(60), amount: dec!(50) },
            FeeTier { min_days: 1, max_days: Some(30), amount: dec!(20) },
            FeeTier { min_days: 61, max_days: None, amount: dec!(100) },
        ];
        let cfg = config(FeeStructure::Tiered, LateFeeRule::tiered("R-1", "C-1", tiers));
        let t = ticket(dec!(100));
        let settings = LateFeeSettings::default();

        assert_eq!(assess(&cfg, &t, 5, 1, &settings).unwrap().target_total, dec!(20));
        assert_eq!(assess(&cfg, &t, 45, 7, &settings).unwrap().target_total, dec!(50));
        assert_eq!(assess(&cfg, &t, 400, 58, &settings).unwrap().target_total, dec!(100));
    }

    #[test]
    fn test_combination_sums_rules_under_max_total() {
        let mut cfg = LateFeeConfiguration::government_wide("C-1", "GOV-1", FeeStructure::Combination)
            .with_rule(LateFeeRule::flat("R-1", "C-1", dec!(10)))
            .with_rule(LateFeeRule::daily("R-2", "C-1", dec!(1), None));
        let t = ticket(dec!(100));

        let summed = assess(&cfg, &t, 14, 2, &LateFeeSettings::default()).unwrap();
        assert_eq!(summed.target_total, dec!(24));
        assert_eq!(summed.breakdown.len(), 2);

        cfg.max_total_fee = Some(dec!(20));
        let capped = assess(&cfg, &t, 14, 2, &LateFeeSettings::default()).unwrap();
        assert_eq!(capped.target_total, dec!(20));
        assert!(capped.cap_applied);
    }

    #[test]
    fn test_missing_rule_is_validation_error() {
        let cfg = LateFeeConfiguration::government_wide("C-1", "GOV-1", FeeStructure::Daily)
            .with_rule(LateFeeRule::flat("R-1", "C-1", dec!(10)));
        let err = assess(&cfg, &ticket(dec!(100)), 5, 1, &LateFeeSettings::default()).unwrap_err();
        assert!(matches!(err, LateFeeError::Validation(_)));
        assert!(validate_configuration(&cfg).is_err());
    }

    #[test]
    fn test_validate_configuration() {
        let mut cfg = config(FeeStructure::Flat, LateFeeRule::flat("R-1", "C-1", dec!(10)));
        assert!(validate_configuration(&cfg).is_ok());

        cfg.cycle_days = 0;
        assert!(validate_configuration(&cfg).is_err());

        let negative = config(FeeStructure::Daily, LateFeeRule::daily("R-1", "C-1", dec!(-1), None));
        assert!(validate_configuration(&negative).is_err());
    }

    #[test]
    fn test_oversized_fee_is_validation_error() {
        let t = ticket(dec!(100));
        let daily = config(FeeStructure::Daily, LateFeeRule::daily("R-1", "C-1", Decimal::MAX, None));
        let err = assess(&daily, &t, 30, 5, &LateFeeSettings::default()).unwrap_err();
        assert!(matches!(err, LateFeeError::Validation(_)));

        let percentage = config(FeeStructure::Percentage, LateFeeRule::percentage("R-1", "C-1", Decimal::MAX));
        let err = assess(&percentage, &t, 30, 5, &LateFeeSettings::default()).unwrap_err();
        assert!(matches!(err, LateFeeError::Validation(_)));

        let combined = LateFeeConfiguration::government_wide("C-1", "GOV-1", FeeStructure::Combination)
            .with_rule(LateFeeRule::flat("R-1", "C-1", Decimal::MAX))
            .with_rule(LateFeeRule::flat("R-2", "C-1", Decimal::MAX));
        assert!(assess(&combined, &t, 30, 5, &LateFeeSettings::default()).is_err());
    }

    #[test]
    fn test_newest_configuration_breaks_ties() {
        let t = ticket(dec!(100));
        let older = LateFeeConfiguration::government_wide("OLD", "GOV-1", FeeStructure::Flat);
        let mut newer = LateFeeConfiguration::government_wide("NEW", "GOV-1", FeeStructure::Flat);
        newer.created_at = older.created_at + Duration::seconds(5);
        let configs = vec![older, newer];
        assert_eq!(resolve_configuration(&configs, &t).unwrap().id, "NEW");
    }
}

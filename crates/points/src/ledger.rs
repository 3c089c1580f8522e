//! Pure computations over the points ledger
//!
//! Cached balances are always rebuilt from these functions; nothing here
//! touches the store.

use chrono::NaiveDate;
use finepay_core::{EntryStatus, PointType, PointsHistory, TransactionType};
use std::collections::HashMap;

/// Current demerit total: sum of active demerit deltas effective within
/// `(today - window_days, today]` and not yet expired. Never negative.
pub fn calculate_current_demerits(entries: &[PointsHistory], today: NaiveDate, window_days: i64) -> i64 {
    entries
        .iter()
        .filter(|e| e.in_demerit_window(today, window_days))
        .map(|e| e.points_delta)
        .sum::<i64>()
        .max(0)
}

/// Violation entries still counting toward the window
pub fn active_violation_count(entries: &[PointsHistory], today: NaiveDate, window_days: i64) -> i64 {
    entries
        .iter()
        .filter(|e| e.is_violation() && e.in_demerit_window(today, window_days))
        .count() as i64
}

/// Net demerit points that have left the window through expiry
pub fn expired_demerit_total(entries: &[PointsHistory]) -> i64 {
    entries
        .iter()
        .filter(|e| e.point_type == PointType::Demerit && e.status == EntryStatus::Expired)
        .map(|e| e.points_delta)
        .sum::<i64>()
        .max(0)
}

/// Offence codes of the violations in the window, oldest first, deduplicated
pub fn offence_codes_in_window(entries: &[PointsHistory], today: NaiveDate, window_days: i64) -> Vec<String> {
    let mut codes: Vec<String> = Vec::new();
    for code in entries
        .iter()
        .filter(|e| e.is_violation() && e.in_demerit_window(today, window_days))
        .filter_map(|e| e.offence_code.as_ref())
    {
        if !codes.contains(code) {
            codes.push(code.clone());
        }
    }
    codes
}

/// Aggregates of the merit side of the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MeritTotals {
    pub current: i64,
    pub earned: i64,
    pub used: i64,
    pub forfeited: i64,
}

/// Rebuild merit aggregates; `current` is clamped to `[0, max_points]`
pub fn merit_totals(entries: &[PointsHistory], max_points: i64) -> MeritTotals {
    let mut totals = MeritTotals::default();
    let mut net = 0;
    for e in entries
        .iter()
        .filter(|e| e.point_type == PointType::Merit && e.status != EntryStatus::Voided)
    {
        net += e.points_delta;
        match e.transaction_type {
            TransactionType::Offset => totals.used -= e.points_delta,
            TransactionType::MeritForfeited => totals.forfeited -= e.points_delta,
            _ if e.points_delta > 0 => totals.earned += e.points_delta,
            _ => {}
        }
    }
    totals.current = net.clamp(0, max_points.max(0));
    totals
}

/// Forgiveness taken from one violation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffsetSlice {
    pub violation_id: String,
    pub offence_code: Option<String>,
    pub points: i64,
    pub expiry_date: Option<NaiveDate>,
}

/// Spread `amount` across the oldest in-window violations that still have
/// unforgiven points. The slices sum to at most `amount`.
pub fn plan_offset(
    entries: &[PointsHistory],
    today: NaiveDate,
    window_days: i64,
    amount: i64,
) -> Vec<OffsetSlice> {
    let mut forgiven: HashMap<&str, i64> = HashMap::new();
    for e in entries.iter().filter(|e| {
        e.transaction_type == TransactionType::Offset && e.in_demerit_window(today, window_days)
    }) {
        if let Some(target) = e.offsets_entry_id.as_deref() {
            *forgiven.entry(target).or_default() -= e.points_delta;
        }
    }

    let mut violations: Vec<&PointsHistory> = entries
        .iter()
        .filter(|e| e.is_violation() && e.in_demerit_window(today, window_days))
        .collect();
    violations.sort_by(|a, b| {
        (a.effective_date, a.created_at, &a.id).cmp(&(b.effective_date, b.created_at, &b.id))
    });

    let mut left = amount;
    let mut slices = Vec::new();
    for v in violations {
        if left <= 0 {
            break;
        }
        let remaining = v.points_delta - forgiven.get(v.id.as_str()).copied().unwrap_or(0);
        if remaining <= 0 {
            continue;
        }
        let take = remaining.min(left);
        slices.push(OffsetSlice {
            violation_id: v.id.clone(),
            offence_code: v.offence_code.clone(),
            points: take,
            expiry_date: v.expiry_date,
        });
        left -= take;
    }
    slices
}

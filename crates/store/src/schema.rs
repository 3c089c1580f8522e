//! Database schema and row types
//!
//! Row types map 1:1 onto SQLite tables. Decimals are stored as TEXT and enums
//! as their snake_case string form; conversion into domain records happens in
//! the `TryFrom` impls below.

use chrono::{DateTime, NaiveDate, Utc};
use finepay_core::{
    CitizenProfile, ContactInfo, DemeritBalance, FeeComponent, FeeTier, Government,
    LateFeeConfiguration, LateFeeEvent, LateFeeRule, MeritBalance, PenaltyRule, PointsHistory,
    SuspensionRecord, Ticket,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::{StoreError, StoreResult};

/// Idempotent schema bootstrap
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS governments (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    status TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS citizen_profiles (
    id TEXT PRIMARY KEY,
    government_id TEXT NOT NULL REFERENCES governments(id),
    identity_kind TEXT NOT NULL,
    identity_hash TEXT NOT NULL,
    identifier_hint TEXT NOT NULL,
    phone TEXT,
    email TEXT,
    lifetime_demerit_points INTEGER NOT NULL DEFAULT 0,
    violation_count INTEGER NOT NULL DEFAULT 0,
    clean_streak_days INTEGER NOT NULL DEFAULT 0,
    last_violation_at TEXT,
    active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE (government_id, identity_hash)
);

CREATE TABLE IF NOT EXISTS demerit_balances (
    profile_id TEXT PRIMARY KEY REFERENCES citizen_profiles(id),
    government_id TEXT NOT NULL,
    current_points INTEGER NOT NULL DEFAULT 0,
    active_entries INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL DEFAULT 'clear',
    last_suspension_date TEXT,
    total_expired INTEGER NOT NULL DEFAULT 0,
    version INTEGER NOT NULL DEFAULT 0,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS merit_balances (
    profile_id TEXT PRIMARY KEY REFERENCES citizen_profiles(id),
    government_id TEXT NOT NULL,
    current_points INTEGER NOT NULL DEFAULT 0,
    max_points INTEGER NOT NULL,
    total_earned INTEGER NOT NULL DEFAULT 0,
    total_used INTEGER NOT NULL DEFAULT 0,
    total_expired INTEGER NOT NULL DEFAULT 0,
    exemplary INTEGER NOT NULL DEFAULT 0,
    last_award_date TEXT,
    two_year_bonus_awarded INTEGER NOT NULL DEFAULT 0,
    version INTEGER NOT NULL DEFAULT 0,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS points_history (
    id TEXT PRIMARY KEY,
    government_id TEXT NOT NULL,
    profile_id TEXT NOT NULL REFERENCES citizen_profiles(id),
    transaction_type TEXT NOT NULL,
    point_type TEXT NOT NULL,
    points_delta INTEGER NOT NULL,
    offence_code TEXT,
    source_ticket_id TEXT,
    reason TEXT,
    offsets_entry_id TEXT,
    effective_date TEXT NOT NULL,
    expiry_date TEXT,
    status TEXT NOT NULL,
    balance_after INTEGER NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_points_history_profile
    ON points_history(profile_id, point_type, status);

CREATE INDEX IF NOT EXISTS idx_points_history_expiry
    ON points_history(government_id, status, expiry_date);

CREATE UNIQUE INDEX IF NOT EXISTS idx_points_history_violation_ticket
    ON points_history(government_id, source_ticket_id)
    WHERE transaction_type = 'violation_added' AND source_ticket_id IS NOT NULL;

CREATE TABLE IF NOT EXISTS suspension_records (
    id TEXT PRIMARY KEY,
    government_id TEXT NOT NULL,
    profile_id TEXT NOT NULL REFERENCES citizen_profiles(id),
    sanction_type TEXT NOT NULL,
    status TEXT NOT NULL,
    points_at_incident INTEGER NOT NULL,
    threshold_exceeded INTEGER NOT NULL,
    effective_date TEXT NOT NULL,
    end_date TEXT NOT NULL,
    reason TEXT NOT NULL,
    offence_codes TEXT NOT NULL DEFAULT '[]',
    source TEXT NOT NULL,
    source_reference TEXT,
    lifted_at TEXT,
    lifted_reason TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_suspension_records_profile
    ON suspension_records(profile_id, status);

CREATE TABLE IF NOT EXISTS penalty_rules (
    id TEXT PRIMARY KEY,
    government_id TEXT NOT NULL REFERENCES governments(id),
    offence_code TEXT NOT NULL,
    description TEXT,
    points INTEGER NOT NULL,
    min_value TEXT,
    max_value TEXT,
    active INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS point_settings (
    government_id TEXT PRIMARY KEY REFERENCES governments(id),
    warning_threshold INTEGER NOT NULL,
    suspension_threshold INTEGER NOT NULL,
    revocation_threshold INTEGER NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS tickets (
    id TEXT PRIMARY KEY,
    government_id TEXT NOT NULL REFERENCES governments(id),
    profile_id TEXT,
    offence_code TEXT NOT NULL,
    offence_category TEXT,
    fine_amount TEXT NOT NULL,
    late_fee_total TEXT NOT NULL DEFAULT '0',
    due_date TEXT NOT NULL,
    status TEXT NOT NULL,
    late_fee_paused INTEGER NOT NULL DEFAULT 0,
    notification_sent INTEGER NOT NULL DEFAULT 0,
    notification_sent_at TEXT,
    last_late_fee_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_tickets_status
    ON tickets(government_id, status, due_date);

CREATE TABLE IF NOT EXISTS late_fee_configurations (
    id TEXT PRIMARY KEY,
    government_id TEXT NOT NULL REFERENCES governments(id),
    offence_category TEXT,
    offence_code TEXT,
    structure TEXT NOT NULL,
    enabled INTEGER NOT NULL DEFAULT 1,
    active INTEGER NOT NULL DEFAULT 1,
    grace_period_days INTEGER NOT NULL DEFAULT 0,
    cycle_days INTEGER NOT NULL DEFAULT 7,
    max_total_fee TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS late_fee_rules (
    id TEXT PRIMARY KEY,
    configuration_id TEXT NOT NULL REFERENCES late_fee_configurations(id) ON DELETE CASCADE,
    structure TEXT NOT NULL,
    active INTEGER NOT NULL DEFAULT 1,
    priority INTEGER NOT NULL DEFAULT 100,
    flat_amount TEXT,
    rate TEXT,
    daily_rate TEXT,
    cap TEXT,
    tiers TEXT NOT NULL DEFAULT '[]'
);

CREATE TABLE IF NOT EXISTS late_fee_events (
    id TEXT PRIMARY KEY,
    government_id TEXT NOT NULL,
    ticket_id TEXT NOT NULL REFERENCES tickets(id),
    configuration_id TEXT NOT NULL,
    structure TEXT NOT NULL,
    cycle INTEGER NOT NULL,
    days_overdue INTEGER NOT NULL,
    target_total TEXT NOT NULL,
    previously_accrued TEXT NOT NULL,
    amount TEXT NOT NULL,
    cap_applied INTEGER NOT NULL DEFAULT 0,
    breakdown TEXT NOT NULL DEFAULT '[]',
    created_at TEXT NOT NULL,
    UNIQUE (ticket_id, cycle)
);
"#;

// === Conversion helpers ===

pub(crate) fn parse_enum<T: FromStr>(field: &str, value: &str) -> StoreResult<T> {
    T::from_str(value).map_err(|_| StoreError::invalid_enum(field, value))
}

pub(crate) fn parse_decimal(value: &str) -> StoreResult<Decimal> {
    Decimal::from_str(value).map_err(|_| StoreError::InvalidDecimal(value.to_string()))
}

pub(crate) fn parse_opt_decimal(value: Option<&str>) -> StoreResult<Option<Decimal>> {
    value.map(parse_decimal).transpose()
}

pub(crate) fn opt_decimal_text(value: Option<Decimal>) -> Option<String> {
    value.map(|d| d.to_string())
}

// === Rows ===

/// Row type for `governments`
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct GovernmentRow {
    pub id: String,
    pub name: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<GovernmentRow> for Government {
    type Error = StoreError;

    fn try_from(row: GovernmentRow) -> StoreResult<Self> {
        Ok(Government {
            status: parse_enum("government_status", &row.status)?,
            id: row.id,
            name: row.name,
            created_at: row.created_at,
        })
    }
}

/// Row type for `citizen_profiles`
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct ProfileRow {
    pub id: String,
    pub government_id: String,
    pub identity_kind: String,
    pub identity_hash: String,
    pub identifier_hint: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub lifetime_demerit_points: i64,
    pub violation_count: i64,
    pub clean_streak_days: i64,
    pub last_violation_at: Option<DateTime<Utc>>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<ProfileRow> for CitizenProfile {
    type Error = StoreError;

    fn try_from(row: ProfileRow) -> StoreResult<Self> {
        Ok(CitizenProfile {
            identity_kind: parse_enum("identity_kind", &row.identity_kind)?,
            id: row.id,
            government_id: row.government_id,
            identity_hash: row.identity_hash,
            identifier_hint: row.identifier_hint,
            contact: ContactInfo {
                phone: row.phone,
                email: row.email,
            },
            lifetime_demerit_points: row.lifetime_demerit_points,
            violation_count: row.violation_count,
            clean_streak_days: row.clean_streak_days,
            last_violation_at: row.last_violation_at,
            active: row.active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Row type for `demerit_balances`
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct DemeritBalanceRow {
    pub profile_id: String,
    pub government_id: String,
    pub current_points: i64,
    pub active_entries: i64,
    pub status: String,
    pub last_suspension_date: Option<NaiveDate>,
    pub total_expired: i64,
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<DemeritBalanceRow> for DemeritBalance {
    type Error = StoreError;

    fn try_from(row: DemeritBalanceRow) -> StoreResult<Self> {
        Ok(DemeritBalance {
            status: parse_enum("license_status", &row.status)?,
            profile_id: row.profile_id,
            government_id: row.government_id,
            current_points: row.current_points,
            active_entries: row.active_entries,
            last_suspension_date: row.last_suspension_date,
            total_expired: row.total_expired,
            version: row.version,
            updated_at: row.updated_at,
        })
    }
}

/// Row type for `merit_balances`
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct MeritBalanceRow {
    pub profile_id: String,
    pub government_id: String,
    pub current_points: i64,
    pub max_points: i64,
    pub total_earned: i64,
    pub total_used: i64,
    pub total_expired: i64,
    pub exemplary: bool,
    pub last_award_date: Option<NaiveDate>,
    pub two_year_bonus_awarded: bool,
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}

impl From<MeritBalanceRow> for MeritBalance {
    fn from(row: MeritBalanceRow) -> Self {
        MeritBalance {
            profile_id: row.profile_id,
            government_id: row.government_id,
            current_points: row.current_points,
            max_points: row.max_points,
            total_earned: row.total_earned,
            total_used: row.total_used,
            total_expired: row.total_expired,
            exemplary: row.exemplary,
            last_award_date: row.last_award_date,
            two_year_bonus_awarded: row.two_year_bonus_awarded,
            version: row.version,
            updated_at: row.updated_at,
        }
    }
}

/// Row type for `points_history`
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct PointsHistoryRow {
    pub id: String,
    pub government_id: String,
    pub profile_id: String,
    pub transaction_type: String,
    pub point_type: String,
    pub points_delta: i64,
    pub offence_code: Option<String>,
    pub source_ticket_id: Option<String>,
    pub reason: Option<String>,
    pub offsets_entry_id: Option<String>,
    pub effective_date: NaiveDate,
    pub expiry_date: Option<NaiveDate>,
    pub status: String,
    pub balance_after: i64,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<PointsHistoryRow> for PointsHistory {
    type Error = StoreError;

    fn try_from(row: PointsHistoryRow) -> StoreResult<Self> {
        Ok(PointsHistory {
            transaction_type: parse_enum("transaction_type", &row.transaction_type)?,
            point_type: parse_enum("point_type", &row.point_type)?,
            status: parse_enum("entry_status", &row.status)?,
            id: row.id,
            government_id: row.government_id,
            profile_id: row.profile_id,
            points_delta: row.points_delta,
            offence_code: row.offence_code,
            source_ticket_id: row.source_ticket_id,
            reason: row.reason,
            offsets_entry_id: row.offsets_entry_id,
            effective_date: row.effective_date,
            expiry_date: row.expiry_date,
            balance_after: row.balance_after,
            created_at: row.created_at,
        })
    }
}

/// Row type for `suspension_records`
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct SuspensionRow {
    pub id: String,
    pub government_id: String,
    pub profile_id: String,
    pub sanction_type: String,
    pub status: String,
    pub points_at_incident: i64,
    pub threshold_exceeded: i64,
    pub effective_date: NaiveDate,
    pub end_date: NaiveDate,
    pub reason: String,
    pub offence_codes: String, // JSON array
    pub source: String,
    pub source_reference: Option<String>,
    pub lifted_at: Option<DateTime<Utc>>,
    pub lifted_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<SuspensionRow> for SuspensionRecord {
    type Error = StoreError;

    fn try_from(row: SuspensionRow) -> StoreResult<Self> {
        Ok(SuspensionRecord {
            sanction_type: parse_enum("sanction_type", &row.sanction_type)?,
            status: parse_enum("sanction_status", &row.status)?,
            source: parse_enum("sanction_source", &row.source)?,
            offence_codes: serde_json::from_str(&row.offence_codes)?,
            id: row.id,
            government_id: row.government_id,
            profile_id: row.profile_id,
            points_at_incident: row.points_at_incident,
            threshold_exceeded: row.threshold_exceeded,
            effective_date: row.effective_date,
            end_date: row.end_date,
            reason: row.reason,
            source_reference: row.source_reference,
            lifted_at: row.lifted_at,
            lifted_reason: row.lifted_reason,
            created_at: row.created_at,
        })
    }
}

/// Row type for `penalty_rules`
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct PenaltyRuleRow {
    pub id: String,
    pub government_id: String,
    pub offence_code: String,
    pub description: Option<String>,
    pub points: i64,
    pub min_value: Option<String>,
    pub max_value: Option<String>,
    pub active: bool,
}

impl TryFrom<PenaltyRuleRow> for PenaltyRule {
    type Error = StoreError;

    fn try_from(row: PenaltyRuleRow) -> StoreResult<Self> {
        Ok(PenaltyRule {
            min_value: parse_opt_decimal(row.min_value.as_deref())?,
            max_value: parse_opt_decimal(row.max_value.as_deref())?,
            id: row.id,
            government_id: row.government_id,
            offence_code: row.offence_code,
            description: row.description,
            points: row.points,
            active: row.active,
        })
    }
}

/// Row type for `point_settings` (per-government threshold overrides)
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow, Serialize, Deserialize)]
pub struct PointSettingsRow {
    pub government_id: String,
    pub warning_threshold: i64,
    pub suspension_threshold: i64,
    pub revocation_threshold: i64,
    pub updated_at: DateTime<Utc>,
}

/// Row type for `tickets`
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct TicketRow {
    pub id: String,
    pub government_id: String,
    pub profile_id: Option<String>,
    pub offence_code: String,
    pub offence_category: Option<String>,
    pub fine_amount: String,    // Decimal stored as TEXT
    pub late_fee_total: String, // Decimal stored as TEXT
    pub due_date: NaiveDate,
    pub status: String,
    pub late_fee_paused: bool,
    pub notification_sent: bool,
    pub notification_sent_at: Option<DateTime<Utc>>,
    pub last_late_fee_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<TicketRow> for Ticket {
    type Error = StoreError;

    fn try_from(row: TicketRow) -> StoreResult<Self> {
        Ok(Ticket {
            fine_amount: parse_decimal(&row.fine_amount)?,
            late_fee_total: parse_decimal(&row.late_fee_total)?,
            status: parse_enum("ticket_status", &row.status)?,
            id: row.id,
            government_id: row.government_id,
            profile_id: row.profile_id,
            offence_code: row.offence_code,
            offence_category: row.offence_category,
            due_date: row.due_date,
            late_fee_paused: row.late_fee_paused,
            notification_sent: row.notification_sent,
            notification_sent_at: row.notification_sent_at,
            last_late_fee_at: row.last_late_fee_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Row type for `late_fee_configurations`
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct LateFeeConfigRow {
    pub id: String,
    pub government_id: String,
    pub offence_category: Option<String>,
    pub offence_code: Option<String>,
    pub structure: String,
    pub enabled: bool,
    pub active: bool,
    pub grace_period_days: i64,
    pub cycle_days: i64,
    pub max_total_fee: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LateFeeConfigRow {
    /// Build the domain record; rules are loaded separately
    pub fn into_configuration(self, rules: Vec<LateFeeRule>) -> StoreResult<LateFeeConfiguration> {
        Ok(LateFeeConfiguration {
            structure: parse_enum("fee_structure", &self.structure)?,
            max_total_fee: parse_opt_decimal(self.max_total_fee.as_deref())?,
            id: self.id,
            government_id: self.government_id,
            offence_category: self.offence_category,
            offence_code: self.offence_code,
            enabled: self.enabled,
            active: self.active,
            grace_period_days: self.grace_period_days,
            cycle_days: self.cycle_days,
            rules,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Row type for `late_fee_rules`
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct LateFeeRuleRow {
    pub id: String,
    pub configuration_id: String,
    pub structure: String,
    pub active: bool,
    pub priority: i64,
    pub flat_amount: Option<String>,
    pub rate: Option<String>,
    pub daily_rate: Option<String>,
    pub cap: Option<String>,
    pub tiers: String, // JSON array of FeeTier
}

impl TryFrom<LateFeeRuleRow> for LateFeeRule {
    type Error = StoreError;

    fn try_from(row: LateFeeRuleRow) -> StoreResult<Self> {
        let tiers: Vec<FeeTier> = serde_json::from_str(&row.tiers)?;
        Ok(LateFeeRule {
            structure: parse_enum("fee_structure", &row.structure)?,
            flat_amount: parse_opt_decimal(row.flat_amount.as_deref())?,
            rate: parse_opt_decimal(row.rate.as_deref())?,
            daily_rate: parse_opt_decimal(row.daily_rate.as_deref())?,
            cap: parse_opt_decimal(row.cap.as_deref())?,
            tiers,
            id: row.id,
            configuration_id: row.configuration_id,
            active: row.active,
            priority: row.priority,
        })
    }
}

/// Row type for `late_fee_events`
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct LateFeeEventRow {
    pub id: String,
    pub government_id: String,
    pub ticket_id: String,
    pub configuration_id: String,
    pub structure: String,
    pub cycle: i64,
    pub days_overdue: i64,
    pub target_total: String,
    pub previously_accrued: String,
    pub amount: String,
    pub cap_applied: bool,
    pub breakdown: String, // JSON array of FeeComponent
    pub created_at: DateTime<Utc>,
}

impl TryFrom<LateFeeEventRow> for LateFeeEvent {
    type Error = StoreError;

    fn try_from(row: LateFeeEventRow) -> StoreResult<Self> {
        let breakdown: Vec<FeeComponent> = serde_json::from_str(&row.breakdown)?;
        Ok(LateFeeEvent {
            structure: parse_enum("fee_structure", &row.structure)?,
            target_total: parse_decimal(&row.target_total)?,
            previously_accrued: parse_decimal(&row.previously_accrued)?,
            amount: parse_decimal(&row.amount)?,
            breakdown,
            id: row.id,
            government_id: row.government_id,
            ticket_id: row.ticket_id,
            configuration_id: row.configuration_id,
            cycle: row.cycle,
            days_overdue: row.days_overdue,
            cap_applied: row.cap_applied,
            created_at: row.created_at,
        })
    }
}

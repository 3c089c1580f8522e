//! Profiles, balances, the points ledger and suspension records

use chrono::{DateTime, NaiveDate, Utc};
use finepay_core::{
    CitizenProfile, DemeritBalance, MeritBalance, PointsHistory, SanctionStatus, SuspensionRecord,
};
use sqlx::SqliteConnection;

use crate::error::{is_unique_violation, StoreError, StoreResult};
use crate::schema::{
    DemeritBalanceRow, MeritBalanceRow, PointsHistoryRow, ProfileRow, SuspensionRow,
};

// ============================================================================
// Profile Repository
// ============================================================================

/// Repository for `citizen_profiles`
pub struct ProfileRepo;

impl ProfileRepo {
    pub async fn insert(conn: &mut SqliteConnection, profile: &CitizenProfile) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO citizen_profiles
                (id, government_id, identity_kind, identity_hash, identifier_hint, phone, email,
                 lifetime_demerit_points, violation_count, clean_streak_days, last_violation_at,
                 active, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&profile.id)
        .bind(&profile.government_id)
        .bind(profile.identity_kind.to_string())
        .bind(&profile.identity_hash)
        .bind(&profile.identifier_hint)
        .bind(&profile.contact.phone)
        .bind(&profile.contact.email)
        .bind(profile.lifetime_demerit_points)
        .bind(profile.violation_count)
        .bind(profile.clean_streak_days)
        .bind(profile.last_violation_at)
        .bind(profile.active)
        .bind(profile.created_at)
        .bind(profile.updated_at)
        .execute(conn)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::already_exists("CitizenProfile", &profile.identity_hash)
            } else {
                e.into()
            }
        })?;
        Ok(())
    }

    pub async fn find(conn: &mut SqliteConnection, id: &str) -> StoreResult<Option<CitizenProfile>> {
        sqlx::query_as::<_, ProfileRow>("SELECT * FROM citizen_profiles WHERE id = ?")
            .bind(id)
            .fetch_optional(conn)
            .await?
            .map(CitizenProfile::try_from)
            .transpose()
    }

    pub async fn get(conn: &mut SqliteConnection, id: &str) -> StoreResult<CitizenProfile> {
        Self::find(conn, id)
            .await?
            .ok_or_else(|| StoreError::not_found("CitizenProfile", id))
    }

    pub async fn find_by_hash(
        conn: &mut SqliteConnection,
        government_id: &str,
        identity_hash: &str,
    ) -> StoreResult<Option<CitizenProfile>> {
        sqlx::query_as::<_, ProfileRow>(
            "SELECT * FROM citizen_profiles WHERE government_id = ? AND identity_hash = ?",
        )
        .bind(government_id)
        .bind(identity_hash)
        .fetch_optional(conn)
        .await?
        .map(CitizenProfile::try_from)
        .transpose()
    }

    /// Profiles of one government (or all), optionally only active ones
    pub async fn list(
        conn: &mut SqliteConnection,
        government_id: Option<&str>,
        active_only: bool,
    ) -> StoreResult<Vec<CitizenProfile>> {
        sqlx::query_as::<_, ProfileRow>(
            r#"
            SELECT * FROM citizen_profiles
            WHERE (? IS NULL OR government_id = ?) AND (active = 1 OR ? = 0)
            ORDER BY created_at, id
            "#,
        )
        .bind(government_id)
        .bind(government_id)
        .bind(active_only)
        .fetch_all(conn)
        .await?
        .into_iter()
        .map(CitizenProfile::try_from)
        .collect()
    }

    /// Persist counters, contact details and the active flag
    pub async fn update(conn: &mut SqliteConnection, profile: &CitizenProfile) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE citizen_profiles SET
                phone = ?, email = ?, lifetime_demerit_points = ?, violation_count = ?,
                clean_streak_days = ?, last_violation_at = ?, active = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&profile.contact.phone)
        .bind(&profile.contact.email)
        .bind(profile.lifetime_demerit_points)
        .bind(profile.violation_count)
        .bind(profile.clean_streak_days)
        .bind(profile.last_violation_at)
        .bind(profile.active)
        .bind(profile.updated_at)
        .bind(&profile.id)
        .execute(conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("CitizenProfile", &profile.id));
        }
        Ok(())
    }
}

// ============================================================================
// Balance Repository
// ============================================================================

/// Repository for `demerit_balances` and `merit_balances`.
///
/// Updates are compare-and-set on `version`: a writer that read a stale
/// version gets `StoreError::Conflict` and must re-read.
pub struct BalanceRepo;

impl BalanceRepo {
    pub async fn insert_demerit(
        conn: &mut SqliteConnection,
        balance: &DemeritBalance,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO demerit_balances
                (profile_id, government_id, current_points, active_entries, status,
                 last_suspension_date, total_expired, version, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&balance.profile_id)
        .bind(&balance.government_id)
        .bind(balance.current_points)
        .bind(balance.active_entries)
        .bind(balance.status.to_string())
        .bind(balance.last_suspension_date)
        .bind(balance.total_expired)
        .bind(balance.version)
        .bind(balance.updated_at)
        .execute(conn)
        .await?;
        Ok(())
    }

    pub async fn insert_merit(conn: &mut SqliteConnection, balance: &MeritBalance) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO merit_balances
                (profile_id, government_id, current_points, max_points, total_earned, total_used,
                 total_expired, exemplary, last_award_date, two_year_bonus_awarded, version, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&balance.profile_id)
        .bind(&balance.government_id)
        .bind(balance.current_points)
        .bind(balance.max_points)
        .bind(balance.total_earned)
        .bind(balance.total_used)
        .bind(balance.total_expired)
        .bind(balance.exemplary)
        .bind(balance.last_award_date)
        .bind(balance.two_year_bonus_awarded)
        .bind(balance.version)
        .bind(balance.updated_at)
        .execute(conn)
        .await?;
        Ok(())
    }

    pub async fn get_demerit(
        conn: &mut SqliteConnection,
        profile_id: &str,
    ) -> StoreResult<DemeritBalance> {
        sqlx::query_as::<_, DemeritBalanceRow>("SELECT * FROM demerit_balances WHERE profile_id = ?")
            .bind(profile_id)
            .fetch_optional(conn)
            .await?
            .ok_or_else(|| StoreError::not_found("DemeritBalance", profile_id))
            .and_then(DemeritBalance::try_from)
    }

    pub async fn get_merit(conn: &mut SqliteConnection, profile_id: &str) -> StoreResult<MeritBalance> {
        sqlx::query_as::<_, MeritBalanceRow>("SELECT * FROM merit_balances WHERE profile_id = ?")
            .bind(profile_id)
            .fetch_optional(conn)
            .await?
            .map(MeritBalance::from)
            .ok_or_else(|| StoreError::not_found("MeritBalance", profile_id))
    }

    /// Compare-and-set update; returns the new version
    pub async fn update_demerit(
        conn: &mut SqliteConnection,
        balance: &DemeritBalance,
    ) -> StoreResult<i64> {
        let result = sqlx::query(
            r#"
            UPDATE demerit_balances SET
                current_points = ?, active_entries = ?, status = ?, last_suspension_date = ?,
                total_expired = ?, version = version + 1, updated_at = ?
            WHERE profile_id = ? AND version = ?
            "#,
        )
        .bind(balance.current_points)
        .bind(balance.active_entries)
        .bind(balance.status.to_string())
        .bind(balance.last_suspension_date)
        .bind(balance.total_expired)
        .bind(balance.updated_at)
        .bind(&balance.profile_id)
        .bind(balance.version)
        .execute(conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::conflict("DemeritBalance", &balance.profile_id));
        }
        Ok(balance.version + 1)
    }

    /// Compare-and-set update; returns the new version
    pub async fn update_merit(conn: &mut SqliteConnection, balance: &MeritBalance) -> StoreResult<i64> {
        let result = sqlx::query(
            r#"
            UPDATE merit_balances SET
                current_points = ?, max_points = ?, total_earned = ?, total_used = ?,
                total_expired = ?, exemplary = ?, last_award_date = ?, two_year_bonus_awarded = ?,
                version = version + 1, updated_at = ?
            WHERE profile_id = ? AND version = ?
            "#,
        )
        .bind(balance.current_points)
        .bind(balance.max_points)
        .bind(balance.total_earned)
        .bind(balance.total_used)
        .bind(balance.total_expired)
        .bind(balance.exemplary)
        .bind(balance.last_award_date)
        .bind(balance.two_year_bonus_awarded)
        .bind(balance.updated_at)
        .bind(&balance.profile_id)
        .bind(balance.version)
        .execute(conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::conflict("MeritBalance", &balance.profile_id));
        }
        Ok(balance.version + 1)
    }
}

// ============================================================================
// History Repository
// ============================================================================

/// Repository for the append-only `points_history` ledger
pub struct HistoryRepo;

impl HistoryRepo {
    /// Append an entry.
    ///
    /// A second violation entry for the same (government, ticket) is rejected
    /// with `AlreadyExists`.
    pub async fn insert(conn: &mut SqliteConnection, entry: &PointsHistory) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO points_history
                (id, government_id, profile_id, transaction_type, point_type, points_delta,
                 offence_code, source_ticket_id, reason, offsets_entry_id, effective_date,
                 expiry_date, status, balance_after, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.id)
        .bind(&entry.government_id)
        .bind(&entry.profile_id)
        .bind(entry.transaction_type.to_string())
        .bind(entry.point_type.to_string())
        .bind(entry.points_delta)
        .bind(&entry.offence_code)
        .bind(&entry.source_ticket_id)
        .bind(&entry.reason)
        .bind(&entry.offsets_entry_id)
        .bind(entry.effective_date)
        .bind(entry.expiry_date)
        .bind(entry.status.to_string())
        .bind(entry.balance_after)
        .bind(entry.created_at)
        .execute(conn)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                let key = entry.source_ticket_id.as_deref().unwrap_or(&entry.id);
                StoreError::already_exists("PointsHistory", key)
            } else {
                e.into()
            }
        })?;
        Ok(())
    }

    /// Every entry of a profile, oldest first
    pub async fn list_for_profile(
        conn: &mut SqliteConnection,
        profile_id: &str,
    ) -> StoreResult<Vec<PointsHistory>> {
        sqlx::query_as::<_, PointsHistoryRow>(
            r#"
            SELECT * FROM points_history
            WHERE profile_id = ?
            ORDER BY effective_date, created_at, id
            "#,
        )
        .bind(profile_id)
        .fetch_all(conn)
        .await?
        .into_iter()
        .map(PointsHistory::try_from)
        .collect()
    }

    /// Most recent entries of a profile, newest first
    pub async fn recent(
        conn: &mut SqliteConnection,
        profile_id: &str,
        limit: i64,
    ) -> StoreResult<Vec<PointsHistory>> {
        sqlx::query_as::<_, PointsHistoryRow>(
            r#"
            SELECT * FROM points_history
            WHERE profile_id = ?
            ORDER BY created_at DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(profile_id)
        .bind(limit)
        .fetch_all(conn)
        .await?
        .into_iter()
        .map(PointsHistory::try_from)
        .collect()
    }

    pub async fn find_violation_by_ticket(
        conn: &mut SqliteConnection,
        government_id: &str,
        ticket_id: &str,
    ) -> StoreResult<Option<PointsHistory>> {
        sqlx::query_as::<_, PointsHistoryRow>(
            r#"
            SELECT * FROM points_history
            WHERE government_id = ? AND source_ticket_id = ? AND transaction_type = 'violation_added'
            "#,
        )
        .bind(government_id)
        .bind(ticket_id)
        .fetch_optional(conn)
        .await?
        .map(PointsHistory::try_from)
        .transpose()
    }

    /// Active demerit entries with `cutoff < expiry_date <= today`
    pub async fn list_expirable(
        conn: &mut SqliteConnection,
        government_id: Option<&str>,
        today: NaiveDate,
        cutoff: NaiveDate,
    ) -> StoreResult<Vec<PointsHistory>> {
        sqlx::query_as::<_, PointsHistoryRow>(
            r#"
            SELECT * FROM points_history
            WHERE (? IS NULL OR government_id = ?)
              AND point_type = 'demerit'
              AND status = 'active'
              AND expiry_date IS NOT NULL
              AND expiry_date <= ?
              AND expiry_date > ?
            ORDER BY profile_id, effective_date, id
            "#,
        )
        .bind(government_id)
        .bind(government_id)
        .bind(today)
        .bind(cutoff)
        .fetch_all(conn)
        .await?
        .into_iter()
        .map(PointsHistory::try_from)
        .collect()
    }

    /// Transition `active -> expired`; false when the entry was not active
    pub async fn mark_expired(conn: &mut SqliteConnection, id: &str) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE points_history SET status = 'expired' WHERE id = ? AND status = 'active'",
        )
        .bind(id)
        .execute(conn)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Merit points spent on offsets with an effective date after `since`
    pub async fn offset_points_since(
        conn: &mut SqliteConnection,
        profile_id: &str,
        since: NaiveDate,
    ) -> StoreResult<i64> {
        let used: i64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(-points_delta), 0) FROM points_history
            WHERE profile_id = ?
              AND point_type = 'merit'
              AND transaction_type = 'offset'
              AND effective_date > ?
            "#,
        )
        .bind(profile_id)
        .bind(since)
        .fetch_one(conn)
        .await?;
        Ok(used)
    }
}

// ============================================================================
// Suspension Repository
// ============================================================================

/// Repository for `suspension_records`
pub struct SuspensionRepo;

impl SuspensionRepo {
    pub async fn insert(conn: &mut SqliteConnection, record: &SuspensionRecord) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO suspension_records
                (id, government_id, profile_id, sanction_type, status, points_at_incident,
                 threshold_exceeded, effective_date, end_date, reason, offence_codes, source,
                 source_reference, lifted_at, lifted_reason, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.id)
        .bind(&record.government_id)
        .bind(&record.profile_id)
        .bind(record.sanction_type.to_string())
        .bind(record.status.to_string())
        .bind(record.points_at_incident)
        .bind(record.threshold_exceeded)
        .bind(record.effective_date)
        .bind(record.end_date)
        .bind(&record.reason)
        .bind(serde_json::to_string(&record.offence_codes)?)
        .bind(record.source.to_string())
        .bind(&record.source_reference)
        .bind(record.lifted_at)
        .bind(&record.lifted_reason)
        .bind(record.created_at)
        .execute(conn)
        .await?;
        Ok(())
    }

    pub async fn get(conn: &mut SqliteConnection, id: &str) -> StoreResult<SuspensionRecord> {
        sqlx::query_as::<_, SuspensionRow>("SELECT * FROM suspension_records WHERE id = ?")
            .bind(id)
            .fetch_optional(conn)
            .await?
            .ok_or_else(|| StoreError::not_found("SuspensionRecord", id))
            .and_then(SuspensionRecord::try_from)
    }

    /// The active record of a profile, revocations first
    pub async fn find_active(
        conn: &mut SqliteConnection,
        profile_id: &str,
    ) -> StoreResult<Option<SuspensionRecord>> {
        sqlx::query_as::<_, SuspensionRow>(
            r#"
            SELECT * FROM suspension_records
            WHERE profile_id = ? AND status = 'active'
            ORDER BY CASE sanction_type WHEN 'revocation' THEN 0 ELSE 1 END,
                     effective_date DESC
            LIMIT 1
            "#,
        )
        .bind(profile_id)
        .fetch_optional(conn)
        .await?
        .map(SuspensionRecord::try_from)
        .transpose()
    }

    /// All records of a profile, newest first
    pub async fn list_for_profile(
        conn: &mut SqliteConnection,
        profile_id: &str,
    ) -> StoreResult<Vec<SuspensionRecord>> {
        sqlx::query_as::<_, SuspensionRow>(
            r#"
            SELECT * FROM suspension_records
            WHERE profile_id = ?
            ORDER BY effective_date DESC, created_at DESC
            "#,
        )
        .bind(profile_id)
        .fetch_all(conn)
        .await?
        .into_iter()
        .map(SuspensionRecord::try_from)
        .collect()
    }

    /// Active records whose end date has been reached
    pub async fn list_due_for_expiry(
        conn: &mut SqliteConnection,
        government_id: Option<&str>,
        today: NaiveDate,
    ) -> StoreResult<Vec<SuspensionRecord>> {
        sqlx::query_as::<_, SuspensionRow>(
            r#"
            SELECT * FROM suspension_records
            WHERE (? IS NULL OR government_id = ?) AND status = 'active' AND end_date <= ?
            ORDER BY profile_id, effective_date
            "#,
        )
        .bind(government_id)
        .bind(government_id)
        .bind(today)
        .fetch_all(conn)
        .await?
        .into_iter()
        .map(SuspensionRecord::try_from)
        .collect()
    }

    /// Move an active record to a terminal status; false when it was not active
    pub async fn close(
        conn: &mut SqliteConnection,
        id: &str,
        status: SanctionStatus,
        lifted_at: Option<DateTime<Utc>>,
        lifted_reason: Option<&str>,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE suspension_records
            SET status = ?, lifted_at = ?, lifted_reason = ?
            WHERE id = ? AND status = 'active'
            "#,
        )
        .bind(status.to_string())
        .bind(lifted_at)
        .bind(lifted_reason)
        .bind(id)
        .execute(conn)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}

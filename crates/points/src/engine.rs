//! Point Ledger Engine
//!
//! Every mutation runs in one store transaction per profile: append ledger
//! entries, then rebuild both cached balances from the full ledger through
//! [`PointsEngine::recompute`], the only path that writes balance totals.
//! Balance rows are compare-and-set on their version; a lost race rolls the
//! transaction back and the whole operation is retried.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use finepay_core::{
    CitizenIdentity, CitizenProfile, Clock, DemeritBalance, EntryStatus, LicenseStatus,
    MeritBalance, PointSource, PointType, PointsHistory, SanctionSource, SanctionStatus,
    SanctionType, SuspensionRecord, TransactionType,
};
use finepay_store::{
    BalanceRepo, Database, GovernmentRepo, HistoryRepo, PenaltyRuleRepo, PointSettingsRepo,
    ProfileRepo, StoreError, SuspensionRepo,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{MeritPenalty, PointsConfig, Thresholds};
use crate::error::{BatchItemError, PointsError, PointsResult};
use crate::ledger;
use crate::suspension::{self, SanctionDecision, ThresholdStatus};

// ============================================================================
// Requests and outcomes
// ============================================================================

/// A violation to record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DemeritRequest {
    pub offence_code: String,
    /// Explicit points; resolved from the penalty rules when absent
    pub points: Option<i64>,
    /// Measured value for banded rules (e.g. km/h over the limit)
    pub measured_value: Option<Decimal>,
    pub source: PointSource,
}

impl DemeritRequest {
    pub fn new(offence_code: impl Into<String>) -> Self {
        Self {
            offence_code: offence_code.into(),
            points: None,
            measured_value: None,
            source: PointSource::default(),
        }
    }

    pub fn with_points(mut self, points: i64) -> Self {
        self.points = Some(points);
        self
    }

    pub fn with_measured_value(mut self, value: Decimal) -> Self {
        self.measured_value = Some(value);
        self
    }

    pub fn with_source(mut self, source: PointSource) -> Self {
        self.source = source;
        self
    }
}

/// Result of `add_demerit_points`
#[derive(Debug, Clone, Serialize)]
pub struct DemeritOutcome {
    pub profile: CitizenProfile,
    pub entry: PointsHistory,
    pub balance: DemeritBalance,
    pub merit: MeritBalance,
    pub threshold: ThresholdStatus,
    /// Sanction opened by this violation
    pub new_sanction: Option<SuspensionRecord>,
    /// Suspension replaced by a revocation
    pub superseded: Option<String>,
}

impl DemeritOutcome {
    pub fn triggered_sanction(&self) -> bool {
        self.new_sanction.is_some()
    }
}

/// Result of `add_merit_points`
#[derive(Debug, Clone, Serialize)]
pub struct MeritOutcome {
    pub profile_id: String,
    pub requested: i64,
    /// May be less than requested, including zero, because of the cap
    pub awarded: i64,
    pub balance: MeritBalance,
    pub entry: Option<PointsHistory>,
}

/// Result of `offset_demerits_with_merits`
#[derive(Debug, Clone, Serialize)]
pub struct OffsetOutcome {
    pub profile_id: String,
    pub requested: Option<i64>,
    pub offset: i64,
    pub merit_available: i64,
    pub demerits_before: i64,
    pub cap_remaining: i64,
    pub balance: DemeritBalance,
    pub merit: MeritBalance,
    pub threshold: ThresholdStatus,
    pub entries: Vec<PointsHistory>,
}

/// Full point status of a profile
#[derive(Debug, Clone, Serialize)]
pub struct PointStatus {
    pub profile: CitizenProfile,
    pub demerit: DemeritBalance,
    pub merit: MeritBalance,
    pub threshold: ThresholdStatus,
    pub active_sanction: Option<SuspensionRecord>,
    pub offset_cap_remaining: i64,
    pub recent_history: Vec<PointsHistory>,
}

/// Sanction view of a profile
#[derive(Debug, Clone, Serialize)]
pub struct SuspensionStatus {
    pub profile_id: String,
    pub status: LicenseStatus,
    pub current_points: i64,
    pub active: Option<SuspensionRecord>,
    pub history: Vec<SuspensionRecord>,
}

/// Result of `expire_old_points`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExpirySummary {
    pub government_id: Option<String>,
    pub entries_found: usize,
    pub entries_expired: usize,
    pub points_expired: i64,
    pub profiles_recomputed: usize,
    pub sanctions_expired: usize,
    pub errors: Vec<BatchItemError>,
}

impl ExpirySummary {
    pub fn success(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Result of `check_and_award_merits`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MeritSweepSummary {
    pub government_id: Option<String>,
    pub profiles_checked: usize,
    pub profiles_awarded: usize,
    pub points_awarded: i64,
    pub bonuses_awarded: usize,
    pub skipped_recent_violation: usize,
    pub errors: Vec<BatchItemError>,
}

impl MeritSweepSummary {
    pub fn success(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Balances rebuilt from the ledger
#[derive(Debug, Clone)]
pub struct Recomputed {
    pub demerit: DemeritBalance,
    pub merit: MeritBalance,
    pub entries: Vec<PointsHistory>,
}

#[derive(Debug, Default)]
struct MilestoneAward {
    points: i64,
    bonus: bool,
    skipped: bool,
}

// ============================================================================
// Engine
// ============================================================================

/// Point Ledger Engine
pub struct PointsEngine {
    db: Database,
    config: PointsConfig,
    clock: Arc<dyn Clock>,
}

impl PointsEngine {
    pub fn new(db: Database, config: PointsConfig, clock: Arc<dyn Clock>) -> Self {
        Self { db, config, clock }
    }

    pub fn config(&self) -> &PointsConfig {
        &self.config
    }

    // === Point mutations ===

    /// Record a violation against the citizen identified by `identity`.
    ///
    /// Resolves or creates the profile, appends the ledger entry, applies the
    /// merit penalty, recomputes, and opens a sanction when a threshold is
    /// newly crossed. Notification is left to the caller.
    pub async fn add_demerit_points(
        &self,
        government_id: &str,
        identity: &CitizenIdentity,
        request: DemeritRequest,
    ) -> PointsResult<DemeritOutcome> {
        if let Some(points) = request.points {
            if points <= 0 {
                return Err(PointsError::Validation(format!(
                    "demerit points must be positive, got {points}"
                )));
            }
        }
        let request = &request;
        let key = identity.hint();
        self.with_retry(&key, move || self.try_add_demerit(government_id, identity, request))
            .await
    }

    async fn try_add_demerit(
        &self,
        government_id: &str,
        identity: &CitizenIdentity,
        request: &DemeritRequest,
    ) -> PointsResult<DemeritOutcome> {
        let now = self.clock.now();
        let today = now.date_naive();
        let mut tx = self.db.begin().await?;

        ensure_government(&mut tx, government_id).await?;
        let points = self.resolve_points(&mut tx, government_id, request).await?;

        if let Some(ticket_id) = request.source.ticket_id.as_deref() {
            if HistoryRepo::find_violation_by_ticket(&mut tx, government_id, ticket_id)
                .await?
                .is_some()
            {
                return Err(PointsError::AlreadyApplied {
                    ticket_id: ticket_id.to_string(),
                });
            }
        }

        let mut profile = self.resolve_profile(&mut tx, government_id, identity, now).await?;
        let thresholds = self.thresholds_for(&mut tx, government_id).await?;
        let demerit = BalanceRepo::get_demerit(&mut tx, &profile.id).await?;
        let mut merit = BalanceRepo::get_merit(&mut tx, &profile.id).await?;
        let existing = HistoryRepo::list_for_profile(&mut tx, &profile.id).await?;

        let before = ledger::calculate_current_demerits(&existing, today, self.config.demerit_window_days);
        let mut entry = new_entry(
            &profile,
            TransactionType::ViolationAdded,
            PointType::Demerit,
            points,
            before + points,
            today,
            now,
        );
        entry.offence_code = Some(request.offence_code.clone());
        entry.source_ticket_id = request.source.ticket_id.clone();
        entry.reason = request.source.reason.clone();
        entry.expiry_date = Some(today + Duration::days(self.config.demerit_validity_days));
        HistoryRepo::insert(&mut tx, &entry).await.map_err(|e| match e {
            StoreError::AlreadyExists { id, .. } => PointsError::AlreadyApplied { ticket_id: id },
            other => other.into(),
        })?;

        profile.lifetime_demerit_points += points;
        profile.violation_count += 1;
        profile.clean_streak_days = 0;
        profile.last_violation_at = Some(now);
        profile.updated_at = now;
        ProfileRepo::update(&mut tx, &profile).await?;

        let merit_before = ledger::merit_totals(&existing, merit.max_points).current;
        if let Some(forfeit) = self.merit_forfeiture(&profile, merit_before, today, now) {
            HistoryRepo::insert(&mut tx, &forfeit).await?;
        }
        merit.exemplary = false;
        merit.two_year_bonus_awarded = false;

        let recomputed = self.recompute(&mut tx, &thresholds, demerit, merit, today, now).await?;
        let (new_sanction, superseded) = self
            .apply_sanctions(
                &mut tx,
                &profile,
                &thresholds,
                &recomputed,
                request.source.ticket_id.as_deref(),
                today,
                now,
            )
            .await?;
        let recomputed = if new_sanction.is_some() {
            self.recompute(&mut tx, &thresholds, recomputed.demerit, recomputed.merit, today, now)
                .await?
        } else {
            recomputed
        };

        tx.commit().await.map_err(StoreError::from)?;

        info!(
            government_id,
            profile_id = %profile.id,
            offence_code = %request.offence_code,
            points,
            total = recomputed.demerit.current_points,
            status = %recomputed.demerit.status,
            "Demerit points added"
        );

        Ok(DemeritOutcome {
            threshold: ThresholdStatus::evaluate(recomputed.demerit.current_points, &thresholds),
            profile,
            entry,
            balance: recomputed.demerit,
            merit: recomputed.merit,
            new_sanction,
            superseded,
        })
    }

    /// Award merit points, capped at the balance maximum.
    ///
    /// An award that the cap reduces to zero is a normal outcome.
    pub async fn add_merit_points(
        &self,
        government_id: &str,
        identity: &CitizenIdentity,
        points: i64,
        source: PointSource,
    ) -> PointsResult<MeritOutcome> {
        if points <= 0 {
            return Err(PointsError::Validation(format!(
                "merit points must be positive, got {points}"
            )));
        }
        let source = &source;
        let key = identity.hint();
        self.with_retry(&key, move || {
            self.try_add_merit(government_id, identity, points, source)
        })
        .await
    }

    async fn try_add_merit(
        &self,
        government_id: &str,
        identity: &CitizenIdentity,
        points: i64,
        source: &PointSource,
    ) -> PointsResult<MeritOutcome> {
        let now = self.clock.now();
        let today = now.date_naive();
        let mut tx = self.db.begin().await?;

        ensure_government(&mut tx, government_id).await?;
        let profile = self.resolve_profile(&mut tx, government_id, identity, now).await?;
        let thresholds = self.thresholds_for(&mut tx, government_id).await?;
        let demerit = BalanceRepo::get_demerit(&mut tx, &profile.id).await?;
        let merit = BalanceRepo::get_merit(&mut tx, &profile.id).await?;
        let existing = HistoryRepo::list_for_profile(&mut tx, &profile.id).await?;

        let current = ledger::merit_totals(&existing, merit.max_points).current;
        let awarded = points.min((merit.max_points - current).max(0));

        let entry = if awarded > 0 {
            let mut entry = new_entry(
                &profile,
                TransactionType::MeritAdded,
                PointType::Merit,
                awarded,
                current + awarded,
                today,
                now,
            );
            entry.source_ticket_id = source.ticket_id.clone();
            entry.reason = source.reason.clone();
            HistoryRepo::insert(&mut tx, &entry).await?;
            Some(entry)
        } else {
            None
        };

        let recomputed = self.recompute(&mut tx, &thresholds, demerit, merit, today, now).await?;
        tx.commit().await.map_err(StoreError::from)?;

        info!(
            government_id,
            profile_id = %profile.id,
            requested = points,
            awarded,
            balance = recomputed.merit.current_points,
            "Merit points awarded"
        );

        Ok(MeritOutcome {
            profile_id: profile.id,
            requested: points,
            awarded,
            balance: recomputed.merit,
            entry,
        })
    }

    /// Exchange merit points for demerit forgiveness.
    ///
    /// `offset = min(merit available, current demerits, cap remaining, requested)`;
    /// zero when nothing can be offset, never an error.
    pub async fn offset_demerits_with_merits(
        &self,
        government_id: &str,
        profile_id: &str,
        requested: Option<i64>,
    ) -> PointsResult<OffsetOutcome> {
        if let Some(points) = requested {
            if points <= 0 {
                return Err(PointsError::Validation(format!(
                    "offset points must be positive, got {points}"
                )));
            }
        }
        self.with_retry(profile_id, move || {
            self.try_offset(government_id, profile_id, requested)
        })
        .await
    }

    async fn try_offset(
        &self,
        government_id: &str,
        profile_id: &str,
        requested: Option<i64>,
    ) -> PointsResult<OffsetOutcome> {
        let now = self.clock.now();
        let today = now.date_naive();
        let window = self.config.demerit_window_days;
        let mut tx = self.db.begin().await?;

        let profile = load_profile(&mut tx, government_id, profile_id).await?;
        let thresholds = self.thresholds_for(&mut tx, government_id).await?;
        let demerit = BalanceRepo::get_demerit(&mut tx, profile_id).await?;
        let merit = BalanceRepo::get_merit(&mut tx, profile_id).await?;
        let existing = HistoryRepo::list_for_profile(&mut tx, profile_id).await?;

        let demerits_before = ledger::calculate_current_demerits(&existing, today, window);
        let merit_available = ledger::merit_totals(&existing, merit.max_points).current;
        let used = HistoryRepo::offset_points_since(&mut tx, profile_id, today - self.config.offset_period())
            .await?;
        let cap_remaining = (self.config.offset_cap_points - used).max(0);

        let mut amount = merit_available.min(demerits_before).min(cap_remaining);
        if let Some(limit) = requested {
            amount = amount.min(limit);
        }

        let mut entries = Vec::new();
        let mut offset = 0;
        if amount > 0 {
            let mut running = demerits_before;
            for slice in ledger::plan_offset(&existing, today, window, amount) {
                running -= slice.points;
                offset += slice.points;
                let mut entry = new_entry(
                    &profile,
                    TransactionType::Offset,
                    PointType::Demerit,
                    -slice.points,
                    running,
                    today,
                    now,
                );
                entry.offsets_entry_id = Some(slice.violation_id);
                entry.offence_code = slice.offence_code;
                entry.expiry_date = slice.expiry_date;
                entry.reason = Some("offset with merit points".to_string());
                HistoryRepo::insert(&mut tx, &entry).await?;
                entries.push(entry);
            }
            if offset > 0 {
                let mut entry = new_entry(
                    &profile,
                    TransactionType::Offset,
                    PointType::Merit,
                    -offset,
                    merit_available - offset,
                    today,
                    now,
                );
                entry.reason = Some("offset against demerit points".to_string());
                HistoryRepo::insert(&mut tx, &entry).await?;
                entries.push(entry);
            }
        }

        let recomputed = self.recompute(&mut tx, &thresholds, demerit, merit, today, now).await?;
        tx.commit().await.map_err(StoreError::from)?;

        if offset > 0 {
            info!(
                government_id,
                profile_id,
                offset,
                demerits = recomputed.demerit.current_points,
                merit = recomputed.merit.current_points,
                "Demerits offset with merit points"
            );
        } else {
            debug!(government_id, profile_id, "Nothing to offset");
        }

        Ok(OffsetOutcome {
            profile_id: profile_id.to_string(),
            requested,
            offset,
            merit_available,
            demerits_before,
            cap_remaining: cap_remaining - offset,
            threshold: ThresholdStatus::evaluate(recomputed.demerit.current_points, &thresholds),
            balance: recomputed.demerit,
            merit: recomputed.merit,
            entries,
        })
    }

    // === Reads ===

    /// Authoritative demerit total straight from the ledger; writes nothing
    pub async fn calculate_current_demerits(
        &self,
        government_id: &str,
        profile_id: &str,
    ) -> PointsResult<i64> {
        let mut conn = self.db.pool().acquire().await.map_err(StoreError::from)?;
        load_profile(&mut conn, government_id, profile_id).await?;
        let entries = HistoryRepo::list_for_profile(&mut conn, profile_id).await?;
        Ok(ledger::calculate_current_demerits(
            &entries,
            self.clock.today(),
            self.config.demerit_window_days,
        ))
    }

    /// Profile, balances (refreshed from the ledger), thresholds, active
    /// sanction and recent ledger entries
    pub async fn get_point_status(
        &self,
        government_id: &str,
        profile_id: &str,
    ) -> PointsResult<PointStatus> {
        self.with_retry(profile_id, move || {
            self.try_point_status(government_id, profile_id)
        })
        .await
    }

    async fn try_point_status(&self, government_id: &str, profile_id: &str) -> PointsResult<PointStatus> {
        let now = self.clock.now();
        let today = now.date_naive();
        let mut tx = self.db.begin().await?;

        let profile = load_profile(&mut tx, government_id, profile_id).await?;
        let thresholds = self.thresholds_for(&mut tx, government_id).await?;
        let recomputed = self.refresh(&mut tx, &thresholds, profile_id, today, now).await?;
        let active_sanction = SuspensionRepo::find_active(&mut tx, profile_id).await?;
        let used = HistoryRepo::offset_points_since(&mut tx, profile_id, today - self.config.offset_period())
            .await?;
        let recent_history =
            HistoryRepo::recent(&mut tx, profile_id, self.config.recent_history_limit).await?;
        tx.commit().await.map_err(StoreError::from)?;

        Ok(PointStatus {
            profile,
            threshold: ThresholdStatus::evaluate(recomputed.demerit.current_points, &thresholds),
            demerit: recomputed.demerit,
            merit: recomputed.merit,
            active_sanction,
            offset_cap_remaining: (self.config.offset_cap_points - used).max(0),
            recent_history,
        })
    }

    pub async fn get_suspension_status(
        &self,
        government_id: &str,
        profile_id: &str,
    ) -> PointsResult<SuspensionStatus> {
        self.with_retry(profile_id, move || {
            self.try_suspension_status(government_id, profile_id)
        })
        .await
    }

    async fn try_suspension_status(
        &self,
        government_id: &str,
        profile_id: &str,
    ) -> PointsResult<SuspensionStatus> {
        let now = self.clock.now();
        let mut tx = self.db.begin().await?;

        load_profile(&mut tx, government_id, profile_id).await?;
        let thresholds = self.thresholds_for(&mut tx, government_id).await?;
        let recomputed = self
            .refresh(&mut tx, &thresholds, profile_id, now.date_naive(), now)
            .await?;
        let active = SuspensionRepo::find_active(&mut tx, profile_id).await?;
        let history = SuspensionRepo::list_for_profile(&mut tx, profile_id).await?;
        tx.commit().await.map_err(StoreError::from)?;

        Ok(SuspensionStatus {
            profile_id: profile_id.to_string(),
            status: recomputed.demerit.status,
            current_points: recomputed.demerit.current_points,
            active,
            history,
        })
    }

    /// Profile for an identity, if one exists
    pub async fn find_profile(
        &self,
        government_id: &str,
        identity: &CitizenIdentity,
    ) -> PointsResult<Option<CitizenProfile>> {
        let mut conn = self.db.pool().acquire().await.map_err(StoreError::from)?;
        ensure_government(&mut conn, government_id).await?;
        Ok(ProfileRepo::find_by_hash(&mut conn, government_id, &identity.hash_for(government_id)).await?)
    }

    // === Sweeps ===

    /// Expire demerit entries that reached their expiry date and sanction
    /// records that reached their end date.
    ///
    /// One transaction per profile; a failing profile is reported and the
    /// sweep continues. Re-running is a no-op for anything already expired.
    pub async fn expire_old_points(&self, government_id: Option<&str>) -> PointsResult<ExpirySummary> {
        let today = self.clock.today();
        let cutoff = today - self.config.expiry_lookback();
        let mut summary = ExpirySummary {
            government_id: government_id.map(str::to_string),
            ..ExpirySummary::default()
        };

        let (due, sanctions) = {
            let mut conn = self.db.pool().acquire().await.map_err(StoreError::from)?;
            let due = HistoryRepo::list_expirable(&mut conn, government_id, today, cutoff).await?;
            let sanctions = SuspensionRepo::list_due_for_expiry(&mut conn, government_id, today).await?;
            (due, sanctions)
        };
        summary.entries_found = due.len();

        let mut by_profile: BTreeMap<String, Vec<PointsHistory>> = BTreeMap::new();
        for entry in due {
            by_profile.entry(entry.profile_id.clone()).or_default().push(entry);
        }

        for (profile_id, entries) in &by_profile {
            let pid = profile_id.as_str();
            let list = entries.as_slice();
            match self
                .with_retry(pid, move || self.expire_profile_entries(pid, list, today))
                .await
            {
                Ok((expired, points)) => {
                    summary.entries_expired += expired;
                    summary.points_expired += points;
                    summary.profiles_recomputed += 1;
                }
                Err(e) => {
                    warn!(profile_id = pid, error = %e, "Point expiry failed for profile");
                    summary.errors.push(BatchItemError::new(pid, &e));
                }
            }
        }

        for record in &sanctions {
            match self.with_retry(&record.profile_id, move || self.expire_sanction(record, today)).await {
                Ok(true) => summary.sanctions_expired += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(record_id = %record.id, error = %e, "Sanction expiry failed");
                    summary.errors.push(BatchItemError::new(record.id.as_str(), &e));
                }
            }
        }

        info!(
            government_id = government_id.unwrap_or("*"),
            found = summary.entries_found,
            expired = summary.entries_expired,
            points = summary.points_expired,
            sanctions = summary.sanctions_expired,
            errors = summary.errors.len(),
            "Point expiry sweep finished"
        );
        Ok(summary)
    }

    async fn expire_profile_entries(
        &self,
        profile_id: &str,
        entries: &[PointsHistory],
        today: NaiveDate,
    ) -> PointsResult<(usize, i64)> {
        let now = self.clock.now();
        let mut tx = self.db.begin().await?;

        let demerit = BalanceRepo::get_demerit(&mut tx, profile_id).await?;
        let merit = BalanceRepo::get_merit(&mut tx, profile_id).await?;
        let thresholds = self.thresholds_for(&mut tx, &demerit.government_id).await?;

        let mut expired = 0;
        let mut points = 0;
        for entry in entries {
            if HistoryRepo::mark_expired(&mut tx, &entry.id).await? {
                expired += 1;
                points += entry.points_delta;
            }
        }

        self.recompute(&mut tx, &thresholds, demerit, merit, today, now).await?;
        tx.commit().await.map_err(StoreError::from)?;
        Ok((expired, points))
    }

    async fn expire_sanction(&self, record: &SuspensionRecord, today: NaiveDate) -> PointsResult<bool> {
        let now = self.clock.now();
        let mut tx = self.db.begin().await?;

        let closed = SuspensionRepo::close(&mut tx, &record.id, SanctionStatus::Expired, None, None).await?;
        if closed {
            let thresholds = self.thresholds_for(&mut tx, &record.government_id).await?;
            self.refresh(&mut tx, &thresholds, &record.profile_id, today, now).await?;
            info!(
                profile_id = %record.profile_id,
                record_id = %record.id,
                sanction = %record.sanction_type,
                "Sanction expired"
            );
        }
        tx.commit().await.map_err(StoreError::from)?;
        Ok(closed)
    }

    /// Grant clean-driving milestones to active profiles.
    ///
    /// Profiles with a violation inside the six-month window are skipped;
    /// per-profile failures are counted and the sweep continues.
    pub async fn check_and_award_merits(
        &self,
        government_id: Option<&str>,
    ) -> PointsResult<MeritSweepSummary> {
        let today = self.clock.today();
        let mut summary = MeritSweepSummary {
            government_id: government_id.map(str::to_string),
            ..MeritSweepSummary::default()
        };

        let profiles = {
            let mut conn = self.db.pool().acquire().await.map_err(StoreError::from)?;
            ProfileRepo::list(&mut conn, government_id, true).await?
        };

        for profile in &profiles {
            summary.profiles_checked += 1;
            match self
                .with_retry(&profile.id, move || self.award_milestones(profile, today))
                .await
            {
                Ok(award) if award.skipped => summary.skipped_recent_violation += 1,
                Ok(award) => {
                    if award.points > 0 {
                        summary.profiles_awarded += 1;
                        summary.points_awarded += award.points;
                    }
                    if award.bonus {
                        summary.bonuses_awarded += 1;
                    }
                }
                Err(e) => {
                    warn!(profile_id = %profile.id, error = %e, "Merit award failed for profile");
                    summary.errors.push(BatchItemError::new(profile.id.as_str(), &e));
                }
            }
        }

        info!(
            government_id = government_id.unwrap_or("*"),
            checked = summary.profiles_checked,
            awarded = summary.profiles_awarded,
            points = summary.points_awarded,
            errors = summary.errors.len(),
            "Merit sweep finished"
        );
        Ok(summary)
    }

    async fn award_milestones(&self, profile: &CitizenProfile, today: NaiveDate) -> PointsResult<MilestoneAward> {
        let now = self.clock.now();
        let milestones = self.config.milestones;
        let mut tx = self.db.begin().await?;

        let mut profile = ProfileRepo::get(&mut tx, &profile.id).await?;
        let clean_days = profile.clean_days(today);
        profile.clean_streak_days = clean_days;
        profile.updated_at = now;
        ProfileRepo::update(&mut tx, &profile).await?;

        if clean_days < milestones.six_month_days {
            tx.commit().await.map_err(StoreError::from)?;
            return Ok(MilestoneAward {
                skipped: true,
                ..MilestoneAward::default()
            });
        }

        let thresholds = self.thresholds_for(&mut tx, &profile.government_id).await?;
        let demerit = BalanceRepo::get_demerit(&mut tx, &profile.id).await?;
        let mut merit = BalanceRepo::get_merit(&mut tx, &profile.id).await?;
        let existing = HistoryRepo::list_for_profile(&mut tx, &profile.id).await?;
        let mut current = ledger::merit_totals(&existing, merit.max_points).current;

        let anchor = match merit.last_award_date {
            Some(last) if last > profile.clean_since() => last,
            _ => profile.clean_since(),
        };
        let since_anchor = (today - anchor).num_days();
        let milestone = if since_anchor >= milestones.twelve_month_days {
            milestones.twelve_month_points
        } else if since_anchor >= milestones.six_month_days {
            milestones.six_month_points
        } else {
            0
        };

        let mut award = MilestoneAward::default();
        if milestone > 0 {
            let granted = milestone.min((merit.max_points - current).max(0));
            if granted > 0 {
                let mut entry = new_entry(
                    &profile,
                    TransactionType::MeritEarned,
                    PointType::Merit,
                    granted,
                    current + granted,
                    today,
                    now,
                );
                entry.reason = Some(format!("{since_anchor} days of clean driving"));
                HistoryRepo::insert(&mut tx, &entry).await?;
                current += granted;
                award.points += granted;
            }
            merit.last_award_date = Some(today);
        }

        if clean_days >= milestones.two_year_days && !merit.two_year_bonus_awarded {
            let granted = milestones
                .two_year_bonus_points
                .min((merit.max_points - current).max(0));
            if granted > 0 {
                let mut entry = new_entry(
                    &profile,
                    TransactionType::MeritEarned,
                    PointType::Merit,
                    granted,
                    current + granted,
                    today,
                    now,
                );
                entry.reason = Some("two-year clean driving bonus".to_string());
                HistoryRepo::insert(&mut tx, &entry).await?;
                award.points += granted;
            }
            merit.two_year_bonus_awarded = true;
            merit.exemplary = true;
            award.bonus = true;
        }

        self.recompute(&mut tx, &thresholds, demerit, merit, today, now).await?;
        tx.commit().await.map_err(StoreError::from)?;

        if award.points > 0 || award.bonus {
            info!(
                profile_id = %profile.id,
                clean_days,
                points = award.points,
                bonus = award.bonus,
                "Clean-driving merit awarded"
            );
        }
        Ok(award)
    }

    // === Administrative sanctions ===

    /// Impose a sanction by hand.
    ///
    /// A revocation supersedes an active suspension; any other overlap with an
    /// active record is rejected.
    pub async fn impose_manual_sanction(
        &self,
        government_id: &str,
        profile_id: &str,
        sanction_type: SanctionType,
        days: Option<i64>,
        reason: &str,
        reference: Option<&str>,
    ) -> PointsResult<SuspensionRecord> {
        if reason.trim().is_empty() {
            return Err(PointsError::Validation("a sanction needs a reason".to_string()));
        }
        if let Some(d) = days {
            if d <= 0 {
                return Err(PointsError::Validation(format!(
                    "sanction length must be positive, got {d} days"
                )));
            }
        }
        self.with_retry(profile_id, move || {
            self.try_manual_sanction(government_id, profile_id, sanction_type, days, reason, reference)
        })
        .await
    }

    async fn try_manual_sanction(
        &self,
        government_id: &str,
        profile_id: &str,
        sanction_type: SanctionType,
        days: Option<i64>,
        reason: &str,
        reference: Option<&str>,
    ) -> PointsResult<SuspensionRecord> {
        let now = self.clock.now();
        let today = now.date_naive();
        let mut tx = self.db.begin().await?;

        let profile = load_profile(&mut tx, government_id, profile_id).await?;
        let thresholds = self.thresholds_for(&mut tx, government_id).await?;

        if let Some(active) = SuspensionRepo::find_active(&mut tx, profile_id).await? {
            if sanction_type == SanctionType::Revocation && active.sanction_type == SanctionType::Suspension {
                SuspensionRepo::close(
                    &mut tx,
                    &active.id,
                    SanctionStatus::Superseded,
                    None,
                    Some("superseded by manual revocation"),
                )
                .await?;
            } else {
                return Err(PointsError::Validation(format!(
                    "profile {} already has an active {}",
                    profile_id, active.sanction_type
                )));
            }
        }

        let entries = HistoryRepo::list_for_profile(&mut tx, profile_id).await?;
        let window = self.config.demerit_window_days;
        let effective_date = today;
        let record = SuspensionRecord {
            id: Uuid::new_v4().to_string(),
            government_id: government_id.to_string(),
            profile_id: profile.id.clone(),
            sanction_type,
            status: SanctionStatus::Active,
            points_at_incident: ledger::calculate_current_demerits(&entries, today, window),
            threshold_exceeded: suspension::threshold_for(sanction_type, &thresholds),
            effective_date,
            end_date: effective_date + Duration::days(days.unwrap_or_else(|| sanction_type.default_days())),
            reason: reason.to_string(),
            offence_codes: ledger::offence_codes_in_window(&entries, today, window),
            source: SanctionSource::Manual,
            source_reference: reference.map(str::to_string),
            lifted_at: None,
            lifted_reason: None,
            created_at: now,
        };
        SuspensionRepo::insert(&mut tx, &record).await?;
        self.refresh(&mut tx, &thresholds, profile_id, today, now).await?;
        tx.commit().await.map_err(StoreError::from)?;

        info!(
            government_id,
            profile_id,
            sanction = %sanction_type,
            end_date = %record.end_date,
            "Manual sanction imposed"
        );
        Ok(record)
    }

    /// Lift the active sanction of a profile
    pub async fn lift_suspension(
        &self,
        government_id: &str,
        profile_id: &str,
        reason: &str,
    ) -> PointsResult<SuspensionRecord> {
        self.with_retry(profile_id, move || self.try_lift(government_id, profile_id, reason))
            .await
    }

    async fn try_lift(&self, government_id: &str, profile_id: &str, reason: &str) -> PointsResult<SuspensionRecord> {
        let now = self.clock.now();
        let mut tx = self.db.begin().await?;

        load_profile(&mut tx, government_id, profile_id).await?;
        let active = SuspensionRepo::find_active(&mut tx, profile_id)
            .await?
            .ok_or_else(|| PointsError::not_found("SuspensionRecord", profile_id))?;
        SuspensionRepo::close(&mut tx, &active.id, SanctionStatus::Lifted, Some(now), Some(reason)).await?;

        let thresholds = self.thresholds_for(&mut tx, government_id).await?;
        self.refresh(&mut tx, &thresholds, profile_id, now.date_naive(), now)
            .await?;
        let lifted = SuspensionRepo::get(&mut tx, &active.id).await?;
        tx.commit().await.map_err(StoreError::from)?;

        info!(government_id, profile_id, record_id = %lifted.id, "Sanction lifted");
        Ok(lifted)
    }

    /// Soft-deactivate a profile; sweeps skip it from now on
    pub async fn deactivate_profile(&self, government_id: &str, profile_id: &str) -> PointsResult<CitizenProfile> {
        let now = self.clock.now();
        let mut tx = self.db.begin().await?;
        let mut profile = load_profile(&mut tx, government_id, profile_id).await?;
        profile.active = false;
        profile.updated_at = now;
        ProfileRepo::update(&mut tx, &profile).await?;
        tx.commit().await.map_err(StoreError::from)?;

        info!(government_id, profile_id, "Profile deactivated");
        Ok(profile)
    }

    /// Store per-government thresholds overriding the configured defaults
    pub async fn set_thresholds(&self, government_id: &str, thresholds: Thresholds) -> PointsResult<()> {
        thresholds.validate()?;
        let mut conn = self.db.pool().acquire().await.map_err(StoreError::from)?;
        ensure_government(&mut conn, government_id).await?;
        PointSettingsRepo::upsert(
            &mut conn,
            government_id,
            thresholds.warning,
            thresholds.suspension,
            thresholds.revocation,
        )
        .await?;
        Ok(())
    }

    // === Internals ===

    /// Rebuild both cached balances from the ledger and write them back with
    /// compare-and-set. The single path that updates balance totals.
    pub async fn recompute(
        &self,
        conn: &mut SqliteConnection,
        thresholds: &Thresholds,
        mut demerit: DemeritBalance,
        mut merit: MeritBalance,
        today: NaiveDate,
        now: DateTime<Utc>,
    ) -> PointsResult<Recomputed> {
        let window = self.config.demerit_window_days;
        let entries = HistoryRepo::list_for_profile(&mut *conn, &demerit.profile_id).await?;
        let sanctions = SuspensionRepo::list_for_profile(&mut *conn, &demerit.profile_id).await?;

        demerit.current_points = ledger::calculate_current_demerits(&entries, today, window);
        demerit.active_entries = ledger::active_violation_count(&entries, today, window);
        demerit.total_expired = ledger::expired_demerit_total(&entries);
        demerit.status = suspension::license_status(demerit.current_points, thresholds);
        demerit.last_suspension_date = sanctions.first().map(|r| r.effective_date);
        demerit.updated_at = now;
        demerit.version = BalanceRepo::update_demerit(&mut *conn, &demerit).await?;

        let totals = ledger::merit_totals(&entries, merit.max_points);
        merit.current_points = totals.current;
        merit.total_earned = totals.earned;
        merit.total_used = totals.used;
        merit.total_expired = totals.forfeited;
        merit.updated_at = now;
        merit.version = BalanceRepo::update_merit(&mut *conn, &merit).await?;

        debug!(
            profile_id = %demerit.profile_id,
            demerits = demerit.current_points,
            merit = merit.current_points,
            "Balances recomputed"
        );
        Ok(Recomputed {
            demerit,
            merit,
            entries,
        })
    }

    async fn refresh(
        &self,
        conn: &mut SqliteConnection,
        thresholds: &Thresholds,
        profile_id: &str,
        today: NaiveDate,
        now: DateTime<Utc>,
    ) -> PointsResult<Recomputed> {
        let demerit = BalanceRepo::get_demerit(&mut *conn, profile_id).await?;
        let merit = BalanceRepo::get_merit(&mut *conn, profile_id).await?;
        self.recompute(conn, thresholds, demerit, merit, today, now).await
    }

    #[allow(clippy::too_many_arguments)]
    async fn apply_sanctions(
        &self,
        conn: &mut SqliteConnection,
        profile: &CitizenProfile,
        thresholds: &Thresholds,
        recomputed: &Recomputed,
        source_reference: Option<&str>,
        today: NaiveDate,
        now: DateTime<Utc>,
    ) -> PointsResult<(Option<SuspensionRecord>, Option<String>)> {
        let points = recomputed.demerit.current_points;
        let active = SuspensionRepo::find_active(&mut *conn, &profile.id).await?;

        let (sanction_type, superseded) = match suspension::decide(points, thresholds, active.as_ref()) {
            SanctionDecision::Keep => return Ok((None, None)),
            SanctionDecision::Impose(sanction_type) => (sanction_type, None),
            SanctionDecision::Escalate { superseded_id } => {
                SuspensionRepo::close(
                    &mut *conn,
                    &superseded_id,
                    SanctionStatus::Superseded,
                    None,
                    Some("superseded by revocation"),
                )
                .await?;
                (SanctionType::Revocation, Some(superseded_id))
            }
        };

        let threshold = suspension::threshold_for(sanction_type, thresholds);
        let record = SuspensionRecord {
            id: Uuid::new_v4().to_string(),
            government_id: profile.government_id.clone(),
            profile_id: profile.id.clone(),
            sanction_type,
            status: SanctionStatus::Active,
            points_at_incident: points,
            threshold_exceeded: threshold,
            effective_date: today,
            end_date: SuspensionRecord::end_date_for(sanction_type, today),
            reason: format!(
                "Demerit total {points} reached the {sanction_type} threshold of {threshold}"
            ),
            offence_codes: ledger::offence_codes_in_window(
                &recomputed.entries,
                today,
                self.config.demerit_window_days,
            ),
            source: SanctionSource::Automatic,
            source_reference: source_reference.map(str::to_string),
            lifted_at: None,
            lifted_reason: None,
            created_at: now,
        };
        SuspensionRepo::insert(&mut *conn, &record).await?;

        warn!(
            government_id = %profile.government_id,
            profile_id = %profile.id,
            sanction = %sanction_type,
            points,
            end_date = %record.end_date,
            superseded = superseded.as_deref().unwrap_or("-"),
            "Licence sanction imposed"
        );
        Ok((Some(record), superseded))
    }

    fn merit_forfeiture(
        &self,
        profile: &CitizenProfile,
        merit_current: i64,
        today: NaiveDate,
        now: DateTime<Utc>,
    ) -> Option<PointsHistory> {
        let forfeit = match self.config.merit_penalty {
            MeritPenalty::Reset => merit_current,
            MeritPenalty::Deduct { points } => points.max(0).min(merit_current),
        };
        if forfeit <= 0 {
            return None;
        }
        let mut entry = new_entry(
            profile,
            TransactionType::MeritForfeited,
            PointType::Merit,
            -forfeit,
            merit_current - forfeit,
            today,
            now,
        );
        entry.reason = Some("forfeited on violation".to_string());
        Some(entry)
    }

    async fn resolve_points(
        &self,
        conn: &mut SqliteConnection,
        government_id: &str,
        request: &DemeritRequest,
    ) -> PointsResult<i64> {
        if let Some(points) = request.points {
            return Ok(points);
        }
        let rules = PenaltyRuleRepo::list_active(conn, government_id, &request.offence_code).await?;
        rules
            .iter()
            .find(|rule| rule.matches(request.measured_value))
            .map(|rule| rule.points)
            .filter(|points| *points > 0)
            .ok_or_else(|| {
                PointsError::Validation(format!(
                    "no active penalty rule for offence {} and value {}",
                    request.offence_code,
                    request
                        .measured_value
                        .map_or_else(|| "none".to_string(), |v| v.to_string())
                ))
            })
    }

    async fn resolve_profile(
        &self,
        conn: &mut SqliteConnection,
        government_id: &str,
        identity: &CitizenIdentity,
        now: DateTime<Utc>,
    ) -> PointsResult<CitizenProfile> {
        let hash = identity.hash_for(government_id);
        if let Some(profile) = ProfileRepo::find_by_hash(&mut *conn, government_id, &hash).await? {
            return Ok(profile);
        }

        let profile = CitizenProfile {
            id: Uuid::new_v4().to_string(),
            government_id: government_id.to_string(),
            identity_kind: identity.kind,
            identity_hash: hash,
            identifier_hint: identity.hint(),
            contact: identity.contact.clone(),
            lifetime_demerit_points: 0,
            violation_count: 0,
            clean_streak_days: 0,
            last_violation_at: None,
            active: true,
            created_at: now,
            updated_at: now,
        };
        ProfileRepo::insert(&mut *conn, &profile).await?;

        let mut demerit = DemeritBalance::new(&profile.id, government_id);
        demerit.updated_at = now;
        BalanceRepo::insert_demerit(&mut *conn, &demerit).await?;
        let mut merit = MeritBalance::new(&profile.id, government_id, self.config.merit_max_points);
        merit.updated_at = now;
        BalanceRepo::insert_merit(&mut *conn, &merit).await?;

        info!(government_id, profile_id = %profile.id, kind = %identity.kind, "Citizen profile created");
        Ok(profile)
    }

    async fn thresholds_for(&self, conn: &mut SqliteConnection, government_id: &str) -> PointsResult<Thresholds> {
        let mut thresholds = self.config.thresholds;
        if let Some(settings) = PointSettingsRepo::get(conn, government_id).await? {
            thresholds.warning = settings.warning_threshold;
            thresholds.suspension = settings.suspension_threshold;
            thresholds.revocation = settings.revocation_threshold;
        }
        Ok(thresholds)
    }

    async fn with_retry<T, F, Fut>(&self, key: &str, mut op: F) -> PointsResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = PointsResult<T>>,
    {
        let attempts = self.config.max_retries.max(1);
        for attempt in 1..=attempts {
            match op().await {
                Err(e) if e.is_conflict() => {
                    warn!(key, attempt, "Concurrent balance update, retrying");
                }
                other => return other,
            }
        }
        Err(PointsError::Contention {
            profile_id: key.to_string(),
            attempts,
        })
    }
}

async fn ensure_government(conn: &mut SqliteConnection, government_id: &str) -> PointsResult<()> {
    GovernmentRepo::find(conn, government_id)
        .await?
        .map(|_| ())
        .ok_or_else(|| PointsError::not_found("Government", government_id))
}

/// Load a profile and check it belongs to `government_id`
async fn load_profile(
    conn: &mut SqliteConnection,
    government_id: &str,
    profile_id: &str,
) -> PointsResult<CitizenProfile> {
    let profile = ProfileRepo::find(conn, profile_id)
        .await?
        .ok_or_else(|| PointsError::not_found("CitizenProfile", profile_id))?;
    if profile.government_id != government_id {
        return Err(PointsError::cross_tenant("CitizenProfile", profile_id, government_id));
    }
    Ok(profile)
}

fn new_entry(
    profile: &CitizenProfile,
    transaction_type: TransactionType,
    point_type: PointType,
    points_delta: i64,
    balance_after: i64,
    today: NaiveDate,
    now: DateTime<Utc>,
) -> PointsHistory {
    PointsHistory {
        id: Uuid::new_v4().to_string(),
        government_id: profile.government_id.clone(),
        profile_id: profile.id.clone(),
        transaction_type,
        point_type,
        points_delta,
        offence_code: None,
        source_ticket_id: None,
        reason: None,
        offsets_entry_id: None,
        effective_date: today,
        expiry_date: None,
        status: EntryStatus::Active,
        balance_after: balance_after.max(0),
        created_at: now,
    }
}

//! Integration tests for the point ledger engine against the SQLite store

use std::sync::Arc;

use chrono::NaiveDate;
use rust_decimal_macros::dec;

use finepay_core::{
    CitizenIdentity, Clock, FixedClock, Government, GovernmentStatus, LicenseStatus, PenaltyRule,
    PointSource, SanctionSource, SanctionStatus, SanctionType,
};
use finepay_points::{DemeritRequest, PointsConfig, PointsEngine, PointsError, Thresholds};
use finepay_store::{Database, GovernmentRepo, PenaltyRuleRepo, SuspensionRepo};

const GOV: &str = "GOV-1";

fn start_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()
}

async fn setup() -> (PointsEngine, Database, Arc<FixedClock>) {
    let db = Database::in_memory().await.unwrap();
    {
        let mut conn = db.pool().acquire().await.unwrap();
        for id in [GOV, "GOV-2"] {
            GovernmentRepo::insert(&mut conn, &Government::new(id, id, GovernmentStatus::Active))
                .await
                .unwrap();
        }
    }
    let clock = Arc::new(FixedClock::at_date(start_date()));
    let dyn_clock: Arc<dyn Clock> = clock.clone();
    let engine = PointsEngine::new(db.clone(), PointsConfig::default(), dyn_clock);
    (engine, db, clock)
}

fn driver(raw: &str) -> CitizenIdentity {
    CitizenIdentity::driver_license(raw).unwrap()
}

fn violation(code: &str, points: i64, ticket: &str) -> DemeritRequest {
    DemeritRequest::new(code)
        .with_points(points)
        .with_source(PointSource::ticket(ticket))
}

#[tokio::test]
async fn test_rolling_window_total() {
    let (engine, _db, clock) = setup().await;
    let who = driver("DL-100");

    engine.add_demerit_points(GOV, &who, violation("SPD", 5, "T1")).await.unwrap();
    clock.advance_days(200);
    engine.add_demerit_points(GOV, &who, violation("SPD", 5, "T2")).await.unwrap();
    clock.advance_days(200);
    let outcome = engine
        .add_demerit_points(GOV, &who, violation("RED", 10, "T3"))
        .await
        .unwrap();

    // First violation is 400 days old
    assert_eq!(outcome.balance.current_points, 15);
    assert_eq!(outcome.balance.active_entries, 2);
    assert_eq!(outcome.profile.lifetime_demerit_points, 20);
    assert_eq!(outcome.profile.violation_count, 3);
    assert_eq!(
        engine.calculate_current_demerits(GOV, &outcome.profile.id).await.unwrap(),
        15
    );
}

#[tokio::test]
async fn test_crossing_suspension_threshold_opens_one_record() {
    let (engine, _db, _clock) = setup().await;
    let who = driver("DL-200");

    let first = engine.add_demerit_points(GOV, &who, violation("SPD", 9, "T1")).await.unwrap();
    assert_eq!(first.balance.status, LicenseStatus::Warning);
    assert!(first.new_sanction.is_none());

    let second = engine.add_demerit_points(GOV, &who, violation("DUI", 4, "T2")).await.unwrap();
    let record = second.new_sanction.clone().unwrap();
    assert_eq!(second.balance.current_points, 13);
    assert_eq!(second.balance.status, LicenseStatus::Suspended);
    assert_eq!(second.balance.last_suspension_date, Some(start_date()));
    assert_eq!(record.sanction_type, SanctionType::Suspension);
    assert_eq!(record.points_at_incident, 13);
    assert_eq!(record.threshold_exceeded, 12);
    assert_eq!(record.source, SanctionSource::Automatic);
    assert_eq!(record.source_reference.as_deref(), Some("T2"));
    assert_eq!(record.offence_codes.len(), 2);
    assert!(record.offence_codes.contains(&"DUI".to_string()));

    // Still suspended, no second record
    let third = engine.add_demerit_points(GOV, &who, violation("SPD", 1, "T3")).await.unwrap();
    assert!(third.new_sanction.is_none());

    let status = engine.get_suspension_status(GOV, &second.profile.id).await.unwrap();
    assert_eq!(status.history.len(), 1);
    assert_eq!(status.active.unwrap().id, record.id);
    assert_eq!(status.current_points, 14);
}

#[tokio::test]
async fn test_revocation_supersedes_suspension() {
    let (engine, db, _clock) = setup().await;
    let who = driver("DL-300");

    let suspended = engine.add_demerit_points(GOV, &who, violation("SPD", 13, "T1")).await.unwrap();
    let suspension = suspended.new_sanction.unwrap();

    let revoked = engine.add_demerit_points(GOV, &who, violation("DUI", 6, "T2")).await.unwrap();
    let revocation = revoked.new_sanction.clone().unwrap();
    assert_eq!(revocation.sanction_type, SanctionType::Revocation);
    assert_eq!(revoked.superseded.as_deref(), Some(suspension.id.as_str()));
    assert_eq!(revoked.balance.status, LicenseStatus::Revoked);

    let mut conn = db.pool().acquire().await.unwrap();
    let old = SuspensionRepo::get(&mut conn, &suspension.id).await.unwrap();
    assert_eq!(old.status, SanctionStatus::Superseded);
    let active = SuspensionRepo::find_active(&mut conn, &revoked.profile.id).await.unwrap();
    assert_eq!(active.unwrap().id, revocation.id);
}

#[tokio::test]
async fn test_ticket_applied_once() {
    let (engine, _db, _clock) = setup().await;
    let who = driver("DL-400");

    let outcome = engine.add_demerit_points(GOV, &who, violation("SPD", 4, "T1")).await.unwrap();
    let again = engine.add_demerit_points(GOV, &who, violation("SPD", 4, "T1")).await;
    assert!(matches!(again, Err(PointsError::AlreadyApplied { ref ticket_id }) if ticket_id == "T1"));

    assert_eq!(
        engine.calculate_current_demerits(GOV, &outcome.profile.id).await.unwrap(),
        4
    );
}

#[tokio::test]
async fn test_points_resolved_from_penalty_rules() {
    let (engine, db, _clock) = setup().await;
    {
        let mut conn = db.pool().acquire().await.unwrap();
        for (id, points, min, max) in [("R1", 2, dec!(0), dec!(20)), ("R2", 4, dec!(20), dec!(40))] {
            let rule = PenaltyRule {
                id: id.to_string(),
                government_id: GOV.to_string(),
                offence_code: "SPD".to_string(),
                description: None,
                points,
                min_value: Some(min),
                max_value: Some(max),
                active: true,
            };
            PenaltyRuleRepo::insert(&mut conn, &rule).await.unwrap();
        }
    }
    let who = driver("DL-500");

    let outcome = engine
        .add_demerit_points(GOV, &who, DemeritRequest::new("SPD").with_measured_value(dec!(25)))
        .await
        .unwrap();
    assert_eq!(outcome.entry.points_delta, 4);

    let unmatched = engine
        .add_demerit_points(GOV, &who, DemeritRequest::new("SPD").with_measured_value(dec!(95)))
        .await;
    assert!(matches!(unmatched, Err(PointsError::Validation(_))));

    let zero = engine.add_demerit_points(GOV, &who, violation("SPD", 0, "T9")).await;
    assert!(matches!(zero, Err(PointsError::Validation(_))));
}

#[tokio::test]
async fn test_merit_award_is_capped() {
    let (engine, _db, _clock) = setup().await;
    let who = driver("DL-600");

    let first = engine
        .add_merit_points(GOV, &who, 95, PointSource::reason("safety course"))
        .await
        .unwrap();
    assert_eq!(first.awarded, 95);

    let second = engine.add_merit_points(GOV, &who, 50, PointSource::default()).await.unwrap();
    assert_eq!(second.awarded, 5);
    assert_eq!(second.balance.current_points, 100);

    let third = engine.add_merit_points(GOV, &who, 50, PointSource::default()).await.unwrap();
    assert_eq!(third.awarded, 0);
    assert!(third.entry.is_none());
    assert_eq!(third.balance.current_points, 100);
}

#[tokio::test]
async fn test_violation_forfeits_merit_balance() {
    let (engine, _db, _clock) = setup().await;
    let who = driver("DL-650");

    engine.add_merit_points(GOV, &who, 30, PointSource::default()).await.unwrap();
    let outcome = engine.add_demerit_points(GOV, &who, violation("SPD", 2, "T1")).await.unwrap();

    assert_eq!(outcome.merit.current_points, 0);
    assert_eq!(outcome.merit.total_expired, 30);
    assert!(!outcome.merit.exemplary);
}

#[tokio::test]
async fn test_offset_bounded_by_cap() {
    let (engine, _db, _clock) = setup().await;
    let who = driver("DL-700");

    let added = engine.add_demerit_points(GOV, &who, violation("SPD", 5, "T1")).await.unwrap();
    let profile_id = added.profile.id.clone();
    engine.add_merit_points(GOV, &who, 10, PointSource::default()).await.unwrap();

    let offset = engine.offset_demerits_with_merits(GOV, &profile_id, None).await.unwrap();
    assert_eq!(offset.offset, 3);
    assert_eq!(offset.demerits_before, 5);
    assert_eq!(offset.balance.current_points, 2);
    assert_eq!(offset.merit.current_points, 7);
    assert_eq!(offset.merit.total_used, 3);
    assert_eq!(offset.cap_remaining, 0);
    assert_eq!(offset.entries.len(), 2);
    assert_eq!(offset.entries[0].offsets_entry_id.as_deref(), Some(added.entry.id.as_str()));
    assert_eq!(offset.entries[0].expiry_date, added.entry.expiry_date);

    // Cap exhausted: nothing happens, not an error
    let again = engine.offset_demerits_with_merits(GOV, &profile_id, Some(2)).await.unwrap();
    assert_eq!(again.offset, 0);
    assert_eq!(again.balance.current_points, 2);

    let invalid = engine.offset_demerits_with_merits(GOV, &profile_id, Some(0)).await;
    assert!(matches!(invalid, Err(PointsError::Validation(_))));
}

#[tokio::test]
async fn test_offset_never_exceeds_demerits() {
    let (engine, _db, _clock) = setup().await;
    let who = driver("DL-750");

    let outcome = engine.add_demerit_points(GOV, &who, violation("SPD", 1, "T1")).await.unwrap();
    engine.add_merit_points(GOV, &who, 10, PointSource::default()).await.unwrap();

    let offset = engine
        .offset_demerits_with_merits(GOV, &outcome.profile.id, Some(3))
        .await
        .unwrap();
    assert_eq!(offset.offset, 1);
    assert_eq!(offset.balance.current_points, 0);
    assert_eq!(offset.merit.current_points, 9);
}

#[tokio::test]
async fn test_expiry_sweep_is_idempotent() {
    let (engine, _db, clock) = setup().await;
    let who = driver("DL-800");

    let outcome = engine.add_demerit_points(GOV, &who, violation("SPD", 13, "T1")).await.unwrap();
    assert!(outcome.triggered_sanction());

    clock.advance_days(366);
    let first = engine.expire_old_points(Some(GOV)).await.unwrap();
    assert!(first.success());
    assert_eq!(first.entries_found, 1);
    assert_eq!(first.entries_expired, 1);
    assert_eq!(first.points_expired, 13);
    assert_eq!(first.profiles_recomputed, 1);
    assert_eq!(first.sanctions_expired, 1);

    let second = engine.expire_old_points(Some(GOV)).await.unwrap();
    assert_eq!(second.entries_found, 0);
    assert_eq!(second.sanctions_expired, 0);

    let status = engine.get_point_status(GOV, &outcome.profile.id).await.unwrap();
    assert_eq!(status.demerit.current_points, 0);
    assert_eq!(status.demerit.total_expired, 13);
    assert_eq!(status.demerit.status, LicenseStatus::Clear);
    assert!(status.active_sanction.is_none());
}

#[tokio::test]
async fn test_merit_sweep_milestones() {
    let (engine, _db, clock) = setup().await;
    let clean = driver("DL-900");
    let recent = driver("DL-901");

    engine.add_merit_points(GOV, &clean, 1, PointSource::default()).await.unwrap();

    clock.advance_days(200);
    engine.add_demerit_points(GOV, &recent, violation("SPD", 2, "T1")).await.unwrap();

    let sweep = engine.check_and_award_merits(Some(GOV)).await.unwrap();
    assert!(sweep.success());
    assert_eq!(sweep.profiles_checked, 2);
    assert_eq!(sweep.skipped_recent_violation, 1);
    assert_eq!(sweep.profiles_awarded, 1);
    assert_eq!(sweep.points_awarded, 5);

    // Same day again: the anchor moved to today
    let repeat = engine.check_and_award_merits(Some(GOV)).await.unwrap();
    assert_eq!(repeat.points_awarded, 0);

    // Both profiles are now a year past their anchor
    clock.advance_days(365);
    let year = engine.check_and_award_merits(Some(GOV)).await.unwrap();
    assert_eq!(year.profiles_awarded, 2);
    assert_eq!(year.points_awarded, 20);
    assert_eq!(year.bonuses_awarded, 0);

    clock.advance_days(200);
    let bonus = engine.check_and_award_merits(Some(GOV)).await.unwrap();
    assert_eq!(bonus.bonuses_awarded, 1);
    // 5 + 5 for the six-month milestones plus the 20 point bonus
    assert_eq!(bonus.points_awarded, 30);

    let profile = engine.find_profile(GOV, &clean).await.unwrap().unwrap();
    let status = engine.get_point_status(GOV, &profile.id).await.unwrap();
    assert_eq!(status.merit.current_points, 41);
    assert!(status.merit.exemplary);
    assert!(status.merit.two_year_bonus_awarded);
    assert_eq!(status.profile.clean_streak_days, 765);
}

#[tokio::test]
async fn test_tenant_isolation() {
    let (engine, _db, _clock) = setup().await;
    let who = driver("DL-1000");

    let outcome = engine.add_demerit_points(GOV, &who, violation("SPD", 3, "T1")).await.unwrap();

    let cross = engine.get_point_status("GOV-2", &outcome.profile.id).await;
    assert!(matches!(cross, Err(PointsError::CrossTenant { .. })));

    // Same identity in another government is a different profile
    assert!(engine.find_profile("GOV-2", &who).await.unwrap().is_none());

    let unknown = engine.add_demerit_points("GOV-404", &who, violation("SPD", 3, "T2")).await;
    assert!(matches!(unknown, Err(PointsError::NotFound { .. })));
}

#[tokio::test]
async fn test_manual_sanction_and_lift() {
    let (engine, _db, _clock) = setup().await;
    let who = driver("DL-1100");
    let outcome = engine.add_demerit_points(GOV, &who, violation("SPD", 2, "T1")).await.unwrap();
    let profile_id = outcome.profile.id.clone();

    let manual = engine
        .impose_manual_sanction(GOV, &profile_id, SanctionType::Suspension, Some(30), "court order", Some("CASE-7"))
        .await
        .unwrap();
    assert_eq!(manual.source, SanctionSource::Manual);
    assert_eq!(manual.end_date, start_date() + chrono::Duration::days(30));

    let duplicate = engine
        .impose_manual_sanction(GOV, &profile_id, SanctionType::Suspension, None, "again", None)
        .await;
    assert!(matches!(duplicate, Err(PointsError::Validation(_))));

    let revocation = engine
        .impose_manual_sanction(GOV, &profile_id, SanctionType::Revocation, None, "repeat offender", None)
        .await
        .unwrap();
    assert_eq!(revocation.end_date, start_date() + chrono::Duration::days(730));

    let lifted = engine.lift_suspension(GOV, &profile_id, "appeal upheld").await.unwrap();
    assert_eq!(lifted.id, revocation.id);
    assert_eq!(lifted.status, SanctionStatus::Lifted);
    assert_eq!(lifted.lifted_reason.as_deref(), Some("appeal upheld"));

    let status = engine.get_suspension_status(GOV, &profile_id).await.unwrap();
    assert!(status.active.is_none());
    assert_eq!(status.history.len(), 2);

    let nothing = engine.lift_suspension(GOV, &profile_id, "again").await;
    assert!(matches!(nothing, Err(PointsError::NotFound { .. })));
}

#[tokio::test]
async fn test_government_threshold_override() {
    let (engine, _db, _clock) = setup().await;
    let who = driver("DL-1200");

    engine
        .set_thresholds(
            GOV,
            Thresholds {
                warning: 4,
                suspension: 6,
                revocation: 9,
                warning_margin: 1,
            },
        )
        .await
        .unwrap();

    let outcome = engine.add_demerit_points(GOV, &who, violation("SPD", 6, "T1")).await.unwrap();
    assert_eq!(outcome.balance.status, LicenseStatus::Suspended);
    assert_eq!(outcome.threshold.suspension_threshold, 6);
    assert_eq!(outcome.new_sanction.unwrap().threshold_exceeded, 6);

    let invalid = engine
        .set_thresholds(
            GOV,
            Thresholds {
                warning: 10,
                suspension: 6,
                revocation: 9,
                warning_margin: 1,
            },
        )
        .await;
    assert!(matches!(invalid, Err(PointsError::Validation(_))));
}

#[tokio::test]
async fn test_deactivated_profile_skipped_by_sweep() {
    let (engine, _db, clock) = setup().await;
    let who = driver("DL-1300");

    let merit = engine.add_merit_points(GOV, &who, 1, PointSource::default()).await.unwrap();
    let profile = engine.deactivate_profile(GOV, &merit.profile_id).await.unwrap();
    assert!(!profile.active);

    clock.advance_days(400);
    let sweep = engine.check_and_award_merits(Some(GOV)).await.unwrap();
    assert_eq!(sweep.profiles_checked, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_demerits_serialize() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("points.db").display());
    let db = Database::new(&url).await.unwrap();
    {
        let mut conn = db.pool().acquire().await.unwrap();
        GovernmentRepo::insert(&mut conn, &Government::new(GOV, GOV, GovernmentStatus::Active))
            .await
            .unwrap();
    }
    let clock: Arc<dyn Clock> = Arc::new(FixedClock::at_date(start_date()));
    let engine = Arc::new(PointsEngine::new(db, PointsConfig::default(), clock));

    let mut tasks = Vec::new();
    for i in 0..20 {
        let engine = engine.clone();
        let who = if i % 2 == 0 {
            driver("DL-SHARED")
        } else {
            driver(&format!("DL-{i:03}"))
        };
        tasks.push(tokio::spawn(async move {
            engine
                .add_demerit_points(GOV, &who, violation("SPD", 1, &format!("T{i}")))
                .await
        }));
    }

    let mut shared = None;
    for (i, task) in tasks.into_iter().enumerate() {
        let outcome = task.await.unwrap().unwrap();
        if i % 2 == 0 {
            shared = Some(outcome.profile.id);
        }
    }

    let shared = shared.unwrap();
    assert_eq!(engine.calculate_current_demerits(GOV, &shared).await.unwrap(), 10);
    let status = engine.get_point_status(GOV, &shared).await.unwrap();
    assert_eq!(status.demerit.current_points, 10);
    assert_eq!(status.profile.violation_count, 10);
}

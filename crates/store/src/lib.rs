//! # FinePay Store
//!
//! Ledger Store for FinePay - SQLite through `sqlx`.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use finepay_store::{Database, TicketRepo};
//!
//! let db = Database::new("sqlite:finepay.db?mode=rwc").await?;
//!
//! let mut tx = db.begin().await?;
//! TicketRepo::mark_overdue(&mut tx, "GOV-1", today, Utc::now()).await?;
//! tx.commit().await?;
//! ```

pub mod error;
pub mod repos;
pub mod schema;

pub use error::{StoreError, StoreResult};
pub use repos::{
    BalanceRepo, GovernmentRepo, HistoryRepo, LateFeeConfigRepo, LateFeeEventRepo,
    PenaltyRuleRepo, PointSettingsRepo, ProfileRepo, SuspensionRepo, TicketRepo,
};
pub use schema::PointSettingsRow;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Connection, Sqlite, SqliteConnection, SqlitePool, Transaction};
use std::str::FromStr;
use std::time::Duration;

/// How long a writer waits for another writer's lock before reporting a conflict
pub const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Database facade
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if missing) and bootstrap the schema
    ///
    /// # Arguments
    /// * `database_url` - SQLite URL (e.g. "sqlite:finepay.db?mode=rwc")
    pub async fn new(database_url: &str) -> StoreResult<Self> {
        let pool = init_database(database_url).await?;
        Ok(Self { pool })
    }

    /// Private in-memory database, used by tests
    pub async fn in_memory() -> StoreResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        init_schema(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Start a unit of work
    ///
    /// Takes the write lock up front (`BEGIN IMMEDIATE`), so concurrent units
    /// queue on the busy timeout instead of failing when a read lock cannot be
    /// upgraded.
    pub async fn begin(&self) -> StoreResult<Transaction<'static, Sqlite>> {
        Ok(self.pool.begin_with("BEGIN IMMEDIATE").await?)
    }
}

/// Connect without touching the schema
pub async fn create_pool(database_url: &str) -> StoreResult<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(BUSY_TIMEOUT);
    let pool = SqlitePool::connect_with(options).await?;
    Ok(pool)
}

/// Create every table and index that does not exist yet
pub async fn init_schema(pool: &SqlitePool) -> StoreResult<()> {
    sqlx::raw_sql(schema::SCHEMA).execute(pool).await?;
    Ok(())
}

/// Connect and bootstrap the schema
pub async fn init_database(database_url: &str) -> StoreResult<SqlitePool> {
    let pool = create_pool(database_url).await?;
    init_schema(&pool).await?;
    tracing::debug!(database_url, "Database initialised");
    Ok(pool)
}

/// Nested transaction (SAVEPOINT) on a connection already inside a transaction.
///
/// Dropping it without `commit()` rolls back only the writes made through it.
pub async fn savepoint(conn: &mut SqliteConnection) -> StoreResult<Transaction<'_, Sqlite>> {
    Ok(conn.begin().await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate, Utc};
    use finepay_core::{
        CitizenProfile, ContactInfo, DemeritBalance, EntryStatus, FeeStructure, FeeTier,
        Government, GovernmentStatus, IdentityKind, LateFeeConfiguration, LateFeeEvent,
        LateFeeRule, PointType, PointsHistory, Ticket, TransactionType,
    };
    use rust_decimal_macros::dec;

    async fn setup() -> Database {
        let db = Database::in_memory().await.unwrap();
        let mut conn = db.pool().acquire().await.unwrap();
        GovernmentRepo::insert(
            &mut conn,
            &Government::new("GOV-1", "Springfield", GovernmentStatus::Active),
        )
        .await
        .unwrap();
        db
    }

    fn profile(id: &str, hash: &str) -> CitizenProfile {
        let now = Utc::now();
        CitizenProfile {
            id: id.to_string(),
            government_id: "GOV-1".to_string(),
            identity_kind: IdentityKind::DriverLicense,
            identity_hash: hash.to_string(),
            identifier_hint: "1234".to_string(),
            contact: ContactInfo::default(),
            lifetime_demerit_points: 0,
            violation_count: 0,
            clean_streak_days: 0,
            last_violation_at: None,
            active: true,
            created_at: now,
            updated_at: now,
        }
    }

    fn violation(id: &str, ticket: Option<&str>, effective: NaiveDate) -> PointsHistory {
        PointsHistory {
            id: id.to_string(),
            government_id: "GOV-1".to_string(),
            profile_id: "P-1".to_string(),
            transaction_type: TransactionType::ViolationAdded,
            point_type: PointType::Demerit,
            points_delta: 3,
            offence_code: Some("SPD".to_string()),
            source_ticket_id: ticket.map(str::to_string),
            reason: None,
            offsets_entry_id: None,
            effective_date: effective,
            expiry_date: Some(effective + Duration::days(365)),
            status: EntryStatus::Active,
            balance_after: 3,
            created_at: Utc::now(),
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[tokio::test]
    async fn test_schema_bootstrap_is_idempotent() {
        let db = setup().await;
        init_schema(db.pool()).await.unwrap();

        let mut conn = db.pool().acquire().await.unwrap();
        let govs = GovernmentRepo::list(&mut conn).await.unwrap();
        assert_eq!(govs.len(), 1);
        assert_eq!(govs[0].status, GovernmentStatus::Active);
    }

    #[tokio::test]
    async fn test_one_profile_per_identity_hash() {
        let db = setup().await;
        let mut conn = db.pool().acquire().await.unwrap();

        ProfileRepo::insert(&mut conn, &profile("P-1", "abc")).await.unwrap();
        let err = ProfileRepo::insert(&mut conn, &profile("P-2", "abc"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists { .. }));

        let found = ProfileRepo::find_by_hash(&mut conn, "GOV-1", "abc")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, "P-1");
    }

    #[tokio::test]
    async fn test_balance_compare_and_set() {
        let db = setup().await;
        let mut conn = db.pool().acquire().await.unwrap();
        ProfileRepo::insert(&mut conn, &profile("P-1", "abc")).await.unwrap();
        BalanceRepo::insert_demerit(&mut conn, &DemeritBalance::new("P-1", "GOV-1"))
            .await
            .unwrap();

        let mut first = BalanceRepo::get_demerit(&mut conn, "P-1").await.unwrap();
        let stale = first.clone();

        first.current_points = 4;
        assert_eq!(BalanceRepo::update_demerit(&mut conn, &first).await.unwrap(), 1);

        let err = BalanceRepo::update_demerit(&mut conn, &stale).await.unwrap_err();
        assert!(err.is_conflict());

        let stored = BalanceRepo::get_demerit(&mut conn, "P-1").await.unwrap();
        assert_eq!(stored.current_points, 4);
        assert_eq!(stored.version, 1);
    }

    #[tokio::test]
    async fn test_violation_applied_once_per_ticket() {
        let db = setup().await;
        let mut conn = db.pool().acquire().await.unwrap();
        ProfileRepo::insert(&mut conn, &profile("P-1", "abc")).await.unwrap();

        let today = date(2025, 3, 1);
        HistoryRepo::insert(&mut conn, &violation("E-1", Some("T-9"), today))
            .await
            .unwrap();
        let err = HistoryRepo::insert(&mut conn, &violation("E-2", Some("T-9"), today))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists { ref id, .. } if id == "T-9"));

        // Entries without a ticket are not constrained
        HistoryRepo::insert(&mut conn, &violation("E-3", None, today)).await.unwrap();
        HistoryRepo::insert(&mut conn, &violation("E-4", None, today)).await.unwrap();
        assert_eq!(HistoryRepo::list_for_profile(&mut conn, "P-1").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_expirable_window_and_transition() {
        let db = setup().await;
        let mut conn = db.pool().acquire().await.unwrap();
        ProfileRepo::insert(&mut conn, &profile("P-1", "abc")).await.unwrap();

        let today = date(2025, 6, 1);
        // expires today
        HistoryRepo::insert(&mut conn, &violation("E-1", None, today - Duration::days(365)))
            .await
            .unwrap();
        // still running
        HistoryRepo::insert(&mut conn, &violation("E-2", None, today - Duration::days(10)))
            .await
            .unwrap();
        // expired long before the lookback cutoff
        HistoryRepo::insert(&mut conn, &violation("E-3", None, today - Duration::days(2000)))
            .await
            .unwrap();

        let cutoff = today - Duration::days(730);
        let due = HistoryRepo::list_expirable(&mut conn, Some("GOV-1"), today, cutoff)
            .await
            .unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, "E-1");

        assert!(HistoryRepo::mark_expired(&mut conn, "E-1").await.unwrap());
        assert!(!HistoryRepo::mark_expired(&mut conn, "E-1").await.unwrap());
        assert!(HistoryRepo::list_expirable(&mut conn, None, today, cutoff)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_savepoint_rolls_back_only_its_item() {
        let db = setup().await;
        let due = date(2025, 1, 1);

        let mut tx = db.begin().await.unwrap();
        TicketRepo::insert(&mut tx, &Ticket::new("T-1", "GOV-1", "SPD", dec!(100), due))
            .await
            .unwrap();
        {
            let mut item = savepoint(&mut tx).await.unwrap();
            TicketRepo::insert(&mut item, &Ticket::new("T-2", "GOV-1", "SPD", dec!(100), due))
                .await
                .unwrap();
            item.rollback().await.unwrap();
        }
        tx.commit().await.unwrap();

        let mut conn = db.pool().acquire().await.unwrap();
        assert!(TicketRepo::find(&mut conn, "T-1").await.unwrap().is_some());
        assert!(TicketRepo::find(&mut conn, "T-2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_mark_overdue_only_past_due_unpaid() {
        let db = setup().await;
        let mut conn = db.pool().acquire().await.unwrap();
        let today = date(2025, 2, 1);

        TicketRepo::insert(&mut conn, &Ticket::new("T-1", "GOV-1", "SPD", dec!(100), date(2025, 1, 1)))
            .await
            .unwrap();
        TicketRepo::insert(&mut conn, &Ticket::new("T-2", "GOV-1", "SPD", dec!(100), today))
            .await
            .unwrap();

        let marked_at = date(2025, 2, 1).and_hms_opt(2, 0, 0).unwrap().and_utc();
        assert_eq!(TicketRepo::mark_overdue(&mut conn, "GOV-1", today, marked_at).await.unwrap(), 1);
        assert_eq!(
            TicketRepo::list_overdue_ids(&mut conn, "GOV-1").await.unwrap(),
            vec!["T-1".to_string()]
        );
        // Stamped with the caller's clock, not the wall clock
        let overdue = TicketRepo::find(&mut conn, "T-1").await.unwrap().unwrap();
        assert_eq!(overdue.updated_at, marked_at);
    }

    #[tokio::test]
    async fn test_late_fee_event_unique_per_cycle() {
        let db = setup().await;
        let mut conn = db.pool().acquire().await.unwrap();
        TicketRepo::insert(&mut conn, &Ticket::new("T-1", "GOV-1", "SPD", dec!(100), date(2025, 1, 1)))
            .await
            .unwrap();

        let event = LateFeeEvent {
            id: "LF-1".to_string(),
            government_id: "GOV-1".to_string(),
            ticket_id: "T-1".to_string(),
            configuration_id: "C-1".to_string(),
            structure: FeeStructure::Flat,
            cycle: 1,
            days_overdue: 3,
            target_total: dec!(25),
            previously_accrued: dec!(0),
            amount: dec!(25),
            cap_applied: false,
            breakdown: Vec::new(),
            created_at: Utc::now(),
        };
        LateFeeEventRepo::insert(&mut conn, &event).await.unwrap();
        assert!(LateFeeEventRepo::exists(&mut conn, "T-1", 1).await.unwrap());
        assert!(!LateFeeEventRepo::exists(&mut conn, "T-1", 2).await.unwrap());

        let again = LateFeeEvent {
            id: "LF-2".to_string(),
            ..event
        };
        let err = LateFeeEventRepo::insert(&mut conn, &again).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn test_saving_configuration_replaces_rules() {
        let db = setup().await;
        let mut conn = db.pool().acquire().await.unwrap();

        let config = LateFeeConfiguration::government_wide("C-1", "GOV-1", FeeStructure::Tiered)
            .with_rule(LateFeeRule::tiered(
                "R-1",
                "C-1",
                vec![
                    FeeTier { min_days: 1, max_days: Some(30), amount: dec!(10) },
                    FeeTier { min_days: 31, max_days: None, amount: dec!(40) },
                ],
            ));
        LateFeeConfigRepo::save(&mut conn, &config).await.unwrap();

        let mut updated = config.clone();
        updated.rules = vec![LateFeeRule::flat("R-2", "C-1", dec!(15))];
        updated.structure = FeeStructure::Flat;
        LateFeeConfigRepo::save(&mut conn, &updated).await.unwrap();

        let stored = LateFeeConfigRepo::list_for_government(&mut conn, "GOV-1")
            .await
            .unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].structure, FeeStructure::Flat);
        assert_eq!(stored[0].rules.len(), 1);
        assert_eq!(stored[0].rules[0].flat_amount, Some(dec!(15)));
    }

    #[tokio::test]
    async fn test_contended_write_lock_is_a_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("finepay.db");
        let db = Database::new(&format!("sqlite://{}", path.display())).await.unwrap();

        let mut held = db.begin().await.unwrap();
        GovernmentRepo::insert(&mut held, &Government::new("GOV-9", "Shelbyville", GovernmentStatus::Active))
            .await
            .unwrap();

        let impatient = SqliteConnectOptions::from_str(&format!("sqlite://{}", path.display()))
            .unwrap()
            .busy_timeout(std::time::Duration::ZERO);
        let other = SqlitePool::connect_with(impatient).await.unwrap();
        let err = match other.begin_with("BEGIN IMMEDIATE").await {
            Ok(_) => panic!("second writer got the lock"),
            Err(e) => StoreError::from(e),
        };
        assert!(err.is_conflict());
        assert!(!err.is_fatal());

        held.commit().await.unwrap();
        let mut tx = db.begin().await.unwrap();
        assert!(GovernmentRepo::get(&mut tx, "GOV-9").await.is_ok());
        tx.commit().await.unwrap();
    }
}

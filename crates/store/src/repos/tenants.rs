//! Governments and their point-rule settings

use chrono::Utc;
use finepay_core::{Government, GovernmentStatus, PenaltyRule};
use sqlx::SqliteConnection;

use crate::error::{is_unique_violation, StoreError, StoreResult};
use crate::schema::{opt_decimal_text, GovernmentRow, PenaltyRuleRow, PointSettingsRow};

/// Repository for `governments`
pub struct GovernmentRepo;

impl GovernmentRepo {
    pub async fn insert(conn: &mut SqliteConnection, government: &Government) -> StoreResult<()> {
        sqlx::query("INSERT INTO governments (id, name, status, created_at) VALUES (?, ?, ?, ?)")
            .bind(&government.id)
            .bind(&government.name)
            .bind(government.status.to_string())
            .bind(government.created_at)
            .execute(conn)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    StoreError::already_exists("Government", &government.id)
                } else {
                    e.into()
                }
            })?;
        Ok(())
    }

    pub async fn find(conn: &mut SqliteConnection, id: &str) -> StoreResult<Option<Government>> {
        sqlx::query_as::<_, GovernmentRow>("SELECT * FROM governments WHERE id = ?")
            .bind(id)
            .fetch_optional(conn)
            .await?
            .map(Government::try_from)
            .transpose()
    }

    pub async fn get(conn: &mut SqliteConnection, id: &str) -> StoreResult<Government> {
        Self::find(conn, id)
            .await?
            .ok_or_else(|| StoreError::not_found("Government", id))
    }

    pub async fn list(conn: &mut SqliteConnection) -> StoreResult<Vec<Government>> {
        sqlx::query_as::<_, GovernmentRow>("SELECT * FROM governments ORDER BY id")
            .fetch_all(conn)
            .await?
            .into_iter()
            .map(Government::try_from)
            .collect()
    }

    pub async fn update_status(
        conn: &mut SqliteConnection,
        id: &str,
        status: GovernmentStatus,
    ) -> StoreResult<()> {
        let result = sqlx::query("UPDATE governments SET status = ? WHERE id = ?")
            .bind(status.to_string())
            .bind(id)
            .execute(conn)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("Government", id));
        }
        Ok(())
    }
}

/// Repository for `penalty_rules`
pub struct PenaltyRuleRepo;

impl PenaltyRuleRepo {
    pub async fn insert(conn: &mut SqliteConnection, rule: &PenaltyRule) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO penalty_rules
                (id, government_id, offence_code, description, points, min_value, max_value, active)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&rule.id)
        .bind(&rule.government_id)
        .bind(&rule.offence_code)
        .bind(&rule.description)
        .bind(rule.points)
        .bind(opt_decimal_text(rule.min_value))
        .bind(opt_decimal_text(rule.max_value))
        .bind(rule.active)
        .execute(conn)
        .await?;
        Ok(())
    }

    /// Active rules for one offence
    pub async fn list_active(
        conn: &mut SqliteConnection,
        government_id: &str,
        offence_code: &str,
    ) -> StoreResult<Vec<PenaltyRule>> {
        sqlx::query_as::<_, PenaltyRuleRow>(
            r#"
            SELECT * FROM penalty_rules
            WHERE government_id = ? AND offence_code = ? AND active = 1
            ORDER BY id
            "#,
        )
        .bind(government_id)
        .bind(offence_code)
        .fetch_all(conn)
        .await?
        .into_iter()
        .map(PenaltyRule::try_from)
        .collect()
    }
}

/// Repository for `point_settings`
pub struct PointSettingsRepo;

impl PointSettingsRepo {
    pub async fn get(
        conn: &mut SqliteConnection,
        government_id: &str,
    ) -> StoreResult<Option<PointSettingsRow>> {
        let row = sqlx::query_as::<_, PointSettingsRow>(
            "SELECT * FROM point_settings WHERE government_id = ?",
        )
        .bind(government_id)
        .fetch_optional(conn)
        .await?;
        Ok(row)
    }

    pub async fn upsert(
        conn: &mut SqliteConnection,
        government_id: &str,
        warning: i64,
        suspension: i64,
        revocation: i64,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO point_settings
                (government_id, warning_threshold, suspension_threshold, revocation_threshold, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(government_id) DO UPDATE SET
                warning_threshold = excluded.warning_threshold,
                suspension_threshold = excluded.suspension_threshold,
                revocation_threshold = excluded.revocation_threshold,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(government_id)
        .bind(warning)
        .bind(suspension)
        .bind(revocation)
        .bind(Utc::now())
        .execute(conn)
        .await?;
        Ok(())
    }
}

//! Tickets and late-fee schedules/events

use chrono::{DateTime, NaiveDate, Utc};
use finepay_core::{LateFeeConfiguration, LateFeeEvent, LateFeeRule, Ticket, TicketStatus};
use rust_decimal::Decimal;
use sqlx::SqliteConnection;

use crate::error::{is_unique_violation, StoreError, StoreResult};
use crate::schema::{opt_decimal_text, LateFeeConfigRow, LateFeeEventRow, LateFeeRuleRow, TicketRow};

// ============================================================================
// Ticket Repository
// ============================================================================

/// Repository for `tickets`
pub struct TicketRepo;

impl TicketRepo {
    pub async fn insert(conn: &mut SqliteConnection, ticket: &Ticket) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO tickets
                (id, government_id, profile_id, offence_code, offence_category, fine_amount,
                 late_fee_total, due_date, status, late_fee_paused, notification_sent,
                 notification_sent_at, last_late_fee_at, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&ticket.id)
        .bind(&ticket.government_id)
        .bind(&ticket.profile_id)
        .bind(&ticket.offence_code)
        .bind(&ticket.offence_category)
        .bind(ticket.fine_amount.to_string())
        .bind(ticket.late_fee_total.to_string())
        .bind(ticket.due_date)
        .bind(ticket.status.to_string())
        .bind(ticket.late_fee_paused)
        .bind(ticket.notification_sent)
        .bind(ticket.notification_sent_at)
        .bind(ticket.last_late_fee_at)
        .bind(ticket.created_at)
        .bind(ticket.updated_at)
        .execute(conn)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::already_exists("Ticket", &ticket.id)
            } else {
                e.into()
            }
        })?;
        Ok(())
    }

    pub async fn find(conn: &mut SqliteConnection, id: &str) -> StoreResult<Option<Ticket>> {
        sqlx::query_as::<_, TicketRow>("SELECT * FROM tickets WHERE id = ?")
            .bind(id)
            .fetch_optional(conn)
            .await?
            .map(Ticket::try_from)
            .transpose()
    }

    pub async fn get(conn: &mut SqliteConnection, id: &str) -> StoreResult<Ticket> {
        Self::find(conn, id)
            .await?
            .ok_or_else(|| StoreError::not_found("Ticket", id))
    }

    pub async fn list_for_government(
        conn: &mut SqliteConnection,
        government_id: &str,
    ) -> StoreResult<Vec<Ticket>> {
        sqlx::query_as::<_, TicketRow>(
            "SELECT * FROM tickets WHERE government_id = ? ORDER BY due_date, id",
        )
        .bind(government_id)
        .fetch_all(conn)
        .await?
        .into_iter()
        .map(Ticket::try_from)
        .collect()
    }

    /// Move unpaid tickets past their due date to `overdue`; returns the count
    pub async fn mark_overdue(
        conn: &mut SqliteConnection,
        government_id: &str,
        today: NaiveDate,
        now: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE tickets SET status = 'overdue', updated_at = ?
            WHERE government_id = ? AND status = 'unpaid' AND due_date < ?
            "#,
        )
        .bind(now)
        .bind(government_id)
        .bind(today)
        .execute(conn)
        .await?;
        Ok(result.rows_affected())
    }

    /// Ids of overdue tickets, oldest due date first
    pub async fn list_overdue_ids(
        conn: &mut SqliteConnection,
        government_id: &str,
    ) -> StoreResult<Vec<String>> {
        let ids = sqlx::query_scalar::<_, String>(
            r#"
            SELECT id FROM tickets
            WHERE government_id = ? AND status = 'overdue'
            ORDER BY due_date, id
            "#,
        )
        .bind(government_id)
        .fetch_all(conn)
        .await?;
        Ok(ids)
    }

    pub async fn update_late_fee(
        conn: &mut SqliteConnection,
        id: &str,
        late_fee_total: Decimal,
        applied_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE tickets SET late_fee_total = ?, last_late_fee_at = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(late_fee_total.to_string())
        .bind(applied_at)
        .bind(applied_at)
        .bind(id)
        .execute(conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("Ticket", id));
        }
        Ok(())
    }

    pub async fn mark_notified(
        conn: &mut SqliteConnection,
        id: &str,
        sent_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        sqlx::query(
            "UPDATE tickets SET notification_sent = 1, notification_sent_at = ? WHERE id = ?",
        )
        .bind(sent_at)
        .bind(id)
        .execute(conn)
        .await?;
        Ok(())
    }

    pub async fn set_paused(
        conn: &mut SqliteConnection,
        id: &str,
        paused: bool,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        let result = sqlx::query("UPDATE tickets SET late_fee_paused = ?, updated_at = ? WHERE id = ?")
            .bind(paused)
            .bind(now)
            .bind(id)
            .execute(conn)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("Ticket", id));
        }
        Ok(())
    }

    pub async fn update_status(
        conn: &mut SqliteConnection,
        id: &str,
        status: TicketStatus,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        let result = sqlx::query("UPDATE tickets SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.to_string())
            .bind(now)
            .bind(id)
            .execute(conn)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("Ticket", id));
        }
        Ok(())
    }
}

// ============================================================================
// Late-Fee Configuration Repository
// ============================================================================

/// Repository for `late_fee_configurations` and their `late_fee_rules`
pub struct LateFeeConfigRepo;

impl LateFeeConfigRepo {
    /// Insert or replace a configuration together with its rule set
    pub async fn save(conn: &mut SqliteConnection, config: &LateFeeConfiguration) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO late_fee_configurations
                (id, government_id, offence_category, offence_code, structure, enabled, active,
                 grace_period_days, cycle_days, max_total_fee, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                offence_category = excluded.offence_category,
                offence_code = excluded.offence_code,
                structure = excluded.structure,
                enabled = excluded.enabled,
                active = excluded.active,
                grace_period_days = excluded.grace_period_days,
                cycle_days = excluded.cycle_days,
                max_total_fee = excluded.max_total_fee,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&config.id)
        .bind(&config.government_id)
        .bind(&config.offence_category)
        .bind(&config.offence_code)
        .bind(config.structure.to_string())
        .bind(config.enabled)
        .bind(config.active)
        .bind(config.grace_period_days)
        .bind(config.cycle_days)
        .bind(opt_decimal_text(config.max_total_fee))
        .bind(config.created_at)
        .bind(config.updated_at)
        .execute(&mut *conn)
        .await?;

        sqlx::query("DELETE FROM late_fee_rules WHERE configuration_id = ?")
            .bind(&config.id)
            .execute(&mut *conn)
            .await?;

        for rule in &config.rules {
            Self::insert_rule(&mut *conn, &config.id, rule).await?;
        }
        Ok(())
    }

    async fn insert_rule(
        conn: &mut SqliteConnection,
        configuration_id: &str,
        rule: &LateFeeRule,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO late_fee_rules
                (id, configuration_id, structure, active, priority, flat_amount, rate,
                 daily_rate, cap, tiers)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&rule.id)
        .bind(configuration_id)
        .bind(rule.structure.to_string())
        .bind(rule.active)
        .bind(rule.priority)
        .bind(opt_decimal_text(rule.flat_amount))
        .bind(opt_decimal_text(rule.rate))
        .bind(opt_decimal_text(rule.daily_rate))
        .bind(opt_decimal_text(rule.cap))
        .bind(serde_json::to_string(&rule.tiers)?)
        .execute(conn)
        .await?;
        Ok(())
    }

    /// Every configuration of a government with its rules loaded
    pub async fn list_for_government(
        conn: &mut SqliteConnection,
        government_id: &str,
    ) -> StoreResult<Vec<LateFeeConfiguration>> {
        let rows = sqlx::query_as::<_, LateFeeConfigRow>(
            "SELECT * FROM late_fee_configurations WHERE government_id = ? ORDER BY created_at, id",
        )
        .bind(government_id)
        .fetch_all(&mut *conn)
        .await?;

        let mut configs = Vec::with_capacity(rows.len());
        for row in rows {
            let rules = Self::rules_for(&mut *conn, &row.id).await?;
            configs.push(row.into_configuration(rules)?);
        }
        Ok(configs)
    }

    pub async fn rules_for(
        conn: &mut SqliteConnection,
        configuration_id: &str,
    ) -> StoreResult<Vec<LateFeeRule>> {
        sqlx::query_as::<_, LateFeeRuleRow>(
            "SELECT * FROM late_fee_rules WHERE configuration_id = ? ORDER BY priority, id",
        )
        .bind(configuration_id)
        .fetch_all(conn)
        .await?
        .into_iter()
        .map(LateFeeRule::try_from)
        .collect()
    }
}

// ============================================================================
// Late-Fee Event Repository
// ============================================================================

/// Repository for the `late_fee_events` audit trail
pub struct LateFeeEventRepo;

impl LateFeeEventRepo {
    /// Append an event; a second event for the same (ticket, cycle) is `AlreadyExists`
    pub async fn insert(conn: &mut SqliteConnection, event: &LateFeeEvent) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO late_fee_events
                (id, government_id, ticket_id, configuration_id, structure, cycle, days_overdue,
                 target_total, previously_accrued, amount, cap_applied, breakdown, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&event.id)
        .bind(&event.government_id)
        .bind(&event.ticket_id)
        .bind(&event.configuration_id)
        .bind(event.structure.to_string())
        .bind(event.cycle)
        .bind(event.days_overdue)
        .bind(event.target_total.to_string())
        .bind(event.previously_accrued.to_string())
        .bind(event.amount.to_string())
        .bind(event.cap_applied)
        .bind(serde_json::to_string(&event.breakdown)?)
        .bind(event.created_at)
        .execute(conn)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::already_exists(
                    "LateFeeEvent",
                    &format!("{}#{}", event.ticket_id, event.cycle),
                )
            } else {
                e.into()
            }
        })?;
        Ok(())
    }

    pub async fn exists(conn: &mut SqliteConnection, ticket_id: &str, cycle: i64) -> StoreResult<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM late_fee_events WHERE ticket_id = ? AND cycle = ?",
        )
        .bind(ticket_id)
        .bind(cycle)
        .fetch_one(conn)
        .await?;
        Ok(count > 0)
    }

    pub async fn list_for_ticket(
        conn: &mut SqliteConnection,
        ticket_id: &str,
    ) -> StoreResult<Vec<LateFeeEvent>> {
        sqlx::query_as::<_, LateFeeEventRow>(
            "SELECT * FROM late_fee_events WHERE ticket_id = ? ORDER BY cycle, created_at",
        )
        .bind(ticket_id)
        .fetch_all(conn)
        .await?
        .into_iter()
        .map(LateFeeEvent::try_from)
        .collect()
    }
}

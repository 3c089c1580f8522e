//! Late-Fee Accrual Engine
//!
//! A government batch is one transaction; each ticket runs in its own
//! savepoint so a failing ticket rolls back only its own writes. At most one
//! fee event exists per (ticket, cycle), enforced by the store's unique key.
//! Notifications go out only after the commit.

use chrono::{DateTime, NaiveDate, Utc};
use finepay_core::{
    BatchItemError, Clock, LateFeeConfiguration, LateFeeEvent, Ticket, TicketStatus,
};
use finepay_notify::{Notification, Notifier, NotifyError};
use finepay_store::{
    savepoint, Database, GovernmentRepo, LateFeeConfigRepo, LateFeeEventRepo, StoreError,
    TicketRepo,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::calculator::{accrual_cycle, assess, resolve_configuration, validate_configuration};
use crate::config::LateFeeSettings;
use crate::error::{LateFeeError, LateFeeResult};

/// Why no fee was applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Paid or voided
    Closed,
    /// Under challenge
    Paused,
    NotOverdue,
    NoConfiguration,
    Disabled,
    WithinGrace,
    /// An event already exists for this cycle
    AlreadyCharged,
    /// Target already reached (flat fee charged, cap hit)
    NothingDue,
}

/// Result of processing one ticket
#[derive(Debug, Clone, Serialize)]
pub struct TicketFeeOutcome {
    pub ticket_id: String,
    pub applied: bool,
    pub amount: Decimal,
    pub cycle: Option<i64>,
    pub skipped: Option<SkipReason>,
    pub event: Option<LateFeeEvent>,
    /// Ticket as it stands after processing
    pub ticket: Ticket,
    pub notified: bool,
}

impl TicketFeeOutcome {
    fn skipped(ticket: Ticket, reason: SkipReason, cycle: Option<i64>) -> Self {
        Self {
            ticket_id: ticket.id.clone(),
            applied: false,
            amount: Decimal::ZERO,
            cycle,
            skipped: Some(reason),
            event: None,
            ticket,
            notified: false,
        }
    }
}

/// Per-government batch statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LateFeeRunSummary {
    pub government_id: String,
    /// False when late fees are switched off for the government
    pub enabled: bool,
    pub tickets_marked_overdue: u64,
    pub tickets_processed: usize,
    pub fees_applied: usize,
    pub total_amount: Decimal,
    pub skipped: usize,
    pub notifications_sent: usize,
    pub notification_failures: usize,
    pub errors: Vec<BatchItemError>,
}

impl LateFeeRunSummary {
    pub fn success(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Late-Fee Accrual Engine
pub struct LateFeeEngine {
    db: Database,
    settings: LateFeeSettings,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
}

impl LateFeeEngine {
    pub fn new(
        db: Database,
        settings: LateFeeSettings,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            db,
            settings,
            notifier,
            clock,
        }
    }

    pub fn settings(&self) -> &LateFeeSettings {
        &self.settings
    }

    /// Process one ticket inside the caller's transaction.
    ///
    /// Nothing is committed and no notification is sent; the caller owns both.
    pub async fn process_ticket_late_fees(
        &self,
        conn: &mut SqliteConnection,
        ticket_id: &str,
    ) -> LateFeeResult<TicketFeeOutcome> {
        let ticket = TicketRepo::get(&mut *conn, ticket_id).await?;
        let configs = LateFeeConfigRepo::list_for_government(&mut *conn, &ticket.government_id).await?;
        let now = self.clock.now();
        self.process_loaded(conn, ticket, &configs, now.date_naive(), now).await
    }

    /// Process one ticket in its own transaction, then notify.
    pub async fn apply_ticket_late_fees(
        &self,
        government_id: &str,
        ticket_id: &str,
    ) -> LateFeeResult<TicketFeeOutcome> {
        let now = self.clock.now();
        let mut tx = self.db.begin().await?;
        let ticket = load_ticket(&mut tx, government_id, ticket_id).await?;
        let configs = LateFeeConfigRepo::list_for_government(&mut tx, government_id).await?;
        let mut outcome = self
            .process_loaded(&mut tx, ticket, &configs, now.date_naive(), now)
            .await?;
        tx.commit().await.map_err(StoreError::from)?;

        if outcome.applied {
            outcome.notified = self.dispatch(&outcome.ticket, outcome.amount).await == Some(true);
        }
        Ok(outcome)
    }

    /// Daily late-fee run for one government.
    ///
    /// Marks newly overdue tickets, processes every overdue ticket, commits
    /// once, then notifies. Ticket failures are collected in the summary; only
    /// a fatal store error aborts (and rolls back) the run.
    pub async fn process_late_fees_for_government(&self, government_id: &str) -> LateFeeResult<LateFeeRunSummary> {
        let now = self.clock.now();
        let today = now.date_naive();
        let mut summary = LateFeeRunSummary {
            government_id: government_id.to_string(),
            ..LateFeeRunSummary::default()
        };

        let mut tx = self.db.begin().await?;
        GovernmentRepo::find(&mut tx, government_id)
            .await?
            .ok_or_else(|| LateFeeError::not_found("Government", government_id))?;

        let configs = LateFeeConfigRepo::list_for_government(&mut tx, government_id).await?;
        if !batch_enabled(&configs) {
            info!(government_id, "Late fees disabled, nothing to do");
            return Ok(summary);
        }
        summary.enabled = true;

        summary.tickets_marked_overdue = TicketRepo::mark_overdue(&mut tx, government_id, today, now).await?;
        let ticket_ids = TicketRepo::list_overdue_ids(&mut tx, government_id).await?;

        let mut applied = Vec::new();
        for ticket_id in &ticket_ids {
            summary.tickets_processed += 1;
            let mut sp = savepoint(&mut tx).await?;
            let result = match TicketRepo::get(&mut sp, ticket_id).await {
                Ok(ticket) => self.process_loaded(&mut sp, ticket, &configs, today, now).await,
                Err(e) => Err(e.into()),
            };

            match result {
                Ok(outcome) => {
                    sp.commit().await.map_err(StoreError::from)?;
                    if outcome.applied {
                        summary.fees_applied += 1;
                        summary.total_amount += outcome.amount;
                        applied.push(outcome);
                    } else {
                        summary.skipped += 1;
                    }
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    sp.rollback().await.map_err(StoreError::from)?;
                    warn!(government_id, ticket_id = %ticket_id, error = %e, "Late fee failed for ticket");
                    summary.errors.push(BatchItemError::new(ticket_id.as_str(), &e));
                }
            }
        }

        tx.commit().await.map_err(StoreError::from)?;

        for outcome in &applied {
            match self.dispatch(&outcome.ticket, outcome.amount).await {
                Some(true) => summary.notifications_sent += 1,
                Some(false) => summary.notification_failures += 1,
                None => {}
            }
        }

        info!(
            government_id,
            marked_overdue = summary.tickets_marked_overdue,
            processed = summary.tickets_processed,
            applied = summary.fees_applied,
            total = %summary.total_amount,
            notified = summary.notifications_sent,
            errors = summary.errors.len(),
            "Late-fee run finished"
        );
        Ok(summary)
    }

    /// Fee events of a ticket, oldest cycle first
    pub async fn late_fee_history(&self, government_id: &str, ticket_id: &str) -> LateFeeResult<Vec<LateFeeEvent>> {
        let mut conn = self.db.pool().acquire().await.map_err(StoreError::from)?;
        load_ticket(&mut conn, government_id, ticket_id).await?;
        Ok(LateFeeEventRepo::list_for_ticket(&mut conn, ticket_id).await?)
    }

    /// Pause or resume accrual on a ticket (e.g. while it is challenged)
    pub async fn set_ticket_paused(&self, government_id: &str, ticket_id: &str, paused: bool) -> LateFeeResult<()> {
        let mut conn = self.db.pool().acquire().await.map_err(StoreError::from)?;
        load_ticket(&mut conn, government_id, ticket_id).await?;
        TicketRepo::set_paused(&mut conn, ticket_id, paused, self.clock.now()).await?;
        info!(government_id, ticket_id, paused, "Late-fee accrual pause changed");
        Ok(())
    }

    /// Validate and store a configuration with its rules
    pub async fn save_configuration(&self, config: &LateFeeConfiguration) -> LateFeeResult<()> {
        validate_configuration(config)?;
        let mut tx = self.db.begin().await?;
        GovernmentRepo::find(&mut tx, &config.government_id)
            .await?
            .ok_or_else(|| LateFeeError::not_found("Government", &config.government_id))?;
        LateFeeConfigRepo::save(&mut tx, config).await?;
        tx.commit().await.map_err(StoreError::from)?;

        info!(
            government_id = %config.government_id,
            configuration_id = %config.id,
            structure = %config.structure,
            rules = config.rules.len(),
            "Late-fee configuration saved"
        );
        Ok(())
    }

    async fn process_loaded(
        &self,
        conn: &mut SqliteConnection,
        mut ticket: Ticket,
        configs: &[LateFeeConfiguration],
        today: NaiveDate,
        now: DateTime<Utc>,
    ) -> LateFeeResult<TicketFeeOutcome> {
        if !ticket.status.is_open() {
            return Ok(TicketFeeOutcome::skipped(ticket, SkipReason::Closed, None));
        }

        let days_overdue = ticket.days_overdue(today);
        if days_overdue <= 0 {
            return Ok(TicketFeeOutcome::skipped(ticket, SkipReason::NotOverdue, None));
        }
        if ticket.status == TicketStatus::Unpaid {
            TicketRepo::update_status(&mut *conn, &ticket.id, TicketStatus::Overdue, now).await?;
            ticket.status = TicketStatus::Overdue;
        }
        if ticket.late_fee_paused {
            return Ok(TicketFeeOutcome::skipped(ticket, SkipReason::Paused, None));
        }

        let config = match resolve_configuration(configs, &ticket) {
            Some(config) if config.enabled => config,
            Some(_) => return Ok(TicketFeeOutcome::skipped(ticket, SkipReason::Disabled, None)),
            None => return Ok(TicketFeeOutcome::skipped(ticket, SkipReason::NoConfiguration, None)),
        };

        let cycle_days = self.settings.cycle_days_for(config);
        let Some(cycle) = accrual_cycle(days_overdue, config.grace_period_days, cycle_days) else {
            return Ok(TicketFeeOutcome::skipped(ticket, SkipReason::WithinGrace, None));
        };

        if LateFeeEventRepo::exists(&mut *conn, &ticket.id, cycle).await? {
            debug!(ticket_id = %ticket.id, cycle, "Late fee already charged this cycle");
            return Ok(TicketFeeOutcome::skipped(ticket, SkipReason::AlreadyCharged, Some(cycle)));
        }

        let assessment = assess(config, &ticket, days_overdue, cycle, &self.settings)?;
        if assessment.amount <= Decimal::ZERO {
            return Ok(TicketFeeOutcome::skipped(ticket, SkipReason::NothingDue, Some(cycle)));
        }

        let event = LateFeeEvent {
            id: Uuid::new_v4().to_string(),
            government_id: ticket.government_id.clone(),
            ticket_id: ticket.id.clone(),
            configuration_id: assessment.configuration_id,
            structure: assessment.structure,
            cycle,
            days_overdue,
            target_total: assessment.target_total,
            previously_accrued: assessment.previously_accrued,
            amount: assessment.amount,
            cap_applied: assessment.cap_applied,
            breakdown: assessment.breakdown,
            created_at: now,
        };
        match LateFeeEventRepo::insert(&mut *conn, &event).await {
            Ok(()) => {}
            Err(StoreError::AlreadyExists { .. }) => {
                return Ok(TicketFeeOutcome::skipped(ticket, SkipReason::AlreadyCharged, Some(cycle)));
            }
            Err(e) => return Err(e.into()),
        }

        ticket.late_fee_total += event.amount;
        ticket.last_late_fee_at = Some(now);
        ticket.updated_at = now;
        TicketRepo::update_late_fee(&mut *conn, &ticket.id, ticket.late_fee_total, now).await?;

        info!(
            government_id = %ticket.government_id,
            ticket_id = %ticket.id,
            cycle,
            days_overdue,
            amount = %event.amount,
            total = %ticket.late_fee_total,
            "Late fee applied"
        );

        Ok(TicketFeeOutcome {
            ticket_id: ticket.id.clone(),
            applied: true,
            amount: event.amount,
            cycle: Some(cycle),
            skipped: None,
            event: Some(event),
            ticket,
            notified: false,
        })
    }

    /// Send the late-fee notice; `None` when notifications are switched off
    async fn dispatch(&self, ticket: &Ticket, amount: Decimal) -> Option<bool> {
        if !self.settings.notify_citizens {
            return None;
        }
        let notification = Notification::late_fee(ticket, amount);
        let result = match tokio::time::timeout(
            self.settings.notify_timeout(),
            self.notifier.notify(&notification),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(NotifyError::Timeout(self.settings.notify_timeout_ms)),
        };

        match result {
            Ok(delivery) if delivery.success => {
                let marked = match self.db.pool().acquire().await {
                    Ok(mut conn) => TicketRepo::mark_notified(&mut conn, &ticket.id, self.clock.now()).await,
                    Err(e) => Err(StoreError::from(e)),
                };
                if let Err(e) = marked {
                    warn!(ticket_id = %ticket.id, error = %e, "Could not record notification");
                }
                Some(true)
            }
            Ok(delivery) => {
                warn!(ticket_id = %ticket.id, method = %delivery.method, "Late-fee notification not delivered");
                Some(false)
            }
            Err(e) => {
                warn!(
                    ticket_id = %ticket.id,
                    notifier = self.notifier.name(),
                    error = %e,
                    "Late-fee notification failed"
                );
                Some(false)
            }
        }
    }
}

/// Whether a government batch runs at all: the newest active government-wide
/// configuration decides; without one, any enabled configuration will do
fn batch_enabled(configs: &[LateFeeConfiguration]) -> bool {
    let active: Vec<&LateFeeConfiguration> = configs.iter().filter(|c| c.active).collect();
    match active
        .iter()
        .filter(|c| c.is_government_wide())
        .max_by_key(|c| c.created_at)
    {
        Some(wide) => wide.enabled,
        None => active.iter().any(|c| c.enabled),
    }
}

async fn load_ticket(conn: &mut SqliteConnection, government_id: &str, ticket_id: &str) -> LateFeeResult<Ticket> {
    let ticket = TicketRepo::find(conn, ticket_id)
        .await?
        .ok_or_else(|| LateFeeError::not_found("Ticket", ticket_id))?;
    if ticket.government_id != government_id {
        return Err(LateFeeError::CrossTenant {
            entity: "Ticket".to_string(),
            id: ticket_id.to_string(),
            government_id: government_id.to_string(),
        });
    }
    Ok(ticket)
}

#[cfg(test)]
mod tests {
    use super::*;
    use finepay_core::{FeeStructure, FixedClock, Government, GovernmentStatus, LateFeeRule};
    use finepay_notify::RecordingNotifier;
    use rust_decimal_macros::dec;

    const GOV: &str = "GOV-1";

    fn due_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 1).unwrap()
    }

    struct Harness {
        engine: LateFeeEngine,
        db: Database,
        clock: Arc<FixedClock>,
        notifier: Arc<RecordingNotifier>,
    }

    async fn harness(days_after_due: i64) -> Harness {
        let db = Database::in_memory().await.unwrap();
        {
            let mut conn = db.pool().acquire().await.unwrap();
            for id in [GOV, "GOV-2"] {
                GovernmentRepo::insert(&mut conn, &Government::new(id, id, GovernmentStatus::Active))
                    .await
                    .unwrap();
            }
        }
        let clock = Arc::new(FixedClock::at_date(due_date()));
        clock.advance_days(days_after_due);
        let notifier = Arc::new(RecordingNotifier::new());
        let engine = LateFeeEngine::new(
            db.clone(),
            LateFeeSettings::default(),
            notifier.clone(),
            clock.clone(),
        );
        Harness {
            engine,
            db,
            clock,
            notifier,
        }
    }

    async fn daily_config(h: &Harness, enabled: bool) {
        let mut config = LateFeeConfiguration::government_wide("CFG-1", GOV, FeeStructure::Daily)
            .with_rule(LateFeeRule::daily("R-1", "CFG-1", dec!(1.00), Some(dec!(30))));
        config.enabled = enabled;
        h.engine.save_configuration(&config).await.unwrap();
    }

    async fn add_ticket(h: &Harness, id: &str, code: &str) {
        let mut conn = h.db.pool().acquire().await.unwrap();
        TicketRepo::insert(&mut conn, &Ticket::new(id, GOV, code, dec!(100), due_date()))
            .await
            .unwrap();
    }

    async fn ticket(h: &Harness, id: &str) -> Ticket {
        let mut conn = h.db.pool().acquire().await.unwrap();
        TicketRepo::get(&mut conn, id).await.unwrap()
    }

    #[tokio::test]
    async fn test_fee_applied_once_per_cycle() {
        let h = harness(4).await;
        daily_config(&h, true).await;
        add_ticket(&h, "T-1", "SPD").await;

        let first = h.engine.apply_ticket_late_fees(GOV, "T-1").await.unwrap();
        assert!(first.applied);
        assert_eq!(first.amount, dec!(4.00));
        assert_eq!(first.cycle, Some(1));
        assert!(first.notified);
        assert_eq!(first.ticket.status, TicketStatus::Overdue);

        let second = h.engine.apply_ticket_late_fees(GOV, "T-1").await.unwrap();
        assert!(!second.applied);
        assert_eq!(second.skipped, Some(SkipReason::AlreadyCharged));

        // Day 11 falls in the second weekly cycle
        h.clock.advance_days(7);
        let third = h.engine.apply_ticket_late_fees(GOV, "T-1").await.unwrap();
        assert_eq!(third.cycle, Some(2));
        assert_eq!(third.amount, dec!(7.00));

        let stored = ticket(&h, "T-1").await;
        assert_eq!(stored.late_fee_total, dec!(11.00));
        assert!(stored.notification_sent);
        assert_eq!(h.engine.late_fee_history(GOV, "T-1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_paused_ticket_never_accrues() {
        let h = harness(60).await;
        daily_config(&h, true).await;
        add_ticket(&h, "T-1", "SPD").await;
        h.engine.set_ticket_paused(GOV, "T-1", true).await.unwrap();

        let outcome = h.engine.apply_ticket_late_fees(GOV, "T-1").await.unwrap();
        assert!(!outcome.applied);
        assert_eq!(outcome.skipped, Some(SkipReason::Paused));
        assert_eq!(ticket(&h, "T-1").await.late_fee_total, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_caller_owned_transaction_defers_commit() {
        let h = harness(3).await;
        daily_config(&h, true).await;
        add_ticket(&h, "T-1", "SPD").await;

        {
            let mut tx = h.db.begin().await.unwrap();
            let outcome = h.engine.process_ticket_late_fees(&mut tx, "T-1").await.unwrap();
            assert!(outcome.applied);
            // dropped without commit
        }
        assert_eq!(ticket(&h, "T-1").await.late_fee_total, Decimal::ZERO);
        assert!(h.notifier.sent().await.is_empty());
    }

    #[tokio::test]
    async fn test_batch_isolates_failing_ticket() {
        let h = harness(10).await;
        daily_config(&h, true).await;
        for id in ["T-1", "T-2", "T-3"] {
            add_ticket(&h, id, "SPD").await;
        }
        sqlx::query("UPDATE tickets SET fine_amount = 'not-money' WHERE id = 'T-2'")
            .execute(h.db.pool())
            .await
            .unwrap();

        let summary = h.engine.process_late_fees_for_government(GOV).await.unwrap();
        assert!(summary.enabled);
        assert!(!summary.success());
        assert_eq!(summary.tickets_marked_overdue, 3);
        assert_eq!(summary.tickets_processed, 3);
        assert_eq!(summary.fees_applied, 2);
        assert_eq!(summary.total_amount, dec!(20.00));
        assert_eq!(summary.errors.len(), 1);
        assert_eq!(summary.errors[0].item_id, "T-2");
        assert_eq!(summary.notifications_sent, 2);

        assert_eq!(ticket(&h, "T-1").await.late_fee_total, dec!(10.00));
        assert_eq!(ticket(&h, "T-3").await.late_fee_total, dec!(10.00));
    }

    #[tokio::test]
    async fn test_notification_failure_keeps_fee() {
        let h = harness(5).await;
        daily_config(&h, true).await;
        add_ticket(&h, "T-1", "SPD").await;
        add_ticket(&h, "T-2", "SPD").await;
        h.notifier.fail_for("T-2").await;

        let summary = h.engine.process_late_fees_for_government(GOV).await.unwrap();
        assert_eq!(summary.fees_applied, 2);
        assert_eq!(summary.notifications_sent, 1);
        assert_eq!(summary.notification_failures, 1);

        let failed = ticket(&h, "T-2").await;
        assert_eq!(failed.late_fee_total, dec!(5.00));
        assert!(!failed.notification_sent);
    }

    #[tokio::test]
    async fn test_rerun_same_day_applies_nothing() {
        let h = harness(5).await;
        daily_config(&h, true).await;
        add_ticket(&h, "T-1", "SPD").await;

        let first = h.engine.process_late_fees_for_government(GOV).await.unwrap();
        assert_eq!(first.fees_applied, 1);
        let second = h.engine.process_late_fees_for_government(GOV).await.unwrap();
        assert_eq!(second.fees_applied, 0);
        assert_eq!(second.skipped, 1);
    }

    #[tokio::test]
    async fn test_disabled_government_is_zero_effect() {
        let h = harness(20).await;
        daily_config(&h, false).await;
        add_ticket(&h, "T-1", "SPD").await;

        let summary = h.engine.process_late_fees_for_government(GOV).await.unwrap();
        assert!(!summary.enabled);
        assert_eq!(summary.tickets_processed, 0);
        assert_eq!(ticket(&h, "T-1").await.status, TicketStatus::Unpaid);
    }

    #[tokio::test]
    async fn test_offence_override_beats_government_default() {
        let h = harness(3).await;
        daily_config(&h, true).await;
        let mut flat = LateFeeConfiguration::government_wide("CFG-DUI", GOV, FeeStructure::Flat)
            .with_rule(LateFeeRule::flat("R-DUI", "CFG-DUI", dec!(50)));
        flat.offence_code = Some("DUI".to_string());
        h.engine.save_configuration(&flat).await.unwrap();
        add_ticket(&h, "T-1", "SPD").await;
        add_ticket(&h, "T-2", "DUI").await;

        let speeding = h.engine.apply_ticket_late_fees(GOV, "T-1").await.unwrap();
        assert_eq!(speeding.amount, dec!(3.00));

        let dui = h.engine.apply_ticket_late_fees(GOV, "T-2").await.unwrap();
        assert_eq!(dui.amount, dec!(50));
        assert_eq!(dui.event.unwrap().configuration_id, "CFG-DUI");

        // Flat fee is charged once
        h.clock.advance_days(7);
        let again = h.engine.apply_ticket_late_fees(GOV, "T-2").await.unwrap();
        assert_eq!(again.skipped, Some(SkipReason::NothingDue));
    }

    #[tokio::test]
    async fn test_cross_tenant_ticket_rejected() {
        let h = harness(3).await;
        add_ticket(&h, "T-1", "SPD").await;

        let err = h.engine.late_fee_history("GOV-2", "T-1").await.unwrap_err();
        assert!(matches!(err, LateFeeError::CrossTenant { .. }));

        let missing = h.engine.apply_ticket_late_fees(GOV, "T-404").await.unwrap_err();
        assert!(matches!(missing, LateFeeError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_fee_out_of_range_fails_only_that_ticket() {
        let h = harness(10).await;
        daily_config(&h, true).await;
        let mut percentage = LateFeeConfiguration::government_wide("CFG-BIG", GOV, FeeStructure::Percentage)
            .with_rule(LateFeeRule::percentage("R-BIG", "CFG-BIG", dec!(2)));
        percentage.offence_code = Some("BIG".to_string());
        h.engine.save_configuration(&percentage).await.unwrap();
        add_ticket(&h, "T-1", "SPD").await;
        {
            let mut conn = h.db.pool().acquire().await.unwrap();
            TicketRepo::insert(&mut conn, &Ticket::new("T-2", GOV, "BIG", Decimal::MAX, due_date()))
                .await
                .unwrap();
        }

        let summary = h.engine.process_late_fees_for_government(GOV).await.unwrap();
        assert_eq!(summary.fees_applied, 1);
        assert_eq!(summary.errors.len(), 1);
        assert_eq!(summary.errors[0].item_id, "T-2");

        let charged = ticket(&h, "T-1").await;
        assert_eq!(charged.late_fee_total, dec!(10.00));
        assert_eq!(ticket(&h, "T-2").await.late_fee_total, Decimal::ZERO);
        // Overdue marking uses the engine clock
        assert_eq!(ticket(&h, "T-2").await.status, TicketStatus::Overdue);
        assert_eq!(ticket(&h, "T-2").await.updated_at, h.clock.now());
    }
}

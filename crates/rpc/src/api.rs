//! Tenant-scoped operations
//!
//! Every call takes the government id first; engines reject records of
//! another government with a `CrossTenant` error. Sanction notifications go
//! out here, after the engine has committed.

use std::str::FromStr;

use finepay_core::{
    CitizenIdentity, Government, GovernmentStatus, IdentityKind, LateFeeConfiguration, LateFeeEvent,
    PenaltyRule, PointSource, SuspensionRecord, Ticket,
};
use finepay_latefees::LateFeeRunSummary;
use finepay_notify::{Notification, NotifyError};
use finepay_points::{
    DemeritOutcome, DemeritRequest, ExpirySummary, MeritOutcome, MeritSweepSummary, OffsetOutcome,
    PointStatus, SuspensionStatus,
};
use finepay_scheduler::{DailyRunReport, Target};
use finepay_store::{GovernmentRepo, PenaltyRuleRepo, StoreError, TicketRepo};
use tracing::{info, warn};

use crate::context::AppContext;

/// Identity from a kind name (`national_id`, `driver_license`) and raw value
pub fn identity(kind: &str, raw: &str) -> anyhow::Result<CitizenIdentity> {
    let kind = IdentityKind::from_str(kind).map_err(|_| anyhow::anyhow!("Unknown identity kind: {}", kind))?;
    Ok(CitizenIdentity::new(kind, raw)?)
}

pub async fn add_government(
    ctx: &AppContext,
    id: &str,
    name: &str,
    status: GovernmentStatus,
) -> anyhow::Result<Government> {
    let government = Government::new(id, name, status);
    let mut conn = ctx.db.pool().acquire().await.map_err(StoreError::from)?;
    GovernmentRepo::insert(&mut conn, &government).await?;
    info!(government_id = id, status = %status, "Government registered");
    Ok(government)
}

pub async fn list_governments(ctx: &AppContext) -> anyhow::Result<Vec<Government>> {
    let mut conn = ctx.db.pool().acquire().await.map_err(StoreError::from)?;
    Ok(GovernmentRepo::list(&mut conn).await?)
}

pub async fn add_penalty_rule(ctx: &AppContext, rule: &PenaltyRule) -> anyhow::Result<()> {
    let mut conn = ctx.db.pool().acquire().await.map_err(StoreError::from)?;
    GovernmentRepo::get(&mut conn, &rule.government_id).await?;
    PenaltyRuleRepo::insert(&mut conn, rule).await?;
    Ok(())
}

pub async fn set_late_fee_configuration(ctx: &AppContext, config: &LateFeeConfiguration) -> anyhow::Result<()> {
    Ok(ctx.late_fees.save_configuration(config).await?)
}

pub async fn add_ticket(ctx: &AppContext, ticket: &Ticket) -> anyhow::Result<()> {
    let mut conn = ctx.db.pool().acquire().await.map_err(StoreError::from)?;
    GovernmentRepo::get(&mut conn, &ticket.government_id).await?;
    TicketRepo::insert(&mut conn, ticket).await?;
    info!(government_id = %ticket.government_id, ticket_id = %ticket.id, "Ticket recorded");
    Ok(())
}

/// Add demerit points and notify the citizen of any sanction it triggered
pub async fn add_demerit_points(
    ctx: &AppContext,
    government_id: &str,
    identity: &CitizenIdentity,
    request: DemeritRequest,
) -> anyhow::Result<DemeritOutcome> {
    let outcome = ctx.points.add_demerit_points(government_id, identity, request).await?;
    if let Some(record) = &outcome.new_sanction {
        notify_sanction(ctx, Notification::sanction_imposed(record)).await;
    }
    Ok(outcome)
}

pub async fn add_merit_points(
    ctx: &AppContext,
    government_id: &str,
    identity: &CitizenIdentity,
    points: i64,
    source: PointSource,
) -> anyhow::Result<MeritOutcome> {
    Ok(ctx.points.add_merit_points(government_id, identity, points, source).await?)
}

pub async fn offset_points(
    ctx: &AppContext,
    government_id: &str,
    profile_id: &str,
    points: Option<i64>,
) -> anyhow::Result<OffsetOutcome> {
    Ok(ctx
        .points
        .offset_demerits_with_merits(government_id, profile_id, points)
        .await?)
}

pub async fn point_status(ctx: &AppContext, government_id: &str, profile_id: &str) -> anyhow::Result<PointStatus> {
    Ok(ctx.points.get_point_status(government_id, profile_id).await?)
}

pub async fn suspension_status(
    ctx: &AppContext,
    government_id: &str,
    profile_id: &str,
) -> anyhow::Result<SuspensionStatus> {
    Ok(ctx.points.get_suspension_status(government_id, profile_id).await?)
}

pub async fn lift_suspension(
    ctx: &AppContext,
    government_id: &str,
    profile_id: &str,
    reason: &str,
) -> anyhow::Result<SuspensionRecord> {
    let record = ctx.points.lift_suspension(government_id, profile_id, reason).await?;
    notify_sanction(ctx, Notification::sanction_lifted(&record)).await;
    Ok(record)
}

pub async fn expire_points(ctx: &AppContext, government_id: Option<&str>) -> anyhow::Result<ExpirySummary> {
    Ok(ctx.points.expire_old_points(government_id).await?)
}

pub async fn award_merits(ctx: &AppContext, government_id: Option<&str>) -> anyhow::Result<MeritSweepSummary> {
    Ok(ctx.points.check_and_award_merits(government_id).await?)
}

/// Late-fee processing for one government, outside the daily job
pub async fn trigger_late_fees(ctx: &AppContext, government_id: &str) -> anyhow::Result<LateFeeRunSummary> {
    Ok(ctx.late_fees.process_late_fees_for_government(government_id).await?)
}

/// Run the daily batch now for one government or all of them
pub async fn run_daily_batch(ctx: &AppContext, government_id: Option<&str>) -> anyhow::Result<DailyRunReport> {
    let target = match government_id {
        Some(id) => Target::Government(id.to_string()),
        None => Target::All,
    };
    Ok(ctx.scheduler.run_now(target).await?)
}

pub async fn late_fee_history(
    ctx: &AppContext,
    government_id: &str,
    ticket_id: &str,
) -> anyhow::Result<Vec<LateFeeEvent>> {
    Ok(ctx.late_fees.late_fee_history(government_id, ticket_id).await?)
}

/// Best effort: the sanction is already committed, so a slow or failing
/// channel is logged and never surfaces to the caller
async fn notify_sanction(ctx: &AppContext, notification: Notification) {
    let settings = &ctx.config.late_fees;
    let result = match tokio::time::timeout(settings.notify_timeout(), ctx.notifier.notify(&notification)).await {
        Ok(result) => result,
        Err(_) => Err(NotifyError::Timeout(settings.notify_timeout_ms)),
    };
    match result {
        Ok(delivery) if delivery.success => {}
        Ok(_) => warn!(subject = notification.subject(), "Sanction notification not delivered"),
        Err(e) => warn!(subject = notification.subject(), error = %e, "Sanction notification failed"),
    }
}

//! CLI commands

use chrono::NaiveDate;
use finepay_core::{
    FeeStructure, FeeTier, GovernmentStatus, LateFeeConfiguration, LateFeeRule, PenaltyRule,
    PointSource, Ticket,
};
use finepay_points::DemeritRequest;
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::api;
use crate::context::AppContext;

/// Fee schedule options as given on the command line
#[derive(Debug, Clone)]
pub struct ScheduleArgs {
    pub id: Option<String>,
    pub structure: FeeStructure,
    pub offence_code: Option<String>,
    pub offence_category: Option<String>,
    pub grace_period_days: Option<i64>,
    pub cycle_days: Option<i64>,
    pub max_total_fee: Option<Decimal>,
    pub flat_amount: Option<Decimal>,
    pub rate: Option<Decimal>,
    pub daily_rate: Option<Decimal>,
    pub cap: Option<Decimal>,
    /// JSON array of `{ "min_days", "max_days", "amount" }`
    pub tiers: Option<String>,
    pub disabled: bool,
}

fn print_json<T: Serialize>(value: &T) -> Result<(), anyhow::Error> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Create the schema (done by connecting) and report where it lives
pub async fn init(ctx: &AppContext) -> Result<(), anyhow::Error> {
    println!("✅ Database ready at {}", ctx.config.database_url);
    Ok(())
}

pub async fn government_add(
    ctx: &AppContext,
    id: &str,
    name: &str,
    status: GovernmentStatus,
) -> Result<(), anyhow::Error> {
    let government = api::add_government(ctx, id, name, status).await?;
    println!("✅ Government {} ({}) registered as {}", government.id, government.name, government.status);
    Ok(())
}

pub async fn government_list(ctx: &AppContext) -> Result<(), anyhow::Error> {
    let governments = api::list_governments(ctx).await?;
    if governments.is_empty() {
        println!("No governments registered");
    }
    for government in governments {
        println!("{:<16} {:<10} {}", government.id, government.status, government.name);
    }
    Ok(())
}

pub async fn penalty_rule_add(
    ctx: &AppContext,
    government_id: &str,
    offence_code: &str,
    points: i64,
    min_value: Option<Decimal>,
    max_value: Option<Decimal>,
    description: Option<String>,
) -> Result<(), anyhow::Error> {
    if points <= 0 {
        anyhow::bail!("Penalty points must be positive, got {}", points);
    }
    let rule = PenaltyRule {
        id: Uuid::new_v4().to_string(),
        government_id: government_id.to_string(),
        offence_code: offence_code.to_string(),
        description,
        points,
        min_value,
        max_value,
        active: true,
    };
    api::add_penalty_rule(ctx, &rule).await?;
    println!("✅ Penalty rule {} added: {} = {} points", rule.id, offence_code, points);
    Ok(())
}

/// Build a configuration with its rules from command-line options
pub fn fee_schedule(
    ctx: &AppContext,
    government_id: &str,
    args: ScheduleArgs,
) -> Result<LateFeeConfiguration, anyhow::Error> {
    let id = args.id.unwrap_or_else(|| Uuid::new_v4().to_string());
    let mut config = ctx
        .config
        .late_fees
        .new_configuration(&id, government_id, args.structure);
    config.offence_code = args.offence_code;
    config.offence_category = args.offence_category;
    config.enabled = !args.disabled;
    config.max_total_fee = args.max_total_fee;
    if let Some(grace) = args.grace_period_days {
        config.grace_period_days = grace;
    }
    if let Some(cycle) = args.cycle_days {
        config.cycle_days = cycle;
    }

    let rule_id = |suffix: &str| format!("{}-{}", id, suffix);
    let mut rules = Vec::new();
    if let Some(amount) = args.flat_amount {
        rules.push(LateFeeRule::flat(rule_id("flat"), &id, amount));
    }
    if let Some(rate) = args.rate {
        rules.push(LateFeeRule::percentage(rule_id("percentage"), &id, rate));
    }
    if let Some(daily_rate) = args.daily_rate {
        rules.push(LateFeeRule::daily(rule_id("daily"), &id, daily_rate, args.cap));
    }
    if let Some(tiers) = args.tiers {
        let tiers: Vec<FeeTier> = serde_json::from_str(&tiers)?;
        rules.push(LateFeeRule::tiered(rule_id("tiered"), &id, tiers));
    }
    if rules.is_empty() {
        anyhow::bail!("No fee parameters given for a {} schedule", args.structure);
    }
    config.rules = rules;
    Ok(config)
}

pub async fn late_fee_config_set(
    ctx: &AppContext,
    government_id: &str,
    args: ScheduleArgs,
) -> Result<(), anyhow::Error> {
    let config = fee_schedule(ctx, government_id, args)?;
    api::set_late_fee_configuration(ctx, &config).await?;
    println!(
        "✅ Late-fee configuration {} saved ({}, {} rules)",
        config.id,
        config.structure,
        config.rules.len()
    );
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub async fn ticket_add(
    ctx: &AppContext,
    government_id: &str,
    ticket_id: &str,
    offence_code: &str,
    fine_amount: Decimal,
    due_date: NaiveDate,
    category: Option<String>,
    profile_id: Option<String>,
) -> Result<(), anyhow::Error> {
    let mut ticket = Ticket::new(ticket_id, government_id, offence_code, fine_amount, due_date);
    if let Some(category) = category {
        ticket = ticket.with_category(category);
    }
    if let Some(profile_id) = profile_id {
        ticket = ticket.with_profile(profile_id);
    }
    api::add_ticket(ctx, &ticket).await?;
    println!("✅ Ticket {} recorded: {} due {}", ticket.id, ticket.fine_amount, ticket.due_date);
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub async fn points_demerit(
    ctx: &AppContext,
    government_id: &str,
    kind: &str,
    identifier: &str,
    offence_code: &str,
    points: Option<i64>,
    measured_value: Option<Decimal>,
    ticket_id: Option<String>,
) -> Result<(), anyhow::Error> {
    let identity = api::identity(kind, identifier)?;
    let mut request = DemeritRequest::new(offence_code);
    if let Some(points) = points {
        request = request.with_points(points);
    }
    if let Some(value) = measured_value {
        request = request.with_measured_value(value);
    }
    if let Some(ticket_id) = ticket_id {
        request = request.with_source(PointSource::ticket(ticket_id));
    }

    let outcome = api::add_demerit_points(ctx, government_id, &identity, request).await?;
    println!(
        "✅ {} demerit points added to profile {} (current: {}, status: {})",
        outcome.entry.points_delta, outcome.profile.id, outcome.balance.current_points, outcome.balance.status
    );
    if let Some(record) = &outcome.new_sanction {
        println!(
            "⚠️  {} imposed from {} to {}",
            record.sanction_type, record.effective_date, record.end_date
        );
    }
    Ok(())
}

pub async fn points_merit(
    ctx: &AppContext,
    government_id: &str,
    kind: &str,
    identifier: &str,
    points: i64,
    reason: Option<String>,
) -> Result<(), anyhow::Error> {
    let identity = api::identity(kind, identifier)?;
    let source = reason.map(PointSource::reason).unwrap_or_default();
    let outcome = api::add_merit_points(ctx, government_id, &identity, points, source).await?;
    println!(
        "✅ {} of {} merit points awarded to profile {} (balance: {})",
        outcome.awarded, outcome.requested, outcome.profile_id, outcome.balance.current_points
    );
    Ok(())
}

pub async fn points_offset(
    ctx: &AppContext,
    government_id: &str,
    profile_id: &str,
    points: Option<i64>,
) -> Result<(), anyhow::Error> {
    let outcome = api::offset_points(ctx, government_id, profile_id, points).await?;
    println!(
        "✅ Offset {} demerit points (demerits: {} -> {}, merit left: {}, cap left: {})",
        outcome.offset,
        outcome.demerits_before,
        outcome.balance.current_points,
        outcome.merit.current_points,
        outcome.cap_remaining
    );
    Ok(())
}

pub async fn points_status(ctx: &AppContext, government_id: &str, profile_id: &str) -> Result<(), anyhow::Error> {
    print_json(&api::point_status(ctx, government_id, profile_id).await?)
}

pub async fn points_suspension(ctx: &AppContext, government_id: &str, profile_id: &str) -> Result<(), anyhow::Error> {
    print_json(&api::suspension_status(ctx, government_id, profile_id).await?)
}

pub async fn points_lift(
    ctx: &AppContext,
    government_id: &str,
    profile_id: &str,
    reason: &str,
) -> Result<(), anyhow::Error> {
    let record = api::lift_suspension(ctx, government_id, profile_id, reason).await?;
    println!("✅ {} {} lifted for profile {}", record.sanction_type, record.id, record.profile_id);
    Ok(())
}

pub async fn sweep_expire(ctx: &AppContext, government_id: Option<&str>) -> Result<(), anyhow::Error> {
    let summary = api::expire_points(ctx, government_id).await?;
    print_json(&summary)?;
    if !summary.success() {
        anyhow::bail!("{} entries failed to expire", summary.errors.len());
    }
    Ok(())
}

pub async fn sweep_merits(ctx: &AppContext, government_id: Option<&str>) -> Result<(), anyhow::Error> {
    let summary = api::award_merits(ctx, government_id).await?;
    print_json(&summary)?;
    if !summary.success() {
        anyhow::bail!("{} profiles failed the merit check", summary.errors.len());
    }
    Ok(())
}

/// Manual trigger of the daily batch
pub async fn late_fees_run(ctx: &AppContext, government_id: Option<&str>) -> Result<(), anyhow::Error> {
    let report = api::run_daily_batch(ctx, government_id).await?;
    print_json(&report)?;
    println!(
        "{} {} governments processed, {} fees applied ({} total), {} failed",
        if report.success() { "✅" } else { "❌" },
        report.governments.len(),
        report.fees_applied(),
        report.total_fee_amount(),
        report.failed_governments()
    );
    Ok(())
}

pub async fn late_fees_history(ctx: &AppContext, government_id: &str, ticket_id: &str) -> Result<(), anyhow::Error> {
    let events = api::late_fee_history(ctx, government_id, ticket_id).await?;
    if events.is_empty() {
        println!("No late fees charged on ticket {}", ticket_id);
        return Ok(());
    }
    for event in &events {
        println!(
            "cycle {:>3}  day {:>4}  {:>10}  ({})",
            event.cycle, event.days_overdue, event.amount, event.created_at
        );
    }
    Ok(())
}

/// Run the scheduler until Ctrl-C
pub async fn worker(ctx: &AppContext) -> Result<(), anyhow::Error> {
    let handle = ctx.scheduler.clone().start()?;
    println!("✅ Scheduler running daily at {} (Ctrl-C to stop)", ctx.config.scheduler.run_at);
    tokio::signal::ctrl_c().await?;
    handle.shutdown().await?;
    println!("Scheduler stopped");
    Ok(())
}

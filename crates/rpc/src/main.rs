//! FinePay CLI - Main entry point

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use finepay_core::{FeeStructure, GovernmentStatus};
use finepay_rpc::commands::{self, ScheduleArgs};
use finepay_rpc::{AppConfig, AppContext};
use rust_decimal::Decimal;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "finepay")]
#[command(about = "FinePay - demerit points and late fees for traffic fines", long_about = None)]
struct Cli {
    /// Config file (JSON); defaults to $FINEPAY_CONFIG
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Database URL, overrides the config file
    #[arg(long)]
    database: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database schema
    Init,

    /// Manage governments (tenants)
    Government {
        #[command(subcommand)]
        command: GovernmentCommand,
    },

    /// Manage penalty rules
    PenaltyRule {
        #[command(subcommand)]
        command: PenaltyRuleCommand,
    },

    /// Manage late-fee schedules
    LateFeeConfig {
        #[command(subcommand)]
        command: LateFeeConfigCommand,
    },

    /// Manage tickets
    Ticket {
        #[command(subcommand)]
        command: TicketCommand,
    },

    /// Demerit and merit points
    Points {
        #[command(subcommand)]
        command: PointsCommand,
    },

    /// Run a point sweep by hand
    Sweep {
        #[command(subcommand)]
        command: SweepCommand,
    },

    /// Late-fee processing
    LateFees {
        #[command(subcommand)]
        command: LateFeesCommand,
    },

    /// Run the daily scheduler in this process until Ctrl-C
    Worker,
}

#[derive(Subcommand)]
enum GovernmentCommand {
    /// Register a government
    Add {
        id: String,
        name: String,
        /// active, pilot, inactive or suspended
        #[arg(long, default_value = "active")]
        status: GovernmentStatus,
    },
    /// List governments
    List,
}

#[derive(Subcommand)]
enum PenaltyRuleCommand {
    /// Add a points rule for an offence
    Add {
        government: String,
        offence_code: String,
        points: i64,
        /// Lower bound of the measured value (inclusive)
        #[arg(long)]
        min: Option<Decimal>,
        /// Upper bound of the measured value (exclusive)
        #[arg(long)]
        max: Option<Decimal>,
        #[arg(long)]
        description: Option<String>,
    },
}

#[derive(Subcommand)]
enum LateFeeConfigCommand {
    /// Create or replace a late-fee schedule
    Set {
        government: String,
        /// flat, tiered, percentage, daily or combination
        #[arg(long)]
        structure: FeeStructure,
        /// Existing configuration id to replace
        #[arg(long)]
        id: Option<String>,
        #[arg(long)]
        offence_code: Option<String>,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        grace_days: Option<i64>,
        #[arg(long)]
        cycle_days: Option<i64>,
        #[arg(long)]
        max_total: Option<Decimal>,
        #[arg(long)]
        flat: Option<Decimal>,
        /// Fraction of the fine (0.10 = 10%)
        #[arg(long)]
        rate: Option<Decimal>,
        #[arg(long)]
        daily_rate: Option<Decimal>,
        /// Cap for the daily rule
        #[arg(long)]
        cap: Option<Decimal>,
        /// JSON array of tiers
        #[arg(long)]
        tiers: Option<String>,
        #[arg(long)]
        disabled: bool,
    },
}

#[derive(Subcommand)]
enum TicketCommand {
    /// Record a ticket
    Add {
        government: String,
        id: String,
        offence_code: String,
        fine: Decimal,
        /// YYYY-MM-DD
        due_date: NaiveDate,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        profile: Option<String>,
    },
}

#[derive(Subcommand)]
enum PointsCommand {
    /// Add demerit points for a violation
    Demerit {
        government: String,
        identifier: String,
        offence_code: String,
        /// national_id or driver_license
        #[arg(long, default_value = "driver_license")]
        kind: String,
        /// Points; looked up from penalty rules when omitted
        #[arg(long)]
        points: Option<i64>,
        /// Measured value (e.g. speed over the limit) for rule lookup
        #[arg(long)]
        value: Option<Decimal>,
        #[arg(long)]
        ticket: Option<String>,
    },
    /// Award merit points
    Merit {
        government: String,
        identifier: String,
        points: i64,
        #[arg(long, default_value = "driver_license")]
        kind: String,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Offset demerits with merit points
    Offset {
        government: String,
        profile: String,
        #[arg(long)]
        points: Option<i64>,
    },
    /// Show the full point status of a profile
    Status { government: String, profile: String },
    /// Show the sanction history of a profile
    Suspension { government: String, profile: String },
    /// Lift the active sanction of a profile
    Lift {
        government: String,
        profile: String,
        reason: String,
    },
}

#[derive(Subcommand)]
enum SweepCommand {
    /// Expire demerit entries past their expiry date
    Expire {
        #[arg(long)]
        government: Option<String>,
    },
    /// Award clean-driving merit milestones
    Merits {
        #[arg(long)]
        government: Option<String>,
    },
}

#[derive(Subcommand)]
enum LateFeesCommand {
    /// Run the daily batch now
    Run {
        #[arg(long)]
        government: Option<String>,
    },
    /// Show the fees charged on a ticket
    History { government: String, ticket: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let mut config = AppConfig::load(cli.config.as_deref())?;
    if let Some(url) = cli.database {
        config.database_url = url;
    }
    let ctx = AppContext::new(config).await?;

    match cli.command {
        Commands::Init => commands::init(&ctx).await?,

        Commands::Government { command } => match command {
            GovernmentCommand::Add { id, name, status } => {
                commands::government_add(&ctx, &id, &name, status).await?
            }
            GovernmentCommand::List => commands::government_list(&ctx).await?,
        },

        Commands::PenaltyRule {
            command:
                PenaltyRuleCommand::Add {
                    government,
                    offence_code,
                    points,
                    min,
                    max,
                    description,
                },
        } => {
            commands::penalty_rule_add(&ctx, &government, &offence_code, points, min, max, description).await?;
        }

        Commands::LateFeeConfig {
            command:
                LateFeeConfigCommand::Set {
                    government,
                    structure,
                    id,
                    offence_code,
                    category,
                    grace_days,
                    cycle_days,
                    max_total,
                    flat,
                    rate,
                    daily_rate,
                    cap,
                    tiers,
                    disabled,
                },
        } => {
            let args = ScheduleArgs {
                id,
                structure,
                offence_code,
                offence_category: category,
                grace_period_days: grace_days,
                cycle_days,
                max_total_fee: max_total,
                flat_amount: flat,
                rate,
                daily_rate,
                cap,
                tiers,
                disabled,
            };
            commands::late_fee_config_set(&ctx, &government, args).await?;
        }

        Commands::Ticket {
            command:
                TicketCommand::Add {
                    government,
                    id,
                    offence_code,
                    fine,
                    due_date,
                    category,
                    profile,
                },
        } => {
            commands::ticket_add(&ctx, &government, &id, &offence_code, fine, due_date, category, profile).await?;
        }

        Commands::Points { command } => match command {
            PointsCommand::Demerit {
                government,
                identifier,
                offence_code,
                kind,
                points,
                value,
                ticket,
            } => {
                commands::points_demerit(&ctx, &government, &kind, &identifier, &offence_code, points, value, ticket)
                    .await?
            }
            PointsCommand::Merit {
                government,
                identifier,
                points,
                kind,
                reason,
            } => commands::points_merit(&ctx, &government, &kind, &identifier, points, reason).await?,
            PointsCommand::Offset {
                government,
                profile,
                points,
            } => commands::points_offset(&ctx, &government, &profile, points).await?,
            PointsCommand::Status { government, profile } => {
                commands::points_status(&ctx, &government, &profile).await?
            }
            PointsCommand::Suspension { government, profile } => {
                commands::points_suspension(&ctx, &government, &profile).await?
            }
            PointsCommand::Lift {
                government,
                profile,
                reason,
            } => commands::points_lift(&ctx, &government, &profile, &reason).await?,
        },

        Commands::Sweep { command } => match command {
            SweepCommand::Expire { government } => commands::sweep_expire(&ctx, government.as_deref()).await?,
            SweepCommand::Merits { government } => commands::sweep_merits(&ctx, government.as_deref()).await?,
        },

        Commands::LateFees { command } => match command {
            LateFeesCommand::Run { government } => commands::late_fees_run(&ctx, government.as_deref()).await?,
            LateFeesCommand::History { government, ticket } => {
                commands::late_fees_history(&ctx, &government, &ticket).await?
            }
        },

        Commands::Worker => commands::worker(&ctx).await?,
    }

    Ok(())
}

//! # FinePay Late Fees
//!
//! Late-Fee Accrual Engine: resolves the fee schedule that applies to an
//! overdue ticket, charges at most once per accrual cycle and records every
//! charge as a `LateFeeEvent` with its full breakdown.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use finepay_latefees::{LateFeeEngine, LateFeeSettings};
//!
//! let engine = LateFeeEngine::new(db, LateFeeSettings::default(), notifier, clock);
//! let summary = engine.process_late_fees_for_government("GOV-1").await?;
//! println!("{} fees, {} total", summary.fees_applied, summary.total_amount);
//! ```

pub mod calculator;
pub mod config;
pub mod engine;
pub mod error;

pub use calculator::{accrual_cycle, assess, resolve_configuration, validate_configuration, FeeAssessment};
pub use config::LateFeeSettings;
pub use engine::{LateFeeEngine, LateFeeRunSummary, SkipReason, TicketFeeOutcome};
pub use error::{LateFeeError, LateFeeResult};

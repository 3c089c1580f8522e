//! # FinePay Points
//!
//! Point Ledger Engine and suspension state machine.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use finepay_points::{DemeritRequest, PointsConfig, PointsEngine};
//!
//! let engine = PointsEngine::new(db, PointsConfig::default(), Arc::new(SystemClock));
//! let identity = CitizenIdentity::driver_license("DL-1234567")?;
//! let outcome = engine
//!     .add_demerit_points("GOV-1", &identity, DemeritRequest::new("SPD-20").with_points(4))
//!     .await?;
//! println!("{} points, status {}", outcome.balance.current_points, outcome.balance.status);
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod suspension;

pub use config::{MeritPenalty, MilestoneConfig, PointsConfig, Thresholds};
pub use engine::{
    DemeritOutcome, DemeritRequest, ExpirySummary, MeritOutcome, MeritSweepSummary,
    OffsetOutcome, PointStatus, PointsEngine, Recomputed, SuspensionStatus,
};
pub use error::{BatchItemError, PointsError, PointsResult};
pub use ledger::{calculate_current_demerits, merit_totals, plan_offset, MeritTotals, OffsetSlice};
pub use suspension::{license_status, SanctionDecision, ThresholdStatus};

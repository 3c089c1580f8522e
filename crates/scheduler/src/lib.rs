//! FinePay Batch Scheduler
//!
//! Runs the late-fee accrual and point sweeps once a day for every active
//! or pilot government, and on demand.

pub mod config;
pub mod error;
pub mod lock;
pub mod scheduler;

pub use config::SchedulerConfig;
pub use error::{SchedulerError, SchedulerResult};
pub use lock::WorkerLock;
pub use scheduler::{
    next_run_after, BatchScheduler, DailyRunReport, GovernmentRun, SchedulerHandle, Target, Trigger,
};

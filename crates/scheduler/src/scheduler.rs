//! Daily batch job
//!
//! One run walks every scheduled government: late-fee accrual first, then
//! the point expiry and merit sweeps. A failing government is recorded in the
//! report and the run moves on. Runs never overlap within a process, and the
//! timer only starts in the worker that holds the lock file.

use chrono::{DateTime, Duration, NaiveTime, TimeZone};
use finepay_core::Clock;
use finepay_latefees::{LateFeeEngine, LateFeeRunSummary};
use finepay_points::{ExpirySummary, MeritSweepSummary, PointsEngine};
use finepay_store::{Database, GovernmentRepo, StoreError};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::SchedulerConfig;
use crate::error::{SchedulerError, SchedulerResult};
use crate::lock::WorkerLock;

/// Which governments a run covers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    All,
    Government(String),
}

/// What started a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    Scheduled,
    Manual,
}

/// Outcome for one government
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GovernmentRun {
    pub government_id: String,
    pub late_fees: Option<LateFeeRunSummary>,
    pub expiry: Option<ExpirySummary>,
    pub merits: Option<MeritSweepSummary>,
    pub errors: Vec<String>,
}

impl GovernmentRun {
    /// No step failed outright and no item inside a step failed
    pub fn success(&self) -> bool {
        self.errors.is_empty()
            && self.late_fees.as_ref().map_or(true, LateFeeRunSummary::success)
            && self.expiry.as_ref().map_or(true, ExpirySummary::success)
            && self.merits.as_ref().map_or(true, MeritSweepSummary::success)
    }
}

/// Report of one daily run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DailyRunReport {
    pub trigger: Trigger,
    pub started_at: DateTime<chrono::Utc>,
    pub finished_at: DateTime<chrono::Utc>,
    pub governments: Vec<GovernmentRun>,
    /// Governments not in an active or pilot state
    pub skipped_governments: Vec<String>,
}

impl DailyRunReport {
    pub fn success(&self) -> bool {
        self.governments.iter().all(GovernmentRun::success)
    }

    pub fn failed_governments(&self) -> usize {
        self.governments.iter().filter(|g| !g.success()).count()
    }

    pub fn fees_applied(&self) -> usize {
        self.governments
            .iter()
            .filter_map(|g| g.late_fees.as_ref())
            .map(|s| s.fees_applied)
            .sum()
    }

    pub fn total_fee_amount(&self) -> Decimal {
        self.governments
            .iter()
            .filter_map(|g| g.late_fees.as_ref())
            .map(|s| s.total_amount)
            .sum()
    }

    pub fn government(&self, id: &str) -> Option<&GovernmentRun> {
        self.governments.iter().find(|g| g.government_id == id)
    }
}

/// Next occurrence of `at` strictly after `now`, in `now`'s time zone
pub fn next_run_after<Tz: TimeZone>(now: &DateTime<Tz>, at: NaiveTime) -> DateTime<Tz> {
    let local = now.naive_local();
    let mut date = local.date();
    if local.time() >= at {
        date += Duration::days(1);
    }
    let naive = date.and_time(at);
    let tz = now.timezone();
    match tz.from_local_datetime(&naive).earliest() {
        Some(next) => next,
        // Local time skipped by a DST change
        None => tz.from_utc_datetime(&naive),
    }
}

/// Handle to a started timer loop
#[derive(Debug)]
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Stop the loop and wait for an in-flight run to finish
    pub async fn shutdown(self) -> SchedulerResult<()> {
        // Loop already gone when the receiver is dropped
        let _ = self.shutdown.send(true);
        self.task
            .await
            .map_err(|e| SchedulerError::Task(e.to_string()))
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Batch Scheduler
pub struct BatchScheduler {
    db: Database,
    points: Arc<PointsEngine>,
    late_fees: Arc<LateFeeEngine>,
    config: SchedulerConfig,
    clock: Arc<dyn Clock>,
    run_at: NaiveTime,
    run_lock: Mutex<()>,
    started: AtomicBool,
}

impl BatchScheduler {
    pub fn new(
        db: Database,
        points: Arc<PointsEngine>,
        late_fees: Arc<LateFeeEngine>,
        config: SchedulerConfig,
        clock: Arc<dyn Clock>,
    ) -> SchedulerResult<Self> {
        let run_at = config.run_time()?;
        Ok(Self {
            db,
            points,
            late_fees,
            config,
            clock,
            run_at,
            run_lock: Mutex::new(()),
            started: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Run the daily job immediately, bypassing the timer
    pub async fn run_now(&self, target: Target) -> SchedulerResult<DailyRunReport> {
        self.run(Trigger::Manual, target).await
    }

    /// Start the daily timer in a background task
    ///
    /// Fails with `AlreadyRunning` if this scheduler was already started or
    /// another worker holds the lock file.
    pub fn start(self: Arc<Self>) -> SchedulerResult<SchedulerHandle> {
        if !self.config.enabled {
            return Err(SchedulerError::Disabled);
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(SchedulerError::AlreadyRunning("scheduler already started".to_string()));
        }
        let lock = match WorkerLock::acquire(self.config.lock_file.as_deref()) {
            Ok(lock) => lock,
            Err(e) => {
                self.started.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };

        let (shutdown, mut stop) = watch::channel(false);
        let scheduler = Arc::clone(&self);
        let task = tokio::spawn(async move {
            let _lock = lock;
            loop {
                let now = chrono::Local::now();
                let next = next_run_after(&now, scheduler.run_at);
                let wait = (next - now).to_std().unwrap_or_default();
                info!(next_run = %next, "Next daily batch scheduled");

                tokio::select! {
                    _ = tokio::time::sleep(wait) => {
                        match scheduler.run(Trigger::Scheduled, Target::All).await {
                            Ok(report) => info!(
                                governments = report.governments.len(),
                                failed = report.failed_governments(),
                                fees_applied = report.fees_applied(),
                                "Daily batch finished"
                            ),
                            Err(e) => error!(error = %e, "Daily batch failed"),
                        }
                    }
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            break;
                        }
                    }
                }
            }
            scheduler.started.store(false, Ordering::SeqCst);
            info!("Batch scheduler stopped");
        });

        info!(run_at = %self.run_at, "Batch scheduler started");
        Ok(SchedulerHandle { shutdown, task })
    }

    async fn run(&self, trigger: Trigger, target: Target) -> SchedulerResult<DailyRunReport> {
        let _running = self.run_lock.lock().await;
        let started_at = self.clock.now();

        let governments = {
            let mut conn = self.db.pool().acquire().await.map_err(StoreError::from)?;
            match &target {
                Target::All => GovernmentRepo::list(&mut conn).await?,
                Target::Government(id) => vec![GovernmentRepo::get(&mut conn, id).await?],
            }
        };

        let mut report = DailyRunReport {
            trigger,
            started_at,
            finished_at: started_at,
            governments: Vec::new(),
            skipped_governments: Vec::new(),
        };

        for government in governments {
            if !government.status.is_scheduled() {
                info!(government_id = %government.id, status = ?government.status, "Government not scheduled, skipping");
                report.skipped_governments.push(government.id);
                continue;
            }
            let run = self.run_government(&government.id).await;
            if !run.success() {
                warn!(government_id = %government.id, errors = ?run.errors, "Daily batch incomplete for government");
            }
            report.governments.push(run);
        }

        report.finished_at = self.clock.now();
        Ok(report)
    }

    async fn run_government(&self, government_id: &str) -> GovernmentRun {
        let mut run = GovernmentRun {
            government_id: government_id.to_string(),
            ..GovernmentRun::default()
        };

        match self.late_fees.process_late_fees_for_government(government_id).await {
            Ok(summary) => run.late_fees = Some(summary),
            Err(e) => {
                error!(government_id, error = %e, "Late-fee run failed");
                run.errors.push(format!("late fees: {}", e));
            }
        }

        if self.config.run_point_sweeps {
            match self.points.expire_old_points(Some(government_id)).await {
                Ok(summary) => run.expiry = Some(summary),
                Err(e) => {
                    error!(government_id, error = %e, "Point expiry failed");
                    run.errors.push(format!("point expiry: {}", e));
                }
            }
            match self.points.check_and_award_merits(Some(government_id)).await {
                Ok(summary) => run.merits = Some(summary),
                Err(e) => {
                    error!(government_id, error = %e, "Merit sweep failed");
                    run.errors.push(format!("merit sweep: {}", e));
                }
            }
        }

        run
    }
}

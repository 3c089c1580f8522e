//! Application context - wires everything together

use finepay_core::{Clock, SystemClock};
use finepay_latefees::LateFeeEngine;
use finepay_notify::{LogNotifier, Notifier};
use finepay_points::PointsEngine;
use finepay_scheduler::BatchScheduler;
use finepay_store::Database;
use std::sync::Arc;
use tracing::debug;

use crate::config::AppConfig;

/// Owns the store, both engines and the scheduler
///
/// Built once at startup; the scheduler handle is held here rather than in a
/// process-wide static.
pub struct AppContext {
    pub config: AppConfig,
    pub db: Database,
    pub clock: Arc<dyn Clock>,
    pub notifier: Arc<dyn Notifier>,
    pub points: Arc<PointsEngine>,
    pub late_fees: Arc<LateFeeEngine>,
    pub scheduler: Arc<BatchScheduler>,
}

impl AppContext {
    /// Connect to the configured database with the system clock and log notifier
    pub async fn new(config: AppConfig) -> Result<Self, anyhow::Error> {
        let db = Database::new(&config.database_url).await?;
        Self::with_parts(config, db, Arc::new(SystemClock), Arc::new(LogNotifier))
    }

    /// Assemble from explicit collaborators
    pub fn with_parts(
        config: AppConfig,
        db: Database,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, anyhow::Error> {
        let points = Arc::new(PointsEngine::new(db.clone(), config.points.clone(), clock.clone()));
        let late_fees = Arc::new(LateFeeEngine::new(
            db.clone(),
            config.late_fees.clone(),
            notifier.clone(),
            clock.clone(),
        ));
        let scheduler = Arc::new(BatchScheduler::new(
            db.clone(),
            points.clone(),
            late_fees.clone(),
            config.scheduler.clone(),
            clock.clone(),
        )?);
        debug!(notifier = notifier.name(), "Application context ready");

        Ok(Self {
            config,
            db,
            clock,
            notifier,
            points,
            late_fees,
            scheduler,
        })
    }
}

//! Periodic reconciliation scheduler
//!
//! Drives [`ReconciliationPipeline::run`] on a fixed interval. The pass is
//! awaited inside the loop and every pass, scheduled or on demand, holds the
//! same pass lock, so two passes never run at once. Ticks that fall due
//! while a pass is still running are skipped.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::PersistenceConfig;
use crate::error::Result;
use crate::reconcile::{PassReport, ReconciliationPipeline};

pub struct Scheduler {
    pipeline: Arc<ReconciliationPipeline>,
    interval: Duration,
    /// Whether the periodic task should keep firing
    running: RwLock<bool>,
    /// Completion time of the last pass that returned Ok
    last_success: RwLock<Option<DateTime<Utc>>>,
    pass_lock: Mutex<()>,
    shutdown_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    /// Create a stopped scheduler; fails on an invalid configuration
    pub fn new(config: &PersistenceConfig, pipeline: Arc<ReconciliationPipeline>) -> Result<Self> {
        config.validate()?;
        let (shutdown_tx, _) = watch::channel(false);
        Ok(Self {
            pipeline,
            interval: config.interval(),
            running: RwLock::new(false),
            last_success: RwLock::new(None),
            pass_lock: Mutex::new(()),
            shutdown_tx,
            task: Mutex::new(None),
        })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Start firing passes every interval, the first one interval from now
    pub async fn start(self: Arc<Self>) {
        {
            let mut running = self.running.write().await;
            if *running {
                warn!("Scheduler already running");
                return;
            }
            *running = true;
        }

        self.shutdown_tx.send_replace(false);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        info!(interval_secs = self.interval.as_secs(), "Starting reconciliation scheduler");

        let scheduler = Arc::clone(&self);
        let handle = tokio::spawn(async move {
            let period = scheduler.interval;
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => break,
                    _ = ticker.tick() => {
                        debug!("Reconciliation tick");
                        // failures are logged inside and never end the loop
                        let _ = scheduler.run_pass().await;
                    }
                }
            }

            info!("Reconciliation scheduler stopped");
        });

        *self.task.lock().await = Some(handle);
    }

    /// Stop triggering new passes; an in-flight pass runs to completion
    pub async fn stop(&self) {
        let mut running = self.running.write().await;
        if !*running {
            return;
        }
        *running = false;
        self.shutdown_tx.send_replace(true);
        info!("Reconciliation scheduler stop requested");
    }

    /// Stop and wait for the periodic task, including any in-flight pass
    pub async fn shutdown(&self) {
        self.stop().await;
        let handle = self.task.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "Scheduler task ended abnormally");
            }
        }
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    pub async fn last_successful_run(&self) -> Option<DateTime<Utc>> {
        *self.last_success.read().await
    }

    /// Run one pass now, waiting for any pass already in progress
    pub async fn run_now(&self) -> Result<PassReport> {
        self.run_pass().await
    }

    async fn run_pass(&self) -> Result<PassReport> {
        let _guard = self.pass_lock.lock().await;
        match self.pipeline.run().await {
            Ok(report) => {
                *self.last_success.write().await = Some(Utc::now());
                Ok(report)
            }
            Err(e) => {
                error!(error = %e, "Reconciliation pass failed");
                Err(e)
            }
        }
    }
}

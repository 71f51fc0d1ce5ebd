//! Retrain Scheduler Background Job
//!
//! Two triggers drive full retraining:
//!
//! 1. Daily: a fixed UTC time of day
//! 2. Activity: on every check interval, retrain when the active snapshot is
//!    older than the idle interval and activity was logged since it was built
//!
//! Training builds a new snapshot off to the side and swaps it in at the end,
//! so recommendation reads are never blocked. The loop stops on
//! [`SchedulerHandle::shutdown`]; a pass already running completes first.

use crate::config::SchedulerConfig;
use crate::services::lifecycle::TrainingOutcome;
use crate::services::RecommendationEngine;
use chrono::{DateTime, Duration as ChronoDuration, NaiveTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};

/// Window of source-side activity inspected by the activity trigger
const RECENT_ACTIVITY_DAYS: u32 = 1;

/// Handle to the running scheduler task
pub struct SchedulerHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Stop the scheduler and wait for the loop to exit
    pub async fn shutdown(self) {
        tracing::info!("Shutting down retrain scheduler...");
        let _ = self.shutdown_tx.send(true);

        match self.task.await {
            Ok(()) => tracing::info!("Retrain scheduler shut down gracefully"),
            Err(e) => tracing::warn!(error = %e, "Retrain scheduler task ended abnormally"),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

pub struct RetrainScheduler {
    engine: Arc<RecommendationEngine>,
    config: SchedulerConfig,
}

impl RetrainScheduler {
    /// Start the scheduler on the current runtime
    pub fn spawn(engine: Arc<RecommendationEngine>, config: SchedulerConfig) -> SchedulerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let scheduler = Self { engine, config };
        let task = tokio::spawn(scheduler.run(shutdown_rx));

        SchedulerHandle { shutdown_tx, task }
    }

    async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        if !self.config.enabled {
            tracing::info!("Retrain scheduler disabled by configuration");
            return;
        }

        tracing::info!(
            daily_at = %format!("{:02}:{:02}", self.config.daily_hour, self.config.daily_minute),
            idle_interval_secs = self.config.idle_interval_secs,
            check_interval_secs = self.config.activity_check_interval_secs,
            "Starting retrain scheduler"
        );

        let mut activity_check = interval(self.config.activity_check_interval());
        activity_check.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately
        activity_check.tick().await;

        loop {
            let now = Utc::now();
            let until_daily = next_daily_run(now, self.config.daily_hour, self.config.daily_minute)
                .map(|at| (at - now).to_std().unwrap_or(Duration::ZERO))
                .unwrap_or(Duration::from_secs(24 * 60 * 60));

            tokio::select! {
                _ = shutdown_rx.changed() => break,
                _ = sleep(until_daily) => {
                    self.run_retrain("daily").await;
                }
                _ = activity_check.tick() => {
                    match self.activity_retrain_due().await {
                        Ok(true) => self.run_retrain("activity").await,
                        Ok(false) => tracing::trace!("No retrain needed"),
                        Err(e) => tracing::warn!(error = %e, "Activity check failed"),
                    }
                }
            }
        }

        tracing::info!("Retrain scheduler stopped");
    }

    async fn run_retrain(&self, trigger: &'static str) {
        tracing::info!(trigger, "Scheduled retrain starting");

        match self.engine.retrain().await {
            TrainingOutcome::Trained {
                version,
                duration_ms,
            } => {
                tracing::info!(trigger, version, duration_ms, "Scheduled retrain completed");
            }
            TrainingOutcome::AlreadyRunning => {
                tracing::debug!(trigger, "Retrain already running, trigger skipped");
            }
            TrainingOutcome::Failed { error } => {
                // Retried on the next trigger
                tracing::warn!(trigger, error = %error, "Scheduled retrain failed");
            }
        }
    }

    async fn activity_retrain_due(&self) -> anyhow::Result<bool> {
        let last_update = self.engine.last_update_at();

        let mut new_activity = self.engine.pending_activity() > 0;
        if !new_activity {
            let recent = self
                .engine
                .data_source()
                .get_recent_activity(RECENT_ACTIVITY_DAYS)
                .await?;
            new_activity = recent
                .iter()
                .any(|event| last_update.map_or(true, |at| event.occurred_at > at));
        }

        Ok(retrain_due(
            Utc::now(),
            last_update,
            self.config.idle_interval(),
            new_activity,
        ))
    }
}

/// Next occurrence of `hour:minute` UTC strictly after `now`
pub fn next_daily_run(now: DateTime<Utc>, hour: u32, minute: u32) -> Option<DateTime<Utc>> {
    let time = NaiveTime::from_hms_opt(hour, minute, 0)?;
    let today = now.date_naive().and_time(time).and_utc();

    if today > now {
        Some(today)
    } else {
        Some(today + ChronoDuration::days(1))
    }
}

/// Activity trigger decision. Without an active snapshot any new activity
/// is enough.
pub fn retrain_due(
    now: DateTime<Utc>,
    last_update: Option<DateTime<Utc>>,
    idle_interval: Duration,
    new_activity: bool,
) -> bool {
    if !new_activity {
        return false;
    }

    match last_update {
        None => true,
        Some(at) => match (now - at).to_std() {
            Ok(elapsed) => elapsed >= idle_interval,
            // Clock went backwards
            Err(_) => false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, h, m, s).unwrap()
    }

    #[test]
    fn test_next_daily_run_later_today() {
        assert_eq!(next_daily_run(at(1, 30, 0), 2, 0), Some(at(2, 0, 0)));
    }

    #[test]
    fn test_next_daily_run_rolls_to_tomorrow() {
        let expected = Utc.with_ymd_and_hms(2024, 3, 11, 2, 0, 0).unwrap();
        assert_eq!(next_daily_run(at(2, 0, 0), 2, 0), Some(expected));
        assert_eq!(next_daily_run(at(23, 59, 59), 2, 0), Some(expected));
    }

    #[test]
    fn test_next_daily_run_rejects_invalid_time() {
        assert_eq!(next_daily_run(at(1, 0, 0), 24, 0), None);
    }

    #[test]
    fn test_retrain_due_requires_activity_and_idle_time() {
        let now = at(12, 0, 0);
        let idle = Duration::from_secs(30 * 60);

        // Idle long enough but nothing new
        assert!(!retrain_due(now, Some(at(10, 0, 0)), idle, false));
        // New activity but updated too recently
        assert!(!retrain_due(now, Some(at(11, 45, 0)), idle, true));
        // Both conditions hold
        assert!(retrain_due(now, Some(at(11, 0, 0)), idle, true));
        // Never trained
        assert!(retrain_due(now, None, idle, true));
        // Update in the future
        assert!(!retrain_due(now, Some(at(13, 0, 0)), idle, true));
    }
}

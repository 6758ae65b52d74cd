//! `Poller`: scans for ready [`Timer`]s and drives them (SPEC_FULL §4.6, §3 invariant 6:
//! "claim/TTL ensures at-most-one worker advances a given timer"). Grounded on the teacher's
//! `services/task_schedule_service.rs` enable/cron-validate shape and `services/event_reactor.rs`'s
//! polling-loop structure (`tokio::time::interval` + `tokio::select!` shutdown).

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::domain::errors::DurableError;

use super::model::{ExecutionId, ScheduleKind, StepOutcome, Timer, TimerKind};
use super::service::DurableService;
use super::store::Store;

/// Computes a [`Schedule`](super::model::Schedule)'s next fire time from its `kind`/`pattern`
/// (SPEC_FULL §4.6: `ensureSchedule`).
pub fn compute_next_run(kind: ScheduleKind, pattern: &str, after: DateTime<Utc>) -> Result<DateTime<Utc>, DurableError> {
    match kind {
        ScheduleKind::Cron => {
            let schedule = cron::Schedule::from_str(pattern)
                .map_err(|e| DurableError::InvalidCron { expression: pattern.to_string(), cause: e.to_string() })?;
            schedule
                .after(&after)
                .next()
                .ok_or_else(|| DurableError::InvalidCron { expression: pattern.to_string(), cause: "schedule never fires again".to_string() })
        }
        ScheduleKind::Interval => {
            let secs: i64 = pattern
                .parse()
                .map_err(|_| DurableError::InvalidCron { expression: pattern.to_string(), cause: "interval pattern must be whole seconds".to_string() })?;
            Ok(after + chrono::Duration::seconds(secs))
        }
    }
}

/// Scans [`Store::get_ready_timers`] on an interval, claims each with a TTL so only one
/// worker advances it, and resumes the owning execution (or materializes a new one for
/// `Scheduled` timers).
pub struct Poller {
    store: Arc<dyn Store>,
    service: Arc<DurableService>,
    worker_id: String,
    claim_ttl_ms: i64,
    interval: Duration,
}

impl Poller {
    pub fn new(store: Arc<dyn Store>, service: Arc<DurableService>, worker_id: impl Into<String>, interval: Duration) -> Self {
        Self {
            store,
            service,
            worker_id: worker_id.into(),
            claim_ttl_ms: 30_000,
            interval,
        }
    }

    /// Runs the poll loop until `shutdown` resolves. Intended to be spawned as a background
    /// task alongside one or more [`super::worker::Worker`]s.
    pub async fn run(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.poll_once().await {
                        tracing::error!(error = %e, "durable poller tick failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }

    /// One scan-claim-advance pass (SPEC_FULL §4.6 "Polling mode").
    pub async fn poll_once(&self) -> Result<(), DurableError> {
        let now = Utc::now();
        for timer in self.store.get_ready_timers(now).await? {
            if !self.store.claim_timer(timer.id, &self.worker_id, self.claim_ttl_ms).await? {
                continue;
            }
            if let Err(e) = self.fire(timer).await {
                tracing::error!(error = %e, "failed to advance a fired timer");
            }
        }
        Ok(())
    }

    async fn fire(&self, timer: Timer) -> Result<(), DurableError> {
        match timer.kind {
            TimerKind::Sleep => {
                let (Some(execution_id), Some(step_id)) = (timer.execution_id, timer.step_id.clone()) else {
                    return self.store.delete_timer(timer.id).await;
                };
                self.store.save_step_result(execution_id, &step_id, StepOutcome::SleepFired).await?;
                self.store.mark_timer_fired(timer.id).await?;
                self.store.delete_timer(timer.id).await?;
                self.service.process_execution(execution_id).await
            }
            TimerKind::SignalTimeout => {
                let (Some(execution_id), Some(step_id)) = (timer.execution_id, timer.step_id.clone()) else {
                    return self.store.delete_timer(timer.id).await;
                };
                self.store.save_step_result(execution_id, &step_id, StepOutcome::TimedOut).await?;
                self.store.mark_timer_fired(timer.id).await?;
                self.store.delete_timer(timer.id).await?;
                self.service.process_execution(execution_id).await
            }
            TimerKind::Scheduled => self.fire_scheduled(timer).await,
            TimerKind::KickoffFailsafe => {
                self.store.delete_timer(timer.id).await?;
                if let Some(execution_id) = timer.execution_id {
                    self.service.process_execution(execution_id).await?;
                }
                Ok(())
            }
        }
    }

    async fn fire_scheduled(&self, timer: Timer) -> Result<(), DurableError> {
        self.store.mark_timer_fired(timer.id).await?;
        self.store.delete_timer(timer.id).await?;

        let Some(schedule_id) = timer.schedule_id else {
            return Ok(());
        };
        let Some(mut schedule) = self.store.get_schedule(schedule_id).await? else {
            return Ok(());
        };
        if schedule.status != super::model::ScheduleStatus::Active {
            return Ok(());
        }
        // A schedule edited mid-flight (pattern/pause changed after this timer was
        // materialized) should not fire on stale parameters (SPEC_FULL §4.6 edge case).
        if schedule.next_run != timer.fire_at {
            return Ok(());
        }

        let (Some(task_id), Some(input)) = (timer.task_id.clone(), timer.input.clone()) else {
            return Ok(());
        };
        let _: ExecutionId = self.service.start(&task_id, input, None, None).await?;

        schedule.next_run = compute_next_run(schedule.kind, &schedule.pattern, Utc::now())?;
        schedule.updated_at = Utc::now();
        self.store.update_schedule(schedule.clone()).await?;
        self.store
            .create_timer(Timer::scheduled(schedule.id, schedule.task_id.clone(), schedule.input.clone(), schedule.next_run))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_pattern_advances_by_whole_seconds() {
        let now = Utc::now();
        let next = compute_next_run(ScheduleKind::Interval, "30", now).unwrap();
        assert_eq!((next - now).num_seconds(), 30);
    }

    #[test]
    fn invalid_cron_pattern_is_rejected() {
        let now = Utc::now();
        assert!(compute_next_run(ScheduleKind::Cron, "not a cron expression", now).is_err());
    }

    #[test]
    fn cron_pattern_advances_to_a_future_time() {
        let now = Utc::now();
        // Every minute at second 0 (cron crate uses a 6-field, seconds-first format).
        let next = compute_next_run(ScheduleKind::Cron, "0 * * * * *", now).unwrap();
        assert!(next > now);
    }
}

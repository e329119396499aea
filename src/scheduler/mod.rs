// dbvault/src/scheduler/mod.rs
pub mod cron;
mod trigger;

use chrono::{DateTime, Local};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{error, info, warn};

use crate::backup::{BackupExecutor, sweep};
use crate::config::{Catalog, Schedule};
use crate::errors::{AppError, Result};
pub use cron::CronExpr;
pub use trigger::{Job, JobFuture, Trigger};

const MAINTENANCE_ID: &str = "maintenance";

/// The triggers of one schedule and the definition they were built from.
struct Registration {
    schedule: Schedule,
    triggers: Vec<Trigger>,
}

/// What a [`ScheduleRegistry::reload`] changed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReloadReport {
    pub registered: Vec<String>,
    pub cancelled: Vec<String>,
    pub failed: Vec<String>,
}

impl ReloadReport {
    pub fn is_empty(&self) -> bool {
        self.registered.is_empty() && self.cancelled.is_empty() && self.failed.is_empty()
    }
}

/// Owns every active trigger, keyed by schedule id.
pub struct ScheduleRegistry {
    catalog: Catalog,
    executor: BackupExecutor,
    maintenance_time: String,
    registrations: Mutex<HashMap<String, Registration>>,
    /// Definitions that failed to register, so an unchanged one is not retried on reload.
    rejected: Mutex<HashMap<String, Schedule>>,
    maintenance: Mutex<Option<Trigger>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ScheduleRegistry {
    pub fn new(executor: BackupExecutor, maintenance_time: impl Into<String>) -> Self {
        ScheduleRegistry {
            catalog: executor.catalog().clone(),
            executor,
            maintenance_time: maintenance_time.into(),
            registrations: Mutex::new(HashMap::new()),
            rejected: Mutex::new(HashMap::new()),
            maintenance: Mutex::new(None),
        }
    }

    /// Registers every enabled schedule and installs the daily retention sweep.
    /// Returns how many schedules became active.
    pub async fn initialize(&self) -> Result<usize> {
        let schedules = self.catalog.schedules()?;
        let mut active = 0;
        for schedule in schedules.iter().filter(|s| s.enabled) {
            match self.register(schedule) {
                Ok(0) => {}
                Ok(_) => active += 1,
                Err(e) => warn!(schedule = %schedule.id, error = %e, "Skipping schedule that failed to register"),
            }
        }

        self.install_maintenance()?;
        info!(active, total = schedules.len(), "Scheduler initialized");
        Ok(active)
    }

    fn install_maintenance(&self) -> Result<()> {
        let (hour, minute) =
            cron::parse_time(&self.maintenance_time).map_err(|reason| AppError::InvalidSchedule {
                schedule_id: MAINTENANCE_ID.to_string(),
                reason,
            })?;

        let catalog = self.catalog.clone();
        let job: Job = Arc::new(move || -> JobFuture {
            let catalog = catalog.clone();
            Box::pin(async move { run_maintenance(&catalog).await })
        });

        let trigger = Trigger::spawn(MAINTENANCE_ID, CronExpr::daily(hour, minute), job);
        info!(cron = %trigger.cron(), "Installed daily retention sweep");
        if let Some(previous) = lock(&self.maintenance).replace(trigger) {
            previous.cancel();
        }
        Ok(())
    }

    /// Replaces the schedule's triggers with fresh ones derived from its
    /// current definition. Returns the number of triggers created.
    pub fn register(&self, schedule: &Schedule) -> Result<usize> {
        self.cancel(&schedule.id);
        let exprs = match CronExpr::for_schedule(schedule) {
            Ok(exprs) => exprs,
            Err(e) => {
                lock(&self.rejected).insert(schedule.id.clone(), schedule.clone());
                return Err(e);
            }
        };
        lock(&self.rejected).remove(&schedule.id);

        let executor = self.executor.clone();
        let snapshot = Arc::new(schedule.clone());
        let job: Job = Arc::new(move || -> JobFuture {
            let executor = executor.clone();
            let schedule = snapshot.clone();
            Box::pin(async move { run_scheduled_backup(&executor, &schedule).await })
        });

        let triggers: Vec<Trigger> = exprs
            .into_iter()
            .map(|expr| Trigger::spawn(schedule.id.clone(), expr, job.clone()))
            .collect();
        let count = triggers.len();
        if count > 0 {
            lock(&self.registrations).insert(
                schedule.id.clone(),
                Registration {
                    schedule: schedule.clone(),
                    triggers,
                },
            );
            let next = self.next_run(&schedule.id).map(|t| t.to_rfc3339());
            info!(schedule = %schedule.name, id = %schedule.id, triggers = count, next = ?next, "Registered schedule");
        }
        Ok(count)
    }

    /// Cancels every trigger of the schedule. Returns how many were cancelled.
    pub fn cancel(&self, schedule_id: &str) -> usize {
        let Some(registration) = lock(&self.registrations).remove(schedule_id) else {
            return 0;
        };
        for trigger in &registration.triggers {
            trigger.cancel();
        }
        info!(id = schedule_id, triggers = registration.triggers.len(), "Cancelled schedule");
        registration.triggers.len()
    }

    /// Cancels all schedule triggers and the maintenance trigger.
    pub fn cancel_all(&self) {
        let drained: Vec<(String, Registration)> = lock(&self.registrations).drain().collect();
        for trigger in drained.iter().flat_map(|(_, r)| &r.triggers) {
            trigger.cancel();
        }
        if let Some(maintenance) = lock(&self.maintenance).take() {
            maintenance.cancel();
        }
        info!(schedules = drained.len(), "All triggers cancelled");
    }

    /// Follows an edited schedule: re-registers it when enabled, cancels it otherwise.
    pub fn apply_update(&self, schedule: &Schedule) -> Result<usize> {
        if schedule.enabled {
            self.register(schedule)
        } else {
            self.cancel(&schedule.id);
            lock(&self.rejected).remove(&schedule.id);
            Ok(0)
        }
    }

    /// Follows a deleted schedule.
    pub fn remove(&self, schedule_id: &str) {
        self.cancel(schedule_id);
        lock(&self.rejected).remove(schedule_id);
    }

    /// Brings the trigger table in line with the store: new or edited
    /// schedules are (re-)registered, disabled ones cancelled and deleted or
    /// unreadable ones removed. Unchanged schedules keep their triggers.
    pub fn reload(&self) -> Result<ReloadReport> {
        let schedules = self.catalog.schedules()?;
        let mut report = ReloadReport::default();

        for schedule in &schedules {
            let registered = lock(&self.registrations)
                .get(&schedule.id)
                .map(|r| r.schedule == *schedule);
            let known_bad = lock(&self.rejected).get(&schedule.id) == Some(schedule);

            match (schedule.enabled, registered) {
                (true, Some(true)) => {}
                (true, None) if known_bad => {}
                (true, _) => match self.apply_update(schedule) {
                    Ok(0) => {}
                    Ok(_) => report.registered.push(schedule.id.clone()),
                    Err(e) => {
                        warn!(schedule = %schedule.id, error = %e, "Schedule failed to register");
                        report.failed.push(schedule.id.clone());
                    }
                },
                (false, Some(_)) => {
                    self.apply_update(schedule)?;
                    report.cancelled.push(schedule.id.clone());
                }
                (false, None) => {}
            }
        }

        let present: HashSet<&str> = schedules.iter().map(|s| s.id.as_str()).collect();
        for id in self.active_schedule_ids() {
            if !present.contains(id.as_str()) {
                self.remove(&id);
                report.cancelled.push(id);
            }
        }

        if !report.is_empty() {
            info!(
                registered = report.registered.len(),
                cancelled = report.cancelled.len(),
                failed = report.failed.len(),
                "Schedules reloaded"
            );
        }
        Ok(report)
    }

    pub fn active_trigger_count(&self, schedule_id: &str) -> usize {
        lock(&self.registrations)
            .get(schedule_id)
            .map_or(0, |r| r.triggers.len())
    }

    pub fn active_schedule_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = lock(&self.registrations).keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Earliest upcoming fire across the schedule's triggers.
    pub fn next_run(&self, schedule_id: &str) -> Option<DateTime<Local>> {
        lock(&self.registrations)
            .get(schedule_id)?
            .triggers
            .iter()
            .filter_map(Trigger::next_run)
            .min()
    }

    pub fn cron_expressions(&self, schedule_id: &str) -> Vec<String> {
        lock(&self.registrations)
            .get(schedule_id)
            .map(|r| r.triggers.iter().map(|t| t.cron().to_string()).collect())
            .unwrap_or_default()
    }

    pub fn maintenance_cron(&self) -> Option<String> {
        lock(&self.maintenance).as_ref().map(|t| t.cron().to_string())
    }
}

async fn run_scheduled_backup(executor: &BackupExecutor, schedule: &Schedule) {
    match executor.run_backup(schedule).await {
        Ok(_) if schedule.retention_days > 0 => {
            sweep(schedule).await;
        }
        Ok(_) => {}
        Err(e) => error!(schedule = %schedule.name, id = %schedule.id, error = %e, "Scheduled backup failed"),
    }
}

async fn run_maintenance(catalog: &Catalog) {
    let schedules = match catalog.schedules() {
        Ok(schedules) => schedules,
        Err(e) => {
            error!(error = %e, "Retention sweep skipped: cannot load schedules");
            return;
        }
    };
    for schedule in schedules.iter().filter(|s| s.retention_days > 0) {
        let report = sweep(schedule).await;
        if !report.deleted.is_empty() || !report.failed.is_empty() {
            info!(
                schedule = %schedule.name,
                deleted = report.deleted.len(),
                failed = report.failed.len(),
                "Retention sweep finished"
            );
        }
    }
}

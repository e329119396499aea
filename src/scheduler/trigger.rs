// dbvault/src/scheduler/trigger.rs
use chrono::{DateTime, Local};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::cron::CronExpr;

pub type JobFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Work run on every fire. Called once per fire; each call's future runs on
/// its own task.
pub type Job = Arc<dyn Fn() -> JobFuture + Send + Sync>;

/// A timer task bound to one cron expression. Dropping it cancels it.
pub struct Trigger {
    label: String,
    cron: CronExpr,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl Trigger {
    /// Starts the timer on the current tokio runtime.
    pub fn spawn(label: impl Into<String>, cron: CronExpr, job: Job) -> Self {
        let label = label.into();
        let token = CancellationToken::new();
        let handle = tokio::spawn(run_timer(label.clone(), cron, token.clone(), job));
        Trigger {
            label,
            cron,
            token,
            handle,
        }
    }

    pub fn cron(&self) -> &CronExpr {
        &self.cron
    }

    pub fn next_run(&self) -> Option<DateTime<Local>> {
        if self.is_cancelled() {
            return None;
        }
        self.cron.next_after(&Local::now())
    }

    /// Stops waiting for the next fire. Jobs already started keep running.
    pub fn cancel(&self) {
        debug!(trigger = %self.label, cron = %self.cron, "Cancelling trigger");
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled() || self.handle.is_finished()
    }
}

impl Drop for Trigger {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

async fn run_timer(label: String, cron: CronExpr, token: CancellationToken, job: Job) {
    let mut after = Local::now();
    loop {
        let Some(next) = cron.next_after(&after) else {
            warn!(trigger = %label, cron = %cron, "Expression never fires again, stopping trigger");
            return;
        };
        let wait = (next - Local::now()).to_std().unwrap_or_default();
        debug!(trigger = %label, next = %next, "Trigger armed");

        tokio::select! {
            _ = token.cancelled() => return,
            _ = tokio::time::sleep(wait) => {}
        }

        debug!(trigger = %label, "Trigger fired");
        tokio::spawn(job());
        after = next.max(Local::now());
    }
}

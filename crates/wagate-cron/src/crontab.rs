use crate::schedule::{Schedule, ScheduleError};
use chrono::{DateTime, Local, TimeZone};
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, PoisonError, RwLock, Weak};
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;

/// Tick period of the production ticker.
pub const TICK_PERIOD: Duration = Duration::from_secs(60);

type JobFn = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Clone)]
struct Job {
    expr: String,
    schedule: Schedule,
    run: JobFn,
}

#[derive(Default)]
struct JobTable {
    jobs: RwLock<Vec<Job>>,
}

impl JobTable {
    fn snapshot(&self) -> Vec<Job> {
        self.jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// A job table checked once per tick.
///
/// Matching jobs each run in their own task; a panicking job is logged and
/// never reaches the ticker or its siblings. Must be created inside a tokio
/// runtime.
pub struct Crontab {
    table: Arc<JobTable>,
    cancel: CancellationToken,
}

impl Crontab {
    pub fn new() -> Self {
        Self::with_period(TICK_PERIOD)
    }

    /// A crontab whose ticker fires every `period` instead of every minute.
    pub fn with_period(period: Duration) -> Self {
        let table = Arc::new(JobTable::default());
        let cancel = CancellationToken::new();
        tokio::spawn(run_ticker(Arc::downgrade(&table), period, cancel.clone()));
        Self { table, cancel }
    }

    /// Register `job` under the cron expression `expr`.
    pub fn add_job<F, Fut>(&self, expr: &str, job: F) -> Result<(), ScheduleError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let schedule: Schedule = expr.parse()?;
        let run: JobFn = Arc::new(move || job().boxed());
        self.table
            .jobs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Job {
                expr: expr.to_string(),
                schedule,
                run,
            });
        tracing::debug!(schedule = %expr, "cron job added");
        Ok(())
    }

    /// Register `job` with an argument captured now and cloned into every run.
    pub fn add_job_with<A, F, Fut>(&self, expr: &str, job: F, args: A) -> Result<(), ScheduleError>
    where
        A: Clone + Send + Sync + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.add_job(expr, move || job(args.clone()))
    }

    /// Like [`Crontab::add_job`], but a bad expression is a startup bug.
    ///
    /// # Panics
    ///
    /// When `expr` does not parse.
    pub fn must_add_job<F, Fut>(&self, expr: &str, job: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if let Err(e) = self.add_job(expr, job) {
            panic!("invalid cron schedule {expr:?}: {e}");
        }
    }

    /// Remove every job.
    pub fn clear(&self) {
        self.table
            .jobs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn len(&self) -> usize {
        self.table
            .jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop the ticker. Jobs already running are left alone.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Run every job once, ignoring schedules. Returns how many were started.
    pub fn run_all(&self) -> usize {
        let jobs = self.table.snapshot();
        for job in &jobs {
            spawn_job(job);
        }
        jobs.len()
    }

    /// Run the jobs whose schedule matches `at`. Returns how many were started.
    pub fn run_scheduled<Tz: TimeZone>(&self, at: &DateTime<Tz>) -> usize {
        run_matching(&self.table, at)
    }
}

impl Default for Crontab {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Crontab {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn run_matching<Tz: TimeZone>(table: &JobTable, at: &DateTime<Tz>) -> usize {
    let mut started = 0;
    for job in table.snapshot() {
        if job.schedule.matches_at(at) {
            spawn_job(&job);
            started += 1;
        }
    }
    started
}

fn spawn_job(job: &Job) {
    let run = job.run.clone();
    let expr = job.expr.clone();
    tokio::spawn(async move {
        if AssertUnwindSafe(async move { run().await })
            .catch_unwind()
            .await
            .is_err()
        {
            tracing::error!(schedule = %expr, "cron job panicked");
        }
    });
}

async fn run_ticker(table: Weak<JobTable>, period: Duration, cancel: CancellationToken) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let Some(table) = table.upgrade() else {
            break;
        };
        let started = run_matching(&table, &Local::now());
        tracing::trace!(started, "cron tick");
    }
    tracing::debug!("cron ticker stopped");
}

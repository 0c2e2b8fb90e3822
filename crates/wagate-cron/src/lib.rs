//! Minute-resolution job runner driven by five-field cron expressions.
//!
//! ```no_run
//! # async fn demo() -> Result<(), wagate_cron::ScheduleError> {
//! let cron = wagate_cron::Crontab::new();
//! cron.add_job("*/5 * * * *", || async { /* every five minutes */ })?;
//! # Ok(())
//! # }
//! ```

pub mod crontab;
pub mod schedule;

pub use crontab::{Crontab, TICK_PERIOD};
pub use schedule::{Field, Schedule, ScheduleError, Tick};

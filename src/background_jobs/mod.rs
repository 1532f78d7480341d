//! Background job scheduling and execution.
//!
//! Each enabled artifact family gets an interval job that runs its refresh
//! coordinator. Runs are persisted in the server store and can be listed or
//! triggered through [`SchedulerHandle`].

mod context;
mod handle;
mod job;
pub mod jobs;
mod scheduler;

pub use context::JobContext;
pub use handle::{JobInfo, JobRunInfo, JobScheduleInfo, SchedulerHandle};
pub use job::{BackgroundJob, JobError, JobSchedule, ShutdownBehavior};
pub use scheduler::{create_scheduler, JobScheduler};

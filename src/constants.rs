//! # System Constants
//!
//! Handler type tags, default values and lifecycle event names shared across
//! acquisition, execution and job declaration.

/// Handler type tags stored on each job and used to resolve its [`JobHandler`](crate::registry::JobHandler)
pub mod handler_types {
    pub const ASYNC_CONTINUATION: &str = "async-continuation";
    pub const EVENT: &str = "event";

    pub const TIMER_TRANSITION: &str = "timer-transition";
    pub const TIMER_INTERMEDIATE_TRANSITION: &str = "timer-intermediate-transition";
    pub const TIMER_START_EVENT: &str = "timer-start-event";
    pub const TIMER_START_EVENT_SUBPROCESS: &str = "timer-start-event-subprocess";
    pub const TIMER_TASK_LISTENER: &str = "timer-task-listener";
}

/// Defaults that are not part of the loadable configuration
pub mod defaults {
    /// Attempts made by the failure listener before giving up on optimistic locking conflicts
    pub const MAX_FAILURE_LISTENER_ATTEMPTS: u32 = 3;

    /// Upper bound on timers inspected when shortening an idle wait
    pub const DUE_TIMER_LOOKAHEAD: usize = 1;

    /// Jitter added to a contention backoff is at most this fraction of the backoff
    pub const BACKOFF_JITTER_RATIO: f64 = 0.5;

    /// Exception message recorded on jobs whose handler cannot run them at all
    pub const FATAL_FAILURE_PREFIX: &str = "Job cannot be executed";

    /// Lock held while a job is executed on demand, outside the executor
    pub const MANUAL_EXECUTION_LOCK_SECONDS: i64 = 300;
}

/// Lifecycle events emitted in structured logs
pub mod events {
    pub const JOB_ACQUIRED: &str = "job.acquired";
    pub const JOB_LOCK_FAILED: &str = "job.lock_failed";
    pub const JOB_EXECUTED: &str = "job.executed";
    pub const JOB_FAILED: &str = "job.failed";
    pub const JOB_RETRIES_EXHAUSTED: &str = "job.retries_exhausted";
    pub const JOB_REJECTED: &str = "job.rejected";
    pub const JOB_UNLOCKED: &str = "job.unlocked";
    pub const JOB_DELETED: &str = "job.deleted";
    pub const TIMER_REPEATED: &str = "timer.repeated";
}

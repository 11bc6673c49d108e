//! # Job Acquisition
//!
//! Finding and locking due jobs, pacing acquisition under idleness and lock
//! contention, and the loop tying both together.
//!
//! ## Components
//!
//! - [`AcquiredJobs`]: outcome of one lock request, grouped into batches
//! - [`JobAcquisitionContext`]: what happened during one cycle, across engines
//! - [`BackoffJobAcquisitionStrategy`]: idle and contention backoff levels
//! - [`SequentialJobAcquisitionRunnable`]: the acquisition loop itself
//! - [`AcquisitionSignal`]: wake-up and stop requests for the loop

pub mod acquire_jobs;
pub mod acquired_jobs;
pub mod context;
pub mod runnable;
pub mod signal;
pub mod strategy;

pub use acquire_jobs::{group_into_batches, lock_due_jobs};
pub use acquired_jobs::AcquiredJobs;
pub use context::JobAcquisitionContext;
pub use runnable::{AcquisitionState, SequentialJobAcquisitionRunnable, SharedAcquisitionState};
pub use signal::AcquisitionSignal;
pub use strategy::{BackoffJobAcquisitionStrategy, JobAcquisitionStrategy};

#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Tasker Job Executor
//!
//! Asynchronous job acquisition and execution core for workflow and case engines.
//!
//! ## Overview
//!
//! Process and case executions leave background work behind: timers, asynchronous
//! continuations and event subscriptions. This crate discovers that work once it is
//! due, spreads it across any number of acquiring nodes without running a job
//! twice, executes it on a bounded worker pool and recovers from failures through
//! retries and adaptive backoff.
//!
//! ## Architecture
//!
//! ```text
//! JobExecutor
//! ├── acquisition loop ──► JobStore::lock ──► AcquiredJobs (batches)
//! │        ▲                                        │
//! │        └── BackoffJobAcquisitionStrategy ◄──────┤ JobAcquisitionContext
//! │                                                 ▼
//! └── BoundedWorkerPool ──► ExecuteJobsRunnable ──► JobHandler ──► success / failure listener
//! ```
//!
//! Mutual exclusion between nodes rests entirely on revision-checked updates in
//! the [`store::JobStore`]; a node that loses a lock race counts it and backs off.
//!
//! ## Module Organization
//!
//! - [`acquisition`] - Locking due jobs, pacing, the acquisition loop
//! - [`calendar`] - ISO 8601 dates, durations and repeating intervals
//! - [`config`] - Layered configuration loading and validation
//! - [`declaration`] - Definition-time job declarations and job creation
//! - [`engine`] - Process engines and their job management operations
//! - [`execution`] - Worker pool, batch runners, retries, listeners
//! - [`executor`] - The [`JobExecutor`] entry point
//! - [`models`] - Jobs, job definitions and creation contexts
//! - [`registry`] - Job handler registration and lookup
//! - [`store`] - Job persistence interface with in-memory and PostgreSQL stores
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tasker_job_executor::config::ConfigManager;
//! use tasker_job_executor::engine::ProcessEngine;
//! use tasker_job_executor::executor::JobExecutor;
//! use tasker_job_executor::store::InMemoryJobStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! tasker_job_executor::logging::init_structured_logging();
//! let manager = ConfigManager::load()?;
//!
//! let executor = JobExecutor::builder(manager.config().clone()).build()?;
//! let engine = ProcessEngine::builder("default")
//!     .store(Arc::new(InMemoryJobStore::new()))
//!     .build()?;
//! executor.register_engine(Arc::new(engine))?;
//! executor.start()?;
//! # Ok(())
//! # }
//! ```

pub mod acquisition;
pub mod calendar;
pub mod config;
pub mod constants;
pub mod declaration;
pub mod engine;
pub mod error;
pub mod execution;
pub mod executor;
pub mod logging;
pub mod models;
pub mod registry;
pub mod store;
pub mod utils;

pub use acquisition::{AcquiredJobs, BackoffJobAcquisitionStrategy, JobAcquisitionContext};
pub use config::{ConfigManager, JobExecutorConfig};
pub use declaration::JobDeclaration;
pub use engine::ProcessEngine;
pub use error::{ExecutorError, HandlerError, Result};
pub use execution::JobExecutionContext;
pub use executor::JobExecutor;
pub use models::{Job, JobId, JobType};
pub use registry::{JobHandler, JobHandlerRegistry};
pub use store::{InMemoryJobStore, JobStore};

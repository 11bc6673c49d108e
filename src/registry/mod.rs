//! # Registry Infrastructure
//!
//! Lookup of job handlers by their type tag.
//!
//! ## Usage
//!
//! ```rust
//! use tasker_job_executor::registry::JobHandlerRegistry;
//!
//! let registry = JobHandlerRegistry::new();
//! assert!(registry.resolve("async-continuation").is_err());
//! ```

pub mod handler_registry;

pub use handler_registry::{JobHandler, JobHandlerRegistry};

//! # Data Models
//!
//! Jobs, job definitions and the contexts jobs are created in.

pub mod execution;
pub mod job;
pub mod job_definition;

pub use execution::{CreationContext, EventSubscription, Execution, ProcessDefinitionContext};
pub use job::{Job, JobId, JobType};
pub use job_definition::JobDefinition;

//! # Job Declarations
//!
//! Definition-time descriptions of the jobs an activity creates. A declaration is
//! built once when a definition is deployed and then instantiated for every
//! execution (or event subscription) that reaches the activity.
//!
//! All variants share one creation pipeline in [`JobDeclaration::create_job_instance`];
//! only the job instance, the handler type and the handler configuration differ.

pub mod timer;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::calendar::BusinessCalendarManager;
use crate::config::JobExecutorConfig;
use crate::constants::handler_types;
use crate::error::{ExecutorError, Result};
use crate::models::{CreationContext, Job, JobDefinition, JobType};

pub use timer::{
    apply_due_date_change, next_timer_occurrence, TimerDeclaration, TimerExpression,
    TimerJobConfiguration, TimerJobHandlerType, TimerKind, TimerSchedule,
};

/// Engine-wide inputs to job creation
#[derive(Debug, Clone)]
pub struct JobCreationSettings {
    pub default_retries: i32,
    pub ensure_due_date_not_null: bool,
    pub calendars: Arc<BusinessCalendarManager>,
}

impl Default for JobCreationSettings {
    fn default() -> Self {
        Self {
            default_retries: 3,
            ensure_due_date_not_null: false,
            calendars: Arc::new(BusinessCalendarManager::default()),
        }
    }
}

impl JobCreationSettings {
    pub fn from_config(config: &JobExecutorConfig) -> Self {
        Self {
            default_retries: config.jobs.default_retries,
            ensure_due_date_not_null: config.acquisition.ensure_job_due_date_not_null,
            calendars: Arc::new(BusinessCalendarManager::default()),
        }
    }

    pub fn with_calendars(mut self, calendars: BusinessCalendarManager) -> Self {
        self.calendars = Arc::new(calendars);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PriorityProvider {
    Default,
    Constant(i64),
    /// Name of an execution variable holding an integer priority
    Variable(String),
}

impl PriorityProvider {
    pub fn determine_priority<S: CreationContext + ?Sized>(&self, ctx: &S) -> Result<i64> {
        match self {
            PriorityProvider::Default => Ok(0),
            PriorityProvider::Constant(priority) => Ok(*priority),
            PriorityProvider::Variable(name) => {
                let value = ctx.variable(name).ok_or_else(|| {
                    ExecutorError::Configuration(format!(
                        "Job priority variable '{name}' is not set"
                    ))
                })?;
                value.as_i64().ok_or_else(|| {
                    ExecutorError::Configuration(format!(
                        "Job priority variable '{name}' is not an integer: {value}"
                    ))
                })
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContinuationPosition {
    Before,
    After,
}

/// Handler configuration stored on async continuation jobs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AsyncContinuationConfiguration {
    pub activity_id: String,
    pub position: ContinuationPosition,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeclarationKind {
    AsyncContinuation { position: ContinuationPosition },
    EventSubscription { event_type: String },
    Timer(TimerDeclaration),
}

#[derive(Debug, Clone, PartialEq)]
pub struct JobDeclaration {
    pub activity_id: String,
    pub job_definition: Option<JobDefinition>,
    pub exclusive: bool,
    pub priority: PriorityProvider,
    pub tenant_id: Option<String>,
    pub kind: DeclarationKind,
}

impl JobDeclaration {
    fn new(activity_id: impl Into<String>, kind: DeclarationKind) -> Self {
        Self {
            activity_id: activity_id.into(),
            job_definition: None,
            exclusive: true,
            priority: PriorityProvider::Default,
            tenant_id: None,
            kind,
        }
    }

    pub fn async_continuation(activity_id: impl Into<String>, position: ContinuationPosition) -> Self {
        Self::new(activity_id, DeclarationKind::AsyncContinuation { position })
    }

    pub fn event_subscription(activity_id: impl Into<String>, event_type: impl Into<String>) -> Self {
        Self::new(
            activity_id,
            DeclarationKind::EventSubscription {
                event_type: event_type.into(),
            },
        )
    }

    pub fn timer(activity_id: impl Into<String>, timer: TimerDeclaration) -> Self {
        Self::new(activity_id, DeclarationKind::Timer(timer))
    }

    pub fn with_job_definition(mut self, job_definition: JobDefinition) -> Self {
        self.job_definition = Some(job_definition);
        self
    }

    pub fn with_exclusive(mut self, exclusive: bool) -> Self {
        self.exclusive = exclusive;
        self
    }

    pub fn with_priority(mut self, priority: PriorityProvider) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    pub fn job_type(&self) -> JobType {
        match self.kind {
            DeclarationKind::Timer(_) => JobType::Timer,
            _ => JobType::Message,
        }
    }

    pub fn handler_type(&self) -> &'static str {
        match &self.kind {
            DeclarationKind::AsyncContinuation { .. } => handler_types::ASYNC_CONTINUATION,
            DeclarationKind::EventSubscription { .. } => handler_types::EVENT,
            DeclarationKind::Timer(timer) => timer.handler.as_str(),
        }
    }

    /// Build a new job for `ctx`. The job is not persisted.
    pub fn create_job_instance<S: CreationContext + ?Sized>(
        &self,
        ctx: &S,
        settings: &JobCreationSettings,
        now: DateTime<Utc>,
    ) -> Result<Job> {
        let mut job = self.new_job_instance(ctx, settings, now)?;

        if let Some(definition) = &self.job_definition {
            job.job_definition_id = Some(definition.id.clone());
            job.suspended = definition.suspended;
        }

        job.handler_configuration = Some(self.resolve_handler_configuration(ctx)?);
        job.exclusive = self.exclusive;
        job.set_retries(settings.default_retries);

        if job.due_date.is_none() && settings.ensure_due_date_not_null {
            job.due_date = Some(now);
        }

        job.priority = match self
            .job_definition
            .as_ref()
            .and_then(|definition| definition.overriding_job_priority)
        {
            Some(priority) => priority,
            None => self.priority.determine_priority(ctx)?,
        };

        job.tenant_id = ctx
            .tenant_id()
            .map(str::to_string)
            .or_else(|| self.tenant_id.clone())
            .or_else(|| {
                self.job_definition
                    .as_ref()
                    .and_then(|definition| definition.tenant_id.clone())
            });

        if let Some(execution) = ctx.execution() {
            job.execution_id = Some(execution.id.clone());
            job.process_instance_id = Some(execution.process_instance_id.clone());
        }
        if ctx.is_suspended() {
            job.suspended = true;
        }
        job.process_definition_id = ctx.process_definition_id().map(str::to_string);
        job.deployment_id = ctx.deployment_id().map(str::to_string);
        job.activity_id = Some(self.activity_id.clone());

        Ok(job)
    }

    /// Re-derive the mutable part of an existing job: due date and series for timers,
    /// handler configuration for everything else.
    ///
    /// `creation_date_based` recalculates timers relative to the job's creation time
    /// instead of `now`.
    pub fn reconfigure<S: CreationContext + ?Sized>(
        &self,
        ctx: &S,
        job: &mut Job,
        settings: &JobCreationSettings,
        now: DateTime<Utc>,
        creation_date_based: bool,
    ) -> Result<()> {
        match &self.kind {
            DeclarationKind::Timer(timer) => {
                let base = if creation_date_based {
                    job.create_time
                } else {
                    now
                };
                let schedule = timer.schedule(ctx, &settings.calendars, base)?;
                job.due_date = Some(schedule.due_date);
                if schedule.repeat.is_some() {
                    job.repeat = schedule.repeat;
                }
            }
            _ => {
                job.handler_configuration = Some(self.resolve_handler_configuration(ctx)?);
            }
        }
        Ok(())
    }

    fn new_job_instance<S: CreationContext + ?Sized>(
        &self,
        ctx: &S,
        settings: &JobCreationSettings,
        now: DateTime<Utc>,
    ) -> Result<Job> {
        match &self.kind {
            DeclarationKind::Timer(timer) => {
                let schedule = timer.schedule(ctx, &settings.calendars, now)?;
                let mut job = Job::timer(
                    self.handler_type(),
                    settings.default_retries,
                    schedule.due_date,
                    now,
                );
                job.repeat = schedule.repeat;
                Ok(job)
            }
            _ => Ok(Job::message(self.handler_type(), settings.default_retries, now)),
        }
    }

    fn resolve_handler_configuration<S: CreationContext + ?Sized>(&self, ctx: &S) -> Result<String> {
        match &self.kind {
            DeclarationKind::AsyncContinuation { position } => {
                Ok(serde_json::to_string(&AsyncContinuationConfiguration {
                    activity_id: self.activity_id.clone(),
                    position: *position,
                })?)
            }
            DeclarationKind::EventSubscription { event_type } => {
                let subscription = ctx.event_subscription().ok_or_else(|| {
                    ExecutorError::Configuration(format!(
                        "Event job for activity '{}' needs an event subscription context",
                        self.activity_id
                    ))
                })?;
                if &subscription.event_type != event_type {
                    return Err(ExecutorError::Configuration(format!(
                        "Event subscription '{}' is of type '{}', expected '{}'",
                        subscription.id, subscription.event_type, event_type
                    )));
                }
                Ok(subscription.id.clone())
            }
            DeclarationKind::Timer(timer) => {
                Ok(serde_json::to_string(&timer.configuration(&self.activity_id))?)
            }
        }
    }
}

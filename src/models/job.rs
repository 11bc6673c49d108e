//! # Job Model
//!
//! A persisted unit of asynchronous work. Jobs are created by a [`JobDeclaration`](crate::declaration::JobDeclaration),
//! locked by the acquisition loop, executed by a [`JobHandler`](crate::registry::JobHandler)
//! and deleted on success.
//!
//! Lock state is expressed through `lock_owner` and `lock_expiration_time`: a job
//! whose lock has expired is acquirable again. `revision` guards every update.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub type JobId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Message,
    Timer,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Message => "message",
            JobType::Timer => "timer",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "message" => Some(JobType::Message),
            "timer" => Some(JobType::Timer),
            _ => None,
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub revision: i32,
    pub job_type: JobType,
    pub handler_type: String,
    pub handler_configuration: Option<String>,
    pub due_date: Option<DateTime<Utc>>,
    pub retries: i32,
    pub lock_owner: Option<String>,
    pub lock_expiration_time: Option<DateTime<Utc>>,
    pub exclusive: bool,
    pub priority: i64,
    pub suspended: bool,
    pub exception_message: Option<String>,
    pub exception_details: Option<String>,
    pub tenant_id: Option<String>,
    pub process_instance_id: Option<String>,
    pub execution_id: Option<String>,
    pub process_definition_id: Option<String>,
    pub activity_id: Option<String>,
    pub deployment_id: Option<String>,
    pub job_definition_id: Option<String>,
    pub create_time: DateTime<Utc>,
    pub sequence_counter: i64,
    /// Remaining repeat specification of a cyclic timer, anchored at this job's scheduled time
    pub repeat: Option<String>,
    /// Accumulated shift applied to this and following occurrences of a cyclic timer
    pub repeat_offset_ms: i64,
}

impl Job {
    pub fn new(
        job_type: JobType,
        handler_type: impl Into<String>,
        retries: i32,
        create_time: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            revision: 1,
            job_type,
            handler_type: handler_type.into(),
            handler_configuration: None,
            due_date: None,
            retries: retries.max(0),
            lock_owner: None,
            lock_expiration_time: None,
            exclusive: true,
            priority: 0,
            suspended: false,
            exception_message: None,
            exception_details: None,
            tenant_id: None,
            process_instance_id: None,
            execution_id: None,
            process_definition_id: None,
            activity_id: None,
            deployment_id: None,
            job_definition_id: None,
            create_time,
            sequence_counter: 1,
            repeat: None,
            repeat_offset_ms: 0,
        }
    }

    pub fn message(handler_type: impl Into<String>, retries: i32, now: DateTime<Utc>) -> Self {
        Self::new(JobType::Message, handler_type, retries, now)
    }

    pub fn timer(
        handler_type: impl Into<String>,
        retries: i32,
        due_date: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self::new(JobType::Timer, handler_type, retries, now).with_due_date(due_date)
    }

    pub fn with_configuration(mut self, configuration: impl Into<String>) -> Self {
        self.handler_configuration = Some(configuration.into());
        self
    }

    pub fn with_due_date(mut self, due_date: DateTime<Utc>) -> Self {
        self.due_date = Some(due_date);
        self
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_exclusive(mut self, exclusive: bool) -> Self {
        self.exclusive = exclusive;
        self
    }

    pub fn with_process_instance(mut self, process_instance_id: impl Into<String>) -> Self {
        self.process_instance_id = Some(process_instance_id.into());
        self
    }

    pub fn with_suspended(mut self, suspended: bool) -> Self {
        self.suspended = suspended;
        self
    }

    pub fn is_locked_at(&self, now: DateTime<Utc>) -> bool {
        self.lock_owner.is_some() && self.lock_expiration_time.is_some_and(|until| until > now)
    }

    pub fn is_due_at(&self, now: DateTime<Utc>) -> bool {
        self.due_date.map_or(true, |due| due <= now)
    }

    /// Due, unlocked (or lock expired), not suspended and with retries left
    pub fn is_acquirable_at(&self, now: DateTime<Utc>) -> bool {
        !self.suspended && self.retries > 0 && self.is_due_at(now) && !self.is_locked_at(now)
    }

    pub fn is_locked_by(&self, owner: &str) -> bool {
        self.lock_owner.as_deref() == Some(owner)
    }

    pub fn lock(&mut self, owner: impl Into<String>, until: DateTime<Utc>) {
        self.lock_owner = Some(owner.into());
        self.lock_expiration_time = Some(until);
    }

    pub fn unlock(&mut self) {
        self.lock_owner = None;
        self.lock_expiration_time = None;
    }

    /// Exactly one of owner and expiration is set, or a job without retries is still locked
    pub fn is_in_inconsistent_lock_state(&self) -> bool {
        let has_lock = self.lock_owner.is_some() || self.lock_expiration_time.is_some();
        self.lock_owner.is_some() != self.lock_expiration_time.is_some()
            || (self.retries == 0 && has_lock)
    }

    /// Retries never go below zero
    pub fn set_retries(&mut self, retries: i32) {
        self.retries = retries.max(0);
    }

    pub fn set_exception(&mut self, message: impl Into<String>, details: Option<String>) {
        self.exception_message = Some(message.into());
        self.exception_details = details;
    }

    /// Out of retries after at least one recorded failure
    pub fn is_dead(&self) -> bool {
        self.retries == 0 && self.exception_message.is_some()
    }

    pub fn increment_sequence_counter(&mut self) {
        self.sequence_counter += 1;
    }

    pub fn is_exclusive_in_instance(&self) -> bool {
        self.exclusive && self.process_instance_id.is_some()
    }

    /// Exclusive, part of `process_instance_id` and holding a lock that has not expired
    pub fn holds_exclusive_lock_in(&self, process_instance_id: &str, now: DateTime<Utc>) -> bool {
        self.exclusive
            && self.process_instance_id.as_deref() == Some(process_instance_id)
            && self.is_locked_at(now)
    }

    /// Both jobs belong to the same known process instance
    pub fn is_in_same_process_instance(&self, other: &Job) -> bool {
        match (&self.process_instance_id, &other.process_instance_id) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }
}

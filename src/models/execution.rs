//! Creation contexts a job declaration can be evaluated against.
//!
//! A [`CreationContext`] supplies the identifiers copied onto a new job and the
//! variables used to resolve priority and timer expressions.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Snapshot of a running execution as seen by job creation
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Execution {
    pub id: String,
    pub process_instance_id: String,
    pub process_definition_id: Option<String>,
    pub activity_id: Option<String>,
    pub tenant_id: Option<String>,
    pub deployment_id: Option<String>,
    pub suspended: bool,
    pub variables: Map<String, Value>,
}

impl Execution {
    pub fn new(id: impl Into<String>, process_instance_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            process_instance_id: process_instance_id.into(),
            ..Default::default()
        }
    }

    pub fn with_process_definition(mut self, process_definition_id: impl Into<String>) -> Self {
        self.process_definition_id = Some(process_definition_id.into());
        self
    }

    pub fn with_activity(mut self, activity_id: impl Into<String>) -> Self {
        self.activity_id = Some(activity_id.into());
        self
    }

    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    pub fn with_deployment(mut self, deployment_id: impl Into<String>) -> Self {
        self.deployment_id = Some(deployment_id.into());
        self
    }

    pub fn suspended(mut self) -> Self {
        self.suspended = true;
        self
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    pub fn variable(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }
}

/// Event subscription whose trigger is delivered asynchronously
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventSubscription {
    pub id: String,
    pub event_type: String,
    pub event_name: Option<String>,
    pub activity_id: String,
    pub execution: Execution,
}

impl EventSubscription {
    pub fn new(
        id: impl Into<String>,
        event_type: impl Into<String>,
        activity_id: impl Into<String>,
        execution: Execution,
    ) -> Self {
        Self {
            id: id.into(),
            event_type: event_type.into(),
            event_name: None,
            activity_id: activity_id.into(),
            execution,
        }
    }

    pub fn with_event_name(mut self, event_name: impl Into<String>) -> Self {
        self.event_name = Some(event_name.into());
        self
    }
}

/// Deployment-level context for jobs that exist before any execution, such as start timers
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProcessDefinitionContext {
    pub process_definition_id: String,
    pub deployment_id: Option<String>,
    pub tenant_id: Option<String>,
}

impl ProcessDefinitionContext {
    pub fn new(process_definition_id: impl Into<String>) -> Self {
        Self {
            process_definition_id: process_definition_id.into(),
            ..Default::default()
        }
    }
}

pub trait CreationContext: Send + Sync {
    fn execution(&self) -> Option<&Execution>;

    fn event_subscription(&self) -> Option<&EventSubscription> {
        None
    }

    fn process_instance_id(&self) -> Option<&str> {
        self.execution().map(|e| e.process_instance_id.as_str())
    }

    fn process_definition_id(&self) -> Option<&str> {
        self.execution()
            .and_then(|e| e.process_definition_id.as_deref())
    }

    fn deployment_id(&self) -> Option<&str> {
        self.execution().and_then(|e| e.deployment_id.as_deref())
    }

    fn tenant_id(&self) -> Option<&str> {
        self.execution().and_then(|e| e.tenant_id.as_deref())
    }

    fn variable(&self, name: &str) -> Option<&Value> {
        self.execution().and_then(|e| e.variable(name))
    }

    fn is_suspended(&self) -> bool {
        self.execution().is_some_and(|e| e.suspended)
    }
}

impl CreationContext for Execution {
    fn execution(&self) -> Option<&Execution> {
        Some(self)
    }
}

impl CreationContext for EventSubscription {
    fn execution(&self) -> Option<&Execution> {
        Some(&self.execution)
    }

    fn event_subscription(&self) -> Option<&EventSubscription> {
        Some(self)
    }
}

impl CreationContext for ProcessDefinitionContext {
    fn execution(&self) -> Option<&Execution> {
        None
    }

    fn process_definition_id(&self) -> Option<&str> {
        Some(&self.process_definition_id)
    }

    fn deployment_id(&self) -> Option<&str> {
        self.deployment_id.as_deref()
    }

    fn tenant_id(&self) -> Option<&str> {
        self.tenant_id.as_deref()
    }
}

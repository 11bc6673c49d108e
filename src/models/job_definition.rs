use serde::{Deserialize, Serialize};

/// Per-activity job settings shared by every job a declaration creates.
///
/// Suspension and an overriding priority set here win over declaration defaults
/// at creation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDefinition {
    pub id: String,
    pub activity_id: String,
    pub handler_type: String,
    pub job_configuration: Option<String>,
    pub suspended: bool,
    pub overriding_job_priority: Option<i64>,
    pub tenant_id: Option<String>,
}

impl JobDefinition {
    pub fn new(
        id: impl Into<String>,
        activity_id: impl Into<String>,
        handler_type: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            activity_id: activity_id.into(),
            handler_type: handler_type.into(),
            job_configuration: None,
            suspended: false,
            overriding_job_priority: None,
            tenant_id: None,
        }
    }

    pub fn suspended(mut self) -> Self {
        self.suspended = true;
        self
    }

    pub fn with_overriding_priority(mut self, priority: i64) -> Self {
        self.overriding_job_priority = Some(priority);
        self
    }

    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }
}

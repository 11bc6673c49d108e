//! # Job Handler Registry
//!
//! Maps handler type tags (`"async-continuation"`, `"timer-transition"`, ...) to the
//! [`JobHandler`] that executes jobs of that type. Registration is validated up front:
//! an empty tag or a tag that is already taken is rejected, so resolution at
//! execution time only fails for jobs whose type was never registered.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::error::{ExecutorError, HandlerError, Result};
use crate::execution::JobExecutionContext;
use crate::models::Job;

#[async_trait]
pub trait JobHandler: Send + Sync {
    fn handler_type(&self) -> &str;

    /// Parse the stored configuration string. The default accepts JSON, falls back
    /// to a plain string value, and maps a missing configuration to `null`.
    fn parse_configuration(&self, raw: Option<&str>) -> std::result::Result<Value, HandlerError> {
        match raw {
            None => Ok(Value::Null),
            Some(text) => {
                Ok(serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string())))
            }
        }
    }

    async fn execute(
        &self,
        configuration: &Value,
        context: &mut JobExecutionContext,
    ) -> std::result::Result<(), HandlerError>;

    /// Called once a job is gone for good: after a successful execution has been
    /// committed, or when the job is deleted by hand
    fn on_delete(&self, _configuration: &Value, _job: &Job) {}
}

#[derive(Default)]
pub struct JobHandlerRegistry {
    handlers: DashMap<String, Arc<dyn JobHandler>>,
}

impl fmt::Debug for JobHandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobHandlerRegistry")
            .field("handler_types", &self.handler_types())
            .finish()
    }
}

impl JobHandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, handler: Arc<dyn JobHandler>) -> Result<()> {
        let handler_type = handler.handler_type().trim().to_string();
        if handler_type.is_empty() {
            return Err(ExecutorError::Registration(
                "handler type must not be empty".to_string(),
            ));
        }

        match self.handlers.entry(handler_type.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(ExecutorError::Registration(
                format!("handler type '{handler_type}' is already registered"),
            )),
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(handler);
                debug!(handler_type = %handler_type, "Registered job handler");
                Ok(())
            }
        }
    }

    pub fn resolve(&self, handler_type: &str) -> Result<Arc<dyn JobHandler>> {
        self.handlers
            .get(handler_type)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| ExecutorError::UnknownHandler(handler_type.to_string()))
    }

    pub fn contains(&self, handler_type: &str) -> bool {
        self.handlers.contains_key(handler_type)
    }

    /// Registered tags, sorted
    pub fn handler_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.iter().map(|e| e.key().clone()).collect();
        types.sort();
        types
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopHandler(&'static str);

    #[async_trait]
    impl JobHandler for NoopHandler {
        fn handler_type(&self) -> &str {
            self.0
        }

        async fn execute(
            &self,
            _configuration: &Value,
            _context: &mut JobExecutionContext,
        ) -> std::result::Result<(), HandlerError> {
            Ok(())
        }
    }

    #[test]
    fn test_register_and_resolve() {
        let registry = JobHandlerRegistry::new();
        registry.register(Arc::new(NoopHandler("event"))).unwrap();
        registry
            .register(Arc::new(NoopHandler("async-continuation")))
            .unwrap();

        assert_eq!(registry.len(), 2);
        assert!(registry.contains("event"));
        assert_eq!(registry.resolve("event").unwrap().handler_type(), "event");
        assert_eq!(
            registry.handler_types(),
            vec!["async-continuation".to_string(), "event".to_string()]
        );
    }

    #[test]
    fn test_rejects_duplicate_and_empty_types() {
        let registry = JobHandlerRegistry::new();
        registry.register(Arc::new(NoopHandler("event"))).unwrap();

        assert!(matches!(
            registry.register(Arc::new(NoopHandler("event"))),
            Err(ExecutorError::Registration(_))
        ));
        assert!(matches!(
            registry.register(Arc::new(NoopHandler("  "))),
            Err(ExecutorError::Registration(_))
        ));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unknown_type_is_fatal() {
        let registry = JobHandlerRegistry::new();
        let error = registry.resolve("missing").err().unwrap();
        assert_eq!(error, ExecutorError::UnknownHandler("missing".to_string()));
        assert!(error.is_fatal());
    }

    #[test]
    fn test_default_configuration_parsing() {
        let handler = NoopHandler("event");
        assert_eq!(handler.parse_configuration(None).unwrap(), Value::Null);
        assert_eq!(
            handler.parse_configuration(Some(r#"{"activity_id":"a"}"#)).unwrap()["activity_id"],
            "a"
        );
        assert_eq!(
            handler.parse_configuration(Some("subscription-1")).unwrap(),
            Value::String("subscription-1".to_string())
        );
    }
}

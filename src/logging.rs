//! # Structured Logging Module
//!
//! Environment-aware structured logging for the acquisition loop and job workers.
//! Console output by default, JSON lines when `TASKER_LOG_FORMAT=json`.

use chrono::Utc;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};
use uuid::Uuid;

use crate::config::ConfigManager;

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging with environment-specific configuration
///
/// `RUST_LOG` wins over the environment default when present.
pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = ConfigManager::detect_environment();
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(get_log_level(&environment)));
        let json = std::env::var("TASKER_LOG_FORMAT")
            .map(|format| format.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let layer = if json {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_ansi(false)
                .json()
                .with_filter(filter)
                .boxed()
        } else {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_ansi(true)
                .with_filter(filter)
                .boxed()
        };

        // Use try_init to avoid panic if a global subscriber is already set
        if tracing_subscriber::registry().with(layer).try_init().is_err() {
            tracing::debug!(
                "Global tracing subscriber already initialized - continuing with existing subscriber"
            );
        }

        tracing::info!(
            pid = std::process::id(),
            environment = %environment,
            json = json,
            "🔧 STRUCTURED LOGGING: Initialized"
        );
    });
}

/// Get log level based on environment
fn get_log_level(environment: &str) -> &'static str {
    match environment {
        "production" => "info",
        "test" => "warn",
        _ => "debug",
    }
}

/// Log structured data for job operations
pub fn log_job_operation(
    operation: &str,
    engine: &str,
    job_id: Option<Uuid>,
    handler_type: Option<&str>,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        engine = %engine,
        job_id = job_id.map(|id| id.to_string()),
        handler_type = handler_type,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "🔧 JOB_OPERATION"
    );
}

/// Log the outcome of one acquisition cycle
pub fn log_acquisition_cycle(
    engines: usize,
    acquired: usize,
    failed_to_lock: usize,
    rejected_batches: usize,
    wait_ms: u64,
) {
    tracing::debug!(
        engines = engines,
        acquired = acquired,
        failed_to_lock = failed_to_lock,
        rejected_batches = rejected_batches,
        wait_ms = wait_ms,
        timestamp = %Utc::now().to_rfc3339(),
        "📋 ACQUISITION_CYCLE"
    );
}

/// Log error with full context
pub fn log_error(component: &str, operation: &str, error: &str, context: Option<&str>) {
    tracing::error!(
        component = %component,
        operation = %operation,
        error = %error,
        context = context,
        timestamp = %Utc::now().to_rfc3339(),
        "❌ ERROR"
    );
}

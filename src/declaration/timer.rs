//! Timer declarations and repeating timer series.
//!
//! A repeating timer never reschedules itself. Each firing chains a new job for the
//! next occurrence; `repeat` on the job holds the rest of the series anchored at the
//! job's own (unshifted) occurrence time, and `repeat_offset_ms` carries manual shifts
//! that should apply to every following occurrence.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::calendar::{
    BusinessCalendarManager, RepeatingInterval, CYCLE_CALENDAR, DUE_DATE_CALENDAR,
    DURATION_CALENDAR,
};
use crate::constants::handler_types;
use crate::error::{ExecutorError, Result};
use crate::models::{CreationContext, Job};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerKind {
    Date,
    Duration,
    Cycle,
}

impl TimerKind {
    pub fn calendar_name(&self) -> &'static str {
        match self {
            TimerKind::Date => DUE_DATE_CALENDAR,
            TimerKind::Duration => DURATION_CALENDAR,
            TimerKind::Cycle => CYCLE_CALENDAR,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TimerExpression {
    Literal(String),
    /// Name of an execution variable holding the expression
    Variable(String),
}

impl TimerExpression {
    pub fn resolve<S: CreationContext + ?Sized>(&self, ctx: &S) -> Result<String> {
        match self {
            TimerExpression::Literal(text) => Ok(text.clone()),
            TimerExpression::Variable(name) => match ctx.variable(name) {
                Some(serde_json::Value::String(text)) => Ok(text.clone()),
                Some(other) => Err(ExecutorError::InvalidTimer {
                    expression: other.to_string(),
                    reason: format!("variable '{name}' does not hold a timer expression"),
                }),
                None => Err(ExecutorError::InvalidTimer {
                    expression: format!("${{{name}}}"),
                    reason: "variable is not set".to_string(),
                }),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerJobHandlerType {
    Transition,
    IntermediateTransition,
    StartEvent,
    StartEventSubprocess,
    TaskListener,
}

impl TimerJobHandlerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimerJobHandlerType::Transition => handler_types::TIMER_TRANSITION,
            TimerJobHandlerType::IntermediateTransition => {
                handler_types::TIMER_INTERMEDIATE_TRANSITION
            }
            TimerJobHandlerType::StartEvent => handler_types::TIMER_START_EVENT,
            TimerJobHandlerType::StartEventSubprocess => {
                handler_types::TIMER_START_EVENT_SUBPROCESS
            }
            TimerJobHandlerType::TaskListener => handler_types::TIMER_TASK_LISTENER,
        }
    }
}

/// Handler configuration stored on timer jobs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimerJobConfiguration {
    pub activity_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_listener_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimerDeclaration {
    pub kind: TimerKind,
    pub expression: TimerExpression,
    pub handler: TimerJobHandlerType,
    pub task_listener_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimerSchedule {
    pub due_date: DateTime<Utc>,
    pub repeat: Option<String>,
}

impl TimerDeclaration {
    pub fn new(kind: TimerKind, expression: TimerExpression, handler: TimerJobHandlerType) -> Self {
        Self {
            kind,
            expression,
            handler,
            task_listener_id: None,
        }
    }

    pub fn date(expression: impl Into<String>) -> Self {
        Self::new(
            TimerKind::Date,
            TimerExpression::Literal(expression.into()),
            TimerJobHandlerType::Transition,
        )
    }

    pub fn duration(expression: impl Into<String>) -> Self {
        Self::new(
            TimerKind::Duration,
            TimerExpression::Literal(expression.into()),
            TimerJobHandlerType::Transition,
        )
    }

    pub fn cycle(expression: impl Into<String>) -> Self {
        Self::new(
            TimerKind::Cycle,
            TimerExpression::Literal(expression.into()),
            TimerJobHandlerType::Transition,
        )
    }

    pub fn with_handler(mut self, handler: TimerJobHandlerType) -> Self {
        self.handler = handler;
        self
    }

    pub fn with_task_listener(mut self, task_listener_id: impl Into<String>) -> Self {
        self.handler = TimerJobHandlerType::TaskListener;
        self.task_listener_id = Some(task_listener_id.into());
        self
    }

    pub fn is_repeating(&self) -> bool {
        self.kind == TimerKind::Cycle
    }

    /// Resolve the due date relative to `base`, plus the anchored series for cycles
    pub fn schedule<S: CreationContext + ?Sized>(
        &self,
        ctx: &S,
        calendars: &BusinessCalendarManager,
        base: DateTime<Utc>,
    ) -> Result<TimerSchedule> {
        let expression = self.expression.resolve(ctx)?;
        let due_date = calendars
            .get(self.kind.calendar_name())?
            .resolve_due_date(&expression, base)?;

        let repeat = if self.is_repeating() {
            let interval = RepeatingInterval::parse(&expression)?;
            let (_, remaining) = interval.first_occurrence(base)?;
            Some(interval.anchored_at(due_date, remaining).to_expression())
        } else {
            None
        };

        Ok(TimerSchedule { due_date, repeat })
    }

    pub fn configuration(&self, activity_id: &str) -> TimerJobConfiguration {
        TimerJobConfiguration {
            activity_id: activity_id.to_string(),
            task_listener_id: self.task_listener_id.clone(),
        }
    }
}

/// Job for the occurrence after `fired`, or `None` when the series is complete.
///
/// The successor is due at its scheduled occurrence plus the accumulated repeat offset.
pub fn next_timer_occurrence(
    fired: &Job,
    default_retries: i32,
    now: DateTime<Utc>,
) -> Result<Option<Job>> {
    let Some(repeat) = fired.repeat.as_deref() else {
        return Ok(None);
    };
    let Some(next) = RepeatingInterval::parse(repeat)?.next()? else {
        return Ok(None);
    };
    let Some(scheduled) = next.start else {
        return Ok(None);
    };

    let mut successor = fired.clone();
    successor.id = Uuid::new_v4();
    successor.revision = 1;
    successor.sequence_counter = 1;
    successor.create_time = now;
    successor.set_retries(default_retries);
    successor.exception_message = None;
    successor.exception_details = None;
    successor.unlock();
    successor.due_date = Some(scheduled + Duration::milliseconds(fired.repeat_offset_ms));
    successor.repeat = Some(next.to_expression());
    Ok(Some(successor))
}

/// Move a job's due date. With `cascade` the shift also applies to every later
/// occurrence of a repeating timer; without it only this occurrence moves.
pub fn apply_due_date_change(job: &mut Job, new_due_date: DateTime<Utc>, cascade: bool) {
    if cascade && job.repeat.is_some() {
        if let Some(current) = job.due_date {
            job.repeat_offset_ms += (new_due_date - current).num_milliseconds();
        }
    }
    job.due_date = Some(new_due_date);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Execution;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 1, 8, 0, 0).unwrap()
    }

    #[test]
    fn test_variable_expression() {
        let execution = Execution::new("ex-1", "pi-1").with_variable("reminder", "PT2H");
        let declaration = TimerDeclaration::new(
            TimerKind::Duration,
            TimerExpression::Variable("reminder".to_string()),
            TimerJobHandlerType::IntermediateTransition,
        );
        let schedule = declaration
            .schedule(&execution, &BusinessCalendarManager::default(), now())
            .unwrap();
        assert_eq!(schedule.due_date, now() + Duration::hours(2));
        assert_eq!(schedule.repeat, None);

        let missing = Execution::new("ex-2", "pi-2");
        assert!(declaration
            .schedule(&missing, &BusinessCalendarManager::default(), now())
            .is_err());
    }

    #[test]
    fn test_cycle_is_anchored_at_first_occurrence() {
        let execution = Execution::new("ex-1", "pi-1");
        let schedule = TimerDeclaration::cycle("R2/PT30M")
            .schedule(&execution, &BusinessCalendarManager::default(), now())
            .unwrap();
        assert_eq!(schedule.due_date, now() + Duration::minutes(30));
        assert_eq!(
            schedule.repeat.as_deref(),
            Some("R2/2026-04-01T08:30:00.000Z/PT30M")
        );
    }

    #[test]
    fn test_successor_respects_offset() {
        let mut job = Job::timer(
            handler_types::TIMER_TRANSITION,
            3,
            now() + Duration::minutes(30),
            now(),
        );
        job.repeat = Some("R1/2026-04-01T08:30:00.000Z/PT30M".to_string());

        apply_due_date_change(&mut job, now() + Duration::minutes(45), true);
        assert_eq!(job.repeat_offset_ms, 15 * 60 * 1000);

        let successor = next_timer_occurrence(&job, 3, now()).unwrap().unwrap();
        assert_eq!(successor.due_date, Some(now() + Duration::minutes(75)));
        assert_ne!(successor.id, job.id);
        assert!(next_timer_occurrence(&successor, 3, now()).unwrap().is_none());
    }

    #[test]
    fn test_non_cascading_change_moves_only_this_occurrence() {
        let mut job = Job::timer(
            handler_types::TIMER_TRANSITION,
            3,
            now() + Duration::minutes(30),
            now(),
        );
        job.repeat = Some("R/2026-04-01T08:30:00.000Z/PT30M".to_string());

        apply_due_date_change(&mut job, now() + Duration::minutes(40), false);
        assert_eq!(job.due_date, Some(now() + Duration::minutes(40)));
        assert_eq!(job.repeat_offset_ms, 0);

        let successor = next_timer_occurrence(&job, 3, now()).unwrap().unwrap();
        assert_eq!(successor.due_date, Some(now() + Duration::minutes(60)));
    }
}

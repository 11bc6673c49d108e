//! # Business Calendars
//!
//! Resolve timer expressions into due dates. A [`BusinessCalendarManager`] maps
//! calendar names to implementations; the built-in ones understand ISO-8601 dates,
//! durations and repeating intervals. Cron expressions are not supported.

pub mod cycle;
pub mod duration;

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

use crate::error::{ExecutorError, Result};

pub use cycle::{RepeatingInterval, RetryTimeCycle};
pub use duration::{parse_date_time, IsoDuration};

pub const DUE_DATE_CALENDAR: &str = "dueDate";
pub const DURATION_CALENDAR: &str = "duration";
pub const CYCLE_CALENDAR: &str = "cycle";

pub trait BusinessCalendar: Send + Sync + Debug {
    fn resolve_due_date(&self, expression: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>>;
}

#[derive(Debug, Default)]
pub struct DueDateBusinessCalendar;

impl BusinessCalendar for DueDateBusinessCalendar {
    fn resolve_due_date(&self, expression: &str, _now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        parse_date_time(expression)
    }
}

#[derive(Debug, Default)]
pub struct DurationBusinessCalendar;

impl BusinessCalendar for DurationBusinessCalendar {
    fn resolve_due_date(&self, expression: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        IsoDuration::parse(expression)?
            .add_to(now)
            .ok_or_else(|| ExecutorError::InvalidTimer {
                expression: expression.to_string(),
                reason: "due date is out of range".to_string(),
            })
    }
}

#[derive(Debug, Default)]
pub struct CycleBusinessCalendar;

impl BusinessCalendar for CycleBusinessCalendar {
    fn resolve_due_date(&self, expression: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let (due, _) = RepeatingInterval::parse(expression)?.first_occurrence(now)?;
        Ok(due)
    }
}

#[derive(Debug, Clone)]
pub struct BusinessCalendarManager {
    calendars: HashMap<String, Arc<dyn BusinessCalendar>>,
}

impl Default for BusinessCalendarManager {
    fn default() -> Self {
        let mut manager = Self {
            calendars: HashMap::new(),
        };
        manager.register(DUE_DATE_CALENDAR, Arc::new(DueDateBusinessCalendar));
        manager.register(DURATION_CALENDAR, Arc::new(DurationBusinessCalendar));
        manager.register(CYCLE_CALENDAR, Arc::new(CycleBusinessCalendar));
        manager
    }
}

impl BusinessCalendarManager {
    /// Register or replace a calendar under `name`
    pub fn register(&mut self, name: impl Into<String>, calendar: Arc<dyn BusinessCalendar>) {
        self.calendars.insert(name.into(), calendar);
    }

    pub fn get(&self, name: &str) -> Result<&Arc<dyn BusinessCalendar>> {
        self.calendars.get(name).ok_or_else(|| {
            ExecutorError::Configuration(format!("No business calendar registered as '{name}'"))
        })
    }
}

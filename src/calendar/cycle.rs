//! Repeating intervals (`R3/PT10M`, `R/2026-01-01T00:00:00Z/P1D`) and retry schedules.

use chrono::{DateTime, SecondsFormat, Utc};

use super::duration::{parse_date_time, IsoDuration};
use crate::error::{ExecutorError, Result};

/// `R<n>` repeats n more times after the first occurrence; a bare `R` repeats forever
#[derive(Debug, Clone, PartialEq)]
pub struct RepeatingInterval {
    pub repetitions: Option<u32>,
    pub start: Option<DateTime<Utc>>,
    pub period: IsoDuration,
    period_text: String,
}

impl RepeatingInterval {
    pub fn parse(text: &str) -> Result<Self> {
        let invalid = |reason: &str| ExecutorError::InvalidTimer {
            expression: text.to_string(),
            reason: reason.to_string(),
        };

        let parts: Vec<&str> = text.trim().split('/').collect();
        let repeat = parts
            .first()
            .and_then(|p| p.strip_prefix('R'))
            .ok_or_else(|| invalid("repeating interval must start with 'R'"))?;
        let repetitions = if repeat.is_empty() {
            None
        } else {
            Some(
                repeat
                    .parse::<u32>()
                    .map_err(|_| invalid("repetition count is not a number"))?,
            )
        };

        let (start, period_text) = match parts.as_slice() {
            [_, period] => (None, *period),
            [_, start, period] if !start.starts_with('P') => {
                (Some(parse_date_time(start)?), *period)
            }
            [_, _, _] => return Err(invalid("intervals with an end date are not supported")),
            _ => return Err(invalid("expected R<n>/<period> or R<n>/<start>/<period>")),
        };

        let period = IsoDuration::parse(period_text)?;
        if period.is_zero() {
            return Err(invalid("period must not be zero"));
        }

        Ok(Self {
            repetitions,
            start,
            period,
            period_text: period_text.to_string(),
        })
    }

    pub fn period_text(&self) -> &str {
        &self.period_text
    }

    /// First occurrence strictly after `now`, with the repetitions left after it.
    ///
    /// Without an explicit start the series begins one period after `now`.
    pub fn first_occurrence(&self, now: DateTime<Utc>) -> Result<(DateTime<Utc>, Option<u32>)> {
        let Some(start) = self.start else {
            return Ok((self.step(now)?, self.repetitions));
        };
        if start > now {
            return Ok((start, self.repetitions));
        }

        let (mut due, mut remaining) = (start, self.repetitions);
        if let Some(length) = self.period.fixed_length() {
            let elapsed = (now - start).num_milliseconds();
            let steps = elapsed / length.num_milliseconds().max(1) + 1;
            let steps_u32 = u32::try_from(steps).map_err(|_| self.exhausted())?;
            if let Some(n) = remaining {
                remaining = Some(n.checked_sub(steps_u32).ok_or_else(|| self.exhausted())?);
            }
            due = start + length * i32::try_from(steps).map_err(|_| self.exhausted())?;
        } else {
            while due <= now {
                if let Some(n) = remaining {
                    remaining = Some(n.checked_sub(1).ok_or_else(|| self.exhausted())?);
                }
                due = self.step(due)?;
            }
        }
        Ok((due, remaining))
    }

    /// Following occurrence of a stored series, or `None` once repetitions are used up
    pub fn next(&self) -> Result<Option<RepeatingInterval>> {
        let Some(start) = self.start else {
            return Ok(None);
        };
        let repetitions = match self.repetitions {
            Some(0) => return Ok(None),
            Some(n) => Some(n - 1),
            None => None,
        };
        Ok(Some(RepeatingInterval {
            repetitions,
            start: Some(self.step(start)?),
            period: self.period,
            period_text: self.period_text.clone(),
        }))
    }

    /// Anchored form `R<n>/<start>/<period>` stored on timer jobs
    pub fn anchored_at(&self, start: DateTime<Utc>, repetitions: Option<u32>) -> RepeatingInterval {
        RepeatingInterval {
            repetitions,
            start: Some(start),
            period: self.period,
            period_text: self.period_text.clone(),
        }
    }

    pub fn to_expression(&self) -> String {
        let count = self.repetitions.map(|n| n.to_string()).unwrap_or_default();
        match self.start {
            Some(start) => format!(
                "R{}/{}/{}",
                count,
                start.to_rfc3339_opts(SecondsFormat::Millis, true),
                self.period_text
            ),
            None => format!("R{}/{}", count, self.period_text),
        }
    }

    fn step(&self, from: DateTime<Utc>) -> Result<DateTime<Utc>> {
        self.period
            .add_to(from)
            .ok_or_else(|| ExecutorError::InvalidTimer {
                expression: self.to_expression(),
                reason: "occurrence is out of range".to_string(),
            })
    }

    fn exhausted(&self) -> ExecutorError {
        ExecutorError::InvalidTimer {
            expression: self.to_expression(),
            reason: "no occurrences left after the current time".to_string(),
        }
    }
}

/// Retry schedule for failed jobs: `R5/PT5M` (five retries, five minutes apart)
/// or a list such as `PT1M,PT5M,PT10M` (one retry per entry).
#[derive(Debug, Clone, PartialEq)]
pub struct RetryTimeCycle {
    retries: i32,
    intervals: Vec<IsoDuration>,
}

impl RetryTimeCycle {
    pub fn parse(text: &str) -> Result<Self> {
        let trimmed = text.trim();
        if trimmed.starts_with('R') {
            let interval = RepeatingInterval::parse(trimmed)?;
            let retries = interval.repetitions.ok_or_else(|| ExecutorError::InvalidTimer {
                expression: text.to_string(),
                reason: "retry cycle needs an explicit repetition count".to_string(),
            })?;
            return Ok(Self {
                retries: i32::try_from(retries).unwrap_or(i32::MAX),
                intervals: vec![interval.period],
            });
        }

        let intervals = trimmed
            .split(',')
            .map(|part| IsoDuration::parse(part.trim()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            retries: i32::try_from(intervals.len()).unwrap_or(i32::MAX),
            intervals,
        })
    }

    pub fn retries(&self) -> i32 {
        self.retries
    }

    pub fn intervals(&self) -> &[IsoDuration] {
        &self.intervals
    }

    /// Delay before the next attempt given the retries left before this failure
    pub fn interval_for(&self, retries_before_failure: i32) -> &IsoDuration {
        let count = self.intervals.len() as i64;
        let index = (count - i64::from(retries_before_failure)).clamp(0, count - 1);
        &self.intervals[index as usize]
    }
}

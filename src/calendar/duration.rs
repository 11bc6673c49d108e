//! ISO-8601 durations (`P1Y2M3W4DT5H6M7.5S`) and date parsing.

use chrono::{DateTime, Duration, Months, NaiveDate, NaiveDateTime, Utc};

use crate::error::{ExecutorError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IsoDuration {
    pub years: u32,
    pub months: u32,
    pub weeks: u32,
    pub days: u32,
    pub hours: u32,
    pub minutes: u32,
    pub millis: u64,
}

impl IsoDuration {
    pub fn parse(text: &str) -> Result<Self> {
        let invalid = |reason: &str| ExecutorError::InvalidTimer {
            expression: text.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = text.trim();
        let body = trimmed
            .strip_prefix('P')
            .ok_or_else(|| invalid("duration must start with 'P'"))?;

        let (date_part, time_part) = match body.split_once('T') {
            Some((_, "")) => return Err(invalid("time designator 'T' without components")),
            Some((date, time)) => (date, Some(time)),
            None => (body, None),
        };

        let mut duration = IsoDuration::default();
        let mut components = 0usize;

        for (value, unit) in split_components(date_part).map_err(invalid)? {
            components += 1;
            let amount = whole(&value).map_err(invalid)?;
            match unit {
                'Y' => duration.years = amount,
                'M' => duration.months = amount,
                'W' => duration.weeks = amount,
                'D' => duration.days = amount,
                _ => return Err(invalid("unknown date designator")),
            }
        }

        if let Some(time_part) = time_part {
            for (value, unit) in split_components(time_part).map_err(invalid)? {
                components += 1;
                match unit {
                    'H' => duration.hours = whole(&value).map_err(invalid)?,
                    'M' => duration.minutes = whole(&value).map_err(invalid)?,
                    'S' => {
                        let seconds: f64 = value
                            .replace(',', ".")
                            .parse()
                            .map_err(|_| invalid("seconds are not a number"))?;
                        if !seconds.is_finite() || seconds < 0.0 {
                            return Err(invalid("seconds must be a non-negative number"));
                        }
                        duration.millis = (seconds * 1000.0).round() as u64;
                    }
                    _ => return Err(invalid("unknown time designator")),
                }
            }
        }

        if components == 0 {
            return Err(invalid("duration has no components"));
        }

        Ok(duration)
    }

    pub fn is_zero(&self) -> bool {
        *self == IsoDuration::default()
    }

    /// Length in wall-clock time when the duration has no month or year components
    pub fn fixed_length(&self) -> Option<Duration> {
        if self.years != 0 || self.months != 0 {
            return None;
        }
        Some(
            Duration::weeks(i64::from(self.weeks))
                + Duration::days(i64::from(self.days))
                + Duration::hours(i64::from(self.hours))
                + Duration::minutes(i64::from(self.minutes))
                + Duration::milliseconds(i64::try_from(self.millis).ok()?),
        )
    }

    /// Month and year components follow calendar arithmetic, the rest is added as elapsed time
    pub fn add_to(&self, instant: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let months = self.years.checked_mul(12)?.checked_add(self.months)?;
        let shifted = instant.checked_add_months(Months::new(months))?;
        let rest = IsoDuration {
            years: 0,
            months: 0,
            ..*self
        };
        shifted.checked_add_signed(rest.fixed_length()?)
    }
}

fn split_components(part: &str) -> std::result::Result<Vec<(String, char)>, &'static str> {
    let mut components = Vec::new();
    let mut number = String::new();
    for c in part.chars() {
        if c.is_ascii_digit() || c == '.' || c == ',' {
            number.push(c);
        } else if c.is_ascii_alphabetic() {
            if number.is_empty() {
                return Err("designator without a value");
            }
            components.push((std::mem::take(&mut number), c.to_ascii_uppercase()));
        } else {
            return Err("unexpected character in duration");
        }
    }
    if !number.is_empty() {
        return Err("value without a designator");
    }
    Ok(components)
}

fn whole(value: &str) -> std::result::Result<u32, &'static str> {
    value
        .parse::<u32>()
        .map_err(|_| "only seconds may carry a fraction")
}

/// Parse an absolute date in RFC 3339 form, or a local date-time / date taken as UTC
pub fn parse_date_time(text: &str) -> Result<DateTime<Utc>> {
    let trimmed = text.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(parsed.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f") {
        return Ok(naive.and_utc());
    }
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
            return Ok(midnight.and_utc());
        }
    }
    Err(ExecutorError::InvalidTimer {
        expression: text.to_string(),
        reason: "not an ISO-8601 date".to_string(),
    })
}

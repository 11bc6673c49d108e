//! Retry policies applied by the failure listener.

use chrono::{DateTime, Utc};

use crate::calendar::RetryTimeCycle;
use crate::config::JobsConfig;
use crate::error::{ExecutorError, Result};
use crate::models::Job;

#[derive(Debug, Clone, PartialEq, Default)]
pub enum RetryPolicy {
    /// One retry less per failure, job immediately acquirable again
    #[default]
    Default,
    /// Retry count and delays taken from a retry cycle
    TimeCycle(RetryTimeCycle),
}

/// What the failure listener writes back for a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryDecision {
    pub retries: i32,
    pub due_date: Option<DateTime<Utc>>,
}

impl RetryPolicy {
    pub fn from_config(config: &JobsConfig) -> Result<Self> {
        match &config.failed_job_retry_time_cycle {
            Some(cycle) => Ok(RetryPolicy::TimeCycle(RetryTimeCycle::parse(cycle)?)),
            None => Ok(RetryPolicy::Default),
        }
    }

    /// Retries and due date after `job` failed at `now`. `fatal` failures end the job.
    pub fn next_attempt(&self, job: &Job, fatal: bool, now: DateTime<Utc>) -> Result<RetryDecision> {
        if fatal {
            return Ok(RetryDecision {
                retries: 0,
                due_date: job.due_date,
            });
        }

        match self {
            RetryPolicy::Default => Ok(RetryDecision {
                retries: (job.retries - 1).max(0),
                due_date: job.due_date,
            }),
            RetryPolicy::TimeCycle(cycle) => {
                // the first failure starts the schedule over
                let retries_before_failure = if job.exception_message.is_none() {
                    cycle.retries()
                } else {
                    job.retries
                };
                let interval = cycle.interval_for(retries_before_failure);
                let due_date = interval.add_to(now).ok_or_else(|| ExecutorError::InvalidTimer {
                    expression: format!("{interval:?}"),
                    reason: "retry due date is out of range".to_string(),
                })?;
                Ok(RetryDecision {
                    retries: (retries_before_failure - 1).max(0),
                    due_date: Some(due_date),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 4, 8, 0, 0).unwrap()
    }

    #[test]
    fn test_default_policy_decrements_once() {
        let job = Job::message("event", 3, now());
        let decision = RetryPolicy::Default.next_attempt(&job, false, now()).unwrap();
        assert_eq!(decision.retries, 2);
        assert_eq!(decision.due_date, None);

        let last = Job::message("event", 1, now());
        let decision = RetryPolicy::Default.next_attempt(&last, false, now()).unwrap();
        assert_eq!(decision.retries, 0);
    }

    #[test]
    fn test_fatal_failure_ends_retries() {
        let job = Job::message("event", 3, now());
        let decision = RetryPolicy::Default.next_attempt(&job, true, now()).unwrap();
        assert_eq!(decision.retries, 0);
    }

    #[test]
    fn test_time_cycle_walks_intervals() {
        let policy = RetryPolicy::TimeCycle(RetryTimeCycle::parse("PT1M,PT5M,PT10M").unwrap());
        // created with the engine default, reinitialised from the cycle on first failure
        let mut job = Job::message("event", 7, now());

        let first = policy.next_attempt(&job, false, now()).unwrap();
        assert_eq!(first.retries, 2);
        assert_eq!(first.due_date, Some(now() + Duration::minutes(1)));

        job.set_exception("boom", None);
        job.set_retries(first.retries);
        let second = policy.next_attempt(&job, false, now()).unwrap();
        assert_eq!(second.retries, 1);
        assert_eq!(second.due_date, Some(now() + Duration::minutes(5)));

        job.set_retries(second.retries);
        let third = policy.next_attempt(&job, false, now()).unwrap();
        assert_eq!(third.retries, 0);
        assert_eq!(third.due_date, Some(now() + Duration::minutes(10)));
    }

    #[test]
    fn test_repeating_cycle_uses_single_interval() {
        let policy = RetryPolicy::from_config(&JobsConfig {
            default_retries: 3,
            failed_job_retry_time_cycle: Some("R5/PT5M".to_string()),
        })
        .unwrap();
        let job = Job::message("event", 3, now());
        let decision = policy.next_attempt(&job, false, now()).unwrap();
        assert_eq!(decision.retries, 4);
        assert_eq!(decision.due_date, Some(now() + Duration::minutes(5)));
    }
}

//! # PostgreSQL Job Store
//!
//! [`JobStore`] backed by the `tasker_jobs` table (see `migrations/`). Locking is a
//! conditional `UPDATE` on the row's revision, so any number of executor nodes can
//! share the table; candidate selection uses `FOR UPDATE SKIP LOCKED` to keep
//! concurrent acquirers from queueing behind each other.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgExecutor, PgPool, Postgres, QueryBuilder};
use tracing::{debug, error, instrument};

use super::{JobFailure, JobQuery, JobStore};
use crate::error::{ExecutorError, Result};
use crate::models::{Job, JobId, JobType};

const JOB_COLUMNS: &str = r#"
    id, revision, job_type, handler_type, handler_configuration, due_date, retries,
    lock_owner, lock_expiration_time, exclusive, priority, suspended,
    exception_message, exception_details, tenant_id, process_instance_id, execution_id,
    process_definition_id, activity_id, deployment_id, job_definition_id, create_time,
    sequence_counter, repeat, repeat_offset_ms
"#;

#[derive(Debug, FromRow)]
struct JobRow {
    id: JobId,
    revision: i32,
    job_type: String,
    handler_type: String,
    handler_configuration: Option<String>,
    due_date: Option<DateTime<Utc>>,
    retries: i32,
    lock_owner: Option<String>,
    lock_expiration_time: Option<DateTime<Utc>>,
    exclusive: bool,
    priority: i64,
    suspended: bool,
    exception_message: Option<String>,
    exception_details: Option<String>,
    tenant_id: Option<String>,
    process_instance_id: Option<String>,
    execution_id: Option<String>,
    process_definition_id: Option<String>,
    activity_id: Option<String>,
    deployment_id: Option<String>,
    job_definition_id: Option<String>,
    create_time: DateTime<Utc>,
    sequence_counter: i64,
    repeat: Option<String>,
    repeat_offset_ms: i64,
}

impl TryFrom<JobRow> for Job {
    type Error = ExecutorError;

    fn try_from(row: JobRow) -> Result<Self> {
        let job_type = JobType::parse(&row.job_type).ok_or_else(|| {
            ExecutorError::Store(format!(
                "Job {} has unknown job_type '{}'",
                row.id, row.job_type
            ))
        })?;
        Ok(Job {
            id: row.id,
            revision: row.revision,
            job_type,
            handler_type: row.handler_type,
            handler_configuration: row.handler_configuration,
            due_date: row.due_date,
            retries: row.retries,
            lock_owner: row.lock_owner,
            lock_expiration_time: row.lock_expiration_time,
            exclusive: row.exclusive,
            priority: row.priority,
            suspended: row.suspended,
            exception_message: row.exception_message,
            exception_details: row.exception_details,
            tenant_id: row.tenant_id,
            process_instance_id: row.process_instance_id,
            execution_id: row.execution_id,
            process_definition_id: row.process_definition_id,
            activity_id: row.activity_id,
            deployment_id: row.deployment_id,
            job_definition_id: row.job_definition_id,
            create_time: row.create_time,
            sequence_counter: row.sequence_counter,
            repeat: row.repeat,
            repeat_offset_ms: row.repeat_offset_ms,
        })
    }
}

fn into_jobs(rows: Vec<JobRow>) -> Result<Vec<Job>> {
    rows.into_iter().map(Job::try_from).collect()
}

async fn insert_job<'e, E>(executor: E, job: &Job) -> Result<()>
where
    E: PgExecutor<'e>,
{
    sqlx::query(
        r#"
        INSERT INTO tasker_jobs (
            id, revision, job_type, handler_type, handler_configuration, due_date, retries,
            lock_owner, lock_expiration_time, exclusive, priority, suspended,
            exception_message, exception_details, tenant_id, process_instance_id, execution_id,
            process_definition_id, activity_id, deployment_id, job_definition_id, create_time,
            sequence_counter, repeat, repeat_offset_ms
        ) VALUES (
            $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13,
            $14, $15, $16, $17, $18, $19, $20, $21, $22, $23, $24, $25
        )
        "#,
    )
    .bind(job.id)
    .bind(job.revision)
    .bind(job.job_type.as_str())
    .bind(&job.handler_type)
    .bind(&job.handler_configuration)
    .bind(job.due_date)
    .bind(job.retries)
    .bind(&job.lock_owner)
    .bind(job.lock_expiration_time)
    .bind(job.exclusive)
    .bind(job.priority)
    .bind(job.suspended)
    .bind(&job.exception_message)
    .bind(&job.exception_details)
    .bind(&job.tenant_id)
    .bind(&job.process_instance_id)
    .bind(&job.execution_id)
    .bind(&job.process_definition_id)
    .bind(&job.activity_id)
    .bind(&job.deployment_id)
    .bind(&job.job_definition_id)
    .bind(job.create_time)
    .bind(job.sequence_counter)
    .bind(&job.repeat)
    .bind(job.repeat_offset_ms)
    .execute(executor)
    .await
    .map_err(|e| {
        error!("Failed to insert job: {}", e);
        ExecutorError::Store(format!("Job insert failed: {e}"))
    })?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Turn "no row updated" into not-found or an optimistic locking conflict
    async fn check_updated(&self, rows_affected: u64, id: JobId, expected_revision: i32) -> Result<()> {
        if rows_affected == 1 {
            return Ok(());
        }
        let exists: Option<(i32,)> = sqlx::query_as("SELECT revision FROM tasker_jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match exists {
            None => Err(ExecutorError::JobNotFound(id)),
            Some((revision,)) => Err(ExecutorError::optimistic_locking(
                id,
                format!("expected revision {expected_revision}, found {revision}"),
            )),
        }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    #[instrument(skip(self, job), fields(job_id = %job.id))]
    async fn insert(&self, job: Job) -> Result<()> {
        insert_job(&self.pool, &job).await
    }

    async fn find_by_id(&self, id: JobId) -> Result<Option<Job>> {
        let query = format!("SELECT {JOB_COLUMNS} FROM tasker_jobs WHERE id = $1");
        let row = sqlx::query_as::<_, JobRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Job::try_from).transpose()
    }

    #[instrument(skip(self))]
    async fn find_acquirable(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Job>> {
        let query = format!(
            r#"
            SELECT {JOB_COLUMNS} FROM tasker_jobs
            WHERE retries > 0
              AND suspended = FALSE
              AND (due_date IS NULL OR due_date <= $1)
              AND (lock_owner IS NULL OR lock_expiration_time <= $1)
              AND (exclusive = FALSE OR process_instance_id IS NULL OR NOT EXISTS (
                  SELECT 1 FROM tasker_jobs busy
                  WHERE busy.process_instance_id = tasker_jobs.process_instance_id
                    AND busy.exclusive = TRUE
                    AND busy.lock_owner IS NOT NULL
                    AND busy.lock_expiration_time > $1
              ))
            ORDER BY priority DESC, due_date ASC NULLS FIRST, create_time ASC
            LIMIT $2
            FOR UPDATE SKIP LOCKED
            "#
        );
        let rows = sqlx::query_as::<_, JobRow>(&query)
            .bind(now)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to find acquirable jobs: {}", e);
                ExecutorError::Store(format!("Acquirable job query failed: {e}"))
            })?;
        debug!(candidates = rows.len(), "Found acquirable jobs");
        into_jobs(rows)
    }

    async fn try_lock(
        &self,
        id: JobId,
        expected_revision: i32,
        lock_owner: &str,
        lock_expiration_time: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE tasker_jobs
            SET lock_owner = $1, lock_expiration_time = $2, revision = revision + 1
            WHERE id = $3
              AND revision = $4
              AND (lock_owner IS NULL OR lock_expiration_time <= $5)
              AND (exclusive = FALSE OR process_instance_id IS NULL OR NOT EXISTS (
                  SELECT 1 FROM tasker_jobs busy
                  WHERE busy.process_instance_id = tasker_jobs.process_instance_id
                    AND busy.id <> tasker_jobs.id
                    AND busy.exclusive = TRUE
                    AND busy.lock_owner IS NOT NULL
                    AND busy.lock_expiration_time > $5
                    AND NOT (busy.lock_owner = $1 AND busy.lock_expiration_time = $2)
              ))
            "#,
        )
        .bind(lock_owner)
        .bind(lock_expiration_time)
        .bind(id)
        .bind(expected_revision)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn release(&self, id: JobId) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE tasker_jobs
            SET lock_owner = NULL, lock_expiration_time = NULL, revision = revision + 1
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_failure(&self, failure: &JobFailure) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE tasker_jobs
            SET retries = GREATEST($1, 0),
                exception_message = $2,
                exception_details = $3,
                due_date = $4,
                lock_owner = NULL,
                lock_expiration_time = NULL,
                revision = revision + 1
            WHERE id = $5 AND revision = $6
            "#,
        )
        .bind(failure.retries)
        .bind(&failure.exception_message)
        .bind(&failure.exception_details)
        .bind(failure.due_date)
        .bind(failure.job_id)
        .bind(failure.expected_revision)
        .execute(&self.pool)
        .await?;
        self.check_updated(result.rows_affected(), failure.job_id, failure.expected_revision)
            .await
    }

    async fn lock_job(
        &self,
        id: JobId,
        expected_revision: i32,
        lock_owner: &str,
        lock_expiration_time: DateTime<Utc>,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE tasker_jobs
            SET lock_owner = $1, lock_expiration_time = $2, revision = revision + 1
            WHERE id = $3 AND revision = $4
            "#,
        )
        .bind(lock_owner)
        .bind(lock_expiration_time)
        .bind(id)
        .bind(expected_revision)
        .execute(&self.pool)
        .await?;
        self.check_updated(result.rows_affected(), id, expected_revision)
            .await
    }

    #[instrument(skip(self, created), fields(created = created.len()))]
    async fn complete(
        &self,
        id: JobId,
        expected_revision: i32,
        lock_owner: &str,
        created: Vec<Job>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let deleted = sqlx::query(
            "DELETE FROM tasker_jobs WHERE id = $1 AND revision = $2 AND lock_owner = $3",
        )
        .bind(id)
        .bind(expected_revision)
        .bind(lock_owner)
        .execute(&mut *tx)
        .await?;

        if deleted.rows_affected() != 1 {
            tx.rollback().await?;
            let current: Option<(i32, Option<String>)> =
                sqlx::query_as("SELECT revision, lock_owner FROM tasker_jobs WHERE id = $1")
                    .bind(id)
                    .fetch_optional(&self.pool)
                    .await?;
            return Err(match current {
                None => ExecutorError::JobNotFound(id),
                Some((revision, owner)) => ExecutorError::optimistic_locking(
                    id,
                    format!(
                        "expected revision {expected_revision} locked by {lock_owner}, \
                         found revision {revision} locked by {owner:?}"
                    ),
                ),
            });
        }

        for job in &created {
            insert_job(&mut *tx, job).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn delete(&self, id: JobId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM tasker_jobs WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn find_due_unlocked_timers(
        &self,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Job>> {
        let query = format!(
            r#"
            SELECT {JOB_COLUMNS} FROM tasker_jobs
            WHERE job_type = 'timer'
              AND lock_owner IS NULL
              AND suspended = FALSE
              AND retries > 0
              AND due_date <= $1
            ORDER BY due_date ASC
            LIMIT $2
            "#
        );
        let rows = sqlx::query_as::<_, JobRow>(&query)
            .bind(before)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;
        into_jobs(rows)
    }

    async fn update_due_date(
        &self,
        id: JobId,
        expected_revision: i32,
        due_date: Option<DateTime<Utc>>,
        repeat_offset_ms: i64,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE tasker_jobs
            SET due_date = $1, repeat_offset_ms = $2, revision = revision + 1
            WHERE id = $3 AND revision = $4
            "#,
        )
        .bind(due_date)
        .bind(repeat_offset_ms)
        .bind(id)
        .bind(expected_revision)
        .execute(&self.pool)
        .await?;
        self.check_updated(result.rows_affected(), id, expected_revision)
            .await
    }

    async fn update_retries(&self, id: JobId, expected_revision: i32, retries: i32) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE tasker_jobs
            SET retries = GREATEST($1, 0), revision = revision + 1
            WHERE id = $2 AND revision = $3
            "#,
        )
        .bind(retries)
        .bind(id)
        .bind(expected_revision)
        .execute(&self.pool)
        .await?;
        self.check_updated(result.rows_affected(), id, expected_revision)
            .await
    }

    async fn update_priority(&self, id: JobId, expected_revision: i32, priority: i64) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE tasker_jobs
            SET priority = $1, revision = revision + 1
            WHERE id = $2 AND revision = $3
            "#,
        )
        .bind(priority)
        .bind(id)
        .bind(expected_revision)
        .execute(&self.pool)
        .await?;
        self.check_updated(result.rows_affected(), id, expected_revision)
            .await
    }

    async fn update_suspension(
        &self,
        id: JobId,
        expected_revision: i32,
        suspended: bool,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE tasker_jobs
            SET suspended = $1, revision = revision + 1
            WHERE id = $2 AND revision = $3
            "#,
        )
        .bind(suspended)
        .bind(id)
        .bind(expected_revision)
        .execute(&self.pool)
        .await?;
        self.check_updated(result.rows_affected(), id, expected_revision)
            .await
    }

    async fn find_jobs(&self, query: &JobQuery) -> Result<Vec<Job>> {
        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {JOB_COLUMNS} FROM tasker_jobs WHERE TRUE"));

        if let Some(process_instance_id) = &query.process_instance_id {
            builder
                .push(" AND process_instance_id = ")
                .push_bind(process_instance_id.clone());
        }
        if let Some(handler_type) = &query.handler_type {
            builder
                .push(" AND handler_type = ")
                .push_bind(handler_type.clone());
        }
        if let Some(job_definition_id) = &query.job_definition_id {
            builder
                .push(" AND job_definition_id = ")
                .push_bind(job_definition_id.clone());
        }
        if let Some(tenant_id) = &query.tenant_id {
            builder.push(" AND tenant_id = ").push_bind(tenant_id.clone());
        }
        if let Some(job_type) = query.job_type {
            builder.push(" AND job_type = ").push_bind(job_type.as_str());
        }
        if let Some(owner) = &query.locked_by {
            builder.push(" AND lock_owner = ").push_bind(owner.clone());
        }
        if query.with_exception {
            builder.push(" AND exception_message IS NOT NULL");
        }
        if query.no_retries_left {
            builder.push(" AND retries = 0");
        }
        builder.push(" ORDER BY create_time ASC, id ASC");
        if let Some(limit) = query.limit {
            builder
                .push(" LIMIT ")
                .push_bind(i64::try_from(limit).unwrap_or(i64::MAX));
        }

        let rows: Vec<PgRow> = builder.build().fetch_all(&self.pool).await?;
        let rows = rows
            .iter()
            .map(|row| JobRow::from_row(row))
            .collect::<std::result::Result<Vec<_>, sqlx::Error>>()?;
        into_jobs(rows)
    }
}

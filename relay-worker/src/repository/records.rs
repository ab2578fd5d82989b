//! Build record repository
//!
//! Keyed, mutable build metadata shared between whoever requests builds and
//! the orchestrator driving them. The only write an outside actor makes
//! while a build runs is the stop marker, so every orchestrator write that
//! could race with it keeps it in place.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use relay_core::domain::build::{BuildRecord, BuildStatus};
use sqlx::PgPool;
use uuid::Uuid;

/// What the orchestrator learned when it attached to a remote build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildAssignment {
    pub build_number: u64,
    /// Only used when the record has no start time yet
    pub started_at: DateTime<Utc>,
    pub log_location: Option<String>,
}

/// Repository trait for build records
#[async_trait]
pub trait BuildRecordGateway: Send + Sync {
    /// Creates a PENDING record
    async fn create(&self, job_name: &str) -> Result<BuildRecord>;

    /// Reads a record by id
    async fn get(&self, id: Uuid) -> Result<Option<BuildRecord>>;

    /// Reads only the status, used to notice stop requests
    async fn read_status(&self, id: Uuid) -> Result<Option<BuildStatus>>;

    /// Oldest active record for a job, if any
    async fn find_active(&self, job_name: &str) -> Result<Option<BuildRecord>>;

    /// All active records, oldest first
    async fn list_unfinished(&self) -> Result<Vec<BuildRecord>>;

    /// Up to `limit` records of any status, newest first
    async fn list_recent(&self, limit: usize) -> Result<Vec<BuildRecord>>;

    /// Marks a record as queue-resident; keeps a stop marker
    async fn mark_queued(&self, id: Uuid) -> Result<()>;

    /// Records the assigned build and moves to RUNNING; keeps a stop marker
    /// and any existing start time
    async fn assign_build(&self, id: Uuid, assignment: BuildAssignment) -> Result<BuildRecord>;

    /// Writes a terminal status and end time
    async fn finish(&self, id: Uuid, status: BuildStatus, ended_at: DateTime<Utc>) -> Result<()>;

    /// Writes the stop marker if the record is still active and unmarked
    ///
    /// Returns whether the marker was written.
    async fn request_stop(&self, id: Uuid) -> Result<bool>;
}

/// PostgreSQL implementation of BuildRecordGateway
#[derive(Debug, Clone)]
pub struct PgBuildRecordGateway {
    pool: PgPool,
}

impl PgBuildRecordGateway {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const RECORD_COLUMNS: &str =
    "id, job_name, build_number, status, created_at, started_at, ended_at, log_location";

#[async_trait]
impl BuildRecordGateway for PgBuildRecordGateway {
    async fn create(&self, job_name: &str) -> Result<BuildRecord> {
        let record = BuildRecord::pending(job_name, Utc::now());

        sqlx::query(
            r#"
            INSERT INTO build_records (id, job_name, status, created_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(record.id)
        .bind(&record.job_name)
        .bind(record.status.as_str())
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .context("Failed to insert build record")?;

        Ok(record)
    }

    async fn get(&self, id: Uuid) -> Result<Option<BuildRecord>> {
        let row = sqlx::query_as::<_, BuildRow>(&format!(
            "SELECT {} FROM build_records WHERE id = $1",
            RECORD_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to read build record")?;

        row.map(BuildRecord::try_from).transpose()
    }

    async fn read_status(&self, id: Uuid) -> Result<Option<BuildStatus>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT status FROM build_records WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to read build status")?;

        row.map(|(status,)| status.parse::<BuildStatus>().map_err(anyhow::Error::from))
            .transpose()
    }

    async fn find_active(&self, job_name: &str) -> Result<Option<BuildRecord>> {
        let row = sqlx::query_as::<_, BuildRow>(&format!(
            "SELECT {} FROM build_records
             WHERE job_name = $1 AND status = ANY($2)
             ORDER BY created_at ASC
             LIMIT 1",
            RECORD_COLUMNS
        ))
        .bind(job_name)
        .bind(active_statuses())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to look up active build")?;

        row.map(BuildRecord::try_from).transpose()
    }

    async fn list_unfinished(&self) -> Result<Vec<BuildRecord>> {
        let rows = sqlx::query_as::<_, BuildRow>(&format!(
            "SELECT {} FROM build_records WHERE status = ANY($1) ORDER BY created_at ASC",
            RECORD_COLUMNS
        ))
        .bind(active_statuses())
        .fetch_all(&self.pool)
        .await
        .context("Failed to list unfinished builds")?;

        rows.into_iter().map(BuildRecord::try_from).collect()
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<BuildRecord>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query_as::<_, BuildRow>(&format!(
            "SELECT {} FROM build_records ORDER BY created_at DESC LIMIT $1",
            RECORD_COLUMNS
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list recent builds")?;

        rows.into_iter().map(BuildRecord::try_from).collect()
    }

    async fn mark_queued(&self, id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE build_records
            SET status = $2
            WHERE id = $1 AND status = $3
            "#,
        )
        .bind(id)
        .bind(BuildStatus::Queued.as_str())
        .bind(BuildStatus::Pending.as_str())
        .execute(&self.pool)
        .await
        .context("Failed to mark build queued")?;

        Ok(())
    }

    async fn assign_build(&self, id: Uuid, assignment: BuildAssignment) -> Result<BuildRecord> {
        let number = i64::try_from(assignment.build_number)
            .map_err(|_| anyhow!("build number {} out of range", assignment.build_number))?;

        let row = sqlx::query_as::<_, BuildRow>(&format!(
            "UPDATE build_records
             SET build_number = $2,
                 started_at = COALESCE(started_at, $3),
                 log_location = COALESCE($4, log_location),
                 status = CASE WHEN status = $5 THEN status ELSE $6 END
             WHERE id = $1
             RETURNING {}",
            RECORD_COLUMNS
        ))
        .bind(id)
        .bind(number)
        .bind(assignment.started_at)
        .bind(assignment.log_location)
        .bind(BuildStatus::StopRequested.as_str())
        .bind(BuildStatus::Running.as_str())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to assign build number")?
        .ok_or_else(|| anyhow!("build record {} disappeared", id))?;

        BuildRecord::try_from(row)
    }

    async fn finish(&self, id: Uuid, status: BuildStatus, ended_at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE build_records
            SET status = $2, ended_at = $3
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(ended_at)
        .execute(&self.pool)
        .await
        .context("Failed to finish build record")?;

        Ok(())
    }

    async fn request_stop(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE build_records
            SET status = $2
            WHERE id = $1 AND status = ANY($3)
            "#,
        )
        .bind(id)
        .bind(BuildStatus::StopRequested.as_str())
        .bind(vec![
            BuildStatus::Pending.as_str().to_string(),
            BuildStatus::Queued.as_str().to_string(),
            BuildStatus::Running.as_str().to_string(),
        ])
        .execute(&self.pool)
        .await
        .context("Failed to request stop")?;

        Ok(result.rows_affected() > 0)
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

fn active_statuses() -> Vec<String> {
    BuildStatus::ALL
        .into_iter()
        .filter(|status| status.is_active())
        .map(|status| status.as_str().to_string())
        .collect()
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct BuildRow {
    id: Uuid,
    job_name: String,
    build_number: Option<i64>,
    status: String,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    log_location: Option<String>,
}

impl TryFrom<BuildRow> for BuildRecord {
    type Error = anyhow::Error;

    fn try_from(row: BuildRow) -> Result<Self> {
        let status = row.status.parse::<BuildStatus>()?;
        let build_number = row
            .build_number
            .map(|n| u64::try_from(n).map_err(|_| anyhow!("negative build number {}", n)))
            .transpose()?;

        Ok(BuildRecord {
            id: row.id,
            job_name: row.job_name,
            build_number,
            status,
            created_at: row.created_at,
            started_at: row.started_at,
            ended_at: row.ended_at,
            log_location: row.log_location,
        })
    }
}

use sqlx::{PgPool, postgres::PgPoolOptions};
use std::time::Duration;

pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    // (job_name, build_number) is unique once a number is assigned; NULLs
    // never collide, so any number of PENDING records may coexist
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS build_records (
            id UUID PRIMARY KEY,
            job_name VARCHAR(255) NOT NULL,
            build_number BIGINT,
            status VARCHAR(20) NOT NULL,
            created_at TIMESTAMPTZ NOT NULL,
            started_at TIMESTAMPTZ,
            ended_at TIMESTAMPTZ,
            log_location VARCHAR(500),
            UNIQUE (job_name, build_number)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_build_records_status ON build_records(status)")
        .execute(pool)
        .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_build_records_job_created ON build_records(job_name, created_at)",
    )
    .execute(pool)
    .await?;

    tracing::info!("Database migrations completed successfully");
    Ok(())
}

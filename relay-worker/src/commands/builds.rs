//! Build record commands
//!
//! Creating, stopping and inspecting build records, and reading their
//! mirrored logs.

use anyhow::{Context, Result, anyhow, bail};
use colored::*;
use relay_core::domain::build::{BuildRecord, BuildStatus, validate_job_name};
use uuid::Uuid;

use crate::repository::{BuildRecordGateway, LogSink};

/// Result of asking for a new build
#[derive(Debug)]
pub(super) enum StartOutcome {
    Created(BuildRecord),
    /// The job already has an active record
    AlreadyActive(BuildRecord),
}

pub(super) async fn start(records: &dyn BuildRecordGateway, job: &str) -> Result<()> {
    match create_if_idle(records, job).await? {
        StartOutcome::Created(record) => {
            println!("{}", "✓ Build requested".green());
            print_record(&record);
            Ok(())
        }
        StartOutcome::AlreadyActive(record) => {
            println!(
                "{}",
                format!("{} already has an active build:", job).yellow()
            );
            print_record(&record);
            bail!("refusing to start a second build of {}", job)
        }
    }
}

pub(super) async fn create_if_idle(
    records: &dyn BuildRecordGateway,
    job: &str,
) -> Result<StartOutcome> {
    validate_job_name(job).map_err(|e| anyhow!(e))?;

    if let Some(active) = records.find_active(job).await? {
        return Ok(StartOutcome::AlreadyActive(active));
    }

    let record = records
        .create(job)
        .await
        .context("Failed to create build record")?;
    Ok(StartOutcome::Created(record))
}

pub(super) async fn stop(records: &dyn BuildRecordGateway, id: Uuid) -> Result<()> {
    let record = load(records, id).await?;

    if records.request_stop(id).await? {
        println!("{} {}", "✓ Stop requested for".green(), record);
    } else {
        println!(
            "{}",
            format!("{} is not running (status {})", record, record.status).yellow()
        );
    }

    Ok(())
}

pub(super) async fn status(records: &dyn BuildRecordGateway, id: Uuid) -> Result<()> {
    let record = load(records, id).await?;
    print_record(&record);
    Ok(())
}

pub(super) async fn list(records: &dyn BuildRecordGateway, limit: usize) -> Result<()> {
    let recent = records
        .list_recent(limit)
        .await
        .context("Failed to list builds")?;

    if recent.is_empty() {
        println!("{}", "No builds found.".yellow());
    } else {
        println!("{}", format!("Found {} build(s):", recent.len()).bold());
        println!();
        for record in &recent {
            print_summary(record);
        }
    }

    Ok(())
}

/// Prints the last `lines` lines, or the whole log when `None`
pub(super) async fn logs(
    records: &dyn BuildRecordGateway,
    logs: &dyn LogSink,
    id: Uuid,
    lines: Option<usize>,
) -> Result<()> {
    let record = load(records, id).await?;
    let Some(number) = record.build_number else {
        println!("{}", "No build number assigned yet.".yellow());
        return Ok(());
    };

    let text = match lines {
        Some(lines) => logs.read_tail(&record.job_name, number, lines).await?,
        None => logs.read_full(&record.job_name, number).await?,
    };

    match text {
        Some(text) => {
            println!("{}", format!("Logs for {}:", record).bold());
            println!("{}", "─".repeat(80).dimmed());
            print!("{}", text);
            if !text.ends_with('\n') {
                println!();
            }
            println!("{}", "─".repeat(80).dimmed());
        }
        None => println!("{}", "No logs mirrored yet.".yellow()),
    }

    Ok(())
}

async fn load(records: &dyn BuildRecordGateway, id: Uuid) -> Result<BuildRecord> {
    records
        .get(id)
        .await?
        .ok_or_else(|| anyhow!("Build record {} not found", id))
}

fn print_summary(record: &BuildRecord) {
    let number = record
        .build_number
        .map(|n| format!("#{}", n))
        .unwrap_or_else(|| "-".to_string());
    println!(
        "  {} {} {:<24} {:>6}  {}",
        "▸".cyan(),
        record.id.to_string().dimmed(),
        record.job_name,
        number,
        colorize_status(record.status)
    );
}

fn print_record(record: &BuildRecord) {
    println!("  {} {}", "▸".cyan(), record.id.to_string().dimmed());
    println!("    Job:      {}", record.job_name);
    if let Some(number) = record.build_number {
        println!("    Build:    #{}", number);
    }
    println!("    Status:   {}", colorize_status(record.status));
    println!(
        "    Created:  {}",
        record.created_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    if let Some(started_at) = record.started_at {
        println!("    Started:  {}", started_at.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    if let Some(ended_at) = record.ended_at {
        println!("    Ended:    {}", ended_at.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    if let Some(location) = &record.log_location {
        println!("    Log:      {}", location.dimmed());
    }
}

fn colorize_status(status: BuildStatus) -> ColoredString {
    match status {
        BuildStatus::Pending | BuildStatus::Queued => status.as_str().yellow(),
        BuildStatus::Running => status.as_str().blue(),
        BuildStatus::StopRequested => status.as_str().magenta(),
        BuildStatus::Success => status.as_str().green(),
        BuildStatus::Failed => status.as_str().red(),
        BuildStatus::Aborted | BuildStatus::Stopped => status.as_str().dimmed(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{InMemoryRecords, MemoryLogSink};

    #[tokio::test]
    async fn test_start_refuses_second_active_build() {
        let records = InMemoryRecords::default();

        let first = match create_if_idle(&records, "demo").await.unwrap() {
            StartOutcome::Created(record) => record,
            other => panic!("expected a new record, got {:?}", other),
        };
        assert_eq!(first.status, BuildStatus::Pending);

        match create_if_idle(&records, "demo").await.unwrap() {
            StartOutcome::AlreadyActive(record) => assert_eq!(record.id, first.id),
            other => panic!("expected the active record, got {:?}", other),
        }
        assert!(start(&records, "demo").await.is_err());
    }

    #[tokio::test]
    async fn test_start_after_terminal_build() {
        let records = InMemoryRecords::default();
        records.seed("demo", BuildStatus::Success, Some(1));

        let outcome = create_if_idle(&records, "demo").await.unwrap();
        assert!(matches!(outcome, StartOutcome::Created(_)));
    }

    #[tokio::test]
    async fn test_start_rejects_bad_job_name() {
        let records = InMemoryRecords::default();
        assert!(create_if_idle(&records, "../etc").await.is_err());
        assert!(create_if_idle(&records, "").await.is_err());
    }

    #[tokio::test]
    async fn test_stop_marks_active_record_only() {
        let records = InMemoryRecords::default();
        let running = records.seed("demo", BuildStatus::Running, Some(4));
        let done = records.seed("other", BuildStatus::Failed, Some(2));

        stop(&records, running).await.unwrap();
        stop(&records, done).await.unwrap();

        assert_eq!(records.record(running).unwrap().status, BuildStatus::StopRequested);
        assert_eq!(records.record(done).unwrap().status, BuildStatus::Failed);
        assert!(stop(&records, Uuid::new_v4()).await.is_err());
    }

    #[tokio::test]
    async fn test_logs_without_build_number() {
        let records = InMemoryRecords::default();
        let sink = MemoryLogSink::default();
        let id = records.seed("demo", BuildStatus::Pending, None);

        logs(&records, &sink, id, Some(10)).await.unwrap();
        logs(&records, &sink, id, None).await.unwrap();
    }

    #[tokio::test]
    async fn test_list_shows_newest_first() {
        let records = InMemoryRecords::default();
        let oldest = records.seed("demo", BuildStatus::Success, Some(1));
        let middle = records.seed("demo", BuildStatus::Failed, Some(2));
        let newest = records.seed("other", BuildStatus::Running, Some(7));

        let recent = records.list_recent(2).await.unwrap();
        let ids: Vec<Uuid> = recent.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![newest, middle]);
        assert!(!ids.contains(&oldest));

        list(&records, 2).await.unwrap();
        list(&InMemoryRecords::default(), 20).await.unwrap();
    }
}

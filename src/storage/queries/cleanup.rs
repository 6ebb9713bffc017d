//! Cleanup job queries.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Result};

use crate::domain::{CleanupCounts, CleanupJob, CleanupJobId, CleanupPhase, EmailId};

use super::{json_column, parse_time, to_json};

pub fn upsert_cleanup_job(conn: &Connection, job: &CleanupJob) -> Result<()> {
    conn.execute(
        "INSERT INTO cleanup_jobs (id, config, cutoff, cursor, phase, acted, skipped, failed,
                                   created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
         ON CONFLICT(id) DO UPDATE SET
            cursor = excluded.cursor,
            phase = excluded.phase,
            acted = excluded.acted,
            skipped = excluded.skipped,
            failed = excluded.failed,
            updated_at = excluded.updated_at",
        params![
            job.id.as_str(),
            to_json(&job.config)?,
            job.cutoff.to_rfc3339(),
            job.cursor,
            job.phase.as_str(),
            job.counts.acted,
            job.counts.skipped,
            job.counts.failed,
            job.created_at.to_rfc3339(),
            job.updated_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

pub fn get_cleanup_job(conn: &Connection, id: &CleanupJobId) -> Result<Option<CleanupJob>> {
    conn.query_row(
        "SELECT id, config, cutoff, cursor, phase, acted, skipped, failed, created_at, updated_at
         FROM cleanup_jobs WHERE id = ?1",
        params![id.as_str()],
        row_to_job,
    )
    .optional()
}

/// Records that a job has handled a message. Repeat calls are ignored.
pub fn mark_seen(conn: &Connection, job_id: &CleanupJobId, email_id: &EmailId) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO cleanup_seen (job_id, email_id, seen_at) VALUES (?1, ?2, ?3)",
        params![job_id.as_str(), email_id.as_str(), Utc::now().to_rfc3339()],
    )?;
    Ok(())
}

pub fn is_seen(conn: &Connection, job_id: &CleanupJobId, email_id: &EmailId) -> Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM cleanup_seen WHERE job_id = ?1 AND email_id = ?2)",
        params![job_id.as_str(), email_id.as_str()],
        |row| row.get(0),
    )
}

fn row_to_job(row: &rusqlite::Row) -> Result<CleanupJob> {
    let cutoff: String = row.get(2)?;
    let phase: String = row.get(4)?;
    let created_at: String = row.get(8)?;
    let updated_at: String = row.get(9)?;

    let phase = CleanupPhase::parse(&phase).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            4,
            rusqlite::types::Type::Text,
            format!("unknown cleanup phase {:?}", phase).into(),
        )
    })?;

    Ok(CleanupJob {
        id: CleanupJobId(row.get(0)?),
        config: json_column(row, 1)?,
        cutoff: parse_time(&cutoff),
        cursor: row.get(3)?,
        phase,
        counts: CleanupCounts {
            acted: row.get(5)?,
            skipped: row.get(6)?,
            failed: row.get(7)?,
        },
        created_at: parse_time(&created_at),
        updated_at: parse_time(&updated_at),
    })
}

//! Category, sender and categorization job queries.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Result};

use crate::domain::{
    CategorizationJob, CategorizationState, Category, CategoryId, JobStatus, Sender, SenderPage,
};

use super::parse_time;

pub fn list_categories(conn: &Connection) -> Result<Vec<Category>> {
    let mut stmt =
        conn.prepare("SELECT id, name, description FROM categories ORDER BY name COLLATE NOCASE")?;
    let categories = stmt.query_map([], row_to_category)?;
    categories.collect()
}

pub fn upsert_category(conn: &Connection, category: &Category) -> Result<()> {
    conn.execute(
        "INSERT INTO categories (id, name, description) VALUES (?1, ?2, ?3)
         ON CONFLICT(id) DO UPDATE SET
            name = excluded.name,
            description = excluded.description",
        params![category.id.as_str(), category.name, category.description],
    )?;
    Ok(())
}

/// Deletes a category and returns its senders to the uncategorized state.
///
/// Run inside a transaction so no sender is left pointing at nothing.
pub fn delete_category(conn: &Connection, id: &CategoryId) -> Result<()> {
    conn.execute(
        "UPDATE senders SET category_id = NULL, state = ?1, updated_at = ?2
         WHERE category_id = ?3",
        params![
            CategorizationState::Uncategorized.as_str(),
            Utc::now().to_rfc3339(),
            id.as_str()
        ],
    )?;
    conn.execute("DELETE FROM categories WHERE id = ?1", params![id.as_str()])?;
    Ok(())
}

pub fn get_sender(conn: &Connection, address: &str) -> Result<Option<Sender>> {
    conn.query_row(
        "SELECT address, category_id, state FROM senders WHERE address = ?1",
        params![address],
        |row| {
            let state: String = row.get(2)?;
            Ok(Sender {
                address: row.get(0)?,
                category_id: row.get::<_, Option<String>>(1)?.map(CategoryId),
                state: CategorizationState::parse(&state),
            })
        },
    )
    .optional()
}

pub fn sender_category(conn: &Connection, address: &str) -> Result<Option<Category>> {
    conn.query_row(
        "SELECT c.id, c.name, c.description
         FROM senders s JOIN categories c ON c.id = s.category_id
         WHERE s.address = ?1",
        params![address],
        row_to_category,
    )
    .optional()
}

pub fn assign_category(
    conn: &Connection,
    address: &str,
    category_id: Option<&CategoryId>,
    state: CategorizationState,
) -> Result<()> {
    conn.execute(
        "INSERT INTO senders (address, category_id, state, updated_at) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(address) DO UPDATE SET
            category_id = excluded.category_id,
            state = excluded.state,
            updated_at = excluded.updated_at",
        params![
            address,
            category_id.map(CategoryId::as_str),
            state.as_str(),
            Utc::now().to_rfc3339()
        ],
    )?;
    Ok(())
}

/// Updates the state alone, inserting the sender when unknown.
pub fn set_sender_state(
    conn: &Connection,
    address: &str,
    state: CategorizationState,
) -> Result<()> {
    conn.execute(
        "INSERT INTO senders (address, state, updated_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(address) DO UPDATE SET
            state = excluded.state,
            updated_at = excluded.updated_at",
        params![address, state.as_str(), Utc::now().to_rfc3339()],
    )?;
    Ok(())
}

/// One page of senders with no category, ordered by address.
///
/// Fetches one extra row to learn whether another page exists.
pub fn uncategorized_senders(conn: &Connection, offset: u64, limit: u32) -> Result<SenderPage> {
    let mut stmt = conn.prepare(
        "SELECT address FROM senders WHERE category_id IS NULL
         ORDER BY address LIMIT ?1 OFFSET ?2",
    )?;
    let rows = stmt.query_map(params![i64::from(limit) + 1, offset as i64], |row| {
        row.get::<_, String>(0)
    })?;
    let mut senders = rows.collect::<Result<Vec<_>>>()?;

    let more = senders.len() > limit as usize;
    senders.truncate(limit as usize);
    Ok(SenderPage {
        next_offset: more.then(|| offset + senders.len() as u64),
        senders,
    })
}

pub fn upsert_job(conn: &Connection, job: &CategorizationJob) -> Result<()> {
    conn.execute(
        "INSERT INTO categorization_jobs (address, status, enqueued_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(address) DO UPDATE SET status = excluded.status",
        params![
            job.address,
            job_status_to_str(job.status),
            job.enqueued_at.to_rfc3339()
        ],
    )?;
    Ok(())
}

pub fn delete_job(conn: &Connection, address: &str) -> Result<()> {
    conn.execute(
        "DELETE FROM categorization_jobs WHERE address = ?1",
        params![address],
    )?;
    Ok(())
}

/// Live jobs, oldest first.
pub fn list_jobs(conn: &Connection) -> Result<Vec<CategorizationJob>> {
    let mut stmt = conn.prepare(
        "SELECT address, status, enqueued_at FROM categorization_jobs
         ORDER BY enqueued_at, address",
    )?;
    let jobs = stmt.query_map([], |row| {
        let status: String = row.get(1)?;
        let enqueued_at: String = row.get(2)?;
        Ok(CategorizationJob {
            address: row.get(0)?,
            status: str_to_job_status(&status),
            enqueued_at: parse_time(&enqueued_at),
        })
    })?;
    jobs.collect()
}

fn job_status_to_str(status: JobStatus) -> &'static str {
    match status {
        JobStatus::Queued => "queued",
        JobStatus::Running => "running",
    }
}

fn str_to_job_status(s: &str) -> JobStatus {
    match s {
        "running" => JobStatus::Running,
        _ => JobStatus::Queued,
    }
}

fn row_to_category(row: &rusqlite::Row) -> Result<Category> {
    Ok(Category {
        id: CategoryId(row.get(0)?),
        name: row.get(1)?,
        description: row.get(2)?,
    })
}

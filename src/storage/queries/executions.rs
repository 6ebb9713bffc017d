//! Action execution ledger queries.
//!
//! The primary key on `(email_id, rule_id, action_type)` is the claim: an
//! insert that changes no row means another run got there first.

use chrono::Utc;
use rusqlite::{params, Connection, Result};

/// Claims an execution. Returns false if it was already claimed.
pub fn try_claim(
    conn: &Connection,
    email_id: &str,
    rule_id: &str,
    action_type: &str,
) -> Result<bool> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO action_executions (email_id, rule_id, action_type, executed_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![email_id, rule_id, action_type, Utc::now().to_rfc3339()],
    )?;
    Ok(inserted == 1)
}

pub fn release(conn: &Connection, email_id: &str, rule_id: &str, action_type: &str) -> Result<()> {
    conn.execute(
        "DELETE FROM action_executions WHERE email_id = ?1 AND rule_id = ?2 AND action_type = ?3",
        params![email_id, rule_id, action_type],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::schema;

    #[test]
    fn second_claim_loses_until_released() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(schema::CREATE_ACTION_EXECUTIONS).unwrap();

        assert!(try_claim(&conn, "m1", "r1", "ARCHIVE").unwrap());
        assert!(!try_claim(&conn, "m1", "r1", "ARCHIVE").unwrap());
        assert!(try_claim(&conn, "m1", "r1", "LABEL").unwrap());

        release(&conn, "m1", "r1", "ARCHIVE").unwrap();
        assert!(try_claim(&conn, "m1", "r1", "ARCHIVE").unwrap());
    }
}

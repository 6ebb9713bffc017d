//! SQL schema definitions as const strings.
//!
//! Every statement is idempotent; migrations run on each open.

/// Rules in evaluation order. Conditions and actions are JSON.
pub const CREATE_RULES: &str = r#"
CREATE TABLE IF NOT EXISTS rules (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    instructions TEXT,
    group_id TEXT,
    conditions TEXT NOT NULL,
    actions TEXT NOT NULL,
    operator TEXT NOT NULL DEFAULT 'AND',
    automate INTEGER NOT NULL DEFAULT 0,
    run_on_threads INTEGER NOT NULL DEFAULT 0,
    position INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
)
"#;

pub const CREATE_RULES_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_rules_position ON rules(position)
"#;

/// Category names are unique ignoring case.
pub const CREATE_CATEGORIES: &str = r#"
CREATE TABLE IF NOT EXISTS categories (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE COLLATE NOCASE,
    description TEXT
)
"#;

pub const CREATE_SENDERS: &str = r#"
CREATE TABLE IF NOT EXISTS senders (
    address TEXT PRIMARY KEY,
    category_id TEXT REFERENCES categories(id) ON DELETE SET NULL,
    state TEXT NOT NULL DEFAULT 'uncategorized',
    updated_at TEXT NOT NULL
)
"#;

pub const CREATE_SENDERS_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_senders_category ON senders(category_id)
"#;

/// Live categorization jobs only; rows are deleted when a job ends.
pub const CREATE_CATEGORIZATION_JOBS: &str = r#"
CREATE TABLE IF NOT EXISTS categorization_jobs (
    address TEXT PRIMARY KEY,
    status TEXT NOT NULL,
    enqueued_at TEXT NOT NULL
)
"#;

pub const CREATE_CLEANUP_JOBS: &str = r#"
CREATE TABLE IF NOT EXISTS cleanup_jobs (
    id TEXT PRIMARY KEY,
    config TEXT NOT NULL,
    cutoff TEXT NOT NULL,
    cursor TEXT,
    phase TEXT NOT NULL,
    acted INTEGER NOT NULL DEFAULT 0,
    skipped INTEGER NOT NULL DEFAULT 0,
    failed INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
)
"#;

pub const CREATE_CLEANUP_SEEN: &str = r#"
CREATE TABLE IF NOT EXISTS cleanup_seen (
    job_id TEXT NOT NULL REFERENCES cleanup_jobs(id) ON DELETE CASCADE,
    email_id TEXT NOT NULL,
    seen_at TEXT NOT NULL,
    PRIMARY KEY (job_id, email_id)
)
"#;

/// Dedup ledger for executed actions. The primary key is the claim.
pub const CREATE_ACTION_EXECUTIONS: &str = r#"
CREATE TABLE IF NOT EXISTS action_executions (
    email_id TEXT NOT NULL,
    rule_id TEXT NOT NULL,
    action_type TEXT NOT NULL,
    executed_at TEXT NOT NULL,
    PRIMARY KEY (email_id, rule_id, action_type)
)
"#;

/// Returns all migrations in order.
pub fn all_migrations() -> Vec<&'static str> {
    vec![
        CREATE_RULES,
        CREATE_RULES_INDEX,
        CREATE_CATEGORIES,
        CREATE_SENDERS,
        CREATE_SENDERS_INDEX,
        CREATE_CATEGORIZATION_JOBS,
        CREATE_CLEANUP_JOBS,
        CREATE_CLEANUP_SEEN,
        CREATE_ACTION_EXECUTIONS,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn migrations_apply_twice() {
        let conn = Connection::open_in_memory().unwrap();
        for _ in 0..2 {
            for migration in all_migrations() {
                conn.execute_batch(migration).unwrap();
            }
        }
    }

    #[test]
    fn category_names_collide_ignoring_case() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(CREATE_CATEGORIES).unwrap();
        conn.execute("INSERT INTO categories (id, name) VALUES ('a', 'Marketing')", [])
            .unwrap();
        assert!(conn
            .execute("INSERT INTO categories (id, name) VALUES ('b', 'marketing')", [])
            .is_err());
    }
}

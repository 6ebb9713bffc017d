//! Rule queries.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Result};

use crate::domain::{LogicalOperator, Rule, RuleId};

use super::{json_column, parse_time, to_json};

const RULE_COLUMNS: &str = "id, name, instructions, group_id, conditions, actions, operator, \
                            automate, run_on_threads, created_at, updated_at";

/// All rules ordered by position.
pub fn list_rules(conn: &Connection) -> Result<Vec<Rule>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM rules ORDER BY position ASC, created_at ASC",
        RULE_COLUMNS
    ))?;
    let rules = stmt.query_map([], row_to_rule)?;
    rules.collect()
}

pub fn get_rule(conn: &Connection, id: &str) -> Result<Option<Rule>> {
    conn.query_row(
        &format!("SELECT {} FROM rules WHERE id = ?1", RULE_COLUMNS),
        params![id],
        row_to_rule,
    )
    .optional()
}

/// Inserts a rule at the end of the order, or updates it in place.
pub fn upsert_rule(conn: &Connection, rule: &Rule) -> Result<()> {
    conn.execute(
        "INSERT INTO rules (id, name, instructions, group_id, conditions, actions, operator,
                            automate, run_on_threads, position, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9,
                 (SELECT COALESCE(MAX(position), -1) + 1 FROM rules), ?10, ?11)
         ON CONFLICT(id) DO UPDATE SET
            name = excluded.name,
            instructions = excluded.instructions,
            group_id = excluded.group_id,
            conditions = excluded.conditions,
            actions = excluded.actions,
            operator = excluded.operator,
            automate = excluded.automate,
            run_on_threads = excluded.run_on_threads,
            updated_at = excluded.updated_at",
        params![
            rule.id.as_str(),
            rule.name,
            rule.instructions,
            rule.group_id,
            to_json(&rule.conditions)?,
            to_json(&rule.actions)?,
            operator_to_str(rule.operator),
            rule.automate,
            rule.run_on_threads,
            rule.created_at.to_rfc3339(),
            rule.updated_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

pub fn delete_rule(conn: &Connection, id: &str) -> Result<()> {
    conn.execute("DELETE FROM rules WHERE id = ?1", params![id])?;
    Ok(())
}

/// Assigns positions in the order given. Rules not listed keep theirs.
pub fn reorder_rules(conn: &Connection, ids: &[RuleId]) -> Result<()> {
    let now = Utc::now().to_rfc3339();
    let mut stmt =
        conn.prepare("UPDATE rules SET position = ?1, updated_at = ?2 WHERE id = ?3")?;
    for (position, id) in ids.iter().enumerate() {
        stmt.execute(params![position as i64, now, id.as_str()])?;
    }
    Ok(())
}

fn operator_to_str(operator: LogicalOperator) -> &'static str {
    match operator {
        LogicalOperator::And => "AND",
        LogicalOperator::Or => "OR",
    }
}

fn str_to_operator(s: &str) -> LogicalOperator {
    match s {
        "OR" => LogicalOperator::Or,
        _ => LogicalOperator::And,
    }
}

fn row_to_rule(row: &rusqlite::Row) -> Result<Rule> {
    let created_at: String = row.get(9)?;
    let updated_at: String = row.get(10)?;

    Ok(Rule {
        id: RuleId(row.get(0)?),
        name: row.get(1)?,
        instructions: row.get(2)?,
        group_id: row.get(3)?,
        conditions: json_column(row, 4)?,
        actions: json_column(row, 5)?,
        operator: str_to_operator(row.get::<_, String>(6)?.as_str()),
        automate: row.get(7)?,
        run_on_threads: row.get(8)?,
        created_at: parse_time(&created_at),
        updated_at: parse_time(&updated_at),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Action, ActionField, Condition, RuleDraft, StaticCondition};
    use crate::storage::schema;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        for migration in schema::all_migrations() {
            conn.execute_batch(migration).unwrap();
        }
        conn
    }

    fn rule(id: &str) -> Rule {
        RuleDraft {
            name: format!("rule {}", id),
            conditions: vec![
                Condition::Static(StaticCondition {
                    subject: Some("invoice".to_string()),
                    ..Default::default()
                }),
                Condition::Ai {
                    instructions: Some("Is this a bill?".to_string()),
                },
            ],
            actions: vec![Action::label(ActionField::Generate), Action::archive()],
            operator: LogicalOperator::Or,
            automate: true,
            ..Default::default()
        }
        .into_rule(RuleId::from(id))
    }

    #[test]
    fn stored_rule_reads_back_intact() {
        let conn = conn();
        let original = rule("r1");
        upsert_rule(&conn, &original).unwrap();

        let loaded = get_rule(&conn, "r1").unwrap().unwrap();
        assert_eq!(loaded.conditions, original.conditions);
        assert_eq!(loaded.actions, original.actions);
        assert_eq!(loaded.operator, LogicalOperator::Or);
        assert!(loaded.automate);
        assert!(!loaded.run_on_threads);
    }

    #[test]
    fn updates_keep_position() {
        let conn = conn();
        for id in ["a", "b", "c"] {
            upsert_rule(&conn, &rule(id)).unwrap();
        }
        let mut changed = rule("a");
        changed.name = "renamed".to_string();
        upsert_rule(&conn, &changed).unwrap();

        let ids: Vec<String> = list_rules(&conn)
            .unwrap()
            .into_iter()
            .map(|r| r.id.0)
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(get_rule(&conn, "a").unwrap().unwrap().name, "renamed");
    }

    #[test]
    fn reorder_changes_evaluation_order() {
        let conn = conn();
        for id in ["a", "b", "c"] {
            upsert_rule(&conn, &rule(id)).unwrap();
        }
        reorder_rules(&conn, &[RuleId::from("c"), RuleId::from("a"), RuleId::from("b")]).unwrap();

        let ids: Vec<String> = list_rules(&conn)
            .unwrap()
            .into_iter()
            .map(|r| r.id.0)
            .collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[test]
    fn delete_removes_rule() {
        let conn = conn();
        upsert_rule(&conn, &rule("gone")).unwrap();
        delete_rule(&conn, "gone").unwrap();
        assert!(get_rule(&conn, "gone").unwrap().is_none());
    }
}

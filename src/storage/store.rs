//! SQLite-backed implementations of the service storage traits.

use std::path::Path;

use async_trait::async_trait;

use crate::domain::{
    CategorizationJob, CategorizationState, Category, CategoryId, CleanupJob, CleanupJobId,
    EmailId, Rule, RuleId, Sender, SenderPage,
};
use crate::services::{
    CategoryError, CategoryStorage, CleanupError, CleanupStorage, ExecutionKey, ExecutionLedger,
    ExecutorError, RuleError, RuleStorage,
};

use super::database::{Database, DatabaseError, Result};
use super::queries::{categories, cleanup, executions, rules};

impl From<DatabaseError> for RuleError {
    fn from(e: DatabaseError) -> Self {
        RuleError::Storage(e.to_string())
    }
}

impl From<DatabaseError> for CategoryError {
    fn from(e: DatabaseError) -> Self {
        CategoryError::Storage(e.to_string())
    }
}

impl From<DatabaseError> for CleanupError {
    fn from(e: DatabaseError) -> Self {
        CleanupError::Storage(e.to_string())
    }
}

impl From<DatabaseError> for ExecutorError {
    fn from(e: DatabaseError) -> Self {
        ExecutorError::Ledger(e.to_string())
    }
}

/// Rules, categories, cleanup jobs and the execution ledger in one SQLite
/// database.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    db: Database,
}

impl SqliteStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(Database::open(path).await?))
    }

    pub async fn in_memory() -> Result<Self> {
        Ok(Self::new(Database::open_in_memory().await?))
    }

    pub fn db(&self) -> &Database {
        &self.db
    }
}

#[async_trait]
impl RuleStorage for SqliteStore {
    async fn list_rules(&self) -> std::result::Result<Vec<Rule>, RuleError> {
        Ok(self
            .db
            .with_conn(|conn| Ok(rules::list_rules(conn)?))
            .await?)
    }

    async fn get_rule(&self, id: &RuleId) -> std::result::Result<Option<Rule>, RuleError> {
        let id = id.clone();
        Ok(self
            .db
            .with_conn(move |conn| Ok(rules::get_rule(conn, id.as_str())?))
            .await?)
    }

    async fn save_rule(&self, rule: &Rule) -> std::result::Result<(), RuleError> {
        let rule = rule.clone();
        Ok(self
            .db
            .with_conn(move |conn| Ok(rules::upsert_rule(conn, &rule)?))
            .await?)
    }

    async fn delete_rule(&self, id: &RuleId) -> std::result::Result<(), RuleError> {
        let id = id.clone();
        Ok(self
            .db
            .with_conn(move |conn| Ok(rules::delete_rule(conn, id.as_str())?))
            .await?)
    }

    async fn reorder_rules(&self, ids: &[RuleId]) -> std::result::Result<(), RuleError> {
        let ids = ids.to_vec();
        Ok(self
            .db
            .transaction(move |tx| Ok(rules::reorder_rules(tx, &ids)?))
            .await?)
    }
}

#[async_trait]
impl CategoryStorage for SqliteStore {
    async fn list_categories(&self) -> std::result::Result<Vec<Category>, CategoryError> {
        Ok(self
            .db
            .with_conn(|conn| Ok(categories::list_categories(conn)?))
            .await?)
    }

    async fn save_category(&self, category: &Category) -> std::result::Result<(), CategoryError> {
        let category = category.clone();
        Ok(self
            .db
            .with_conn(move |conn| Ok(categories::upsert_category(conn, &category)?))
            .await?)
    }

    async fn delete_category(&self, id: &CategoryId) -> std::result::Result<(), CategoryError> {
        let id = id.clone();
        Ok(self
            .db
            .transaction(move |tx| Ok(categories::delete_category(tx, &id)?))
            .await?)
    }

    async fn get_sender(
        &self,
        address: &str,
    ) -> std::result::Result<Option<Sender>, CategoryError> {
        let address = address.to_string();
        Ok(self
            .db
            .with_conn(move |conn| Ok(categories::get_sender(conn, &address)?))
            .await?)
    }

    async fn sender_category(
        &self,
        address: &str,
    ) -> std::result::Result<Option<Category>, CategoryError> {
        let address = address.to_string();
        Ok(self
            .db
            .with_conn(move |conn| Ok(categories::sender_category(conn, &address)?))
            .await?)
    }

    async fn assign_category(
        &self,
        address: &str,
        category_id: Option<&CategoryId>,
        state: CategorizationState,
    ) -> std::result::Result<(), CategoryError> {
        let address = address.to_string();
        let category_id = category_id.cloned();
        Ok(self
            .db
            .with_conn(move |conn| {
                Ok(categories::assign_category(
                    conn,
                    &address,
                    category_id.as_ref(),
                    state,
                )?)
            })
            .await?)
    }

    async fn set_sender_state(
        &self,
        address: &str,
        state: CategorizationState,
    ) -> std::result::Result<(), CategoryError> {
        let address = address.to_string();
        Ok(self
            .db
            .with_conn(move |conn| Ok(categories::set_sender_state(conn, &address, state)?))
            .await?)
    }

    async fn uncategorized_senders(
        &self,
        offset: u64,
        limit: u32,
    ) -> std::result::Result<SenderPage, CategoryError> {
        Ok(self
            .db
            .with_conn(move |conn| Ok(categories::uncategorized_senders(conn, offset, limit)?))
            .await?)
    }

    async fn save_job(&self, job: &CategorizationJob) -> std::result::Result<(), CategoryError> {
        let job = job.clone();
        Ok(self
            .db
            .with_conn(move |conn| Ok(categories::upsert_job(conn, &job)?))
            .await?)
    }

    async fn delete_job(&self, address: &str) -> std::result::Result<(), CategoryError> {
        let address = address.to_string();
        Ok(self
            .db
            .with_conn(move |conn| Ok(categories::delete_job(conn, &address)?))
            .await?)
    }

    async fn list_jobs(&self) -> std::result::Result<Vec<CategorizationJob>, CategoryError> {
        Ok(self
            .db
            .with_conn(|conn| Ok(categories::list_jobs(conn)?))
            .await?)
    }
}

#[async_trait]
impl CleanupStorage for SqliteStore {
    async fn save_cleanup_job(&self, job: &CleanupJob) -> std::result::Result<(), CleanupError> {
        let job = job.clone();
        Ok(self
            .db
            .with_conn(move |conn| Ok(cleanup::upsert_cleanup_job(conn, &job)?))
            .await?)
    }

    async fn get_cleanup_job(
        &self,
        id: &CleanupJobId,
    ) -> std::result::Result<Option<CleanupJob>, CleanupError> {
        let id = id.clone();
        Ok(self
            .db
            .with_conn(move |conn| Ok(cleanup::get_cleanup_job(conn, &id)?))
            .await?)
    }

    async fn mark_seen(
        &self,
        job_id: &CleanupJobId,
        email_id: &EmailId,
    ) -> std::result::Result<(), CleanupError> {
        let (job_id, email_id) = (job_id.clone(), email_id.clone());
        Ok(self
            .db
            .with_conn(move |conn| Ok(cleanup::mark_seen(conn, &job_id, &email_id)?))
            .await?)
    }

    async fn is_seen(
        &self,
        job_id: &CleanupJobId,
        email_id: &EmailId,
    ) -> std::result::Result<bool, CleanupError> {
        let (job_id, email_id) = (job_id.clone(), email_id.clone());
        Ok(self
            .db
            .with_conn(move |conn| Ok(cleanup::is_seen(conn, &job_id, &email_id)?))
            .await?)
    }
}

#[async_trait]
impl ExecutionLedger for SqliteStore {
    async fn try_claim(&self, key: &ExecutionKey) -> std::result::Result<bool, ExecutorError> {
        let key = key.clone();
        Ok(self
            .db
            .with_conn(move |conn| {
                Ok(executions::try_claim(
                    conn,
                    key.email_id.as_str(),
                    key.rule_id.as_str(),
                    key.action_type.as_str(),
                )?)
            })
            .await?)
    }

    async fn release(&self, key: &ExecutionKey) -> std::result::Result<(), ExecutorError> {
        let key = key.clone();
        Ok(self
            .db
            .with_conn(move |conn| {
                Ok(executions::release(
                    conn,
                    key.email_id.as_str(),
                    key.rule_id.as_str(),
                    key.action_type.as_str(),
                )?)
            })
            .await?)
    }
}

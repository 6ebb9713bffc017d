//! Two-phase bulk cleanup.
//!
//! A cleanup job first runs a bounded preview batch, then waits for the user
//! to continue before processing the rest of the old mail. Every message the
//! job looks at is recorded as seen, so the continuation (or a retry after a
//! crash) never applies the action to the same message twice.
//!
//! ```text
//! previewing -> awaiting_continuation -> continuing -> done
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::config::CleanupSettings;
use crate::domain::{
    Action, ActionField, CleanupAction, CleanupConfig, CleanupCounts, CleanupJob, CleanupJobId,
    CleanupPhase, Email, EmailId, RuleId, SkipFilters, SkipReason,
};
use crate::providers::ai::{parse_yes_no, AiClassifier};
use crate::providers::email::{MailProvider, ProviderError};

use super::action_executor::{ActionExecutor, ActionOwner, ActionStatus, ExecutorError};

/// Errors that can occur during cleanup operations.
#[derive(Debug, Error)]
pub enum CleanupError {
    #[error("cleanup job not found: {0}")]
    NotFound(String),

    #[error("invalid cleanup config: {0}")]
    InvalidConfig(String),

    /// Listing messages failed. The job keeps its cursor and counts; an
    /// interrupted preview resumes with [`CleanupOrchestrator::resume_preview`]
    /// and an interrupted continuation with [`CleanupOrchestrator::continue_job`].
    #[error("mail provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("storage error: {0}")]
    Storage(String),
}

impl From<ExecutorError> for CleanupError {
    fn from(e: ExecutorError) -> Self {
        CleanupError::Storage(e.to_string())
    }
}

/// Result type for cleanup operations.
pub type Result<T> = std::result::Result<T, CleanupError>;

/// Storage trait for cleanup jobs and their seen sets.
#[async_trait]
pub trait CleanupStorage: Send + Sync {
    async fn save_cleanup_job(&self, job: &CleanupJob) -> Result<()>;

    async fn get_cleanup_job(&self, id: &CleanupJobId) -> Result<Option<CleanupJob>>;

    async fn mark_seen(&self, job_id: &CleanupJobId, email_id: &EmailId) -> Result<()>;

    async fn is_seen(&self, job_id: &CleanupJobId, email_id: &EmailId) -> Result<bool>;
}

/// State of a job after a `start_preview` or `continue_job` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleanupSummary {
    pub job_id: CleanupJobId,
    pub phase: CleanupPhase,
    /// Totals across every phase so far.
    pub counts: CleanupCounts,
}

impl From<&CleanupJob> for CleanupSummary {
    fn from(job: &CleanupJob) -> Self {
        Self {
            job_id: job.id.clone(),
            phase: job.phase,
            counts: job.counts,
        }
    }
}

const KEEP_PROMPT: &str = "You help a user clean up old email. Given the user's instructions \
and an email, answer YES if the email should be kept untouched, or NO if it can be cleaned up. \
Answer with one word.";

enum Decision {
    Skip(SkipReason),
    Act,
}

type JobLocks = HashMap<CleanupJobId, Arc<tokio::sync::Mutex<()>>>;
type LockTable = Mutex<JobLocks>;

fn lock_table(running: &LockTable) -> MutexGuard<'_, JobLocks> {
    match running.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Holds a job's run lock. The table entry goes away with the last holder.
struct JobGuard<'a> {
    running: &'a LockTable,
    id: CleanupJobId,
    guard: Option<tokio::sync::OwnedMutexGuard<()>>,
}

impl Drop for JobGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut running = lock_table(self.running);
        if running
            .get(&self.id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            running.remove(&self.id);
        }
    }
}

/// Runs cleanup jobs. One run at a time per job id.
pub struct CleanupOrchestrator {
    mail: Arc<dyn MailProvider>,
    executor: ActionExecutor,
    classifier: Arc<dyn AiClassifier>,
    storage: Arc<dyn CleanupStorage>,
    settings: CleanupSettings,
    running: LockTable,
}

impl CleanupOrchestrator {
    pub fn new(
        mail: Arc<dyn MailProvider>,
        executor: ActionExecutor,
        classifier: Arc<dyn AiClassifier>,
        storage: Arc<dyn CleanupStorage>,
        settings: CleanupSettings,
    ) -> Self {
        Self {
            mail,
            executor,
            classifier,
            storage,
            settings,
            running: Mutex::new(HashMap::new()),
        }
    }

    /// Defaults: archive mail older than a week, preview batch from settings.
    pub fn default_config(&self) -> CleanupConfig {
        CleanupConfig {
            days_old: self.settings.default_days_old,
            action: CleanupAction::Archive,
            skips: SkipFilters::default(),
            max_emails: self.settings.preview_count,
            instructions: None,
        }
    }

    /// Creates a job and runs its preview batch.
    pub async fn start_preview(&self, config: CleanupConfig) -> Result<CleanupJobId> {
        if config.max_emails == 0 {
            return Err(CleanupError::InvalidConfig(
                "max_emails must be at least 1".to_string(),
            ));
        }
        let days_old = config.days_old;
        let mut job = CleanupJob::new(config).ok_or_else(|| {
            CleanupError::InvalidConfig(format!("days_old {} is out of range", days_old))
        })?;
        let _guard = self.lock_job(&job.id).await;

        self.storage.save_cleanup_job(&job).await?;
        tracing::info!(
            job_id = %job.id,
            days_old = job.config.days_old,
            action = ?job.config.action,
            max_emails = job.config.max_emails,
            "cleanup preview started"
        );

        self.finish_preview(&mut job).await?;
        Ok(job.id)
    }

    /// Finishes a preview that was interrupted, e.g. by a listing error.
    ///
    /// The remaining preview budget is spent from the persisted cursor and
    /// the job then awaits continuation. Jobs past the preview are returned
    /// unchanged.
    pub async fn resume_preview(&self, id: &CleanupJobId) -> Result<CleanupSummary> {
        let _guard = self.lock_job(id).await;

        let mut job = self.load(id).await?;
        if job.phase != CleanupPhase::Previewing {
            tracing::debug!(job_id = %job.id, phase = job.phase.as_str(), "resume ignored");
            return Ok(CleanupSummary::from(&job));
        }

        tracing::info!(job_id = %job.id, "resuming interrupted cleanup preview");
        self.finish_preview(&mut job).await?;
        Ok(CleanupSummary::from(&job))
    }

    async fn finish_preview(&self, job: &mut CleanupJob) -> Result<()> {
        let attempted = job.counts.acted + job.counts.failed;
        let remaining = job.config.max_emails.saturating_sub(attempted);
        if remaining > 0 {
            self.run_phase(job, Some(remaining)).await?;
        }
        job.advance();
        self.storage.save_cleanup_job(job).await?;

        tracing::info!(
            job_id = %job.id,
            acted = job.counts.acted,
            skipped = job.counts.skipped,
            failed = job.counts.failed,
            "cleanup preview finished"
        );
        Ok(())
    }

    /// Processes the rest of the job's mail.
    ///
    /// Only a job awaiting continuation starts a new run; a job left in
    /// `continuing` by an interrupted run picks up at its cursor. Any other
    /// phase returns the job's current state unchanged.
    pub async fn continue_job(&self, id: &CleanupJobId) -> Result<CleanupSummary> {
        let _guard = self.lock_job(id).await;

        let mut job = self.load(id).await?;

        match job.phase {
            CleanupPhase::AwaitingContinuation => {
                job.advance();
                self.storage.save_cleanup_job(&job).await?;
            }
            CleanupPhase::Continuing => {
                tracing::info!(job_id = %job.id, "resuming interrupted cleanup");
            }
            CleanupPhase::Previewing | CleanupPhase::Done => {
                tracing::debug!(job_id = %job.id, phase = job.phase.as_str(), "continue ignored");
                return Ok(CleanupSummary::from(&job));
            }
        }

        self.run_phase(&mut job, self.settings.continuation_limit).await?;
        job.advance();
        self.storage.save_cleanup_job(&job).await?;

        tracing::info!(
            job_id = %job.id,
            acted = job.counts.acted,
            skipped = job.counts.skipped,
            failed = job.counts.failed,
            "cleanup finished"
        );
        Ok(CleanupSummary::from(&job))
    }

    pub async fn status(&self, id: &CleanupJobId) -> Result<CleanupSummary> {
        Ok(CleanupSummary::from(&self.load(id).await?))
    }

    async fn load(&self, id: &CleanupJobId) -> Result<CleanupJob> {
        self.storage
            .get_cleanup_job(id)
            .await?
            .ok_or_else(|| CleanupError::NotFound(id.to_string()))
    }

    async fn lock_job(&self, id: &CleanupJobId) -> JobGuard<'_> {
        let lock = Arc::clone(lock_table(&self.running).entry(id.clone()).or_default());
        JobGuard {
            running: &self.running,
            id: id.clone(),
            guard: Some(lock.lock_owned().await),
        }
    }

    /// Runs one phase and persists the job even when the phase fails, so
    /// counts and cursor survive for a resume.
    async fn run_phase(&self, job: &mut CleanupJob, limit: Option<u32>) -> Result<()> {
        let result = self.walk(job, limit).await;
        if let Err(e) = &result {
            tracing::warn!(job_id = %job.id, error = %e, "cleanup phase interrupted");
        }
        self.storage.save_cleanup_job(job).await?;
        result
    }

    /// Walks pages from the job's cursor until the mail runs out or the
    /// action has been attempted on `limit` messages in this phase.
    async fn walk(&self, job: &mut CleanupJob, limit: Option<u32>) -> Result<()> {
        let owner = ActionOwner {
            rule_id: RuleId::from(format!("cleanup-{}", job.id)),
            rule_name: "Cleanup".to_string(),
            instructions: job.config.instructions.clone(),
        };
        let actions = self.cleanup_actions(job.config.action);
        let mut attempted = 0u32;

        loop {
            let page = self
                .mail
                .list_messages_before(job.cutoff, job.cursor.clone(), self.settings.page_size)
                .await?;

            let mut budget_spent = false;
            for email in &page.messages {
                if limit.is_some_and(|limit| attempted >= limit) {
                    budget_spent = true;
                    break;
                }
                if self.storage.is_seen(&job.id, &email.id).await? {
                    continue;
                }

                match self.decide(job, email).await {
                    Decision::Skip(reason) => {
                        tracing::debug!(
                            job_id = %job.id,
                            email_id = %email.id,
                            reason = ?reason,
                            "message skipped"
                        );
                        job.counts.skipped += 1;
                    }
                    Decision::Act => {
                        let report = self.executor.execute_actions(email, &owner, &actions).await?;
                        let main = report.outcomes.last().map(|o| &o.status);
                        if matches!(main, Some(ActionStatus::Failed { .. })) {
                            job.counts.failed += 1;
                        } else {
                            job.counts.acted += 1;
                        }
                        attempted += 1;
                    }
                }
                self.storage.mark_seen(&job.id, &email.id).await?;
            }

            // The cursor stays on a partly processed page; seen messages are
            // filtered when it is read again.
            if budget_spent {
                break;
            }
            match page.next_page_token {
                Some(token) => {
                    job.cursor = Some(token);
                    self.storage.save_cleanup_job(job).await?;
                }
                None => break,
            }
        }

        Ok(())
    }

    fn cleanup_actions(&self, action: CleanupAction) -> Vec<Action> {
        let label = match action {
            CleanupAction::Archive => &self.settings.archived_label,
            CleanupAction::MarkRead => &self.settings.read_label,
        };
        let mut actions = Vec::with_capacity(2);
        if !label.trim().is_empty() {
            actions.push(Action::label(ActionField::literal(label.clone())));
        }
        actions.push(Action::new(action.action_type()));
        actions
    }

    async fn decide(&self, job: &CleanupJob, email: &Email) -> Decision {
        if let Some(reason) = job.config.skips.skip_reason(email) {
            return Decision::Skip(reason);
        }

        let Some(instructions) = job
            .config
            .instructions
            .as_deref()
            .filter(|i| !i.trim().is_empty())
        else {
            return Decision::Act;
        };

        let prompt = format!("{}\n\nInstructions: {}", KEEP_PROMPT, instructions.trim());
        match self.classifier.classify(&email.to_prompt_text(), &prompt).await {
            Ok(verdict) => match parse_yes_no(&verdict) {
                Some(false) => Decision::Act,
                Some(true) => Decision::Skip(SkipReason::Instructions),
                None => {
                    tracing::warn!(
                        job_id = %job.id,
                        email_id = %email.id,
                        verdict = %verdict,
                        "unreadable keep verdict, keeping message"
                    );
                    Decision::Skip(SkipReason::Instructions)
                }
            },
            Err(e) => {
                tracing::warn!(
                    job_id = %job.id,
                    email_id = %email.id,
                    error = %e,
                    "keep check failed, keeping message"
                );
                Decision::Skip(SkipReason::Instructions)
            }
        }
    }
}

//! Action execution against the mailbox.
//!
//! [`ActionExecutor`] performs the actions of a matched rule. Each action is
//! claimed in the [`ExecutionLedger`] under its (email, rule, action type)
//! key before the provider is called, so a repeated run never duplicates a
//! visible effect. Actions are isolated from one another: a failing webhook
//! does not stop the archive next to it.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ExecutorSettings;
use crate::domain::{Action, ActionField, ActionType, Email, EmailId, Rule, RuleId};
use crate::providers::ai::{AiClassifier, LlmError};
use crate::providers::email::{MailProvider, OutgoingEmail, ProviderError, WebhookPayload};

/// Errors that abort an execution run.
///
/// Individual action failures are not errors; they are reported in the
/// [`ExecutionReport`].
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("execution ledger unavailable: {0}")]
    Ledger(String),
}

/// Result type for executor operations.
pub type Result<T> = std::result::Result<T, ExecutorError>;

/// Identity of one action applied to one email on behalf of one rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExecutionKey {
    pub email_id: EmailId,
    pub rule_id: RuleId,
    pub action_type: ActionType,
}

/// Dedup record of executed actions.
#[async_trait]
pub trait ExecutionLedger: Send + Sync {
    /// Atomically records `key`. Returns false if it was already recorded.
    async fn try_claim(&self, key: &ExecutionKey) -> Result<bool>;

    /// Forgets `key` so a failed action can be attempted again later.
    async fn release(&self, key: &ExecutionKey) -> Result<()>;
}

/// Process-local ledger.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    claimed: Mutex<HashSet<ExecutionKey>>,
}

#[async_trait]
impl ExecutionLedger for InMemoryLedger {
    async fn try_claim(&self, key: &ExecutionKey) -> Result<bool> {
        let mut claimed = self
            .claimed
            .lock()
            .map_err(|e| ExecutorError::Ledger(e.to_string()))?;
        Ok(claimed.insert(key.clone()))
    }

    async fn release(&self, key: &ExecutionKey) -> Result<()> {
        let mut claimed = self
            .claimed
            .lock()
            .map_err(|e| ExecutorError::Ledger(e.to_string()))?;
        claimed.remove(key);
        Ok(())
    }
}

/// Who the actions run for. Rules use their own id; cleanup jobs use a
/// synthetic one.
#[derive(Debug, Clone)]
pub struct ActionOwner {
    pub rule_id: RuleId,
    pub rule_name: String,
    /// Context for generated fields.
    pub instructions: Option<String>,
}

impl From<&Rule> for ActionOwner {
    fn from(rule: &Rule) -> Self {
        Self {
            rule_id: rule.id.clone(),
            rule_name: rule.name.clone(),
            instructions: rule.instructions.clone(),
        }
    }
}

/// What happened to one action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ActionStatus {
    Executed { attempts: u32 },
    /// The ledger already held this action; nothing was sent.
    ///
    /// A claim is released when its action finally fails, so this can also
    /// describe a run in another process whose effect never happened. A run
    /// through the same executor still holding the claim is `InFlight`.
    AlreadyExecuted,
    /// Another call on this executor holds the claim and has not finished.
    /// Its effect may still fail; run again later to find out.
    InFlight,
    Failed { error: String, attempts: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub action_type: ActionType,
    #[serde(flatten)]
    pub status: ActionStatus,
}

/// Per-action results for one email.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub email_id: EmailId,
    pub rule_id: RuleId,
    pub outcomes: Vec<ActionOutcome>,
}

impl ExecutionReport {
    /// Number of actions that ran in this call.
    pub fn executed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, ActionStatus::Executed { .. }))
            .count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &ActionOutcome> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, ActionStatus::Failed { .. }))
    }

    pub fn all_succeeded(&self) -> bool {
        self.failures().next().is_none()
    }
}

#[derive(Debug, Error)]
enum ActionError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("could not generate {field}: {source}")]
    Generation {
        field: &'static str,
        #[source]
        source: LlmError,
    },

    #[error("missing {0}")]
    MissingField(&'static str),
}

impl ActionError {
    fn is_transient(&self) -> bool {
        match self {
            ActionError::Provider(e) => e.is_transient(),
            _ => false,
        }
    }
}

/// A fully resolved action, ready to dispatch.
#[derive(Debug, Default)]
struct Resolved {
    label: Option<String>,
    subject: Option<String>,
    content: Option<String>,
    to: Option<String>,
    cc: Option<String>,
    bcc: Option<String>,
    url: Option<String>,
}

/// Executes actions with idempotency and bounded retry.
#[derive(Clone)]
pub struct ActionExecutor {
    mail: Arc<dyn MailProvider>,
    classifier: Arc<dyn AiClassifier>,
    ledger: Arc<dyn ExecutionLedger>,
    settings: ExecutorSettings,
    /// Claims held by calls on this executor (and its clones) right now.
    in_flight: Arc<Mutex<HashSet<ExecutionKey>>>,
}

impl ActionExecutor {
    pub fn new(
        mail: Arc<dyn MailProvider>,
        classifier: Arc<dyn AiClassifier>,
        ledger: Arc<dyn ExecutionLedger>,
        settings: ExecutorSettings,
    ) -> Self {
        Self {
            mail,
            classifier,
            ledger,
            settings,
            in_flight: Arc::default(),
        }
    }

    fn in_flight(&self) -> std::sync::MutexGuard<'_, HashSet<ExecutionKey>> {
        match self.in_flight.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Runs every action of `rule` against `email`.
    pub async fn execute(&self, email: &Email, rule: &Rule) -> Result<ExecutionReport> {
        self.execute_actions(email, &ActionOwner::from(rule), &rule.actions)
            .await
    }

    /// Runs `actions` against `email` on behalf of `owner`.
    pub async fn execute_actions(
        &self,
        email: &Email,
        owner: &ActionOwner,
        actions: &[Action],
    ) -> Result<ExecutionReport> {
        let mut outcomes = Vec::with_capacity(actions.len());
        for action in actions {
            let key = ExecutionKey {
                email_id: email.id.clone(),
                rule_id: owner.rule_id.clone(),
                action_type: action.action_type,
            };

            let status = if !self.in_flight().insert(key.clone()) {
                Some(ActionStatus::InFlight)
            } else {
                let claimed = self.ledger.try_claim(&key).await;
                if !matches!(claimed, Ok(true)) {
                    self.in_flight().remove(&key);
                }
                (!claimed?).then_some(ActionStatus::AlreadyExecuted)
            };
            if let Some(status) = status {
                tracing::debug!(
                    email_id = %email.id,
                    rule_id = %owner.rule_id,
                    action = action.action_type.as_str(),
                    status = ?status,
                    "action already claimed"
                );
                outcomes.push(ActionOutcome {
                    action_type: action.action_type,
                    status,
                });
                continue;
            }

            let status = match self.run_with_retry(email, owner, action).await {
                Ok(attempts) => ActionStatus::Executed { attempts },
                Err((error, attempts)) => {
                    tracing::warn!(
                        email_id = %email.id,
                        rule_id = %owner.rule_id,
                        action = action.action_type.as_str(),
                        attempts,
                        error = %error,
                        "action failed"
                    );
                    let released = self.ledger.release(&key).await;
                    self.in_flight().remove(&key);
                    released?;
                    ActionStatus::Failed {
                        error: error.to_string(),
                        attempts,
                    }
                }
            };
            self.in_flight().remove(&key);
            outcomes.push(ActionOutcome {
                action_type: action.action_type,
                status,
            });
        }

        Ok(ExecutionReport {
            email_id: email.id.clone(),
            rule_id: owner.rule_id.clone(),
            outcomes,
        })
    }

    async fn run_with_retry(
        &self,
        email: &Email,
        owner: &ActionOwner,
        action: &Action,
    ) -> std::result::Result<u32, (ActionError, u32)> {
        let resolved = self
            .resolve(email, owner, action)
            .await
            .map_err(|e| (e, 0))?;

        let max_attempts = if action.action_type.is_retryable() {
            self.settings.max_attempts.max(1)
        } else {
            1
        };

        let mut attempt = 1;
        loop {
            match self.dispatch(email, owner, action.action_type, &resolved).await {
                Ok(()) => return Ok(attempt),
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    let delay = match &e {
                        ActionError::Provider(p) => p
                            .retry_after_secs()
                            .map(std::time::Duration::from_secs)
                            .unwrap_or_else(|| self.settings.backoff(attempt)),
                        _ => self.settings.backoff(attempt),
                    };
                    tracing::debug!(
                        email_id = %email.id,
                        action = action.action_type.as_str(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "retrying action"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err((e, attempt)),
            }
        }
    }

    async fn resolve(
        &self,
        email: &Email,
        owner: &ActionOwner,
        action: &Action,
    ) -> std::result::Result<Resolved, ActionError> {
        Ok(Resolved {
            label: self.field(email, owner, "label", &action.label).await?,
            subject: self.field(email, owner, "subject", &action.subject).await?,
            content: self.field(email, owner, "content", &action.content).await?,
            to: self.field(email, owner, "to", &action.to).await?,
            cc: self.field(email, owner, "cc", &action.cc).await?,
            bcc: self.field(email, owner, "bcc", &action.bcc).await?,
            url: self.field(email, owner, "url", &action.url).await?,
        })
    }

    async fn field(
        &self,
        email: &Email,
        owner: &ActionOwner,
        name: &'static str,
        field: &Option<ActionField>,
    ) -> std::result::Result<Option<String>, ActionError> {
        match field {
            None => Ok(None),
            Some(ActionField::Literal(value)) => Ok(Some(value.clone())),
            Some(ActionField::Generate) => {
                let instructions = format!(
                    "Write the {} for an automated email action. Reply with the value only.\n\
                     Rule: {}\nInstructions: {}",
                    name,
                    owner.rule_name,
                    owner.instructions.as_deref().unwrap_or("none"),
                );
                let value = self
                    .classifier
                    .classify(&email.to_prompt_text(), &instructions)
                    .await
                    .map_err(|source| ActionError::Generation {
                        field: name,
                        source,
                    })?;
                Ok(Some(value))
            }
        }
    }

    async fn dispatch(
        &self,
        email: &Email,
        owner: &ActionOwner,
        action_type: ActionType,
        resolved: &Resolved,
    ) -> std::result::Result<(), ActionError> {
        let id = &email.id;
        match action_type {
            ActionType::Archive => self.mail.archive(id).await?,
            ActionType::MarkRead => self.mail.mark_read(id).await?,
            ActionType::MarkSpam => self.mail.mark_spam(id).await?,
            ActionType::Label => {
                let name = required(&resolved.label, "label")?;
                self.mail.label(id, name).await?
            }
            ActionType::Forward => {
                let to = required(&resolved.to, "to")?;
                self.mail.forward(id, to).await?
            }
            ActionType::Reply => {
                let content = required(&resolved.content, "content")?;
                self.mail.reply(id, content).await?
            }
            ActionType::DraftEmail => {
                let content = required(&resolved.content, "content")?;
                self.mail.draft_email(id, content).await?
            }
            ActionType::SendEmail => {
                let outgoing = OutgoingEmail {
                    to: required(&resolved.to, "to")?.to_string(),
                    cc: resolved.cc.clone().filter(|v| !v.trim().is_empty()),
                    bcc: resolved.bcc.clone().filter(|v| !v.trim().is_empty()),
                    subject: resolved.subject.clone().unwrap_or_default(),
                    content: required(&resolved.content, "content")?.to_string(),
                };
                self.mail.send_email(&outgoing).await?
            }
            ActionType::CallWebhook => {
                let url = required(&resolved.url, "url")?;
                let payload = WebhookPayload {
                    email_id: email.id.to_string(),
                    thread_id: email.thread_id.to_string(),
                    rule_id: owner.rule_id.to_string(),
                    rule_name: owner.rule_name.clone(),
                    from: email.sender(),
                    subject: email.subject.clone(),
                    snippet: email.snippet.clone(),
                };
                self.mail.call_webhook(url, &payload).await?
            }
        }
        Ok(())
    }
}

fn required<'a>(
    value: &'a Option<String>,
    field: &'static str,
) -> std::result::Result<&'a str, ActionError> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or(ActionError::MissingField(field))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Address, RuleDraft, ThreadId};
    use crate::providers::ai::LlmResult;
    use crate::providers::email::MessagePage;
    use chrono::{DateTime, Utc};
    use mockall::predicate::eq;

    mockall::mock! {
        pub Mail {}

        #[async_trait]
        impl MailProvider for Mail {
            async fn archive(&self, id: &EmailId) -> crate::providers::email::Result<()>;
            async fn mark_read(&self, id: &EmailId) -> crate::providers::email::Result<()>;
            async fn mark_spam(&self, id: &EmailId) -> crate::providers::email::Result<()>;
            async fn label(&self, id: &EmailId, name: &str) -> crate::providers::email::Result<()>;
            async fn forward(&self, id: &EmailId, to: &str) -> crate::providers::email::Result<()>;
            async fn reply(&self, id: &EmailId, content: &str) -> crate::providers::email::Result<()>;
            async fn send_email(&self, email: &OutgoingEmail) -> crate::providers::email::Result<()>;
            async fn draft_email(&self, id: &EmailId, content: &str) -> crate::providers::email::Result<()>;
            async fn call_webhook(&self, url: &str, payload: &WebhookPayload) -> crate::providers::email::Result<()>;
            async fn list_messages_before(
                &self,
                cutoff: DateTime<Utc>,
                page_token: Option<String>,
                limit: u32,
            ) -> crate::providers::email::Result<MessagePage>;
            async fn recent_from_sender(&self, address: &str, limit: u32) -> crate::providers::email::Result<Vec<Email>>;
        }
    }

    struct StaticText(&'static str);

    #[async_trait]
    impl AiClassifier for StaticText {
        async fn classify(&self, _text: &str, _instructions: &str) -> LlmResult<String> {
            Ok(self.0.to_string())
        }
    }

    fn settings() -> ExecutorSettings {
        ExecutorSettings {
            max_attempts: 3,
            base_backoff_ms: 1,
            max_backoff_ms: 2,
        }
    }

    fn executor(mail: MockMail) -> ActionExecutor {
        ActionExecutor::new(
            Arc::new(mail),
            Arc::new(StaticText("Thanks, noted.")),
            Arc::new(InMemoryLedger::default()),
            settings(),
        )
    }

    fn email() -> Email {
        Email {
            id: EmailId::from("m1"),
            thread_id: ThreadId::from("t1"),
            from: Address::new("Boss@Example.com"),
            to: vec![Address::new("me@example.com")],
            cc: Vec::new(),
            subject: Some("Quarterly numbers".to_string()),
            body_text: None,
            snippet: "See attached".to_string(),
            date: Utc::now(),
            is_read: false,
            is_starred: false,
            is_thread_reply: false,
            has_user_reply: false,
            labels: Vec::new(),
            attachments: Vec::new(),
        }
    }

    fn rule(actions: Vec<Action>) -> Rule {
        RuleDraft {
            name: "test".to_string(),
            actions,
            ..Default::default()
        }
        .into_rule(RuleId::from("r1"))
    }

    fn connection_error() -> ProviderError {
        ProviderError::Connection("reset by peer".to_string())
    }

    #[tokio::test]
    async fn repeated_execution_is_idempotent() {
        let mut mail = MockMail::new();
        mail.expect_archive()
            .with(eq(EmailId::from("m1")))
            .times(1)
            .returning(|_| Ok(()));
        let executor = executor(mail);
        let rule = rule(vec![Action::archive()]);

        let first = executor.execute(&email(), &rule).await.unwrap();
        assert_eq!(first.executed(), 1);

        let second = executor.execute(&email(), &rule).await.unwrap();
        assert_eq!(second.executed(), 0);
        assert_eq!(second.outcomes[0].status, ActionStatus::AlreadyExecuted);
    }

    #[tokio::test]
    async fn failing_action_does_not_block_siblings() {
        let mut mail = MockMail::new();
        mail.expect_call_webhook().times(1).returning(|_, _| {
            Err(ProviderError::Status {
                status: 404,
                message: "no such hook".to_string(),
            })
        });
        mail.expect_archive().times(1).returning(|_| Ok(()));
        let executor = executor(mail);
        let rule = rule(vec![
            Action::webhook("https://hooks.example/mail"),
            Action::archive(),
        ]);

        let report = executor.execute(&email(), &rule).await.unwrap();
        assert_eq!(report.executed(), 1);
        match &report.outcomes[0].status {
            ActionStatus::Failed { attempts, .. } => assert_eq!(*attempts, 1),
            other => panic!("unexpected status: {:?}", other),
        }
    }

    #[tokio::test]
    async fn transient_failures_are_retried_for_outbound_actions() {
        let mut mail = MockMail::new();
        let mut seq = mockall::Sequence::new();
        mail.expect_forward()
            .times(2)
            .in_sequence(&mut seq)
            .returning(|_, _| Err(connection_error()));
        mail.expect_forward()
            .withf(|id, to| id.as_str() == "m1" && to == "assistant@example.com")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        let executor = executor(mail);

        let report = executor
            .execute(&email(), &rule(vec![Action::forward("assistant@example.com")]))
            .await
            .unwrap();
        assert_eq!(
            report.outcomes[0].status,
            ActionStatus::Executed { attempts: 3 }
        );
    }

    #[tokio::test]
    async fn retries_stop_at_the_attempt_limit() {
        let mut mail = MockMail::new();
        mail.expect_send_email()
            .times(3)
            .returning(|_| Err(connection_error()));
        let executor = executor(mail);
        let action = Action::new(ActionType::SendEmail)
            .with_to(ActionField::literal("team@example.com"))
            .with_subject(ActionField::literal("FYI"))
            .with_content(ActionField::literal("Forwarding the numbers."));

        let report = executor.execute(&email(), &rule(vec![action])).await.unwrap();
        assert!(matches!(
            report.outcomes[0].status,
            ActionStatus::Failed { attempts: 3, .. }
        ));
    }

    #[tokio::test]
    async fn mailbox_actions_are_not_retried() {
        let mut mail = MockMail::new();
        mail.expect_archive()
            .times(1)
            .returning(|_| Err(connection_error()));
        let executor = executor(mail);

        let report = executor
            .execute(&email(), &rule(vec![Action::archive()]))
            .await
            .unwrap();
        assert!(!report.all_succeeded());
    }

    #[tokio::test]
    async fn failed_action_can_run_again() {
        let mut mail = MockMail::new();
        let mut seq = mockall::Sequence::new();
        mail.expect_archive()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(connection_error()));
        mail.expect_archive()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        let executor = executor(mail);
        let rule = rule(vec![Action::archive()]);

        assert!(!executor.execute(&email(), &rule).await.unwrap().all_succeeded());
        assert_eq!(executor.execute(&email(), &rule).await.unwrap().executed(), 1);
    }

    #[tokio::test]
    async fn generated_fields_use_the_classifier() {
        let mut mail = MockMail::new();
        mail.expect_reply()
            .withf(|id, content| id.as_str() == "m1" && content == "Thanks, noted.")
            .times(1)
            .returning(|_, _| Ok(()));
        let executor = executor(mail);
        let action = Action::new(ActionType::Reply).with_content(ActionField::Generate);

        let report = executor.execute(&email(), &rule(vec![action])).await.unwrap();
        assert!(report.all_succeeded());
    }

    #[tokio::test]
    async fn webhook_payload_carries_the_rule() {
        let mut mail = MockMail::new();
        mail.expect_call_webhook()
            .withf(|url, payload| {
                url == "https://hooks.example/mail"
                    && payload.rule_id == "r1"
                    && payload.from == "boss@example.com"
            })
            .times(1)
            .returning(|_, _| Ok(()));
        let executor = executor(mail);

        let report = executor
            .execute(&email(), &rule(vec![Action::webhook("https://hooks.example/mail")]))
            .await
            .unwrap();
        assert_eq!(report.executed(), 1);
    }

    #[tokio::test]
    async fn in_memory_ledger_claims_once() {
        let ledger = InMemoryLedger::default();
        let key = ExecutionKey {
            email_id: EmailId::from("m1"),
            rule_id: RuleId::from("r1"),
            action_type: ActionType::Archive,
        };
        assert!(ledger.try_claim(&key).await.unwrap());
        assert!(!ledger.try_claim(&key).await.unwrap());
        ledger.release(&key).await.unwrap();
        assert!(ledger.try_claim(&key).await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_run_sees_claim_in_flight() {
        let (started_tx, started_rx) = tokio::sync::oneshot::channel();
        let (finish_tx, finish_rx) = std::sync::mpsc::channel::<()>();
        let started_tx = Mutex::new(Some(started_tx));
        let finish_rx = Mutex::new(finish_rx);

        let mut mail = MockMail::new();
        let mut seq = mockall::Sequence::new();
        mail.expect_archive()
            .times(1)
            .in_sequence(&mut seq)
            .returning(move |id| {
                if let Some(tx) = started_tx.lock().unwrap().take() {
                    let _ = tx.send(());
                }
                let _ = finish_rx.lock().unwrap().recv();
                Err(ProviderError::NotFound(id.to_string()))
            });
        mail.expect_archive()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        let executor = executor(mail);
        let rule = rule(vec![Action::archive()]);

        let first = {
            let executor = executor.clone();
            let rule = rule.clone();
            tokio::spawn(async move { executor.execute(&email(), &rule).await })
        };
        started_rx.await.unwrap();

        let second = executor.execute(&email(), &rule).await.unwrap();
        assert_eq!(second.outcomes[0].status, ActionStatus::InFlight);

        finish_tx.send(()).unwrap();
        let first = first.await.unwrap().unwrap();
        assert!(!first.all_succeeded());

        let third = executor.execute(&email(), &rule).await.unwrap();
        assert_eq!(third.executed(), 1);
    }
}

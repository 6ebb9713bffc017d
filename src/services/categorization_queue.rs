//! Background sender categorization.
//!
//! [`SenderCategorizationQueue`] owns a pending list and a fixed pool of
//! tokio workers. Each worker takes one sender at a time, samples a few of
//! their messages, asks the classifier for a category name and stores the
//! resolved assignment.
//!
//! An address is never pending and running at the same time, and appears at
//! most once in the pending list. [`stop`](SenderCategorizationQueue::stop)
//! drops pending work immediately; jobs already running finish and keep
//! their result.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::CategorizationSettings;
use crate::domain::{resolve_category, CategorizationJob, CategorizationState, Email, JobStatus};
use crate::providers::ai::{strip_code_fence, AiClassifier, LlmError};
use crate::providers::email::{MailProvider, ProviderError};

use super::category_service::{CategoryError, CategoryStorage, Result};

/// Why a single sender could not be categorized.
#[derive(Debug, thiserror::Error)]
enum WorkerError {
    #[error(transparent)]
    Storage(#[from] CategoryError),

    #[error("fetching sender context: {0}")]
    Provider(#[from] ProviderError),

    #[error("classifier: {0}")]
    Ai(#[from] LlmError),
}

/// Progress notifications for observers such as a UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CategorizationEvent {
    /// A sender finished; `category` is `None` when the answer matched no
    /// known category.
    Completed {
        address: String,
        category: Option<String>,
    },
    Failed {
        address: String,
        error: String,
    },
    /// Nothing pending and no worker busy.
    Idle,
}

/// Snapshot of queue counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueProgress {
    pub pending: usize,
    pub running: usize,
    /// Finished since the queue started, failures excluded.
    pub completed: u64,
    pub failed: u64,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<String>,
    running: HashSet<String>,
    completed: u64,
    failed: u64,
}

impl QueueState {
    fn contains(&self, address: &str) -> bool {
        self.running.contains(address) || self.pending.iter().any(|a| a == address)
    }

    fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.running.is_empty()
    }
}

struct Inner {
    state: Mutex<QueueState>,
    /// Serializes `push` and `stop` so job records and the pending list
    /// change together.
    admission: tokio::sync::Mutex<()>,
    notify: Notify,
    cancel: CancellationToken,
    events: broadcast::Sender<CategorizationEvent>,
    storage: Arc<dyn CategoryStorage>,
    mail: Arc<dyn MailProvider>,
    classifier: Arc<dyn AiClassifier>,
    settings: CategorizationSettings,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, QueueState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn emit(&self, event: CategorizationEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

/// Deduplicating, cancellable worker pool that categorizes senders.
pub struct SenderCategorizationQueue {
    inner: Arc<Inner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl SenderCategorizationQueue {
    /// Spawns `settings.workers` workers on the current runtime.
    pub fn start(
        storage: Arc<dyn CategoryStorage>,
        mail: Arc<dyn MailProvider>,
        classifier: Arc<dyn AiClassifier>,
        settings: CategorizationSettings,
    ) -> Self {
        let (events, _) = broadcast::channel(256);
        let worker_count = settings.workers.max(1);
        let inner = Arc::new(Inner {
            state: Mutex::new(QueueState::default()),
            admission: tokio::sync::Mutex::new(()),
            notify: Notify::new(),
            cancel: CancellationToken::new(),
            events,
            storage,
            mail,
            classifier,
            settings,
        });

        let workers = (0..worker_count)
            .map(|worker| {
                let inner = Arc::clone(&inner);
                tokio::spawn(async move { run_worker(worker, inner).await })
            })
            .collect();

        tracing::info!(workers = worker_count, "categorization queue started");
        Self {
            inner,
            workers: Mutex::new(workers),
        }
    }

    /// Enqueues addresses that are neither pending nor running.
    ///
    /// Returns how many were accepted. Work happens on the workers; this
    /// only records the jobs.
    pub async fn push<I, S>(&self, addresses: I) -> Result<usize>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let _admission = self.inner.admission.lock().await;

        let mut fresh = Vec::new();
        {
            let state = self.inner.state();
            for address in addresses {
                let address = address.as_ref().trim().to_lowercase();
                if address.is_empty() || state.contains(&address) || fresh.contains(&address) {
                    continue;
                }
                fresh.push(address);
            }
        }

        for address in &fresh {
            let job = CategorizationJob {
                address: address.clone(),
                status: JobStatus::Queued,
                enqueued_at: Utc::now(),
            };
            self.inner.storage.save_job(&job).await?;
            self.inner
                .storage
                .set_sender_state(address, CategorizationState::Queued)
                .await?;
        }

        let accepted = fresh.len();
        {
            let mut state = self.inner.state();
            state.pending.extend(fresh);
        }
        for _ in 0..accepted {
            self.inner.notify.notify_one();
        }

        tracing::debug!(accepted, "senders queued for categorization");
        Ok(accepted)
    }

    /// Drops all pending work. Running jobs finish normally.
    ///
    /// Dropped senders return to `uncategorized` and may be pushed again.
    pub async fn stop(&self) -> Result<usize> {
        let _admission = self.inner.admission.lock().await;

        let (dropped, idle) = {
            let mut state = self.inner.state();
            let dropped: Vec<String> = state.pending.drain(..).collect();
            (dropped, state.is_idle())
        };

        for address in &dropped {
            self.inner.storage.delete_job(address).await?;
            self.inner
                .storage
                .set_sender_state(address, CategorizationState::Uncategorized)
                .await?;
        }

        tracing::info!(dropped = dropped.len(), "categorization stopped");
        if idle {
            self.inner.emit(CategorizationEvent::Idle);
        }
        Ok(dropped.len())
    }

    /// True while anything is pending or a worker is mid-job.
    pub fn is_processing(&self) -> bool {
        !self.inner.state().is_idle()
    }

    pub fn progress(&self) -> QueueProgress {
        let state = self.inner.state();
        QueueProgress {
            pending: state.pending.len(),
            running: state.running.len(),
            completed: state.completed,
            failed: state.failed,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CategorizationEvent> {
        self.inner.events.subscribe()
    }

    /// Re-queues jobs left behind by an earlier process.
    pub async fn resume_interrupted(&self) -> Result<usize> {
        let jobs = self.inner.storage.list_jobs().await?;
        if jobs.is_empty() {
            return Ok(0);
        }
        tracing::info!(count = jobs.len(), "resuming interrupted categorization jobs");
        self.push(jobs.iter().map(|j| j.address.as_str())).await
    }

    /// Stops the workers once their current job, if any, is done.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        let handles: Vec<JoinHandle<()>> = match self.workers.lock() {
            Ok(mut workers) => workers.drain(..).collect(),
            Err(poisoned) => poisoned.into_inner().drain(..).collect(),
        };
        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                tracing::error!(error = %e, "categorization worker panicked");
            }
        }
    }
}

impl Drop for SenderCategorizationQueue {
    fn drop(&mut self) {
        self.inner.cancel.cancel();
    }
}

async fn run_worker(worker: usize, inner: Arc<Inner>) {
    tracing::debug!(worker, "categorization worker started");
    loop {
        if inner.cancel.is_cancelled() {
            break;
        }

        let next = {
            let mut state = inner.state();
            let next = state.pending.pop_front();
            if let Some(address) = &next {
                state.running.insert(address.clone());
            }
            next
        };

        let Some(address) = next else {
            tokio::select! {
                _ = inner.cancel.cancelled() => break,
                _ = inner.notify.notified() => continue,
            }
        };

        let outcome = categorize(&inner, &address).await;

        let idle = {
            let mut state = inner.state();
            state.running.remove(&address);
            match outcome {
                Ok(_) => state.completed += 1,
                Err(_) => state.failed += 1,
            }
            state.is_idle()
        };

        match outcome {
            Ok(category) => inner.emit(CategorizationEvent::Completed { address, category }),
            Err(e) => {
                tracing::warn!(
                    worker,
                    address = %address,
                    error = %e,
                    "sender categorization failed"
                );
                if let Err(e) = inner
                    .storage
                    .set_sender_state(&address, CategorizationState::Failed)
                    .await
                {
                    tracing::error!(address = %address, error = %e, "could not record failure");
                }
                if let Err(e) = inner.storage.delete_job(&address).await {
                    tracing::error!(address = %address, error = %e, "could not remove job");
                }
                inner.emit(CategorizationEvent::Failed {
                    address,
                    error: e.to_string(),
                });
            }
        }

        if idle {
            inner.emit(CategorizationEvent::Idle);
        }
    }
    tracing::debug!(worker, "categorization worker stopped");
}

/// Categorizes one sender and stores the result.
async fn categorize(
    inner: &Inner,
    address: &str,
) -> std::result::Result<Option<String>, WorkerError> {
    inner
        .storage
        .save_job(&CategorizationJob {
            address: address.to_string(),
            status: JobStatus::Running,
            enqueued_at: Utc::now(),
        })
        .await?;
    inner
        .storage
        .set_sender_state(address, CategorizationState::Running)
        .await?;

    let categories = inner.storage.list_categories().await?;
    let messages = inner
        .mail
        .recent_from_sender(address, inner.settings.context_messages)
        .await?;

    let instructions = categorization_prompt(&categories);
    let verdict = inner
        .classifier
        .classify(&sender_context(address, &messages), &instructions)
        .await?;

    let answer = strip_code_fence(&verdict).trim().trim_matches('"');
    let resolved = resolve_category(&categories, answer).cloned();
    match &resolved {
        Some(category) => {
            inner
                .storage
                .assign_category(address, Some(&category.id), CategorizationState::Categorized)
                .await?;
            tracing::debug!(address = %address, category = %category.name, "sender categorized");
        }
        None => {
            inner
                .storage
                .assign_category(address, None, CategorizationState::Uncategorized)
                .await?;
            tracing::warn!(
                address = %address,
                answer = %answer,
                "classifier named an unknown category"
            );
        }
    }

    inner.storage.delete_job(address).await?;
    Ok(resolved.map(|c| c.name))
}

pub(crate) fn categorization_prompt(categories: &[crate::domain::Category]) -> String {
    let list = categories
        .iter()
        .map(|c| match &c.description {
            Some(description) => format!("- {}: {}", c.name, description),
            None => format!("- {}", c.name),
        })
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "Categorize the sender of these emails. Choose exactly one of the categories below \
         and reply with its name only. Reply \"Unknown\" if none fits.\n\nCategories:\n{}",
        list
    )
}

fn sender_context(address: &str, messages: &[Email]) -> String {
    let mut text = format!("Sender: {}\n", address);
    for message in messages {
        text.push_str(&format!(
            "\nSubject: {}\n{}\n",
            message.subject.as_deref().unwrap_or(""),
            message.snippet
        ));
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EmailId;
    use crate::providers::ai::{LlmError, LlmResult};
    use crate::providers::email::{self, MessagePage, OutgoingEmail, WebhookPayload};
    use crate::services::category_service::tests::MemoryCategories;
    use async_trait::async_trait;
    use chrono::DateTime;
    use std::collections::HashMap;
    use std::time::Duration;
    use tokio::sync::Semaphore;

    /// Mail provider that only answers sender lookups.
    struct SenderMail;

    #[async_trait]
    impl MailProvider for SenderMail {
        async fn archive(&self, _id: &EmailId) -> email::Result<()> {
            Ok(())
        }
        async fn mark_read(&self, _id: &EmailId) -> email::Result<()> {
            Ok(())
        }
        async fn mark_spam(&self, _id: &EmailId) -> email::Result<()> {
            Ok(())
        }
        async fn label(&self, _id: &EmailId, _name: &str) -> email::Result<()> {
            Ok(())
        }
        async fn forward(&self, _id: &EmailId, _to: &str) -> email::Result<()> {
            Ok(())
        }
        async fn reply(&self, _id: &EmailId, _content: &str) -> email::Result<()> {
            Ok(())
        }
        async fn send_email(&self, _email: &OutgoingEmail) -> email::Result<()> {
            Ok(())
        }
        async fn draft_email(&self, _id: &EmailId, _content: &str) -> email::Result<()> {
            Ok(())
        }
        async fn call_webhook(&self, _url: &str, _payload: &WebhookPayload) -> email::Result<()> {
            Ok(())
        }
        async fn list_messages_before(
            &self,
            _cutoff: DateTime<Utc>,
            _page_token: Option<String>,
            _limit: u32,
        ) -> email::Result<MessagePage> {
            Ok(MessagePage::default())
        }
        async fn recent_from_sender(
            &self,
            _address: &str,
            _limit: u32,
        ) -> email::Result<Vec<Email>> {
            Ok(Vec::new())
        }
    }

    /// Answers from a fixed table. Each call waits for a permit so tests can
    /// hold workers mid-job.
    struct GatedClassifier {
        answers: HashMap<&'static str, &'static str>,
        gate: Semaphore,
        calls: Mutex<Vec<String>>,
    }

    impl GatedClassifier {
        fn new(answers: &[(&'static str, &'static str)], permits: usize) -> Arc<Self> {
            Arc::new(Self {
                answers: answers.iter().copied().collect(),
                gate: Semaphore::new(permits),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls_for(&self, address: &str) -> usize {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|a| a.as_str() == address)
                .count()
        }
    }

    #[async_trait]
    impl AiClassifier for GatedClassifier {
        async fn classify(&self, text: &str, _instructions: &str) -> LlmResult<String> {
            let address = text
                .lines()
                .next()
                .and_then(|l| l.strip_prefix("Sender: "))
                .unwrap_or("")
                .to_string();
            self.calls.lock().unwrap().push(address.clone());
            let permit = self
                .gate
                .acquire()
                .await
                .map_err(|_| LlmError::Unavailable("gate closed".to_string()))?;
            permit.forget();
            self.answers
                .get(address.as_str())
                .map(|a| a.to_string())
                .ok_or_else(|| LlmError::Unavailable("no answer".to_string()))
        }
    }

    fn settings(workers: usize) -> CategorizationSettings {
        CategorizationSettings {
            workers,
            ..Default::default()
        }
    }

    async fn wait_idle(queue: &SenderCategorizationQueue) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while queue.is_processing() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("queue did not drain");
    }

    #[tokio::test]
    async fn duplicate_addresses_run_once() {
        let storage = Arc::new(MemoryCategories::with_categories(&["Marketing", "Newsletter"]));
        let classifier = GatedClassifier::new(
            &[("a@x.com", "marketing"), ("b@y.com", "Newsletter")],
            100,
        );
        let queue = SenderCategorizationQueue::start(
            storage.clone(),
            Arc::new(SenderMail),
            classifier.clone(),
            settings(2),
        );

        let accepted = queue.push(["a@x.com", "a@x.com", "b@y.com"]).await.unwrap();
        assert_eq!(accepted, 2);
        wait_idle(&queue).await;

        assert_eq!(classifier.calls_for("a@x.com"), 1);
        assert_eq!(classifier.calls_for("b@y.com"), 1);
        assert_eq!(storage.category_name_of("a@x.com").as_deref(), Some("Marketing"));
        assert_eq!(storage.category_name_of("b@y.com").as_deref(), Some("Newsletter"));
        assert!(storage.jobs.lock().unwrap().is_empty());
        assert_eq!(queue.progress().completed, 2);
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn running_address_is_not_requeued() {
        let storage = Arc::new(MemoryCategories::with_categories(&["Social"]));
        let classifier = GatedClassifier::new(&[("a@x.com", "Social")], 0);
        let queue = SenderCategorizationQueue::start(
            storage.clone(),
            Arc::new(SenderMail),
            classifier.clone(),
            settings(1),
        );

        queue.push(["a@x.com"]).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while queue.progress().running == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(queue.push(["a@x.com"]).await.unwrap(), 0);
        classifier.gate.add_permits(1);
        wait_idle(&queue).await;
        assert_eq!(classifier.calls_for("a@x.com"), 1);
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn stop_drops_pending_but_lets_running_finish() {
        let storage = Arc::new(MemoryCategories::with_categories(&["Marketing"]));
        let classifier = GatedClassifier::new(
            &[("a@x.com", "Marketing"), ("b@y.com", "Marketing")],
            0,
        );
        let queue = SenderCategorizationQueue::start(
            storage.clone(),
            Arc::new(SenderMail),
            classifier.clone(),
            settings(1),
        );
        let mut events = queue.subscribe();

        queue.push(["a@x.com", "b@y.com"]).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while queue.progress().running == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        let dropped = queue.stop().await.unwrap();
        assert_eq!(dropped, 1);
        assert!(queue.is_processing());
        assert_eq!(
            storage.state_of("b@y.com"),
            Some(CategorizationState::Uncategorized)
        );

        classifier.gate.add_permits(1);
        wait_idle(&queue).await;

        assert_eq!(storage.category_name_of("a@x.com").as_deref(), Some("Marketing"));
        assert_eq!(classifier.calls_for("b@y.com"), 0);
        assert!(storage.category_name_of("b@y.com").is_none());

        let completed = tokio::time::timeout(Duration::from_secs(5), async {
            let mut completed = Vec::new();
            loop {
                match events.recv().await.unwrap() {
                    CategorizationEvent::Idle => return completed,
                    CategorizationEvent::Completed { address, .. } => completed.push(address),
                    CategorizationEvent::Failed { .. } => {}
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(completed, vec!["a@x.com".to_string()]);

        // Dropped senders can be pushed again.
        classifier.gate.add_permits(1);
        assert_eq!(queue.push(["b@y.com"]).await.unwrap(), 1);
        wait_idle(&queue).await;
        assert_eq!(classifier.calls_for("b@y.com"), 1);
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn unknown_category_leaves_sender_uncategorized() {
        let storage = Arc::new(MemoryCategories::with_categories(&["Receipts"]));
        let classifier = GatedClassifier::new(&[("a@x.com", "Unknown")], 10);
        let queue = SenderCategorizationQueue::start(
            storage.clone(),
            Arc::new(SenderMail),
            classifier,
            settings(1),
        );

        queue.push(["a@x.com"]).await.unwrap();
        wait_idle(&queue).await;
        assert!(storage.category_name_of("a@x.com").is_none());
        assert_eq!(
            storage.state_of("a@x.com"),
            Some(CategorizationState::Uncategorized)
        );
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn classifier_failure_is_counted() {
        let storage = Arc::new(MemoryCategories::with_categories(&["Receipts"]));
        let classifier = GatedClassifier::new(&[], 10);
        let queue = SenderCategorizationQueue::start(
            storage.clone(),
            Arc::new(SenderMail),
            classifier,
            settings(1),
        );

        queue.push(["nobody@x.com"]).await.unwrap();
        wait_idle(&queue).await;
        let progress = queue.progress();
        assert_eq!(progress.failed, 1);
        assert_eq!(progress.completed, 0);
        assert_eq!(
            storage.state_of("nobody@x.com"),
            Some(CategorizationState::Failed)
        );
        assert!(storage.jobs.lock().unwrap().is_empty());
        queue.shutdown().await;
    }
}

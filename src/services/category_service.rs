//! Category management and sender assignments.
//!
//! Categories are owned by the category list; senders only reference one.
//! [`CategoryStorage`] is also the store the categorization queue, the fast
//! categorizer and the sender pager write to and read from.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{
    default_categories, resolve_category, CategorizationJob, CategorizationState, Category,
    CategoryId, Sender, SenderPage,
};

/// Errors that can occur during category operations.
#[derive(Debug, Error)]
pub enum CategoryError {
    #[error("category not found: {0}")]
    NotFound(String),

    #[error("category already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid category name: {0}")]
    InvalidName(String),

    #[error("storage error: {0}")]
    Storage(String),
}

/// Result type for category operations.
pub type Result<T> = std::result::Result<T, CategoryError>;

/// Storage trait for categories, sender assignments and categorization jobs.
#[async_trait]
pub trait CategoryStorage: Send + Sync {
    async fn list_categories(&self) -> Result<Vec<Category>>;

    async fn save_category(&self, category: &Category) -> Result<()>;

    /// Deletes a category and clears it from every sender that had it.
    async fn delete_category(&self, id: &CategoryId) -> Result<()>;

    async fn get_sender(&self, address: &str) -> Result<Option<Sender>>;

    /// The category currently assigned to `address`, if any.
    async fn sender_category(&self, address: &str) -> Result<Option<Category>>;

    /// Records an assignment (or its absence) and the resulting state.
    async fn assign_category(
        &self,
        address: &str,
        category_id: Option<&CategoryId>,
        state: CategorizationState,
    ) -> Result<()>;

    /// Updates only the lifecycle state, creating the sender if unknown.
    async fn set_sender_state(&self, address: &str, state: CategorizationState) -> Result<()>;

    /// Senders without a category, ordered by address.
    async fn uncategorized_senders(&self, offset: u64, limit: u32) -> Result<SenderPage>;

    async fn save_job(&self, job: &CategorizationJob) -> Result<()>;

    async fn delete_job(&self, address: &str) -> Result<()>;

    async fn list_jobs(&self) -> Result<Vec<CategorizationJob>>;
}

/// Service for managing categories and manual assignments.
pub struct CategoryService<S: CategoryStorage> {
    storage: S,
}

impl<S: CategoryStorage> CategoryService<S> {
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    /// Creates a category. Names are unique ignoring case.
    pub async fn create(&self, name: &str, description: Option<&str>) -> Result<Category> {
        let name = name.trim();
        if name.is_empty() {
            return Err(CategoryError::InvalidName(
                "name cannot be empty".to_string(),
            ));
        }

        let existing = self.storage.list_categories().await?;
        if resolve_category(&existing, name).is_some() {
            return Err(CategoryError::AlreadyExists(name.to_string()));
        }

        let mut category = Category::new(name);
        category.description = description.map(String::from);
        self.storage.save_category(&category).await?;
        Ok(category)
    }

    /// Adds any default category the user does not have yet.
    pub async fn seed_defaults(&self) -> Result<Vec<Category>> {
        let existing = self.storage.list_categories().await?;
        let mut added = Vec::new();
        for category in default_categories() {
            if resolve_category(&existing, &category.name).is_none() {
                self.storage.save_category(&category).await?;
                added.push(category);
            }
        }
        Ok(added)
    }

    pub async fn list(&self) -> Result<Vec<Category>> {
        self.storage.list_categories().await
    }

    pub async fn delete(&self, id: &CategoryId) -> Result<()> {
        let existing = self.storage.list_categories().await?;
        if !existing.iter().any(|c| &c.id == id) {
            return Err(CategoryError::NotFound(id.to_string()));
        }
        self.storage.delete_category(id).await
    }

    /// Manually assigns (or clears, with `None`) a sender's category by name.
    pub async fn set_sender_category(
        &self,
        address: &str,
        category_name: Option<&str>,
    ) -> Result<Option<Category>> {
        let address = address.trim().to_lowercase();
        let Some(name) = category_name else {
            self.storage
                .assign_category(&address, None, CategorizationState::Uncategorized)
                .await?;
            return Ok(None);
        };

        let categories = self.storage.list_categories().await?;
        let category = resolve_category(&categories, name)
            .cloned()
            .ok_or_else(|| CategoryError::NotFound(name.to_string()))?;
        self.storage
            .assign_category(
                &address,
                Some(&category.id),
                CategorizationState::Categorized,
            )
            .await?;
        Ok(Some(category))
    }

    pub async fn sender_category(&self, address: &str) -> Result<Option<Category>> {
        self.storage
            .sender_category(&address.trim().to_lowercase())
            .await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    /// In-memory [`CategoryStorage`] shared by the categorization tests.
    #[derive(Default)]
    pub(crate) struct MemoryCategories {
        pub categories: Mutex<Vec<Category>>,
        pub senders: Mutex<BTreeMap<String, Sender>>,
        pub jobs: Mutex<Vec<CategorizationJob>>,
    }

    impl MemoryCategories {
        pub fn with_categories(names: &[&str]) -> Self {
            let store = Self::default();
            *store.categories.lock().unwrap() = names.iter().map(|n| Category::new(*n)).collect();
            store
        }

        pub fn add_sender(&self, address: &str) {
            self.senders.lock().unwrap().insert(
                address.to_string(),
                Sender {
                    address: address.to_string(),
                    category_id: None,
                    state: CategorizationState::Uncategorized,
                },
            );
        }

        pub fn category_name_of(&self, address: &str) -> Option<String> {
            let senders = self.senders.lock().unwrap();
            let id = senders.get(address)?.category_id.clone()?;
            self.categories
                .lock()
                .unwrap()
                .iter()
                .find(|c| c.id == id)
                .map(|c| c.name.clone())
        }

        pub fn state_of(&self, address: &str) -> Option<CategorizationState> {
            self.senders.lock().unwrap().get(address).map(|s| s.state)
        }
    }

    #[async_trait]
    impl CategoryStorage for MemoryCategories {
        async fn list_categories(&self) -> Result<Vec<Category>> {
            Ok(self.categories.lock().unwrap().clone())
        }

        async fn save_category(&self, category: &Category) -> Result<()> {
            let mut categories = self.categories.lock().unwrap();
            categories.retain(|c| c.id != category.id);
            categories.push(category.clone());
            Ok(())
        }

        async fn delete_category(&self, id: &CategoryId) -> Result<()> {
            self.categories.lock().unwrap().retain(|c| &c.id != id);
            for sender in self.senders.lock().unwrap().values_mut() {
                if sender.category_id.as_ref() == Some(id) {
                    sender.category_id = None;
                    sender.state = CategorizationState::Uncategorized;
                }
            }
            Ok(())
        }

        async fn get_sender(&self, address: &str) -> Result<Option<Sender>> {
            Ok(self.senders.lock().unwrap().get(address).cloned())
        }

        async fn sender_category(&self, address: &str) -> Result<Option<Category>> {
            let id = match self.senders.lock().unwrap().get(address) {
                Some(sender) => sender.category_id.clone(),
                None => None,
            };
            Ok(id.and_then(|id| {
                self.categories
                    .lock()
                    .unwrap()
                    .iter()
                    .find(|c| c.id == id)
                    .cloned()
            }))
        }

        async fn assign_category(
            &self,
            address: &str,
            category_id: Option<&CategoryId>,
            state: CategorizationState,
        ) -> Result<()> {
            self.senders.lock().unwrap().insert(
                address.to_string(),
                Sender {
                    address: address.to_string(),
                    category_id: category_id.cloned(),
                    state,
                },
            );
            Ok(())
        }

        async fn set_sender_state(&self, address: &str, state: CategorizationState) -> Result<()> {
            self.senders
                .lock()
                .unwrap()
                .entry(address.to_string())
                .or_insert_with(|| Sender {
                    address: address.to_string(),
                    category_id: None,
                    state,
                })
                .state = state;
            Ok(())
        }

        async fn uncategorized_senders(&self, offset: u64, limit: u32) -> Result<SenderPage> {
            let senders = self.senders.lock().unwrap();
            let mut matching = senders
                .values()
                .filter(|s| s.category_id.is_none())
                .skip(offset as usize)
                .map(|s| s.address.clone());
            let page: Vec<String> = matching.by_ref().take(limit as usize).collect();
            let more = matching.next().is_some();
            Ok(SenderPage {
                next_offset: more.then(|| offset + page.len() as u64),
                senders: page,
            })
        }

        async fn save_job(&self, job: &CategorizationJob) -> Result<()> {
            let mut jobs = self.jobs.lock().unwrap();
            jobs.retain(|j| j.address != job.address);
            jobs.push(job.clone());
            Ok(())
        }

        async fn delete_job(&self, address: &str) -> Result<()> {
            self.jobs.lock().unwrap().retain(|j| j.address != address);
            Ok(())
        }

        async fn list_jobs(&self) -> Result<Vec<CategorizationJob>> {
            Ok(self.jobs.lock().unwrap().clone())
        }
    }

    #[tokio::test]
    async fn create_rejects_case_insensitive_duplicates() {
        let service = CategoryService::new(MemoryCategories::with_categories(&["Newsletter"]));
        let err = service.create("newsletter", None).await.unwrap_err();
        assert!(matches!(err, CategoryError::AlreadyExists(_)));

        let err = service.create("  ", None).await.unwrap_err();
        assert!(matches!(err, CategoryError::InvalidName(_)));
    }

    #[tokio::test]
    async fn seed_defaults_skips_existing() {
        let service = CategoryService::new(MemoryCategories::with_categories(&["marketing"]));
        let added = service.seed_defaults().await.unwrap();
        assert!(added.iter().all(|c| c.name != "Marketing"));
        assert_eq!(added.len(), default_categories().len() - 1);

        let again = service.seed_defaults().await.unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn manual_assignment_resolves_by_name() {
        let service = CategoryService::new(MemoryCategories::with_categories(&["Receipts"]));
        let assigned = service
            .set_sender_category("Shop@Example.com", Some("receipts"))
            .await
            .unwrap();
        assert_eq!(assigned.unwrap().name, "Receipts");

        let looked_up = service.sender_category("shop@example.com").await.unwrap();
        assert_eq!(looked_up.unwrap().name, "Receipts");

        let err = service
            .set_sender_category("shop@example.com", Some("Unknown"))
            .await
            .unwrap_err();
        assert!(matches!(err, CategoryError::NotFound(_)));
    }

    #[tokio::test]
    async fn deleting_category_clears_senders() {
        let storage = MemoryCategories::with_categories(&["Social"]);
        let service = CategoryService::new(storage);
        service
            .set_sender_category("friend@example.com", Some("Social"))
            .await
            .unwrap();

        let id = service.list().await.unwrap()[0].id.clone();
        service.delete(&id).await.unwrap();
        assert!(service
            .sender_category("friend@example.com")
            .await
            .unwrap()
            .is_none());
    }
}

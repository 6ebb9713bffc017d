//! Offset paging over uncategorized senders.

use std::sync::Arc;

use crate::domain::SenderPage;

use super::category_service::{CategoryStorage, Result};

/// Stateless cursor: every call is a pure function of the offset, so a page
/// can be re-fetched or the walk restarted from zero at any time.
#[derive(Clone)]
pub struct SenderPager {
    storage: Arc<dyn CategoryStorage>,
    page_size: u32,
}

impl SenderPager {
    pub fn new(storage: Arc<dyn CategoryStorage>, page_size: u32) -> Self {
        Self {
            storage,
            page_size: page_size.max(1),
        }
    }

    pub async fn first_page(&self) -> Result<SenderPage> {
        self.next_page(0).await
    }

    /// The page starting at `offset`, as returned in a previous page's
    /// `next_offset`.
    pub async fn next_page(&self, offset: u64) -> Result<SenderPage> {
        self.storage
            .uncategorized_senders(offset, self.page_size)
            .await
    }

    /// Walks every page. Only meaningful when the sender set is not being
    /// modified concurrently.
    pub async fn collect_all(&self) -> Result<Vec<String>> {
        let mut senders = Vec::new();
        let mut page = self.first_page().await?;
        loop {
            senders.append(&mut page.senders);
            match page.next_offset {
                Some(offset) => page = self.next_page(offset).await?,
                None => return Ok(senders),
            }
        }
    }
}

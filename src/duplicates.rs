use tracing::debug;

use crate::error::{validation, IndexError, IndexResult};
use crate::store::InventoryStore;
use crate::types::{DuplicatePage, DuplicateQuery};

/// Read-only view over checksum groups.
pub struct DuplicateFinder<'a, S: InventoryStore + ?Sized> {
    store: &'a S,
}

impl<'a, S: InventoryStore + ?Sized> DuplicateFinder<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Groups records by checksum, keeping groups of at least
    /// `min_group_size` members. Records without a checksum never appear.
    ///
    /// Groups come back ordered by member count, then size (both
    /// descending), then checksum, so pages are stable between calls.
    pub async fn find_duplicates(&self, query: &DuplicateQuery) -> IndexResult<DuplicatePage> {
        if query.min_group_size < 2 {
            return Err(IndexError::InvalidQuery(format!(
                "min_group_size must be >= 2, got {}",
                query.min_group_size
            )));
        }
        validation::validate_size_range(query.min_size, query.max_size)?;

        let page = self.store.group_by_checksum(query).await?;
        debug!(
            "Duplicate query returned {} of {} group(s) (offset {})",
            page.groups.len(),
            page.total_groups,
            query.offset
        );
        Ok(page)
    }
}

//! Repository traits: the searchable and writable capability surfaces
//!
//! A repository is the single point of truth for one entity type against one
//! logical collection. Implementations ([`MongoRepository`] for production,
//! [`InMemoryRepository`] for tests and development) supply the store
//! plumbing; the trait default methods supply the conveniences that are pure
//! composition.
//!
//! Repositories are stateless across calls apart from read-only
//! configuration (collection handle, hooks, paging defaults) and the shared
//! audit trail, and may be invoked concurrently.
//!
//! [`MongoRepository`]: crate::storage::MongoRepository
//! [`InMemoryRepository`]: crate::storage::InMemoryRepository

use std::sync::Arc;

use async_trait::async_trait;
use mongodb::bson::oid::ObjectId;

use crate::core::audit::AuditTrail;
use crate::core::entity::Entity;
use crate::core::error::Result;
use crate::core::odata::ODataQueryOptions;
use crate::core::query::{FieldSpec, FilterExpr, Page, Query, SortSpec};

/// Mutation hook invoked on every entity immediately before it is persisted.
/// A pluggable side-effect point; defaults to a no-op.
pub type BeforeSaveHook<T> = Arc<dyn Fn(&mut T) + Send + Sync>;

/// Repository-level query transform: the default-filter injection point.
/// Receives the composed filter and returns the one to execute.
pub type PreQueryTransform = Arc<dyn Fn(Option<FilterExpr>) -> Option<FilterExpr> + Send + Sync>;

/// Per-item failure inside a best-effort batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchItemError {
    /// Index of the failing item in the submitted batch.
    pub index: usize,
    pub message: String,
}

/// Outcome of an unordered batch write.
///
/// Unordered means a failing item does not block the others: the remainder
/// of the batch still commits, and callers must not assume all-or-nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub attempted: usize,
    pub failures: Vec<BatchItemError>,
}

impl BatchOutcome {
    /// An outcome where every item went through.
    pub fn complete(attempted: usize) -> Self {
        Self {
            attempted,
            failures: Vec::new(),
        }
    }

    pub fn succeeded(&self) -> usize {
        self.attempted - self.failures.len()
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// Whether the item at `index` went through.
    pub fn item_ok(&self, index: usize) -> bool {
        !self.failures.iter().any(|f| f.index == index)
    }

    /// Fold another chunk's outcome into this one, offsetting its indexes by
    /// the chunk's position in the original input.
    pub fn absorb(&mut self, chunk: BatchOutcome, offset: usize) {
        self.attempted += chunk.attempted;
        self.failures.extend(chunk.failures.into_iter().map(|mut f| {
            f.index += offset;
            f
        }));
    }
}

/// Read capability for one entity type.
#[async_trait]
pub trait SearchableRepository<T: Entity>: Send + Sync {
    /// Exact match on id. Soft-deleted documents are excluded; opt in to
    /// them through [`find`](Self::find) with `include_deleted`.
    async fn find_by_id(&self, id: &str) -> Result<Option<T>>;

    /// All documents whose id is in `ids`, soft-deleted excluded.
    async fn find_by_ids(&self, ids: &[String]) -> Result<Vec<T>>;

    /// Execute a query through the full pipeline.
    async fn find(&self, query: &Query) -> Result<Vec<T>>;

    /// Like [`find`](Self::find) but returns the first match only.
    async fn find_one(&self, query: &Query) -> Result<Option<T>>;

    /// Count documents: soft-delete exclusion, repository transform, then
    /// the filter.
    async fn count(&self, filter: Option<&FilterExpr>) -> Result<u64>;

    /// Execute a translated OData query.
    async fn get_all_from_odata(&self, options: &ODataQueryOptions) -> Result<Vec<T>>;

    /// Count through OData translation, with the count-window ceiling.
    async fn count_odata(&self, options: &ODataQueryOptions) -> Result<u64>;

    async fn get_all(&self, order_by: &[SortSpec]) -> Result<Vec<T>> {
        let query = Query {
            order_by: order_by.to_vec(),
            ..Query::default()
        };
        self.find(&query).await
    }

    async fn get_all_paged(
        &self,
        page: u64,
        page_size: u32,
        order_by: &[SortSpec],
    ) -> Result<Vec<T>> {
        let query = Query {
            order_by: order_by.to_vec(),
            page: Some(Page::of(page, page_size)),
            ..Query::default()
        };
        self.find(&query).await
    }

    async fn find_paged(
        &self,
        filter: FilterExpr,
        page: u64,
        page_size: u32,
        order_by: &[SortSpec],
    ) -> Result<Vec<T>> {
        let query = Query {
            filter: Some(filter),
            order_by: order_by.to_vec(),
            page: Some(Page::of(page, page_size)),
            ..Query::default()
        };
        self.find(&query).await
    }
}

/// Write capability for one entity type.
#[async_trait]
pub trait WritableRepository<T: Entity>: Send + Sync {
    /// Stamp creation audit fields, run the before-save hook, assign an id
    /// if none, insert, queue a Create audit entry.
    async fn add(&self, entity: &mut T) -> Result<()>;

    /// Fetch the current snapshot by id (best-effort, no locking), stamp
    /// update audit fields, run the hook, replace the full document, queue
    /// an Update audit entry diffed against the snapshot.
    async fn update(&self, entity: &mut T) -> Result<()>;

    /// Soft delete: flip the marker and route through [`update`](Self::update).
    /// The single state-transition entry point — no separate diff/audit path.
    async fn delete(&self, entity: &mut T) -> Result<()> {
        entity.set_deleted(true);
        self.update(entity).await
    }

    /// Soft delete by id. Missing documents are a not-found error.
    async fn delete_by_id(&self, id: &str) -> Result<()>;

    /// Physical delete by id, with a Delete audit entry. Does not cascade.
    async fn delete_permanently(&self, entity: &T) -> Result<()>;

    /// Bulk maintenance path: dedupe ids, physically delete in fixed-size
    /// pages, no audit trail.
    async fn delete_permanently_batch_no_audit(&self, entities: &[T]) -> Result<()>;

    /// Audited batch insert via one unordered bulk write. Every entity is
    /// stamped and hooked individually; audit entries are queued per entity
    /// only after the write returns, and only for items that went through.
    async fn add_batch(&self, entities: &mut [T]) -> Result<BatchOutcome>;

    /// Batch insert without stamping or audit.
    async fn add_batch_no_audit(&self, entities: &mut [T]) -> Result<BatchOutcome>;

    /// Audited batch replace-by-id via one unordered bulk write.
    async fn update_batch(&self, entities: &mut [T]) -> Result<BatchOutcome>;

    /// Batch replace-by-id without stamping or audit.
    async fn update_batch_no_audit(&self, entities: &[T]) -> Result<BatchOutcome>;

    /// Partial update: set only the named fields, values read from the
    /// entity through each descriptor's accessor, in one store call.
    async fn update_fields(&self, entity: &T, fields: &[FieldSpec<T>]) -> Result<()>;

    /// The same per-entity partial patch, batched via unordered bulk write,
    /// no audit trail.
    async fn update_fields_batch_no_audit(
        &self,
        entities: &[T],
        fields: &[FieldSpec<T>],
    ) -> Result<BatchOutcome>;
}

/// The full repository capability set.
pub trait GenericRepository<T: Entity>: SearchableRepository<T> + WritableRepository<T> {
    /// The audit trail this repository queues into.
    fn audit_trail(&self) -> &Arc<AuditTrail>;

    /// Guard for queries that assume store-native identifiers: false if any
    /// id fails ObjectId parsing.
    fn is_valid_object_id(&self, ids: &[String]) -> bool {
        ids.iter().all(|id| ObjectId::parse_str(id).is_ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_outcome_complete() {
        let outcome = BatchOutcome::complete(5);
        assert!(outcome.is_complete());
        assert_eq!(outcome.succeeded(), 5);
        assert!(outcome.item_ok(3));
    }

    #[test]
    fn batch_outcome_absorb_offsets_indexes() {
        let mut total = BatchOutcome::complete(500);
        let mut chunk = BatchOutcome::complete(500);
        chunk.failures.push(BatchItemError {
            index: 2,
            message: "duplicate key".to_string(),
        });
        total.absorb(chunk, 500);

        assert_eq!(total.attempted, 1000);
        assert_eq!(total.succeeded(), 999);
        assert!(!total.item_ok(502));
        assert!(total.item_ok(2));
    }
}

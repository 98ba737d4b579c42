//! Entity service: transactional orchestration over a generic repository
//!
//! Every mutating method opens one unit of work, performs its repository
//! call (or a short sequence), then commits — one unit of work per public
//! method. Multi-call sequences such as `add_and_return` are deliberately
//! NOT wrapped in a single atomic transaction: each sub-call commits
//! independently, matching the layer this design descends from.
//!
//! Reads are passthroughs with no transaction scope.
//!
//! Oversized batches are split into fixed-size chunks (500 for add/update,
//! 1000 for field patches) and issued as one repository batch call per
//! chunk, sequentially, inside the same unit of work — bounding per-request
//! payload size against store limits.

use std::sync::Arc;

use tracing::debug;

use crate::config::PagingConfig;
use crate::core::audit::{AuditSink, AuditTrail};
use crate::core::entity::Entity;
use crate::core::error::{Error, QueryError, Result};
use crate::core::odata::ODataQueryOptions;
use crate::core::query::{
    FieldSpec, FilterExpr, PagedResponse, Query, RelationSpec, SortSpec,
};
use crate::core::repository::{BatchOutcome, GenericRepository};
use crate::core::uow::UnitOfWork;

/// Chunk size for audited and unaudited add/update batches.
const WRITE_CHUNK: usize = 500;

/// Chunk size for field-patch batches.
const FIELD_PATCH_CHUNK: usize = 1000;

/// Result of an OData read: one page of data plus the window-independent
/// total and the effective page size.
#[derive(Debug, Clone)]
pub struct ODataPage<T> {
    pub data: Vec<T>,
    pub total: u64,
    pub page_size: u32,
}

/// Transactional service over one entity type.
pub struct EntityService<T: Entity> {
    repository: Arc<dyn GenericRepository<T>>,
    trail: Arc<AuditTrail>,
    sink: Arc<dyn AuditSink>,
    paging: PagingConfig,
}

impl<T: Entity> EntityService<T> {
    /// Build a service over `repository`, flushing audit entries into
    /// `sink`. The service shares the repository's audit trail.
    pub fn new(repository: Arc<dyn GenericRepository<T>>, sink: Arc<dyn AuditSink>) -> Self {
        let trail = repository.audit_trail().clone();
        Self {
            repository,
            trail,
            sink,
            paging: PagingConfig::default(),
        }
    }

    pub fn with_paging(mut self, paging: PagingConfig) -> Self {
        self.paging = paging;
        self
    }

    fn begin(&self) -> UnitOfWork {
        UnitOfWork::begin(self.trail.clone(), self.sink.clone())
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    pub async fn add(&self, entity: &mut T) -> Result<()> {
        let uow = self.begin();
        self.repository.add(entity).await?;
        uow.commit().await
    }

    pub async fn update(&self, entity: &mut T) -> Result<()> {
        let uow = self.begin();
        self.repository.update(entity).await?;
        uow.commit().await
    }

    pub async fn delete(&self, entity: &mut T) -> Result<()> {
        let uow = self.begin();
        self.repository.delete(entity).await?;
        uow.commit().await
    }

    pub async fn delete_by_id(&self, id: &str) -> Result<()> {
        let uow = self.begin();
        self.repository.delete_by_id(id).await?;
        uow.commit().await
    }

    pub async fn delete_permanently(&self, entity: &T) -> Result<()> {
        let uow = self.begin();
        self.repository.delete_permanently(entity).await?;
        uow.commit().await
    }

    pub async fn delete_permanently_batch_no_audit(&self, entities: &[T]) -> Result<()> {
        let uow = self.begin();
        self.repository
            .delete_permanently_batch_no_audit(entities)
            .await?;
        uow.commit().await
    }

    /// Commit the insert, then read the document back by its persisted id —
    /// the store's canonical view, so store-side defaults are reflected.
    /// The read runs outside the write's unit of work.
    pub async fn add_and_return(&self, mut entity: T) -> Result<T> {
        {
            let uow = self.begin();
            self.repository.add(&mut entity).await?;
            uow.commit().await?;
        }
        self.read_back(&entity).await
    }

    /// Commit the update, then read the document back by id.
    pub async fn update_and_return(&self, mut entity: T) -> Result<T> {
        {
            let uow = self.begin();
            self.repository.update(&mut entity).await?;
            uow.commit().await?;
        }
        self.read_back(&entity).await
    }

    async fn read_back(&self, entity: &T) -> Result<T> {
        let id = entity
            .id()
            .ok_or_else(|| Error::Validation("entity has no id after persist".to_string()))?;
        self.repository
            .find_by_id(id)
            .await?
            .ok_or_else(|| Error::NotFound {
                collection: T::collection_name().to_string(),
                id: id.to_string(),
            })
    }

    /// Look for one existing match of `filter`, including soft-deleted
    /// documents. On a match the existing id is copied onto `entity` and an
    /// update runs; otherwise an add. Returns the entity as passed in, not
    /// re-fetched.
    pub async fn add_or_update(&self, mut entity: T, filter: FilterExpr) -> Result<T> {
        let uow = self.begin();
        let probe = Query::filtered(filter).include_deleted(true);
        match self.repository.find_one(&probe).await? {
            Some(existing) => {
                if let Some(id) = existing.id() {
                    entity.set_id(id.to_string());
                }
                self.repository.update(&mut entity).await?;
            }
            None => self.repository.add(&mut entity).await?,
        }
        uow.commit().await?;
        Ok(entity)
    }

    pub async fn add_batch(&self, entities: &mut [T]) -> Result<BatchOutcome> {
        let uow = self.begin();
        let mut outcome = BatchOutcome::default();
        let mut offset = 0;
        for chunk in entities.chunks_mut(WRITE_CHUNK) {
            let len = chunk.len();
            let chunk_outcome = self.repository.add_batch(chunk).await?;
            outcome.absorb(chunk_outcome, offset);
            offset += len;
        }
        debug!(total = offset, "batch add processed");
        uow.commit().await?;
        Ok(outcome)
    }

    pub async fn add_batch_no_audit(&self, entities: &mut [T]) -> Result<BatchOutcome> {
        let uow = self.begin();
        let mut outcome = BatchOutcome::default();
        let mut offset = 0;
        for chunk in entities.chunks_mut(WRITE_CHUNK) {
            let len = chunk.len();
            let chunk_outcome = self.repository.add_batch_no_audit(chunk).await?;
            outcome.absorb(chunk_outcome, offset);
            offset += len;
        }
        uow.commit().await?;
        Ok(outcome)
    }

    pub async fn update_batch(&self, entities: &mut [T]) -> Result<BatchOutcome> {
        let uow = self.begin();
        let mut outcome = BatchOutcome::default();
        let mut offset = 0;
        for chunk in entities.chunks_mut(WRITE_CHUNK) {
            let len = chunk.len();
            let chunk_outcome = self.repository.update_batch(chunk).await?;
            outcome.absorb(chunk_outcome, offset);
            offset += len;
        }
        debug!(total = offset, "batch update processed");
        uow.commit().await?;
        Ok(outcome)
    }

    pub async fn update_batch_no_audit(&self, entities: &[T]) -> Result<BatchOutcome> {
        let uow = self.begin();
        let mut outcome = BatchOutcome::default();
        let mut offset = 0;
        for chunk in entities.chunks(WRITE_CHUNK) {
            let chunk_outcome = self.repository.update_batch_no_audit(chunk).await?;
            outcome.absorb(chunk_outcome, offset);
            offset += chunk.len();
        }
        uow.commit().await?;
        Ok(outcome)
    }

    /// Partial update of the named fields in one store call.
    pub async fn update_fields(&self, entity: &T, fields: &[FieldSpec<T>]) -> Result<()> {
        let uow = self.begin();
        self.repository.update_fields(entity, fields).await?;
        uow.commit().await
    }

    pub async fn update_fields_batch_no_audit(
        &self,
        entities: &[T],
        fields: &[FieldSpec<T>],
    ) -> Result<BatchOutcome> {
        let uow = self.begin();
        let mut outcome = BatchOutcome::default();
        let mut offset = 0;
        for chunk in entities.chunks(FIELD_PATCH_CHUNK) {
            let chunk_outcome = self
                .repository
                .update_fields_batch_no_audit(chunk, fields)
                .await?;
            outcome.absorb(chunk_outcome, offset);
            offset += chunk.len();
        }
        uow.commit().await?;
        Ok(outcome)
    }

    // -----------------------------------------------------------------------
    // Search
    // -----------------------------------------------------------------------

    pub async fn get_all(&self) -> Result<Vec<T>> {
        self.repository.get_all(&[]).await
    }

    pub async fn get_all_sorted(&self, order_by: &[SortSpec]) -> Result<Vec<T>> {
        self.repository.get_all(order_by).await
    }

    /// Filtered read with relation hints carried through for the caller.
    pub async fn get_all_filtered(
        &self,
        filter: FilterExpr,
        relations: Vec<RelationSpec>,
    ) -> Result<Vec<T>> {
        let query = Query {
            filter: Some(filter),
            relations,
            ..Query::default()
        };
        self.repository.find(&query).await
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<T>> {
        self.repository.find_by_id(id).await
    }

    pub async fn find_by_ids(&self, ids: &[String]) -> Result<Vec<T>> {
        self.repository.find_by_ids(ids).await
    }

    pub async fn find_one(&self, query: &Query) -> Result<Option<T>> {
        self.repository.find_one(query).await
    }

    pub async fn get_all_paged(&self, page: u64, page_size: u32) -> Result<Vec<T>> {
        self.repository.get_all_paged(page, page_size, &[]).await
    }

    pub async fn count(&self, filter: Option<&FilterExpr>) -> Result<u64> {
        self.repository.count(filter).await
    }

    /// One page of data plus total count, in the paged response shape.
    pub async fn get_all_paged_response(
        &self,
        page: u64,
        page_size: u32,
    ) -> Result<PagedResponse<T>> {
        let data = self.repository.get_all_paged(page, page_size, &[]).await?;
        let total = self.repository.count(None).await?;
        Ok(PagedResponse::new(data, page_size, total))
    }

    /// Execute the data query, then a second count query built from the same
    /// filters with paging stripped. Two round trips: the count must ignore
    /// the requested page window.
    pub async fn get_all_from_odata(
        &self,
        options: &ODataQueryOptions,
    ) -> Result<ODataPage<T>> {
        let data = self.repository.get_all_from_odata(options).await?;
        let total = self
            .repository
            .count_odata(&options.count_options())
            .await?;

        let page_size = match options.top.as_deref() {
            Some(top) if !top.trim().is_empty() => top
                .trim()
                .parse::<u32>()
                .map_err(|_| QueryError::InvalidNumber(top.to_string()))?,
            _ => self.paging.odata_page_size,
        };

        Ok(ODataPage {
            data,
            total,
            page_size,
        })
    }
}

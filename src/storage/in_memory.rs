//! In-memory repository implementation for testing and development
//!
//! Mirrors the MongoDB backend's semantics over a `RwLock<Vec<T>>`: the same
//! query pipeline, soft-delete handling and audit integration, evaluated
//! against JSON snapshots instead of being lowered to filter documents.
//! Insertion order is the natural order, which makes paging deterministic.

use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use mongodb::bson::oid::ObjectId;
use serde_json::Value;
use tracing::warn;

use crate::config::PagingConfig;
use crate::core::audit::{AuditAction, AuditTrail};
use crate::core::entity::Entity;
use crate::core::error::{Error, Result};
use crate::core::odata::{self, ODataQueryOptions};
use crate::core::query::{FieldSpec, FilterExpr, Query, ResolvedQuery};
use crate::core::repository::{
    BatchItemError, BatchOutcome, BeforeSaveHook, GenericRepository, PreQueryTransform,
    SearchableRepository, WritableRepository,
};
use crate::storage::sort_snapshots;

fn snapshot<T: Entity>(entity: &T) -> Result<Value> {
    serde_json::to_value(entity).map_err(|e| Error::Encode(e.to_string()))
}

/// In-memory repository. Thread-safe; rows kept in insertion order.
pub struct InMemoryRepository<T: Entity> {
    rows: RwLock<Vec<T>>,
    audit: Arc<AuditTrail>,
    paging: PagingConfig,
    before_save: Option<BeforeSaveHook<T>>,
    pre_query: Option<PreQueryTransform>,
}

impl<T: Entity> InMemoryRepository<T> {
    pub fn new(audit: Arc<AuditTrail>) -> Self {
        Self {
            rows: RwLock::new(Vec::new()),
            audit,
            paging: PagingConfig::default(),
            before_save: None,
            pre_query: None,
        }
    }

    pub fn with_before_save(mut self, hook: BeforeSaveHook<T>) -> Self {
        self.before_save = Some(hook);
        self
    }

    pub fn with_pre_query(mut self, transform: PreQueryTransform) -> Self {
        self.pre_query = Some(transform);
        self
    }

    pub fn with_paging(mut self, paging: PagingConfig) -> Self {
        self.paging = paging;
        self
    }

    fn run_before_save(&self, entity: &mut T) {
        if let Some(hook) = &self.before_save {
            hook(entity);
        }
    }

    fn read_rows(&self) -> Vec<T> {
        self.rows
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn with_rows<R>(&self, f: impl FnOnce(&mut Vec<T>) -> R) -> R {
        let mut rows = self.rows.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut rows)
    }

    fn plan(&self, query: &Query) -> ResolvedQuery {
        let mut plan = ResolvedQuery::resolve(query, &self.paging);
        if let Some(inspect) = &query.inspect {
            inspect(&plan);
        }
        if let Some(transform) = &self.pre_query {
            plan.filter = transform(plan.filter.take());
        }
        plan
    }

    fn transformed(&self, filter: Option<FilterExpr>) -> Option<FilterExpr> {
        match &self.pre_query {
            Some(transform) => transform(filter),
            None => filter,
        }
    }

    fn run_plan(&self, plan: &ResolvedQuery) -> Result<Vec<T>> {
        let mut pairs = self
            .read_rows()
            .into_iter()
            .map(|e| Ok((snapshot(&e)?, e)))
            .collect::<Result<Vec<(Value, T)>>>()?;

        if let Some(filter) = &plan.filter {
            pairs.retain(|(value, _)| filter.matches(value));
        }

        if plan.late_sort {
            pairs = Self::window(pairs, plan.skip, plan.limit);
            sort_snapshots(&mut pairs, &plan.order_by);
        } else {
            sort_snapshots(&mut pairs, &plan.order_by);
            pairs = Self::window(pairs, plan.skip, plan.limit);
        }

        Ok(pairs.into_iter().map(|(_, e)| e).collect())
    }

    fn window(pairs: Vec<(Value, T)>, skip: u64, limit: Option<u32>) -> Vec<(Value, T)> {
        let iter = pairs.into_iter().skip(skip as usize);
        match limit {
            Some(limit) => iter.take(limit as usize).collect(),
            None => iter.collect(),
        }
    }

    /// Compose the count/OData base filter: soft-delete exclusion plus an
    /// optional predicate, run through the repository transform.
    fn composed_filter(&self, predicate: Option<FilterExpr>) -> Option<FilterExpr> {
        let mut filter = Some(FilterExpr::eq("deleted", false));
        if let Some(p) = predicate {
            filter = filter.map(|base| base.and(p));
        }
        self.transformed(filter)
    }

    fn position(rows: &[T], id: &str) -> Option<usize> {
        rows.iter().position(|row| row.id() == Some(id))
    }

    fn insert_row(&self, entity: &T) -> Result<()> {
        let id = entity
            .id()
            .ok_or_else(|| Error::Validation("entity has no id".to_string()))?;
        self.with_rows(|rows| {
            if Self::position(rows, id).is_some() {
                return Err(Error::Validation(format!("duplicate id `{id}`")));
            }
            rows.push(entity.clone());
            Ok(())
        })
    }

    /// Replace the stored row by id. Missing rows are a logged no-op —
    /// last-writer-wins, same as the MongoDB replace path.
    fn replace_row(&self, entity: &T) -> Result<Option<Value>> {
        let id = entity
            .id()
            .ok_or_else(|| Error::Validation("entity has no id".to_string()))?
            .to_string();
        let before = self.with_rows(|rows| match Self::position(rows, &id) {
            Some(index) => {
                let before = snapshot(&rows[index]);
                rows[index] = entity.clone();
                before.map(Some)
            }
            None => Ok(None),
        })?;
        if before.is_none() {
            warn!(
                collection = T::collection_name(),
                id, "replace matched no document"
            );
        }
        Ok(before)
    }
}

#[async_trait]
impl<T: Entity> SearchableRepository<T> for InMemoryRepository<T> {
    async fn find_by_id(&self, id: &str) -> Result<Option<T>> {
        let query = Query::filtered(FilterExpr::eq("id", id));
        self.find_one(&query).await
    }

    async fn find_by_ids(&self, ids: &[String]) -> Result<Vec<T>> {
        let query = Query::filtered(FilterExpr::is_in("id", ids.iter().map(String::as_str)));
        self.find(&query).await
    }

    async fn find(&self, query: &Query) -> Result<Vec<T>> {
        let plan = self.plan(query);
        self.run_plan(&plan)
    }

    async fn find_one(&self, query: &Query) -> Result<Option<T>> {
        let mut plan = self.plan(query);
        plan.limit = Some(1);
        plan.late_sort = false;
        Ok(self.run_plan(&plan)?.into_iter().next())
    }

    async fn count(&self, filter: Option<&FilterExpr>) -> Result<u64> {
        let composed = self.composed_filter(filter.cloned());
        let plan = ResolvedQuery {
            filter: composed,
            skip: 0,
            limit: None,
            order_by: Vec::new(),
            late_sort: false,
        };
        Ok(self.run_plan(&plan)?.len() as u64)
    }

    async fn get_all_from_odata(&self, options: &ODataQueryOptions) -> Result<Vec<T>> {
        let translated = odata::translate(options)?;
        let plan = ResolvedQuery {
            filter: self.composed_filter(translated.filter),
            skip: translated.skip.unwrap_or(0),
            limit: translated.top,
            order_by: translated.order_by,
            late_sort: false,
        };
        self.run_plan(&plan)
    }

    async fn count_odata(&self, options: &ODataQueryOptions) -> Result<u64> {
        let translated = odata::translate_for_count(options)?;
        let plan = ResolvedQuery {
            filter: self.composed_filter(translated.filter),
            skip: translated.skip.unwrap_or(0),
            limit: translated.top,
            order_by: Vec::new(),
            late_sort: false,
        };
        Ok(self.run_plan(&plan)?.len() as u64)
    }
}

#[async_trait]
impl<T: Entity> WritableRepository<T> for InMemoryRepository<T> {
    async fn add(&self, entity: &mut T) -> Result<()> {
        self.audit.stamp(entity, AuditAction::Create);
        self.run_before_save(entity);
        if entity.id().is_none() {
            entity.set_id(ObjectId::new().to_hex());
        }

        self.insert_row(entity)?;

        self.audit.queue(
            AuditAction::Create,
            T::collection_name(),
            entity.id().map(str::to_string),
            None,
            Some(&snapshot(entity)?),
        );
        Ok(())
    }

    async fn update(&self, entity: &mut T) -> Result<()> {
        let id = entity
            .id()
            .ok_or_else(|| Error::Validation("entity has no id".to_string()))?
            .to_string();

        self.audit.stamp(entity, AuditAction::Update);
        self.run_before_save(entity);

        let before = self.replace_row(entity)?;

        self.audit.queue(
            AuditAction::Update,
            T::collection_name(),
            Some(id),
            before.as_ref(),
            Some(&snapshot(entity)?),
        );
        Ok(())
    }

    async fn delete_by_id(&self, id: &str) -> Result<()> {
        let existing = self.with_rows(|rows| {
            Self::position(rows, id).map(|index| rows[index].clone())
        });
        let mut entity = existing.ok_or_else(|| Error::NotFound {
            collection: T::collection_name().to_string(),
            id: id.to_string(),
        })?;
        self.delete(&mut entity).await
    }

    async fn delete_permanently(&self, entity: &T) -> Result<()> {
        let id = entity
            .id()
            .ok_or_else(|| Error::Validation("entity has no id".to_string()))?
            .to_string();

        let before = self.with_rows(|rows| match Self::position(rows, &id) {
            Some(index) => {
                let removed = rows.remove(index);
                snapshot(&removed).map(Some)
            }
            None => Ok(None),
        })?;

        self.audit.queue(
            AuditAction::Delete,
            T::collection_name(),
            Some(id),
            before.as_ref(),
            Some(&snapshot(entity)?),
        );
        Ok(())
    }

    async fn delete_permanently_batch_no_audit(&self, entities: &[T]) -> Result<()> {
        let ids: std::collections::HashSet<String> = entities
            .iter()
            .filter_map(|e| e.id().map(str::to_string))
            .collect();
        self.with_rows(|rows| {
            rows.retain(|row| row.id().is_none_or(|id| !ids.contains(id)));
        });
        Ok(())
    }

    async fn add_batch(&self, entities: &mut [T]) -> Result<BatchOutcome> {
        if entities.is_empty() {
            return Ok(BatchOutcome::complete(0));
        }

        for entity in entities.iter_mut() {
            self.audit.stamp(entity, AuditAction::Create);
            self.run_before_save(entity);
            if entity.id().is_none() {
                entity.set_id(ObjectId::new().to_hex());
            }
        }

        // unordered semantics: a failing item does not block the rest
        let mut outcome = BatchOutcome::complete(entities.len());
        for (index, entity) in entities.iter().enumerate() {
            if let Err(err) = self.insert_row(entity) {
                outcome.failures.push(BatchItemError {
                    index,
                    message: err.to_string(),
                });
            }
        }

        for (index, entity) in entities.iter().enumerate() {
            if outcome.item_ok(index) {
                self.audit.queue(
                    AuditAction::Create,
                    T::collection_name(),
                    entity.id().map(str::to_string),
                    None,
                    Some(&snapshot(entity)?),
                );
            }
        }
        Ok(outcome)
    }

    async fn add_batch_no_audit(&self, entities: &mut [T]) -> Result<BatchOutcome> {
        if entities.is_empty() {
            return Ok(BatchOutcome::complete(0));
        }
        for entity in entities.iter_mut() {
            if entity.id().is_none() {
                entity.set_id(ObjectId::new().to_hex());
            }
        }
        let mut outcome = BatchOutcome::complete(entities.len());
        for (index, entity) in entities.iter().enumerate() {
            if let Err(err) = self.insert_row(entity) {
                outcome.failures.push(BatchItemError {
                    index,
                    message: err.to_string(),
                });
            }
        }
        Ok(outcome)
    }

    async fn update_batch(&self, entities: &mut [T]) -> Result<BatchOutcome> {
        if entities.is_empty() {
            return Ok(BatchOutcome::complete(0));
        }

        for entity in entities.iter_mut() {
            self.audit.stamp(entity, AuditAction::Update);
            self.run_before_save(entity);
        }
        for entity in entities.iter() {
            self.replace_row(entity)?;
        }

        for entity in entities.iter() {
            self.audit.queue(
                AuditAction::Update,
                T::collection_name(),
                entity.id().map(str::to_string),
                None,
                Some(&snapshot(entity)?),
            );
        }
        Ok(BatchOutcome::complete(entities.len()))
    }

    async fn update_batch_no_audit(&self, entities: &[T]) -> Result<BatchOutcome> {
        for entity in entities {
            self.replace_row(entity)?;
        }
        Ok(BatchOutcome::complete(entities.len()))
    }

    async fn update_fields(&self, entity: &T, fields: &[FieldSpec<T>]) -> Result<()> {
        if fields.is_empty() {
            return Err(Error::Validation("no fields specified".to_string()));
        }
        let id = entity
            .id()
            .ok_or_else(|| Error::Validation("entity has no id".to_string()))?
            .to_string();

        let patched = self.with_rows(|rows| match Self::position(rows, &id) {
            Some(index) => {
                let mut value = snapshot(&rows[index])?;
                for field in fields {
                    value[field.name] = (field.read)(entity);
                }
                let updated: T =
                    serde_json::from_value(value).map_err(|e| Error::Decode(e.to_string()))?;
                rows[index] = updated;
                Ok::<bool, Error>(true)
            }
            None => Ok(false),
        })?;

        if !patched {
            warn!(
                collection = T::collection_name(),
                id, "field patch matched no document"
            );
        }
        Ok(())
    }

    async fn update_fields_batch_no_audit(
        &self,
        entities: &[T],
        fields: &[FieldSpec<T>],
    ) -> Result<BatchOutcome> {
        for entity in entities {
            self.update_fields(entity, fields).await?;
        }
        Ok(BatchOutcome::complete(entities.len()))
    }
}

impl<T: Entity> GenericRepository<T> for InMemoryRepository<T> {
    fn audit_trail(&self) -> &Arc<AuditTrail> {
        &self.audit
    }
}

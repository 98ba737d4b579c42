//! MongoDB repository backend using the official MongoDB async driver.
//!
//! Provides [`MongoRepository<T>`] — the production implementation of the
//! repository traits — and [`MongoAuditSink`], which flushes audit entries
//! into a collection of their own.
//!
//! # Storage model
//!
//! Collection-per-entity-type: each `MongoRepository<T>` operates on the
//! collection named by `T::collection_name()`.
//!
//! # Serialization strategy
//!
//! Entities are serialized via `serde_json::Value` as an intermediate
//! format, then converted to BSON documents. This keeps DateTime handling
//! consistent (ISO 8601 strings) and gives the audit layer its JSON
//! snapshots for free. The `id` field maps to MongoDB's `_id` as a native
//! ObjectId.
//!
//! # Consistency
//!
//! `update` reads the old snapshot and replaces by id in two separate round
//! trips with no locking: a concurrent writer can interleave, producing a
//! lost update and an audit delta computed against a stale "before". This is
//! last-writer-wins by design. Batch writes are unordered — on partial
//! failure the surviving items stay committed and the caller gets a
//! per-item [`BatchOutcome`].

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::oid::ObjectId;
use mongodb::bson::{Bson, Document, doc};
use mongodb::options::{ReplaceOneModel, UpdateModifications, UpdateOneModel, WriteModel};
use mongodb::{Client, Collection, Database, error::ErrorKind};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::PagingConfig;
use crate::core::audit::{AuditAction, AuditEntry, AuditSink, AuditTrail};
use crate::core::entity::Entity;
use crate::core::error::{Error, Result};
use crate::core::odata::{self, ODataQueryOptions};
use crate::core::query::{
    CompareOp, FieldSpec, FilterExpr, FilterValue, Query, ResolvedQuery, SortDirection, SortSpec,
    StringFn,
};
use crate::core::repository::{
    BatchItemError, BatchOutcome, BeforeSaveHook, GenericRepository, PreQueryTransform,
    SearchableRepository, WritableRepository,
};
use crate::storage::sort_snapshots;

/// Page size for physical batch deletes.
const DELETE_PAGE: usize = 1000;

// ---------------------------------------------------------------------------
// Conversion helpers
// ---------------------------------------------------------------------------

/// Convert a serde_json::Value (expected to be an Object) into a BSON
/// document, mapping `id` → `_id` as a native ObjectId.
fn json_to_document(json: Value) -> Result<Document> {
    let bson = mongodb::bson::to_bson(&json)
        .map_err(|e| Error::Encode(format!("JSON to BSON conversion failed: {e}")))?;

    let mut document = match bson {
        Bson::Document(d) => d,
        _ => return Err(Error::Encode("expected a JSON object".to_string())),
    };

    match document.remove("id") {
        Some(Bson::String(id)) => {
            let oid = ObjectId::parse_str(&id)
                .map_err(|_| Error::Validation(format!("malformed object id `{id}`")))?;
            document.insert("_id", oid);
        }
        Some(Bson::Null) | None => {}
        Some(other) => {
            return Err(Error::Encode(format!(
                "id must be a string, got {other}"
            )));
        }
    }

    Ok(document)
}

/// Convert a BSON document back into a serde_json::Value, mapping `_id` →
/// `id` as a hex string.
fn document_to_json(mut document: Document) -> Value {
    if let Some(id) = document.remove("_id") {
        let rendered = match id {
            Bson::ObjectId(oid) => Bson::String(oid.to_hex()),
            other => other,
        };
        document.insert("id", rendered);
    }

    Bson::Document(document).into_relaxed_extjson()
}

fn entity_to_document<T: Entity>(entity: &T) -> Result<Document> {
    json_to_document(snapshot(entity)?)
}

fn document_to_entity<T: Entity>(document: Document) -> Result<T> {
    serde_json::from_value(document_to_json(document))
        .map_err(|e| Error::Decode(e.to_string()))
}

/// JSON snapshot of an entity, as used for audit diffing.
fn snapshot<T: Entity>(entity: &T) -> Result<Value> {
    serde_json::to_value(entity).map_err(|e| Error::Encode(e.to_string()))
}

/// Id equality filter: native ObjectId when the id parses, raw string
/// otherwise (which then simply matches nothing).
fn id_filter(id: &str) -> Document {
    doc! { "_id": id_bson(id) }
}

fn id_bson(id: &str) -> Bson {
    match ObjectId::parse_str(id) {
        Ok(oid) => Bson::ObjectId(oid),
        Err(_) => Bson::String(id.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Filter lowering
// ---------------------------------------------------------------------------

fn filter_value_to_bson(value: &FilterValue) -> Bson {
    match value {
        FilterValue::String(s) => Bson::String(s.clone()),
        FilterValue::Integer(i) => Bson::Int64(*i),
        FilterValue::Float(f) => Bson::Double(*f),
        FilterValue::Boolean(b) => Bson::Boolean(*b),
        FilterValue::Null => Bson::Null,
    }
}

/// Resolve a filter field to its store name and coerce id values.
fn field_and_value(field: &str, value: &FilterValue) -> (String, Bson) {
    if field == "id" {
        let bson = match value {
            FilterValue::String(s) => id_bson(s),
            other => filter_value_to_bson(other),
        };
        ("_id".to_string(), bson)
    } else {
        (field.to_string(), filter_value_to_bson(value))
    }
}

fn compare_op_key(op: CompareOp) -> &'static str {
    match op {
        CompareOp::Eq => "$eq",
        CompareOp::Ne => "$ne",
        CompareOp::Gt => "$gt",
        CompareOp::Ge => "$gte",
        CompareOp::Lt => "$lt",
        CompareOp::Le => "$lte",
    }
}

fn regex_pattern(func: StringFn, needle: &str) -> String {
    let mut escaped = String::with_capacity(needle.len());
    for c in needle.chars() {
        if ".^$*+?()[]{}|\\".contains(c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    match func {
        StringFn::Contains => escaped,
        StringFn::StartsWith => format!("^{escaped}"),
        StringFn::EndsWith => format!("{escaped}$"),
    }
}

/// Lower a filter expression into a MongoDB filter document.
pub(crate) fn filter_to_document(expr: &FilterExpr) -> Document {
    match expr {
        FilterExpr::Compare { field, op, value } => {
            let (name, bson) = field_and_value(field, value);
            doc! { name: { compare_op_key(*op): bson } }
        }
        FilterExpr::In { field, values } => {
            let pairs: Vec<Bson> = values
                .iter()
                .map(|v| field_and_value(field, v).1)
                .collect();
            let name = if field == "id" { "_id" } else { field.as_str() };
            doc! { name: { "$in": pairs } }
        }
        FilterExpr::Text {
            field,
            func,
            needle,
        } => {
            let name = field.as_str();
            doc! { name: { "$regex": regex_pattern(*func, needle) } }
        }
        FilterExpr::And(a, b) => {
            doc! { "$and": [filter_to_document(a), filter_to_document(b)] }
        }
        FilterExpr::Or(a, b) => {
            doc! { "$or": [filter_to_document(a), filter_to_document(b)] }
        }
        FilterExpr::Not(inner) => {
            doc! { "$nor": [filter_to_document(inner)] }
        }
        FilterExpr::Any { field, predicate } => {
            let name = field.as_str();
            match predicate {
                None => doc! { name: { "$exists": true, "$not": { "$size": 0 } } },
                Some(p) => doc! { name: { "$elemMatch": element_condition(p) } },
            }
        }
        FilterExpr::All { field, predicate } => {
            // no element violates the predicate
            let name = field.as_str();
            doc! {
                name: {
                    "$not": { "$elemMatch": { "$nor": [element_condition(predicate)] } }
                }
            }
        }
    }
}

/// Lower a lambda predicate relative to an array element. The empty field
/// path refers to the element itself, so its operators sit at the root of
/// the `$elemMatch` body.
fn element_condition(expr: &FilterExpr) -> Document {
    match expr {
        FilterExpr::Compare { field, op, value } if field.is_empty() => {
            doc! { compare_op_key(*op): filter_value_to_bson(value) }
        }
        FilterExpr::In { field, values } if field.is_empty() => {
            let pairs: Vec<Bson> = values.iter().map(filter_value_to_bson).collect();
            doc! { "$in": pairs }
        }
        FilterExpr::Text { field, func, needle } if field.is_empty() => {
            doc! { "$regex": regex_pattern(*func, needle) }
        }
        FilterExpr::And(a, b) => {
            doc! { "$and": [element_condition(a), element_condition(b)] }
        }
        FilterExpr::Or(a, b) => {
            doc! { "$or": [element_condition(a), element_condition(b)] }
        }
        FilterExpr::Not(inner) => {
            doc! { "$nor": [element_condition(inner)] }
        }
        other => filter_to_document(other),
    }
}

fn sort_document(specs: &[SortSpec]) -> Document {
    let mut document = Document::new();
    for spec in specs {
        let field = if spec.field == "id" { "_id" } else { spec.field.as_str() };
        let direction = match spec.direction {
            SortDirection::Asc => 1,
            SortDirection::Desc => -1,
        };
        document.insert(field, direction);
    }
    document
}

// ---------------------------------------------------------------------------
// Batch error extraction
// ---------------------------------------------------------------------------

/// Per-item failures from an unordered insert_many, or the raw error when
/// the failure is not item-level (connectivity, write concern).
fn insert_many_outcome(attempted: usize, err: mongodb::error::Error) -> Result<BatchOutcome> {
    let failures: Option<Vec<BatchItemError>> = match err.kind.as_ref() {
        ErrorKind::InsertMany(failure) => failure.write_errors.as_ref().map(|errors| {
            errors
                .iter()
                .map(|e| BatchItemError {
                    index: e.index,
                    message: e.message.clone(),
                })
                .collect()
        }),
        _ => None,
    };
    match failures {
        Some(failures) => {
            warn!(attempted, failed = failures.len(), "partial insert_many failure");
            Ok(BatchOutcome { attempted, failures })
        }
        None => Err(err.into()),
    }
}

/// Per-item failures from an unordered client bulk write.
fn bulk_write_outcome(attempted: usize, err: mongodb::error::Error) -> Result<BatchOutcome> {
    let failures: Option<Vec<BatchItemError>> = match err.kind.as_ref() {
        ErrorKind::BulkWrite(failure) if !failure.write_errors.is_empty() => {
            let mut items: Vec<BatchItemError> = failure
                .write_errors
                .iter()
                .map(|(index, e)| BatchItemError {
                    index: *index,
                    message: e.message.clone(),
                })
                .collect();
            items.sort_by_key(|f| f.index);
            Some(items)
        }
        _ => None,
    };
    match failures {
        Some(failures) => {
            warn!(attempted, failed = failures.len(), "partial bulk write failure");
            Ok(BatchOutcome { attempted, failures })
        }
        None => Err(err.into()),
    }
}

// ---------------------------------------------------------------------------
// MongoRepository<T>
// ---------------------------------------------------------------------------

/// Generic repository backed by MongoDB.
///
/// Stateless across calls apart from the collection handle, the shared
/// audit trail and read-only hooks; safe to invoke concurrently.
///
/// # Example
///
/// ```rust,ignore
/// let db = config.connect().await?;
/// let trail = Arc::new(AuditTrail::with_actor("svc"));
/// let repository = MongoRepository::<Device>::new(&db, trail);
/// ```
pub struct MongoRepository<T: Entity> {
    collection: Collection<Document>,
    client: Client,
    audit: Arc<AuditTrail>,
    paging: PagingConfig,
    before_save: Option<BeforeSaveHook<T>>,
    pre_query: Option<PreQueryTransform>,
}

impl<T: Entity> MongoRepository<T> {
    pub fn new(database: &Database, audit: Arc<AuditTrail>) -> Self {
        Self {
            collection: database.collection(T::collection_name()),
            client: database.client().clone(),
            audit,
            paging: PagingConfig::default(),
            before_save: None,
            pre_query: None,
        }
    }

    /// Install the before-save hook (defaults to a no-op).
    pub fn with_before_save(mut self, hook: BeforeSaveHook<T>) -> Self {
        self.before_save = Some(hook);
        self
    }

    /// Install the repository-level pre-query transform (default-filter
    /// injection point).
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

    /// Pipeline steps 1–7 for a caller query: resolve, let the caller's
    /// inspector see the plan, then apply the repository transform.
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

    /// Apply the repository transform to an already-composed filter (the
    /// count and OData paths, which bypass `Query`).
    fn transformed(&self, filter: Option<FilterExpr>) -> Option<FilterExpr> {
        match &self.pre_query {
            Some(transform) => transform(filter),
            None => filter,
        }
    }

    async fn run_plan(&self, plan: &ResolvedQuery) -> Result<Vec<T>> {
        let filter = plan
            .filter
            .as_ref()
            .map(filter_to_document)
            .unwrap_or_default();
        debug!(
            collection = T::collection_name(),
            skip = plan.skip,
            limit = plan.limit,
            "running query"
        );

        let mut find = self.collection.find(filter);
        if plan.skip > 0 {
            find = find.skip(plan.skip);
        }
        if let Some(limit) = plan.limit {
            find = find.limit(limit as i64);
        }
        let sort_in_store = !plan.order_by.is_empty() && !plan.late_sort;
        if sort_in_store {
            find = find.sort(sort_document(&plan.order_by));
        }

        let documents: Vec<Document> = find.await?.try_collect().await?;
        let mut entities = documents
            .into_iter()
            .map(document_to_entity::<T>)
            .collect::<Result<Vec<_>>>()?;

        // late sort: order the fetched window, not the whole collection
        if !plan.order_by.is_empty() && plan.late_sort {
            let mut pairs = entities
                .drain(..)
                .map(|e| Ok((snapshot(&e)?, e)))
                .collect::<Result<Vec<(Value, T)>>>()?;
            sort_snapshots(&mut pairs, &plan.order_by);
            entities = pairs.into_iter().map(|(_, e)| e).collect();
        }

        Ok(entities)
    }

    /// Raw by-id fetch, soft-deleted included — the "old snapshot" read used
    /// by update and permanent delete.
    async fn find_snapshot(&self, id: &str) -> Result<Option<Value>> {
        let document = self.collection.find_one(id_filter(id)).await?;
        Ok(document.map(document_to_json))
    }

    fn patch_document(entity: &T, fields: &[FieldSpec<T>]) -> Result<Document> {
        if fields.is_empty() {
            return Err(Error::Validation("no fields specified".to_string()));
        }
        let mut set = Document::new();
        for field in fields {
            let value = (field.read)(entity);
            let bson = mongodb::bson::to_bson(&value)
                .map_err(|e| Error::Encode(format!("field `{}`: {e}", field.name)))?;
            set.insert(field.name, bson);
        }
        Ok(doc! { "$set": set })
    }

    fn require_id(entity: &T) -> Result<String> {
        entity
            .id()
            .map(str::to_string)
            .ok_or_else(|| Error::Validation("entity has no id".to_string()))
    }
}

#[async_trait]
impl<T: Entity> SearchableRepository<T> for MongoRepository<T> {
    async fn find_by_id(&self, id: &str) -> Result<Option<T>> {
        let query = Query::filtered(FilterExpr::eq("id", id));
        self.find_one(&query).await
    }

    async fn find_by_ids(&self, ids: &[String]) -> Result<Vec<T>> {
        let query = Query::filtered(FilterExpr::is_in(
            "id",
            ids.iter().map(String::as_str),
        ));
        self.find(&query).await
    }

    async fn find(&self, query: &Query) -> Result<Vec<T>> {
        let plan = self.plan(query);
        self.run_plan(&plan).await
    }

    async fn find_one(&self, query: &Query) -> Result<Option<T>> {
        let mut plan = self.plan(query);
        plan.limit = Some(1);
        plan.late_sort = false;
        Ok(self.run_plan(&plan).await?.into_iter().next())
    }

    async fn count(&self, filter: Option<&FilterExpr>) -> Result<u64> {
        let mut combined = Some(FilterExpr::eq("deleted", false));
        if let Some(predicate) = filter {
            combined = combined.map(|base| base.and(predicate.clone()));
        }
        let combined = self.transformed(combined);
        let document = combined
            .as_ref()
            .map(filter_to_document)
            .unwrap_or_default();
        Ok(self.collection.count_documents(document).await?)
    }

    async fn get_all_from_odata(&self, options: &ODataQueryOptions) -> Result<Vec<T>> {
        let translated = odata::translate(options)?;
        let mut filter = Some(FilterExpr::eq("deleted", false));
        if let Some(predicate) = translated.filter {
            filter = filter.map(|base| base.and(predicate));
        }
        let plan = ResolvedQuery {
            filter: self.transformed(filter),
            skip: translated.skip.unwrap_or(0),
            limit: translated.top,
            order_by: translated.order_by,
            late_sort: false,
        };
        self.run_plan(&plan).await
    }

    async fn count_odata(&self, options: &ODataQueryOptions) -> Result<u64> {
        let translated = odata::translate_for_count(options)?;
        let mut filter = Some(FilterExpr::eq("deleted", false));
        if let Some(predicate) = translated.filter {
            filter = filter.map(|base| base.and(predicate));
        }
        let document = self
            .transformed(filter)
            .as_ref()
            .map(filter_to_document)
            .unwrap_or_default();

        let mut count = self.collection.count_documents(document);
        if let Some(skip) = translated.skip {
            count = count.skip(skip);
        }
        if let Some(top) = translated.top {
            count = count.limit(top as u64);
        }
        Ok(count.await?)
    }
}

#[async_trait]
impl<T: Entity> WritableRepository<T> for MongoRepository<T> {
    async fn add(&self, entity: &mut T) -> Result<()> {
        self.audit.stamp(entity, AuditAction::Create);
        self.run_before_save(entity);
        if entity.id().is_none() {
            entity.set_id(ObjectId::new().to_hex());
        }

        let document = entity_to_document(entity)?;
        self.collection.insert_one(document).await?;

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
        let id = Self::require_id(entity)?;
        let before = self.find_snapshot(&id).await?;

        self.audit.stamp(entity, AuditAction::Update);
        self.run_before_save(entity);

        let document = entity_to_document(entity)?;
        let result = self.collection.replace_one(id_filter(&id), document).await?;
        if result.matched_count == 0 {
            warn!(
                collection = T::collection_name(),
                id, "replace matched no document"
            );
        }

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
        let document = self.collection.find_one(id_filter(id)).await?;
        let mut entity = match document {
            Some(d) => document_to_entity::<T>(d)?,
            None => {
                return Err(Error::NotFound {
                    collection: T::collection_name().to_string(),
                    id: id.to_string(),
                });
            }
        };
        self.delete(&mut entity).await
    }

    async fn delete_permanently(&self, entity: &T) -> Result<()> {
        let id = Self::require_id(entity)?;
        let before = self.find_snapshot(&id).await?;

        self.collection.delete_one(id_filter(&id)).await?;

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
        let mut seen = HashSet::new();
        let ids: Vec<String> = entities
            .iter()
            .filter_map(|e| e.id().map(str::to_string))
            .filter(|id| seen.insert(id.clone()))
            .collect();

        for page in ids.chunks(DELETE_PAGE) {
            let values: Vec<Bson> = page.iter().map(|id| id_bson(id)).collect();
            self.collection
                .delete_many(doc! { "_id": { "$in": values } })
                .await?;
        }
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

        let documents = entities
            .iter()
            .map(entity_to_document)
            .collect::<Result<Vec<_>>>()?;
        let outcome = match self.collection.insert_many(documents).ordered(false).await {
            Ok(_) => BatchOutcome::complete(entities.len()),
            Err(err) => insert_many_outcome(entities.len(), err)?,
        };

        // audit only after the bulk write returned, and only for survivors
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
        let documents = entities
            .iter()
            .map(entity_to_document)
            .collect::<Result<Vec<_>>>()?;
        match self.collection.insert_many(documents).ordered(false).await {
            Ok(_) => Ok(BatchOutcome::complete(entities.len())),
            Err(err) => insert_many_outcome(entities.len(), err),
        }
    }

    async fn update_batch(&self, entities: &mut [T]) -> Result<BatchOutcome> {
        if entities.is_empty() {
            return Ok(BatchOutcome::complete(0));
        }

        let namespace = self.collection.namespace();
        let mut models = Vec::with_capacity(entities.len());
        for entity in entities.iter_mut() {
            self.audit.stamp(entity, AuditAction::Update);
            self.run_before_save(entity);
            let id = Self::require_id(entity)?;
            models.push(WriteModel::ReplaceOne(
                ReplaceOneModel::builder()
                    .namespace(namespace.clone())
                    .filter(id_filter(&id))
                    .replacement(entity_to_document(entity)?)
                    .build(),
            ));
        }

        let outcome = match self.client.bulk_write(models).ordered(false).await {
            Ok(_) => BatchOutcome::complete(entities.len()),
            Err(err) => bulk_write_outcome(entities.len(), err)?,
        };

        for (index, entity) in entities.iter().enumerate() {
            if outcome.item_ok(index) {
                self.audit.queue(
                    AuditAction::Update,
                    T::collection_name(),
                    entity.id().map(str::to_string),
                    None,
                    Some(&snapshot(entity)?),
                );
            }
        }
        Ok(outcome)
    }

    async fn update_batch_no_audit(&self, entities: &[T]) -> Result<BatchOutcome> {
        if entities.is_empty() {
            return Ok(BatchOutcome::complete(0));
        }

        let namespace = self.collection.namespace();
        let mut models = Vec::with_capacity(entities.len());
        for entity in entities {
            let id = Self::require_id(entity)?;
            models.push(WriteModel::ReplaceOne(
                ReplaceOneModel::builder()
                    .namespace(namespace.clone())
                    .filter(id_filter(&id))
                    .replacement(entity_to_document(entity)?)
                    .build(),
            ));
        }

        match self.client.bulk_write(models).ordered(false).await {
            Ok(_) => Ok(BatchOutcome::complete(entities.len())),
            Err(err) => bulk_write_outcome(entities.len(), err),
        }
    }

    async fn update_fields(&self, entity: &T, fields: &[FieldSpec<T>]) -> Result<()> {
        let id = Self::require_id(entity)?;
        let patch = Self::patch_document(entity, fields)?;
        self.collection.update_one(id_filter(&id), patch).await?;
        Ok(())
    }

    async fn update_fields_batch_no_audit(
        &self,
        entities: &[T],
        fields: &[FieldSpec<T>],
    ) -> Result<BatchOutcome> {
        if entities.is_empty() {
            return Ok(BatchOutcome::complete(0));
        }

        let namespace = self.collection.namespace();
        let mut models = Vec::with_capacity(entities.len());
        for entity in entities {
            let id = Self::require_id(entity)?;
            models.push(WriteModel::UpdateOne(
                UpdateOneModel::builder()
                    .namespace(namespace.clone())
                    .filter(id_filter(&id))
                    .update(UpdateModifications::Document(Self::patch_document(
                        entity, fields,
                    )?))
                    .build(),
            ));
        }

        match self.client.bulk_write(models).ordered(false).await {
            Ok(_) => Ok(BatchOutcome::complete(entities.len())),
            Err(err) => bulk_write_outcome(entities.len(), err),
        }
    }
}

impl<T: Entity> GenericRepository<T> for MongoRepository<T> {
    fn audit_trail(&self) -> &Arc<AuditTrail> {
        &self.audit
    }
}

// ---------------------------------------------------------------------------
// MongoAuditSink
// ---------------------------------------------------------------------------

/// Audit sink that flushes entries into a MongoDB collection.
pub struct MongoAuditSink {
    collection: Collection<Document>,
}

impl MongoAuditSink {
    pub fn new(database: &Database, collection_name: &str) -> Self {
        Self {
            collection: database.collection(collection_name),
        }
    }
}

#[async_trait]
impl AuditSink for MongoAuditSink {
    async fn write(&self, entries: Vec<AuditEntry>) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let documents = entries
            .iter()
            .map(|entry| {
                let json =
                    serde_json::to_value(entry).map_err(|e| Error::Encode(e.to_string()))?;
                json_to_document(json)
            })
            .collect::<Result<Vec<_>>>()?;
        self.collection.insert_many(documents).await?;
        Ok(())
    }
}

//! # docstore
//!
//! A generic data-access layer for MongoDB document stores, shared by many
//! entity types.
//!
//! ## Features
//!
//! - **Generic repository**: CRUD, soft delete, batch mutation and partial
//!   field updates against one collection per entity type
//! - **Soft Delete**: a `deleted` marker instead of physical removal;
//!   default reads exclude marked documents
//! - **Audit Trail**: per-field change deltas diffed from entity snapshots,
//!   queued per mutation and flushed on unit-of-work commit
//! - **Dynamic Querying**: filtered/sorted/paged reads through one
//!   deterministic query pipeline
//! - **OData Translation**: `$filter`/`$orderby`/`$top`/`$skip` translated
//!   into native queries under hard safety ceilings
//! - **Entity Service**: one unit of work per call, oversized-batch
//!   chunking, read-after-write conveniences
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use docstore::prelude::*;
//!
//! document_entity!(Device, "devices", {
//!     name: String,
//!     reading: f64,
//! });
//!
//! let db = StoreConfig::from_yaml(config_yaml)?.connect().await?;
//! let trail = Arc::new(AuditTrail::with_actor("svc-assets"));
//! let repository = Arc::new(MongoRepository::<Device>::new(&db, trail));
//! let sink = Arc::new(MongoAuditSink::new(&db, "audit_trail"));
//! let devices = EntityService::new(repository, sink);
//!
//! let device = devices.add_and_return(Device::new("pump-4".into(), 7.5)).await?;
//! let page = devices.get_all_paged(1, 20).await?;
//! ```

pub mod config;
pub mod core;
pub mod entities;
pub mod storage;

/// Re-exports of commonly used types and traits
pub mod prelude {
    // === Core ===
    pub use crate::core::{
        audit::{AuditAction, AuditChangeDelta, AuditEntry, AuditSink, AuditTrail, MemoryAuditSink},
        entity::Entity,
        error::{Error, QueryError, Result},
        odata::{ODataQuery, ODataQueryOptions},
        query::{
            FieldSpec, FilterExpr, FilterValue, Page, PagedResponse, Query, QueryInspector,
            RelationSpec, ResolvedQuery, SortDirection, SortSpec,
        },
        repository::{
            BatchItemError, BatchOutcome, BeforeSaveHook, GenericRepository, PreQueryTransform,
            SearchableRepository, WritableRepository,
        },
        service::{EntityService, ODataPage},
        uow::UnitOfWork,
    };

    // === Macros ===
    pub use crate::document_entity;

    // === Storage ===
    pub use crate::storage::{InMemoryRepository, MongoAuditSink, MongoRepository};

    // === Config ===
    pub use crate::config::{PagingConfig, StoreConfig};

    // === External dependencies ===
    pub use async_trait::async_trait;
    pub use chrono::{DateTime, Utc};
    pub use serde::{Deserialize, Serialize};
}

//! Core abstractions: entity model, query descriptors, audit trail, unit of
//! work, repository traits and the entity service

pub mod audit;
pub mod entity;
pub mod error;
pub mod odata;
pub mod query;
pub mod repository;
pub mod service;
pub mod uow;

pub use audit::{AuditAction, AuditChangeDelta, AuditEntry, AuditSink, AuditTrail};
pub use entity::Entity;
pub use error::{Error, QueryError, Result};
pub use query::{
    FieldSpec, FilterExpr, FilterValue, Page, PagedResponse, Query, QueryInspector, RelationSpec,
    ResolvedQuery, SortDirection, SortSpec,
};
pub use repository::{
    BatchItemError, BatchOutcome, BeforeSaveHook, GenericRepository, PreQueryTransform,
    SearchableRepository, WritableRepository,
};
pub use service::{EntityService, ODataPage};
pub use uow::UnitOfWork;

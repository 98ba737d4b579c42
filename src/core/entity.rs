//! Entity trait defining the persistence surface shared by every document type
//!
//! All persisted entities carry:
//! - id: opaque string key (ObjectId hex), assigned by the repository on the
//!   first insert and never reassigned afterwards
//! - deleted: soft-delete marker; soft-deleted documents are excluded from
//!   every default read
//! - created_at / updated_at: audit timestamps stamped before persist
//! - created_by / updated_by: optional actor references
//!
//! Concrete entity types usually come from the [`document_entity!`] macro,
//! which generates the struct, this trait impl, and a constructor.
//!
//! [`document_entity!`]: crate::document_entity

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Base trait for all entities persisted through a repository.
///
/// The `Serialize`/`DeserializeOwned` bounds are load-bearing: entities cross
/// into store documents through a JSON intermediate, and audit diffing
/// compares JSON snapshots of two entity states.
pub trait Entity: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// The store collection this entity type lives in.
    fn collection_name() -> &'static str;

    /// The assigned identifier, or `None` before the first persist.
    fn id(&self) -> Option<&str>;

    /// Assign the identifier. Called once by the repository on insert; also
    /// used by `add_or_update` to adopt the id of an existing match.
    fn set_id(&mut self, id: String);

    /// Soft-delete marker.
    fn deleted(&self) -> bool;

    /// Flip the soft-delete marker. The repository persists the flip through
    /// the ordinary update path.
    fn set_deleted(&mut self, deleted: bool);

    fn created_at(&self) -> DateTime<Utc>;

    fn set_created_at(&mut self, at: DateTime<Utc>);

    fn updated_at(&self) -> DateTime<Utc>;

    fn set_updated_at(&mut self, at: DateTime<Utc>);

    /// Record the creating actor. Default is a no-op for entity types that
    /// do not track actors.
    fn set_created_by(&mut self, _actor: Option<String>) {}

    /// Record the updating actor. Default is a no-op.
    fn set_updated_by(&mut self, _actor: Option<String>) {}

    /// Whether the entity is visible to default reads.
    fn is_active(&self) -> bool {
        !self.deleted()
    }
}

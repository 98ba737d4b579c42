//! Audit trail: change deltas, the pending-entry queue and flush sinks
//!
//! The repository queues one [`AuditEntry`] per mutation, with the change
//! deltas computed by diffing JSON snapshots of the entity before and after.
//! Entries stay pending until the surrounding unit of work commits, at which
//! point they are drained into an [`AuditSink`] — exactly once, never before.

use std::sync::{Mutex, PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::entity::Entity;
use crate::core::error::Result;

/// What kind of mutation an audit entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditAction {
    Create,
    Update,
    Delete,
}

/// One changed field: name, value before, value after.
///
/// Values are stringified; `None` means the value was absent or null on that
/// side of the change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditChangeDelta {
    pub field_name: String,
    pub value_before: Option<String>,
    pub value_after: Option<String>,
}

/// A pending (or flushed) audit record for one mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub action: AuditAction,
    pub collection: String,
    pub entity_id: Option<String>,
    pub actor: Option<String>,
    pub changes: Vec<AuditChangeDelta>,
    pub recorded_at: DateTime<Utc>,
}

/// Audit bookkeeping fields, excluded from diffing: stamping them on every
/// write would otherwise turn each mutation into a delta about itself.
const STAMP_FIELDS: &[&str] = &["created_at", "updated_at", "created_by", "updated_by"];

/// Diff two entity snapshots of the same type into per-field change deltas.
///
/// Compares top-level fields of the JSON forms. A missing side (`None`)
/// counts every field of the other side as changed, which is how Create
/// entries get their full field list.
pub fn diff(before: Option<&Value>, after: Option<&Value>) -> Vec<AuditChangeDelta> {
    let empty = serde_json::Map::new();
    let before_fields = before.and_then(Value::as_object).unwrap_or(&empty);
    let after_fields = after.and_then(Value::as_object).unwrap_or(&empty);

    let mut deltas = Vec::new();
    for (name, before_value) in before_fields {
        if STAMP_FIELDS.contains(&name.as_str()) {
            continue;
        }
        let after_value = after_fields.get(name);
        if after_value != Some(before_value) {
            deltas.push(AuditChangeDelta {
                field_name: name.clone(),
                value_before: render(Some(before_value)),
                value_after: render(after_value),
            });
        }
    }
    for (name, after_value) in after_fields {
        if STAMP_FIELDS.contains(&name.as_str()) || before_fields.contains_key(name) {
            continue;
        }
        deltas.push(AuditChangeDelta {
            field_name: name.clone(),
            value_before: None,
            value_after: render(Some(after_value)),
        });
    }
    deltas
}

fn render(value: Option<&Value>) -> Option<String> {
    match value {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(other) => Some(other.to_string()),
    }
}

/// Accumulates pending audit entries for one logical request scope.
///
/// Repositories stamp entities and queue entries here; the unit of work
/// drains the queue into a sink on commit. Internally locked, so a trail can
/// be shared between a repository and its service handle.
#[derive(Debug, Default)]
pub struct AuditTrail {
    actor: Option<String>,
    pending: Mutex<Vec<AuditEntry>>,
}

impl AuditTrail {
    pub fn new() -> Self {
        Self::default()
    }

    /// A trail that attributes every entry (and actor stamp) to `actor`.
    pub fn with_actor(actor: impl Into<String>) -> Self {
        Self {
            actor: Some(actor.into()),
            pending: Mutex::new(Vec::new()),
        }
    }

    pub fn actor(&self) -> Option<&str> {
        self.actor.as_deref()
    }

    /// Stamp the entity's audit fields for the given action: Create sets the
    /// full creation stamp, everything else touches only the update side.
    pub fn stamp<T: Entity>(&self, entity: &mut T, action: AuditAction) {
        let now = Utc::now();
        if action == AuditAction::Create {
            entity.set_created_at(now);
            entity.set_created_by(self.actor.clone());
        }
        entity.set_updated_at(now);
        entity.set_updated_by(self.actor.clone());
    }

    /// Diff the snapshots and queue an entry. Pending until the unit of work
    /// commits.
    pub fn queue(
        &self,
        action: AuditAction,
        collection: &str,
        entity_id: Option<String>,
        before: Option<&Value>,
        after: Option<&Value>,
    ) {
        let entry = AuditEntry {
            action,
            collection: collection.to_string(),
            entity_id,
            actor: self.actor.clone(),
            changes: diff(before, after),
            recorded_at: Utc::now(),
        };
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);
    }

    /// Take every pending entry, leaving the queue empty.
    pub fn drain(&self) -> Vec<AuditEntry> {
        std::mem::take(
            &mut *self
                .pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        )
    }

    /// Number of entries waiting for a commit.
    pub fn pending_len(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Where drained audit entries land on commit.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn write(&self, entries: Vec<AuditEntry>) -> Result<()>;
}

/// In-memory sink for tests and development.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    written: RwLock<Vec<AuditEntry>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything flushed so far.
    pub fn written(&self) -> Vec<AuditEntry> {
        self.written
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn write(&self, entries: Vec<AuditEntry>) -> Result<()> {
        self.written
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(entries);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn diff_reports_changed_field_once() {
        let before = json!({"name": "A", "kind": "pump"});
        let after = json!({"name": "B", "kind": "pump"});

        let deltas = diff(Some(&before), Some(&after));
        assert_eq!(
            deltas,
            vec![AuditChangeDelta {
                field_name: "name".to_string(),
                value_before: Some("A".to_string()),
                value_after: Some("B".to_string()),
            }]
        );
    }

    #[test]
    fn diff_ignores_stamp_fields() {
        let before = json!({"name": "A", "updated_at": "2024-01-01T00:00:00Z"});
        let after = json!({"name": "A", "updated_at": "2024-06-01T00:00:00Z"});
        assert!(diff(Some(&before), Some(&after)).is_empty());
    }

    #[test]
    fn diff_against_nothing_lists_all_fields() {
        let after = json!({"name": "A", "reading": 7});
        let deltas = diff(None, Some(&after));

        assert_eq!(deltas.len(), 2);
        assert!(deltas.iter().all(|d| d.value_before.is_none()));
    }

    #[test]
    fn diff_stringifies_non_string_values() {
        let before = json!({"reading": 7});
        let after = json!({"reading": 9.5});
        let deltas = diff(Some(&before), Some(&after));

        assert_eq!(deltas[0].value_before.as_deref(), Some("7"));
        assert_eq!(deltas[0].value_after.as_deref(), Some("9.5"));
    }

    #[test]
    fn diff_null_renders_as_none() {
        let before = json!({"owner": null});
        let after = json!({"owner": "ops"});
        let deltas = diff(Some(&before), Some(&after));

        assert_eq!(deltas[0].value_before, None);
        assert_eq!(deltas[0].value_after.as_deref(), Some("ops"));
    }

    #[test]
    fn queue_and_drain() {
        let trail = AuditTrail::with_actor("tester");
        trail.queue(
            AuditAction::Create,
            "devices",
            Some("abc".to_string()),
            None,
            Some(&json!({"name": "x"})),
        );
        assert_eq!(trail.pending_len(), 1);

        let entries = trail.drain();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].actor.as_deref(), Some("tester"));
        assert_eq!(entries[0].collection, "devices");
        assert_eq!(trail.pending_len(), 0);
    }

    #[tokio::test]
    async fn memory_sink_accumulates() {
        let sink = MemoryAuditSink::new();
        let trail = AuditTrail::new();
        trail.queue(AuditAction::Delete, "devices", None, None, None);

        sink.write(trail.drain()).await.unwrap();
        assert_eq!(sink.written().len(), 1);
    }
}

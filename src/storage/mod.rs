//! Storage backends implementing the repository traits

pub mod in_memory;
pub mod mongodb;

pub use in_memory::InMemoryRepository;
pub use mongodb::{MongoAuditSink, MongoRepository};

use std::cmp::Ordering;

use serde_json::Value;

use crate::core::query::{SortDirection, SortSpec};

/// Stable in-place sort of (snapshot, entity) pairs by a list of sort specs,
/// applied in the order given. Shared by the in-memory backend and the
/// MongoDB backend's late-sort path.
pub(crate) fn sort_snapshots<T>(pairs: &mut [(Value, T)], specs: &[SortSpec]) {
    pairs.sort_by(|(a, _), (b, _)| {
        for spec in specs {
            let ordering = compare_json(lookup(a, &spec.field), lookup(b, &spec.field));
            let ordering = match spec.direction {
                SortDirection::Asc => ordering,
                SortDirection::Desc => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}

fn lookup<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = doc;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

/// Deterministic ordering over JSON values: null/missing, then booleans,
/// then numbers, then strings, then everything else by rendering.
fn compare_json(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    fn rank(value: Option<&Value>) -> u8 {
        match value {
            None | Some(Value::Null) => 0,
            Some(Value::Bool(_)) => 1,
            Some(Value::Number(_)) => 2,
            Some(Value::String(_)) => 3,
            _ => 4,
        }
    }

    match (a, b) {
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (x, y) if rank(x) != rank(y) => rank(x).cmp(&rank(y)),
        (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
        _ => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sorts_by_spec_order_with_stable_ties() {
        let mut pairs: Vec<(Value, u32)> = vec![
            (json!({"kind": "b", "n": 2}), 0),
            (json!({"kind": "a", "n": 2}), 1),
            (json!({"kind": "a", "n": 1}), 2),
        ];
        sort_snapshots(
            &mut pairs,
            &[SortSpec::asc("kind"), SortSpec::desc("n")],
        );
        let order: Vec<u32> = pairs.iter().map(|(_, i)| *i).collect();
        assert_eq!(order, vec![1, 2, 0]);
    }

    #[test]
    fn missing_fields_sort_first_ascending() {
        let mut pairs: Vec<(Value, u32)> = vec![
            (json!({"n": 1}), 0),
            (json!({}), 1),
        ];
        sort_snapshots(&mut pairs, &[SortSpec::asc("n")]);
        let order: Vec<u32> = pairs.iter().map(|(_, i)| *i).collect();
        assert_eq!(order, vec![1, 0]);
    }
}

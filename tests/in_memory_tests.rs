//! Repository contract tests against the in-memory backend.
//!
//! Covers the query pipeline (soft-delete exclusion, filtering, paging,
//! sorting), the mutation surface (add/update/delete/permanent delete,
//! batches, field patches) and the OData read path.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Result;
use docstore::prelude::*;

document_entity!(Device, "devices", {
    name: String,
    kind: String,
    reading: f64,
});

fn device(name: &str, kind: &str, reading: f64) -> Device {
    Device::new(name.to_string(), kind.to_string(), reading)
}

fn repository() -> InMemoryRepository<Device> {
    InMemoryRepository::new(Arc::new(AuditTrail::new()))
}

async fn seed(repository: &InMemoryRepository<Device>, count: usize) -> Result<Vec<Device>> {
    let mut out = Vec::with_capacity(count);
    for i in 0..count {
        let mut entity = device(&format!("device-{i:03}"), "pump", i as f64);
        repository.add(&mut entity).await?;
        out.push(entity);
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// CRUD + soft delete
// ---------------------------------------------------------------------------

#[tokio::test]
async fn add_assigns_id_and_find_by_id_returns_it() -> Result<()> {
    let repository = repository();
    let mut entity = device("pump-4", "pump", 7.5);

    repository.add(&mut entity).await?;
    let id = entity.id.clone().expect("id assigned on insert");

    let found = repository.find_by_id(&id).await?.expect("inserted entity");
    assert_eq!(found.id.as_deref(), Some(id.as_str()));
    assert!(!found.deleted);
    assert_eq!(found.name, "pump-4");
    Ok(())
}

#[tokio::test]
async fn update_replaces_the_document() -> Result<()> {
    let repository = repository();
    let mut entity = device("pump-4", "pump", 7.5);
    repository.add(&mut entity).await?;

    entity.reading = 9.0;
    repository.update(&mut entity).await?;

    let found = repository
        .find_by_id(entity.id.as_deref().unwrap())
        .await?
        .unwrap();
    assert_eq!(found.reading, 9.0);
    Ok(())
}

#[tokio::test]
async fn soft_delete_hides_from_default_reads() -> Result<()> {
    let repository = repository();
    let mut entity = device("pump-4", "pump", 7.5);
    repository.add(&mut entity).await?;
    let id = entity.id.clone().unwrap();

    repository.delete(&mut entity).await?;

    assert!(repository.find_by_id(&id).await?.is_none());
    assert!(repository.get_all(&[]).await?.is_empty());
    assert_eq!(repository.count(None).await?, 0);

    // explicit opt-in still sees the document, with the marker set
    let query = Query::filtered(FilterExpr::eq("id", id.as_str())).include_deleted(true);
    let found = repository.find_one(&query).await?.expect("soft-deleted row");
    assert!(found.deleted);
    Ok(())
}

#[tokio::test]
async fn soft_deleted_entity_can_be_reactivated() -> Result<()> {
    let repository = repository();
    let mut entity = device("pump-4", "pump", 7.5);
    repository.add(&mut entity).await?;
    let id = entity.id.clone().unwrap();

    repository.delete(&mut entity).await?;
    entity.deleted = false;
    repository.update(&mut entity).await?;

    assert!(repository.find_by_id(&id).await?.is_some());
    Ok(())
}

#[tokio::test]
async fn delete_by_id_of_missing_document_is_not_found() {
    let repository = repository();
    let err = repository
        .delete_by_id(&"0".repeat(24))
        .await
        .expect_err("missing document");
    assert!(matches!(err, Error::NotFound { .. }));
}

#[tokio::test]
async fn delete_permanently_removes_even_from_inclusive_reads() -> Result<()> {
    let repository = repository();
    let mut entity = device("pump-4", "pump", 7.5);
    repository.add(&mut entity).await?;

    repository.delete_permanently(&entity).await?;

    let query = Query::new().include_deleted(true);
    assert!(repository.find(&query).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn delete_permanently_batch_dedupes_ids() -> Result<()> {
    let repository = repository();
    let entities = seed(&repository, 5).await?;

    let mut doomed = entities[..3].to_vec();
    doomed.push(entities[0].clone()); // duplicate id

    repository.delete_permanently_batch_no_audit(&doomed).await?;
    assert_eq!(repository.count(None).await?, 2);
    Ok(())
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

#[tokio::test]
async fn pagination_windows() -> Result<()> {
    let repository = repository();
    seed(&repository, 55).await?;

    assert_eq!(repository.get_all_paged(1, 20, &[]).await?.len(), 20);
    assert_eq!(repository.get_all_paged(3, 20, &[]).await?.len(), 15);
    assert_eq!(repository.get_all_paged(4, 20, &[]).await?.len(), 0);
    Ok(())
}

#[tokio::test]
async fn pagination_windows_do_not_overlap() -> Result<()> {
    let repository = repository();
    seed(&repository, 55).await?;

    let page1 = repository.get_all_paged(1, 20, &[]).await?;
    let page2 = repository.get_all_paged(2, 20, &[]).await?;

    let ids1: Vec<_> = page1.iter().map(|e| e.id.clone()).collect();
    assert!(page2.iter().all(|e| !ids1.contains(&e.id)));
    Ok(())
}

#[tokio::test]
async fn filtered_and_sorted_find() -> Result<()> {
    let repository = repository();
    let mut a = device("a", "pump", 3.0);
    let mut b = device("b", "valve", 9.0);
    let mut c = device("c", "pump", 6.0);
    for entity in [&mut a, &mut b, &mut c] {
        repository.add(entity).await?;
    }

    let query = Query::filtered(FilterExpr::eq("kind", "pump"))
        .order_by(SortSpec::desc("reading"));
    let found = repository.find(&query).await?;

    let names: Vec<_> = found.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["c", "a"]);
    Ok(())
}

#[tokio::test]
async fn find_paged_sorts_the_window_late() -> Result<()> {
    let repository = repository();
    seed(&repository, 10).await?;

    // window is cut in natural order first, then sorted
    let found = repository
        .find_paged(
            FilterExpr::gt("reading", -1.0),
            2,
            3,
            &[SortSpec::desc("reading")],
        )
        .await?;

    let readings: Vec<f64> = found.iter().map(|e| e.reading).collect();
    assert_eq!(readings, vec![5.0, 4.0, 3.0]);
    Ok(())
}

#[tokio::test]
async fn find_by_ids_skips_missing_and_deleted() -> Result<()> {
    let repository = repository();
    let entities = seed(&repository, 3).await?;

    let mut deleted = entities[2].clone();
    repository.delete(&mut deleted).await?;

    let ids = vec![
        entities[0].id.clone().unwrap(),
        entities[2].id.clone().unwrap(),
        "0".repeat(24),
    ];
    let found = repository.find_by_ids(&ids).await?;
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, entities[0].id);
    Ok(())
}

#[tokio::test]
async fn count_applies_filter_after_deleted_exclusion() -> Result<()> {
    let repository = repository();
    let entities = seed(&repository, 4).await?;
    let mut gone = entities[0].clone();
    repository.delete(&mut gone).await?;

    let total = repository.count(None).await?;
    assert_eq!(total, 3);

    let filtered = repository
        .count(Some(&FilterExpr::gt("reading", 1.0)))
        .await?;
    assert_eq!(filtered, 2);
    Ok(())
}

#[tokio::test]
async fn query_inspector_sees_the_resolved_plan() -> Result<()> {
    let repository = repository();
    seed(&repository, 5).await?;

    let observed = Arc::new(AtomicUsize::new(0));
    let captured = observed.clone();
    let query = Query::new()
        .paged(Page::of(2, 2))
        .inspect(Arc::new(move |plan: &ResolvedQuery| {
            captured.store(plan.skip as usize, Ordering::SeqCst);
        }));

    repository.find(&query).await?;
    assert_eq!(observed.load(Ordering::SeqCst), 2);
    Ok(())
}

#[tokio::test]
async fn pre_query_transform_injects_a_default_filter() -> Result<()> {
    let repository = InMemoryRepository::<Device>::new(Arc::new(AuditTrail::new()))
        .with_pre_query(Arc::new(|filter: Option<FilterExpr>| {
            let kinds_only = FilterExpr::eq("kind", "pump");
            Some(match filter {
                Some(f) => f.and(kinds_only),
                None => kinds_only,
            })
        }));

    let mut pump = device("a", "pump", 1.0);
    let mut valve = device("b", "valve", 2.0);
    repository.add(&mut pump).await?;
    repository.add(&mut valve).await?;

    let all = repository.get_all(&[]).await?;
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].kind, "pump");
    Ok(())
}

#[tokio::test]
async fn before_save_hook_runs_on_every_persist() -> Result<()> {
    let repository = InMemoryRepository::<Device>::new(Arc::new(AuditTrail::new()))
        .with_before_save(Arc::new(|entity: &mut Device| {
            entity.name = entity.name.to_uppercase();
        }));

    let mut entity = device("pump-4", "pump", 7.5);
    repository.add(&mut entity).await?;

    let found = repository
        .find_by_id(entity.id.as_deref().unwrap())
        .await?
        .unwrap();
    assert_eq!(found.name, "PUMP-4");
    Ok(())
}

// ---------------------------------------------------------------------------
// Batches and field patches
// ---------------------------------------------------------------------------

#[tokio::test]
async fn add_batch_persists_everything() -> Result<()> {
    let repository = repository();
    let mut entities: Vec<Device> = (0..40)
        .map(|i| device(&format!("d{i}"), "pump", i as f64))
        .collect();

    let outcome = repository.add_batch(&mut entities).await?;
    assert!(outcome.is_complete());
    assert_eq!(outcome.attempted, 40);
    assert!(entities.iter().all(|e| e.id.is_some()));
    assert_eq!(repository.count(None).await?, 40);
    Ok(())
}

#[tokio::test]
async fn add_batch_partial_failure_commits_the_rest() -> Result<()> {
    let repository = repository();
    let mut first = device("existing", "pump", 1.0);
    repository.add(&mut first).await?;

    let mut duplicate = device("dup", "pump", 2.0);
    duplicate.id = first.id.clone();
    let mut batch = vec![device("ok-1", "pump", 3.0), duplicate, device("ok-2", "pump", 4.0)];

    let outcome = repository.add_batch(&mut batch).await?;
    assert_eq!(outcome.attempted, 3);
    assert_eq!(outcome.succeeded(), 2);
    assert_eq!(outcome.failures.len(), 1);
    assert_eq!(outcome.failures[0].index, 1);

    // the remainder of the batch still committed
    assert_eq!(repository.count(None).await?, 3);
    Ok(())
}

#[tokio::test]
async fn update_batch_replaces_documents() -> Result<()> {
    let repository = repository();
    let mut entities = seed(&repository, 3).await?;

    for entity in entities.iter_mut() {
        entity.kind = "valve".to_string();
    }
    let outcome = repository.update_batch(&mut entities).await?;
    assert!(outcome.is_complete());

    let all = repository.get_all(&[]).await?;
    assert!(all.iter().all(|e| e.kind == "valve"));
    Ok(())
}

#[tokio::test]
async fn update_fields_patches_only_named_fields() -> Result<()> {
    let repository = repository();
    let mut entity = device("pump-4", "pump", 7.5);
    repository.add(&mut entity).await?;

    let mut patch = entity.clone();
    patch.reading = 42.0;
    patch.name = "should-not-change".to_string();

    repository
        .update_fields(
            &patch,
            &[FieldSpec::new("reading", |e: &Device| {
                serde_json::json!(e.reading)
            })],
        )
        .await?;

    let found = repository
        .find_by_id(entity.id.as_deref().unwrap())
        .await?
        .unwrap();
    assert_eq!(found.reading, 42.0);
    assert_eq!(found.name, "pump-4");
    Ok(())
}

#[tokio::test]
async fn update_fields_requires_a_field_list() {
    let repository = repository();
    let entity = device("pump-4", "pump", 7.5);
    let err = repository
        .update_fields(&entity, &[])
        .await
        .expect_err("empty field list");
    assert!(matches!(err, Error::Validation(_)));
}

// ---------------------------------------------------------------------------
// OData reads
// ---------------------------------------------------------------------------

#[tokio::test]
async fn odata_filter_orders_and_pages() -> Result<()> {
    let repository = repository();
    seed(&repository, 30).await?;

    let options = ODataQueryOptions {
        filters: vec!["reading ge 10".to_string()],
        order_by: Some("reading desc".to_string()),
        top: Some("5".to_string()),
        skip: Some("2".to_string()),
        ..Default::default()
    };

    let found = repository.get_all_from_odata(&options).await?;
    let readings: Vec<f64> = found.iter().map(|e| e.reading).collect();
    assert_eq!(readings, vec![27.0, 26.0, 25.0, 24.0, 23.0]);
    Ok(())
}

#[tokio::test]
async fn odata_excludes_soft_deleted() -> Result<()> {
    let repository = repository();
    let entities = seed(&repository, 3).await?;
    let mut gone = entities[0].clone();
    repository.delete(&mut gone).await?;

    let found = repository
        .get_all_from_odata(&ODataQueryOptions::default())
        .await?;
    assert_eq!(found.len(), 2);
    Ok(())
}

#[tokio::test]
async fn odata_node_ceiling_rejects_before_running() {
    let repository = repository();
    let clauses: Vec<String> = (0..300).map(|i| format!("reading eq {i}")).collect();
    let options = ODataQueryOptions {
        filters: vec![clauses.join(" or ")],
        ..Default::default()
    };

    let err = repository
        .get_all_from_odata(&options)
        .await
        .expect_err("over the node ceiling");
    assert!(matches!(
        err,
        Error::Query(QueryError::NodeCountExceeded { max: 1000 })
    ));
}

#[tokio::test]
async fn odata_count_ignores_nothing_it_is_given() -> Result<()> {
    let repository = repository();
    seed(&repository, 30).await?;

    // direct repository count applies the window it is given
    let options = ODataQueryOptions {
        top: Some("10".to_string()),
        ..Default::default()
    };
    assert_eq!(repository.count_odata(&options).await?, 10);

    // and rejects a window over the counting ceiling
    let options = ODataQueryOptions {
        top: Some("60".to_string()),
        ..Default::default()
    };
    let err = repository.count_odata(&options).await.expect_err("over top ceiling");
    assert!(matches!(
        err,
        Error::Query(QueryError::TopExceeded { got: 60, max: 50 })
    ));
    Ok(())
}

// ---------------------------------------------------------------------------
// Identifier guard
// ---------------------------------------------------------------------------

#[tokio::test]
async fn is_valid_object_id_checks_every_id() {
    let repository = repository();

    let valid = vec![
        "507f1f77bcf86cd799439011".to_string(),
        "507f191e810c19729de860ea".to_string(),
    ];
    assert!(repository.is_valid_object_id(&valid));

    let mixed = vec!["507f1f77bcf86cd799439011".to_string(), "nope".to_string()];
    assert!(!repository.is_valid_object_id(&mixed));

    assert!(repository.is_valid_object_id(&[]));
}

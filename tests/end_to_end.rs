//! End-to-end behaviour over the in-memory backends.
//!
//! Runs the full path (unit of work, background propagation, index,
//! rank-preserving hydration) without Docker.
//!
//! Run with: `cargo test --test end_to_end`

use std::sync::Arc;
use serde_json::json;

use search_sync::{
    Entity, EntityId, InMemoryIndex, InMemoryStore, IndexOp, IndexRegistry, IndexableType, Page,
    PageRequest, SearchSource, SearchSync, SearchSyncConfig,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("search_sync=debug")
        .with_test_writer()
        .try_init();
}

fn registry() -> IndexRegistry {
    let mut registry = IndexRegistry::new();
    registry
        .register(IndexableType::new("item").text_sortable("title").text("description"))
        .unwrap();
    registry.register(IndexableType::new("group").text("name")).unwrap();
    registry
}

fn item(id: EntityId, title: &str) -> Entity {
    Entity::new("item", id, json!({"title": title, "description": "", "stock": 1}))
}

async fn engine(store: Arc<InMemoryStore>, index: Arc<InMemoryIndex>) -> SearchSync {
    init_tracing();
    let mut engine = SearchSync::with_backends(SearchSyncConfig::default(), registry(), store, Some(index));
    engine.start().await.unwrap();
    engine
}

fn ids(entities: &[Entity]) -> Vec<EntityId> {
    entities.iter().map(|e| e.id).collect()
}

#[tokio::test]
async fn committed_entity_becomes_searchable() {
    let index = Arc::new(InMemoryIndex::new());
    let engine = engine(Arc::new(InMemoryStore::new()), index.clone()).await;

    let mut uow = engine.begin();
    uow.insert(item(1, "walnut desk"));
    uow.insert(item(2, "oak shelf"));
    let outcome = uow.commit().await.unwrap();
    // Background mode hands off and returns
    assert!(outcome.propagation.is_none());

    engine.flush().await;
    let response = engine.search("item", "walnut", PageRequest::default()).await.unwrap();

    assert_eq!(response.source, SearchSource::Index);
    assert_eq!(ids(&response.results.items), vec![1]);
    assert_eq!(response.results.meta.total_items, 1);
    engine.shutdown().await;
}

#[tokio::test]
async fn index_entries_are_keyed_by_primary_key() {
    let index = Arc::new(InMemoryIndex::new());
    let engine = engine(Arc::new(InMemoryStore::new()), index.clone()).await;

    // A row carrying its own legacy id column still indexes under its key
    let mut uow = engine.begin();
    uow.insert(Entity::new("item", 1, json!({"title": "oak bench", "id": 900, "sku": 900})));
    uow.commit().await.unwrap();
    engine.flush().await;
    engine.reindex("item").await.unwrap();

    assert_eq!(index.ids("item"), vec![1]);
    let response = engine.search("item", "oak", PageRequest::default()).await.unwrap();
    assert_eq!(ids(&response.results.items), vec![1]);
    assert_eq!(response.results.meta.total_items, 1);
    engine.shutdown().await;
}

#[tokio::test]
async fn create_and_delete_in_one_unit_never_touches_index() {
    let index = Arc::new(InMemoryIndex::new());
    let engine = engine(Arc::new(InMemoryStore::new()), index.clone()).await;

    let mut uow = engine.begin();
    let draft = item(1, "draft");
    uow.insert(draft.clone());
    uow.delete(draft.key());
    uow.commit().await.unwrap();
    engine.flush().await;

    assert!(index.journal().is_empty());
    engine.shutdown().await;
}

#[tokio::test]
async fn repeated_modification_sends_one_upsert_with_final_values() {
    let index = Arc::new(InMemoryIndex::new());
    let store = Arc::new(InMemoryStore::with_rows(vec![item(4, "first")]));
    let engine = engine(store, index.clone()).await;

    let mut uow = engine.begin();
    uow.update(item(4, "second"));
    uow.update(item(4, "third"));
    uow.update(item(4, "final"));
    uow.commit().await.unwrap();
    engine.flush().await;

    let journal = index.journal();
    assert_eq!(journal.len(), 1);
    match &journal[0] {
        IndexOp::Upsert { id, fields, .. } => {
            assert_eq!(*id, 4);
            assert_eq!(fields["title"], json!("final"));
            assert!(!fields.contains_key("stock"));
        }
        other => panic!("expected upsert, got {:?}", other),
    }
    engine.shutdown().await;
}

#[tokio::test]
async fn results_keep_relevance_order() {
    let index = Arc::new(InMemoryIndex::new());
    let engine = engine(Arc::new(InMemoryStore::new()), index.clone()).await;

    let mut uow = engine.begin();
    uow.insert(item(3, "lamp lamp"));
    uow.insert(item(7, "lamp lamp lamp"));
    uow.insert(item(9, "lamp"));
    uow.commit().await.unwrap();
    engine.flush().await;

    let response = engine.search("item", "lamp", PageRequest::default()).await.unwrap();

    assert_eq!(ids(&response.results.items), vec![7, 3, 9]);
    engine.shutdown().await;
}

#[tokio::test]
async fn zero_hits_skip_the_store() {
    let store = Arc::new(InMemoryStore::with_rows(vec![item(1, "chair")]));
    let index = Arc::new(InMemoryIndex::new());
    let engine = engine(store.clone(), index).await;
    engine.reindex("item").await.unwrap();

    let response = engine.search("item", "sofa", PageRequest::default()).await.unwrap();

    assert!(response.results.items.is_empty());
    assert_eq!(response.results.meta.total_items, 0);
    assert_eq!(store.batch_lookups(), 0);
    engine.shutdown().await;
}

#[tokio::test]
async fn stale_index_entries_are_dropped() {
    let store = Arc::new(InMemoryStore::with_rows(vec![item(3, "lamp"), item(9, "lamp")]));
    let index = Arc::new(InMemoryIndex::new());
    let engine = engine(store, index.clone()).await;
    engine.reindex("item").await.unwrap();
    // Row 5 never existed in the store
    search_sync::IndexGateway::upsert(
        index.as_ref(),
        "item",
        5,
        &serde_json::Map::from_iter([("title".to_string(), json!("lamp"))]),
    )
    .await
    .unwrap();

    let response = engine.search("item", "lamp", PageRequest::default()).await.unwrap();

    assert_eq!(ids(&response.results.items), vec![3, 9]);
    // Total still reflects what the index reported
    assert_eq!(response.results.meta.total_items, 3);
    engine.shutdown().await;
}

#[tokio::test]
async fn listing_and_search_share_page_math() {
    let rows: Vec<Entity> = (1..=47).map(|id| item(id, "lamp")).collect();
    let index = Arc::new(InMemoryIndex::new());
    let engine = engine(Arc::new(InMemoryStore::with_rows(rows)), index).await;
    engine.reindex("item").await.unwrap();
    let request = PageRequest::new(3, 10);

    let listing = engine.list("item", request).await.unwrap();
    let search = engine.search("item", "lamp", request).await.unwrap();

    let expected = Page::new(47, 10, 3);
    assert_eq!(listing.meta, expected);
    assert_eq!(search.results.meta, expected);
    assert_eq!(expected.total_pages, 5);
    assert!(expected.has_next() && expected.has_prev());
    assert_eq!(listing.items.len(), 10);
    assert_eq!(search.results.items.len(), 10);
    engine.shutdown().await;
}

#[tokio::test]
async fn outage_then_reindex_recovers() {
    let store = Arc::new(InMemoryStore::new());
    let index = Arc::new(InMemoryIndex::new());
    let engine = engine(store.clone(), index.clone()).await;
    index.set_available(false);

    let mut uow = engine.begin();
    uow.insert(item(1, "velvet sofa"));
    uow.insert(item(2, "velvet chair"));
    uow.commit().await.unwrap();
    engine.flush().await;

    // The store is authoritative even though propagation failed
    assert_eq!(store.len(), 2);
    let degraded = engine.search("item", "velvet", PageRequest::default()).await.unwrap();
    assert_eq!(degraded.source, SearchSource::Unavailable);
    assert!(degraded.results.items.is_empty());

    index.set_available(true);
    let missed = engine.search("item", "velvet", PageRequest::default()).await.unwrap();
    assert!(missed.results.items.is_empty());

    let report = engine.reindex("item").await.unwrap();
    assert_eq!(report.indexed, 2);
    let recovered = engine.search("item", "velvet", PageRequest::default()).await.unwrap();
    assert_eq!(ids(&recovered.results.items), vec![1, 2]);
    engine.shutdown().await;
}

#[tokio::test]
async fn reindex_twice_equals_once() {
    let rows: Vec<Entity> = (1..=12).map(|id| item(id, "stool")).collect();
    let index = Arc::new(InMemoryIndex::new());
    let engine = engine(Arc::new(InMemoryStore::with_rows(rows)), index.clone()).await;

    engine.reindex_all().await.unwrap();
    let once: Vec<_> = index.ids("item").into_iter().map(|id| index.document("item", id)).collect();
    engine.reindex_all().await.unwrap();
    let twice: Vec<_> = index.ids("item").into_iter().map(|id| index.document("item", id)).collect();

    assert_eq!(once, twice);
    assert_eq!(index.len(), 12);
    engine.shutdown().await;
}

#[tokio::test]
async fn commits_reach_the_index_in_order() {
    let index = Arc::new(InMemoryIndex::new());
    let engine = Arc::new(engine(Arc::new(InMemoryStore::new()), index.clone()).await);

    let mut uow = engine.begin();
    uow.insert(item(1, "v0"));
    uow.commit().await.unwrap();
    for n in 1..=20 {
        let mut uow = engine.begin();
        uow.update(item(1, &format!("v{}", n)));
        uow.commit().await.unwrap();
    }
    engine.flush().await;

    assert_eq!(index.document("item", 1).unwrap()["title"], json!("v20"));
    assert_eq!(index.journal().len(), 21);
    engine.shutdown().await;
}

#[tokio::test]
async fn search_without_index_is_disabled_not_unavailable() {
    init_tracing();
    let mut engine = SearchSync::with_backends(
        SearchSyncConfig::default(),
        registry(),
        Arc::new(InMemoryStore::new()),
        None,
    );
    engine.start().await.unwrap();

    let mut uow = engine.begin();
    uow.insert(item(1, "lamp"));
    uow.commit().await.unwrap();
    let response = engine.search("item", "lamp", PageRequest::default()).await.unwrap();

    assert_eq!(response.source, SearchSource::Disabled);
    assert!(response.results.items.is_empty());
    assert_eq!(engine.list("item", PageRequest::default()).await.unwrap().items.len(), 1);
    engine.shutdown().await;
}

#[tokio::test]
async fn response_serializes_with_meta_and_source() {
    let index = Arc::new(InMemoryIndex::new());
    let engine = engine(Arc::new(InMemoryStore::with_rows(vec![item(1, "lamp")])), index).await;
    engine.reindex("item").await.unwrap();

    let response = engine.search("item", "lamp", PageRequest::default()).await.unwrap();
    let value = serde_json::to_value(&response).unwrap();

    assert_eq!(value["source"], json!("index"));
    assert_eq!(value["_meta"]["total_items"], json!(1));
    assert_eq!(value["items"].as_array().map(Vec::len), Some(1));
    engine.shutdown().await;
}

#![cfg(not(target_arch = "wasm32"))]

mod common;

use std::sync::{Arc, Mutex};

use common::{books, doc_data, exists, ids, in_memory, seed};
use firestorable::collection::{
    CollectionOptions, CollectionQuery, DocLookup, FetchMode, GetOptions, RealtimeMode,
};
use firestorable::firestore::api::{where_field, FilterOperator, PassthroughConverter, SetOptions};
use serde_json::json;

#[tokio::test]
async fn unobserved_auto_collection_stays_quiet() {
    let (firestore, datastore) = in_memory();
    seed(&firestore, "books/a", json!({"title": "Dune"})).await;

    let collection = books(&firestore, CollectionOptions::default());
    seed(&firestore, "books/b", json!({"title": "Emma"})).await;

    assert!(collection.docs().is_empty());
    assert!(!collection.is_fetched());
    assert!(!collection.is_loading());
    assert!(!collection.is_active());
    assert_eq!(datastore.listener_count(), 0);
}

#[tokio::test]
async fn first_observer_fetches_once_and_follows_changes() {
    let (firestore, datastore) = in_memory();
    seed(&firestore, "books/a", json!({"title": "Dune"})).await;
    seed(&firestore, "books/b", json!({"title": "Emma"})).await;
    let collection = books(&firestore, CollectionOptions::default());

    let deliveries: Arc<Mutex<Vec<usize>>> = Arc::new(Mutex::new(Vec::new()));
    let captured = deliveries.clone();
    let first = collection.observe_docs(move |docs| captured.lock().unwrap().push(docs.len()));

    assert_eq!(*deliveries.lock().unwrap(), vec![2]);
    assert!(collection.is_fetched());
    assert!(!collection.is_loading());
    assert_eq!(datastore.listener_count(), 1);

    let _second = collection.observe_is_fetched(|_| {});
    assert_eq!(datastore.listener_count(), 1);

    seed(&firestore, "books/c", json!({"title": "Ulysses"})).await;
    assert_eq!(ids(&collection), vec!["a", "b", "c"]);
    assert_eq!(*deliveries.lock().unwrap(), vec![2, 3]);

    firestore.delete_doc(&firestore.doc("books/a").unwrap()).await.unwrap();
    assert_eq!(ids(&collection), vec!["b", "c"]);
    drop(first);
}

#[tokio::test]
async fn last_observer_leaving_stops_tracking() {
    let (firestore, datastore) = in_memory();
    seed(&firestore, "books/a", json!({"title": "Dune"})).await;
    let collection = books(&firestore, CollectionOptions::default());

    let observer = collection.observe_docs(|_| {});
    assert_eq!(ids(&collection), vec!["a"]);
    drop(observer);

    assert!(!collection.is_active());
    assert_eq!(datastore.listener_count(), 0);
    seed(&firestore, "books/b", json!({"title": "Emma"})).await;
    assert_eq!(ids(&collection), vec!["a"]);
    assert!(collection.is_fetched());

    // Observing again starts a fresh cycle that replaces the stale entries.
    firestore.delete_doc(&firestore.doc("books/a").unwrap()).await.unwrap();
    let _observer = collection.observe_docs(|_| {});
    assert_eq!(ids(&collection), vec!["b"]);
}

#[tokio::test]
async fn empty_query_clears_without_subscribing() {
    let (firestore, datastore) = in_memory();
    seed(&firestore, "books/a", json!({"title": "Dune"})).await;
    let collection = books(&firestore, CollectionOptions::default());
    let _observer = collection.observe_docs(|_| {});
    assert_eq!(ids(&collection), vec!["a"]);

    collection.set_query(CollectionQuery::Empty);
    assert!(collection.docs().is_empty());
    assert!(collection.is_fetched());
    assert!(!collection.is_loading());
    assert!(!collection.is_active());
    assert_eq!(datastore.listener_count(), 0);
}

#[tokio::test]
async fn empty_query_clears_an_unobserved_fetched_mirror() {
    let (firestore, _datastore) = in_memory();
    seed(&firestore, "books/a", json!({"title": "Dune"})).await;
    let collection = books(&firestore, CollectionOptions::default());
    drop(collection.observe_docs(|_| {}));
    assert_eq!(ids(&collection), vec!["a"]);

    collection.set_query(CollectionQuery::Empty);
    assert!(collection.is_fetched());
    assert!(collection.docs().is_empty());
}

#[tokio::test]
async fn query_change_refetches_matching_documents() {
    let (firestore, _datastore) = in_memory();
    seed(&firestore, "books/a", json!({"genre": "scifi"})).await;
    seed(&firestore, "books/b", json!({"genre": "novel"})).await;
    seed(&firestore, "books/c", json!({"genre": "scifi"})).await;
    let collection = books(&firestore, CollectionOptions::default());
    let _observer = collection.observe_docs(|_| {});
    assert_eq!(ids(&collection).len(), 3);

    collection.set_query(CollectionQuery::filtered(|books| {
        books.query().where_field("genre", FilterOperator::Equal, "scifi")
    }));
    assert_eq!(ids(&collection), vec!["a", "c"]);

    seed(&firestore, "books/b", json!({"genre": "scifi"})).await;
    assert_eq!(ids(&collection), vec!["a", "b", "c"]);
}

#[tokio::test]
async fn fetched_and_loading_are_never_both_set() {
    let (firestore, _datastore) = in_memory();
    seed(&firestore, "books/a", json!({"genre": "scifi"})).await;
    seed(&firestore, "books/b", json!({"genre": "novel"})).await;
    let collection = books(&firestore, CollectionOptions::default());

    let states: Arc<Mutex<Vec<(bool, bool)>>> = Arc::new(Mutex::new(Vec::new()));
    let captured = states.clone();
    let reader = collection.clone();
    let _observer = collection.observe_is_fetched(move |fetched| {
        captured.lock().unwrap().push((fetched, reader.is_loading()));
    });
    collection.set_query(CollectionQuery::filtered(|books| {
        books.query().where_field("genre", FilterOperator::Equal, "scifi")
    }));
    assert_eq!(ids(&collection), vec!["a"]);

    // First snapshot, then the refetch for the new query.
    assert_eq!(
        *states.lock().unwrap(),
        vec![(false, false), (true, false), (false, false), (true, false)]
    );
}

#[tokio::test]
async fn last_match_leaving_a_filtered_mirror_empties_it() {
    let (firestore, _datastore) = in_memory();
    seed(&firestore, "books/a", json!({"genre": "scifi"})).await;
    seed(&firestore, "books/b", json!({"genre": "novel"})).await;
    let collection = books(
        &firestore,
        CollectionOptions {
            query: CollectionQuery::filtered(|books| {
                books.query().where_field("genre", FilterOperator::Equal, "scifi")
            }),
            ..Default::default()
        },
    );
    let _observer = collection.observe_docs(|_| {});
    assert_eq!(ids(&collection), vec!["a"]);

    seed(&firestore, "books/a", json!({"genre": "novel"})).await;
    assert!(collection.docs().is_empty());
    assert!(collection.is_fetched());
    assert!(collection.is_active());
}

#[tokio::test]
async fn observers_after_a_query_switching_observer_see_the_final_docs() {
    let (firestore, _datastore) = in_memory();
    seed(&firestore, "books/a", json!({"title": "Dune"})).await;
    let collection = books(
        &firestore,
        CollectionOptions {
            query: CollectionQuery::Empty,
            ..Default::default()
        },
    );

    let switcher = collection.clone();
    let _first = collection.observe_docs(move |docs| {
        if !docs.is_empty() {
            switcher.set_query(CollectionQuery::Empty);
        }
    });
    let last_seen: Arc<Mutex<Option<usize>>> = Arc::new(Mutex::new(None));
    let captured = last_seen.clone();
    let _second = collection.observe_docs(move |docs| *captured.lock().unwrap() = Some(docs.len()));

    collection.set_query(CollectionQuery::All);
    assert!(collection.docs().is_empty());
    assert_eq!(*last_seen.lock().unwrap(), Some(collection.docs().len()));
}

#[tokio::test]
async fn query_change_before_first_fetch_is_deferred() {
    let (firestore, datastore) = in_memory();
    seed(&firestore, "books/a", json!({"genre": "scifi"})).await;
    seed(&firestore, "books/b", json!({"genre": "novel"})).await;
    let collection = books(&firestore, CollectionOptions::default());

    collection.set_query(CollectionQuery::filtered(|books| {
        books.query().where_field("genre", FilterOperator::Equal, "novel")
    }));
    assert_eq!(datastore.listener_count(), 0);

    let _observer = collection.observe_is_fetched(|_| {});
    assert_eq!(ids(&collection), vec!["b"]);
}

#[tokio::test]
async fn manual_mode_fetches_only_on_request() {
    let (firestore, datastore) = in_memory();
    seed(&firestore, "books/a", json!({"title": "Dune"})).await;
    let collection = books(
        &firestore,
        CollectionOptions {
            fetch_mode: FetchMode::Manual,
            realtime_mode: RealtimeMode::Off,
            ..Default::default()
        },
    );

    let _observer = collection.observe_docs(|_| {});
    assert!(collection.docs().is_empty());
    assert!(!collection.is_fetched());
    assert!(!collection.is_loading());
    assert_eq!(datastore.listener_count(), 0);

    collection.fetch_async().await.unwrap();
    assert_eq!(ids(&collection), vec!["a"]);
    assert!(collection.is_fetched());
    assert_eq!(datastore.listener_count(), 0);

    seed(&firestore, "books/b", json!({"title": "Emma"})).await;
    assert_eq!(ids(&collection), vec!["a"]);

    collection.fetch_async().await.unwrap();
    assert_eq!(ids(&collection), vec!["a", "b"]);
}

#[tokio::test]
async fn manual_realtime_mode_keeps_streaming_after_fetch() {
    let (firestore, datastore) = in_memory();
    let collection = books(
        &firestore,
        CollectionOptions {
            fetch_mode: FetchMode::Manual,
            ..Default::default()
        },
    );
    collection.fetch_async().await.unwrap();
    assert_eq!(datastore.listener_count(), 1);

    seed(&firestore, "books/a", json!({"title": "Dune"})).await;
    assert_eq!(ids(&collection), vec!["a"]);
}

#[tokio::test]
async fn fetch_async_requires_manual_mode() {
    let (firestore, _datastore) = in_memory();
    let collection = books(&firestore, CollectionOptions::default());
    let err = collection.fetch_async().await.unwrap_err();
    assert_eq!(err.code_str(), "firestore/failed-precondition");
}

#[tokio::test]
async fn realtime_off_takes_a_single_snapshot() {
    let (firestore, datastore) = in_memory();
    seed(&firestore, "books/a", json!({"title": "Dune"})).await;
    let collection = books(
        &firestore,
        CollectionOptions {
            realtime_mode: RealtimeMode::Off,
            ..Default::default()
        },
    );

    let _observer = collection.observe_docs(|_| {});
    assert_eq!(ids(&collection), vec!["a"]);
    assert!(collection.is_fetched());
    assert!(!collection.is_active());
    assert_eq!(datastore.listener_count(), 0);

    seed(&firestore, "books/b", json!({"title": "Emma"})).await;
    assert_eq!(ids(&collection), vec!["a"]);
}

#[tokio::test]
async fn once_mode_fetches_at_construction() {
    let (firestore, datastore) = in_memory();
    seed(&firestore, "books/a", json!({"title": "Dune"})).await;
    let collection = books(
        &firestore,
        CollectionOptions {
            fetch_mode: FetchMode::Once,
            ..Default::default()
        },
    );
    assert_eq!(ids(&collection), vec!["a"]);
    assert_eq!(datastore.listener_count(), 1);

    collection.dispose();
    assert_eq!(datastore.listener_count(), 0);
    assert!(collection.docs().is_empty());
}

#[tokio::test]
async fn add_many_returns_distinct_ids_in_order() {
    let (firestore, _datastore) = in_memory();
    let collection = books(&firestore, CollectionOptions::default());
    let models = vec![
        doc_data(json!({"title": "Dune"})),
        doc_data(json!({"title": "Emma"})),
        doc_data(json!({"title": "Ulysses"})),
    ];
    let new_ids = collection.add_many_async(&models, None).await.unwrap();
    assert_eq!(new_ids.len(), 3);
    assert!(new_ids.iter().all(|id| id.len() == 20));
    assert_ne!(new_ids[0], new_ids[1]);
    assert_ne!(new_ids[1], new_ids[2]);
    for (id, model) in new_ids.iter().zip(&models) {
        let doc = collection.get_async(id, GetOptions { watch: false }).await.unwrap();
        assert_eq!(doc.data().as_ref(), Some(model));
    }

    assert!(collection.add_many_async(&[], None).await.unwrap().is_empty());
}

#[tokio::test]
async fn add_uses_given_id_and_layered_set_options() {
    let (firestore, _datastore) = in_memory();
    seed(&firestore, "books/dune", json!({"title": "Dune", "pages": 412})).await;
    let collection = books(
        &firestore,
        CollectionOptions {
            default_set_options: Some(SetOptions::merge_all()),
            ..Default::default()
        },
    );

    let id = collection
        .add_async(&doc_data(json!({"author": "Herbert"})), Some("dune"), None)
        .await
        .unwrap();
    assert_eq!(id, "dune");
    let doc = collection.get_async("dune", GetOptions { watch: false }).await.unwrap();
    assert_eq!(
        doc.data(),
        Some(doc_data(json!({"title": "Dune", "pages": 412, "author": "Herbert"})))
    );

    collection
        .add_async(
            &doc_data(json!({"title": "Dune"})),
            Some("dune"),
            Some(SetOptions::overwrite()),
        )
        .await
        .unwrap();
    let doc = collection.get_async("dune", GetOptions { watch: false }).await.unwrap();
    assert_eq!(doc.data(), Some(doc_data(json!({"title": "Dune"}))));
}

#[tokio::test]
async fn update_merges_fields_and_skips_missing_ids() {
    let (firestore, _datastore) = in_memory();
    seed(&firestore, "books/a", json!({"title": "Dune", "pages": 412})).await;
    let collection = books(&firestore, CollectionOptions::default());

    collection
        .update_async(doc_data(json!({"pages": 500})), &["a", "missing"])
        .await
        .unwrap();
    assert!(!exists(&firestore, "books/missing").await);
    let doc = collection.get_async("a", GetOptions { watch: false }).await.unwrap();
    assert_eq!(doc.data(), Some(doc_data(json!({"title": "Dune", "pages": 500}))));

    collection.update_async(doc_data(json!({"x": 1})), &[]).await.unwrap();
}

#[tokio::test]
async fn watched_document_follows_deletion() {
    let (firestore, _datastore) = in_memory();
    seed(&firestore, "books/a", json!({"title": "Dune"})).await;
    let collection = books(&firestore, CollectionOptions::default());

    let watched = collection.get_async("a", GetOptions::default()).await.unwrap();
    let frozen = collection.get_async("a", GetOptions { watch: false }).await.unwrap();
    assert!(watched.is_watching());

    collection.delete_async(&["a"]).await.unwrap();
    assert!(watched.data().is_none());
    assert_eq!(frozen.data(), Some(doc_data(json!({"title": "Dune"}))));

    let err = collection.get_async("a", GetOptions::default()).await.unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(
        err.message(),
        "Collection 'books' contains no document with id 'a'"
    );
}

#[tokio::test]
async fn get_many_keeps_positions_of_missing_ids() {
    let (firestore, _datastore) = in_memory();
    seed(&firestore, "books/a", json!({"title": "Dune"})).await;
    seed(&firestore, "books/b", json!({"title": "Emma"})).await;
    let collection = books(&firestore, CollectionOptions::default());

    let lookups = collection
        .get_many_async(&["a", "missing", "b"], GetOptions { watch: false })
        .await;
    assert_eq!(lookups.len(), 3);
    assert_eq!(lookups[0].found().map(|doc| doc.id()), Some("a"));
    assert_eq!(lookups[1].missing_id(), Some("missing"));
    assert!(matches!(lookups[2], DocLookup::Found(ref doc) if doc.id() == "b"));
}

#[tokio::test]
async fn delete_many_uses_one_batch() {
    let (firestore, _datastore) = in_memory();
    seed(&firestore, "books/a", json!({"n": 1})).await;
    seed(&firestore, "books/b", json!({"n": 2})).await;
    seed(&firestore, "books/c", json!({"n": 3})).await;
    let collection = books(&firestore, CollectionOptions::default());
    let deliveries = Arc::new(Mutex::new(0usize));
    let counter = deliveries.clone();
    let _observer = collection.observe_docs(move |_| *counter.lock().unwrap() += 1);
    *deliveries.lock().unwrap() = 0;

    collection.delete_async(&["a", "b"]).await.unwrap();
    assert_eq!(ids(&collection), vec!["c"]);
    assert_eq!(*deliveries.lock().unwrap(), 1);

    collection.delete_async(&[]).await.unwrap();
}

#[tokio::test]
async fn query_async_ignores_the_mirror_query() {
    let (firestore, _datastore) = in_memory();
    seed(&firestore, "books/a", json!({"genre": "scifi", "year": 1965})).await;
    seed(&firestore, "books/b", json!({"genre": "novel", "year": 1815})).await;
    let collection = books(
        &firestore,
        CollectionOptions::<PassthroughConverter> {
            query: CollectionQuery::Empty,
            ..Default::default()
        },
    );

    let models = collection
        .query_async([where_field("year", FilterOperator::LessThan, 1900)])
        .await
        .unwrap();
    assert_eq!(models, vec![doc_data(json!({"genre": "novel", "year": 1815}))]);
    assert!(collection.docs().is_empty());
}

#[tokio::test]
async fn remote_failures_propagate() {
    let (firestore, datastore) = in_memory();
    seed(&firestore, "books/a", json!({"title": "Dune"})).await;
    let collection = books(&firestore, CollectionOptions::default());
    datastore.set_offline(true);

    // A read failure is not a missing document: the update must fail.
    let err = collection
        .update_async(doc_data(json!({"title": "Emma"})), &["a"])
        .await
        .unwrap_err();
    assert_eq!(err.code_str(), "firestore/unavailable");

    let err = collection
        .add_async(&doc_data(json!({"title": "Dune"})), None, None)
        .await
        .unwrap_err();
    assert_eq!(err.code_str(), "firestore/unavailable");
    let err = collection.delete_async(&["a"]).await.unwrap_err();
    assert_eq!(err.code_str(), "firestore/unavailable");

    // A failed subscription leaves the mirror idle rather than loading.
    let _observer = collection.observe_docs(|_| {});
    assert!(!collection.is_loading());
    assert!(!collection.is_fetched());

    let once = firestorable::collection::Collection::new(
        &firestore,
        "books",
        CollectionOptions::<PassthroughConverter> {
            fetch_mode: FetchMode::Once,
            ..Default::default()
        },
        Default::default(),
    );
    assert_eq!(once.unwrap_err().code_str(), "firestore/unavailable");
}

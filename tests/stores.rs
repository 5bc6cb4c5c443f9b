#![cfg(not(target_arch = "wasm32"))]

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use common::{doc_data, exists, in_memory, seed, MockAuthProvider};
use firestorable::collection::GetOptions;
use firestorable::document::Doc;
use firestorable::firestore::api::PassthroughConverter;
use firestorable::firestore::FirestoreError;
use firestorable::stores::{
    ActiveDocument, AuthStore, AuthStoreOptions, AuthUser, CrudStore, DeleteOptions, StoreOptions,
};
use futures::FutureExt;
use serde_json::json;

fn book_store(firestore: &firestorable::firestore::Firestore) -> CrudStore<PassthroughConverter> {
    CrudStore::new(firestore, StoreOptions::new("books")).unwrap()
}

#[tokio::test]
async fn active_document_is_watched_until_replaced() {
    let (firestore, _datastore) = in_memory();
    seed(&firestore, "books/a", json!({"title": "Dune"})).await;
    seed(&firestore, "books/b", json!({"title": "Emma"})).await;
    let store = book_store(&firestore);

    store.set_active_document_id(Some("a")).await.unwrap();
    assert_eq!(store.active_document_id().as_deref(), Some("a"));
    assert_eq!(
        store.active_document(),
        Some(ActiveDocument::Persisted(doc_data(json!({"title": "Dune"}))))
    );

    store
        .update_active_document(doc_data(json!({"title": "Dune Messiah"})))
        .await
        .unwrap();
    assert_eq!(
        store.active_document(),
        Some(ActiveDocument::Persisted(doc_data(json!({"title": "Dune Messiah"}))))
    );

    let previous = store.active_doc().unwrap();
    store.set_active_document_id(Some("b")).await.unwrap();
    assert!(!previous.is_watching());
    assert!(store.active_doc().unwrap().is_watching());

    store.set_active_document_id(None).await.unwrap();
    assert!(store.active_document().is_none());
}

#[tokio::test]
async fn persisted_document_takes_precedence_over_draft() {
    let (firestore, _datastore) = in_memory();
    seed(&firestore, "books/a", json!({"title": "Dune"})).await;
    let store = book_store(&firestore);

    store.create_new_document(doc_data(json!({"title": "Draft"}))).await;
    assert!(matches!(store.active_document(), Some(ActiveDocument::Draft(_))));

    store.set_active_document_id(Some("a")).await.unwrap();
    assert!(matches!(store.active_document(), Some(ActiveDocument::Persisted(_))));

    store.set_active_document_id(None).await.unwrap();
    assert!(store.active_document().is_none());
}

#[tokio::test]
async fn deletes_are_logged_not_returned() {
    let (firestore, datastore) = in_memory();
    seed(&firestore, "books/a", json!({"title": "Dune"})).await;
    seed(&firestore, "books/b", json!({"title": "Emma"})).await;
    let store = book_store(&firestore);

    // The passthrough converter has no cleared payload, so a soft delete
    // fails and leaves the document alone.
    store
        .delete_documents(DeleteOptions { use_flag: true }, &["a"])
        .await;
    assert!(exists(&firestore, "books/a").await);

    store.delete_document("a", DeleteOptions::default()).await;
    assert!(!exists(&firestore, "books/a").await);

    datastore.set_offline(true);
    store.delete_document("b", DeleteOptions::default()).await;
    datastore.set_offline(false);
    assert!(exists(&firestore, "books/b").await);
}

#[tokio::test]
async fn add_documents_round_trips_through_the_collection() {
    let (firestore, _datastore) = in_memory();
    let store = book_store(&firestore);
    let ids = store
        .add_documents(&[doc_data(json!({"n": 1})), doc_data(json!({"n": 2}))])
        .await
        .unwrap();
    assert_eq!(ids.len(), 2);

    let id = store
        .add_document(&doc_data(json!({"n": 3})), Some("three"))
        .await
        .unwrap();
    store.update_document(doc_data(json!({"n": 4})), &id).await.unwrap();
    let doc = store
        .collection()
        .get_async("three", GetOptions { watch: false })
        .await
        .unwrap();
    assert_eq!(doc.data(), Some(doc_data(json!({"n": 4}))));
}

#[tokio::test]
async fn dispose_releases_the_active_document() {
    let (firestore, datastore) = in_memory();
    seed(&firestore, "books/a", json!({"title": "Dune"})).await;
    let store = book_store(&firestore);
    store.set_active_document_id(Some("a")).await.unwrap();
    assert_eq!(datastore.listener_count(), 1);

    store.dispose();
    assert_eq!(datastore.listener_count(), 0);
    assert!(store.active_document_id().is_none());
}

#[tokio::test]
async fn new_user_document_is_created_and_activated() {
    let (firestore, _datastore) = in_memory();
    let provider = MockAuthProvider::new();
    let store: AuthStore = AuthStore::new(&firestore, provider.clone(), AuthStoreOptions::default()).unwrap();
    assert!(!store.is_auth_initialised());

    let user = AuthUser {
        uid: "u1".into(),
        name: Some("Ada".into()),
        email: None,
    };
    store.set_user(Some(user)).await.unwrap();

    assert!(store.is_auth_initialised());
    assert_eq!(store.store().active_document_id().as_deref(), Some("u1"));
    assert_eq!(store.user(), Some(doc_data(json!({"uid": "u1", "name": "Ada"}))));
    assert!(exists(&firestore, "users/u1").await);
}

#[tokio::test]
async fn existing_user_is_patched_not_recreated() {
    let (firestore, _datastore) = in_memory();
    seed(&firestore, "users/u1", json!({"uid": "u1", "plan": "pro"})).await;
    let provider = MockAuthProvider::new();
    let patched = Arc::new(AtomicUsize::new(0));
    let counter = patched.clone();
    let options = AuthStoreOptions::<PassthroughConverter> {
        patch_existing_user: Some(Arc::new(move |doc: Doc, user: AuthUser| {
            counter.fetch_add(1, Ordering::SeqCst);
            assert_eq!(user.uid, doc.id());
            async move { Ok::<_, FirestoreError>(doc) }.boxed()
        })),
        ..Default::default()
    };
    let store = AuthStore::new(&firestore, provider.clone(), options).unwrap();

    store.set_user(Some(AuthUser::new("u1"))).await.unwrap();
    assert_eq!(patched.load(Ordering::SeqCst), 1);
    assert_eq!(store.user(), Some(doc_data(json!({"uid": "u1", "plan": "pro"}))));
}

#[tokio::test]
async fn sign_out_clears_the_user_and_notifies() {
    let (firestore, _datastore) = in_memory();
    let provider = MockAuthProvider::new();
    let signed_out = Arc::new(AtomicUsize::new(0));
    let counter = signed_out.clone();
    let options = AuthStoreOptions::<PassthroughConverter> {
        on_sign_out: Some(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })),
        ..Default::default()
    };
    let store = AuthStore::new(&firestore, provider.clone(), options).unwrap();

    store.set_user(Some(AuthUser::new("u1"))).await.unwrap();
    store.set_user(None).await.unwrap();
    assert!(store.is_auth_initialised());
    assert!(store.user().is_none());
    assert_eq!(signed_out.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn run_follows_the_provider_until_it_closes() {
    let (firestore, _datastore) = in_memory();
    let provider = MockAuthProvider::new();
    let store: AuthStore = AuthStore::new(&firestore, provider.clone(), AuthStoreOptions::default()).unwrap();

    let driver = async {
        provider.sign_in(AuthUser::new("u1")).await;
        store.sign_out().await.unwrap();
        provider.sign_in(AuthUser::new("u2")).await;
        provider.close();
    };
    futures::join!(store.run(), driver);

    assert_eq!(store.logged_in_user(), Some(AuthUser::new("u2")));
    assert_eq!(store.store().active_document_id().as_deref(), Some("u2"));
    assert!(exists(&firestore, "users/u1").await);
    assert!(exists(&firestore, "users/u2").await);
}

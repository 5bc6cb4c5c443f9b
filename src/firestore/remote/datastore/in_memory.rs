use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;

use crate::firestore::api::{
    compute_doc_changes, DocumentData, DocumentSnapshot, Query, QuerySnapshot, SetOptions,
};
use crate::firestore::error::{not_found, unavailable, FirestoreResult};
use crate::firestore::model::DocumentKey;
use crate::util::{deep_merge, shallow_merge, ListenerRegistration};

use super::{Datastore, DocumentSnapshotListener, QuerySnapshotListener, WriteOperation};

type DocumentStore = BTreeMap<DocumentKey, DocumentData>;

/// Process-local datastore with live query and document listeners.
#[derive(Clone, Default)]
pub struct InMemoryDatastore {
    inner: Arc<InMemoryInner>,
}

#[derive(Default)]
struct InMemoryInner {
    documents: Mutex<DocumentStore>,
    listeners: Mutex<BTreeMap<u64, Arc<Listener>>>,
    next_listener_id: AtomicU64,
    offline: AtomicBool,
}

struct Listener {
    active: AtomicBool,
    target: ListenerTarget,
}

enum ListenerTarget {
    Query {
        query: Query,
        callback: QuerySnapshotListener,
        last: Mutex<Vec<DocumentSnapshot>>,
    },
    Document {
        key: DocumentKey,
        callback: DocumentSnapshotListener,
        last: Mutex<Option<DocumentData>>,
    },
}

enum Delivery {
    Query(QuerySnapshotListener, QuerySnapshot),
    Document(DocumentSnapshotListener, DocumentSnapshot),
}

impl Delivery {
    fn deliver(self) {
        match self {
            Delivery::Query(callback, snapshot) => callback(&snapshot),
            Delivery::Document(callback, snapshot) => callback(&snapshot),
        }
    }
}

impl InMemoryDatastore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates a lost connection: while offline every operation fails
    /// with `firestore/unavailable`. Open listeners stay registered.
    pub fn set_offline(&self, offline: bool) {
        self.inner.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of listeners currently registered.
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.lock().unwrap().len()
    }

    fn ensure_online(&self) -> FirestoreResult<()> {
        if self.inner.offline.load(Ordering::SeqCst) {
            return Err(unavailable("The in-memory datastore is offline"));
        }
        Ok(())
    }

    fn write(&self, writes: Vec<WriteOperation>) -> FirestoreResult<()> {
        self.ensure_online()?;
        {
            let mut store = self.inner.documents.lock().unwrap();
            let mut staged = store.clone();
            for write in writes {
                apply_write(&mut staged, write)?;
            }
            *store = staged;
        }
        self.inner.dispatch();
        Ok(())
    }

    fn register(&self, target: ListenerTarget) -> ListenerRegistration {
        let id = self.inner.next_listener_id.fetch_add(1, Ordering::SeqCst);
        let listener = Arc::new(Listener {
            active: AtomicBool::new(true),
            target,
        });
        self.inner
            .listeners
            .lock()
            .unwrap()
            .insert(id, listener.clone());

        let initial = {
            let store = self.inner.documents.lock().unwrap();
            listener.initial_delivery(&store)
        };
        initial.deliver();

        let inner: Weak<InMemoryInner> = Arc::downgrade(&self.inner);
        ListenerRegistration::new(move || {
            listener.active.store(false, Ordering::SeqCst);
            if let Some(inner) = inner.upgrade() {
                inner.listeners.lock().unwrap().remove(&id);
            }
        })
    }
}

impl InMemoryInner {
    /// Re-evaluates every listener and delivers to those whose view changed.
    ///
    /// Listeners are cloned out of the registry and the document lock is
    /// released before any callback runs, so callbacks may write or listen.
    fn dispatch(&self) {
        let listeners: Vec<Arc<Listener>> = self.listeners.lock().unwrap().values().cloned().collect();
        let store = self.documents.lock().unwrap().clone();
        for listener in listeners {
            if !listener.active.load(Ordering::SeqCst) {
                continue;
            }
            if let Some(delivery) = listener.next_delivery(&store) {
                log::trace!("in-memory datastore dispatching snapshot");
                delivery.deliver();
            }
        }
    }
}

impl Listener {
    fn initial_delivery(&self, store: &DocumentStore) -> Delivery {
        match &self.target {
            ListenerTarget::Query {
                query,
                callback,
                last,
            } => {
                let documents = evaluate_query(store, query);
                *last.lock().unwrap() = documents.clone();
                Delivery::Query(callback.clone(), QuerySnapshot::from_documents(documents))
            }
            ListenerTarget::Document {
                key,
                callback,
                last,
            } => {
                let data = store.get(key).cloned();
                *last.lock().unwrap() = data.clone();
                Delivery::Document(callback.clone(), DocumentSnapshot::new(key.clone(), data))
            }
        }
    }

    fn next_delivery(&self, store: &DocumentStore) -> Option<Delivery> {
        match &self.target {
            ListenerTarget::Query {
                query,
                callback,
                last,
            } => {
                let documents = evaluate_query(store, query);
                let changes = {
                    let mut last = last.lock().unwrap();
                    let changes = compute_doc_changes(&last, &documents);
                    if changes.is_empty() {
                        return None;
                    }
                    *last = documents.clone();
                    changes
                };
                Some(Delivery::Query(
                    callback.clone(),
                    QuerySnapshot::new(documents, changes),
                ))
            }
            ListenerTarget::Document {
                key,
                callback,
                last,
            } => {
                let data = store.get(key).cloned();
                {
                    let mut last = last.lock().unwrap();
                    if *last == data {
                        return None;
                    }
                    *last = data.clone();
                }
                Some(Delivery::Document(
                    callback.clone(),
                    DocumentSnapshot::new(key.clone(), data),
                ))
            }
        }
    }
}

fn evaluate_query(store: &DocumentStore, query: &Query) -> Vec<DocumentSnapshot> {
    let candidates = store
        .iter()
        .filter(|(key, _)| query.matches_collection(key))
        .map(|(key, data)| DocumentSnapshot::new(key.clone(), Some(data.clone())))
        .collect();
    query.apply(candidates)
}

fn apply_write(store: &mut DocumentStore, write: WriteOperation) -> FirestoreResult<()> {
    match write {
        WriteOperation::Set { key, data, options } => {
            if options.is_merge() {
                let entry = store.entry(key).or_default();
                deep_merge(entry, &data);
            } else {
                store.insert(key, data);
            }
        }
        WriteOperation::Update { key, data } => {
            let current = store.remove(&key).ok_or_else(|| {
                not_found(format!(
                    "No document to update: {}",
                    key.path().canonical_string()
                ))
            })?;
            store.insert(key, shallow_merge(current, &data));
        }
        WriteOperation::Delete { key } => {
            store.remove(&key);
        }
    }
    Ok(())
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl Datastore for InMemoryDatastore {
    async fn get_document(&self, key: &DocumentKey) -> FirestoreResult<DocumentSnapshot> {
        self.ensure_online()?;
        let store = self.inner.documents.lock().unwrap();
        Ok(DocumentSnapshot::new(key.clone(), store.get(key).cloned()))
    }

    async fn set_document(
        &self,
        key: &DocumentKey,
        data: DocumentData,
        options: SetOptions,
    ) -> FirestoreResult<()> {
        self.write(vec![WriteOperation::Set {
            key: key.clone(),
            data,
            options,
        }])
    }

    async fn update_document(&self, key: &DocumentKey, data: DocumentData) -> FirestoreResult<()> {
        self.write(vec![WriteOperation::Update {
            key: key.clone(),
            data,
        }])
    }

    async fn delete_document(&self, key: &DocumentKey) -> FirestoreResult<()> {
        self.write(vec![WriteOperation::Delete { key: key.clone() }])
    }

    async fn commit(&self, writes: Vec<WriteOperation>) -> FirestoreResult<()> {
        self.write(writes)
    }

    async fn run_query(&self, query: &Query) -> FirestoreResult<Vec<DocumentSnapshot>> {
        self.ensure_online()?;
        let store = self.inner.documents.lock().unwrap();
        Ok(evaluate_query(&store, query))
    }

    fn listen_query(
        &self,
        query: Query,
        listener: QuerySnapshotListener,
    ) -> FirestoreResult<ListenerRegistration> {
        self.ensure_online()?;
        Ok(self.register(ListenerTarget::Query {
            query,
            callback: listener,
            last: Mutex::new(Vec::new()),
        }))
    }

    fn listen_document(
        &self,
        key: DocumentKey,
        listener: DocumentSnapshotListener,
    ) -> FirestoreResult<ListenerRegistration> {
        self.ensure_online()?;
        Ok(self.register(ListenerTarget::Document {
            key,
            callback: listener,
            last: Mutex::new(None),
        }))
    }
}
